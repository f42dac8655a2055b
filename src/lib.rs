//! interverse - federated chat relay
//!
//! Retranslates messages posted in any participating room into every other
//! participating room across a loosely-coupled federation of communities,
//! with per-sender rate limiting, content-safety filtering, moderated
//! deletion and eventual convergence between independently-running
//! instances.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod filter;
pub mod guild;
pub mod history;
pub mod logging;
pub mod rate_limit;
pub mod reconciler;
pub mod registry;
pub mod service;
pub mod state;
pub mod transport;

pub use broadcast::{Broadcaster, OutboundContent, QuotedReply};
pub use config::{Config, LoggingConfig, RelayConfig};
pub use error::{RelayError, Result};
pub use filter::{NoScamDetector, PatternScamDetector, SafetyFilter, ScamDetector, Verdict};
pub use guild::{FederatedGuild, GuildDirectory};
pub use history::{BroadcastRecord, HistoryLedger};
pub use rate_limit::{MessageRateLimiter, RateLimitResult};
pub use reconciler::Reconciler;
pub use registry::{Endpoint, EndpointRegistry};
pub use service::{InboundMessage, RelayService};
pub use state::{FederationState, JsonFileStore, MemoryStore, StateStore};
pub use transport::{
    Attachment, GuildId, MessageId, MessageRef, Payload, RoomId, RoomInfo, RoomPermissions, Sink,
    SinkId, Transport, UserId,
};
