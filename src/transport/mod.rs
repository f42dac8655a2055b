//! Transport seam for interverse.
//!
//! The relay itself never talks to a concrete chat network. Everything it
//! needs from one is captured by the [`Transport`] trait: room/guild
//! enumeration, permission introspection, sink management and message
//! delivery. The [`local`] module provides an in-memory implementation used
//! by the test suite.

pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

id_type!(
    /// Identifier of one room (channel).
    RoomId
);
id_type!(
    /// Identifier of one guild (community of rooms).
    GuildId
);
id_type!(
    /// Identifier of one user.
    UserId
);
id_type!(
    /// Identifier of one delivered message.
    MessageId
);
id_type!(
    /// Identifier of one delivery sink.
    SinkId
);

/// Reference to a message living in a specific room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    /// Room the message was posted in.
    pub room: RoomId,
    /// The message id.
    pub message: MessageId,
}

impl MessageRef {
    /// Create a new message reference.
    pub fn new(room: RoomId, message: MessageId) -> Self {
        Self { room, message }
    }
}

impl std::fmt::Display for MessageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.room, self.message)
    }
}

/// A delivery sink bound to one room.
///
/// Sinks are webhook-equivalent capability handles: whoever holds one may
/// post into the room under an arbitrary label, without that post counting
/// as the process's own authored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sink {
    /// The sink id.
    pub id: SinkId,
    /// The room this sink posts into.
    pub room: RoomId,
}

/// Basic facts about a room, as reported by the transport.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    /// The room id.
    pub id: RoomId,
    /// The guild the room belongs to.
    pub guild: GuildId,
    /// The room's display name.
    pub name: String,
}

/// What the process is allowed to do in a room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomPermissions {
    /// May read the room.
    pub can_view: bool,
    /// May post plain messages.
    pub can_send: bool,
    /// May create and manage sinks.
    pub can_manage_sinks: bool,
}

impl RoomPermissions {
    /// Full permission set.
    pub fn all() -> Self {
        Self {
            can_view: true,
            can_send: true,
            can_manage_sinks: true,
        }
    }

    /// Whether the room can host a relay endpoint.
    pub fn sufficient(&self) -> bool {
        self.can_view && self.can_send && self.can_manage_sinks
    }
}

/// One attachment riding on a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Original file name.
    pub filename: String,
    /// Where the file can be fetched from.
    pub url: String,
    /// Size in bytes.
    pub size: u64,
}

/// The outbound payload handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Label shown as the author of the relayed copy.
    pub username: String,
    /// Avatar shown next to the label.
    pub avatar_url: Option<String>,
    /// Message body.
    pub content: String,
    /// Attachments to upload inline.
    pub attachments: Vec<Attachment>,
    /// When true the transport must not resolve any mention in the body.
    pub suppress_mentions: bool,
}

/// Abstract chat-network collaborator.
///
/// Implementations are expected to apply their own per-call timeouts; the
/// relay treats a timeout like any other failed call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// All guilds the process can currently reach.
    async fn list_guilds(&self) -> Result<Vec<GuildId>>;

    /// All rooms of one guild.
    async fn list_rooms(&self, guild: GuildId) -> Result<Vec<RoomInfo>>;

    /// The guild's display name, if it still resolves.
    async fn guild_name(&self, guild: GuildId) -> Result<Option<String>>;

    /// Effective permissions of the process in a room.
    async fn room_permissions(&self, room: RoomId) -> Result<RoomPermissions>;

    /// Look up the sink with the given label in a room, creating it if absent.
    async fn create_or_get_sink(&self, room: RoomId, label: &str) -> Result<Sink>;

    /// Deliver a payload through a sink.
    async fn execute(&self, sink: &Sink, payload: &Payload) -> Result<MessageRef>;

    /// Delete a previously delivered message.
    async fn delete(&self, reference: &MessageRef) -> Result<()>;

    /// Post a plain message authored by the process itself.
    ///
    /// Used for diagnostics and rejection replies, not for relayed traffic.
    async fn create_message(&self, room: RoomId, text: &str) -> Result<MessageRef>;

    /// The process's own user identity, for loop prevention.
    fn self_id(&self) -> UserId;
}
