//! Test helpers for E2E tests.
//!
//! Builds a small in-memory federation (one simulated chat network, a shared
//! state store and one or more relay instances) and helpers for feeding
//! inbound messages through the full pipeline.

use std::sync::Arc;

use interverse::state::{FederationState, MemoryStore, StateStore};
use interverse::transport::local::LocalTransport;
use interverse::{
    Config, GuildId, InboundMessage, PatternScamDetector, RelayService, RoomId, UserId,
};

/// The relay's own user id in tests.
pub const SELF_ID: UserId = UserId(1);

/// A user with moderation rights in tests.
pub const OPERATOR: UserId = UserId(900);

/// A test federation: one simulated network, one shared store, one relay.
pub struct TestFederation {
    /// The simulated chat network.
    pub transport: Arc<LocalTransport>,
    /// The shared federation-state store.
    pub store: MemoryStore,
    /// The relay instance under test.
    pub service: Arc<RelayService>,
    /// Participating guilds, one per room.
    pub guilds: Vec<GuildId>,
    /// Participating rooms.
    pub rooms: Vec<RoomId>,
}

/// Config tuned for tests: no jitter, no refresh TTL, instant announce.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.relay.converge_jitter_ms = 0;
    config.relay.guild_refresh_ttl_secs = 0;
    config.relay.announce_delay_secs = 0;
    config.relay.operators = vec![OPERATOR.0];
    config
}

/// Build a second relay instance over an existing federation.
pub fn attach_instance(transport: &Arc<LocalTransport>, store: &MemoryStore) -> Arc<RelayService> {
    RelayService::new(
        Arc::clone(transport) as Arc<dyn interverse::Transport>,
        Arc::new(store.clone()),
        Arc::new(PatternScamDetector::new()),
        &test_config(),
    )
}

/// Build a federation of `size` guilds, each with one participating room,
/// and run one reconciliation so every room has an acquired sink.
pub async fn federation(size: usize) -> TestFederation {
    let transport = Arc::new(LocalTransport::new(SELF_ID));

    let mut guilds = Vec::with_capacity(size);
    let mut rooms = Vec::with_capacity(size);
    for i in 0..size {
        let guild = transport.add_guild(format!("Guild {i}"));
        let room = transport.add_room(guild, "multiverse");
        guilds.push(guild);
        rooms.push(room);
    }

    let store = MemoryStore::new();
    let mut state = FederationState::default();
    state.whitelist.extend(guilds.iter().copied());
    store.save(&state).await.unwrap();

    let service = attach_instance(&transport, &store);
    // two cycles: the first discovers and pulls the whitelist, the second
    // acquires sinks for the now-whitelisted endpoints
    service.reconciler().cycle().await;
    service.reconciler().cycle().await;

    TestFederation {
        transport,
        store,
        service,
        guilds,
        rooms,
    }
}

impl TestFederation {
    /// Build an inbound event for a user message posted in `rooms[index]`.
    ///
    /// The origin message is materialized in the transport so delete-sync
    /// can be observed end to end.
    pub fn inbound(&self, index: usize, author: UserId, content: &str) -> InboundMessage {
        let room = self.rooms[index];
        let reference = self.transport.post_user_message(room, content);
        InboundMessage {
            reference,
            guild: self.guilds[index],
            author: Some(author),
            author_name: format!("user{}", author.0),
            author_avatar: None,
            via_sink: None,
            content: content.to_string(),
            attachments: Vec::new(),
            reply: None,
        }
    }

    /// Count sink-delivered messages currently visible in `rooms[index]`.
    pub fn delivered_count(&self, index: usize) -> usize {
        self.transport.sink_messages_in(self.rooms[index]).len()
    }
}
