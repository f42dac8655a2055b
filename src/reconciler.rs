//! Periodic discovery and convergence.
//!
//! The reconciler runs on its own timer, independent of message flow. Each
//! cycle discovers participating rooms, acquires missing sinks and converges
//! the shared federation state with whatever other instances have written.
//! A failure anywhere in a cycle is logged and never stops the loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::guild::GuildDirectory;
use crate::registry::EndpointRegistry;
use crate::state::{FederationState, StateStore};
use crate::transport::{GuildId, RoomId, Transport};
use crate::RelayError;

/// Periodic reconciliation of registry, sinks and shared state.
pub struct Reconciler {
    transport: Arc<dyn Transport>,
    registry: Arc<EndpointRegistry>,
    guilds: Arc<GuildDirectory>,
    store: Arc<dyn StateStore>,
    state: Arc<RwLock<FederationState>>,
    channel_name_pattern: String,
    sink_label: String,
    refresh_ttl: Duration,
    jitter_ms: u64,
    period: Duration,
    initial_delay: Duration,
}

impl Reconciler {
    /// Create a reconciler over the shared structures.
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<EndpointRegistry>,
        guilds: Arc<GuildDirectory>,
        store: Arc<dyn StateStore>,
        state: Arc<RwLock<FederationState>>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            guilds,
            store,
            state,
            channel_name_pattern: config.channel_name_pattern.to_lowercase(),
            sink_label: config.sink_label.clone(),
            refresh_ttl: Duration::from_secs(config.guild_refresh_ttl_secs),
            jitter_ms: config.converge_jitter_ms,
            period: Duration::from_secs(config.reconcile_period_secs),
            initial_delay: Duration::from_secs(config.reconcile_initial_delay_secs),
        }
    }

    /// Run the reconciliation loop forever.
    ///
    /// First cycle after the initial delay, then one per period.
    pub async fn run(self: Arc<Self>) {
        tokio::time::sleep(self.initial_delay).await;
        loop {
            self.cycle().await;
            tokio::time::sleep(self.period).await;
        }
    }

    /// One full cycle: discover, acquire sinks, converge shared state.
    pub async fn cycle(&self) {
        self.discover().await;
        self.acquire_sinks().await;
        self.converge().await;
        let endpoints = self.registry.len().await;
        debug!(endpoints, "reconciliation cycle complete");
    }

    /// Discover participating rooms and prune the ones that left.
    pub async fn discover(&self) {
        let state = self.state.read().await.clone();

        let guild_ids = match self.transport.list_guilds().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "could not enumerate guilds");
                return;
            }
        };
        let reachable: HashSet<GuildId> = guild_ids.iter().copied().collect();

        for guild in guild_ids {
            if state.banned_guilds.contains(&guild) {
                continue;
            }
            if !self.guilds.needs_refresh(guild, self.refresh_ttl).await {
                continue;
            }
            if let Err(e) = self.refresh_guild(guild, &state).await {
                warn!(guild = %guild, error = %e, "guild refresh failed");
            }
        }

        // endpoints of banned or vanished guilds are dropped outright
        self.registry
            .retain(|e| reachable.contains(&e.guild) && !state.banned_guilds.contains(&e.guild))
            .await;
        self.registry
            .set_whitelist(|guild| state.guild_allowed(guild))
            .await;
    }

    /// Re-enumerate one guild's rooms and update the registry.
    async fn refresh_guild(&self, guild: GuildId, state: &FederationState) -> crate::Result<()> {
        let name = self.transport.guild_name(guild).await?;
        self.guilds.set_name(guild, name).await;

        let rooms = self.transport.list_rooms(guild).await?;
        let mut matched: HashSet<RoomId> = HashSet::new();

        for room in rooms {
            if !room
                .name
                .to_lowercase()
                .contains(&self.channel_name_pattern)
            {
                continue;
            }
            let perms = match self.transport.room_permissions(room.id).await {
                Ok(perms) => perms,
                Err(e) => {
                    warn!(room = %room.id, error = %e, "permission check failed");
                    continue;
                }
            };
            if !perms.sufficient() {
                continue;
            }

            self.registry.upsert(room.id, guild).await;
            matched.insert(room.id);
            tokio::task::yield_now().await;
        }

        // rooms of this guild that stopped matching are pruned
        self.registry
            .retain(|e| e.guild != guild || matched.contains(&e.room))
            .await;
        self.guilds.set_rooms(guild, matched).await;
        Ok(())
    }

    /// Acquire sinks for eligible endpoints that lack one.
    pub async fn acquire_sinks(&self) {
        for endpoint in self.registry.list_sinkless().await {
            match self
                .transport
                .create_or_get_sink(endpoint.room, &self.sink_label)
                .await
            {
                Ok(sink) => {
                    info!(room = %endpoint.room, sink = %sink.id, "sink acquired");
                    self.registry.set_sink(endpoint.room, sink).await;
                }
                Err(e) => {
                    let failure = RelayError::SinkAcquisition {
                        room: endpoint.room,
                        cause: e.to_string(),
                    };
                    let first = self
                        .registry
                        .invalidate(endpoint.room, &failure.to_string())
                        .await;
                    if first {
                        self.report_sink_failure(endpoint.room, &e).await;
                    }
                }
            }
        }
    }

    /// Post a one-time human-readable diagnostic into the room. Best effort.
    async fn report_sink_failure(&self, room: RoomId, error: &RelayError) {
        let reason = if matches!(error, RelayError::PermissionDenied(_)) {
            "missing the manage-sinks permission!".to_string()
        } else {
            error.to_string()
        };
        let text = format!(
            "[ERROR] Could not acquire a delivery sink for this room: {reason}\n\
             Messages cannot be relayed here until this is fixed. \
             Contact the server's staff or allow the relay to manage sinks."
        );
        if let Err(e) = self.transport.create_message(room, &text).await {
            debug!(room = %room, error = %e, "could not post sink diagnostic");
        }
    }

    /// Pull the shared state, merge, and push the result back.
    ///
    /// The push is delayed by a small random jitter so two instances
    /// converging at the same moment are unlikely to overwrite each other.
    pub async fn converge(&self) {
        let merged = {
            let mut local = self.state.write().await;
            match self.store.load().await {
                Ok(remote) => local.merge(remote),
                Err(e) => {
                    warn!(error = %e, "state pull failed, keeping in-memory state");
                }
            }
            local.updated_at = Some(Utc::now());
            local.clone()
        };

        self.guilds.apply_state(&merged).await;
        self.registry
            .set_whitelist(|guild| merged.guild_allowed(guild))
            .await;

        let jitter = rand::rng().random_range(0..=self.jitter_ms);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        if let Err(e) = self.store.save(&merged).await {
            warn!(error = %e, "state push failed, will retry next cycle");
        }
    }
}
