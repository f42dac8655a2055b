//! Endpoint registry.
//!
//! Tracks every room participating in the federation together with the
//! delivery sink bound to it. The broadcast engine only ever works from a
//! snapshot taken under the registry lock, so the reconciler can mutate the
//! registry concurrently without tearing a fan-out.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::transport::{GuildId, RoomId, Sink};

/// One messaging destination.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// The destination room.
    pub room: RoomId,
    /// The guild the room belongs to.
    pub guild: GuildId,
    /// Delivery sink, absent until acquired and dropped on invalidation.
    pub sink: Option<Sink>,
    /// Whether a sink problem has already been reported into the room.
    pub has_reported: bool,
    /// Whether the owning guild is whitelisted.
    pub whitelisted: bool,
}

impl Endpoint {
    /// Create a sink-less endpoint.
    pub fn new(room: RoomId, guild: GuildId) -> Self {
        Self {
            room,
            guild,
            sink: None,
            has_reported: false,
            whitelisted: false,
        }
    }

    /// Whether the endpoint can receive fan-out traffic right now.
    pub fn eligible(&self) -> bool {
        self.whitelisted && self.sink.is_some()
    }
}

/// Registry of all known endpoints, keyed by room.
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: RwLock<HashMap<RoomId, Endpoint>>,
}

impl EndpointRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a room, keeping any existing endpoint state.
    ///
    /// Idempotent by room id; re-registering an existing room is a no-op.
    pub async fn upsert(&self, room: RoomId, guild: GuildId) -> Endpoint {
        let mut endpoints = self.endpoints.write().await;
        endpoints
            .entry(room)
            .or_insert_with(|| Endpoint::new(room, guild))
            .clone()
    }

    /// Get one endpoint.
    pub async fn get(&self, room: RoomId) -> Option<Endpoint> {
        self.endpoints.read().await.get(&room).cloned()
    }

    /// Whether a room is registered at all.
    pub async fn contains(&self, room: RoomId) -> bool {
        self.endpoints.read().await.contains_key(&room)
    }

    /// Snapshot of endpoints eligible for fan-out.
    pub async fn list_eligible(&self) -> Vec<Endpoint> {
        self.endpoints
            .read()
            .await
            .values()
            .filter(|e| e.eligible())
            .cloned()
            .collect()
    }

    /// Snapshot of registered endpoints that still need a sink.
    pub async fn list_sinkless(&self) -> Vec<Endpoint> {
        self.endpoints
            .read()
            .await
            .values()
            .filter(|e| e.whitelisted && e.sink.is_none())
            .cloned()
            .collect()
    }

    /// Snapshot of every endpoint.
    pub async fn snapshot(&self) -> Vec<Endpoint> {
        self.endpoints.read().await.values().cloned().collect()
    }

    /// All sink ids currently held, for loop prevention.
    pub async fn sink_ids(&self) -> Vec<crate::transport::SinkId> {
        self.endpoints
            .read()
            .await
            .values()
            .filter_map(|e| e.sink.as_ref().map(|s| s.id))
            .collect()
    }

    /// Attach an acquired sink and clear the reported flag.
    pub async fn set_sink(&self, room: RoomId, sink: Sink) {
        if let Some(endpoint) = self.endpoints.write().await.get_mut(&room) {
            endpoint.sink = Some(sink);
            endpoint.has_reported = false;
        }
    }

    /// Drop a sink after a failure.
    ///
    /// The endpoint stays registered so the reconciler can re-acquire a sink
    /// later. Returns true the first time the failure is reported, so the
    /// caller can post a single diagnostic into the room.
    pub async fn invalidate(&self, room: RoomId, reason: &str) -> bool {
        let mut endpoints = self.endpoints.write().await;
        match endpoints.get_mut(&room) {
            Some(endpoint) => {
                endpoint.sink = None;
                let first = !endpoint.has_reported;
                endpoint.has_reported = true;
                if first {
                    tracing::warn!(room = %room, reason, "endpoint sink invalidated");
                }
                first
            }
            None => false,
        }
    }

    /// Update whitelist flags from a per-guild predicate.
    pub async fn set_whitelist<F>(&self, allowed: F)
    where
        F: Fn(GuildId) -> bool,
    {
        let mut endpoints = self.endpoints.write().await;
        for endpoint in endpoints.values_mut() {
            endpoint.whitelisted = allowed(endpoint.guild);
        }
    }

    /// Remove one endpoint.
    pub async fn remove(&self, room: RoomId) -> Option<Endpoint> {
        self.endpoints.write().await.remove(&room)
    }

    /// Keep only endpoints matching the predicate.
    pub async fn retain<F>(&self, keep: F)
    where
        F: Fn(&Endpoint) -> bool,
    {
        self.endpoints.write().await.retain(|_, e| keep(e));
    }

    /// Number of registered endpoints.
    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }
}
