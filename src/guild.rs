//! Federated guild profiles.
//!
//! One profile aggregates everything the relay knows about a participating
//! community: its rooms, display name, whitelist status, traffic counters
//! and how recently its room/sink view was refreshed.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::state::FederationState;
use crate::transport::{GuildId, RoomId};

/// Profile of one community in the federation.
#[derive(Debug, Clone)]
pub struct FederatedGuild {
    /// The guild id.
    pub id: GuildId,
    /// Display name as reported by the transport.
    pub name: Option<String>,
    /// Manually configured display-name override.
    pub name_override: Option<String>,
    /// Whether the guild may take part in message exchange.
    pub whitelisted: bool,
    /// When the guild last originated a relayed message.
    pub last_activity: Option<DateTime<Utc>>,
    /// Messages delivered into this guild.
    pub total_sent: u64,
    /// Messages originated by this guild.
    pub total_received: u64,
    /// Rooms of this guild currently registered as endpoints.
    pub rooms: HashSet<RoomId>,
    /// When the room/sink view was last refreshed.
    pub last_refresh: Option<Instant>,
}

impl FederatedGuild {
    /// Create an empty, non-whitelisted profile.
    pub fn new(id: GuildId) -> Self {
        Self {
            id,
            name: None,
            name_override: None,
            whitelisted: false,
            last_activity: None,
            total_sent: 0,
            total_received: 0,
            rooms: HashSet::new(),
            last_refresh: None,
        }
    }

    /// The name shown in relayed author labels.
    ///
    /// An empty override counts as unset.
    pub fn display_name(&self) -> &str {
        match &self.name_override {
            Some(over) if !over.is_empty() => over,
            _ => self.name.as_deref().unwrap_or("unknown guild"),
        }
    }

    /// Whether the room/sink view is stale.
    pub fn needs_refresh(&self, ttl: Duration) -> bool {
        match self.last_refresh {
            Some(at) => at.elapsed() >= ttl,
            None => true,
        }
    }
}

/// Shared directory of guild profiles.
///
/// Profiles are created on first sight and never removed; a de-whitelisted
/// guild simply goes dormant.
#[derive(Default)]
pub struct GuildDirectory {
    guilds: RwLock<HashMap<GuildId, FederatedGuild>>,
}

impl GuildDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a profile, creating it if unknown.
    pub async fn ensure(&self, id: GuildId) -> FederatedGuild {
        let mut guilds = self.guilds.write().await;
        guilds
            .entry(id)
            .or_insert_with(|| FederatedGuild::new(id))
            .clone()
    }

    /// Get a profile by id.
    pub async fn get(&self, id: GuildId) -> Option<FederatedGuild> {
        self.guilds.read().await.get(&id).cloned()
    }

    /// The label to show for a guild in relayed messages.
    pub async fn display_name(&self, id: GuildId) -> String {
        match self.guilds.read().await.get(&id) {
            Some(guild) => guild.display_name().to_string(),
            None => "unknown guild".to_string(),
        }
    }

    /// Number of known guilds.
    pub async fn len(&self) -> usize {
        self.guilds.read().await.len()
    }

    /// Whether the directory is empty.
    pub async fn is_empty(&self) -> bool {
        self.guilds.read().await.is_empty()
    }

    /// Snapshot of all profiles.
    pub async fn snapshot(&self) -> Vec<FederatedGuild> {
        self.guilds.read().await.values().cloned().collect()
    }

    /// Record a message originated by the guild.
    pub async fn record_received(&self, id: GuildId) {
        let mut guilds = self.guilds.write().await;
        let guild = guilds.entry(id).or_insert_with(|| FederatedGuild::new(id));
        guild.total_received += 1;
        guild.last_activity = Some(Utc::now());
    }

    /// Record a message delivered into the guild.
    pub async fn record_sent(&self, id: GuildId) {
        let mut guilds = self.guilds.write().await;
        let guild = guilds.entry(id).or_insert_with(|| FederatedGuild::new(id));
        guild.total_sent += 1;
    }

    /// Update the transport-reported name.
    pub async fn set_name(&self, id: GuildId, name: Option<String>) {
        let mut guilds = self.guilds.write().await;
        let guild = guilds.entry(id).or_insert_with(|| FederatedGuild::new(id));
        guild.name = name;
    }

    /// Replace the room set and stamp the refresh time.
    pub async fn set_rooms(&self, id: GuildId, rooms: HashSet<RoomId>) {
        let mut guilds = self.guilds.write().await;
        let guild = guilds.entry(id).or_insert_with(|| FederatedGuild::new(id));
        guild.rooms = rooms;
        guild.last_refresh = Some(Instant::now());
    }

    /// Whether the guild's room/sink view is stale.
    pub async fn needs_refresh(&self, id: GuildId, ttl: Duration) -> bool {
        match self.guilds.read().await.get(&id) {
            Some(guild) => guild.needs_refresh(ttl),
            None => true,
        }
    }

    /// Apply whitelist flags and name overrides from the shared state.
    pub async fn apply_state(&self, state: &FederationState) {
        let mut guilds = self.guilds.write().await;
        for id in &state.whitelist {
            guilds
                .entry(*id)
                .or_insert_with(|| FederatedGuild::new(*id));
        }
        for guild in guilds.values_mut() {
            guild.whitelisted = state.guild_allowed(guild.id);
            guild.name_override = state.name_overrides.get(&guild.id).cloned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_precedence() {
        let mut guild = FederatedGuild::new(GuildId(1));
        assert_eq!(guild.display_name(), "unknown guild");

        guild.name = Some("Reported".to_string());
        assert_eq!(guild.display_name(), "Reported");

        guild.name_override = Some("Override".to_string());
        assert_eq!(guild.display_name(), "Override");

        // empty override falls back to the reported name
        guild.name_override = Some(String::new());
        assert_eq!(guild.display_name(), "Reported");
    }

    #[test]
    fn test_needs_refresh() {
        let mut guild = FederatedGuild::new(GuildId(1));
        assert!(guild.needs_refresh(Duration::from_secs(60)));

        guild.last_refresh = Some(Instant::now());
        assert!(!guild.needs_refresh(Duration::from_secs(60)));
        assert!(guild.needs_refresh(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_ensure_creates_once() {
        let directory = GuildDirectory::new();
        directory.ensure(GuildId(1)).await;
        directory.ensure(GuildId(1)).await;
        assert_eq!(directory.len().await, 1);
    }

    #[tokio::test]
    async fn test_counters() {
        let directory = GuildDirectory::new();
        directory.record_received(GuildId(1)).await;
        directory.record_received(GuildId(1)).await;
        directory.record_sent(GuildId(1)).await;

        let guild = directory.get(GuildId(1)).await.unwrap();
        assert_eq!(guild.total_received, 2);
        assert_eq!(guild.total_sent, 1);
        assert!(guild.last_activity.is_some());
    }

    #[tokio::test]
    async fn test_apply_state() {
        let directory = GuildDirectory::new();
        directory.ensure(GuildId(1)).await;
        directory.ensure(GuildId(2)).await;

        let mut state = FederationState::default();
        state.whitelist.insert(GuildId(1));
        state.whitelist.insert(GuildId(3));
        state
            .name_overrides
            .insert(GuildId(1), "Renamed".to_string());

        directory.apply_state(&state).await;

        assert!(directory.get(GuildId(1)).await.unwrap().whitelisted);
        assert!(!directory.get(GuildId(2)).await.unwrap().whitelisted);
        // whitelisted-but-unseen guilds get a profile so they are refreshed
        assert!(directory.get(GuildId(3)).await.unwrap().whitelisted);
        assert_eq!(
            directory.get(GuildId(1)).await.unwrap().display_name(),
            "Renamed"
        );
    }

    #[tokio::test]
    async fn test_set_rooms_stamps_refresh() {
        let directory = GuildDirectory::new();
        let rooms: HashSet<RoomId> = [RoomId(10), RoomId(11)].into_iter().collect();
        directory.set_rooms(GuildId(1), rooms).await;

        let guild = directory.get(GuildId(1)).await.unwrap();
        assert_eq!(guild.rooms.len(), 2);
        assert!(!guild.needs_refresh(Duration::from_secs(60)));
    }
}
