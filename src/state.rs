//! Shared federation state.
//!
//! Multiple relay instances may run at the same time with no shared memory.
//! They agree on the federation's membership through a small externally
//! stored document: which guilds are whitelisted, which users and guilds are
//! banned, display-name overrides and per-user tags. The document is
//! eventually consistent; every instance periodically pulls it, merges it
//! over its in-memory copy and pushes the result back (see the reconciler).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::{GuildId, UserId};
use crate::{RelayError, Result};

/// The shared federation membership document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FederationState {
    /// Guilds allowed to participate.
    #[serde(default)]
    pub whitelist: HashSet<GuildId>,
    /// Users banned from the federation.
    #[serde(default)]
    pub banned_users: HashSet<UserId>,
    /// Guilds banned from the federation.
    #[serde(default)]
    pub banned_guilds: HashSet<GuildId>,
    /// Display-name overrides per guild.
    #[serde(default)]
    pub name_overrides: HashMap<GuildId, String>,
    /// Decorative tags shown before a user's name.
    #[serde(default)]
    pub usertags: HashMap<UserId, String>,
    /// When this document was last written.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl FederationState {
    /// Merge a remotely loaded document over this one.
    ///
    /// Sets are unioned so that a ban or whitelist entry taken by any
    /// instance survives; remote map entries win over local ones since the
    /// store is the authority for overrides and tags.
    pub fn merge(&mut self, remote: FederationState) {
        self.whitelist.extend(remote.whitelist);
        self.banned_users.extend(remote.banned_users);
        self.banned_guilds.extend(remote.banned_guilds);
        self.name_overrides.extend(remote.name_overrides);
        self.usertags.extend(remote.usertags);
        self.updated_at = match (self.updated_at, remote.updated_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    /// Whether a guild may take part in message exchange.
    pub fn guild_allowed(&self, guild: GuildId) -> bool {
        self.whitelist.contains(&guild) && !self.banned_guilds.contains(&guild)
    }

    /// Whether a user may send messages into the federation.
    pub fn user_allowed(&self, user: UserId) -> bool {
        !self.banned_users.contains(&user)
    }

    /// The tag to display before a user's name, if any.
    pub fn usertag(&self, user: UserId) -> Option<&str> {
        self.usertags.get(&user).map(String::as_str)
    }
}

/// External store holding the shared [`FederationState`].
///
/// The backing medium only needs to hold one small document; durability and
/// cross-instance visibility are its concern, not the relay's.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the current document.
    async fn load(&self) -> Result<FederationState>;

    /// Replace the document.
    async fn save(&self, state: &FederationState) -> Result<()>;
}

/// In-memory store.
///
/// Cloning shares the underlying document, which lets tests hand the same
/// store to several independent relay instances and observe convergence.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<FederationState>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a document.
    pub fn with_state(state: FederationState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<FederationState> {
        Ok(self.inner.lock().expect("state store poisoned").clone())
    }

    async fn save(&self, state: &FederationState) -> Result<()> {
        *self.inner.lock().expect("state store poisoned") = state.clone();
        Ok(())
    }
}

/// JSON-file store.
///
/// A missing file loads as the empty document, so a fresh deployment starts
/// from scratch without manual setup.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<FederationState> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FederationState::default())
            }
            Err(e) => return Err(RelayError::Store(e.to_string())),
        };
        serde_json::from_str(&raw).map_err(|e| RelayError::Store(e.to_string()))
    }

    async fn save(&self, state: &FederationState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RelayError::Store(e.to_string()))?;
        }
        let raw =
            serde_json::to_string_pretty(state).map_err(|e| RelayError::Store(e.to_string()))?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|e| RelayError::Store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_whitelist(guilds: &[u64]) -> FederationState {
        FederationState {
            whitelist: guilds.iter().map(|&g| GuildId(g)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_unions_sets() {
        let mut local = state_with_whitelist(&[1, 2]);
        local.banned_users.insert(UserId(10));

        let mut remote = state_with_whitelist(&[2, 3]);
        remote.banned_users.insert(UserId(11));

        local.merge(remote);

        assert_eq!(local.whitelist.len(), 3);
        assert!(local.banned_users.contains(&UserId(10)));
        assert!(local.banned_users.contains(&UserId(11)));
    }

    #[test]
    fn test_merge_remote_maps_win() {
        let mut local = FederationState::default();
        local.name_overrides.insert(GuildId(1), "local".to_string());
        local.usertags.insert(UserId(5), "old".to_string());

        let mut remote = FederationState::default();
        remote
            .name_overrides
            .insert(GuildId(1), "remote".to_string());
        remote.usertags.insert(UserId(5), "new".to_string());

        local.merge(remote);

        assert_eq!(local.name_overrides[&GuildId(1)], "remote");
        assert_eq!(local.usertags[&UserId(5)], "new");
    }

    #[test]
    fn test_guild_allowed() {
        let mut state = state_with_whitelist(&[1]);
        assert!(state.guild_allowed(GuildId(1)));
        assert!(!state.guild_allowed(GuildId(2)));

        // a banned guild is never allowed, whitelisted or not
        state.banned_guilds.insert(GuildId(1));
        assert!(!state.guild_allowed(GuildId(1)));
    }

    #[test]
    fn test_user_allowed() {
        let mut state = FederationState::default();
        assert!(state.user_allowed(UserId(1)));
        state.banned_users.insert(UserId(1));
        assert!(!state.user_allowed(UserId(1)));
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let state = state_with_whitelist(&[7]);

        store.save(&state).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_memory_store_shared_between_clones() {
        let store = MemoryStore::new();
        let other = store.clone();

        store.save(&state_with_whitelist(&[9])).await.unwrap();
        let loaded = other.load().await.unwrap();
        assert!(loaded.whitelist.contains(&GuildId(9)));
    }

    #[tokio::test]
    async fn test_json_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));

        let mut state = state_with_whitelist(&[1, 2]);
        state.usertags.insert(UserId(3), "lucky".to_string());

        store.save(&state).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_json_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nope.json"));

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, FederationState::default());
    }
}
