//! Configuration module for interverse.

use serde::Deserialize;
use std::path::Path;

use crate::{RelayError, Result};

/// Relay tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Substring a room name must contain to join the federation.
    #[serde(default = "default_channel_name_pattern")]
    pub channel_name_pattern: String,
    /// Label of the sink the relay creates in each participating room.
    #[serde(default = "default_sink_label")]
    pub sink_label: String,
    /// Author label used for system broadcasts.
    #[serde(default = "default_system_name")]
    pub system_name: String,
    /// Avatar used for system broadcasts.
    #[serde(default)]
    pub system_avatar: Option<String>,
    /// Minimum interval between two accepted messages of one sender.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    /// Mention count above which a message auto-bans its sender.
    #[serde(default = "default_mention_threshold")]
    pub mention_threshold: usize,
    /// Maximum characters of a relayed message body.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    /// Maximum characters of the relayed author label.
    #[serde(default = "default_max_username_chars")]
    pub max_username_chars: usize,
    /// Attachments at or above this size are relayed as links.
    #[serde(default = "default_max_inline_file_bytes")]
    pub max_inline_file_bytes: u64,
    /// Maximum number of broadcast records kept for moderation.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Seconds between reconciler cycles.
    #[serde(default = "default_reconcile_period_secs")]
    pub reconcile_period_secs: u64,
    /// Seconds before the first reconciler cycle after startup.
    #[serde(default = "default_reconcile_initial_delay_secs")]
    pub reconcile_initial_delay_secs: u64,
    /// Seconds before the startup announcement broadcast.
    #[serde(default = "default_announce_delay_secs")]
    pub announce_delay_secs: u64,
    /// Seconds a guild's room/sink view stays fresh before re-enumeration.
    #[serde(default = "default_guild_refresh_ttl_secs")]
    pub guild_refresh_ttl_secs: u64,
    /// Upper bound of the random delay before pushing shared state.
    #[serde(default = "default_converge_jitter_ms")]
    pub converge_jitter_ms: u64,
    /// When true, auto-banned senders are written into the shared state
    /// and therefore survive restarts. Off by default.
    #[serde(default)]
    pub persist_autobans: bool,
    /// User ids with moderation rights.
    #[serde(default)]
    pub operators: Vec<u64>,
}

fn default_channel_name_pattern() -> String {
    "multiverse".to_string()
}

fn default_sink_label() -> String {
    "InterverseSink".to_string()
}

fn default_system_name() -> String {
    "Interverse".to_string()
}

fn default_rate_limit_ms() -> u64 {
    2000
}

fn default_mention_threshold() -> usize {
    7
}

fn default_max_content_chars() -> usize {
    1999
}

fn default_max_username_chars() -> usize {
    75 // most transports cap author labels at 80
}

fn default_max_inline_file_bytes() -> u64 {
    3 * 1024 * 1024 - 1024
}

fn default_history_capacity() -> usize {
    1000
}

fn default_reconcile_period_secs() -> u64 {
    45
}

fn default_reconcile_initial_delay_secs() -> u64 {
    5
}

fn default_announce_delay_secs() -> u64 {
    10
}

fn default_guild_refresh_ttl_secs() -> u64 {
    1800
}

fn default_converge_jitter_ms() -> u64 {
    2000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_name_pattern: default_channel_name_pattern(),
            sink_label: default_sink_label(),
            system_name: default_system_name(),
            system_avatar: None,
            rate_limit_ms: default_rate_limit_ms(),
            mention_threshold: default_mention_threshold(),
            max_content_chars: default_max_content_chars(),
            max_username_chars: default_max_username_chars(),
            max_inline_file_bytes: default_max_inline_file_bytes(),
            history_capacity: default_history_capacity(),
            reconcile_period_secs: default_reconcile_period_secs(),
            reconcile_initial_delay_secs: default_reconcile_initial_delay_secs(),
            announce_delay_secs: default_announce_delay_secs(),
            guild_refresh_ttl_secs: default_guild_refresh_ttl_secs(),
            converge_jitter_ms: default_converge_jitter_ms(),
            persist_autobans: false,
            operators: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/interverse.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Relay settings.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(RelayError::Io)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| RelayError::Config(format!("config parse error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.relay.channel_name_pattern, "multiverse");
        assert_eq!(config.relay.sink_label, "InterverseSink");
        assert_eq!(config.relay.system_name, "Interverse");
        assert!(config.relay.system_avatar.is_none());
        assert_eq!(config.relay.rate_limit_ms, 2000);
        assert_eq!(config.relay.mention_threshold, 7);
        assert_eq!(config.relay.max_content_chars, 1999);
        assert_eq!(config.relay.max_username_chars, 75);
        assert_eq!(config.relay.max_inline_file_bytes, 3 * 1024 * 1024 - 1024);
        assert_eq!(config.relay.history_capacity, 1000);
        assert_eq!(config.relay.reconcile_period_secs, 45);
        assert_eq!(config.relay.reconcile_initial_delay_secs, 5);
        assert_eq!(config.relay.announce_delay_secs, 10);
        assert_eq!(config.relay.guild_refresh_ttl_secs, 1800);
        assert_eq!(config.relay.converge_jitter_ms, 2000);
        assert!(!config.relay.persist_autobans);
        assert!(config.relay.operators.is_empty());

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/interverse.log");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
            [relay]
            rate_limit_ms = 500
            mention_threshold = 3
            operators = [42, 43]

            [logging]
            level = "debug"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.relay.rate_limit_ms, 500);
        assert_eq!(config.relay.mention_threshold, 3);
        assert_eq!(config.relay.operators, vec![42, 43]);
        // untouched fields keep their defaults
        assert_eq!(config.relay.history_capacity, 1000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file, "logs/interverse.log");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.relay.rate_limit_ms, 2000);
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("relay = \"nope\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("does/not/exist.toml");
        assert!(result.is_err());
    }
}
