//! Content-safety filtering.
//!
//! Runs before rate-limit accounting so a rejected message never consumes
//! the sender's slot. Two rules: a mention-flood rule that temporarily bans
//! the sender, and a pluggable scam matcher that only rejects.

use std::sync::Arc;

/// Filter decision for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Message may be relayed.
    Allow,
    /// Message is dropped; the sender is told why.
    Reject(String),
    /// Message is dropped and the sender is blocked for the rest of the
    /// process lifetime.
    AutoBan,
}

/// Pluggable scam matcher.
pub trait ScamDetector: Send + Sync {
    /// Whether the text matches known scam phrasing or link patterns.
    fn has_scam(&self, text: &str) -> bool;
}

/// Phrase-list scam matcher.
///
/// Flags a message when it carries a link together with any of the known
/// bait phrases, or a known bad domain outright.
pub struct PatternScamDetector {
    phrases: Vec<String>,
    domains: Vec<String>,
}

impl PatternScamDetector {
    /// Matcher with the built-in pattern lists.
    pub fn new() -> Self {
        Self {
            phrases: [
                "free nitro",
                "free discord nitro",
                "gift for you",
                "steam gift",
                "who is first?",
                "@everyone airdrop",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            domains: ["dlscord", "discorcl", "steamcommunlty", "stearncommunity"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Matcher with custom pattern lists.
    pub fn with_patterns(phrases: Vec<String>, domains: Vec<String>) -> Self {
        Self { phrases, domains }
    }
}

impl Default for PatternScamDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ScamDetector for PatternScamDetector {
    fn has_scam(&self, text: &str) -> bool {
        let lower = text.to_lowercase();

        if self.domains.iter().any(|d| lower.contains(d)) {
            return true;
        }

        let has_link = lower.contains("http://") || lower.contains("https://");
        has_link && self.phrases.iter().any(|p| lower.contains(p))
    }
}

/// Matcher that never flags anything.
pub struct NoScamDetector;

impl ScamDetector for NoScamDetector {
    fn has_scam(&self, _text: &str) -> bool {
        false
    }
}

/// Count user/role mentions and mass pings in raw message text.
pub fn count_mentions(text: &str) -> usize {
    let direct = text.matches("<@").count();
    let everyone = text.matches("@everyone").count();
    let here = text.matches("@here").count();
    direct + everyone + here
}

/// Content-safety filter applied to every inbound message.
pub struct SafetyFilter {
    mention_threshold: usize,
    scam: Arc<dyn ScamDetector>,
}

impl SafetyFilter {
    /// Create a filter with the given mention threshold and scam matcher.
    pub fn new(mention_threshold: usize, scam: Arc<dyn ScamDetector>) -> Self {
        Self {
            mention_threshold,
            scam,
        }
    }

    /// Evaluate one message body.
    pub fn evaluate(&self, content: &str) -> Verdict {
        if count_mentions(content) > self.mention_threshold {
            return Verdict::AutoBan;
        }

        if self.scam.has_scam(content) {
            return Verdict::Reject(
                "your message contains a potential scam. if you're not a bot, \
                 remove any links and try again"
                    .to_string(),
            );
        }

        Verdict::Allow
    }
}
