//! Per-sender rate limiting for relayed messages.
//!
//! Every sender gets a fixed minimum interval between accepted messages,
//! independent of how many rooms the message fans out to.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::transport::UserId;

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Message is accepted.
    Allowed,
    /// Message is denied due to rate limit.
    Denied {
        /// Time until the sender may post again.
        retry_after: Duration,
    },
}

impl RateLimitResult {
    /// Check if the message is accepted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed)
    }
}

/// Minimum-interval rate limiter.
///
/// The check and the timestamp update happen under one lock, so two
/// in-flight handlers for the same sender can never both pass.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use interverse::rate_limit::MessageRateLimiter;
/// use interverse::transport::UserId;
///
/// let limiter = MessageRateLimiter::new(Duration::from_millis(2000));
/// assert!(limiter.try_accept(UserId(1)).is_allowed());
/// assert!(!limiter.try_accept(UserId(1)).is_allowed());
/// ```
#[derive(Debug)]
pub struct MessageRateLimiter {
    /// Minimum interval between accepted messages per sender.
    min_interval: Duration,
    /// Last accepted timestamp per sender.
    entries: Mutex<HashMap<UserId, Instant>>,
}

impl MessageRateLimiter {
    /// Create a new rate limiter with the given minimum interval.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a message from `sender` is accepted right now.
    ///
    /// Accepting updates the sender's timestamp in the same critical section.
    pub fn try_accept(&self, sender: UserId) -> RateLimitResult {
        self.try_accept_at(sender, Instant::now())
    }

    /// Check-and-update against an explicit clock value.
    pub fn try_accept_at(&self, sender: UserId, now: Instant) -> RateLimitResult {
        let mut entries = self.entries.lock().expect("rate limiter poisoned");

        if let Some(&last) = entries.get(&sender) {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_interval {
                return RateLimitResult::Denied {
                    retry_after: self.min_interval - elapsed,
                };
            }
        }

        entries.insert(sender, now);
        RateLimitResult::Allowed
    }

    /// Drop entries older than the minimum interval.
    ///
    /// Call this periodically to free memory.
    pub fn cleanup(&self) {
        let mut entries = self.entries.lock().expect("rate limiter poisoned");
        let now = Instant::now();
        entries.retain(|_, &mut last| now.saturating_duration_since(last) < self.min_interval);
    }

    /// Number of senders currently tracked.
    pub fn tracked(&self) -> usize {
        self.entries.lock().expect("rate limiter poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(2000);

    #[test]
    fn test_first_message_allowed() {
        let limiter = MessageRateLimiter::new(INTERVAL);
        assert!(limiter.try_accept(UserId(1)).is_allowed());
    }

    #[test]
    fn test_second_message_within_interval_denied() {
        let limiter = MessageRateLimiter::new(INTERVAL);
        let t1 = Instant::now();

        assert!(limiter.try_accept_at(UserId(1), t1).is_allowed());

        let t2 = t1 + Duration::from_millis(1999);
        let result = limiter.try_accept_at(UserId(1), t2);
        assert!(!result.is_allowed());

        match result {
            RateLimitResult::Denied { retry_after } => {
                assert_eq!(retry_after, Duration::from_millis(1));
            }
            _ => panic!("Expected Denied"),
        }
    }

    #[test]
    fn test_second_message_at_interval_allowed() {
        let limiter = MessageRateLimiter::new(INTERVAL);
        let t1 = Instant::now();

        assert!(limiter.try_accept_at(UserId(1), t1).is_allowed());
        assert!(limiter.try_accept_at(UserId(1), t1 + INTERVAL).is_allowed());
    }

    #[test]
    fn test_denied_message_does_not_reset_window() {
        let limiter = MessageRateLimiter::new(INTERVAL);
        let t1 = Instant::now();

        assert!(limiter.try_accept_at(UserId(1), t1).is_allowed());
        // a denied attempt must not push the window forward
        assert!(!limiter
            .try_accept_at(UserId(1), t1 + Duration::from_millis(1000))
            .is_allowed());
        assert!(limiter.try_accept_at(UserId(1), t1 + INTERVAL).is_allowed());
    }

    #[test]
    fn test_separate_senders() {
        let limiter = MessageRateLimiter::new(INTERVAL);
        let now = Instant::now();

        assert!(limiter.try_accept_at(UserId(1), now).is_allowed());
        assert!(limiter.try_accept_at(UserId(2), now).is_allowed());
        assert!(!limiter.try_accept_at(UserId(1), now).is_allowed());
    }

    #[test]
    fn test_cleanup_drops_stale_entries() {
        let limiter = MessageRateLimiter::new(Duration::ZERO);
        limiter.try_accept(UserId(1));
        limiter.try_accept(UserId(2));
        assert_eq!(limiter.tracked(), 2);

        limiter.cleanup();
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_concurrent_same_sender_single_pass() {
        use std::sync::Arc;

        let limiter = Arc::new(MessageRateLimiter::new(INTERVAL));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.try_accept_at(UserId(1), now).is_allowed())
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&allowed| allowed)
            .count();

        // exactly one of the concurrent attempts may pass
        assert_eq!(accepted, 1);
    }
}
