//! In-memory command cooldowns keyed by (action, user, location).
//!
//! Not restart-safe: a restart forgets every cooldown.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownResult {
    pub allowed: bool,
    /// Zero when allowed
    pub retry_after: Duration,
}

impl CooldownResult {
    /// Whole seconds to wait, rounded up, for user-facing messages
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

type CooldownKey = (String, String, String);

/// Cheap to clone; clones share state
#[derive(Clone, Default)]
pub struct Cooldowns {
    last: Arc<Mutex<HashMap<CooldownKey, Instant>>>,
}

impl Cooldowns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow and record the action if its cooldown has elapsed
    pub fn try_acquire(
        &self,
        action: &str,
        user: &str,
        location: &str,
        cooldown: Duration,
    ) -> CooldownResult {
        self.try_acquire_at(action, user, location, cooldown, Instant::now())
    }

    pub fn try_acquire_at(
        &self,
        action: &str,
        user: &str,
        location: &str,
        cooldown: Duration,
        now: Instant,
    ) -> CooldownResult {
        let key = (action.to_string(), user.to_string(), location.to_string());
        let mut last = self.last.lock();

        if let Some(previous) = last.get(&key) {
            let elapsed = now.saturating_duration_since(*previous);
            if elapsed < cooldown {
                return CooldownResult {
                    allowed: false,
                    retry_after: cooldown - elapsed,
                };
            }
        }

        last.insert(key, now);
        CooldownResult {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    /// Forget one key, e.g. after an admin override
    pub fn reset(&self, action: &str, user: &str, location: &str) {
        self.last
            .lock()
            .remove(&(action.to_string(), user.to_string(), location.to_string()));
    }

    pub fn len(&self) -> usize {
        self.last.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_window() {
        let cooldowns = Cooldowns::new();
        let start = Instant::now();
        let window = Duration::from_secs(30);

        assert!(cooldowns.try_acquire_at("work", "u1", "c1", window, start).allowed);

        let blocked = cooldowns.try_acquire_at(
            "work",
            "u1",
            "c1",
            window,
            start + Duration::from_millis(10_500),
        );
        assert!(!blocked.allowed);
        assert_eq!(blocked.retry_after, Duration::from_millis(19_500));
        assert_eq!(blocked.retry_after_secs(), 20);

        // Other users, channels and actions are independent
        assert!(cooldowns.try_acquire_at("work", "u2", "c1", window, start).allowed);
        assert!(cooldowns.try_acquire_at("work", "u1", "c2", window, start).allowed);
        assert!(cooldowns.try_acquire_at("daily", "u1", "c1", window, start).allowed);

        assert!(cooldowns
            .try_acquire_at("work", "u1", "c1", window, start + window)
            .allowed);
    }

    #[test]
    fn test_reset() {
        let cooldowns = Cooldowns::new();
        let hour = Duration::from_secs(3600);
        assert!(cooldowns.try_acquire("daily", "u", "dm", hour).allowed);
        assert!(!cooldowns.try_acquire("daily", "u", "dm", hour).allowed);

        cooldowns.reset("daily", "u", "dm");
        assert!(cooldowns.try_acquire("daily", "u", "dm", hour).allowed);
        assert_eq!(cooldowns.len(), 1);
    }
}
