//! Credential hashing, token generation and request rate limiting.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Prefix for session tokens.
pub const SESSION_TOKEN_PREFIX: &str = "vs_";

/// Prefix for API keys.
pub const API_KEY_PREFIX: &str = "vk_";

/// Hashes a secret with SHA-256 and returns the hex digest.
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Generates a random token: `prefix` followed by 32 hex characters.
#[must_use]
pub fn generate_token(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4().simple())
}

/// Hashes a password with a fresh random salt. Stored as `salt$hash`.
#[must_use]
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    hash_password_with_salt(password, &salt)
}

fn hash_password_with_salt(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{}${:x}", salt, hasher.finalize())
}

/// Checks a password against a `salt$hash` digest.
#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, _)) = stored.split_once('$') else {
        return false;
    };
    hash_password_with_salt(password, salt) == stored
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

const WINDOW_MS: u64 = 60_000;

/// Idle windows are swept once every this many recorded requests.
const PRUNE_EVERY: u64 = 1_024;

/// Rate limiter using a one-minute sliding window per key.
#[derive(Debug, Default)]
pub struct RateLimiter {
    /// Request timestamps per key.
    windows: DashMap<String, VecDeque<u64>>,
    requests: AtomicU64,
}

impl RateLimiter {
    /// Creates a new rate limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Records a request for `key` if it is under `rate_limit`.
    ///
    /// Returns the remaining allowance after this request, or `None` when
    /// the request is rate limited.
    pub fn check_and_record(&self, key: &str, rate_limit: u32) -> Option<u32> {
        self.check_and_record_at(key, rate_limit, now_millis())
    }

    fn check_and_record_at(&self, key: &str, rate_limit: u32, now: u64) -> Option<u32> {
        let window_start = now.saturating_sub(WINDOW_MS);

        let remaining = {
            let mut entry = self.windows.entry(key.to_string()).or_default();
            let window = entry.value_mut();
            expire(window, window_start);

            if window.len() < rate_limit as usize {
                window.push_back(now);
                Some(rate_limit - window.len() as u32)
            } else {
                None
            }
        };

        if self.requests.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune_at(now);
        }
        remaining
    }

    /// Drops keys with no request in the minute before `now`.
    fn prune_at(&self, now: u64) -> usize {
        let window_start = now.saturating_sub(WINDOW_MS);
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            expire(window, window_start);
            !window.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    /// Clears rate limit data for a key.
    pub fn clear(&self, key: &str) {
        self.windows.remove(key);
    }
}

fn expire(window: &mut VecDeque<u64>, window_start: u64) {
    while window.front().is_some_and(|&front| front < window_start) {
        window.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_secret_is_stable_hex() {
        let a = hash_secret("vk_abc");
        assert_eq!(a, hash_secret("vk_abc"));
        assert_ne!(a, hash_secret("vk_abd"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_generate_token_format() {
        let token = generate_token(SESSION_TOKEN_PREFIX);
        assert!(token.starts_with("vs_"));
        assert_eq!(token.len(), 3 + 32);
        assert!(token[3..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token(SESSION_TOKEN_PREFIX));
    }

    #[test]
    fn test_password_hash_and_verify() {
        let stored = hash_password("correct horse");
        assert!(stored.contains('$'));
        assert!(verify_password("correct horse", &stored));
        assert!(!verify_password("wrong horse", &stored));
        assert!(!verify_password("correct horse", "no-salt"));
    }

    #[test]
    fn test_password_salts_differ() {
        assert_ne!(hash_password("same"), hash_password("same"));
    }

    #[test]
    fn test_rate_limiter() {
        let limiter = RateLimiter::new();

        for i in 0..10 {
            assert_eq!(limiter.check_and_record("client", 10), Some(9 - i));
        }
        assert_eq!(limiter.check_and_record("client", 10), None);

        assert!(limiter.check_and_record("other", 10).is_some());
    }

    #[test]
    fn test_rate_limiter_window_slides() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_and_record_at("client", 1, 1_000).is_some());
        assert!(limiter.check_and_record_at("client", 1, 30_000).is_none());
        assert!(limiter.check_and_record_at("client", 1, 62_000).is_some());

        limiter.clear("client");
        assert!(limiter.check_and_record_at("client", 1, 62_001).is_some());
    }

    #[test]
    fn test_rate_limiter_prunes_idle_keys() {
        let limiter = RateLimiter::new();
        for i in 0..100 {
            limiter.check_and_record_at(&format!("anon_{i}"), 10, 1_000);
        }
        limiter.check_and_record_at("active", 10, 70_000);
        assert_eq!(limiter.tracked_keys(), 101);

        assert_eq!(limiter.prune_at(70_000), 100);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_rate_limiter_sweeps_while_recording() {
        let limiter = RateLimiter::new();
        for i in 0..PRUNE_EVERY - 1 {
            limiter.check_and_record_at(&format!("anon_{i}"), 10, 1_000);
        }
        assert_eq!(limiter.tracked_keys(), (PRUNE_EVERY - 1) as usize);
        limiter.check_and_record_at("late", 10, 120_000);
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
