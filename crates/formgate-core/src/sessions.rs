use std::time::{Duration, Instant};

use rand::RngCore;

use crate::security::constant_time_eq_str;
use crate::ttl::TtlMap;

pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Admin bearer tokens. In memory only; a restart logs everyone out.
#[derive(Debug)]
pub struct SessionStore {
    sessions: TtlMap<String, ()>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: TtlMap::new(),
            ttl,
        }
    }

    pub fn issue(&self) -> String {
        self.issue_at(Instant::now())
    }

    pub fn issue_at(&self, now: Instant) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.sessions.insert_at(token.clone(), (), self.ttl, now);
        token
    }

    pub fn validate(&self, token: &str) -> bool {
        self.validate_at(token, Instant::now())
    }

    pub fn validate_at(&self, token: &str, now: Instant) -> bool {
        // Tokens are fixed-length hex; reject anything else before the lookup.
        if token.len() != 64 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
            return false;
        }
        self.sessions.get_at(&token.to_string(), now).is_some()
    }

    pub fn revoke(&self, token: &str) {
        self.sessions.remove(&token.to_string());
    }

    pub fn evict_expired_at(&self, now: Instant) -> usize {
        self.sessions.evict_expired_at(now)
    }
}

/// Constant-time check of submitted admin credentials.
pub fn credentials_match(
    expected_user: &str,
    expected_password: &str,
    user: &str,
    password: &str,
) -> bool {
    let user_ok = constant_time_eq_str(expected_user, user);
    let password_ok = constant_time_eq_str(expected_password, password);
    user_ok & password_ok
}
