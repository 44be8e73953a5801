//! Room and participant identity generation.
//!
//! Session identifiers come from an injectable provider instead of ad hoc
//! randomness at the call site, so connection scenarios can be replayed
//! deterministically in tests.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default room name prefix used by the intake client.
pub const DEFAULT_ROOM_PREFIX: &str = "eureka-intake";

const IDENTITY_SUFFIX_LEN: usize = 6;

/// One session's room + participant pair, generated fresh per connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub room: String,
    pub identity: String,
}

/// Source of session identities.
pub trait IdentityProvider: Send + Sync {
    fn next(&self) -> SessionIdentity;
}

/// Production generator: `"{prefix}-{epoch_ms}"` rooms and
/// `"user-{random suffix}"` identities.
pub struct RandomIdentity {
    room_prefix: String,
}

impl RandomIdentity {
    pub fn new(room_prefix: impl Into<String>) -> Self {
        Self {
            room_prefix: room_prefix.into(),
        }
    }
}

impl Default for RandomIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM_PREFIX)
    }
}

impl IdentityProvider for RandomIdentity {
    fn next(&self) -> SessionIdentity {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(IDENTITY_SUFFIX_LEN)
            .map(|c| (c as char).to_ascii_lowercase())
            .collect();

        SessionIdentity {
            room: format!("{}-{epoch_ms}", self.room_prefix),
            identity: format!("user-{suffix}"),
        }
    }
}

/// Deterministic generator for tests and scripted runs.
#[derive(Debug, Clone)]
pub struct FixedIdentity {
    pub room: String,
    pub identity: String,
}

impl IdentityProvider for FixedIdentity {
    fn next(&self) -> SessionIdentity {
        SessionIdentity {
            room: self.room.clone(),
            identity: self.identity.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_identity_uses_prefix_and_user_suffix() {
        let provider = RandomIdentity::new("intake-test");
        let id = provider.next();
        assert!(id.room.starts_with("intake-test-"));
        assert!(id.identity.starts_with("user-"));
        assert_eq!(id.identity.len(), "user-".len() + IDENTITY_SUFFIX_LEN);
    }

    #[test]
    fn random_identities_differ_between_calls() {
        let provider = RandomIdentity::default();
        let a = provider.next();
        let b = provider.next();
        assert_ne!(a.identity, b.identity);
    }

    #[test]
    fn fixed_identity_repeats_exactly() {
        let provider = FixedIdentity {
            room: "room-1".into(),
            identity: "user-fixed".into(),
        };
        assert_eq!(provider.next(), provider.next());
        assert_eq!(provider.next().room, "room-1");
    }
}
