//! Accessory authentication.
//!
//! The host sends a fresh 32-byte challenge; a genuine accessory answers
//! with the blake3 keyed hash of that challenge under a key derived from
//! the shared secret.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::message::CHALLENGE_LEN;

const KEY_CONTEXT: &str = "wipry-core 2024-06 accessory challenge v1";

static CHALLENGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Derive the keyed-hash key for `shared_secret`.
pub fn derive_key(shared_secret: &str) -> [u8; 32] {
    blake3::derive_key(KEY_CONTEXT, shared_secret.as_bytes())
}

/// The answer a genuine accessory gives to `challenge`.
pub fn challenge_response(shared_secret: &str, challenge: &[u8; CHALLENGE_LEN]) -> [u8; CHALLENGE_LEN] {
    *blake3::keyed_hash(&derive_key(shared_secret), challenge).as_bytes()
}

/// A challenge that is unique within this process.
pub fn new_challenge() -> [u8; CHALLENGE_LEN] {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let count = CHALLENGE_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = blake3::Hasher::new();
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&count.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    *hasher.finalize().as_bytes()
}

/// Compare a received answer against the expected one.
pub fn verify(shared_secret: &str, challenge: &[u8; CHALLENGE_LEN], answer: &[u8; CHALLENGE_LEN]) -> bool {
    // blake3::Hash equality is constant time.
    blake3::Hash::from(challenge_response(shared_secret, challenge)) == blake3::Hash::from(*answer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenges_are_distinct() {
        assert_ne!(new_challenge(), new_challenge());
    }

    #[test]
    fn matching_secret_verifies() {
        let challenge = new_challenge();
        let answer = challenge_response("secret", &challenge);
        assert!(verify("secret", &challenge, &answer));
        assert!(!verify("other", &challenge, &answer));
    }

    #[test]
    fn answer_depends_on_challenge() {
        let a = challenge_response("secret", &[1; CHALLENGE_LEN]);
        let b = challenge_response("secret", &[2; CHALLENGE_LEN]);
        assert_ne!(a, b);
    }
}
