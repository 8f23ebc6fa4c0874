//! High level security challenge handling

use sha2::{Digest, Sha256};

/// Length of the client-to-server challenge
pub const CHALLENGE_LENGTH: usize = 16;

/// Fresh client-to-server challenge
pub fn challenge() -> Vec<u8> {
    rand::random::<[u8; CHALLENGE_LENGTH]>().to_vec()
}

/// Answer to `challenge` using the shared `secret`: SHA-256(secret || challenge)
pub fn answer(secret: &[u8], challenge: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret);
    hasher.update(challenge);
    hasher.finalize().to_vec()
}
