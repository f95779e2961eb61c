use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

const SECRET_BYTES: usize = 32;

/// A freshly generated reset secret. Only `digest` and `expires_at` are
/// persisted; `secret` goes out in the reset email and is then dropped.
pub struct ResetToken {
    pub secret: String,
    pub digest: String,
    pub expires_at: OffsetDateTime,
}

pub fn generate(now: OffsetDateTime, ttl: Duration) -> ResetToken {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let secret = hex::encode(bytes);
    let digest = digest_secret(&secret);
    ResetToken {
        secret,
        digest,
        expires_at: now + ttl,
    }
}

/// SHA-256 hex digest. Fast hashing is fine here: the secret carries 256 bits
/// of entropy and is single-use.
pub fn digest_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
