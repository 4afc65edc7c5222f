use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

pub const RESET_TOKEN_TTL: Duration = Duration::minutes(10);

/// A freshly minted reset token. `raw` goes to the user, `hash` to the store.
#[derive(Debug, Clone)]
pub struct PendingReset {
    pub raw: String,
    pub hash: String,
    pub expires_at: OffsetDateTime,
}

impl PendingReset {
    pub fn generate(now: OffsetDateTime) -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let raw = hex::encode(bytes);
        let hash = hash_token(&raw);
        Self {
            raw,
            hash,
            expires_at: now + RESET_TOKEN_TTL,
        }
    }
}

/// One-way hash used for storage and lookup; raw tokens never touch the store.
pub fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn reset_url(public_url: &str, raw: &str) -> String {
    let base = public_url.trim_end_matches('/');
    format!("{base}/api/v1/users/resetPassword/{raw}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_random_and_hashed() {
        let now = OffsetDateTime::now_utc();
        let a = PendingReset::generate(now);
        let b = PendingReset::generate(now);
        assert_ne!(a.raw, b.raw);
        assert_eq!(a.raw.len(), 64);
        assert_ne!(a.raw, a.hash);
        assert_eq!(a.hash, hash_token(&a.raw));
        assert_eq!(a.expires_at - now, Duration::minutes(10));
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn reset_url_trims_trailing_slash() {
        assert_eq!(
            reset_url("https://tours.example/", "tok"),
            "https://tours.example/api/v1/users/resetPassword/tok"
        );
    }
}
