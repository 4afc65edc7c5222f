use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// JWT payload used for session authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,   // user ID
    pub iat: i64,    // issued at (unix seconds)
    pub iat_ms: i64, // issued at (unix milliseconds), compared against password changes
    pub exp: i64,    // expires at (unix seconds)
    pub iss: String, // issuer
    pub aud: String, // audience
}

/// Millisecond unix timestamp, the resolution of the stale-token check.
pub fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// What a verified token tells us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedToken {
    pub user_id: Uuid,
    pub issued_at_ms: i64,
}

impl From<&Claims> for VerifiedToken {
    fn from(c: &Claims) -> Self {
        Self {
            user_id: c.sub,
            issued_at_ms: c.iat_ms,
        }
    }
}
