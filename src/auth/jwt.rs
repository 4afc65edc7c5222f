use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::claims::{unix_millis, Claims, VerifiedToken},
    config::JwtConfig,
    error::AppError,
    state::AppState,
};

/// Signing and verification keys plus the token horizon.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs((cfg.ttl_minutes.max(0) as u64).saturating_mul(60)),
        }
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        JwtKeys::new(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn issue(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.issue_at(user_id, OffsetDateTime::now_utc())
    }

    pub(crate) fn issue_at(&self, user_id: Uuid, now: OffsetDateTime) -> anyhow::Result<String> {
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp(),
            iat_ms: unix_millis(now),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<VerifiedToken, AppError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(VerifiedToken::from(&data.claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys(secret: &str, issuer: &str, audience: &str) -> JwtKeys {
        JwtKeys::new(&JwtConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_minutes: 5,
            cookie_ttl_days: 1,
        })
    }

    #[test]
    fn issue_and_verify_returns_same_user() {
        let keys = make_keys("dev-secret", "test-issuer", "test-aud");
        for _ in 0..8 {
            let user_id = Uuid::new_v4();
            let token = keys.issue(user_id).expect("sign");
            let verified = keys.verify(&token).expect("verify token");
            assert_eq!(verified.user_id, user_id);
        }
    }

    #[test]
    fn issued_at_keeps_millisecond_resolution() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let at = OffsetDateTime::now_utc() - TimeDuration::milliseconds(61_250);
        let token = keys.issue_at(Uuid::new_v4(), at).unwrap();
        assert_eq!(keys.verify(&token).unwrap().issued_at_ms, unix_millis(at));
    }

    #[test]
    fn expired_token_is_rejected_as_expired() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let long_ago = OffsetDateTime::now_utc() - TimeDuration::hours(1);
        let token = keys.issue_at(Uuid::new_v4(), long_ago).unwrap();
        assert!(matches!(keys.verify(&token), Err(AppError::ExpiredToken)));
    }

    #[test]
    fn tampered_or_foreign_tokens_are_invalid() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let token = keys.issue(Uuid::new_v4()).unwrap();

        let sig_start = token.rfind('.').unwrap() + 1;
        let first = &token[sig_start..sig_start + 1];
        let swapped = if first == "A" { "B" } else { "A" };
        let tampered = format!("{}{}{}", &token[..sig_start], swapped, &token[sig_start + 1..]);
        assert!(matches!(keys.verify(&tampered), Err(AppError::InvalidToken)));

        let other_secret = make_keys("other-secret", "iss", "aud");
        assert!(matches!(other_secret.verify(&token), Err(AppError::InvalidToken)));

        let other_issuer = make_keys("dev-secret", "bad-iss", "bad-aud");
        assert!(matches!(other_issuer.verify(&token), Err(AppError::InvalidToken)));

        assert!(matches!(keys.verify("not.a.jwt"), Err(AppError::InvalidToken)));
    }
}
