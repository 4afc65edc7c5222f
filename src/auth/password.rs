use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

fn hash_blocking(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow::anyhow!("argon2 hash failed: {e}"))
}

/// An unparseable stored hash counts as a mismatch.
fn verify_blocking(plain: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            error!(error = %e, "stored password hash is malformed");
            false
        }
    }
}

/// Salted argon2 hash, computed on the blocking pool.
pub async fn hash(plain: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash_blocking(&plain))
        .await
        .context("hash task panicked")?
}

pub async fn verify(plain: String, stored: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || verify_blocking(&plain, &stored))
        .await
        .context("verify task panicked")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matching_password_verifies() {
        let stored = hash("Secur3P@ssw0rd!".into()).await.unwrap();
        assert!(stored.starts_with("$argon2"));
        assert!(verify("Secur3P@ssw0rd!".into(), stored).await.unwrap());
    }

    #[tokio::test]
    async fn other_password_does_not() {
        let stored = hash("correct-horse".into()).await.unwrap();
        assert!(!verify("wrong-horse".into(), stored).await.unwrap());
    }

    #[test]
    fn same_password_gets_fresh_salt() {
        let a = hash_blocking("secret12").unwrap();
        let b = hash_blocking("secret12").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_is_a_mismatch() {
        assert!(!verify_blocking("anything", "not-a-valid-hash"));
    }
}
