use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

/// Runtime mode; drives error verbosity and cookie flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => anyhow::bail!("unknown APP_ENV value: {other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub cookie_ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// When unset the service runs on in-memory stores.
    pub database_url: Option<String>,
    pub environment: Environment,
    /// Base URL used to build links sent by email.
    pub public_url: String,
    pub jwt: JwtConfig,
}

/// Ten years, the longest lifetime a token or cookie may be given.
const MAX_TOKEN_MINUTES: i64 = 60 * 24 * 3653;
const MAX_COOKIE_DAYS: i64 = 3653;

fn env_i64(key: &str, default: i64) -> anyhow::Result<i64> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<i64>()
            .with_context(|| format!("{key} must be a whole number, got {v:?}")),
        Err(_) => Ok(default),
    }
}

impl JwtConfig {
    /// Both lifetimes must be positive and at most ten years, so expiry
    /// arithmetic can never overflow.
    pub fn check_lifetimes(&self) -> anyhow::Result<()> {
        if !(1..=MAX_TOKEN_MINUTES).contains(&self.ttl_minutes) {
            anyhow::bail!(
                "JWT_EXPIRES_IN_MINUTES must be between 1 and {MAX_TOKEN_MINUTES}, got {}",
                self.ttl_minutes
            );
        }
        if !(1..=MAX_COOKIE_DAYS).contains(&self.cookie_ttl_days) {
            anyhow::bail!(
                "JWT_COOKIE_EXPIRES_IN_DAYS must be between 1 and {MAX_COOKIE_DAYS}, got {}",
                self.cookie_ttl_days
            );
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let environment = match std::env::var("APP_ENV") {
            Ok(v) => v.parse::<Environment>()?,
            Err(_) => Environment::Development,
        };
        let public_url = std::env::var("PUBLIC_URL").unwrap_or_else(|_| {
            format!(
                "http://127.0.0.1:{}",
                std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
            )
        });
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "tourbook".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "tourbook-users".into()),
            ttl_minutes: env_i64("JWT_EXPIRES_IN_MINUTES", 60 * 24 * 90)?,
            cookie_ttl_days: env_i64("JWT_COOKIE_EXPIRES_IN_DAYS", 90)?,
        };
        jwt.check_lifetimes()?;
        Ok(Self {
            database_url,
            environment,
            public_url,
            jwt,
        })
    }
}
