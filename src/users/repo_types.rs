use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{claims::unix_millis, password},
    error::AppError,
    users::validate,
};

/// Fixed set of roles. No hierarchy: admin is not implied by anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::LeadGuide => "lead-guide",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "guide" => Ok(Role::Guide),
            "lead-guide" => Ok(Role::LeadGuide),
            "admin" => Ok(Role::Admin),
            other => anyhow::bail!("unknown role {other:?}"),
        }
    }
}

/// User record. Secret fields never leave the process in JSON.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub password_changed_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub password_reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub password_reset_expires: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub active: bool,
    pub created_at: OffsetDateTime,
}

impl User {
    /// True when the password changed after a token issued at `issued_at_ms`
    /// (unix milliseconds) was signed.
    pub fn changed_password_after(&self, issued_at_ms: i64) -> bool {
        match self.password_changed_at {
            Some(changed) => issued_at_ms < unix_millis(changed),
            None => false,
        }
    }
}

/// Row as stored in Postgres; role is kept as text.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: String,
    pub password_hash: String,
    pub password_changed_at: Option<OffsetDateTime>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<OffsetDateTime>,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            name: r.name,
            email: r.email,
            photo: r.photo,
            role: r.role.parse()?,
            password_hash: r.password_hash,
            password_changed_at: r.password_changed_at,
            password_reset_token: r.password_reset_token,
            password_reset_expires: r.password_reset_expires,
            active: r.active,
            created_at: r.created_at,
        })
    }
}

/// A validated user ready to insert. Outside the `users` module the only way
/// to build one is through [`NewUser::create`], which always hashes the
/// password and drops the confirmation.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub(super) name: String,
    pub(super) email: String,
    pub(super) role: Role,
    pub(super) password_hash: String,
}

impl NewUser {
    pub async fn create(
        name: &str,
        email: &str,
        password: &str,
        password_confirm: &str,
    ) -> Result<Self, AppError> {
        let name = name.trim().to_string();
        let email = validate::normalize_email(email);

        let mut errors = Vec::new();
        if name.is_empty() {
            errors.push("Please tell us your name!".to_string());
        }
        validate::check_email(&email, &mut errors);
        validate::check_password(password, password_confirm, &mut errors);
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        let password_hash = password::hash(password.to_string()).await?;
        Ok(Self {
            name,
            email,
            role: Role::User,
            password_hash,
        })
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Skips validation and hashing; store tests only.
    #[cfg(test)]
    pub fn prehashed(email: &str, role: Role, password_hash: &str) -> Self {
        Self {
            name: "Tester".into(),
            email: email.into(),
            role,
            password_hash: password_hash.into(),
        }
    }
}
