use axum::{
    extract::FromRef,
    http::{header::InvalidHeaderValue, HeaderValue},
};
use time::{macros::format_description, Duration, OffsetDateTime};
use tracing::{error, info, warn};

use crate::{
    auth::{jwt::JwtKeys, password, reset, session::TOKEN_COOKIE},
    config::AppConfig,
    error::AppError,
    mail::{Email, EmailKind},
    state::AppState,
    users::{
        repo_types::{NewUser, User},
        validate,
    },
};

/// A user who just proved who they are, with a token to keep proving it.
#[derive(Debug)]
pub struct Session {
    pub token: String,
    pub user: User,
}

fn issue_session(state: &AppState, user: User) -> Result<Session, AppError> {
    let token = JwtKeys::from_ref(state).issue(user.id)?;
    Ok(Session { token, user })
}

/// Timestamp written to `password_changed_at`. Taken before the store write,
/// and the replacement token is only minted after that write returns.
fn password_changed_now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

fn validate_new_password(password: &str, confirm: &str) -> Result<(), AppError> {
    let mut errors = Vec::new();
    validate::check_password(password, confirm, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

pub async fn signup(
    state: &AppState,
    name: &str,
    email: &str,
    password: &str,
    password_confirm: &str,
) -> Result<Session, AppError> {
    let new_user = NewUser::create(name, email, password, password_confirm).await?;
    let user = state.users.insert(new_user).await?;

    let url = format!("{}/me", state.config.public_url.trim_end_matches('/'));
    let welcome = Email::new(&user.email, &user.name, EmailKind::Welcome, url);
    if let Err(e) = state.mailer.send(welcome).await {
        warn!(error = %e, user_id = %user.id, "welcome email failed");
    }

    info!(user_id = %user.id, email = %user.email, "user signed up");
    issue_session(state, user)
}

pub async fn login(
    state: &AppState,
    email: Option<&str>,
    password: Option<&str>,
) -> Result<Session, AppError> {
    let (Some(email), Some(password)) = (
        email.filter(|e| !e.trim().is_empty()),
        password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::MissingCredentials);
    };
    let email = validate::normalize_email(email);

    let Some(user) = state.users.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::IncorrectCredentials);
    };

    if !password::verify(password.to_string(), user.password_hash.clone()).await? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::IncorrectCredentials);
    }

    info!(user_id = %user.id, "user logged in");
    issue_session(state, user)
}

/// Mint a reset token, store its hash, and mail the raw value. A failed
/// delivery rolls the stored hash back.
pub async fn request_reset(state: &AppState, email: &str) -> Result<(), AppError> {
    let email = validate::normalize_email(email);
    let user = state
        .users
        .find_by_email(&email)
        .await?
        .ok_or(AppError::UserNotFound)?;

    let pending = reset::PendingReset::generate(OffsetDateTime::now_utc());
    state
        .users
        .set_reset_token(user.id, Some((pending.hash.clone(), pending.expires_at)))
        .await?;

    let url = reset::reset_url(&state.config.public_url, &pending.raw);
    let message = Email::new(&user.email, &user.name, EmailKind::PasswordReset, url);
    if let Err(e) = state.mailer.send(message).await {
        error!(error = %e, user_id = %user.id, "reset email failed; clearing token");
        if let Err(clear_err) = state.users.set_reset_token(user.id, None).await {
            error!(error = %clear_err, user_id = %user.id, "failed to clear reset token");
        }
        return Err(AppError::Delivery(e));
    }

    info!(user_id = %user.id, "password reset token sent");
    Ok(())
}

pub async fn redeem_reset(
    state: &AppState,
    raw_token: &str,
    password: &str,
    password_confirm: &str,
) -> Result<Session, AppError> {
    let token_hash = reset::hash_token(raw_token);
    let now = OffsetDateTime::now_utc();

    if state
        .users
        .find_by_reset_token(&token_hash, now)
        .await?
        .is_none()
    {
        return Err(AppError::InvalidOrExpiredToken);
    }

    validate_new_password(password, password_confirm)?;
    let password_hash = password::hash(password.to_string()).await?;

    // The update itself re-checks hash and expiry, so a concurrent redemption
    // of the same token cannot succeed twice.
    let user = state
        .users
        .redeem_reset_token(&token_hash, now, &password_hash, password_changed_now())
        .await?
        .ok_or(AppError::InvalidOrExpiredToken)?;

    info!(user_id = %user.id, "password reset redeemed");
    issue_session(state, user)
}

pub async fn update_password(
    state: &AppState,
    mut user: User,
    current_password: &str,
    new_password: &str,
    confirmed_password: &str,
) -> Result<Session, AppError> {
    if !password::verify(current_password.to_string(), user.password_hash.clone()).await? {
        warn!(user_id = %user.id, "update password with wrong current password");
        return Err(AppError::WrongPassword);
    }

    validate_new_password(new_password, confirmed_password)?;
    let password_hash = password::hash(new_password.to_string()).await?;
    let changed_at = password_changed_now();
    state
        .users
        .set_password(user.id, &password_hash, changed_at)
        .await?;

    user.password_hash = password_hash;
    user.password_changed_at = Some(changed_at);
    info!(user_id = %user.id, "password updated");
    issue_session(state, user)
}

fn cookie_expiry(at: OffsetDateTime) -> String {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    at.format(&format)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// `Set-Cookie` value carrying the session token.
pub fn session_cookie(config: &AppConfig, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl = Duration::days(config.jwt.cookie_ttl_days);
    let expires = cookie_expiry(OffsetDateTime::now_utc() + ttl);
    let mut cookie = format!(
        "{TOKEN_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}; Expires={expires}",
        ttl.whole_seconds()
    );
    if config.environment.is_production() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Overwrites the session cookie with a short-lived placeholder.
pub fn logout_cookie(config: &AppConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let expires = cookie_expiry(OffsetDateTime::now_utc() + Duration::seconds(10));
    let mut cookie = format!(
        "{TOKEN_COOKIE}=loggedout; Path=/; HttpOnly; SameSite=Lax; Max-Age=10; Expires={expires}"
    );
    if config.environment.is_production() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}
