use axum::{
    extract::{Request, State},
    http::{StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::errors::ErrorKind;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use sqlx::postgres::PgDatabaseError;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{config::Environment, state::AppState};

/// Every failure a handler can return. Rendering happens in one place:
/// [`IntoResponse`] here, re-shaped by [`normalize`] at the router root.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("You are not logged in! Please log in to get access")]
    NotAuthenticated,
    #[error("Invalid token. Please log in again")]
    InvalidToken,
    #[error("Your token has expired! Please log in again")]
    ExpiredToken,
    #[error("The user belonging to this token does no longer exist")]
    UserGone,
    #[error("User recently changed password! Please log in again")]
    StalePassword,
    #[error("You do not have permission to perform this action")]
    Forbidden,
    #[error("There is no user with this email address")]
    UserNotFound,
    #[error("Token is invalid or has expired")]
    InvalidOrExpiredToken,
    #[error("Your current password is wrong")]
    WrongPassword,
    #[error("Incorrect email or password")]
    IncorrectCredentials,
    #[error("Please provide email and password!")]
    MissingCredentials,
    #[error("This route is not for password updates. Please use /updateMyPassword.")]
    PasswordRouteMisuse,
    #[error("There was an error sending the email. Try again later")]
    Delivery(#[source] anyhow::Error),
    #[error("Invalid input data. {}", .0.join(". "))]
    Validation(Vec<String>),
    #[error("Duplicate field value: {value}. Please use another value")]
    DuplicateKey { field: String, value: String },
    #[error("Invalid {path}: {value}.")]
    Cast { path: String, value: String },
    #[error("No {0} found with that ID")]
    NotFound(&'static str),
    #[error("Can't find {0} on this server")]
    RouteNotFound(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotAuthenticated
            | AppError::InvalidToken
            | AppError::ExpiredToken
            | AppError::UserGone
            | AppError::StalePassword
            | AppError::WrongPassword
            | AppError::IncorrectCredentials => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::UserNotFound | AppError::NotFound(_) | AppError::RouteNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::InvalidOrExpiredToken
            | AppError::MissingCredentials
            | AppError::PasswordRouteMisuse
            | AppError::Validation(_)
            | AppError::DuplicateKey { .. }
            | AppError::Cast { .. } => StatusCode::BAD_REQUEST,
            AppError::Delivery(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Operational errors are anticipated and safe to show to clients verbatim.
    pub fn is_operational(&self) -> bool {
        !matches!(self, AppError::Internal(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotAuthenticated => "NotAuthenticatedError",
            AppError::InvalidToken => "InvalidTokenError",
            AppError::ExpiredToken => "ExpiredTokenError",
            AppError::UserGone => "UserGoneError",
            AppError::StalePassword => "StalePasswordError",
            AppError::Forbidden => "ForbiddenError",
            AppError::UserNotFound => "UserNotFoundError",
            AppError::InvalidOrExpiredToken => "InvalidOrExpiredTokenError",
            AppError::WrongPassword => "WrongPasswordError",
            AppError::IncorrectCredentials => "IncorrectCredentialsError",
            AppError::MissingCredentials => "MissingCredentialsError",
            AppError::PasswordRouteMisuse => "PasswordRouteMisuseError",
            AppError::Delivery(_) => "DeliveryError",
            AppError::Validation(_) => "ValidationError",
            AppError::DuplicateKey { .. } => "DuplicateKeyError",
            AppError::Cast { .. } => "CastError",
            AppError::NotFound(_) => "NotFoundError",
            AppError::RouteNotFound(_) => "RouteNotFoundError",
            AppError::Internal(_) => "InternalError",
        }
    }
}

/// Parse a path id, reporting a cast failure instead of axum's plain-text rejection.
pub fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::Cast {
        path: "id".into(),
        value: raw.to_string(),
    })
}

lazy_static! {
    static ref PG_KEY_DETAIL: Regex =
        Regex::new(r"Key \((?P<field>[^)]+)\)=\((?P<value>[^)]*)\)").unwrap();
    static ref PG_BAD_LITERAL: Regex =
        Regex::new(r#"for type (?P<ty>\w+): "(?P<value>[^"]*)""#).unwrap();
}

/// Only the offending literal and its type reach the client.
fn cast_from_message(message: &str) -> AppError {
    match PG_BAD_LITERAL.captures(message) {
        Some(c) => AppError::Cast {
            path: c["ty"].to_string(),
            value: c["value"].to_string(),
        },
        None => AppError::Cast {
            path: "value".into(),
            value: "invalid value".into(),
        },
    }
}

fn duplicate_from_detail(detail: Option<&str>) -> AppError {
    let captures = detail.and_then(|d| PG_KEY_DETAIL.captures(d));
    match captures {
        Some(c) => AppError::DuplicateKey {
            field: c["field"].to_string(),
            value: c["value"].to_string(),
        },
        None => AppError::DuplicateKey {
            field: "unknown".into(),
            value: "unknown".into(),
        },
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => {
                    let detail = db_err
                        .try_downcast_ref::<PgDatabaseError>()
                        .and_then(|e| e.detail());
                    return duplicate_from_detail(detail);
                }
                // invalid_text_representation
                Some("22P02") => {
                    debug!(message = db_err.message(), "database rejected a literal");
                    return cast_from_message(db_err.message());
                }
                _ => {}
            }
        }
        AppError::Internal(anyhow::Error::new(err).context("database query failed"))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AppError::ExpiredToken,
            _ => AppError::InvalidToken,
        }
    }
}

/// Snapshot of a rendered error, carried in response extensions so that
/// [`normalize`] can re-render it for the configured mode.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    pub detail: String,
    pub operational: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Api,
    Page,
}

impl RequestKind {
    pub fn from_path(path: &str) -> Self {
        if path.starts_with("/api") {
            RequestKind::Api
        } else {
            RequestKind::Page
        }
    }
}

impl From<&AppError> for ErrorReport {
    fn from(err: &AppError) -> Self {
        Self {
            status: err.status_code(),
            kind: err.kind(),
            message: err.to_string(),
            detail: format!("{err:?}"),
            operational: err.is_operational(),
        }
    }
}

impl ErrorReport {
    fn status_label(&self) -> &'static str {
        if self.status.is_server_error() {
            "error"
        } else {
            "fail"
        }
    }

    pub fn render(&self, env: Environment, kind: RequestKind) -> Response {
        let body = match (env, kind) {
            (Environment::Development, RequestKind::Api) => json!({
                "status": self.status_label(),
                "kind": self.kind,
                "message": self.message,
                "error": self.detail,
            }),
            (Environment::Development, RequestKind::Page) => json!({
                "title": "Something went wrong",
                "msg": self.message,
            }),
            (Environment::Production, RequestKind::Api) if self.operational => json!({
                "status": self.status_label(),
                "message": self.message,
            }),
            (Environment::Production, RequestKind::Api) => json!({
                "status": "error",
                "message": "Something went very wrong",
            }),
            (Environment::Production, RequestKind::Page) => json!({
                "title": "Something went wrong",
                "msg": if self.operational {
                    self.message.as_str()
                } else {
                    "Please try again later."
                },
            }),
        };
        let status = if self.operational {
            self.status
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let report = ErrorReport::from(&self);
        if report.operational {
            debug!(kind = report.kind, status = %report.status, message = %report.message, "request failed");
        } else {
            error!(error = ?self, "unhandled error");
        }
        // Sanitized by default; `normalize` widens it outside production.
        let mut res = report.render(Environment::Production, RequestKind::Api);
        res.extensions_mut().insert(report);
        res
    }
}

/// Router-level error boundary: re-renders any [`ErrorReport`] for the
/// configured environment and for API vs page requests.
pub async fn normalize(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let kind = RequestKind::from_path(req.uri().path());
    let res = next.run(req).await;
    match res.extensions().get::<ErrorReport>().cloned() {
        Some(report) => {
            let mut out = report.render(state.config.environment, kind);
            out.extensions_mut().insert(report);
            out
        }
        None => res,
    }
}

pub async fn route_not_found(uri: Uri) -> AppError {
    AppError::RouteNotFound(uri.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_mapping_follows_error_class() {
        assert_eq!(AppError::NotAuthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::StalePassword.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::UserNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::InvalidOrExpiredToken.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Validation(vec!["x".into()]).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn cast_keeps_only_type_and_literal() {
        let err = cast_from_message(r#"invalid input syntax for type uuid: "abc-123""#);
        assert_eq!(err.to_string(), "Invalid uuid: abc-123.");

        let err = cast_from_message("malformed array literal near line 3 of internal view");
        assert_eq!(err.to_string(), "Invalid value: invalid value.");
        assert!(!err.to_string().contains("internal"));
    }

    #[test]
    fn messages_are_client_facing() {
        let err = AppError::Validation(vec![
            "Please tell us your name!".into(),
            "Passwords are not the same".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "Invalid input data. Please tell us your name!. Passwords are not the same"
        );
        let err = AppError::Cast {
            path: "id".into(),
            value: "abc".into(),
        };
        assert_eq!(err.to_string(), "Invalid id: abc.");
    }

    #[test]
    fn parse_id_reports_cast_error() {
        let err = parse_id("not-a-uuid").unwrap_err();
        assert!(matches!(err, AppError::Cast { ref value, .. } if value == "not-a-uuid"));
        assert!(parse_id(&Uuid::new_v4().to_string()).is_ok());
    }

    #[test]
    fn duplicate_detail_is_parsed() {
        let err = duplicate_from_detail(Some("Key (email)=(a@x.com) already exists."));
        match err {
            AppError::DuplicateKey { field, value } => {
                assert_eq!(field, "email");
                assert_eq!(value, "a@x.com");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn jwt_expiry_maps_to_expired_token() {
        let expired = jsonwebtoken::errors::Error::from(ErrorKind::ExpiredSignature);
        assert!(matches!(AppError::from(expired), AppError::ExpiredToken));
        let bad = jsonwebtoken::errors::Error::from(ErrorKind::InvalidSignature);
        assert!(matches!(AppError::from(bad), AppError::InvalidToken));
    }

    #[tokio::test]
    async fn production_hides_internal_details() {
        let report = ErrorReport::from(&AppError::Internal(anyhow::anyhow!("db password is hunter2")));
        let res = report.render(Environment::Production, RequestKind::Api);
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(res).await;
        assert_eq!(body["message"], "Something went very wrong");
        assert!(!body.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn development_exposes_cause() {
        let report = ErrorReport::from(&AppError::Internal(anyhow::anyhow!("db password is hunter2")));
        let body = body_json(report.render(Environment::Development, RequestKind::Api)).await;
        assert_eq!(body["status"], "error");
        assert!(body["error"].as_str().unwrap().contains("hunter2"));
    }

    #[tokio::test]
    async fn operational_errors_keep_message_in_production() {
        let report = ErrorReport::from(&AppError::Forbidden);
        let res = report.render(Environment::Production, RequestKind::Api);
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let body = body_json(res).await;
        assert_eq!(body["status"], "fail");
        assert_eq!(
            body["message"],
            "You do not have permission to perform this action"
        );
    }

    #[tokio::test]
    async fn page_requests_get_page_shape() {
        let report = ErrorReport::from(&AppError::Internal(anyhow::anyhow!("secret")));
        let body = body_json(report.render(Environment::Production, RequestKind::Page)).await;
        assert_eq!(body["title"], "Something went wrong");
        assert_eq!(body["msg"], "Please try again later.");
        assert_eq!(RequestKind::from_path("/api/v1/tours"), RequestKind::Api);
        assert_eq!(RequestKind::from_path("/"), RequestKind::Page);
    }
}
