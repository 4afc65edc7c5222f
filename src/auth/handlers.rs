use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, ResetPasswordRequest,
            SignupRequest, StatusMessage, UpdatePasswordRequest, UserData,
        },
        guard,
        services::{self, Session},
        session::CurrentUser,
    },
    error::AppError,
    extract::Payload,
    state::AppState,
};

pub fn auth_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/users/signup", post(signup))
        .route("/users/login", post(login))
        .route("/users/logout", get(logout))
        .route("/users/forgotPassword", post(forgot_password))
        .route("/users/resetPassword/:token", patch(reset_password))
        .route(
            "/users/updateMyPassword",
            guard::protected(patch(update_my_password), state),
        )
}

fn cookie_header(value: Result<HeaderValue, header::InvalidHeaderValue>) -> Result<HeaderMap, AppError> {
    let value = value.map_err(|e| anyhow::anyhow!("building session cookie: {e}"))?;
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, value);
    Ok(headers)
}

/// Token in body and cookie, user in `data`.
fn session_response(state: &AppState, status: StatusCode, session: Session) -> Result<Response, AppError> {
    let headers = cookie_header(services::session_cookie(&state.config, &session.token))?;
    let body = AuthResponse {
        status: "success".into(),
        data: UserData {
            user: (&session.user).into(),
        },
        token: session.token,
    };
    Ok((status, headers, Json(body)).into_response())
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Payload(payload): Payload<SignupRequest>,
) -> Result<Response, AppError> {
    let session = services::signup(
        &state,
        &payload.name,
        &payload.email,
        &payload.password,
        &payload.password_confirm,
    )
    .await?;
    session_response(&state, StatusCode::CREATED, session)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Payload(payload): Payload<LoginRequest>,
) -> Result<Response, AppError> {
    let session =
        services::login(&state, payload.email.as_deref(), payload.password.as_deref()).await?;
    session_response(&state, StatusCode::OK, session)
}

#[instrument(skip(state))]
pub async fn logout(State(state): State<AppState>) -> Result<Response, AppError> {
    let headers = cookie_header(services::logout_cookie(&state.config))?;
    Ok((headers, Json(StatusMessage::success(None))).into_response())
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Payload(payload): Payload<ForgotPasswordRequest>,
) -> Result<Json<StatusMessage>, AppError> {
    services::request_reset(&state, &payload.email).await?;
    Ok(Json(StatusMessage::success(Some("Token sent to email"))))
}

#[instrument(skip(state, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Payload(payload): Payload<ResetPasswordRequest>,
) -> Result<Response, AppError> {
    let session = services::redeem_reset(
        &state,
        &token,
        &payload.password,
        &payload.password_confirm,
    )
    .await?;
    session_response(&state, StatusCode::OK, session)
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn update_my_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Payload(payload): Payload<UpdatePasswordRequest>,
) -> Result<Response, AppError> {
    let session = services::update_password(
        &state,
        user,
        &payload.current_password,
        &payload.new_password,
        &payload.confirmed_password,
    )
    .await?;
    session_response(&state, StatusCode::OK, session)
}
