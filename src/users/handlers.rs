use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, patch},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{guard, session::CurrentUser},
    error::{parse_id, AppError},
    extract::{Params, Payload},
    response::{DataResponse, Pagination},
    state::AppState,
    users::{
        dto::{PublicUser, UpdateMeRequest, UserEnvelope, UsersEnvelope},
        repo::ProfileChanges,
        repo_types::Role,
        validate,
    },
};

const ADMINS: &[Role] = &[Role::Admin];

pub fn user_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/users/me", guard::protected(get(get_me), state))
        .route("/users/updateMe", guard::protected(patch(update_me), state))
        .route("/users/deleteMe", guard::protected(delete(delete_me), state))
        .route("/users", guard::restricted(get(list_users), state, ADMINS))
        .route(
            "/users/:id",
            guard::restricted(get(get_user).delete(delete_user), state, ADMINS),
        )
}

#[instrument(skip(user), fields(user_id = %user.id))]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<DataResponse<UserEnvelope>> {
    Json(DataResponse::new(UserEnvelope {
        user: PublicUser::from(&user),
    }))
}

/// Only name and email are writable here.
fn profile_changes(payload: UpdateMeRequest) -> Result<ProfileChanges, AppError> {
    if payload.password.is_some() || payload.password_confirm.is_some() {
        return Err(AppError::PasswordRouteMisuse);
    }

    let mut errors = Vec::new();
    let name = payload.name.map(|n| n.trim().to_string());
    if name.as_deref() == Some("") {
        errors.push("Please tell us your name!".to_string());
    }
    let email = payload.email.map(|e| validate::normalize_email(&e));
    if let Some(email) = &email {
        validate::check_email(email, &mut errors);
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }
    Ok(ProfileChanges { name, email })
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Payload(payload): Payload<UpdateMeRequest>,
) -> Result<Json<DataResponse<UserEnvelope>>, AppError> {
    let changes = profile_changes(payload)?;
    let updated = state
        .users
        .update_profile(user.id, changes)
        .await?
        .ok_or(AppError::UserGone)?;
    info!(user_id = %updated.id, "profile updated");
    Ok(Json(DataResponse::new(UserEnvelope {
        user: PublicUser::from(&updated),
    })))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn delete_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AppError> {
    state.users.deactivate(user.id).await?;
    info!(user_id = %user.id, "account deactivated");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    Params(page): Params<Pagination>,
) -> Result<Json<DataResponse<UsersEnvelope>>, AppError> {
    let window = page.window()?;
    let users: Vec<PublicUser> = state
        .users
        .list(window.limit, window.offset)
        .await?
        .iter()
        .map(PublicUser::from)
        .collect();
    let count = users.len();
    Ok(Json(DataResponse::with_results(UsersEnvelope { users }, count)))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<UserEnvelope>>, AppError> {
    let id = parse_id(&id)?;
    let user = state
        .users
        .find_by_id(id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(DataResponse::new(UserEnvelope {
        user: PublicUser::from(&user),
    })))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    if !state.users.delete(id).await? {
        return Err(AppError::NotFound("user"));
    }
    info!(user_id = %id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
