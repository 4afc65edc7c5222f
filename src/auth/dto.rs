use serde::{Deserialize, Serialize};

use crate::users::dto::PublicUser;

/// Request body for signup.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

/// Request body for login. Both fields are optional so that missing ones
/// get a proper message instead of a body rejection.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirmed_password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserData {
    pub user: PublicUser,
}

/// Returned by every endpoint that logs the caller in.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub status: String,
    pub token: String,
    pub data: UserData,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusMessage {
    pub fn success(message: Option<&str>) -> Self {
        Self {
            status: "success".into(),
            message: message.map(str::to_string),
        }
    }
}
