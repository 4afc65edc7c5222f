use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::MethodRouter,
};
use tracing::warn;

use crate::{
    auth::session::{protect, CurrentUser},
    error::AppError,
    state::AppState,
    users::repo_types::{Role, User},
};

/// Plain set membership; no role implies another.
pub fn restrict_to(user: &User, allowed: &[Role]) -> Result<(), AppError> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        warn!(user_id = %user.id, role = %user.role, ?allowed, "role not permitted");
        Err(AppError::Forbidden)
    }
}

/// Middleware form of [`restrict_to`]. Must run after [`protect`].
pub async fn require_roles(
    allowed: &'static [Role],
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let CurrentUser(user) = req
        .extensions()
        .get::<CurrentUser>()
        .ok_or(AppError::NotAuthenticated)?;
    restrict_to(user, allowed)?;
    Ok(next.run(req).await)
}

/// Wrap a route so it requires a live session.
pub fn protected(route: MethodRouter<AppState>, state: &AppState) -> MethodRouter<AppState> {
    route.route_layer(middleware::from_fn_with_state(state.clone(), protect))
}

/// Wrap a route so it requires a live session and one of `allowed` roles.
pub fn restricted(
    route: MethodRouter<AppState>,
    state: &AppState,
    allowed: &'static [Role],
) -> MethodRouter<AppState> {
    let gated = route.route_layer(middleware::from_fn(move |req: Request, next: Next| {
        require_roles(allowed, req, next)
    }));
    protected(gated, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn user_with(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            name: "A".into(),
            email: "a@x.com".into(),
            photo: "default.jpg".into(),
            role,
            password_hash: "x".into(),
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn admin_only_rejects_guide_and_accepts_admin() {
        let err = restrict_to(&user_with(Role::Guide), &[Role::Admin]).unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        assert!(restrict_to(&user_with(Role::Admin), &[Role::Admin]).is_ok());
    }

    #[test]
    fn admin_is_not_implicitly_allowed() {
        let err = restrict_to(&user_with(Role::Admin), &[Role::Guide, Role::LeadGuide]).unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[test]
    fn empty_allow_list_rejects_everyone() {
        for role in [Role::User, Role::Guide, Role::LeadGuide, Role::Admin] {
            assert!(restrict_to(&user_with(role), &[]).is_err());
        }
    }
}
