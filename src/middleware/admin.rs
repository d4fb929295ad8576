use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::AppState;

/// Looks up the stored role rather than trusting the token claim, so a
/// revoked admin loses access as soon as the row changes.
async fn check_admin_role(state: &AppState, user_id: Uuid) -> Result<String, AppError> {
    let row = sqlx::query_scalar::<_, Option<String>>(
        "SELECT admin_role FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await?
    .flatten();

    let role = row.unwrap_or_default();
    if !matches!(role.as_str(), "admin" | "super_admin") {
        return Err(AppError::Forbidden("Requires admin role".into()));
    }
    Ok(role)
}

/// Middleware: requires an admin role on the authenticated user.
/// Use via `axum::middleware::from_fn_with_state(state, require_admin)`.
pub async fn require_admin(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))?;

    let role = check_admin_role(&state, user.id).await?;
    req.extensions_mut().insert(AuthUser {
        id: user.id,
        role: Some(role),
    });

    Ok(next.run(req).await)
}
