use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already a member of this team")]
    AlreadyMember,

    #[error("Not a member of this team")]
    NotAMember,

    #[error("Team is full")]
    TeamFull,

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::AlreadyMember => (StatusCode::CONFLICT, self.to_string()),
            AppError::NotAMember => (StatusCode::CONFLICT, self.to_string()),
            AppError::TeamFull => (StatusCode::CONFLICT, self.to_string()),
            AppError::QuotaExceeded(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests".to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Jwt(_) => (StatusCode::UNAUTHORIZED, "Invalid token".to_string()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn membership_errors_map_to_conflict() {
        assert_eq!(status_of(AppError::AlreadyMember), StatusCode::CONFLICT);
        assert_eq!(status_of(AppError::NotAMember), StatusCode::CONFLICT);
        assert_eq!(status_of(AppError::TeamFull), StatusCode::CONFLICT);
    }

    #[test]
    fn quota_maps_to_forbidden() {
        assert_eq!(
            status_of(AppError::QuotaExceeded("too many teams".into())),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn internal_errors_hide_details() {
        let resp = AppError::Internal("secret detail".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
