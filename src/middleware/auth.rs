use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub role: Option<String>,
    #[serde(rename = "type")]
    pub token_type: Option<String>, // "access" or "refresh"
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Option<String>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        matches!(self.role.as_deref(), Some("admin") | Some("super_admin"))
    }
}

pub fn generate_tokens(
    user_id: Uuid,
    role: Option<&str>,
    secret: &str,
    access_expiry_secs: i64,
    refresh_expiry_secs: i64,
) -> AppResult<(String, String)> {
    let now = Utc::now().timestamp();

    let access_claims = Claims {
        sub: user_id.to_string(),
        role: role.map(String::from),
        token_type: Some("access".to_string()),
        exp: now + access_expiry_secs,
        iat: now,
    };
    let access_token = encode(
        &Header::default(),
        &access_claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    let refresh_claims = Claims {
        sub: user_id.to_string(),
        role: role.map(String::from),
        token_type: Some("refresh".to_string()),
        exp: now + refresh_expiry_secs,
        iat: now,
    };
    let refresh_token = encode(
        &Header::default(),
        &refresh_claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((access_token, refresh_token))
}

pub fn verify_token(token: &str, secret: &str) -> AppResult<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

fn extract_bearer(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from)
}

/// Middleware: requires valid JWT. Sets AuthUser in extensions.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer(&req)
        .ok_or_else(|| AppError::Unauthorized("No token provided".into()))?;

    let claims = verify_token(&token, &state.config.jwt.secret)?;

    if claims.token_type.as_deref() == Some("refresh") {
        return Err(AppError::Unauthorized("Access token required".into()));
    }

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid token subject".into()))?;

    req.extensions_mut().insert(AuthUser {
        id: user_id,
        role: claims.role,
    });

    Ok(next.run(req).await)
}

/// Middleware: optionally sets AuthUser if a token is present but doesn't
/// require one. Listing enrichment degrades to "not joined" without it.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(token) = extract_bearer(&req) {
        if let Ok(claims) = verify_token(&token, &state.config.jwt.secret) {
            if claims.token_type.as_deref() != Some("refresh") {
                if let Ok(user_id) = Uuid::parse_str(&claims.sub) {
                    req.extensions_mut().insert(AuthUser {
                        id: user_id,
                        role: claims.role,
                    });
                }
            }
        }
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn token_roundtrip_preserves_claims() {
        let user_id = Uuid::new_v4();
        let (access, refresh) =
            generate_tokens(user_id, Some("admin"), SECRET, 3600, 86400).unwrap();

        let claims = verify_token(&access, SECRET).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role.as_deref(), Some("admin"));
        assert_eq!(claims.token_type.as_deref(), Some("access"));

        let claims = verify_token(&refresh, SECRET).unwrap();
        assert_eq!(claims.token_type.as_deref(), Some("refresh"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (access, _) = generate_tokens(Uuid::new_v4(), None, SECRET, 3600, 86400).unwrap();
        assert!(verify_token(&access, "other-secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let (access, _) = generate_tokens(Uuid::new_v4(), None, SECRET, -120, 86400).unwrap();
        assert!(verify_token(&access, SECRET).is_err());
    }

    #[test]
    fn admin_detection_reads_role() {
        let admin = AuthUser {
            id: Uuid::new_v4(),
            role: Some("admin".into()),
        };
        let user = AuthUser {
            id: Uuid::new_v4(),
            role: None,
        };
        assert!(admin.is_admin());
        assert!(!user.is_admin());
    }
}
