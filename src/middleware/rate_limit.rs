use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::AppState;

#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<String, WindowEntry>>>,
    max_requests: u32,
    window_secs: u64,
}

struct WindowEntry {
    count: u32,
    reset_at: u64,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window_secs,
        }
    }

    pub async fn check(&self, key: &str) -> bool {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let mut windows = self.windows.lock().await;

        let entry = windows.entry(key.to_string()).or_insert(WindowEntry {
            count: 0,
            reset_at: now + self.window_secs,
        });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window_secs;
        }

        entry.count += 1;
        entry.count <= self.max_requests
    }
}

fn get_client_key(req: &Request) -> String {
    // Use user ID if authenticated, otherwise IP
    if let Some(user) = req.extensions().get::<AuthUser>() {
        return format!("user:{}", user.id);
    }
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return format!("ip:{}", addr.ip());
    }
    // Fallback: check forwarded headers
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| format!("ip:{}", v.split(',').next().unwrap_or("unknown").trim()))
        .unwrap_or_else(|| "ip:unknown".to_string())
}

/// Middleware: general request rate limiter.
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = format!("global:{}", get_client_key(&req));
    if !state.rate_limiter.check(&key).await {
        return Err(AppError::RateLimited);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::RateLimiter;

    #[tokio::test]
    async fn limits_within_window() {
        let limiter = RateLimiter::new(2, 60);
        assert!(limiter.check("k").await);
        assert!(limiter.check("k").await);
        assert!(!limiter.check("k").await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new(1, 60);
        assert!(limiter.check("a").await);
        assert!(limiter.check("b").await);
        assert!(!limiter.check("a").await);
    }
}
