use axum::{
    middleware as axum_mw,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod config;
mod db;
mod error;
mod middleware;
mod models;
mod routes;
mod services;

use config::Config;
use middleware::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Arc<Config>,
    pub rate_limiter: RateLimiter,
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // --- Auth routes (no auth required) ---
    let auth_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .route("/refresh", post(routes::auth::refresh));

    // --- Team routes ---
    // Reads go through optional_auth so enrichment can degrade without a
    // session; mutations require a full token.
    let team_routes = Router::new()
        .route(
            "/",
            post(routes::teams::create_team)
                .layer(axum_mw::from_fn_with_state(
                    state.clone(),
                    middleware::auth::authenticate,
                ))
                .get(routes::teams::list_teams),
        )
        .route("/page", get(routes::teams::list_page))
        .route(
            "/:id",
            patch(routes::teams::update_team)
                .layer(axum_mw::from_fn_with_state(
                    state.clone(),
                    middleware::auth::authenticate,
                ))
                .get(routes::teams::get_team),
        )
        .route(
            "/:id",
            delete(routes::teams::delete_team).layer(axum_mw::from_fn_with_state(
                state.clone(),
                middleware::auth::authenticate,
            )),
        )
        .route(
            "/:id/join",
            post(routes::teams::join_team).layer(axum_mw::from_fn_with_state(
                state.clone(),
                middleware::auth::authenticate,
            )),
        )
        .route(
            "/:id/quit",
            post(routes::teams::quit_team).layer(axum_mw::from_fn_with_state(
                state.clone(),
                middleware::auth::authenticate,
            )),
        )
        .route(
            "/my/created",
            get(routes::teams::list_my_created).layer(axum_mw::from_fn_with_state(
                state.clone(),
                middleware::auth::authenticate,
            )),
        )
        .route(
            "/my/joined",
            get(routes::teams::list_my_joined).layer(axum_mw::from_fn_with_state(
                state.clone(),
                middleware::auth::authenticate,
            )),
        )
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::optional_auth,
        ));

    // --- Admin routes ---
    let admin_routes = Router::new()
        .route("/teams", get(routes::teams::admin_list_teams))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::admin::require_admin,
        ))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::authenticate,
        ));

    // --- Compose full API ---
    let api = Router::new()
        .nest("/auth", auth_routes)
        .nest("/teams", team_routes)
        .nest("/admin", admin_routes);

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(routes::health::health))
        // Global middleware
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let pool = db::create_pool(&config).await;
    db::run_migrations(&pool).await;

    let rate_limiter =
        RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window_secs);
    let port = config.port;

    let state = AppState {
        db: pool,
        config: Arc::new(config),
        rate_limiter,
    };

    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .expect("Failed to bind port");
    tracing::info!("teamup API listening on port {port}");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .expect("Server error");
}
