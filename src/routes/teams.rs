use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::models::team::*;
use crate::services::{team_query, team_query::TeamFilter, team_service};
use crate::AppState;

fn requester_of(user: &Option<axum::Extension<AuthUser>>) -> (Option<Uuid>, bool) {
    match user {
        Some(u) => (Some(u.id), u.is_admin()),
        None => (None, false),
    }
}

pub async fn create_team(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Json(body): Json<CreateTeamRequest>,
) -> AppResult<Json<Value>> {
    let team_id =
        team_service::create_team(&state.db, &state.config.teams, user.id, &body).await?;
    Ok(Json(json!({ "teamId": team_id })))
}

pub async fn get_team(
    State(state): State<AppState>,
    user: Option<axum::Extension<AuthUser>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let (requester, is_admin) = requester_of(&user);
    let team = team_query::get_team(&state.db, id, requester, is_admin).await?;
    Ok(Json(json!({ "team": team })))
}

pub async fn update_team(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTeamRequest>,
) -> AppResult<Json<Value>> {
    team_service::update_team(
        &state.db,
        &state.config.teams,
        id,
        user.id,
        user.is_admin(),
        &body,
    )
    .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn delete_team(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    team_service::delete_team(&state.db, id, user.id, user.is_admin()).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn join_team(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(id): Path<Uuid>,
    body: Option<Json<JoinTeamRequest>>,
) -> AppResult<Json<Value>> {
    let password = body.as_ref().and_then(|b| b.password.clone());
    team_service::join_team(
        &state.db,
        &state.config.teams,
        id,
        user.id,
        password.as_deref(),
    )
    .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn quit_team(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    team_service::quit_team(&state.db, id, user.id).await?;
    Ok(Json(json!({ "success": true })))
}

/// Enriched listing. Works without a session; `hasJoined` is then false
/// for every row.
pub async fn list_teams(
    State(state): State<AppState>,
    user: Option<axum::Extension<AuthUser>>,
    Query(q): Query<TeamListQuery>,
) -> AppResult<Json<Value>> {
    let (requester, is_admin) = requester_of(&user);
    let filter = TeamFilter::from_query(&q);
    let teams = team_query::list_teams(&state.db, &filter, requester, is_admin).await?;
    Ok(Json(json!({ "teams": teams })))
}

/// Raw paged listing for simple browsing, no enrichment.
pub async fn list_page(
    State(state): State<AppState>,
    user: Option<axum::Extension<AuthUser>>,
    Query(q): Query<TeamListQuery>,
) -> AppResult<Json<Value>> {
    let (requester, is_admin) = requester_of(&user);
    let cfg = &state.config.teams;
    let filter = TeamFilter::from_query(&q);
    let page = q.page.unwrap_or(1);
    let page_size = q.page_size.unwrap_or(cfg.page_size);

    let (teams, total) =
        team_query::list_page(&state.db, cfg, &filter, requester, is_admin, page, page_size)
            .await?;
    Ok(Json(json!({
        "teams": teams,
        "total": total,
        "page": page.max(1),
        "pageSize": page_size.clamp(1, cfg.page_size_max),
    })))
}

/// Teams the caller owns. Bypasses the visibility branch so owners always
/// see their private teams.
pub async fn list_my_created(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Query(q): Query<TeamListQuery>,
) -> AppResult<Json<Value>> {
    let mut filter = TeamFilter::from_query(&q);
    filter.owner_id = Some(user.id);
    let teams = team_query::list_teams(&state.db, &filter, Some(user.id), true).await?;
    Ok(Json(json!({ "teams": teams })))
}

/// Teams the caller belongs to, via their membership id set.
pub async fn list_my_joined(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Query(q): Query<TeamListQuery>,
) -> AppResult<Json<Value>> {
    let ids = team_query::joined_team_ids(&state.db, user.id).await?;
    let mut filter = TeamFilter::from_query(&q);
    filter.id_list = Some(ids);
    let teams = team_query::list_teams(&state.db, &filter, Some(user.id), true).await?;
    Ok(Json(json!({ "teams": teams })))
}

/// Admin view: every team, private ones included.
pub async fn admin_list_teams(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Query(q): Query<TeamListQuery>,
) -> AppResult<Json<Value>> {
    let filter = TeamFilter::from_query(&q);
    let teams = team_query::list_teams(&state.db, &filter, Some(user.id), true).await?;
    Ok(Json(json!({ "teams": teams })))
}
