//! Read side of the team feature: filtered listings, paging, and the
//! requester-relative enrichment (`memberCount`, `hasJoined`).
//!
//! Enrichment is batched: one grouped count over the listed ids and one
//! membership lookup for the requester, never a query per row. A listing
//! with no resolvable requester still succeeds; every row then reports
//! `hasJoined = false`.

use std::collections::{HashMap, HashSet};

use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::config::TeamConfig;
use crate::error::{AppError, AppResult};
use crate::models::team::{Team, TeamListQuery, TeamSort, TeamStatus, TeamSummary};

/// Supported listing predicates. An explicit struct instead of ad-hoc
/// key/value composition, so a typo'd field name is a compile error.
#[derive(Debug, Default, Clone)]
pub struct TeamFilter {
    pub id: Option<Uuid>,
    pub id_list: Option<Vec<Uuid>>,
    /// Substring match over name and description.
    pub search: Option<String>,
    pub name: Option<String>,
    pub status: Option<TeamStatus>,
    pub owner_id: Option<Uuid>,
    pub sort: TeamSort,
}

impl TeamFilter {
    pub fn from_query(q: &TeamListQuery) -> Self {
        Self {
            id: q.id,
            id_list: None,
            search: q.q.clone(),
            name: q.name.clone(),
            status: q.status,
            owner_id: q.owner_id,
            sort: q.sort.unwrap_or_default(),
        }
    }
}

/// Builds `{select} FROM teams WHERE ...` with every active predicate.
/// Non-admins only see private teams they own or belong to.
fn filtered_query(
    select: &str,
    filter: &TeamFilter,
    requester: Option<Uuid>,
    is_admin: bool,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("{select} FROM teams WHERE TRUE"));

    if let Some(id) = filter.id {
        qb.push(" AND id = ").push_bind(id);
    }
    if let Some(ids) = &filter.id_list {
        qb.push(" AND id = ANY(").push_bind(ids.clone()).push(")");
    }
    if let Some(q) = &filter.search {
        let pattern = format!("%{q}%");
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(name) = &filter.name {
        qb.push(" AND name ILIKE ").push_bind(format!("%{name}%"));
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(owner) = filter.owner_id {
        qb.push(" AND owner_id = ").push_bind(owner);
    }

    if !is_admin {
        match requester {
            Some(uid) => {
                qb.push(" AND (status <> 'private' OR owner_id = ")
                    .push_bind(uid)
                    .push(" OR EXISTS (SELECT 1 FROM team_members m WHERE m.team_id = teams.id AND m.user_id = ")
                    .push_bind(uid)
                    .push("))");
            }
            None => {
                qb.push(" AND status <> 'private'");
            }
        }
    }

    qb
}

fn merge_summaries(
    teams: Vec<Team>,
    counts: &[(Uuid, i64)],
    joined: &[Uuid],
) -> Vec<TeamSummary> {
    let count_map: HashMap<Uuid, i64> = counts.iter().copied().collect();
    let joined_set: HashSet<Uuid> = joined.iter().copied().collect();

    teams
        .into_iter()
        .map(|t| {
            let mut summary = TeamSummary::from_team(&t);
            summary.member_count = count_map.get(&t.id).copied().unwrap_or(0);
            summary.has_joined = joined_set.contains(&t.id);
            summary
        })
        .collect()
}

async fn annotate(
    db: &PgPool,
    teams: Vec<Team>,
    requester: Option<Uuid>,
) -> AppResult<Vec<TeamSummary>> {
    if teams.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = teams.iter().map(|t| t.id).collect();

    let counts: Vec<(Uuid, i64)> = sqlx::query_as(
        "SELECT team_id, COUNT(*)::bigint FROM team_members WHERE team_id = ANY($1) GROUP BY team_id",
    )
    .bind(&ids)
    .fetch_all(db)
    .await?;

    let joined: Vec<Uuid> = match requester {
        Some(uid) => {
            sqlx::query_scalar(
                "SELECT team_id FROM team_members WHERE user_id = $1 AND team_id = ANY($2)",
            )
            .bind(uid)
            .bind(&ids)
            .fetch_all(db)
            .await?
        }
        // No session: enrichment degrades instead of failing the listing.
        None => Vec::new(),
    };

    Ok(merge_summaries(teams, &counts, &joined))
}

/// Filtered listing with membership enrichment, newest first.
pub async fn list_teams(
    db: &PgPool,
    filter: &TeamFilter,
    requester: Option<Uuid>,
    is_admin: bool,
) -> AppResult<Vec<TeamSummary>> {
    if filter.id_list.as_ref().is_some_and(|ids| ids.is_empty()) {
        return Ok(Vec::new());
    }

    let mut qb = filtered_query("SELECT *", filter, requester, is_admin);
    qb.push(" ORDER BY ").push(filter.sort.order_clause());

    let teams: Vec<Team> = qb.build_query_as().fetch_all(db).await?;
    annotate(db, teams, requester).await
}

/// Single team, visibility-checked and enriched like a listing row.
pub async fn get_team(
    db: &PgPool,
    team_id: Uuid,
    requester: Option<Uuid>,
    is_admin: bool,
) -> AppResult<TeamSummary> {
    let filter = TeamFilter {
        id: Some(team_id),
        ..Default::default()
    };
    let mut teams = list_teams(db, &filter, requester, is_admin).await?;
    teams
        .pop()
        .ok_or_else(|| AppError::NotFound("Team not found".into()))
}

/// Clamps paging input and yields the SQL limit and offset. Widened to
/// `i64` before any arithmetic so an out-of-range page number cannot
/// overflow the offset.
fn page_window(page: u32, page_size: u32, max_size: u32) -> (i64, i64) {
    let size = page_size.clamp(1, max_size) as i64;
    let offset = (page.max(1) as i64 - 1) * size;
    (size, offset)
}

/// Raw page of teams plus the total matching count. No enrichment.
pub async fn list_page(
    db: &PgPool,
    cfg: &TeamConfig,
    filter: &TeamFilter,
    requester: Option<Uuid>,
    is_admin: bool,
    page: u32,
    page_size: u32,
) -> AppResult<(Vec<Team>, i64)> {
    let (limit, offset) = page_window(page, page_size, cfg.page_size_max);

    let mut count_qb = filtered_query("SELECT COUNT(*)::bigint", filter, requester, is_admin);
    let total: i64 = count_qb.build_query_scalar().fetch_one(db).await?;

    let mut qb = filtered_query("SELECT *", filter, requester, is_admin);
    qb.push(" ORDER BY ")
        .push(filter.sort.order_clause())
        .push(" LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let teams: Vec<Team> = qb.build_query_as().fetch_all(db).await?;
    Ok((teams, total))
}

/// Team ids the user belongs to, for the "my joined" view.
pub async fn joined_team_ids(db: &PgPool, user_id: Uuid) -> AppResult<Vec<Uuid>> {
    let ids = sqlx::query_scalar("SELECT team_id FROM team_members WHERE user_id = $1")
        .bind(user_id)
        .fetch_all(db)
        .await?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn team(id: Uuid) -> Team {
        Team {
            id,
            name: "t".into(),
            description: String::new(),
            owner_id: Uuid::new_v4(),
            capacity: 5,
            status: "public".into(),
            password_hash: None,
            expires_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    mod sql_assembly {
        use super::*;

        #[test]
        fn bare_filter_has_no_predicates() {
            let mut qb = filtered_query("SELECT *", &TeamFilter::default(), None, true);
            assert_eq!(qb.sql(), "SELECT * FROM teams WHERE TRUE");
        }

        #[test]
        fn search_matches_name_and_description() {
            let filter = TeamFilter {
                search: Some("chess".into()),
                ..Default::default()
            };
            let mut qb = filtered_query("SELECT *", &filter, None, true);
            let sql = qb.sql();
            assert!(sql.contains("name ILIKE"));
            assert!(sql.contains("description ILIKE"));
        }

        #[test]
        fn anonymous_listing_excludes_private_teams() {
            let mut qb = filtered_query("SELECT *", &TeamFilter::default(), None, false);
            assert!(qb.sql().contains("status <> 'private'"));
        }

        #[test]
        fn member_listing_keeps_own_private_teams() {
            let mut qb =
                filtered_query("SELECT *", &TeamFilter::default(), Some(Uuid::new_v4()), false);
            let sql = qb.sql();
            assert!(sql.contains("owner_id ="));
            assert!(sql.contains("m.user_id ="));
        }

        #[test]
        fn admin_listing_is_unfiltered() {
            let mut qb = filtered_query("SELECT *", &TeamFilter::default(), None, true);
            assert!(!qb.sql().contains("private"));
        }

        #[test]
        fn status_and_owner_predicates_bind() {
            let filter = TeamFilter {
                status: Some(TeamStatus::Encrypted),
                owner_id: Some(Uuid::new_v4()),
                ..Default::default()
            };
            let mut qb = filtered_query("SELECT *", &filter, None, true);
            let sql = qb.sql();
            assert!(sql.contains("status ="));
            assert!(sql.contains("owner_id ="));
        }
    }

    mod paging {
        use super::*;

        #[test]
        fn window_clamps_page_and_size() {
            assert_eq!(page_window(1, 20, 100), (20, 0));
            assert_eq!(page_window(3, 10, 100), (10, 20));
            assert_eq!(page_window(0, 0, 100), (1, 0));
            assert_eq!(page_window(5, 500, 100), (100, 400));
        }

        #[test]
        fn huge_page_number_does_not_overflow() {
            let (size, offset) = page_window(u32::MAX, 100, 100);
            assert_eq!(size, 100);
            assert_eq!(offset, (u32::MAX as i64 - 1) * 100);
        }
    }

    mod enrichment {
        use super::*;

        #[test]
        fn counts_and_joined_flags_apply_per_team() {
            let a = Uuid::new_v4();
            let b = Uuid::new_v4();
            let rows = vec![team(a), team(b)];

            let summaries = merge_summaries(rows, &[(a, 3), (b, 1)], &[b]);
            assert_eq!(summaries[0].member_count, 3);
            assert!(!summaries[0].has_joined);
            assert_eq!(summaries[1].member_count, 1);
            assert!(summaries[1].has_joined);
        }

        #[test]
        fn missing_count_defaults_to_zero() {
            let a = Uuid::new_v4();
            let summaries = merge_summaries(vec![team(a)], &[], &[]);
            assert_eq!(summaries[0].member_count, 0);
            assert!(!summaries[0].has_joined);
        }

        #[test]
        fn absent_requester_never_reports_joined() {
            let a = Uuid::new_v4();
            // joined list is empty exactly when there is no session
            let summaries = merge_summaries(vec![team(a)], &[(a, 2)], &[]);
            assert!(!summaries[0].has_joined);
        }
    }
}
