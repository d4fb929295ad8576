//! Mutation side of the team feature: create, update, delete, join, quit.
//!
//! Every capacity-sensitive operation runs inside a transaction holding a
//! `FOR UPDATE` lock on the team row, so the count-then-insert sequence is
//! serialized per team. The `(team_id, user_id)` unique constraint backstops
//! the duplicate-join check even if the lock discipline ever regresses.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::TeamConfig;
use crate::error::{AppError, AppResult};
use crate::models::team::{CreateTeamRequest, Team, TeamStatus, UpdateTeamRequest};

const BCRYPT_COST: u32 = 12;

/// Field-level checks shared by create and update.
fn validate_team_fields(
    name: &str,
    description: &str,
    capacity: i32,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cfg: &TeamConfig,
) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("Team name required".into()));
    }
    if name.chars().count() > cfg.name_max_len {
        return Err(AppError::BadRequest(format!(
            "Team name must be at most {} characters",
            cfg.name_max_len
        )));
    }
    if description.chars().count() > cfg.description_max_len {
        return Err(AppError::BadRequest(format!(
            "Description must be at most {} characters",
            cfg.description_max_len
        )));
    }
    if capacity < 1 || capacity > cfg.max_capacity {
        return Err(AppError::BadRequest(format!(
            "Capacity must be between 1 and {}",
            cfg.max_capacity
        )));
    }
    if let Some(expiry) = expires_at {
        if expiry <= now {
            return Err(AppError::BadRequest("Expiration must be in the future".into()));
        }
    }
    Ok(())
}

/// Password rule: encrypted teams need one, within the length bound.
/// `has_stored_hash` covers updates that keep the existing password.
fn validate_password_rule(
    status: TeamStatus,
    password: Option<&str>,
    has_stored_hash: bool,
    cfg: &TeamConfig,
) -> AppResult<()> {
    if let Some(pw) = password {
        if pw.chars().count() > cfg.password_max_len {
            return Err(AppError::BadRequest(format!(
                "Password must be at most {} characters",
                cfg.password_max_len
            )));
        }
    }
    if status == TeamStatus::Encrypted {
        let supplied = password.is_some_and(|p| !p.is_empty());
        if !supplied && !has_stored_hash {
            return Err(AppError::BadRequest(
                "Encrypted teams require a password".into(),
            ));
        }
    }
    Ok(())
}

/// All join preconditions as one pure decision, evaluated under the team
/// row lock. Order matters: access failures before membership-state ones.
fn check_join(
    team: &Team,
    now: DateTime<Utc>,
    supplied_password: Option<&str>,
    already_member: bool,
    member_count: i64,
    joined_count: i64,
    cfg: &TeamConfig,
) -> AppResult<()> {
    if team.expires_at.is_some_and(|t| t <= now) {
        return Err(AppError::Forbidden("Team has expired".into()));
    }

    let status = TeamStatus::parse(&team.status)
        .ok_or_else(|| AppError::Internal(format!("Unknown team status: {}", team.status)))?;
    match status {
        TeamStatus::Private => {
            return Err(AppError::Forbidden("Private teams cannot be joined".into()));
        }
        TeamStatus::Encrypted => {
            let pw = supplied_password
                .filter(|p| !p.is_empty())
                .ok_or_else(|| AppError::Forbidden("Team password required".into()))?;
            let hash = team.password_hash.as_deref().ok_or_else(|| {
                AppError::Internal("Encrypted team has no stored password".into())
            })?;
            let ok = bcrypt::verify(pw, hash).map_err(|e| AppError::Internal(e.to_string()))?;
            if !ok {
                return Err(AppError::Forbidden("Incorrect team password".into()));
            }
        }
        TeamStatus::Public => {}
    }

    if already_member {
        return Err(AppError::AlreadyMember);
    }
    if joined_count >= cfg.max_joined_per_user {
        return Err(AppError::QuotaExceeded(format!(
            "You may belong to at most {} teams",
            cfg.max_joined_per_user
        )));
    }
    if member_count >= team.capacity as i64 {
        return Err(AppError::TeamFull);
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum QuitOutcome {
    /// Last member left; the team goes with them.
    DeleteTeam,
    /// The owner left; the earliest joiner takes over.
    TransferTo(Uuid),
    NoChange,
}

fn quit_outcome(
    actor: Uuid,
    owner_id: Uuid,
    remaining_count: i64,
    earliest_member: Option<Uuid>,
) -> QuitOutcome {
    if remaining_count == 0 {
        return QuitOutcome::DeleteTeam;
    }
    if actor == owner_id {
        match earliest_member {
            Some(successor) => QuitOutcome::TransferTo(successor),
            None => QuitOutcome::DeleteTeam,
        }
    } else {
        QuitOutcome::NoChange
    }
}

/// A capacity change may not evict anyone: the new ceiling must still fit
/// the current membership.
fn validate_capacity_shrink(new_capacity: i32, member_count: i64) -> AppResult<()> {
    if member_count > new_capacity as i64 {
        return Err(AppError::BadRequest(format!(
            "Capacity cannot be lower than the current member count ({member_count})"
        )));
    }
    Ok(())
}

fn hash_team_password(password: &str) -> AppResult<String> {
    bcrypt::hash(password, BCRYPT_COST).map_err(|e| AppError::Internal(e.to_string()))
}

/// Creates a team with the creator as owner and implicit first member.
pub async fn create_team(
    db: &PgPool,
    cfg: &TeamConfig,
    creator: Uuid,
    req: &CreateTeamRequest,
) -> AppResult<Uuid> {
    let status = req.status.unwrap_or(TeamStatus::Public);
    let description = req.description.clone().unwrap_or_default();

    validate_team_fields(
        &req.name,
        &description,
        req.capacity,
        req.expires_at,
        Utc::now(),
        cfg,
    )?;
    validate_password_rule(status, req.password.as_deref(), false, cfg)?;

    let owned: i64 =
        sqlx::query_scalar("SELECT COUNT(*)::bigint FROM teams WHERE owner_id = $1")
            .bind(creator)
            .fetch_one(db)
            .await?;
    if owned >= cfg.max_created_per_user {
        return Err(AppError::QuotaExceeded(format!(
            "You may own at most {} teams",
            cfg.max_created_per_user
        )));
    }

    // Password only matters for encrypted teams; drop it otherwise.
    let password_hash = match (status, req.password.as_deref()) {
        (TeamStatus::Encrypted, Some(pw)) => Some(hash_team_password(pw)?),
        _ => None,
    };

    let team_id = Uuid::new_v4();
    let mut tx = db.begin().await?;

    sqlx::query(
        r#"INSERT INTO teams (id, name, description, owner_id, capacity, status, password_hash, expires_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())"#,
    )
    .bind(team_id)
    .bind(req.name.trim())
    .bind(&description)
    .bind(creator)
    .bind(req.capacity)
    .bind(status.as_str())
    .bind(&password_hash)
    .bind(req.expires_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO team_members (team_id, user_id, joined_at) VALUES ($1, $2, NOW())")
        .bind(team_id)
        .bind(creator)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(team_id = %team_id, owner = %creator, "team created");
    Ok(team_id)
}

/// Applies a partial update. Only the owner or an admin may change a team.
pub async fn update_team(
    db: &PgPool,
    cfg: &TeamConfig,
    team_id: Uuid,
    actor: Uuid,
    is_admin: bool,
    patch: &UpdateTeamRequest,
) -> AppResult<()> {
    let mut tx = db.begin().await?;

    let team: Team = sqlx::query_as("SELECT * FROM teams WHERE id = $1 FOR UPDATE")
        .bind(team_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Team not found".into()))?;

    if team.owner_id != actor && !is_admin {
        return Err(AppError::Forbidden(
            "Only the team owner can update this team".into(),
        ));
    }

    let current_status = TeamStatus::parse(&team.status)
        .ok_or_else(|| AppError::Internal(format!("Unknown team status: {}", team.status)))?;

    let name = patch.name.as_deref().unwrap_or(&team.name);
    let description = patch.description.as_deref().unwrap_or(&team.description);
    let capacity = patch.capacity.unwrap_or(team.capacity);
    let status = patch.status.unwrap_or(current_status);
    // An omitted expiry keeps the stored one; an explicit null clears it.
    let expires_at = match patch.expires_at {
        Some(value) => value,
        None => team.expires_at,
    };

    validate_team_fields(
        name,
        description,
        capacity,
        patch.expires_at.flatten(),
        Utc::now(),
        cfg,
    )?;
    validate_password_rule(
        status,
        patch.password.as_deref(),
        team.password_hash.is_some(),
        cfg,
    )?;

    if capacity < team.capacity {
        let member_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*)::bigint FROM team_members WHERE team_id = $1")
                .bind(team_id)
                .fetch_one(&mut *tx)
                .await?;
        validate_capacity_shrink(capacity, member_count)?;
    }

    let password_hash = if status != TeamStatus::Encrypted {
        None
    } else {
        match patch.password.as_deref().filter(|p| !p.is_empty()) {
            Some(pw) => Some(hash_team_password(pw)?),
            None => team.password_hash.clone(),
        }
    };

    sqlx::query(
        r#"UPDATE teams SET name = $2, description = $3, capacity = $4, status = $5,
            password_hash = $6, expires_at = $7, updated_at = NOW()
        WHERE id = $1"#,
    )
    .bind(team_id)
    .bind(name.trim())
    .bind(description)
    .bind(capacity)
    .bind(status.as_str())
    .bind(&password_hash)
    .bind(expires_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Deletes a team and all of its membership rows in one transaction.
pub async fn delete_team(
    db: &PgPool,
    team_id: Uuid,
    actor: Uuid,
    is_admin: bool,
) -> AppResult<()> {
    let mut tx = db.begin().await?;

    let team: Team = sqlx::query_as("SELECT * FROM teams WHERE id = $1 FOR UPDATE")
        .bind(team_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Team not found".into()))?;

    if team.owner_id != actor && !is_admin {
        return Err(AppError::Forbidden(
            "Only the team owner can delete this team".into(),
        ));
    }

    sqlx::query("DELETE FROM team_members WHERE team_id = $1")
        .bind(team_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM teams WHERE id = $1")
        .bind(team_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(team_id = %team_id, actor = %actor, "team deleted");
    Ok(())
}

/// Joins a team. The row lock serializes the capacity check against
/// concurrent joins; the unique constraint catches duplicate joins.
pub async fn join_team(
    db: &PgPool,
    cfg: &TeamConfig,
    team_id: Uuid,
    actor: Uuid,
    password: Option<&str>,
) -> AppResult<()> {
    let mut tx = db.begin().await?;

    let team: Team = sqlx::query_as("SELECT * FROM teams WHERE id = $1 FOR UPDATE")
        .bind(team_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Team not found".into()))?;

    let already_member: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM team_members WHERE team_id = $1 AND user_id = $2)",
    )
    .bind(team_id)
    .bind(actor)
    .fetch_one(&mut *tx)
    .await?;

    let member_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*)::bigint FROM team_members WHERE team_id = $1")
            .bind(team_id)
            .fetch_one(&mut *tx)
            .await?;

    let joined_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*)::bigint FROM team_members WHERE user_id = $1")
            .bind(actor)
            .fetch_one(&mut *tx)
            .await?;

    check_join(
        &team,
        Utc::now(),
        password,
        already_member,
        member_count,
        joined_count,
        cfg,
    )?;

    let inserted = sqlx::query(
        r#"INSERT INTO team_members (team_id, user_id, joined_at) VALUES ($1, $2, NOW())
        ON CONFLICT (team_id, user_id) DO NOTHING"#,
    )
    .bind(team_id)
    .bind(actor)
    .execute(&mut *tx)
    .await?;
    if inserted.rows_affected() == 0 {
        return Err(AppError::AlreadyMember);
    }

    tx.commit().await?;
    Ok(())
}

/// Quits a team. A sole member's exit deletes the team; an owner's exit
/// hands the team to the earliest remaining joiner.
pub async fn quit_team(db: &PgPool, team_id: Uuid, actor: Uuid) -> AppResult<()> {
    let mut tx = db.begin().await?;

    let team: Team = sqlx::query_as("SELECT * FROM teams WHERE id = $1 FOR UPDATE")
        .bind(team_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Team not found".into()))?;

    let removed = sqlx::query("DELETE FROM team_members WHERE team_id = $1 AND user_id = $2")
        .bind(team_id)
        .bind(actor)
        .execute(&mut *tx)
        .await?;
    if removed.rows_affected() == 0 {
        return Err(AppError::NotAMember);
    }

    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*)::bigint FROM team_members WHERE team_id = $1")
            .bind(team_id)
            .fetch_one(&mut *tx)
            .await?;

    // Lowest membership id = earliest joiner.
    let earliest: Option<Uuid> = sqlx::query_scalar(
        "SELECT user_id FROM team_members WHERE team_id = $1 ORDER BY id ASC LIMIT 1",
    )
    .bind(team_id)
    .fetch_optional(&mut *tx)
    .await?;

    match quit_outcome(actor, team.owner_id, remaining, earliest) {
        QuitOutcome::DeleteTeam => {
            sqlx::query("DELETE FROM teams WHERE id = $1")
                .bind(team_id)
                .execute(&mut *tx)
                .await?;
            tracing::info!(team_id = %team_id, "team deleted after last member quit");
        }
        QuitOutcome::TransferTo(successor) => {
            sqlx::query("UPDATE teams SET owner_id = $2, updated_at = NOW() WHERE id = $1")
                .bind(team_id)
                .bind(successor)
                .execute(&mut *tx)
                .await?;
            tracing::info!(team_id = %team_id, new_owner = %successor, "team ownership transferred");
        }
        QuitOutcome::NoChange => {}
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TeamConfig {
        TeamConfig {
            max_capacity: 20,
            max_created_per_user: 5,
            max_joined_per_user: 5,
            name_max_len: 20,
            description_max_len: 512,
            password_max_len: 32,
            page_size: 20,
            page_size_max: 100,
        }
    }

    fn team(status: TeamStatus, capacity: i32, password_hash: Option<String>) -> Team {
        Team {
            id: Uuid::new_v4(),
            name: "climbing crew".into(),
            description: String::new(),
            owner_id: Uuid::new_v4(),
            capacity,
            status: status.as_str().to_string(),
            password_hash,
            expires_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    mod field_validation {
        use super::*;
        use chrono::Duration;

        #[test]
        fn accepts_a_plain_team() {
            let now = Utc::now();
            assert!(validate_team_fields("hikers", "weekend hikes", 5, None, now, &cfg()).is_ok());
        }

        #[test]
        fn rejects_blank_name() {
            let now = Utc::now();
            let err = validate_team_fields("   ", "", 5, None, now, &cfg()).unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)));
        }

        #[test]
        fn rejects_overlong_name_and_description() {
            let now = Utc::now();
            let long_name = "x".repeat(21);
            assert!(validate_team_fields(&long_name, "", 5, None, now, &cfg()).is_err());
            let long_desc = "x".repeat(513);
            assert!(validate_team_fields("ok", &long_desc, 5, None, now, &cfg()).is_err());
        }

        #[test]
        fn capacity_bounds_are_inclusive() {
            let now = Utc::now();
            assert!(validate_team_fields("ok", "", 1, None, now, &cfg()).is_ok());
            assert!(validate_team_fields("ok", "", 20, None, now, &cfg()).is_ok());
            assert!(validate_team_fields("ok", "", 0, None, now, &cfg()).is_err());
            assert!(validate_team_fields("ok", "", 21, None, now, &cfg()).is_err());
        }

        #[test]
        fn expiry_must_be_in_the_future() {
            let now = Utc::now();
            assert!(
                validate_team_fields("ok", "", 5, Some(now - Duration::hours(1)), now, &cfg())
                    .is_err()
            );
            assert!(
                validate_team_fields("ok", "", 5, Some(now + Duration::hours(1)), now, &cfg())
                    .is_ok()
            );
        }

        #[test]
        fn encrypted_requires_password() {
            let c = cfg();
            assert!(validate_password_rule(TeamStatus::Encrypted, None, false, &c).is_err());
            assert!(validate_password_rule(TeamStatus::Encrypted, Some(""), false, &c).is_err());
            assert!(validate_password_rule(TeamStatus::Encrypted, Some("pw"), false, &c).is_ok());
            // An update keeping the stored password is fine.
            assert!(validate_password_rule(TeamStatus::Encrypted, None, true, &c).is_ok());
            assert!(validate_password_rule(TeamStatus::Public, None, false, &c).is_ok());
        }

        #[test]
        fn capacity_cannot_drop_below_member_count() {
            assert!(validate_capacity_shrink(3, 4).is_err());
            assert!(validate_capacity_shrink(3, 3).is_ok());
            assert!(validate_capacity_shrink(3, 2).is_ok());
        }

        #[test]
        fn password_length_is_bounded() {
            let long = "x".repeat(33);
            assert!(
                validate_password_rule(TeamStatus::Encrypted, Some(&long), false, &cfg()).is_err()
            );
        }
    }

    mod join_checks {
        use super::*;
        use chrono::Duration;

        #[test]
        fn public_join_succeeds() {
            let t = team(TeamStatus::Public, 4, None);
            assert!(check_join(&t, Utc::now(), None, false, 2, 1, &cfg()).is_ok());
        }

        #[test]
        fn expired_team_rejects_joins() {
            let mut t = team(TeamStatus::Public, 4, None);
            t.expires_at = Some(Utc::now() - Duration::minutes(5));
            let err = check_join(&t, Utc::now(), None, false, 0, 0, &cfg()).unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)));
        }

        #[test]
        fn private_team_rejects_joins() {
            let t = team(TeamStatus::Private, 4, None);
            let err = check_join(&t, Utc::now(), None, false, 0, 0, &cfg()).unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)));
        }

        #[test]
        fn encrypted_team_checks_password() {
            let hash = bcrypt::hash("open sesame", 4).unwrap();
            let t = team(TeamStatus::Encrypted, 4, Some(hash));

            let err = check_join(&t, Utc::now(), None, false, 0, 0, &cfg()).unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)));

            let err = check_join(&t, Utc::now(), Some("wrong"), false, 0, 0, &cfg()).unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)));

            assert!(check_join(&t, Utc::now(), Some("open sesame"), false, 0, 0, &cfg()).is_ok());
        }

        #[test]
        fn duplicate_join_is_reported() {
            let t = team(TeamStatus::Public, 4, None);
            let err = check_join(&t, Utc::now(), None, true, 2, 1, &cfg()).unwrap_err();
            assert!(matches!(err, AppError::AlreadyMember));
        }

        #[test]
        fn per_user_quota_applies_before_capacity() {
            let t = team(TeamStatus::Public, 4, None);
            let err = check_join(&t, Utc::now(), None, false, 2, 5, &cfg()).unwrap_err();
            assert!(matches!(err, AppError::QuotaExceeded(_)));
        }

        #[test]
        fn full_team_rejects_join_at_exact_capacity() {
            let t = team(TeamStatus::Public, 2, None);
            assert!(check_join(&t, Utc::now(), None, false, 1, 0, &cfg()).is_ok());
            let err = check_join(&t, Utc::now(), None, false, 2, 0, &cfg()).unwrap_err();
            assert!(matches!(err, AppError::TeamFull));
        }
    }

    mod quit_decisions {
        use super::*;

        #[test]
        fn sole_member_quitting_deletes_the_team() {
            let owner = Uuid::new_v4();
            assert_eq!(quit_outcome(owner, owner, 0, None), QuitOutcome::DeleteTeam);
        }

        #[test]
        fn owner_quitting_transfers_to_earliest_joiner() {
            let owner = Uuid::new_v4();
            let successor = Uuid::new_v4();
            assert_eq!(
                quit_outcome(owner, owner, 2, Some(successor)),
                QuitOutcome::TransferTo(successor)
            );
        }

        #[test]
        fn regular_member_quitting_changes_nothing() {
            let owner = Uuid::new_v4();
            let member = Uuid::new_v4();
            assert_eq!(
                quit_outcome(member, owner, 3, Some(owner)),
                QuitOutcome::NoChange
            );
        }
    }
}
