use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access mode of a team. Stored as lowercase text in the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamStatus {
    /// Anyone may see and join.
    Public,
    /// Visible only to the owner, members, and admins; no joins.
    Private,
    /// Listed like public teams, but joining requires the team password.
    Encrypted,
}

impl TeamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeamStatus::Public => "public",
            TeamStatus::Private => "private",
            TeamStatus::Encrypted => "encrypted",
        }
    }

    pub fn parse(s: &str) -> Option<TeamStatus> {
        match s {
            "public" => Some(TeamStatus::Public),
            "private" => Some(TeamStatus::Private),
            "encrypted" => Some(TeamStatus::Encrypted),
            _ => None,
        }
    }
}

/// Sort key for listings. Every ordering ends on `id` so pages are stable
/// when timestamps collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamSort {
    /// Newest first.
    #[default]
    Created,
    Name,
    Expires,
}

impl TeamSort {
    pub fn order_clause(&self) -> &'static str {
        match self {
            TeamSort::Created => "created_at DESC, id",
            TeamSort::Name => "name ASC, id",
            TeamSort::Expires => "expires_at ASC NULLS LAST, id",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub owner_id: Uuid,
    pub capacity: i32,
    pub status: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
    pub description: Option<String>,
    pub capacity: i32,
    pub status: Option<TeamStatus>,
    pub password: Option<String>,
    #[serde(rename = "expiresAt")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Partial update: omitted fields keep their stored value. `expiresAt`
/// carries two levels of absence so `"expiresAt": null` clears the expiry
/// while leaving the field out keeps it.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTeamRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub capacity: Option<i32>,
    pub status: Option<TeamStatus>,
    pub password: Option<String>,
    #[serde(rename = "expiresAt", default, deserialize_with = "double_option")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

/// Wraps a present field in an outer `Some`, so `null` and absent stay
/// distinguishable after deserialization.
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinTeamRequest {
    pub password: Option<String>,
}

/// Query-string shape for the listing endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct TeamListQuery {
    pub id: Option<Uuid>,
    /// Free-text search over name and description.
    pub q: Option<String>,
    pub name: Option<String>,
    pub status: Option<TeamStatus>,
    #[serde(rename = "ownerId")]
    pub owner_id: Option<Uuid>,
    pub sort: Option<TeamSort>,
    pub page: Option<u32>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<u32>,
}

/// Listing row: a team plus the requester-relative derived fields.
#[derive(Debug, Serialize)]
pub struct TeamSummary {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    #[serde(rename = "ownerId")]
    pub owner_id: Uuid,
    pub capacity: i32,
    pub status: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "memberCount")]
    pub member_count: i64,
    #[serde(rename = "hasJoined")]
    pub has_joined: bool,
}

impl TeamSummary {
    pub fn from_team(t: &Team) -> Self {
        Self {
            id: t.id,
            name: t.name.clone(),
            description: t.description.clone(),
            owner_id: t.owner_id,
            capacity: t.capacity,
            status: t.status.clone(),
            expires_at: t.expires_at,
            created_at: t.created_at,
            member_count: 0,
            has_joined: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for status in [
            TeamStatus::Public,
            TeamStatus::Private,
            TeamStatus::Encrypted,
        ] {
            assert_eq!(TeamStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TeamStatus::parse("secret"), None);
        assert_eq!(TeamStatus::parse(""), None);
    }

    #[test]
    fn sort_orderings_are_stable() {
        for sort in [TeamSort::Created, TeamSort::Name, TeamSort::Expires] {
            assert!(sort.order_clause().ends_with("id"));
        }
        assert_eq!(TeamSort::default().order_clause(), "created_at DESC, id");
    }

    #[test]
    fn update_patch_distinguishes_absent_and_null_expiry() {
        let absent: UpdateTeamRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.expires_at, None);

        let cleared: UpdateTeamRequest = serde_json::from_str(r#"{"expiresAt": null}"#).unwrap();
        assert_eq!(cleared.expires_at, Some(None));

        let set: UpdateTeamRequest =
            serde_json::from_str(r#"{"expiresAt": "2030-01-01T00:00:00Z"}"#).unwrap();
        assert!(matches!(set.expires_at, Some(Some(_))));
    }

    #[test]
    fn status_serde_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&TeamStatus::Encrypted).unwrap(),
            "\"encrypted\""
        );
        let parsed: TeamStatus = serde_json::from_str("\"private\"").unwrap();
        assert_eq!(parsed, TeamStatus::Private);
    }
}
