use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub db: DbConfig,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub teams: TeamConfig,
}

#[derive(Clone, Debug)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool_min: u32,
    pub pool_max: u32,
}

#[derive(Clone, Debug)]
pub struct JwtConfig {
    pub secret: String,
    pub access_expiry_secs: i64,
    pub refresh_expiry_secs: i64,
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

/// Ceilings for the team feature. All enforced in the service layer,
/// never trusted from request input.
#[derive(Clone, Debug)]
pub struct TeamConfig {
    /// Largest capacity a single team may declare.
    pub max_capacity: i32,
    /// How many teams one user may own at a time.
    pub max_created_per_user: i64,
    /// How many teams one user may belong to at a time.
    pub max_joined_per_user: i64,
    pub name_max_len: usize,
    pub description_max_len: usize,
    pub password_max_len: usize,
    pub page_size: u32,
    pub page_size_max: u32,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_or_parse("PORT", 3000),
            db: DbConfig {
                host: env_or("DB_HOST", "localhost"),
                port: env_or_parse("DB_PORT", 5432),
                database: env_or("DB_NAME", "teamup"),
                user: env_or("DB_USER", "teamup_admin"),
                password: env_or("DB_PASSWORD", ""),
                pool_min: env_or_parse("DB_POOL_MIN", 5),
                pool_max: env_or_parse("DB_POOL_MAX", 50),
            },
            jwt: JwtConfig {
                secret: env_or("JWT_SECRET", "change-me-to-a-secure-random-string"),
                access_expiry_secs: parse_duration_to_secs(&env_or("JWT_ACCESS_EXPIRY", "1h")),
                refresh_expiry_secs: parse_duration_to_secs(&env_or("JWT_REFRESH_EXPIRY", "30d")),
            },
            rate_limit: RateLimitConfig {
                window_secs: 60,
                max_requests: env_or_parse("RATE_LIMIT_MAX", 100),
            },
            teams: TeamConfig {
                max_capacity: env_or_parse("TEAM_MAX_CAPACITY", 20),
                max_created_per_user: env_or_parse("TEAM_MAX_CREATED", 5),
                max_joined_per_user: env_or_parse("TEAM_MAX_JOINED", 5),
                name_max_len: env_or_parse("TEAM_NAME_MAX", 20),
                description_max_len: env_or_parse("TEAM_DESCRIPTION_MAX", 512),
                password_max_len: env_or_parse("TEAM_PASSWORD_MAX", 32),
                page_size: env_or_parse("TEAM_PAGE_SIZE", 20),
                page_size_max: env_or_parse("TEAM_PAGE_SIZE_MAX", 100),
            },
        }
    }

    pub fn database_url(&self) -> String {
        if let Ok(url) = env::var("DATABASE_URL") {
            return url;
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db.user, self.db.password, self.db.host, self.db.port, self.db.database
        )
    }
}

fn parse_duration_to_secs(s: &str) -> i64 {
    let s = s.trim();
    if s.is_empty() {
        return 3600;
    }
    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: i64 = num_str.parse().unwrap_or(1);
    match unit {
        "s" => num,
        "m" => num * 60,
        "h" => num * 3600,
        "d" => num * 86400,
        _ => s.parse().unwrap_or(3600),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_duration_to_secs;

    #[test]
    fn parses_suffixed_durations() {
        assert_eq!(parse_duration_to_secs("45s"), 45);
        assert_eq!(parse_duration_to_secs("2m"), 120);
        assert_eq!(parse_duration_to_secs("1h"), 3600);
        assert_eq!(parse_duration_to_secs("30d"), 30 * 86400);
    }

    #[test]
    fn falls_back_on_bare_or_bad_input() {
        assert_eq!(parse_duration_to_secs("7200"), 7200);
        assert_eq!(parse_duration_to_secs(""), 3600);
        assert_eq!(parse_duration_to_secs("soon"), 3600);
    }
}
