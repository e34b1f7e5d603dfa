use std::env;
use std::time::Duration;

/// Which execution connector the service drives devices with
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectorKind {
    Http,
    DryRun,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub profile: String,
    pub connector: ConnectorKind,
    pub agent_port: u16,
    pub agent_timeout: Duration,
    pub queue_retention: Duration,
    pub queue_cleanup_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let profile = env::var("PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::from_env_with_profile(profile)
    }

    /// Same as [`Config::from_env`] but with the profile chosen by the caller
    /// (the `--profile` CLI argument wins over `PROFILE`).
    pub fn from_env_with_profile(profile: String) -> Self {
        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| {
            if profile == "default" {
                "sqlite://changegate.db?mode=rwc".to_string()
            } else {
                format!("sqlite://changegate_{}.db?mode=rwc", profile)
            }
        });

        let connector = match env::var("CONNECTOR").ok().as_deref().map(str::trim) {
            Some("dry-run") | Some("dry_run") | Some("dryrun") => ConnectorKind::DryRun,
            _ => ConnectorKind::Http,
        };

        Self {
            database_url,
            port: parse_var("PORT").unwrap_or(8000),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(Vec::new),
            profile,
            connector,
            agent_port: parse_var("AGENT_PORT").unwrap_or(8022),
            agent_timeout: Duration::from_secs(parse_var("AGENT_TIMEOUT_SECS").unwrap_or(120)),
            queue_retention: retention_from_hours(parse_var("QUEUE_RETENTION_HOURS")),
            queue_cleanup_interval: Duration::from_secs(
                parse_var("QUEUE_CLEANUP_INTERVAL_SECS").unwrap_or(3600),
            ),
        }
    }
}

const DEFAULT_RETENTION_HOURS: u64 = 168;

/// Out-of-range values fall back to the default instead of overflowing
fn retention_from_hours(hours: Option<u64>) -> Duration {
    let hours = hours.unwrap_or(DEFAULT_RETENTION_HOURS);
    let seconds = hours
        .checked_mul(3600)
        .unwrap_or(DEFAULT_RETENTION_HOURS * 3600);
    Duration::from_secs(seconds)
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
