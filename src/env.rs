use std::fmt;
use std::path::Path;

use tracing::{info, warn};

const DEFAULT_DATABASE_URL: &str = "sqlite://homeschool.db?mode=rwc";
const DEFAULT_SESSION_HOURS: i64 = 12;
const DEFAULT_SESSION_SWEEP_SECS: u64 = 3600;

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

/// Settings the app reads itself. Rocket's own settings (address, port,
/// secret key) stay in its figment under `ROCKET_*`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub session_hours: i64,
    pub session_sweep_secs: u64,
    pub admin: Option<AdminAccount>,
}

/// Account created on first launch from `ADMIN_USERNAME` and `ADMIN_PASSWORD`.
#[derive(Clone, PartialEq)]
pub struct AdminAccount {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AdminAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminAccount")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: non_empty_var("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            session_hours: parse_var("SESSION_HOURS", DEFAULT_SESSION_HOURS),
            session_sweep_secs: parse_var("SESSION_SWEEP_SECS", DEFAULT_SESSION_SWEEP_SECS)
                .max(1),
            admin: admin_account(),
        }
    }
}

fn admin_account() -> Option<AdminAccount> {
    let username = non_empty_var("ADMIN_USERNAME")?;
    let Some(password) = non_empty_var("ADMIN_PASSWORD") else {
        warn!("ADMIN_USERNAME is set without ADMIN_PASSWORD, skipping admin account");
        return None;
    };

    Some(AdminAccount { username, password })
}

fn non_empty_var(name: &str) -> Option<String> {
    dotenvy::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_var<T: std::str::FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match dotenvy::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(
                "Ignoring invalid value {:?} for {}, using {}",
                raw, name, default
            );
            default
        }),
        Err(_) => default,
    }
}
