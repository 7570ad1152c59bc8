use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::warn;

use kindred_api::ApiSettings;
use kindred_gateway::HubConfig;

/// Placeholder JWT secrets that should never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Server configuration, read from `KINDRED_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub public_url: String,
    pub send_queue_capacity: usize,
    pub admin_email: Option<String>,
    pub api: ApiSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = std::env::var("KINDRED_JWT_SECRET")
            .unwrap_or_else(|_| "dev-secret-change-me".into());
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            warn!("KINDRED_JWT_SECRET is unset or still a placeholder; tokens are forgeable");
        }

        let host = std::env::var("KINDRED_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env_or("KINDRED_PORT", 8080)?;

        Ok(Self {
            public_url: std::env::var("KINDRED_PUBLIC_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            host,
            port,
            db_path: std::env::var("KINDRED_DB_PATH")
                .unwrap_or_else(|_| "kindred.db".into())
                .into(),
            upload_dir: std::env::var("KINDRED_UPLOAD_DIR")
                .unwrap_or_else(|_| "./uploads".into())
                .into(),
            send_queue_capacity: env_or(
                "KINDRED_SEND_QUEUE",
                HubConfig::default().send_queue_capacity,
            )?,
            admin_email: std::env::var("KINDRED_ADMIN_EMAIL").ok().filter(|e| !e.trim().is_empty()),
            api: ApiSettings {
                jwt_secret,
                jwt_expiry_hours: env_or("KINDRED_JWT_EXPIRY_HOURS", 24)?,
                refresh_expiry_days: env_or("KINDRED_REFRESH_EXPIRY_DAYS", 30)?,
                otp_enabled: env_or("KINDRED_OTP_ENABLED", true)?,
                otp_expiry_minutes: env_or("KINDRED_OTP_EXPIRY_MINUTES", 5)?,
                max_file_size: env_or("KINDRED_MAX_FILE_SIZE", DEFAULT_MAX_FILE_SIZE)?,
            },
        })
    }

    pub fn hub(&self) -> HubConfig {
        HubConfig {
            send_queue_capacity: self.send_queue_capacity.max(1),
        }
    }
}

/// Parse `key` if set, else `default`. A set but unparseable value is an error.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        _ => Ok(default),
    }
}
