use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub heartbeat: HeartbeatSettings,
    pub rate_limit: RateLimitConfig,
    pub smtp: Option<SmtpConfig>,
    pub security: SecurityConfig,
    pub exports: ExportConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            other => Err(format!("Unknown environment '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Absent means the in-memory store (local runs, tests).
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Bound for storage-backed OTP/refresh operations.
    pub storage_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatSettings {
    pub interval_seconds: u64,
    pub missed_threshold: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    pub dir: String,
}

impl TaskConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = TaskConfig {
            common,
            environment,
            service_name: get_env("SERVICE_NAME", Some("task-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
                storage_timeout_ms: parse_env("STORAGE_TIMEOUT_MS", "5000", is_prod)?,
            },
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET", Some("dev-secret-key"), is_prod)?,
                issuer: get_env("JWT_ISSUER", Some("task-service"), is_prod)?,
                access_token_expiry_minutes: parse_env("ACCESS_TTL_MIN", "15", is_prod)?,
                refresh_token_expiry_days: parse_env("REFRESH_TTL_DAYS", "7", is_prod)?,
            },
            otp: OtpConfig {
                ttl_minutes: parse_env("OTP_TTL_MIN", "10", is_prod)?,
            },
            heartbeat: HeartbeatSettings {
                interval_seconds: parse_env("HEARTBEAT_INTERVAL_SECONDS", "30", is_prod)?,
                missed_threshold: parse_env("HEARTBEAT_MISSED_THRESHOLD", "3", is_prod)?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "5", is_prod)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "300", is_prod)?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "300", is_prod)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    "60",
                    is_prod,
                )?,
            },
            smtp: smtp_from_env()?,
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect(),
            },
            exports: ExportConfig {
                dir: get_env("EXPORTS_DIR", Some("/exports"), is_prod)?,
            },
        };

        // Access tokens must expire well before the refresh tokens that renew them.
        if config.jwt.access_token_expiry_minutes
            >= config.jwt.refresh_token_expiry_days * 24 * 60
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Access token lifetime must be shorter than refresh token lifetime"
            )));
        }

        Ok(config)
    }
}

fn get_env(name: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => match default {
            // Production must configure secrets explicitly.
            Some(_) if is_prod && name == "JWT_SECRET" => Err(AppError::ConfigError(
                anyhow::anyhow!("{} must be set in production", name),
            )),
            Some(default) => Ok(default.to_string()),
            None => Err(AppError::ConfigError(anyhow::anyhow!(
                "{} must be set",
                name
            ))),
        },
    }
}

fn parse_env<T>(name: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(name, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", name, e)))
}

fn smtp_from_env() -> Result<Option<SmtpConfig>, AppError> {
    match env::var("SMTP_HOST") {
        Ok(host) if !host.is_empty() => Ok(Some(SmtpConfig {
            host,
            username: get_env("SMTP_USERNAME", None, true)?,
            password: get_env("SMTP_PASSWORD", None, true)?,
            from: get_env("SMTP_FROM", None, true)?,
        })),
        _ => Ok(None),
    }
}
