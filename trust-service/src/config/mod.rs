use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct TrustConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// `None` runs against the in-memory store (dev only).
    pub database: Option<DatabaseConfig>,
    pub step_up: StepUpConfig,
    pub impersonation: ImpersonationConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct StepUpConfig {
    pub secret: SecretString,
    /// Defaults to the signing secret.
    pub recovery_pepper: SecretString,
    pub ttl_minutes: i64,
    /// How fresh a step-up must be for sensitive actions.
    pub recent_minutes: i64,
    /// Whether a global step-up satisfies tenant-scoped checks.
    pub accept_global: bool,
    pub redirect_path: String,
    pub recovery_code_count: usize,
    pub totp_issuer: String,
}

#[derive(Debug, Clone)]
pub struct ImpersonationConfig {
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub step_up_attempts: u32,
    pub step_up_window_seconds: u64,
    pub impersonation_attempts: u32,
    pub impersonation_window_seconds: u64,
}

impl TrustConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        // Required in every environment: there is no safe default signing key.
        let secret = get_env("STEP_UP_SECRET", None, true)?;
        let recovery_pepper = match env::var("RECOVERY_CODE_PEPPER") {
            Ok(pepper) => pepper,
            Err(_) => secret.clone(),
        };

        let database = match env::var("DATABASE_URL") {
            Ok(url) => Some(DatabaseConfig {
                url,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            }),
            Err(_) if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_URL is required in production but not set"
                )))
            }
            Err(_) => None,
        };

        let config = TrustConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("trust-service"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database,
            step_up: StepUpConfig {
                secret: SecretString::new(secret),
                recovery_pepper: SecretString::new(recovery_pepper),
                ttl_minutes: parse_env("STEP_UP_TTL_MINUTES", "720", is_prod)?,
                recent_minutes: parse_env("STEP_UP_RECENT_MINUTES", "5", is_prod)?,
                accept_global: parse_env("ACCEPT_GLOBAL_STEP_UP", "true", is_prod)?,
                redirect_path: get_env("STEP_UP_REDIRECT_PATH", Some("/auth/step-up"), is_prod)?,
                recovery_code_count: parse_env("RECOVERY_CODE_COUNT", "10", is_prod)?,
                totp_issuer: get_env("TOTP_ISSUER", Some("Trust"), is_prod)?,
            },
            impersonation: ImpersonationConfig {
                ttl_minutes: parse_env("IMPERSONATION_TTL_MINUTES", "60", is_prod)?,
            },
            rate_limit: RateLimitConfig {
                step_up_attempts: parse_env("RATE_LIMIT_STEP_UP_ATTEMPTS", "10", is_prod)?,
                step_up_window_seconds: parse_env(
                    "RATE_LIMIT_STEP_UP_WINDOW_SECONDS",
                    "300",
                    is_prod,
                )?,
                impersonation_attempts: parse_env(
                    "RATE_LIMIT_IMPERSONATION_ATTEMPTS",
                    "10",
                    is_prod,
                )?,
                impersonation_window_seconds: parse_env(
                    "RATE_LIMIT_IMPERSONATION_WINDOW_SECONDS",
                    "3600",
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.step_up.secret.expose_secret().trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "STEP_UP_SECRET must not be empty"
            )));
        }

        if self.step_up.recovery_pepper.expose_secret().trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RECOVERY_CODE_PEPPER must not be empty"
            )));
        }

        if self.step_up.ttl_minutes <= 0 || self.impersonation.ttl_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "STEP_UP_TTL_MINUTES and IMPERSONATION_TTL_MINUTES must be positive"
            )));
        }

        if self.step_up.recent_minutes <= 0 || self.step_up.recent_minutes > self.step_up.ttl_minutes
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "STEP_UP_RECENT_MINUTES must be positive and no larger than STEP_UP_TTL_MINUTES"
            )));
        }

        if self.step_up.recovery_code_count == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RECOVERY_CODE_COUNT must be positive"
            )));
        }

        if self.environment == Environment::Prod
            && self.step_up.recovery_pepper.expose_secret() == self.step_up.secret.expose_secret()
        {
            tracing::warn!("RECOVERY_CODE_PEPPER is not set; reusing STEP_UP_SECRET");
        }

        Ok(())
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if let (false, Some(def)) = (is_prod, default) {
                Ok(def.to_string())
            } else if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
