//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use rust_decimal::Decimal;
use std::{net::SocketAddr, time::Duration};
use tutoring::{WorkflowConfig, db::DatabaseConfig, providers::ZoomCredentials};

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Serve from the in-memory store instead of PostgreSQL
    pub in_memory: bool,
    /// Security configuration
    pub security: SecurityConfig,
    /// Business parameters handed to the workflow managers
    pub workflow: WorkflowConfig,
    /// Background job cadence
    pub jobs: JobsConfig,
    /// External provider credentials
    pub providers: ProvidersConfig,
    /// Prometheus scrape listener, disabled when unset
    pub metrics_bind: Option<SocketAddr>,
    /// Admin account created at startup when missing
    pub admin: Option<AdminBootstrap>,
}

/// Security-related configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// JWT signing secret (required)
    pub jwt_secret: String,
    /// Password hashing pepper (required)
    pub password_pepper: String,
}

/// Periodic job intervals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobsConfig {
    pub settlement_interval: Duration,
    pub completion_sweep: Duration,
}

/// Provider credentials; a missing entry selects the unconfigured stand-in
#[derive(Debug, Clone, Default)]
pub struct ProvidersConfig {
    pub stripe_secret_key: Option<String>,
    pub zoom: Option<ZoomCredentials>,
    pub mail_webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AdminBootstrap {
    pub email: String,
    pub password: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    /// * `in_memory` - Use the in-memory store (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
        in_memory: bool,
    ) -> Result<Self, ConfigError> {
        Self::from_lookup(
            |key| std::env::var(key).ok(),
            bind_override,
            database_url_override,
            in_memory,
        )
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(
        lookup: F,
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
        in_memory: bool,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let bind = bind_override
            .or_else(|| env.get("SERVER_BIND").and_then(|s| s.parse().ok()))
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 3000)));

        let defaults = DatabaseConfig::development();
        let database = DatabaseConfig {
            database_url: database_url_override
                .or_else(|| env.get("DATABASE_URL"))
                .unwrap_or(defaults.database_url),
            max_connections: env.parse_or("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: env.parse_or("DB_MIN_CONNECTIONS", defaults.min_connections),
            connection_timeout_secs: env
                .parse_or("DB_CONNECTION_TIMEOUT_SECS", defaults.connection_timeout_secs),
            idle_timeout_secs: env.parse_or("DB_IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs),
            max_lifetime_secs: env.parse_or("DB_MAX_LIFETIME_SECS", defaults.max_lifetime_secs),
        };

        // Security configuration (REQUIRED)
        let jwt_secret = env.get("JWT_SECRET").ok_or_else(|| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Generate with: openssl rand -hex 32".to_string(),
        })?;

        let password_pepper = env
            .get("PASSWORD_PEPPER")
            .ok_or_else(|| ConfigError::MissingRequired {
                var: "PASSWORD_PEPPER".to_string(),
                hint: "Generate with: openssl rand -hex 16".to_string(),
            })?;

        let workflow_defaults = WorkflowConfig::default();
        let workflow = WorkflowConfig {
            coin_to_eur_rate: env.parse_or("COIN_TO_EUR_RATE", workflow_defaults.coin_to_eur_rate),
            referral_bonus_coins: env.parse_or(
                "REFERRAL_BONUS_COINS",
                workflow_defaults.referral_bonus_coins,
            ),
            min_payout_coins: env.parse_or("MIN_PAYOUT_COINS", workflow_defaults.min_payout_coins),
            tutor_cancel_window: chrono::Duration::hours(env.parse_or(
                "TUTOR_CANCEL_WINDOW_HOURS",
                workflow_defaults.tutor_cancel_window.num_hours(),
            )),
            payout_window: chrono::Duration::days(env.parse_or(
                "PAYOUT_WINDOW_DAYS",
                workflow_defaults.payout_window.num_days(),
            )),
        };

        let jobs = JobsConfig {
            settlement_interval: Duration::from_secs(
                env.parse_or("SETTLEMENT_INTERVAL_SECS", 3600),
            ),
            completion_sweep: Duration::from_secs(env.parse_or("COMPLETION_SWEEP_SECS", 60)),
        };

        let zoom = match (
            env.get("ZOOM_ACCOUNT_ID"),
            env.get("ZOOM_CLIENT_ID"),
            env.get("ZOOM_CLIENT_SECRET"),
        ) {
            (Some(account_id), Some(client_id), Some(client_secret)) => Some(ZoomCredentials {
                account_id,
                client_id,
                client_secret,
            }),
            (None, None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    var: "ZOOM_ACCOUNT_ID".to_string(),
                    reason: "ZOOM_ACCOUNT_ID, ZOOM_CLIENT_ID and ZOOM_CLIENT_SECRET go together"
                        .to_string(),
                });
            }
        };

        let providers = ProvidersConfig {
            stripe_secret_key: env.get("STRIPE_SECRET_KEY"),
            zoom,
            mail_webhook_url: env.get("MAIL_WEBHOOK_URL"),
        };

        let metrics_bind = match env.get("METRICS_BIND") {
            Some(value) => Some(value.parse().map_err(|_| ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: format!("'{value}' is not a socket address"),
            })?),
            None => None,
        };

        let admin = match (env.get("ADMIN_EMAIL"), env.get("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminBootstrap { email, password }),
            _ => None,
        };

        Ok(ServerConfig {
            bind,
            database,
            in_memory,
            security: SecurityConfig {
                jwt_secret,
                password_pepper,
            },
            workflow,
            jobs,
            providers,
            metrics_bind,
            admin,
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        if self.security.password_pepper.len() < 16 {
            return Err(ConfigError::Invalid {
                var: "PASSWORD_PEPPER".to_string(),
                reason: "Must be at least 16 characters (64-bit security)".to_string(),
            });
        }

        if self.workflow.coin_to_eur_rate <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                var: "COIN_TO_EUR_RATE".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.workflow.referral_bonus_coins < Decimal::ZERO {
            return Err(ConfigError::Invalid {
                var: "REFERRAL_BONUS_COINS".to_string(),
                reason: "Must not be negative".to_string(),
            });
        }

        if self.workflow.min_payout_coins <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                var: "MIN_PAYOUT_COINS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.workflow.tutor_cancel_window < chrono::Duration::zero() {
            return Err(ConfigError::Invalid {
                var: "TUTOR_CANCEL_WINDOW_HOURS".to_string(),
                reason: "Must not be negative".to_string(),
            });
        }

        if self.workflow.payout_window <= chrono::Duration::zero() {
            return Err(ConfigError::Invalid {
                var: "PAYOUT_WINDOW_DAYS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.jobs.settlement_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "SETTLEMENT_INTERVAL_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.jobs.completion_sweep.is_zero() {
            return Err(ConfigError::Invalid {
                var: "COMPLETION_SWEEP_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!(
                    "Cannot exceed max connections ({})",
                    self.database.max_connections
                ),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    /// Parse a variable, falling back to `default` when unset or malformed
    fn parse_or<T>(&self, key: &str, default: T) -> T
    where
        T: std::str::FromStr,
    {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned(), None, None, false)
    }

    fn secrets() -> Vec<(&'static str, &'static str)> {
        vec![
            ("JWT_SECRET", "0123456789abcdef0123456789abcdef"),
            ("PASSWORD_PEPPER", "0123456789abcdef"),
        ]
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Use openssl".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("JWT_SECRET"));
        assert!(msg.contains("Use openssl"));
    }

    #[test]
    fn test_defaults() {
        let config = load(&secrets()).unwrap();
        assert_eq!(config.bind, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(config.workflow, WorkflowConfig::default());
        assert_eq!(config.jobs.completion_sweep, Duration::from_secs(60));
        assert!(config.providers.stripe_secret_key.is_none());
        assert!(config.metrics_bind.is_none());
        assert!(config.admin.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_secret() {
        let err = load(&[("PASSWORD_PEPPER", "0123456789abcdef")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { var, .. } if var == "JWT_SECRET"));
    }

    #[test]
    fn test_short_secret_rejected() {
        let config = load(&[
            ("JWT_SECRET", "too-short"),
            ("PASSWORD_PEPPER", "0123456789abcdef"),
        ])
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var, .. } if var == "JWT_SECRET"));
    }

    #[test]
    fn test_workflow_overrides() {
        let mut vars = secrets();
        vars.extend([
            ("COIN_TO_EUR_RATE", "0.5"),
            ("MIN_PAYOUT_COINS", "25"),
            ("TUTOR_CANCEL_WINDOW_HOURS", "12"),
            ("PAYOUT_WINDOW_DAYS", "7"),
            ("DB_MAX_CONNECTIONS", "not-a-number"),
        ]);
        let config = load(&vars).unwrap();
        assert_eq!(config.workflow.coin_to_eur_rate, dec!(0.5));
        assert_eq!(config.workflow.min_payout_coins, dec!(25));
        assert_eq!(config.workflow.tutor_cancel_window, chrono::Duration::hours(12));
        assert_eq!(config.workflow.payout_window, chrono::Duration::days(7));
        assert_eq!(
            config.database.max_connections,
            DatabaseConfig::development().max_connections
        );
    }

    #[test]
    fn test_zero_rate_rejected() {
        let mut vars = secrets();
        vars.push(("COIN_TO_EUR_RATE", "0"));
        let err = load(&vars).unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var, .. } if var == "COIN_TO_EUR_RATE"));
    }

    #[test]
    fn test_partial_zoom_credentials_rejected() {
        let mut vars = secrets();
        vars.push(("ZOOM_CLIENT_ID", "client"));
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { .. })));

        vars.extend([("ZOOM_ACCOUNT_ID", "account"), ("ZOOM_CLIENT_SECRET", "secret")]);
        let config = load(&vars).unwrap();
        assert_eq!(config.providers.zoom.unwrap().client_id, "client");
    }

    #[test]
    fn test_bad_metrics_bind_rejected() {
        let mut vars = secrets();
        vars.push(("METRICS_BIND", "localhost"));
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { var, .. }) if var == "METRICS_BIND"
        ));
    }
}
