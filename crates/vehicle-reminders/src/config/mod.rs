use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::reminders::milestone::MilestonePolicy;
use crate::reminders::probe::ProbeRecipient;
use crate::reminders::scanner::ScanSettings;

const DEFAULT_PUSH_ENDPOINT: &str = "https://api.onesignal.com/notifications";
const DEFAULT_SMS_ENDPOINT: &str = "https://api.twilio.com";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the reminder service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub reminders: ReminderConfig,
    pub providers: ProviderConfig,
    pub probe: ProbeRecipient,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                json: environment == AppEnvironment::Production,
            },
            reminders: ReminderConfig::from_env()?,
            providers: ProviderConfig::from_env()?,
            probe: ProbeRecipient {
                owner_id: optional("PROBE_OWNER_ID"),
                email: optional("PROBE_EMAIL"),
                phone: optional("PROBE_PHONE"),
            },
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls. `json` switches the fmt layer to line-delimited JSON.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json: bool,
}

/// Engine tuning and storage locations.
#[derive(Debug, Clone)]
pub struct ReminderConfig {
    /// SQLite ledger file. `None` keeps claims in memory.
    pub database_path: Option<PathBuf>,
    pub seed_path: Option<PathBuf>,
    pub scan_concurrency: usize,
    pub channel_timeout: Duration,
    /// Built-in scheduler period; `None` leaves scans to an external trigger.
    pub scan_interval: Option<Duration>,
    pub policy: MilestonePolicy,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl ReminderConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let scan_concurrency: usize = parsed("REMINDER_SCAN_CONCURRENCY", 8)?;
        if scan_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REMINDER_SCAN_CONCURRENCY",
                value: "0".to_string(),
            });
        }
        let max_attempts: u32 = parsed("REMINDER_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REMINDER_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        let retry_backoff_secs: u64 = parsed("REMINDER_RETRY_BACKOFF_SECS", 3600)?;
        if retry_backoff_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REMINDER_RETRY_BACKOFF_SECS",
                value: "0".to_string(),
            });
        }

        let policy = match optional("REMINDER_MILESTONE_POLICY") {
            Some(raw) => raw.parse::<MilestonePolicy>().map_err(|_| ConfigError::InvalidValue {
                key: "REMINDER_MILESTONE_POLICY",
                value: raw,
            })?,
            None => MilestonePolicy::default(),
        };

        let interval_secs: u64 = parsed("REMINDER_SCAN_INTERVAL_SECS", 0)?;

        Ok(Self {
            database_path: optional("REMINDER_DATABASE_PATH").map(PathBuf::from),
            seed_path: optional("REMINDER_SEED_PATH").map(PathBuf::from),
            scan_concurrency,
            channel_timeout: Duration::from_secs(parsed("REMINDER_CHANNEL_TIMEOUT_SECS", 10)?),
            scan_interval: (interval_secs > 0).then(|| Duration::from_secs(interval_secs)),
            policy,
            max_attempts,
            retry_backoff: Duration::from_secs(retry_backoff_secs),
        })
    }

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            concurrency: self.scan_concurrency,
            policy: self.policy,
            max_attempts: self.max_attempts,
            retry_backoff: chrono::Duration::from_std(self.retry_backoff)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
        }
    }
}

/// Credentials for each notification provider. A provider missing its trigger variable is
/// left unconfigured; one that is present but incomplete is an error.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub smtp: Option<SmtpConfig>,
    pub push: Option<PushConfig>,
    pub sms: Option<SmsConfig>,
}

impl ProviderConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let smtp = match optional("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parsed("SMTP_PORT", 587)?,
                username: required("SMTP_USERNAME")?,
                password: required("SMTP_PASSWORD")?,
                from: required("SMTP_FROM")?,
            }),
            None => None,
        };

        let push = match optional("PUSH_APP_ID") {
            Some(app_id) => Some(PushConfig {
                endpoint: optional("PUSH_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_PUSH_ENDPOINT.to_string()),
                app_id,
                api_key: required("PUSH_API_KEY")?,
            }),
            None => None,
        };

        let sms = match optional("SMS_ACCOUNT_SID") {
            Some(account_sid) => Some(SmsConfig {
                endpoint: optional("SMS_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_SMS_ENDPOINT.to_string()),
                account_sid,
                auth_token: required("SMS_AUTH_TOKEN")?,
                from: required("SMS_FROM")?,
            }),
            None => None,
        };

        Ok(Self { smtp, push, sms })
    }
}

#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Clone)]
pub struct PushConfig {
    pub endpoint: String,
    pub app_id: String,
    pub api_key: String,
}

#[derive(Clone)]
pub struct SmsConfig {
    pub endpoint: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
}

// Secrets stay out of logs and panic messages.
impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for PushConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushConfig")
            .field("endpoint", &self.endpoint)
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for SmsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmsConfig")
            .field("endpoint", &self.endpoint)
            .field("account_sid", &self.account_sid)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing { key })
}

fn parsed<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { key: &'static str, value: String },
    Missing { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { key, value } => {
                write!(f, "{key} has an invalid value '{value}'")
            }
            ConfigError::Missing { key } => write!(f, "{key} must be set"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidValue { .. }
            | ConfigError::Missing { .. } => None,
        }
    }
}
