use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub storage: StorageBackend,
    pub mongodb: MongoConfig,
    /// ISO currency code bookings are priced in.
    pub currency: String,
    pub stripe: StripeConfig,
    pub razorpay: RazorpayConfig,
    pub notifications: NotificationsConfig,
    pub realtime: RealtimeConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Mongo,
    /// Process memory; for local runs without a database.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(Self::Mongo),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: Secret<String>,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub publishable_key: String,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    /// Maximum age of a signed webhook timestamp.
    pub webhook_tolerance_secs: i64,
}

#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
}

#[derive(Debug, Clone)]
pub struct NotificationsConfig {
    /// Dispatcher URL. Notifications are only logged when unset.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub enabled: bool,
    pub capacity: usize,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub completion_interval_secs: u64,
    pub stale_sweep_interval_secs: u64,
    pub activation_interval_secs: u64,
    pub unpaid_release_interval_secs: u64,
    pub reminder_interval_secs: u64,
    pub stale_after_minutes: i64,
    pub reminder_lead_minutes: i64,
}

impl SchedulerConfig {
    pub fn completion_interval(&self) -> Duration {
        Duration::from_secs(self.completion_interval_secs)
    }

    pub fn stale_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.stale_sweep_interval_secs)
    }

    pub fn activation_interval(&self) -> Duration {
        Duration::from_secs(self.activation_interval_secs)
    }

    pub fn unpaid_release_interval(&self) -> Duration {
        Duration::from_secs(self.unpaid_release_interval_secs)
    }

    pub fn reminder_interval(&self) -> Duration {
        Duration::from_secs(self.reminder_interval_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_after_minutes)
    }

    pub fn reminder_lead(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.reminder_lead_minutes)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            completion_interval_secs: 300,
            stale_sweep_interval_secs: 300,
            activation_interval_secs: 300,
            unpaid_release_interval_secs: 600,
            reminder_interval_secs: 3600,
            stale_after_minutes: 60,
            reminder_lead_minutes: 60,
        }
    }
}

impl BookingConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = common.is_prod();
        let defaults = SchedulerConfig::default();

        Ok(BookingConfig {
            common,
            service_name: "booking-service".to_string(),
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            storage: parse_env("STORAGE_BACKEND", "mongo", is_prod)?,
            mongodb: MongoConfig {
                uri: Secret::new(get_env(
                    "MONGODB_URI",
                    Some("mongodb://localhost:27017/?replicaSet=rs0"),
                    is_prod,
                )?),
                database: get_env("MONGODB_DATABASE", Some("booking_db"), is_prod)?,
            },
            currency: get_env("BOOKING_CURRENCY", Some("INR"), is_prod)?,
            stripe: StripeConfig {
                secret_key: Secret::new(get_env("STRIPE_SECRET_KEY", Some(""), is_prod)?),
                publishable_key: get_env("STRIPE_PUBLISHABLE_KEY", Some(""), is_prod)?,
                webhook_secret: Secret::new(get_env("STRIPE_WEBHOOK_SECRET", Some(""), is_prod)?),
                api_base_url: get_env(
                    "STRIPE_API_BASE_URL",
                    Some("https://api.stripe.com/v1"),
                    false,
                )?,
                webhook_tolerance_secs: parse_env("STRIPE_WEBHOOK_TOLERANCE_SECS", "300", false)?,
            },
            razorpay: RazorpayConfig {
                key_id: get_env("RAZORPAY_KEY_ID", Some(""), is_prod)?,
                key_secret: Secret::new(get_env("RAZORPAY_KEY_SECRET", Some(""), is_prod)?),
                webhook_secret: Secret::new(get_env(
                    "RAZORPAY_WEBHOOK_SECRET",
                    Some(""),
                    is_prod,
                )?),
                api_base_url: get_env(
                    "RAZORPAY_API_BASE_URL",
                    Some("https://api.razorpay.com/v1"),
                    false,
                )?,
            },
            notifications: NotificationsConfig {
                endpoint: env::var("NOTIFICATION_ENDPOINT").ok().filter(|v| !v.is_empty()),
            },
            realtime: RealtimeConfig {
                enabled: parse_env("REALTIME_ENABLED", "true", false)?,
                capacity: parse_env("REALTIME_CAPACITY", "1024", false)?,
            },
            scheduler: SchedulerConfig {
                enabled: parse_env("SCHEDULER_ENABLED", "true", false)?,
                completion_interval_secs: parse_env(
                    "COMPLETION_SWEEP_INTERVAL_SECS",
                    &defaults.completion_interval_secs.to_string(),
                    false,
                )?,
                stale_sweep_interval_secs: parse_env(
                    "STALE_SWEEP_INTERVAL_SECS",
                    &defaults.stale_sweep_interval_secs.to_string(),
                    false,
                )?,
                activation_interval_secs: parse_env(
                    "ACTIVATION_INTERVAL_SECS",
                    &defaults.activation_interval_secs.to_string(),
                    false,
                )?,
                unpaid_release_interval_secs: parse_env(
                    "UNPAID_RELEASE_INTERVAL_SECS",
                    &defaults.unpaid_release_interval_secs.to_string(),
                    false,
                )?,
                reminder_interval_secs: parse_env(
                    "REMINDER_INTERVAL_SECS",
                    &defaults.reminder_interval_secs.to_string(),
                    false,
                )?,
                stale_after_minutes: parse_env(
                    "STALE_TRANSACTION_MINUTES",
                    &defaults.stale_after_minutes.to_string(),
                    false,
                )?,
                reminder_lead_minutes: parse_env(
                    "REMINDER_LEAD_MINUTES",
                    &defaults.reminder_lead_minutes.to_string(),
                    false,
                )?,
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
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
    get_env(key, Some(default), is_prod)?.parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_env_falls_back_outside_prod_only() {
        let key = "BOOKING_TEST_UNSET_KEY";
        assert_eq!(get_env(key, Some("x"), false).unwrap(), "x");
        assert!(get_env(key, Some("x"), true).is_err());
        assert!(get_env(key, None, false).is_err());
    }

    #[test]
    fn parse_env_reports_bad_values() {
        let parsed: u64 = parse_env("BOOKING_TEST_UNSET_NUMBER", "42", false).unwrap();
        assert_eq!(parsed, 42);
        let bad: Result<u64, _> = parse_env("BOOKING_TEST_UNSET_NUMBER", "forty", false);
        assert!(bad.is_err());
    }

    #[test]
    fn storage_backend_parses() {
        assert_eq!("memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert_eq!("MongoDB".parse::<StorageBackend>().unwrap(), StorageBackend::Mongo);
        assert!("redis".parse::<StorageBackend>().is_err());
    }
}
