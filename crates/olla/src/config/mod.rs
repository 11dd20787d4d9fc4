use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration, built once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub store: StoreConfig,
    pub disclosure: DisclosureConfig,
    pub escalation: EscalationConfig,
    pub notifier: NotifierConfig,
    pub disbursement: DisbursementConfig,
    pub proximity: ProximityConfig,
}

impl AppConfig {
    /// Read `.env` (when present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let environment = AppEnvironment::parse(&vars.or("APP_ENV", "development"));
        let host = vars.or("APP_HOST", "127.0.0.1");
        let port = vars
            .or("APP_PORT", "3000")
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let telemetry = TelemetryConfig {
            log_level: vars.or("APP_LOG_LEVEL", "info"),
            ansi: vars.parse_or("APP_LOG_ANSI", false)?,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry,
            store: StoreConfig::from_vars(&vars)?,
            disclosure: DisclosureConfig::from_vars(&vars)?,
            escalation: EscalationConfig::from_vars(&vars)?,
            notifier: NotifierConfig::from_vars(&vars)?,
            disbursement: DisbursementConfig::from_vars(&vars)?,
            proximity: ProximityConfig::from_vars(&vars)?,
        })
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value, with blank values treated as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn require(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::MissingVar(key))
    }

    fn parse_opt<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|_| ConfigError::InvalidNumber {
                    var: key,
                    value: raw,
                })
            })
            .transpose()
    }

    fn parse_or<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    /// Comma-separated list, empty entries dropped.
    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| split_list(&raw))
            .unwrap_or_default()
    }
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
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

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub ansi: bool,
}

/// Where durable state lives. Without a remote store the process keeps rows in memory.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub remote: Option<RemoteStoreConfig>,
}

impl StoreConfig {
    fn from_vars<F: Fn(&str) -> Option<String>>(vars: &Vars<F>) -> Result<Self, ConfigError> {
        let Some(url) = vars.get("STORE_URL") else {
            return Ok(Self::default());
        };

        let timeout_secs = vars.parse_or("STORE_TIMEOUT_SECS", 10u64)?;
        let max_cas_attempts = vars.parse_or("STORE_MAX_CAS_ATTEMPTS", 5u32)?;
        if max_cas_attempts == 0 {
            return Err(ConfigError::NotPositive("STORE_MAX_CAS_ATTEMPTS"));
        }

        Ok(Self {
            remote: Some(RemoteStoreConfig {
                url,
                api_key: vars.require("STORE_KEY")?,
                timeout_secs,
                max_cas_attempts,
            }),
        })
    }
}

#[derive(Clone)]
pub struct RemoteStoreConfig {
    pub url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    pub max_cas_attempts: u32,
}

impl fmt::Debug for RemoteStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStoreConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .field("max_cas_attempts", &self.max_cas_attempts)
            .finish()
    }
}

/// How long before pickup contact details open up, and optionally when they close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisclosureConfig {
    pub lead_minutes: u32,
    pub close_after_minutes: Option<u32>,
}

impl Default for DisclosureConfig {
    fn default() -> Self {
        Self {
            lead_minutes: 120,
            close_after_minutes: None,
        }
    }
}

impl DisclosureConfig {
    fn from_vars<F: Fn(&str) -> Option<String>>(vars: &Vars<F>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            lead_minutes: vars.parse_or("DISCLOSURE_LEAD_MINUTES", defaults.lead_minutes)?,
            close_after_minutes: vars.parse_opt("DISCLOSURE_CLOSE_AFTER_MINUTES")?,
        })
    }
}

/// Severity thresholds, alert fan-out and the reporter bonus.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationConfig {
    pub high_threshold: f64,
    pub medium_threshold: f64,
    pub email_recipients: Vec<String>,
    pub sms_recipients: Vec<String>,
    pub bonus_amount_cents: i64,
    pub queue_capacity: usize,
    pub max_delivery_attempts: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.8,
            medium_threshold: 0.5,
            email_recipients: Vec::new(),
            sms_recipients: Vec::new(),
            bonus_amount_cents: 50_000,
            queue_capacity: 256,
            max_delivery_attempts: 3,
        }
    }
}

impl EscalationConfig {
    fn from_vars<F: Fn(&str) -> Option<String>>(vars: &Vars<F>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            high_threshold: vars.parse_or("ESCALATION_HIGH_THRESHOLD", defaults.high_threshold)?,
            medium_threshold: vars
                .parse_or("ESCALATION_MEDIUM_THRESHOLD", defaults.medium_threshold)?,
            email_recipients: vars.list("ALERT_EMAIL_TO"),
            sms_recipients: vars.list("ALERT_SMS_TO"),
            bonus_amount_cents: vars.parse_or("BYPASS_BONUS_CENTS", defaults.bonus_amount_cents)?,
            queue_capacity: vars.parse_or("NOTIFY_QUEUE_CAPACITY", defaults.queue_capacity)?,
            max_delivery_attempts: vars
                .parse_or("NOTIFY_MAX_ATTEMPTS", defaults.max_delivery_attempts)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (var, value) in [
            ("ESCALATION_HIGH_THRESHOLD", self.high_threshold),
            ("ESCALATION_MEDIUM_THRESHOLD", self.medium_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidThreshold { var, value });
            }
        }
        if self.medium_threshold > self.high_threshold {
            return Err(ConfigError::ThresholdOrder {
                medium: self.medium_threshold,
                high: self.high_threshold,
            });
        }
        if self.bonus_amount_cents <= 0 {
            return Err(ConfigError::NotPositive("BYPASS_BONUS_CENTS"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::NotPositive("NOTIFY_QUEUE_CAPACITY"));
        }
        if self.max_delivery_attempts == 0 {
            return Err(ConfigError::NotPositive("NOTIFY_MAX_ATTEMPTS"));
        }
        Ok(())
    }
}

/// Outbound email/SMS transports. A missing section disables that channel.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub mail_relay: Option<MailRelayConfig>,
    pub twilio: Option<TwilioConfig>,
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            mail_relay: None,
            twilio: None,
            timeout_secs: 10,
        }
    }
}

impl NotifierConfig {
    fn from_vars<F: Fn(&str) -> Option<String>>(vars: &Vars<F>) -> Result<Self, ConfigError> {
        let mail_relay = match vars.get("MAIL_RELAY_URL") {
            Some(url) => Some(MailRelayConfig {
                url,
                token: vars.get("MAIL_RELAY_TOKEN"),
                from: vars.require("MAIL_FROM")?,
            }),
            None => None,
        };

        let twilio = match vars.get("TWILIO_SID") {
            Some(account_sid) => Some(TwilioConfig {
                account_sid,
                auth_token: vars.require("TWILIO_TOKEN")?,
                from: vars.require("TWILIO_FROM")?,
                api_base: vars.or("TWILIO_API_BASE", "https://api.twilio.com"),
            }),
            None => None,
        };

        Ok(Self {
            mail_relay,
            twilio,
            timeout_secs: vars.parse_or("NOTIFY_TIMEOUT_SECS", 10u64)?,
        })
    }
}

#[derive(Clone)]
pub struct MailRelayConfig {
    pub url: String,
    pub token: Option<String>,
    pub from: String,
}

impl fmt::Debug for MailRelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailRelayConfig")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("from", &self.from)
            .finish()
    }
}

#[derive(Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
    pub api_base: String,
}

impl fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("from", &self.from)
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Payout backend for reporter bonuses. Without an HTTP endpoint bonuses go to the ledger table.
#[derive(Debug, Clone, Default)]
pub struct DisbursementConfig {
    pub http: Option<HttpDisbursementConfig>,
}

impl DisbursementConfig {
    fn from_vars<F: Fn(&str) -> Option<String>>(vars: &Vars<F>) -> Result<Self, ConfigError> {
        let http = match vars.get("DISBURSEMENT_URL") {
            Some(url) => Some(HttpDisbursementConfig {
                url,
                token: vars.require("DISBURSEMENT_TOKEN")?,
                timeout_secs: vars.parse_or("DISBURSEMENT_TIMEOUT_SECS", 15u64)?,
            }),
            None => None,
        };
        Ok(Self { http })
    }
}

#[derive(Clone)]
pub struct HttpDisbursementConfig {
    pub url: String,
    pub token: String,
    pub timeout_secs: u64,
}

impl fmt::Debug for HttpDisbursementConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDisbursementConfig")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProximityConfig {
    pub default_radius_km: f64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            default_radius_km: 10.0,
        }
    }
}

impl ProximityConfig {
    fn from_vars<F: Fn(&str) -> Option<String>>(vars: &Vars<F>) -> Result<Self, ConfigError> {
        let default_radius_km = vars.parse_or("PROXIMITY_DEFAULT_RADIUS_KM", 10.0f64)?;
        if !default_radius_km.is_finite() || default_radius_km <= 0.0 {
            return Err(ConfigError::NotPositive("PROXIMITY_DEFAULT_RADIUS_KM"));
        }
        Ok(Self { default_radius_km })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    MissingVar(&'static str),
    InvalidNumber { var: &'static str, value: String },
    NotPositive(&'static str),
    InvalidThreshold { var: &'static str, value: f64 },
    ThresholdOrder { medium: f64, high: f64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::MissingVar(var) => write!(f, "{var} must be set"),
            ConfigError::InvalidNumber { var, value } => {
                write!(f, "{var} has an unparseable value '{value}'")
            }
            ConfigError::NotPositive(var) => write!(f, "{var} must be greater than zero"),
            ConfigError::InvalidThreshold { var, value } => {
                write!(f, "{var} must lie within [0, 1], got {value}")
            }
            ConfigError::ThresholdOrder { medium, high } => write!(
                f,
                "medium escalation threshold {medium} exceeds high threshold {high}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = from_pairs(&[]).expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert!(config.store.remote.is_none());
        assert_eq!(config.disclosure, DisclosureConfig::default());
        assert_eq!(config.escalation, EscalationConfig::default());
        assert!(config.notifier.mail_relay.is_none());
        assert!(config.disbursement.http.is_none());
        assert_eq!(config.proximity.default_radius_km, 10.0);
    }

    #[test]
    fn alert_recipients_split_on_commas() {
        let config = from_pairs(&[
            ("ALERT_EMAIL_TO", "ops@olla.test, , fraud@olla.test"),
            ("ALERT_SMS_TO", "+5491100000001,+5491100000002"),
        ])
        .expect("config loads");

        assert_eq!(
            config.escalation.email_recipients,
            vec!["ops@olla.test".to_string(), "fraud@olla.test".to_string()]
        );
        assert_eq!(config.escalation.sms_recipients.len(), 2);
    }

    #[test]
    fn thresholds_can_be_overridden_but_must_be_ordered() {
        let config = from_pairs(&[
            ("ESCALATION_HIGH_THRESHOLD", "0.9"),
            ("ESCALATION_MEDIUM_THRESHOLD", "0.6"),
        ])
        .expect("config loads");
        assert_eq!(config.escalation.high_threshold, 0.9);

        let inverted = from_pairs(&[
            ("ESCALATION_HIGH_THRESHOLD", "0.4"),
            ("ESCALATION_MEDIUM_THRESHOLD", "0.6"),
        ]);
        assert!(matches!(inverted, Err(ConfigError::ThresholdOrder { .. })));

        let out_of_range = from_pairs(&[("ESCALATION_HIGH_THRESHOLD", "1.5")]);
        assert!(matches!(
            out_of_range,
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn remote_store_requires_a_key() {
        let missing = from_pairs(&[("STORE_URL", "https://db.olla.test")]);
        assert!(matches!(missing, Err(ConfigError::MissingVar("STORE_KEY"))));

        let config = from_pairs(&[
            ("STORE_URL", "https://db.olla.test"),
            ("STORE_KEY", "service-role"),
        ])
        .expect("config loads");
        let remote = config.store.remote.expect("remote store configured");
        assert_eq!(remote.max_cas_attempts, 5);
        assert!(!format!("{remote:?}").contains("service-role"));
    }

    #[test]
    fn partial_twilio_credentials_are_rejected() {
        let result = from_pairs(&[("TWILIO_SID", "AC123")]);
        assert!(matches!(result, Err(ConfigError::MissingVar("TWILIO_TOKEN"))));
    }

    #[test]
    fn unparseable_numbers_name_the_variable() {
        let result = from_pairs(&[("DISCLOSURE_LEAD_MINUTES", "two hours")]);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidNumber {
                var: "DISCLOSURE_LEAD_MINUTES",
                ..
            })
        ));
    }

    #[test]
    fn load_reads_the_process_environment() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        env::set_var("APP_HOST", "localhost");
        env::set_var("APP_PORT", "4100");
        let config = AppConfig::load().expect("config loads");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");

        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 4100));
    }
}
