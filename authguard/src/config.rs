//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `AUTHGUARD_`, nesting separator: `__`)
//! 2. Current working directory: ./authguard.toml
//! 3. XDG config directory: ~/.config/authguard/{service_name}/config.toml
//! 4. System directory: /etc/authguard/{service_name}/config.toml
//! 5. Default values
//!
//! Guard settings resolve per domain and per application: an application
//! section replaces its domain's settings, a domain section replaces the
//! global `[defaults]`.
//!
//! # Example (authguard.toml)
//!
//! ```toml
//! [service]
//! name = "identity"
//!
//! [defaults.login]
//! max_attempts = 10
//! account_blocked_duration_secs = 7200
//!
//! [domains.acme.login]
//! max_attempts = 3
//! account_blocked_duration_secs = 60
//!
//! [domains.acme.applications.mobile.rate_limit]
//! enabled = true
//! limit = 5
//! time_period = 15
//! time_unit = "minutes"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::counter::{LoginPolicy, RateLimitPolicy, RefillStrategy, VerifyPolicy};
use crate::credential::Argon2Settings;
use crate::criteria::Reference;
use crate::error::{Error, Result};

const CONFIG_DIR: &str = "authguard";
const LOCAL_CONFIG_FILE: &str = "authguard.toml";
const ENV_PREFIX: &str = "AUTHGUARD_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service identity and logging
    #[serde(default)]
    pub service: ServiceConfig,

    /// Settings used when no domain or application section matches
    #[serde(default)]
    pub defaults: GuardSettings,

    /// Per-domain settings, keyed by domain id
    #[serde(default)]
    pub domains: HashMap<String, DomainConfig>,

    /// Audit trail
    #[serde(default)]
    pub audit: AuditConfig,

    /// Credential hashing cost
    #[serde(default)]
    pub credential: Argon2Settings,

    /// Redis store (optional)
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

/// Service identity and logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name, used for config paths and log records
    #[serde(default = "default_service_name")]
    pub name: String,

    /// `EnvFilter` directive for the tracing subscriber
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

/// Settings for one domain and its applications
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Domain-level settings
    #[serde(flatten)]
    pub settings: GuardSettings,

    /// Application overrides, keyed by client id
    #[serde(default)]
    pub applications: HashMap<String, GuardSettings>,
}

/// The complete set of guard settings for one domain or application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardSettings {
    /// Failed-login lockout
    #[serde(default)]
    pub login: LoginSettings,

    /// MFA challenge verification attempts
    #[serde(default)]
    pub verify: VerifySettings,

    /// Generic rate limit
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Password reuse prevention
    #[serde(default)]
    pub password_history: PasswordHistorySettings,

    /// Flow context consistency retries
    #[serde(default)]
    pub consistency: ConsistencySettings,
}

impl GuardSettings {
    /// Validate every section
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.login.validate().map_err(|e| format!("login: {}", e))?;
        self.verify.validate().map_err(|e| format!("verify: {}", e))?;
        self.rate_limit.validate().map_err(|e| format!("rate_limit: {}", e))?;
        self.password_history
            .validate()
            .map_err(|e| format!("password_history: {}", e))?;
        self.consistency
            .validate()
            .map_err(|e| format!("consistency: {}", e))?;
        Ok(())
    }
}

/// Failed-login lockout settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSettings {
    /// Whether lockout enforcement is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Failed attempts before the account is locked
    #[serde(default = "default_login_max_attempts")]
    pub max_attempts: u32,

    /// Seconds the account stays locked
    #[serde(default = "default_account_blocked_duration_secs")]
    pub account_blocked_duration_secs: u64,

    /// Quiet seconds after which failed attempts are forgotten
    #[serde(default = "default_attempts_reset_time_secs")]
    pub attempts_reset_time_secs: u64,
}

impl LoginSettings {
    /// Validate the settings, returning an error message if invalid
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        if self.account_blocked_duration_secs == 0 {
            return Err("account_blocked_duration_secs must be greater than 0".to_string());
        }
        if self.attempts_reset_time_secs == 0 {
            return Err("attempts_reset_time_secs must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Engine policy for these settings
    pub fn policy(&self) -> LoginPolicy {
        LoginPolicy {
            max_attempts: self.max_attempts,
            lockout_duration: seconds_delta(self.account_blocked_duration_secs),
            reset_window: seconds_delta(self.attempts_reset_time_secs),
        }
    }
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_login_max_attempts(),
            account_blocked_duration_secs: default_account_blocked_duration_secs(),
            attempts_reset_time_secs: default_attempts_reset_time_secs(),
        }
    }
}

/// MFA challenge verification settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySettings {
    /// Whether attempt counting is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Failed verifications before further attempts are denied
    #[serde(default = "default_verify_max_attempts")]
    pub max_attempts: u32,

    /// Idle seconds after which attempts reset
    #[serde(default = "default_verify_reset_time_secs")]
    pub reset_time_secs: u64,
}

impl VerifySettings {
    /// Validate the settings, returning an error message if invalid
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        if self.reset_time_secs == 0 {
            return Err("reset_time_secs must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Engine policy for these settings
    pub fn policy(&self) -> VerifyPolicy {
        VerifyPolicy {
            max_attempts: self.max_attempts,
            reset_window: seconds_delta(self.reset_time_secs),
        }
    }
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_verify_max_attempts(),
            reset_time_secs: default_verify_reset_time_secs(),
        }
    }
}

/// Unit of a rate-limit `time_period`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    /// Seconds
    Seconds,
    /// Minutes
    #[default]
    Minutes,
    /// Hours
    Hours,
    /// Days
    Days,
}

impl TimeUnit {
    /// Length of `amount` units, saturating on overflow
    pub fn to_delta(self, amount: i64) -> TimeDelta {
        let per_unit: i64 = match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3_600,
            Self::Days => 86_400,
        };
        crate::counter::seconds(amount.saturating_mul(per_unit))
    }
}

/// Rate limit settings
///
/// `limit` and `time_period` are signed so that a non-positive value can be
/// carried to the engine, which denies instead of computing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Whether the rate limit applies
    #[serde(default = "default_false")]
    pub enabled: bool,

    /// Allowed events per period
    #[serde(default = "default_rate_limit")]
    pub limit: i64,

    /// Period length in `time_unit`s
    #[serde(default = "default_time_period")]
    pub time_period: i64,

    /// Unit of `time_period`
    #[serde(default)]
    pub time_unit: TimeUnit,

    /// How the allowance is restored
    #[serde(default)]
    pub refill: RefillStrategy,
}

impl RateLimitSettings {
    /// Validate the settings, returning an error message if invalid
    ///
    /// Disabled settings are not checked.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.limit <= 0 {
            return Err("limit must be greater than 0".to_string());
        }
        if self.time_period <= 0 {
            return Err("time_period must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Length of one window
    pub fn window(&self) -> TimeDelta {
        self.time_unit.to_delta(self.time_period)
    }

    /// Engine policy for these settings
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            limit: self.limit,
            window: self.window(),
            refill: self.refill,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            limit: default_rate_limit(),
            time_period: default_time_period(),
            time_unit: TimeUnit::default(),
            refill: RefillStrategy::default(),
        }
    }
}

/// Password reuse prevention settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHistorySettings {
    /// Whether history is kept and enforced
    #[serde(default = "default_false")]
    pub enabled: bool,

    /// How many previous passwords are remembered
    #[serde(default = "default_old_passwords")]
    pub old_passwords: u16,
}

impl PasswordHistorySettings {
    /// Validate the settings, returning an error message if invalid
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.enabled && self.old_passwords == 0 {
            return Err("old_passwords must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for PasswordHistorySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            old_passwords: default_old_passwords(),
        }
    }
}

/// Flow context consistency settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencySettings {
    /// Retries after a stale read
    #[serde(default = "default_consistency_max_retries")]
    pub max_retries: u32,

    /// Base backoff in milliseconds; retry `n` waits `n` times this
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Lifetime of a saved context in seconds
    #[serde(default = "default_context_ttl_secs")]
    pub context_ttl_secs: u64,
}

impl ConsistencySettings {
    /// Validate the settings, returning an error message if invalid
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.context_ttl_secs == 0 {
            return Err("context_ttl_secs must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Base backoff delay
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Lifetime of a saved context
    pub fn context_ttl(&self) -> TimeDelta {
        seconds_delta(self.context_ttl_secs)
    }
}

impl Default for ConsistencySettings {
    fn default() -> Self {
        Self {
            max_retries: default_consistency_max_retries(),
            retry_interval_ms: default_retry_interval_ms(),
            context_ttl_secs: default_context_ttl_secs(),
        }
    }
}

/// Audit trail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether audit events are dispatched
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Events buffered before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Redis store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Prefix for every key written
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Maximum pool size
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: usize,

    /// Connection retries at startup
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between connection retries in milliseconds
    #[serde(default = "default_redis_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl RedisConfig {
    /// Validate the configuration, returning an error message if invalid
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.url.is_empty() {
            return Err("url must not be empty".to_string());
        }
        if self.key_prefix.is_empty() {
            return Err("key_prefix must not be empty".to_string());
        }
        if self.key_prefix.contains(char::is_whitespace) {
            return Err("key_prefix must not contain whitespace".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Source of guard settings for a domain or application
pub trait SettingsProvider: Send + Sync {
    /// Effective settings for `reference`, optionally narrowed to a client
    fn settings_for(&self, reference: &Reference, client: Option<&str>) -> GuardSettings;
}

impl SettingsProvider for Config {
    fn settings_for(&self, reference: &Reference, client: Option<&str>) -> GuardSettings {
        let Some(domain) = self.domains.get(&reference.id) else {
            return self.defaults.clone();
        };
        client
            .and_then(|client| domain.applications.get(client))
            .unwrap_or(&domain.settings)
            .clone()
    }
}

impl SettingsProvider for GuardSettings {
    fn settings_for(&self, _reference: &Reference, _client: Option<&str>) -> GuardSettings {
        self.clone()
    }
}

impl Config {
    /// Load configuration from all sources
    ///
    /// The service name is inferred from the binary name.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(default_service_name);

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Lowest priority first so higher priority files override
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::extract(figment)
    }

    /// Load configuration from a specific file
    ///
    /// Bypasses the search path; environment variables still override.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract()?;
        config.validate().map_err(Error::InvalidConfig)?;
        Ok(config)
    }

    /// Validate every settings section
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.defaults
            .validate()
            .map_err(|e| format!("defaults.{}", e))?;
        for (domain_id, domain) in &self.domains {
            domain
                .settings
                .validate()
                .map_err(|e| format!("domains.{}.{}", domain_id, e))?;
            for (client_id, settings) in &domain.applications {
                settings
                    .validate()
                    .map_err(|e| format!("domains.{}.applications.{}.{}", domain_id, client_id, e))?;
            }
        }
        self.credential
            .validate()
            .map_err(|e| format!("credential: {}", e))?;
        if let Some(redis) = &self.redis {
            redis.validate().map_err(|e| format!("redis: {}", e))?;
        }
        Ok(())
    }

    /// Config file paths for a service, highest priority first
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];

        let xdg_dirs = xdg::BaseDirectories::with_prefix(CONFIG_DIR);
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Some(path) = xdg_dirs.find_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc")
                .join(CONFIG_DIR)
                .join(service_name)
                .join("config.toml"),
        );

        paths
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            defaults: GuardSettings::default(),
            domains: HashMap::new(),
            audit: AuditConfig::default(),
            credential: Argon2Settings::default(),
            redis: None,
        }
    }
}

fn seconds_delta(secs: u64) -> TimeDelta {
    crate::counter::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

fn default_service_name() -> String {
    "authguard".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_login_max_attempts() -> u32 {
    10
}

fn default_account_blocked_duration_secs() -> u64 {
    7200
}

fn default_attempts_reset_time_secs() -> u64 {
    43200
}

fn default_verify_max_attempts() -> u32 {
    5
}

fn default_verify_reset_time_secs() -> u64 {
    60
}

fn default_rate_limit() -> i64 {
    5
}

fn default_time_period() -> i64 {
    15
}

fn default_old_passwords() -> u16 {
    5
}

fn default_consistency_max_retries() -> u32 {
    2
}

fn default_retry_interval_ms() -> u64 {
    1000
}

fn default_context_ttl_secs() -> u64 {
    300
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_key_prefix() -> String {
    "authguard".to_string()
}

fn default_redis_max_connections() -> usize {
    16
}

fn default_max_retries() -> u32 {
    3
}

fn default_redis_retry_delay_ms() -> u64 {
    500
}
