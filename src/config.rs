use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::{borrow::Cow, collections::HashSet, env, path::Path};
use thiserror::Error;
use tracing::{error, info, warn};
use validator::{Validate, ValidationError, ValidationErrors};

const CONFIG_DIR: &str = "config";
const CASHFREE_LIVE_URL: &str = "https://api.cashfree.com/pg";
const CASHFREE_SANDBOX_URL: &str = "https://sandbox.cashfree.com/pg";

/// Secret shipped in `config/development.toml`; refused in any other environment.
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Values used when neither a config file nor `APP__*` provides one.
mod defaults {
    pub const ENVIRONMENT: &str = "development";
    pub const LOG_LEVEL: &str = "info";
    pub const PORT: u16 = 8080;

    pub fn log_level() -> String {
        LOG_LEVEL.to_owned()
    }
    pub fn port() -> u16 {
        PORT
    }
    pub fn request_timeout_secs() -> u64 {
        30
    }
    pub fn db_max_connections() -> u32 {
        16
    }
    pub fn db_min_connections() -> u32 {
        2
    }
    pub fn db_connect_timeout_secs() -> u64 {
        30
    }
    pub fn db_idle_timeout_secs() -> u64 {
        600
    }
    pub fn db_acquire_timeout_secs() -> u64 {
        8
    }
    pub fn event_channel_capacity() -> usize {
        1024
    }
    pub fn page_size() -> u64 {
        20
    }
    pub fn max_page_size() -> u64 {
        100
    }
    pub fn issuer() -> String {
        "storefront-api".to_owned()
    }
    pub fn audience() -> String {
        "storefront-clients".to_owned()
    }
    pub fn cashfree_environment() -> String {
        "sandbox".to_owned()
    }
    pub fn cashfree_api_version() -> String {
        "2022-09-01".to_owned()
    }
    pub fn currency() -> String {
        "INR".to_owned()
    }
    pub fn order_note() -> String {
        "Storefront Order".to_owned()
    }
    pub fn gateway_timeout_secs() -> u64 {
        15
    }
    pub fn webhook_tolerance_secs() -> u64 {
        300
    }
}

/// Cashfree PG settings, read from the `[payments]` table
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentsConfig {
    /// Sent as `x-client-id`. `CASHFREE_APP_ID` fills it when absent.
    #[serde(default)]
    pub cashfree_app_id: Option<String>,

    /// Sent as `x-client-secret` and used as the webhook HMAC key.
    /// `CASHFREE_SECRET_KEY` fills it when absent.
    #[serde(default)]
    pub cashfree_secret_key: Option<String>,

    /// `production` or `sandbox`
    #[serde(default = "defaults::cashfree_environment")]
    pub cashfree_environment: String,

    /// Wins over `cashfree_environment` when set
    #[serde(default)]
    #[validate(custom = "validate_optional_url")]
    pub cashfree_base_url: Option<String>,

    #[serde(default = "defaults::cashfree_api_version")]
    pub cashfree_api_version: String,

    #[serde(default = "defaults::currency")]
    pub currency: String,

    #[serde(default = "defaults::order_note")]
    pub order_note: String,

    #[serde(default = "defaults::gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub request_timeout_secs: u64,

    /// How old a webhook `x-webhook-timestamp` may be, in seconds
    #[serde(default = "defaults::webhook_tolerance_secs")]
    #[validate(range(min = 1))]
    pub webhook_tolerance_secs: u64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            cashfree_app_id: None,
            cashfree_secret_key: None,
            cashfree_environment: defaults::cashfree_environment(),
            cashfree_base_url: None,
            cashfree_api_version: defaults::cashfree_api_version(),
            currency: defaults::currency(),
            order_note: defaults::order_note(),
            request_timeout_secs: defaults::gateway_timeout_secs(),
            webhook_tolerance_secs: defaults::webhook_tolerance_secs(),
        }
    }
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

impl PaymentsConfig {
    pub fn has_credentials(&self) -> bool {
        non_blank(&self.cashfree_app_id) && non_blank(&self.cashfree_secret_key)
    }

    fn targets_live_gateway(&self) -> bool {
        self.cashfree_environment.eq_ignore_ascii_case("production")
    }

    /// Gateway root with no trailing `/`
    pub fn cashfree_base_url(&self) -> String {
        if let Some(url) = self.cashfree_base_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return url.trim_end_matches('/').to_owned();
        }
        if self.targets_live_gateway() {
            CASHFREE_LIVE_URL.to_owned()
        } else {
            CASHFREE_SANDBOX_URL.to_owned()
        }
    }
}

/// Settings of the storefront server.
///
/// Loaded by [`load_config`]; constructed directly with [`AppConfig::new`] in tests.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub database_url: String,

    #[validate(length(min = 64), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Token lifetime in seconds
    #[validate(range(min = 300, max = 86400))]
    pub jwt_expiration: usize,

    #[serde(default = "defaults::issuer")]
    pub auth_issuer: String,

    #[serde(default = "defaults::audience")]
    pub auth_audience: String,

    pub host: String,

    #[serde(default = "defaults::port")]
    pub port: u16,

    /// `development`, `staging`, `production`...
    pub environment: String,

    #[serde(default = "defaults::log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    /// Apply pending migrations before serving
    #[serde(default)]
    pub auto_migrate: bool,

    /// Origin for gateway return/notify URLs, such as `https://shop.example.com`.
    /// Falls back to the request's `Host` header.
    #[serde(default)]
    #[validate(custom = "validate_optional_url")]
    pub public_base_url: Option<String>,

    /// Comma separated
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default)]
    pub cors_allow_any_origin: bool,

    #[serde(default)]
    pub cors_allow_credentials: bool,

    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "defaults::db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "defaults::db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "defaults::db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "defaults::db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "defaults::db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Bound of the domain event queue
    #[serde(default = "defaults::event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    #[serde(default = "defaults::page_size")]
    pub api_default_page_size: u64,

    #[serde(default = "defaults::max_page_size")]
    pub api_max_page_size: u64,

    #[serde(default)]
    #[validate]
    pub payments: PaymentsConfig,
}

impl AppConfig {
    pub fn new(
        database_url: String,
        jwt_secret: String,
        jwt_expiration: usize,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            auth_issuer: defaults::issuer(),
            auth_audience: defaults::audience(),
            host,
            port,
            environment,
            log_level: defaults::log_level(),
            log_json: false,
            auto_migrate: false,
            public_base_url: None,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            request_timeout_secs: defaults::request_timeout_secs(),
            db_max_connections: defaults::db_max_connections(),
            db_min_connections: defaults::db_min_connections(),
            db_connect_timeout_secs: defaults::db_connect_timeout_secs(),
            db_idle_timeout_secs: defaults::db_idle_timeout_secs(),
            db_acquire_timeout_secs: defaults::db_acquire_timeout_secs(),
            event_channel_capacity: defaults::event_channel_capacity(),
            api_default_page_size: defaults::page_size(),
            api_max_page_size: defaults::max_page_size(),
            payments: PaymentsConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case(defaults::ENVIRONMENT)
    }

    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_deref()
            .is_some_and(|raw| raw.split(',').any(|o| !o.trim().is_empty()))
    }

    /// Any origin is accepted in development or when opted in
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.cors_allow_any_origin || self.is_development()
    }

    /// `requested` (or the default) bounded to `1..=api_max_page_size`
    pub fn page_size(&self, requested: Option<u64>) -> u64 {
        let ceiling = self.api_max_page_size.max(1);
        requested.unwrap_or(self.api_default_page_size).clamp(1, ceiling)
    }

    /// Checks that span several fields and depend on the environment.
    fn check_deployment_rules(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            errors.add(
                "cors_allowed_origins",
                violation(
                    "cors_origins_missing",
                    "list origins in APP__CORS_ALLOWED_ORIGINS or set APP__CORS_ALLOW_ANY_ORIGIN=true",
                ),
            );
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            errors.add(
                "jwt_secret",
                violation(
                    "jwt_secret_is_dev_default",
                    "the development JWT secret is only accepted when environment=development",
                ),
            );
        }

        if self.is_production()
            && !self.payments.targets_live_gateway()
            && self.payments.cashfree_base_url.is_none()
        {
            errors.add(
                "payments",
                violation(
                    "cashfree_sandbox_in_production",
                    "production needs APP__PAYMENTS__CASHFREE_ENVIRONMENT=production or an explicit cashfree_base_url",
                ),
            );
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("could not read configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn violation(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(violation("log_level", "expected trace, debug, info, warn or error")),
    }
}

fn validate_optional_url(value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(violation("url", "Must be an absolute http(s) URL")),
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    const PLACEHOLDERS: [&str; 3] = ["CHANGE_THIS_SECRET_IN_PRODUCTION", "your-secret-key", "changeme"];

    let secret = secret.trim();
    if secret.len() < 64 {
        return Err(violation("jwt_secret", "needs at least 64 characters"));
    }
    if PLACEHOLDERS.iter().any(|p| secret.eq_ignore_ascii_case(p)) {
        return Err(violation("jwt_secret", "placeholder value, generate a random secret"));
    }
    if secret.chars().collect::<HashSet<_>>().len() < 10 {
        return Err(violation("jwt_secret", "needs at least 10 distinct characters"));
    }
    Ok(())
}

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides `level`.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("storefront_api={level},tower_http=debug"));

    let builder = fmt().with_env_filter(EnvFilter::new(directive));
    // try_init: a second call (tests, bins) keeps the first subscriber
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Files under `config/` plus `APP__*` variables, lowest precedence first.
fn layered_sources(run_env: &str) -> Result<Config, ConfigError> {
    Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("jwt_expiration", 3600)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(defaults::PORT))?
        .set_default("environment", defaults::ENVIRONMENT)?
        .set_default("log_level", defaults::LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{run_env}")).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()
}

/// Honors the plain `CASHFREE_*` variables for any gateway key still unset.
fn with_gateway_env_fallbacks(layered: Config) -> Result<Config, ConfigError> {
    let fallback = |key: &str, var: &str| {
        if layered.get_string(key).is_ok() {
            None
        } else {
            env::var(var).ok().filter(|v| !v.trim().is_empty())
        }
    };
    let app_id = fallback("payments.cashfree_app_id", "CASHFREE_APP_ID");
    let secret = fallback("payments.cashfree_secret_key", "CASHFREE_SECRET_KEY");
    let gateway_env = fallback("payments.cashfree_environment", "CASHFREE_ENV");

    Config::builder()
        .add_source(layered)
        .set_override_option("payments.cashfree_app_id", app_id)?
        .set_override_option("payments.cashfree_secret_key", secret)?
        .set_override_option("payments.cashfree_environment", gateway_env)?
        .build()
}

/// Reads and validates [`AppConfig`].
///
/// `RUN_ENV` (or `APP_ENV`) picks `config/<env>.toml` on top of
/// `config/default.toml`; `APP__SECTION__KEY` variables override both.
/// There is no default for `jwt_secret`.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| defaults::ENVIRONMENT.to_owned());
    info!(environment = %run_env, "loading configuration");

    if !Path::new(CONFIG_DIR).is_dir() {
        info!("no {CONFIG_DIR}/ directory, using defaults and environment only");
    }

    let merged = with_gateway_env_fallbacks(layered_sources(&run_env)?)?;

    if merged.get_string("jwt_secret").is_err() {
        error!("jwt_secret missing; export APP__JWT_SECRET (64+ random characters)");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret (APP__JWT_SECRET)".into(),
        )));
    }

    let app_config: AppConfig = merged.try_deserialize()?;
    if let Err(e) = app_config
        .validate()
        .and_then(|()| app_config.check_deployment_rules())
    {
        error!(errors = ?e, "configuration rejected");
        return Err(AppConfigError::Validation(e));
    }

    if !app_config.payments.has_credentials() {
        warn!("Cashfree credentials are not configured; checkout will be rejected");
    }

    info!(
        environment = %app_config.environment,
        port = app_config.port,
        "configuration ready"
    );
    Ok(app_config)
}
