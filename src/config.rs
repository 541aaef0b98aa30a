use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use url::Url;
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const SANDBOX_BASE_URL: &str = "https://staging.cowpay.me";
const DEFAULT_CHARGE_PATH: &str = "/api/v2/charge/card/init";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;

/// Processor connection and merchant credentials
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Processor origin, e.g. https://staging.cowpay.me
    #[validate(url)]
    pub base_url: String,

    #[serde(default = "default_charge_path")]
    #[validate(custom = "validate_charge_path")]
    pub charge_path: String,

    /// Bearer token for the charge API
    pub api_token: String,

    pub merchant_code: String,

    /// Secret half of the credential pair; only ever used inside signatures
    pub hash_key: String,

    /// Upper bound on a single charge call (1-120 seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,

    /// Where the processor returns the buyer after 3DS
    #[validate(url)]
    pub return_url: String,

    #[serde(default = "default_true_bool")]
    pub sandbox: bool,
}

impl GatewayConfig {
    pub fn charge_endpoint(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.charge_path
        ))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Storefront pages the buyer is redirected to
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StorefrontConfig {
    #[validate(url)]
    pub thank_you_url: String,
    #[validate(url)]
    pub checkout_url: String,
    #[validate(url)]
    pub landing_url: String,
}

/// Server notification authentication
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// When set, notifications must also carry a valid `x-timestamp`/`x-signature` pair
    #[serde(default)]
    pub hmac_secret: Option<String>,

    #[serde(default = "default_webhook_tolerance_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub tolerance_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            hmac_secret: None,
            tolerance_secs: DEFAULT_WEBHOOK_TOLERANCE_SECS,
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Runtime environment (development, staging, production)
    pub environment: String,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit JSON formatted logs
    #[serde(default)]
    pub log_json: bool,

    #[validate]
    pub gateway: GatewayConfig,

    #[validate]
    pub storefront: StorefrontConfig,

    #[serde(default)]
    #[validate]
    pub webhook: WebhookConfig,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() {
            if self.gateway.sandbox {
                let mut err = ValidationError::new("gateway_sandbox_in_production");
                err.message = Some(
                    "Sandbox gateway must not be used in production. Set APP__GATEWAY__SANDBOX=false."
                        .into(),
                );
                errors.add("gateway", err);
            }

            for (field, value) in [
                ("gateway_api_token", &self.gateway.api_token),
                ("gateway_merchant_code", &self.gateway.merchant_code),
                ("gateway_hash_key", &self.gateway.hash_key),
            ] {
                if value.trim().is_empty() {
                    let mut err = ValidationError::new("gateway_credentials_required");
                    err.message = Some(format!("{field} must be configured in production").into());
                    errors.add("gateway", err);
                }
            }

            if !self.gateway.base_url.starts_with("https://") {
                let mut err = ValidationError::new("gateway_https_required");
                err.message = Some("The gateway must be reached over https in production".into());
                errors.add("gateway", err);
            }
        }

        if let Some(secret) = &self.webhook.hmac_secret {
            if secret.trim().len() < 16 {
                let mut err = ValidationError::new("webhook_secret_too_short");
                err.message = Some("webhook.hmac_secret must be at least 16 characters".into());
                errors.add("webhook", err);
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_charge_path() -> String {
    DEFAULT_CHARGE_PATH.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_true_bool() -> bool {
    true
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_charge_path(path: &str) -> Result<(), ValidationError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        let mut err = ValidationError::new("charge_path");
        err.message = Some("Must start with '/'".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("cowpay_checkout={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults (sandbox gateway, localhost storefront)
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// Loads configuration from `dir`, layering `default` and `run_env` files under it.
pub fn load_config_from(dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    let config = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("gateway.base_url", SANDBOX_BASE_URL)?
        .set_default("gateway.api_token", "")?
        .set_default("gateway.merchant_code", "")?
        .set_default("gateway.hash_key", "")?
        .set_default(
            "gateway.return_url",
            "http://localhost:8080/cowpay/otp-callback",
        )?
        .set_default(
            "storefront.thank_you_url",
            "http://localhost:3000/checkout/thank-you",
        )?
        .set_default("storefront.checkout_url", "http://localhost:3000/checkout")?
        .set_default("storefront.landing_url", "http://localhost:3000/")?
        .add_source(File::with_name(&dir.join("default").to_string_lossy()).required(false))
        .add_source(File::with_name(&dir.join(run_env).to_string_lossy()).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!(
        environment = %app_config.environment,
        sandbox = app_config.gateway.sandbox,
        "Configuration loaded successfully"
    );
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn base_config() -> AppConfig {
        AppConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            environment: "production".into(),
            log_level: "info".into(),
            log_json: false,
            gateway: GatewayConfig {
                base_url: "https://cowpay.me".into(),
                charge_path: DEFAULT_CHARGE_PATH.into(),
                api_token: "token".into(),
                merchant_code: "MERCH01".into(),
                hash_key: "s3cr3t".into(),
                timeout_secs: 30,
                return_url: "https://shop.example.com/cowpay/otp-callback".into(),
                sandbox: false,
            },
            storefront: StorefrontConfig {
                thank_you_url: "https://shop.example.com/checkout/thank-you".into(),
                checkout_url: "https://shop.example.com/checkout".into(),
                landing_url: "https://shop.example.com/".into(),
            },
            webhook: WebhookConfig::default(),
        }
    }

    #[test]
    fn production_with_live_credentials_passes() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn production_rejects_sandbox_gateway() {
        let mut cfg = base_config();
        cfg.gateway.sandbox = true;
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn production_requires_credentials() {
        let mut cfg = base_config();
        cfg.gateway.hash_key = "  ".into();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn development_allows_sandbox_without_credentials() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.gateway.sandbox = true;
        cfg.gateway.api_token = String::new();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn short_webhook_secret_is_rejected() {
        let mut cfg = base_config();
        cfg.webhook.hmac_secret = Some("short".into());
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn charge_endpoint_joins_base_and_path() {
        let mut cfg = base_config();
        cfg.gateway.base_url = "https://cowpay.me/".into();
        assert_eq!(
            cfg.gateway.charge_endpoint().unwrap().as_str(),
            "https://cowpay.me/api/v2/charge/card/init"
        );
    }

    #[test]
    fn files_layer_over_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
                log_level = "debug"

                [gateway]
                merchant_code = "MERCH01"
                hash_key = "s3cr3t"
            "#,
        )
        .unwrap();
        fs::write(
            dir.path().join("staging.toml"),
            r#"
                port = 9090

                [gateway]
                timeout_secs = 10
            "#,
        )
        .unwrap();

        let cfg = load_config_from(dir.path(), "staging").unwrap();

        assert_eq!(cfg.environment, "staging");
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.gateway.merchant_code, "MERCH01");
        assert_eq!(cfg.gateway.timeout(), Duration::from_secs(10));
        assert!(cfg.gateway.sandbox);
        assert_eq!(cfg.gateway.charge_path, DEFAULT_CHARGE_PATH);
    }
}
