//! Portal configuration
//!
//! Values come from built-in defaults, an optional TOML file and `UCHK_*`
//! environment variables, in increasing order of precedence. Nested keys
//! use `__` in variable names, e.g. `UCHK_THROTTLE__MAX_ATTEMPTS`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use tracing::info;

use crate::error::ApiResult;

/// Login throttle settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThrottleConfig {
    /// Failed attempts allowed inside the window
    pub max_attempts: u32,
    /// Window in seconds over which failures are counted
    pub window_secs: u64,
    /// Lockout duration in seconds
    pub lockout_secs: u64,
}

impl ThrottleConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn lockout(&self) -> Duration {
        Duration::from_secs(self.lockout_secs)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_secs: 900,  // 15 minutes
            lockout_secs: 900, // 15 minutes
        }
    }
}

/// Portal configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PortalConfig {
    /// Base URL of the backend REST API
    pub api_url: String,
    /// JSON file used as durable storage. In-memory when unset.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
    /// Anonymous entry point
    pub login_path: String,
    /// Default authenticated landing page
    pub landing_path: String,
    /// Token lifetime used when the token carries no readable expiry
    pub default_token_ttl_secs: i64,
    /// Storage key holding the anti-forgery token
    pub xsrf_storage_key: String,
    /// Header the anti-forgery token is sent in
    pub xsrf_header: String,
    /// Whether a 403 on an authenticated call ends the session
    pub logout_on_forbidden: bool,
    pub throttle: ThrottleConfig,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080/api".to_string(),
            storage_path: None,
            login_path: "/login".to_string(),
            landing_path: "/dashboard".to_string(),
            default_token_ttl_secs: 86_400, // 24 hours
            xsrf_storage_key: "XSRF-TOKEN".to_string(),
            xsrf_header: "X-XSRF-TOKEN".to_string(),
            logout_on_forbidden: true,
            throttle: ThrottleConfig::default(),
        }
    }
}

impl PortalConfig {
    /// Load configuration from defaults, an optional file and the environment
    ///
    /// # Environment Variables
    /// - `UCHK_API_URL`: backend base URL (default: "http://localhost:8080/api")
    /// - `UCHK_STORAGE_PATH`: JSON file for persisted session state
    /// - `UCHK_DEFAULT_TOKEN_TTL_SECS`: fallback token lifetime (default: 86400)
    /// - `UCHK_THROTTLE__MAX_ATTEMPTS`: failed logins before lockout (default: 5)
    pub fn load(path: Option<&Path>) -> ApiResult<Self> {
        let mut builder = Self::defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let config: Self = builder
            .add_source(
                Environment::with_prefix("UCHK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        info!("Portal configuration loaded, API at {}", config.api_url);
        Ok(config)
    }

    /// Parse configuration from TOML text layered over the defaults
    pub fn from_toml_str(toml: &str) -> ApiResult<Self> {
        let config = Self::defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Fallback token lifetime
    pub fn default_token_ttl(&self) -> TimeDelta {
        TimeDelta::seconds(self.default_token_ttl_secs)
    }

    fn defaults() -> ApiResult<ConfigBuilder<DefaultState>> {
        let d = PortalConfig::default();
        let builder = Config::builder()
            .set_default("api_url", d.api_url)?
            .set_default("login_path", d.login_path)?
            .set_default("landing_path", d.landing_path)?
            .set_default("default_token_ttl_secs", d.default_token_ttl_secs)?
            .set_default("xsrf_storage_key", d.xsrf_storage_key)?
            .set_default("xsrf_header", d.xsrf_header)?
            .set_default("logout_on_forbidden", d.logout_on_forbidden)?
            .set_default("throttle.max_attempts", d.throttle.max_attempts)?
            .set_default("throttle.window_secs", d.throttle.window_secs)?
            .set_default("throttle.lockout_secs", d.throttle.lockout_secs)?;
        Ok(builder)
    }
}
