//! Configuration loading and constants.
//!
//! The deployment manifest is a TOML file describing the dispatch table, the
//! pipeline triggers and the per-service promotion profiles, plus the settings
//! the two services run with. [`AppConfig::load`] parses it and
//! [`AppConfig::validate`] turns it into an immutable [`Manifest`]; a manifest
//! that fails validation is never deployed.
//!
//! The API service additionally reads its runtime identity from environment
//! variables set by the platform, see [`RuntimeEnv`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use const_format::formatcp;
use serde::Deserialize;

use crate::dispatch::{DispatchError, DispatchTable, RouteRule, ServiceKind};
use crate::promote::{Environment, LogLevel, PromotionError, ServiceProfile, PROJECT_ID_VAR};
use crate::secrets::ResolvePolicy;
use crate::trigger::{TriggerError, TriggerRule, TriggerSet};

// =============================================================================
// HTTP Response Cache Control
// =============================================================================

/// Prebuilt static assets - cached, revalidated after an hour
pub const HTTP_CACHE_STATIC_MAX_AGE: u32 = 3600;

/// Stale-if-error duration - serve stale assets while a new revision rolls out
pub const HTTP_CACHE_STALE_IF_ERROR: u32 = 300;

pub const CACHE_CONTROL_STATIC: &str = formatcp!(
    "public, max-age={}, stale-if-error={}",
    HTTP_CACHE_STATIC_MAX_AGE,
    HTTP_CACHE_STALE_IF_ERROR
);

/// API responses carry per-environment, per-request data
pub const CACHE_CONTROL_API: &str = "no-store";

// =============================================================================
// Service identity
// =============================================================================

/// Service name reported by the API health endpoints
pub const API_SERVICE_NAME: &str = "backend-api";

/// API version reported by the health endpoints
pub const API_VERSION: &str = "2.0.0";

/// Secret holding the database credential
pub const DB_PASSWORD_SECRET: &str = "db-password";

/// Secret holding the external API key
pub const API_KEY_SECRET: &str = "api-key";

/// Runtime description reported by `/api/status`
pub const PLATFORM_RUNTIME: &str = "App Engine Flexible";

/// Registry description reported by `/api/status`
pub const PLATFORM_REGISTRY: &str = "Artifact Registry";

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Default static site root
pub const DEFAULT_STATIC_ROOT: &str = "frontend/public";

/// Default log filter when neither the CLI, RUST_LOG nor LOG_LEVEL set one
pub const DEFAULT_LOG_FILTER: &str = "frontdoor=info,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

/// Default listen port when PORT is not set
pub const DEFAULT_PORT: u16 = 8080;

/// Fallback project variable set by the platform
pub const FALLBACK_PROJECT_ID_VAR: &str = "GOOGLE_CLOUD_PROJECT";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listener shared by both services
    #[serde(default)]
    pub http: HttpServerConfig,
    #[serde(default)]
    pub static_site: StaticSiteConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Dispatch rules in evaluation order
    #[serde(default, rename = "route")]
    pub routes: Vec<RouteConfig>,
    #[serde(default, rename = "trigger")]
    pub triggers: Vec<TriggerConfig>,
    /// Promotion profiles keyed by service
    #[serde(default, rename = "service")]
    pub services: BTreeMap<ServiceKind, ServiceProfile>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "HttpServerConfig::default_host")]
    pub host: String,
    /// Overridden by the PORT environment variable when set
    #[serde(default = "HttpServerConfig::default_port")]
    pub port: u16,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

impl HttpServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        DEFAULT_PORT
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticSiteConfig {
    /// Directory holding the prebuilt frontend
    #[serde(default = "StaticSiteConfig::default_root")]
    pub root: String,
}

impl Default for StaticSiteConfig {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
        }
    }
}

impl StaticSiteConfig {
    fn default_root() -> String {
        DEFAULT_STATIC_ROOT.to_string()
    }
}

/// Where the API service reads secret values from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretBackend {
    /// Values injected by the platform as environment variables
    #[default]
    Env,
    /// Google Secret Manager over REST
    SecretManager,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub backend: SecretBackend,
    /// Refuse to start when a secret cannot be resolved (default: false)
    #[serde(default)]
    pub required: bool,
    #[serde(default = "SecretsConfig::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "SecretsConfig::default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: SecretBackend::default(),
            required: false,
            max_attempts: Self::default_max_attempts(),
            retry_delay_ms: Self::default_retry_delay_ms(),
        }
    }
}

impl SecretsConfig {
    fn default_max_attempts() -> u32 {
        3
    }

    fn default_retry_delay_ms() -> u64 {
        500
    }

    pub fn policy(&self) -> ResolvePolicy {
        ResolvePolicy {
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            required: self.required,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// `[[route]]` entry as written in the manifest
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub path: String,
    pub service: ServiceKind,
}

/// `[[trigger]]` entry as written in the manifest
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    pub service: ServiceKind,
    pub watch: String,
    pub build_spec: String,
}

/// A validated deployment manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub config: AppConfig,
    pub dispatch: DispatchTable,
    pub triggers: TriggerSet,
}

impl Manifest {
    pub fn profile(&self, service: ServiceKind) -> Result<&ServiceProfile, ConfigError> {
        self.config
            .services
            .get(&service)
            .ok_or(ConfigError::Promotion(PromotionError::UnknownService(service)))
    }

    pub fn profiles(&self) -> HashMap<ServiceKind, ServiceProfile> {
        self.config
            .services
            .iter()
            .map(|(kind, profile)| (*kind, profile.clone()))
            .collect()
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Validate routing, triggers and promotion profiles together.
    pub fn validate(self) -> Result<Manifest, ConfigError> {
        let rules = self
            .routes
            .iter()
            .map(|route| RouteRule::new(&route.path, route.service))
            .collect::<Result<Vec<_>, _>>()?;
        let dispatch = DispatchTable::new(rules)?;

        let triggers = self
            .triggers
            .iter()
            .map(|t| TriggerRule::new(t.service, &t.watch, &t.build_spec))
            .collect::<Result<Vec<_>, _>>()?;
        let triggers = TriggerSet::new(triggers)?;

        for profile in self.services.values() {
            profile.validate()?;
        }

        for service in triggers.services() {
            if !self.services.contains_key(&service) {
                return Err(ConfigError::Validation(format!(
                    "Trigger watches sources of '{}' but no [service.{}] profile exists",
                    service, service
                )));
            }
        }

        for service in self.services.keys() {
            if !dispatch.rules().any(|rule| rule.target == *service) {
                return Err(ConfigError::Validation(format!(
                    "Service '{}' is deployed but no route dispatches to it",
                    service
                )));
            }
        }

        Ok(Manifest {
            config: self,
            dispatch,
            triggers,
        })
    }
}

/// Runtime identity of a running API instance, read from its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnv {
    pub environment: Environment,
    pub project_id: Option<String>,
    pub log_level: LogLevel,
    pub port: Option<u16>,
}

impl RuntimeEnv {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// A missing ENVIRONMENT means dev; an unrecognized one is rejected so a
    /// mistyped production deploy cannot come up with dev behavior.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match non_empty("ENVIRONMENT") {
            Some(raw) => raw.parse::<Environment>()?,
            None => Environment::Dev,
        };

        let project_id = non_empty(PROJECT_ID_VAR).or_else(|| non_empty(FALLBACK_PROJECT_ID_VAR));

        let log_level = match non_empty("LOG_LEVEL") {
            Some(raw) => raw.parse::<LogLevel>()?,
            None => LogLevel::Info,
        };

        let port = match non_empty("PORT") {
            Some(raw) => Some(raw.trim().parse::<u16>().map_err(|_| {
                ConfigError::Validation(format!("PORT must be a port number, got '{}'", raw))
            })?),
            None => None,
        };

        Ok(Self {
            environment,
            project_id,
            log_level,
            port,
        })
    }

    /// Public URL of the environment's default host.
    pub fn platform_url(&self) -> String {
        match &self.project_id {
            Some(project) => format!("https://{}.uc.r.appspot.com", project),
            None => "unknown".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid dispatch table: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("Invalid trigger rules: {0}")]
    Trigger(#[from] TriggerError),
    #[error("Invalid promotion profile: {0}")]
    Promotion(#[from] PromotionError),
    #[error("Configuration error: {0}")]
    Validation(String),
}
