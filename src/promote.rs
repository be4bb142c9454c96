//! Environment promotion.
//!
//! A service is built once into a [`BuildArtifact`] and promoted into any
//! number of environments. Promotion only decides the environment-specific
//! parts of a [`ServiceDeployment`] (environment variables, secret
//! references, scaling policy); the artifact digest passes through untouched.
//!
//! Configuration may only name secrets, never carry their values. Profiles
//! are validated for that when the manifest is loaded.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dispatch::ServiceKind;

/// Environment variable carrying the environment name into the container.
pub const ENVIRONMENT_VAR: &str = "ENVIRONMENT";
/// Environment variable carrying the cloud project identifier.
pub const PROJECT_ID_VAR: &str = "GCP_PROJECT_ID";
/// Environment variable carrying the service log level.
pub const LOG_LEVEL_VAR: &str = "LOG_LEVEL";

/// Variables the promotion step owns. Profiles may not set them directly.
const RESERVED_VARS: &[&str] = &[ENVIRONMENT_VAR, PROJECT_ID_VAR];

/// Key fragments that mark an environment variable as credential-bearing.
const CREDENTIAL_MARKERS: &[&str] = &["PASSWORD", "SECRET", "TOKEN", "API_KEY", "APIKEY", "CREDENTIAL", "PRIVATE_KEY"];

/// Maximum length of a secret name.
const MAX_SECRET_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[serde(alias = "development")]
    Dev,
    #[serde(alias = "staging")]
    Qa,
    #[serde(alias = "prod")]
    Production,
}

impl Environment {
    pub const ALL: [Environment; 3] = [Environment::Dev, Environment::Qa, Environment::Production];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Qa => "qa",
            Environment::Production => "production",
        }
    }

    /// UI color used by the frontend banner.
    pub fn color(&self) -> &'static str {
        match self {
            Environment::Dev => "#FFA500",
            Environment::Qa => "#4169E1",
            Environment::Production => "#228B22",
        }
    }

    pub fn purpose(&self) -> &'static str {
        match self {
            Environment::Dev => "Active development and testing",
            Environment::Qa => "Quality assurance and validation",
            Environment::Production => "Live production environment",
        }
    }

    pub fn is_debug(&self) -> bool {
        matches!(self, Environment::Dev)
    }

    /// Log level a service runs at unless the profile overrides it.
    pub fn default_log_level(&self) -> LogLevel {
        if self.is_debug() {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = PromotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "qa" | "staging" => Ok(Environment::Qa),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(PromotionError::UnknownEnvironment(s.to_string())),
        }
    }
}

/// Service log level as passed through `LOG_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    /// Matching `tracing` filter directive.
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl FromStr for LogLevel {
    type Err = PromotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            _ => Err(PromotionError::InvalidLogLevel(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub min_instances: u32,
    pub max_instances: u32,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_instances: 1,
            max_instances: 2,
        }
    }
}

/// Per-environment settings of one service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentProfile {
    /// Cloud project the environment lives in; secrets resolve against it
    pub project_id: Option<String>,
    #[serde(default)]
    pub min_instances: Option<u32>,
    #[serde(default)]
    pub max_instances: Option<u32>,
    /// Extra environment variables (never secret values)
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Replaces the service-wide secret references when set
    pub secret_refs: Option<BTreeSet<String>>,
}

/// Deployment profile of one service, as declared in the manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceProfile {
    /// Platform service name
    pub name: String,
    /// Source directory hashed into the build artifact
    pub source_dir: String,
    #[serde(default)]
    pub scaling: ScalingPolicy,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub secret_refs: BTreeSet<String>,
    #[serde(default)]
    pub environments: BTreeMap<Environment, EnvironmentProfile>,
}

impl ServiceProfile {
    /// Check every environment this profile can be promoted into.
    pub fn validate(&self) -> Result<(), PromotionError> {
        check_env_vars(&self.name, None, &self.env)?;
        check_secret_refs(&self.name, &self.secret_refs)?;
        check_scaling(&self.name, None, self.scaling)?;

        for (environment, profile) in &self.environments {
            check_env_vars(&self.name, Some(*environment), &profile.env)?;
            if let Some(refs) = &profile.secret_refs {
                check_secret_refs(&self.name, refs)?;
            }
            check_scaling(&self.name, Some(*environment), self.scaling_for(*environment))?;
        }
        Ok(())
    }

    pub fn scaling_for(&self, environment: Environment) -> ScalingPolicy {
        let overrides = self.environments.get(&environment);
        ScalingPolicy {
            min_instances: overrides
                .and_then(|p| p.min_instances)
                .unwrap_or(self.scaling.min_instances),
            max_instances: overrides
                .and_then(|p| p.max_instances)
                .unwrap_or(self.scaling.max_instances),
        }
    }
}

/// Immutable build output for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildArtifact {
    pub service: ServiceKind,
    /// Hex SHA-256 of the service source tree
    pub digest: String,
}

/// A secret named by configuration and resolved by the platform at start.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SecretRef {
    pub name: String,
    /// Project the secret is resolved in, when known
    pub project_id: Option<String>,
}

impl SecretRef {
    /// Fully qualified resource name of the latest secret version.
    pub fn resource_name(&self) -> Option<String> {
        self.project_id
            .as_ref()
            .map(|project| format!("projects/{}/secrets/{}/versions/latest", project, self.name))
    }
}

/// What the platform runs for one service in one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDeployment {
    pub service: ServiceKind,
    pub service_name: String,
    pub environment: Environment,
    pub scaling: ScalingPolicy,
    pub environment_variables: BTreeMap<String, String>,
    pub secret_refs: BTreeSet<SecretRef>,
    pub artifact_digest: String,
}

/// Produce the deployment of `artifact` into `environment`.
pub fn promote(
    profile: &ServiceProfile,
    artifact: &BuildArtifact,
    environment: Environment,
) -> Result<ServiceDeployment, PromotionError> {
    let env_profile = profile.environments.get(&environment);

    let mut vars = profile.env.clone();
    if let Some(env_profile) = env_profile {
        vars.extend(env_profile.env.clone());
    }
    check_env_vars(&profile.name, Some(environment), &vars)?;

    vars.entry(LOG_LEVEL_VAR.to_string())
        .or_insert_with(|| environment.default_log_level().as_str().to_string());
    vars.insert(ENVIRONMENT_VAR.to_string(), environment.as_str().to_string());

    let project_id = env_profile.and_then(|p| p.project_id.clone());
    if let Some(project) = &project_id {
        vars.insert(PROJECT_ID_VAR.to_string(), project.clone());
    }

    let names = env_profile
        .and_then(|p| p.secret_refs.as_ref())
        .unwrap_or(&profile.secret_refs);
    check_secret_refs(&profile.name, names)?;
    let secret_refs = names
        .iter()
        .map(|name| SecretRef {
            name: name.clone(),
            project_id: project_id.clone(),
        })
        .collect();

    let scaling = profile.scaling_for(environment);
    check_scaling(&profile.name, Some(environment), scaling)?;

    Ok(ServiceDeployment {
        service: artifact.service,
        service_name: profile.name.clone(),
        environment,
        scaling,
        environment_variables: vars,
        secret_refs,
        artifact_digest: artifact.digest.clone(),
    })
}

/// True if a variable name suggests it carries a credential value.
pub fn is_credential_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    CREDENTIAL_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// Secret names follow the platform rule: 1-255 of `[A-Za-z0-9_-]`.
pub fn is_valid_secret_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_SECRET_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn check_env_vars(
    service: &str,
    environment: Option<Environment>,
    vars: &BTreeMap<String, String>,
) -> Result<(), PromotionError> {
    for key in vars.keys() {
        if is_credential_key(key) {
            return Err(PromotionError::SecretInConfiguration {
                service: service.to_string(),
                key: key.clone(),
            });
        }
        if RESERVED_VARS.contains(&key.as_str()) {
            return Err(PromotionError::ReservedVariable {
                service: service.to_string(),
                key: key.clone(),
            });
        }
    }
    if let Some(level) = vars.get(LOG_LEVEL_VAR) {
        level.parse::<LogLevel>().map_err(|_| PromotionError::InvalidLogLevel(format!(
            "{} for {}{}",
            level,
            service,
            environment.map(|e| format!(" in {}", e)).unwrap_or_default()
        )))?;
    }
    Ok(())
}

fn check_secret_refs(service: &str, refs: &BTreeSet<String>) -> Result<(), PromotionError> {
    match refs.iter().find(|name| !is_valid_secret_name(name)) {
        Some(name) => Err(PromotionError::InvalidSecretRef {
            service: service.to_string(),
            name: name.clone(),
        }),
        None => Ok(()),
    }
}

fn check_scaling(
    service: &str,
    environment: Option<Environment>,
    scaling: ScalingPolicy,
) -> Result<(), PromotionError> {
    if scaling.max_instances == 0 || scaling.min_instances > scaling.max_instances {
        return Err(PromotionError::InvalidScaling {
            service: service.to_string(),
            environment: environment.map(|e| e.to_string()).unwrap_or_else(|| "default".to_string()),
            min: scaling.min_instances,
            max: scaling.max_instances,
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PromotionError {
    #[error("Unknown environment '{0}' (expected dev, qa or production)")]
    UnknownEnvironment(String),

    #[error("Invalid log level '{0}' (expected INFO or DEBUG)")]
    InvalidLogLevel(String),

    #[error("Service '{service}' sets '{key}' in configuration; credentials must be secret references")]
    SecretInConfiguration { service: String, key: String },

    #[error("Service '{service}' may not set reserved variable '{key}'")]
    ReservedVariable { service: String, key: String },

    #[error("Service '{service}' references invalid secret name '{name}'")]
    InvalidSecretRef { service: String, name: String },

    #[error("Service '{service}' has invalid scaling in {environment}: min {min}, max {max}")]
    InvalidScaling {
        service: String,
        environment: String,
        min: u32,
        max: u32,
    },

    #[error("No deployment profile for service '{0}'")]
    UnknownService(ServiceKind),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_profile() -> ServiceProfile {
        let mut environments = BTreeMap::new();
        environments.insert(
            Environment::Dev,
            EnvironmentProfile {
                project_id: Some("shop-dev".to_string()),
                max_instances: Some(1),
                ..Default::default()
            },
        );
        environments.insert(
            Environment::Production,
            EnvironmentProfile {
                project_id: Some("shop-prod".to_string()),
                min_instances: Some(2),
                max_instances: Some(10),
                env: BTreeMap::from([("LOG_LEVEL".to_string(), "INFO".to_string())]),
                ..Default::default()
            },
        );
        ServiceProfile {
            name: "backend-api".to_string(),
            source_dir: "backend".to_string(),
            scaling: ScalingPolicy::default(),
            env: BTreeMap::from([("FEATURE_FLAGS".to_string(), "none".to_string())]),
            secret_refs: BTreeSet::from(["db-password".to_string(), "api-key".to_string()]),
            environments,
        }
    }

    fn artifact() -> BuildArtifact {
        BuildArtifact {
            service: ServiceKind::Api,
            digest: "ab12".repeat(16),
        }
    }

    #[test]
    fn test_environment_aliases() {
        assert_eq!("development".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!("Staging".parse::<Environment>().unwrap(), Environment::Qa);
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert!("test".parse::<Environment>().is_err());
    }

    #[test]
    fn test_environment_colors() {
        assert_eq!(Environment::Dev.color(), "#FFA500");
        assert_eq!(Environment::Qa.color(), "#4169E1");
        assert_eq!(Environment::Production.color(), "#228B22");
    }

    #[test]
    fn test_promotion_keeps_artifact_digest() {
        let profile = api_profile();
        let dev = promote(&profile, &artifact(), Environment::Dev).unwrap();
        let prod = promote(&profile, &artifact(), Environment::Production).unwrap();

        assert_eq!(dev.artifact_digest, prod.artifact_digest);
        assert_eq!(dev.environment_variables["ENVIRONMENT"], "dev");
        assert_eq!(prod.environment_variables["ENVIRONMENT"], "production");
        assert_eq!(dev.environment_variables["FEATURE_FLAGS"], prod.environment_variables["FEATURE_FLAGS"]);
    }

    #[test]
    fn test_promotion_changes_secret_resolution_target() {
        let profile = api_profile();
        let dev = promote(&profile, &artifact(), Environment::Dev).unwrap();
        let prod = promote(&profile, &artifact(), Environment::Production).unwrap();

        let dev_names: Vec<_> = dev.secret_refs.iter().map(|r| r.name.clone()).collect();
        let prod_names: Vec<_> = prod.secret_refs.iter().map(|r| r.name.clone()).collect();
        assert_eq!(dev_names, prod_names);
        assert!(dev
            .secret_refs
            .iter()
            .all(|r| r.resource_name().unwrap().starts_with("projects/shop-dev/")));
        assert!(prod
            .secret_refs
            .iter()
            .all(|r| r.resource_name().unwrap().starts_with("projects/shop-prod/")));
    }

    #[test]
    fn test_promotion_applies_scaling_and_log_level() {
        let profile = api_profile();
        let dev = promote(&profile, &artifact(), Environment::Dev).unwrap();
        let qa = promote(&profile, &artifact(), Environment::Qa).unwrap();
        let prod = promote(&profile, &artifact(), Environment::Production).unwrap();

        assert_eq!(dev.scaling, ScalingPolicy { min_instances: 1, max_instances: 1 });
        assert_eq!(qa.scaling, ScalingPolicy::default());
        assert_eq!(prod.scaling, ScalingPolicy { min_instances: 2, max_instances: 10 });
        assert_eq!(dev.environment_variables["LOG_LEVEL"], "DEBUG");
        assert_eq!(qa.environment_variables["LOG_LEVEL"], "INFO");
        assert!(!qa.environment_variables.contains_key("GCP_PROJECT_ID"));
    }

    #[test]
    fn test_credential_keys_rejected() {
        let mut profile = api_profile();
        profile
            .env
            .insert("DB_PASSWORD".to_string(), "hunter2".to_string());
        let err = profile.validate().unwrap_err();
        assert!(matches!(err, PromotionError::SecretInConfiguration { .. }));
        assert!(promote(&profile, &artifact(), Environment::Dev).is_err());
    }

    #[test]
    fn test_reserved_variables_rejected() {
        let mut profile = api_profile();
        profile
            .env
            .insert("ENVIRONMENT".to_string(), "production".to_string());
        assert!(matches!(
            profile.validate().unwrap_err(),
            PromotionError::ReservedVariable { .. }
        ));
    }

    #[test]
    fn test_invalid_secret_names_rejected() {
        assert!(is_valid_secret_name("db-password"));
        assert!(is_valid_secret_name("API_KEY_2"));
        assert!(!is_valid_secret_name(""));
        assert!(!is_valid_secret_name("s3cr3t value"));
        assert!(!is_valid_secret_name(&"x".repeat(256)));

        let mut profile = api_profile();
        profile.secret_refs.insert("projects/x/secrets/y".to_string());
        assert!(matches!(
            profile.validate().unwrap_err(),
            PromotionError::InvalidSecretRef { .. }
        ));
    }

    #[test]
    fn test_invalid_scaling_rejected() {
        let mut profile = api_profile();
        profile.scaling = ScalingPolicy {
            min_instances: 3,
            max_instances: 2,
        };
        assert!(matches!(
            profile.validate().unwrap_err(),
            PromotionError::InvalidScaling { .. }
        ));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut profile = api_profile();
        profile.env.insert("LOG_LEVEL".to_string(), "TRACE".to_string());
        assert!(matches!(
            profile.validate().unwrap_err(),
            PromotionError::InvalidLogLevel(_)
        ));
    }
}
