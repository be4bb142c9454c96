//! Secret resolution at service startup.
//!
//! Configuration only ever names secrets. Values come from a [`SecretStore`]
//! once, when the API service starts, and are kept in memory in
//! [`LoadedSecrets`]. A secret that is missing from the store is reported as
//! not loaded; a store that cannot be reached is retried a bounded number of
//! times before startup gives up (or continues degraded, depending on policy).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Google Secret Manager REST endpoint.
pub const SECRET_MANAGER_BASE_URL: &str = "https://secretmanager.googleapis.com/v1";

/// Metadata server endpoint issuing access tokens for the instance service account.
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Number of characters shown by [`SecretStatus::preview`].
const PREVIEW_CHARS: usize = 3;

/// A read-only source of secret values.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the latest value of `name`. `Ok(None)` means the secret does not exist.
    async fn fetch(&self, name: &str) -> Result<Option<SecretValue>, SecretError>;

    /// Short name for logs.
    fn describe(&self) -> &'static str;
}

/// A secret value. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(<redacted>)")
    }
}

/// Values injected by the platform as environment variables.
///
/// `db-password` is read from `DB_PASSWORD`, `api-key` from `API_KEY`.
#[derive(Clone, Default)]
pub struct EnvSecretStore {
    vars: HashMap<String, String>,
}

impl EnvSecretStore {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Environment variable a secret name is injected under.
    pub fn variable_for(name: &str) -> String {
        name.replace('-', "_").to_ascii_uppercase()
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn fetch(&self, name: &str) -> Result<Option<SecretValue>, SecretError> {
        Ok(self
            .vars
            .get(&Self::variable_for(name))
            .filter(|value| !value.is_empty())
            .map(|value| SecretValue::new(value.clone())))
    }

    fn describe(&self) -> &'static str {
        "environment"
    }
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(Debug, Deserialize)]
struct SecretPayload {
    data: String,
}

/// Google Secret Manager accessed over REST with the instance service account.
#[derive(Debug, Clone)]
pub struct SecretManagerStore {
    http_client: reqwest::Client,
    project_id: String,
    base_url: String,
    token_url: String,
}

impl SecretManagerStore {
    pub fn new(project_id: impl Into<String>) -> Result<Self, SecretError> {
        Self::with_endpoints(project_id, SECRET_MANAGER_BASE_URL, METADATA_TOKEN_URL)
    }

    /// Create a store against explicit endpoints (emulators, tests).
    pub fn with_endpoints(
        project_id: impl Into<String>,
        base_url: &str,
        token_url: &str,
    ) -> Result<Self, SecretError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SecretError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            project_id: project_id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
        })
    }

    async fn access_token(&self) -> Result<String, SecretError> {
        let response = self
            .http_client
            .get(&self.token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| SecretError::Unavailable(format!("metadata server: {}", e)))?
            .error_for_status()
            .map_err(|e| SecretError::Unavailable(format!("metadata server: {}", e)))?;

        let token: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| SecretError::Malformed(format!("token response: {}", e)))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl SecretStore for SecretManagerStore {
    async fn fetch(&self, name: &str) -> Result<Option<SecretValue>, SecretError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/projects/{}/secrets/{}/versions/latest:access",
            self.base_url,
            urlencoding::encode(&self.project_id),
            urlencoding::encode(name)
        );

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SecretError::Unavailable(format!("secret manager: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| SecretError::Unavailable(format!("secret manager: {}", e)))?;

        let body: AccessSecretVersionResponse = response
            .json()
            .await
            .map_err(|e| SecretError::Malformed(format!("access response: {}", e)))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body.payload.data.as_bytes())
            .map_err(|e| SecretError::Malformed(format!("payload for '{}': {}", name, e)))?;
        let value = String::from_utf8(bytes)
            .map_err(|_| SecretError::Malformed(format!("payload for '{}' is not UTF-8", name)))?;

        Ok(Some(SecretValue::new(value)))
    }

    fn describe(&self) -> &'static str {
        "secret-manager"
    }
}

/// Retry and failure policy for startup resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolvePolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Refuse to start when a secret cannot be resolved
    pub required: bool,
}

/// Per-secret status reported by diagnostics endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretStatus {
    pub loaded: bool,
    pub length: usize,
    pub preview: Option<String>,
}

/// Secrets resolved at startup, keyed by secret name.
#[derive(Debug, Clone, Default)]
pub struct LoadedSecrets {
    values: BTreeMap<String, Option<SecretValue>>,
}

impl LoadedSecrets {
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = (String, Option<SecretValue>)>,
    {
        Self {
            values: values.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SecretValue> {
        self.values.get(name).and_then(Option::as_ref)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Loaded flag, length and a three-character preview. Never the full value.
    pub fn status(&self, name: &str) -> SecretStatus {
        match self.get(name) {
            Some(value) => SecretStatus {
                loaded: true,
                length: value.expose().chars().count(),
                preview: Some(format!(
                    "{}...",
                    value.expose().chars().take(PREVIEW_CHARS).collect::<String>()
                )),
            },
            None => SecretStatus {
                loaded: false,
                length: 0,
                preview: None,
            },
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Resolve every name in `names` from `store`.
pub async fn resolve_secrets<I, S>(
    store: &dyn SecretStore,
    names: I,
    policy: ResolvePolicy,
) -> Result<LoadedSecrets, SecretError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tracing::info!(store = store.describe(), "Resolving secrets");
    let mut values = BTreeMap::new();

    for name in names {
        let name = name.as_ref();
        let value = match fetch_with_retry(store, name, policy).await {
            Ok(Some(value)) => {
                tracing::info!(secret = name, "Secret loaded");
                Some(value)
            }
            Ok(None) if policy.required => {
                return Err(SecretError::Missing(name.to_string()));
            }
            Ok(None) => {
                tracing::warn!(secret = name, "Secret not found, continuing without it");
                None
            }
            Err(e) if policy.required => return Err(e),
            Err(e) => {
                tracing::warn!(secret = name, error = %e, "Secret not loaded");
                None
            }
        };
        values.insert(name.to_string(), value);
    }

    Ok(LoadedSecrets { values })
}

async fn fetch_with_retry(
    store: &dyn SecretStore,
    name: &str,
    policy: ResolvePolicy,
) -> Result<Option<SecretValue>, SecretError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match store.fetch(name).await {
            Err(SecretError::Unavailable(reason)) if attempt < attempts => {
                tracing::warn!(
                    secret = name,
                    attempt,
                    max_attempts = attempts,
                    error = %reason,
                    "Secret store unavailable, retrying"
                );
                tokio::time::sleep(policy.retry_delay).await;
                attempt += 1;
            }
            Err(SecretError::Unavailable(reason)) => {
                return Err(SecretError::RetriesExhausted {
                    name: name.to_string(),
                    attempts,
                    reason,
                });
            }
            other => return other,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SecretError {
    #[error("Secret store unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed secret store response: {0}")]
    Malformed(String),

    #[error("Required secret '{0}' does not exist")]
    Missing(String),

    #[error("Secret '{name}' could not be resolved after {attempts} attempts: {reason}")]
    RetriesExhausted {
        name: String,
        attempts: u32,
        reason: String,
    },
}
