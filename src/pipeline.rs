//! Per-service build and deploy pipelines.
//!
//! Every dirty service from a [`TriggerPlan`] runs its own pipeline
//! (build, promote, replace the live revision). Pipelines run concurrently and
//! never wait on each other; a failure halts only the failing service, and
//! that service keeps whatever revision was live before.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use walkdir::WalkDir;

use crate::dispatch::ServiceKind;
use crate::promote::{promote, BuildArtifact, Environment, PromotionError, ServiceDeployment, ServiceProfile};
use crate::trigger::TriggerPlan;

/// Builds (and publishes) the image for one service.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(
        &self,
        service: ServiceKind,
        profile: &ServiceProfile,
        build_spec: &str,
    ) -> Result<BuildArtifact, BuildError>;
}

/// Builder that derives the artifact digest from the service source tree.
///
/// Files are hashed in path order together with their repository-relative
/// path, so a rename changes the digest.
#[derive(Debug, Clone)]
pub struct SourceDigestBuilder {
    root: PathBuf,
}

impl SourceDigestBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ImageBuilder for SourceDigestBuilder {
    async fn build(
        &self,
        service: ServiceKind,
        profile: &ServiceProfile,
        build_spec: &str,
    ) -> Result<BuildArtifact, BuildError> {
        let source = self.root.join(&profile.source_dir);
        tracing::debug!(%service, source = %source.display(), build_spec, "Hashing service sources");

        let digest = tokio::task::spawn_blocking(move || digest_tree(&source))
            .await
            .map_err(|e| BuildError::Failed(format!("digest task failed: {}", e)))??;

        Ok(BuildArtifact { service, digest })
    }
}

/// Hex SHA-256 over every file below `dir`.
pub fn digest_tree(dir: &Path) -> Result<String, BuildError> {
    if !dir.is_dir() {
        return Err(BuildError::SourceMissing(dir.to_path_buf()));
    }

    let mut hasher = Sha256::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
        hasher.update([0u8]);
        hasher.update(std::fs::read(entry.path())?);
        hasher.update([0u8]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// An immutable deployed version of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revision {
    pub number: u64,
    pub deployed_at: DateTime<Utc>,
    pub deployment: ServiceDeployment,
}

impl Revision {
    /// Platform-style identifier, e.g. `backend-api-dev-00003`.
    pub fn id(&self) -> String {
        format!(
            "{}-{}-{:05}",
            self.deployment.service_name, self.deployment.environment, self.number
        )
    }
}

/// Deployment lifecycle of one service in one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentState {
    Absent,
    Deploying { previous: Option<Revision> },
    Live(Revision),
}

impl DeploymentState {
    pub fn live(&self) -> Option<&Revision> {
        match self {
            DeploymentState::Live(revision) => Some(revision),
            DeploymentState::Deploying { previous } => previous.as_ref(),
            DeploymentState::Absent => None,
        }
    }
}

/// Live revisions of every service in every environment.
///
/// Transitions are whole-entry replacements: a deploy either installs a new
/// revision or restores the previous state.
#[derive(Debug, Clone, Default)]
pub struct DeploymentLedger {
    states: Arc<RwLock<HashMap<(ServiceKind, Environment), DeploymentState>>>,
    /// Highest revision number ever issued, so numbers are never reused
    counters: Arc<RwLock<HashMap<(ServiceKind, Environment), u64>>>,
}

impl DeploymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state(&self, service: ServiceKind, environment: Environment) -> DeploymentState {
        self.states
            .read()
            .await
            .get(&(service, environment))
            .cloned()
            .unwrap_or(DeploymentState::Absent)
    }

    pub async fn live(&self, service: ServiceKind, environment: Environment) -> Option<Revision> {
        self.state(service, environment).await.live().cloned()
    }

    /// Enter `Deploying`. Fails if a deploy of the same service is running.
    pub async fn begin(&self, service: ServiceKind, environment: Environment) -> Result<(), PipelineError> {
        let mut states = self.states.write().await;
        let current = states
            .remove(&(service, environment))
            .unwrap_or(DeploymentState::Absent);
        let next = match current {
            DeploymentState::Absent => DeploymentState::Deploying { previous: None },
            DeploymentState::Live(revision) => DeploymentState::Deploying {
                previous: Some(revision),
            },
            deploying @ DeploymentState::Deploying { .. } => {
                states.insert((service, environment), deploying);
                return Err(PipelineError::DeployInProgress(service, environment));
            }
        };
        states.insert((service, environment), next);
        Ok(())
    }

    /// Replace the live revision with `deployment`.
    pub async fn commit(&self, deployment: ServiceDeployment) -> Revision {
        let key = (deployment.service, deployment.environment);
        let number = {
            let mut counters = self.counters.write().await;
            let counter = counters.entry(key).or_insert(0);
            *counter += 1;
            *counter
        };
        let revision = Revision {
            number,
            deployed_at: Utc::now(),
            deployment,
        };
        self.states
            .write()
            .await
            .insert(key, DeploymentState::Live(revision.clone()));
        revision
    }

    /// Abandon a deploy, restoring the previous state.
    pub async fn abort(&self, service: ServiceKind, environment: Environment) {
        let mut states = self.states.write().await;
        if let Some(DeploymentState::Deploying { previous }) = states.remove(&(service, environment)) {
            if let Some(revision) = previous {
                states.insert((service, environment), DeploymentState::Live(revision));
            }
        }
    }

    /// Remove a service from an environment.
    pub async fn decommission(&self, service: ServiceKind, environment: Environment) -> Option<Revision> {
        self.states
            .write()
            .await
            .remove(&(service, environment))
            .and_then(|state| state.live().cloned())
    }
}

/// Result of one service's pipeline.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub service: ServiceKind,
    pub result: Result<Revision, PipelineError>,
}

/// Run the pipelines of every dirty service in `plan` concurrently.
pub async fn run_pipelines(
    plan: &TriggerPlan,
    profiles: &HashMap<ServiceKind, ServiceProfile>,
    builder: &dyn ImageBuilder,
    ledger: &DeploymentLedger,
    environment: Environment,
) -> Vec<PipelineOutcome> {
    let pipelines = plan.dirty.iter().map(|(service, dirty)| async move {
        let result = match profiles.get(service) {
            Some(profile) => {
                run_pipeline(*service, profile, &dirty.build_spec, builder, ledger, environment).await
            }
            None => Err(PipelineError::Promotion(PromotionError::UnknownService(*service))),
        };
        PipelineOutcome {
            service: *service,
            result,
        }
    });

    join_all(pipelines).await
}

async fn run_pipeline(
    service: ServiceKind,
    profile: &ServiceProfile,
    build_spec: &str,
    builder: &dyn ImageBuilder,
    ledger: &DeploymentLedger,
    environment: Environment,
) -> Result<Revision, PipelineError> {
    tracing::info!(%service, %environment, build_spec, "Pipeline started");

    let artifact = builder
        .build(service, profile, build_spec)
        .await
        .map_err(|source| {
            tracing::error!(%service, %environment, error = %source, "Build failed, live revision kept");
            PipelineError::Build { service, source }
        })?;

    let deployment = promote(profile, &artifact, environment)?;

    ledger.begin(service, environment).await?;
    let revision = ledger.commit(deployment).await;

    tracing::info!(
        %service,
        %environment,
        revision = %revision.id(),
        digest = %revision.deployment.artifact_digest,
        "Pipeline finished"
    );
    Ok(revision)
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Source directory not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Failed to read sources: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to walk sources: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Build failed: {0}")]
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Build of '{service}' failed: {source}")]
    Build {
        service: ServiceKind,
        #[source]
        source: BuildError,
    },

    #[error(transparent)]
    Promotion(#[from] PromotionError),

    #[error("A deploy of '{0}' to {1} is already in progress")]
    DeployInProgress(ServiceKind, Environment),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{TriggerRule, TriggerSet};
    use std::collections::{BTreeMap, BTreeSet};

    /// Builder whose per-service result is fixed up front.
    struct ScriptedBuilder {
        failing: BTreeSet<ServiceKind>,
        digest: String,
    }

    #[async_trait]
    impl ImageBuilder for ScriptedBuilder {
        async fn build(
            &self,
            service: ServiceKind,
            _profile: &ServiceProfile,
            _build_spec: &str,
        ) -> Result<BuildArtifact, BuildError> {
            if self.failing.contains(&service) {
                Err(BuildError::Failed("docker build exited with status 1".to_string()))
            } else {
                Ok(BuildArtifact {
                    service,
                    digest: self.digest.clone(),
                })
            }
        }
    }

    fn profile(name: &str, dir: &str) -> ServiceProfile {
        ServiceProfile {
            name: name.to_string(),
            source_dir: dir.to_string(),
            scaling: Default::default(),
            env: BTreeMap::new(),
            secret_refs: BTreeSet::new(),
            environments: BTreeMap::new(),
        }
    }

    fn profiles() -> HashMap<ServiceKind, ServiceProfile> {
        HashMap::from([
            (ServiceKind::Static, profile("frontend", "frontend")),
            (ServiceKind::Api, profile("backend-api", "backend")),
        ])
    }

    fn triggers() -> TriggerSet {
        TriggerSet::new(vec![
            TriggerRule::new(ServiceKind::Static, "frontend", "frontend/cloudbuild.yaml").unwrap(),
            TriggerRule::new(ServiceKind::Api, "backend", "backend/cloudbuild.yaml").unwrap(),
        ])
        .unwrap()
    }

    fn builder(failing: &[ServiceKind], digest: &str) -> ScriptedBuilder {
        ScriptedBuilder {
            failing: failing.iter().copied().collect(),
            digest: digest.to_string(),
        }
    }

    #[tokio::test]
    async fn test_both_pipelines_deploy() {
        let ledger = DeploymentLedger::new();
        let plan = triggers().evaluate(["frontend/index.html", "backend/main.py"]);
        let outcomes = run_pipelines(&plan, &profiles(), &builder(&[], "d1"), &ledger, Environment::Dev).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        let api = ledger.live(ServiceKind::Api, Environment::Dev).await.unwrap();
        assert_eq!(api.number, 1);
        assert_eq!(api.id(), "backend-api-dev-00001");
    }

    #[tokio::test]
    async fn test_build_failure_leaves_other_service_untouched() {
        let ledger = DeploymentLedger::new();
        let plan = triggers().evaluate(["frontend/index.html", "backend/main.py"]);
        run_pipelines(&plan, &profiles(), &builder(&[], "d1"), &ledger, Environment::Dev).await;
        let static_before = ledger.live(ServiceKind::Static, Environment::Dev).await.unwrap();

        // Next push touches both; the API build fails
        let outcomes = run_pipelines(
            &plan,
            &profiles(),
            &builder(&[ServiceKind::Api], "d2"),
            &ledger,
            Environment::Dev,
        )
        .await;

        let api_outcome = outcomes.iter().find(|o| o.service == ServiceKind::Api).unwrap();
        assert!(matches!(api_outcome.result, Err(PipelineError::Build { .. })));

        // API keeps its first revision
        let api = ledger.live(ServiceKind::Api, Environment::Dev).await.unwrap();
        assert_eq!(api.number, 1);
        assert_eq!(api.deployment.artifact_digest, "d1");

        // Static advanced independently
        let static_after = ledger.live(ServiceKind::Static, Environment::Dev).await.unwrap();
        assert_eq!(static_after.number, static_before.number + 1);
        assert_eq!(static_after.deployment.artifact_digest, "d2");
    }

    #[tokio::test]
    async fn test_failure_of_untriggered_service_cannot_happen() {
        let ledger = DeploymentLedger::new();
        let plan = triggers().evaluate(["frontend/app.js"]);
        let outcomes = run_pipelines(
            &plan,
            &profiles(),
            &builder(&[ServiceKind::Api], "d1"),
            &ledger,
            Environment::Qa,
        )
        .await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].service, ServiceKind::Static);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(
            ledger.state(ServiceKind::Api, Environment::Qa).await,
            DeploymentState::Absent
        );
    }

    #[tokio::test]
    async fn test_failed_build_keeps_idle_service_revision() {
        let ledger = DeploymentLedger::new();
        let api_push = triggers().evaluate(["backend/main.py"]);
        run_pipelines(&api_push, &profiles(), &builder(&[], "d1"), &ledger, Environment::Qa).await;
        let api_before = ledger.live(ServiceKind::Api, Environment::Qa).await.unwrap();

        // Static-only push whose build fails
        let static_push = triggers().evaluate(["frontend/index.html"]);
        let outcomes = run_pipelines(
            &static_push,
            &profiles(),
            &builder(&[ServiceKind::Static], "d2"),
            &ledger,
            Environment::Qa,
        )
        .await;

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].result, Err(PipelineError::Build { .. })));
        assert_eq!(
            ledger.state(ServiceKind::Static, Environment::Qa).await,
            DeploymentState::Absent
        );

        let api_after = ledger.live(ServiceKind::Api, Environment::Qa).await.unwrap();
        assert_eq!(api_after.id(), "backend-api-qa-00001");
        assert_eq!(api_after, api_before);
    }

    #[tokio::test]
    async fn test_ledger_state_machine() {
        let ledger = DeploymentLedger::new();
        let deployment = promote(
            &profile("backend-api", "backend"),
            &BuildArtifact {
                service: ServiceKind::Api,
                digest: "d1".to_string(),
            },
            Environment::Production,
        )
        .unwrap();

        ledger.begin(ServiceKind::Api, Environment::Production).await.unwrap();
        assert!(matches!(
            ledger.begin(ServiceKind::Api, Environment::Production).await,
            Err(PipelineError::DeployInProgress(..))
        ));
        ledger.abort(ServiceKind::Api, Environment::Production).await;
        assert_eq!(
            ledger.state(ServiceKind::Api, Environment::Production).await,
            DeploymentState::Absent
        );

        ledger.begin(ServiceKind::Api, Environment::Production).await.unwrap();
        let first = ledger.commit(deployment.clone()).await;
        ledger.begin(ServiceKind::Api, Environment::Production).await.unwrap();
        assert_eq!(
            ledger.live(ServiceKind::Api, Environment::Production).await,
            Some(first.clone())
        );
        ledger.abort(ServiceKind::Api, Environment::Production).await;
        assert_eq!(
            ledger.state(ServiceKind::Api, Environment::Production).await,
            DeploymentState::Live(first.clone())
        );

        let removed = ledger.decommission(ServiceKind::Api, Environment::Production).await;
        assert_eq!(removed, Some(first));

        // Numbers keep increasing after decommission
        ledger.begin(ServiceKind::Api, Environment::Production).await.unwrap();
        assert_eq!(ledger.commit(deployment).await.number, 2);
    }

    #[test]
    fn test_digest_tree_is_stable_and_content_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("public/css")).unwrap();
        std::fs::write(dir.path().join("public/index.html"), "<h1>hi</h1>").unwrap();
        std::fs::write(dir.path().join("public/css/site.css"), "body{}").unwrap();

        let first = digest_tree(dir.path()).unwrap();
        assert_eq!(first, digest_tree(dir.path()).unwrap());
        assert_eq!(first.len(), 64);

        std::fs::write(dir.path().join("public/index.html"), "<h1>bye</h1>").unwrap();
        assert_ne!(first, digest_tree(dir.path()).unwrap());
    }

    #[test]
    fn test_digest_tree_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            digest_tree(&dir.path().join("nope")),
            Err(BuildError::SourceMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_source_digest_builder_same_sources_same_digest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("backend")).unwrap();
        std::fs::write(dir.path().join("backend/main.py"), "print('ok')").unwrap();

        let builder = SourceDigestBuilder::new(dir.path());
        let profile = profile("backend-api", "backend");
        let a = builder.build(ServiceKind::Api, &profile, "b.yaml").await.unwrap();
        let b = builder.build(ServiceKind::Api, &profile, "b.yaml").await.unwrap();
        assert_eq!(a, b);
    }
}
