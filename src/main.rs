//! Frontdoor command-line entry point.
//!
//! Loads and validates the deployment manifest, initializes tracing, then
//! either runs one of the two services or evaluates the deployment rules
//! (dispatch, triggers, promotion, pipelines) offline.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use frontdoor::config::{
    AppConfig, Manifest, RuntimeEnv, SecretBackend, API_KEY_SECRET, DB_PASSWORD_SECRET,
    DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER,
};
use frontdoor::dispatch::ServiceKind;
use frontdoor::http::start_server;
use frontdoor::pipeline::{run_pipelines, DeploymentLedger, ImageBuilder, SourceDigestBuilder};
use frontdoor::promote::{promote, Environment};
use frontdoor::routes::{create_api_router, create_static_router};
use frontdoor::secrets::{resolve_secrets, EnvSecretStore, SecretManagerStore, SecretStore};
use frontdoor::state::ApiState;

/// Frontdoor: dispatch, triggers and promotion for a two-service web property
#[derive(Parser, Debug)]
#[command(name = "frontdoor", version, about)]
struct Args {
    /// Path to the deployment manifest
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level filter (e.g., "frontdoor=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the API service
    ServeApi,
    /// Run the static content service
    ServeStatic,
    /// Print the service each request path dispatches to
    Route {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Print the services a set of changed files would redeploy
    Triggers {
        #[arg(required = true)]
        changed: Vec<String>,
    },
    /// Load and validate the whole manifest
    Validate,
    /// Print the deployment of a service's current sources into an environment
    Promote {
        #[arg(long)]
        service: ServiceKind,
        #[arg(long)]
        env: Environment,
        /// Repository root the service source directories are relative to
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
    /// Run the pipelines for the services a set of changed files dirties
    Pipeline {
        #[arg(long, default_value = "dev")]
        env: Environment,
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(required = true)]
        changed: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // A manifest that fails validation is never deployed or served
    let manifest = AppConfig::load(&args.config)?.validate()?;

    // Initialize tracing with priority: CLI > RUST_LOG > LOG_LEVEL > default
    let log_filter = args
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .or_else(|| {
            std::env::var("LOG_LEVEL")
                .ok()
                .and_then(|level| level.parse::<frontdoor::promote::LogLevel>().ok())
                .map(|level| format!("frontdoor={0},tower_http={0}", level.directive()))
        })
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    init_tracing(&log_filter, manifest.config.logging.is_json());

    tracing::info!(
        config = %args.config,
        routes = manifest.dispatch.len(),
        triggers = manifest.triggers.rules().len(),
        services = manifest.config.services.len(),
        "Loaded deployment manifest"
    );

    match args.command {
        Command::ServeApi => serve_api(&manifest).await?,
        Command::ServeStatic => serve_static(&manifest).await?,
        Command::Route { paths } => {
            for path in paths {
                let rule = manifest.dispatch.matching_rule(&path);
                println!("{} -> {} (rule {})", path, rule.target, rule.pattern);
            }
        }
        Command::Triggers { changed } => {
            let plan = manifest.triggers.evaluate(&changed);
            for (service, dirty) in &plan.dirty {
                println!("{} ({})", service, dirty.build_spec);
                for path in &dirty.changed {
                    println!("  {}", path);
                }
            }
            for path in &plan.ignored {
                println!("ignored: {}", path);
            }
            if plan.is_empty() {
                println!("no service affected");
            }
        }
        Command::Validate => {
            println!("{}: ok", args.config);
            for rule in manifest.dispatch.rules() {
                println!("route {} -> {}", rule.pattern, rule.target);
            }
            for rule in manifest.triggers.rules() {
                println!("trigger {} -> {} ({})", rule.watch, rule.service, rule.build_spec);
            }
        }
        Command::Promote { service, env, root } => {
            let profile = manifest.profile(service)?;
            let builder = SourceDigestBuilder::new(root);
            let artifact = builder.build(service, profile, "local").await?;
            let deployment = promote(profile, &artifact, env)?;
            println!("{}", serde_json::to_string_pretty(&deployment)?);
        }
        Command::Pipeline { env, root, changed } => {
            let plan = manifest.triggers.evaluate(&changed);
            let builder = SourceDigestBuilder::new(root);
            let ledger = DeploymentLedger::new();
            let outcomes = run_pipelines(&plan, &manifest.profiles(), &builder, &ledger, env).await;

            let mut failed = 0;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(revision) => println!(
                        "{}: deployed {} ({})",
                        outcome.service,
                        revision.id(),
                        revision.deployment.artifact_digest
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("{}: failed: {}", outcome.service, e);
                    }
                }
            }
            if outcomes.is_empty() {
                println!("no service affected");
            }
            if failed > 0 {
                return Err(format!("{} of {} pipelines failed", failed, outcomes.len()).into());
            }
        }
    }

    Ok(())
}

fn init_tracing(filter: &str, json: bool) {
    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(filter));
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn serve_api(manifest: &Manifest) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = RuntimeEnv::from_env()?;
    let config = &manifest.config;

    tracing::info!(
        environment = %runtime.environment,
        project = ?runtime.project_id,
        log_level = runtime.log_level.as_str(),
        debug = runtime.environment.is_debug(),
        "Starting API service"
    );

    let store: Box<dyn SecretStore> = match config.secrets.backend {
        SecretBackend::Env => Box::new(EnvSecretStore::from_env()),
        SecretBackend::SecretManager => {
            let project = runtime.project_id.clone().ok_or_else(|| {
                frontdoor::ConfigError::Validation(
                    "secret-manager backend needs GCP_PROJECT_ID or GOOGLE_CLOUD_PROJECT".to_string(),
                )
            })?;
            Box::new(SecretManagerStore::new(project)?)
        }
    };

    let names: Vec<String> = match config.services.get(&ServiceKind::Api) {
        Some(profile) if !profile.secret_refs.is_empty() => {
            profile.secret_refs.iter().cloned().collect()
        }
        _ => vec![DB_PASSWORD_SECRET.to_string(), API_KEY_SECRET.to_string()],
    };
    let secrets = resolve_secrets(&*store, &names, config.secrets.policy()).await?;
    let (loaded, missing): (Vec<&str>, Vec<&str>) =
        secrets.names().partition(|name| secrets.is_loaded(name));
    tracing::info!(?loaded, ?missing, store = store.describe(), "Secrets resolved");

    let port = runtime.port.unwrap_or(config.http.port);
    let state = ApiState::new(runtime, secrets);
    let app = create_api_router(state);

    start_server(app, ServiceKind::Api, &config.http.host, port).await?;
    Ok(())
}

async fn serve_static(manifest: &Manifest) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = RuntimeEnv::from_env()?;
    let config = &manifest.config;

    tracing::info!(
        environment = %runtime.environment,
        root = %config.static_site.root,
        "Starting static content service"
    );

    let app = create_static_router(&config.static_site);
    let port = runtime.port.unwrap_or(config.http.port);
    start_server(app, ServiceKind::Static, &config.http.host, port).await?;
    Ok(())
}
