//! Shared application state for API request handlers.

use std::sync::Arc;

use crate::config::RuntimeEnv;
use crate::secrets::LoadedSecrets;

/// Shared API state, cloneable across handlers via Arc-wrapped fields.
///
/// Both fields are fixed at startup; instances share nothing mutable.
#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<RuntimeEnv>,
    pub secrets: Arc<LoadedSecrets>,
}

impl ApiState {
    pub fn new(runtime: RuntimeEnv, secrets: LoadedSecrets) -> Self {
        Self {
            runtime: Arc::new(runtime),
            secrets: Arc::new(secrets),
        }
    }
}
