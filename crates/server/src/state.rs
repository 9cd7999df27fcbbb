use avatar_prep_core::{Config, PipelineOrchestrator, SanitizedConfig};
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Option<Arc<PipelineOrchestrator>>,
}

impl AppState {
    pub fn new(config: Config, orchestrator: Option<Arc<PipelineOrchestrator>>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    /// The orchestrator, if an inference service is configured.
    pub fn orchestrator(&self) -> Option<&Arc<PipelineOrchestrator>> {
        self.orchestrator.as_ref()
    }
}
