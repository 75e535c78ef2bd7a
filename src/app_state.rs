use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    audit::{AuditLog, AuditSink, JsonlFileSink},
    callback::{CallbackError, HttpCallbackSender},
    coordinator::JobCoordinator,
    generation::GenerationService,
    policy::PromptPolicyEngine,
    render::{BackendError, ComfyUiClient, RenderBackend},
    storage::{ImageStore, StorageError},
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub generation: Arc<GenerationService>,
    pub backend: Arc<dyn RenderBackend>,
    pub images: Arc<ImageStore>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        generation: GenerationService,
        backend: Arc<dyn RenderBackend>,
        images: Arc<ImageStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            generation: Arc::new(generation),
            backend,
            images,
        }
    }

    /// Wire the production components from configuration.
    pub fn from_config(config: AppConfig) -> Result<Self, StartupError> {
        tracing::info!(output_dir = %config.output_dir, "Initializing image store");
        let images = Arc::new(ImageStore::new(&config.output_dir)?);

        tracing::info!(comfyui_url = %config.comfyui_url, model = %config.model_name, "Initializing ComfyUI client");
        let backend: Arc<dyn RenderBackend> =
            Arc::new(ComfyUiClient::new(config.backend_settings(), images.clone())?);

        let mut sinks: Vec<Arc<dyn AuditSink>> = Vec::new();
        if let Some(path) = &config.audit_log_path {
            tracing::info!(path = %path, "Audit trail persisted to file");
            sinks.push(Arc::new(JsonlFileSink::new(path)));
        }
        let audit = Arc::new(AuditLog::new(sinks));

        let callbacks = Arc::new(HttpCallbackSender::new(config.callback_timeout())?);
        let coordinator =
            JobCoordinator::new(backend.clone(), callbacks, audit.clone(), config.retry_policy());

        // Built once; never mutated at request time.
        let policy = PromptPolicyEngine::new(Arc::new(config.policy_config()));
        if !policy.config().enabled {
            tracing::warn!("Prompt safety filter is DISABLED");
        }

        let generation = GenerationService::new(
            policy,
            backend.clone(),
            coordinator,
            audit,
            config.generation_defaults(),
            config.generation_bounds(),
        );

        Ok(Self::new(config, generation, backend, images))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("image store: {0}")]
    Storage(#[from] StorageError),

    #[error("backend client: {0}")]
    Backend(#[from] BackendError),

    #[error("callback client: {0}")]
    Callback(#[from] CallbackError),
}
