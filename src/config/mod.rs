use serde::Deserialize;
use std::time::Duration;

use crate::services::callback::RetryPolicy;
use crate::services::policy::PolicyConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// ComfyUI server URL
    #[serde(default = "default_comfyui_url")]
    pub comfyui_url: String,

    /// Bearer token for the API. Empty disables auth.
    #[serde(default)]
    pub api_key: String,

    /// Directory generated images are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// SD checkpoint name passed to the backend
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Prompt safety filter toggle. Augmentation clauses are applied either way.
    #[serde(default = "default_true")]
    pub enable_safety: bool,

    /// Comma-separated extra terms rejected as `other-blocked-term`
    #[serde(default)]
    pub extra_blocked_terms: Option<String>,

    #[serde(default = "default_steps")]
    pub default_steps: u32,
    #[serde(default = "default_cfg")]
    pub default_cfg: f64,
    #[serde(default = "default_dimension")]
    pub default_width: u32,
    #[serde(default = "default_dimension")]
    pub default_height: u32,

    #[serde(default = "default_min_steps")]
    pub min_steps: u32,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_min_cfg")]
    pub min_cfg: f64,
    #[serde(default = "default_max_cfg")]
    pub max_cfg: f64,
    #[serde(default = "default_min_dimension")]
    pub min_dimension: u32,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    /// Wall-clock budget for one render, submission to artifact
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
    #[serde(default = "default_backend_poll_interval_ms")]
    pub backend_poll_interval_ms: u64,
    #[serde(default = "default_backend_submit_timeout_secs")]
    pub backend_submit_timeout_secs: u64,

    #[serde(default = "default_callback_max_attempts")]
    pub callback_max_attempts: u32,
    #[serde(default = "default_callback_base_backoff_ms")]
    pub callback_base_backoff_ms: u64,
    #[serde(default = "default_callback_max_backoff_ms")]
    pub callback_max_backoff_ms: u64,
    #[serde(default = "default_callback_timeout_secs")]
    pub callback_timeout_secs: u64,

    /// Optional JSONL file the audit trail is appended to
    #[serde(default)]
    pub audit_log_path: Option<String>,

    /// How long settled jobs stay queryable
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,
}

/// Parameters used when a request leaves a field unset.
#[derive(Debug, Clone)]
pub struct GenerationDefaults {
    pub steps: u32,
    pub cfg_scale: f64,
    pub width: u32,
    pub height: u32,
}

/// Inclusive bounds enforced on inbound generation parameters.
#[derive(Debug, Clone)]
pub struct GenerationBounds {
    pub min_steps: u32,
    pub max_steps: u32,
    pub min_cfg: f64,
    pub max_cfg: f64,
    pub min_dimension: u32,
    pub max_dimension: u32,
}

impl Default for GenerationBounds {
    fn default() -> Self {
        Self {
            min_steps: default_min_steps(),
            max_steps: default_max_steps(),
            min_cfg: default_min_cfg(),
            max_cfg: default_max_cfg(),
            min_dimension: default_min_dimension(),
            max_dimension: default_max_dimension(),
        }
    }
}

/// Connection settings for the rendering backend.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub base_url: String,
    pub model_name: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub submit_timeout: Duration,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_comfyui_url() -> String {
    "http://127.0.0.1:8188".to_string()
}

fn default_output_dir() -> String {
    "/workspace/ComfyUI/output".to_string()
}

fn default_model_name() -> String {
    "juggernautXL_v9.safetensors".to_string()
}

fn default_true() -> bool {
    true
}

fn default_steps() -> u32 {
    32
}

fn default_cfg() -> f64 {
    6.0
}

fn default_dimension() -> u32 {
    1024
}

fn default_min_steps() -> u32 {
    1
}

fn default_max_steps() -> u32 {
    150
}

fn default_min_cfg() -> f64 {
    1.0
}

fn default_max_cfg() -> f64 {
    30.0
}

fn default_min_dimension() -> u32 {
    256
}

fn default_max_dimension() -> u32 {
    2048
}

fn default_backend_timeout_secs() -> u64 {
    300 // first run on a cold pod includes checkpoint loading
}

fn default_backend_poll_interval_ms() -> u64 {
    1000
}

fn default_backend_submit_timeout_secs() -> u64 {
    30
}

fn default_callback_max_attempts() -> u32 {
    5
}

fn default_callback_base_backoff_ms() -> u64 {
    1000
}

fn default_callback_max_backoff_ms() -> u64 {
    30_000
}

fn default_callback_timeout_secs() -> u64 {
    10
}

fn default_job_retention_secs() -> u64 {
    3600
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn generation_defaults(&self) -> GenerationDefaults {
        GenerationDefaults {
            steps: self.default_steps,
            cfg_scale: self.default_cfg,
            width: self.default_width,
            height: self.default_height,
        }
    }

    pub fn generation_bounds(&self) -> GenerationBounds {
        GenerationBounds {
            min_steps: self.min_steps,
            max_steps: self.max_steps,
            min_cfg: self.min_cfg,
            max_cfg: self.max_cfg,
            min_dimension: self.min_dimension,
            max_dimension: self.max_dimension,
        }
    }

    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            base_url: self.comfyui_url.trim_end_matches('/').to_string(),
            model_name: self.model_name.clone(),
            timeout: Duration::from_secs(self.backend_timeout_secs),
            poll_interval: Duration::from_millis(self.backend_poll_interval_ms),
            submit_timeout: Duration::from_secs(self.backend_submit_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.callback_max_attempts.max(1),
            base_backoff: Duration::from_millis(self.callback_base_backoff_ms),
            max_backoff: Duration::from_millis(self.callback_max_backoff_ms),
        }
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    /// Build the immutable safety policy. Called once at startup.
    pub fn policy_config(&self) -> PolicyConfig {
        let extra = self
            .extra_blocked_terms
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        PolicyConfig::builtin(self.enable_safety, extra)
    }
}
