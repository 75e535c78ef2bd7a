//! Rendering backend client.
//!
//! `ComfyUiClient` is the only code that talks to the GPU backend. It turns
//! effective prompts and parameters into a ComfyUI workflow graph, submits
//! it, waits for the artifact under a wall-clock budget, and stores the
//! image. Nothing here retries; callers own retry policy.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strum::Display;
use tokio::time::sleep;

use crate::config::BackendSettings;
use crate::models::generation::{GenerationParams, RenderResult};
use crate::models::policy::EffectivePrompts;
use crate::services::storage::{ImageStore, StorageError};

/// Seam over the rendering service so the coordinator can be driven by
/// other backends (and test doubles).
#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn render(
        &self,
        prompts: &EffectivePrompts,
        params: &GenerationParams,
    ) -> Result<RenderResult, BackendError>;

    /// Cheap reachability probe for health checks.
    async fn health(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Checkpoints the backend can load.
    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("rendering backend unreachable: {0}")]
    Unreachable(String),

    #[error("generation timeout after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("rendering backend rejected the job: {0}")]
    BackendRejected(String),

    #[error("rendering backend fault: {0}")]
    BackendFault(String),
}

/// Serializable discriminant of [`BackendError`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackendErrorKind {
    Unreachable,
    Timeout,
    BackendRejected,
    BackendFault,
}

impl BackendError {
    pub fn kind(&self) -> BackendErrorKind {
        match self {
            BackendError::Unreachable(_) => BackendErrorKind::Unreachable,
            BackendError::Timeout(_) => BackendErrorKind::Timeout,
            BackendError::BackendRejected(_) => BackendErrorKind::BackendRejected,
            BackendError::BackendFault(_) => BackendErrorKind::BackendFault,
        }
    }

    fn from_transport(err: reqwest::Error, budget: Duration) -> Self {
        if err.is_timeout() {
            BackendError::Timeout(budget)
        } else if err.is_connect() || err.is_request() {
            BackendError::Unreachable(err.to_string())
        } else {
            BackendError::BackendFault(err.to_string())
        }
    }
}

impl From<StorageError> for BackendError {
    fn from(err: StorageError) -> Self {
        BackendError::BackendFault(format!("could not store artifact: {err}"))
    }
}

#[derive(Deserialize)]
struct QueuePromptResponse {
    prompt_id: String,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    outputs: BTreeMap<String, NodeOutput>,
    #[serde(default)]
    status: Option<HistoryStatus>,
}

#[derive(Debug, Deserialize)]
struct NodeOutput {
    #[serde(default)]
    images: Vec<ImageInfo>,
}

#[derive(Debug, Deserialize)]
struct ImageInfo {
    filename: String,
    #[serde(default)]
    subfolder: String,
    #[serde(rename = "type", default = "default_image_type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct HistoryStatus {
    #[serde(default)]
    status_str: Option<String>,
}

fn default_image_type() -> String {
    "output".to_string()
}

/// Client for a ComfyUI server running an SDXL checkpoint.
pub struct ComfyUiClient {
    http: Client,
    settings: BackendSettings,
    store: Arc<ImageStore>,
}

impl ComfyUiClient {
    pub fn new(settings: BackendSettings, store: Arc<ImageStore>) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(settings.submit_timeout)
            .build()
            .map_err(|e| BackendError::BackendFault(e.to_string()))?;

        Ok(Self {
            http,
            settings,
            store,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url, path)
    }

    async fn queue_prompt(&self, workflow: Value) -> Result<String, BackendError> {
        let response = self
            .http
            .post(self.url("/prompt"))
            .json(&json!({ "prompt": workflow }))
            .send()
            .await
            .map_err(|e| BackendError::from_transport(e, self.settings.submit_timeout))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::BackendRejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::BackendFault(format!("{status}: {body}")));
        }

        let queued: QueuePromptResponse = response
            .json()
            .await
            .map_err(|e| BackendError::BackendFault(format!("bad /prompt response: {e}")))?;
        Ok(queued.prompt_id)
    }

    /// Poll `/history/{id}` until the prompt shows up. The caller bounds
    /// the total wait.
    async fn wait_for_completion(&self, prompt_id: &str) -> Result<HistoryEntry, BackendError> {
        loop {
            let response = self
                .http
                .get(self.url(&format!("/history/{prompt_id}")))
                .send()
                .await
                .map_err(|e| BackendError::from_transport(e, self.settings.timeout))?;

            if response.status() == StatusCode::OK {
                let mut history: BTreeMap<String, HistoryEntry> = response
                    .json()
                    .await
                    .map_err(|e| BackendError::BackendFault(format!("bad history payload: {e}")))?;
                if let Some(entry) = history.remove(prompt_id) {
                    return Ok(entry);
                }
            }

            tracing::trace!(prompt_id = %prompt_id, "Render not finished, polling again");
            sleep(self.settings.poll_interval).await;
        }
    }

    async fn fetch_image(&self, entry: &HistoryEntry) -> Result<Vec<u8>, BackendError> {
        if let Some(status) = entry.status.as_ref().and_then(|s| s.status_str.as_deref()) {
            if status == "error" {
                return Err(BackendError::BackendFault(
                    "backend reported an execution error".to_string(),
                ));
            }
        }

        let image = entry
            .outputs
            .values()
            .flat_map(|node| node.images.iter())
            .next()
            .ok_or_else(|| BackendError::BackendFault("no image found in output".to_string()))?;

        let response = self
            .http
            .get(self.url("/view"))
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.kind.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BackendError::from_transport(e, self.settings.timeout))?;

        if !response.status().is_success() {
            return Err(BackendError::BackendFault(format!(
                "fetching {} failed with {}",
                image.filename,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::from_transport(e, self.settings.timeout))?;
        Ok(bytes.to_vec())
    }

    async fn run_workflow(&self, workflow: Value) -> Result<Vec<u8>, BackendError> {
        let prompt_id = self.queue_prompt(workflow).await?;
        tracing::debug!(prompt_id = %prompt_id, "Workflow queued on backend");
        let entry = self.wait_for_completion(&prompt_id).await?;
        self.fetch_image(&entry).await
    }
}

#[async_trait]
impl RenderBackend for ComfyUiClient {
    async fn render(
        &self,
        prompts: &EffectivePrompts,
        params: &GenerationParams,
    ) -> Result<RenderResult, BackendError> {
        let start = Instant::now();
        let workflow = build_workflow(prompts, params, &self.settings.model_name);

        let image_bytes =
            match tokio::time::timeout(self.settings.timeout, self.run_workflow(workflow)).await {
                Ok(result) => result?,
                Err(_) => return Err(BackendError::Timeout(self.settings.timeout)),
            };

        let stored = self.store.save(&image_bytes).await?;
        let latency = start.elapsed();

        metrics::histogram!("backend_render_seconds").record(latency.as_secs_f64());
        tracing::info!(
            image_hash = %stored.hash,
            seed = params.seed,
            latency_ms = latency.as_millis() as u64,
            "Render complete"
        );

        Ok(RenderResult {
            image_url: format!("/images/{}", stored.filename),
            image_ref: stored.filename,
            image_hash: stored.hash,
            seed_used: params.seed,
            latency_ms: latency.as_millis() as u64,
        })
    }

    async fn health(&self) -> Result<(), BackendError> {
        let response = self
            .http
            .get(self.url("/system_stats"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| BackendError::from_transport(e, Duration::from_secs(5)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::BackendFault(format!(
                "system_stats returned {}",
                response.status()
            )))
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let response = self
            .http
            .get(self.url("/object_info/CheckpointLoaderSimple"))
            .send()
            .await
            .map_err(|e| BackendError::from_transport(e, self.settings.submit_timeout))?;

        if !response.status().is_success() {
            return Err(BackendError::BackendFault(format!(
                "object_info returned {}",
                response.status()
            )));
        }

        let info: Value = response
            .json()
            .await
            .map_err(|e| BackendError::BackendFault(e.to_string()))?;

        let models = info
            .pointer("/CheckpointLoaderSimple/input/required/ckpt_name/0")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }
}

/// SDXL txt2img graph tuned for Juggernaut-XL.
pub fn build_workflow(
    prompts: &EffectivePrompts,
    params: &GenerationParams,
    model_name: &str,
) -> Value {
    json!({
        "3": {
            "class_type": "KSampler",
            "inputs": {
                "seed": params.seed,
                "steps": params.steps,
                "cfg": params.cfg_scale,
                "sampler_name": "dpmpp_2m",
                "scheduler": "karras",
                "denoise": 1.0,
                "model": ["4", 0],
                "positive": ["6", 0],
                "negative": ["7", 0],
                "latent_image": ["5", 0]
            }
        },
        "4": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": model_name }
        },
        "5": {
            "class_type": "EmptyLatentImage",
            "inputs": {
                "width": params.width,
                "height": params.height,
                "batch_size": 1
            }
        },
        "6": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": prompts.positive, "clip": ["4", 1] }
        },
        "7": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": prompts.negative, "clip": ["4", 1] }
        },
        "8": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["3", 0], "vae": ["4", 2] }
        },
        "9": {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": "sdgw", "images": ["8", 0] }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_carries_prompts_and_params() {
        let prompts = EffectivePrompts {
            positive: "a lighthouse, adult".to_string(),
            negative: "blurry".to_string(),
        };
        let params = GenerationParams {
            seed: 42,
            steps: 20,
            cfg_scale: 5.5,
            width: 832,
            height: 1216,
        };

        let workflow = build_workflow(&prompts, &params, "sdxl.safetensors");
        assert_eq!(workflow["3"]["inputs"]["seed"], 42);
        assert_eq!(workflow["3"]["inputs"]["steps"], 20);
        assert_eq!(workflow["3"]["inputs"]["cfg"], 5.5);
        assert_eq!(workflow["4"]["inputs"]["ckpt_name"], "sdxl.safetensors");
        assert_eq!(workflow["5"]["inputs"]["width"], 832);
        assert_eq!(workflow["5"]["inputs"]["height"], 1216);
        assert_eq!(workflow["6"]["inputs"]["text"], "a lighthouse, adult");
        assert_eq!(workflow["7"]["inputs"]["text"], "blurry");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            BackendError::Timeout(Duration::from_secs(3)).kind(),
            BackendErrorKind::Timeout
        );
        assert_eq!(
            BackendError::Timeout(Duration::from_secs(300)).to_string(),
            "generation timeout after 300s"
        );
        assert_eq!(BackendErrorKind::BackendRejected.to_string(), "backend_rejected");
        let storage: BackendError = StorageError::NotAnImage.into();
        assert_eq!(storage.kind(), BackendErrorKind::BackendFault);
    }

    async fn client_for(router: axum::Router) -> (ComfyUiClient, tempfile::TempDir) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ImageStore::new(dir.path()).unwrap());
        let settings = BackendSettings {
            base_url: format!("http://{addr}"),
            model_name: "sdxl.safetensors".to_string(),
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            submit_timeout: Duration::from_secs(2),
        };
        (ComfyUiClient::new(settings, store).unwrap(), dir)
    }

    #[tokio::test]
    async fn test_list_models_reads_checkpoint_names() {
        let router = axum::Router::new().route(
            "/object_info/CheckpointLoaderSimple",
            axum::routing::get(|| async {
                axum::Json(json!({
                    "CheckpointLoaderSimple": { "input": { "required": {
                        "ckpt_name": [["a.safetensors", "b.safetensors"]]
                    }}}
                }))
            }),
        );
        let (client, _dir) = client_for(router).await;

        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["a.safetensors", "b.safetensors"]);
    }

    #[tokio::test]
    async fn test_list_models_surfaces_backend_error_status() {
        let router = axum::Router::new().route(
            "/object_info/CheckpointLoaderSimple",
            axum::routing::get(|| async {
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    axum::Json(json!({ "error": "node registry not loaded" })),
                )
            }),
        );
        let (client, _dir) = client_for(router).await;

        let err = client.list_models().await.unwrap_err();
        assert_eq!(err.kind(), BackendErrorKind::BackendFault);
        assert!(err.to_string().contains("500"));
    }
}
