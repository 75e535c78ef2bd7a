//! Test helpers: in-process stand-ins for ComfyUI and callback receivers,
//! plus a running instance of the gateway wired to them.

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

use sd_gateway::app_state::AppState;
use sd_gateway::config::AppConfig;
use sd_gateway::models::audit::AuditEntry;
use sd_gateway::routes;

/// Smallest byte string `image::guess_format` recognises as PNG.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR test image payload";

/// An address nothing listens on.
pub const DEAD_URL: &str = "http://127.0.0.1:9";

/// Serve `router` on an ephemeral port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });
    format!("http://{addr}")
}

#[derive(Debug, Clone, Copy)]
pub enum ComfyBehavior {
    Succeed,
    NeverFinish,
    RejectPrompt,
    ExecutionError,
}

#[derive(Clone)]
struct ComfyState {
    behavior: ComfyBehavior,
    workflows: Arc<Mutex<Vec<Value>>>,
}

/// Fake ComfyUI server.
pub struct MockComfy {
    pub url: String,
    workflows: Arc<Mutex<Vec<Value>>>,
}

impl MockComfy {
    /// Workflow graphs submitted to `/prompt`, in order.
    pub fn workflows(&self) -> Vec<Value> {
        self.workflows.lock().unwrap().clone()
    }
}

pub async fn spawn_mock_comfyui(behavior: ComfyBehavior) -> MockComfy {
    let workflows = Arc::new(Mutex::new(Vec::new()));
    let state = ComfyState {
        behavior,
        workflows: workflows.clone(),
    };

    let router = Router::new()
        .route("/prompt", post(queue_prompt))
        .route("/history/{prompt_id}", get(history))
        .route("/view", get(|| async { ([("content-type", "image/png")], PNG_BYTES) }))
        .route("/system_stats", get(|| async { Json(json!({ "system": {} })) }))
        .route(
            "/object_info/CheckpointLoaderSimple",
            get(|| async {
                Json(json!({
                    "CheckpointLoaderSimple": { "input": { "required": {
                        "ckpt_name": [["juggernautXL_v9.safetensors", "realvis.safetensors"]]
                    }}}
                }))
            }),
        )
        .with_state(state);

    MockComfy {
        url: serve(router).await,
        workflows,
    }
}

async fn queue_prompt(
    State(state): State<ComfyState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if let ComfyBehavior::RejectPrompt = state.behavior {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": { "type": "prompt_outputs_failed_validation" } })),
        );
    }
    let mut workflows = state.workflows.lock().unwrap();
    workflows.push(body["prompt"].clone());
    let prompt_id = format!("prompt-{}", workflows.len());
    (StatusCode::OK, Json(json!({ "prompt_id": prompt_id, "number": 0 })))
}

async fn history(State(state): State<ComfyState>, Path(prompt_id): Path<String>) -> Json<Value> {
    let body = match state.behavior {
        ComfyBehavior::NeverFinish | ComfyBehavior::RejectPrompt => json!({}),
        ComfyBehavior::ExecutionError => json!({
            prompt_id: { "outputs": {}, "status": { "status_str": "error", "completed": false } }
        }),
        ComfyBehavior::Succeed => json!({
            prompt_id: {
                "outputs": { "9": { "images": [
                    { "filename": "sdgw_00001_.png", "subfolder": "", "type": "output" }
                ]}},
                "status": { "status_str": "success", "completed": true }
            }
        }),
    };
    Json(body)
}

/// Records every callback POST and answers with a fixed status.
pub struct CallbackReceiver {
    pub url: String,
    received: Arc<Mutex<Vec<Value>>>,
}

impl CallbackReceiver {
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }
}

pub async fn spawn_callback_receiver(status: StatusCode) -> CallbackReceiver {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let router = Router::new().route(
        "/hook",
        post(move |Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(body);
                status
            }
        }),
    );
    let base = serve(router).await;
    CallbackReceiver {
        url: format!("{base}/hook"),
        received,
    }
}

/// A running gateway with its own output dir and audit file.
pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    pub audit_path: PathBuf,
    pub output_dir: PathBuf,
    _dir: TempDir,
}

pub async fn spawn_app(comfyui_url: &str, overrides: &[(&str, &str)]) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let output_dir = dir.path().join("output");
    let audit_path = dir.path().join("audit.jsonl");

    let mut vars: Vec<(String, String)> = vec![
        ("COMFYUI_URL".into(), comfyui_url.into()),
        ("OUTPUT_DIR".into(), output_dir.display().to_string()),
        ("AUDIT_LOG_PATH".into(), audit_path.display().to_string()),
        ("BACKEND_POLL_INTERVAL_MS".into(), "20".into()),
        ("BACKEND_SUBMIT_TIMEOUT_SECS".into(), "2".into()),
        ("CALLBACK_BASE_BACKOFF_MS".into(), "20".into()),
        ("CALLBACK_MAX_BACKOFF_MS".into(), "100".into()),
        ("CALLBACK_TIMEOUT_SECS".into(), "2".into()),
    ];
    vars.extend(overrides.iter().map(|(k, v)| (k.to_string(), v.to_string())));

    let config: AppConfig = envy::from_iter(vars).expect("test config");
    let state = AppState::from_config(config).expect("app state");
    let base_url = serve(routes::router(state, None)).await;

    TestApp {
        base_url,
        client: reqwest::Client::new(),
        audit_path,
        output_dir,
        _dir: dir,
    }
}

impl TestApp {
    pub async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .expect("request failed")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("request failed")
    }

    /// Audit entries written so far, in order.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        std::fs::read_to_string(&self.audit_path)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).expect("audit line"))
            .collect()
    }

    pub fn audit_entries_for(&self, request_id: &str) -> Vec<AuditEntry> {
        self.audit_entries()
            .into_iter()
            .filter(|e| e.request_id == request_id)
            .collect()
    }

    /// Poll `/jobs/{id}` until `done` holds (5 second limit).
    pub async fn wait_for_job(&self, request_id: &str, done: impl Fn(&Value) -> bool) -> Value {
        for _ in 0..250 {
            let response = self.get(&format!("/jobs/{request_id}")).await;
            if response.status().is_success() {
                let body: Value = response.json().await.expect("job json");
                if done(&body) {
                    return body;
                }
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("job {request_id} did not reach the expected state");
    }
}

/// Job has finished generating and has nothing left to deliver.
pub fn settled(job: &Value) -> bool {
    let terminal = matches!(job["status"].as_str(), Some("completed" | "failed"));
    terminal && job["delivery"] != "pending"
}
