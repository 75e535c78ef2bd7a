use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::models::generation::{GenerationRequest, RenderResult};
use crate::models::policy::EffectivePrompts;
use crate::services::render::BackendErrorKind;

/// Generation state of an async job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Callback delivery sub-state, meaningful once the job is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryState {
    NotNeeded,
    Pending,
    Delivered,
    Exhausted,
}

/// Backend failure captured on a failed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFailure {
    pub kind: BackendErrorKind,
    pub message: String,
}

/// An async generation job. Owned and mutated only by the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub request_id: String,
    /// Distinguishes a resubmitted job from the one it superseded.
    #[serde(skip)]
    pub epoch: u64,
    pub state: JobState,
    pub delivery: DeliveryState,
    pub request: GenerationRequest,
    pub prompts: EffectivePrompts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<RenderResult>,
    pub error: Option<JobFailure>,
    pub callback_attempts: u32,
}

impl Job {
    pub fn new(request: GenerationRequest, prompts: EffectivePrompts, epoch: u64) -> Self {
        let now = Utc::now();
        let delivery = if request.callback_url.is_some() {
            DeliveryState::Pending
        } else {
            DeliveryState::NotNeeded
        };

        Self {
            request_id: request.request_id.clone(),
            epoch,
            state: JobState::Queued,
            delivery,
            request,
            prompts,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
            callback_attempts: 0,
        }
    }

    /// Terminal generation with nothing left to deliver. Only settled jobs
    /// may be replaced by a resubmission of the same request id.
    pub fn is_settled(&self) -> bool {
        self.state.is_terminal() && self.delivery != DeliveryState::Pending
    }
}

/// Response for `GET /jobs/{request_id}`.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub request_id: String,
    pub status: JobState,
    pub delivery: DeliveryState,
    pub callback_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<RenderResult>,
    pub error: Option<JobFailure>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            request_id: job.request_id,
            status: job.state,
            delivery: job.delivery,
            callback_attempts: job.callback_attempts,
            created_at: job.created_at,
            updated_at: job.updated_at,
            result: job.result,
            error: job.error,
        }
    }
}
