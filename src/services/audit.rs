use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

use crate::models::audit::AuditEntry;

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Appends one JSON object per line to a file.
pub struct JsonlFileSink {
    path: PathBuf,
    // keeps concurrent lines from interleaving
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl AuditSink for JsonlFileSink {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry).map_err(AuditError::Serialize)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(AuditError::Io)?;
        file.write_all(&line).await.map_err(AuditError::Io)?;
        file.flush().await.map_err(AuditError::Io)?;
        Ok(())
    }
}

/// In-process sink, used when no audit file is configured and by tests.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn entries_for(&self, request_id: &str) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.request_id == request_id)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .map_err(|_| AuditError::Poisoned)?
            .push(entry.clone());
        Ok(())
    }
}

/// Append-only audit trail. Recording never fails the caller: sink errors are
/// logged on the operational channel and dropped.
pub struct AuditLog {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditLog {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }

    pub async fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "audit",
            event = %entry.event,
            request_id = %entry.request_id,
            user_id = entry.user_id.as_deref().unwrap_or("-"),
            outcome = %entry.outcome,
            reason = entry.reason.as_ref().map(AsRef::<str>::as_ref).unwrap_or("-"),
            success = ?entry.success,
            image_hash = entry.image_hash.as_deref().unwrap_or(""),
            "Audit entry"
        );

        for sink in &self.sinks {
            if let Err(e) = sink.append(&entry).await {
                tracing::error!(
                    request_id = %entry.request_id,
                    event = %entry.event,
                    error = %e,
                    "Failed to persist audit entry"
                );
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("audit sink lock poisoned")]
    Poisoned,
}
