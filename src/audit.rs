// ============================================================================
// Rate Limit Audit - analytics records for rate-limit decisions
// ============================================================================
//
// Every rate-limit decision can produce a record for later analysis. Writes
// go through an AuditWriter in one of two modes:
// - Deferred: a tracked background task, awaited on shutdown
// - Synchronous: awaited inline before the response is sent
//
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AuditMode;
use crate::tasks::BackgroundTasks;

/// One rate-limit decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub identifier: String,
    pub window_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_path: Option<String>,
    pub request_count: u64,
    pub limit: u32,
    pub allowed: bool,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Destination for audit records
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write(&self, record: RateLimitRecord) -> anyhow::Result<()>;
}

/// Emits records as structured log lines under the `audit` target
pub struct TracingRecordSink;

#[async_trait]
impl RecordSink for TracingRecordSink {
    async fn write(&self, record: RateLimitRecord) -> anyhow::Result<()> {
        let json = serde_json::to_string(&record)?;
        tracing::info!(target: "audit", record = %json, "rate_limit");
        Ok(())
    }
}

/// Keeps records in memory; used by tests and local debugging
#[derive(Default)]
pub struct InMemoryRecordSink {
    records: Mutex<Vec<RateLimitRecord>>,
}

impl InMemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RateLimitRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl RecordSink for InMemoryRecordSink {
    async fn write(&self, record: RateLimitRecord) -> anyhow::Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

pub struct AuditWriter {
    sink: Arc<dyn RecordSink>,
    mode: AuditMode,
    tasks: Arc<BackgroundTasks>,
}

impl AuditWriter {
    pub fn new(sink: Arc<dyn RecordSink>, mode: AuditMode, tasks: Arc<BackgroundTasks>) -> Self {
        Self { sink, mode, tasks }
    }

    pub fn mode(&self) -> AuditMode {
        self.mode
    }

    /// Hand a record to the sink. Write failures are logged, never surfaced
    /// to the request.
    pub async fn submit(&self, record: RateLimitRecord) {
        match self.mode {
            AuditMode::Synchronous => write_logged(self.sink.as_ref(), record).await,
            AuditMode::Deferred => {
                let sink = self.sink.clone();
                self.tasks.spawn("rate_limit_audit", async move {
                    write_logged(sink.as_ref(), record).await;
                });
            }
        }
    }
}

async fn write_logged(sink: &dyn RecordSink, record: RateLimitRecord) {
    let identifier = record.identifier.clone();
    if let Err(e) = sink.write(record).await {
        tracing::warn!(error = %e, identifier = %identifier, "Failed to write rate limit record");
    }
}
