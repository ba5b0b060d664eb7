//! Transfer gateways
//!
//! A gateway hands a batch to the bank. `OutboxGateway` drops each batch as a
//! JSON file for an external uploader; `MockGateway` records batches in
//! memory for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{TransferError, TransferResult};
use crate::model::TransferBatch;

/// Acknowledgement from the gateway for one transmitted batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayAck {
    pub batch_id: Uuid,
    /// Gateway's reference for the transmission (file name, upload id)
    pub reference: String,
    pub entry_count: usize,
}

#[async_trait]
pub trait TransferGateway: Send + Sync {
    /// Transmit a batch. Must not return Ok unless the bank side has it.
    async fn transmit(&self, batch: &TransferBatch) -> TransferResult<GatewayAck>;

    fn name(&self) -> &str;
}

/// Writes `batch-<id>.json` into a directory
pub struct OutboxGateway {
    dir: PathBuf,
}

impl OutboxGateway {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl TransferGateway for OutboxGateway {
    async fn transmit(&self, batch: &TransferBatch) -> TransferResult<GatewayAck> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| TransferError::Gateway(format!("create {}: {e}", self.dir.display())))?;

        let path = self.dir.join(format!("batch-{}.json", batch.id));
        let body = serde_json::to_vec_pretty(batch)?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| TransferError::Gateway(format!("write {}: {e}", path.display())))?;

        Ok(GatewayAck {
            batch_id: batch.id,
            reference: path.display().to_string(),
            entry_count: batch.entries.len(),
        })
    }

    fn name(&self) -> &str {
        "outbox"
    }
}

/// In-memory gateway for tests
#[derive(Default)]
pub struct MockGateway {
    sent: Mutex<Vec<TransferBatch>>,
    fail_with: Mutex<Option<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following transmit fail with `reason`
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.fail_with.lock() = Some(reason.into());
    }

    pub fn sent(&self) -> Vec<TransferBatch> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl TransferGateway for MockGateway {
    async fn transmit(&self, batch: &TransferBatch) -> TransferResult<GatewayAck> {
        if let Some(reason) = self.fail_with.lock().clone() {
            return Err(TransferError::Gateway(reason));
        }
        self.sent.lock().push(batch.clone());
        Ok(GatewayAck {
            batch_id: batch.id,
            reference: format!("mock-{}", batch.id),
            entry_count: batch.entries.len(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
