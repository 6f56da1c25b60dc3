//! Batched upsert of question records with a per-record fallback.
//!
//! Each batch is first sent as one upsert keyed by `q_id`. If that call fails
//! for any reason, every record of the batch is retried on its own: looked up
//! by key, then updated or inserted. Batches run strictly one after another.
use serde_json::Value;
use tracing::{debug, info, warn};

use super::record::QuestionRecord;
use super::store::ContentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Written by the bulk upsert.
    Upserted,
    /// Existing row updated by the fallback.
    Updated,
    /// New row inserted by the fallback.
    Inserted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Written(WriteKind),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPath {
    Bulk,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub path: BatchPath,
    /// `(q_id, outcome)` in batch order.
    pub records: Vec<(String, RecordOutcome)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub batches: usize,
    pub fallback_batches: usize,
    pub upserted: usize,
    pub updated: usize,
    pub inserted: usize,
    pub failures: Vec<(String, String)>,
}

impl SyncSummary {
    pub fn written(&self) -> usize {
        self.upserted + self.updated + self.inserted
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    fn absorb(&mut self, batch: BatchOutcome) {
        self.batches += 1;
        if batch.path == BatchPath::Fallback {
            self.fallback_batches += 1;
        }
        for (id, outcome) in batch.records {
            match outcome {
                RecordOutcome::Written(WriteKind::Upserted) => self.upserted += 1,
                RecordOutcome::Written(WriteKind::Updated) => self.updated += 1,
                RecordOutcome::Written(WriteKind::Inserted) => self.inserted += 1,
                RecordOutcome::Failed(reason) => self.failures.push((id, reason)),
            }
        }
    }
}

async fn write_one(store: &dyn ContentStore, id: &str, row: &Value) -> anyhow::Result<WriteKind> {
    match store.find_by_key(id).await? {
        Some(_) => match store.update_by_key(id, row).await? {
            0 => anyhow::bail!("update matched no rows"),
            _ => Ok(WriteKind::Updated),
        },
        None => {
            store.insert_row(row).await?;
            Ok(WriteKind::Inserted)
        }
    }
}

/// Write one batch, falling back to record-by-record on bulk failure.
/// Never returns an error: failures are reported per record.
pub async fn upsert_batch(store: &dyn ContentStore, batch: &[QuestionRecord]) -> BatchOutcome {
    let rows: Vec<Value> = batch.iter().map(QuestionRecord::to_row).collect();

    match store.upsert_rows(&rows).await {
        Ok(_) => BatchOutcome {
            path: BatchPath::Bulk,
            records: batch
                .iter()
                .map(|r| (r.id.clone(), RecordOutcome::Written(WriteKind::Upserted)))
                .collect(),
        },
        Err(e) => {
            warn!(target = "sync", store = store.name(), size = batch.len(), error = %e, "batch upsert failed; falling back to individual writes");
            let mut records = Vec::with_capacity(batch.len());
            for (rec, row) in batch.iter().zip(&rows) {
                let outcome = match write_one(store, &rec.id, row).await {
                    Ok(kind) => {
                        debug!(target = "sync", q_id = %rec.id, ?kind, "fallback write");
                        RecordOutcome::Written(kind)
                    }
                    Err(e) => {
                        warn!(target = "sync", q_id = %rec.id, error = %e, "record failed");
                        RecordOutcome::Failed(e.to_string())
                    }
                };
                records.push((rec.id.clone(), outcome));
            }
            BatchOutcome {
                path: BatchPath::Fallback,
                records,
            }
        }
    }
}

/// Upsert all records in fixed-size batches (a size of 0 is treated as 1).
pub async fn upsert_records(
    store: &dyn ContentStore,
    records: &[QuestionRecord],
    batch_size: usize,
) -> SyncSummary {
    let batch_size = batch_size.max(1);
    let mut summary = SyncSummary::default();
    for (i, batch) in records.chunks(batch_size).enumerate() {
        let outcome = upsert_batch(store, batch).await;
        debug!(target = "sync", batch = i, path = ?outcome.path, "batch done");
        summary.absorb(outcome);
    }
    info!(
        target = "sync",
        store = store.name(),
        batches = summary.batches,
        fallback_batches = summary.fallback_batches,
        written = summary.written(),
        failed = summary.failed(),
        "upsert finished"
    );
    summary
}
