use anyhow::{Context, Result};
use tracing::{info, warn};

use super::record::{columns, QuestionKind};
use super::store::{kind_filter, ContentStore, Filter};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub empty_ids: Option<usize>,
    pub null_ids: Option<usize>,
    pub errors: Vec<String>,
}

impl PurgeReport {
    pub fn removed(&self) -> usize {
        self.empty_ids.unwrap_or(0) + self.null_ids.unwrap_or(0)
    }
}

/// Delete rows whose identifier is an empty string or null. Each step is
/// attempted independently; a failure is recorded and the next step runs.
pub async fn purge_invalid_ids(store: &dyn ContentStore) -> PurgeReport {
    let mut report = PurgeReport::default();

    match store.delete_where(&Filter::eq(columns::KEY, "")).await {
        Ok(n) => {
            info!(target = "cleanup", deleted = n, "removed rows with empty q_id");
            report.empty_ids = Some(n);
        }
        Err(e) => {
            warn!(target = "cleanup", error = %e, "failed to remove rows with empty q_id");
            report.errors.push(format!("empty q_id: {e}"));
        }
    }

    match store.delete_where(&Filter::is_null(columns::KEY)).await {
        Ok(n) => {
            info!(target = "cleanup", deleted = n, "removed rows with null q_id");
            report.null_ids = Some(n);
        }
        Err(e) => {
            warn!(target = "cleanup", error = %e, "failed to remove rows with null q_id");
            report.errors.push(format!("null q_id: {e}"));
        }
    }

    report
}

/// Number of rows that would be purged; `None` when the store could not be asked.
pub async fn count_invalid_ids(store: &dyn ContentStore) -> Option<u64> {
    let empty = store.count_where(Some(&Filter::eq(columns::KEY, ""))).await;
    let null = store.count_where(Some(&Filter::is_null(columns::KEY))).await;
    match (empty, null) {
        (Ok(a), Ok(b)) => Some(a + b),
        (Err(e), _) | (_, Err(e)) => {
            warn!(target = "cleanup", error = %e, "invalid-id count failed");
            None
        }
    }
}

/// Delete every row of each kind, in order. Stops at the first failure so a
/// destructive re-import never proceeds on a half-wiped table.
pub async fn wipe_kinds(
    store: &dyn ContentStore,
    kinds: &[QuestionKind],
) -> Result<Vec<(QuestionKind, usize)>> {
    let mut out = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        let n = store
            .delete_where(&kind_filter(kind))
            .await
            .with_context(|| format!("deleting existing {kind} questions"))?;
        info!(target = "cleanup", %kind, deleted = n, "wiped kind");
        out.push((kind, n));
    }
    Ok(out)
}
