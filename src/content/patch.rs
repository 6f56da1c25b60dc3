//! Targeted single-record edits: fetch, merge, write back only what changed.
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::record::{columns, object_or_empty, QuestionKind};
use super::store::ContentStore;

/// Overrides for one record. `details` / `details_en` keys are merged into the
/// stored objects; untouched keys are preserved.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FieldPatch {
    pub id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub content_en: Option<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub details_en: Map<String, Value>,
}

impl FieldPatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.content_en.is_none()
            && self.details.is_empty()
            && self.details_en.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Top-level columns written.
    Updated(Vec<String>),
    NoChanges,
    NotFound,
    /// The override does not fit the record's kind; nothing was written.
    Rejected(String),
    Failed(String),
}

/// Parse `key=value` into a details override.
pub fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let (k, v) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got '{raw}'"))?;
    let k = k.trim();
    if k.is_empty() {
        return Err(anyhow!("empty key in '{raw}'"));
    }
    Ok((k.to_string(), Value::String(v.to_string())))
}

/// Load a JSON array of patches.
pub fn load_patch_file(path: &Path) -> Result<Vec<FieldPatch>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read patch file {}", path.display()))?;
    let patches: Vec<FieldPatch> = serde_json::from_str(&text)
        .with_context(|| format!("invalid patch file {}", path.display()))?;
    Ok(patches)
}

fn foreign_key(kind: QuestionKind, overrides: &Map<String, Value>) -> Option<String> {
    let foreign = kind.other().payload_keys();
    overrides
        .keys()
        .find(|k| foreign.contains(&k.as_str()))
        .cloned()
}

fn merge_object(current: Option<&Value>, overrides: &Map<String, Value>) -> Option<Value> {
    let mut merged = object_or_empty(current);
    let mut changed = false;
    for (k, v) in overrides {
        if merged.get(k) != Some(v) {
            merged.insert(k.clone(), v.clone());
            changed = true;
        }
    }
    changed.then_some(Value::Object(merged))
}

/// Apply one patch. Never creates a record: an unknown id is `NotFound`.
pub async fn apply_patch(store: &dyn ContentStore, patch: &FieldPatch) -> PatchOutcome {
    let current = match store.find_by_key(&patch.id).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            warn!(target = "patch", q_id = %patch.id, "record not found; skipping");
            return PatchOutcome::NotFound;
        }
        Err(e) => return PatchOutcome::Failed(e.to_string()),
    };

    let kind = current
        .get(columns::KIND)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<QuestionKind>().ok());
    if let Some(kind) = kind {
        for overrides in [&patch.details, &patch.details_en] {
            if let Some(key) = foreign_key(kind, overrides) {
                return PatchOutcome::Rejected(format!("'{key}' is not a {kind} field"));
            }
        }
    }

    let mut update = Map::new();
    for (col, value) in [
        (columns::CONTENT, &patch.content),
        (columns::CONTENT_EN, &patch.content_en),
    ] {
        if let Some(v) = value {
            if current.get(col).and_then(Value::as_str) != Some(v.as_str()) {
                update.insert(col.to_string(), Value::String(v.clone()));
            }
        }
    }
    for (col, overrides) in [
        (columns::DETAILS, &patch.details),
        (columns::DETAILS_EN, &patch.details_en),
    ] {
        if let Some(merged) = merge_object(current.get(col), overrides) {
            update.insert(col.to_string(), merged);
        }
    }

    if update.is_empty() {
        return PatchOutcome::NoChanges;
    }
    let fields: Vec<String> = update.keys().cloned().collect();
    match store.update_by_key(&patch.id, &Value::Object(update)).await {
        Ok(0) => PatchOutcome::NotFound,
        Ok(_) => {
            info!(target = "patch", q_id = %patch.id, ?fields, "updated");
            PatchOutcome::Updated(fields)
        }
        Err(e) => PatchOutcome::Failed(e.to_string()),
    }
}

/// Apply patches in order; one outcome per patch.
pub async fn apply_patches(
    store: &dyn ContentStore,
    patches: &[FieldPatch],
) -> Vec<(String, PatchOutcome)> {
    let mut out = Vec::with_capacity(patches.len());
    for p in patches {
        out.push((p.id.clone(), apply_patch(store, p).await));
    }
    out
}
