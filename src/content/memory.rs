use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::record::columns;
use super::store::{ContentStore, Filter};

type Constraint = Box<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// In-memory content table used for `--dry-run` and tests. Does NOT persist.
///
/// Mirrors the remote table's write semantics: batch upserts are atomic,
/// a key may appear only once per batch, and optional constraints reject
/// rows the way a database check would.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<Value>>,
    constraints: Vec<Constraint>,
}

fn key_of(row: &Value) -> Option<&str> {
    row.get(columns::KEY).and_then(Value::as_str)
}

fn merge_fields(target: &mut Value, fields: &Value) {
    if let (Value::Object(dst), Value::Object(src)) = (target, fields) {
        for (k, v) in src {
            dst.insert(k.clone(), v.clone());
        }
    }
}

fn project(row: &Value, columns: &str) -> Value {
    let wanted: Vec<&str> = columns.split(',').map(str::trim).filter(|c| !c.is_empty()).collect();
    if wanted.is_empty() || wanted.contains(&"*") {
        return row.clone();
    }
    let mut out = Map::new();
    for col in wanted {
        if let Some(v) = row.get(col) {
            out.insert(col.to_string(), v.clone());
        }
    }
    Value::Object(out)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row-level check; returning `Some(reason)` rejects the row.
    pub fn with_constraint<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        self.constraints.push(Box::new(check));
        self
    }

    /// Place rows directly, bypassing constraints and key checks.
    pub fn seed(&self, rows: impl IntoIterator<Item = Value>) -> Result<()> {
        let mut guard = self.lock()?;
        guard.extend(rows);
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Vec<Value>> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Value>>> {
        self.rows.lock().map_err(|_| anyhow!("memory store poisoned"))
    }

    fn check(&self, row: &Value) -> Result<()> {
        if !row.is_object() {
            bail!("row is not an object");
        }
        match key_of(row) {
            Some(k) if !k.trim().is_empty() => {}
            _ => bail!("row has no {}", columns::KEY),
        }
        for c in &self.constraints {
            if let Some(reason) = c(row) {
                bail!("constraint violated for {}: {reason}", key_of(row).unwrap_or(""));
            }
        }
        Ok(())
    }

    fn upsert_locked(rows: &mut Vec<Value>, row: &Value) {
        let key = key_of(row);
        match rows.iter_mut().find(|r| key_of(r) == key) {
            Some(existing) => merge_fields(existing, row),
            None => rows.push(row.clone()),
        }
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert_rows(&self, rows: &[Value]) -> Result<usize> {
        let mut seen = HashSet::new();
        for row in rows {
            self.check(row)?;
            let key = key_of(row).unwrap_or_default();
            if !seen.insert(key) {
                bail!("upsert batch would affect row {key} a second time");
            }
        }
        let mut guard = self.lock()?;
        for row in rows {
            Self::upsert_locked(&mut guard, row);
        }
        Ok(rows.len())
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.iter().find(|r| key_of(r) == Some(key)).cloned())
    }

    async fn update_by_key(&self, key: &str, fields: &Value) -> Result<usize> {
        let mut guard = self.lock()?;
        let mut touched = 0usize;
        for row in guard.iter_mut().filter(|r| key_of(r) == Some(key)) {
            let mut candidate = row.clone();
            merge_fields(&mut candidate, fields);
            self.check(&candidate)?;
            *row = candidate;
            touched += 1;
        }
        Ok(touched)
    }

    async fn insert_row(&self, row: &Value) -> Result<()> {
        self.check(row)?;
        let mut guard = self.lock()?;
        let key = key_of(row);
        if guard.iter().any(|r| key_of(r) == key) {
            bail!("duplicate key value violates unique constraint on {}", columns::KEY);
        }
        guard.push(row.clone());
        Ok(())
    }

    async fn delete_where(&self, filter: &Filter) -> Result<usize> {
        let mut guard = self.lock()?;
        let before = guard.len();
        guard.retain(|r| !filter.matches(r));
        Ok(before - guard.len())
    }

    async fn count_where(&self, filter: Option<&Filter>) -> Result<u64> {
        let guard = self.lock()?;
        Ok(guard
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(r)))
            .count() as u64)
    }

    async fn select_where(
        &self,
        filter: Option<&Filter>,
        columns: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Value>> {
        let guard = self.lock()?;
        Ok(guard
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(r)))
            .take(limit.unwrap_or(usize::MAX))
            .map(|r| project(r, columns))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_is_idempotent_per_key() {
        let store = MemoryStore::new();
        let row = json!({ "q_id": "B-1", "type": "B", "content": "v1" });
        store.upsert_rows(&[row.clone()]).await.unwrap();
        store.upsert_rows(&[json!({ "q_id": "B-1", "type": "B", "content": "v2" })]).await.unwrap();
        assert_eq!(store.count_where(None).await.unwrap(), 1);
        let found = store.find_by_key("B-1").await.unwrap().unwrap();
        assert_eq!(found["content"], "v2");
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let store = MemoryStore::new().with_constraint(|r| {
            (r["type"] != "T" && r["type"] != "B").then(|| "type must be T or B".to_string())
        });
        let err = store
            .upsert_rows(&[json!({ "q_id": "a", "type": "B" }), json!({ "q_id": "b", "type": "X" })])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("type must be T or B"));
        assert_eq!(store.count_where(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_keys_in_one_batch_fail() {
        let store = MemoryStore::new();
        let row = json!({ "q_id": "a", "type": "B" });
        assert!(store.upsert_rows(&[row.clone(), row]).await.is_err());
    }

    #[tokio::test]
    async fn insert_rejects_existing_key_and_update_merges() {
        let store = MemoryStore::new();
        store.insert_row(&json!({ "q_id": "a", "type": "T", "content": "x" })).await.unwrap();
        assert!(store.insert_row(&json!({ "q_id": "a", "type": "T" })).await.is_err());
        let n = store.update_by_key("a", &json!({ "content_en": "y" })).await.unwrap();
        assert_eq!(n, 1);
        let row = store.find_by_key("a").await.unwrap().unwrap();
        assert_eq!(row["content"], "x");
        assert_eq!(row["content_en"], "y");
        assert_eq!(store.update_by_key("missing", &json!({})).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_and_select_with_filters() {
        let store = MemoryStore::new();
        store
            .seed(vec![
                json!({ "q_id": "", "type": "B" }),
                json!({ "q_id": null, "type": "T" }),
                json!({ "q_id": "T-1", "type": "T", "content": "c" }),
            ])
            .unwrap();
        let rows = store
            .select_where(Some(&Filter::eq("type", "T")), "q_id", None)
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({ "q_id": null }), json!({ "q_id": "T-1" })]);
        assert_eq!(store.delete_where(&Filter::eq("q_id", "")).await.unwrap(), 1);
        assert_eq!(store.delete_where(&Filter::is_null("q_id")).await.unwrap(), 1);
        assert_eq!(store.count_where(None).await.unwrap(), 1);
    }
}
