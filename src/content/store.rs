use std::fmt;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use super::record::{columns, QuestionKind};
use crate::util::env::{env_opt, EnvMap};

/// Row predicates understood by every store backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, String),
    IsNull(String),
    /// Array column shares at least one element with the list.
    Overlaps(String, Vec<String>),
    /// Column equals any of the values.
    In(String, Vec<String>),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<String>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn is_null(column: &str) -> Self {
        Filter::IsNull(column.to_string())
    }

    pub fn overlaps(column: &str, values: &[String]) -> Self {
        Filter::Overlaps(column.to_string(), values.to_vec())
    }

    pub fn one_of(column: &str, values: &[&str]) -> Self {
        Filter::In(column.to_string(), values.iter().map(|v| v.to_string()).collect())
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// Evaluate against a JSON row; used by the in-memory backend.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Filter::Eq(col, want) => match row.get(col) {
                Some(Value::String(s)) => s == want,
                Some(Value::Null) | None => false,
                Some(other) => other.to_string() == *want,
            },
            Filter::IsNull(col) => matches!(row.get(col), None | Some(Value::Null)),
            Filter::Overlaps(col, wanted) => match row.get(col) {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|s| wanted.iter().any(|w| w == s)),
                _ => false,
            },
            Filter::In(col, wanted) => match row.get(col) {
                Some(Value::String(s)) => wanted.iter().any(|w| w == s),
                _ => false,
            },
            Filter::And(parts) => parts.iter().all(|f| f.matches(row)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Eq(c, v) => write!(f, "{c} = '{v}'"),
            Filter::IsNull(c) => write!(f, "{c} is null"),
            Filter::Overlaps(c, v) => write!(f, "{c} && {v:?}"),
            Filter::In(c, v) => write!(f, "{c} in {v:?}"),
            Filter::And(parts) => {
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    write!(f, "{p}")?;
                }
                Ok(())
            }
        }
    }
}

/// Rows of `kind` under any spelling the `type` column has held.
pub fn kind_filter(kind: QuestionKind) -> Filter {
    Filter::one_of(columns::KIND, kind.stored_spellings())
}

/// Remote content table. All writes are keyed by the stable identifier column.
///
/// Implementations must be idempotent per key: upserting the same row twice
/// leaves one row with the latest values.
#[async_trait]
pub trait ContentStore: Send + Sync {
    fn name(&self) -> &str;

    /// Insert-or-update all rows in one call. All-or-nothing: on error no row
    /// of the batch is written.
    async fn upsert_rows(&self, rows: &[Value]) -> Result<usize>;

    async fn find_by_key(&self, key: &str) -> Result<Option<Value>>;

    /// Overwrite the given top-level fields of the row with `key`; returns
    /// the number of rows touched.
    async fn update_by_key(&self, key: &str, fields: &Value) -> Result<usize>;

    async fn insert_row(&self, row: &Value) -> Result<()>;

    async fn delete_where(&self, filter: &Filter) -> Result<usize>;

    async fn count_where(&self, filter: Option<&Filter>) -> Result<u64>;

    /// Fetch matching rows, `columns` being a comma list or `*`.
    async fn select_where(
        &self,
        filter: Option<&Filter>,
        columns: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Value>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    /// Bypasses row-level security.
    Service,
    Anon,
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRole::Service => f.write_str("service"),
            KeyRole::Anon => f.write_str("anon"),
        }
    }
}

pub const ENDPOINT_KEYS: [&str; 3] = ["ENDPOINT_URL", "SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"];
pub const SERVICE_KEYS: [&str; 2] = ["SERVICE_KEY", "SUPABASE_SERVICE_ROLE_KEY"];
pub const ANON_KEYS: [&str; 2] = ["ANON_KEY", "SUPABASE_ANON_KEY"];
pub const DEFAULT_TABLE: &str = "questions";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Connection parameters, resolved once at startup and passed explicitly.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub endpoint_url: String,
    pub access_key: String,
    pub key_role: KeyRole,
    /// Kept separately so probes can compare what the anon role sees.
    pub anon_key: Option<String>,
    pub table: String,
    pub timeout_secs: u64,
    pub batch_size: usize,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key", &"***")
            .field("key_role", &self.key_role)
            .field("anon_key", &self.anon_key.as_ref().map(|_| "***"))
            .field("table", &self.table)
            .field("timeout_secs", &self.timeout_secs)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl StoreConfig {
    /// Resolve from a lookup function (first non-empty match wins per key list).
    pub fn resolve_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let endpoint = first(&ENDPOINT_KEYS);
        let service = first(&SERVICE_KEYS);
        let anon = first(&ANON_KEYS);

        let (endpoint_url, access_key, key_role) = match (endpoint, service.clone(), anon.clone()) {
            (Some(e), Some(k), _) => (e, k, KeyRole::Service),
            (Some(e), None, Some(k)) => (e, k, KeyRole::Anon),
            (endpoint, _, _) => {
                let mut missing = Vec::new();
                if endpoint.is_none() {
                    missing.push(ENDPOINT_KEYS.join(" / "));
                }
                if service.is_none() && anon.is_none() {
                    missing.push(format!("{} / {}", SERVICE_KEYS.join(" / "), ANON_KEYS.join(" / ")));
                }
                bail!("missing required configuration: {}", missing.join("; "));
            }
        };

        let table = first(&["CONTENT_TABLE"]).unwrap_or_else(|| DEFAULT_TABLE.to_string());
        let timeout_secs = first(&["STORE_TIMEOUT_SECS"])
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let batch_size = first(&["SYNC_BATCH_SIZE"])
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_BATCH_SIZE);

        Ok(Self {
            endpoint_url: endpoint_url.trim_end_matches('/').to_string(),
            access_key,
            key_role,
            anon_key: anon,
            table,
            timeout_secs,
            batch_size,
        })
    }

    /// File values first, process environment as fallback.
    pub fn resolve(file: &EnvMap) -> Result<Self> {
        Self::resolve_with(|k| file.get(k).cloned().or_else(|| env_opt(k)))
    }

    /// Same endpoint, but authenticated with the anon key.
    pub fn as_anon(&self) -> Option<Self> {
        self.anon_key.as_ref().map(|k| Self {
            access_key: k.clone(),
            key_role: KeyRole::Anon,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn prefers_service_key() {
        let cfg = StoreConfig::resolve_with(lookup(&[
            ("SUPABASE_URL", "https://abc.supabase.co/"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service"),
        ]))
        .unwrap();
        assert_eq!(cfg.endpoint_url, "https://abc.supabase.co");
        assert_eq!(cfg.access_key, "service");
        assert_eq!(cfg.key_role, KeyRole::Service);
        assert_eq!(cfg.as_anon().unwrap().access_key, "anon");
        assert_eq!(cfg.table, "questions");
        assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn falls_back_to_anon_key_and_generic_names() {
        let cfg = StoreConfig::resolve_with(lookup(&[
            ("ENDPOINT_URL", "http://localhost:54321"),
            ("ANON_KEY", "anon"),
            ("CONTENT_TABLE", "questions_v2"),
            ("SYNC_BATCH_SIZE", "100"),
        ]))
        .unwrap();
        assert_eq!(cfg.key_role, KeyRole::Anon);
        assert_eq!(cfg.table, "questions_v2");
        assert_eq!(cfg.batch_size, 100);
    }

    #[test]
    fn missing_keys_are_named() {
        let err = StoreConfig::resolve_with(lookup(&[("SUPABASE_URL", "  ")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("ENDPOINT_URL"));
        assert!(err.contains("SERVICE_KEY"));
    }

    #[test]
    fn debug_output_hides_keys() {
        let cfg = StoreConfig::resolve_with(lookup(&[
            ("ENDPOINT_URL", "http://x"),
            ("SERVICE_KEY", "super-secret"),
        ]))
        .unwrap();
        assert!(!format!("{cfg:?}").contains("super-secret"));
    }

    #[test]
    fn filters_match_json_rows() {
        let row = json!({ "q_id": "B-1", "type": "B", "code_names": ["a", "b"], "order": 3 });
        assert!(Filter::eq("type", "B").matches(&row));
        assert!(Filter::eq("order", "3").matches(&row));
        assert!(!Filter::eq("type", "T").matches(&row));
        assert!(Filter::is_null("content").matches(&row));
        assert!(Filter::overlaps("code_names", &["z".into(), "b".into()]).matches(&row));
        assert!(!Filter::overlaps("code_names", &["z".into()]).matches(&row));
        let both = Filter::eq("type", "B").and(Filter::eq("q_id", "B-1"));
        assert!(both.matches(&row));
        assert_eq!(both.to_string(), "type = 'B' and q_id = 'B-1'");
    }

    #[test]
    fn kind_filter_accepts_legacy_spellings() {
        let f = kind_filter(QuestionKind::Balance);
        assert!(f.matches(&json!({ "type": "B" })));
        assert!(f.matches(&json!({ "type": "balance" })));
        assert!(f.matches(&json!({ "type": "b" })));
        assert!(!f.matches(&json!({ "type": "T" })));
        assert!(!f.matches(&json!({ "q_id": "x" })));
    }
}
