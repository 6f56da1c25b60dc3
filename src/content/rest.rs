use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::record::columns;
use super::store::{ContentStore, Filter, StoreConfig};

/// Rows fetched per page when selecting without an explicit limit.
pub const PAGE_SIZE: usize = 1000;

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

fn quote_array_item(v: &str) -> String {
    format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Translate a filter into PostgREST query pairs (`column=op.value`).
pub fn filter_params(filter: &Filter) -> Vec<(String, String)> {
    match filter {
        Filter::Eq(col, v) => vec![(col.clone(), format!("eq.{v}"))],
        Filter::IsNull(col) => vec![(col.clone(), "is.null".to_string())],
        Filter::Overlaps(col, values) => {
            let items: Vec<String> = values.iter().map(|v| quote_array_item(v)).collect();
            vec![(col.clone(), format!("ov.{{{}}}", items.join(",")))]
        }
        Filter::In(col, values) => {
            let items: Vec<String> = values.iter().map(|v| quote_array_item(v)).collect();
            vec![(col.clone(), format!("in.({})", items.join(",")))]
        }
        Filter::And(parts) => parts.iter().flat_map(filter_params).collect(),
    }
}

/// Query pairs for one page of a select. Pages are ordered by `q_id` so that
/// consecutive offsets neither skip nor repeat rows.
pub fn page_query(select: &str, limit: usize, offset: usize) -> Vec<(String, String)> {
    vec![
        ("select".to_string(), select.to_string()),
        ("order".to_string(), format!("{}.asc", columns::KEY)),
        ("limit".to_string(), limit.to_string()),
        ("offset".to_string(), offset.to_string()),
    ]
}

/// Total from a `Content-Range` header such as `0-24/573` or `*/0`.
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/').and_then(|(_, total)| total.trim().parse().ok())
}

/// Content table behind a PostgREST endpoint (`{endpoint}/rest/v1/{table}`).
#[derive(Debug, Clone)]
pub struct RestStore {
    table_url: String,
    label: String,
    http: Client,
}

impl RestStore {
    pub fn new(cfg: &StoreConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let key = header::HeaderValue::from_str(&cfg.access_key).context("access key is not a valid header value")?;
        let bearer = header::HeaderValue::from_str(&format!("Bearer {}", cfg.access_key))
            .context("access key is not a valid header value")?;
        headers.insert("apikey", key);
        headers.insert(header::AUTHORIZATION, bearer);
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .user_agent(concat!("qsync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            table_url: format!("{}/rest/v1/{}", cfg.endpoint_url.trim_end_matches('/'), cfg.table),
            label: format!("rest:{}({})", cfg.table, cfg.key_role),
            http,
        })
    }

    pub fn table_url(&self) -> &str {
        &self.table_url
    }

    async fn check(resp: Response, op: &str) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = truncate_for_log(resp.text().await.unwrap_or_default(), 2000);
        Err(anyhow!("{op} failed: {status} body={body}"))
    }

    async fn rows_from(resp: Response, op: &str) -> Result<Vec<Value>> {
        let resp = Self::check(resp, op).await?;
        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(&text)? {
            Value::Array(rows) => Ok(rows),
            other => Err(anyhow!("{op}: expected a JSON array, got {other}")),
        }
    }

    fn with_filter(req: RequestBuilder, filter: Option<&Filter>) -> RequestBuilder {
        match filter {
            Some(f) => req.query(&filter_params(f)),
            None => req,
        }
    }

    fn key_filter(key: &str) -> Filter {
        Filter::eq(columns::KEY, key)
    }
}

#[async_trait]
impl ContentStore for RestStore {
    fn name(&self) -> &str {
        &self.label
    }

    async fn upsert_rows(&self, rows: &[Value]) -> Result<usize> {
        debug!(target = "rest", rows = rows.len(), "upsert");
        let resp = self
            .http
            .post(&self.table_url)
            .query(&[("on_conflict", columns::KEY)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows)
            .send()
            .await?;
        Self::check(resp, "upsert").await?;
        Ok(rows.len())
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<Value>> {
        let req = self
            .http
            .get(&self.table_url)
            .query(&[("select", "*"), ("limit", "1")]);
        let resp = Self::with_filter(req, Some(&Self::key_filter(key))).send().await?;
        Ok(Self::rows_from(resp, "select").await?.into_iter().next())
    }

    async fn update_by_key(&self, key: &str, fields: &Value) -> Result<usize> {
        let req = self
            .http
            .patch(&self.table_url)
            .header("Prefer", "return=representation")
            .json(fields);
        let resp = Self::with_filter(req, Some(&Self::key_filter(key))).send().await?;
        Ok(Self::rows_from(resp, "update").await?.len())
    }

    async fn insert_row(&self, row: &Value) -> Result<()> {
        let resp = self
            .http
            .post(&self.table_url)
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;
        Self::check(resp, "insert").await?;
        Ok(())
    }

    async fn delete_where(&self, filter: &Filter) -> Result<usize> {
        let req = self
            .http
            .delete(&self.table_url)
            .header("Prefer", "return=representation");
        let resp = Self::with_filter(req, Some(filter)).send().await?;
        Ok(Self::rows_from(resp, "delete").await?.len())
    }

    async fn count_where(&self, filter: Option<&Filter>) -> Result<u64> {
        let req = self
            .http
            .head(&self.table_url)
            .query(&[("select", columns::KEY)])
            .header("Prefer", "count=exact");
        let resp = Self::check(Self::with_filter(req, filter).send().await?, "count").await?;
        resp.headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| anyhow!("count: response carried no Content-Range total"))
    }

    async fn select_where(
        &self,
        filter: Option<&Filter>,
        columns: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        let mut offset = 0usize;
        loop {
            let want = match limit {
                Some(l) => l.saturating_sub(out.len()).min(PAGE_SIZE),
                None => PAGE_SIZE,
            };
            if want == 0 {
                break;
            }
            let req = self
                .http
                .get(&self.table_url)
                .query(&page_query(columns, want, offset));
            let resp = Self::with_filter(req, filter).send().await?;
            let page = Self::rows_from(resp, "select").await?;
            let got = page.len();
            out.extend(page);
            if got < want {
                break;
            }
            offset += got;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::record::QuestionKind;
    use crate::content::store::{kind_filter, KeyRole};

    fn cfg() -> StoreConfig {
        StoreConfig {
            endpoint_url: "https://abc.supabase.co/".into(),
            access_key: "service".into(),
            key_role: KeyRole::Service,
            anon_key: None,
            table: "questions".into(),
            timeout_secs: 5,
            batch_size: 50,
        }
    }

    #[test]
    fn builds_table_url() {
        let store = RestStore::new(&cfg()).unwrap();
        assert_eq!(store.table_url(), "https://abc.supabase.co/rest/v1/questions");
        assert_eq!(store.name(), "rest:questions(service)");
    }

    #[test]
    fn rejects_keys_that_cannot_be_headers() {
        let mut bad = cfg();
        bad.access_key = "line\nbreak".into();
        assert!(RestStore::new(&bad).is_err());
    }

    #[test]
    fn filters_become_query_pairs() {
        let f = Filter::eq("type", "B").and(Filter::is_null("q_id"));
        assert_eq!(
            filter_params(&f),
            vec![
                ("type".to_string(), "eq.B".to_string()),
                ("q_id".to_string(), "is.null".to_string()),
            ]
        );
        let ov = Filter::overlaps("code_names", &["F-F-B-Ar-L2".into(), "a\"b".into()]);
        assert_eq!(
            filter_params(&ov),
            vec![("code_names".to_string(), r#"ov.{"F-F-B-Ar-L2","a\"b"}"#.to_string())]
        );
    }

    #[test]
    fn kind_filter_lists_every_spelling() {
        assert_eq!(
            filter_params(&kind_filter(QuestionKind::Balance)),
            vec![(
                "type".to_string(),
                r#"in.("B","b","balance","Balance","BALANCE")"#.to_string()
            )]
        );
    }

    #[test]
    fn pages_are_ordered_by_id() {
        let q = page_query("*", 1000, 2000);
        let pairs: Vec<(&str, &str)> = q.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(
            pairs,
            vec![("select", "*"), ("order", "q_id.asc"), ("limit", "1000"), ("offset", "2000")]
        );
    }

    #[test]
    fn content_range_totals() {
        assert_eq!(parse_content_range_total("0-24/573"), Some(573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-24/*"), None);
    }

    #[test]
    fn log_truncation_respects_char_boundaries() {
        let s = truncate_for_log("가나다".to_string(), 4);
        assert_eq!(s, "가…");
    }
}
