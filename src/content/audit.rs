//! Read-only reports over stored content, plus reconciling a local sheet
//! against what the table already holds.
use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use super::code_names::{gender_pair, join_code_names, relationship_segment};
use super::csv_io::SourceSheet;
use super::record::{code_names_from_value, columns, Payload, QuestionKind, QuestionRecord};
use super::store::{kind_filter, ContentStore, Filter};
use super::transform::source_columns as col;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthThresholds {
    pub primary: usize,
    pub secondary: usize,
    pub choice: usize,
    pub top: usize,
}

impl Default for LengthThresholds {
    fn default() -> Self {
        Self {
            primary: 45,
            secondary: 80,
            choice: 15,
            top: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthHit {
    pub id: String,
    pub kind: QuestionKind,
    pub field: &'static str,
    pub chars: usize,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct LengthReport {
    pub primary: Vec<LengthHit>,
    pub secondary: Vec<LengthHit>,
    pub choices: Vec<LengthHit>,
}

fn push_if_long(out: &mut Vec<LengthHit>, rec: &QuestionRecord, field: &'static str, text: &str, limit: usize) {
    let chars = text.chars().count();
    if chars > limit {
        out.push(LengthHit {
            id: rec.id.clone(),
            kind: rec.kind(),
            field,
            chars,
            text: text.to_string(),
        });
    }
}

fn top_n(mut hits: Vec<LengthHit>, n: usize) -> Vec<LengthHit> {
    hits.sort_by(|a, b| b.chars.cmp(&a.chars).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(n);
    hits
}

/// Prompts longer than the thresholds, counted in characters, longest first.
pub fn audit_lengths(records: &[QuestionRecord], th: LengthThresholds) -> LengthReport {
    let mut primary = Vec::new();
    let mut secondary = Vec::new();
    let mut choices = Vec::new();
    for rec in records {
        push_if_long(&mut primary, rec, columns::CONTENT, &rec.content, th.primary);
        push_if_long(&mut secondary, rec, columns::CONTENT_EN, &rec.content_en, th.secondary);
        if let Payload::Balance(p) = &rec.payload {
            push_if_long(&mut choices, rec, col::CHOICE_A, &p.choice_a, th.choice);
            push_if_long(&mut choices, rec, col::CHOICE_B, &p.choice_b, th.choice);
        }
    }
    LengthReport {
        primary: top_n(primary, th.top),
        secondary: top_n(secondary, th.top),
        choices: top_n(choices, th.top),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeSegmentReport {
    pub tags: usize,
    pub relationships: BTreeSet<String>,
    pub gender_pairs: BTreeSet<String>,
}

pub fn audit_code_segments(records: &[QuestionRecord]) -> CodeSegmentReport {
    let mut report = CodeSegmentReport::default();
    for code in records.iter().flat_map(|r| r.code_names.iter()) {
        report.tags += 1;
        if let Some(rel) = relationship_segment(code) {
            report.relationships.insert(rel.to_string());
        }
        if let Some(pair) = gender_pair(code) {
            report.gender_pairs.insert(pair);
        }
    }
    report
}

#[derive(Debug, Clone, Default)]
pub struct OverlapReport {
    pub count: u64,
    pub first: Option<Value>,
}

/// Records whose tag set shares at least one tag with `candidates`.
pub async fn find_codes(store: &dyn ContentStore, candidates: &[String]) -> Result<OverlapReport> {
    let filter = Filter::overlaps(columns::CODE_NAMES, candidates);
    let count = store
        .count_where(Some(&filter))
        .await
        .context("overlap count failed")?;
    let first = store
        .select_where(Some(&filter), "*", Some(1))
        .await
        .context("overlap fetch failed")?
        .into_iter()
        .next();
    Ok(OverlapReport { count, first })
}

pub const PROBE_SAMPLE_CODES: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub sample: Option<Value>,
    pub sample_code_names: Vec<String>,
    pub count: Option<u64>,
    pub anon_count: Option<u64>,
}

async fn probe_count(store: &dyn ContentStore) -> Option<u64> {
    match store.count_where(None).await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(target = "probe", store = store.name(), error = %e, "count failed");
            None
        }
    }
}

/// Connectivity check. `anon` is a second view of the same table through
/// the anon key; a lower count there means rows are hidden from it.
pub async fn probe(store: &dyn ContentStore, anon: Option<&dyn ContentStore>) -> Result<ProbeReport> {
    let sample = store
        .select_where(None, "*", Some(1))
        .await
        .context("probe: sample fetch failed")?
        .into_iter()
        .next();

    let tag_rows = store
        .select_where(None, columns::CODE_NAMES, Some(PROBE_SAMPLE_CODES))
        .await
        .context("probe: code_names fetch failed")?;
    let sample_code_names = tag_rows
        .iter()
        .flat_map(|r| code_names_from_value(r.get(columns::CODE_NAMES)))
        .take(PROBE_SAMPLE_CODES)
        .collect();

    let count = probe_count(store).await;
    let anon_count = match anon {
        Some(a) => probe_count(a).await,
        None => None,
    };
    info!(target = "probe", store = store.name(), ?count, ?anon_count, "probe done");
    Ok(ProbeReport {
        sample,
        sample_code_names,
        count,
        anon_count,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub matched: usize,
    /// `(line, content)` of rows with no stored counterpart.
    pub missed: Vec<(u64, String)>,
}

/// Copy stored `q_id` and tags onto sheet rows whose `content` matches a
/// stored record of `kind` exactly; an existing `Order` column receives the
/// `q_id` as well. Unmatched rows are left untouched.
pub async fn reconcile_sheet(
    store: &dyn ContentStore,
    sheet: &mut SourceSheet,
    kind: QuestionKind,
) -> Result<ReconcileReport> {
    let rows = store
        .select_where(
            Some(&kind_filter(kind)),
            &format!("{},{},{}", columns::KEY, columns::CONTENT, columns::CODE_NAMES),
            None,
        )
        .await
        .with_context(|| format!("fetching stored {kind} questions"))?;

    let mut by_content: HashMap<String, (String, Vec<String>)> = HashMap::new();
    for row in &rows {
        let (Some(content), Some(id)) = (
            row.get(columns::CONTENT).and_then(Value::as_str),
            row.get(columns::KEY).and_then(Value::as_str),
        ) else {
            continue;
        };
        by_content
            .entry(content.trim().to_string())
            .or_insert_with(|| (id.to_string(), code_names_from_value(row.get(columns::CODE_NAMES))));
    }

    sheet.ensure_column(col::ID);
    sheet.ensure_column(col::CODE_NAME);
    let has_order = sheet.headers.iter().any(|h| h == col::ORDER);

    let mut report = ReconcileReport::default();
    for row in &mut sheet.rows {
        let content = row.cells.get(col::CONTENT).map(|c| c.trim().to_string()).unwrap_or_default();
        match by_content.get(&content) {
            Some((id, codes)) if !content.is_empty() => {
                row.cells.insert(col::ID.to_string(), id.clone());
                row.cells.insert(col::CODE_NAME.to_string(), join_code_names(codes));
                // Sheets that track Order key it by q_id.
                if has_order {
                    row.cells.insert(col::ORDER.to_string(), id.clone());
                }
                report.matched += 1;
            }
            _ => {
                warn!(target = "reconcile", line = row.line, %content, "no stored question with this content");
                report.missed.push((row.line, content));
            }
        }
    }
    info!(target = "reconcile", %kind, matched = report.matched, missed = report.missed.len(), "reconciled");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::csv_io::read_sheet;
    use crate::content::memory::MemoryStore;
    use serde_json::json;

    fn rec(row: Value) -> QuestionRecord {
        QuestionRecord::from_row(&row).unwrap()
    }

    #[test]
    fn lengths_count_characters_not_bytes() {
        let long_ko = "가".repeat(46);
        let recs = vec![
            rec(json!({ "q_id": "T-1", "type": "T", "content": long_ko })),
            rec(json!({ "q_id": "T-2", "type": "T", "content": "가".repeat(45) })),
            rec(json!({ "q_id": "B-1", "type": "B", "content": "짧다",
                        "details": { "choice_a": "a".repeat(16), "choice_b": "ok" } })),
        ];
        let report = audit_lengths(&recs, LengthThresholds::default());
        assert_eq!(report.primary.len(), 1);
        assert_eq!((report.primary[0].id.as_str(), report.primary[0].chars), ("T-1", 46));
        assert_eq!(report.choices.len(), 1);
        assert_eq!(report.choices[0].field, "choice_a");
        assert!(report.secondary.is_empty());
    }

    #[test]
    fn lengths_are_sorted_and_truncated() {
        let recs: Vec<QuestionRecord> = (0..5)
            .map(|i| rec(json!({ "q_id": format!("T-{i}"), "type": "T", "content_en": "x".repeat(81 + i) })))
            .collect();
        let th = LengthThresholds { top: 3, ..Default::default() };
        let report = audit_lengths(&recs, th);
        let ids: Vec<&str> = report.secondary.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["T-4", "T-3", "T-2"]);
    }

    #[test]
    fn code_segments_are_distinct_and_sorted() {
        let recs = vec![
            rec(json!({ "q_id": "T-1", "type": "T", "code_names": ["M-F-Lo-Em-L1", "F-F-B-Ar-L2"] })),
            rec(json!({ "q_id": "T-2", "type": "T", "code_names": ["M-F-Lo-Em-L2", "X"] })),
        ];
        let report = audit_code_segments(&recs);
        assert_eq!(report.tags, 4);
        assert_eq!(report.relationships.into_iter().collect::<Vec<_>>(), vec!["B", "Lo"]);
        assert_eq!(report.gender_pairs.into_iter().collect::<Vec<_>>(), vec!["F-F", "M-F"]);
    }

    fn store() -> MemoryStore {
        let s = MemoryStore::new();
        s.seed(vec![
            json!({ "q_id": "B26-1", "type": "B", "content": "짜장 짬뽕?", "code_names": ["F-F-B-Ar-L1", "F-F-B-Ar-L2"] }),
            json!({ "q_id": "T26-1", "type": "T", "content": "짜장 짬뽕?", "code_names": ["M-F-Lo-Em-L1"] }),
            json!({ "q_id": "T26-2", "type": "T", "content": "최근에 운 적?", "code_names": [] }),
        ])
        .unwrap();
        s
    }

    #[tokio::test]
    async fn overlap_search_counts_and_returns_first() {
        let s = store();
        let report = find_codes(&s, &["F-F-B-Ar-L2".into(), "M-F-Lo-Em-L1".into()]).await.unwrap();
        assert_eq!(report.count, 2);
        assert_eq!(report.first.unwrap()["q_id"], "B26-1");
        let none = find_codes(&s, &["nope".into()]).await.unwrap();
        assert_eq!((none.count, none.first), (0, None));
    }

    #[tokio::test]
    async fn probe_compares_both_views() {
        let service = store();
        let anon = MemoryStore::new();
        anon.seed(vec![json!({ "q_id": "T26-2", "type": "T" })]).unwrap();
        let report = probe(&service, Some(&anon)).await.unwrap();
        assert_eq!(report.count, Some(3));
        assert_eq!(report.anon_count, Some(1));
        assert_eq!(report.sample.unwrap()["q_id"], "B26-1");
        assert_eq!(report.sample_code_names, vec!["F-F-B-Ar-L1", "F-F-B-Ar-L2", "M-F-Lo-Em-L1"]);
    }

    #[tokio::test]
    async fn reconcile_matches_content_within_kind() {
        let s = store();
        let mut sheet = read_sheet("CodeName,content,answers\n,짜장 짬뽕?,x\n,없는 질문,y\n".as_bytes()).unwrap();
        let report = reconcile_sheet(&s, &mut sheet, QuestionKind::Truth).await.unwrap();
        assert_eq!(report.matched, 1);
        assert_eq!(report.missed, vec![(3, "없는 질문".to_string())]);
        assert_eq!(sheet.headers, vec!["CodeName", "content", "answers", "q_id"]);
        assert_eq!(sheet.rows[0].cells["q_id"], "T26-1");
        assert_eq!(sheet.rows[0].cells["CodeName"], "M-F-Lo-Em-L1");
        assert_eq!(sheet.rows[1].cells.get("q_id"), None);
        assert_eq!(sheet.rows[1].cells["answers"], "y");
    }

    #[tokio::test]
    async fn reconcile_fills_order_and_sees_lowercase_types() {
        let s = MemoryStore::new();
        s.seed(vec![json!({ "q_id": "T26-7", "type": "truth", "content": "첫사랑은?", "code_names": ["M-F-Lo-Em-L2"] })])
            .unwrap();
        let mut sheet = read_sheet("CodeName,Order,q_id,content
,3,,첫사랑은?
".as_bytes()).unwrap();
        let report = reconcile_sheet(&s, &mut sheet, QuestionKind::Truth).await.unwrap();
        assert_eq!(report.matched, 1);
        assert_eq!(sheet.headers, vec!["CodeName", "Order", "q_id", "content"]);
        assert_eq!(sheet.rows[0].cells["q_id"], "T26-7");
        assert_eq!(sheet.rows[0].cells["Order"], "T26-7");
        assert_eq!(sheet.rows[0].cells["CodeName"], "M-F-Lo-Em-L2");
    }
}
