use std::collections::HashMap;
use std::fmt;

use tracing::warn;

use super::code_names::expand_code_name_cell;
use super::record::{
    BalancePayload, GenderVariants, Payload, QuestionKind, QuestionRecord, TruthPayload,
    GENDER_VARIANT_KEYS,
};

/// Column headers of the source sheets.
pub mod source_columns {
    pub const CODE_NAME: &str = "CodeName";
    pub const ORDER: &str = "Order";
    pub const ID: &str = "q_id";
    pub const CONTENT: &str = "content";
    pub const CONTENT_EN: &str = "content_en";
    pub const ANSWERS: &str = "answers";
    pub const ANSWERS_EN: &str = "answers_en";
    pub const CHOICE_A: &str = "choice_a";
    pub const CHOICE_B: &str = "choice_b";
    pub const CHOICE_A_EN: &str = "choice_a_en";
    pub const CHOICE_B_EN: &str = "choice_b_en";
}

use source_columns as col;

/// One source row: column header -> raw cell text.
pub type SourceRow = HashMap<String, String>;

/// Base columns per kind, in sheet order.
pub fn base_columns(kind: QuestionKind) -> &'static [&'static str] {
    match kind {
        QuestionKind::Balance => &[
            col::CODE_NAME,
            col::ORDER,
            col::ID,
            col::CONTENT,
            col::CHOICE_A,
            col::CHOICE_B,
            col::CONTENT_EN,
            col::CHOICE_A_EN,
            col::CHOICE_B_EN,
        ],
        QuestionKind::Truth => &[
            col::CODE_NAME,
            col::ORDER,
            col::ID,
            col::CONTENT,
            col::ANSWERS,
            col::CONTENT_EN,
            col::ANSWERS_EN,
        ],
    }
}

/// Gender variant columns: primary keys first, then their `_en` counterparts.
pub fn gender_variant_columns() -> Vec<String> {
    GENDER_VARIANT_KEYS
        .iter()
        .map(|k| k.to_string())
        .chain(GENDER_VARIANT_KEYS.iter().map(|k| format!("{k}_en")))
        .collect()
}

fn known_columns() -> impl Iterator<Item = String> {
    base_columns(QuestionKind::Balance)
        .iter()
        .chain(base_columns(QuestionKind::Truth).iter())
        .map(|s| s.to_string())
        .chain(gender_variant_columns())
}

/// Clean up a header cell: trim, strip a BOM, and drop a stray non-ASCII
/// prefix glued to a known column name (e.g. `스CodeName`).
pub fn normalize_header(raw: &str) -> String {
    let h = raw.trim().trim_start_matches('\u{feff}').trim();
    if known_columns().any(|c| c == h) {
        return h.to_string();
    }
    for known in known_columns() {
        if let Some(prefix) = h.strip_suffix(known.as_str()) {
            if !prefix.is_empty() && !prefix.is_ascii() {
                return known;
            }
        }
    }
    h.to_string()
}

#[derive(Debug, Clone, Copy)]
pub struct TransformOptions {
    /// Also record the identifier under `details.legacy_q_id`.
    pub record_legacy_id: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            record_legacy_id: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowRejection {
    MissingId { line: u64 },
}

impl fmt::Display for RowRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowRejection::MissingId { line } => write!(f, "line {line}: empty q_id"),
        }
    }
}

fn cell(row: &SourceRow, key: &str) -> String {
    row.get(key).map(|v| v.trim().to_string()).unwrap_or_default()
}

fn variants(row: &SourceRow, suffix: &str) -> GenderVariants {
    GENDER_VARIANT_KEYS
        .iter()
        .filter_map(|k| {
            let v = cell(row, &format!("{k}{suffix}"));
            (!v.is_empty()).then(|| (k.to_string(), v))
        })
        .collect()
}

/// Map a source row onto a record. `line` is only used for the rejection.
pub fn transform_row(
    row: &SourceRow,
    kind: QuestionKind,
    line: u64,
    opts: TransformOptions,
) -> Result<QuestionRecord, RowRejection> {
    let id = cell(row, col::ID);
    if id.is_empty() {
        return Err(RowRejection::MissingId { line });
    }

    let payload = match kind {
        QuestionKind::Truth => Payload::Truth(TruthPayload {
            answers: cell(row, col::ANSWERS),
            answers_en: cell(row, col::ANSWERS_EN),
        }),
        QuestionKind::Balance => Payload::Balance(BalancePayload {
            choice_a: cell(row, col::CHOICE_A),
            choice_b: cell(row, col::CHOICE_B),
            choice_a_en: cell(row, col::CHOICE_A_EN),
            choice_b_en: cell(row, col::CHOICE_B_EN),
        }),
    };

    Ok(QuestionRecord {
        legacy_id: opts.record_legacy_id.then(|| id.clone()),
        id,
        content: cell(row, col::CONTENT),
        content_en: cell(row, col::CONTENT_EN),
        payload,
        order: cell(row, col::ORDER),
        code_names: expand_code_name_cell(&cell(row, col::CODE_NAME)),
        gender_variants: variants(row, ""),
        gender_variants_en: variants(row, "_en"),
    })
}

#[derive(Debug, Default)]
pub struct TransformBatch {
    pub records: Vec<QuestionRecord>,
    pub rejected: Vec<RowRejection>,
}

/// Transform every row, warning once per rejected row.
pub fn transform_rows<'a, I>(rows: I, kind: QuestionKind, opts: TransformOptions) -> TransformBatch
where
    I: IntoIterator<Item = (u64, &'a SourceRow)>,
{
    let mut out = TransformBatch::default();
    for (line, row) in rows {
        match transform_row(row, kind, line, opts) {
            Ok(rec) => out.records.push(rec),
            Err(rejection) => {
                warn!(target = "transform", kind = %kind, %rejection, "skipping source row");
                out.rejected.push(rejection);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> SourceRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn balance_row_maps_choices_order_and_tags() {
        let r = row(&[
            ("CodeName", "F-F-B-Ar-L2"),
            ("Order", " 17 "),
            ("q_id", " B26-00017 "),
            ("content", " 여행 가면? "),
            ("choice_a", "계획형"),
            ("choice_b", "즉흥형"),
            ("choice_a_en", "Planner"),
        ]);
        let rec = transform_row(&r, QuestionKind::Balance, 2, TransformOptions::default()).unwrap();
        assert_eq!(rec.id, "B26-00017");
        assert_eq!(rec.content, "여행 가면?");
        assert_eq!(rec.order, "17");
        assert_eq!(rec.legacy_id.as_deref(), Some("B26-00017"));
        assert_eq!(rec.code_names.len(), 5);
        match rec.payload {
            Payload::Balance(p) => {
                assert_eq!(p.choice_a, "계획형");
                assert_eq!(p.choice_a_en, "Planner");
                assert_eq!(p.choice_b_en, "");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn truth_row_ignores_choice_columns() {
        let r = row(&[
            ("q_id", "T1"),
            ("answers", "a|b"),
            ("choice_a", "should not leak"),
        ]);
        let rec = transform_row(&r, QuestionKind::Truth, 2, TransformOptions::default()).unwrap();
        let wire = rec.to_row();
        assert_eq!(wire["details"]["answers"], "a|b");
        assert!(wire["details"].get("choice_a").is_none());
    }

    #[test]
    fn empty_id_is_rejected() {
        let r = row(&[("q_id", "   "), ("content", "orphan")]);
        let err = transform_row(&r, QuestionKind::Truth, 7, TransformOptions::default()).unwrap_err();
        assert_eq!(err, RowRejection::MissingId { line: 7 });
    }

    #[test]
    fn legacy_id_can_be_disabled() {
        let r = row(&[("q_id", "T1")]);
        let opts = TransformOptions {
            record_legacy_id: false,
        };
        let rec = transform_row(&r, QuestionKind::Truth, 2, opts).unwrap();
        assert!(rec.legacy_id.is_none());
        assert!(rec.to_row()["details"].get("legacy_q_id").is_none());
    }

    #[test]
    fn gender_variants_strip_language_suffix() {
        let r = row(&[
            ("q_id", "T1"),
            ("var_m_f", "그녀에게"),
            ("var_f_f", "  "),
            ("var_m_f_en", "to her"),
        ]);
        let rec = transform_row(&r, QuestionKind::Truth, 2, TransformOptions::default()).unwrap();
        assert_eq!(rec.gender_variants.len(), 1);
        assert_eq!(rec.gender_variants_en.get("var_m_f").map(String::as_str), Some("to her"));
    }

    #[test]
    fn transform_rows_collects_rejections() {
        let good = row(&[("q_id", "B1")]);
        let bad = row(&[("q_id", "")]);
        let batch = transform_rows(
            vec![(2, &good), (3, &bad)],
            QuestionKind::Balance,
            TransformOptions::default(),
        );
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.rejected, vec![RowRejection::MissingId { line: 3 }]);
    }

    #[test]
    fn header_repair() {
        assert_eq!(normalize_header("\u{feff}CodeName"), "CodeName");
        assert_eq!(normalize_header("스CodeName"), "CodeName");
        assert_eq!(normalize_header(" q_id "), "q_id");
        assert_eq!(normalize_header("xCodeName"), "xCodeName");
        assert_eq!(normalize_header("notes"), "notes");
    }
}
