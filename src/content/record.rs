use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column names of the remote content table.
pub mod columns {
    pub const KEY: &str = "q_id";
    pub const KIND: &str = "type";
    pub const CONTENT: &str = "content";
    pub const CONTENT_EN: &str = "content_en";
    pub const DETAILS: &str = "details";
    pub const DETAILS_EN: &str = "details_en";
    pub const CODE_NAMES: &str = "code_names";
    pub const GENDER_VARIANTS: &str = "gender_variants";
    pub const GENDER_VARIANTS_EN: &str = "gender_variants_en";
}

/// Keys used inside the `details` / `details_en` objects.
pub mod detail_keys {
    pub const ANSWERS: &str = "answers";
    pub const CHOICE_A: &str = "choice_a";
    pub const CHOICE_B: &str = "choice_b";
    pub const ORDER: &str = "order";
    pub const LEGACY_ID: &str = "legacy_q_id";
}

/// The 4-way gender pair keys used by `gender_variants`.
pub const GENDER_VARIANT_KEYS: [&str; 4] = ["var_m_f", "var_f_m", "var_m_m", "var_f_f"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuestionKind {
    Truth,
    Balance,
}

impl QuestionKind {
    pub const ALL: [QuestionKind; 2] = [QuestionKind::Balance, QuestionKind::Truth];

    /// Single-letter code stored in the `type` column.
    pub fn code(self) -> &'static str {
        match self {
            QuestionKind::Truth => "T",
            QuestionKind::Balance => "B",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QuestionKind::Truth => "Truth",
            QuestionKind::Balance => "Balance",
        }
    }

    /// Detail keys that only this kind may carry.
    pub fn payload_keys(self) -> &'static [&'static str] {
        match self {
            QuestionKind::Truth => &[detail_keys::ANSWERS],
            QuestionKind::Balance => &[detail_keys::CHOICE_A, detail_keys::CHOICE_B],
        }
    }

    /// Every value the `type` column may hold for this kind, canonical first.
    pub fn stored_spellings(self) -> &'static [&'static str] {
        match self {
            QuestionKind::Truth => &["T", "t", "truth", "Truth", "TRUTH"],
            QuestionKind::Balance => &["B", "b", "balance", "Balance", "BALANCE"],
        }
    }

    pub fn other(self) -> QuestionKind {
        match self {
            QuestionKind::Truth => QuestionKind::Balance,
            QuestionKind::Balance => QuestionKind::Truth,
        }
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for QuestionKind {
    type Err = anyhow::Error;

    /// Accepts the stored codes as well as the lowercase names an older import wrote.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "t" | "truth" => Ok(QuestionKind::Truth),
            "b" | "balance" => Ok(QuestionKind::Balance),
            other => Err(anyhow!("unsupported question type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TruthPayload {
    pub answers: String,
    pub answers_en: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalancePayload {
    pub choice_a: String,
    pub choice_b: String,
    pub choice_a_en: String,
    pub choice_b_en: String,
}

/// Kind-specific payload. The variant decides the record's kind, so a Truth
/// record can never carry choices and a Balance record never carries answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Truth(TruthPayload),
    Balance(BalancePayload),
}

impl Payload {
    pub fn kind(&self) -> QuestionKind {
        match self {
            Payload::Truth(_) => QuestionKind::Truth,
            Payload::Balance(_) => QuestionKind::Balance,
        }
    }

    fn primary_entries(&self) -> Vec<(&'static str, &str)> {
        match self {
            Payload::Truth(p) => vec![(detail_keys::ANSWERS, p.answers.as_str())],
            Payload::Balance(p) => vec![
                (detail_keys::CHOICE_A, p.choice_a.as_str()),
                (detail_keys::CHOICE_B, p.choice_b.as_str()),
            ],
        }
    }

    fn secondary_entries(&self) -> Vec<(&'static str, &str)> {
        match self {
            Payload::Truth(p) => vec![(detail_keys::ANSWERS, p.answers_en.as_str())],
            Payload::Balance(p) => vec![
                (detail_keys::CHOICE_A, p.choice_a_en.as_str()),
                (detail_keys::CHOICE_B, p.choice_b_en.as_str()),
            ],
        }
    }
}

/// Localised text variants keyed by gender pair (`var_m_f`, ...).
pub type GenderVariants = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRecord {
    pub id: String,
    pub content: String,
    pub content_en: String,
    pub payload: Payload,
    /// Sequence position from the source sheet; stored in `details.order`.
    pub order: String,
    pub legacy_id: Option<String>,
    pub code_names: Vec<String>,
    pub gender_variants: GenderVariants,
    pub gender_variants_en: GenderVariants,
}

/// Shape of a row as the remote table returns it. Unknown columns are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredRow {
    #[serde(default)]
    pub q_id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub content_en: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
    #[serde(default)]
    pub details_en: Option<Value>,
    #[serde(default)]
    pub code_names: Option<Value>,
    #[serde(default)]
    pub gender_variants: Option<Value>,
    #[serde(default)]
    pub gender_variants_en: Option<Value>,
}

impl QuestionRecord {
    pub fn kind(&self) -> QuestionKind {
        self.payload.kind()
    }

    /// Encode into the JSON object written to the remote table.
    pub fn to_row(&self) -> Value {
        let mut details = Map::new();
        for (k, v) in self.payload.primary_entries() {
            details.insert(k.to_string(), Value::String(v.to_string()));
        }
        details.insert(
            detail_keys::ORDER.to_string(),
            Value::String(self.order.clone()),
        );
        if let Some(legacy) = &self.legacy_id {
            details.insert(
                detail_keys::LEGACY_ID.to_string(),
                Value::String(legacy.clone()),
            );
        }

        let mut details_en = Map::new();
        for (k, v) in self.payload.secondary_entries() {
            details_en.insert(k.to_string(), Value::String(v.to_string()));
        }

        let mut row = Map::new();
        row.insert(columns::KEY.into(), Value::String(self.id.clone()));
        row.insert(columns::KIND.into(), Value::String(self.kind().code().into()));
        row.insert(columns::CONTENT.into(), Value::String(self.content.clone()));
        row.insert(
            columns::CONTENT_EN.into(),
            Value::String(self.content_en.clone()),
        );
        row.insert(columns::DETAILS.into(), Value::Object(details));
        row.insert(columns::DETAILS_EN.into(), Value::Object(details_en));
        row.insert(
            columns::CODE_NAMES.into(),
            Value::Array(
                self.code_names
                    .iter()
                    .map(|c| Value::String(c.clone()))
                    .collect(),
            ),
        );
        row.insert(
            columns::GENDER_VARIANTS.into(),
            variants_to_value(&self.gender_variants),
        );
        row.insert(
            columns::GENDER_VARIANTS_EN.into(),
            variants_to_value(&self.gender_variants_en),
        );
        Value::Object(row)
    }

    /// Decode a stored row. Fails on a missing identifier or unsupported type;
    /// missing text and payload fields decode as empty strings.
    pub fn from_row(row: &Value) -> Result<Self> {
        let stored: StoredRow = serde_json::from_value(row.clone())?;
        let details = object_or_empty(stored.details.as_ref());
        let details_en = object_or_empty(stored.details_en.as_ref());

        let legacy_id = details
            .get(detail_keys::LEGACY_ID)
            .and_then(value_as_text)
            .filter(|s| !s.is_empty());
        let id = stored
            .q_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| legacy_id.clone());
        let Some(id) = id else {
            bail!("stored row has no identifier");
        };

        let kind: QuestionKind = stored
            .kind
            .as_deref()
            .ok_or_else(|| anyhow!("row {id} has no type"))?
            .parse()?;

        let text = |m: &Map<String, Value>, key: &str| {
            m.get(key).and_then(value_as_text).unwrap_or_default()
        };
        let payload = match kind {
            QuestionKind::Truth => Payload::Truth(TruthPayload {
                answers: text(&details, detail_keys::ANSWERS),
                answers_en: text(&details_en, detail_keys::ANSWERS),
            }),
            QuestionKind::Balance => Payload::Balance(BalancePayload {
                choice_a: text(&details, detail_keys::CHOICE_A),
                choice_b: text(&details, detail_keys::CHOICE_B),
                choice_a_en: text(&details_en, detail_keys::CHOICE_A),
                choice_b_en: text(&details_en, detail_keys::CHOICE_B),
            }),
        };

        Ok(QuestionRecord {
            id,
            content: stored.content.unwrap_or_default(),
            content_en: stored.content_en.unwrap_or_default(),
            payload,
            order: text(&details, detail_keys::ORDER),
            legacy_id,
            code_names: code_names_from_value(stored.code_names.as_ref()),
            gender_variants: variants_from_value(stored.gender_variants.as_ref()),
            gender_variants_en: variants_from_value(stored.gender_variants_en.as_ref()),
        })
    }
}

fn variants_to_value(variants: &GenderVariants) -> Value {
    Value::Object(
        variants
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn variants_from_value(value: Option<&Value>) -> GenderVariants {
    object_or_empty(value)
        .iter()
        .filter_map(|(k, v)| value_as_text(v).map(|s| (k.clone(), s)))
        .filter(|(_, v)| !v.is_empty())
        .collect()
}

/// `code_names` is a text array, but some rows hold a comma-joined string.
pub fn code_names_from_value(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(value_as_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => crate::content::code_names::split_code_names(s),
        _ => Vec::new(),
    }
}

/// Treat a JSON object, a JSON-encoded string, or nothing as a details map.
pub fn object_or_empty(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(m)) => m.clone(),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(m)) => m,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

pub fn value_as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn balance() -> QuestionRecord {
        QuestionRecord {
            id: "B26-00378".into(),
            content: "비 오는 날 데이트?".into(),
            content_en: "Date on a rainy day?".into(),
            payload: Payload::Balance(BalancePayload {
                choice_a: "집콕".into(),
                choice_b: "우산 산책".into(),
                choice_a_en: "Stay in".into(),
                choice_b_en: "Umbrella walk".into(),
            }),
            order: "378".into(),
            legacy_id: Some("B26-00378".into()),
            code_names: vec!["F-F-B-Ar-L1".into(), "F-F-B-Ar-L2".into()],
            gender_variants: GenderVariants::new(),
            gender_variants_en: GenderVariants::new(),
        }
    }

    #[test]
    fn kind_parses_codes_and_legacy_names() {
        assert_eq!("B".parse::<QuestionKind>().unwrap(), QuestionKind::Balance);
        assert_eq!("t".parse::<QuestionKind>().unwrap(), QuestionKind::Truth);
        assert_eq!("truth".parse::<QuestionKind>().unwrap(), QuestionKind::Truth);
        assert_eq!(" Balance ".parse::<QuestionKind>().unwrap(), QuestionKind::Balance);
        assert!("X".parse::<QuestionKind>().is_err());
    }

    #[test]
    fn balance_row_never_carries_answers() {
        let row = balance().to_row();
        assert_eq!(row["type"], "B");
        assert_eq!(row["details"]["choice_a"], "집콕");
        assert_eq!(row["details"]["order"], "378");
        assert_eq!(row["details"]["legacy_q_id"], "B26-00378");
        assert!(row["details"].get("answers").is_none());
        assert!(row["details_en"].get("answers").is_none());
        assert_eq!(row["details_en"]["choice_b"], "Umbrella walk");
    }

    #[test]
    fn decodes_stored_row_and_ignores_internal_columns() {
        let row = json!({
            "id": 991,
            "q_id": "T26-00001",
            "type": "T",
            "content": "가장 최근에 운 적은?",
            "content_en": null,
            "details": { "answers": "", "order": 1, "extra": true },
            "details_en": null,
            "code_names": ["M-F-Lo-Em-L3"],
        });
        let rec = QuestionRecord::from_row(&row).unwrap();
        assert_eq!(rec.id, "T26-00001");
        assert_eq!(rec.kind(), QuestionKind::Truth);
        assert_eq!(rec.order, "1");
        assert_eq!(rec.content_en, "");
        assert_eq!(rec.code_names, vec!["M-F-Lo-Em-L3".to_string()]);
    }

    #[test]
    fn falls_back_to_legacy_id_and_string_details() {
        let row = json!({
            "q_id": "",
            "type": "balance",
            "details": "{\"choice_a\":\"A\",\"choice_b\":\"B\",\"legacy_q_id\":\"B-9\"}",
            "code_names": "X-Y-Z-W-L1, X-Y-Z-W-L2",
        });
        let rec = QuestionRecord::from_row(&row).unwrap();
        assert_eq!(rec.id, "B-9");
        assert_eq!(rec.code_names.len(), 2);
        match rec.payload {
            Payload::Balance(p) => assert_eq!(p.choice_b, "B"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn rejects_rows_without_identifier_or_type() {
        assert!(QuestionRecord::from_row(&json!({ "type": "T" })).is_err());
        assert!(QuestionRecord::from_row(&json!({ "q_id": "A", "type": "Q" })).is_err());
    }

    #[test]
    fn row_decode_restores_encoded_record() {
        let rec = balance();
        assert_eq!(QuestionRecord::from_row(&rec.to_row()).unwrap(), rec);
    }
}
