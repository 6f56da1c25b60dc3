//! Code names ("tags") attached to questions.
//!
//! A code name looks like `MP-CP-Rel-Topic-Lvl`, e.g. `F-F-B-Ar-L2`. A tag whose
//! last segment is a level (`L` + one digit) and which has at least five
//! segments is a template for all five levels of the same prefix.
use itertools::Itertools;

pub const MIN_TEMPLATE_SEGMENTS: usize = 5;
pub const LEVELS: std::ops::RangeInclusive<u8> = 1..=5;

fn is_level_segment(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0] == b'L' && bytes[1].is_ascii_digit()
}

/// Split a comma-separated cell into trimmed, non-empty tags.
pub fn split_code_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_code_names(codes: &[String]) -> String {
    codes.join(",")
}

/// Expand one tag. Templated tags become `L1..L5` in ascending order;
/// anything else is returned unchanged.
pub fn expand_code_name(code: &str) -> Vec<String> {
    let parts: Vec<&str> = code.split('-').collect();
    match parts.split_last() {
        Some((last, prefix))
            if parts.len() >= MIN_TEMPLATE_SEGMENTS && is_level_segment(last) =>
        {
            let prefix = prefix.join("-");
            LEVELS.map(|lvl| format!("{prefix}-L{lvl}")).collect()
        }
        _ => vec![code.to_string()],
    }
}

/// Expand every tag and drop duplicates, keeping first occurrence.
///
/// Re-expanding an already expanded set yields the same list: each `Lk`
/// member maps back onto the same five tags, which are deduplicated.
pub fn expand_code_names<S: AsRef<str>>(codes: &[S]) -> Vec<String> {
    codes
        .iter()
        .flat_map(|c| expand_code_name(c.as_ref().trim()))
        .filter(|c| !c.is_empty())
        .unique()
        .collect()
}

/// Parse a source cell and expand it in one step.
pub fn expand_code_name_cell(raw: &str) -> Vec<String> {
    expand_code_names(&split_code_names(raw))
}

/// Relationship segment (third position) of a tag, if present.
pub fn relationship_segment(code: &str) -> Option<&str> {
    code.split('-').nth(2)
}

/// Gender pair prefix (`M-F`, ...) of a tag, if present.
pub fn gender_pair(code: &str) -> Option<String> {
    let mut parts = code.split('-');
    match (parts.next(), parts.next()) {
        (Some(a), Some(b)) => Some(format!("{a}-{b}")),
        _ => None,
    }
}
