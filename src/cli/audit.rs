use anyhow::{bail, Result};

use super::Session;
use crate::content::audit::{
    audit_code_segments, audit_lengths, find_codes, probe, LengthHit, LengthThresholds,
};
use crate::content::code_names::split_code_names;
use crate::content::record::{QuestionKind, QuestionRecord};
use crate::content::verify::fetch_kind;

async fn fetch_all(session: &Session) -> Vec<QuestionRecord> {
    let mut out = Vec::new();
    for kind in QuestionKind::ALL {
        out.extend(fetch_kind(session.store(), kind).await);
    }
    out
}

fn print_hits(title: &str, limit: usize, hits: &[LengthHit]) {
    println!("{title} over {limit} chars: {}", hits.len());
    for h in hits {
        println!("  {:>4}  {:<12} {:<9} {}", h.chars, h.id, h.field, h.text);
    }
}

pub async fn run_lengths(session: &Session, th: LengthThresholds) -> Result<()> {
    let records = fetch_all(session).await;
    let report = audit_lengths(&records, th);
    println!("checked {} questions", records.len());
    print_hits("content", th.primary, &report.primary);
    print_hits("content_en", th.secondary, &report.secondary);
    print_hits("choices", th.choice, &report.choices);
    Ok(())
}

pub async fn run_codes(session: &Session) -> Result<()> {
    let records = fetch_all(session).await;
    let report = audit_code_segments(&records);
    println!("{} tags across {} questions", report.tags, records.len());
    println!("relationships: {}", report.relationships.iter().cloned().collect::<Vec<_>>().join(", "));
    println!("gender pairs:  {}", report.gender_pairs.iter().cloned().collect::<Vec<_>>().join(", "));
    Ok(())
}

/// `codes` may hold single tags or comma lists.
pub async fn run_find_codes(session: &Session, codes: &[String]) -> Result<()> {
    let candidates: Vec<String> = codes.iter().flat_map(|c| split_code_names(c)).collect();
    if candidates.is_empty() {
        bail!("no code names given");
    }
    let report = find_codes(session.store(), &candidates).await?;
    println!("{} questions share a tag with {}", report.count, candidates.join(","));
    if let Some(first) = report.first {
        println!("first match: {}", serde_json::to_string_pretty(&first)?);
    }
    Ok(())
}

pub async fn run_probe(session: &Session) -> Result<()> {
    let anon = session.anon_store()?;
    let report = probe(session.store(), anon.as_deref()).await?;
    match &report.sample {
        Some(row) => println!("sample row: {}", serde_json::to_string_pretty(row)?),
        None => println!("sample row: table is empty"),
    }
    println!("sample code_names: {}", report.sample_code_names.join(", "));
    let fmt = |n: Option<u64>| n.map_or_else(|| "unavailable".to_string(), |n| n.to_string());
    println!("rows visible to {}: {}", session.store().name(), fmt(report.count));
    println!("rows visible to anon key: {}", fmt(report.anon_count));
    if let (Some(all), Some(anon)) = (report.count, report.anon_count) {
        if anon < all {
            println!("{} rows are hidden from the anon key", all - anon);
        }
    }
    Ok(())
}
