use std::path::PathBuf;

use anyhow::Result;

use super::Session;
use crate::content::audit::{reconcile_sheet, ReconcileReport};
use crate::content::cleanup::{count_invalid_ids, purge_invalid_ids, PurgeReport};
use crate::content::csv_io::{read_sheet_file, write_sheet_file};
use crate::content::record::QuestionKind;

fn show(n: Option<usize>) -> String {
    n.map_or_else(|| "error".to_string(), |n| n.to_string())
}

pub async fn run_cleanup(session: &Session) -> Result<PurgeReport> {
    let report = purge_invalid_ids(session.store()).await;
    println!(
        "removed {} rows (empty q_id: {}, null q_id: {})",
        report.removed(),
        show(report.empty_ids),
        show(report.null_ids)
    );
    for e in &report.errors {
        println!("  {e}");
    }
    match count_invalid_ids(session.store()).await {
        Some(left) => println!("rows without q_id remaining: {left}"),
        None => println!("rows without q_id remaining: unknown"),
    }
    Ok(report)
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub kind: QuestionKind,
    pub csv: PathBuf,
}

pub async fn run_reconcile(session: &Session, cfg: ReconcileConfig) -> Result<ReconcileReport> {
    let mut sheet = read_sheet_file(&cfg.csv)?;
    let report = reconcile_sheet(session.store(), &mut sheet, cfg.kind).await?;
    if session.dry_run {
        println!("dry run: {} not rewritten", cfg.csv.display());
    } else {
        write_sheet_file(&sheet, &cfg.csv)?;
    }
    println!(
        "{}: {} rows matched, {} without a stored match",
        cfg.csv.display(),
        report.matched,
        report.missed.len()
    );
    for (line, content) in &report.missed {
        println!("  line {line}: {content}");
    }
    Ok(report)
}
