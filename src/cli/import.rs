use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use super::Session;
use crate::content::csv_io::{read_sheet_file, write_sheet_file};
use crate::content::record::QuestionKind;
use crate::content::sync::{upsert_records, SyncSummary};
use crate::content::transform::{transform_rows, TransformOptions};
use crate::content::verify::{count_kind, run_migration, MigrationSource};

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub kind: QuestionKind,
    pub csv: PathBuf,
    pub batch_size: Option<usize>,
    /// Write the expanded `CodeName` column back into the source file.
    pub rewrite_source: bool,
    pub record_legacy_id: bool,
}

pub(crate) fn print_summary(label: &str, summary: &SyncSummary) {
    println!(
        "{label}: {} written ({} upserted, {} updated, {} inserted), {} failed, {} of {} batches via fallback",
        summary.written(),
        summary.upserted,
        summary.updated,
        summary.inserted,
        summary.failed(),
        summary.fallback_batches,
        summary.batches,
    );
    for (id, reason) in &summary.failures {
        println!("  failed {id}: {reason}");
    }
}

pub async fn run(session: &Session, cfg: ImportConfig) -> Result<SyncSummary> {
    let mut sheet = read_sheet_file(&cfg.csv)?;
    let opts = TransformOptions {
        record_legacy_id: cfg.record_legacy_id,
    };
    let batch = transform_rows(sheet.numbered_rows(), cfg.kind, opts);
    println!(
        "{}: {} rows read, {} valid, {} rejected",
        cfg.csv.display(),
        sheet.rows.len(),
        batch.records.len(),
        batch.rejected.len()
    );
    for rejection in &batch.rejected {
        println!("  skipped {rejection}");
    }

    let batch_size = session.batch_size(cfg.batch_size);
    info!(target = "import", kind = %cfg.kind, batch_size, records = batch.records.len(), "starting import");
    let summary = upsert_records(session.store(), &batch.records, batch_size).await;
    print_summary(cfg.kind.label(), &summary);

    if cfg.rewrite_source {
        let changed = sheet.expand_code_name_column();
        if session.dry_run {
            println!("dry run: would rewrite {} CodeName cells in {}", changed, cfg.csv.display());
        } else {
            write_sheet_file(&sheet, &cfg.csv)?;
            println!("rewrote {} CodeName cells in {}", changed, cfg.csv.display());
        }
    }

    let total = count_kind(session.store(), cfg.kind).await;
    println!("{} questions now stored: {}", cfg.kind.label(), total);
    Ok(summary)
}

#[derive(Debug, Clone)]
pub struct MigrateConfig {
    pub balance: Option<PathBuf>,
    pub truth: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub record_legacy_id: bool,
}

impl MigrateConfig {
    fn sources(&self) -> Vec<MigrationSource> {
        [
            (QuestionKind::Balance, &self.balance),
            (QuestionKind::Truth, &self.truth),
        ]
        .into_iter()
        .filter_map(|(kind, path)| path.clone().map(|path| MigrationSource { kind, path }))
        .collect()
    }
}

pub async fn run_migrate(session: &Session, cfg: MigrateConfig) -> Result<bool> {
    let sources = cfg.sources();
    if sources.is_empty() {
        anyhow::bail!("nothing to migrate: pass --balance and/or --truth");
    }
    let opts = TransformOptions {
        record_legacy_id: cfg.record_legacy_id,
    };
    let report = run_migration(session.store(), &sources, session.batch_size(cfg.batch_size), opts).await?;
    for km in &report.kinds {
        println!(
            "{}: deleted {}, {} left after wipe, {} valid rows ({} rejected), {} stored after import",
            km.kind.label(),
            km.deleted,
            km.count_after_wipe,
            km.valid_rows,
            km.rejected_rows,
            km.count_after_import
        );
        print_summary(km.kind.label(), &km.sync);
    }
    let ok = report.consistent();
    println!("{}", if ok { "migration verified" } else { "migration counts do not match" });
    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::memory::MemoryStore;

    const TRUTH: &str = "CodeName,Order,q_id,content,answers\n\
M-F-Lo-Em-L1,1,T-1,최근에 운 적?,\n\
,2,,아이디 없음,\n";

    #[tokio::test]
    async fn dry_run_import_leaves_source_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("truth.csv");
        std::fs::write(&csv, TRUTH).unwrap();
        let session = Session::from_store(Box::new(MemoryStore::new()));
        let summary = run(
            &session,
            ImportConfig {
                kind: QuestionKind::Truth,
                csv: csv.clone(),
                batch_size: None,
                rewrite_source: true,
                record_legacy_id: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(summary.written(), 1);
        assert_eq!(std::fs::read_to_string(&csv).unwrap(), TRUTH);
        assert_eq!(count_kind(session.store(), QuestionKind::Truth).await, 1);
    }

    #[tokio::test]
    async fn migrate_requires_a_source() {
        let session = Session::from_store(Box::new(MemoryStore::new()));
        let cfg = MigrateConfig {
            balance: None,
            truth: None,
            batch_size: None,
            record_legacy_id: true,
        };
        assert!(run_migrate(&session, cfg).await.is_err());
    }
}
