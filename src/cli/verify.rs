use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;

use super::Session;
use crate::content::csv_io::write_export_file;
use crate::content::record::QuestionKind;
use crate::content::verify::{count_kind, fetch_kind};

pub async fn run_count(session: &Session, kinds: &[QuestionKind]) -> Result<()> {
    let kinds = if kinds.is_empty() { &QuestionKind::ALL[..] } else { kinds };
    let mut total = 0u64;
    for &kind in kinds {
        let n = count_kind(session.store(), kind).await;
        total += n;
        println!("{:<8} {n}", kind.label());
    }
    println!("{:<8} {total}", "total");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub kinds: Vec<QuestionKind>,
    pub out_dir: PathBuf,
}

pub fn export_path(dir: &Path, kind: QuestionKind, stamp: &str) -> PathBuf {
    dir.join(format!("{}_questions_{stamp}.csv", kind.label().to_lowercase()))
}

/// Export each kind into its own timestamped CSV. Returns the written paths.
pub async fn run_export(session: &Session, cfg: ExportConfig) -> Result<Vec<PathBuf>> {
    let kinds = if cfg.kinds.is_empty() { QuestionKind::ALL.to_vec() } else { cfg.kinds };
    let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let mut written = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let records = fetch_kind(session.store(), kind).await;
        let path = export_path(&cfg.out_dir, kind, &stamp);
        let n = write_export_file(&records, kind, &path)?;
        println!("{}: {n} rows -> {}", kind.label(), path.display());
        written.push(path);
    }
    Ok(written)
}
