use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use quiz_sync::cli::{audit, import, maintenance, patch, verify, GlobalOpts, Session};
use quiz_sync::content::audit::LengthThresholds;
use quiz_sync::logging::{init_tracing, DEFAULT_FILTER};
use quiz_sync::QuestionKind;
use tracing::error;

fn parse_kind(s: &str) -> Result<QuestionKind, String> {
    s.parse::<QuestionKind>().map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(name = "qsync", version, about = "Quiz question sync and maintenance CLI")]
struct Cli {
    /// KEY=VALUE file with endpoint and keys; process env is the fallback
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,
    /// Run against an in-memory table instead of the remote store
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Import one source CSV (upsert by q_id, batch with per-record fallback)
    Import {
        /// T/B (or truth/balance)
        #[arg(long, value_parser = parse_kind)]
        kind: QuestionKind,
        #[arg(long)]
        csv: PathBuf,
        /// Override SYNC_BATCH_SIZE (defaults to env/50)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Write expanded code names back into the CSV
        #[arg(long, default_value_t = false)]
        rewrite_source: bool,
        /// Do not store details.legacy_q_id
        #[arg(long, default_value_t = false)]
        no_legacy_id: bool,
    },
    /// Wipe the given kinds, re-import them and verify the counts
    Migrate {
        #[arg(long)]
        balance: Option<PathBuf>,
        #[arg(long)]
        truth: Option<PathBuf>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long, default_value_t = false)]
        no_legacy_id: bool,
    },
    /// Print stored question counts per kind
    Count {
        #[arg(long, value_parser = parse_kind)]
        kind: Vec<QuestionKind>,
    },
    /// Export stored questions to CSV in the source layout
    Export {
        #[arg(long, value_parser = parse_kind)]
        kind: Vec<QuestionKind>,
        #[arg(long, default_value = "exports")]
        out_dir: PathBuf,
    },
    /// Patch fields of existing questions (never creates one)
    Patch {
        /// JSON array of {id, content?, content_en?, details?, details_en?}
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        content_en: Option<String>,
        /// key=value merged into details (repeatable)
        #[arg(long = "set")]
        set: Vec<String>,
        /// key=value merged into details_en (repeatable)
        #[arg(long = "set-en")]
        set_en: Vec<String>,
    },
    /// Delete rows whose q_id is empty or null
    Cleanup,
    /// Fill q_id and CodeName in a local CSV from stored rows with the same content
    Reconcile {
        #[arg(long, value_parser = parse_kind)]
        kind: QuestionKind,
        #[arg(long)]
        csv: PathBuf,
    },
    /// List prompts longer than the display limits
    AuditLengths {
        #[arg(long, default_value_t = 45)]
        max_content: usize,
        #[arg(long, default_value_t = 80)]
        max_content_en: usize,
        #[arg(long, default_value_t = 15)]
        max_choice: usize,
        #[arg(long, default_value_t = 20)]
        top: usize,
    },
    /// List distinct relationship segments and gender pairs across all tags
    AuditCodes,
    /// Count questions sharing any of the given code names
    FindCodes {
        /// Code names, space or comma separated
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Connectivity check: sample row and counts for the service and anon keys
    Probe,
}

async fn dispatch(session: &Session, command: Commands) -> Result<()> {
    match command {
        Commands::Import { kind, csv, batch_size, rewrite_source, no_legacy_id } => {
            import::run(
                session,
                import::ImportConfig {
                    kind,
                    csv,
                    batch_size,
                    rewrite_source,
                    record_legacy_id: !no_legacy_id,
                },
            )
            .await?;
        }
        Commands::Migrate { balance, truth, batch_size, no_legacy_id } => {
            import::run_migrate(
                session,
                import::MigrateConfig {
                    balance,
                    truth,
                    batch_size,
                    record_legacy_id: !no_legacy_id,
                },
            )
            .await?;
        }
        Commands::Count { kind } => verify::run_count(session, &kind).await?,
        Commands::Export { kind, out_dir } => {
            verify::run_export(session, verify::ExportConfig { kinds: kind, out_dir }).await?;
        }
        Commands::Patch { file, id, content, content_en, set, set_en } => {
            patch::run(
                session,
                patch::PatchConfig { file, id, content, content_en, set, set_en },
            )
            .await?;
        }
        Commands::Cleanup => {
            maintenance::run_cleanup(session).await?;
        }
        Commands::Reconcile { kind, csv } => {
            maintenance::run_reconcile(session, maintenance::ReconcileConfig { kind, csv }).await?;
        }
        Commands::AuditLengths { max_content, max_content_en, max_choice, top } => {
            let th = LengthThresholds {
                primary: max_content,
                secondary: max_content_en,
                choice: max_choice,
                top,
            };
            audit::run_lengths(session, th).await?;
        }
        Commands::AuditCodes => audit::run_codes(session).await?,
        Commands::FindCodes { codes } => audit::run_find_codes(session, &codes).await?,
        Commands::Probe => audit::run_probe(session).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(DEFAULT_FILTER)?;

    let opts = GlobalOpts {
        env_file: args.env_file,
        dry_run: args.dry_run,
    };
    let session = match Session::open(&opts) {
        Ok(s) => s,
        Err(e) => {
            error!(target = "qsync", error = %e, "configuration error");
            return Err(e);
        }
    };
    dispatch(&session, args.command).await
}
