//! TenantRAG CLI - tenant-scoped document ingestion and retrieval.

mod app;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tenantrag_core::{keys, AppConfig, AuthContext, BatchId, CheckpointStatus, ClearanceTier};
use tenantrag_ingest::IngestionReport;
use tenantrag_retrieval::QueryOutcome;
use tenantrag_storage::{AuditStore, CheckpointStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::{load_documents, App};

#[derive(Parser)]
#[command(name = "tenantrag")]
#[command(about = "Tenant-scoped retrieval over business documents", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest documents from a JSON array or JSON-lines file
    Ingest {
        /// Documents file
        path: PathBuf,
    },
    /// Resume a paused or failed ingestion run
    Resume {
        /// Documents file holding the document
        path: PathBuf,
        /// Run to resume
        batch_id: String,
        /// Document id, required when the file holds several
        #[arg(long)]
        document: Option<String>,
    },
    /// Ask a question as a tenant member
    Query {
        /// Question text
        text: String,
        /// Caller tenant
        #[arg(long)]
        tenant: String,
        /// Caller entity
        #[arg(long)]
        entity: Option<String>,
        /// Caller clearance (basic, standard, advanced)
        #[arg(long, default_value = "basic")]
        clearance: ClearanceTier,
        /// Print the answer context, up to this many characters
        #[arg(long)]
        context: Option<usize>,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// List ingestion checkpoints
    Checkpoints {
        /// Only runs of this document
        #[arg(long)]
        document: Option<String>,
    },
    /// Show recent access denials
    Denials {
        /// Number of records
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show vector counts per namespace
    Stats,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = AppConfig::load(cli.config.as_deref())?;
    let app = App::open(config).await?;

    match cli.command {
        Commands::Ingest { path } => {
            let documents = load_documents(&path)?;
            let processor = app.processor()?;
            pause_on_ctrl_c(processor.pause_handle());

            let summary = processor.ingest_many(&documents).await;
            for report in &summary.reports {
                print_report(report);
            }
            for (document, error) in &summary.failures {
                println!("  {} | FAILED | {}", document, error);
            }
            println!(
                "Upserted {} vectors, estimated cost ${:.6}",
                summary.vectors_upserted(),
                summary.estimated_cost()
            );
            if !summary.failures.is_empty() {
                bail!("{} of {} documents failed", summary.failures.len(), documents.len());
            }
        }
        Commands::Resume {
            path,
            batch_id,
            document,
        } => {
            let batch_id: BatchId = batch_id.parse().map_err(|_| anyhow!("Invalid batch ID: {batch_id}"))?;
            let documents = load_documents(&path)?;
            let source = match document {
                Some(id) => documents
                    .into_iter()
                    .find(|d| d.id == id)
                    .ok_or_else(|| anyhow!("Document {id} not found in {}", path.display()))?,
                None if documents.len() == 1 => documents.into_iter().next().context("empty documents file")?,
                None => bail!("{} holds {} documents, pass --document", path.display(), documents.len()),
            };

            let processor = app.processor()?;
            pause_on_ctrl_c(processor.pause_handle());
            let report = processor.resume(&source, batch_id).await?;
            print_report(&report);
        }
        Commands::Query {
            text,
            tenant,
            entity,
            clearance,
            context,
            json,
        } => {
            let auth = AuthContext {
                tenant_id: tenant,
                entity_id: entity,
                clearance,
            };
            let orchestrator = app.orchestrator()?;
            let response = orchestrator.query_with_diagnostics(&text, &auth).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }

            let d = &response.diagnostics;
            println!("Intent: {} ({:?})", d.intent, d.mode);
            println!("  Namespaces: {}", d.namespaces.join(", "));
            if d.fallback_used {
                println!("  Retried without structured filter");
            }
            if d.denied > 0 {
                warn!(denied = d.denied, "Results dropped by access control");
            }

            match &response.outcome {
                QueryOutcome::Answered { matches } => {
                    println!("Matches ({})", matches.len());
                    for (rank, m) in matches.iter().enumerate() {
                        println!(
                            "  {}. {:.3} | {} | {} | {}",
                            rank + 1,
                            m.relevance(),
                            m.namespace,
                            m.id,
                            snippet(m.metadata.get(keys::TEXT).and_then(|v| v.as_str()).unwrap_or(""), 80),
                        );
                    }
                    if let Some(max_chars) = context {
                        let assembled = app.context().assemble_context(matches, max_chars).await;
                        println!("\n{assembled}");
                    }
                }
                QueryOutcome::LowRelevance { best_score, threshold } => {
                    println!(
                        "No confident answer (best {:.3} < {:.3}). Try a more specific question.",
                        best_score, threshold
                    );
                }
                QueryOutcome::NoResults => println!("No results"),
            }
        }
        Commands::Checkpoints { document } => {
            let checkpoints = app.storage.list_checkpoints(document.as_deref()).await?;

            println!("Checkpoints ({})", checkpoints.len());
            for cp in checkpoints {
                println!(
                    "  {} | {} | {} | {}/{} | {}",
                    cp.document_id,
                    cp.batch_id,
                    cp.status.as_str().to_uppercase(),
                    cp.last_processed_chunk,
                    cp.total_chunks,
                    cp.updated_at,
                );
                if let Some(error) = cp.error_message {
                    println!("      {}", error);
                }
            }
        }
        Commands::Denials { limit } => {
            let records = app.storage.list_denials(limit).await?;

            println!("Denials ({})", records.len());
            for r in records {
                println!(
                    "  {} | {}/{} | {} | {} | {}",
                    r.occurred_at,
                    r.tenant_id,
                    r.entity_id.as_deref().unwrap_or("-"),
                    r.namespace,
                    r.match_id,
                    r.reason,
                );
            }
        }
        Commands::Stats => {
            let stats = app.store.describe_stats().await?;

            println!("Index: {} vectors, dimension {}", stats.total_vector_count, stats.dimension);
            for (namespace, count) in &stats.namespaces {
                println!("  {}: {}", namespace, count);
            }
        }
    }

    Ok(())
}

/// Pause the running ingestion after its in-flight batch on Ctrl+C.
fn pause_on_ctrl_c(handle: tenantrag_ingest::PauseHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Pausing after the current batch");
            handle.pause();
        }
    });
}

fn print_report(report: &IngestionReport) {
    println!(
        "  {} | {} | {} | {}/{} chunks | {} vectors{}",
        report.document_id,
        report.namespace,
        report.status.as_str().to_uppercase(),
        report.processed_chunks,
        report.total_chunks,
        report.vectors_upserted,
        if report.resumed { " | resumed" } else { "" },
    );
    if report.status != CheckpointStatus::Completed {
        println!("      resume with batch id {}", report.batch_id);
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}...")
}
