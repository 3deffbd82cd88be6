//! # hybrid-search CLI (`hsx`)
//!
//! The `hsx` binary is the primary interface for hybrid-search. It provides
//! commands for database initialization, ingestion, search, feedback,
//! embedding backfill, statistics and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! hsx --config ./config/hsx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hsx init` | Create the SQLite database and schema |
//! | `hsx ingest [--path <dir>]` | Index the configured (or given) source tree |
//! | `hsx ingest-file <doc_id> <path>` | Index a single file under an explicit id |
//! | `hsx purge <doc_id>` | Remove a document from the index |
//! | `hsx search "<query>"` | Hybrid search with feedback re-ranking |
//! | `hsx feedback "<query>" <doc_id> <label>` | Record a positive/negative judgment |
//! | `hsx embed pending` | Embed chunks that were indexed sparse-only |
//! | `hsx stats` | Print index statistics |
//! | `hsx serve` | Start the JSON HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hybrid_search::search::SearchArgs;
use hybrid_search::{config, embed_cmd, ingest, logging, migrate, search, server, stats};

/// hybrid-search CLI: a local-first hybrid retrieval engine with online
/// feedback re-ranking.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/hsx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "hsx",
    about = "hybrid-search: BM25 + dense retrieval with online feedback re-ranking",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hsx.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunks, feedback). Running it again is safe.
    Init,

    /// Index every matching file of a source tree.
    ///
    /// Unchanged files are skipped by content hash.
    Ingest {
        /// Root directory; overrides `[source].root`.
        #[arg(long)]
        path: Option<PathBuf>,

        /// Purge indexed documents under the root whose files no longer exist.
        #[arg(long)]
        prune: bool,
    },

    /// Index one file under an explicit document id.
    IngestFile {
        doc_id: String,
        path: PathBuf,
    },

    /// Remove a document from the index. Its feedback history is kept.
    Purge { doc_id: String },

    /// Search indexed documents.
    Search {
        /// The search query string.
        query: String,

        /// Number of results (defaults to `[retrieval].final_limit`).
        #[arg(long)]
        k: Option<usize>,

        /// Override the BM25 fusion weight for this query.
        #[arg(long)]
        bm25_weight: Option<f64>,

        /// Override the vector fusion weight for this query.
        #[arg(long)]
        vector_weight: Option<f64>,

        /// Show per-component scores and stage timings.
        #[arg(long)]
        explain: bool,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Record a judgment on a (query, document) pair.
    Feedback {
        query: String,
        doc_id: String,
        /// `positive` or `negative`.
        label: String,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Print index statistics.
    Stats,

    /// Start the JSON HTTP server on `[server].bind`.
    Serve,
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that were indexed sparse-only after a provider failure.
    Pending {
        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging, cli.verbose)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, prune } => {
            ingest::run_ingest(&cfg, path, prune).await?;
        }
        Commands::IngestFile { doc_id, path } => {
            ingest::run_ingest_file(&cfg, &doc_id, &path).await?;
        }
        Commands::Purge { doc_id } => {
            ingest::run_purge(&cfg, &doc_id).await?;
        }
        Commands::Search {
            query,
            k,
            bm25_weight,
            vector_weight,
            explain,
            json,
        } => {
            search::run_search(
                &cfg,
                SearchArgs {
                    query,
                    k,
                    bm25_weight,
                    vector_weight,
                    explain,
                    json,
                },
            )
            .await?;
        }
        Commands::Feedback {
            query,
            doc_id,
            label,
        } => {
            search::run_feedback(&cfg, &query, &doc_id, &label).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { dry_run } => {
                embed_cmd::run_embed_pending(&cfg, dry_run).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
