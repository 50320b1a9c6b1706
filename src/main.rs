//! # Post Harness CLI (`posts`)
//!
//! ## Usage
//!
//! ```bash
//! posts --config ./config/posts.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `posts init` | Create the source directory and the vector index |
//! | `posts update` | Index new and changed source documents |
//! | `posts status` | Show the collection, chunk count and fingerprinted files |
//! | `posts search "<query>"` | Show the chunks nearest to a query |
//! | `posts generate` | Generate posts from the indexed documents |
//! | `posts serve` | Start the HTTP API |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use post_harness::config::{self, Config};
use post_harness::logging;
use post_harness::server;
use post_harness::services::Services;

/// Post Harness: keeps a vector index in sync with a folder of documents
/// and writes short social posts from it.
#[derive(Parser)]
#[command(
    name = "posts",
    about = "Incremental document index and RAG post generator",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/posts.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the source directory and the vector index. Idempotent.
    Init,

    /// Reconcile the source directory into the index.
    ///
    /// Only files that are new or whose content hash changed since the last
    /// successful update are loaded and embedded.
    Update,

    /// Show the collection name, chunk count and fingerprinted files.
    Status,

    /// Show the chunks nearest to a query.
    Search {
        query: String,

        /// Number of chunks to return (defaults to `[retrieval].k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Update the index, then generate posts.
    Generate {
        /// Number of posts (defaults to `[generation].default_posts`).
        #[arg(long)]
        count: Option<usize>,

        /// Prompt to use instead of the configured default.
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&cfg).await?,
        Commands::Update => run_update(&cfg).await?,
        Commands::Status => run_status(&cfg).await?,
        Commands::Search { query, k } => run_search(&cfg, &query, k).await?,
        Commands::Generate { count, prompt } => run_generate(&cfg, count, prompt).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}

async fn run_init(cfg: &Config) -> Result<()> {
    let services = Services::from_config(cfg)?;
    let index = services.synchronizer.index().await?;
    println!("Index initialized successfully.");
    println!("  sources:    {}", cfg.sources.dir.display());
    println!("  index:      {}", cfg.index.path.display());
    println!("  collection: {}", index.collection());
    Ok(())
}

async fn run_update(cfg: &Config) -> Result<()> {
    let services = Services::from_config(cfg)?;
    let reconciled = services.synchronizer.reconcile().await?;
    let report = &reconciled.report;

    println!("update");
    println!("  scanned: {}", report.scanned);
    println!("  unchanged: {}", report.unchanged);
    println!("  documents processed: {}", report.documents_processed());
    for name in &report.processed {
        println!("    {}", name);
    }
    println!("  chunks inserted: {}", report.chunks_inserted);
    println!("  chunks removed: {}", report.chunks_removed);
    Ok(())
}

async fn run_status(cfg: &Config) -> Result<()> {
    let services = Services::from_config(cfg)?;
    let status = services.synchronizer.status().await?;
    let index = services.synchronizer.index().await?;

    println!("collection: {}", status.collection);
    println!("total chunks: {}", status.total_chunks);
    println!("files processed: {}", status.files_processed.len());
    for (name, hash) in &status.files_processed {
        let short: String = hash.chars().take(12).collect();
        println!("  {}  {}", short, name);
    }
    let sources = index.sources().await?;
    if !sources.is_empty() {
        println!("chunks per source:");
        for s in sources {
            println!("  {:>6}  {}", s.chunks, s.source);
        }
    }
    Ok(())
}

async fn run_search(cfg: &Config, query: &str, k: Option<usize>) -> Result<()> {
    let services = Services::from_config(cfg)?;
    let index = services.synchronizer.index().await?;
    let hits = index.retrieve(query, k.unwrap_or(cfg.retrieval.k)).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        let snippet: String = hit.text.chars().take(200).collect();
        println!(
            "{}. [{:.3}] {} #{}",
            i + 1,
            hit.score,
            hit.source,
            hit.chunk_index
        );
        println!("    {}", snippet.replace('\n', " "));
    }
    Ok(())
}

async fn run_generate(cfg: &Config, count: Option<usize>, prompt: Option<String>) -> Result<()> {
    let services = Services::from_config(cfg)?;
    let count = count.unwrap_or(cfg.generation.default_posts);
    let posts = services
        .generator
        .generate(count, prompt.as_deref())
        .await?;

    for (i, post) in posts.iter().enumerate() {
        if i > 0 {
            println!("\n---\n");
        }
        println!("{}", post.content);
    }
    Ok(())
}
