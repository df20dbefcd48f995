//! # Vault Index CLI (`vidx`)
//!
//! The `vidx` binary ingests knowledge-base documents into a Qdrant
//! collection and processes meeting notes with an LLM.
//!
//! ## Usage
//!
//! ```bash
//! vidx --config ./config/vidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vidx ingest <file>` | Embed one document (skips if unchanged) |
//! | `vidx ingest --input <dir> --recursive` | Batch-ingest a folder tree |
//! | `vidx ingest --stdin` | Read newline-separated paths from stdin |
//! | `vidx process <file>` | Rewrite a meeting note into a structured summary |
//!
//! ## Examples
//!
//! ```bash
//! # Single file, forcing a re-embed
//! vidx ingest "vault/meetings/2025-10-24 - AWS PM.md" --type meeting --force
//!
//! # Batch folders (recursive), inferring type/category from front matter
//! vidx ingest --input vault/meetings --input vault/one-on-one \
//!     --recursive --ext md,txt --vault-root vault
//!
//! # Pipe paths from a watcher
//! fswatch vault | vidx ingest --stdin
//! ```
//!
//! Ingest runs emit a JSON report on stdout and exit non-zero when any
//! document failed; human-oriented output goes to stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vault_index::batch::{run_ingest, IngestRequest};
use vault_index::config;
use vault_index::ingest::IngestOptions;
use vault_index::rewrite::{run_process, MeetingType};

/// Vault Index — knowledge-base ingestion with dedup and freshness
/// tracking.
#[derive(Parser)]
#[command(
    name = "vidx",
    about = "Vault Index — embed personal knowledge-base documents into Qdrant",
    version,
    long_about = "Vault Index ingests Markdown notes with YAML front matter into a Qdrant \
    collection, deduplicating by content hash so unchanged documents are never re-embedded, \
    and retiring stale vectors when a document changes. It also processes meeting notes \
    into structured summaries via a configurable LLM backend."
)]
struct Cli {
    /// Path to configuration file (TOML). Settings fall back to local
    /// defaults when the file does not exist.
    #[arg(long, global = true, default_value = "./config/vidx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed documents into the vector index.
    ///
    /// Accepts a single file (positional or --path), repeatable --input
    /// file/directory specs, and/or newline-separated paths on stdin.
    /// Every document is independently skipped when its content hash is
    /// unchanged, so re-running over a whole vault is cheap.
    Ingest {
        /// Path to a document (positional single-file mode).
        positional_path: Option<PathBuf>,

        /// Path to a document (same as the positional form).
        #[arg(long)]
        path: Option<PathBuf>,

        /// File or directory to process (repeatable). Combine directories
        /// with --recursive.
        #[arg(long = "input")]
        inputs: Vec<PathBuf>,

        /// Recurse into directories given via --input.
        #[arg(long)]
        recursive: bool,

        /// Comma-separated extension allow-list for directory scans.
        #[arg(long, default_value = "md,txt")]
        ext: String,

        /// Glob pattern excluded during directory scans (repeatable).
        #[arg(long = "exclude")]
        excludes: Vec<String>,

        /// Read newline-separated paths from stdin (combined with --input
        /// if both are used).
        #[arg(long)]
        stdin: bool,

        /// Document type override: note|meeting|one-on-one|email|calendar|slack.
        #[arg(long = "type")]
        doc_type: Option<String>,

        /// Category override (beats the front-matter `category` field).
        #[arg(long)]
        category: Option<String>,

        /// Front-matter key to use as the logical doc id (e.g. `uid`).
        #[arg(long)]
        doc_id_key: Option<String>,

        /// Derive doc ids from paths relative to this folder, so ids stay
        /// stable when the vault moves between machines.
        #[arg(long)]
        vault_root: Option<PathBuf>,

        /// Target collection (overrides config / QDRANT_COLLECTION).
        #[arg(long)]
        collection: Option<String>,

        /// Re-embed even if the content hash is unchanged.
        #[arg(long)]
        force: bool,

        /// Physically delete the previous version's points instead of
        /// tombstoning them.
        #[arg(long)]
        hard_delete_previous: bool,

        /// Always embed, even when the content hash matches the index.
        #[arg(long)]
        no_skip_if_unchanged: bool,

        /// Enumerate and count chunks without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Print resolved front matter and retirement decisions to stderr.
        #[arg(long)]
        debug: bool,
    },

    /// Process a meeting note: insert an LLM summary, refresh front
    /// matter, and stamp year/quarter from the filename.
    Process {
        /// Path to the meeting-notes Markdown file.
        file: PathBuf,

        /// Meeting type: `group` or `one-on-one` (auto-detected from
        /// front matter if omitted).
        #[arg(long = "type")]
        meeting_type: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            positional_path,
            path,
            inputs,
            recursive,
            ext,
            excludes,
            stdin,
            doc_type,
            category,
            doc_id_key,
            vault_root,
            collection,
            force,
            hard_delete_previous,
            no_skip_if_unchanged,
            dry_run,
            debug,
        } => {
            if let Some(key) = doc_id_key {
                cfg.ingest.doc_id_key = Some(key);
            }
            if let Some(root) = vault_root {
                cfg.ingest.vault_root = Some(root);
            }

            let request = IngestRequest {
                single_path: path.or(positional_path),
                inputs,
                recursive,
                ext,
                excludes,
                read_stdin: stdin,
                dry_run,
                collection_override: collection,
                options: IngestOptions {
                    type_override: doc_type,
                    category_override: category,
                    force,
                    hard_delete_previous,
                    skip_if_unchanged: !no_skip_if_unchanged,
                    debug,
                },
            };

            let code = run_ingest(cfg, request).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Process { file, meeting_type } => {
            let meeting_type = match meeting_type.as_deref() {
                None => None,
                Some("group") => Some(MeetingType::Group),
                Some("one-on-one") => Some(MeetingType::OneOnOne),
                Some(other) => anyhow::bail!(
                    "Unknown meeting type: '{}'. Must be group or one-on-one.",
                    other
                ),
            };
            run_process(&cfg, &file, meeting_type).await?;
        }
    }

    Ok(())
}
