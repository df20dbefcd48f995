//! Batch driver: enumerate input documents, run the per-document pipeline
//! sequentially, and aggregate one machine-readable report.
//!
//! Enumeration never deduplicates — the same path supplied twice is
//! processed twice; the unchanged-skip check makes the second pass
//! near-free. A single document's failure is recorded and never aborts its
//! siblings; the summary always accounts for every attempted document and
//! the process exit status signals failure.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::ingest::{dry_run_chunks, ingest_file, IngestContext, IngestOptions, IngestOutcome};

/// One ingest invocation, resolved from the CLI.
pub struct IngestRequest {
    /// Single-file mode path (positional or `--path`).
    pub single_path: Option<PathBuf>,
    /// Batch file/directory specs (`--input`, repeatable).
    pub inputs: Vec<PathBuf>,
    pub recursive: bool,
    /// Comma-separated extension allow-list (e.g. `"md,txt"`).
    pub ext: String,
    /// Glob patterns excluded during directory scans.
    pub excludes: Vec<String>,
    /// Read additional newline-separated paths from stdin.
    pub read_stdin: bool,
    pub dry_run: bool,
    pub collection_override: Option<String>,
    pub options: IngestOptions,
}

#[derive(Debug, Serialize)]
pub struct BatchError {
    pub path: String,
    pub error: String,
}

/// Aggregate report for a batch run. Printed to stdout even when every
/// document failed.
#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub status: String,
    pub count_processed: usize,
    pub count_errors: usize,
    pub collection: String,
    pub model: String,
    pub embed_dim: usize,
    pub items: Vec<IngestOutcome>,
    pub errors: Vec<BatchError>,
}

/// Run one ingest invocation. Returns the process exit code:
/// 0 clean, 1 any document failed, 2 single file missing, 3 no inputs found.
pub async fn run_ingest(mut config: Config, request: IngestRequest) -> Result<i32> {
    if let Some(collection) = &request.collection_override {
        config.qdrant.collection = collection.clone();
    }

    let mut inputs = request.inputs.clone();
    if request.read_stdin {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        inputs.extend(
            buffer
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from),
        );
    }

    if request.dry_run {
        return run_dry(&config, &request, &inputs);
    }

    if !inputs.is_empty() {
        let exts = split_exts(&request.ext);
        let exclude_set = build_globset(&request.excludes)?;
        let files = collect_files(&inputs, request.recursive, &exts, &exclude_set);
        if files.is_empty() && request.single_path.is_none() {
            eprintln!(
                "{}",
                serde_json::json!({ "status": "no_inputs_found", "inputs": inputs })
            );
            return Ok(3);
        }

        let ctx = IngestContext::new(config).await?;
        let mut items = Vec::new();
        let mut errors = Vec::new();

        for file in &files {
            match ingest_file(&ctx, file, &request.options).await {
                Ok(outcome) => items.push(outcome),
                Err(e) => errors.push(BatchError {
                    path: file.to_string_lossy().to_string(),
                    error: format!("{:#}", e),
                }),
            }
        }

        // Single-path compatibility: process it after the batch when both
        // were supplied.
        if let Some(single) = &request.single_path {
            if !single.exists() {
                eprintln!("File not found: {}", single.display());
                return Ok(2);
            }
            match ingest_file(&ctx, single, &request.options).await {
                Ok(outcome) => items.push(outcome),
                Err(e) => errors.push(BatchError {
                    path: single.to_string_lossy().to_string(),
                    error: format!("{:#}", e),
                }),
            }
        }

        let summary = BatchSummary {
            status: if errors.is_empty() {
                "ok".to_string()
            } else {
                "ok_with_errors".to_string()
            },
            count_processed: items.len(),
            count_errors: errors.len(),
            collection: ctx.config.qdrant.collection.clone(),
            model: ctx.embedder.model_name().to_string(),
            embed_dim: ctx.embedder.dims(),
            items,
            errors,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(if summary.count_errors == 0 { 0 } else { 1 });
    }

    // Single-file mode: the first error propagates to the caller.
    let single = match &request.single_path {
        Some(path) => path.clone(),
        None => anyhow::bail!(
            "Provide a file (--path or positional), or use --input/--stdin for batch mode."
        ),
    };
    if !single.exists() {
        eprintln!("File not found: {}", single.display());
        return Ok(2);
    }

    let ctx = IngestContext::new(config).await?;
    let outcome = ingest_file(&ctx, &single, &request.options).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(0)
}

/// Enumerate and chunk-count only; no store or embedding traffic.
fn run_dry(config: &Config, request: &IngestRequest, inputs: &[PathBuf]) -> Result<i32> {
    let exts = split_exts(&request.ext);
    let exclude_set = build_globset(&request.excludes)?;
    let mut files = collect_files(inputs, request.recursive, &exts, &exclude_set);
    if let Some(single) = &request.single_path {
        if !single.exists() {
            eprintln!("File not found: {}", single.display());
            return Ok(2);
        }
        files.push(single.clone());
    }
    if files.is_empty() {
        eprintln!(
            "{}",
            serde_json::json!({ "status": "no_inputs_found", "inputs": inputs })
        );
        return Ok(3);
    }

    let mut items = Vec::new();
    let mut total_chunks = 0usize;
    for file in &files {
        let chunks = dry_run_chunks(config, file)?;
        total_chunks += chunks;
        items.push(serde_json::json!({
            "path": file.to_string_lossy(),
            "estimated_chunks": chunks,
        }));
    }

    let report = serde_json::json!({
        "status": "dry_run",
        "count_files": files.len(),
        "estimated_chunks": total_chunks,
        "collection": config.qdrant.collection,
        "items": items,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(0)
}

fn split_exts(ext: &str) -> Vec<String> {
    ext.split(',')
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Expand file/directory specs into a file list. Directory scans are sorted
/// for deterministic ordering; explicit file specs keep their given order
/// (and multiplicity).
pub fn collect_files(
    inputs: &[PathBuf],
    recursive: bool,
    exts: &[String],
    exclude_set: &GlobSet,
) -> Vec<PathBuf> {
    let mut out = Vec::new();

    for spec in inputs {
        if spec.is_file() {
            if ext_allowed(spec, exts) {
                out.push(spec.clone());
            }
        } else if spec.is_dir() {
            let max_depth = if recursive { usize::MAX } else { 1 };
            let mut found: Vec<PathBuf> = WalkDir::new(spec)
                .max_depth(max_depth)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| {
                    let relative = path.strip_prefix(spec).unwrap_or(path);
                    !exclude_set.is_match(relative)
                })
                .filter(|path| ext_allowed(path, exts))
                .collect();
            found.sort();
            out.extend(found);
        } else {
            eprintln!("Warning: input not found: {}", spec.display());
        }
    }

    out
}

fn ext_allowed(path: &Path, exts: &[String]) -> bool {
    if exts.is_empty() {
        return true;
    }
    path.extension()
        .map(|e| exts.contains(&e.to_string_lossy().to_lowercase()))
        .unwrap_or(false)
}
