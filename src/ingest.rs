//! Per-document ingestion pipeline.
//!
//! For each document: extract front matter, resolve classification and
//! identity, fingerprint the content, check freshness against the store,
//! embed, retire the previous version's points, and upsert the new ones.
//!
//! Ordering is deliberate. The store and collection are verified before any
//! embedding call so an unreachable index never costs embedding quota, and
//! an unchanged document short-circuits before both. Retirement always runs
//! before upsert and always targets the active set captured at the start of
//! the run, so a shrinking chunk count cannot leave orphaned points.
//!
//! Processing is strictly sequential per document. The retire-then-upsert
//! pair is not transactional: two processes ingesting the same logical
//! document concurrently can corrupt the one-active-version invariant.
//! Parallelism across distinct documents would be safe, but same-document
//! concurrency needs an external per-document lock.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::chunk::{chunk_text, fingerprint};
use crate::config::Config;
use crate::embedding::{create_backend, vector_slot_name, EmbeddingBackend};
use crate::frontmatter::{guess_title, parse_front_matter};
use crate::identity::{doc_id_from_key, point_id, resolve_doc_key};
use crate::meta::{resolve_meta, MetaOverrides};
use crate::store::{Point, PointPayload, QdrantStore, VectorStore};

/// Everything one ingestion run needs, constructed once by the caller.
/// Construction verifies the collection schema, so a misconfigured store
/// fails before the first document is read.
pub struct IngestContext {
    pub config: Config,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn EmbeddingBackend>,
    pub slot: String,
}

impl IngestContext {
    /// Build a context against the configured Qdrant endpoint.
    pub async fn new(config: Config) -> Result<Self> {
        if !config.embedding.is_enabled() {
            bail!("Embedding provider is disabled. Set [embedding] provider in config.");
        }
        let store = Arc::new(QdrantStore::new(&config.qdrant)?);
        let embedder: Arc<dyn EmbeddingBackend> = create_backend(&config.embedding)?.into();
        Self::with_parts(config, store, embedder).await
    }

    /// Build a context from explicit collaborators (used by tests).
    pub async fn with_parts(
        config: Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self> {
        let slot = vector_slot_name(embedder.model_name());
        store
            .ensure_collection(embedder.dims(), &slot)
            .await
            .with_context(|| {
                format!(
                    "Failed to verify collection '{}' at {}",
                    config.qdrant.collection, config.qdrant.url
                )
            })?;
        Ok(Self {
            config,
            store,
            embedder,
            slot,
        })
    }
}

/// Per-run switches, resolved from CLI flags.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub type_override: Option<String>,
    pub category_override: Option<String>,
    /// Re-embed even when the content hash is unchanged.
    pub force: bool,
    /// Physically delete the previous version's points instead of
    /// tombstoning them.
    pub hard_delete_previous: bool,
    pub skip_if_unchanged: bool,
    pub debug: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            type_override: None,
            category_override: None,
            force: false,
            hard_delete_previous: false,
            skip_if_unchanged: true,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Ok,
    SkippedUnchanged,
}

/// Structured outcome for one document. Every run ends in exactly one of
/// `ok`, `skipped_unchanged`, or an error propagated to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    pub collection: String,
    pub doc_id: String,
    pub title: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedded_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_dim: Option<usize>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub people: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate_content: bool,
}

/// Run the full pipeline for one document.
pub async fn ingest_file(
    ctx: &IngestContext,
    path: &Path,
    options: &IngestOptions,
) -> Result<IngestOutcome> {
    let raw = read_text(path)?;
    let (fm, body) = parse_front_matter(&raw);
    let title_source = if body.is_empty() { &raw } else { &body };
    let title = guess_title(title_source, path);

    let overrides = MetaOverrides {
        doc_type: options.type_override.clone(),
        category: options.category_override.clone(),
    };
    let meta = resolve_meta(path, &fm, &overrides);

    let source_mtime = file_mtime_iso(path)?;
    let doc_version = fingerprint(&raw);

    let abs_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let vault_root = ctx
        .config
        .ingest
        .vault_root
        .as_ref()
        .map(|root| root.canonicalize().unwrap_or_else(|_| root.clone()));
    let doc_key = resolve_doc_key(
        &abs_path,
        &fm,
        ctx.config.ingest.doc_id_key.as_deref(),
        vault_root.as_deref(),
    );
    let doc_id = doc_id_from_key(&doc_key);

    if options.debug {
        let resolved = serde_json::json!({
            "file": path.to_string_lossy(),
            "fm_keys": fm.keys().collect::<Vec<_>>(),
            "type": meta.doc_type,
            "category": meta.category,
            "people": meta.people,
            "tags": meta.tags,
            "doc_key": doc_key,
        });
        eprintln!("[debug] resolved metadata: {}", resolved);
    }

    // Active set captured once; retirement below targets exactly this set.
    let existing_active = ctx.store.find_active_point_ids(&doc_id).await?;

    if options.skip_if_unchanged && !options.force && !existing_active.is_empty() {
        let stored = ctx.store.stored_doc_version(&doc_id).await?;
        if stored.as_deref() == Some(doc_version.as_str()) {
            if options.debug {
                eprintln!(
                    "[debug] skipping unchanged document: {} (doc_id={}, hash={}...)",
                    path.display(),
                    doc_id,
                    &doc_version[..8]
                );
            }
            return Ok(IngestOutcome {
                status: IngestStatus::SkippedUnchanged,
                collection: ctx.config.qdrant.collection.clone(),
                doc_id,
                title,
                path: path.to_string_lossy().to_string(),
                embedded_chunks: None,
                model: None,
                embed_dim: None,
                doc_type: None,
                category: None,
                people: None,
                tags: None,
                duplicate_content: false,
            });
        }
    }

    // Identical content under another doc_id is worth a warning but not a
    // refusal (templates and copies are legitimate).
    let duplicate_content = ctx.store.content_hash_exists(&doc_version, &doc_id).await?;
    if duplicate_content {
        eprintln!(
            "Warning: content hash {}... already exists in another document ({})",
            &doc_version[..8],
            path.display()
        );
    }

    let chunk_source = if body.is_empty() { &raw } else { &body };
    let chunks = chunk_text(
        chunk_source,
        ctx.config.chunking.max_chars,
        ctx.config.chunking.overlap,
    );
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = ctx
        .embedder
        .embed(&texts)
        .await
        .with_context(|| format!("Embedding failed for {}", path.display()))?;
    if vectors.len() != chunks.len() {
        bail!(
            "Embedding count mismatch: got {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        );
    }

    let ingested_at = now_iso();

    if !existing_active.is_empty() {
        if options.debug {
            let action = if options.hard_delete_previous {
                "hard deleting"
            } else {
                "tombstoning"
            };
            eprintln!(
                "[debug] {} {} previous points for doc_id={}",
                action,
                existing_active.len(),
                doc_id
            );
        }
        if options.hard_delete_previous {
            ctx.store.delete_points(&existing_active).await?;
        } else {
            ctx.store
                .tombstone_points(&existing_active, &ingested_at)
                .await?;
        }
    }

    let points: Vec<Point> = chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| Point {
            id: point_id(&doc_id, chunk.index),
            vector,
            payload: PointPayload {
                document: chunk.text.clone(),
                doc_type: meta.doc_type.clone(),
                category: meta.category.clone(),
                title: title.clone(),
                path: path.to_string_lossy().to_string(),
                doc_id: doc_id.clone(),
                doc_version: doc_version.clone(),
                chunk_idx: chunk.index,
                chunk_chars: chunk.text.chars().count(),
                people: meta.people.clone(),
                tags: meta.tags.clone(),
                is_active: true,
                ingested_at: ingested_at.clone(),
                source_mtime: source_mtime.clone(),
                content_sha: doc_version.clone(),
                archived_at: None,
            },
        })
        .collect();

    ctx.store.upsert_points(&ctx.slot, &points).await?;

    Ok(IngestOutcome {
        status: IngestStatus::Ok,
        collection: ctx.config.qdrant.collection.clone(),
        doc_id,
        title,
        path: path.to_string_lossy().to_string(),
        embedded_chunks: Some(points.len()),
        model: Some(ctx.embedder.model_name().to_string()),
        embed_dim: Some(ctx.embedder.dims()),
        doc_type: Some(meta.doc_type),
        category: Some(meta.category),
        people: Some(meta.people),
        tags: Some(meta.tags),
        duplicate_content,
    })
}

/// Count chunks without touching the store or the embedder.
pub fn dry_run_chunks(config: &Config, path: &Path) -> Result<usize> {
    let raw = read_text(path)?;
    let (_, body) = parse_front_matter(&raw);
    let chunk_source = if body.is_empty() { &raw } else { &body };
    Ok(chunk_text(chunk_source, config.chunking.max_chars, config.chunking.overlap).len())
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

fn file_mtime_iso(path: &Path) -> Result<String> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let modified = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    Ok(iso_utc(DateTime::<Utc>::from(modified)))
}

fn now_iso() -> String {
    iso_utc(Utc::now())
}

/// UTC, second precision, the payload timestamp format throughout.
fn iso_utc(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic offline embedder that counts calls.
    struct StaticEmbedder {
        dims: usize,
        calls: AtomicUsize,
    }

    impl StaticEmbedder {
        fn new(dims: usize) -> Self {
            Self {
                dims,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingBackend for StaticEmbedder {
        fn model_name(&self) -> &str {
            "static-test-model"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dims];
                    for (i, b) in t.bytes().enumerate() {
                        v[i % self.dims] += b as f32;
                    }
                    v
                })
                .collect())
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        vault: PathBuf,
        store: Arc<MemoryStore>,
        embedder: Arc<StaticEmbedder>,
        ctx: IngestContext,
    }

    async fn fixture(max_chars: usize) -> Fixture {
        let tmp = tempfile::TempDir::new().unwrap();
        let vault = tmp.path().join("vault");
        std::fs::create_dir_all(vault.join("meetings")).unwrap();

        let mut config = Config::default();
        config.chunking.max_chars = max_chars;
        config.chunking.overlap = 10;
        config.ingest.vault_root = Some(vault.clone());

        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(StaticEmbedder::new(8));
        let ctx = IngestContext::with_parts(config, store.clone(), embedder.clone())
            .await
            .unwrap();

        Fixture {
            _tmp: tmp,
            vault,
            store,
            embedder,
            ctx,
        }
    }

    fn write_meeting_note(vault: &Path) -> PathBuf {
        let path = vault.join("meetings/2025-10-24.md");
        std::fs::write(
            &path,
            "---\ncategory: sync-meeting\nattendees: [Ana, Ben]\n---\n\
             # Weekly sync\n\nFirst paragraph.\n\nSecond paragraph.\n\nThird paragraph.\n",
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_meeting_note_scenario() {
        let fx = fixture(1200).await;
        let path = write_meeting_note(&fx.vault);

        let outcome = ingest_file(&fx.ctx, &path, &IngestOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.status, IngestStatus::Ok);
        assert_eq!(outcome.embedded_chunks, Some(1));
        assert_eq!(outcome.doc_type.as_deref(), Some("meeting"));
        assert_eq!(outcome.category.as_deref(), Some("sync-meeting"));
        assert_eq!(
            outcome.people.as_deref(),
            Some(["Ana".to_string(), "Ben".to_string()].as_slice())
        );
        assert_eq!(outcome.title, "Weekly sync");

        // Identity comes from the path relative to the vault root.
        let expected = doc_id_from_key("rel:meetings/2025-10-24.md");
        assert_eq!(outcome.doc_id, expected);

        let active = fx.store.active_points(&outcome.doc_id);
        assert_eq!(active.len(), 1);
        assert!(active[0].1.is_active);
        assert_eq!(active[0].1.chunk_idx, 0);
        assert!(fx.store.vector(&active[0].0).is_some());
    }

    #[tokio::test]
    async fn test_unchanged_rerun_is_skipped_with_no_work() {
        let fx = fixture(1200).await;
        let path = write_meeting_note(&fx.vault);
        let options = IngestOptions::default();

        let first = ingest_file(&fx.ctx, &path, &options).await.unwrap();
        assert_eq!(fx.embedder.call_count(), 1);
        let points_after_first = fx.store.all_points();

        let second = ingest_file(&fx.ctx, &path, &options).await.unwrap();
        assert_eq!(second.status, IngestStatus::SkippedUnchanged);
        assert_eq!(second.doc_id, first.doc_id);
        // No embedding call, no store mutation.
        assert_eq!(fx.embedder.call_count(), 1);
        assert_eq!(fx.store.all_points(), points_after_first);
    }

    #[tokio::test]
    async fn test_force_re_embeds_unchanged_document() {
        let fx = fixture(1200).await;
        let path = write_meeting_note(&fx.vault);

        ingest_file(&fx.ctx, &path, &IngestOptions::default())
            .await
            .unwrap();
        let forced = IngestOptions {
            force: true,
            ..Default::default()
        };
        let outcome = ingest_file(&fx.ctx, &path, &forced).await.unwrap();
        assert_eq!(outcome.status, IngestStatus::Ok);
        assert_eq!(fx.embedder.call_count(), 2);
    }

    #[tokio::test]
    async fn test_edit_tombstones_previous_version() {
        // Small budget so the first version produces two chunks.
        let fx = fixture(40).await;
        let path = fx.vault.join("meetings/note.md");
        std::fs::write(
            &path,
            "First paragraph with enough text to overflow.\n\nSecond paragraph also sized to overflow.\n",
        )
        .unwrap();

        let options = IngestOptions::default();
        let first = ingest_file(&fx.ctx, &path, &options).await.unwrap();
        assert_eq!(first.embedded_chunks, Some(2));

        // Shrink to a single paragraph: chunk count drops, so the old
        // index-1 point must not survive as active.
        std::fs::write(&path, "Tiny now.\n").unwrap();
        let second = ingest_file(&fx.ctx, &path, &options).await.unwrap();
        assert_eq!(second.status, IngestStatus::Ok);
        assert_eq!(second.embedded_chunks, Some(1));
        assert_eq!(second.doc_id, first.doc_id);

        let active = fx.store.active_points(&second.doc_id);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].1.chunk_idx, 0);

        // Tombstone mode keeps the orphan around, inactive and stamped.
        let all = fx.store.all_points();
        assert_eq!(all.len(), 2);
        let inactive: Vec<_> = all.iter().filter(|(_, p)| !p.is_active).collect();
        assert_eq!(inactive.len(), 1);
        assert!(inactive[0].1.archived_at.is_some());
    }

    #[tokio::test]
    async fn test_hard_delete_removes_previous_version() {
        let fx = fixture(40).await;
        let path = fx.vault.join("meetings/note.md");
        std::fs::write(
            &path,
            "First paragraph with enough text to overflow.\n\nSecond paragraph also sized to overflow.\n",
        )
        .unwrap();

        let options = IngestOptions {
            hard_delete_previous: true,
            ..Default::default()
        };
        ingest_file(&fx.ctx, &path, &options).await.unwrap();
        std::fs::write(&path, "Tiny now.\n").unwrap();
        let second = ingest_file(&fx.ctx, &path, &options).await.unwrap();

        let all = fx.store.all_points();
        assert_eq!(all.len(), 1);
        assert_eq!(fx.store.active_points(&second.doc_id).len(), 1);
    }

    #[tokio::test]
    async fn test_at_most_one_active_version() {
        let fx = fixture(1200).await;
        let path = fx.vault.join("meetings/note.md");
        let options = IngestOptions::default();

        let mut doc_id = String::new();
        for revision in 0..3 {
            std::fs::write(&path, format!("Revision number {} body.\n", revision)).unwrap();
            let outcome = ingest_file(&fx.ctx, &path, &options).await.unwrap();
            doc_id = outcome.doc_id;
        }

        let active = fx.store.active_points(&doc_id);
        assert_eq!(active.len(), 1);
        let latest_version = fingerprint("Revision number 2 body.\n");
        assert_eq!(active[0].1.doc_version, latest_version);
    }

    #[tokio::test]
    async fn test_duplicate_content_is_flagged_not_refused() {
        let fx = fixture(1200).await;
        let a = fx.vault.join("meetings/a.md");
        let b = fx.vault.join("meetings/b.md");
        std::fs::write(&a, "Same content everywhere.\n").unwrap();
        std::fs::write(&b, "Same content everywhere.\n").unwrap();

        let options = IngestOptions::default();
        let first = ingest_file(&fx.ctx, &a, &options).await.unwrap();
        assert!(!first.duplicate_content);

        let second = ingest_file(&fx.ctx, &b, &options).await.unwrap();
        assert_eq!(second.status, IngestStatus::Ok);
        assert!(second.duplicate_content);
        assert_ne!(second.doc_id, first.doc_id);
    }

    #[tokio::test]
    async fn test_empty_document_gets_one_point() {
        let fx = fixture(1200).await;
        let path = fx.vault.join("meetings/empty.md");
        std::fs::write(&path, "").unwrap();

        let outcome = ingest_file(&fx.ctx, &path, &IngestOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.embedded_chunks, Some(1));
    }

    #[test]
    fn test_skipped_outcome_serializes_compactly() {
        let outcome = IngestOutcome {
            status: IngestStatus::SkippedUnchanged,
            collection: "c".into(),
            doc_id: "d".into(),
            title: "t".into(),
            path: "/p".into(),
            embedded_chunks: None,
            model: None,
            embed_dim: None,
            doc_type: None,
            category: None,
            people: None,
            tags: None,
            duplicate_content: false,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped_unchanged");
        assert!(json.get("embedded_chunks").is_none());
        assert!(json.get("duplicate_content").is_none());
    }
}
