//! Vector store gateway.
//!
//! The [`VectorStore`] trait defines the narrow contract the ingestion
//! pipeline needs from a vector index: an idempotent collection check,
//! filtered scans over active points, payload patching (tombstones), point
//! deletion, and batched upsert. Implementations must be `Send + Sync`.
//!
//! Two implementations:
//! - [`QdrantStore`] — the Qdrant REST API over `reqwest`, using named
//!   vectors so one collection can serve multiple embedding models.
//! - [`MemoryStore`] — an in-memory store for unit tests.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::config::QdrantConfig;

/// Payload stored alongside each chunk vector.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PointPayload {
    /// Chunk text.
    pub document: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub category: String,
    pub title: String,
    pub path: String,
    pub doc_id: String,
    pub doc_version: String,
    pub chunk_idx: usize,
    pub chunk_chars: usize,
    pub people: Vec<String>,
    pub tags: Vec<String>,
    pub is_active: bool,
    pub ingested_at: String,
    pub source_mtime: String,
    pub content_sha: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,
}

/// One (id, vector, payload) triple ready for upsert.
#[derive(Debug, Clone)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Verify the store is reachable and the collection exists with a
    /// compatible named-vector configuration; create it if absent.
    /// Errors on wrong dimension or a legacy unnamed-vector schema.
    async fn ensure_collection(&self, dims: usize, slot: &str) -> Result<()>;

    /// All point ids for `doc_id` with `is_active = true`, in scan order.
    async fn find_active_point_ids(&self, doc_id: &str) -> Result<Vec<String>>;

    /// The `doc_version` recorded on one active point of `doc_id`, if any.
    async fn stored_doc_version(&self, doc_id: &str) -> Result<Option<String>>;

    /// Whether any *other* document has an active point with this content
    /// hash (global duplicate probe).
    async fn content_hash_exists(&self, doc_version: &str, exclude_doc_id: &str) -> Result<bool>;

    /// Patch points to `is_active: false` with an archival timestamp.
    async fn tombstone_points(&self, ids: &[String], archived_at: &str) -> Result<()>;

    /// Physically remove points.
    async fn delete_points(&self, ids: &[String]) -> Result<()>;

    /// Upsert all points in one batch, vectors keyed by `slot`.
    async fn upsert_points(&self, slot: &str, points: &[Point]) -> Result<()>;
}

// ============ Qdrant (REST) ============

pub struct QdrantStore {
    base_url: String,
    api_key: Option<String>,
    collection: String,
    client: reqwest::Client,
}

const SCROLL_PAGE: usize = 256;

impl QdrantStore {
    pub fn new(config: &QdrantConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            collection: config.collection.clone(),
            client,
        })
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        req
    }

    async fn scroll(
        &self,
        filter: Value,
        limit: usize,
        with_payload: bool,
        offset: Option<Value>,
    ) -> Result<(Vec<(String, Value)>, Option<Value>)> {
        let mut body = serde_json::json!({
            "filter": filter,
            "limit": limit,
            "with_payload": with_payload,
            "with_vector": false,
        });
        if let Some(offset) = offset {
            body["offset"] = offset;
        }

        let url = format!(
            "{}/collections/{}/points/scroll",
            self.base_url, self.collection
        );
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach vector store at {}", self.base_url))?;

        if !response.status().is_success() {
            bail!(
                "scroll failed ({}): {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }

        let json: Value = response.json().await?;
        let result = &json["result"];
        let points = result["points"]
            .as_array()
            .map(|points| {
                points
                    .iter()
                    .map(|p| (id_to_string(&p["id"]), p["payload"].clone()))
                    .collect()
            })
            .unwrap_or_default();
        let next = match &result["next_page_offset"] {
            Value::Null => None,
            offset => Some(offset.clone()),
        };
        Ok((points, next))
    }
}

fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn active_doc_filter(doc_id: &str) -> Value {
    serde_json::json!({
        "must": [
            { "key": "doc_id", "match": { "value": doc_id } },
            { "key": "is_active", "match": { "value": true } },
        ]
    })
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, dims: usize, slot: &str) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, self.collection);
        let response = self
            .request(reqwest::Method::GET, url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to reach vector store at {}", self.base_url))?;

        let status = response.status();
        if status.is_success() {
            let json: Value = response.json().await?;
            let vectors = &json["result"]["config"]["params"]["vectors"];

            // Unnamed (legacy) schema carries size at the top level.
            if vectors.get("size").is_some() {
                bail!(
                    "Collection '{}' uses unnamed vectors but named vectors are required. \
                     Delete the collection and re-ingest.",
                    self.collection
                );
            }

            let size = vectors
                .get(slot)
                .and_then(|cfg| cfg.get("size"))
                .and_then(|s| s.as_u64());
            return match size {
                Some(size) if size as usize == dims => Ok(()),
                Some(size) => bail!(
                    "Collection '{}' exists with size={} for vector '{}', but {} is configured. \
                     Use a different collection or recreate with the correct size.",
                    self.collection,
                    size,
                    slot,
                    dims
                ),
                None => bail!(
                    "Collection '{}' exists without a '{}' vector. \
                     Use a different collection or recreate it.",
                    self.collection,
                    slot
                ),
            };
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            let body = serde_json::json!({
                "vectors": {
                    slot: { "size": dims, "distance": "Cosine" }
                }
            });
            let response = self
                .request(reqwest::Method::PUT, url)
                .json(&body)
                .send()
                .await?;
            if response.status().is_success() {
                return Ok(());
            }
            bail!(
                "create collection failed ({}): {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }

        bail!(
            "collection check failed ({}): {}",
            status,
            response.text().await.unwrap_or_default()
        )
    }

    async fn find_active_point_ids(&self, doc_id: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut offset = None;
        loop {
            let (points, next) = self
                .scroll(active_doc_filter(doc_id), SCROLL_PAGE, false, offset)
                .await?;
            ids.extend(points.into_iter().map(|(id, _)| id));
            match next {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(ids)
    }

    async fn stored_doc_version(&self, doc_id: &str) -> Result<Option<String>> {
        let (points, _) = self.scroll(active_doc_filter(doc_id), 1, true, None).await?;
        Ok(points.first().and_then(|(_, payload)| {
            payload
                .get("doc_version")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string())
        }))
    }

    async fn content_hash_exists(&self, doc_version: &str, exclude_doc_id: &str) -> Result<bool> {
        let filter = serde_json::json!({
            "must": [
                { "key": "doc_version", "match": { "value": doc_version } },
                { "key": "is_active", "match": { "value": true } },
            ]
        });
        // A handful of points is enough to see whether any hit belongs to a
        // different document.
        let limit = if exclude_doc_id.is_empty() { 1 } else { 10 };
        let (points, _) = self.scroll(filter, limit, true, None).await?;

        if exclude_doc_id.is_empty() {
            return Ok(!points.is_empty());
        }
        Ok(points.iter().any(|(_, payload)| {
            payload
                .get("doc_id")
                .and_then(|v| v.as_str())
                .map(|id| id != exclude_doc_id)
                .unwrap_or(false)
        }))
    }

    async fn tombstone_points(&self, ids: &[String], archived_at: &str) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let url = format!(
            "{}/collections/{}/points/payload?wait=true",
            self.base_url, self.collection
        );
        let body = serde_json::json!({
            "payload": { "is_active": false, "archived_at": archived_at },
            "points": ids,
        });
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!(
                "tombstone failed ({}): {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }
        Ok(())
    }

    async fn delete_points(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let url = format!(
            "{}/collections/{}/points/delete?wait=true",
            self.base_url, self.collection
        );
        let body = serde_json::json!({ "points": ids });
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!(
                "delete failed ({}): {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }
        Ok(())
    }

    async fn upsert_points(&self, slot: &str, points: &[Point]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body_points: Vec<Value> = points
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id,
                    "vector": { slot: p.vector },
                    "payload": p.payload,
                })
            })
            .collect();
        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, self.collection
        );
        let body = serde_json::json!({ "points": body_points });
        let response = self
            .request(reqwest::Method::PUT, url)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!(
                "upsert failed ({}): {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }
        Ok(())
    }
}

// ============ In-memory store ============

#[derive(Debug, Clone)]
struct StoredPoint {
    vector: Vec<f32>,
    payload: PointPayload,
}

/// In-memory store for unit tests. Mirrors the Qdrant semantics the
/// pipeline relies on: upsert-by-id overwrite, payload patching, filtered
/// scans over active points.
#[derive(Default)]
pub struct MemoryStore {
    collection: RwLock<Option<(usize, String)>>,
    points: RwLock<BTreeMap<String, StoredPoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// (id, payload) of every point, active or not, ordered by id.
    pub fn all_points(&self) -> Vec<(String, PointPayload)> {
        self.points
            .read()
            .unwrap()
            .iter()
            .map(|(id, p)| (id.clone(), p.payload.clone()))
            .collect()
    }

    /// Stored vector for a point id, if present.
    pub fn vector(&self, id: &str) -> Option<Vec<f32>> {
        self.points
            .read()
            .unwrap()
            .get(id)
            .map(|p| p.vector.clone())
    }

    /// Active (id, payload) pairs for one document, ordered by chunk index.
    pub fn active_points(&self, doc_id: &str) -> Vec<(String, PointPayload)> {
        let mut points: Vec<_> = self
            .points
            .read()
            .unwrap()
            .iter()
            .filter(|(_, p)| p.payload.doc_id == doc_id && p.payload.is_active)
            .map(|(id, p)| (id.clone(), p.payload.clone()))
            .collect();
        points.sort_by_key(|(_, p)| p.chunk_idx);
        points
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, dims: usize, slot: &str) -> Result<()> {
        let mut collection = self.collection.write().unwrap();
        match collection.as_ref() {
            Some((existing_dims, existing_slot)) => {
                if *existing_dims != dims || existing_slot != slot {
                    bail!(
                        "collection exists with size={} vector '{}', but size={} vector '{}' is configured",
                        existing_dims,
                        existing_slot,
                        dims,
                        slot
                    );
                }
                Ok(())
            }
            None => {
                *collection = Some((dims, slot.to_string()));
                Ok(())
            }
        }
    }

    async fn find_active_point_ids(&self, doc_id: &str) -> Result<Vec<String>> {
        Ok(self
            .points
            .read()
            .unwrap()
            .iter()
            .filter(|(_, p)| p.payload.doc_id == doc_id && p.payload.is_active)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn stored_doc_version(&self, doc_id: &str) -> Result<Option<String>> {
        Ok(self
            .points
            .read()
            .unwrap()
            .values()
            .find(|p| p.payload.doc_id == doc_id && p.payload.is_active)
            .map(|p| p.payload.doc_version.clone()))
    }

    async fn content_hash_exists(&self, doc_version: &str, exclude_doc_id: &str) -> Result<bool> {
        Ok(self.points.read().unwrap().values().any(|p| {
            p.payload.is_active
                && p.payload.doc_version == doc_version
                && p.payload.doc_id != exclude_doc_id
        }))
    }

    async fn tombstone_points(&self, ids: &[String], archived_at: &str) -> Result<()> {
        let mut points = self.points.write().unwrap();
        for id in ids {
            if let Some(point) = points.get_mut(id) {
                point.payload.is_active = false;
                point.payload.archived_at = Some(archived_at.to_string());
            }
        }
        Ok(())
    }

    async fn delete_points(&self, ids: &[String]) -> Result<()> {
        let mut points = self.points.write().unwrap();
        for id in ids {
            points.remove(id);
        }
        Ok(())
    }

    async fn upsert_points(&self, _slot: &str, new_points: &[Point]) -> Result<()> {
        let mut points = self.points.write().unwrap();
        for p in new_points {
            points.insert(
                p.id.clone(),
                StoredPoint {
                    vector: p.vector.clone(),
                    payload: p.payload.clone(),
                },
            );
        }
        Ok(())
    }
}
