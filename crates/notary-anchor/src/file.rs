//! Durable local anchor backend
//!
//! Keeps every anchor in a single JSON document:
//!
//! ```text
//! { "metadata": { "version", "created_at", "updated_at", "anchor_count" },
//!   "anchors":  { "<anchor hash>": { ...record..., "stored_at" } } }
//! ```
//!
//! The document is loaded once at construction and rewritten in full on every
//! mutation: serialized to a temporary sibling file, synced, then renamed over
//! the target. A reader or a crash mid-write can only ever see the previous
//! complete version or the new one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notary_core::{normalize_hash_key, time, Anchor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::backend::{
    count_by_type, AnchorBackend, BackendDetails, BackendKind, BackendStats, BatchSubmitResult,
    ListQuery, StoredAnchor, SubmitResult, VerifyResult,
};
use crate::error::AnchorError;

/// On-disk format version
pub const STORE_VERSION: &str = "1.0";

/// Settings for [`FileStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    /// Location of the JSON document
    pub path: PathBuf,
    /// Submissions beyond this count are refused
    pub max_anchors: usize,
    /// When set, `path` must resolve inside this directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/anchors.json"),
            max_anchors: 100_000,
            base_dir: None,
        }
    }
}

impl FileStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_max_anchors(mut self, max_anchors: usize) -> Self {
        self.max_anchors = max_anchors;
        self
    }

    /// Confine the store path to `base_dir`; use when the path comes from untrusted input
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// The store path, checked against `base_dir` when one is set.
    ///
    /// Rejects `..` components and absolute paths outside the base directory.
    pub fn resolve_path(&self) -> Result<PathBuf, AnchorError> {
        let Some(base_dir) = &self.base_dir else {
            return Ok(self.path.clone());
        };

        if self
            .path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(AnchorError::Configuration(
                "Path traversal detected: '..' not allowed in store path".to_string(),
            ));
        }

        let base_canonical = base_dir.canonicalize().unwrap_or_else(|_| base_dir.clone());
        let resolved = if self.path.is_absolute() {
            self.path.clone()
        } else {
            base_canonical.join(&self.path)
        };

        if !resolved.starts_with(&base_canonical) {
            return Err(AnchorError::Configuration(format!(
                "Path '{}' is outside allowed directory '{}'",
                resolved.display(),
                base_canonical.display()
            )));
        }
        Ok(resolved)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentMetadata {
    version: String,
    #[serde(with = "time::canonical")]
    created_at: DateTime<Utc>,
    #[serde(with = "time::canonical")]
    updated_at: DateTime<Utc>,
    anchor_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    metadata: DocumentMetadata,
    anchors: BTreeMap<String, StoredAnchor>,
}

impl StoreDocument {
    fn empty() -> Self {
        let now = time::now();
        Self {
            metadata: DocumentMetadata {
                version: STORE_VERSION.to_string(),
                created_at: now,
                updated_at: now,
                anchor_count: 0,
            },
            anchors: BTreeMap::new(),
        }
    }

    fn touch(&mut self) {
        self.metadata.updated_at = time::now();
        self.metadata.anchor_count = self.anchors.len();
    }
}

/// Outcome of [`FileStore::import_anchors`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    /// Already present and not overwritten
    pub skipped: usize,
    /// Rejected: hash mismatch, missing fields or capacity reached
    pub failed: usize,
}

/// File-backed anchor store
///
/// Mutations are serialised by `writer`, which is held across the file
/// rewrite. The in-memory document is only locked to copy it or to swap in
/// the version that was just written, so lookups never wait on disk I/O.
/// Separate processes sharing the same file are not coordinated.
///
/// # Security
/// Set [`FileStoreConfig::base_dir`] when the path comes from untrusted input.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    max_anchors: usize,
    writer: Mutex<()>,
    document: RwLock<StoreDocument>,
}

impl FileStore {
    /// Open the store, loading the existing document.
    ///
    /// A missing or unparsable file yields an empty store; the file itself is
    /// left untouched until the next successful write.
    pub fn new(config: &FileStoreConfig) -> Result<Self, AnchorError> {
        if config.max_anchors == 0 {
            return Err(AnchorError::Configuration(
                "private.max_anchors must be greater than zero".to_string(),
            ));
        }
        let path = config.resolve_path()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let document = Self::load(&path);
        tracing::info!(
            path = %path.display(),
            anchors = document.anchors.len(),
            max_anchors = config.max_anchors,
            "Opened file anchor store"
        );

        Ok(Self {
            path,
            max_anchors: config.max_anchors,
            writer: Mutex::new(()),
            document: RwLock::new(document),
        })
    }

    fn load(path: &Path) -> StoreDocument {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StoreDocument::empty(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable anchor store, starting empty");
                return StoreDocument::empty();
            }
        };

        match serde_json::from_str::<StoreDocument>(&content) {
            Ok(mut doc) => {
                doc.metadata.anchor_count = doc.anchors.len();
                doc
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt anchor store, starting empty");
                StoreDocument::empty()
            }
        }
    }

    /// Write the document to a temp sibling, sync it, then rename over the target
    async fn persist(&self, document: &StoreDocument) -> Result<(), AnchorError> {
        let json = serde_json::to_vec_pretty(document)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "anchors.json".to_string());
        let tmp_path = self
            .path
            .with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let written = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp_path, &self.path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Copy of the live document; callers hold `writer`
    async fn snapshot(&self) -> StoreDocument {
        self.document.read().await.clone()
    }

    /// Write `updated` to disk, then make it the live document; callers hold `writer`
    async fn commit(&self, updated: StoreDocument) -> Result<(), AnchorError> {
        self.persist(&updated).await?;
        *self.document.write().await = updated;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_anchors(&self) -> usize {
        self.max_anchors
    }

    pub async fn len(&self) -> usize {
        self.document.read().await.anchors.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every stored record, in key order
    pub async fn export_all(&self) -> Vec<StoredAnchor> {
        self.document.read().await.anchors.values().cloned().collect()
    }

    /// Bulk-insert records exported from another store.
    ///
    /// Each record is re-validated against its anchor hash. Existing entries
    /// are skipped unless `overwrite` is set. The file is written once.
    pub async fn import_anchors(
        &self,
        records: Vec<StoredAnchor>,
        overwrite: bool,
    ) -> Result<ImportReport, AnchorError> {
        let _writer = self.writer.lock().await;
        let mut updated = self.snapshot().await;
        let mut report = ImportReport::default();

        for record in records {
            if let Err(e) = record.to_anchor() {
                tracing::warn!(anchor_hash = %record.anchor_hash, error = %e, "Skipping invalid record on import");
                report.failed += 1;
                continue;
            }
            let key = record.anchor_hash.clone();
            let present = updated.anchors.contains_key(&key);
            if present && !overwrite {
                report.skipped += 1;
                continue;
            }
            if !present && updated.anchors.len() >= self.max_anchors {
                report.failed += 1;
                continue;
            }
            updated.anchors.insert(key, record);
            report.imported += 1;
        }

        if report.imported > 0 {
            updated.touch();
            self.commit(updated).await?;
        }

        tracing::info!(
            imported = report.imported,
            skipped = report.skipped,
            failed = report.failed,
            "Imported anchors into file store"
        );
        Ok(report)
    }

    /// Remove every record, returning how many there were
    pub async fn clear(&self) -> Result<usize, AnchorError> {
        let _writer = self.writer.lock().await;
        let mut updated = self.snapshot().await;
        let count = updated.anchors.len();

        updated.anchors.clear();
        updated.touch();
        self.commit(updated).await?;

        tracing::info!(count, path = %self.path.display(), "Cleared file anchor store");
        Ok(count)
    }

    fn capacity_error(&self, key: String) -> SubmitResult {
        let err = AnchorError::Capacity(format!(
            "store holds the maximum of {} anchors",
            self.max_anchors
        ));
        SubmitResult::from_error(key, self.backend_type(), &err)
    }
}

#[async_trait]
impl AnchorBackend for FileStore {
    async fn submit_anchor(&self, anchor: &Anchor) -> SubmitResult {
        let key = anchor.anchor_hash().to_hex();
        let _writer = self.writer.lock().await;
        let mut updated = {
            let document = self.document.read().await;
            if document.anchors.contains_key(&key) {
                return SubmitResult::exists(key, self.backend_type());
            }
            if document.anchors.len() >= self.max_anchors {
                tracing::warn!(anchor_hash = %key, max_anchors = self.max_anchors, "File store at capacity");
                return self.capacity_error(key);
            }
            document.clone()
        };

        let stored_at = time::now();
        updated
            .anchors
            .insert(key.clone(), StoredAnchor::from_anchor(anchor, stored_at));
        updated.touch();

        if let Err(e) = self.commit(updated).await {
            tracing::error!(anchor_hash = %key, error = %e, "Failed to write anchor store");
            return SubmitResult::from_error(key, self.backend_type(), &e);
        }

        tracing::debug!(anchor_hash = %key, anchor_type = %anchor.anchor_type(), "Anchor stored in file");
        SubmitResult::submitted(key, self.backend_type()).with_stored_at(stored_at)
    }

    /// One file rewrite for the whole batch
    async fn submit_anchors(&self, anchors: &[Anchor]) -> BatchSubmitResult {
        let _writer = self.writer.lock().await;
        let mut updated = self.snapshot().await;
        let stored_at = time::now();

        let mut results = Vec::with_capacity(anchors.len());
        let mut inserted = Vec::new();
        for (idx, anchor) in anchors.iter().enumerate() {
            let key = anchor.anchor_hash().to_hex();
            if updated.anchors.contains_key(&key) {
                results.push(SubmitResult::exists(key, self.backend_type()));
            } else if updated.anchors.len() >= self.max_anchors {
                results.push(self.capacity_error(key));
            } else {
                updated
                    .anchors
                    .insert(key.clone(), StoredAnchor::from_anchor(anchor, stored_at));
                results.push(SubmitResult::submitted(key, self.backend_type()).with_stored_at(stored_at));
                inserted.push(idx);
            }
        }

        if !inserted.is_empty() {
            updated.touch();
            if let Err(e) = self.commit(updated).await {
                tracing::error!(error = %e, count = inserted.len(), "Failed to write anchor batch");
                for idx in inserted {
                    let key = std::mem::take(&mut results[idx].anchor_hash);
                    results[idx] = SubmitResult::from_error(key, self.backend_type(), &e);
                }
            }
        }

        BatchSubmitResult::from_results(results)
    }

    async fn verify_anchor(&self, anchor_hash: &str) -> VerifyResult {
        let key = normalize_hash_key(anchor_hash);
        let document = self.document.read().await;
        match document.anchors.get(&key) {
            Some(record) => VerifyResult::found(record, self.backend_type()),
            None => VerifyResult::missing(key, self.backend_type()),
        }
    }

    async fn get_anchor(&self, anchor_hash: &str) -> Option<StoredAnchor> {
        let key = normalize_hash_key(anchor_hash);
        self.document.read().await.anchors.get(&key).cloned()
    }

    async fn list_anchors(&self, query: &ListQuery) -> Vec<StoredAnchor> {
        let mut matching: Vec<StoredAnchor> = {
            let document = self.document.read().await;
            document
                .anchors
                .values()
                .filter(|record| query.matches(record))
                .cloned()
                .collect()
        };
        // later receipt first among equal timestamps
        matching.sort_by(|a, b| b.stored_at.cmp(&a.stored_at));
        query.finish(matching)
    }

    fn backend_type(&self) -> BackendKind {
        BackendKind::Private
    }

    async fn is_ready(&self) -> bool {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::metadata(parent)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            _ => true,
        }
    }

    async fn stats(&self) -> BackendStats {
        let (total, by_type) = {
            let document = self.document.read().await;
            (
                document.anchors.len() as u64,
                count_by_type(document.anchors.values()),
            )
        };
        let file_size_bytes = fs::metadata(&self.path).await.ok().map(|m| m.len());

        BackendStats {
            backend_type: self.backend_type(),
            ready: self.is_ready().await,
            total_anchors: Some(total),
            anchors_by_type: by_type,
            details: BackendDetails::DurableLocal {
                path: self.path.display().to_string(),
                max_anchors: self.max_anchors,
                file_size_bytes,
            },
        }
    }
}
