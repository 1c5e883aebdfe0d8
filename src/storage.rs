//! Object storage: where uploaded decks are read from and slide images go.
//!
//! The pipeline only sees the [`ObjectStore`] trait, passed in through
//! [`crate::extract::PipelineContext`]. Three backends ship with the crate:
//!
//! * [`HttpObjectStore`]: Supabase-style storage REST API
//!   (`/storage/v1/object/{bucket}/{key}`) over `reqwest`.
//! * [`FsObjectStore`]: a directory on local disk, for the CLI and for
//!   self-hosted setups behind a static file server.
//! * [`MemoryObjectStore`]: a process-local map, for tests and dry runs.

use crate::error::PptxError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Durable storage for archives and slide images.
///
/// Implementations must tolerate concurrent `put` calls with distinct keys
/// from several jobs at once.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Fetch an object's bytes.
    ///
    /// # Errors
    /// [`PptxError::ObjectNotFound`] when the path does not exist,
    /// [`PptxError::Storage`] for any other failure.
    async fn get(&self, path: &str) -> Result<Vec<u8>, PptxError>;

    /// Store `data` under `key`.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), PptxError>;

    /// Public retrieval URL for `key`.
    fn public_url(&self, key: &str) -> String;
}

// ── Local filesystem ─────────────────────────────────────────────────────

/// Objects stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
        }
    }

    /// Serve public URLs from `base` (e.g. a static file server in front of
    /// `root`) instead of `file://` URLs.
    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = Some(base.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, PptxError> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(PptxError::InvalidRequest(format!(
                "object key '{key}' must be a relative path without '..'"
            )));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, PptxError> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PptxError::ObjectNotFound {
                    path: path.to_string(),
                }
            } else {
                PptxError::Storage(format!("failed to read '{}': {e}", full.display()))
            }
        })
    }

    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<(), PptxError> {
        let full = self.resolve(key)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PptxError::OutputWriteFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        // Atomic write: write to temp, then rename. The temp name keeps the
        // full key so `a.png` and `a.jpg` never share one.
        let mut tmp_name = full.clone().into_os_string();
        tmp_name.push(".part");
        let tmp = PathBuf::from(tmp_name);
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| PptxError::OutputWriteFailed {
                path: full.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, &full)
            .await
            .map_err(|e| PptxError::OutputWriteFailed {
                path: full.clone(),
                source: e,
            })?;

        debug!("Stored {} bytes at {}", data.len(), full.display());
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        match self.public_base_url {
            Some(ref base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => {
                let full = self.root.join(key);
                let abs = std::path::absolute(&full).unwrap_or(full);
                format!("file://{}", abs.display())
            }
        }
    }
}

// ── Supabase-style HTTP storage ──────────────────────────────────────────

/// Objects stored in a bucket behind a storage REST API.
///
/// Requests: `GET|POST {base}/storage/v1/object/{bucket}/{key}` with a
/// bearer key. Public URLs: `{base}/storage/v1/object/public/{bucket}/{key}`.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: reqwest::Url,
    bucket: String,
    api_key: String,
}

impl HttpObjectStore {
    pub fn new(
        base_url: &str,
        bucket: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, PptxError> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| PptxError::InvalidConfig(format!("storage URL '{base_url}': {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PptxError::Storage(e.to_string()))?;
        let store = Self {
            client,
            base_url,
            bucket: bucket.into(),
            api_key: api_key.into(),
        };
        info!(
            "HTTP object storage: {} bucket={}",
            store.base_url, store.bucket
        );
        Ok(store)
    }

    fn object_url(&self, public: bool, key: &str) -> Result<reqwest::Url, PptxError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                PptxError::InvalidConfig(format!("storage URL '{}' cannot be a base", self.base_url))
            })?;
            segments.pop_if_empty().extend(["storage", "v1", "object"]);
            if public {
                segments.push("public");
            }
            segments.push(&self.bucket);
            segments.extend(key.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, PptxError> {
        let url = self.object_url(false, path)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PptxError::Storage(format!("GET '{path}': {e}")))?;

        let status = response.status();
        // The storage API answers 400 (not 404) for missing objects.
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::BAD_REQUEST {
            return Err(PptxError::ObjectNotFound {
                path: path.to_string(),
            });
        }
        if !status.is_success() {
            return Err(PptxError::Storage(format!("GET '{path}': HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PptxError::Storage(format!("GET '{path}': {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), PptxError> {
        let url = self.object_url(false, key)?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| PptxError::Storage(format!("upload '{key}': {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PptxError::Storage(format!(
                "upload '{key}': HTTP {status} {}",
                body.trim()
            )));
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        self.object_url(true, key)
            .map(|u| u.to_string())
            .unwrap_or_default()
    }
}

// ── In-memory ────────────────────────────────────────────────────────────

/// Objects kept in a process-local map.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Content type recorded for `key`.
    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().await.get(key).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, PptxError> {
        self.objects
            .read()
            .await
            .get(path)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| PptxError::ObjectNotFound {
                path: path.to_string(),
            })
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), PptxError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), (data, content_type.to_string()));
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://{key}")
    }
}
