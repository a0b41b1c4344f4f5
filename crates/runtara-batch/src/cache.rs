// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Memory and directory cache tiers in front of a live fetch.
//!
//! The directory tier is an optimization only: read and write failures are
//! logged and fall through to the next tier.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{Job, JobStatus};

/// A value the directory tier knows how to store.
pub trait Persist: Clone + Send + Sync + Sized {
    /// File extension, without the dot.
    const EXTENSION: &'static str;

    fn encode(&self) -> Result<Vec<u8>>;

    fn decode(bytes: Vec<u8>) -> Result<Self>;

    /// Whether the value may be written to the directory tier.
    fn should_persist(&self) -> bool;
}

impl Persist for Job {
    const EXTENSION: &'static str = "json";

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(bytes: Vec<u8>) -> Result<Self> {
        Ok(serde_json::from_slice(&bytes)?)
    }

    // Any other status may still change.
    fn should_persist(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Artifact content is immutable once its id exists.
impl Persist for Bytes {
    const EXTENSION: &'static str = "jsonl";

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.to_vec())
    }

    fn decode(bytes: Vec<u8>) -> Result<Self> {
        Ok(Bytes::from(bytes))
    }

    fn should_persist(&self) -> bool {
        true
    }
}

/// Two-tier read-through cache keyed by remote id.
pub struct TieredCache<V> {
    memory: RwLock<HashMap<String, V>>,
    dir: Option<PathBuf>,
}

impl<V: Persist> TieredCache<V> {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            dir,
        }
    }

    /// In-memory value, if any.
    pub async fn cached(&self, key: &str) -> Option<V> {
        self.memory.read().await.get(key).cloned()
    }

    /// Resolve `key` from memory, then disk, then `fetch`.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.cached(key).await {
            debug!(key, "Memory cache hit");
            return Ok(value);
        }

        let path = self.path_for(key);
        if let Some(path) = &path
            && let Some(value) = read_persisted::<V>(path).await
        {
            debug!(key, path = %path.display(), "Disk cache hit");
            self.memory
                .write()
                .await
                .insert(key.to_string(), value.clone());
            return Ok(value);
        }

        let value = fetch().await?;
        self.memory
            .write()
            .await
            .insert(key.to_string(), value.clone());

        if let Some(path) = &path
            && value.should_persist()
        {
            write_persisted(path, &value).await;
        }

        Ok(value)
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        if !is_plain_file_name(key) {
            debug!(key, "Key is not a plain file name, skipping disk cache");
            return None;
        }
        Some(dir.join(format!("{}.{}", key, V::EXTENSION)))
    }
}

fn is_plain_file_name(key: &str) -> bool {
    !key.is_empty() && key != "." && key != ".." && !key.contains(['/', '\\', '\0'])
}

async fn read_persisted<V: Persist>(path: &Path) -> Option<V> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read disk cache entry");
            return None;
        }
    };

    match V::decode(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring undecodable disk cache entry");
            None
        }
    }
}

async fn write_persisted<V: Persist>(path: &Path, value: &V) {
    let bytes = match value.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to encode disk cache entry");
            return;
        }
    };

    if let Some(parent) = path.parent()
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        warn!(path = %parent.display(), error = %e, "Failed to create cache directory");
        return;
    }

    match tokio::fs::write(path, bytes).await {
        Ok(()) => debug!(path = %path.display(), "Wrote disk cache entry"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to write disk cache entry"),
    }
}
