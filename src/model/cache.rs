use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::BridgeError;

/// Scope holding downloaded model weights.
pub const MODEL_CACHE_SCOPE: &str = "webllm/model";
/// Scope holding compiled runtime libraries.
pub const WASM_CACHE_SCOPE: &str = "webllm/wasm";

/// Named-scope key/value store used by the inference runtime for artifacts.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn open(&self, scope: &str) -> Result<Box<dyn CacheScope>, BridgeError>;
}

#[async_trait]
pub trait CacheScope: Send + Sync {
    async fn keys(&self) -> Result<Vec<String>, BridgeError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BridgeError>;

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), BridgeError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, BridgeError>;
}

/// Deletes every key in `scope`; returns how many were removed.
pub async fn clear_scope(storage: &dyn CacheStorage, scope: &str) -> Result<usize, BridgeError> {
    let cache = storage.open(scope).await?;
    let mut removed = 0;
    for key in cache.keys().await? {
        if cache.delete(&key).await? {
            removed += 1;
        }
    }
    tracing::info!(scope, removed, "cache scope cleared");
    Ok(removed)
}

/// Empties both artifact scopes.
pub async fn clear_all(storage: &dyn CacheStorage) -> Result<usize, BridgeError> {
    let mut removed = 0;
    for scope in [MODEL_CACHE_SCOPE, WASM_CACHE_SCOPE] {
        removed += clear_scope(storage, scope).await?;
    }
    Ok(removed)
}

/// Directory-backed cache: one subdirectory per scope, one file per key.
#[derive(Debug, Clone)]
pub struct FsCacheStorage {
    root: PathBuf,
}

impl FsCacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CacheStorage for FsCacheStorage {
    async fn open(&self, scope: &str) -> Result<Box<dyn CacheScope>, BridgeError> {
        let dir = self.root.join(sanitize_component(scope));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| BridgeError::Other(format!("cannot open cache scope {scope}: {e}")))?;
        Ok(Box::new(FsCacheScope { dir }))
    }
}

struct FsCacheScope {
    dir: PathBuf,
}

impl FsCacheScope {
    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(sanitize_component(key))
    }
}

#[async_trait]
impl CacheScope for FsCacheScope {
    async fn keys(&self) -> Result<Vec<String>, BridgeError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && entry.file_type().await.map_err(io_err)?.is_file() {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BridgeError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), BridgeError> {
        // Temp file + rename so readers never see a partial artifact. Keys never
        // start with a dot, so temp names cannot collide with them.
        let path = self.path_for(key);
        let tmp_path = self.dir.join(format!(".{}.tmp", sanitize_component(key)));
        tokio::fs::write(&tmp_path, value).await.map_err(io_err)?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(io_err(e));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, BridgeError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(e)),
        }
    }
}

fn io_err(e: std::io::Error) -> BridgeError {
    BridgeError::Other(format!("cache I/O error: {e}"))
}

/// Maps a scope or key to one safe path component. Only alphanumerics, `-`,
/// `_` and `.` survive; everything else becomes `_`. A leading `.` also
/// becomes `_`, leaving dot-prefixed names to temp files.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else if let Some(rest) = cleaned.strip_prefix('.') {
        format!("_{rest}")
    } else {
        cleaned
    }
}
