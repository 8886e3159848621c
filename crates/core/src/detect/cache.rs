//! Per-source schema persistence. A cache hit skips the whole
//! detection/inference round on restart; the file layout is one JSON
//! document per source under a cache directory, fronted by an in-process
//! hot map.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::Schema;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to write schema cache entry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode schema for cache: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Storage for schemas keyed by source identity. Misses are not errors;
/// `load` answers `None` for absent or unreadable entries.
pub trait SchemaCache: Send + Sync {
    fn load(&self, source: &str) -> Option<Schema>;
    fn save(&self, source: &str, schema: &Schema) -> Result<(), CacheError>;
}

/// Cache that remembers nothing. Used for `--no-cache` and stdin/demo
/// sources where identity is not stable across runs.
pub struct NoopCache;

impl SchemaCache for NoopCache {
    fn load(&self, _source: &str) -> Option<Schema> {
        None
    }

    fn save(&self, _source: &str, _schema: &Schema) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Disk-backed cache with an in-process hot map in front of it.
pub struct FileSchemaCache {
    dir: PathBuf,
    hot: DashMap<String, Schema>,
}

impl FileSchemaCache {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            hot: DashMap::new(),
        }
    }

    fn entry_path(&self, source: &str) -> PathBuf {
        let mut h = DefaultHasher::new();
        source.hash(&mut h);
        self.dir.join(format!("schema_{:016x}.json", h.finish()))
    }
}

impl SchemaCache for FileSchemaCache {
    fn load(&self, source: &str) -> Option<Schema> {
        if let Some(hit) = self.hot.get(source) {
            return Some(hit.clone());
        }
        let path = self.entry_path(source);
        let data = std::fs::read(&path).ok()?;
        match serde_json::from_slice::<Schema>(&data) {
            Ok(schema) => {
                debug!(source, path = %path.display(), "schema cache hit");
                self.hot.insert(source.to_string(), schema.clone());
                Some(schema)
            }
            Err(e) => {
                // Stale or corrupt entry; treat as a miss.
                warn!(source, error = %e, "unreadable schema cache entry ignored");
                None
            }
        }
    }

    fn save(&self, source: &str, schema: &Schema) -> Result<(), CacheError> {
        self.hot.insert(source.to_string(), schema.clone());

        if let Err(source) = std::fs::create_dir_all(&self.dir) {
            return Err(CacheError::Write {
                path: self.dir.clone(),
                source,
            });
        }
        let path = self.entry_path(source);
        let data = serde_json::to_vec_pretty(schema)?;
        // Write-then-rename so a crash never leaves a half-written entry.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data).map_err(|source| CacheError::Write {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| CacheError::Write { path, source })?;
        Ok(())
    }
}
