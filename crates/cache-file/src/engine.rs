//! The file-backed engine.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cache_config::FileConfig;
use cache_core::{
    epoch_secs, CacheEngine, CacheError, CacheKey, CacheResult, Entry, PerformanceLevel,
};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File extension for cache records
const CACHE_EXT: &str = "cache";

/// On-disk record; the value travels base64-wrapped so records stay valid
/// JSON regardless of payload bytes.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    value: String,
    created_at: u64,
    accessed_at: u64,
    access_count: u64,
    size: u64,
    expires_at: Option<u64>,
}

impl StoredRecord {
    fn from_entry(entry: &Entry) -> Self {
        Self {
            value: BASE64.encode(&entry.value),
            created_at: entry.created_at,
            accessed_at: entry.accessed_at,
            access_count: entry.access_count,
            size: entry.size,
            expires_at: entry.expires_at,
        }
    }

    fn into_entry(self) -> Option<Entry> {
        Some(Entry {
            value: BASE64.decode(&self.value).ok()?,
            created_at: self.created_at,
            accessed_at: self.accessed_at,
            access_count: self.access_count,
            size: self.size,
            expires_at: self.expires_at,
        })
    }
}

/// Statistics snapshot for a [`FileEngine`]
#[derive(Debug, Clone, Default)]
pub struct FileStats {
    /// Cache files currently on disk
    pub files: usize,
    /// Total bytes across cache files
    pub total_bytes: u64,
    /// Files holding expired entries
    pub expired: usize,
    /// Free bytes on the filesystem holding the cache root
    pub free_disk_bytes: u64,
}

/// Sharded-directory persistent store.
pub struct FileEngine {
    root: PathBuf,
    prefix: String,
    permissions: u32,
}

impl FileEngine {
    /// Create an engine rooted at `config.path` with an empty prefix
    #[must_use]
    pub fn new(config: &FileConfig) -> Self {
        Self::with_prefix(config, "")
    }

    /// Create an engine whose filenames carry `prefix` before the key hash
    #[must_use]
    pub fn with_prefix(config: &FileConfig, prefix: impl Into<String>) -> Self {
        Self {
            root: config.path.clone(),
            prefix: prefix.into(),
            permissions: config.permissions,
        }
    }

    /// Resolved path for a key: `<root>/ab/cd/<prefix><sha256_hex>.cache`
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.root
            .join(&digest[0..2])
            .join(&digest[2..4])
            .join(format!("{}{digest}.{CACHE_EXT}", self.prefix))
    }

    fn ensure_parent(&self, path: &Path) -> CacheResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
                self.apply_permissions(parent);
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn apply_permissions(&self, dir: &Path) {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(self.permissions)) {
            warn!(path = %dir.display(), error = %e, "Could not set directory permissions");
        }
    }

    #[cfg(not(unix))]
    fn apply_permissions(&self, _dir: &Path) {}

    /// Serialize and write `entry` under an exclusive lock
    fn write_record(&self, path: &Path, entry: &Entry) -> CacheResult<()> {
        self.ensure_parent(path)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        let result = Self::write_locked(&file, entry);
        let _ = fs2::FileExt::unlock(&file);
        result
    }

    fn write_locked(mut file: &File, entry: &Entry) -> CacheResult<()> {
        let payload = serde_json::to_vec(&StoredRecord::from_entry(entry))
            .map_err(|e| CacheError::serialization(e.to_string()))?;
        file.set_len(0)?;
        file.write_all(&payload)?;
        file.sync_data()?;
        Ok(())
    }

    /// Read the record at `path`, treating unreadable or unparseable files
    /// as absent (and deleting them). Expired entries are also deleted.
    fn read_entry(&self, path: &Path) -> Option<Entry> {
        let mut file = File::open(path).ok()?;
        let _ = file.lock_shared();
        let mut payload = Vec::new();
        let read = file.read_to_end(&mut payload);
        let _ = fs2::FileExt::unlock(&file);
        drop(file);

        if read.is_err() {
            return None;
        }

        let entry = serde_json::from_slice::<StoredRecord>(&payload)
            .ok()
            .and_then(StoredRecord::into_entry);

        match entry {
            Some(entry) if entry.is_expired(epoch_secs()) => {
                let _ = fs::remove_file(path);
                None
            }
            Some(entry) => Some(entry),
            None => {
                debug!(path = %path.display(), "Unparseable cache file treated as miss");
                let _ = fs::remove_file(path);
                None
            }
        }
    }

    /// Every cache file under the two shard levels
    fn walk(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let Ok(level1) = fs::read_dir(&self.root) else {
            return files;
        };
        for shard1 in level1.flatten() {
            let Ok(level2) = fs::read_dir(shard1.path()) else {
                continue;
            };
            for shard2 in level2.flatten() {
                let Ok(leaves) = fs::read_dir(shard2.path()) else {
                    continue;
                };
                for leaf in leaves.flatten() {
                    let path = leaf.path();
                    if path.extension().is_some_and(|ext| ext == CACHE_EXT) {
                        files.push(path);
                    }
                }
            }
        }
        files
    }

    /// Enumerate file count, byte totals, expired entries, and free disk
    /// space
    #[must_use]
    pub fn stats(&self) -> FileStats {
        let now = epoch_secs();
        let mut stats = FileStats {
            free_disk_bytes: fs2::available_space(&self.root).unwrap_or(0),
            ..FileStats::default()
        };

        for path in self.walk() {
            stats.files += 1;
            if let Ok(meta) = fs::metadata(&path) {
                stats.total_bytes += meta.len();
            }
            let expired = File::open(&path)
                .ok()
                .and_then(|mut file| {
                    let mut payload = Vec::new();
                    file.read_to_end(&mut payload).ok()?;
                    serde_json::from_slice::<StoredRecord>(&payload).ok()
                })
                .is_some_and(|record| {
                    record.expires_at.is_some_and(|deadline| now >= deadline)
                });
            if expired {
                stats.expired += 1;
            }
        }
        stats
    }
}

#[async_trait]
impl CacheEngine for FileEngine {
    fn name(&self) -> &'static str {
        "file"
    }

    fn performance_level(&self) -> PerformanceLevel {
        PerformanceLevel::new(2)
    }

    async fn is_available(&self) -> bool {
        fs::create_dir_all(&self.root).is_ok()
    }

    async fn ping(&self) -> CacheResult<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        let path = self.path_for(key.as_str());
        Ok(self.read_entry(&path).map(|entry| entry.value))
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl_seconds: u64) -> CacheResult<()> {
        let entry = Entry::new(value.to_vec(), key.len(), ttl_seconds);
        self.write_record(&self.path_for(key.as_str()), &entry)
    }

    async fn add(&self, key: &CacheKey, value: &[u8], ttl_seconds: u64) -> CacheResult<bool> {
        let path = self.path_for(key.as_str());

        // Lazy expiry: a dead record must not block the add.
        if path.exists() && self.read_entry(&path).is_none() {
            let _ = fs::remove_file(&path);
        }

        self.ensure_parent(&path)?;
        // create_new is the filesystem's set-if-absent primitive.
        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        file.lock_exclusive()?;
        let entry = Entry::new(value.to_vec(), key.len(), ttl_seconds);
        let result = Self::write_locked(&file, &entry);
        let _ = fs2::FileExt::unlock(&file);
        result.map(|()| true)
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        match fs::remove_file(self.path_for(key.as_str())) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.read_entry(&self.path_for(key.as_str())).is_some())
    }

    async fn clear(&self) -> CacheResult<()> {
        for path in self.walk() {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }

    async fn increment(&self, key: &CacheKey, delta: i64) -> CacheResult<i64> {
        let path = self.path_for(key.as_str());
        let existing = self.read_entry(&path);

        let current = match &existing {
            Some(entry) => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|text| text.trim().parse::<i64>().ok())
                .ok_or_else(|| CacheError::TypeMismatch {
                    key: key.as_str().to_string(),
                })?,
            None => 0,
        };

        let updated = current + delta;
        let rendered = updated.to_string().into_bytes();
        let entry = match existing {
            Some(mut entry) => {
                entry.size = key.len() as u64
                    + rendered.len() as u64
                    + cache_core::METADATA_OVERHEAD;
                entry.value = rendered;
                entry
            }
            None => Entry::new(rendered, key.len(), 0),
        };

        self.write_record(&path, &entry)?;
        Ok(updated)
    }

    async fn get_multiple(&self, keys: &[CacheKey]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        Ok(keys
            .iter()
            .map(|key| self.read_entry(&self.path_for(key.as_str())).map(|e| e.value))
            .collect())
    }

    async fn set_multiple(
        &self,
        entries: &[(CacheKey, Vec<u8>)],
        ttl_seconds: u64,
    ) -> CacheResult<usize> {
        let mut stored = 0;
        for (key, value) in entries {
            let entry = Entry::new(value.clone(), key.len(), ttl_seconds);
            match self.write_record(&self.path_for(key.as_str()), &entry) {
                Ok(()) => stored += 1,
                Err(e) => warn!(key = %key, error = %e, "Batched file write failed"),
            }
        }
        Ok(stored)
    }

    async fn delete_multiple(&self, keys: &[CacheKey]) -> CacheResult<usize> {
        let mut removed = 0;
        for key in keys {
            if fs::remove_file(self.path_for(key.as_str())).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn touch(&self, key: &CacheKey, ttl_seconds: u64) -> CacheResult<bool> {
        let path = self.path_for(key.as_str());
        match self.read_entry(&path) {
            Some(mut entry) => {
                let now = epoch_secs();
                entry.expires_at = (ttl_seconds > 0).then(|| now + ttl_seconds);
                self.write_record(&path, &entry)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count(&self) -> CacheResult<usize> {
        let now = epoch_secs();
        let live = self
            .walk()
            .into_iter()
            .filter(|path| {
                File::open(path)
                    .ok()
                    .and_then(|mut file| {
                        let mut payload = Vec::new();
                        file.read_to_end(&mut payload).ok()?;
                        serde_json::from_slice::<StoredRecord>(&payload).ok()
                    })
                    .is_some_and(|record| {
                        !record.expires_at.is_some_and(|deadline| now >= deadline)
                    })
            })
            .count();
        Ok(live)
    }

    async fn cleanup(&self) -> CacheResult<usize> {
        let now = epoch_secs();
        let mut reclaimed = 0;

        for path in self.walk() {
            let parsed = File::open(&path).ok().and_then(|mut file| {
                let mut payload = Vec::new();
                file.read_to_end(&mut payload).ok()?;
                serde_json::from_slice::<StoredRecord>(&payload).ok()
            });

            let dead = match parsed {
                Some(record) => record.expires_at.is_some_and(|deadline| now >= deadline),
                None => true,
            };

            if dead && fs::remove_file(&path).is_ok() {
                reclaimed += 1;
            }
        }

        debug!(reclaimed, "File cleanup pass finished");
        Ok(reclaimed)
    }
}
