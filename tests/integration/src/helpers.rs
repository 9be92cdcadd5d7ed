//! Shared helpers for the integration suite.

use cache_config::{CacheSettings, FileConfig, MemoryConfig};
use cache_core::{CacheEngine, CacheKey};
use cache_facade::Cache;
use cache_file::FileEngine;
use cache_memory::MemoryEngine;
use cache_routing::EngineSelector;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::sync::Mutex;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once, and only when `TEST_LOG` is
/// set)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Force tracing initialization
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Tests that mutate the process environment serialize on this lock
pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// A fresh memory engine with default configuration
pub fn memory_engine() -> Arc<MemoryEngine> {
    Arc::new(MemoryEngine::new(&MemoryConfig::default()))
}

/// A fresh file engine in its own temp directory; keep the guard alive
/// for the test's duration
pub fn file_engine() -> (TempDir, Arc<FileEngine>) {
    let dir = TempDir::new().expect("temp dir");
    let config = FileConfig {
        path: dir.path().to_path_buf(),
        permissions: 0o755,
    };
    (dir, Arc::new(FileEngine::new(&config)))
}

/// A facade over a single fresh memory engine
pub fn memory_cache() -> Arc<Cache> {
    let selector = Arc::new(EngineSelector::new(None));
    selector.register(memory_engine());
    Arc::new(Cache::new(selector, &CacheSettings::default()))
}

/// Both production engines under their shared contract, for law tests
pub fn contract_engines() -> (TempDir, Vec<(&'static str, Arc<dyn CacheEngine>)>) {
    let (dir, file) = file_engine();
    (
        dir,
        vec![
            ("memory", memory_engine() as Arc<dyn CacheEngine>),
            ("file", file as Arc<dyn CacheEngine>),
        ],
    )
}

/// Validated key helper
pub fn key(name: &str) -> CacheKey {
    CacheKey::new(name).expect("test key")
}
