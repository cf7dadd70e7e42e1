//! Best-effort persistence of the most recent samples per channel.
//!
//! A cold start reads the cached tail once and pre-seeds the rolling window.
//! Every failure is logged and swallowed; a broken store only costs the seed.
//! Inside a tokio runtime writes are coalesced per key and handed to the
//! blocking pool, so the frame path never waits on the disk.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::sample::{ChannelKind, TelemetrySample};

pub const DEFAULT_CACHE_CAPACITY: usize = 6;
const CACHE_KEY_PREFIX: &str = "cellwatch.telemetry";

/// String key/value storage that survives restarts.
pub trait DurableStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
/// One `<key>.json` file per key under `dir`.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            bail!("invalid cache key '{key}'");
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl DurableStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => {
                Err(error).with_context(|| format!("failed to read {}", path.display()))
            }
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        write_text_atomic(&path, value)
    }
}

fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("telemetry");
    let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", std::process::id()));
    std::fs::write(&temp_path, content)
        .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
    if let Err(error) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(error).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(lock_or_recover(&self.entries).get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        lock_or_recover(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct PendingWrites {
    latest: HashMap<String, String>,
    draining: bool,
}

#[derive(Default)]
/// Newest unwritten encoding per key. `write_lock` is held from taking a batch
/// until it is stored, so an older value never lands after a newer one.
struct WriteBehind {
    pending: Mutex<PendingWrites>,
    write_lock: Mutex<()>,
}

impl WriteBehind {
    /// Returns true when the caller must start a drain.
    fn enqueue(&self, key: String, encoded: String) -> bool {
        let mut pending = lock_or_recover(&self.pending);
        pending.latest.insert(key, encoded);
        !std::mem::replace(&mut pending.draining, true)
    }

    fn drain(&self, store: &dyn DurableStore) {
        loop {
            let _guard = lock_or_recover(&self.write_lock);
            let batch = {
                let mut pending = lock_or_recover(&self.pending);
                if pending.latest.is_empty() {
                    pending.draining = false;
                    return;
                }
                std::mem::take(&mut pending.latest)
            };
            write_batch(store, batch);
        }
    }

    fn flush(&self, store: &dyn DurableStore) {
        let _guard = lock_or_recover(&self.write_lock);
        let batch = std::mem::take(&mut lock_or_recover(&self.pending).latest);
        write_batch(store, batch);
    }
}

fn write_batch(store: &dyn DurableStore, batch: HashMap<String, String>) {
    for (key, encoded) in batch {
        if let Err(error) = store.write(&key, &encoded) {
            tracing::warn!(key = key.as_str(), error = %error, "telemetry cache write failed");
        }
    }
}

#[derive(Clone)]
pub struct PersistenceCache {
    store: Option<Arc<dyn DurableStore>>,
    writes: Arc<WriteBehind>,
    capacity: usize,
}

impl std::fmt::Debug for PersistenceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceCache")
            .field("enabled", &self.store.is_some())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Default for PersistenceCache {
    fn default() -> Self {
        Self::disabled()
    }
}

impl PersistenceCache {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store: Some(store),
            writes: Arc::default(),
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// A cache that never reads or writes.
    pub fn disabled() -> Self {
        Self {
            store: None,
            writes: Arc::default(),
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn key_for(channel: ChannelKind) -> String {
        format!("{CACHE_KEY_PREFIX}.{}", channel.as_str())
    }

    /// Cached samples for `S`'s channel, oldest first; invalid entries are skipped.
    pub fn load<S: TelemetrySample>(&self) -> Vec<S> {
        let Some(store) = self.store.as_ref() else {
            return Vec::new();
        };
        self.writes.flush(store.as_ref());
        let key = Self::key_for(S::CHANNEL);
        let raw = match store.read(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(error) => {
                tracing::warn!(
                    channel = %S::CHANNEL,
                    error = %error,
                    "telemetry cache read failed"
                );
                return Vec::new();
            }
        };
        let entries = match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(
                    channel = %S::CHANNEL,
                    error = %error,
                    "telemetry cache is not a JSON array"
                );
                return Vec::new();
            }
        };
        let total = entries.len();
        let mut samples = entries
            .iter()
            .filter_map(|entry| S::validate(entry))
            .collect::<Vec<_>>();
        if samples.len() < total {
            tracing::debug!(
                channel = %S::CHANNEL,
                skipped = total - samples.len(),
                "skipped invalid cached telemetry samples"
            );
        }
        let skip = samples.len().saturating_sub(self.capacity);
        samples.drain(..skip);
        samples
    }

    /// Persists the newest `capacity` entries of `samples` (oldest first).
    ///
    /// On a tokio runtime the write happens on the blocking pool and only the
    /// latest value per channel is kept while a write is in flight. Without a
    /// runtime it is written before returning.
    pub fn save<S: TelemetrySample>(&self, samples: &[S]) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let skip = samples.len().saturating_sub(self.capacity);
        let encoded = match serde_json::to_string(&samples[skip..]) {
            Ok(encoded) => encoded,
            Err(error) => {
                tracing::warn!(
                    channel = %S::CHANNEL,
                    error = %error,
                    "failed to encode telemetry cache"
                );
                return;
            }
        };
        let start_drain = self.writes.enqueue(Self::key_for(S::CHANNEL), encoded);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) if start_drain => {
                let store = Arc::clone(store);
                let writes = Arc::clone(&self.writes);
                runtime.spawn_blocking(move || writes.drain(store.as_ref()));
            }
            Ok(_) => {}
            Err(_) => self.writes.drain(store.as_ref()),
        }
    }

    /// Blocks until every queued write has reached the store.
    pub fn flush(&self) {
        if let Some(store) = self.store.as_ref() {
            self.writes.flush(store.as_ref());
        }
    }
}
