//! File-backed artifact store with in-memory lifetime counters

use crate::error::{Result, TempcacheError};
use crate::types::{as_millis, CacheEntry, CacheStats};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Maps keys to remaining lifetimes and owns one file per key under `root`.
///
/// Every counter-map mutation happens under a single lock, so the store is
/// safe to share between concurrently admitted requests and the sweeper.
pub struct Store {
    /// Remaining lifetime in milliseconds, per key
    counters: Mutex<HashMap<String, i64>>,
    /// Directory where artifacts are stored
    root: PathBuf,
    /// Milliseconds added by a bump
    bump_strength_ms: i64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Store {
    /// Create a new store rooted at `root` (made absolute against the
    /// current directory when relative)
    pub fn new(root: PathBuf, bump_strength: Duration) -> Self {
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&root))
                .unwrap_or(root)
        };

        Self {
            counters: Mutex::new(HashMap::new()),
            root,
            bump_strength_ms: as_millis(bump_strength),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Wipe and recreate the root directory. Nothing survives a restart.
    pub async fn init(&self) -> Result<()> {
        if self.root.parent().is_none() {
            return Err(TempcacheError::Unexpected(format!(
                "refusing to wipe {:?}",
                self.root
            )));
        }

        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.root).await?;
        self.counters.lock().await.clear();

        info!(root = ?self.root, "Store initialized");
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the backing file for `key`
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Read the artifact, bumping the key first if it is tracked.
    /// An untracked key is not an error; a missing file is.
    pub async fn read_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        self.bump_if_tracked(key).await;
        Ok(fs::read(&path).await?)
    }

    /// Absolute path of a tracked key. The file itself is not checked.
    pub async fn read_path(&self, key: &str) -> Result<PathBuf> {
        let path = self.path_for(key)?;
        self.bump(key).await?;
        Ok(path)
    }

    /// Open the artifact for streaming, bumping the key if it is tracked
    pub async fn open_stream(&self, key: &str) -> Result<fs::File> {
        let path = self.path_for(key)?;
        self.bump_if_tracked(key).await;
        Ok(fs::File::open(&path).await?)
    }

    /// Extend a tracked key's lifetime, returning the new remaining lifetime
    pub async fn bump(&self, key: &str) -> Result<i64> {
        validate_key(key)?;
        let mut counters = self.counters.lock().await;
        match counters.get_mut(key) {
            Some(remaining) => {
                *remaining = remaining.saturating_add(self.bump_strength_ms);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(*remaining)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(TempcacheError::KeyNotFound(key.to_string()))
            }
        }
    }

    async fn bump_if_tracked(&self, key: &str) -> bool {
        self.bump(key).await.is_ok()
    }

    /// Copy `src` into the store under `key`. A source that cannot be opened
    /// leaves any previous entry for `key` untouched.
    pub async fn put_file(&self, key: &str, src: &Path, initial_life: Duration) -> Result<()> {
        let dest = self.path_for(key)?;
        let mut source = fs::File::open(src).await?;
        if !source.metadata().await?.is_file() {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} is not a regular file", src.display()),
            )
            .into());
        }

        let size = self.write_entry(key, &dest, &mut source, initial_life).await?;
        debug!(key = %key, size, "Stored artifact from file");
        Ok(())
    }

    /// Drain `src` into the store under `key`, returning the bytes written
    pub async fn put_stream<R>(&self, key: &str, src: &mut R, initial_life: Duration) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let dest = self.path_for(key)?;

        let size = self.write_entry(key, &dest, src, initial_life).await?;
        debug!(key = %key, size, "Stored artifact from stream");
        Ok(size)
    }

    async fn write_entry<R>(
        &self,
        key: &str,
        dest: &Path,
        src: &mut R,
        initial_life: Duration,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        // The counter and the file appear together, so a sweep never sees
        // one without the other. A failed create changes nothing.
        let mut file = {
            let mut counters = self.counters.lock().await;
            let file = fs::File::create(dest).await?;
            counters.insert(key.to_string(), as_millis(initial_life));
            file
        };

        let written = async {
            let size = tokio::io::copy(src, &mut file).await?;
            file.flush().await?;
            Ok::<_, std::io::Error>(size)
        }
        .await;
        drop(file);

        match written {
            Ok(size) => {
                self.discard_if_evicted(key, dest).await;
                Ok(size)
            }
            Err(e) => {
                self.rollback(key, dest).await;
                Err(e.into())
            }
        }
    }

    /// A sweep may evict the entry while its file is still being written.
    /// The file must not outlive the counter.
    async fn discard_if_evicted(&self, key: &str, dest: &Path) {
        let counters = self.counters.lock().await;
        if !counters.contains_key(key) {
            remove_file_quietly(dest).await;
            debug!(key = %key, "Entry expired while being written");
        }
    }

    /// Undo a put whose write failed after the destination was truncated:
    /// no counter, no partial file
    async fn rollback(&self, key: &str, dest: &Path) {
        let mut counters = self.counters.lock().await;
        counters.remove(key);
        remove_file_quietly(dest).await;
        warn!(key = %key, "Put failed, entry rolled back");
    }

    /// Delete the backing file (ignoring absence) and forget the key.
    /// Returns whether the key was tracked.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        let mut counters = self.counters.lock().await;
        let tracked = counters.remove(key).is_some();
        remove_file_quietly(&path).await;
        Ok(tracked)
    }

    /// Subtract `tick` from every entry and evict those at or below zero.
    /// Returns the evicted keys.
    pub async fn decay(&self, tick: Duration) -> Vec<String> {
        let tick_ms = as_millis(tick);
        let mut counters = self.counters.lock().await;

        let mut expired = Vec::new();
        for (key, remaining) in counters.iter_mut() {
            *remaining = remaining.saturating_sub(tick_ms);
            if *remaining <= 0 {
                expired.push(key.clone());
            }
        }

        // Files are deleted while the map is still locked so a concurrent
        // put of the same key cannot have its fresh file removed.
        for key in &expired {
            counters.remove(key);
            remove_file_quietly(&self.root.join(key)).await;
            debug!(key = %key, "Evicted expired entry");
        }

        self.evictions
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired
    }

    pub async fn remaining_life(&self, key: &str) -> Option<i64> {
        self.counters.lock().await.get(key).copied()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.counters.lock().await.contains_key(key)
    }

    /// All tracked entries, sorted by key
    pub async fn entries(&self) -> Vec<CacheEntry> {
        let counters = self.counters.lock().await;
        let mut entries: Vec<CacheEntry> = counters
            .iter()
            .map(|(key, remaining)| CacheEntry {
                key: key.clone(),
                remaining_life_ms: *remaining,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Get current store statistics
    pub async fn stats(&self) -> CacheStats {
        let counters = self.counters.lock().await;
        CacheStats {
            entries: counters.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// A key must name exactly one file directly under the root
fn validate_key(key: &str) -> Result<()> {
    let invalid = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains(['/', '\\', '\0']);

    if invalid {
        return Err(TempcacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}

async fn remove_file_quietly(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Failed to remove cached file"),
    }
}
