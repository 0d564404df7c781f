//! Per-event memoization of tally payloads.
//!
//! Entries are keyed by a digest of the event document (path plus content) and
//! carry three namespace hashes. A hit requires all three to match the current
//! run; anything else (stale hashes, unreadable files, garbage JSON) is a
//! miss, and stale entry files are deleted on sight.

use crate::error::{Error, Result};
use crate::store::Store;
use atomic_write_file::AtomicWriteFile;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const ENTRY_SUFFIX: &str = ".tallycache.json";

/// Coarse invalidation hashes: any athlete document, any league document, or
/// the engine binary changing flushes every cached event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NamespaceHashes {
    pub athletes: String,
    pub leagues: String,
    pub engine: String,
}

/// Hash the current state of both document namespaces and the engine itself.
pub fn namespace_hashes(store: &Store) -> Result<NamespaceHashes> {
    Ok(NamespaceHashes {
        athletes: hash_tree(store, &store.athletes_dir())?,
        leagues: hash_tree(store, &store.leagues_dir())?,
        engine: hash_engine()?,
    })
}

/// Digest of every YAML document under `dir`, in sorted path order, covering
/// both paths and contents.
fn hash_tree(store: &Store, dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    for path in store.list_documents(dir)? {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0]);
        let content = fs::read(&path)
            .map_err(|e| Error::data(&path, format!("read failed: {e}")))?;
        hasher.update(&content);
        hasher.update([0]);
    }
    Ok(hex(&hasher.finalize()))
}

/// The engine namespace is the running executable: a rebuild with different
/// scoring logic must invalidate the cache.
fn hash_engine() -> Result<String> {
    let exe = env::current_exe()?;
    let bytes = fs::read(&exe)?;
    Ok(hex(&Sha256::digest(&bytes)))
}

fn hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Deserialize, Serialize)]
struct CacheEntry {
    athletes_hash: String,
    leagues_hash: String,
    engine_hash: String,
    payload: Value,
}

/// Reads and writes cache entries under the store's `cache/` directory.
///
/// With caching disabled, reads are skipped but fresh entries are still
/// written, so re-enabling starts warm.
#[derive(Debug)]
pub struct CacheManager {
    dir: PathBuf,
    hashes: NamespaceHashes,
    enabled: bool,
}

impl CacheManager {
    pub fn new(store: &Store, enabled: bool) -> Result<Self> {
        let dir = store.cache_dir();
        fs::create_dir_all(&dir)?;
        Ok(CacheManager {
            dir,
            hashes: namespace_hashes(store)?,
            enabled,
        })
    }

    pub fn hashes(&self) -> &NamespaceHashes {
        &self.hashes
    }

    /// Entry file for one event document, keyed by its path and content.
    pub fn entry_path(&self, event_path: &Path, content: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(event_path.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(content.as_bytes());
        self.dir.join(format!("{}{ENTRY_SUFFIX}", hex(&hasher.finalize())))
    }

    /// Return the cached payload for an event, or compute and persist it.
    pub fn get_or_compute(
        &self,
        event_path: &Path,
        content: &str,
        compute: impl FnOnce() -> Result<Value>,
    ) -> Result<Value> {
        let entry_path = self.entry_path(event_path, content);

        if self.enabled {
            if let Some(entry) = read_entry(&entry_path) {
                if entry.athletes_hash == self.hashes.athletes
                    && entry.leagues_hash == self.hashes.leagues
                    && entry.engine_hash == self.hashes.engine
                {
                    return Ok(entry.payload);
                }
                // Stale under the current namespaces; it can never hit again.
                let _ = fs::remove_file(&entry_path);
            }
        }

        let payload = compute()?;
        let entry = CacheEntry {
            athletes_hash: self.hashes.athletes.clone(),
            leagues_hash: self.hashes.leagues.clone(),
            engine_hash: self.hashes.engine.clone(),
            payload,
        };
        let text = serde_json::to_string(&entry)
            .map_err(|e| Error::data(&entry_path, format!("serialize failed: {e}")))?;
        let mut file = AtomicWriteFile::open(&entry_path)?;
        file.write_all(text.as_bytes())?;
        file.commit()?;
        Ok(entry.payload)
    }

    /// Delete every cache entry, returning how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for item in fs::read_dir(&self.dir)? {
            let path = item?.path();
            if path.to_string_lossy().ends_with(ENTRY_SUFFIX) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// A readable, well-formed entry or nothing. Corruption is a miss, not an
/// error.
fn read_entry(path: &Path) -> Option<CacheEntry> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}
