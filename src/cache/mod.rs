//! Content-addressed inference cache.
//!
//! Every chunk's accepted parse is stored under the SHA-256 of the chunk
//! text, one JSON file per fingerprint. Identical text - within or across
//! runs or conversations - resolves to the same entry, so each unique
//! chunk is inferred at most once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::models::ChatRecord;

/// Deterministic digest of chunk text. A pure function of the text bytes
/// only - not conversation id, not chunk index, not model name.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Same fingerprint, different accepted content. Content addressing
    /// makes this impossible unless normalization stopped being
    /// deterministic, so it is rejected, never silently resolved.
    #[error("cache consistency violation for fingerprint {fingerprint}")]
    ConsistencyViolation { fingerprint: String },
}

/// On-disk shape of a single cache entry
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    fingerprint: String,
    created_at: DateTime<Utc>,
    records: Vec<ChatRecord>,
}

/// Durable fingerprint -> records store with per-fingerprint claims.
///
/// Entries are loaded once at startup and written incrementally on `put`;
/// the store is append-only with no expiry. `claim` hands out one-permit
/// guards so a get-miss/infer/put sequence for a fingerprint is atomic
/// with respect to racing workers.
pub struct FingerprintCache {
    dir: PathBuf,
    entries: Mutex<HashMap<String, Arc<Vec<ChatRecord>>>>,
    claims: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl FingerprintCache {
    /// Open (or create) the cache directory and load existing entries.
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir)?;

        let mut entries = HashMap::new();
        for item in std::fs::read_dir(dir)? {
            let path = item?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match load_entry(&path) {
                Ok(entry) => {
                    entries.insert(entry.fingerprint, Arc::new(entry.records));
                }
                Err(e) => {
                    // A damaged file costs one re-inference, nothing more
                    warn!("Skipping unreadable cache entry: {}", e);
                }
            }
        }

        debug!("Loaded {} cache entries from {:?}", entries.len(), dir);

        Ok(Self {
            dir: dir.to_path_buf(),
            entries: Mutex::new(entries),
            claims: Mutex::new(HashMap::new()),
        })
    }

    pub async fn get(&self, fingerprint: &str) -> Option<Arc<Vec<ChatRecord>>> {
        self.entries.lock().await.get(fingerprint).cloned()
    }

    /// Store the accepted records for a fingerprint.
    ///
    /// Idempotent for equal content. Differing content for an existing
    /// fingerprint is a `ConsistencyViolation`.
    pub async fn put(
        &self,
        fingerprint: &str,
        records: Vec<ChatRecord>,
    ) -> Result<Arc<Vec<ChatRecord>>, CacheError> {
        let mut entries = self.entries.lock().await;

        if let Some(existing) = entries.get(fingerprint) {
            if **existing == records {
                return Ok(existing.clone());
            }
            return Err(CacheError::ConsistencyViolation {
                fingerprint: fingerprint.to_string(),
            });
        }

        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            created_at: Utc::now(),
            records,
        };
        let path = self.entry_path(fingerprint);
        let json = serde_json::to_vec_pretty(&entry).map_err(|source| CacheError::Corrupt {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, json)?;

        let records = Arc::new(entry.records);
        entries.insert(entry.fingerprint, records.clone());
        Ok(records)
    }

    /// Acquire exclusive access to a fingerprint for the duration of a
    /// get-miss/infer/put sequence. Guards for different fingerprints do
    /// not contend.
    pub async fn claim(&self, fingerprint: &str) -> ClaimGuard {
        let semaphore = {
            let mut claims = self.claims.lock().await;
            claims
                .entry(fingerprint.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        let permit = semaphore.acquire_owned().await.expect("semaphore closed");
        ClaimGuard { _permit: permit }
    }

    pub async fn entry_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.json"))
    }
}

/// Releases the fingerprint claim when dropped
pub struct ClaimGuard {
    _permit: OwnedSemaphorePermit,
}

fn load_entry(path: &Path) -> Result<CacheEntry, CacheError> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|source| CacheError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}
