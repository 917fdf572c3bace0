// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The content-addressed cache store.
//!
//! Filesystem-backed: one directory per fingerprint shard under the user
//! data root, one `.meta` and one `.out` file per entry. Single-flight is
//! realized with a
//! `Mutex<HashMap<Fingerprint, Arc<Notify>>>` so concurrent computers of the
//! same fingerprint park on the first computer's `Notify` rather than
//! re-entering the scheduler for that node.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, Notify};

use crate::errors::CacheCorruption;
use crate::fingerprint::Fingerprint;

/// Only `Success` is stored. A task that ran with `allow_failure = true`
/// and exited non-zero is recorded in history but never cached — caching
/// a known-bad result would make every later build silently "succeed"
/// from a stale failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub exit_code: i32,
    pub captured_output_path: PathBuf,
    pub timestamp_unix_ms: u128,
    pub expires_at_unix_ms: Option<u128>,
}

pub struct CacheStore {
    root: PathBuf,
    in_flight: Mutex<HashMap<Fingerprint, Arc<Notify>>>,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CacheStore {
            root: root.into(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn shard_dir(&self, fingerprint: Fingerprint) -> PathBuf {
        self.root.join(fingerprint.shard())
    }

    fn meta_path(&self, fingerprint: Fingerprint) -> PathBuf {
        self.shard_dir(fingerprint).join(format!("{}.meta", fingerprint.to_hex()))
    }

    fn out_path(&self, fingerprint: Fingerprint) -> PathBuf {
        self.shard_dir(fingerprint).join(format!("{}.out", fingerprint.to_hex()))
    }

    /// O(1) lookup on fingerprint. A corrupt entry is treated as a miss and
    /// removed lazily.
    pub async fn lookup(&self, fingerprint: Fingerprint) -> Option<CacheEntry> {
        let meta_path = self.meta_path(fingerprint);
        let raw = fs::read(&meta_path).await.ok()?;
        match serde_json::from_slice::<CacheEntry>(&raw) {
            Ok(entry) => {
                if let Some(expires_at) = entry.expires_at_unix_ms {
                    if now_unix_ms() >= expires_at {
                        self.evict(fingerprint).await;
                        return None;
                    }
                }
                if fs::metadata(&entry.captured_output_path).await.is_err() {
                    self.evict(fingerprint).await;
                    return None;
                }
                Some(entry)
            }
            Err(_) => {
                self.evict(fingerprint).await;
                None
            }
        }
    }

    /// Idempotent insert: a second insert on an existing key is a no-op,
    /// keeping the first successful record.
    pub async fn insert(
        &self,
        fingerprint: Fingerprint,
        exit_code: i32,
        captured_output: &[u8],
    ) -> Result<(), CacheCorruption> {
        if self.lookup(fingerprint).await.is_some() {
            return Ok(());
        }
        let dir = self.shard_dir(fingerprint);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| self.unreadable(fingerprint, e))?;

        let out_path = self.out_path(fingerprint);
        fs::write(&out_path, captured_output)
            .await
            .map_err(|e| self.unreadable(fingerprint, e))?;

        let entry = CacheEntry {
            exit_code,
            captured_output_path: out_path,
            timestamp_unix_ms: now_unix_ms(),
            expires_at_unix_ms: None,
        };
        let meta_path = self.meta_path(fingerprint);
        let encoded = serde_json::to_vec(&entry).map_err(|e| CacheCorruption::InvalidMetadata {
            fingerprint: fingerprint.to_hex(),
            message: e.to_string(),
        })?;
        fs::write(&meta_path, encoded)
            .await
            .map_err(|e| self.unreadable(fingerprint, e))?;
        Ok(())
    }

    async fn evict(&self, fingerprint: Fingerprint) {
        let _ = fs::remove_file(self.meta_path(fingerprint)).await;
        let _ = fs::remove_file(self.out_path(fingerprint)).await;
    }

    fn unreadable(&self, fingerprint: Fingerprint, err: std::io::Error) -> CacheCorruption {
        CacheCorruption::UnreadableEntry {
            fingerprint: fingerprint.to_hex(),
            message: err.to_string(),
        }
    }

    /// Registers this fingerprint as in-flight, returning `true` if this
    /// call is the producer (the caller should compute and then call
    /// [`CacheStore::finish_single_flight`]) or `false` if another in-flight
    /// computation exists (the caller should await the returned `Notify`
    /// then re-`lookup`).
    pub async fn begin_single_flight(&self, fingerprint: Fingerprint) -> SingleFlightToken {
        let mut guard = self.in_flight.lock().await;
        if let Some(notify) = guard.get(&fingerprint) {
            SingleFlightToken::Follower(notify.clone())
        } else {
            let notify = Arc::new(Notify::new());
            guard.insert(fingerprint, notify);
            SingleFlightToken::Producer(fingerprint)
        }
    }

    pub async fn finish_single_flight(&self, fingerprint: Fingerprint) {
        let mut guard = self.in_flight.lock().await;
        if let Some(notify) = guard.remove(&fingerprint) {
            notify.notify_waiters();
        }
    }
}

pub enum SingleFlightToken {
    Producer(Fingerprint),
    Follower(Arc<Notify>),
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Directory layout helper for the cache's persisted state root.
pub fn default_cache_root(user_data_root: &Path) -> PathBuf {
    user_data_root.join("cache")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fp(n: u128) -> Fingerprint {
        Fingerprint(n)
    }

    #[tokio::test]
    async fn lookup_on_empty_store_is_a_miss() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        assert!(store.lookup(fp(1)).await.is_none());
    }

    #[tokio::test]
    async fn round_trip_insert_then_lookup_returns_same_output() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store.insert(fp(42), 0, b"hi\n").await.unwrap();
        let entry = store.lookup(fp(42)).await.unwrap();
        assert_eq!(entry.exit_code, 0);
        let captured = fs::read(&entry.captured_output_path).await.unwrap();
        assert_eq!(captured, b"hi\n");
    }

    #[tokio::test]
    async fn second_insert_on_same_key_is_a_no_op() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store.insert(fp(7), 0, b"first").await.unwrap();
        store.insert(fp(7), 0, b"second").await.unwrap();
        let entry = store.lookup(fp(7)).await.unwrap();
        let captured = fs::read(&entry.captured_output_path).await.unwrap();
        assert_eq!(captured, b"first");
    }

    #[tokio::test]
    async fn corrupt_metadata_is_treated_as_a_miss_and_removed() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let shard_dir = store.shard_dir(fp(9));
        fs::create_dir_all(&shard_dir).await.unwrap();
        fs::write(store.meta_path(fp(9)), b"not json").await.unwrap();
        assert!(store.lookup(fp(9)).await.is_none());
        assert!(fs::metadata(store.meta_path(fp(9))).await.is_err());
    }

    #[tokio::test]
    async fn single_flight_first_caller_is_producer_second_is_follower() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let first = store.begin_single_flight(fp(3)).await;
        assert!(matches!(first, SingleFlightToken::Producer(_)));
        let second = store.begin_single_flight(fp(3)).await;
        assert!(matches!(second, SingleFlightToken::Follower(_)));
        store.finish_single_flight(fp(3)).await;
    }
}
