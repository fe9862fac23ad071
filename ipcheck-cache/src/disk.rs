//! Persistent disk tier.
//!
//! One blob file per entry plus an index file that is the single source of
//! truth for liveness. The index is rewritten atomically after every
//! mutation, so a crash loses at most the write in flight; a row whose blob
//! has gone missing is detected on read and dropped.
//!
//! # Blob Format
//!
//! ```text
//! magic (4 bytes): "IPCB"
//! version (1 byte): 1
//! length (8 bytes, LE): payload length
//! payload (variable): JSON { key, value, created_at, expires_at }
//! ```
//!
//! # Index Format
//!
//! `index.json`: `{ "version": 1, "entries": { key: { file, created_at,
//! expires_at, size_bytes, last_access, hits } } }`
//!
//! Reads only update `last_access` and `hits` in memory. They reach the
//! index with the next mutation or [`DiskTier::flush`], which the tiered
//! cache's maintenance task calls every interval.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use ipcheck_core::clock::{add_duration, SharedClock};
use ipcheck_core::config::DiskConfig;
use ipcheck_core::constants::{DISK_HIGH_WATERMARK, DISK_LOW_WATERMARK};
use ipcheck_core::error::{IpCheckError, Result};
use ipcheck_core::types::CacheEntry;

/// Blob magic bytes
const BLOB_MAGIC: &[u8; 4] = b"IPCB";
/// Current blob format version
const BLOB_VERSION: u8 = 1;
/// magic + version + length
const BLOB_HEADER_LEN: usize = 13;
/// Index file name inside the cache directory
const INDEX_FILE: &str = "index.json";
/// Current index format version
const INDEX_VERSION: u8 = 1;
/// Blob file extension
const BLOB_EXTENSION: &str = "blob";

/// Disk tier statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DiskStats {
    /// Indexed entries (including expired rows not yet touched)
    pub entries: usize,
    /// Sum of indexed blob sizes
    pub total_bytes: u64,
    /// Byte budget
    pub max_bytes: u64,
    /// Reads served
    pub hits: u64,
    /// Reads that found nothing usable
    pub misses: u64,
    /// Entries dropped to stay within budget
    pub evictions: u64,
    /// Failed blob or index writes
    pub write_errors: u64,
}

/// Outcome of [`DiskTier::reconcile`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Index rows dropped because their blob was gone
    pub missing_blobs: usize,
    /// Index rows whose recorded size was corrected
    pub resized: usize,
    /// Unreferenced files deleted from the directory
    pub orphans_removed: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct IndexRow {
    file: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    size_bytes: u64,
    last_access: u64,
    #[serde(default)]
    hits: u64,
}

impl IndexRow {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.created_at <= now && now < self.expires_at
    }
}

#[derive(Serialize)]
struct IndexOut<'a> {
    version: u8,
    entries: &'a HashMap<String, IndexRow>,
}

#[derive(Deserialize)]
struct IndexIn {
    version: u8,
    entries: HashMap<String, IndexRow>,
}

#[derive(Serialize, Deserialize)]
struct BlobRecord<V> {
    key: String,
    value: V,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct DiskIndex {
    entries: HashMap<String, IndexRow>,
    total_bytes: u64,
    /// Logical access clock; orders eviction independently of wall time.
    next_access: u64,
    /// Reads have changed rows since the index was last saved.
    access_dirty: bool,
}

impl DiskIndex {
    fn from_rows(entries: HashMap<String, IndexRow>) -> Self {
        let total_bytes = entries.values().map(|r| r.size_bytes).sum();
        let next_access = entries.values().map(|r| r.last_access + 1).max().unwrap_or(0);
        Self {
            entries,
            total_bytes,
            next_access,
            access_dirty: false,
        }
    }

    fn tick(&mut self) -> u64 {
        let t = self.next_access;
        self.next_access += 1;
        t
    }

    fn insert(&mut self, key: String, row: IndexRow) {
        self.total_bytes += row.size_bytes;
        if let Some(old) = self.entries.insert(key, row) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
        }
    }

    fn remove(&mut self, key: &str) -> Option<IndexRow> {
        let row = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(row.size_bytes);
        Some(row)
    }

    /// Keys ordered from least to most recently accessed.
    fn oldest_first(&self, except: &str) -> Vec<String> {
        let mut rows: Vec<(&String, u64)> = self
            .entries
            .iter()
            .filter(|(k, _)| k.as_str() != except)
            .map(|(k, r)| (k, r.last_access))
            .collect();
        rows.sort_by_key(|(_, access)| *access);
        rows.into_iter().map(|(k, _)| k.clone()).collect()
    }
}

/// Size-bounded persistent cache tier.
///
/// Values are stored as JSON inside versioned blobs. Reads and writes take a
/// single async lock over the index, so operations on one key are
/// linearizable. I/O failures never surface: they are logged and turn into
/// misses or dropped writes.
pub struct DiskTier<V> {
    dir: PathBuf,
    max_bytes: u64,
    index: Mutex<DiskIndex>,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    write_errors: AtomicU64,
    _value: PhantomData<fn() -> V>,
}

impl<V> DiskTier<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Opens (creating if needed) a disk tier in `config.dir`.
    ///
    /// Only the index is read; blobs and expiry are checked lazily. An
    /// unreadable index is discarded with a warning. Fails only if the
    /// directory cannot be created.
    #[instrument(skip(config, clock), fields(dir = ?config.dir))]
    pub async fn open(config: &DiskConfig, clock: SharedClock) -> Result<Self> {
        fs::create_dir_all(&config.dir).await.map_err(|e| {
            IpCheckError::Persistence(format!("Failed to create cache dir {:?}: {}", config.dir, e))
        })?;

        let index = match load_index(&config.dir.join(INDEX_FILE)).await {
            Ok(Some(rows)) => {
                info!(entries = rows.len(), "Loaded disk cache index");
                DiskIndex::from_rows(rows)
            }
            Ok(None) => DiskIndex::default(),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable disk cache index");
                DiskIndex::default()
            }
        };

        Ok(Self {
            dir: config.dir.clone(),
            max_bytes: config.max_bytes,
            index: Mutex::new(index),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            _value: PhantomData,
        })
    }

    /// Returns the live entry for `key`.
    ///
    /// Expired rows, missing blobs and corrupt blobs are removed and
    /// reported as a miss.
    pub async fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = self.clock.now();
        let mut index = self.index.lock().await;

        let Some(row) = index.entries.get(key).cloned() else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if !row.is_live(now) {
            debug!(key, "disk entry expired");
            self.drop_row(&mut index, key).await;
            self.persist(&mut index).await;
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match self.read_blob(&row, key).await {
            Ok(record) => {
                let access = index.tick();
                index.access_dirty = true;
                let hits = match index.entries.get_mut(key) {
                    Some(r) => {
                        r.last_access = access;
                        r.hits += 1;
                        r.hits
                    }
                    None => 0,
                };
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(CacheEntry {
                    value: record.value,
                    created_at: record.created_at,
                    expires_at: record.expires_at,
                    hits,
                })
            }
            Err(e) => {
                warn!(key, error = %e, "Dropping unreadable disk cache entry");
                self.drop_row(&mut index, key).await;
                self.persist(&mut index).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `value` under `key` for `ttl`.
    ///
    /// If the indexed total is above 80% of the budget, least recently
    /// accessed entries are evicted down to 60% before the write. The total
    /// never stays above the budget: after the write, older entries go until
    /// it fits. A value that alone exceeds the budget is not stored. A zero
    /// TTL removes the key.
    pub async fn set(&self, key: &str, value: &V, ttl: Duration) {
        let now = self.clock.now();
        let expires_at = add_duration(now, ttl);
        if expires_at <= now {
            self.delete(key).await;
            return;
        }

        let bytes = match encode_blob(key, value, now, expires_at) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode disk cache entry");
                self.write_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let size = bytes.len() as u64;

        let mut index = self.index.lock().await;

        if size > self.max_bytes {
            warn!(key, size, max_bytes = self.max_bytes, "Value exceeds disk cache budget");
            if index.entries.contains_key(key) {
                self.drop_row(&mut index, key).await;
                self.persist(&mut index).await;
            }
            return;
        }

        let high = (self.max_bytes as f64 * DISK_HIGH_WATERMARK) as u64;
        let low = (self.max_bytes as f64 * DISK_LOW_WATERMARK) as u64;
        if index.total_bytes > high {
            self.evict_until(&mut index, key, low).await;
        }

        let file = blob_file_name(key);
        if let Err(e) = write_atomic(&self.dir.join(&file), &bytes).await {
            warn!(key, error = %e, "Failed to write disk cache blob");
            self.write_errors.fetch_add(1, Ordering::Relaxed);
            // The old blob may be half replaced; forget the row.
            if index.entries.contains_key(key) {
                self.drop_row(&mut index, key).await;
                self.persist(&mut index).await;
            }
            return;
        }

        let access = index.tick();
        index.insert(
            key.to_string(),
            IndexRow {
                file,
                created_at: now,
                expires_at,
                size_bytes: size,
                last_access: access,
                hits: 0,
            },
        );

        if index.total_bytes > self.max_bytes {
            self.evict_until(&mut index, key, self.max_bytes).await;
        }

        self.persist(&mut index).await;
    }

    /// Removes `key`. Returns true if it was indexed.
    pub async fn delete(&self, key: &str) -> bool {
        let mut index = self.index.lock().await;
        if !index.entries.contains_key(key) {
            return false;
        }
        self.drop_row(&mut index, key).await;
        self.persist(&mut index).await;
        true
    }

    /// Removes every entry and blob.
    pub async fn clear(&self) {
        let mut index = self.index.lock().await;
        let keys: Vec<String> = index.entries.keys().cloned().collect();
        for key in keys {
            self.drop_row(&mut index, &key).await;
        }
        self.persist(&mut index).await;
        info!(dir = ?self.dir, "Disk cache cleared");
    }

    /// Brings the index back in line with the directory contents.
    ///
    /// Drops rows whose blob is missing, corrects recorded sizes, and deletes
    /// files nothing refers to (including stray temp files).
    #[instrument(skip(self), fields(dir = ?self.dir))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut index = self.index.lock().await;
        let mut report = ReconcileReport::default();

        let rows: Vec<(String, String, u64)> = index
            .entries
            .iter()
            .map(|(k, r)| (k.clone(), r.file.clone(), r.size_bytes))
            .collect();

        for (key, file, recorded) in rows {
            match fs::metadata(self.dir.join(&file)).await {
                Ok(meta) if meta.len() != recorded => {
                    if let Some(mut row) = index.remove(&key) {
                        row.size_bytes = meta.len();
                        index.insert(key, row);
                    }
                    report.resized += 1;
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    index.remove(&key);
                    report.missing_blobs += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let referenced: HashSet<&str> = index.entries.values().map(|r| r.file.as_str()).collect();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name();
            let Some(name) = name.to_str() else { continue };
            let is_blob = name.ends_with(&format!(".{}", BLOB_EXTENSION));
            let is_temp = name.ends_with(".tmp");
            if (is_blob && !referenced.contains(name)) || is_temp {
                match fs::remove_file(item.path()).await {
                    Ok(()) => report.orphans_removed += 1,
                    Err(e) => warn!(file = name, error = %e, "Failed to remove orphan cache file"),
                }
            }
        }

        save_index(&self.dir.join(INDEX_FILE), &index.entries).await?;
        index.access_dirty = false;
        info!(?report, "Disk cache reconciled");
        Ok(report)
    }

    /// Saves access order recorded by reads since the last index write.
    pub async fn flush(&self) {
        let mut index = self.index.lock().await;
        if index.access_dirty {
            self.persist(&mut index).await;
        }
    }

    /// Returns the number of indexed entries.
    pub async fn len(&self) -> usize {
        self.index.lock().await.entries.len()
    }

    /// Returns true if nothing is indexed.
    pub async fn is_empty(&self) -> bool {
        self.index.lock().await.entries.is_empty()
    }

    /// Returns the cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns tier statistics.
    pub async fn stats(&self) -> DiskStats {
        let index = self.index.lock().await;
        DiskStats {
            entries: index.entries.len(),
            total_bytes: index.total_bytes,
            max_bytes: self.max_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }

    async fn evict_until(&self, index: &mut DiskIndex, keep: &str, target: u64) {
        for key in index.oldest_first(keep) {
            if index.total_bytes <= target {
                break;
            }
            self.drop_row(index, &key).await;
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "disk entry evicted");
        }
    }

    async fn drop_row(&self, index: &mut DiskIndex, key: &str) {
        if let Some(row) = index.remove(key) {
            match fs::remove_file(self.dir.join(&row.file)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(key, error = %e, "Failed to remove disk cache blob"),
            }
        }
    }

    async fn read_blob(&self, row: &IndexRow, key: &str) -> Result<BlobRecord<V>> {
        let bytes = fs::read(self.dir.join(&row.file)).await?;
        let record: BlobRecord<V> = decode_blob(&bytes)?;
        if record.key != key {
            return Err(IpCheckError::Persistence(format!(
                "Blob {} holds key '{}'",
                row.file, record.key
            )));
        }
        Ok(record)
    }

    async fn persist(&self, index: &mut DiskIndex) {
        match save_index(&self.dir.join(INDEX_FILE), &index.entries).await {
            Ok(()) => index.access_dirty = false,
            Err(e) => {
                warn!(error = %e, "Failed to save disk cache index");
                self.write_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Blob file name for `key`: first 16 bytes of SHA3-256, hex encoded.
fn blob_file_name(key: &str) -> String {
    let digest = Sha3_256::digest(key.as_bytes());
    format!("{}.{}", hex::encode(&digest[..16]), BLOB_EXTENSION)
}

fn encode_blob<V: Serialize>(
    key: &str,
    value: &V,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(&BlobRecord {
        key: key.to_string(),
        value,
        created_at,
        expires_at,
    })?;

    let mut contents = Vec::with_capacity(BLOB_HEADER_LEN + payload.len());
    contents.extend_from_slice(BLOB_MAGIC);
    contents.push(BLOB_VERSION);
    contents.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    contents.extend_from_slice(&payload);
    Ok(contents)
}

fn decode_blob<V: DeserializeOwned>(contents: &[u8]) -> Result<BlobRecord<V>> {
    if contents.len() < BLOB_HEADER_LEN {
        return Err(IpCheckError::Persistence("Blob too short".into()));
    }
    if &contents[0..4] != BLOB_MAGIC {
        return Err(IpCheckError::Persistence("Invalid blob magic".into()));
    }
    let version = contents[4];
    if version != BLOB_VERSION {
        return Err(IpCheckError::VersionMismatch {
            expected: BLOB_VERSION,
            actual: version,
        });
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&contents[5..BLOB_HEADER_LEN]);
    let len = u64::from_le_bytes(len_bytes);
    let payload = &contents[BLOB_HEADER_LEN..];
    if payload.len() as u64 != len {
        return Err(IpCheckError::Persistence(format!(
            "Blob length mismatch: header says {}, found {}",
            len,
            payload.len()
        )));
    }

    Ok(serde_json::from_slice(payload)?)
}

async fn load_index(path: &Path) -> Result<Option<HashMap<String, IndexRow>>> {
    let contents = match fs::read(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let index: IndexIn = serde_json::from_slice(&contents)?;
    if index.version != INDEX_VERSION {
        return Err(IpCheckError::VersionMismatch {
            expected: INDEX_VERSION,
            actual: index.version,
        });
    }
    Ok(Some(index.entries))
}

async fn save_index(path: &Path, entries: &HashMap<String, IndexRow>) -> Result<()> {
    let contents = serde_json::to_vec(&IndexOut {
        version: INDEX_VERSION,
        entries,
    })?;
    write_atomic(path, &contents).await
}

/// Write to a temp file, sync, then rename over `path`.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ipcheck_core::clock::{Clock, ManualClock};
    use std::sync::Arc;
    use tempfile::tempdir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn fixed_clock() -> Arc<ManualClock> {
        ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
    }

    async fn open(dir: &Path, max_bytes: u64, clock: &Arc<ManualClock>) -> DiskTier<String> {
        DiskTier::open(&DiskConfig::new(dir, max_bytes), clock.clone()).await.unwrap()
    }

    /// A value whose blob for `key` is exactly `size` bytes at the clock's time.
    fn value_of_size(key: &str, size: usize, clock: &ManualClock) -> String {
        let now = clock.now();
        let base = encode_blob(key, &String::new(), now, add_duration(now, HOUR)).unwrap().len();
        assert!(size >= base, "blob of {} bytes is below the {} byte overhead", size, base);
        "x".repeat(size - base)
    }

    #[tokio::test]
    async fn test_set_get() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();
        let disk = open(dir.path(), 1 << 20, &clock).await;

        disk.set("lookup:geo:8.8.8.8", &"US".to_string(), HOUR).await;
        let entry = disk.get("lookup:geo:8.8.8.8").await.unwrap();

        assert_eq!(entry.value, "US");
        assert_eq!(entry.expires_at - entry.created_at, chrono::Duration::seconds(3600));
        assert!(disk.get("lookup:geo:1.1.1.1").await.is_none());

        let stats = disk.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();

        {
            let disk = open(dir.path(), 1 << 20, &clock).await;
            disk.set("a", &"1".to_string(), HOUR).await;
            disk.set("b", &"2".to_string(), HOUR).await;
        }

        let disk = open(dir.path(), 1 << 20, &clock).await;
        assert_eq!(disk.len().await, 2);
        assert_eq!(disk.get("a").await.unwrap().value, "1");
        assert_eq!(disk.get("b").await.unwrap().value, "2");
        assert!(!dir.path().join("index.tmp").exists());
    }

    #[tokio::test]
    async fn test_expired_rows_dropped_lazily() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();

        {
            let disk = open(dir.path(), 1 << 20, &clock).await;
            disk.set("short", &"1".to_string(), Duration::from_secs(10)).await;
            disk.set("long", &"2".to_string(), HOUR).await;
        }

        clock.advance(Duration::from_secs(60));
        let disk = open(dir.path(), 1 << 20, &clock).await;
        // Nothing is scanned at startup.
        assert_eq!(disk.len().await, 2);

        assert!(disk.get("short").await.is_none());
        assert_eq!(disk.len().await, 1);
        assert!(!dir.path().join(blob_file_name("short")).exists());
        assert!(disk.get("long").await.is_some());
    }

    #[tokio::test]
    async fn test_missing_blob_is_a_miss() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();
        let disk = open(dir.path(), 1 << 20, &clock).await;

        disk.set("k", &"v".to_string(), HOUR).await;
        std::fs::remove_file(dir.path().join(blob_file_name("k"))).unwrap();

        assert!(disk.get("k").await.is_none());
        assert_eq!(disk.len().await, 0);
        assert_eq!(disk.stats().await.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_a_miss() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();
        let disk = open(dir.path(), 1 << 20, &clock).await;

        disk.set("k", &"v".to_string(), HOUR).await;
        std::fs::write(dir.path().join(blob_file_name("k")), b"garbage").unwrap();

        assert!(disk.get("k").await.is_none());
        assert_eq!(disk.len().await, 0);
    }

    #[test]
    fn test_blob_version_checked() {
        let now = Utc::now();
        let mut bytes = encode_blob("k", &1u32, now, add_duration(now, HOUR)).unwrap();
        bytes[4] = 9;
        let result: Result<BlobRecord<u32>> = decode_blob(&bytes);
        assert!(matches!(
            result,
            Err(IpCheckError::VersionMismatch { expected: 1, actual: 9 })
        ));
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let now = Utc::now();
        let bytes = encode_blob("k", &"value".to_string(), now, add_duration(now, HOUR)).unwrap();
        let result: Result<BlobRecord<String>> = decode_blob(&bytes[..bytes.len() - 2]);
        assert!(matches!(result, Err(IpCheckError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_corrupt_index_starts_empty() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();
        std::fs::write(dir.path().join(INDEX_FILE), b"{ not json").unwrap();

        let disk = open(dir.path(), 1 << 20, &clock).await;
        assert!(disk.is_empty().await);

        disk.set("k", &"v".to_string(), HOUR).await;
        assert!(disk.get("k").await.is_some());
    }

    #[tokio::test]
    async fn test_hysteresis_eviction() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();
        let disk = open(dir.path(), 1000, &clock).await;

        // 850 bytes in four entries; the total never crosses 800 before a write.
        for (key, size) in [("a", 200), ("b", 200), ("c", 200), ("d", 250)] {
            disk.set(key, &value_of_size(key, size, &clock), HOUR).await;
        }
        let stats = disk.stats().await;
        assert_eq!(stats.total_bytes, 850);
        assert_eq!(stats.evictions, 0);

        // Above 80%: evict oldest down to 60% (a, b), then write e.
        disk.set("e", &value_of_size("e", 300, &clock), HOUR).await;

        let stats = disk.stats().await;
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.total_bytes, 450 + 300);
        assert!(disk.get("a").await.is_none());
        assert!(disk.get("b").await.is_none());
        assert!(disk.get("c").await.is_some());
        assert!(disk.get("d").await.is_some());
        assert!(disk.get("e").await.is_some());
    }

    #[tokio::test]
    async fn test_eviction_follows_access_order() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();
        let disk = open(dir.path(), 1000, &clock).await;

        for key in ["a", "b", "c", "d"] {
            disk.set(key, &value_of_size(key, 210, &clock), HOUR).await;
        }
        // Reading "a" makes "b" the least recently accessed.
        assert!(disk.get("a").await.is_some());

        // 840 bytes: evict b then c to get under 600, then write e.
        disk.set("e", &value_of_size("e", 250, &clock), HOUR).await;

        assert_eq!(disk.stats().await.total_bytes, 210 + 210 + 250);
        assert!(disk.get("b").await.is_none());
        assert!(disk.get("c").await.is_none());
        assert!(disk.get("a").await.is_some());
        assert!(disk.get("d").await.is_some());
    }

    #[tokio::test]
    async fn test_flushed_access_order_survives_reopen() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();

        {
            let disk = open(dir.path(), 1000, &clock).await;
            for key in ["a", "b", "c", "d"] {
                disk.set(key, &value_of_size(key, 210, &clock), HOUR).await;
            }
            assert!(disk.get("a").await.is_some());
            disk.flush().await;
        }

        let disk = open(dir.path(), 1000, &clock).await;
        disk.set("e", &value_of_size("e", 250, &clock), HOUR).await;

        assert!(disk.get("a").await.is_some());
        assert!(disk.get("b").await.is_none());
        assert!(disk.get("c").await.is_none());
    }

    #[tokio::test]
    async fn test_budget_is_a_hard_cap() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();
        let disk = open(dir.path(), 1000, &clock).await;

        disk.set("a", &value_of_size("a", 700, &clock), HOUR).await;
        disk.set("b", &value_of_size("b", 700, &clock), HOUR).await;

        let stats = disk.stats().await;
        assert!(stats.total_bytes <= 1000);
        assert!(disk.get("a").await.is_none());
        assert!(disk.get("b").await.is_some());
    }

    #[tokio::test]
    async fn test_oversized_value_not_stored() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();
        let disk = open(dir.path(), 100, &clock).await;

        disk.set("big", &"x".repeat(500), HOUR).await;
        assert!(disk.get("big").await.is_none());
        assert_eq!(disk.stats().await.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();
        let disk = open(dir.path(), 1 << 20, &clock).await;

        disk.set("a", &"1".to_string(), HOUR).await;
        disk.set("b", &"2".to_string(), HOUR).await;

        assert!(disk.delete("a").await);
        assert!(!disk.delete("a").await);
        assert!(!dir.path().join(blob_file_name("a")).exists());

        disk.clear().await;
        assert!(disk.is_empty().await);
        assert_eq!(disk.stats().await.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_zero_ttl_removes() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();
        let disk = open(dir.path(), 1 << 20, &clock).await;

        disk.set("k", &"v".to_string(), HOUR).await;
        disk.set("k", &"v".to_string(), Duration::ZERO).await;
        assert!(disk.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_set_twice_same_state() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();
        let disk = open(dir.path(), 1 << 20, &clock).await;

        disk.set("k", &"v".to_string(), HOUR).await;
        let first = disk.stats().await.total_bytes;
        disk.set("k", &"v".to_string(), HOUR).await;

        assert_eq!(disk.get("k").await.unwrap().value, "v");
        assert_eq!(disk.len().await, 1);
        assert_eq!(disk.stats().await.total_bytes, first);
    }

    #[tokio::test]
    async fn test_reconcile() {
        let dir = tempdir().unwrap();
        let clock = fixed_clock();
        let disk = open(dir.path(), 1 << 20, &clock).await;

        disk.set("a", &"1".to_string(), HOUR).await;
        disk.set("b", &"2".to_string(), HOUR).await;
        disk.set("c", &"3".to_string(), HOUR).await;

        std::fs::remove_file(dir.path().join(blob_file_name("a"))).unwrap();
        std::fs::write(dir.path().join(blob_file_name("b")), b"resized").unwrap();
        std::fs::write(dir.path().join("deadbeef.blob"), b"orphan").unwrap();

        let report = disk.reconcile().await.unwrap();
        assert_eq!(report.missing_blobs, 1);
        assert_eq!(report.resized, 1);
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(disk.len().await, 2);
        assert!(!dir.path().join("deadbeef.blob").exists());
    }

    #[test]
    fn test_blob_names_are_stable() {
        assert_eq!(blob_file_name("k"), blob_file_name("k"));
        assert_ne!(blob_file_name("k1"), blob_file_name("k2"));
        assert_eq!(blob_file_name("k").len(), 32 + 5);
    }
}
