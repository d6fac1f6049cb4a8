//! Verified archival of closed periods to cold storage.
//!
//! ```text
//! closed? → snapshot (JSON) → sha256 → upload (retry) → stat + compare
//!        → record manifest + marker → purge rows older than hot retention
//! ```
//!
//! Nothing is deleted from hot storage until the remote object's size and
//! digest match the local snapshot. A period that already has a manifest is
//! never snapshotted again: its remote object is checked against the
//! recorded digest, and only the purge step runs.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stakeflow_ledger::{ArchiveManifest, PurgeReport, RetryPolicy, StoreReader, WriterHandle};
use stakeflow_types::{ArchiveConfig, Clock, LedgerEntry, Result, Stake, StakeflowError, constants};
use tracing::{debug, error, info, warn};

/// A closed time partition `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ArchivePeriod {
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Cold-storage key for this period.
    #[must_use]
    pub fn object_key(&self) -> String {
        format!(
            "stakeflow/{}/{}-{}.json",
            self.start.format("%Y/%m/%d"),
            self.start.timestamp_millis(),
            self.end.timestamp_millis()
        )
    }
}

impl fmt::Display for ArchivePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Portable snapshot of one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSnapshot {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub stakes: Vec<Stake>,
    pub ledger_entries: Vec<LedgerEntry>,
}

/// What the cold store reports about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the stored bytes.
    pub sha256: String,
}

/// Durable object storage.
pub trait ColdStore: Send + Sync + fmt::Debug {
    /// Store `bytes` under `key`. Storing identical bytes again succeeds
    /// without a write.
    ///
    /// # Errors
    /// - [`StakeflowError::ArchiveConflict`] if a different object already
    ///   exists under `key`; it is left in place
    /// - [`StakeflowError::Io`] on write failure; the caller may retry
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Size and digest of the object as stored.
    ///
    /// # Errors
    /// [`StakeflowError::Io`] if the object cannot be read.
    fn stat(&self, key: &str) -> Result<ObjectStat>;
}

/// Filesystem-backed cold store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsColdStore {
    root: PathBuf,
}

impl FsColdStore {
    /// # Errors
    /// [`StakeflowError::Io`] if the root cannot be created.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(io_err)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ColdStore for FsColdStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(existing) => {
                let existing = sha256_hex(&existing);
                if existing == sha256_hex(bytes) {
                    return Ok(());
                }
                return Err(StakeflowError::ArchiveConflict {
                    key: key.to_string(),
                    existing,
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(e)),
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        // Write then rename so a reader never sees a partial object.
        let tmp = path.with_extension("part");
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)?;
        Ok(())
    }

    fn stat(&self, key: &str) -> Result<ObjectStat> {
        let bytes = fs::read(self.path_for(key)).map_err(io_err)?;
        Ok(ObjectStat {
            size_bytes: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            sha256: sha256_hex(&bytes),
        })
    }
}

fn io_err(e: std::io::Error) -> StakeflowError {
    StakeflowError::Io(e.to_string())
}

/// Hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A completed, verified archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub manifest: ArchiveManifest,
    /// "Last successful archive" marker after this run.
    pub marker: DateTime<Utc>,
    pub purged: PurgeReport,
}

/// Drives one period through snapshot, upload, verify, record and purge.
#[derive(Debug, Clone)]
pub struct Archiver {
    reader: StoreReader,
    writer: WriterHandle,
    cold: Arc<dyn ColdStore>,
    clock: Arc<dyn Clock>,
    cfg: ArchiveConfig,
    upload_retry: RetryPolicy,
}

impl Archiver {
    #[must_use]
    pub fn new(
        reader: StoreReader,
        writer: WriterHandle,
        cold: Arc<dyn ColdStore>,
        clock: Arc<dyn Clock>,
        cfg: ArchiveConfig,
    ) -> Self {
        let upload_retry = RetryPolicy::new(
            cfg.upload_max_attempts,
            cfg.upload_retry_base,
            cfg.upload_retry_max,
            constants::DEFAULT_RETRY_JITTER_PCT,
        );
        Self {
            reader,
            writer,
            cold,
            clock,
            cfg,
            upload_retry,
        }
    }

    /// Archive `period`.
    ///
    /// # Errors
    /// - [`StakeflowError::ArchivePeriodOpen`] if the period has not ended or
    ///   still holds pending/confirmed stakes
    /// - [`StakeflowError::UploadFailed`] after the retry budget is spent
    /// - [`StakeflowError::ArchiveVerificationFailed`] if the remote copy does
    ///   not match; hot rows and the marker are left untouched
    /// - [`StakeflowError::ArchiveConflict`] if the cold store already holds a
    ///   different object under the period's key
    pub async fn archive(&self, period: ArchivePeriod) -> Result<ArchiveOutcome> {
        let now = self.clock.now();
        if period.start >= period.end {
            return Err(StakeflowError::ArchivePeriodOpen {
                reason: format!("empty period {period}"),
            });
        }
        if period.end > now {
            return Err(StakeflowError::ArchivePeriodOpen {
                reason: format!("period {period} ends in the future"),
            });
        }

        let key = period.object_key();
        let reader = self.reader.clone();
        let lookup = key.clone();
        let recorded = tokio::task::spawn_blocking(move || reader.archive_manifest(&lookup))
            .await
            .map_err(|e| StakeflowError::Internal(format!("manifest lookup failed: {e}")))??;
        let (manifest, marker) = match recorded {
            Some(manifest) => self.reverify(manifest).await?,
            None => self.snapshot_and_upload(period, key, now).await?,
        };

        let retention = chrono::Duration::from_std(self.cfg.hot_retention)
            .map_err(|e| StakeflowError::Configuration(format!("hot_retention: {e}")))?;
        let purged = self
            .writer
            .purge_archived(manifest.object_key.clone(), now - retention)
            .await?;
        Ok(ArchiveOutcome {
            manifest,
            marker,
            purged,
        })
    }

    /// Time of the last verified archive, for external alerting.
    pub fn marker(&self) -> Result<Option<DateTime<Utc>>> {
        self.reader.last_archive_marker()
    }

    /// First archive of a period: snapshot, upload, verify, record.
    async fn snapshot_and_upload(
        &self,
        period: ArchivePeriod,
        key: String,
        now: DateTime<Utc>,
    ) -> Result<(ArchiveManifest, DateTime<Utc>)> {
        let reader = self.reader.clone();
        let (unresolved, stakes, ledger_entries) = tokio::task::spawn_blocking(move || load_period(&reader, period))
            .await
            .map_err(|e| StakeflowError::Internal(format!("snapshot task failed: {e}")))??;
        if unresolved > 0 {
            return Err(StakeflowError::ArchivePeriodOpen {
                reason: format!("{unresolved} unresolved stakes in {period}"),
            });
        }

        let snapshot = ArchiveSnapshot {
            period_start: period.start,
            period_end: period.end,
            created_at: now,
            stakes,
            ledger_entries,
        };
        let bytes = serde_json::to_vec(&snapshot).map_err(|e| StakeflowError::Serialization(e.to_string()))?;
        let expected = ObjectStat {
            size_bytes: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            sha256: sha256_hex(&bytes),
        };
        debug!(
            key = %key,
            stakes = snapshot.stakes.len(),
            entries = snapshot.ledger_entries.len(),
            size = expected.size_bytes,
            "archive snapshot built"
        );

        self.upload(&key, Arc::new(bytes)).await?;
        let remote = self.stat(&key).await?;
        if remote != expected {
            error!(
                key = %key,
                expected_sha256 = %expected.sha256,
                actual_sha256 = %remote.sha256,
                expected_size = expected.size_bytes,
                actual_size = remote.size_bytes,
                "archive verification failed, hot rows kept"
            );
            return Err(StakeflowError::ArchiveVerificationFailed {
                key,
                expected: format!("{}:{}", expected.size_bytes, expected.sha256),
                actual: format!("{}:{}", remote.size_bytes, remote.sha256),
            });
        }

        let manifest = ArchiveManifest {
            object_key: key.clone(),
            period_start: period.start,
            period_end: period.end,
            sha256: expected.sha256,
            size_bytes: expected.size_bytes,
            stake_count: snapshot.stakes.len(),
            entry_count: snapshot.ledger_entries.len(),
            archived_at: self.clock.now(),
        };
        let marker = self.writer.record_archive(manifest.clone()).await?;
        info!(key = %key, marker = %marker, "archive verified and recorded");
        Ok((manifest, marker))
    }

    /// Repeat run on a recorded period: check the remote object against the
    /// recorded digest. Nothing is uploaded and the manifest is unchanged.
    async fn reverify(&self, manifest: ArchiveManifest) -> Result<(ArchiveManifest, DateTime<Utc>)> {
        let expected = ObjectStat {
            size_bytes: manifest.size_bytes,
            sha256: manifest.sha256.clone(),
        };
        let remote = self.stat(&manifest.object_key).await?;
        if remote != expected {
            error!(
                key = %manifest.object_key,
                expected_sha256 = %expected.sha256,
                actual_sha256 = %remote.sha256,
                "archived object no longer matches its manifest, hot rows kept"
            );
            return Err(StakeflowError::ArchiveVerificationFailed {
                key: manifest.object_key,
                expected: format!("{}:{}", expected.size_bytes, expected.sha256),
                actual: format!("{}:{}", remote.size_bytes, remote.sha256),
            });
        }
        let reader = self.reader.clone();
        let marker = tokio::task::spawn_blocking(move || reader.last_archive_marker())
            .await
            .map_err(|e| StakeflowError::Internal(format!("marker lookup failed: {e}")))??
            .unwrap_or(manifest.archived_at);
        debug!(key = %manifest.object_key, "period already archived, remote copy verified");
        Ok((manifest, marker))
    }

    async fn upload(&self, key: &str, bytes: Arc<Vec<u8>>) -> Result<()> {
        let result = self
            .upload_retry
            .retry_async(
                |attempt| {
                    let cold = Arc::clone(&self.cold);
                    let key = key.to_string();
                    let bytes = Arc::clone(&bytes);
                    async move {
                        if attempt > 0 {
                            warn!(key = %key, attempt, "retrying archive upload");
                        }
                        match tokio::task::spawn_blocking(move || cold.put(&key, &bytes)).await {
                            Ok(result) => result,
                            Err(e) => Err(StakeflowError::Io(format!("upload task failed: {e}"))),
                        }
                    }
                },
                StakeflowError::is_retryable,
            )
            .await;
        result.map_err(|e| {
            error!(key = %key, error = %e, "archive upload failed");
            match e {
                conflict @ StakeflowError::ArchiveConflict { .. } => conflict,
                other => StakeflowError::UploadFailed {
                    reason: other.to_string(),
                },
            }
        })
    }

    async fn stat(&self, key: &str) -> Result<ObjectStat> {
        let cold = Arc::clone(&self.cold);
        let owned = key.to_string();
        tokio::task::spawn_blocking(move || cold.stat(&owned))
            .await
            .map_err(|e| StakeflowError::Internal(format!("stat task failed: {e}")))?
            .map_err(|e| StakeflowError::ArchiveVerificationFailed {
                key: key.to_string(),
                expected: "readable object".into(),
                actual: e.to_string(),
            })
    }
}

/// Unresolved count, and the rows to snapshot when there are none.
fn load_period(reader: &StoreReader, period: ArchivePeriod) -> Result<(usize, Vec<Stake>, Vec<LedgerEntry>)> {
    let unresolved = reader.unresolved_between(period.start, period.end)?;
    if unresolved > 0 {
        return Ok((unresolved, Vec::new(), Vec::new()));
    }
    let stakes = reader.stakes_placed_between(period.start, period.end)?;
    let entries = reader.entries_between(period.start, period.end)?;
    Ok((0, stakes, entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_is_dated_and_unique_per_period() {
        let start = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let end = DateTime::from_timestamp_millis(1_700_003_600_000).unwrap();
        let key = ArchivePeriod::new(start, end).object_key();
        assert_eq!(key, "stakeflow/2023/11/14/1700000000000-1700003600000.json");
    }

    #[test]
    fn fs_store_round_trips_size_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsColdStore::new(dir.path()).unwrap();
        store.put("a/b/object.json", b"hello").unwrap();
        let stat = store.stat("a/b/object.json").unwrap();
        assert_eq!(stat.size_bytes, 5);
        assert_eq!(
            stat.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(!dir.path().join("a/b/object.part").exists());
    }

    #[test]
    fn fs_store_never_replaces_a_different_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsColdStore::new(dir.path()).unwrap();
        store.put("p.json", b"complete").unwrap();
        store.put("p.json", b"complete").unwrap();

        let err = store.put("p.json", b"").unwrap_err();
        assert!(matches!(err, StakeflowError::ArchiveConflict { .. }));
        assert_eq!(fs::read(dir.path().join("p.json")).unwrap(), b"complete");
    }

    #[test]
    fn missing_object_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsColdStore::new(dir.path()).unwrap();
        assert!(matches!(store.stat("nope.json"), Err(StakeflowError::Io(_))));
    }
}
