//! Generated-file bookkeeping
//!
//! Synthesis and download producers write into the media directory; every
//! file they create is tracked per guild until it has been played or the
//! guild is killed. A path is deleted by whoever removes it from the tracker,
//! so concurrent cleanup triggers delete each file at most once.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::types::TenantId;
use crate::{Result, WangError};

/// How [`TempFileTracker::await_readiness`] polls
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPolicy {
    /// Delay between size checks
    pub interval: Duration,
    /// Consecutive unchanged, non-zero sizes required before the open check
    pub stable_polls: u32,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            stable_polls: 5,
        }
    }
}

/// Per-guild list of generated files
#[derive(Default)]
pub struct TempFileTracker {
    files: Mutex<HashMap<TenantId, Vec<PathBuf>>>,
    policy: ReadinessPolicy,
}

impl TempFileTracker {
    /// Tracker with the default 100 ms x 5 readiness window
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker with a custom readiness window
    pub fn with_policy(policy: ReadinessPolicy) -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Register `path` for `tenant`. Re-tracking a path already listed is a no-op.
    pub fn track(&self, tenant: TenantId, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut files = self.files.lock();
        let list = files.entry(tenant).or_default();
        if !list.contains(&path) {
            debug!(guild_id = %tenant, path = %path.display(), "Tracking temp file");
            list.push(path);
        }
    }

    /// Stop tracking `path` and delete it.
    ///
    /// Returns true when this call removed the entry. A second call for the
    /// same path finds nothing and does nothing.
    pub async fn release_one(&self, tenant: TenantId, path: &Path) -> bool {
        let removed = {
            let mut files = self.files.lock();
            let removed = match files.get_mut(&tenant) {
                Some(list) => match list.iter().position(|p| p == path) {
                    Some(idx) => {
                        list.remove(idx);
                        true
                    }
                    None => false,
                },
                None => false,
            };
            if files.get(&tenant).is_some_and(|l| l.is_empty()) {
                files.remove(&tenant);
            }
            removed
        };

        if removed {
            delete_file(path).await;
        }
        removed
    }

    /// Delete every file tracked for `tenant`
    pub async fn release_all(&self, tenant: TenantId) -> usize {
        let Some(paths) = self.files.lock().remove(&tenant) else {
            return 0;
        };
        for path in &paths {
            delete_file(path).await;
        }
        paths.len()
    }

    /// Delete every tracked file for every guild
    pub async fn release_everything(&self) -> usize {
        let drained: Vec<PathBuf> = {
            let mut files = self.files.lock();
            files.drain().flat_map(|(_, list)| list).collect()
        };
        for path in &drained {
            delete_file(path).await;
        }
        drained.len()
    }

    /// Files currently tracked for `tenant`, in insertion order
    pub fn tracked(&self, tenant: TenantId) -> Vec<PathBuf> {
        self.files
            .lock()
            .get(&tenant)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of tracked files
    pub fn total(&self) -> usize {
        self.files.lock().values().map(Vec::len).sum()
    }

    /// Wait until `path` has stopped growing and can be opened for read.
    ///
    /// Missing and empty files keep polling. Gives up with
    /// [`WangError::FileNotReady`] once `max_wait` has elapsed.
    pub async fn await_readiness(&self, path: &Path, max_wait: Duration) -> Result<()> {
        let policy = self.policy;
        let start = Instant::now();
        let mut last_size: Option<u64> = None;
        let mut stable = 0u32;

        while start.elapsed() < max_wait {
            let size = match tokio::fs::metadata(path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tokio::time::sleep(policy.interval).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if size == 0 {
                last_size = Some(0);
                stable = 0;
                tokio::time::sleep(policy.interval).await;
                continue;
            }

            if last_size == Some(size) {
                stable += 1;
                if stable >= policy.stable_polls {
                    match tokio::fs::File::open(path).await {
                        Ok(_) => {
                            debug!(
                                path = %path.display(),
                                size,
                                stable_ms = (policy.interval * stable).as_millis() as u64,
                                "File ready"
                            );
                            return Ok(());
                        }
                        Err(e) => {
                            debug!(path = %path.display(), error = %e, "File not yet readable");
                        }
                    }
                }
            } else {
                stable = 0;
                last_size = Some(size);
            }

            tokio::time::sleep(policy.interval).await;
        }

        Err(WangError::FileNotReady {
            path: path.to_path_buf(),
            waited: max_wait,
            last_size,
        })
    }
}

async fn delete_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!(path = %path.display(), "Cleaned up temp file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete temp file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;

    fn fast_policy() -> ReadinessPolicy {
        ReadinessPolicy {
            interval: Duration::from_millis(20),
            stable_polls: 5,
        }
    }

    #[tokio::test]
    async fn test_release_one_twice_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tts.mp3");
        std::fs::write(&path, b"audio").unwrap();

        let tracker = TempFileTracker::new();
        tracker.track(TenantId(1), &path);

        assert!(tracker.release_one(TenantId(1), &path).await);
        assert!(!path.exists());
        assert!(!tracker.release_one(TenantId(1), &path).await);
        assert_eq!(tracker.total(), 0);
    }

    #[tokio::test]
    async fn test_release_already_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.mp3");

        let tracker = TempFileTracker::new();
        tracker.track(TenantId(1), &path);
        assert!(tracker.release_one(TenantId(1), &path).await);
    }

    #[tokio::test]
    async fn test_concurrent_release_deletes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.mp3");
        std::fs::write(&path, b"audio").unwrap();

        let tracker = Arc::new(TempFileTracker::new());
        tracker.track(TenantId(4), &path);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                tracker.release_one(TenantId(4), &path).await
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_release_all_is_per_tenant() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.mp3");
        let c = dir.path().join("c.mp3");
        for p in [&a, &b, &c] {
            std::fs::write(p, b"x").unwrap();
        }

        let tracker = TempFileTracker::new();
        tracker.track(TenantId(1), &a);
        tracker.track(TenantId(1), &b);
        tracker.track(TenantId(2), &c);
        assert_eq!(tracker.tracked(TenantId(1)), vec![a.clone(), b.clone()]);

        assert_eq!(tracker.release_all(TenantId(1)).await, 2);
        assert!(!a.exists() && !b.exists());
        assert!(c.exists());

        assert_eq!(tracker.release_everything().await, 1);
        assert!(!c.exists());
        assert_eq!(tracker.total(), 0);
    }

    #[tokio::test]
    async fn test_readiness_on_finished_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done.mp3");
        std::fs::write(&path, vec![1u8; 512]).unwrap();

        let tracker = TempFileTracker::with_policy(fast_policy());
        tracker
            .await_readiness(&path, Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_readiness_waits_for_growth_to_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growing.mp3");
        let writer_path = path.clone();

        let writer = tokio::spawn(async move {
            let mut file = tokio::fs::File::create(&writer_path).await.unwrap();
            for _ in 0..20 {
                file.write_all(&[0u8; 64]).await.unwrap();
                file.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Instant::now()
        });

        let tracker = TempFileTracker::with_policy(fast_policy());
        tracker
            .await_readiness(&path, Duration::from_secs(3))
            .await
            .unwrap();
        let ready_at = Instant::now();

        let finished_at = writer.await.unwrap();
        assert!(ready_at >= finished_at);
    }

    #[tokio::test]
    async fn test_readiness_times_out_on_unstable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endless.mp3");
        let writer_path = path.clone();

        let writer = tokio::spawn(async move {
            let mut file = tokio::fs::File::create(&writer_path).await.unwrap();
            loop {
                file.write_all(&[0u8; 16]).await.unwrap();
                file.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let tracker = TempFileTracker::with_policy(fast_policy());
        let err = tracker
            .await_readiness(&path, Duration::from_millis(300))
            .await
            .unwrap_err();
        writer.abort();

        assert!(matches!(err, WangError::FileNotReady { .. }));
    }

    #[tokio::test]
    async fn test_readiness_times_out_on_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp3");
        std::fs::write(&path, b"").unwrap();

        let tracker = TempFileTracker::with_policy(fast_policy());
        let err = tracker
            .await_readiness(&path, Duration::from_millis(200))
            .await
            .unwrap_err();

        match err {
            WangError::FileNotReady { last_size, .. } => assert_eq!(last_size, Some(0)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
