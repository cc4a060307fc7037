//! Stage memoization: run an all-or-nothing stage at most once per namespace.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::interrupt::{StateSaver, flush_after_error};
use super::store::CheckpointStore;

/// Persisted form of a completed stage.
///
/// `has_result` is explicit so a stage whose value is `None` or empty still
/// counts as completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord<T> {
    pub has_result: bool,
    pub value: T,
    pub completed_at: DateTime<Utc>,
}

/// Observer for memoizer decisions (the terminal UI implements this).
pub trait StageObserver: Send + Sync {
    fn stage_started(&self, _stage: &str) {}
    fn stage_skipped(&self, _stage: &str) {}
    fn stage_completed(&self, _stage: &str) {}
}

pub struct StageMemo {
    store: CheckpointStore,
    namespace: String,
    saver: Arc<dyn StateSaver>,
    observer: Option<Arc<dyn StageObserver>>,
}

impl StageMemo {
    pub fn new(store: CheckpointStore, namespace: &str, saver: Arc<dyn StateSaver>) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
            saver,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Whether `stage` already has a persisted result in this namespace.
    pub fn is_completed(&self, stage: &str) -> bool {
        matches!(
            self.store
                .get::<StageRecord<serde_json::Value>>(&self.namespace, stage),
            Ok(Some(record)) if record.has_result
        )
    }

    /// Return the stored result of `stage`, or run `work` and store its result.
    ///
    /// On failure the state saver is flushed and the error is returned
    /// unchanged; the stage stays unrecorded so the next run retries it.
    pub async fn run<T, F, Fut>(&self, stage: &str, work: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.store.get::<StageRecord<T>>(&self.namespace, stage) {
            Ok(Some(record)) if record.has_result => {
                info!(
                    namespace = %self.namespace,
                    stage,
                    completed_at = %record.completed_at,
                    "Skipping stage, already completed"
                );
                if let Some(observer) = &self.observer {
                    observer.stage_skipped(stage);
                }
                return Ok(record.value);
            }
            Ok(_) => {}
            Err(e) if e.is_corrupt() => {
                warn!(namespace = %self.namespace, stage, error = %e, "Ignoring unreadable stage record");
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(observer) = &self.observer {
            observer.stage_started(stage);
        }

        match work().await {
            Ok(value) => {
                let record = StageRecord {
                    has_result: true,
                    value,
                    completed_at: Utc::now(),
                };
                self.store.put(&self.namespace, stage, &record)?;
                info!(namespace = %self.namespace, stage, "Stage completed");
                if let Some(observer) = &self.observer {
                    observer.stage_completed(stage);
                }
                Ok(record.value)
            }
            Err(e) => {
                flush_after_error(self.saver.as_ref(), &e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::interrupt::tests::CountingSaver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn setup() -> (CheckpointStore, Arc<CountingSaver>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoints"));
        (store, Arc::new(CountingSaver::default()), dir)
    }

    #[tokio::test]
    async fn test_stage_runs_once_then_replays() {
        let (store, saver, _dir) = setup();
        let calls = AtomicUsize::new(0);

        let first_memo = StageMemo::new(store.clone(), "run-A", saver.clone());
        let first: Vec<String> = first_memo
            .run("decompose", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec!["p1".to_string(), "p2".to_string()])
            })
            .await
            .unwrap();
        assert_eq!(first, vec!["p1", "p2"]);

        // New memo instance simulates a new process on the same store
        let second_memo = StageMemo::new(store.clone(), "run-A", saver.clone());
        let second: Vec<String> = second_memo
            .run("decompose", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec!["other".to_string()])
            })
            .await
            .unwrap();

        assert_eq!(second, vec!["p1", "p2"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(second_memo.is_completed("decompose"));
    }

    #[tokio::test]
    async fn test_none_result_counts_as_completed() {
        let (store, saver, _dir) = setup();
        let memo = StageMemo::new(store, "run-A", saver);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Option<u32> = memo
                .run("setup", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await
                .unwrap();
            assert_eq!(value, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_flushes_state_and_is_not_recorded() {
        let (store, saver, _dir) = setup();
        let memo = StageMemo::new(store.clone(), "run-A", saver.clone());

        let err = memo
            .run::<u32, _, _>("setup", || async { anyhow::bail!("npm not found") })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "npm not found");
        assert_eq!(saver.saves.load(Ordering::SeqCst), 1);
        assert!(!memo.is_completed("setup"));

        // The retry on the next run executes the stage again
        let value = memo.run("setup", || async { Ok(5u32) }).await.unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_namespaces_do_not_share_results() {
        let (store, saver, _dir) = setup();
        let a = StageMemo::new(store.clone(), "run-A", saver.clone());
        let b = StageMemo::new(store.clone(), "run-B", saver.clone());

        let va = a.run("decompose", || async { Ok(1u8) }).await.unwrap();
        let vb = b.run("decompose", || async { Ok(2u8) }).await.unwrap();
        assert_eq!((va, vb), (1, 2));
    }

    #[tokio::test]
    async fn test_corrupt_record_reruns_stage() {
        let (store, saver, _dir) = setup();
        store.put("run-A", "decompose", &"garbage").unwrap();
        let memo = StageMemo::new(store, "run-A", saver);
        let value = memo.run("decompose", || async { Ok(3u8) }).await.unwrap();
        assert_eq!(value, 3);
    }

    #[derive(Default)]
    struct RecordingObserver {
        skipped: std::sync::Mutex<Vec<String>>,
    }

    impl StageObserver for RecordingObserver {
        fn stage_skipped(&self, stage: &str) {
            self.skipped.lock().unwrap().push(stage.to_string());
        }
    }

    #[tokio::test]
    async fn test_observer_notified_on_skip() {
        let (store, saver, _dir) = setup();
        let observer = Arc::new(RecordingObserver::default());
        let memo = StageMemo::new(store, "run-A", saver).with_observer(observer.clone());

        memo.run("decompose", || async { Ok(1u8) }).await.unwrap();
        memo.run("decompose", || async { Ok(1u8) }).await.unwrap();

        assert_eq!(*observer.skipped.lock().unwrap(), vec!["decompose".to_string()]);
    }
}
