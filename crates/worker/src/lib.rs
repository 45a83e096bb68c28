//! Relay orchestration: watcher intake, queue draining, status reporting.
//!
//! A file moves through: detected by the watcher → queued → stability wait →
//! transferred (with retries inside the transport) → dequeued, exactly once,
//! regardless of outcome. The drain loop is deliberately sequential; one
//! failing destination should not fan out into parallel hammering.

mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ferry_config::RelayConfig;
use ferry_queue::FileQueue;
use ferry_transfer::{TransferResult, TransferService};
use ferry_watcher::FileEvent;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub use status::{StatusWriter, status_id};

/// Upper bound on files handled in one drain cycle. A deep backlog is worked
/// off across cycles so cancellation and fresh events stay responsive.
const MAX_FILES_PER_CYCLE: usize = 10;

/// Queue entries idle beyond this are abandoned files, not pending work.
const STALE_MAX_AGE: Duration = Duration::from_secs(3600);
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Notifications emitted by the worker for the hosting application.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Queued(PathBuf),
    /// Detection dropped because the queue was at its bound.
    QueueFull(PathBuf),
    TransferStarted(PathBuf),
    TransferFinished(TransferResult),
    StaleEvicted(usize),
}

pub struct RelayWorker {
    config: Arc<RelayConfig>,
    queue: Arc<FileQueue>,
    service: Arc<dyn TransferService>,
    status: Option<StatusWriter>,
    events: Option<mpsc::UnboundedSender<RelayEvent>>,
    drain_gate: Arc<Semaphore>,
}

impl RelayWorker {
    pub fn new(config: Arc<RelayConfig>, service: Arc<dyn TransferService>) -> Self {
        let status = config.status_dir.clone().map(StatusWriter::new);
        Self {
            config,
            queue: Arc::new(FileQueue::new()),
            service,
            status,
            events: None,
            drain_gate: Arc::new(Semaphore::new(1)),
        }
    }

    /// Subscribes the hosting application to worker notifications.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<RelayEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn queue(&self) -> &FileQueue {
        &self.queue
    }

    /// Main loop: consumes watcher events and runs the periodic drain and
    /// stale sweeps until cancelled.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<FileEvent>,
        cancel: CancellationToken,
    ) {
        let mut drain_tick = tokio::time::interval(self.config.drain_interval());
        drain_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep_tick = tokio::time::interval(STALE_SWEEP_INTERVAL);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        tracing::warn!("watcher channel closed, stopping worker");
                        break;
                    }
                },
                _ = drain_tick.tick() => self.spawn_drain(&cancel),
                _ = sweep_tick.tick() => {
                    let evicted = self.queue.cleanup_stale(STALE_MAX_AGE);
                    if evicted > 0 {
                        self.emit(RelayEvent::StaleEvicted(evicted));
                    }
                }
            }
        }

        // A drain cycle may still be mid-transfer; it observes the token
        // between files, so waiting on the gate bounds shutdown by one file.
        let _ = self.drain_gate.acquire().await;
        tracing::info!("relay worker stopped");
    }

    /// Watcher intake. Rejections here are silent drops by design: the
    /// watcher sees everything under the directory, including files the
    /// relay is configured to ignore.
    pub fn handle_event(&self, event: FileEvent) {
        let path = event.path();

        if !path.starts_with(&self.config.watch_dir) {
            tracing::debug!(path = %path.display(), "event outside watch directory");
            return;
        }

        if self.queue.contains(path) {
            self.queue.record_activity(path);
            return;
        }

        let Some(name) = path.file_name() else {
            return;
        };
        if let Err(error) = ferry_security::validate_filename(&name.to_string_lossy()) {
            tracing::warn!(path = %path.display(), error = %error, "rejected at intake");
            return;
        }

        if self.queue.len() >= self.config.max_queue_size {
            tracing::warn!(
                path = %path.display(),
                max_queue_size = self.config.max_queue_size,
                "queue full, dropping detection"
            );
            self.emit(RelayEvent::QueueFull(path.to_path_buf()));
            return;
        }

        if self.queue.enqueue(path) {
            tracing::info!(path = %path.display(), queued = self.queue.len(), "file queued");
            self.emit(RelayEvent::Queued(path.to_path_buf()));
        }
    }

    /// Starts a drain cycle unless one is already running; a tick during a
    /// running cycle is skipped, not queued.
    fn spawn_drain(self: &Arc<Self>, cancel: &CancellationToken) {
        match Arc::clone(&self.drain_gate).try_acquire_owned() {
            Ok(permit) => {
                let worker = Arc::clone(self);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    worker.drain_cycle(&cancel).await;
                    drop(permit);
                });
            }
            Err(_) => {
                tracing::debug!("drain cycle still running, skipping tick");
            }
        }
    }

    /// Transfers up to [`MAX_FILES_PER_CYCLE`] of the oldest queued files,
    /// sequentially. Every file that reaches the transfer step leaves the
    /// queue, success or not; re-detection would re-queue it.
    pub async fn drain_cycle(&self, cancel: &CancellationToken) {
        for _ in 0..MAX_FILES_PER_CYCLE {
            if cancel.is_cancelled() {
                break;
            }
            let Some(path) = self.queue.peek_oldest() else {
                break;
            };

            let last_write_millis = match tokio::fs::metadata(&path).await {
                Ok(metadata) => mtime_millis(metadata.modified().ok()),
                Err(_) => {
                    tracing::debug!(path = %path.display(), "queued file vanished, dropping");
                    self.queue.remove(&path);
                    continue;
                }
            };

            // Oldest entry still being written: everything behind it is
            // newer, so the whole cycle waits.
            if !self.queue.is_stable(&path, self.config.stability_window()) {
                tracing::debug!(path = %path.display(), "oldest entry not yet stable");
                break;
            }

            self.emit(RelayEvent::TransferStarted(path.clone()));
            let result = self.service.transfer_file(&path, None).await;
            self.queue.remove(&path);

            if result.success {
                tracing::info!(
                    file = %result.file_name,
                    destination = %result.destination,
                    size = result.file_size,
                    verified = result.verified,
                    retries = result.retries,
                    "transfer complete"
                );
            } else {
                tracing::warn!(
                    file = %result.file_name,
                    retries = result.retries,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "transfer failed"
                );
            }

            if let Some(status) = &self.status {
                status.write(&result, last_write_millis).await;
            }
            self.emit(RelayEvent::TransferFinished(result));
        }
    }

    fn emit(&self, event: RelayEvent) {
        if let Some(events) = &self.events {
            // A departed subscriber is not the worker's problem.
            let _ = events.send(event);
        }
    }
}

fn mtime_millis(modified: Option<SystemTime>) -> i64 {
    modified
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ferry_config::{
        ConflictPolicy, RetrySettings, SecurityLimits, SmbSettings, TransferMethod,
    };
    use ferry_transfer::TransferError;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubService {
        calls: Mutex<Vec<PathBuf>>,
        fail: bool,
    }

    impl StubService {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn calls(&self) -> Vec<PathBuf> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TransferService for StubService {
        fn transfer_file<'a>(
            &'a self,
            source: &'a Path,
            _dest_override: Option<&'a Path>,
        ) -> Pin<Box<dyn Future<Output = TransferResult> + Send + 'a>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(source.to_path_buf());
                if self.fail {
                    TransferResult::failure(
                        source,
                        String::new(),
                        0,
                        Utc::now(),
                        "stub",
                        2,
                        "destination unreachable".into(),
                    )
                } else {
                    TransferResult::success(
                        source,
                        "/dest".into(),
                        0,
                        Utc::now(),
                        "stub",
                        true,
                        0,
                    )
                }
            })
        }

        fn test_connection(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
            Box::pin(async { true })
        }

        fn verify_transfer<'a>(
            &'a self,
            _source: &'a Path,
            _destination: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<bool, TransferError>> + Send + 'a>> {
            Box::pin(async { Ok(true) })
        }

        fn method_name(&self) -> &'static str {
            "stub"
        }
    }

    fn config(watch: &Path, status: Option<PathBuf>) -> Arc<RelayConfig> {
        Arc::new(RelayConfig {
            watch_dir: watch.to_path_buf(),
            method: TransferMethod::Smb,
            drain_interval_secs: 1,
            stability_secs: 0,
            max_queue_size: 100,
            retry: RetrySettings::default(),
            conflict_policy: ConflictPolicy::Append,
            archive_after_transfer: false,
            archive_dir: None,
            delete_after_transfer: false,
            verify_transfer: true,
            min_free_space: 0,
            security: SecurityLimits::default(),
            status_dir: status,
            max_concurrent_transfers: 1,
            ssh: None,
            smb: Some(SmbSettings {
                server: "files01".into(),
                share: "drop".into(),
                root: PathBuf::from("/mnt/drop"),
                credential_key: None,
            }),
        })
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"payload").unwrap();
        path
    }

    #[test]
    fn intake_rejects_paths_outside_watch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let worker = RelayWorker::new(config(dir.path(), None), StubService::new(false));

        worker.handle_event(FileEvent::Appeared(PathBuf::from("/elsewhere/x.txt")));
        assert!(worker.queue().is_empty());
    }

    #[test]
    fn intake_rejects_invalid_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let worker = RelayWorker::new(config(dir.path(), None), StubService::new(false));

        worker.handle_event(FileEvent::Appeared(dir.path().join("bad|name.txt")));
        assert!(worker.queue().is_empty());
    }

    #[test]
    fn duplicate_detection_records_activity_only() {
        let dir = tempfile::tempdir().unwrap();
        let worker = RelayWorker::new(config(dir.path(), None), StubService::new(false));
        let path = dir.path().join("data.csv");

        worker.handle_event(FileEvent::Appeared(path.clone()));
        worker.handle_event(FileEvent::Modified(path.clone()));
        assert_eq!(worker.queue().len(), 1);
    }

    #[test]
    fn queue_bound_sheds_with_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = (*config(dir.path(), None)).clone();
        cfg.max_queue_size = 1;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker =
            RelayWorker::new(Arc::new(cfg), StubService::new(false)).with_events(tx);

        worker.handle_event(FileEvent::Appeared(dir.path().join("first.txt")));
        worker.handle_event(FileEvent::Appeared(dir.path().join("second.txt")));

        assert_eq!(worker.queue().len(), 1);
        assert!(matches!(rx.try_recv(), Ok(RelayEvent::Queued(_))));
        match rx.try_recv() {
            Ok(RelayEvent::QueueFull(path)) => {
                assert!(path.ends_with("second.txt"));
            }
            other => panic!("expected QueueFull, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drain_transfers_oldest_first_and_dequeues() {
        let dir = tempfile::tempdir().unwrap();
        let status_dir = dir.path().join("status");
        let service = StubService::new(false);
        let worker = RelayWorker::new(
            config(dir.path(), Some(status_dir.clone())),
            Arc::clone(&service) as Arc<dyn TransferService>,
        );

        let first = touch(dir.path(), "first.csv");
        worker.handle_event(FileEvent::Appeared(first.clone()));
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = touch(dir.path(), "second.csv");
        worker.handle_event(FileEvent::Appeared(second.clone()));

        worker.drain_cycle(&CancellationToken::new()).await;

        assert_eq!(service.calls(), vec![first, second]);
        assert!(worker.queue().is_empty());
        // One status record per transfer.
        assert_eq!(std::fs::read_dir(&status_dir).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn drain_cycle_caps_at_ten_files() {
        let dir = tempfile::tempdir().unwrap();
        let service = StubService::new(false);
        let worker = RelayWorker::new(
            config(dir.path(), None),
            Arc::clone(&service) as Arc<dyn TransferService>,
        );

        for i in 0..12 {
            worker.handle_event(FileEvent::Appeared(touch(dir.path(), &format!("f{i}.csv"))));
        }
        worker.drain_cycle(&CancellationToken::new()).await;

        assert_eq!(service.calls().len(), 10);
        assert_eq!(worker.queue().len(), 2);
    }

    #[tokio::test]
    async fn vanished_file_is_dequeued_without_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let service = StubService::new(false);
        let worker = RelayWorker::new(
            config(dir.path(), None),
            Arc::clone(&service) as Arc<dyn TransferService>,
        );

        // Queued but never written to disk.
        worker.handle_event(FileEvent::Appeared(dir.path().join("ghost.csv")));
        worker.drain_cycle(&CancellationToken::new()).await;

        assert!(service.calls().is_empty());
        assert!(worker.queue().is_empty());
    }

    #[tokio::test]
    async fn unstable_oldest_entry_stops_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = (*config(dir.path(), None)).clone();
        cfg.stability_secs = 3600;
        let service = StubService::new(false);
        let worker = RelayWorker::new(
            Arc::new(cfg),
            Arc::clone(&service) as Arc<dyn TransferService>,
        );

        let path = touch(dir.path(), "busy.csv");
        worker.handle_event(FileEvent::Appeared(path.clone()));
        worker.drain_cycle(&CancellationToken::new()).await;

        assert!(service.calls().is_empty());
        assert!(worker.queue().contains(&path));
    }

    #[tokio::test]
    async fn failed_transfer_still_leaves_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = StubService::new(true);
        let worker = RelayWorker::new(
            config(dir.path(), None),
            Arc::clone(&service) as Arc<dyn TransferService>,
        )
        .with_events(tx);

        let path = touch(dir.path(), "doomed.csv");
        worker.handle_event(FileEvent::Appeared(path.clone()));
        worker.drain_cycle(&CancellationToken::new()).await;

        assert_eq!(service.calls(), vec![path]);
        assert!(worker.queue().is_empty());

        let mut finished = None;
        while let Ok(event) = rx.try_recv() {
            if let RelayEvent::TransferFinished(result) = event {
                finished = Some(result);
            }
        }
        let result = finished.expect("no TransferFinished event");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("destination unreachable"));
    }

    #[tokio::test]
    async fn cancellation_stops_between_files() {
        let dir = tempfile::tempdir().unwrap();
        let service = StubService::new(false);
        let worker = RelayWorker::new(
            config(dir.path(), None),
            Arc::clone(&service) as Arc<dyn TransferService>,
        );

        worker.handle_event(FileEvent::Appeared(touch(dir.path(), "a.csv")));
        let cancel = CancellationToken::new();
        cancel.cancel();
        worker.drain_cycle(&cancel).await;

        assert!(service.calls().is_empty());
        assert_eq!(worker.queue().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_drains_on_interval_and_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let service = StubService::new(false);
        let worker = Arc::new(RelayWorker::new(
            config(dir.path(), None),
            Arc::clone(&service) as Arc<dyn TransferService>,
        ));

        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&worker).run(rx, cancel.clone()));

        let path = touch(dir.path(), "data.csv");
        tx.send(FileEvent::Appeared(path.clone())).await.unwrap();

        // Drain interval is one second; paused time advances past it as
        // soon as the worker goes idle.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(service.calls(), vec![path]);

        cancel.cancel();
        handle.await.unwrap();
    }

    /// Stub whose transfer parks on a long timer, for shutdown-ordering
    /// tests under paused time.
    struct SlowService {
        completed: AtomicBool,
    }

    impl TransferService for SlowService {
        fn transfer_file<'a>(
            &'a self,
            source: &'a Path,
            _dest_override: Option<&'a Path>,
        ) -> Pin<Box<dyn Future<Output = TransferResult> + Send + 'a>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                self.completed.store(true, Ordering::SeqCst);
                TransferResult::success(source, "/dest".into(), 0, Utc::now(), "stub", true, 0)
            })
        }

        fn test_connection(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
            Box::pin(async { true })
        }

        fn verify_transfer<'a>(
            &'a self,
            _source: &'a Path,
            _destination: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<bool, TransferError>> + Send + 'a>> {
            Box::pin(async { Ok(true) })
        }

        fn method_name(&self) -> &'static str {
            "stub"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_waits_for_the_in_flight_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(SlowService {
            completed: AtomicBool::new(false),
        });
        let worker = Arc::new(RelayWorker::new(
            config(dir.path(), None),
            Arc::clone(&service) as Arc<dyn TransferService>,
        ));

        let path = touch(dir.path(), "data.csv");
        worker.handle_event(FileEvent::Appeared(path));

        let (_tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&worker).run(rx, cancel.clone()));

        // Let the first drain tick start the transfer, then cancel while it
        // is still parked on its timer.
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        // run() returned only after the transfer ran to completion.
        assert!(service.completed.load(Ordering::SeqCst));
        assert!(worker.queue().is_empty());
    }
}
