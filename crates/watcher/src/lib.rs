//! Filesystem watching for the relay.
//!
//! Wraps a `notify` watcher and forwards create/modify events for regular
//! files into a bounded tokio channel. The watcher callback runs on notify's
//! own thread, so it only ever uses `try_send`; a full channel drops the
//! event with a warning rather than blocking the notification thread. The
//! periodic drain scan picks up anything dropped here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{CreateKind, ModifyKind};
use notify::{Config, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("watch directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    #[error("failed to initialize filesystem watcher: {0}")]
    Init(#[source] notify::Error),

    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// A file appearing or changing under the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Appeared(PathBuf),
    Modified(PathBuf),
}

impl FileEvent {
    pub fn path(&self) -> &Path {
        match self {
            FileEvent::Appeared(path) | FileEvent::Modified(path) => path,
        }
    }
}

/// Recursive watcher over one directory. Dropping it stops the underlying
/// notify watcher and closes the event channel.
pub struct FileWatcher {
    // Held only to keep the notify backend alive.
    _watcher: Box<dyn Watcher + Send>,
}

impl FileWatcher {
    /// Starts watching `dir` recursively with the platform's native backend
    /// (inotify, FSEvents, ReadDirectoryChangesW). Events arrive on the
    /// returned receiver; `capacity` bounds how far the consumer may fall
    /// behind before events are dropped.
    pub fn start(
        dir: &Path,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<FileEvent>), WatchError> {
        let (tx, rx) = mpsc::channel(capacity);
        let watcher = RecommendedWatcher::new(forwarding_handler(tx), Config::default())
            .map_err(WatchError::Init)?;
        Self::attach(Box::new(watcher), dir).map(|watcher| (watcher, rx))
    }

    /// Polling fallback for filesystems where native notification does not
    /// work (network mounts, some containers).
    pub fn start_polling(
        dir: &Path,
        capacity: usize,
        interval: Duration,
    ) -> Result<(Self, mpsc::Receiver<FileEvent>), WatchError> {
        let (tx, rx) = mpsc::channel(capacity);
        let config = Config::default().with_poll_interval(interval);
        let watcher =
            PollWatcher::new(forwarding_handler(tx), config).map_err(WatchError::Init)?;
        Self::attach(Box::new(watcher), dir).map(|watcher| (watcher, rx))
    }

    fn attach(mut watcher: Box<dyn Watcher + Send>, dir: &Path) -> Result<Self, WatchError> {
        if !dir.is_dir() {
            return Err(WatchError::MissingDirectory(dir.to_path_buf()));
        }
        watcher
            .watch(dir, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Watch {
                path: dir.to_path_buf(),
                source,
            })?;
        tracing::info!(dir = %dir.display(), "watching directory");
        Ok(Self { _watcher: watcher })
    }
}

fn forwarding_handler(
    tx: mpsc::Sender<FileEvent>,
) -> impl Fn(notify::Result<notify::Event>) + Send + 'static {
    move |result| match result {
        Ok(event) => {
            for file_event in map_event(&event) {
                if let Err(mpsc::error::TrySendError::Full(dropped)) = tx.try_send(file_event) {
                    tracing::warn!(
                        path = %dropped.path().display(),
                        "event channel full, dropping filesystem event"
                    );
                }
            }
        }
        Err(error) => {
            tracing::warn!(error = %error, "filesystem watcher error");
        }
    }
}

/// Maps a raw notify event onto relay events. Only regular files are
/// interesting; directory events and removals are ignored (vanished files
/// are handled when the queue is drained).
fn map_event(event: &notify::Event) -> Vec<FileEvent> {
    let build: fn(PathBuf) -> FileEvent = match event.kind {
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => {
            FileEvent::Appeared
        }
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Name(_)) => FileEvent::Modified,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter(|path| path.is_file())
        .map(|path| build(path.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next_event_for(
        rx: &mut mpsc::Receiver<FileEvent>,
        path: &Path,
    ) -> Option<FileEvent> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) if event.path() == path => return Some(event),
                Ok(Some(_)) => continue,
                _ => return None,
            }
        }
    }

    #[test]
    fn missing_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = FileWatcher::start(&missing, 16)
            .err()
            .expect("watching a missing directory should fail");
        assert!(matches!(err, WatchError::MissingDirectory(_)));
    }

    #[tokio::test]
    async fn new_file_produces_an_event() {
        let dir = tempfile::tempdir().unwrap();
        let (_watcher, mut rx) = FileWatcher::start(dir.path(), 64).unwrap();

        let file = dir.path().join("data.csv");
        std::fs::write(&file, b"payload").unwrap();

        let event = next_event_for(&mut rx, &file).await;
        assert!(event.is_some(), "no event for created file");
    }

    #[tokio::test]
    async fn files_in_subdirectories_are_seen() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("reports");
        std::fs::create_dir_all(&sub).unwrap();
        let (_watcher, mut rx) = FileWatcher::start(dir.path(), 64).unwrap();

        let file = sub.join("q3.txt");
        std::fs::write(&file, b"payload").unwrap();

        let event = next_event_for(&mut rx, &file).await;
        assert!(event.is_some(), "no event for file in subdirectory");
    }

    #[tokio::test]
    async fn polling_backend_sees_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let (_watcher, mut rx) =
            FileWatcher::start_polling(dir.path(), 64, Duration::from_millis(100)).unwrap();

        let file = dir.path().join("data.csv");
        std::fs::write(&file, b"payload").unwrap();

        let event = next_event_for(&mut rx, &file).await;
        assert!(event.is_some(), "poll watcher missed created file");
    }

    #[test]
    fn directory_creation_maps_to_nothing() {
        let event = notify::Event::new(EventKind::Create(CreateKind::Folder))
            .add_path(PathBuf::from("/tmp/somewhere"));
        assert!(map_event(&event).is_empty());
    }

    #[test]
    fn removal_maps_to_nothing() {
        let event = notify::Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(PathBuf::from("/tmp/somewhere/file"));
        assert!(map_event(&event).is_empty());
    }
}
