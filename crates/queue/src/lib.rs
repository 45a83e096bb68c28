//! Tracking of discovered-but-not-yet-transferred files.
//!
//! Watcher callbacks and the drain loop run on different threads, so all
//! state lives behind an explicit mutex. Entries remember when they were
//! enqueued (for oldest-first draining) and when they last saw write
//! activity (for stability detection).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    enqueued_at: Instant,
    last_activity: Instant,
}

/// Thread-safe map of queued files.
#[derive(Debug, Default)]
pub struct FileQueue {
    entries: Mutex<HashMap<PathBuf, QueueEntry>>,
}

impl FileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a path. Returns false when the path is already queued — the
    /// caller should record activity instead.
    pub fn enqueue(&self, path: &Path) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(path) {
            return false;
        }
        entries.insert(
            path.to_path_buf(),
            QueueEntry {
                enqueued_at: now,
                last_activity: now,
            },
        );
        true
    }

    /// Refreshes the last-activity timestamp for a queued path. Unknown
    /// paths are ignored.
    pub fn record_activity(&self, path: &Path) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(path) {
            entry.last_activity = Instant::now();
        }
    }

    /// Oldest-enqueued path, ties broken by path order for determinism.
    pub fn peek_oldest(&self) -> Option<PathBuf> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .min_by(|(path_a, a), (path_b, b)| {
                a.enqueued_at
                    .cmp(&b.enqueued_at)
                    .then_with(|| path_a.cmp(path_b))
            })
            .map(|(path, _)| path.clone())
    }

    /// Removes a path. Returns whether it was present.
    pub fn remove(&self, path: &Path) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(path).is_some()
    }

    /// True when the path has seen no activity for at least `window`.
    ///
    /// Unknown paths are reported stable: paths the queue never tracked
    /// (explicit destination overrides) are immediately eligible.
    pub fn is_stable(&self, path: &Path, window: Duration) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(path) {
            Some(entry) => entry.last_activity.elapsed() >= window,
            None => true,
        }
    }

    /// Evicts entries idle longer than `max_age`. Returns how many were
    /// dropped.
    pub fn cleanup_stale(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|path, entry| {
            let keep = entry.last_activity.elapsed() < max_age;
            if !keep {
                tracing::warn!(path = %path.display(), "evicting stale queue entry");
            }
            keep
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn enqueue_rejects_duplicates() {
        let queue = FileQueue::new();
        assert!(queue.enqueue(Path::new("/watch/a.txt")));
        assert!(!queue.enqueue(Path::new("/watch/a.txt")));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn peek_oldest_orders_by_enqueue_time() {
        let queue = FileQueue::new();
        queue.enqueue(Path::new("/watch/first.txt"));
        thread::sleep(Duration::from_millis(5));
        queue.enqueue(Path::new("/watch/second.txt"));

        assert_eq!(
            queue.peek_oldest(),
            Some(PathBuf::from("/watch/first.txt"))
        );
        queue.remove(Path::new("/watch/first.txt"));
        assert_eq!(
            queue.peek_oldest(),
            Some(PathBuf::from("/watch/second.txt"))
        );
        queue.remove(Path::new("/watch/second.txt"));
        assert_eq!(queue.peek_oldest(), None);
    }

    #[test]
    fn stability_follows_activity() {
        let queue = FileQueue::new();
        let path = Path::new("/watch/busy.txt");
        queue.enqueue(path);
        assert!(!queue.is_stable(path, Duration::from_secs(60)));

        thread::sleep(Duration::from_millis(30));
        assert!(queue.is_stable(path, Duration::from_millis(20)));

        queue.record_activity(path);
        assert!(!queue.is_stable(path, Duration::from_millis(20)));
    }

    #[test]
    fn unknown_paths_are_stable() {
        let queue = FileQueue::new();
        assert!(queue.is_stable(Path::new("/never/seen"), Duration::from_secs(3600)));
    }

    #[test]
    fn cleanup_evicts_only_idle_entries() {
        let queue = FileQueue::new();
        queue.enqueue(Path::new("/watch/old.txt"));
        thread::sleep(Duration::from_millis(30));
        queue.enqueue(Path::new("/watch/new.txt"));

        let evicted = queue.cleanup_stale(Duration::from_millis(20));
        assert_eq!(evicted, 1);
        assert!(!queue.contains(Path::new("/watch/old.txt")));
        assert!(queue.contains(Path::new("/watch/new.txt")));
    }

    #[test]
    fn concurrent_enqueue_remove() {
        let queue = Arc::new(FileQueue::new());
        let mut handles = Vec::new();
        for worker in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    let path = PathBuf::from(format!("/watch/{worker}-{i}.txt"));
                    assert!(queue.enqueue(&path));
                    queue.record_activity(&path);
                    assert!(queue.remove(&path));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(queue.is_empty());
    }
}
