//! Change detector: a debounced recursive watch on the root.
//!
//! Raw notify events are translated into [`ChangeEvent`]s and pushed onto
//! the [`EventQueue`] from a dedicated thread. Anything that means the
//! watch can no longer be trusted is reported as [`DetectorSignal::Lost`];
//! overflow notices become [`DetectorSignal::Rescan`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use notify_debouncer_full::notify::event::{CreateKind, ModifyKind, RenameMode};
use notify_debouncer_full::notify::{
    self, Event, EventKind, RecommendedWatcher, RecursiveMode,
};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use sync_common::{ChangeEvent, ChangeKind, FileStat, normalize_path};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::coordinator::walk_files;
use crate::errors::{Result, SyncError};
use crate::filter::PathFilter;
use crate::queue::EventQueue;

/// Out-of-band notices from the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorSignal {
    /// Events may have been dropped; run a reconciliation scan.
    Rescan,
    /// The watch is gone. Fatal.
    Lost(String),
}

#[derive(Debug, PartialEq, Eq)]
enum Detected {
    Change(String, ChangeKind),
    NewDir(PathBuf),
    Rescan,
    RootLost,
}

/// Owns the watcher. Dropping it stops the watch quietly.
pub struct ChangeDetector {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    stopping: Arc<AtomicBool>,
}

impl ChangeDetector {
    pub fn start(
        cfg: &SyncConfig,
        filter: PathFilter,
        queue: Arc<EventQueue>,
        signals: UnboundedSender<DetectorSignal>,
    ) -> Result<Self> {
        let translator = Translator {
            root: cfg.watch_root.clone(),
            root_key: cfg.root_key(),
            filter,
            settle_attempts: cfg.settle_attempts,
            settle_delay: cfg.settle_delay,
        };
        let stopping = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<DebounceEventResult>();

        let thread_stopping = Arc::clone(&stopping);
        std::thread::Builder::new()
            .name("change-detector".into())
            .spawn(move || {
                while let Ok(result) = rx.recv() {
                    translator.handle(result, &queue, &signals);
                }
                if !thread_stopping.load(Ordering::SeqCst) {
                    let _ = signals.send(DetectorSignal::Lost("watcher channel closed".into()));
                }
            })
            .map_err(|e| SyncError::WatchLost(format!("cannot spawn detector thread: {e}")))?;

        let mut debouncer = new_debouncer(cfg.debounce, None, move |result| {
            let _ = tx.send(result);
        })
        .map_err(|e| SyncError::WatchLost(format!("cannot create watcher: {e}")))?;

        debouncer
            .watch(&cfg.watch_root, RecursiveMode::Recursive)
            .map_err(|e| {
                SyncError::WatchLost(format!("cannot watch {}: {e}", cfg.watch_root.display()))
            })?;

        info!(
            target: "index_sync::detector",
            root = %cfg.watch_root.display(),
            debounce_ms = cfg.debounce.as_millis() as u64,
            "watching"
        );
        Ok(Self {
            _debouncer: debouncer,
            stopping,
        })
    }
}

impl Drop for ChangeDetector {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
    }
}

struct Translator {
    root: PathBuf,
    root_key: String,
    filter: PathFilter,
    settle_attempts: u32,
    settle_delay: Duration,
}

impl Translator {
    fn handle(
        &self,
        result: DebounceEventResult,
        queue: &EventQueue,
        signals: &UnboundedSender<DetectorSignal>,
    ) {
        let detected = match result {
            Ok(events) => events
                .iter()
                .flat_map(|ev| self.translate(ev))
                .collect::<Vec<_>>(),
            Err(errors) => {
                let mut out = Vec::new();
                for e in errors {
                    if self.is_fatal_error(&e) {
                        out.push(Detected::RootLost);
                    } else {
                        warn!(target: "index_sync::detector", error = %e, "watch error");
                    }
                }
                out
            }
        };

        let mut changes = Vec::new();
        for d in detected {
            match d {
                Detected::Change(path, kind) => changes.push((path, kind)),
                Detected::NewDir(dir) => {
                    for file in walk_files(&dir, &self.filter) {
                        changes.push((file, ChangeKind::Created));
                    }
                }
                Detected::Rescan => {
                    warn!(target: "index_sync::detector", "watcher requested a rescan");
                    let _ = signals.send(DetectorSignal::Rescan);
                }
                Detected::RootLost => {
                    error!(target: "index_sync::detector", root = %self.root_key, "watch root lost");
                    let _ = signals.send(DetectorSignal::Lost(format!(
                        "watch on {} lost",
                        self.root_key
                    )));
                    return;
                }
            }
        }

        if !self.root.is_dir() {
            let _ = signals.send(DetectorSignal::Lost(format!("{} disappeared", self.root_key)));
            return;
        }

        self.settle(&changes);
        for (path, kind) in changes {
            debug!(target: "index_sync::detector", path = %path, ?kind, "change");
            queue.push(ChangeEvent::new(path, kind));
        }
    }

    fn is_fatal_error(&self, e: &notify::Error) -> bool {
        matches!(e.kind, notify::ErrorKind::MaxFilesWatch | notify::ErrorKind::WatchNotFound)
            || e.paths.iter().any(|p| p == &self.root)
            || !self.root.is_dir()
    }

    fn key(&self, path: &Path) -> String {
        normalize_path(path, &self.root)
    }

    /// A path that now exists: a directory to walk or a created file.
    fn appeared(&self, path: &Path) -> Detected {
        if path.is_dir() {
            Detected::NewDir(path.to_path_buf())
        } else {
            Detected::Change(self.key(path), ChangeKind::Created)
        }
    }

    fn gone(&self, path: &Path) -> Detected {
        let key = self.key(path);
        if key == self.root_key {
            Detected::RootLost
        } else {
            Detected::Change(key, ChangeKind::Deleted)
        }
    }

    fn translate(&self, event: &Event) -> Vec<Detected> {
        if event.need_rescan() {
            return vec![Detected::Rescan];
        }

        let out: Vec<Detected> = match &event.kind {
            EventKind::Create(CreateKind::Folder) => event
                .paths
                .iter()
                .map(|p| Detected::NewDir(p.clone()))
                .collect(),
            EventKind::Create(_) => event.paths.iter().map(|p| self.appeared(p)).collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
                vec![self.gone(&event.paths[0]), self.appeared(&event.paths[1])]
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                event.paths.iter().map(|p| self.gone(p)).collect()
            }
            EventKind::Modify(ModifyKind::Name(_)) => event
                .paths
                .iter()
                .map(|p| if p.exists() { self.appeared(p) } else { self.gone(p) })
                .collect(),
            EventKind::Modify(_) => event
                .paths
                .iter()
                .filter(|p| !p.is_dir())
                .map(|p| Detected::Change(self.key(p), ChangeKind::Modified))
                .collect(),
            EventKind::Remove(_) => event.paths.iter().map(|p| self.gone(p)).collect(),
            _ => Vec::new(),
        };

        out.into_iter()
            .filter(|d| match d {
                Detected::Change(path, _) => self.filter.accepts(path),
                Detected::NewDir(dir) => self.filter.accepts(&self.key(dir)),
                _ => true,
            })
            .collect()
    }

    /// Waits until files being written stop changing, up to the configured attempts.
    /// Files still changing afterwards are emitted anyway; the coordinator's
    /// fingerprint read detects a torn read and retries.
    fn settle(&self, changes: &[(String, ChangeKind)]) {
        let mut watching: HashMap<&str, FileStat> = HashMap::new();
        for (path, kind) in changes {
            if *kind == ChangeKind::Deleted {
                continue;
            }
            if let Ok(stat) = FileStat::of(Path::new(path)) {
                watching.insert(path.as_str(), stat);
            }
        }

        for _ in 0..self.settle_attempts {
            if watching.is_empty() {
                return;
            }
            std::thread::sleep(self.settle_delay);
            watching.retain(|path, last| match FileStat::of(Path::new(path)) {
                Ok(now) if now != *last => {
                    *last = now;
                    true
                }
                _ => false,
            });
        }

        for path in watching.keys() {
            debug!(target: "index_sync::detector", path = %path, "file still changing, emitting anyway");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write;
    use notify_debouncer_full::notify::event::{Flag, RemoveKind};

    fn translator(root: &Path) -> Translator {
        let root_key = normalize_path(root, Path::new("/"));
        Translator {
            root: PathBuf::from(&root_key),
            filter: PathFilter::new(Path::new(&root_key), &["**/*.tmp".to_string()]).unwrap(),
            root_key,
            settle_attempts: 2,
            settle_delay: Duration::from_millis(5),
        }
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |ev, p| ev.add_path(PathBuf::from(p)))
    }

    #[test]
    fn create_modify_remove_map_to_change_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let t = translator(dir.path());
        let a = write(&t.root_key, "a.txt", "x");

        assert_eq!(
            t.translate(&event(EventKind::Create(CreateKind::File), &[&a])),
            vec![Detected::Change(a.clone(), ChangeKind::Created)]
        );
        assert_eq!(
            t.translate(&event(EventKind::Modify(ModifyKind::Any), &[&a])),
            vec![Detected::Change(a.clone(), ChangeKind::Modified)]
        );
        assert_eq!(
            t.translate(&event(EventKind::Remove(RemoveKind::File), &[&a])),
            vec![Detected::Change(a, ChangeKind::Deleted)]
        );
    }

    #[test]
    fn rename_becomes_delete_plus_create() {
        let dir = tempfile::tempdir().unwrap();
        let t = translator(dir.path());
        let to = write(&t.root_key, "new.txt", "x");
        let from = format!("{}/old.txt", t.root_key);

        let out = t.translate(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[&from, &to],
        ));
        assert_eq!(
            out,
            vec![
                Detected::Change(from, ChangeKind::Deleted),
                Detected::Change(to, ChangeKind::Created),
            ]
        );
    }

    #[test]
    fn new_directories_are_walked_and_excludes_apply() {
        let dir = tempfile::tempdir().unwrap();
        let t = translator(dir.path());
        write(&t.root_key, "sub/a.txt", "x");
        let sub = format!("{}/sub", t.root_key);
        let tmp = format!("{}/scratch.tmp", t.root_key);
        let hidden = format!("{}/.git/index", t.root_key);

        assert_eq!(
            t.translate(&event(EventKind::Create(CreateKind::Any), &[&sub])),
            vec![Detected::NewDir(PathBuf::from(&sub))]
        );
        assert!(t.translate(&event(EventKind::Create(CreateKind::File), &[&tmp])).is_empty());
        assert!(t.translate(&event(EventKind::Modify(ModifyKind::Any), &[&hidden])).is_empty());
    }

    #[test]
    fn root_removal_and_overflow_are_signals() {
        let dir = tempfile::tempdir().unwrap();
        let t = translator(dir.path());
        let root = t.root_key.clone();

        assert_eq!(
            t.translate(&event(EventKind::Remove(RemoveKind::Folder), &[&root])),
            vec![Detected::RootLost]
        );
        let overflow = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        assert_eq!(t.translate(&overflow), vec![Detected::Rescan]);
    }

    #[tokio::test]
    async fn handle_pushes_walked_files_and_reports_lost_root() {
        let dir = tempfile::tempdir().unwrap();
        let t = translator(dir.path());
        let a = write(&t.root_key, "sub/a.txt", "x");
        let b = write(&t.root_key, "sub/deep/b.txt", "y");
        let queue = EventQueue::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let sub = format!("{}/sub", t.root_key);
        let ev = notify_debouncer_full::DebouncedEvent {
            event: event(EventKind::Create(CreateKind::Folder), &[&sub]),
            time: std::time::Instant::now(),
        };
        t.handle(Ok(vec![ev]), &queue, &tx);
        assert_eq!(queue.len(), 2);
        assert!(rx.try_recv().is_err());

        let mut pushed = Vec::new();
        while !queue.is_empty() {
            let lease = queue.recv().await.unwrap();
            assert_eq!(lease.event().kind, ChangeKind::Created);
            pushed.push(lease.event().path.clone());
        }
        pushed.sort();
        assert_eq!(pushed, vec![a, b]);

        std::fs::remove_dir_all(dir.path()).unwrap();
        t.handle(Ok(Vec::new()), &queue, &tx);
        assert!(matches!(rx.try_recv(), Ok(DetectorSignal::Lost(_))));
    }

    #[tokio::test]
    async fn live_watch_emits_created_events() {
        let dir = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let root = normalize_path(dir.path(), Path::new("/"));
        let cfg = SyncConfig {
            watch_root: PathBuf::from(&root),
            state_path: state.path().join("r.json"),
            debounce: Duration::from_millis(50),
            settle_attempts: 1,
            settle_delay: Duration::from_millis(10),
            workers: 1,
            retry: crate::testing::fast_retry(),
            exclude: Vec::new(),
            manual_batch_max: 50,
        };
        let filter = PathFilter::new(&cfg.watch_root, &cfg.exclude).unwrap();
        let queue = EventQueue::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let _detector = ChangeDetector::start(&cfg, filter, Arc::clone(&queue), tx).unwrap();

        let a = write(&root, "a.txt", "hello");
        let lease = tokio::time::timeout(Duration::from_secs(10), queue.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lease.event().path, a);
        assert_ne!(lease.event().kind, ChangeKind::Deleted);
    }
}
