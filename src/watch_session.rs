//! One watched directory: an OS watch plus the worker thread that acts on it.
//!
//! # Architecture
//!
//! The [`notify`] callback is kept lightweight: it translates raw events into
//! [`PendingEvent`]s for files that arrived directly in the watched directory
//! and pushes them into a bounded channel with `try_send`, so a slow worker can
//! never block the notification thread. The worker thread owns the receiving
//! end and a [`SettleQueue`]; it blocks on the channel only until the next
//! settle deadline, then classifies and moves whatever is due.
//!
//! Stopping is cooperative. [`WatchSession::signal_stop`] raises a flag and
//! drops the OS watcher; the worker notices the flag between events (and at
//! least every [`STOP_POLL_INTERVAL`]), so it exits right after the move in
//! flight, if any. [`WatchSession::join`] waits for that.
//!
//! When the channel is full the callback parks the path in a small spillover
//! buffer instead of losing it; backend errors go there too. The worker drains
//! the buffer every cycle, reports it through the log and queues the parked
//! paths, so nothing the callback gives up on goes unreported.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use crate::config::CompiledFilters;
use crate::debounce::{PendingEvent, SettleQueue};
use crate::file_category::CategoryRules;
use crate::logging::LogSink;
use crate::mover::Mover;

/// Upper bound on how long the worker blocks before re-checking the stop flag.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Paths parked while the queue is full, beyond which arrivals are only counted.
pub const SPILL_LIMIT: usize = 4096;

/// How many parked file names a single overflow warning lists.
const LISTED_NAMES: usize = 10;

/// Errors that prevent a session from starting.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The directory does not exist.
    #[error("watched directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// The path exists but is not a directory.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The directory exists but cannot be inspected.
    #[error("cannot access {}: {source}", path.display())]
    Inaccessible { path: PathBuf, source: io::Error },

    /// The OS watch could not be established.
    #[error("failed to watch {}: {source}", path.display())]
    Watcher {
        path: PathBuf,
        source: notify::Error,
    },

    /// The worker thread could not be spawned.
    #[error("failed to start worker for {}: {source}", path.display())]
    Spawn { path: PathBuf, source: io::Error },
}

impl WatchError {
    /// True for configuration problems (the directory is simply not there),
    /// as opposed to failures to acquire a watch on a directory that exists.
    pub fn is_missing_directory(&self) -> bool {
        matches!(self, Self::DirectoryNotFound(_) | Self::NotADirectory(_))
    }
}

/// Everything a session needs besides its directory.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub rules: Arc<CategoryRules>,
    pub filters: Arc<CompiledFilters>,
    pub mover: Mover,
    pub log: LogSink,
    pub settle_delay: Duration,
    pub queue_capacity: usize,
    pub sweep_existing: bool,
}

/// What the notify callback could not hand to the worker.
#[derive(Debug, Default)]
struct Spillover {
    paths: Vec<PathBuf>,
    lost: usize,
    errors: Vec<String>,
}

impl Spillover {
    fn park(&mut self, path: PathBuf) {
        if self.paths.len() < SPILL_LIMIT {
            self.paths.push(path);
        } else {
            self.lost += 1;
        }
    }

    fn record_error(&mut self, error: String) {
        if self.errors.len() < SPILL_LIMIT {
            self.errors.push(error);
        }
    }
}

type SharedSpillover = Arc<Mutex<Spillover>>;

/// A running watch on one directory.
#[derive(Debug)]
pub struct WatchSession {
    directory: PathBuf,
    /// Kept alive to maintain the OS watch; dropping it releases the watch.
    watcher: Option<RecommendedWatcher>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl WatchSession {
    /// Starts watching `directory` (non-recursively).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing, is not a directory, or
    /// the OS watch or worker thread cannot be created. Nothing is left
    /// running in that case.
    pub fn start(directory: &Path, ctx: SessionContext) -> Result<Self, WatchError> {
        let directory = resolve_directory(directory)?;

        let (event_tx, event_rx) = mpsc::sync_channel(ctx.queue_capacity.max(1));
        let spill = SharedSpillover::default();
        let watcher = create_watcher(&directory, event_tx, Arc::clone(&spill))?;

        let backlog = if ctx.sweep_existing {
            existing_files(&directory, &ctx.log)
        } else {
            Vec::new()
        };

        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            queue: SettleQueue::new(ctx.settle_delay),
            directory: directory.clone(),
            events: event_rx,
            spill,
            stop: Arc::clone(&stop),
            ctx,
        };

        let thread_name = format!(
            "tidywatch:{}",
            directory
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker.run(backlog))
            .map_err(|e| WatchError::Spawn {
                path: directory.clone(),
                source: e,
            })?;

        debug!(watch_dir = %directory.display(), "Started watch session");

        Ok(Self {
            directory,
            watcher: Some(watcher),
            stop,
            worker: Some(handle),
        })
    }

    /// The canonical path of the watched directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Asks the worker to finish and releases the OS watch. Does not wait.
    pub fn signal_stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.watcher.take();
    }

    /// Waits for the worker to exit. Call [`signal_stop`](Self::signal_stop)
    /// first or this blocks until the event source goes away.
    pub fn join(mut self) {
        self.join_worker();
    }

    /// Signals and joins in one step.
    pub fn stop(mut self) {
        self.signal_stop();
        self.join_worker();
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            error!(watch_dir = %self.directory.display(), "Watch worker panicked");
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.signal_stop();
        self.join_worker();
    }
}

/// Checks that `directory` is an existing directory and canonicalizes it.
pub fn resolve_directory(directory: &Path) -> Result<PathBuf, WatchError> {
    let meta = fs::metadata(directory).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            WatchError::DirectoryNotFound(directory.to_path_buf())
        } else {
            WatchError::Inaccessible {
                path: directory.to_path_buf(),
                source: e,
            }
        }
    })?;
    if !meta.is_dir() {
        return Err(WatchError::NotADirectory(directory.to_path_buf()));
    }
    fs::canonicalize(directory).map_err(|e| WatchError::Inaccessible {
        path: directory.to_path_buf(),
        source: e,
    })
}

/// Creates the notify watcher with a callback that only filters and queues.
fn create_watcher(
    directory: &Path,
    event_tx: SyncSender<PendingEvent>,
    spill: SharedSpillover,
) -> Result<RecommendedWatcher, WatchError> {
    let watch_error = |e: notify::Error| WatchError::Watcher {
        path: directory.to_path_buf(),
        source: e,
    };

    let callback_dir = directory.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            handle_notify_event(res, &callback_dir, &event_tx, &spill)
        },
        Config::default(),
    )
    .map_err(watch_error)?;

    watcher
        .watch(directory, RecursiveMode::NonRecursive)
        .map_err(watch_error)?;

    Ok(watcher)
}

fn handle_notify_event(
    res: notify::Result<Event>,
    directory: &Path,
    event_tx: &SyncSender<PendingEvent>,
    spill: &Mutex<Spillover>,
) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(watch_dir = %directory.display(), error = %e, "File watcher error");
            lock_spill(spill).record_error(e.to_string());
            return;
        }
    };

    trace!(kind = ?event.kind, paths = ?event.paths, "Received notify event");

    for pending in arrivals(&event, directory) {
        match event_tx.try_send(pending) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!(path = %dropped.path.display(), "Event queue full, parking event");
                lock_spill(spill).park(dropped.path);
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

fn lock_spill(spill: &Mutex<Spillover>) -> std::sync::MutexGuard<'_, Spillover> {
    spill.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Translates a raw notify event into arrivals in `directory`.
///
/// Only creations and renames whose destination is directly inside the
/// watched directory count. Folder creations are ignored here; other
/// directory events are filtered later, when the path is inspected.
fn arrivals(event: &Event, directory: &Path) -> Vec<PendingEvent> {
    let candidates: Vec<PendingEvent> = match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|path| PendingEvent::created(path.clone()))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event
            .paths
            .get(1)
            .map(|to| vec![PendingEvent::moved_into(to.clone())])
            .unwrap_or_default(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any)) => event
            .paths
            .iter()
            .map(|path| PendingEvent::moved_into(path.clone()))
            .collect(),
        _ => Vec::new(),
    };

    candidates
        .into_iter()
        .filter(|pending| pending.path.parent() == Some(directory))
        .collect()
}

/// Regular files already present in `directory`, for the initial sweep.
fn existing_files(directory: &Path, log: &LogSink) -> Vec<PathBuf> {
    match fs::read_dir(directory) {
        Ok(entries) => entries
            .flatten()
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.path())
            .collect(),
        Err(e) => {
            log.warning(format!(
                "could not list existing files in {}: {}",
                directory.display(),
                e
            ));
            Vec::new()
        }
    }
}

struct Worker {
    queue: SettleQueue,
    directory: PathBuf,
    events: Receiver<PendingEvent>,
    spill: SharedSpillover,
    stop: Arc<AtomicBool>,
    ctx: SessionContext,
}

impl Worker {
    fn run(mut self, backlog: Vec<PathBuf>) {
        debug!(
            watch_dir = %self.directory.display(),
            settle_ms = self.queue.delay().as_millis() as u64,
            backlog = backlog.len(),
            "Watch worker running"
        );
        let now = Instant::now();
        for path in backlog {
            self.queue.push(PendingEvent::created(path), now);
        }

        'session: loop {
            self.report_spillover();
            for pending in self.queue.pop_due(Instant::now()) {
                if self.stopping() {
                    break 'session;
                }
                self.handle(pending);
            }
            if self.stopping() {
                break;
            }

            let timeout = self
                .queue
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .map_or(STOP_POLL_INTERVAL, |wait| wait.min(STOP_POLL_INTERVAL));

            match self.events.recv_timeout(timeout) {
                Ok(pending) => self.queue.push(pending, Instant::now()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if !self.stopping() {
                        warn!(watch_dir = %self.directory.display(), "Event source closed");
                        self.ctx.log.error(format!(
                            "stopped watching {}: event source closed",
                            self.directory.display()
                        ));
                    }
                    break;
                }
            }
        }

        let dropped = self.queue.clear();
        debug!(
            watch_dir = %self.directory.display(),
            dropped,
            "Watch session stopped"
        );
    }

    /// Reports what the callback parked and queues the parked paths.
    fn report_spillover(&mut self) {
        let Spillover {
            paths,
            lost,
            errors,
        } = std::mem::take(&mut *lock_spill(&self.spill));
        let dir = self.directory.display();

        for error in errors {
            self.ctx
                .log
                .error(format!("file watcher error in {}: {}", dir, error));
        }

        if !paths.is_empty() {
            let mut names: Vec<String> = paths
                .iter()
                .take(LISTED_NAMES)
                .map(|path| path.file_name().unwrap_or_default().to_string_lossy().into_owned())
                .collect();
            if paths.len() > LISTED_NAMES {
                names.push(format!("and {} more", paths.len() - LISTED_NAMES));
            }
            self.ctx.log.warning(format!(
                "event queue full in {}, organizing late: {}",
                dir,
                names.join(", ")
            ));

            let now = Instant::now();
            for path in paths {
                self.queue.push(PendingEvent::created(path), now);
            }
        }

        if lost > 0 {
            self.ctx.log.error(format!(
                "event queue overflowed in {}: {} arrivals were dropped and stay unorganized",
                dir, lost
            ));
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn handle(&self, pending: PendingEvent) {
        let path = &pending.path;
        if !self.ctx.filters.should_include(path) {
            debug!(path = %path.display(), "Ignored by filters");
            return;
        }

        let category = self.ctx.rules.classify_path(path);
        let destination = self.directory.join(category);
        trace!(path = %path.display(), kind = ?pending.kind, category, "Organizing");
        self.ctx
            .mover
            .move_file(path, &destination, category, &self.ctx.log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debounce::ArrivalKind;
    use crate::logging::{LogLevel, LogRecord};
    use crate::mover::DirLocks;
    use notify::event::RemoveKind;
    use tempfile::TempDir;

    fn context(log: LogSink, sweep_existing: bool) -> SessionContext {
        SessionContext {
            rules: Arc::new(
                CategoryRules::from_pairs("Others", [("Images", vec![".png"])]).unwrap(),
            ),
            filters: Arc::new(CompiledFilters::allow_all()),
            mover: Mover::new(Arc::new(DirLocks::new())),
            log,
            settle_delay: Duration::from_millis(50),
            queue_capacity: 16,
            sweep_existing,
        }
    }

    fn capture() -> (LogSink, Arc<Mutex<Vec<LogRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let records = Arc::clone(&records);
            LogSink::new(move |r| records.lock().unwrap().push(r.clone()))
        };
        (sink, records)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        condition()
    }

    #[test]
    fn test_arrivals_created_file() {
        let dir = Path::new("/w");
        let event = Event::new(EventKind::Create(CreateKind::File)).add_path("/w/a.png".into());
        assert_eq!(arrivals(&event, dir), vec![PendingEvent::created("/w/a.png")]);
    }

    #[test]
    fn test_arrivals_ignores_folders_and_other_kinds() {
        let dir = Path::new("/w");
        let folder = Event::new(EventKind::Create(CreateKind::Folder)).add_path("/w/Images".into());
        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/w/a.png".into());
        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path("/w/a.png".into());

        assert!(arrivals(&folder, dir).is_empty());
        assert!(arrivals(&removed, dir).is_empty());
        assert!(arrivals(&from, dir).is_empty());
    }

    #[test]
    fn test_arrivals_rename_uses_destination() {
        let dir = Path::new("/w");
        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/w/a.png.part".into())
            .add_path("/w/a.png".into());

        let due = arrivals(&both, dir);
        assert_eq!(due, vec![PendingEvent::moved_into("/w/a.png")]);
        assert_eq!(due[0].kind, ArrivalKind::MovedInto);
    }

    #[test]
    fn test_arrivals_outside_directory_are_dropped() {
        let dir = Path::new("/w");
        let moved_out = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/w/a.png".into())
            .add_path("/elsewhere/a.png".into());
        let nested = Event::new(EventKind::Create(CreateKind::File))
            .add_path("/w/Images/a.png".into());

        assert!(arrivals(&moved_out, dir).is_empty());
        assert!(arrivals(&nested, dir).is_empty());
    }

    #[test]
    fn test_full_queue_parks_arrivals_instead_of_dropping() {
        let dir = Path::new("/w");
        let (tx, rx) = mpsc::sync_channel(1);
        let spill = Mutex::new(Spillover::default());

        for name in ["a.png", "b.png", "c.png"] {
            let event = Event::new(EventKind::Create(CreateKind::File))
                .add_path(dir.join(name));
            handle_notify_event(Ok(event), dir, &tx, &spill);
        }

        assert_eq!(rx.try_recv().unwrap(), PendingEvent::created("/w/a.png"));
        let spill = spill.into_inner().unwrap();
        assert_eq!(
            spill.paths,
            vec![PathBuf::from("/w/b.png"), PathBuf::from("/w/c.png")]
        );
        assert_eq!(spill.lost, 0);
    }

    #[test]
    fn test_backend_errors_are_kept_for_the_log() {
        let (tx, _rx) = mpsc::sync_channel(1);
        let spill = Mutex::new(Spillover::default());

        handle_notify_event(
            Err(notify::Error::generic("inotify queue overflow")),
            Path::new("/w"),
            &tx,
            &spill,
        );

        let spill = spill.into_inner().unwrap();
        assert_eq!(spill.errors.len(), 1);
        assert!(spill.errors[0].contains("inotify queue overflow"));
    }

    #[test]
    fn test_spillover_counts_beyond_limit() {
        let mut spill = Spillover::default();
        for i in 0..SPILL_LIMIT + 3 {
            spill.park(PathBuf::from(format!("/w/{}.png", i)));
        }
        assert_eq!(spill.paths.len(), SPILL_LIMIT);
        assert_eq!(spill.lost, 3);
    }

    #[test]
    fn test_start_missing_directory_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let missing = temp_dir.path().join("nope");

        let result = WatchSession::start(&missing, context(LogSink::silent(), false));
        let err = result.expect_err("missing directory must not start");
        assert!(err.is_missing_directory());
    }

    #[test]
    fn test_start_on_file_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let file = temp_dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();

        let result = WatchSession::start(&file, context(LogSink::silent(), false));
        assert!(matches!(result, Err(WatchError::NotADirectory(_))));
    }

    #[test]
    fn test_session_moves_new_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let (sink, records) = capture();
        let session = WatchSession::start(temp_dir.path(), context(sink, false))
            .expect("Failed to start session");

        fs::write(temp_dir.path().join("photo.png"), "png").unwrap();
        let target = temp_dir.path().join("Images").join("photo.png");
        assert!(wait_for(|| target.exists()), "file was not organized");

        session.stop();
        assert!(!temp_dir.path().join("photo.png").exists());
        let records = records.lock().unwrap();
        assert!(records.iter().any(|r| r.level == LogLevel::Success));
    }

    #[test]
    fn test_sweep_existing_organizes_backlog() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::write(temp_dir.path().join("old.png"), "png").unwrap();
        fs::write(temp_dir.path().join("notes"), "txt").unwrap();

        let session = WatchSession::start(temp_dir.path(), context(LogSink::silent(), true))
            .expect("Failed to start session");

        let image = temp_dir.path().join("Images").join("old.png");
        let other = temp_dir.path().join("Others").join("notes");
        assert!(wait_for(|| image.exists() && other.exists()));
        session.stop();
    }

    #[test]
    fn test_stop_returns_promptly_and_discards_pending() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ctx = context(LogSink::silent(), false);
        ctx.settle_delay = Duration::from_secs(30);
        let session = WatchSession::start(temp_dir.path(), ctx).expect("Failed to start session");

        fs::write(temp_dir.path().join("late.png"), "png").unwrap();
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        session.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(temp_dir.path().join("late.png").exists());
    }
}
