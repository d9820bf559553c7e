//! Lifecycle of a set of watch sessions.
//!
//! A [`MonitorManager`] owns one [`WatchSession`] per watched directory, the
//! shared destination locks and the log callback. It is either idle or
//! running; `start` while running is a no-op, and `stop` while idle is too.
//! Directories that do not exist are reported once through the log and
//! skipped, so a misconfigured entry never prevents the others from being
//! watched.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::{CompiledFilters, DEFAULT_QUEUE_CAPACITY, FilterRules};
use crate::debounce::DEFAULT_SETTLE_MS;
use crate::file_category::CategoryRules;
use crate::logging::{LogRecord, LogSink};
use crate::mover::{DirLocks, Mover};
use crate::watch_session::{SessionContext, WatchSession, resolve_directory};

/// Tunables shared by every session a manager starts.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// How long an event must stay quiet before its file is organized.
    pub settle_delay: Duration,
    /// Capacity of each session's event channel.
    pub queue_capacity: usize,
    /// Organize files already present when a session starts.
    pub sweep_existing: bool,
    /// Log intended moves without touching the filesystem.
    pub dry_run: bool,
    pub filters: Arc<CompiledFilters>,
}

impl Default for WatchSettings {
    fn default() -> Self {
        let filters = CompiledFilters::new(&FilterRules::default())
            .unwrap_or_else(|_| CompiledFilters::allow_all());
        Self {
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_MS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sweep_existing: false,
            dry_run: false,
            filters: Arc::new(filters),
        }
    }
}

/// Starts, stops and restarts watch sessions over a list of directories.
///
/// # Example
///
/// ```no_run
/// use tidywatch::{CategoryRules, MonitorManager};
///
/// let mut manager = MonitorManager::new(|record| println!("{}", record));
/// manager.start(&["/home/me/Downloads"], CategoryRules::default());
/// assert!(manager.is_running());
/// manager.stop();
/// ```
#[derive(Debug)]
pub struct MonitorManager {
    log: LogSink,
    settings: WatchSettings,
    locks: Arc<DirLocks>,
    sessions: Vec<WatchSession>,
    running: bool,
}

impl MonitorManager {
    /// Creates an idle manager that reports through `logger`.
    pub fn new<F>(logger: F) -> Self
    where
        F: FnMut(&LogRecord) + Send + 'static,
    {
        Self::with_sink(LogSink::new(logger), WatchSettings::default())
    }

    /// Creates an idle manager with explicit settings.
    pub fn with_settings<F>(logger: F, settings: WatchSettings) -> Self
    where
        F: FnMut(&LogRecord) + Send + 'static,
    {
        Self::with_sink(LogSink::new(logger), settings)
    }

    pub fn with_sink(log: LogSink, settings: WatchSettings) -> Self {
        Self {
            log,
            settings,
            locks: Arc::new(DirLocks::new()),
            sessions: Vec::new(),
            running: false,
        }
    }

    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    /// Begins watching `directories`, classifying arrivals with `rules`.
    ///
    /// Missing directories produce one warning each and are skipped.
    /// Directories that resolve to the same location are watched once. The
    /// manager enters the running state even if no directory could be
    /// watched. Calling this while already running does nothing.
    pub fn start<P: AsRef<Path>>(&mut self, directories: &[P], rules: CategoryRules) {
        if self.running {
            debug!("start ignored, already running");
            return;
        }

        let rules = Arc::new(rules);
        let mover = Mover::new(Arc::clone(&self.locks)).with_dry_run(self.settings.dry_run);
        let mut seen: HashSet<PathBuf> = HashSet::new();

        for directory in directories {
            let directory = directory.as_ref();
            let canonical = match resolve_directory(directory) {
                Ok(canonical) => canonical,
                Err(e) if e.is_missing_directory() => {
                    self.log.warning(format!(
                        "watched directory not found: {}",
                        directory.display()
                    ));
                    continue;
                }
                Err(e) => {
                    self.log.error(e.to_string());
                    continue;
                }
            };

            if !seen.insert(canonical.clone()) {
                self.log.warning(format!(
                    "directory listed more than once, watching it once: {}",
                    directory.display()
                ));
                continue;
            }

            let ctx = SessionContext {
                rules: Arc::clone(&rules),
                filters: Arc::clone(&self.settings.filters),
                mover: mover.clone(),
                log: self.log.clone(),
                settle_delay: self.settings.settle_delay,
                queue_capacity: self.settings.queue_capacity,
                sweep_existing: self.settings.sweep_existing,
            };

            match WatchSession::start(&canonical, ctx) {
                Ok(session) => {
                    self.log.info(format!("watching {}", canonical.display()));
                    self.sessions.push(session);
                }
                Err(e) if e.is_missing_directory() => {
                    self.log.warning(format!(
                        "watched directory not found: {}",
                        directory.display()
                    ));
                }
                Err(e) => self.log.error(e.to_string()),
            }
        }

        self.running = true;
        if mover.is_dry_run() {
            self.log.info("monitoring started (dry run)");
        } else {
            self.log.info("monitoring started");
        }
    }

    /// Stops every session and waits for their workers to finish.
    ///
    /// A move already in progress completes; events still settling are
    /// dropped. Calling this while idle does nothing.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }

        for session in &mut self.sessions {
            session.signal_stop();
        }
        for session in self.sessions.drain(..) {
            session.join();
        }

        self.running = false;
        self.log.info("monitoring stopped");
    }

    /// Stops, then starts again with a new directory list and rules.
    pub fn restart<P: AsRef<Path>>(&mut self, directories: &[P], rules: CategoryRules) {
        self.stop();
        self.start(directories, rules);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Canonical paths of the directories currently being watched.
    pub fn watched_directories(&self) -> Vec<&Path> {
        self.sessions.iter().map(WatchSession::directory).collect()
    }
}

impl Drop for MonitorManager {
    fn drop(&mut self) {
        self.stop();
    }
}
