//! tidywatch - keep watched folders tidy as files arrive
//!
//! This library watches directories for newly created or moved-in files,
//! waits for them to settle, classifies them by extension and moves them into
//! category subdirectories, picking a collision-free name when needed. A
//! single log callback receives every record from every watched directory.

pub mod cli;
pub mod config;
pub mod debounce;
pub mod disambiguate;
pub mod file_category;
pub mod logging;
pub mod monitor;
pub mod mover;
pub mod output;
pub mod watch_session;

pub use config::{CompiledFilters, Config, ConfigError};
pub use file_category::{Category, CategoryRules, RulesError};
pub use logging::{LogLevel, LogRecord, LogSink};
pub use monitor::{MonitorManager, WatchSettings};
pub use mover::{MoveError, MoveOutcome, Mover};
pub use watch_session::WatchError;
