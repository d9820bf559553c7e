//! Console rendering of the log stream.
//!
//! [`OutputFormatter`] styles individual lines; [`ConsoleLog`] turns the
//! monitor's [`LogRecord`]s into timestamped lines printed above a status
//! spinner, and keeps the spinner's counters current.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

use crate::logging::{LogLevel, LogRecord};

/// Timestamp prefix used for every console line.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Consistent styling for CLI output.
///
/// - Success messages (green with ✓)
/// - Error messages (red with ✗)
/// - Warning messages (yellow with ⚠)
/// - Info messages (cyan)
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tidywatch::output::OutputFormatter;
    /// OutputFormatter::success("Wrote default configuration");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    /// Formats one log record with its timestamp, e.g.
    /// `[2024-05-01 12:00:00] ✓ photo.png → Images`.
    pub fn format_record(record: &LogRecord, at: DateTime<Local>) -> String {
        let stamp = format!("[{}]", at.format(TIMESTAMP_FORMAT)).dimmed();
        let body = match record.level {
            LogLevel::Success => format!("{} {}", "✓".green(), record.message),
            LogLevel::Warning => format!("{} {}", "⚠".yellow(), record.message.yellow()),
            LogLevel::Error => format!("{} {}", "✗".red(), record.message.red()),
            LogLevel::Info => record.message.cyan().to_string(),
        };
        format!("{} {}", stamp, body)
    }

    /// Creates the status spinner shown while watching.
    pub fn create_spinner() -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            spinner.set_style(style);
        }
        spinner
    }
}

/// Renders log records to the terminal.
///
/// Cloning is cheap; all clones share the spinner and counters.
#[derive(Clone)]
pub struct ConsoleLog {
    spinner: ProgressBar,
    watching: Arc<AtomicUsize>,
    organized: Arc<AtomicUsize>,
}

impl ConsoleLog {
    pub fn new() -> Self {
        Self::with_spinner(OutputFormatter::create_spinner())
    }

    fn with_spinner(spinner: ProgressBar) -> Self {
        let console = Self {
            spinner,
            watching: Arc::new(AtomicUsize::new(0)),
            organized: Arc::new(AtomicUsize::new(0)),
        };
        console.refresh();
        console
    }

    /// A logger callback suitable for [`crate::MonitorManager::new`].
    pub fn logger(&self) -> impl FnMut(&LogRecord) + Send + 'static {
        let console = self.clone();
        move |record| console.print(record)
    }

    pub fn print(&self, record: &LogRecord) {
        let line = OutputFormatter::format_record(record, Local::now());
        if self.spinner.is_hidden() {
            match record.level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", line),
                LogLevel::Info | LogLevel::Success => println!("{}", line),
            }
        } else {
            self.spinner.println(line);
        }

        if record.level == LogLevel::Success {
            self.organized.fetch_add(1, Ordering::Relaxed);
            self.refresh();
        }
    }

    /// Records how many directories are being watched and starts ticking.
    pub fn set_watching(&self, directories: usize) {
        self.watching.store(directories, Ordering::Relaxed);
        self.refresh();
        self.spinner.enable_steady_tick(Duration::from_millis(120));
    }

    pub fn organized(&self) -> usize {
        self.organized.load(Ordering::Relaxed)
    }

    /// Clears the spinner and prints a final summary line.
    pub fn finish(&self) {
        self.spinner.finish_and_clear();
        let organized = self.organized();
        OutputFormatter::info(&format!(
            "organized {} {}",
            organized,
            if organized == 1 { "file" } else { "files" }
        ));
    }

    fn refresh(&self) {
        self.spinner.set_message(status_line(
            self.watching.load(Ordering::Relaxed),
            self.organized(),
        ));
    }
}

impl Default for ConsoleLog {
    fn default() -> Self {
        Self::new()
    }
}

fn status_line(watching: usize, organized: usize) -> String {
    format!(
        "watching {} {}, {} {} organized (Ctrl+C to stop)",
        watching,
        if watching == 1 { "directory" } else { "directories" },
        organized,
        if organized == 1 { "file" } else { "files" }
    )
}
