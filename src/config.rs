//! Settings file and ignore filters.
//!
//! Configuration is read once at startup and is immutable for the duration of
//! a monitoring run. TOML is the native format; a file with a `.json`
//! extension is read as JSON with the same structure.
//!
//! # Configuration File Format
//!
//! ```toml
//! directories = ["/home/me/Downloads"]
//! settle_ms = 250
//! fallback = "Others"
//! sweep_existing = false
//! dry_run = false
//! queue_capacity = 1024
//!
//! [[categories]]
//! name = "Images"
//! extensions = [".jpg", ".png"]
//!
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = ["desktop.ini"]
//! patterns = ["~$*"]
//! extensions = ["part", "crdownload", "tmp"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//! ```
//!
//! Every field is optional; omitted fields take the built-in defaults. A
//! `[[categories]]` list, when present, replaces the default table entirely.

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::debounce::DEFAULT_SETTLE_MS;
use crate::file_category::{self, CategoryRules, RulesError};
use crate::monitor::WatchSettings;

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".tidywatch.toml";

/// Default capacity of each session's event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// Invalid TOML/JSON syntax or structure.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A category name cannot be used as a folder name.
    #[error(transparent)]
    InvalidCategory(#[from] RulesError),

    /// Invalid glob pattern provided.
    #[error("invalid glob pattern '{0}'")]
    InvalidGlobPattern(String),

    /// Invalid regex pattern provided with the actual error reason.
    #[error("invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern {
        /// The regex pattern that failed to compile.
        pattern: String,
        /// The reason why the pattern is invalid.
        reason: String,
    },

    /// The settle delay or queue capacity is zero.
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    /// Refused to overwrite an existing file.
    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),

    /// IO error while reading or writing configuration.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Complete monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directories to watch (non-recursively).
    pub directories: Vec<PathBuf>,

    /// Delay in milliseconds between an event and acting on it.
    pub settle_ms: u64,

    /// Category for extensions no rule matches.
    pub fallback: String,

    /// Organize files already present when a session starts.
    pub sweep_existing: bool,

    /// Only report what would be moved.
    pub dry_run: bool,

    /// Capacity of each session's event queue.
    pub queue_capacity: usize,

    /// Category rules in lookup order.
    pub categories: Vec<CategoryConfig>,

    /// Files that are never moved.
    pub filters: FilterRules,
}

/// One `[[categories]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// Root-level filter rules configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether to include hidden files (starting with "."). Defaults to false.
    #[serde(default = "default_enable_hidden_files")]
    pub enable_hidden_files: bool,

    /// Rules for excluding files.
    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Rules for including files (whitelist, overrides exclude rules).
    #[serde(default)]
    pub include: IncludeRules,
}

/// Helper function for default value of `enable_hidden_files`.
fn default_enable_hidden_files() -> bool {
    false
}

/// Rules for excluding files from organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact filenames to exclude (e.g., "desktop.ini", "Thumbs.db").
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns matched against the file name (e.g., "~$*").
    #[serde(default)]
    pub patterns: Vec<String>,

    /// File extensions to exclude, with or without the dot (e.g., "part").
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regex patterns matched against the file name.
    #[serde(default)]
    pub regex: Vec<String>,
}

impl Default for ExcludeRules {
    /// Partial downloads and editor lock files.
    fn default() -> Self {
        Self {
            filenames: vec!["desktop.ini".to_string(), "Thumbs.db".to_string()],
            patterns: vec!["~$*".to_string()],
            extensions: ["part", "partial", "crdownload", "download", "tmp"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            regex: Vec::new(),
        }
    }
}

/// Rules for including files, overriding exclude rules (whitelist).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeRules {
    /// Glob patterns that override exclude rules.
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            enable_hidden_files: default_enable_hidden_files(),
            exclude: ExcludeRules::default(),
            include: IncludeRules::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directories: default_directories(),
            settle_ms: DEFAULT_SETTLE_MS,
            fallback: file_category::DEFAULT_FALLBACK.to_string(),
            sweep_existing: false,
            dry_run: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            categories: file_category::default_table()
                .iter()
                .map(|(name, extensions)| CategoryConfig {
                    name: name.to_string(),
                    extensions: extensions.iter().map(|e| e.to_string()).collect(),
                })
                .collect(),
            filters: FilterRules::default(),
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn default_directories() -> Vec<PathBuf> {
    home_dir()
        .map(|home| vec![home.join("Downloads")])
        .unwrap_or_default()
}

impl Config {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.tidywatch.toml` in the current directory
    /// 3. Look for `~/.config/tidywatch/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but
    /// cannot be read, or if any file found is malformed.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(home_config) = Self::user_config_path()
            && home_config.exists()
        {
            return Self::load_from_file(&home_config);
        }

        Ok(Self::default())
    }

    /// `~/.config/tidywatch/config.toml`, if a home directory is known.
    pub fn user_config_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".config").join("tidywatch").join("config.toml"))
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if file does not exist.
    /// Returns `ConfigError::ConfigInvalid` if parsing fails.
    /// Returns `ConfigError::Io` if file cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        if is_json(path) {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Serializes the configuration in the format implied by `path`.
    pub fn render(&self, path: &Path) -> Result<String, ConfigError> {
        if is_json(path) {
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
        } else {
            toml::to_string_pretty(self).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
        }
    }

    /// Writes the default configuration to `path`. Never overwrites.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::AlreadyExists` if the file is already there.
    pub fn write_default(path: &Path) -> Result<(), ConfigError> {
        let content = Self::default().render(path)?;
        let io_error = |e: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    ConfigError::AlreadyExists(path.to_path_buf())
                } else {
                    io_error(e)
                }
            })?;
        file.write_all(content.as_bytes()).map_err(io_error)
    }

    /// Builds the category table.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidCategory` for unusable category names.
    pub fn rules(&self) -> Result<CategoryRules, ConfigError> {
        let pairs = self
            .categories
            .iter()
            .map(|category| (category.name.as_str(), category.extensions.iter()));
        Ok(CategoryRules::from_pairs(&self.fallback, pairs)?)
    }

    /// Compiles the ignore filters.
    ///
    /// # Errors
    ///
    /// Returns an error if any regex or glob patterns are invalid.
    pub fn compile_filters(&self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(&self.filters)
    }

    /// Session settings derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid filters or a zero delay/capacity.
    pub fn watch_settings(&self) -> Result<WatchSettings, ConfigError> {
        if self.settle_ms == 0 {
            return Err(ConfigError::ZeroValue("settle_ms"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroValue("queue_capacity"));
        }
        Ok(WatchSettings {
            settle_delay: Duration::from_millis(self.settle_ms),
            queue_capacity: self.queue_capacity,
            sweep_existing: self.sweep_existing,
            dry_run: self.dry_run,
            filters: Arc::new(self.compile_filters()?),
        })
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
        })
        .collect()
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Compiled, optimized filter structures for efficient file matching.
///
/// All patterns are parsed once; matching a file is then linear in the
/// number of rules. Patterns and regexes see only the file name, since
/// watching is never recursive.
#[derive(Debug)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    /// Create compiled filters from filter rules.
    ///
    /// # Errors
    ///
    /// Returns an error if any glob or regex patterns are invalid.
    pub fn new(rules: &FilterRules) -> Result<Self, ConfigError> {
        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.iter().cloned().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns: compile_globs(&rules.exclude.patterns)?,
            exclude_regexes,
            include_patterns: compile_globs(&rules.include.patterns)?,
        })
    }

    /// Filters that let every file through.
    pub fn allow_all() -> Self {
        Self {
            enable_hidden_files: true,
            exclude_filenames: HashSet::new(),
            exclude_extensions: HashSet::new(),
            exclude_patterns: Vec::new(),
            exclude_regexes: Vec::new(),
            include_patterns: Vec::new(),
        }
    }

    /// Check if a file should be organized (not ignored).
    ///
    /// Checks are performed in this order, with early termination:
    /// 1. Include patterns (whitelist) - if matched, always include
    /// 2. Hidden file filter - if hidden and disabled, exclude
    /// 3. Exact filename match - if matched, exclude
    /// 4. File extension match - if matched, exclude
    /// 5. Glob pattern match - if matched, exclude
    /// 6. Regex pattern match - if matched, exclude
    /// 7. Default: include
    pub fn should_include(&self, file_path: &Path) -> bool {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self.matches_any(&self.include_patterns, &file_name) {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = file_path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.exclude_extensions.contains(&ext_lower) {
                return false;
            }
        }

        if self.matches_any(&self.exclude_patterns, &file_name) {
            return false;
        }

        !self
            .exclude_regexes
            .iter()
            .any(|regex| regex.is_match(&file_name))
    }

    fn matches_any(&self, patterns: &[Pattern], file_name: &str) -> bool {
        patterns.iter().any(|pattern| pattern.matches(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules_with(exclude: ExcludeRules, include: IncludeRules, hidden: bool) -> FilterRules {
        FilterRules {
            enable_hidden_files: hidden,
            exclude,
            include,
        }
    }

    fn empty_exclude() -> ExcludeRules {
        ExcludeRules {
            filenames: Vec::new(),
            patterns: Vec::new(),
            extensions: Vec::new(),
            regex: Vec::new(),
        }
    }

    #[test]
    fn test_default_config_hides_hidden_files() {
        let config = Config::default();
        assert!(!config.filters.enable_hidden_files);
        let compiled = config.compile_filters().unwrap();
        assert!(!compiled.should_include(Path::new(".DS_Store")));
        assert!(!compiled.should_include(Path::new("/w/.gitignore")));
    }

    #[test]
    fn test_default_filters_skip_partial_downloads() {
        let compiled = Config::default().compile_filters().unwrap();

        assert!(!compiled.should_include(Path::new("/w/movie.mkv.part")));
        assert!(!compiled.should_include(Path::new("/w/setup.exe.crdownload")));
        assert!(!compiled.should_include(Path::new("/w/file.TMP")));
        assert!(!compiled.should_include(Path::new("/w/~$report.docx")));
        assert!(!compiled.should_include(Path::new("/w/desktop.ini")));
        assert!(compiled.should_include(Path::new("/w/movie.mkv")));
        assert!(compiled.should_include(Path::new("/w/report.docx")));
    }

    #[test]
    fn test_hidden_file_included_when_enabled() {
        let rules = rules_with(empty_exclude(), IncludeRules::default(), true);
        let compiled = CompiledFilters::new(&rules).unwrap();

        assert!(compiled.should_include(Path::new(".DS_Store")));
    }

    #[test]
    fn test_exclude_extensions_with_or_without_dot() {
        let exclude = ExcludeRules {
            extensions: vec!["bak".to_string(), ".TMP".to_string()],
            ..empty_exclude()
        };
        let compiled =
            CompiledFilters::new(&rules_with(exclude, IncludeRules::default(), true)).unwrap();

        assert!(!compiled.should_include(Path::new("file.bak")));
        assert!(!compiled.should_include(Path::new("file.tmp")));
        assert!(!compiled.should_include(Path::new("file.BAK")));
        assert!(compiled.should_include(Path::new("file.txt")));
    }

    #[test]
    fn test_glob_patterns_match_file_name_only() {
        let exclude = ExcludeRules {
            patterns: vec!["*.cache".to_string(), "[0-9]*.log".to_string()],
            ..empty_exclude()
        };
        let compiled =
            CompiledFilters::new(&rules_with(exclude, IncludeRules::default(), true)).unwrap();

        assert!(!compiled.should_include(Path::new("/home/me/Downloads/file.cache")));
        assert!(!compiled.should_include(Path::new("/home/me/Downloads/1app.log")));
        assert!(compiled.should_include(Path::new("/home/me/Downloads/app.log")));
    }

    #[test]
    fn test_include_overrides_exclude() {
        let include = IncludeRules {
            patterns: vec![".important".to_string()],
        };
        let compiled = CompiledFilters::new(&rules_with(empty_exclude(), include, false)).unwrap();

        assert!(compiled.should_include(Path::new("/w/.important")));
        assert!(!compiled.should_include(Path::new("/w/.other")));
    }

    #[test]
    fn test_exclude_regex() {
        let exclude = ExcludeRules {
            regex: vec![r"^test_.*\.txt$".to_string()],
            ..empty_exclude()
        };
        let compiled =
            CompiledFilters::new(&rules_with(exclude, IncludeRules::default(), true)).unwrap();

        assert!(!compiled.should_include(Path::new("/w/test_file.txt")));
        assert!(compiled.should_include(Path::new("/w/file.txt")));
    }

    #[test]
    fn test_invalid_patterns_return_error() {
        let bad_regex = ExcludeRules {
            regex: vec!["[invalid(".to_string()],
            ..empty_exclude()
        };
        let result = CompiledFilters::new(&rules_with(bad_regex, IncludeRules::default(), true));
        assert!(matches!(result, Err(ConfigError::InvalidRegexPattern { .. })));

        let bad_glob = ExcludeRules {
            patterns: vec!["[invalid".to_string()],
            ..empty_exclude()
        };
        let result = CompiledFilters::new(&rules_with(bad_glob, IncludeRules::default(), true));
        assert!(matches!(result, Err(ConfigError::InvalidGlobPattern(_))));
    }

    #[test]
    fn test_allow_all_lets_everything_through() {
        let compiled = CompiledFilters::allow_all();
        assert!(compiled.should_include(Path::new("/w/.hidden")));
        assert!(compiled.should_include(Path::new("/w/a.part")));
    }

    #[test]
    fn test_parse_toml_keeps_category_order() {
        let config = Config::from_toml_str(
            r#"
            directories = ["/data/inbox"]
            settle_ms = 100
            fallback = "Outros"

            [[categories]]
            name = "Imagens"
            extensions = [".jpg", "PNG"]

            [[categories]]
            name = "Documentos"
            extensions = [".pdf"]
            "#,
        )
        .unwrap();

        assert_eq!(config.directories, vec![PathBuf::from("/data/inbox")]);
        assert_eq!(config.settle_ms, 100);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);

        let rules = config.rules().unwrap();
        let names: Vec<_> = rules.categories().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Imagens", "Documentos"]);
        assert_eq!(rules.classify(".png"), "Imagens");
        assert_eq!(rules.classify(".mp3"), "Outros");
    }

    #[test]
    fn test_parse_json() {
        let config = Config::from_json_str(
            r#"{
                "directories": ["/data/inbox"],
                "categories": [{"name": "Torrents", "extensions": [".torrent"]}],
                "dry_run": true
            }"#,
        )
        .unwrap();

        assert!(config.dry_run);
        assert_eq!(config.rules().unwrap().classify(".torrent"), "Torrents");
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml_str("directories = []").unwrap();
        let defaults = Config::default();
        assert_eq!(config.categories, defaults.categories);
        assert_eq!(config.filters, defaults.filters);
        assert_eq!(config.settle_ms, DEFAULT_SETTLE_MS);
    }

    #[test]
    fn test_invalid_category_name_rejected() {
        let config = Config::from_toml_str(
            r#"
            [[categories]]
            name = "../escape"
            extensions = [".x"]
            "#,
        )
        .unwrap();
        assert!(matches!(config.rules(), Err(ConfigError::InvalidCategory(_))));
    }

    #[test]
    fn test_malformed_file_is_invalid() {
        let result = Config::from_toml_str("settle_ms = \"soon\"");
        assert!(matches!(result, Err(ConfigError::ConfigInvalid(_))));
    }

    #[test]
    fn test_watch_settings_rejects_zero_delay() {
        let config = Config {
            settle_ms: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.watch_settings(),
            Err(ConfigError::ZeroValue("settle_ms"))
        ));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let result = Config::load(Some(Path::new("/non/existent/tidywatch.toml")));
        assert!(matches!(result, Err(ConfigError::ConfigNotFound(_))));
    }

    #[test]
    fn test_write_default_round_trips_and_never_overwrites() {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        for name in ["config.toml", "config.json"] {
            let path = temp_dir.path().join(name);
            Config::write_default(&path).expect("Failed to write default config");

            let loaded = Config::load_from_file(&path).expect("Failed to reload config");
            assert_eq!(loaded, Config::default(), "{}", name);

            let again = Config::write_default(&path);
            assert!(matches!(again, Err(ConfigError::AlreadyExists(_))));
        }
    }
}
