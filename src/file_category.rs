//! Extension-based categorization of files.
//!
//! A [`CategoryRules`] table maps category names (which double as the names of
//! the destination subfolders) to sets of file extensions. Lookup walks the
//! table in its defined order and the first category containing the extension
//! wins; anything unmatched lands in the fallback category.
//!
//! # Examples
//!
//! ```
//! use tidywatch::file_category::CategoryRules;
//!
//! let rules = CategoryRules::default();
//! assert_eq!(rules.classify(".PNG"), "Images");
//! assert_eq!(rules.classify("pdf"), "Documents");
//! assert_eq!(rules.classify(".xyz"), "Others");
//! ```

use std::collections::HashSet;
use std::path::{Component, Path};

/// Name of the fallback category used when no rule matches.
pub const DEFAULT_FALLBACK: &str = "Others";

/// Errors raised while building a rule table from user input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    /// The category name cannot be used as a single subfolder name.
    #[error("invalid category name '{0}': must be a single folder name")]
    InvalidName(String),
}

/// A single named bucket of extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    name: String,
    extensions: HashSet<String>,
}

impl Category {
    /// Name of the category, also the destination subfolder name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the (already normalized) extension belongs here.
    pub fn contains(&self, ext: &str) -> bool {
        self.extensions.contains(ext)
    }
}

/// Ordered mapping from category name to extension set.
///
/// The table is immutable once built; the monitor shares it between watch
/// sessions behind an `Arc` for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRules {
    categories: Vec<Category>,
    fallback: String,
}

impl CategoryRules {
    /// Creates an empty table with the given fallback category.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::InvalidName`] if `fallback` is not a usable
    /// folder name.
    pub fn new(fallback: &str) -> Result<Self, RulesError> {
        validate_name(fallback)?;
        Ok(Self {
            categories: Vec::new(),
            fallback: fallback.to_string(),
        })
    }

    /// Builds a table from `(name, extensions)` pairs, keeping their order.
    ///
    /// Extensions are normalized (lowercase, leading dot). A name that
    /// appears twice is merged into its first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::InvalidName`] for any category name (or the
    /// fallback) that is empty, contains a path separator, or is `.`/`..`.
    pub fn from_pairs<I, N, E, S>(fallback: &str, pairs: I) -> Result<Self, RulesError>
    where
        I: IntoIterator<Item = (N, E)>,
        N: AsRef<str>,
        E: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Self::new(fallback)?;
        for (name, extensions) in pairs {
            rules.add_category(name.as_ref(), extensions)?;
        }
        Ok(rules)
    }

    /// Appends a category at the end of the table (or extends an existing
    /// one with the same name).
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::InvalidName`] if `name` is not a usable folder name.
    pub fn add_category<E, S>(&mut self, name: &str, extensions: E) -> Result<(), RulesError>
    where
        E: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        validate_name(name)?;
        let normalized = extensions
            .into_iter()
            .map(|ext| normalize_extension(ext.as_ref()));

        if let Some(existing) = self.categories.iter_mut().find(|c| c.name == name) {
            existing.extensions.extend(normalized);
        } else {
            self.categories.push(Category {
                name: name.to_string(),
                extensions: normalized.collect(),
            });
        }
        Ok(())
    }

    /// Maps an extension to its category name.
    ///
    /// The extension is normalized first, so `".JPG"`, `"jpg"` and `".jpg"`
    /// all classify the same way. Never fails: unmatched input, including the
    /// empty extension, returns the fallback name.
    pub fn classify(&self, extension: &str) -> &str {
        let ext = normalize_extension(extension);
        self.categories
            .iter()
            .find(|category| category.contains(&ext))
            .map(|category| category.name.as_str())
            .unwrap_or(self.fallback.as_str())
    }

    /// Classifies a file by the extension of its path.
    pub fn classify_path(&self, path: &Path) -> &str {
        self.classify(&extension_of(path))
    }

    /// The fallback category name.
    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Categories in lookup order.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }
}

impl Default for CategoryRules {
    /// The built-in rule table.
    fn default() -> Self {
        let mut rules = Self {
            categories: Vec::new(),
            fallback: DEFAULT_FALLBACK.to_string(),
        };
        for (name, extensions) in default_table() {
            rules.categories.push(Category {
                name: name.to_string(),
                extensions: extensions.iter().map(|e| e.to_string()).collect(),
            });
        }
        rules
    }
}

/// The default `(category, extensions)` table, in lookup order.
pub fn default_table() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        (
            "Images",
            &[".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".webp"],
        ),
        ("Videos", &[".mp4", ".mkv", ".avi", ".mov", ".wmv", ".flv"]),
        ("Audio", &[".mp3", ".wav", ".flac", ".aac", ".ogg", ".m4a"]),
        (
            "Documents",
            &[".pdf", ".docx", ".doc", ".txt", ".pptx", ".xlsx"],
        ),
        ("Archives", &[".zip", ".rar", ".7z", ".tar", ".gz"]),
        ("Executables", &[".exe", ".msi", ".bat"]),
        ("Torrents", &[".torrent"]),
        ("Scripts", &[".py", ".js", ".sh", ".ps1", ".java", ".cpp"]),
    ]
}

/// Lowercases an extension and ensures it carries a leading dot.
///
/// The empty string stays empty.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.is_empty() || ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

/// Extracts the normalized extension of a path.
///
/// Only the last suffix counts (`archive.tar.gz` → `.gz`) and dotfiles without
/// a further suffix (`.bashrc`) have no extension.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| normalize_extension(&ext.to_string_lossy()))
        .unwrap_or_default()
}

fn validate_name(name: &str) -> Result<(), RulesError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(()),
        _ => Err(RulesError::InvalidName(name.to_string())),
    }
}
