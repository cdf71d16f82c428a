//! Content classification and ignore rules
//!
//! Classification is a pure function of the entry and an [`IgnoreConfig`].
//! Rules, in order:
//! 1. Any path segment in the ignore-dir set → excluded (with its subtree)
//! 2. `.seda` archives → excluded unless recursive packing is enabled
//! 3. Extension in the ignore-extension set → excluded
//! 4. Extension in the binary table → Binary
//! 5. Content is not valid UTF-8 → Binary
//! 6. Valid UTF-8 containing NUL bytes → ambiguous, resolved to Binary
//! 7. Otherwise → Text

use std::collections::BTreeSet;

/// Directories excluded at any depth
pub const DEFAULT_IGNORE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    "dist",
    "build",
    "coverage",
    ".idea",
    ".vscode",
    ".DS_Store",
];

pub const DEFAULT_IGNORE_EXTENSIONS: &[&str] = &[".pyc", ".log", ".exe", ".dll", ".so", ".dylib"];

/// Extensions that are always stored base64 without probing
pub const BINARY_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".ico", ".webp", ".pdf", ".zip", ".gz", ".tgz",
    ".bz2", ".xz", ".7z", ".tar", ".jar", ".woff", ".woff2", ".ttf", ".otf", ".eot", ".mp3",
    ".mp4", ".wav", ".ogg", ".webm", ".mov", ".class", ".wasm", ".bin", ".db", ".sqlite",
];

/// Suffixes of SEDA artifacts, excluded unless recursive packing is on
pub const SEDA_SUFFIXES: &[&str] = &[".seda", ".seda.html"];

/// Content kind of a classified file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Binary,
}

/// Why a file was classified Binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryReason {
    /// Extension is in the binary table
    Extension,
    /// Content is not valid UTF-8
    InvalidUtf8,
    /// Valid UTF-8 but contains NUL bytes; the probe cannot tell, so Binary
    ProbeAmbiguous,
}

/// Result of classifying one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Excluded(ExcludeReason),
    Directory,
    Text,
    Binary(BinaryReason),
}

impl Classification {
    pub fn is_included(&self) -> bool {
        !matches!(self, Classification::Excluded(_))
    }

    pub fn content_kind(&self) -> Option<ContentKind> {
        match self {
            Classification::Text => Some(ContentKind::Text),
            Classification::Binary(_) => Some(ContentKind::Binary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExcludeReason {
    /// A path segment matched the ignore-dir set
    IgnoredDir(String),
    IgnoredExtension(String),
    /// A `.seda` archive while recursive packing is off
    SedaArchive,
}

/// Immutable ignore and classification configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreConfig {
    ignore_dirs: BTreeSet<String>,
    ignore_extensions: BTreeSet<String>,
    binary_extensions: BTreeSet<String>,
    recursive_pack_seda: bool,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            ignore_dirs: DEFAULT_IGNORE_DIRS.iter().map(|s| s.to_string()).collect(),
            ignore_extensions: DEFAULT_IGNORE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            binary_extensions: BINARY_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            recursive_pack_seda: false,
        }
    }
}

impl IgnoreConfig {
    /// Add directory names to ignore at any depth
    pub fn with_ignore_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for dir in dirs {
            let dir = dir.as_ref().trim().trim_matches('/');
            if !dir.is_empty() {
                self.ignore_dirs.insert(dir.to_string());
            }
        }
        self
    }

    /// Add extensions to ignore; a missing leading dot is added
    pub fn with_ignore_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for ext in exts {
            if let Some(ext) = normalize_extension(ext.as_ref()) {
                self.ignore_extensions.insert(ext);
            }
        }
        self
    }

    /// Add extensions that are always stored as binary
    pub fn with_binary_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for ext in exts {
            if let Some(ext) = normalize_extension(ext.as_ref()) {
                self.binary_extensions.insert(ext);
            }
        }
        self
    }

    /// Allow `.seda` archives to be packed like ordinary files
    pub fn with_recursive_pack_seda(mut self, enabled: bool) -> Self {
        self.recursive_pack_seda = enabled;
        self
    }

    pub fn recursive_pack_seda(&self) -> bool {
        self.recursive_pack_seda
    }

    pub fn is_ignored_dir(&self, name: &str) -> bool {
        self.ignore_dirs.contains(name)
    }

    /// First path segment (directory or file name) that is in the ignore set
    pub fn ignored_segment<'a>(&self, rel_path: &'a str) -> Option<&'a str> {
        rel_path.split('/').find(|seg| self.is_ignored_dir(seg))
    }

    /// Classify a path without reading content. Returns `None` when the
    /// decision needs the content probe.
    pub fn classify_path(&self, rel_path: &str, is_dir: bool) -> Option<Classification> {
        if let Some(seg) = self.ignored_segment(rel_path) {
            return Some(Classification::Excluded(ExcludeReason::IgnoredDir(seg.to_string())));
        }
        if is_dir {
            return Some(Classification::Directory);
        }

        let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        if is_seda_archive(name) {
            if !self.recursive_pack_seda {
                return Some(Classification::Excluded(ExcludeReason::SedaArchive));
            }
            // Recursive packing: archives go through the probe like any file
            return None;
        }
        let lower = name.to_ascii_lowercase();
        if let Some(ext) = self.ignore_extensions.iter().find(|ext| lower.ends_with(ext.as_str())) {
            return Some(Classification::Excluded(ExcludeReason::IgnoredExtension(ext.clone())));
        }
        if let Some(ext) = extension_of(name) {
            if self.binary_extensions.contains(&ext) {
                return Some(Classification::Binary(BinaryReason::Extension));
            }
        }
        None
    }

    /// Classify an entry from its path and content
    pub fn classify(&self, rel_path: &str, is_dir: bool, data: &[u8]) -> Classification {
        self.classify_path(rel_path, is_dir)
            .unwrap_or_else(|| probe_content(data))
    }
}

/// Decode probe: UTF-8 text, otherwise binary
pub fn probe_content(data: &[u8]) -> Classification {
    match std::str::from_utf8(data) {
        Err(_) => Classification::Binary(BinaryReason::InvalidUtf8),
        Ok(_) if data.contains(&0) => Classification::Binary(BinaryReason::ProbeAmbiguous),
        Ok(_) => Classification::Text,
    }
}

pub fn is_seda_archive(name: &str) -> bool {
    SEDA_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Lowercased extension including the dot, e.g. `.png`
fn extension_of(name: &str) -> Option<String> {
    let dot = name.rfind('.')?;
    if dot == 0 {
        // Dotfile such as `.env`
        return None;
    }
    Some(name[dot..].to_ascii_lowercase())
}

fn normalize_extension(ext: &str) -> Option<String> {
    let ext = ext.trim();
    if ext.is_empty() {
        return None;
    }
    let ext = ext.to_ascii_lowercase();
    Some(if ext.starts_with('.') { ext } else { format!(".{}", ext) })
}
