//! The files that make up one vibe, and the checks they must pass before upload.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use vibecodr_net::PathRejection;
use vibecodr_net::check_path;

/// Leading path segments owned by the platform.
pub const RESERVED_SEGMENTS: &[&str] = &["__vibecodr", ".vibecodr"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentClass {
    Text,
    Binary,
}

/// One file of a bundle. `path` is relative to the bundle root.
#[derive(Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub content: Vec<u8>,
    pub size: u64,
    pub content_class: ContentClass,
}

impl FileEntry {
    pub fn text(path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into().into_bytes();
        Self {
            path: path.into(),
            size: content.len() as u64,
            content,
            content_class: ContentClass::Text,
        }
    }

    pub fn binary(path: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            size: content.len() as u64,
            content,
            content_class: ContentClass::Binary,
        }
    }

    /// Classify raw bytes: valid UTF-8 without NULs is text.
    pub fn from_bytes(path: impl Into<String>, content: Vec<u8>) -> Self {
        let is_text = !content.contains(&0) && std::str::from_utf8(&content).is_ok();
        let mut entry = Self::binary(path, content);
        if is_text {
            entry.content_class = ContentClass::Text;
        }
        entry
    }
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("content_class", &self.content_class)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Unlisted => "unlisted",
            Visibility::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "unlisted" => Ok(Visibility::Unlisted),
            "private" => Ok(Visibility::Private),
            other => Err(format!(
                "unknown visibility '{other}' (expected public, unlisted or private)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleLimits {
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for BundleLimits {
    fn default() -> Self {
        Self {
            max_files: 100,
            max_file_bytes: 5 * 1024 * 1024,
            max_total_bytes: 25 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleIssue {
    Empty,
    TooManyFiles { count: usize, max: usize },
    FileTooLarge { path: String, size: u64, max: u64 },
    TotalTooLarge { total: u64, max: u64 },
    UnsafePath { path: String, reason: PathRejection },
    ReservedName { path: String },
    DuplicatePath { path: String },
    SizeMismatch { path: String, declared: u64, actual: u64 },
    MissingEntry { entry: String },
}

impl fmt::Display for BundleIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleIssue::Empty => write!(f, "bundle has no files"),
            BundleIssue::TooManyFiles { count, max } => {
                write!(f, "bundle has {count} files (limit {max})")
            }
            BundleIssue::FileTooLarge { path, size, max } => {
                write!(f, "{path} is {size} bytes (limit {max})")
            }
            BundleIssue::TotalTooLarge { total, max } => {
                write!(f, "bundle is {total} bytes (limit {max})")
            }
            BundleIssue::UnsafePath { path, reason } => write!(f, "{path}: {reason}"),
            BundleIssue::ReservedName { path } => {
                write!(f, "{path} uses a name reserved by the platform")
            }
            BundleIssue::DuplicatePath { path } => write!(f, "{path} appears more than once"),
            BundleIssue::SizeMismatch {
                path,
                declared,
                actual,
            } => write!(f, "{path} declares {declared} bytes but has {actual}"),
            BundleIssue::MissingEntry { entry } => {
                write!(f, "entry file {entry} is not part of the bundle")
            }
        }
    }
}

/// Result of [`validate_bundle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleValidation {
    pub valid: bool,
    pub total_size: u64,
    pub file_count: usize,
    pub issues: Vec<BundleIssue>,
}

/// Whether the first segment of `path` is reserved by the platform.
pub fn is_reserved_path(path: &str) -> bool {
    let first = path.split(['/', '\\']).next().unwrap_or_default();
    RESERVED_SEGMENTS
        .iter()
        .any(|reserved| first.eq_ignore_ascii_case(reserved))
}

/// Check every file against `limits`, path safety and reserved names.
/// All issues are collected; nothing short-circuits.
pub fn validate_bundle(files: &[FileEntry], limits: &BundleLimits) -> BundleValidation {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();
    let mut total_size: u64 = 0;

    if files.is_empty() {
        issues.push(BundleIssue::Empty);
    }
    if files.len() > limits.max_files {
        issues.push(BundleIssue::TooManyFiles {
            count: files.len(),
            max: limits.max_files,
        });
    }

    for file in files {
        let actual = file.content.len() as u64;
        total_size = total_size.saturating_add(actual);

        if let Err(reason) = check_path(&file.path) {
            issues.push(BundleIssue::UnsafePath {
                path: file.path.clone(),
                reason,
            });
        } else if is_reserved_path(&file.path) {
            issues.push(BundleIssue::ReservedName {
                path: file.path.clone(),
            });
        }
        if !seen.insert(file.path.as_str()) {
            issues.push(BundleIssue::DuplicatePath {
                path: file.path.clone(),
            });
        }
        if file.size != actual {
            issues.push(BundleIssue::SizeMismatch {
                path: file.path.clone(),
                declared: file.size,
                actual,
            });
        }
        if actual > limits.max_file_bytes {
            issues.push(BundleIssue::FileTooLarge {
                path: file.path.clone(),
                size: actual,
                max: limits.max_file_bytes,
            });
        }
    }

    if total_size > limits.max_total_bytes {
        issues.push(BundleIssue::TotalTooLarge {
            total: total_size,
            max: limits.max_total_bytes,
        });
    }

    BundleValidation {
        valid: issues.is_empty(),
        total_size,
        file_count: files.len(),
        issues,
    }
}

/// An `entry` must name one of the bundle's files.
pub fn check_entry(files: &[FileEntry], entry: Option<&str>) -> Option<BundleIssue> {
    let entry = entry?;
    (!files.iter().any(|file| file.path == entry)).then(|| BundleIssue::MissingEntry {
        entry: entry.to_string(),
    })
}
