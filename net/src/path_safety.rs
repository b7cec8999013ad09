//! Relative-path validation for file names that end up in upload URLs.
//!
//! A path is accepted only when it stays inside the bundle root no matter how
//! a server (or a later tool) decodes or normalizes it. Non-ASCII names are
//! fine; traversal in any spelling is not.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Why a path was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PathRejection {
    #[error("path is empty")]
    Empty,
    #[error("path is absolute")]
    Absolute,
    #[error("path contains a null byte")]
    NullByte,
    #[error("path contains a '..' segment")]
    Traversal,
    #[error("path contains a '..' segment after Unicode normalization")]
    NormalizedTraversal,
    #[error("path contains a percent-encoded '..' segment")]
    EncodedTraversal,
}

/// Check a bundle-relative path.
pub fn check_path(path: &str) -> Result<(), PathRejection> {
    if path.is_empty() {
        return Err(PathRejection::Empty);
    }
    if path.contains('\0') {
        return Err(PathRejection::NullByte);
    }
    if is_absolute(path) {
        return Err(PathRejection::Absolute);
    }
    if has_dotdot_segment(path) {
        return Err(PathRejection::Traversal);
    }

    let normalized: String = path.nfkd().collect();
    if normalized.contains('\0') {
        return Err(PathRejection::NullByte);
    }
    if is_absolute(&normalized) || has_dotdot_segment(&normalized) {
        return Err(PathRejection::NormalizedTraversal);
    }

    // Single and double percent-encoding.
    let mut decoded = path.to_string();
    for _ in 0..2 {
        let next = urlencoding::decode_binary(decoded.as_bytes());
        let next = String::from_utf8_lossy(&next).into_owned();
        if next == decoded {
            break;
        }
        if next.contains('\0') || is_absolute(&next) || has_dotdot_segment(&next) {
            return Err(PathRejection::EncodedTraversal);
        }
        let next_normalized: String = next.nfkd().collect();
        if has_dotdot_segment(&next_normalized) {
            return Err(PathRejection::EncodedTraversal);
        }
        decoded = next;
    }

    Ok(())
}

/// Convenience wrapper around [`check_path`].
pub fn is_path_safe(path: &str) -> bool {
    check_path(path).is_ok()
}

fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('\\') {
        // Covers POSIX roots and UNC (`\\server\share`, `//server/share`).
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn has_dotdot_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| segment.trim() == "..")
}
