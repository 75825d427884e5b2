//! Stable path keys for the fingerprint cache.
//!
//! Cached directory records are keyed by `(root, relative_path)`. The
//! relative part must be identical across platforms and across runs, so it
//! is rendered with forward slashes and normalized to Unicode NFC.
//!
//! # Background
//!
//! macOS stores file names in NFD (decomposed) form while Linux and Windows
//! usually keep NFC. The same visible name can therefore arrive with two
//! byte representations:
//!
//! - NFC: `café.jpg` - 'é' is U+00E9
//! - NFD: `café.jpg` - 'e' U+0065 + combining acute accent U+0301
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use takeout_dedupe::scanner::path_utils::relative_key;
//!
//! let key = relative_key(Path::new("/photos"), Path::new("/photos/2021/cafe\u{0301}.jpg"));
//! assert_eq!(key.as_deref(), Some("2021/café.jpg"));
//! ```

use std::path::{Component, Path, PathBuf};
use unicode_normalization::{is_nfc, UnicodeNormalization};

/// Normalize a string to NFC.
#[must_use]
pub fn normalize_nfc(s: &str) -> String {
    if is_nfc(s) {
        s.to_string()
    } else {
        s.nfc().collect()
    }
}

/// Cache key for a scan root.
///
/// The root is used verbatim (lossy UTF-8, NFC) so that it matches whatever
/// the caller passed on the previous run.
#[must_use]
pub fn root_key(root: &Path) -> String {
    normalize_nfc(&root.to_string_lossy())
}

/// Relative key of `path` under `root`: components joined with `/`, NFC.
///
/// Returns `None` when `path` is not inside `root`.
#[must_use]
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(normalize_nfc(&part.to_string_lossy())),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Rebuild an absolute path from a root and a relative key.
#[must_use]
pub fn resolve_key(root: &Path, key: &str) -> PathBuf {
    key.split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}
