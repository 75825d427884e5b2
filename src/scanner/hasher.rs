//! Content fingerprinting for archive entries and plain files.
//!
//! # Overview
//!
//! A [`ContentKey`] is the string `"{size}_{digest}"`. Two files with equal
//! keys under the same [`Strategy`] are treated as duplicates. Keys produced
//! under different strategies must never be compared with each other.
//!
//! | Strategy | Digest | I/O per file |
//! |---|---|---|
//! | [`Strategy::SizeCrc`] | CRC-32, 8 hex chars | none for archive entries, full pass for plain files |
//! | [`Strategy::SizePartial`] | SHA-256 over up to three 64 KiB windows, first 16 hex chars | at most 192 KiB |
//! | [`Strategy::Full`] | SHA-256 of the whole content, 64 hex chars | whole file |
//!
//! The partial windows are: the start, the middle (only when the size is
//! larger than two windows, beginning at `size / 2`) and the end (only when
//! the size is larger than one window). Bytes outside those windows do not
//! influence the key, so `size_partial` has a non-zero false-duplicate rate.
//!
//! # Example
//!
//! ```
//! use takeout_dedupe::scanner::hasher::{Fingerprinter, Strategy};
//!
//! let fp = Fingerprinter::new(Strategy::SizeCrc);
//! let key = fp.key_for_bytes(b"hello");
//! assert_eq!(key.as_str(), "5_3610a686");
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::HashError;

/// Size of each sampled window for [`Strategy::SizePartial`].
pub const WINDOW_SIZE: u64 = 64 * 1024;

/// Number of hex characters kept from the partial digest (64 bits).
pub const PARTIAL_DIGEST_HEX_LEN: usize = 16;

/// Buffer size for streaming reads.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Fingerprinting strategy, resolved once at configuration time.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Size plus the CRC-32 already stored in archive metadata.
    #[value(name = "size_crc")]
    SizeCrc,
    /// Size plus a truncated SHA-256 over start/middle/end windows.
    #[default]
    #[value(name = "size_partial")]
    SizePartial,
    /// Size plus SHA-256 of the whole content.
    #[value(name = "full")]
    Full,
}

impl Strategy {
    /// Canonical name, as used in config files and the CLI.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SizeCrc => "size_crc",
            Self::SizePartial => "size_partial",
            Self::Full => "full",
        }
    }

    /// Whether keys for archive entries can be derived from metadata alone.
    #[must_use]
    pub fn is_metadata_only_for_archives(self) -> bool {
        matches!(self, Self::SizeCrc)
    }

    /// Length of the hex digest part of keys produced by this strategy.
    #[must_use]
    pub fn digest_hex_len(self) -> usize {
        match self {
            Self::SizeCrc => 8,
            Self::SizePartial => PARTIAL_DIGEST_HEX_LEN,
            Self::Full => 64,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown strategy name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown hash strategy '{0}' (expected size_crc, size_partial or full)")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "size_crc" | "crc" => Ok(Self::SizeCrc),
            "size_partial" | "partial" => Ok(Self::SizePartial),
            "full" | "sha256" => Ok(Self::Full),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Opaque content fingerprint, `"{size}_{digest}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    /// Build a key from a size and a hex digest.
    #[must_use]
    pub fn new(size: u64, digest_hex: &str) -> Self {
        Self(format!("{}_{}", size, digest_hex))
    }

    /// Build a `size_crc` key.
    #[must_use]
    pub fn from_crc(size: u64, crc32: u32) -> Self {
        Self(format!("{}_{:08x}", size, crc32))
    }

    /// Wrap an already rendered key (e.g. one loaded from the cache).
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The size prefix, if the key is well formed.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.0.split_once('_').and_then(|(size, _)| size.parse().ok())
    }

    /// Whether the key has the shape `strategy` produces.
    ///
    /// Keys computed under different strategies must never be compared;
    /// this catches records written by a run with another strategy.
    #[must_use]
    pub fn matches_strategy(&self, strategy: Strategy) -> bool {
        self.0.split_once('_').is_some_and(|(size, digest)| {
            size.parse::<u64>().is_ok()
                && digest.len() == strategy.digest_hex_len()
                && digest.bytes().all(|b| b.is_ascii_hexdigit())
        })
    }

    /// Consume the key, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ContentKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ContentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The `(offset, length)` windows sampled by [`Strategy::SizePartial`].
#[must_use]
pub fn sample_windows(size: u64) -> Vec<(u64, u64)> {
    let mut windows = Vec::with_capacity(3);
    windows.push((0, size.min(WINDOW_SIZE)));
    if size > WINDOW_SIZE * 2 {
        windows.push((size / 2, WINDOW_SIZE));
    }
    if size > WINDOW_SIZE {
        windows.push((size - WINDOW_SIZE, WINDOW_SIZE));
    }
    windows
}

/// Computes [`ContentKey`]s under one fixed [`Strategy`].
///
/// Cheap to clone; share it across hashing workers.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    strategy: Strategy,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Fingerprinter {
    /// Create a fingerprinter for the given strategy.
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            shutdown_flag: None,
        }
    }

    /// Abort long reads when the flag is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// The active strategy.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Compute the key of a file on disk.
    ///
    /// `size` is the size observed when the file was stat'ed; it becomes the
    /// key prefix and drives window placement.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when the file cannot be opened or read, or when
    /// shutdown was requested mid-read.
    pub fn key_for_file(&self, path: &Path, size: u64) -> Result<ContentKey, HashError> {
        let file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
        let result = match self.strategy {
            Strategy::SizePartial => partial_from_seekable(file, size),
            Strategy::SizeCrc => self.crc_from_stream(BufReader::new(file)),
            Strategy::Full => self.sha256_from_stream(BufReader::new(file)),
        };
        let digest = result.map_err(|e| HashError::from_io(path, e))?;
        Ok(ContentKey::new(size, &digest))
    }

    /// Compute the key of a non-seekable stream, e.g. a decompressing
    /// archive entry reader. The stream is read at most once, front to back.
    ///
    /// # Errors
    ///
    /// Propagates read errors from the underlying stream.
    pub fn key_for_reader<R: Read>(&self, reader: R, size: u64) -> io::Result<ContentKey> {
        let digest = match self.strategy {
            Strategy::SizePartial => partial_from_stream(reader, size)?,
            Strategy::SizeCrc => self.crc_from_stream(reader)?,
            Strategy::Full => self.sha256_from_stream(reader)?,
        };
        Ok(ContentKey::new(size, &digest))
    }

    /// Compute the key of an in-memory buffer.
    #[must_use]
    pub fn key_for_bytes(&self, bytes: &[u8]) -> ContentKey {
        let size = bytes.len() as u64;
        let digest = match self.strategy {
            Strategy::SizePartial => {
                let mut hasher = Sha256::new();
                for (start, len) in sample_windows(size) {
                    let end = (start + len).min(size);
                    hasher.update(&bytes[start as usize..end as usize]);
                }
                truncate_digest(&hasher)
            }
            Strategy::SizeCrc => format!("{:08x}", crc32fast::hash(bytes)),
            Strategy::Full => format!("{:x}", Sha256::digest(bytes)),
        };
        ContentKey::new(size, &digest)
    }

    fn crc_from_stream<R: Read>(&self, mut reader: R) -> io::Result<String> {
        let mut hasher = crc32fast::Hasher::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            if self.is_shutdown_requested() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "shutdown requested"));
            }
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => hasher.update(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(format!("{:08x}", hasher.finalize()))
    }

    fn sha256_from_stream<R: Read>(&self, mut reader: R) -> io::Result<String> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            if self.is_shutdown_requested() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "shutdown requested"));
            }
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => hasher.update(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn truncate_digest(hasher: &Sha256) -> String {
    let mut hex = format!("{:x}", hasher.clone().finalize());
    hex.truncate(PARTIAL_DIGEST_HEX_LEN);
    hex
}

/// Partial digest of a seekable source: one seek + bounded read per window.
fn partial_from_seekable<R: Read + Seek>(mut reader: R, size: u64) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = Vec::with_capacity(WINDOW_SIZE as usize);
    for (start, len) in sample_windows(size) {
        buf.clear();
        reader.seek(SeekFrom::Start(start))?;
        (&mut reader).take(len).read_to_end(&mut buf)?;
        hasher.update(&buf);
    }
    Ok(truncate_digest(&hasher))
}

/// Partial digest of a forward-only source.
///
/// Windows may overlap (e.g. a 160 KiB file), so each chunk is copied into
/// every window it intersects. Memory stays bounded by three windows.
fn partial_from_stream<R: Read>(mut reader: R, size: u64) -> io::Result<String> {
    let windows = sample_windows(size);
    let mut captured: Vec<Vec<u8>> = windows
        .iter()
        .map(|&(_, len)| Vec::with_capacity(len as usize))
        .collect();
    let last_needed = windows.iter().map(|&(s, l)| s + l).max().unwrap_or(0);

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut offset = 0u64;
    while offset < last_needed {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let chunk_start = offset;
        let chunk_end = offset + n as u64;
        for (window, &(start, len)) in captured.iter_mut().zip(windows.iter()) {
            let lo = start.max(chunk_start);
            let hi = (start + len).min(chunk_end);
            if lo < hi {
                window.extend_from_slice(
                    &buf[(lo - chunk_start) as usize..(hi - chunk_start) as usize],
                );
            }
        }
        offset = chunk_end;
    }

    let mut hasher = Sha256::new();
    for window in &captured {
        hasher.update(window);
    }
    Ok(truncate_digest(&hasher))
}
