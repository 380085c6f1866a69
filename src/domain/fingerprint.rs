//! Error fingerprint computation for deduplication.
//!
//! A fingerprint identifies a class of recurring error based on:
//! - The error type name
//! - The normalised backtrace, or the message when no backtrace is attached
//! - The type of the underlying cause, if any
//!
//! Errors with the same fingerprint are counted as one group. Collisions are
//! accepted: grouping is intentionally coarse.

use ahash::AHasher;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A stable hash identifying a class of recurring error.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Sentinel returned when fingerprinting itself failed.
    pub const UNKNOWN: Fingerprint = Fingerprint(0);

    /// Compute a fingerprint from error components.
    ///
    /// # Arguments
    /// * `type_name` - Name of the error type
    /// * `backtrace` - Captured backtrace text, if any
    /// * `message` - Display message, used only when `backtrace` is absent
    /// * `inner_type` - Name of the cause's type, if any
    pub fn compute(
        type_name: &str,
        backtrace: Option<&str>,
        message: &str,
        inner_type: Option<&str>,
    ) -> Self {
        let mut hasher = AHasher::default();

        type_name.hash(&mut hasher);

        match backtrace {
            Some(bt) if !bt.trim().is_empty() => {
                for frame in normalized_frames(bt) {
                    frame.hash(&mut hasher);
                }
            }
            _ => message.hash(&mut hasher),
        }

        if let Some(inner) = inner_type {
            inner.hash(&mut hasher);
        }

        // 0 is reserved for UNKNOWN
        match hasher.finish() {
            0 => Fingerprint(1),
            h => Fingerprint(h),
        }
    }

    /// Rebuild a fingerprint from its raw value.
    pub fn from_u64(raw: u64) -> Self {
        Fingerprint(raw)
    }

    /// Get the raw hash value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Reduce a backtrace to the frames that identify the failing code path.
///
/// Source locations (`at file.rs:12:5`), frame indices and symbol hash
/// suffixes (`::h0123456789abcdef`) change between builds without the bug
/// changing, so they are dropped before hashing.
pub fn normalized_frames(backtrace: &str) -> impl Iterator<Item = &str> {
    backtrace.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with("at ") {
            return None;
        }
        let symbol = strip_frame_index(line);
        let symbol = strip_hash_suffix(symbol);
        (!symbol.is_empty()).then_some(symbol)
    })
}

fn strip_frame_index(line: &str) -> &str {
    match line.split_once(": ") {
        Some((index, rest)) if index.chars().all(|c| c.is_ascii_digit()) => rest.trim(),
        _ => line,
    }
}

fn strip_hash_suffix(symbol: &str) -> &str {
    if let Some(pos) = symbol.rfind("::h") {
        let hash = &symbol[pos + 3..];
        if hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return &symbol[..pos];
        }
    }
    symbol
}
