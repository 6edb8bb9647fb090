//! Composite id coding: `tkuri` (time-then-key) for input and error docs,
//! `kturi` (key-then-time) for output/accumulator docs.
//!
//! `pad16` is the load-bearing primitive here: it turns a timestamp into a
//! 16-digit zero-padded decimal string, which preserves numeric ordering
//! under plain lexicographic comparison. Every range scan in `reducer-core`
//! (accumulator lookups, replay windows, error-list queries) depends on
//! that property holding.

use std::fmt;

/// A validated composite document id (`tkuri(...)` or `kturi(...)`).
///
/// The only producers of a `DocId` are [`tkuri`] and [`kturi`]; callers
/// should not construct one from an arbitrary string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocId(String);

impl DocId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<DocId> for String {
    fn from(id: DocId) -> Self {
        id.0
    }
}

impl AsRef<str> for DocId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 16-digit zero-padded decimal representation of `n`.
///
/// `a < b` (as i64) iff `pad16(a) < pad16(b)` lexicographically, for every
/// `n` this pipeline produces (timestamps in milliseconds fit comfortably
/// within 16 digits for the next few centuries). Negative inputs are not
/// supported; the pipeline never stamps a negative time.
pub fn pad16(n: i64) -> String {
    debug_assert!(n >= 0, "pad16 requires a non-negative timestamp");
    format!("{:016}", n.max(0))
}

/// `"t/" + pad16(t) + "/k/" + k`, used for input and error doc ids.
pub fn tkuri(k: &str, t: i64) -> DocId {
    DocId(format!("t/{}/k/{}", pad16(t), k))
}

/// `"k/" + k + "/t/" + pad16(t)`, used for output/accumulator doc ids.
pub fn kturi(k: &str, t: i64) -> DocId {
    DocId(format!("k/{}/t/{}", k, pad16(t)))
}

/// Decode a `tkuri` id back into its `(key, time)` components.
///
/// Returns `None` if `id` is not a well-formed `tkuri`.
pub fn decode_tkuri(id: &str) -> Option<(&str, i64)> {
    let rest = id.strip_prefix("t/")?;
    if rest.len() < 16 {
        return None;
    }
    let (time_part, rest) = rest.split_at(16);
    let rest = rest.strip_prefix("/k/")?;
    let time = time_part.parse::<i64>().ok()?;
    Some((rest, time))
}

/// Decode a `kturi` id back into its `(key, time)` components.
///
/// The key may itself contain `/` (group keys are joined with it), so this
/// anchors off the fixed-width `/t/<pad16>` suffix rather than splitting on
/// every slash.
pub fn decode_kturi(id: &str) -> Option<(&str, i64)> {
    let rest = id.strip_prefix("k/")?;
    let suffix_len = "/t/".len() + 16;
    if rest.len() < suffix_len {
        return None;
    }
    let split_at = rest.len() - suffix_len;
    let (key, suffix) = rest.split_at(split_at);
    let time_part = suffix.strip_prefix("/t/")?;
    let time = time_part.parse::<i64>().ok()?;
    Some((key, time))
}

/// Extract the key component of a composite id, regardless of whether it
/// was encoded with [`tkuri`] or [`kturi`].
pub fn k(id: &str) -> Option<&str> {
    decode_tkuri(id)
        .map(|(k, _)| k)
        .or_else(|| decode_kturi(id).map(|(k, _)| k))
}

/// Extract the time component of a composite id, regardless of whether it
/// was encoded with [`tkuri`] or [`kturi`].
pub fn t(id: &str) -> Option<i64> {
    decode_tkuri(id)
        .map(|(_, t)| t)
        .or_else(|| decode_kturi(id).map(|(_, t)| t))
}
