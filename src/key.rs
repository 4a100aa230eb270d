// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Routing keys and recency scores.
//!
//! A sorted set ranks ascending by score. To get most-recent-first ranks, the
//! score is the largest integer a Redis score (an IEEE double) holds exactly,
//! minus the update time in epoch seconds:
//!
//! ```
//! use recency_store::key::{score_for, MAX_SAFE_SCORE};
//! use std::time::{Duration, UNIX_EPOCH};
//!
//! let older = score_for(UNIX_EPOCH + Duration::from_secs(100));
//! let newer = score_for(UNIX_EPOCH + Duration::from_secs(200));
//! assert!(newer < older);
//! assert_eq!(older, MAX_SAFE_SCORE - 100);
//! ```

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// 2^53, the largest integer a double-precision score represents exactly.
pub const MAX_SAFE_SCORE: i64 = 9_007_199_254_740_992;

/// Joins the owner and list components of an [`OwnerKey`].
pub const SEPARATOR: char = '_';

const ESCAPE: char = '\\';

/// Score for a member updated at `updated_at`. Earlier-than-epoch times give
/// scores above [`MAX_SAFE_SCORE`] and so rank after every post-epoch member.
pub fn score_for(updated_at: SystemTime) -> i64 {
    MAX_SAFE_SCORE - epoch_seconds(updated_at)
}

/// Whole seconds since the Unix epoch, negative before it.
pub fn epoch_seconds(at: SystemTime) -> i64 {
    match at.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => {
            let before = e.duration();
            // round toward negative infinity so ordering stays monotonic
            let secs = before.as_secs() as i64;
            if before.subsec_nanos() > 0 { -secs - 1 } else { -secs }
        }
    }
}

/// Sorted-set key for one (owner, list) pair.
///
/// Components are joined with `_`. A `\` or `_` inside a component is
/// prefixed with `\`, so distinct pairs never produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerKey(String);

impl OwnerKey {
    pub fn new(owner_id: &str, list_id: &str) -> Self {
        let mut key = String::with_capacity(owner_id.len() + list_id.len() + 1);
        push_escaped(&mut key, owner_id);
        key.push(SEPARATOR);
        push_escaped(&mut key, list_id);
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn push_escaped(out: &mut String, component: &str) {
    for c in component.chars() {
        if c == SEPARATOR || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OwnerKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
