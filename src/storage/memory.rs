// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process sorted sets with Redis ordering and rank semantics.
//!
//! Members order by score, then by member bytes. Rank bounds are inclusive and
//! may be negative. A set that becomes empty is removed, like a Redis key.
//!
//! Every command is appended to a log (see [`InMemorySortedSets::command_log`]),
//! and [`InMemorySortedSets::fail_on`] injects a failure into the nth
//! occurrence of a command.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{SortedSetBackend, SortedSetSession, StoreError};

#[derive(Debug, Default)]
struct MemberSet {
    scores: HashMap<String, i64>,
    order: BTreeSet<(i64, String)>,
}

impl MemberSet {
    fn insert(&mut self, score: i64, member: &str) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.order.remove(&(old, member.to_string()));
        }
        self.order.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.order.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn range(&self, start: isize, stop: isize) -> Vec<(i64, String)> {
        match normalize_range(start, stop, self.len()) {
            Some((from, to)) => self.order.iter().skip(from).take(to - from + 1).cloned().collect(),
            None => Vec::new(),
        }
    }
}

/// Resolve Redis-style inclusive rank bounds against a set of `len` members.
fn normalize_range(start: isize, stop: isize, len: usize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[derive(Debug)]
struct Fault {
    command: &'static str,
    remaining: usize,
}

/// Sorted sets held in memory.
#[derive(Debug, Default)]
pub struct InMemorySortedSets {
    sets: DashMap<String, MemberSet>,
    log: Mutex<Vec<String>>,
    fault: Mutex<Option<Fault>>,
}

impl InMemorySortedSets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding members.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.sets.len()
    }

    /// Members of `key` in rank order, with their scores.
    #[must_use]
    pub fn members(&self, key: &str) -> Vec<(String, i64)> {
        self.sets
            .get(key)
            .map(|set| set.order.iter().map(|(s, m)| (m.clone(), *s)).collect())
            .unwrap_or_default()
    }

    /// Number of members stored under `key`.
    #[must_use]
    pub fn cardinality(&self, key: &str) -> usize {
        self.sets.get(key).map(|set| set.len()).unwrap_or(0)
    }

    /// Commands issued so far, formatted like `ZADD key score member`.
    #[must_use]
    pub fn command_log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Forget the commands logged so far.
    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    /// Fail the `nth` (1-based) next occurrence of `command` (e.g. `"ZREM"`).
    pub fn fail_on(&self, command: &'static str, nth: usize) {
        *self.fault.lock() = Some(Fault {
            command,
            remaining: nth.max(1),
        });
    }

    fn record(&self, command: &'static str, line: String) -> Result<(), StoreError> {
        {
            let mut fault = self.fault.lock();
            if let Some(f) = fault.as_mut() {
                if f.command == command {
                    f.remaining -= 1;
                    if f.remaining == 0 {
                        *fault = None;
                        return Err(StoreError::Backend(format!("injected failure on {}", command)));
                    }
                }
            }
        }
        self.log.lock().push(line);
        Ok(())
    }

    fn drop_if_empty(&self, key: &str) {
        self.sets.remove_if(key, |_, set| set.len() == 0);
    }
}

#[async_trait]
impl SortedSetBackend for InMemorySortedSets {
    async fn session<'a>(&'a self) -> Result<Box<dyn SortedSetSession + 'a>, StoreError> {
        Ok(Box::new(MemorySession { store: self }))
    }
}

struct MemorySession<'a> {
    store: &'a InMemorySortedSets,
}

#[async_trait]
impl SortedSetSession for MemorySession<'_> {
    async fn zadd(&mut self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        self.store.record("ZADD", format!("ZADD {} {} {}", key, score, member))?;
        self.store.sets.entry(key.to_string()).or_default().insert(score, member);
        Ok(())
    }

    async fn zrem(&mut self, key: &str, member: &str) -> Result<(), StoreError> {
        self.store.record("ZREM", format!("ZREM {} {}", key, member))?;
        let removed = self.store.sets.get_mut(key).map(|mut set| set.remove(member)).unwrap_or(false);
        if removed {
            self.store.drop_if_empty(key);
        }
        Ok(())
    }

    async fn zremrangebyrank(&mut self, key: &str, start: isize, stop: isize) -> Result<u64, StoreError> {
        self.store
            .record("ZREMRANGEBYRANK", format!("ZREMRANGEBYRANK {} {} {}", key, start, stop))?;
        let removed = match self.store.sets.get_mut(key) {
            Some(mut set) => {
                let victims = set.range(start, stop);
                for (_, member) in &victims {
                    set.remove(member);
                }
                victims.len() as u64
            }
            None => 0,
        };
        if removed > 0 {
            self.store.drop_if_empty(key);
        }
        Ok(removed)
    }

    async fn zrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        self.store.record("ZRANGE", format!("ZRANGE {} {} {}", key, start, stop))?;
        Ok(self
            .store
            .sets
            .get(key)
            .map(|set| set.range(start, stop).into_iter().map(|(_, m)| m).collect())
            .unwrap_or_default())
    }
}
