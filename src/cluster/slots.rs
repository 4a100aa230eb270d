// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hash slots and slot ownership.
//!
//! Keys map to one of [`SLOT_COUNT`] slots via CRC16/XMODEM. When a key has a
//! non-empty `{tag}`, only the tag is hashed, so related keys share a node.

use std::collections::{BTreeMap, BTreeSet};

use redis::Value;

use crate::storage::traits::StoreError;

pub const SLOT_COUNT: u16 = 16384;

/// CRC16/XMODEM (poly 0x1021, init 0), as used for cluster key hashing.
fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

/// Slot for `key`, honoring `{hash tags}`.
pub fn key_slot(key: &[u8]) -> u16 {
    let hashed = match key.iter().position(|&b| b == b'{') {
        Some(open) => match key[open + 1..].iter().position(|&b| b == b'}') {
            Some(len) if len > 0 => &key[open + 1..open + 1 + len],
            _ => key,
        },
        None => key,
    };
    crc16(hashed) % SLOT_COUNT
}

/// Which node (`host:port`) serves each slot range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotMap {
    // start -> (end inclusive, addr)
    ranges: BTreeMap<u16, (u16, String)>,
}

impl SlotMap {
    /// One node owning every slot (standalone server).
    pub fn single(addr: impl Into<String>) -> Self {
        let mut ranges = BTreeMap::new();
        ranges.insert(0, (SLOT_COUNT - 1, addr.into()));
        Self { ranges }
    }

    pub fn insert(&mut self, start: u16, end: u16, addr: impl Into<String>) {
        self.ranges.insert(start, (end, addr.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn node_for_slot(&self, slot: u16) -> Option<&str> {
        self.ranges
            .range(..=slot)
            .next_back()
            .filter(|(_, (end, _))| slot <= *end)
            .map(|(_, (_, addr))| addr.as_str())
    }

    pub fn node_for_key(&self, key: &[u8]) -> Option<&str> {
        self.node_for_slot(key_slot(key))
    }

    /// Distinct node addresses, sorted.
    pub fn nodes(&self) -> BTreeSet<String> {
        self.ranges.values().map(|(_, addr)| addr.clone()).collect()
    }

    /// Build from a `CLUSTER SLOTS` reply. Entries reporting an empty host
    /// mean "the node you asked", which is `queried_host`.
    pub fn from_cluster_slots(reply: &Value, queried_host: &str) -> Result<Self, StoreError> {
        let entries = match reply {
            Value::Array(entries) => entries,
            other => return Err(StoreError::Topology(format!("unexpected CLUSTER SLOTS reply: {:?}", other))),
        };

        let mut map = SlotMap::default();
        for entry in entries {
            let fields = match entry {
                Value::Array(fields) if fields.len() >= 3 => fields,
                other => return Err(StoreError::Topology(format!("malformed slot range: {:?}", other))),
            };
            let start = slot_number(&fields[0])?;
            let end = slot_number(&fields[1])?;
            if start > end {
                return Err(StoreError::Topology(format!("inverted slot range {}-{}", start, end)));
            }
            // fields[2] is the primary; replicas follow and are not routed to
            let addr = node_address(&fields[2], queried_host)?;
            map.insert(start, end, addr);
        }

        if map.is_empty() {
            return Err(StoreError::Topology("cluster reported no slot ranges".into()));
        }
        Ok(map)
    }
}

fn slot_number(value: &Value) -> Result<u16, StoreError> {
    match value {
        Value::Int(n) if (0..SLOT_COUNT as i64).contains(n) => Ok(*n as u16),
        other => Err(StoreError::Topology(format!("invalid slot number: {:?}", other))),
    }
}

fn node_address(value: &Value, queried_host: &str) -> Result<String, StoreError> {
    let fields = match value {
        Value::Array(fields) if fields.len() >= 2 => fields,
        other => return Err(StoreError::Topology(format!("malformed node entry: {:?}", other))),
    };
    let host = match &fields[0] {
        Value::BulkString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::SimpleString(s) => s.clone(),
        Value::Nil => String::new(),
        other => return Err(StoreError::Topology(format!("invalid node host: {:?}", other))),
    };
    let port = match &fields[1] {
        Value::Int(p) if (1..=u16::MAX as i64).contains(p) => *p as u16,
        other => return Err(StoreError::Topology(format!("invalid node port: {:?}", other))),
    };
    let host = if host.is_empty() || host == "?" { queried_host.to_string() } else { host };
    Ok(format!("{}:{}", host, port))
}
