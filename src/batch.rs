// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mutation batches for [`RecencyStore::put`](crate::RecencyStore::put).
//!
//! A [`BatchBuilder`] accumulates updates and deletes; [`BatchBuilder::build`]
//! consumes it, so nothing can be added to a batch once it exists. A [`Batch`]
//! is in turn consumed by `put`.
//!
//! Within one batch every update is applied before every delete, whatever
//! order they were added in.
//!
//! # Example
//!
//! ```
//! use recency_store::BatchBuilder;
//! use std::time::SystemTime;
//!
//! let mut builder = BatchBuilder::new();
//! builder
//!     .add_update("user-7", "newsletter", "contact-1", SystemTime::now())
//!     .add_update("user-7", "newsletter", "contact-2", SystemTime::now())
//!     .add_delete("user-7", "newsletter", "contact-9");
//!
//! let batch = builder.build();
//! assert_eq!(batch.updates().len(), 2);
//! assert_eq!(batch.deletes().len(), 1);
//! ```

use std::collections::HashSet;
use std::time::SystemTime;

use crate::key::{score_for, OwnerKey};

/// A member of one (owner, list) recency list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    pub owner_id: String,
    pub list_id: String,
    pub member_id: String,
}

impl MemberRef {
    pub fn new(owner_id: impl Into<String>, list_id: impl Into<String>, member_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            list_id: list_id.into(),
            member_id: member_id.into(),
        }
    }

    pub fn key(&self) -> OwnerKey {
        OwnerKey::new(&self.owner_id, &self.list_id)
    }
}

/// Touch a member at `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub target: MemberRef,
    pub updated_at: SystemTime,
}

impl Update {
    pub fn score(&self) -> i64 {
        score_for(self.updated_at)
    }
}

/// Remove a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub target: MemberRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Update(Update),
    Delete(Delete),
}

impl Mutation {
    pub fn update(
        owner_id: impl Into<String>,
        list_id: impl Into<String>,
        member_id: impl Into<String>,
        updated_at: SystemTime,
    ) -> Self {
        Mutation::Update(Update {
            target: MemberRef::new(owner_id, list_id, member_id),
            updated_at,
        })
    }

    pub fn delete(owner_id: impl Into<String>, list_id: impl Into<String>, member_id: impl Into<String>) -> Self {
        Mutation::Delete(Delete {
            target: MemberRef::new(owner_id, list_id, member_id),
        })
    }

    pub fn target(&self) -> &MemberRef {
        match self {
            Mutation::Update(u) => &u.target,
            Mutation::Delete(d) => &d.target,
        }
    }
}

/// Updates and deletes to apply in a single `put`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Batch {
    updates: Vec<Update>,
    deletes: Vec<Delete>,
}

impl Batch {
    pub fn updates(&self) -> &[Update] {
        &self.updates
    }

    pub fn deletes(&self) -> &[Delete] {
        &self.deletes
    }

    /// Total number of mutations.
    pub fn len(&self) -> usize {
        self.updates.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Every key this batch writes to, deduplicated.
    pub fn touched_keys(&self) -> HashSet<OwnerKey> {
        self.updates
            .iter()
            .map(|u| u.target.key())
            .chain(self.deletes.iter().map(|d| d.target.key()))
            .collect()
    }

    pub(crate) fn into_parts(self) -> (Vec<Update>, Vec<Delete>) {
        (self.updates, self.deletes)
    }
}

impl FromIterator<Mutation> for Batch {
    fn from_iter<I: IntoIterator<Item = Mutation>>(iter: I) -> Self {
        let mut builder = BatchBuilder::new();
        builder.extend(iter);
        builder.build()
    }
}

/// Accumulates mutations for a [`Batch`].
///
/// No validation is done: empty strings are legal identifiers.
#[derive(Debug, Default)]
pub struct BatchBuilder {
    batch: Batch,
}

impl BatchBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_update(
        &mut self,
        owner_id: impl Into<String>,
        list_id: impl Into<String>,
        member_id: impl Into<String>,
        updated_at: SystemTime,
    ) -> &mut Self {
        self.batch.updates.push(Update {
            target: MemberRef::new(owner_id, list_id, member_id),
            updated_at,
        });
        self
    }

    pub fn add_delete(
        &mut self,
        owner_id: impl Into<String>,
        list_id: impl Into<String>,
        member_id: impl Into<String>,
    ) -> &mut Self {
        self.batch.deletes.push(Delete {
            target: MemberRef::new(owner_id, list_id, member_id),
        });
        self
    }

    pub fn push(&mut self, mutation: Mutation) -> &mut Self {
        match mutation {
            Mutation::Update(u) => self.batch.updates.push(u),
            Mutation::Delete(d) => self.batch.deletes.push(d),
        }
        self
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Finish the batch. The builder is consumed.
    #[must_use]
    pub fn build(self) -> Batch {
        self.batch
    }
}

impl Extend<Mutation> for BatchBuilder {
    fn extend<I: IntoIterator<Item = Mutation>>(&mut self, iter: I) {
        for mutation in iter {
            self.push(mutation);
        }
    }
}
