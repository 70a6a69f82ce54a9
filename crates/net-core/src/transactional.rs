//! Transactional records
//!
//! A record keeps a snapshot of the last known state and any number of open
//! transactions, each a full copy of the record. Mutations go to the newest
//! transaction; notification ingestion writes the snapshot directly.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UsageError;

/// Identifier of an open transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How mutations outside of an explicit `begin()` are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// The first mutation opens a transaction
    #[default]
    Implicit,
    /// Mutations require an open transaction
    Explicit,
    /// Detached template; mutations go straight into the record
    Snapshot,
    /// The record is dead
    Invalid,
}

/// State that can be diffed against a desired copy of itself
pub trait Record: Clone {
    type Patch;

    /// Difference turning `self` into `desired`
    fn diff(&self, desired: &Self) -> Self::Patch;
}

#[derive(Debug)]
pub struct Transactional<R> {
    snapshot: R,
    transactions: IndexMap<TransactionId, R>,
    mode: CommitMode,
}

impl<R: Record> Transactional<R> {
    pub fn new(snapshot: R, mode: CommitMode) -> Self {
        Self {
            snapshot,
            transactions: IndexMap::new(),
            mode,
        }
    }

    pub fn mode(&self) -> CommitMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: CommitMode) {
        self.mode = mode;
    }

    pub fn is_invalid(&self) -> bool {
        self.mode == CommitMode::Invalid
    }

    /// Open a transaction as a copy of the snapshot
    pub fn begin(&mut self) -> TransactionId {
        let id = TransactionId::new();
        self.transactions.insert(id, self.snapshot.clone());
        id
    }

    /// Record that receives user mutations.
    ///
    /// The newest transaction if any; otherwise one is opened in implicit
    /// mode, the snapshot itself is used in snapshot mode, and explicit
    /// mode refuses.
    pub fn last(&mut self) -> Result<&mut R, UsageError> {
        if self.transactions.is_empty() {
            match self.mode {
                CommitMode::Implicit => {
                    self.begin();
                }
                CommitMode::Snapshot => return Ok(&mut self.snapshot),
                CommitMode::Explicit => return Err(UsageError::NoTransaction),
                CommitMode::Invalid => {
                    return Err(UsageError::Invalidated {
                        name: String::new(),
                    })
                }
            }
        }
        self.transactions
            .last_mut()
            .map(|(_, record)| record)
            .ok_or(UsageError::NoTransaction)
    }

    pub fn last_id(&self) -> Option<TransactionId> {
        self.transactions.last().map(|(id, _)| *id)
    }

    pub fn transaction(&self, id: &TransactionId) -> Result<&R, UsageError> {
        self.transactions
            .get(id)
            .ok_or_else(|| UsageError::UnknownTransaction { id: id.to_string() })
    }

    pub fn transaction_mut(&mut self, id: &TransactionId) -> Result<&mut R, UsageError> {
        self.transactions
            .get_mut(id)
            .ok_or_else(|| UsageError::UnknownTransaction { id: id.to_string() })
    }

    pub fn transactions_mut(&mut self) -> impl Iterator<Item = &mut R> {
        self.transactions.values_mut()
    }

    pub fn drop_transaction(&mut self, id: &TransactionId) -> Option<R> {
        self.transactions.shift_remove(id)
    }

    pub fn open_transactions(&self) -> usize {
        self.transactions.len()
    }

    pub fn snapshot(&self) -> &R {
        &self.snapshot
    }

    /// Direct write access; reserved for notification ingestion
    pub(crate) fn snapshot_mut(&mut self) -> &mut R {
        &mut self.snapshot
    }

    /// Patch between the snapshot and transaction `id`
    pub fn review(&self, id: &TransactionId) -> Result<R::Patch, UsageError> {
        let transaction = self.transaction(id)?;
        Ok(self.snapshot.diff(transaction))
    }

    /// Mark the record dead and discard every transaction
    pub fn invalidate(&mut self, empty: R) {
        self.mode = CommitMode::Invalid;
        self.transactions.clear();
        self.snapshot = empty;
    }
}
