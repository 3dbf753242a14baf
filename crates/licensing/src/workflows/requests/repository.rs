use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::audit::{HistoryEntry, HistoryReader};
use super::domain::{ComplianceItem, ItemKey, Request, RequestId, RequestState};
use super::ledger::ValidationLedger;

/// A request row together with its compliance items, as read at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub request: Request,
    pub items: Vec<ComplianceItem>,
}

impl RequestSnapshot {
    pub fn ledger(&self) -> ValidationLedger {
        ValidationLedger::from_items(
            self.request.id.clone(),
            self.request.review_cycle,
            self.items.iter().cloned(),
        )
    }
}

/// Writes staged by a single transition and committed all-or-nothing.
///
/// Carries the version and the compliance item keys the engine read; the store
/// re-checks both under its own lock so a stale transaction is refused rather
/// than applied.
#[derive(Debug, Clone)]
pub struct TransitionTransaction {
    request_id: RequestId,
    expected_version: u64,
    from: RequestState,
    to: RequestState,
    review_cycle: u32,
    occurred_at: DateTime<Utc>,
    read_items: BTreeSet<ItemKey>,
    item_writes: BTreeMap<ItemKey, ComplianceItem>,
    history: Option<HistoryEntry>,
}

impl TransitionTransaction {
    pub fn begin(request: &Request, to: RequestState, occurred_at: DateTime<Utc>) -> Self {
        Self {
            request_id: request.id.clone(),
            expected_version: request.version,
            from: request.current_state,
            to,
            review_cycle: request.review_cycle,
            occurred_at,
            read_items: BTreeSet::new(),
            item_writes: BTreeMap::new(),
            history: None,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn expected_version(&self) -> u64 {
        self.expected_version
    }

    pub fn from(&self) -> RequestState {
        self.from
    }

    pub fn to(&self) -> RequestState {
        self.to
    }

    pub fn review_cycle(&self) -> u32 {
        self.review_cycle
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Record the item keys the guard was evaluated against.
    pub fn observing<'a, I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = &'a ItemKey>,
    {
        self.read_items = keys.into_iter().cloned().collect();
        self
    }

    pub fn read_items(&self) -> &BTreeSet<ItemKey> {
        &self.read_items
    }

    pub fn stage_item(&mut self, item: ComplianceItem) {
        self.item_writes.insert(item.item_key.clone(), item);
    }

    pub fn open_cycle(&mut self, review_cycle: u32) {
        self.review_cycle = review_cycle;
    }

    pub fn item_writes(&self) -> impl Iterator<Item = &ComplianceItem> {
        self.item_writes.values()
    }

    pub fn history(&self) -> Option<&HistoryEntry> {
        self.history.as_ref()
    }

    pub(super) fn attach_history(&mut self, entry: HistoryEntry) {
        self.history = Some(entry);
    }

    /// The request row as it reads once this transaction commits.
    pub fn apply_to(&self, request: &Request) -> Request {
        Request {
            current_state: self.to,
            version: request.version + 1,
            review_cycle: self.review_cycle,
            updated_at: self.occurred_at,
            ..request.clone()
        }
    }

    pub fn into_parts(self) -> (Vec<ComplianceItem>, Option<HistoryEntry>) {
        (self.item_writes.into_values().collect(), self.history)
    }
}

/// Storage abstraction for requests, their ledger rows and their history.
pub trait RequestStore: HistoryReader {
    fn insert(&self, request: Request) -> Result<Request, RepositoryError>;
    fn load(&self, id: &RequestId) -> Result<Option<RequestSnapshot>, RepositoryError>;
    /// Add an `Unknown` item if absent; returns the stored item either way.
    fn attach_item(
        &self,
        id: &RequestId,
        item: ComplianceItem,
    ) -> Result<ComplianceItem, RepositoryError>;
    /// Atomically apply state, item writes and history, refusing stale versions
    /// and item sets that changed since they were read.
    fn commit(&self, tx: TransitionTransaction) -> Result<Request, RepositoryError>;
    fn in_state(&self, state: RequestState, limit: usize) -> Result<Vec<Request>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("version conflict (expected {expected}, found {actual})")]
    VersionConflict { expected: u64, actual: u64 },
    #[error("compliance items changed after version {version} was read")]
    LedgerChanged { version: u64 },
    #[error("transition committed without a history entry")]
    MissingHistory,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
