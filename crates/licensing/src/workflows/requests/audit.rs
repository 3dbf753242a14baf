//! Append-only transition history.
//!
//! There is no update or delete path. The only way an entry reaches storage is
//! [`append_within_transaction`], which binds it to the transition transaction the
//! engine is about to commit; the store refuses transactions without one.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{Action, ActorId, ActorRole, IdentityContext, RequestId, RequestState};
use super::repository::{RepositoryError, TransitionTransaction};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryId(pub String);

static HISTORY_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_history_id() -> HistoryId {
    let id = HISTORY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    HistoryId(format!("hist-{id:08}"))
}

/// Immutable record of one committed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryId,
    pub request_id: RequestId,
    pub from_state: RequestState,
    pub to_state: RequestState,
    pub actor_id: ActorId,
    pub actor_role: ActorRole,
    pub action: Action,
    pub comment: String,
    pub metadata: BTreeMap<String, Value>,
    pub occurred_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Describe the move staged in `tx`.
    pub fn record(
        tx: &TransitionTransaction,
        identity: &IdentityContext,
        action: Action,
        comment: &str,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            id: next_history_id(),
            request_id: tx.request_id().clone(),
            from_state: tx.from(),
            to_state: tx.to(),
            actor_id: identity.actor_id.clone(),
            actor_role: identity.actor_role,
            action,
            comment: comment.trim().to_string(),
            metadata,
            occurred_at: tx.occurred_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    #[error("transition for request {0} already carries a history entry")]
    AlreadyRecorded(RequestId),
    #[error("history entry does not match the transition ({field})")]
    Mismatch { field: &'static str },
}

/// Bind `entry` to the transaction that will commit it.
pub fn append_within_transaction(
    entry: HistoryEntry,
    tx: &mut TransitionTransaction,
) -> Result<(), AuditError> {
    if tx.history().is_some() {
        return Err(AuditError::AlreadyRecorded(tx.request_id().clone()));
    }
    if &entry.request_id != tx.request_id() {
        return Err(AuditError::Mismatch {
            field: "request_id",
        });
    }
    if entry.from_state != tx.from() {
        return Err(AuditError::Mismatch {
            field: "from_state",
        });
    }
    if entry.to_state != tx.to() {
        return Err(AuditError::Mismatch { field: "to_state" });
    }

    tx.attach_history(entry);
    Ok(())
}

/// Read side of the audit log.
pub trait HistoryReader: Send + Sync {
    /// Entries for `request_id`, oldest first.
    fn list_by_request(&self, request_id: &RequestId)
        -> Result<Vec<HistoryEntry>, RepositoryError>;
}

/// Stable sort by `occurred_at`; entries sharing a timestamp keep insertion order.
pub fn ordered(mut entries: Vec<HistoryEntry>) -> Vec<HistoryEntry> {
    entries.sort_by(|left, right| left.occurred_at.cmp(&right.occurred_at));
    entries
}
