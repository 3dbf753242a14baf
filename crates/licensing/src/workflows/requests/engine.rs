use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::audit::{self, AuditError, HistoryEntry};
use super::collaborators::{DocumentStore, DocumentStoreError};
use super::domain::{
    Action, ActorRole, DecisionInput, DocumentId, IdentityContext, ItemKey, ItemKind, Request,
    RequestId, RequestState,
};
use super::ledger::{FlagChange, LedgerError, ReviewPolicy, ValidationLedger};
use super::repository::{RepositoryError, RequestStore, TransitionTransaction};
use super::transitions::{self, CycleEffect, GuardFailure};
use super::triggers::SideEffectIntent;

/// Everything a caller needs after a committed transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionReceipt {
    pub request: Request,
    pub entry: HistoryEntry,
    /// Collaborator calls the caller should schedule; never run inline.
    pub side_effects: Vec<SideEffectIntent>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MissingRecord {
    #[error("request {0}")]
    Request(RequestId),
    #[error("document {0}")]
    Document(DocumentId),
    #[error("form field {0}")]
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComplianceEditError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("document {0} is not owned by the applicant")]
    ForeignDocument(DocumentId),
}

/// Typed failures of `apply_transition`; none of them leaves a partial write behind.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("no transition for {action} from {state}")]
    NoSuchTransition { state: RequestState, action: Action },
    #[error("{action} requires role {required}, caller is {actual}")]
    Forbidden {
        action: Action,
        required: ActorRole,
        actual: ActorRole,
    },
    #[error("guard not satisfied: {0}")]
    GuardNotSatisfied(GuardFailure),
    #[error("invalid compliance edit: {0}")]
    InvalidComplianceEdit(ComplianceEditError),
    #[error("request modified concurrently (expected version {expected}, found {actual})")]
    ConcurrentModification { expected: u64, actual: u64 },
    #[error("compliance items of version {version} changed before commit")]
    LedgerChanged { version: u64 },
    #[error("{0} not found")]
    NotFound(MissingRecord),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Documents(#[from] DocumentStoreError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl TransitionError {
    fn from_repository(request_id: &RequestId, err: RepositoryError) -> Self {
        match err {
            RepositoryError::VersionConflict { expected, actual } => {
                TransitionError::ConcurrentModification { expected, actual }
            }
            RepositoryError::LedgerChanged { version } => TransitionError::LedgerChanged { version },
            RepositoryError::NotFound => {
                TransitionError::NotFound(MissingRecord::Request(request_id.clone()))
            }
            other => TransitionError::Repository(other),
        }
    }
}

/// Sole writer of request state: resolves edges, checks roles and guards, and
/// commits state, ledger changes and the history entry in one store commit.
pub struct TransitionEngine<S, D> {
    store: Arc<S>,
    documents: Arc<D>,
    policy: Arc<ReviewPolicy>,
}

impl<S, D> TransitionEngine<S, D>
where
    S: RequestStore + 'static,
    D: DocumentStore + 'static,
{
    pub fn new(store: Arc<S>, documents: Arc<D>, policy: ReviewPolicy) -> Self {
        Self {
            store,
            documents,
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &ReviewPolicy {
        &self.policy
    }

    pub fn apply_transition(
        &self,
        request_id: &RequestId,
        identity: &IdentityContext,
        action: Action,
        input: DecisionInput,
    ) -> Result<TransitionReceipt, TransitionError> {
        let snapshot = self
            .store
            .load(request_id)
            .map_err(|err| TransitionError::from_repository(request_id, err))?
            .ok_or_else(|| TransitionError::NotFound(MissingRecord::Request(request_id.clone())))?;
        let request = &snapshot.request;

        if request.version != input.expected_version {
            debug!(request_id = %request_id, expected = input.expected_version, actual = request.version, "stale transition attempt");
            return Err(TransitionError::ConcurrentModification {
                expected: input.expected_version,
                actual: request.version,
            });
        }

        let edge = transitions::resolve(request.current_state, action).ok_or(
            TransitionError::NoSuchTransition {
                state: request.current_state,
                action,
            },
        )?;

        if identity.actor_role != edge.required_role {
            debug!(request_id = %request_id, action = action.label(), role = identity.actor_role.label(), "role refused");
            return Err(TransitionError::Forbidden {
                action,
                required: edge.required_role,
                actual: identity.actor_role,
            });
        }

        let now = Utc::now().max(request.updated_at);
        let mut ledger = snapshot.ledger();
        let mut tx = TransitionTransaction::begin(request, edge.to, now)
            .observing(snapshot.items.iter().map(|item| &item.item_key));

        for update in &input.item_updates {
            self.verify_item_reference(request, &ledger, &update.item)?;
            let change = ledger
                .set_flag(update.item.clone(), update.flag, identity, now)
                .map_err(|err| TransitionError::InvalidComplianceEdit(err.into()))?;
            if change != FlagChange::Unchanged {
                if let Some(item) = ledger.get(&update.item) {
                    tx.stage_item(item.clone());
                }
            }
        }

        let decision = ledger.decision(&input.comment);
        if let Err(failure) = edge.guard.evaluate(&decision) {
            debug!(request_id = %request_id, action = action.label(), %failure, "guard refused transition");
            return Err(TransitionError::GuardNotSatisfied(failure));
        }

        let mut metadata = input.metadata;
        if !input.item_updates.is_empty() {
            let updates: Vec<Value> = input
                .item_updates
                .iter()
                .map(|update| {
                    json!({
                        "kind": update.item.kind,
                        "key": update.item.key,
                        "flag": update.flag.label(),
                    })
                })
                .collect();
            metadata.insert("item_updates".to_string(), Value::Array(updates));
        }

        if edge.cycle == CycleEffect::BeginNewCycle {
            let policy = self.policy.for_service_type(&request.service_type_id);
            for item in ledger.clear_for_new_cycle(policy) {
                tx.stage_item(item);
            }
            tx.open_cycle(ledger.cycle());
            metadata.insert("cycle_policy".to_string(), json!(policy.label()));
        }
        metadata.insert("review_cycle".to_string(), json!(tx.review_cycle()));

        let entry = HistoryEntry::record(&tx, identity, action, &input.comment, metadata);
        audit::append_within_transaction(entry.clone(), &mut tx)?;

        let committed = self
            .store
            .commit(tx)
            .map_err(|err| TransitionError::from_repository(request_id, err))?;

        info!(
            request_id = %committed.id,
            action = action.label(),
            from = entry.from_state.label(),
            to = entry.to_state.label(),
            version = committed.version,
            actor = %identity.actor_id,
            "transition committed"
        );

        Ok(TransitionReceipt {
            request: committed,
            entry,
            side_effects: edge.side_effects.to_vec(),
        })
    }

    fn verify_item_reference(
        &self,
        request: &Request,
        ledger: &ValidationLedger,
        key: &ItemKey,
    ) -> Result<(), TransitionError> {
        if ledger.contains(key) {
            return Ok(());
        }

        match key.kind {
            ItemKind::Field if request.form_data.contains_key(&key.key) => Ok(()),
            ItemKind::Field => Err(TransitionError::NotFound(MissingRecord::Field(
                key.key.clone(),
            ))),
            ItemKind::Document => check_document_reference(
                self.documents.as_ref(),
                request,
                &DocumentId(key.key.clone()),
            ),
        }
    }
}

/// Confirm `document_id` exists and belongs to the request's applicant.
pub(crate) fn check_document_reference<D>(
    documents: &D,
    request: &Request,
    document_id: &DocumentId,
) -> Result<(), TransitionError>
where
    D: DocumentStore + ?Sized,
{
    let meta = documents.get_document_meta(document_id)?;
    if !meta.exists {
        return Err(TransitionError::NotFound(MissingRecord::Document(
            document_id.clone(),
        )));
    }
    if !meta.is_owned_by(&request.applicant_id) {
        debug!(request_id = %request.id, document_id = %document_id, "document owned by another applicant");
        return Err(TransitionError::InvalidComplianceEdit(
            ComplianceEditError::ForeignDocument(document_id.clone()),
        ));
    }
    Ok(())
}

impl<S, D> std::fmt::Debug for TransitionEngine<S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
