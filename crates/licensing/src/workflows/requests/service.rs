use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::audit::HistoryEntry;
use super::collaborators::{DocumentStore, DocumentStoreError};
use super::domain::{
    Action, ComplianceItem, DecisionInput, DocumentId, IdentityContext, ItemKey, NewRequest,
    Request, RequestId, RequestState,
};
use super::engine::{
    check_document_reference, MissingRecord, TransitionEngine, TransitionError, TransitionReceipt,
};
use super::ledger::{ReviewPolicy, ValidationLedger};
use super::repository::{RepositoryError, RequestSnapshot, RequestStore};
use super::transitions::{self, TransitionEdge};
use super::triggers::{DispatchReport, SideEffectDispatcher};

static REQUEST_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> RequestId {
    let id = REQUEST_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RequestId(format!("req-{id:06}"))
}

/// A committed transition plus the handle of its scheduled side effects.
#[derive(Debug)]
pub struct AppliedTransition {
    pub receipt: TransitionReceipt,
    /// `None` when the edge implies no side effects.
    pub side_effects: Option<JoinHandle<DispatchReport>>,
}

/// Entry point for request intake, ledger attachment and workflow actions.
pub struct LicensingService<S, D> {
    store: Arc<S>,
    documents: Arc<D>,
    engine: TransitionEngine<S, D>,
    dispatcher: SideEffectDispatcher,
}

impl<S, D> LicensingService<S, D>
where
    S: RequestStore + 'static,
    D: DocumentStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        documents: Arc<D>,
        policy: ReviewPolicy,
        dispatcher: SideEffectDispatcher,
    ) -> Self {
        let engine = TransitionEngine::new(Arc::clone(&store), Arc::clone(&documents), policy);
        Self {
            store,
            documents,
            engine,
            dispatcher,
        }
    }

    pub fn engine(&self) -> &TransitionEngine<S, D> {
        &self.engine
    }

    /// Open a new request in `Draft` as the root of its own lineage.
    pub fn create_request(&self, submission: NewRequest) -> Result<Request, RequestServiceError> {
        validate_submission(&submission)?;
        let id = next_request_id();
        let request = draft(id.clone(), id, submission);
        let stored = self.store.insert(request)?;
        info!(request_id = %stored.id, service_type = %stored.service_type_id, "request created");
        Ok(stored)
    }

    /// Open a follow-up request on the lineage of a finalized one.
    pub fn create_continuation(
        &self,
        original_id: &RequestId,
        form_data: BTreeMap<String, Value>,
    ) -> Result<Request, RequestServiceError> {
        let original = self.load(original_id)?.request;
        if original.current_state != RequestState::Finalized {
            return Err(RequestServiceError::ContinuationNotAllowed {
                request_id: original.id,
                state: original.current_state,
            });
        }

        let submission = NewRequest {
            applicant_id: original.applicant_id,
            applicant_email: original.applicant_email,
            service_type_id: original.service_type_id,
            form_data,
        };
        let request = draft(next_request_id(), original.lineage_id, submission);
        let stored = self.store.insert(request)?;
        info!(request_id = %stored.id, lineage_id = %stored.lineage_id, "continuation created");
        Ok(stored)
    }

    /// Track an uploaded document as an `Unknown` compliance item.
    pub fn attach_document(
        &self,
        request_id: &RequestId,
        document_id: &DocumentId,
    ) -> Result<ComplianceItem, RequestServiceError> {
        let request = self.open_request(request_id)?;
        check_document_reference(self.documents.as_ref(), &request, document_id)?;
        self.attach(&request, ItemKey::document(document_id))
    }

    /// Track a form field as an `Unknown` compliance item.
    pub fn attach_field(
        &self,
        request_id: &RequestId,
        field: &str,
    ) -> Result<ComplianceItem, RequestServiceError> {
        let request = self.open_request(request_id)?;
        if !request.form_data.contains_key(field) {
            return Err(RequestServiceError::NotFound(MissingRecord::Field(
                field.to_string(),
            )));
        }
        self.attach(&request, ItemKey::field(field))
    }

    /// Run one workflow action and hand its side effects to the dispatcher.
    pub fn apply(
        &self,
        request_id: &RequestId,
        identity: &IdentityContext,
        action: Action,
        input: DecisionInput,
    ) -> Result<AppliedTransition, RequestServiceError> {
        let receipt = self
            .engine
            .apply_transition(request_id, identity, action, input)?;
        let side_effects = self
            .dispatcher
            .dispatch(receipt.request.clone(), receipt.side_effects.clone());
        Ok(AppliedTransition {
            receipt,
            side_effects,
        })
    }

    pub fn get(&self, request_id: &RequestId) -> Result<Request, RequestServiceError> {
        Ok(self.load(request_id)?.request)
    }

    pub fn ledger(&self, request_id: &RequestId) -> Result<ValidationLedger, RequestServiceError> {
        Ok(self.load(request_id)?.ledger())
    }

    /// Audit trail for a request, oldest first.
    pub fn history(&self, request_id: &RequestId) -> Result<Vec<HistoryEntry>, RequestServiceError> {
        self.store
            .list_by_request(request_id)
            .map_err(|err| match err {
                RepositoryError::NotFound => {
                    RequestServiceError::NotFound(MissingRecord::Request(request_id.clone()))
                }
                other => RequestServiceError::Repository(other),
            })
    }

    /// Requests waiting in `state`, oldest first.
    pub fn queue(
        &self,
        state: RequestState,
        limit: usize,
    ) -> Result<Vec<Request>, RequestServiceError> {
        Ok(self.store.in_state(state, limit)?)
    }

    /// Edges a caller may currently take on the request.
    pub fn available_actions(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<&'static TransitionEdge>, RequestServiceError> {
        let request = self.get(request_id)?;
        Ok(transitions::available_actions(request.current_state).collect())
    }

    fn load(&self, request_id: &RequestId) -> Result<RequestSnapshot, RequestServiceError> {
        self.store
            .load(request_id)?
            .ok_or_else(|| RequestServiceError::NotFound(MissingRecord::Request(request_id.clone())))
    }

    fn open_request(&self, request_id: &RequestId) -> Result<Request, RequestServiceError> {
        let request = self.load(request_id)?.request;
        if request.current_state.is_terminal() {
            debug!(request_id = %request.id, state = %request.current_state, "attachment refused on closed request");
            return Err(RequestServiceError::Closed {
                request_id: request.id,
                state: request.current_state,
            });
        }
        Ok(request)
    }

    fn attach(&self, request: &Request, key: ItemKey) -> Result<ComplianceItem, RequestServiceError> {
        let item = self.store.attach_item(
            &request.id,
            ComplianceItem::unknown(key, request.review_cycle),
        )?;
        debug!(request_id = %request.id, item = %item.item_key.key, flag = %item.flag, "compliance item attached");
        Ok(item)
    }
}

impl<S, D> std::fmt::Debug for LicensingService<S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicensingService")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

fn validate_submission(submission: &NewRequest) -> Result<(), RequestServiceError> {
    if submission.applicant_id.0.trim().is_empty() {
        return Err(RequestServiceError::InvalidRequest(
            "applicant id is required".to_string(),
        ));
    }
    if submission.service_type_id.0.trim().is_empty() {
        return Err(RequestServiceError::InvalidRequest(
            "service type is required".to_string(),
        ));
    }
    if !submission.applicant_email.contains('@') {
        return Err(RequestServiceError::InvalidRequest(format!(
            "applicant email '{}' is not deliverable",
            submission.applicant_email
        )));
    }
    Ok(())
}

fn draft(id: RequestId, lineage_id: RequestId, submission: NewRequest) -> Request {
    let now = Utc::now();
    Request {
        id,
        applicant_id: submission.applicant_id,
        applicant_email: submission.applicant_email.trim().to_string(),
        service_type_id: submission.service_type_id,
        form_data: submission.form_data,
        current_state: RequestState::Draft,
        created_at: now,
        updated_at: now,
        lineage_id,
        version: 1,
        review_cycle: 1,
    }
}

/// Error raised by the licensing service.
#[derive(Debug, thiserror::Error)]
pub enum RequestServiceError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Documents(#[from] DocumentStoreError),
    #[error("{0} not found")]
    NotFound(MissingRecord),
    #[error("request {request_id} is {state} and no longer accepts changes")]
    Closed {
        request_id: RequestId,
        state: RequestState,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request {request_id} is {state}; continuations require a finalized request")]
    ContinuationNotAllowed {
        request_id: RequestId,
        state: RequestState,
    },
}
