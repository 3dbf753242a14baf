//! Licensing request lifecycle: the review state machine, the per-request
//! validation ledger, the append-only audit log and post-commit side effects.
//!
//! [`TransitionEngine::apply_transition`] is the only code path that changes a
//! request's state. Everything else reads, attaches ledger items, or schedules
//! the collaborator calls a committed transition asks for.

pub mod audit;
pub mod collaborators;
pub mod domain;
pub mod engine;
pub mod ledger;
pub mod memory;
pub mod repository;
pub mod service;
pub mod transitions;
pub mod triggers;

#[cfg(test)]
mod tests;

pub use audit::{HistoryEntry, HistoryId, HistoryReader};
pub use collaborators::{
    CertificateRenderer, DocumentMeta, DocumentStore, DocumentStoreError, NotificationSender,
    RenderError, SendError,
};
pub use domain::{
    Action, ActorId, ActorRole, ApplicantId, ComplianceFlag, ComplianceItem, DecisionInput,
    DocumentId, IdentityContext, ItemKey, ItemKind, ItemUpdate, NewRequest, Request, RequestId,
    RequestState, ServiceTypeId,
};
pub use engine::{MissingRecord, TransitionEngine, TransitionError, TransitionReceipt};
pub use ledger::{CycleResetPolicy, LedgerError, ReviewPolicy, ValidationLedger};
pub use memory::InMemoryRequestStore;
pub use repository::{RepositoryError, RequestSnapshot, RequestStore};
pub use service::{AppliedTransition, LicensingService, RequestServiceError};
pub use transitions::{Guard, GuardFailure, TransitionEdge, TRANSITIONS};
pub use triggers::{
    CertificateOutcome, DispatchReport, NotificationPayload, SideEffectDispatcher,
    SideEffectIntent, TemplateKind,
};
