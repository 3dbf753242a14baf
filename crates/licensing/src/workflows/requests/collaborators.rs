//! Interfaces to the I/O services the review workflow consumes.
//!
//! Document bytes, mail delivery and certificate layout live outside this crate;
//! the workflow only talks to them through these traits.

use serde::{Deserialize, Serialize};

use super::domain::{ApplicantId, DocumentId, Request};
use super::triggers::{CertificateOutcome, NotificationPayload, TemplateKind};

/// Metadata the document store reports for an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub exists: bool,
    pub owner_id: Option<ApplicantId>,
}

impl DocumentMeta {
    pub fn owned_by(owner: ApplicantId) -> Self {
        Self {
            exists: true,
            owner_id: Some(owner),
        }
    }

    pub fn missing() -> Self {
        Self {
            exists: false,
            owner_id: None,
        }
    }

    pub fn is_owned_by(&self, applicant: &ApplicantId) -> bool {
        self.exists && self.owner_id.as_ref() == Some(applicant)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentStoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

/// Lookup used to confirm a compliance item points at a real, applicant-owned document.
pub trait DocumentStore: Send + Sync {
    fn get_document_meta(&self, document_id: &DocumentId)
        -> Result<DocumentMeta, DocumentStoreError>;
}

/// Outbound mail hook (fire-and-forget from the workflow's point of view).
pub trait NotificationSender: Send + Sync {
    fn notify(
        &self,
        applicant_email: &str,
        template: TemplateKind,
        payload: NotificationPayload,
    ) -> Result<(), SendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
    #[error("recipient {recipient} rejected: {reason}")]
    Rejected { recipient: String, reason: String },
}

/// Produces the certificate document for a decided request.
pub trait CertificateRenderer: Send + Sync {
    fn render(&self, request: &Request, outcome: CertificateOutcome)
        -> Result<Vec<u8>, RenderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("certificate rendering failed: {0}")]
    Failed(String),
}
