use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use licensing::workflows::requests::{
    ApplicantId, CertificateOutcome, CertificateRenderer, DocumentId, DocumentMeta,
    DocumentStore, DocumentStoreError, NotificationPayload, NotificationSender, RenderError,
    Request, RequestState, SendError, TemplateKind,
};
use serde::Serialize;
use tracing::info;

/// Document metadata registry standing in for the upload service.
#[derive(Default, Clone)]
pub(crate) struct InMemoryDocumentStore {
    documents: Arc<Mutex<HashMap<DocumentId, ApplicantId>>>,
}

impl InMemoryDocumentStore {
    pub(crate) fn register(&self, document_id: &DocumentId, owner: &ApplicantId) {
        self.documents
            .lock()
            .expect("document mutex poisoned")
            .insert(document_id.clone(), owner.clone());
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get_document_meta(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentMeta, DocumentStoreError> {
        let documents = self
            .documents
            .lock()
            .map_err(|_| DocumentStoreError::Unavailable("document registry poisoned".to_string()))?;
        Ok(match documents.get(document_id) {
            Some(owner) => DocumentMeta::owned_by(owner.clone()),
            None => DocumentMeta::missing(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OutboundMail {
    pub(crate) recipient: String,
    pub(crate) template: TemplateKind,
    pub(crate) state: RequestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) attachment: Option<String>,
}

/// Notification sender that logs and keeps every message instead of mailing it.
#[derive(Default, Clone)]
pub(crate) struct InMemoryOutbox {
    sent: Arc<Mutex<Vec<OutboundMail>>>,
}

impl NotificationSender for InMemoryOutbox {
    fn notify(
        &self,
        applicant_email: &str,
        template: TemplateKind,
        payload: NotificationPayload,
    ) -> Result<(), SendError> {
        info!(
            request_id = %payload.request_id,
            template = template.label(),
            recipient = applicant_email,
            "notification queued"
        );
        let mut guard = self
            .sent
            .lock()
            .map_err(|_| SendError::Transport("outbox poisoned".to_string()))?;
        guard.push(OutboundMail {
            recipient: applicant_email.to_string(),
            template,
            state: payload.state,
            attachment: payload.attachment.map(|attachment| attachment.file_name),
        });
        Ok(())
    }
}

impl InMemoryOutbox {
    pub(crate) fn sent(&self) -> Vec<OutboundMail> {
        self.sent.lock().expect("outbox mutex poisoned").clone()
    }
}

/// Renders a plain-text certificate body.
#[derive(Default, Clone, Copy)]
pub(crate) struct TextCertificateRenderer;

impl CertificateRenderer for TextCertificateRenderer {
    fn render(
        &self,
        request: &Request,
        outcome: CertificateOutcome,
    ) -> Result<Vec<u8>, RenderError> {
        let body = format!(
            "[{}]\nrequest: {}\nservice: {}\napplicant: {}\nreview cycle: {}\n",
            outcome.watermark(),
            request.id,
            request.service_type_id,
            request.applicant_id,
            request.review_cycle,
        );
        Ok(body.into_bytes())
    }
}

pub(crate) fn parse_state(raw: &str) -> Result<RequestState, String> {
    let wanted = raw.trim().to_ascii_lowercase().replace('-', "_");
    RequestState::ALL
        .into_iter()
        .find(|state| state.label() == wanted)
        .ok_or_else(|| format!("unknown request state '{raw}'"))
}
