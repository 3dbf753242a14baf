use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::collaborators::{CertificateRenderer, NotificationSender};
use super::domain::{Request, RequestId, RequestState};

/// Mail templates the workflow asks the notification sender to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    SubmissionReceived,
    ResubmissionReceived,
    AdvancedToTechnicalReview,
    ReturnedForCorrection,
    ApprovedByDirectorGeneral,
    Rejected,
    Finalized,
    Withdrawn,
    CertificateIssued,
}

impl TemplateKind {
    pub const fn label(self) -> &'static str {
        match self {
            TemplateKind::SubmissionReceived => "submission_received",
            TemplateKind::ResubmissionReceived => "resubmission_received",
            TemplateKind::AdvancedToTechnicalReview => "advanced_to_technical_review",
            TemplateKind::ReturnedForCorrection => "returned_for_correction",
            TemplateKind::ApprovedByDirectorGeneral => "approved_by_director_general",
            TemplateKind::Rejected => "rejected",
            TemplateKind::Finalized => "finalized",
            TemplateKind::Withdrawn => "withdrawn",
            TemplateKind::CertificateIssued => "certificate_issued",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateOutcome {
    Approved,
    Rejected,
}

impl CertificateOutcome {
    pub const fn label(self) -> &'static str {
        match self {
            CertificateOutcome::Approved => "approved",
            CertificateOutcome::Rejected => "rejected",
        }
    }

    /// Watermark stamped across the rendered certificate.
    pub const fn watermark(self) -> &'static str {
        match self {
            CertificateOutcome::Approved => "APPROVED",
            CertificateOutcome::Rejected => "REJECTED",
        }
    }
}

/// Collaborator call implied by a committed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SideEffectIntent {
    NotifyApplicant(TemplateKind),
    IssueCertificate(CertificateOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateAttachment {
    pub file_name: String,
    pub outcome: CertificateOutcome,
    pub bytes: Vec<u8>,
}

/// Body handed to the notification sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub request_id: RequestId,
    pub state: RequestState,
    pub details: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<CertificateAttachment>,
}

impl NotificationPayload {
    fn for_request(request: &Request) -> Self {
        let mut details = BTreeMap::new();
        details.insert("state".to_string(), request.current_state.label().to_string());
        details.insert(
            "service_type".to_string(),
            request.service_type_id.0.clone(),
        );
        details.insert("review_cycle".to_string(), request.review_cycle.to_string());

        Self {
            request_id: request.id.clone(),
            state: request.current_state,
            details,
            attachment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SideEffectFailure {
    pub intent: SideEffectIntent,
    pub reason: String,
}

/// Result of one best-effort dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failures: Vec<SideEffectFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs side-effect intents after their transition has committed.
///
/// Each intent is attempted once. Failures are logged and reported but never
/// retried, and nothing here can reach back into the committed transition.
#[derive(Clone)]
pub struct SideEffectDispatcher {
    notifier: Arc<dyn NotificationSender>,
    renderer: Arc<dyn CertificateRenderer>,
    runtime: Handle,
}

impl fmt::Debug for SideEffectDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideEffectDispatcher").finish_non_exhaustive()
    }
}

impl SideEffectDispatcher {
    pub fn new(
        notifier: Arc<dyn NotificationSender>,
        renderer: Arc<dyn CertificateRenderer>,
        runtime: Handle,
    ) -> Self {
        Self {
            notifier,
            renderer,
            runtime,
        }
    }

    /// Schedule `intents` on the runtime's blocking pool; `None` when there is nothing to do.
    pub fn dispatch(
        &self,
        request: Request,
        intents: Vec<SideEffectIntent>,
    ) -> Option<JoinHandle<DispatchReport>> {
        if intents.is_empty() {
            return None;
        }

        let notifier = Arc::clone(&self.notifier);
        let renderer = Arc::clone(&self.renderer);
        Some(self.runtime.spawn_blocking(move || {
            execute(notifier.as_ref(), renderer.as_ref(), &request, &intents)
        }))
    }
}

/// Invoke collaborators for each intent in order.
pub fn execute(
    notifier: &dyn NotificationSender,
    renderer: &dyn CertificateRenderer,
    request: &Request,
    intents: &[SideEffectIntent],
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for intent in intents {
        report.attempted += 1;
        let result = match *intent {
            SideEffectIntent::NotifyApplicant(template) => notifier
                .notify(
                    &request.applicant_email,
                    template,
                    NotificationPayload::for_request(request),
                )
                .map_err(|err| err.to_string()),
            SideEffectIntent::IssueCertificate(outcome) => {
                issue_certificate(notifier, renderer, request, outcome)
            }
        };

        match result {
            Ok(()) => {
                report.delivered += 1;
                debug!(request_id = %request.id.0, ?intent, "side effect delivered");
            }
            Err(reason) => {
                warn!(request_id = %request.id.0, ?intent, %reason, "side effect failed");
                report.failures.push(SideEffectFailure {
                    intent: *intent,
                    reason,
                });
            }
        }
    }

    report
}

fn issue_certificate(
    notifier: &dyn NotificationSender,
    renderer: &dyn CertificateRenderer,
    request: &Request,
    outcome: CertificateOutcome,
) -> Result<(), String> {
    let bytes = renderer
        .render(request, outcome)
        .map_err(|err| err.to_string())?;

    let mut payload = NotificationPayload::for_request(request);
    payload
        .details
        .insert("watermark".to_string(), outcome.watermark().to_string());
    payload.attachment = Some(CertificateAttachment {
        file_name: format!("certificate-{}-{}.pdf", request.id.0, outcome.label()),
        outcome,
        bytes,
    });

    notifier
        .notify(
            &request.applicant_email,
            TemplateKind::CertificateIssued,
            payload,
        )
        .map_err(|err| err.to_string())
}
