//! End-to-end scenarios for the licensing request lifecycle.
//!
//! Everything goes through the public service facade with in-memory collaborators, so
//! these cover the state machine, ledger, audit trail and side effects together.

mod common {
    use std::collections::{BTreeMap, HashSet};
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use licensing::workflows::requests::{
        ActorRole, ApplicantId, CertificateOutcome, CertificateRenderer, DocumentId,
        DocumentMeta, DocumentStore, DocumentStoreError, IdentityContext, InMemoryRequestStore,
        LicensingService, NewRequest, NotificationPayload, NotificationSender, RenderError,
        Request, ReviewPolicy, SendError, ServiceTypeId, SideEffectDispatcher, TemplateKind,
    };

    pub(super) const OWNER: &str = "applicant-301";

    pub(super) struct OwnedDocuments(pub(super) HashSet<String>);

    impl DocumentStore for OwnedDocuments {
        fn get_document_meta(
            &self,
            document_id: &DocumentId,
        ) -> Result<DocumentMeta, DocumentStoreError> {
            if self.0.contains(&document_id.0) {
                Ok(DocumentMeta::owned_by(ApplicantId(OWNER.to_string())))
            } else {
                Ok(DocumentMeta::missing())
            }
        }
    }

    #[derive(Default)]
    pub(super) struct Outbox(pub(super) Mutex<Vec<(TemplateKind, NotificationPayload)>>);

    impl Outbox {
        pub(super) fn templates(&self) -> Vec<TemplateKind> {
            self.0
                .lock()
                .expect("outbox mutex poisoned")
                .iter()
                .map(|(template, _)| *template)
                .collect()
        }

        pub(super) fn watermarks(&self) -> Vec<String> {
            self.0
                .lock()
                .expect("outbox mutex poisoned")
                .iter()
                .filter_map(|(_, payload)| payload.details.get("watermark").cloned())
                .collect()
        }
    }

    impl NotificationSender for Outbox {
        fn notify(
            &self,
            _applicant_email: &str,
            template: TemplateKind,
            payload: NotificationPayload,
        ) -> Result<(), SendError> {
            self.0
                .lock()
                .expect("outbox mutex poisoned")
                .push((template, payload));
            Ok(())
        }
    }

    pub(super) struct PlainRenderer;

    impl CertificateRenderer for PlainRenderer {
        fn render(
            &self,
            request: &Request,
            outcome: CertificateOutcome,
        ) -> Result<Vec<u8>, RenderError> {
            Ok(format!("{} {}", request.id, outcome.watermark()).into_bytes())
        }
    }

    pub(super) fn service(
        outbox: Arc<Outbox>,
    ) -> LicensingService<InMemoryRequestStore, OwnedDocuments> {
        let documents = OwnedDocuments(
            ["doc-health-permit", "doc-lease"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        );
        let dispatcher = SideEffectDispatcher::new(
            outbox,
            Arc::new(PlainRenderer),
            tokio::runtime::Handle::current(),
        );
        LicensingService::new(
            Arc::new(InMemoryRequestStore::default()),
            Arc::new(documents),
            ReviewPolicy::default(),
            dispatcher,
        )
    }

    pub(super) fn submission() -> NewRequest {
        let mut form_data = BTreeMap::new();
        form_data.insert("trade_name".to_string(), json!("Botica San Rafael"));
        NewRequest {
            applicant_id: ApplicantId(OWNER.to_string()),
            applicant_email: "rafael@botica.example".to_string(),
            service_type_id: ServiceTypeId("pharmacy-license".to_string()),
            form_data,
        }
    }

    pub(super) fn actor(role: ActorRole) -> IdentityContext {
        IdentityContext::new(format!("{}-1", role.label()), role)
    }
}

use std::sync::Arc;

use licensing::workflows::requests::{
    Action, ActorRole, ComplianceFlag, DecisionInput, DocumentId, GuardFailure, ItemKey,
    LicensingService, RequestId, RequestServiceError, RequestState, RequestStore, DocumentStore,
    TemplateKind, TransitionError,
};

use common::*;

async fn step<S, D>(
    service: &LicensingService<S, D>,
    id: &RequestId,
    role: ActorRole,
    action: Action,
    input: DecisionInput,
) -> Result<RequestState, RequestServiceError>
where
    S: RequestStore + 'static,
    D: DocumentStore + 'static,
{
    let version = service.get(id)?.version;
    let applied = service.apply(
        id,
        &actor(role),
        action,
        DecisionInput {
            expected_version: version,
            ..input
        },
    )?;
    if let Some(handle) = applied.side_effects {
        handle.await.expect("side effects join");
    }
    Ok(applied.receipt.request.current_state)
}

fn all_compliant() -> DecisionInput {
    DecisionInput::default()
        .with_flag(
            ItemKey::document(&DocumentId("doc-health-permit".to_string())),
            ComplianceFlag::Compliant,
        )
        .with_flag(
            ItemKey::document(&DocumentId("doc-lease".to_string())),
            ComplianceFlag::Compliant,
        )
        .with_flag(ItemKey::field("trade_name"), ComplianceFlag::Compliant)
}

#[tokio::test]
async fn technical_return_loop_then_finalize() {
    let outbox = Arc::new(Outbox::default());
    let service = service(outbox.clone());

    let request = service.create_request(submission()).expect("request created");
    let id = request.id.clone();
    for document in ["doc-health-permit", "doc-lease"] {
        service
            .attach_document(&id, &DocumentId(document.to_string()))
            .expect("document attached");
    }
    service
        .attach_field(&id, "trade_name")
        .expect("field attached");

    let path = [
        (ActorRole::Applicant, Action::Submit, DecisionInput::default()),
        (ActorRole::DeskReviewer, Action::StartDeskReview, DecisionInput::default()),
        (ActorRole::DeskReviewer, Action::DeskApprove, all_compliant()),
    ];
    for (role, action, input) in path {
        step(&service, &id, role, action, input)
            .await
            .expect("step commits");
    }

    let lease = ItemKey::document(&DocumentId("doc-lease".to_string()));
    let returned = step(
        &service,
        &id,
        ActorRole::TechnicalReviewer,
        Action::TechnicalReturn,
        DecisionInput::default()
            .with_flag(lease.clone(), ComplianceFlag::NonCompliant)
            .with_comment("lease expires before the license term"),
    )
    .await
    .expect("technical return");
    assert_eq!(returned, RequestState::TechnicalReturned);

    let resubmitted = step(
        &service,
        &id,
        ActorRole::Applicant,
        Action::Submit,
        DecisionInput::default().with_comment("renewed lease uploaded"),
    )
    .await
    .expect("resubmission");
    assert_eq!(resubmitted, RequestState::UnderTechnicalReview);

    let premature = step(
        &service,
        &id,
        ActorRole::TechnicalReviewer,
        Action::TechnicalApprove,
        DecisionInput::default(),
    )
    .await;
    assert!(matches!(
        premature,
        Err(RequestServiceError::Transition(
            TransitionError::GuardNotSatisfied(GuardFailure::NotAllCompliant)
        ))
    ));

    let path = [
        (
            ActorRole::TechnicalReviewer,
            Action::TechnicalApprove,
            DecisionInput::default().with_flag(lease, ComplianceFlag::Compliant),
        ),
        (
            ActorRole::TechnicalDirector,
            Action::TechnicalDirectorApprove,
            DecisionInput::default(),
        ),
        (ActorRole::DirectorGeneral, Action::GeneralApprove, DecisionInput::default()),
        (ActorRole::DncdReviewer, Action::DncdFinalize, DecisionInput::default()),
    ];
    let mut state = resubmitted;
    for (role, action, input) in path {
        state = step(&service, &id, role, action, input)
            .await
            .expect("step commits");
    }
    assert_eq!(state, RequestState::Finalized);

    let stored = service.get(&id).expect("request loads");
    assert_eq!(stored.review_cycle, 2);
    let history = service.history(&id).expect("history");
    assert_eq!(history.len() as u64, stored.version - 1);
    assert_eq!(history.last().map(|entry| entry.action), Some(Action::DncdFinalize));

    assert_eq!(outbox.watermarks(), vec!["APPROVED".to_string()]);
    assert!(outbox.templates().contains(&TemplateKind::ResubmissionReceived));
}

#[tokio::test]
async fn director_general_rejection_is_final() {
    let outbox = Arc::new(Outbox::default());
    let service = service(outbox.clone());

    let request = service.create_request(submission()).expect("request created");
    let id = request.id.clone();
    service
        .attach_document(&id, &DocumentId("doc-health-permit".to_string()))
        .expect("document attached");
    let permit = ItemKey::document(&DocumentId("doc-health-permit".to_string()));

    let path = [
        (ActorRole::Applicant, Action::Submit, DecisionInput::default()),
        (ActorRole::DeskReviewer, Action::StartDeskReview, DecisionInput::default()),
        (
            ActorRole::DeskReviewer,
            Action::DeskApprove,
            DecisionInput::default().with_flag(permit.clone(), ComplianceFlag::Compliant),
        ),
        (ActorRole::TechnicalReviewer, Action::TechnicalApprove, DecisionInput::default()),
        (
            ActorRole::TechnicalDirector,
            Action::TechnicalDirectorApprove,
            DecisionInput::default(),
        ),
        (
            ActorRole::DirectorGeneral,
            Action::GeneralReject,
            DecisionInput::default()
                .with_flag(permit, ComplianceFlag::NonCompliant)
                .with_comment("sanitary inspection failed"),
        ),
    ];
    let mut state = RequestState::Draft;
    for (role, action, input) in path {
        state = step(&service, &id, role, action, input)
            .await
            .expect("step commits");
    }
    assert_eq!(state, RequestState::RejectedByDirectorGeneral);
    assert_eq!(outbox.watermarks(), vec!["REJECTED".to_string()]);

    let after = step(
        &service,
        &id,
        ActorRole::Applicant,
        Action::Submit,
        DecisionInput::default(),
    )
    .await;
    assert!(matches!(
        after,
        Err(RequestServiceError::Transition(
            TransitionError::NoSuchTransition { .. }
        ))
    ));
}
