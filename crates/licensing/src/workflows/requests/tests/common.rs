use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;

use crate::workflows::requests::collaborators::{
    CertificateRenderer, DocumentMeta, DocumentStore, DocumentStoreError, NotificationSender,
    RenderError, SendError,
};
use crate::workflows::requests::domain::{
    ActorRole, ApplicantId, ComplianceFlag, ComplianceItem, DecisionInput, DocumentId,
    IdentityContext, ItemKey, NewRequest, Request, RequestId, RequestState, ServiceTypeId,
};
use crate::workflows::requests::engine::TransitionEngine;
use crate::workflows::requests::ledger::ReviewPolicy;
use crate::workflows::requests::memory::InMemoryRequestStore;
use crate::workflows::requests::repository::RequestStore;
use crate::workflows::requests::triggers::{
    CertificateOutcome, NotificationPayload, SideEffectDispatcher, TemplateKind,
};
use crate::workflows::requests::{Action, LicensingService};

pub(super) const APPLICANT: &str = "applicant-17";
pub(super) const SERVICE_TYPE: &str = "pharmacy-license";
pub(super) const PERMIT: &str = "doc-permit";
pub(super) const FLOOR_PLAN: &str = "doc-floor-plan";

#[derive(Default)]
pub(super) struct MemoryDocuments {
    documents: Mutex<HashMap<DocumentId, DocumentMeta>>,
    unavailable: AtomicBool,
}

impl MemoryDocuments {
    pub(super) fn with_owned(ids: &[&str]) -> Self {
        let store = Self::default();
        for id in ids {
            store.insert(id, APPLICANT);
        }
        store
    }

    pub(super) fn insert(&self, id: &str, owner: &str) {
        self.documents.lock().expect("documents mutex poisoned").insert(
            DocumentId(id.to_string()),
            DocumentMeta::owned_by(ApplicantId(owner.to_string())),
        );
    }

    pub(super) fn go_offline(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }
}

impl DocumentStore for MemoryDocuments {
    fn get_document_meta(&self, document_id: &DocumentId) -> Result<DocumentMeta, DocumentStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::Unavailable("storage offline".to_string()));
        }
        Ok(self
            .documents
            .lock()
            .expect("documents mutex poisoned")
            .get(document_id)
            .cloned()
            .unwrap_or_else(DocumentMeta::missing))
    }
}

#[derive(Debug, Clone)]
pub(super) struct SentNotification {
    pub(super) recipient: String,
    pub(super) template: TemplateKind,
    pub(super) payload: NotificationPayload,
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: Mutex<HashSet<TemplateKind>>,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub(super) fn fail_on(&self, template: TemplateKind) {
        self.failing
            .lock()
            .expect("failing mutex poisoned")
            .insert(template);
    }

    pub(super) fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().expect("sent mutex poisoned").clone()
    }

    pub(super) fn templates(&self) -> Vec<TemplateKind> {
        self.sent().into_iter().map(|sent| sent.template).collect()
    }

    pub(super) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl NotificationSender for RecordingNotifier {
    fn notify(
        &self,
        applicant_email: &str,
        template: TemplateKind,
        payload: NotificationPayload,
    ) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .failing
            .lock()
            .expect("failing mutex poisoned")
            .contains(&template)
        {
            return Err(SendError::Transport("smtp relay refused connection".to_string()));
        }
        self.sent
            .lock()
            .expect("sent mutex poisoned")
            .push(SentNotification {
                recipient: applicant_email.to_string(),
                template,
                payload,
            });
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct StubRenderer {
    broken: AtomicBool,
    renders: AtomicUsize,
}

impl StubRenderer {
    pub(super) fn broken() -> Self {
        let renderer = Self::default();
        renderer.broken.store(true, Ordering::SeqCst);
        renderer
    }

    pub(super) fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl CertificateRenderer for StubRenderer {
    fn render(&self, request: &Request, outcome: CertificateOutcome) -> Result<Vec<u8>, RenderError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            return Err(RenderError::Failed("template missing".to_string()));
        }
        Ok(format!("{}:{}", request.id, outcome.watermark()).into_bytes())
    }
}

pub(super) fn identity(role: ActorRole) -> IdentityContext {
    let actor = match role {
        ActorRole::Applicant => APPLICANT,
        ActorRole::DeskReviewer => "desk-01",
        ActorRole::TechnicalReviewer => "tech-01",
        ActorRole::TechnicalDirector => "td-01",
        ActorRole::DirectorGeneral => "dg-01",
        ActorRole::DncdReviewer => "dncd-01",
    };
    IdentityContext::new(actor, role)
}

pub(super) fn new_request() -> NewRequest {
    let mut form_data = BTreeMap::new();
    form_data.insert("establishment_name".to_string(), json!("Farmacia Central"));
    form_data.insert("pharmacist_license".to_string(), json!("QF-2291"));
    NewRequest {
        applicant_id: ApplicantId(APPLICANT.to_string()),
        applicant_email: "owner@farmacia.example".to_string(),
        service_type_id: ServiceTypeId(SERVICE_TYPE.to_string()),
        form_data,
    }
}

/// Insert a request directly in `state` with the given ledger items.
pub(super) fn seed_request(
    store: &InMemoryRequestStore,
    id: &str,
    state: RequestState,
    items: &[(ItemKey, ComplianceFlag, Option<ActorRole>)],
) -> Request {
    seed_request_at(store, id, state, 1, items)
}

pub(super) fn seed_request_at(
    store: &InMemoryRequestStore,
    id: &str,
    state: RequestState,
    version: u64,
    items: &[(ItemKey, ComplianceFlag, Option<ActorRole>)],
) -> Request {
    let now = Utc::now();
    let submission = new_request();
    let request = Request {
        id: RequestId(id.to_string()),
        applicant_id: submission.applicant_id,
        applicant_email: submission.applicant_email,
        service_type_id: submission.service_type_id,
        form_data: submission.form_data,
        current_state: state,
        created_at: now,
        updated_at: now,
        lineage_id: RequestId(id.to_string()),
        version,
        review_cycle: 1,
    };
    let stored = store.insert(request).expect("request inserted");
    for (key, flag, role) in items {
        let item = ComplianceItem {
            item_key: key.clone(),
            flag: *flag,
            set_by: role.map(|role| identity(role).actor_id),
            set_by_role: *role,
            set_at: role.map(|_| now),
            cycle: 1,
        };
        store.attach_item(&stored.id, item).expect("item attached");
    }
    stored
}

pub(super) fn permit() -> ItemKey {
    ItemKey::document(&DocumentId(PERMIT.to_string()))
}

pub(super) fn floor_plan() -> ItemKey {
    ItemKey::document(&DocumentId(FLOOR_PLAN.to_string()))
}

pub(super) fn engine(
    store: &Arc<InMemoryRequestStore>,
    policy: ReviewPolicy,
) -> TransitionEngine<InMemoryRequestStore, MemoryDocuments> {
    TransitionEngine::new(
        Arc::clone(store),
        Arc::new(MemoryDocuments::with_owned(&[PERMIT, FLOOR_PLAN])),
        policy,
    )
}

pub(super) struct Harness {
    pub(super) store: Arc<InMemoryRequestStore>,
    pub(super) documents: Arc<MemoryDocuments>,
    pub(super) notifier: Arc<RecordingNotifier>,
    pub(super) renderer: Arc<StubRenderer>,
    pub(super) service: LicensingService<InMemoryRequestStore, MemoryDocuments>,
}

/// Service wired to in-memory collaborators; must run inside a tokio runtime.
pub(super) fn harness(policy: ReviewPolicy) -> Harness {
    harness_with(policy, StubRenderer::default())
}

pub(super) fn harness_with(policy: ReviewPolicy, renderer: StubRenderer) -> Harness {
    let store = Arc::new(InMemoryRequestStore::default());
    let documents = Arc::new(MemoryDocuments::with_owned(&[PERMIT, FLOOR_PLAN]));
    let notifier = Arc::new(RecordingNotifier::default());
    let renderer = Arc::new(renderer);
    let dispatcher = SideEffectDispatcher::new(
        notifier.clone(),
        renderer.clone(),
        tokio::runtime::Handle::current(),
    );
    let service = LicensingService::new(
        Arc::clone(&store),
        Arc::clone(&documents),
        policy,
        dispatcher,
    );
    Harness {
        store,
        documents,
        notifier,
        renderer,
        service,
    }
}

impl Harness {
    /// Create a draft with the permit and floor plan attached.
    pub(super) fn draft_with_documents(&self) -> Request {
        let request = self
            .service
            .create_request(new_request())
            .expect("request created");
        for id in [PERMIT, FLOOR_PLAN] {
            self.service
                .attach_document(&request.id, &DocumentId(id.to_string()))
                .expect("document attached");
        }
        request
    }

    /// Apply `action` at the request's current version, awaiting any side effects.
    pub(super) async fn act(
        &self,
        request_id: &RequestId,
        role: ActorRole,
        action: Action,
        input: DecisionInput,
    ) -> Request {
        let version = self.service.get(request_id).expect("request loads").version;
        let input = DecisionInput {
            expected_version: version,
            ..input
        };
        let applied = self
            .service
            .apply(request_id, &identity(role), action, input)
            .unwrap_or_else(|err| panic!("{action} failed: {err}"));
        if let Some(handle) = applied.side_effects {
            handle.await.expect("dispatch task joins");
        }
        applied.receipt.request
    }

    pub(super) fn approve_all(input: DecisionInput) -> DecisionInput {
        input
            .with_flag(permit(), ComplianceFlag::Compliant)
            .with_flag(floor_plan(), ComplianceFlag::Compliant)
    }
}
