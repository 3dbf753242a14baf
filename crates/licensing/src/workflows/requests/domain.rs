use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier wrapper for licensing requests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicantId(pub String);

/// Licensing service the request applies for; selects the review policy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceTypeId(pub String);

/// Authenticated actor (applicant or reviewer) resolved by the caller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

/// Identifier of a document owned by the external document store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

macro_rules! display_inner {
    ($($name:ident),+ $(,)?) => {
        $(
            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }
        )+
    };
}

display_inner!(RequestId, ApplicantId, ServiceTypeId, ActorId, DocumentId);

macro_rules! display_label {
    ($($name:ident),+ $(,)?) => {
        $(
            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.label())
                }
            }
        )+
    };
}

display_label!(RequestState, ActorRole, Action, ComplianceFlag);

/// Every state a request may occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Draft,
    Submitted,
    UnderDeskReview,
    DeskReturned,
    UnderTechnicalReview,
    TechnicalReturned,
    PendingTechnicalDirectorDecision,
    ReturnedToTechnical,
    PendingDirectorGeneralSignature,
    RejectedByDirectorGeneral,
    UnderDncdReview,
    Finalized,
    Withdrawn,
}

impl RequestState {
    pub const ALL: [RequestState; 13] = [
        RequestState::Draft,
        RequestState::Submitted,
        RequestState::UnderDeskReview,
        RequestState::DeskReturned,
        RequestState::UnderTechnicalReview,
        RequestState::TechnicalReturned,
        RequestState::PendingTechnicalDirectorDecision,
        RequestState::ReturnedToTechnical,
        RequestState::PendingDirectorGeneralSignature,
        RequestState::RejectedByDirectorGeneral,
        RequestState::UnderDncdReview,
        RequestState::Finalized,
        RequestState::Withdrawn,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            RequestState::Draft => "draft",
            RequestState::Submitted => "submitted",
            RequestState::UnderDeskReview => "under_desk_review",
            RequestState::DeskReturned => "desk_returned",
            RequestState::UnderTechnicalReview => "under_technical_review",
            RequestState::TechnicalReturned => "technical_returned",
            RequestState::PendingTechnicalDirectorDecision => {
                "pending_technical_director_decision"
            }
            RequestState::ReturnedToTechnical => "returned_to_technical",
            RequestState::PendingDirectorGeneralSignature => "pending_director_general_signature",
            RequestState::RejectedByDirectorGeneral => "rejected_by_director_general",
            RequestState::UnderDncdReview => "under_dncd_review",
            RequestState::Finalized => "finalized",
            RequestState::Withdrawn => "withdrawn",
        }
    }

    /// Terminal states accept no further transitions.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Finalized
                | RequestState::RejectedByDirectorGeneral
                | RequestState::Withdrawn
        )
    }
}

/// Roles resolved by the identity layer for every call into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Applicant,
    DeskReviewer,
    TechnicalReviewer,
    TechnicalDirector,
    DirectorGeneral,
    DncdReviewer,
}

impl ActorRole {
    pub const fn label(self) -> &'static str {
        match self {
            ActorRole::Applicant => "applicant",
            ActorRole::DeskReviewer => "desk_reviewer",
            ActorRole::TechnicalReviewer => "technical_reviewer",
            ActorRole::TechnicalDirector => "technical_director",
            ActorRole::DirectorGeneral => "director_general",
            ActorRole::DncdReviewer => "dncd_reviewer",
        }
    }

    pub const fn is_reviewer(self) -> bool {
        !matches!(self, ActorRole::Applicant)
    }
}

/// Stable verb set exposed to the layers that drive the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Submit,
    StartDeskReview,
    DeskApprove,
    DeskReturn,
    TechnicalApprove,
    TechnicalReturn,
    TechnicalDirectorApprove,
    TechnicalDirectorReturn,
    ResumeTechnicalReview,
    GeneralApprove,
    GeneralReject,
    DncdFinalize,
    Withdraw,
}

impl Action {
    pub const fn label(self) -> &'static str {
        match self {
            Action::Submit => "submit",
            Action::StartDeskReview => "startDeskReview",
            Action::DeskApprove => "deskApprove",
            Action::DeskReturn => "deskReturn",
            Action::TechnicalApprove => "technicalApprove",
            Action::TechnicalReturn => "technicalReturn",
            Action::TechnicalDirectorApprove => "technicalDirectorApprove",
            Action::TechnicalDirectorReturn => "technicalDirectorReturn",
            Action::ResumeTechnicalReview => "resumeTechnicalReview",
            Action::GeneralApprove => "generalApprove",
            Action::GeneralReject => "generalReject",
            Action::DncdFinalize => "dncdFinalize",
            Action::Withdraw => "withdraw",
        }
    }
}

/// Caller-resolved identity attached to every engine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityContext {
    pub actor_id: ActorId,
    pub actor_role: ActorRole,
}

impl IdentityContext {
    pub fn new(actor_id: impl Into<String>, actor_role: ActorRole) -> Self {
        Self {
            actor_id: ActorId(actor_id.into()),
            actor_role,
        }
    }
}

/// One licensing application moving through the review workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub applicant_id: ApplicantId,
    pub applicant_email: String,
    pub service_type_id: ServiceTypeId,
    pub form_data: BTreeMap<String, Value>,
    pub current_state: RequestState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Root request of the lineage; equals `id` for original submissions.
    pub lineage_id: RequestId,
    pub version: u64,
    pub review_cycle: u32,
}

impl Request {
    pub fn is_lineage_root(&self) -> bool {
        self.lineage_id == self.id
    }
}

/// Applicant supplied payload used to open a request in `Draft`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRequest {
    pub applicant_id: ApplicantId,
    pub applicant_email: String,
    pub service_type_id: ServiceTypeId,
    #[serde(default)]
    pub form_data: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Document,
    Field,
}

/// Ledger key: a document identifier or a form field name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub kind: ItemKind,
    pub key: String,
}

impl ItemKey {
    pub fn document(document_id: &DocumentId) -> Self {
        Self {
            kind: ItemKind::Document,
            key: document_id.0.clone(),
        }
    }

    pub fn field(name: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Field,
            key: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceFlag {
    Unknown,
    Compliant,
    NonCompliant,
}

impl ComplianceFlag {
    pub const fn label(self) -> &'static str {
        match self {
            ComplianceFlag::Unknown => "unknown",
            ComplianceFlag::Compliant => "compliant",
            ComplianceFlag::NonCompliant => "non_compliant",
        }
    }
}

/// Per-item compliance mark kept in the validation ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceItem {
    pub item_key: ItemKey,
    pub flag: ComplianceFlag,
    pub set_by: Option<ActorId>,
    pub set_by_role: Option<ActorRole>,
    pub set_at: Option<DateTime<Utc>>,
    /// Review cycle in which `flag` was last set.
    pub cycle: u32,
}

impl ComplianceItem {
    pub fn unknown(item_key: ItemKey, cycle: u32) -> Self {
        Self {
            item_key,
            flag: ComplianceFlag::Unknown,
            set_by: None,
            set_by_role: None,
            set_at: None,
            cycle,
        }
    }
}

/// Flag change requested alongside a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub item: ItemKey,
    pub flag: ComplianceFlag,
}

/// Reviewer input accompanying an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionInput {
    /// Version the caller read before acting.
    pub expected_version: u64,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub item_updates: Vec<ItemUpdate>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl DecisionInput {
    pub fn at_version(expected_version: u64) -> Self {
        Self {
            expected_version,
            ..Self::default()
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_flag(mut self, item: ItemKey, flag: ComplianceFlag) -> Self {
        self.item_updates.push(ItemUpdate { item, flag });
        self
    }
}
