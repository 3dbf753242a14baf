//! The closed transition table of the licensing review workflow.
//!
//! Every legal move is one [`TransitionEdge`]: the state it leaves, the action that
//! triggers it, the only role allowed to take it, the guard over the validation
//! ledger, and the side effects a committed move implies. The engine never moves a
//! request along anything that is not listed here.

use serde::Serialize;

use super::domain::{Action, ActorRole, RequestState};
use super::ledger::ReviewDecision;
use super::triggers::{CertificateOutcome, SideEffectIntent, TemplateKind};

/// Precondition over the review decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    Always,
    /// Approvals: every ledger item must be compliant.
    AllCompliant,
    /// Returns and rejections: a non-compliant item plus an explanatory comment.
    NonCompliantWithComment,
}

/// Why a guard refused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GuardFailure {
    #[error("not every compliance item is marked compliant")]
    NotAllCompliant,
    #[error("no compliance item is marked non-compliant")]
    NoNonCompliantItem,
    #[error("a comment is required")]
    MissingComment,
}

impl Guard {
    pub fn evaluate(self, decision: &ReviewDecision) -> Result<(), GuardFailure> {
        match self {
            Guard::Always => Ok(()),
            Guard::AllCompliant if decision.all_compliant => Ok(()),
            Guard::AllCompliant => Err(GuardFailure::NotAllCompliant),
            Guard::NonCompliantWithComment => {
                if !decision.any_non_compliant {
                    Err(GuardFailure::NoNonCompliantItem)
                } else if !decision.has_comment() {
                    Err(GuardFailure::MissingComment)
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Whether committing an edge opens a new review cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleEffect {
    Continue,
    BeginNewCycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransitionEdge {
    pub from: RequestState,
    pub action: Action,
    pub to: RequestState,
    pub required_role: ActorRole,
    pub guard: Guard,
    pub cycle: CycleEffect,
    pub side_effects: &'static [SideEffectIntent],
}

const fn edge(
    from: RequestState,
    action: Action,
    to: RequestState,
    required_role: ActorRole,
    guard: Guard,
    side_effects: &'static [SideEffectIntent],
) -> TransitionEdge {
    TransitionEdge {
        from,
        action,
        to,
        required_role,
        guard,
        cycle: CycleEffect::Continue,
        side_effects,
    }
}

const fn resubmission(from: RequestState, to: RequestState) -> TransitionEdge {
    TransitionEdge {
        from,
        action: Action::Submit,
        to,
        required_role: ActorRole::Applicant,
        guard: Guard::Always,
        cycle: CycleEffect::BeginNewCycle,
        side_effects: RESUBMITTED,
    }
}

const fn withdrawal(from: RequestState) -> TransitionEdge {
    edge(
        from,
        Action::Withdraw,
        RequestState::Withdrawn,
        ActorRole::Applicant,
        Guard::Always,
        WITHDRAWN,
    )
}

const RETURNED: &[SideEffectIntent] = &[SideEffectIntent::NotifyApplicant(
    TemplateKind::ReturnedForCorrection,
)];

const RESUBMITTED: &[SideEffectIntent] = &[SideEffectIntent::NotifyApplicant(
    TemplateKind::ResubmissionReceived,
)];

const WITHDRAWN: &[SideEffectIntent] =
    &[SideEffectIntent::NotifyApplicant(TemplateKind::Withdrawn)];

pub const TRANSITIONS: &[TransitionEdge] = &[
    edge(
        RequestState::Draft,
        Action::Submit,
        RequestState::Submitted,
        ActorRole::Applicant,
        Guard::Always,
        &[SideEffectIntent::NotifyApplicant(
            TemplateKind::SubmissionReceived,
        )],
    ),
    edge(
        RequestState::Submitted,
        Action::StartDeskReview,
        RequestState::UnderDeskReview,
        ActorRole::DeskReviewer,
        Guard::Always,
        &[],
    ),
    edge(
        RequestState::UnderDeskReview,
        Action::DeskApprove,
        RequestState::UnderTechnicalReview,
        ActorRole::DeskReviewer,
        Guard::AllCompliant,
        &[SideEffectIntent::NotifyApplicant(
            TemplateKind::AdvancedToTechnicalReview,
        )],
    ),
    edge(
        RequestState::UnderDeskReview,
        Action::DeskReturn,
        RequestState::DeskReturned,
        ActorRole::DeskReviewer,
        Guard::NonCompliantWithComment,
        RETURNED,
    ),
    resubmission(RequestState::DeskReturned, RequestState::Submitted),
    edge(
        RequestState::UnderTechnicalReview,
        Action::TechnicalApprove,
        RequestState::PendingTechnicalDirectorDecision,
        ActorRole::TechnicalReviewer,
        Guard::AllCompliant,
        &[],
    ),
    edge(
        RequestState::UnderTechnicalReview,
        Action::TechnicalReturn,
        RequestState::TechnicalReturned,
        ActorRole::TechnicalReviewer,
        Guard::NonCompliantWithComment,
        RETURNED,
    ),
    resubmission(
        RequestState::TechnicalReturned,
        RequestState::UnderTechnicalReview,
    ),
    edge(
        RequestState::PendingTechnicalDirectorDecision,
        Action::TechnicalDirectorApprove,
        RequestState::PendingDirectorGeneralSignature,
        ActorRole::TechnicalDirector,
        Guard::AllCompliant,
        &[],
    ),
    edge(
        RequestState::PendingTechnicalDirectorDecision,
        Action::TechnicalDirectorReturn,
        RequestState::ReturnedToTechnical,
        ActorRole::TechnicalDirector,
        Guard::NonCompliantWithComment,
        &[],
    ),
    edge(
        RequestState::ReturnedToTechnical,
        Action::ResumeTechnicalReview,
        RequestState::UnderTechnicalReview,
        ActorRole::TechnicalReviewer,
        Guard::Always,
        &[],
    ),
    edge(
        RequestState::PendingDirectorGeneralSignature,
        Action::GeneralApprove,
        RequestState::UnderDncdReview,
        ActorRole::DirectorGeneral,
        Guard::AllCompliant,
        &[SideEffectIntent::NotifyApplicant(
            TemplateKind::ApprovedByDirectorGeneral,
        )],
    ),
    edge(
        RequestState::PendingDirectorGeneralSignature,
        Action::GeneralReject,
        RequestState::RejectedByDirectorGeneral,
        ActorRole::DirectorGeneral,
        Guard::NonCompliantWithComment,
        &[
            SideEffectIntent::NotifyApplicant(TemplateKind::Rejected),
            SideEffectIntent::IssueCertificate(CertificateOutcome::Rejected),
        ],
    ),
    edge(
        RequestState::UnderDncdReview,
        Action::DncdFinalize,
        RequestState::Finalized,
        ActorRole::DncdReviewer,
        Guard::AllCompliant,
        &[
            SideEffectIntent::IssueCertificate(CertificateOutcome::Approved),
            SideEffectIntent::NotifyApplicant(TemplateKind::Finalized),
        ],
    ),
    withdrawal(RequestState::Draft),
    withdrawal(RequestState::Submitted),
    withdrawal(RequestState::DeskReturned),
    withdrawal(RequestState::TechnicalReturned),
];

/// Look up the edge leaving `from` on `action`.
pub fn resolve(from: RequestState, action: Action) -> Option<&'static TransitionEdge> {
    TRANSITIONS
        .iter()
        .find(|edge| edge.from == from && edge.action == action)
}

/// Edges an actor could take from `state`, in table order.
pub fn available_actions(state: RequestState) -> impl Iterator<Item = &'static TransitionEdge> {
    TRANSITIONS.iter().filter(move |edge| edge.from == state)
}

/// True when some edge leads from `from` to `to`.
pub fn is_legal_move(from: RequestState, to: RequestState) -> bool {
    TRANSITIONS
        .iter()
        .any(|edge| edge.from == from && edge.to == to)
}
