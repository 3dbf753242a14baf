use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Args;
use licensing::config::{AppConfig, ReviewConfig};
use licensing::error::AppError;
use licensing::telemetry;
use licensing::workflows::requests::{
    transitions, Action, ActorRole, ApplicantId, ComplianceFlag, DecisionInput, DocumentId,
    HistoryEntry, IdentityContext, InMemoryRequestStore, ItemKey, LicensingService, NewRequest,
    Request, RequestId, RequestState, ReviewPolicy, ServiceTypeId, SideEffectDispatcher,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::infra::{
    parse_state, InMemoryDocumentStore, InMemoryOutbox, OutboundMail, TextCertificateRenderer,
};

const DOCUMENTS: [&str; 2] = ["doc-operating-permit", "doc-floor-plan"];

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Service type the demo request applies for (selects the cycle policy).
    #[arg(long, default_value = "pharmacy-license")]
    pub(crate) service_type: String,
    /// Applicant contact address used for notifications.
    #[arg(long, default_value = "owner@farmacia.example")]
    pub(crate) applicant_email: String,
    /// Skip the desk return and resubmission loop.
    #[arg(long)]
    pub(crate) skip_return: bool,
    /// End with a Director General rejection instead of finalizing.
    #[arg(long)]
    pub(crate) reject: bool,
    /// Print the summary as JSON instead of text.
    #[arg(long)]
    pub(crate) json: bool,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            service_type: "pharmacy-license".to_string(),
            applicant_email: "owner@farmacia.example".to_string(),
            skip_return: false,
            reject: false,
            json: false,
        }
    }
}

#[derive(Args, Debug, Default)]
pub(crate) struct TransitionsArgs {
    /// Only list edges leaving this state (e.g. under_desk_review).
    #[arg(long, value_parser = parse_state)]
    pub(crate) from: Option<RequestState>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DemoSummary {
    pub(crate) request: Request,
    pub(crate) history: Vec<HistoryEntry>,
    pub(crate) notifications: Vec<OutboundMail>,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    info!(environment = ?config.environment, "licensing workflow demo starting");

    let summary = walkthrough(&config.review, &args).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let request = &summary.request;
    println!("Licensing review demo");
    println!(
        "- Request {} ({}) for {} ended in {} after {} review cycle(s), version {}",
        request.id,
        request.service_type_id,
        request.applicant_email,
        request.current_state,
        request.review_cycle,
        request.version
    );
    println!("\nAudit trail:");
    for entry in &summary.history {
        println!(
            "  {} {:<26} -> {:<34} {:<24} by {} ({}){}",
            timestamp(entry.occurred_at),
            entry.from_state.label(),
            entry.to_state.label(),
            entry.action.label(),
            entry.actor_id,
            entry.actor_role.label(),
            if entry.comment.is_empty() {
                String::new()
            } else {
                format!(" \"{}\"", entry.comment)
            }
        );
    }
    println!("\nNotifications:");
    if summary.notifications.is_empty() {
        println!("  none dispatched");
    }
    for mail in &summary.notifications {
        println!(
            "  - {} -> {} [{}]{}",
            mail.template.label(),
            mail.recipient,
            mail.state.label(),
            mail.attachment
                .as_ref()
                .map(|file| format!(" with {file}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// Drive one request through the workflow against in-memory collaborators.
pub(crate) async fn walkthrough(
    review: &ReviewConfig,
    args: &DemoArgs,
) -> Result<DemoSummary, AppError> {
    let applicant = ApplicantId("applicant-demo".to_string());
    let documents = InMemoryDocumentStore::default();
    for document in DOCUMENTS {
        documents.register(&DocumentId(document.to_string()), &applicant);
    }
    let outbox = InMemoryOutbox::default();
    let dispatcher = SideEffectDispatcher::new(
        Arc::new(outbox.clone()),
        Arc::new(TextCertificateRenderer),
        tokio::runtime::Handle::current(),
    );
    let service = LicensingService::new(
        Arc::new(InMemoryRequestStore::default()),
        Arc::new(documents),
        ReviewPolicy::from(review),
        dispatcher,
    );

    let mut form_data = BTreeMap::new();
    form_data.insert("establishment_name".to_string(), json!("Farmacia Central"));
    form_data.insert("responsible_pharmacist".to_string(), json!("QF-2291"));
    let request = service.create_request(NewRequest {
        applicant_id: applicant,
        applicant_email: args.applicant_email.clone(),
        service_type_id: ServiceTypeId(args.service_type.clone()),
        form_data,
    })?;
    let id = request.id.clone();
    for document in DOCUMENTS {
        service.attach_document(&id, &DocumentId(document.to_string()))?;
    }
    service.attach_field(&id, "responsible_pharmacist")?;

    let permit = ItemKey::document(&DocumentId(DOCUMENTS[0].to_string()));
    let floor_plan = ItemKey::document(&DocumentId(DOCUMENTS[1].to_string()));
    let pharmacist = ItemKey::field("responsible_pharmacist");

    step(&service, &id, ActorRole::Applicant, Action::Submit, DecisionInput::default()).await?;
    step(&service, &id, ActorRole::DeskReviewer, Action::StartDeskReview, DecisionInput::default())
        .await?;

    if !args.skip_return {
        step(
            &service,
            &id,
            ActorRole::DeskReviewer,
            Action::DeskReturn,
            DecisionInput::default()
                .with_flag(permit.clone(), ComplianceFlag::Compliant)
                .with_flag(floor_plan.clone(), ComplianceFlag::NonCompliant)
                .with_comment("floor plan is missing the engineer's stamp"),
        )
        .await?;
        step(
            &service,
            &id,
            ActorRole::Applicant,
            Action::Submit,
            DecisionInput::default().with_comment("stamped floor plan uploaded"),
        )
        .await?;
        step(&service, &id, ActorRole::DeskReviewer, Action::StartDeskReview, DecisionInput::default())
            .await?;
    }

    let desk_approval = DecisionInput::default()
        .with_flag(permit, ComplianceFlag::Compliant)
        .with_flag(floor_plan.clone(), ComplianceFlag::Compliant)
        .with_flag(pharmacist, ComplianceFlag::Compliant);
    step(&service, &id, ActorRole::DeskReviewer, Action::DeskApprove, desk_approval).await?;
    step(&service, &id, ActorRole::TechnicalReviewer, Action::TechnicalApprove, DecisionInput::default())
        .await?;
    step(
        &service,
        &id,
        ActorRole::TechnicalDirector,
        Action::TechnicalDirectorApprove,
        DecisionInput::default(),
    )
    .await?;

    if args.reject {
        step(
            &service,
            &id,
            ActorRole::DirectorGeneral,
            Action::GeneralReject,
            DecisionInput::default()
                .with_flag(floor_plan, ComplianceFlag::NonCompliant)
                .with_comment("zoning does not allow a pharmacy at this address"),
        )
        .await?;
    } else {
        step(
            &service,
            &id,
            ActorRole::DirectorGeneral,
            Action::GeneralApprove,
            DecisionInput::default().with_comment("signed"),
        )
        .await?;
        step(&service, &id, ActorRole::DncdReviewer, Action::DncdFinalize, DecisionInput::default())
            .await?;
    }

    Ok(DemoSummary {
        request: service.get(&id)?,
        history: service.history(&id)?,
        notifications: outbox.sent(),
    })
}

async fn step(
    service: &LicensingService<InMemoryRequestStore, InMemoryDocumentStore>,
    id: &RequestId,
    role: ActorRole,
    action: Action,
    input: DecisionInput,
) -> Result<(), AppError> {
    let version = service.get(id)?.version;
    let identity = IdentityContext::new(format!("{}-demo", role.label()), role);
    let applied = service.apply(
        id,
        &identity,
        action,
        DecisionInput {
            expected_version: version,
            ..input
        },
    )?;

    if let Some(handle) = applied.side_effects {
        match handle.await {
            Ok(report) if !report.is_clean() => {
                warn!(request_id = %id, failures = report.failures.len(), "side effects incomplete");
            }
            Ok(_) => {}
            Err(err) => warn!(request_id = %id, error = %err, "side effect task aborted"),
        }
    }
    Ok(())
}

pub(crate) fn run_transitions(args: TransitionsArgs) -> Result<(), AppError> {
    println!("Licensing workflow transitions");
    let edges: Vec<_> = match args.from {
        Some(state) => transitions::available_actions(state).collect(),
        None => transitions::TRANSITIONS.iter().collect(),
    };
    if edges.is_empty() {
        println!("  no outgoing transitions (terminal state)");
    }
    for edge in edges {
        let effects: Vec<String> = edge
            .side_effects
            .iter()
            .map(|effect| format!("{effect:?}"))
            .collect();
        println!(
            "  {:<34} --{}--> {:<34} role={} guard={:?}{}",
            edge.from.label(),
            edge.action.label(),
            edge.to.label(),
            edge.required_role.label(),
            edge.guard,
            if effects.is_empty() {
                String::new()
            } else {
                format!(" effects=[{}]", effects.join(", "))
            }
        );
    }
    Ok(())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}
