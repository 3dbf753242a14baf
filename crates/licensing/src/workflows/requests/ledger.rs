use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    ActorRole, ComplianceFlag, ComplianceItem, IdentityContext, ItemKey, RequestId, ServiceTypeId,
};
use crate::config::ReviewConfig;

/// Errors raised while editing compliance flags.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("item {item:?} was marked compliant by {role:?} in cycle {cycle} and cannot be downgraded")]
    LockedItem {
        item: ItemKey,
        role: ActorRole,
        cycle: u32,
    },
    #[error("role {0:?} may not flag compliance items")]
    NotAReviewer(ActorRole),
    #[error("reviewers may only mark items compliant or non-compliant")]
    UnknownNotAssignable,
}

/// What happens to existing marks when a resubmission opens a new review cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleResetPolicy {
    /// Compliant marks (and their locks) carry over; non-compliant marks go back to unknown.
    #[default]
    PreserveCompliant,
    /// Every item goes back to unknown and is reviewed from scratch.
    RevalidateAll,
}

impl CycleResetPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "preserve" | "preserve_compliant" => Some(Self::PreserveCompliant),
            "revalidate" | "revalidate_all" => Some(Self::RevalidateAll),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            CycleResetPolicy::PreserveCompliant => "preserve_compliant",
            CycleResetPolicy::RevalidateAll => "revalidate_all",
        }
    }
}

/// Cycle reset policy keyed by service type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewPolicy {
    default: CycleResetPolicy,
    overrides: BTreeMap<ServiceTypeId, CycleResetPolicy>,
}

impl ReviewPolicy {
    pub fn new(default: CycleResetPolicy) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, service_type: ServiceTypeId, policy: CycleResetPolicy) -> Self {
        self.overrides.insert(service_type, policy);
        self
    }

    pub fn default_policy(&self) -> CycleResetPolicy {
        self.default
    }

    pub fn for_service_type(&self, service_type: &ServiceTypeId) -> CycleResetPolicy {
        self.overrides
            .get(service_type)
            .copied()
            .unwrap_or(self.default)
    }
}

impl From<&ReviewConfig> for ReviewPolicy {
    fn from(config: &ReviewConfig) -> Self {
        config.overrides.iter().fold(
            ReviewPolicy::new(config.default_cycle_policy),
            |policy, (service_type, cycle_policy)| {
                policy.with_override(ServiceTypeId(service_type.clone()), *cycle_policy)
            },
        )
    }
}

/// Snapshot of the ledger consulted by transition guards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub all_compliant: bool,
    pub any_non_compliant: bool,
    pub comment: String,
}

impl ReviewDecision {
    pub fn has_comment(&self) -> bool {
        !self.comment.trim().is_empty()
    }
}

/// Outcome of a `set_flag` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagChange {
    Inserted,
    Updated,
    Unchanged,
}

/// Compliance marks for one request within its current review cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationLedger {
    request_id: RequestId,
    cycle: u32,
    items: BTreeMap<ItemKey, ComplianceItem>,
}

impl ValidationLedger {
    pub fn new(request_id: RequestId, cycle: u32) -> Self {
        Self {
            request_id,
            cycle,
            items: BTreeMap::new(),
        }
    }

    pub fn from_items<I>(request_id: RequestId, cycle: u32, items: I) -> Self
    where
        I: IntoIterator<Item = ComplianceItem>,
    {
        let items = items
            .into_iter()
            .map(|item| (item.item_key.clone(), item))
            .collect();
        Self {
            request_id,
            cycle,
            items,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub fn get(&self, key: &ItemKey) -> Option<&ComplianceItem> {
        self.items.get(key)
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.items.contains_key(key)
    }

    pub fn items(&self) -> impl Iterator<Item = &ComplianceItem> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Register an item as `Unknown`; a no-op when the key already exists.
    pub fn attach(&mut self, key: ItemKey) -> (&ComplianceItem, bool) {
        let cycle = self.cycle;
        let mut inserted = false;
        let item = self.items.entry(key.clone()).or_insert_with(|| {
            inserted = true;
            ComplianceItem::unknown(key, cycle)
        });
        (item, inserted)
    }

    /// Upsert a reviewer's mark, refusing to downgrade a mark the same role locked this cycle.
    pub fn set_flag(
        &mut self,
        key: ItemKey,
        flag: ComplianceFlag,
        actor: &IdentityContext,
        at: DateTime<Utc>,
    ) -> Result<FlagChange, LedgerError> {
        if !actor.actor_role.is_reviewer() {
            return Err(LedgerError::NotAReviewer(actor.actor_role));
        }
        if flag == ComplianceFlag::Unknown {
            return Err(LedgerError::UnknownNotAssignable);
        }

        let cycle = self.cycle;
        let change = match self.items.get(&key) {
            Some(existing) if existing.flag == flag => return Ok(FlagChange::Unchanged),
            Some(existing)
                if existing.flag == ComplianceFlag::Compliant
                    && flag == ComplianceFlag::NonCompliant
                    && existing.cycle == cycle
                    && existing.set_by_role == Some(actor.actor_role) =>
            {
                return Err(LedgerError::LockedItem {
                    item: key,
                    role: actor.actor_role,
                    cycle,
                });
            }
            Some(_) => FlagChange::Updated,
            None => FlagChange::Inserted,
        };

        self.items.insert(
            key.clone(),
            ComplianceItem {
                item_key: key,
                flag,
                set_by: Some(actor.actor_id.clone()),
                set_by_role: Some(actor.actor_role),
                set_at: Some(at),
                cycle,
            },
        );
        Ok(change)
    }

    /// True when at least one item exists and every item is compliant.
    pub fn is_fully_compliant(&self) -> bool {
        !self.items.is_empty()
            && self
                .items
                .values()
                .all(|item| item.flag == ComplianceFlag::Compliant)
    }

    pub fn has_any_non_compliant(&self) -> bool {
        self.items
            .values()
            .any(|item| item.flag == ComplianceFlag::NonCompliant)
    }

    pub fn decision(&self, comment: &str) -> ReviewDecision {
        ReviewDecision {
            all_compliant: self.is_fully_compliant(),
            any_non_compliant: self.has_any_non_compliant(),
            comment: comment.trim().to_string(),
        }
    }

    /// Open the next review cycle, returning every item as rewritten under `policy`.
    pub fn clear_for_new_cycle(&mut self, policy: CycleResetPolicy) -> Vec<ComplianceItem> {
        self.cycle += 1;
        let cycle = self.cycle;

        for item in self.items.values_mut() {
            let keep = policy == CycleResetPolicy::PreserveCompliant
                && item.flag == ComplianceFlag::Compliant;
            if keep {
                item.cycle = cycle;
            } else {
                *item = ComplianceItem::unknown(item.item_key.clone(), cycle);
            }
        }

        self.items.values().cloned().collect()
    }

    pub fn into_items(self) -> Vec<ComplianceItem> {
        self.items.into_values().collect()
    }
}
