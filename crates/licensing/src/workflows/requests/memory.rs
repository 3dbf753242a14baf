use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::audit::{ordered, HistoryEntry, HistoryReader};
use super::domain::{ComplianceItem, ItemKey, Request, RequestId, RequestState};
use super::repository::{RepositoryError, RequestSnapshot, RequestStore, TransitionTransaction};

#[derive(Debug, Clone)]
struct StoredRequest {
    request: Request,
    items: BTreeMap<ItemKey, ComplianceItem>,
    history: Vec<HistoryEntry>,
}

/// Mutex-backed store; every commit happens under one lock acquisition.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRequestStore {
    rows: Arc<Mutex<HashMap<RequestId, StoredRequest>>>,
}

impl InMemoryRequestStore {
    fn rows(&self) -> Result<MutexGuard<'_, HashMap<RequestId, StoredRequest>>, RepositoryError> {
        self.rows
            .lock()
            .map_err(|_| RepositoryError::Unavailable("request store lock poisoned".to_string()))
    }
}

impl HistoryReader for InMemoryRequestStore {
    fn list_by_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let rows = self.rows()?;
        let stored = rows.get(request_id).ok_or(RepositoryError::NotFound)?;
        Ok(ordered(stored.history.clone()))
    }
}

impl RequestStore for InMemoryRequestStore {
    fn insert(&self, request: Request) -> Result<Request, RepositoryError> {
        let mut rows = self.rows()?;
        if rows.contains_key(&request.id) {
            return Err(RepositoryError::Conflict);
        }
        rows.insert(
            request.id.clone(),
            StoredRequest {
                request: request.clone(),
                items: BTreeMap::new(),
                history: Vec::new(),
            },
        );
        Ok(request)
    }

    fn load(&self, id: &RequestId) -> Result<Option<RequestSnapshot>, RepositoryError> {
        let rows = self.rows()?;
        Ok(rows.get(id).map(|stored| RequestSnapshot {
            request: stored.request.clone(),
            items: stored.items.values().cloned().collect(),
        }))
    }

    fn attach_item(
        &self,
        id: &RequestId,
        item: ComplianceItem,
    ) -> Result<ComplianceItem, RepositoryError> {
        let mut rows = self.rows()?;
        let stored = rows.get_mut(id).ok_or(RepositoryError::NotFound)?;
        let cycle = stored.request.review_cycle;
        let entry = stored
            .items
            .entry(item.item_key.clone())
            .or_insert_with(|| ComplianceItem { cycle, ..item });
        Ok(entry.clone())
    }

    fn commit(&self, tx: TransitionTransaction) -> Result<Request, RepositoryError> {
        if tx.history().is_none() {
            return Err(RepositoryError::MissingHistory);
        }

        let mut rows = self.rows()?;
        let stored = rows
            .get_mut(tx.request_id())
            .ok_or(RepositoryError::NotFound)?;
        if stored.request.version != tx.expected_version() {
            return Err(RepositoryError::VersionConflict {
                expected: tx.expected_version(),
                actual: stored.request.version,
            });
        }
        if !stored.items.keys().eq(tx.read_items().iter()) {
            return Err(RepositoryError::LedgerChanged {
                version: stored.request.version,
            });
        }

        let updated = tx.apply_to(&stored.request);
        let (items, history) = tx.into_parts();
        let history = history.ok_or(RepositoryError::MissingHistory)?;

        for item in items {
            stored.items.insert(item.item_key.clone(), item);
        }
        stored.history.push(history);
        stored.request = updated.clone();
        Ok(updated)
    }

    fn in_state(&self, state: RequestState, limit: usize) -> Result<Vec<Request>, RepositoryError> {
        let rows = self.rows()?;
        let mut matching: Vec<Request> = rows
            .values()
            .filter(|stored| stored.request.current_state == state)
            .map(|stored| stored.request.clone())
            .collect();
        matching.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        matching.truncate(limit);
        Ok(matching)
    }
}
