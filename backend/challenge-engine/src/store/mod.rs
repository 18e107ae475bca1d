// ============================================
// Persistence Collaborators
// ============================================
//
// The engine reads two things from the host application:
// 1. The user's append-only interaction log
// 2. The active challenge catalog (attributes only)
//
// Both are traits so the host can back them with its own storage; the
// in-memory implementations serve on-device use and tests.

use crate::models::{CandidateAttributes, CandidateId, InteractionRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Outcome already recorded for interaction {0}")]
    AlreadyRecorded(Uuid),

    #[error("Interaction {0} already assigned")]
    DuplicateAssignment(Uuid),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Append a pending assignment or a terminal outcome
    async fn append(&self, record: InteractionRecord) -> Result<()>;

    /// Number of entries in the log
    async fn len(&self) -> Result<usize>;

    /// Entries from `offset` onward, in append order
    async fn fetch_history(&self, offset: usize) -> Result<Vec<InteractionRecord>>;
}

#[async_trait]
pub trait CandidateCatalog: Send + Sync {
    /// Active, non-expired candidates, at most `limit` when given
    async fn active_candidates(
        &self,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<CandidateAttributes>>;
}

#[derive(Debug, Default)]
struct LogState {
    records: Vec<InteractionRecord>,
    /// interaction id -> whether a terminal entry exists
    seen: HashMap<Uuid, bool>,
}

/// Interaction log held in memory
#[derive(Debug, Default)]
pub struct InMemoryInteractionStore {
    state: RwLock<LogState>,
}

impl InMemoryInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the log; entries are validated exactly like `append`
    pub async fn with_history(records: impl IntoIterator<Item = InteractionRecord>) -> Result<Self> {
        let store = Self::new();
        for record in records {
            store.append(record).await?;
        }
        Ok(store)
    }
}

#[async_trait]
impl InteractionStore for InMemoryInteractionStore {
    async fn append(&self, record: InteractionRecord) -> Result<()> {
        let mut state = self.state.write().await;
        let terminal = record.is_terminal();

        match state.seen.get(&record.interaction_id).copied() {
            Some(true) if terminal => return Err(StoreError::AlreadyRecorded(record.interaction_id)),
            Some(_) if !terminal => {
                return Err(StoreError::DuplicateAssignment(record.interaction_id))
            }
            _ => {}
        }

        state.seen.insert(record.interaction_id, terminal);
        debug!(
            interaction_id = %record.interaction_id,
            candidate_id = %record.candidate_id,
            terminal,
            "Interaction appended"
        );
        state.records.push(record);
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().await.records.len())
    }

    async fn fetch_history(&self, offset: usize) -> Result<Vec<InteractionRecord>> {
        let state = self.state.read().await;
        Ok(state.records.get(offset..).map(<[_]>::to_vec).unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    attributes: CandidateAttributes,
    active: bool,
    expires_at: Option<DateTime<Utc>>,
}

/// Catalog held in memory, ordered by candidate id
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    entries: RwLock<BTreeMap<CandidateId, CatalogEntry>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_candidates(candidates: impl IntoIterator<Item = CandidateAttributes>) -> Self {
        let catalog = Self::new();
        for candidate in candidates {
            catalog.upsert(candidate, None).await;
        }
        catalog
    }

    pub async fn upsert(&self, attributes: CandidateAttributes, expires_at: Option<DateTime<Utc>>) {
        self.entries.write().await.insert(
            attributes.candidate_id.clone(),
            CatalogEntry {
                attributes,
                active: true,
                expires_at,
            },
        );
    }

    pub async fn deactivate(&self, candidate_id: &str) -> bool {
        match self.entries.write().await.get_mut(candidate_id) {
            Some(entry) => {
                entry.active = false;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CandidateCatalog for InMemoryCatalog {
    async fn active_candidates(
        &self,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<CandidateAttributes>> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .filter(|e| e.active && e.expires_at.map_or(true, |at| at > now))
            .take(limit.unwrap_or(usize::MAX))
            .map(|e| e.attributes.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, CostClass, LocationClass, Outcome, SocialRequirement, TimeInvestment};
    use chrono::Duration;

    fn candidate(id: &str) -> CandidateAttributes {
        CandidateAttributes {
            candidate_id: id.to_string(),
            category: Category::Culinary,
            time_investment: TimeInvestment::Extended,
            social_requirement: SocialRequirement::Group,
            cost: CostClass::Medium,
            difficulty: 3,
            location: LocationClass::Local,
            tags: vec!["cooking".to_string()],
            content_hash: "abc".to_string(),
        }
    }

    #[tokio::test]
    async fn test_pending_then_single_terminal() {
        let store = InMemoryInteractionStore::new();
        let pending = InteractionRecord::assigned(&candidate("a"), Utc::now());
        let done = pending.clone().with_outcome(Outcome::Completed);

        store.append(pending.clone()).await.unwrap();
        assert!(matches!(
            store.append(pending).await,
            Err(StoreError::DuplicateAssignment(_))
        ));
        store.append(done.clone()).await.unwrap();
        assert!(matches!(
            store.append(done.with_outcome(Outcome::Skipped)).await,
            Err(StoreError::AlreadyRecorded(_))
        ));

        assert_eq!(store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fetch_history_from_offset() {
        let store = InMemoryInteractionStore::new();
        for i in 0..5 {
            let record = InteractionRecord::assigned(&candidate("a"), Utc::now() + Duration::minutes(i))
                .with_outcome(Outcome::Expired);
            store.append(record).await.unwrap();
        }

        assert_eq!(store.fetch_history(3).await.unwrap().len(), 2);
        assert!(store.fetch_history(5).await.unwrap().is_empty());
        assert!(store.fetch_history(9).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_filters_inactive_and_expired() {
        let now = Utc::now();
        let catalog = InMemoryCatalog::with_candidates([candidate("a"), candidate("b")]).await;
        catalog.upsert(candidate("c"), Some(now - Duration::hours(1))).await;
        catalog.upsert(candidate("d"), Some(now + Duration::hours(1))).await;
        assert!(catalog.deactivate("b").await);

        let ids: Vec<_> = catalog
            .active_candidates(now, None)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.candidate_id)
            .collect();
        assert_eq!(ids, vec!["a", "d"]);

        assert_eq!(catalog.active_candidates(now, Some(1)).await.unwrap().len(), 1);
    }
}
