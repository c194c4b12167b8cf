//! Storage seams.
//!
//! Persistent storage is owned by the surrounding application; the engine
//! only needs these two traits. The in-memory implementations back the CLI
//! and the test suites.

use crate::connector::Connector;
use crate::persona::Persona;
use crate::run::{Run, RunStatus};
use crate::scenario::Scenario;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage backend error: {message}")]
    Backend { message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The run collection. The only shared mutable resource in the engine:
/// `claim` must be an atomic queued→running compare-and-set so two
/// processors never execute the same run twice.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn enqueue(&self, run: Run) -> StoreResult<Uuid>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Run>>;

    /// Ids of queued runs in creation (FIFO) order.
    async fn queued_ids(&self) -> StoreResult<Vec<Uuid>>;

    /// Atomically transition `queued → running` and return the claimed run.
    /// `None` means the run was already claimed (or is not queued): a
    /// benign race, not an error.
    async fn claim(&self, id: Uuid) -> StoreResult<Option<Run>>;

    async fn update(&self, run: Run) -> StoreResult<()>;

    async fn list(&self) -> StoreResult<Vec<Run>>;
}

/// Read-only definition lookup. Snapshots are taken at claim time; edits
/// after that never affect runs already in flight.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn scenario(&self, id: &str) -> StoreResult<Option<Scenario>>;

    async fn persona(&self, id: &str) -> StoreResult<Option<Persona>>;

    async fn connector(&self, id: &str) -> StoreResult<Option<Connector>>;
}

#[derive(Default)]
struct MemoryRunStoreInner {
    runs: HashMap<Uuid, Run>,
    order: Vec<Uuid>,
}

/// In-memory run collection for tests and the CLI.
#[derive(Default)]
pub struct MemoryRunStore {
    inner: Mutex<MemoryRunStoreInner>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn enqueue(&self, run: Run) -> StoreResult<Uuid> {
        let mut inner = self.inner.lock().await;
        let id = run.id;
        if !inner.runs.contains_key(&id) {
            inner.order.push(id);
        }
        inner.runs.insert(id, run);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Run>> {
        let inner = self.inner.lock().await;
        Ok(inner.runs.get(&id).cloned())
    }

    async fn queued_ids(&self) -> StoreResult<Vec<Uuid>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .order
            .iter()
            .filter(|id| {
                inner
                    .runs
                    .get(*id)
                    .map(|run| run.status == RunStatus::Queued)
                    .unwrap_or(false)
            })
            .copied()
            .collect())
    }

    async fn claim(&self, id: Uuid) -> StoreResult<Option<Run>> {
        let mut inner = self.inner.lock().await;
        match inner.runs.get_mut(&id) {
            Some(run) if run.status == RunStatus::Queued => {
                run.status = RunStatus::Running;
                run.started_at = Some(Utc::now());
                Ok(Some(run.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update(&self, run: Run) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let id = run.id;
        if !inner.runs.contains_key(&id) {
            inner.order.push(id);
        }
        inner.runs.insert(id, run);
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<Run>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.runs.get(id).cloned())
            .collect())
    }
}

/// In-memory definition lookup for tests and the CLI.
#[derive(Default)]
pub struct MemoryCatalog {
    scenarios: Mutex<HashMap<String, Scenario>>,
    personas: Mutex<HashMap<String, Persona>>,
    connectors: Mutex<HashMap<String, Connector>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_scenario(&self, scenario: Scenario) {
        self.scenarios
            .lock()
            .await
            .insert(scenario.id.clone(), scenario);
    }

    pub async fn add_persona(&self, persona: Persona) {
        self.personas
            .lock()
            .await
            .insert(persona.id.clone(), persona);
    }

    pub async fn add_connector(&self, connector: Connector) {
        self.connectors
            .lock()
            .await
            .insert(connector.id.clone(), connector);
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn scenario(&self, id: &str) -> StoreResult<Option<Scenario>> {
        Ok(self.scenarios.lock().await.get(id).cloned())
    }

    async fn persona(&self, id: &str) -> StoreResult<Option<Persona>> {
        Ok(self.personas.lock().await.get(id).cloned())
    }

    async fn connector(&self, id: &str) -> StoreResult<Option<Connector>> {
        Ok(self.connectors.lock().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_and_fifo_order() {
        let store = MemoryRunStore::new();
        let first = Run::new("s-1", None, None);
        let second = Run::new("s-1", None, None);
        let first_id = first.id;
        let second_id = second.id;

        store.enqueue(first).await.unwrap();
        store.enqueue(second).await.unwrap();

        assert_eq!(store.queued_ids().await.unwrap(), vec![first_id, second_id]);
    }

    #[tokio::test]
    async fn test_claim_is_compare_and_set() {
        let store = MemoryRunStore::new();
        let run = Run::new("s-1", None, None);
        let id = store.enqueue(run).await.unwrap();

        let claimed = store.claim(id).await.unwrap();
        assert!(claimed.is_some());
        assert_eq!(claimed.unwrap().status, RunStatus::Running);

        // Second claim loses the race and gets nothing.
        assert!(store.claim(id).await.unwrap().is_none());
        assert!(store.queued_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_unknown_run_is_none() {
        let store = MemoryRunStore::new();
        assert!(store.claim(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_preserves_order() {
        let store = MemoryRunStore::new();
        let run = Run::new("s-1", None, None);
        let id = store.enqueue(run.clone()).await.unwrap();

        let mut updated = run;
        updated.status = RunStatus::Error;
        updated.error = Some("boom".to_string());
        store.update(updated).await.unwrap();

        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Error);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_catalog_lookup() {
        let catalog = MemoryCatalog::new();
        catalog
            .add_scenario(Scenario::new("s-1", "booking"))
            .await;

        assert!(catalog.scenario("s-1").await.unwrap().is_some());
        assert!(catalog.scenario("missing").await.unwrap().is_none());
        assert!(catalog.persona("missing").await.unwrap().is_none());
    }
}
