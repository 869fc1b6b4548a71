//! In-process [`CollectionStore`] and [`ProjectDirectory`] for tests and
//! dry runs.

use std::collections::{BTreeMap, HashMap};

use annot_core::{
    CollectionRef, CollectionStore, NewCollection, NewItem, ProjectDirectory, ProjectRef,
    StoreError,
};
use async_trait::async_trait;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    projects: BTreeMap<i64, ProjectRef>,
    collections: BTreeMap<i64, CollectionRef>,
    items: HashMap<i64, Vec<NewItem>>,
    append_log: Vec<i64>,
    failing_appends: usize,
}

impl State {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_project(&self, name: &str, project_type: &str) -> ProjectRef {
        let mut state = self.state.lock().await;
        let project = ProjectRef {
            id: state.allocate_id(),
            name: name.to_string(),
            project_type: project_type.to_string(),
        };
        state.projects.insert(project.id, project.clone());
        project
    }

    pub async fn add_collection(
        &self,
        project_id: i64,
        name: &str,
        collection_type: &str,
    ) -> CollectionRef {
        let mut state = self.state.lock().await;
        let collection = CollectionRef {
            id: state.allocate_id(),
            project_id,
            name: name.to_string(),
            collection_type: collection_type.to_string(),
        };
        state.collections.insert(collection.id, collection.clone());
        collection
    }

    /// Make the next `count` appends fail without writing anything.
    pub async fn fail_next_appends(&self, count: usize) {
        self.state.lock().await.failing_appends = count;
    }

    pub async fn collections(&self) -> Vec<CollectionRef> {
        self.state.lock().await.collections.values().cloned().collect()
    }

    pub async fn items(&self, collection_id: i64) -> Vec<NewItem> {
        self.state
            .lock()
            .await
            .items
            .get(&collection_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Collection id of every successful append, in write order.
    pub async fn append_log(&self) -> Vec<i64> {
        self.state.lock().await.append_log.clone()
    }
}

#[async_trait]
impl CollectionStore for MemoryStore {
    async fn create_collection(&self, new: NewCollection) -> Result<CollectionRef, StoreError> {
        let mut state = self.state.lock().await;
        let collection = CollectionRef {
            id: state.allocate_id(),
            project_id: new.project_id,
            name: new.name,
            collection_type: new.collection_type,
        };
        state.collections.insert(collection.id, collection.clone());
        Ok(collection)
    }

    async fn get_collection(&self, collection_id: i64) -> Result<Option<CollectionRef>, StoreError> {
        Ok(self.state.lock().await.collections.get(&collection_id).cloned())
    }

    async fn append_items(&self, collection_id: i64, items: &[NewItem]) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        if !state.collections.contains_key(&collection_id) {
            return Err(StoreError::CollectionNotFound(collection_id));
        }
        if state.failing_appends > 0 {
            state.failing_appends -= 1;
            return Err(StoreError::Backend(Box::new(std::io::Error::other(
                "write rejected",
            ))));
        }
        state
            .items
            .entry(collection_id)
            .or_default()
            .extend_from_slice(items);
        state.append_log.push(collection_id);
        Ok(items.len() as u64)
    }
}

#[async_trait]
impl ProjectDirectory for MemoryStore {
    async fn find_project(&self, project_id: i64) -> Result<Option<ProjectRef>, StoreError> {
        Ok(self.state.lock().await.projects.get(&project_id).cloned())
    }
}
