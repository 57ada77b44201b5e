//! Registry of open changeset stores.
//!
//! Viewers showing the same remote image share one store so that their writes
//! claim indices from one cursor. Each viewer subscribes from its own saved
//! position and receives the other viewers' writes as they are made. Whoever
//! opens remote images owns the registry and passes it where stores are
//! needed.

use crate::changeset_store::ChangesetStore;
use crate::cloud::{BlobLocation, ObjectStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Open changeset stores keyed by their root.
pub struct StoreRegistry {
    object_store: Arc<dyn ObjectStore>,
    runtime: Handle,
    stores: Mutex<HashMap<BlobLocation, ChangesetStore>>,
}

impl StoreRegistry {
    /// Creates a registry whose stores run background work on `runtime`.
    pub fn new(object_store: Arc<dyn ObjectStore>, runtime: Handle) -> Self {
        Self {
            object_store,
            runtime,
            stores: Mutex::new(HashMap::new()),
        }
    }

    fn stores(&self) -> MutexGuard<'_, HashMap<BlobLocation, ChangesetStore>> {
        self.stores.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the store for `root`, opening it at `initial_cursor` if needed.
    ///
    /// The cursor only applies to a newly opened store. Callers joining an
    /// open store catch up with [`ChangesetStore::subscribe`].
    pub fn open(&self, root: &BlobLocation, initial_cursor: u64) -> ChangesetStore {
        let root = root.as_prefix();
        let mut stores = self.stores();
        if let Some(store) = stores.get(&root) {
            debug!("Reusing open changeset store for {}", root);
            return store.clone();
        }

        let store = ChangesetStore::with_runtime(
            Arc::clone(&self.object_store),
            &root,
            initial_cursor,
            self.runtime.clone(),
        );
        stores.insert(root, store.clone());
        store
    }

    pub fn get(&self, root: &BlobLocation) -> Option<ChangesetStore> {
        self.stores().get(&root.as_prefix()).cloned()
    }

    /// Forgets the store for `root`. Handles already given out keep working.
    pub fn close(&self, root: &BlobLocation) -> Option<ChangesetStore> {
        let closed = self.stores().remove(&root.as_prefix());
        if closed.is_some() {
            info!("Closed changeset store for {}", root);
        }
        closed
    }

    pub fn len(&self) -> usize {
        self.stores().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores().is_empty()
    }
}
