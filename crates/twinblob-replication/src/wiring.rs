use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;
use twinblob_journal::{FileJournal, InMemoryJournal, ObligationJournal};
use twinblob_store::BlobStoreDao;

use crate::config::{JournalKind, ReplicationMode, TwinBlobConfig};
use crate::error::{ConfigError, ReplicationResult};
use crate::orchestrator::ReplicatingBlobStore;
use crate::prober::ConsistencyProber;
use crate::reconciler::{Reconciler, ReconcilerSettings};

/// Named blob stores available to the configuration.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: BTreeMap<String, Arc<dyn BlobStoreDao>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `store` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, store: Arc<dyn BlobStoreDao>) -> &mut Self {
        self.stores.insert(name.into(), store);
        self
    }

    pub fn with(mut self, name: impl Into<String>, store: Arc<dyn BlobStoreDao>) -> Self {
        self.register(name, store);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn BlobStoreDao>, ConfigError> {
        self.stores
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownStore(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// The component graph resolved from a configuration.
///
/// With replication disabled `store` is the primary itself and the other
/// components are absent.
pub struct BlobStoreWiring {
    /// The store upstream code should use.
    pub store: Arc<dyn BlobStoreDao>,
    pub replicating: Option<Arc<ReplicatingBlobStore>>,
    /// Not yet started; call [`Reconciler::spawn`].
    pub reconciler: Option<Reconciler>,
    pub prober: Option<ConsistencyProber>,
}

impl BlobStoreWiring {
    pub fn resolve(config: &TwinBlobConfig, registry: &StoreRegistry) -> ReplicationResult<Self> {
        config.validate()?;
        let bs = &config.blob_store;
        let primary = registry.get(&bs.primary)?;

        let secondary_name = match (bs.replication, bs.secondary.as_deref()) {
            (ReplicationMode::Enabled, Some(name)) => name,
            _ => {
                info!(primary = %bs.primary, "replication disabled; using primary directly");
                return Ok(Self {
                    store: primary,
                    replicating: None,
                    reconciler: None,
                    prober: None,
                });
            }
        };
        let secondary = registry.get(secondary_name)?;

        let settings = config.journal_settings();
        let journal: Arc<dyn ObligationJournal> = match (bs.journal.kind, &bs.journal.path) {
            (JournalKind::File, Some(path)) => {
                Arc::new(FileJournal::open(path, settings, bs.journal.file_config())?)
            }
            _ => Arc::new(InMemoryJournal::new(settings)),
        };

        let store = Arc::new(ReplicatingBlobStore::new(primary, secondary, journal));
        let reconciler = Reconciler::new(&store, ReconcilerSettings::from(&bs.reconciler));
        info!(
            primary = %bs.primary,
            secondary = secondary_name,
            journal = ?bs.journal.kind,
            "replication wired"
        );

        Ok(Self {
            store: store.clone(),
            prober: Some(store.prober()),
            replicating: Some(store),
            reconciler: Some(reconciler),
        })
    }
}

impl std::fmt::Debug for BlobStoreWiring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStoreWiring")
            .field("replicating", &self.replicating.is_some())
            .finish_non_exhaustive()
    }
}
