//! # Catalog services
//!
//! The mutation surface of the catalog. Each public operation runs in its
//! own transaction: it validates, writes through typed views, appends
//! history for every entity it touched, and commits. Any error rolls the
//! whole transaction back.
//!
//! ```rust,no_run
//! use aspect_catalog::{Cardinality, Catalog, HistoryContext};
//! use aspect_catalog::entity::{AspectData, BaseType, ObjectData, ObjectPropertyData, SubjectData, ValueData};
//!
//! # async fn example() -> aspect_catalog::Result<()> {
//! let catalog = Catalog::open_memory();
//! let ctx = HistoryContext::new("admin");
//!
//! let length = catalog.create_aspect(&ctx, AspectData::new("Length", BaseType::Decimal)).await?;
//! let vehicles = catalog.create_subject(&ctx, SubjectData::new("Vehicles")).await?;
//! let car = catalog.create_object(&ctx, ObjectData::new("Car-1", vehicles.id)).await?;
//! let prop = catalog
//!     .create_object_property(&ctx, ObjectPropertyData::new(car.id, length.id, Cardinality::One))
//!     .await?;
//! catalog.set_single_value(&ctx, prop.id, None, None, ValueData::scalar("4.5")).await?;
//! # Ok(())
//! # }
//! ```

mod aspects;
mod objects;
mod subjects;

use tracing::info;

use crate::config::CatalogConfig;
use crate::entity::{EntityView, SUBJECT_CLASS, SubjectView};
use crate::history::{HistoryEngine, HistoryRecord, Snapshot};
use crate::materializer::Materializer;
use crate::model::VertexId;
use crate::storage::{BackendConfig, MemoryBackend, StorageBackend};
use crate::tx::TxMode;
use crate::{Error, GraphStore, Result, Session};

/// Catalog over a storage backend.
pub struct Catalog<B: StorageBackend = MemoryBackend> {
    store: GraphStore<B>,
    history: HistoryEngine,
    materializer: Materializer,
    config: CatalogConfig,
}

impl Catalog<MemoryBackend> {
    /// Open the backend named by `config`.
    pub fn open(config: CatalogConfig) -> Result<Self> {
        match config.backend {
            BackendConfig::Memory => Ok(Self::with_backend(MemoryBackend::new(), config)),
        }
    }

    /// In-memory catalog with default settings.
    pub fn open_memory() -> Self {
        Self::with_backend(MemoryBackend::new(), CatalogConfig::default())
    }
}

impl<B: StorageBackend> Catalog<B> {
    pub fn with_backend(backend: B, config: CatalogConfig) -> Self {
        let history = HistoryEngine::new(config.history.clone());
        let materializer = Materializer::new(config.validation.clone(), history.clone());
        info!(backend = ?config.backend, "catalog opened");
        Self { store: GraphStore::with_backend(backend), history, materializer, config }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// The underlying store, for reads and custom transactions.
    pub fn store(&self) -> &GraphStore<B> {
        &self.store
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.store.backend().shutdown().await
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Change log of one entity, oldest version first.
    pub async fn history_of(&self, entity_id: VertexId) -> Result<Vec<HistoryRecord>> {
        self.store
            .with_transaction(TxMode::ReadOnly, async move |session: &mut Session<'_, B>| -> Result<Vec<HistoryRecord>> {
                self.history.history_of(session, entity_id).await
            })
            .await
    }

    /// Every history record, in timestamp order.
    pub async fn all_history(&self) -> Result<Vec<HistoryRecord>> {
        self.store
            .with_transaction(TxMode::ReadOnly, async move |session: &mut Session<'_, B>| -> Result<Vec<HistoryRecord>> {
                self.history.all_history(session).await
            })
            .await
    }

    /// State of an entity as of `version`, rebuilt from its change log.
    pub async fn state_at(&self, entity_id: VertexId, version: u64) -> Result<Option<Snapshot>> {
        let records = self.history_of(entity_id).await?;
        Ok(HistoryEngine::replay(&records, version))
    }
}

/// Load a subject that new entities may attach to.
async fn live_subject<B: StorageBackend>(session: &Session<'_, B>, id: VertexId) -> Result<SubjectView> {
    let subject = session.view::<SubjectView>(id).await?;
    if subject.is_deleted() {
        return Err(Error::Deleted { class: SUBJECT_CLASS.to_string(), id: subject.id() });
    }
    Ok(subject)
}
