//! # aspect-catalog: typed business catalog over a property graph
//!
//! Aspects, Subjects, Objects and their property/value trees are stored as
//! vertices and edges of a transactional property graph. Every mutation is
//! recorded as a versioned, field-level history record in the same
//! transaction as the write itself.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageBackend` is the contract between the catalog and storage
//! 2. **Arena addressing**: entities refer to each other by `VertexId`, never by pointer
//! 3. **Views, not copies**: typed entity views are thin projections over a vertex
//! 4. **One transaction per mutation**: validation, writes and history commit together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aspect_catalog::{Catalog, HistoryContext};
//! use aspect_catalog::entity::{AspectData, BaseType, SubjectData};
//!
//! # async fn example() -> aspect_catalog::Result<()> {
//! let catalog = Catalog::open_memory();
//! let ctx = HistoryContext::new("admin");
//!
//! let length = catalog.create_aspect(&ctx, AspectData::new("Length", BaseType::Decimal)).await?;
//! let vehicles = catalog.create_subject(&ctx, SubjectData::new("Vehicles")).await?;
//!
//! for record in catalog.history_of(length.id).await? {
//!     println!("{} v{} {:?}", record.entity_class, record.version, record.event);
//! }
//! # let _ = vehicles;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod storage;
pub mod tx;
pub mod config;
pub mod entity;
pub mod schema;
pub mod materializer;
pub mod history;
pub mod catalog;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Vertex, Edge, Value, PropertyMap,
    VertexId, EdgeId, Direction,
};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{
    StorageBackend, BackendConfig, MemoryBackend,
    Pattern, Cursor, UniqueClaim,
};

// ============================================================================
// Re-exports: Transactions
// ============================================================================

pub use tx::{Transaction, TxMode, TxId};

// ============================================================================
// Re-exports: Catalog
// ============================================================================

pub use catalog::Catalog;
pub use config::CatalogConfig;
pub use entity::{Cardinality, EntityView};
pub use history::{Delta, EventKind, HistoryAware, HistoryContext, HistoryRecord, Snapshot};

use tracing::warn;

// ============================================================================
// GraphStore
// ============================================================================

/// Transactional handle over a storage backend.
///
/// All catalog reads and writes go through a [`Session`] obtained here.
pub struct GraphStore<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> GraphStore<B> {
    /// Create a store with the given backend.
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    /// Begin an explicit session. Dropping it without `commit` discards its writes.
    pub async fn begin(&self, mode: TxMode) -> Result<Session<'_, B>> {
        let tx = self.backend.begin_tx(mode).await?;
        Ok(Session { backend: &self.backend, tx })
    }

    /// Run `f` inside one transaction: commit on `Ok`, roll back on `Err`.
    pub async fn with_transaction<T, F>(&self, mode: TxMode, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Session<'_, B>) -> Result<T>,
    {
        let mut session = self.begin(mode).await?;
        match f(&mut session).await {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(err) => {
                let tx_id = session.id();
                if let Err(rollback_err) = session.rollback().await {
                    warn!(tx = %tx_id, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Access the underlying backend (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// In-memory store for testing and embedding.
impl GraphStore<storage::MemoryBackend> {
    pub fn open_memory() -> Self {
        Self::with_backend(storage::MemoryBackend::new())
    }
}

/// One open transaction against a backend.
pub struct Session<'g, B: StorageBackend> {
    backend: &'g B,
    tx: B::Tx,
}

impl<'g, B: StorageBackend> Session<'g, B> {
    pub fn id(&self) -> TxId {
        self.tx.id()
    }

    pub fn mode(&self) -> TxMode {
        self.tx.mode()
    }

    pub async fn commit(self) -> Result<()> {
        self.backend.commit_tx(self.tx).await
    }

    pub async fn rollback(self) -> Result<()> {
        self.backend.rollback_tx(self.tx).await
    }

    /// Commit only if every vertex read by this session is still unchanged.
    pub async fn pin_reads(&mut self) -> Result<()> {
        self.backend.pin_reads(&mut self.tx).await
    }

    // ------------------------------------------------------------------------
    // Vertices
    // ------------------------------------------------------------------------

    pub async fn new_vertex(&mut self, class: &str, props: PropertyMap) -> Result<VertexId> {
        self.backend.create_vertex(&mut self.tx, class, props).await
    }

    /// Fetch a vertex, failing with `NotFound` when absent.
    pub async fn vertex(&self, id: VertexId) -> Result<Vertex> {
        self.find_vertex(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("vertex {id}")))
    }

    pub async fn find_vertex(&self, id: VertexId) -> Result<Option<Vertex>> {
        self.backend.get_vertex(&self.tx, id).await
    }

    /// Load a typed view; fails with `NotFound` or `TypeMismatch`.
    pub async fn view<V: EntityView>(&self, id: VertexId) -> Result<V> {
        V::from_vertex(self.vertex(id).await?)
    }

    pub async fn set_property(&mut self, id: VertexId, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if value.is_null() {
            self.backend.remove_vertex_property(&mut self.tx, id, key).await
        } else {
            self.backend.set_vertex_property(&mut self.tx, id, key, value).await
        }
    }

    pub async fn remove_property(&mut self, id: VertexId, key: &str) -> Result<()> {
        self.backend.remove_vertex_property(&mut self.tx, id, key).await
    }

    pub async fn detach_delete(&mut self, id: VertexId) -> Result<bool> {
        self.backend.detach_delete_vertex(&mut self.tx, id).await
    }

    pub async fn vertices_by_class(&self, class: &str) -> Result<Vec<Vertex>> {
        self.backend.vertices_by_class(&self.tx, class).await
    }

    pub async fn query(&self, pattern: &Pattern, params: &PropertyMap) -> Result<Cursor> {
        self.backend.query(&self.tx, pattern, params).await
    }

    pub async fn vertex_count(&self) -> Result<u64> {
        self.backend.vertex_count(&self.tx).await
    }

    pub async fn edge_count(&self) -> Result<u64> {
        self.backend.edge_count(&self.tx).await
    }

    // ------------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------------

    pub async fn create_edge(&mut self, src: VertexId, dst: VertexId, edge_type: &str) -> Result<EdgeId> {
        self.backend.create_edge(&mut self.tx, src, dst, edge_type).await
    }

    pub async fn delete_edge(&mut self, id: EdgeId) -> Result<bool> {
        self.backend.delete_edge(&mut self.tx, id).await
    }

    pub async fn edges(&self, vertex: VertexId, dir: Direction, edge_type: &str) -> Result<Vec<Edge>> {
        self.backend.get_edges(&self.tx, vertex, dir, Some(edge_type)).await
    }

    /// Targets of outgoing `edge_type` edges, in edge creation order.
    pub async fn out_neighbors(&self, vertex: VertexId, edge_type: &str) -> Result<Vec<VertexId>> {
        let edges = self.edges(vertex, Direction::Outgoing, edge_type).await?;
        Ok(edges.into_iter().map(|e| e.dst).collect())
    }

    /// Sources of incoming `edge_type` edges, in edge creation order.
    pub async fn in_neighbors(&self, vertex: VertexId, edge_type: &str) -> Result<Vec<VertexId>> {
        let edges = self.edges(vertex, Direction::Incoming, edge_type).await?;
        Ok(edges.into_iter().map(|e| e.src).collect())
    }

    /// Target of the single outgoing `edge_type` edge, if any.
    pub async fn out_neighbor(&self, vertex: VertexId, edge_type: &str) -> Result<Option<VertexId>> {
        Ok(self.out_neighbors(vertex, edge_type).await?.into_iter().next())
    }

    /// Point the single outgoing `edge_type` edge of `vertex` at `target`
    /// (or remove it when `target` is `None`).
    pub async fn replace_out_edge(
        &mut self,
        vertex: VertexId,
        edge_type: &str,
        target: Option<VertexId>,
    ) -> Result<()> {
        let existing = self.edges(vertex, Direction::Outgoing, edge_type).await?;
        if existing.len() == 1 && Some(existing[0].dst) == target {
            return Ok(());
        }
        for edge in existing {
            self.delete_edge(edge.id).await?;
        }
        if let Some(target) = target {
            self.create_edge(vertex, target, edge_type).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Uniqueness
    // ------------------------------------------------------------------------

    pub async fn claim_unique(&mut self, claim: UniqueClaim) -> Result<()> {
        self.backend.claim_unique(&mut self.tx, claim).await
    }

    pub async fn release_unique(&mut self, key: &str) -> Result<()> {
        self.backend.release_unique(&mut self.tx, key).await
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Type mismatch at vertex {id}: expected {expected}, got {got}")]
    TypeMismatch { id: VertexId, expected: String, got: String },

    #[error("Duplicate name: {class} '{name}' already exists (vertex {conflicting})")]
    DuplicateName { class: String, name: String, conflicting: VertexId },

    #[error("Cyclic reference: aspect {owner} cannot reference aspect {target} (path {path:?})")]
    CyclicReference { owner: VertexId, target: VertexId, path: Vec<VertexId> },

    #[error("Cardinality violation on {node}: {cardinality} {message}")]
    CardinalityViolation { node: VertexId, cardinality: entity::Cardinality, message: String },

    #[error("Missing value on {node}: {cardinality} leaf requires a value")]
    MissingValue { node: VertexId, cardinality: entity::Cardinality },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Entity {class} {id} is deleted")]
    Deleted { class: String, id: VertexId },

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Transaction error: {0}")]
    TxError(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether retrying the whole mutation from scratch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransactionAborted(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
