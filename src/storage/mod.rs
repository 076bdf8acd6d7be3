//! # Storage Backend Trait
//!
//! The contract between the catalog and any property-graph engine.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryBackend` | `memory` | In-process, buffered transactions, commit-time checks |
//!
//! ## Transaction contract
//!
//! Every write goes through a `Self::Tx`. Writes are invisible to other
//! transactions until `commit_tx`, and `rollback_tx` discards them entirely.
//! A commit either applies the whole write set or none of it. A transaction
//! that called `pin_reads` additionally commits only if nothing it read has
//! changed since.

pub mod memory;
pub mod query;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::tx::{Transaction, TxMode};
use crate::Result;

pub use memory::MemoryBackend;
pub use query::{CompareOp, Condition, Cursor, Operand, Pattern};

// ============================================================================
// Backend Configuration
// ============================================================================

/// Configuration for opening a storage backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-memory (no persistence)
    #[default]
    Memory,
}

// ============================================================================
// Unique claims
// ============================================================================

/// A uniqueness key a transaction wants to own.
///
/// Backends re-verify claims against committed state while applying the
/// commit, so two transactions that both passed a read-time existence check
/// cannot both commit the same key. The loser fails with `DuplicateName`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueClaim {
    /// Normalized key, e.g. `aspect:global:length`.
    pub key: String,
    /// Entity class, for error reporting.
    pub class: String,
    /// Display name, for error reporting.
    pub name: String,
    /// Vertex that will own the key.
    pub owner: VertexId,
}

// ============================================================================
// StorageBackend Trait
// ============================================================================

/// The universal storage contract.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// The transaction type for this backend.
    type Tx: Transaction;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Shut down the backend, flushing any pending writes.
    async fn shutdown(&self) -> Result<()>;

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a new transaction.
    async fn begin_tx(&self, mode: TxMode) -> Result<Self::Tx>;

    /// Commit a transaction. Fails with `TransactionAborted` or
    /// `DuplicateName` when commit-time checks reject the write set.
    async fn commit_tx(&self, tx: Self::Tx) -> Result<()>;

    /// Make the commit also fail with `TransactionAborted` when any committed
    /// vertex this transaction has read, before or after this call, changed
    /// in the meantime. Used by checks whose outcome depends on what was read
    /// rather than on what is written.
    async fn pin_reads(&self, tx: &mut Self::Tx) -> Result<()>;

    /// Roll back a transaction, discarding its write set.
    async fn rollback_tx(&self, tx: Self::Tx) -> Result<()>;

    // ========================================================================
    // Vertex CRUD
    // ========================================================================

    /// Create a vertex of the given class.
    async fn create_vertex(
        &self,
        tx: &mut Self::Tx,
        class: &str,
        props: PropertyMap,
    ) -> Result<VertexId>;

    /// Get a vertex by ID. Returns None if not found.
    async fn get_vertex(&self, tx: &Self::Tx, id: VertexId) -> Result<Option<Vertex>>;

    /// Delete a vertex. Returns true if it existed.
    /// Fails if the vertex still has edges.
    async fn delete_vertex(&self, tx: &mut Self::Tx, id: VertexId) -> Result<bool>;

    /// Set a property on a vertex (upsert).
    async fn set_vertex_property(
        &self,
        tx: &mut Self::Tx,
        id: VertexId,
        key: &str,
        val: Value,
    ) -> Result<()>;

    /// Remove a property from a vertex.
    async fn remove_vertex_property(
        &self,
        tx: &mut Self::Tx,
        id: VertexId,
        key: &str,
    ) -> Result<()>;

    /// Delete a vertex and all its edges in one operation.
    ///
    /// Default: get all edges, delete each, then delete the vertex.
    async fn detach_delete_vertex(&self, tx: &mut Self::Tx, id: VertexId) -> Result<bool> {
        let edges = self.get_edges(tx, id, Direction::Both, None).await?;
        for edge in &edges {
            self.delete_edge(tx, edge.id).await?;
        }
        self.delete_vertex(tx, id).await
    }

    // ========================================================================
    // Edge CRUD
    // ========================================================================

    /// Create an edge between two vertices.
    async fn create_edge(
        &self,
        tx: &mut Self::Tx,
        src: VertexId,
        dst: VertexId,
        edge_type: &str,
    ) -> Result<EdgeId>;

    /// Get an edge by ID.
    async fn get_edge(&self, tx: &Self::Tx, id: EdgeId) -> Result<Option<Edge>>;

    /// Delete an edge. Returns true if it existed.
    async fn delete_edge(&self, tx: &mut Self::Tx, id: EdgeId) -> Result<bool>;

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Get all edges of a vertex, optionally filtered by direction and type.
    /// Ordered by edge id.
    async fn get_edges(
        &self,
        tx: &Self::Tx,
        vertex: VertexId,
        dir: Direction,
        edge_type: Option<&str>,
    ) -> Result<Vec<Edge>>;

    // ========================================================================
    // Scan
    // ========================================================================

    /// Find all vertices of a class, ordered by id.
    async fn vertices_by_class(&self, tx: &Self::Tx, class: &str) -> Result<Vec<Vertex>>;

    /// Run a parameterized pattern.
    ///
    /// Default: class scan, then lazy filtering in the cursor.
    async fn query(
        &self,
        tx: &Self::Tx,
        pattern: &Pattern,
        params: &PropertyMap,
    ) -> Result<Cursor> {
        let bound = pattern.bind(params)?;
        let candidates = self.vertices_by_class(tx, bound.class()).await?;
        Ok(Cursor::new(candidates, bound))
    }

    /// Total number of vertices.
    async fn vertex_count(&self, tx: &Self::Tx) -> Result<u64>;

    /// Total number of edges.
    async fn edge_count(&self, tx: &Self::Tx) -> Result<u64>;

    // ========================================================================
    // Uniqueness
    // ========================================================================

    /// Register a unique key to be verified and owned at commit.
    async fn claim_unique(&self, tx: &mut Self::Tx, claim: UniqueClaim) -> Result<()>;

    /// Release a unique key at commit (rename, soft delete).
    async fn release_unique(&self, tx: &mut Self::Tx, key: &str) -> Result<()>;
}
