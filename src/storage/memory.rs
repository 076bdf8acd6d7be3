//! In-memory storage backend.
//!
//! This is the reference implementation of `StorageBackend`.
//! Committed state lives in one `GraphState` behind a single `RwLock`;
//! each transaction carries its own write buffer.
//!
//! ## Semantics
//!
//! - **Buffered writes**: a transaction stages full vertex copies and edges in
//!   its `WriteBuffer`. Reads consult the buffer first, then committed state,
//!   so a transaction sees its own writes and nobody else does.
//! - **Atomic commit**: the buffer is validated and applied while holding the
//!   write lock. Rollback simply drops the buffer.
//! - **Write conflicts**: the first read of a committed vertex records its
//!   revision. Committing a write to that vertex after another transaction
//!   bumped the revision fails with `TransactionAborted`.
//! - **Revisions**: a committed vertex write bumps the vertex's revision, and
//!   so does a committed edge created or removed from it (source side).
//! - **Pinned reads**: after `pin_reads`, every committed vertex the
//!   transaction read must still be at the revision it saw, or the commit
//!   fails with `TransactionAborted`.
//! - **Unique claims**: verified against the committed unique index at commit.
//! - **No property indexes**: pattern queries scan the class index.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::model::*;
use crate::tx::{Transaction, TxMode, TxId};
use crate::{Error, Result};
use super::{StorageBackend, UniqueClaim};

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory property graph storage.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    state: RwLock<GraphState>,
    next_vertex_id: AtomicU64,
    next_edge_id: AtomicU64,
    next_tx_id: AtomicU64,
}

#[derive(Default)]
struct GraphState {
    vertices: HashMap<VertexId, StoredVertex>,
    edges: HashMap<EdgeId, Edge>,
    /// vertex_id → list of edge IDs
    adjacency: HashMap<VertexId, Vec<EdgeId>>,
    /// class → vertex IDs
    class_index: HashMap<String, Vec<VertexId>>,
    /// unique key → owning vertex
    unique_index: HashMap<String, VertexId>,
}

struct StoredVertex {
    vertex: Vertex,
    revision: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                state: RwLock::new(GraphState::default()),
                next_vertex_id: AtomicU64::new(1),
                next_edge_id: AtomicU64::new(1),
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }

    /// Committed copy of a vertex; records the revision seen by `tx`.
    fn committed_vertex(&self, tx: &MemoryTx, id: VertexId) -> Option<Vertex> {
        let state = self.inner.state.read();
        let stored = state.vertices.get(&id)?;
        tx.read_revisions.lock().entry(id).or_insert(stored.revision);
        Some(stored.vertex.clone())
    }

    fn visible_vertex(&self, tx: &MemoryTx, id: VertexId) -> Option<Vertex> {
        match tx.buffer.vertices.get(&id) {
            Some(staged) => staged.clone(),
            None => self.committed_vertex(tx, id),
        }
    }

    /// Stage a writable copy of a vertex in the transaction buffer.
    fn stage_vertex<'t>(&self, tx: &'t mut MemoryTx, id: VertexId) -> Result<&'t mut Vertex> {
        tx.ensure_writable()?;
        if !tx.buffer.vertices.contains_key(&id) {
            let committed = self
                .committed_vertex(tx, id)
                .ok_or_else(|| Error::NotFound(format!("Vertex {id}")))?;
            tx.buffer.vertices.insert(id, Some(committed));
        }
        match tx.buffer.vertices.get_mut(&id) {
            Some(Some(vertex)) => Ok(vertex),
            _ => Err(Error::NotFound(format!("Vertex {id}"))),
        }
    }

    fn visible_edge(&self, tx: &MemoryTx, id: EdgeId) -> Option<Edge> {
        match tx.buffer.edges.get(&id) {
            Some(staged) => staged.clone(),
            None => self.inner.state.read().edges.get(&id).cloned(),
        }
    }

    fn visible_edges(
        &self,
        tx: &MemoryTx,
        vertex: VertexId,
        dir: Direction,
        edge_type: Option<&str>,
    ) -> Vec<Edge> {
        let mut result: BTreeMap<EdgeId, Edge> = BTreeMap::new();
        {
            let state = self.inner.state.read();
            for eid in state.adjacency.get(&vertex).into_iter().flatten() {
                if tx.buffer.edges.contains_key(eid) {
                    continue;
                }
                if let Some(edge) = state.edges.get(eid) {
                    if edge.matches(vertex, dir, edge_type) {
                        result.insert(edge.id, edge.clone());
                    }
                }
            }
        }
        for staged in tx.buffer.edges.values().flatten() {
            if staged.matches(vertex, dir, edge_type) {
                result.insert(staged.id, staged.clone());
            }
        }
        result.into_values().collect()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

/// In-memory transaction: a private write set over committed state.
pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
    buffer: WriteBuffer,
    /// Committed revision of every vertex at first read.
    read_revisions: Mutex<HashMap<VertexId, u64>>,
    /// Validate the whole read set at commit, not only the write set.
    pinned: bool,
}

#[derive(Default)]
struct WriteBuffer {
    /// `None` marks a deletion.
    vertices: HashMap<VertexId, Option<Vertex>>,
    edges: HashMap<EdgeId, Option<Edge>>,
    /// Vertices born in this transaction; they have no committed revision.
    created: HashSet<VertexId>,
    claims: Vec<UniqueClaim>,
    releases: Vec<String>,
}

impl WriteBuffer {
    fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.edges.is_empty() && self.claims.is_empty() && self.releases.is_empty()
    }
}

impl MemoryTx {
    fn ensure_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::TxError(format!("transaction {} is read-only", self.id)));
        }
        Ok(())
    }
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
}

// ============================================================================
// Commit
// ============================================================================

impl GraphState {
    fn check_conflicts(&self, tx_id: TxId, buffer: &WriteBuffer, reads: &HashMap<VertexId, u64>) -> Result<()> {
        for id in buffer.vertices.keys() {
            if buffer.created.contains(id) {
                continue;
            }
            let current = self.vertices.get(id).map(|s| s.revision);
            let seen = reads.get(id).copied();
            if current != seen {
                warn!(tx = %tx_id, vertex = %id, ?seen, ?current, "write conflict");
                return Err(Error::TransactionAborted(format!(
                    "vertex {id} was modified by a concurrent transaction"
                )));
            }
        }
        for edge in buffer.edges.values().flatten() {
            for end in [edge.src, edge.dst] {
                let alive = match buffer.vertices.get(&end) {
                    Some(staged) => staged.is_some(),
                    None => self.vertices.contains_key(&end),
                };
                if !alive {
                    return Err(Error::TransactionAborted(format!(
                        "edge {} endpoint {end} was removed by a concurrent transaction",
                        edge.id
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_pinned_reads(&self, tx_id: TxId, reads: &HashMap<VertexId, u64>) -> Result<()> {
        for (id, seen) in reads {
            let current = self.vertices.get(id).map(|s| s.revision);
            if current != Some(*seen) {
                warn!(tx = %tx_id, vertex = %id, seen, ?current, "pinned read changed");
                return Err(Error::TransactionAborted(format!(
                    "vertex {id} read by this transaction was changed by a concurrent transaction"
                )));
            }
        }
        Ok(())
    }

    fn check_claims(&self, buffer: &WriteBuffer) -> Result<()> {
        let mut claimed: HashMap<&str, VertexId> = HashMap::new();
        for claim in &buffer.claims {
            if let Some(&other) = claimed.get(claim.key.as_str()) {
                if other != claim.owner {
                    return Err(Error::DuplicateName {
                        class: claim.class.clone(),
                        name: claim.name.clone(),
                        conflicting: other,
                    });
                }
            }
            claimed.insert(claim.key.as_str(), claim.owner);

            if buffer.releases.iter().any(|k| k == &claim.key) {
                continue;
            }
            let Some(&owner) = self.unique_index.get(&claim.key) else {
                continue;
            };
            let owner_alive = match buffer.vertices.get(&owner) {
                Some(staged) => staged.is_some(),
                None => self.vertices.contains_key(&owner),
            };
            if owner != claim.owner && owner_alive {
                return Err(Error::DuplicateName {
                    class: claim.class.clone(),
                    name: claim.name.clone(),
                    conflicting: owner,
                });
            }
        }
        Ok(())
    }

    fn apply(&mut self, buffer: WriteBuffer) {
        for (id, staged) in buffer.edges {
            match staged {
                Some(edge) => {
                    self.bump(edge.src);
                    self.adjacency.entry(edge.src).or_default().push(id);
                    if edge.src != edge.dst {
                        self.adjacency.entry(edge.dst).or_default().push(id);
                    }
                    self.edges.insert(id, edge);
                }
                None => {
                    if let Some(edge) = self.edges.remove(&id) {
                        self.bump(edge.src);
                        for end in [edge.src, edge.dst] {
                            if let Some(ids) = self.adjacency.get_mut(&end) {
                                ids.retain(|eid| *eid != id);
                            }
                        }
                    }
                }
            }
        }

        for (id, staged) in buffer.vertices {
            match staged {
                Some(vertex) => {
                    let revision = match self.vertices.get(&id) {
                        Some(old) => old.revision + 1,
                        None => {
                            self.class_index.entry(vertex.class.clone()).or_default().push(id);
                            1
                        }
                    };
                    self.vertices.insert(id, StoredVertex { vertex, revision });
                }
                None => {
                    if let Some(old) = self.vertices.remove(&id) {
                        if let Some(ids) = self.class_index.get_mut(&old.vertex.class) {
                            ids.retain(|vid| *vid != id);
                        }
                    }
                    self.adjacency.remove(&id);
                }
            }
        }

        for key in buffer.releases {
            self.unique_index.remove(&key);
        }
        for claim in buffer.claims {
            self.unique_index.insert(claim.key, claim.owner);
        }
    }

    fn bump(&mut self, id: VertexId) {
        if let Some(stored) = self.vertices.get_mut(&id) {
            stored.revision += 1;
        }
    }
}

// ============================================================================
// StorageBackend impl
// ============================================================================

#[async_trait]
impl StorageBackend for MemoryBackend {
    type Tx = MemoryTx;

    async fn shutdown(&self) -> Result<()> { Ok(()) }

    async fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed));
        Ok(MemoryTx {
            id,
            mode,
            buffer: WriteBuffer::default(),
            read_revisions: Mutex::new(HashMap::new()),
            pinned: false,
        })
    }

    async fn commit_tx(&self, tx: MemoryTx) -> Result<()> {
        let MemoryTx { id, buffer, read_revisions, pinned, .. } = tx;
        if buffer.is_empty() {
            return Ok(());
        }
        let reads = read_revisions.into_inner();

        let mut state = self.inner.state.write();
        state.check_conflicts(id, &buffer, &reads)?;
        if pinned {
            state.check_pinned_reads(id, &reads)?;
        }
        state.check_claims(&buffer)?;

        debug!(
            tx = %id,
            vertices = buffer.vertices.len(),
            edges = buffer.edges.len(),
            claims = buffer.claims.len(),
            "commit"
        );
        state.apply(buffer);
        Ok(())
    }

    async fn pin_reads(&self, tx: &mut MemoryTx) -> Result<()> {
        tx.pinned = true;
        Ok(())
    }

    async fn rollback_tx(&self, tx: MemoryTx) -> Result<()> {
        debug!(tx = %tx.id, staged = tx.buffer.vertices.len(), "rollback");
        Ok(())
    }

    // ========================================================================
    // Vertex CRUD
    // ========================================================================

    async fn create_vertex(
        &self,
        tx: &mut MemoryTx,
        class: &str,
        props: PropertyMap,
    ) -> Result<VertexId> {
        tx.ensure_writable()?;
        let id = VertexId(self.inner.next_vertex_id.fetch_add(1, Ordering::Relaxed));
        let vertex = Vertex { id, class: class.to_string(), properties: props };
        tx.buffer.vertices.insert(id, Some(vertex));
        tx.buffer.created.insert(id);
        Ok(id)
    }

    async fn get_vertex(&self, tx: &MemoryTx, id: VertexId) -> Result<Option<Vertex>> {
        Ok(self.visible_vertex(tx, id))
    }

    async fn delete_vertex(&self, tx: &mut MemoryTx, id: VertexId) -> Result<bool> {
        tx.ensure_writable()?;
        if self.visible_vertex(tx, id).is_none() {
            return Ok(false);
        }

        // Can't delete a connected vertex
        let edges = self.visible_edges(tx, id, Direction::Both, None);
        if !edges.is_empty() {
            return Err(Error::ConstraintViolation(format!(
                "Cannot delete vertex {id} with {} edges. Delete edges first.",
                edges.len()
            )));
        }

        self.stage_vertex(tx, id)?;
        tx.buffer.vertices.insert(id, None);
        Ok(true)
    }

    async fn set_vertex_property(
        &self,
        tx: &mut MemoryTx,
        id: VertexId,
        key: &str,
        val: Value,
    ) -> Result<()> {
        let vertex = self.stage_vertex(tx, id)?;
        vertex.properties.insert(key.to_string(), val);
        Ok(())
    }

    async fn remove_vertex_property(
        &self,
        tx: &mut MemoryTx,
        id: VertexId,
        key: &str,
    ) -> Result<()> {
        let vertex = self.stage_vertex(tx, id)?;
        vertex.properties.remove(key);
        Ok(())
    }

    // ========================================================================
    // Edge CRUD
    // ========================================================================

    async fn create_edge(
        &self,
        tx: &mut MemoryTx,
        src: VertexId,
        dst: VertexId,
        edge_type: &str,
    ) -> Result<EdgeId> {
        tx.ensure_writable()?;
        if self.visible_vertex(tx, src).is_none() {
            return Err(Error::NotFound(format!("Source vertex {src}")));
        }
        if self.visible_vertex(tx, dst).is_none() {
            return Err(Error::NotFound(format!("Target vertex {dst}")));
        }

        let id = EdgeId(self.inner.next_edge_id.fetch_add(1, Ordering::Relaxed));
        tx.buffer.edges.insert(id, Some(Edge::new(id, src, dst, edge_type)));
        Ok(id)
    }

    async fn get_edge(&self, tx: &MemoryTx, id: EdgeId) -> Result<Option<Edge>> {
        Ok(self.visible_edge(tx, id))
    }

    async fn delete_edge(&self, tx: &mut MemoryTx, id: EdgeId) -> Result<bool> {
        tx.ensure_writable()?;
        if self.visible_edge(tx, id).is_none() {
            return Ok(false);
        }
        tx.buffer.edges.insert(id, None);
        Ok(true)
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    async fn get_edges(
        &self,
        tx: &MemoryTx,
        vertex: VertexId,
        dir: Direction,
        edge_type: Option<&str>,
    ) -> Result<Vec<Edge>> {
        Ok(self.visible_edges(tx, vertex, dir, edge_type))
    }

    // ========================================================================
    // Scan
    // ========================================================================

    async fn vertices_by_class(&self, tx: &MemoryTx, class: &str) -> Result<Vec<Vertex>> {
        let mut result: BTreeMap<VertexId, Vertex> = BTreeMap::new();
        {
            let state = self.inner.state.read();
            let mut reads = tx.read_revisions.lock();
            for id in state.class_index.get(class).into_iter().flatten() {
                if tx.buffer.vertices.contains_key(id) {
                    continue;
                }
                if let Some(stored) = state.vertices.get(id) {
                    reads.entry(*id).or_insert(stored.revision);
                    result.insert(*id, stored.vertex.clone());
                }
            }
        }
        for staged in tx.buffer.vertices.values().flatten() {
            if staged.is_class(class) {
                result.insert(staged.id, staged.clone());
            }
        }
        Ok(result.into_values().collect())
    }

    async fn vertex_count(&self, tx: &MemoryTx) -> Result<u64> {
        let state = self.inner.state.read();
        let mut count = state.vertices.len() as i64;
        for (id, staged) in &tx.buffer.vertices {
            match (state.vertices.contains_key(id), staged.is_some()) {
                (false, true) => count += 1,
                (true, false) => count -= 1,
                _ => {}
            }
        }
        Ok(count.max(0) as u64)
    }

    async fn edge_count(&self, tx: &MemoryTx) -> Result<u64> {
        let state = self.inner.state.read();
        let mut count = state.edges.len() as i64;
        for (id, staged) in &tx.buffer.edges {
            match (state.edges.contains_key(id), staged.is_some()) {
                (false, true) => count += 1,
                (true, false) => count -= 1,
                _ => {}
            }
        }
        Ok(count.max(0) as u64)
    }

    // ========================================================================
    // Uniqueness
    // ========================================================================

    async fn claim_unique(&self, tx: &mut MemoryTx, claim: UniqueClaim) -> Result<()> {
        tx.ensure_writable()?;
        tx.buffer.releases.retain(|k| k != &claim.key);
        tx.buffer.claims.retain(|c| c.owner != claim.owner || c.key != claim.key);
        tx.buffer.claims.push(claim);
        Ok(())
    }

    async fn release_unique(&self, tx: &mut MemoryTx, key: &str) -> Result<()> {
        tx.ensure_writable()?;
        tx.buffer.claims.retain(|c| c.key != key);
        tx.buffer.releases.push(key.to_string());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(key: &str, owner: VertexId) -> UniqueClaim {
        UniqueClaim {
            key: key.to_string(),
            class: "Aspect".to_string(),
            name: key.to_string(),
            owner,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_vertex() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();

        let id = db.create_vertex(&mut tx, "Aspect", property_map([("name", "Length")])).await.unwrap();
        let vertex = db.get_vertex(&tx, id).await.unwrap().unwrap();

        assert_eq!(vertex.class, "Aspect");
        assert_eq!(vertex.get_str("name"), Some("Length"));
    }

    #[tokio::test]
    async fn test_create_edge() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();

        let a = db.create_vertex(&mut tx, "Aspect", PropertyMap::new()).await.unwrap();
        let b = db.create_vertex(&mut tx, "AspectProperty", PropertyMap::new()).await.unwrap();

        let edge_id = db.create_edge(&mut tx, a, b, "HAS_PROPERTY").await.unwrap();
        let edge = db.get_edge(&tx, edge_id).await.unwrap().unwrap();

        assert_eq!(edge.src, a);
        assert_eq!(edge.dst, b);
        assert_eq!(edge.edge_type, "HAS_PROPERTY");
        assert_eq!(db.get_edges(&tx, b, Direction::Incoming, Some("HAS_PROPERTY")).await.unwrap().len(), 1);
        assert!(db.get_edges(&tx, b, Direction::Outgoing, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cannot_delete_connected_vertex() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();

        let a = db.create_vertex(&mut tx, "Aspect", PropertyMap::new()).await.unwrap();
        let b = db.create_vertex(&mut tx, "Aspect", PropertyMap::new()).await.unwrap();
        db.create_edge(&mut tx, a, b, "REFERENCES").await.unwrap();

        assert!(db.delete_vertex(&mut tx, a).await.is_err());
        assert!(db.detach_delete_vertex(&mut tx, a).await.unwrap());
        assert!(db.get_vertex(&tx, a).await.unwrap().is_none());
        assert_eq!(db.edge_count(&tx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let db = MemoryBackend::new();
        let mut writer = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let id = db.create_vertex(&mut writer, "Subject", PropertyMap::new()).await.unwrap();

        let reader = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        assert!(db.get_vertex(&reader, id).await.unwrap().is_none());
        assert_eq!(db.vertex_count(&reader).await.unwrap(), 0);

        db.commit_tx(writer).await.unwrap();
        assert!(db.get_vertex(&reader, id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rollback_discards_everything() {
        let db = MemoryBackend::new();
        let mut setup = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let a = db.create_vertex(&mut setup, "Aspect", property_map([("name", "A")])).await.unwrap();
        db.commit_tx(setup).await.unwrap();

        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let b = db.create_vertex(&mut tx, "Aspect", PropertyMap::new()).await.unwrap();
        db.create_edge(&mut tx, a, b, "REFERENCES").await.unwrap();
        db.set_vertex_property(&mut tx, a, "name", Value::from("renamed")).await.unwrap();
        db.rollback_tx(tx).await.unwrap();

        let check = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        assert_eq!(db.vertex_count(&check).await.unwrap(), 1);
        assert_eq!(db.edge_count(&check).await.unwrap(), 0);
        let vertex = db.get_vertex(&check, a).await.unwrap().unwrap();
        assert_eq!(vertex.get_str("name"), Some("A"));
    }

    #[tokio::test]
    async fn test_concurrent_write_aborts_second_commit() {
        let db = MemoryBackend::new();
        let mut setup = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let a = db.create_vertex(&mut setup, "Aspect", property_map([("version", 1i64)])).await.unwrap();
        db.commit_tx(setup).await.unwrap();

        let mut first = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let mut second = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        db.get_vertex(&first, a).await.unwrap();
        db.get_vertex(&second, a).await.unwrap();

        db.set_vertex_property(&mut first, a, "version", Value::from(2i64)).await.unwrap();
        db.set_vertex_property(&mut second, a, "version", Value::from(2i64)).await.unwrap();

        db.commit_tx(first).await.unwrap();
        let err = db.commit_tx(second).await.unwrap_err();
        assert!(matches!(err, Error::TransactionAborted(_)));
    }

    #[tokio::test]
    async fn test_pinned_reads_abort_after_concurrent_edge() {
        let db = MemoryBackend::new();
        let mut setup = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let a = db.create_vertex(&mut setup, "Aspect", PropertyMap::new()).await.unwrap();
        let b = db.create_vertex(&mut setup, "Aspect", PropertyMap::new()).await.unwrap();
        db.commit_tx(setup).await.unwrap();

        let mut first = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let mut second = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        db.get_vertex(&second, a).await.unwrap();
        db.pin_reads(&mut second).await.unwrap();

        // Only an edge leaves `a`; the vertex itself is never written.
        db.create_edge(&mut first, a, b, "REFERENCES").await.unwrap();
        db.create_edge(&mut second, b, a, "REFERENCES").await.unwrap();

        db.commit_tx(first).await.unwrap();
        let err = db.commit_tx(second).await.unwrap_err();
        assert!(matches!(err, Error::TransactionAborted(_)));

        let check = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        assert_eq!(db.edge_count(&check).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unpinned_reads_do_not_abort() {
        let db = MemoryBackend::new();
        let mut setup = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let a = db.create_vertex(&mut setup, "Aspect", PropertyMap::new()).await.unwrap();
        let b = db.create_vertex(&mut setup, "Aspect", PropertyMap::new()).await.unwrap();
        db.commit_tx(setup).await.unwrap();

        let mut first = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let mut second = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        db.get_vertex(&second, a).await.unwrap();
        db.create_edge(&mut first, a, b, "REFERENCES").await.unwrap();
        db.create_edge(&mut second, b, a, "REFERENCES").await.unwrap();

        db.commit_tx(first).await.unwrap();
        db.commit_tx(second).await.unwrap();
    }

    #[tokio::test]
    async fn test_unique_claim_rechecked_at_commit() {
        let db = MemoryBackend::new();
        let mut first = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let mut second = db.begin_tx(TxMode::ReadWrite).await.unwrap();

        let a = db.create_vertex(&mut first, "Aspect", PropertyMap::new()).await.unwrap();
        let b = db.create_vertex(&mut second, "Aspect", PropertyMap::new()).await.unwrap();
        db.claim_unique(&mut first, claim("aspect:global:length", a)).await.unwrap();
        db.claim_unique(&mut second, claim("aspect:global:length", b)).await.unwrap();

        db.commit_tx(first).await.unwrap();
        match db.commit_tx(second).await {
            Err(Error::DuplicateName { conflicting, .. }) => assert_eq!(conflicting, a),
            other => panic!("expected DuplicateName, got {other:?}"),
        }

        let check = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        assert_eq!(db.vertices_by_class(&check, "Aspect").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_released_key_can_be_reclaimed() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let a = db.create_vertex(&mut tx, "Aspect", PropertyMap::new()).await.unwrap();
        db.claim_unique(&mut tx, claim("k", a)).await.unwrap();
        db.commit_tx(tx).await.unwrap();

        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        db.release_unique(&mut tx, "k").await.unwrap();
        db.commit_tx(tx).await.unwrap();

        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let b = db.create_vertex(&mut tx, "Aspect", PropertyMap::new()).await.unwrap();
        db.claim_unique(&mut tx, claim("k", b)).await.unwrap();
        db.commit_tx(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        let err = db.create_vertex(&mut tx, "Aspect", PropertyMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::TxError(_)));
    }

    #[tokio::test]
    async fn test_vertices_by_class_overlays_buffer() {
        let db = MemoryBackend::new();
        let mut setup = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let a = db.create_vertex(&mut setup, "Subject", PropertyMap::new()).await.unwrap();
        db.create_vertex(&mut setup, "Aspect", PropertyMap::new()).await.unwrap();
        db.commit_tx(setup).await.unwrap();

        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        db.delete_vertex(&mut tx, a).await.unwrap();
        let b = db.create_vertex(&mut tx, "Subject", PropertyMap::new()).await.unwrap();

        let subjects = db.vertices_by_class(&tx, "Subject").await.unwrap();
        assert_eq!(subjects.iter().map(|v| v.id).collect::<Vec<_>>(), vec![b]);
    }
}
