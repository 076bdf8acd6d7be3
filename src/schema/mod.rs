//! # Schema graph validation
//!
//! Two families of checks run before any schema write:
//!
//! - **Scoped name uniqueness.** Names compare trimmed and case-insensitively
//!   within a [`NameScope`]. The check queries the store for a live entity with
//!   the same name so the error can name the conflict, then registers a unique
//!   claim so the commit re-verifies the key against concurrent creators.
//! - **Reference acyclicity.** Following `AspectProperty → target Aspect`
//!   edges from any aspect must never lead back to it. Soft-deleted aspects
//!   stay in the traversal; soft-deleted properties do not.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::entity::{
    ASPECT_CLASS, AspectView, DELETED, EntityView, HAS_PROPERTY, NAME, OBJECT_CLASS, OBJECT_PROPERTY_CLASS,
    OF_ASPECT, OF_SUBJECT, REFERENCES, SUBJECT_CLASS,
};
use crate::model::{Value, Vertex, VertexId, property_map};
use crate::storage::{Pattern, StorageBackend, UniqueClaim};
use crate::{Error, Result, Session};

// ============================================================================
// Name scopes
// ============================================================================

/// Where a name must be unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameScope {
    /// Aspects, per owning subject or globally.
    Aspect { subject: Option<VertexId> },
    /// Subjects, globally.
    Subject,
    /// Objects, per subject.
    Object { subject: VertexId },
    /// Object property role names, per (object, aspect).
    Role { object: VertexId, aspect: VertexId },
}

impl NameScope {
    pub fn class(&self) -> &'static str {
        match self {
            NameScope::Aspect { .. } => ASPECT_CLASS,
            NameScope::Subject => SUBJECT_CLASS,
            NameScope::Object { .. } => OBJECT_CLASS,
            NameScope::Role { .. } => OBJECT_PROPERTY_CLASS,
        }
    }

    /// Normalized unique-index key for `name` in this scope.
    pub fn key(&self, name: &str) -> String {
        let name = name.trim().to_lowercase();
        match self {
            NameScope::Aspect { subject: Some(s) } => format!("aspect:{s}:{name}"),
            NameScope::Aspect { subject: None } => format!("aspect:global:{name}"),
            NameScope::Subject => format!("subject:{name}"),
            NameScope::Object { subject } => format!("object:{subject}:{name}"),
            NameScope::Role { object, aspect } => format!("role:{object}:{aspect}:{name}"),
        }
    }

    async fn contains<B: StorageBackend>(&self, session: &Session<'_, B>, candidate: &Vertex) -> Result<bool> {
        match *self {
            NameScope::Subject => Ok(true),
            NameScope::Aspect { subject } => Ok(session.out_neighbor(candidate.id, OF_SUBJECT).await? == subject),
            NameScope::Object { subject } => {
                Ok(session.out_neighbor(candidate.id, OF_SUBJECT).await? == Some(subject))
            }
            NameScope::Role { object, aspect } => {
                let owners = session.in_neighbors(candidate.id, HAS_PROPERTY).await?;
                Ok(owners.contains(&object) && session.out_neighbor(candidate.id, OF_ASPECT).await? == Some(aspect))
            }
        }
    }
}

/// Live entities in `scope` whose name matches `name`, except `exclude`.
pub async fn find_by_name<B: StorageBackend>(
    session: &Session<'_, B>,
    scope: NameScope,
    name: &str,
    exclude: Option<VertexId>,
) -> Result<Vec<Vertex>> {
    let pattern = Pattern::class(scope.class())
        .eq_ignore_case_param(NAME, "name")
        .ne_value(DELETED, true);
    let params = property_map([("name", Value::from(name))]);
    let mut found = Vec::new();
    for candidate in session.query(&pattern, &params).await? {
        if Some(candidate.id) == exclude {
            continue;
        }
        if scope.contains(session, &candidate).await? {
            found.push(candidate);
        }
    }
    Ok(found)
}

/// Fail with `DuplicateName` if another live entity in `scope` owns `name`.
pub async fn ensure_name_free<B: StorageBackend>(
    session: &Session<'_, B>,
    scope: NameScope,
    name: &str,
    exclude: Option<VertexId>,
) -> Result<()> {
    match find_by_name(session, scope, name, exclude).await?.into_iter().next() {
        Some(conflict) => Err(Error::DuplicateName {
            class: scope.class().to_string(),
            name: name.trim().to_string(),
            conflicting: conflict.id,
        }),
        None => Ok(()),
    }
}

/// Check `name` and claim it for `owner` until commit.
pub async fn claim_name<B: StorageBackend>(
    session: &mut Session<'_, B>,
    scope: NameScope,
    name: &str,
    owner: VertexId,
) -> Result<()> {
    ensure_name_free(session, scope, name, Some(owner)).await?;
    session
        .claim_unique(UniqueClaim {
            key: scope.key(name),
            class: scope.class().to_string(),
            name: name.trim().to_string(),
            owner,
        })
        .await
}

/// Give up `name` in `scope` (rename, soft delete).
pub async fn release_name<B: StorageBackend>(session: &mut Session<'_, B>, scope: NameScope, name: &str) -> Result<()> {
    session.release_unique(&scope.key(name)).await
}

// ============================================================================
// Aspect references
// ============================================================================

/// Load a target aspect for a new reference; soft-deleted aspects are refused.
pub async fn live_aspect<B: StorageBackend>(session: &Session<'_, B>, id: VertexId) -> Result<AspectView> {
    let aspect = session.view::<AspectView>(id).await?;
    if aspect.is_deleted() {
        return Err(Error::Deleted { class: ASPECT_CLASS.to_string(), id });
    }
    Ok(aspect)
}

/// Reference adjacency reachable from `start`: aspect → aspects its live
/// properties target, in property creation order. `skip` is left out, so an
/// update can be checked as if the property already pointed elsewhere.
pub async fn reachable_references<B: StorageBackend>(
    session: &Session<'_, B>,
    start: VertexId,
    skip: Option<VertexId>,
) -> Result<BTreeMap<VertexId, Vec<VertexId>>> {
    let mut graph = BTreeMap::new();
    let mut pending = vec![start];
    while let Some(aspect) = pending.pop() {
        if graph.contains_key(&aspect) {
            continue;
        }
        // Read so that a pinned session notices new properties on it.
        session.vertex(aspect).await?;
        let mut targets = Vec::new();
        for property in session.out_neighbors(aspect, HAS_PROPERTY).await? {
            if Some(property) == skip {
                continue;
            }
            let vertex = session.vertex(property).await?;
            if vertex.get_flag(DELETED) {
                continue;
            }
            if let Some(target) = session.out_neighbor(property, REFERENCES).await? {
                targets.push(target);
                pending.push(target);
            }
        }
        graph.insert(aspect, targets);
    }
    Ok(graph)
}

/// Path `owner → target → … → owner` if adding the reference would close a
/// cycle in `graph`.
pub fn cycle_path(
    graph: &BTreeMap<VertexId, Vec<VertexId>>,
    owner: VertexId,
    target: VertexId,
) -> Option<Vec<VertexId>> {
    if owner == target {
        return Some(vec![owner, owner]);
    }
    let mut came_from: HashMap<VertexId, VertexId> = HashMap::new();
    let mut seen: HashSet<VertexId> = HashSet::from([target]);
    let mut stack = vec![target];
    while let Some(node) = stack.pop() {
        for &next in graph.get(&node).map(Vec::as_slice).unwrap_or_default() {
            if next == owner {
                let mut path = vec![owner];
                let mut cursor = node;
                let mut back = vec![cursor];
                while let Some(&prev) = came_from.get(&cursor) {
                    back.push(prev);
                    cursor = prev;
                }
                path.extend(back.into_iter().rev());
                path.push(owner);
                return Some(path);
            }
            if seen.insert(next) {
                came_from.insert(next, node);
                stack.push(next);
            }
        }
    }
    None
}

/// Fail with `CyclicReference` if `owner` referencing `target` closes a cycle.
///
/// The session's reads are pinned: a concurrent commit that changes any
/// aspect or property walked here aborts this session's commit.
pub async fn ensure_acyclic<B: StorageBackend>(
    session: &mut Session<'_, B>,
    owner: VertexId,
    target: VertexId,
    skip: Option<VertexId>,
) -> Result<()> {
    session.pin_reads().await?;
    let graph = reachable_references(session, target, skip).await?;
    match cycle_path(&graph, owner, target) {
        Some(path) => Err(Error::CyclicReference { owner, target, path }),
        None => Ok(()),
    }
}

/// Any cycle in the reference graph of all aspects.
pub async fn find_any_cycle<B: StorageBackend>(session: &Session<'_, B>) -> Result<Option<Vec<VertexId>>> {
    for aspect in session.vertices_by_class(ASPECT_CLASS).await? {
        let view = AspectView::from_vertex(aspect)?;
        for property in view.active_properties(session).await? {
            let target = property.target_id(session).await?;
            let graph = reachable_references(session, target, Some(property.id())).await?;
            if let Some(path) = cycle_path(&graph, view.id(), target) {
                return Ok(Some(path));
            }
        }
    }
    Ok(None)
}
