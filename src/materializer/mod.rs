//! # Object tree materializer
//!
//! Builds and edits the value tree of an object property against the aspect
//! schema in force.
//!
//! A value's *group* is the set of siblings it belongs to: the root values of
//! a property, or the children of one parent value created for one aspect
//! property. The group's cardinality decides how values appear:
//!
//! | Cardinality | Creation | Scalar |
//! |-------------|----------|--------|
//! | `ZERO` | synthesized with the parent, exactly one | never |
//! | `ONE` | lazily, on first assignment | required unless the aspect is composite |
//! | `INFINITY` | one per `add_value` | required unless the aspect is composite |
//!
//! Every value pins the cardinality of its group when created, so later
//! schema edits do not reinterpret existing trees.

pub mod tree;

use std::collections::VecDeque;

use smallvec::SmallVec;
use tracing::{debug, instrument};

use crate::config::ValidationConfig;
use crate::entity::aspect::MEASURE;
use crate::entity::aspect_property::CARDINALITY;
use crate::entity::object_value::SCALAR;
use crate::entity::{
    AspectPropertyView, AspectView, Cardinality, DESCRIPTION, EntityView, HAS_PROPERTY, HAS_VALUE, NAME,
    OBJECT_CLASS, OBJECT_PROPERTY_CLASS, OBJECT_VALUE_CLASS, OF_ASPECT, OF_ASPECT_PROPERTY, OF_PROPERTY,
    ObjectPropertyData, ObjectPropertyView, ObjectValueView, ObjectView, PARENT_VALUE, ValueData,
    normalize_optional,
};
use crate::history::{HistoryAware, HistoryContext, HistoryEngine, Snapshot};
use crate::model::{Value, VertexId, property_map};
use crate::schema::{self, NameScope};
use crate::storage::StorageBackend;
use crate::{Error, Result, Session};

pub use tree::{ValueNode, ValueTree};

/// Aspect ids along one branch, root first.
pub type Ancestry = SmallVec<[VertexId; 8]>;

/// A value whose ZERO children still have to be synthesized.
struct Pending {
    value: VertexId,
    aspect: VertexId,
    /// Aspects of the values strictly above `value`.
    ancestors: Ancestry,
}

enum GroupOwner {
    Property(ObjectPropertyView),
    Value(ObjectValueView),
}

impl GroupOwner {
    fn id(&self) -> VertexId {
        match self {
            GroupOwner::Property(p) => p.id(),
            GroupOwner::Value(v) => v.id(),
        }
    }

    fn parent(&self) -> Option<VertexId> {
        match self {
            GroupOwner::Property(_) => None,
            GroupOwner::Value(v) => Some(v.id()),
        }
    }

    async fn snapshot<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Snapshot> {
        match self {
            GroupOwner::Property(p) => p.current_snapshot(session).await,
            GroupOwner::Value(v) => v.current_snapshot(session).await,
        }
    }

    async fn record<B: StorageBackend>(
        &mut self,
        history: &HistoryEngine,
        session: &mut Session<'_, B>,
        ctx: &HistoryContext,
        before: Snapshot,
    ) -> Result<()> {
        match self {
            GroupOwner::Property(p) => history.record(session, ctx, p, Some(before)).await.map(drop),
            GroupOwner::Value(v) => history.record(session, ctx, v, Some(before)).await.map(drop),
        }
    }
}

/// The sibling set a new value would join.
struct Group {
    owner: GroupOwner,
    cardinality: Cardinality,
    /// Aspect describing the group's values.
    aspect: AspectView,
    aspect_property: Option<VertexId>,
    members: Vec<ObjectValueView>,
    /// Aspects above the group's values.
    ancestors: Ancestry,
}

#[derive(Debug, Clone, Default)]
pub struct Materializer {
    validation: ValidationConfig,
    history: HistoryEngine,
}

impl Materializer {
    pub fn new(validation: ValidationConfig, history: HistoryEngine) -> Self {
        Self { validation, history }
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// Attach a new property to an object. `ZERO` properties get their
    /// implicit root value and its whole `ZERO` subtree immediately.
    #[instrument(skip_all, fields(object = %data.object_id, aspect = %data.aspect_id, cardinality = %data.cardinality))]
    pub async fn create_property<B: StorageBackend>(
        &self,
        session: &mut Session<'_, B>,
        ctx: &HistoryContext,
        data: &ObjectPropertyData,
    ) -> Result<ObjectPropertyView> {
        let object = session.view::<ObjectView>(data.object_id).await?;
        if object.is_deleted() {
            return Err(Error::Deleted { class: OBJECT_CLASS.to_string(), id: object.id() });
        }
        let aspect = schema::live_aspect(session, data.aspect_id).await?;
        let role_name = normalize_optional(data.role_name.as_deref());

        let props = property_map([
            (NAME, Value::from(role_name.clone())),
            (CARDINALITY, data.cardinality.as_str().into()),
            (DESCRIPTION, normalize_optional(data.description.as_deref()).into()),
        ]);
        let id = session.new_vertex(OBJECT_PROPERTY_CLASS, props).await?;
        session.create_edge(object.id(), id, HAS_PROPERTY).await?;
        session.create_edge(id, aspect.id(), OF_ASPECT).await?;
        if let Some(role) = &role_name {
            let scope = NameScope::Role { object: object.id(), aspect: aspect.id() };
            schema::claim_name(session, scope, role, id).await?;
        }

        if data.cardinality == Cardinality::Zero {
            let root = new_value(session, id, None, None, Cardinality::Zero, &ValueData::empty()).await?;
            let mut created = vec![root];
            let start = Pending { value: root, aspect: aspect.id(), ancestors: Ancestry::new() };
            created.extend(self.expand(session, id, start).await?);
            self.record_created(session, ctx, &created).await?;
        }

        let mut property = session.view::<ObjectPropertyView>(id).await?;
        self.history.record(session, ctx, &mut property, None).await?;
        Ok(property)
    }

    /// Synthesize every `ZERO` child below `start`. Returns the created value ids.
    async fn expand<B: StorageBackend>(
        &self,
        session: &mut Session<'_, B>,
        property: VertexId,
        start: Pending,
    ) -> Result<Vec<VertexId>> {
        let mut created = Vec::new();
        let mut work = vec![start];
        while let Some(Pending { value, aspect, ancestors }) = work.pop() {
            if let Some(pos) = ancestors.iter().position(|a| *a == aspect) {
                let mut path: Vec<VertexId> = ancestors[pos..].to_vec();
                path.push(aspect);
                return Err(Error::CyclicReference {
                    owner: ancestors[ancestors.len() - 1],
                    target: aspect,
                    path,
                });
            }
            if ancestors.len() >= self.validation.max_tree_depth {
                return Err(Error::ConstraintViolation(format!(
                    "value tree of property {property} exceeds depth {}",
                    self.validation.max_tree_depth
                )));
            }

            let mut branch = ancestors;
            branch.push(aspect);
            let schema = session.view::<AspectView>(aspect).await?;
            for slot in schema.active_properties(session).await? {
                if slot.cardinality()? != Cardinality::Zero {
                    continue;
                }
                let child = new_value(
                    session,
                    property,
                    Some(value),
                    Some(slot.id()),
                    Cardinality::Zero,
                    &ValueData::empty(),
                )
                .await?;
                created.push(child);
                work.push(Pending {
                    value: child,
                    aspect: slot.target_id(session).await?,
                    ancestors: branch.clone(),
                });
            }
        }
        debug!(property = %property, created = created.len(), "expanded implicit values");
        Ok(created)
    }

    async fn record_created<B: StorageBackend>(
        &self,
        session: &mut Session<'_, B>,
        ctx: &HistoryContext,
        created: &[VertexId],
    ) -> Result<()> {
        for &id in created {
            let mut value = session.view::<ObjectValueView>(id).await?;
            self.history.record(session, ctx, &mut value, None).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Edits
    // ========================================================================

    /// Add one value to a group. `parent = None` targets the property's root
    /// values; otherwise `aspect_property` names the slot of the parent's aspect.
    #[instrument(skip_all, fields(property = %property_id, parent = ?parent))]
    pub async fn add_value<B: StorageBackend>(
        &self,
        session: &mut Session<'_, B>,
        ctx: &HistoryContext,
        property_id: VertexId,
        parent: Option<VertexId>,
        aspect_property: Option<VertexId>,
        data: &ValueData,
    ) -> Result<ObjectValueView> {
        let group = self.group(session, property_id, parent, aspect_property).await?;
        match group.cardinality {
            Cardinality::Zero => {
                return Err(Error::CardinalityViolation {
                    node: group.owner.id(),
                    cardinality: Cardinality::Zero,
                    message: "holds exactly one implicit value".into(),
                });
            }
            Cardinality::One if !group.members.is_empty() => {
                return Err(Error::CardinalityViolation {
                    node: group.owner.id(),
                    cardinality: Cardinality::One,
                    message: format!("already holds value {}", group.members[0].id()),
                });
            }
            _ => {}
        }
        self.insert(session, ctx, property_id, group, data).await
    }

    /// Assign the single value of a `ONE` group, creating it on first use.
    #[instrument(skip_all, fields(property = %property_id, parent = ?parent))]
    pub async fn set_single_value<B: StorageBackend>(
        &self,
        session: &mut Session<'_, B>,
        ctx: &HistoryContext,
        property_id: VertexId,
        parent: Option<VertexId>,
        aspect_property: Option<VertexId>,
        data: &ValueData,
    ) -> Result<ObjectValueView> {
        let group = self.group(session, property_id, parent, aspect_property).await?;
        if group.cardinality != Cardinality::One {
            return Err(Error::CardinalityViolation {
                node: group.owner.id(),
                cardinality: group.cardinality,
                message: "has no single settable value".into(),
            });
        }
        match group.members.first() {
            Some(existing) => self.update_value(session, ctx, existing.id(), data).await,
            None => self.insert(session, ctx, property_id, group, data).await,
        }
    }

    async fn insert<B: StorageBackend>(
        &self,
        session: &mut Session<'_, B>,
        ctx: &HistoryContext,
        property_id: VertexId,
        mut group: Group,
        data: &ValueData,
    ) -> Result<ObjectValueView> {
        let owner_id = group.owner.id();
        self.check_scalar(session, owner_id, group.cardinality, &group.aspect, data.scalar.as_deref())
            .await?;

        let before = group.owner.snapshot(session).await?;
        let value = new_value(
            session,
            property_id,
            group.owner.parent(),
            group.aspect_property,
            group.cardinality,
            data,
        )
        .await?;
        let mut created = vec![value];
        let start = Pending { value, aspect: group.aspect.id(), ancestors: group.ancestors.clone() };
        created.extend(self.expand(session, property_id, start).await?);
        self.record_created(session, ctx, &created).await?;
        group.owner.record(&self.history, session, ctx, before).await?;
        session.view::<ObjectValueView>(value).await
    }

    /// Replace a value's scalar and measure.
    #[instrument(skip_all, fields(value = %value_id))]
    pub async fn update_value<B: StorageBackend>(
        &self,
        session: &mut Session<'_, B>,
        ctx: &HistoryContext,
        value_id: VertexId,
        data: &ValueData,
    ) -> Result<ObjectValueView> {
        let mut value = session.view::<ObjectValueView>(value_id).await?;
        let cardinality = value.cardinality()?;
        let aspect = session.view::<AspectView>(self.value_aspect(session, &value).await?).await?;
        self.check_scalar(session, value_id, cardinality, &aspect, data.scalar.as_deref())
            .await?;

        // The scalar of a ONE root value is part of its property's snapshot.
        let mut property = None;
        if cardinality == Cardinality::One && value.parent_id(session).await?.is_none() {
            let view = session.view::<ObjectPropertyView>(value.property_id(session).await?).await?;
            let before = view.current_snapshot(session).await?;
            property = Some((view, before));
        }

        let before = value.current_snapshot(session).await?;
        value.set_scalar(session, data.scalar.as_deref()).await?;
        value.set_measure_id(session, data.measure_id.as_deref()).await?;
        self.history.record(session, ctx, &mut value, Some(before)).await?;
        if let Some((mut view, before)) = property {
            self.history.record(session, ctx, &mut view, Some(before)).await?;
        }
        Ok(value)
    }

    /// Physically delete a value and its subtree.
    #[instrument(skip_all, fields(value = %value_id))]
    pub async fn remove_value<B: StorageBackend>(
        &self,
        session: &mut Session<'_, B>,
        ctx: &HistoryContext,
        value_id: VertexId,
    ) -> Result<()> {
        let value = session.view::<ObjectValueView>(value_id).await?;
        let cardinality = value.cardinality()?;
        if cardinality == Cardinality::Zero {
            return Err(Error::CardinalityViolation {
                node: value_id,
                cardinality,
                message: "implicit value cannot be removed".into(),
            });
        }
        let mut owner = match value.parent_id(session).await? {
            Some(parent) => GroupOwner::Value(session.view(parent).await?),
            None => GroupOwner::Property(session.view(value.property_id(session).await?).await?),
        };
        let before = owner.snapshot(session).await?;

        let mut subtree = Vec::new();
        let mut stack = vec![value];
        while let Some(node) = stack.pop() {
            stack.extend(node.children(session).await?);
            subtree.push(node);
        }
        for node in &subtree {
            self.history.record_delete(session, ctx, node).await?;
        }
        for node in subtree.iter().rev() {
            session.detach_delete(node.id()).await?;
        }
        debug!(value = %value_id, removed = subtree.len(), "removed value subtree");
        owner.record(&self.history, session, ctx, before).await
    }

    /// Synthesize the implicit values of `ZERO` slots that were added to an
    /// aspect after parts of this tree existed. Returns the created value ids.
    #[instrument(skip_all, fields(property = %property_id))]
    pub async fn reconcile<B: StorageBackend>(
        &self,
        session: &mut Session<'_, B>,
        ctx: &HistoryContext,
        property_id: VertexId,
    ) -> Result<Vec<VertexId>> {
        let property = session.view::<ObjectPropertyView>(property_id).await?;
        let mut created = Vec::new();
        let mut queue: VecDeque<ObjectValueView> = property.root_values(session).await?.into();
        while let Some(value) = queue.pop_front() {
            let children = value.children(session).await?;
            let aspect = session.view::<AspectView>(self.value_aspect(session, &value).await?).await?;
            let mut missing = Vec::new();
            for slot in aspect.active_properties(session).await? {
                if slot.cardinality()? != Cardinality::Zero {
                    continue;
                }
                let mut filled = false;
                for child in &children {
                    if child.aspect_property_id(session).await? == Some(slot.id()) {
                        filled = true;
                        break;
                    }
                }
                if !filled {
                    missing.push(slot);
                }
            }

            if !missing.is_empty() {
                let ancestors = self.ancestry(session, &value).await?;
                let mut owner = GroupOwner::Value(value.clone());
                let before = owner.snapshot(session).await?;
                let mut fresh = Vec::new();
                for slot in missing {
                    let child = new_value(
                        session,
                        property_id,
                        Some(value.id()),
                        Some(slot.id()),
                        Cardinality::Zero,
                        &ValueData::empty(),
                    )
                    .await?;
                    fresh.push(child);
                    let start = Pending {
                        value: child,
                        aspect: slot.target_id(session).await?,
                        ancestors: ancestors.clone(),
                    };
                    fresh.extend(self.expand(session, property_id, start).await?);
                }
                self.record_created(session, ctx, &fresh).await?;
                owner.record(&self.history, session, ctx, before).await?;
                created.extend(fresh);
            }
            queue.extend(children);
        }
        debug!(property = %property_id, created = created.len(), "reconciled value tree");
        Ok(created)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// The full value tree of a property.
    pub async fn tree<B: StorageBackend>(&self, session: &Session<'_, B>, property_id: VertexId) -> Result<ValueTree> {
        let property = session.view::<ObjectPropertyView>(property_id).await?;
        let mut values = Vec::new();
        let mut queue: VecDeque<ObjectValueView> = property.root_values(session).await?.into();
        while let Some(value) = queue.pop_front() {
            queue.extend(value.children(session).await?);
            values.push(value.to_dto(session).await?);
        }
        Ok(ValueTree::assemble(property.to_dto(session).await?, values))
    }

    /// Check every group of a property's tree against its cardinality and
    /// every scalar against its aspect.
    pub async fn validate_tree<B: StorageBackend>(&self, session: &Session<'_, B>, property_id: VertexId) -> Result<()> {
        let property = session.view::<ObjectPropertyView>(property_id).await?;
        let aspect = session.view::<AspectView>(property.aspect_id(session).await?).await?;
        let roots = property.root_values(session).await?;
        self.check_group(session, property_id, property.cardinality()?, &aspect, &roots)
            .await?;

        let mut work: Vec<(ObjectValueView, AspectView)> = roots.into_iter().map(|v| (v, aspect.clone())).collect();
        while let Some((value, aspect)) = work.pop() {
            let children = value.children(session).await?;
            for slot in aspect.active_properties(session).await? {
                let mut members = Vec::new();
                for child in &children {
                    if child.aspect_property_id(session).await? == Some(slot.id()) {
                        members.push(child.clone());
                    }
                }
                let cardinality = match members.first() {
                    Some(first) => first.cardinality()?,
                    None => slot.cardinality()?,
                };
                // A ZERO slot added after `value` was created has no implicit
                // value yet; `reconcile` fills it in.
                if members.is_empty() && cardinality == Cardinality::Zero {
                    continue;
                }
                let target = session.view::<AspectView>(slot.target_id(session).await?).await?;
                self.check_group(session, value.id(), cardinality, &target, &members)
                    .await?;
                work.extend(members.into_iter().map(|m| (m, target.clone())));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn group<B: StorageBackend>(
        &self,
        session: &Session<'_, B>,
        property_id: VertexId,
        parent: Option<VertexId>,
        aspect_property: Option<VertexId>,
    ) -> Result<Group> {
        let property = session.view::<ObjectPropertyView>(property_id).await?;
        let Some(parent_id) = parent else {
            if aspect_property.is_some() {
                return Err(Error::InvalidValue("root values do not instantiate an aspect property".into()));
            }
            let aspect = session.view::<AspectView>(property.aspect_id(session).await?).await?;
            return Ok(Group {
                cardinality: property.cardinality()?,
                aspect,
                aspect_property: None,
                members: property.root_values(session).await?,
                ancestors: Ancestry::new(),
                owner: GroupOwner::Property(property),
            });
        };

        let parent = session.view::<ObjectValueView>(parent_id).await?;
        if parent.property_id(session).await? != property_id {
            return Err(Error::InvalidValue(format!(
                "value {parent_id} does not belong to property {property_id}"
            )));
        }
        let slot_id = aspect_property
            .ok_or_else(|| Error::InvalidValue("nested values must name their aspect property".into()))?;
        let ancestors = self.ancestry(session, &parent).await?;
        let parent_aspect = session.view::<AspectView>(self.value_aspect(session, &parent).await?).await?;
        let slot = parent_aspect
            .active_properties(session)
            .await?
            .into_iter()
            .find(|p| p.id() == slot_id)
            .ok_or_else(|| {
                Error::InvalidValue(format!("aspect property {slot_id} is not part of aspect {}", parent_aspect.id()))
            })?;

        let mut members = Vec::new();
        for child in parent.children(session).await? {
            if child.aspect_property_id(session).await? == Some(slot_id) {
                members.push(child);
            }
        }
        let cardinality = match members.first() {
            Some(first) => first.cardinality()?,
            None => slot.cardinality()?,
        };
        Ok(Group {
            owner: GroupOwner::Value(parent),
            cardinality,
            aspect: session.view::<AspectView>(slot.target_id(session).await?).await?,
            aspect_property: Some(slot_id),
            members,
            ancestors,
        })
    }

    /// Aspect describing `value`: its slot's target, or the property's aspect for roots.
    async fn value_aspect<B: StorageBackend>(&self, session: &Session<'_, B>, value: &ObjectValueView) -> Result<VertexId> {
        match value.aspect_property_id(session).await? {
            Some(slot) => session.view::<AspectPropertyView>(slot).await?.target_id(session).await,
            None => {
                let property = session.view::<ObjectPropertyView>(value.property_id(session).await?).await?;
                property.aspect_id(session).await
            }
        }
    }

    /// Aspects from the root value down to `value`, inclusive.
    async fn ancestry<B: StorageBackend>(&self, session: &Session<'_, B>, value: &ObjectValueView) -> Result<Ancestry> {
        let mut chain = Ancestry::new();
        let mut current = value.clone();
        loop {
            chain.push(self.value_aspect(session, &current).await?);
            if chain.len() > self.validation.max_tree_depth {
                return Err(Error::ConstraintViolation(format!(
                    "value {} is nested deeper than {}",
                    value.id(),
                    self.validation.max_tree_depth
                )));
            }
            match current.parent_id(session).await? {
                Some(parent) => current = session.view(parent).await?,
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    async fn check_scalar<B: StorageBackend>(
        &self,
        session: &Session<'_, B>,
        node: VertexId,
        cardinality: Cardinality,
        aspect: &AspectView,
        scalar: Option<&str>,
    ) -> Result<()> {
        match (cardinality, scalar) {
            (Cardinality::Zero, None) => Ok(()),
            (Cardinality::Zero, Some(_)) => Err(Error::CardinalityViolation {
                node,
                cardinality,
                message: "cannot carry a scalar".into(),
            }),
            (_, None) => {
                if aspect.active_properties(session).await?.is_empty() {
                    Err(Error::MissingValue { node, cardinality })
                } else {
                    Ok(())
                }
            }
            (_, Some(scalar)) if self.validation.check_base_types => aspect.base_type()?.check(scalar),
            (_, Some(_)) => Ok(()),
        }
    }

    async fn check_group<B: StorageBackend>(
        &self,
        session: &Session<'_, B>,
        owner: VertexId,
        cardinality: Cardinality,
        aspect: &AspectView,
        members: &[ObjectValueView],
    ) -> Result<()> {
        match cardinality {
            Cardinality::Zero if members.len() != 1 => {
                return Err(Error::CardinalityViolation {
                    node: owner,
                    cardinality,
                    message: format!("expects exactly one implicit value, found {}", members.len()),
                });
            }
            Cardinality::One if members.len() > 1 => {
                return Err(Error::CardinalityViolation {
                    node: owner,
                    cardinality,
                    message: format!("allows at most one value, found {}", members.len()),
                });
            }
            _ => {}
        }
        for member in members {
            self.check_scalar(session, member.id(), cardinality, aspect, member.scalar())
                .await?;
        }
        Ok(())
    }
}

async fn new_value<B: StorageBackend>(
    session: &mut Session<'_, B>,
    property: VertexId,
    parent: Option<VertexId>,
    aspect_property: Option<VertexId>,
    cardinality: Cardinality,
    data: &ValueData,
) -> Result<VertexId> {
    let props = property_map([
        (CARDINALITY, Value::from(cardinality.as_str())),
        (SCALAR, data.scalar.clone().into()),
        (MEASURE, data.measure_id.clone().into()),
    ]);
    let id = session.new_vertex(OBJECT_VALUE_CLASS, props).await?;
    session.create_edge(id, property, OF_PROPERTY).await?;
    match parent {
        Some(parent) => session.create_edge(id, parent, PARENT_VALUE).await?,
        None => session.create_edge(property, id, HAS_VALUE).await?,
    };
    if let Some(slot) = aspect_property {
        session.create_edge(id, slot, OF_ASPECT_PROPERTY).await?;
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::aspect::BASE_TYPE;
    use crate::entity::{ASPECT_CLASS, ASPECT_PROPERTY_CLASS, BaseType, REFERENCES};
    use crate::history::EventKind;
    use crate::tx::TxMode;
    use crate::{GraphStore, MemoryBackend};
    use pretty_assertions::assert_eq;

    type S<'g> = Session<'g, MemoryBackend>;

    async fn aspect(s: &mut S<'_>, name: &str, base: BaseType) -> VertexId {
        let props = property_map([(NAME, Value::from(name)), (BASE_TYPE, base.as_str().into())]);
        s.new_vertex(ASPECT_CLASS, props).await.unwrap()
    }

    async fn slot(s: &mut S<'_>, owner: VertexId, target: VertexId, cardinality: Cardinality) -> VertexId {
        let id = s
            .new_vertex(ASPECT_PROPERTY_CLASS, property_map([(CARDINALITY, Value::from(cardinality.as_str()))]))
            .await
            .unwrap();
        s.create_edge(owner, id, HAS_PROPERTY).await.unwrap();
        s.create_edge(id, target, REFERENCES).await.unwrap();
        id
    }

    async fn object(s: &mut S<'_>) -> VertexId {
        s.new_vertex(OBJECT_CLASS, property_map([(NAME, Value::from("Car-1"))])).await.unwrap()
    }

    async fn property(
        m: &Materializer,
        s: &mut S<'_>,
        aspect: VertexId,
        cardinality: Cardinality,
    ) -> VertexId {
        let object = object(s).await;
        let data = ObjectPropertyData::new(object, aspect, cardinality);
        m.create_property(s, &ctx(), &data).await.unwrap().id()
    }

    fn ctx() -> HistoryContext {
        HistoryContext::new("tester")
    }

    #[tokio::test]
    async fn test_zero_property_synthesizes_implicit_tree() {
        let store = GraphStore::open_memory();
        let mut s = store.begin(TxMode::ReadWrite).await.unwrap();
        let m = Materializer::default();
        let dims = aspect(&mut s, "Dimensions", BaseType::Text).await;
        let length = aspect(&mut s, "Length", BaseType::Decimal).await;
        let width = aspect(&mut s, "Width", BaseType::Decimal).await;
        slot(&mut s, dims, length, Cardinality::Zero).await;
        slot(&mut s, dims, width, Cardinality::Zero).await;

        let prop = property(&m, &mut s, dims, Cardinality::Zero).await;
        let tree = m.tree(&s, prop).await.unwrap();
        assert_eq!(tree.roots.len(), 1);
        assert_eq!(tree.len(), 3);
        assert!(tree.roots[0].children.iter().all(|c| c.value.scalar.is_none()));
        m.validate_tree(&s, prop).await.unwrap();

        let err = m.add_value(&mut s, &ctx(), prop, None, None, &ValueData::empty()).await.unwrap_err();
        assert!(matches!(err, Error::CardinalityViolation { cardinality: Cardinality::Zero, .. }));
        assert_eq!(m.tree(&s, prop).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_infinity_siblings_are_independent() {
        let store = GraphStore::open_memory();
        let mut s = store.begin(TxMode::ReadWrite).await.unwrap();
        let m = Materializer::default();
        let wheel = aspect(&mut s, "Wheel", BaseType::Text).await;
        let diameter = aspect(&mut s, "Diameter", BaseType::Decimal).await;
        slot(&mut s, wheel, diameter, Cardinality::Zero).await;
        let prop = property(&m, &mut s, wheel, Cardinality::Infinity).await;

        for name in ["front-left", "front-right", "rear-left", "rear-right"] {
            m.add_value(&mut s, &ctx(), prop, None, None, &ValueData::scalar(name)).await.unwrap();
        }
        let tree = m.tree(&s, prop).await.unwrap();
        assert_eq!(tree.roots.len(), 4);
        assert!(tree.roots.iter().all(|r| r.children.len() == 1));
        let mut child_ids: Vec<_> = tree.roots.iter().map(|r| r.children[0].value.id).collect();
        child_ids.dedup();
        assert_eq!(child_ids.len(), 4);
        m.validate_tree(&s, prop).await.unwrap();
    }

    #[tokio::test]
    async fn test_one_value_is_created_lazily_then_updated() {
        let store = GraphStore::open_memory();
        let mut s = store.begin(TxMode::ReadWrite).await.unwrap();
        let m = Materializer::default();
        let length = aspect(&mut s, "Length", BaseType::Decimal).await;
        let prop = property(&m, &mut s, length, Cardinality::One).await;
        assert!(m.tree(&s, prop).await.unwrap().is_empty());

        let first = m.set_single_value(&mut s, &ctx(), prop, None, None, &ValueData::scalar("4.5")).await.unwrap();
        let second = m.set_single_value(&mut s, &ctx(), prop, None, None, &ValueData::scalar("5.0")).await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(second.scalar(), Some("5.0"));

        let err = m.add_value(&mut s, &ctx(), prop, None, None, &ValueData::scalar("6")).await.unwrap_err();
        assert!(matches!(err, Error::CardinalityViolation { cardinality: Cardinality::One, .. }));

        let history = m.history.history_of(&s, prop).await.unwrap();
        let events: Vec<_> = history.iter().map(|r| r.event).collect();
        assert_eq!(events, vec![EventKind::Create, EventKind::Update, EventKind::Update]);
        let value_changes: Vec<_> = history
            .iter()
            .flat_map(|r| r.changes.iter())
            .filter(|d| d.field == SCALAR)
            .map(|d| (d.before.clone(), d.after.clone()))
            .collect();
        assert_eq!(
            value_changes,
            vec![(None, Some("4.5".to_string())), (Some("4.5".to_string()), Some("5.0".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_zero_values_reject_scalars_and_removal() {
        let store = GraphStore::open_memory();
        let mut s = store.begin(TxMode::ReadWrite).await.unwrap();
        let m = Materializer::default();
        let length = aspect(&mut s, "Length", BaseType::Decimal).await;
        let prop = property(&m, &mut s, length, Cardinality::Zero).await;
        let root = m.tree(&s, prop).await.unwrap().roots[0].value.id;

        let err = m.update_value(&mut s, &ctx(), root, &ValueData::scalar("1")).await.unwrap_err();
        assert!(matches!(err, Error::CardinalityViolation { .. }));
        let err = m.remove_value(&mut s, &ctx(), root).await.unwrap_err();
        assert!(matches!(err, Error::CardinalityViolation { .. }));
    }

    #[tokio::test]
    async fn test_leaf_values_need_well_typed_scalars() {
        let store = GraphStore::open_memory();
        let mut s = store.begin(TxMode::ReadWrite).await.unwrap();
        let m = Materializer::default();
        let length = aspect(&mut s, "Length", BaseType::Decimal).await;
        let prop = property(&m, &mut s, length, Cardinality::Infinity).await;

        let err = m.add_value(&mut s, &ctx(), prop, None, None, &ValueData::empty()).await.unwrap_err();
        assert!(matches!(err, Error::MissingValue { cardinality: Cardinality::Infinity, .. }));
        let err = m.add_value(&mut s, &ctx(), prop, None, None, &ValueData::scalar("abc")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
        m.add_value(&mut s, &ctx(), prop, None, None, &ValueData::scalar("1.25").with_measure("mm")).await.unwrap();
    }

    #[tokio::test]
    async fn test_nested_one_slot() {
        let store = GraphStore::open_memory();
        let mut s = store.begin(TxMode::ReadWrite).await.unwrap();
        let m = Materializer::default();
        let car = aspect(&mut s, "Car", BaseType::Text).await;
        let length = aspect(&mut s, "Length", BaseType::Decimal).await;
        let length_slot = slot(&mut s, car, length, Cardinality::One).await;
        let prop = property(&m, &mut s, car, Cardinality::One).await;

        let root = m.set_single_value(&mut s, &ctx(), prop, None, None, &ValueData::empty()).await.unwrap();
        let leaf = m
            .set_single_value(&mut s, &ctx(), prop, Some(root.id()), Some(length_slot), &ValueData::scalar("4.5"))
            .await
            .unwrap();
        assert_eq!(leaf.parent_id(&s).await.unwrap(), Some(root.id()));

        let err = m
            .add_value(&mut s, &ctx(), prop, Some(root.id()), Some(length_slot), &ValueData::scalar("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CardinalityViolation { .. }));
        let err = m
            .add_value(&mut s, &ctx(), prop, Some(root.id()), None, &ValueData::scalar("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
        m.validate_tree(&s, prop).await.unwrap();
    }

    #[tokio::test]
    async fn test_cyclic_schema_is_caught_during_expansion() {
        let store = GraphStore::open_memory();
        let mut s = store.begin(TxMode::ReadWrite).await.unwrap();
        let m = Materializer::default();
        let a = aspect(&mut s, "A", BaseType::Text).await;
        let b = aspect(&mut s, "B", BaseType::Text).await;
        slot(&mut s, a, b, Cardinality::Zero).await;
        slot(&mut s, b, a, Cardinality::Zero).await;

        let object = object(&mut s).await;
        let data = ObjectPropertyData::new(object, a, Cardinality::Zero);
        match m.create_property(&mut s, &ctx(), &data).await {
            Err(Error::CyclicReference { owner, target, path }) => {
                assert_eq!(owner, b);
                assert_eq!(target, a);
                assert_eq!(path, vec![a, b, a]);
            }
            other => panic!("expected CyclicReference, got {:?}", other.map(|p| p.id())),
        }
    }

    #[tokio::test]
    async fn test_remove_value_deletes_subtree() {
        let store = GraphStore::open_memory();
        let mut s = store.begin(TxMode::ReadWrite).await.unwrap();
        let m = Materializer::default();
        let wheel = aspect(&mut s, "Wheel", BaseType::Text).await;
        let diameter = aspect(&mut s, "Diameter", BaseType::Decimal).await;
        slot(&mut s, wheel, diameter, Cardinality::Zero).await;
        let prop = property(&m, &mut s, wheel, Cardinality::Infinity).await;

        let first = m.add_value(&mut s, &ctx(), prop, None, None, &ValueData::scalar("left")).await.unwrap();
        m.add_value(&mut s, &ctx(), prop, None, None, &ValueData::scalar("right")).await.unwrap();
        let child = first.children(&s).await.unwrap()[0].id();

        m.remove_value(&mut s, &ctx(), first.id()).await.unwrap();
        assert_eq!(m.tree(&s, prop).await.unwrap().len(), 2);
        assert!(s.find_vertex(first.id()).await.unwrap().is_none());
        assert!(s.find_vertex(child).await.unwrap().is_none());

        let history = m.history.history_of(&s, child).await.unwrap();
        assert_eq!(history.last().map(|r| r.event), Some(EventKind::Delete));
    }
}
