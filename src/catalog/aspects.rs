//! Aspect and aspect property services.

use tracing::{info, instrument};

use super::{Catalog, live_subject};
use crate::entity::aspect::{BASE_TYPE, MEASURE};
use crate::entity::aspect_property::{CARDINALITY, POWER};
use crate::entity::{
    ASPECT_CLASS, ASPECT_PROPERTY_CLASS, Aspect, AspectData, AspectProperty, AspectPropertyData,
    AspectPropertyView, AspectView, DELETED, DESCRIPTION, EntityView, HAS_PROPERTY, NAME, OF_ASPECT,
    OF_ASPECT_PROPERTY, REFERENCES, normalize_name, normalize_optional,
};
use crate::history::{HistoryAware, HistoryContext};
use crate::model::{Value, VertexId, property_map};
use crate::schema::{self, NameScope};
use crate::storage::{Pattern, StorageBackend};
use crate::tx::TxMode;
use crate::{Error, Result, Session};

impl<B: StorageBackend> Catalog<B> {
    // ========================================================================
    // Aspects
    // ========================================================================

    #[instrument(skip_all, fields(user = %ctx.user, name = %data.name))]
    pub async fn create_aspect(&self, ctx: &HistoryContext, data: AspectData) -> Result<Aspect> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<Aspect> {
                self.create_aspect_in(session, ctx, data).await
            })
            .await
    }

    async fn create_aspect_in(&self, session: &mut Session<'_, B>, ctx: &HistoryContext, data: AspectData) -> Result<Aspect> {
        let name = normalize_name(ASPECT_CLASS, &data.name)?;
        if let Some(subject) = data.subject_id {
            live_subject(session, subject).await?;
        }
        let props = property_map([
            (NAME, Value::from(name.as_str())),
            (MEASURE, normalize_optional(data.measure_unit.as_deref()).into()),
            (BASE_TYPE, data.base_type.as_str().into()),
            (DESCRIPTION, normalize_optional(data.description.as_deref()).into()),
            (DELETED, false.into()),
        ]);
        let id = session.new_vertex(ASPECT_CLASS, props).await?;
        let mut aspect = session.view::<AspectView>(id).await?;
        aspect.set_subject(session, data.subject_id).await?;
        schema::claim_name(session, NameScope::Aspect { subject: data.subject_id }, &name, id).await?;

        self.history.record(session, ctx, &mut aspect, None).await?;
        info!(aspect = %id, "aspect created");
        aspect.to_dto(session).await
    }

    /// Replace an aspect's own fields. Properties are edited separately.
    #[instrument(skip_all, fields(user = %ctx.user, aspect = %id))]
    pub async fn update_aspect(&self, ctx: &HistoryContext, id: VertexId, data: AspectData) -> Result<Aspect> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<Aspect> {
                self.update_aspect_in(session, ctx, id, data).await
            })
            .await
    }

    async fn update_aspect_in(
        &self,
        session: &mut Session<'_, B>,
        ctx: &HistoryContext,
        id: VertexId,
        data: AspectData,
    ) -> Result<Aspect> {
        let mut aspect = self.live_aspect_for_edit(session, id).await?;
        let name = normalize_name(ASPECT_CLASS, &data.name)?;
        if let Some(subject) = data.subject_id {
            live_subject(session, subject).await?;
        }
        if aspect.base_type()? != data.base_type && aspect_in_use(session, id).await? {
            return Err(Error::ConstraintViolation(format!(
                "base type of aspect {id} cannot change while values use it"
            )));
        }

        let before = aspect.current_snapshot(session).await?;
        let old_scope = NameScope::Aspect { subject: aspect.subject_id(session).await? };
        let new_scope = NameScope::Aspect { subject: data.subject_id };
        if old_scope.key(aspect.name()) != new_scope.key(&name) {
            schema::release_name(session, old_scope, aspect.name()).await?;
            schema::claim_name(session, new_scope, &name, id).await?;
        }

        aspect.set_name(session, &name).await?;
        aspect
            .set_measure_unit(session, normalize_optional(data.measure_unit.as_deref()).as_deref())
            .await?;
        aspect.set_base_type(session, data.base_type).await?;
        aspect
            .set_description(session, normalize_optional(data.description.as_deref()).as_deref())
            .await?;
        aspect.set_subject(session, data.subject_id).await?;

        self.history.record(session, ctx, &mut aspect, Some(before)).await?;
        aspect.to_dto(session).await
    }

    /// Flag an aspect deleted. It stays addressable by id and keeps every
    /// existing reference, but leaves name lookups and new schema links.
    #[instrument(skip_all, fields(user = %ctx.user, aspect = %id))]
    pub async fn soft_delete_aspect(&self, ctx: &HistoryContext, id: VertexId) -> Result<()> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<()> {
                let mut aspect = self.live_aspect_for_edit(session, id).await?;
                let before = aspect.current_snapshot(session).await?;
                let scope = NameScope::Aspect { subject: aspect.subject_id(session).await? };
                schema::release_name(session, scope, aspect.name()).await?;
                aspect.set_deleted(session, true).await?;
                self.history.record(session, ctx, &mut aspect, Some(before)).await?;
                info!(aspect = %id, "aspect soft-deleted");
                Ok(())
            })
            .await
    }

    /// Any aspect by id, deleted or not.
    pub async fn aspect(&self, id: VertexId) -> Result<Aspect> {
        self.store
            .with_transaction(TxMode::ReadOnly, async move |session: &mut Session<'_, B>| -> Result<Aspect> {
                session.view::<AspectView>(id).await?.to_dto(session).await
            })
            .await
    }

    /// Live aspects named `name` (trimmed, any case) in every scope.
    pub async fn find_aspects_by_name(&self, name: &str) -> Result<Vec<Aspect>> {
        let pattern = Pattern::class(ASPECT_CLASS)
            .eq_ignore_case_param(NAME, "name")
            .ne_value(DELETED, true);
        let params = property_map([("name", Value::from(name))]);
        self.store
            .with_transaction(TxMode::ReadOnly, async move |session: &mut Session<'_, B>| -> Result<Vec<Aspect>> {
                let mut found = Vec::new();
                for vertex in session.query(&pattern, &params).await? {
                    found.push(AspectView::from_vertex(vertex)?.to_dto(session).await?);
                }
                Ok(found)
            })
            .await
    }

    /// Every live aspect, in creation order.
    pub async fn aspects(&self) -> Result<Vec<Aspect>> {
        self.store
            .with_transaction(TxMode::ReadOnly, async move |session: &mut Session<'_, B>| -> Result<Vec<Aspect>> {
                let mut all = Vec::new();
                for vertex in session.vertices_by_class(ASPECT_CLASS).await? {
                    let view = AspectView::from_vertex(vertex)?;
                    if !view.is_deleted() {
                        all.push(view.to_dto(session).await?);
                    }
                }
                Ok(all)
            })
            .await
    }

    // ========================================================================
    // Aspect properties
    // ========================================================================

    #[instrument(skip_all, fields(user = %ctx.user, aspect = %aspect_id, target = %data.target_aspect_id))]
    pub async fn add_aspect_property(
        &self,
        ctx: &HistoryContext,
        aspect_id: VertexId,
        data: AspectPropertyData,
    ) -> Result<AspectProperty> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<AspectProperty> {
                self.add_aspect_property_in(session, ctx, aspect_id, data).await
            })
            .await
    }

    async fn add_aspect_property_in(
        &self,
        session: &mut Session<'_, B>,
        ctx: &HistoryContext,
        aspect_id: VertexId,
        data: AspectPropertyData,
    ) -> Result<AspectProperty> {
        let mut aspect = self.live_aspect_for_edit(session, aspect_id).await?;
        schema::live_aspect(session, data.target_aspect_id).await?;
        let name = normalize_optional(data.name.as_deref());
        ensure_slot_free(session, &aspect, name.as_deref(), data.target_aspect_id, None).await?;
        schema::ensure_acyclic(session, aspect_id, data.target_aspect_id, None).await?;

        let before = aspect.current_snapshot(session).await?;
        let props = property_map([
            (NAME, Value::from(name)),
            (CARDINALITY, data.cardinality.as_str().into()),
            (POWER, normalize_optional(data.power.as_deref()).into()),
            (DELETED, false.into()),
        ]);
        let id = session.new_vertex(ASPECT_PROPERTY_CLASS, props).await?;
        session.create_edge(aspect_id, id, HAS_PROPERTY).await?;
        session.create_edge(id, data.target_aspect_id, REFERENCES).await?;

        let mut property = session.view::<AspectPropertyView>(id).await?;
        self.history.record(session, ctx, &mut property, None).await?;
        self.history.record(session, ctx, &mut aspect, Some(before)).await?;
        info!(property = %id, "aspect property added");
        property.to_dto(session).await
    }

    /// Change a property's name, target, cardinality or power. The target
    /// is fixed once values instantiate the property; a new cardinality only
    /// applies to value groups created afterwards.
    #[instrument(skip_all, fields(user = %ctx.user, property = %id))]
    pub async fn update_aspect_property(
        &self,
        ctx: &HistoryContext,
        id: VertexId,
        data: AspectPropertyData,
    ) -> Result<AspectProperty> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<AspectProperty> {
                self.update_aspect_property_in(session, ctx, id, data).await
            })
            .await
    }

    async fn update_aspect_property_in(
        &self,
        session: &mut Session<'_, B>,
        ctx: &HistoryContext,
        id: VertexId,
        data: AspectPropertyData,
    ) -> Result<AspectProperty> {
        let mut property = session.view::<AspectPropertyView>(id).await?;
        if property.is_deleted() {
            return Err(Error::Deleted { class: ASPECT_PROPERTY_CLASS.to_string(), id });
        }
        let owner_id = property.owner_id(session).await?;
        let owner = self.live_aspect_for_edit(session, owner_id).await?;
        let name = normalize_optional(data.name.as_deref());
        ensure_slot_free(session, &owner, name.as_deref(), data.target_aspect_id, Some(id)).await?;

        let retarget = property.target_id(session).await? != data.target_aspect_id;
        if retarget {
            if !session.in_neighbors(id, OF_ASPECT_PROPERTY).await?.is_empty() {
                return Err(Error::ConstraintViolation(format!(
                    "target of aspect property {id} cannot change while values use it"
                )));
            }
            schema::live_aspect(session, data.target_aspect_id).await?;
            schema::ensure_acyclic(session, owner_id, data.target_aspect_id, Some(id)).await?;
        }

        let before = property.current_snapshot(session).await?;
        property.set_name(session, name.as_deref()).await?;
        property.set_cardinality(session, data.cardinality).await?;
        property
            .set_power(session, normalize_optional(data.power.as_deref()).as_deref())
            .await?;
        if retarget {
            property.set_target(session, data.target_aspect_id).await?;
        }
        self.history.record(session, ctx, &mut property, Some(before)).await?;
        property.to_dto(session).await
    }

    /// Detach a property from its aspect: physically when nothing
    /// instantiates it, otherwise by flagging it deleted.
    #[instrument(skip_all, fields(user = %ctx.user, property = %id))]
    pub async fn remove_aspect_property(&self, ctx: &HistoryContext, id: VertexId) -> Result<()> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<()> {
                self.remove_aspect_property_in(session, ctx, id).await
            })
            .await
    }

    async fn remove_aspect_property_in(&self, session: &mut Session<'_, B>, ctx: &HistoryContext, id: VertexId) -> Result<()> {
        let mut property = session.view::<AspectPropertyView>(id).await?;
        if property.is_deleted() {
            return Err(Error::Deleted { class: ASPECT_PROPERTY_CLASS.to_string(), id });
        }
        let mut owner = session.view::<AspectView>(property.owner_id(session).await?).await?;
        let owner_before = owner.current_snapshot(session).await?;

        if session.in_neighbors(id, OF_ASPECT_PROPERTY).await?.is_empty() {
            self.history.record_delete(session, ctx, &property).await?;
            session.detach_delete(id).await?;
            info!(property = %id, "aspect property deleted");
        } else {
            let before = property.current_snapshot(session).await?;
            property.set_deleted(session, true).await?;
            self.history.record(session, ctx, &mut property, Some(before)).await?;
            info!(property = %id, "aspect property soft-deleted");
        }
        self.history.record(session, ctx, &mut owner, Some(owner_before)).await?;
        Ok(())
    }

    async fn live_aspect_for_edit(&self, session: &Session<'_, B>, id: VertexId) -> Result<AspectView> {
        let aspect = session.view::<AspectView>(id).await?;
        if aspect.is_deleted() {
            return Err(Error::Deleted { class: ASPECT_CLASS.to_string(), id });
        }
        Ok(aspect)
    }
}

/// Live properties of one aspect must differ in (name, target).
async fn ensure_slot_free<B: StorageBackend>(
    session: &Session<'_, B>,
    aspect: &AspectView,
    name: Option<&str>,
    target: VertexId,
    exclude: Option<VertexId>,
) -> Result<()> {
    let same_name = |other: Option<&str>| match (name, other) {
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        (None, None) => true,
        _ => false,
    };
    for existing in aspect.active_properties(session).await? {
        if Some(existing.id()) == exclude {
            continue;
        }
        if same_name(existing.name()) && existing.target_id(session).await? == target {
            return Err(Error::DuplicateName {
                class: ASPECT_PROPERTY_CLASS.to_string(),
                name: name.unwrap_or_default().to_string(),
                conflicting: existing.id(),
            });
        }
    }
    Ok(())
}

/// Whether any object property or value is built on `aspect`.
async fn aspect_in_use<B: StorageBackend>(session: &Session<'_, B>, aspect: VertexId) -> Result<bool> {
    if !session.in_neighbors(aspect, OF_ASPECT).await?.is_empty() {
        return Ok(true);
    }
    for slot in session.in_neighbors(aspect, REFERENCES).await? {
        if !session.in_neighbors(slot, OF_ASPECT_PROPERTY).await?.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}
