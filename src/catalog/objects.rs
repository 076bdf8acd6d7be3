//! Object, object property and value services.

use tracing::{info, instrument};

use super::{Catalog, live_subject};
use crate::entity::{
    DELETED, DESCRIPTION, EntityView, NAME, OBJECT_CLASS, OF_SUBJECT, Object, ObjectData,
    ObjectProperty, ObjectPropertyData, ObjectPropertyView, ObjectValue, ObjectValueView, ObjectView, ValueData, normalize_name,
    normalize_optional,
};
use crate::history::{HistoryAware, HistoryContext};
use crate::materializer::ValueTree;
use crate::model::{Value, VertexId, property_map};
use crate::schema::{self, NameScope};
use crate::storage::StorageBackend;
use crate::tx::TxMode;
use crate::{Error, Result, Session};

impl<B: StorageBackend> Catalog<B> {
    // ========================================================================
    // Objects
    // ========================================================================

    #[instrument(skip_all, fields(user = %ctx.user, name = %data.name, subject = %data.subject_id))]
    pub async fn create_object(&self, ctx: &HistoryContext, data: ObjectData) -> Result<Object> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<Object> {
                let name = normalize_name(OBJECT_CLASS, &data.name)?;
                live_subject(session, data.subject_id).await?;
                let props = property_map([
                    (NAME, Value::from(name.as_str())),
                    (DESCRIPTION, normalize_optional(data.description.as_deref()).into()),
                    (DELETED, false.into()),
                ]);
                let id = session.new_vertex(OBJECT_CLASS, props).await?;
                session.create_edge(id, data.subject_id, OF_SUBJECT).await?;
                schema::claim_name(session, NameScope::Object { subject: data.subject_id }, &name, id).await?;

                let mut object = session.view::<ObjectView>(id).await?;
                self.history.record(session, ctx, &mut object, None).await?;
                info!(object = %id, "object created");
                object.to_dto(session).await
            })
            .await
    }

    #[instrument(skip_all, fields(user = %ctx.user, object = %id))]
    pub async fn update_object(&self, ctx: &HistoryContext, id: VertexId, data: ObjectData) -> Result<Object> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<Object> {
                let mut object = live_object(session, id).await?;
                let name = normalize_name(OBJECT_CLASS, &data.name)?;
                let old_subject = object.subject_id(session).await?;
                if old_subject != data.subject_id {
                    live_subject(session, data.subject_id).await?;
                }

                let before = object.current_snapshot(session).await?;
                let old_scope = NameScope::Object { subject: old_subject };
                let new_scope = NameScope::Object { subject: data.subject_id };
                if old_scope.key(object.name()) != new_scope.key(&name) {
                    schema::release_name(session, old_scope, object.name()).await?;
                    schema::claim_name(session, new_scope, &name, id).await?;
                }
                object.set_name(session, &name).await?;
                object
                    .set_description(session, normalize_optional(data.description.as_deref()).as_deref())
                    .await?;
                object.set_subject(session, data.subject_id).await?;

                self.history.record(session, ctx, &mut object, Some(before)).await?;
                object.to_dto(session).await
            })
            .await
    }

    /// Flag an object deleted. Its properties and values stay readable.
    #[instrument(skip_all, fields(user = %ctx.user, object = %id))]
    pub async fn soft_delete_object(&self, ctx: &HistoryContext, id: VertexId) -> Result<()> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<()> {
                let mut object = live_object(session, id).await?;
                let before = object.current_snapshot(session).await?;
                let scope = NameScope::Object { subject: object.subject_id(session).await? };
                schema::release_name(session, scope, object.name()).await?;
                object.set_deleted(session, true).await?;
                self.history.record(session, ctx, &mut object, Some(before)).await?;
                info!(object = %id, "object soft-deleted");
                Ok(())
            })
            .await
    }

    /// Any object by id, deleted or not.
    pub async fn object(&self, id: VertexId) -> Result<Object> {
        self.store
            .with_transaction(TxMode::ReadOnly, async move |session: &mut Session<'_, B>| -> Result<Object> {
                session.view::<ObjectView>(id).await?.to_dto(session).await
            })
            .await
    }

    /// Properties of an object, in creation order.
    pub async fn object_properties(&self, object_id: VertexId) -> Result<Vec<ObjectProperty>> {
        self.store
            .with_transaction(TxMode::ReadOnly, async move |session: &mut Session<'_, B>| -> Result<Vec<ObjectProperty>> {
                let object = session.view::<ObjectView>(object_id).await?;
                let mut all = Vec::new();
                for property in object.properties(session).await? {
                    all.push(property.to_dto(session).await?);
                }
                Ok(all)
            })
            .await
    }

    // ========================================================================
    // Object properties
    // ========================================================================

    /// Attach an aspect to an object. The cardinality given here is fixed
    /// for the property's lifetime.
    #[instrument(skip_all, fields(user = %ctx.user, object = %data.object_id, aspect = %data.aspect_id))]
    pub async fn create_object_property(
        &self,
        ctx: &HistoryContext,
        data: ObjectPropertyData,
    ) -> Result<ObjectProperty> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<ObjectProperty> {
                let property = self.materializer.create_property(session, ctx, &data).await?;
                info!(property = %property.id(), "object property created");
                property.to_dto(session).await
            })
            .await
    }

    /// Change an object property's role name or description. Object, aspect
    /// and cardinality must match the stored property.
    #[instrument(skip_all, fields(user = %ctx.user, property = %id))]
    pub async fn update_object_property(
        &self,
        ctx: &HistoryContext,
        id: VertexId,
        data: ObjectPropertyData,
    ) -> Result<ObjectProperty> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<ObjectProperty> {
                let mut property = session.view::<ObjectPropertyView>(id).await?;
                let object_id = property.object_id(session).await?;
                let aspect_id = property.aspect_id(session).await?;
                if object_id != data.object_id || aspect_id != data.aspect_id {
                    return Err(Error::ConstraintViolation(format!(
                        "object property {id} cannot move to another object or aspect"
                    )));
                }
                let cardinality = property.cardinality()?;
                if cardinality != data.cardinality {
                    return Err(Error::CardinalityViolation {
                        node: id,
                        cardinality,
                        message: format!("is fixed and cannot become {}", data.cardinality),
                    });
                }
                live_object(session, object_id).await?;

                let before = property.current_snapshot(session).await?;
                let scope = NameScope::Role { object: object_id, aspect: aspect_id };
                let old_role = property.role_name().map(str::to_string);
                let new_role = normalize_optional(data.role_name.as_deref());
                let old_key = old_role.as_deref().map(|r| scope.key(r));
                if old_key != new_role.as_deref().map(|r| scope.key(r)) {
                    if let Some(old) = &old_role {
                        schema::release_name(session, scope, old).await?;
                    }
                    if let Some(new) = &new_role {
                        schema::claim_name(session, scope, new, id).await?;
                    }
                }
                property.set_role_name(session, new_role.as_deref()).await?;
                property
                    .set_description(session, normalize_optional(data.description.as_deref()).as_deref())
                    .await?;

                self.history.record(session, ctx, &mut property, Some(before)).await?;
                property.to_dto(session).await
            })
            .await
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Add a value to an `INFINITY` group (or the first value of a `ONE` group).
    #[instrument(skip_all, fields(user = %ctx.user, property = %property_id))]
    pub async fn add_value(
        &self,
        ctx: &HistoryContext,
        property_id: VertexId,
        parent: Option<VertexId>,
        aspect_property: Option<VertexId>,
        data: ValueData,
    ) -> Result<ObjectValue> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<ObjectValue> {
                let value = self
                    .materializer
                    .add_value(session, ctx, property_id, parent, aspect_property, &data)
                    .await?;
                value.to_dto(session).await
            })
            .await
    }

    /// Create or replace the single value of a `ONE` group.
    #[instrument(skip_all, fields(user = %ctx.user, property = %property_id))]
    pub async fn set_single_value(
        &self,
        ctx: &HistoryContext,
        property_id: VertexId,
        parent: Option<VertexId>,
        aspect_property: Option<VertexId>,
        data: ValueData,
    ) -> Result<ObjectValue> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<ObjectValue> {
                let value = self
                    .materializer
                    .set_single_value(session, ctx, property_id, parent, aspect_property, &data)
                    .await?;
                value.to_dto(session).await
            })
            .await
    }

    #[instrument(skip_all, fields(user = %ctx.user, value = %value_id))]
    pub async fn update_value(&self, ctx: &HistoryContext, value_id: VertexId, data: ValueData) -> Result<ObjectValue> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<ObjectValue> {
                let value = self.materializer.update_value(session, ctx, value_id, &data).await?;
                value.to_dto(session).await
            })
            .await
    }

    /// Physically delete a value and everything below it.
    #[instrument(skip_all, fields(user = %ctx.user, value = %value_id))]
    pub async fn remove_value(&self, ctx: &HistoryContext, value_id: VertexId) -> Result<()> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<()> {
                self.materializer.remove_value(session, ctx, value_id).await
            })
            .await
    }

    /// Add the implicit values that `ZERO` aspect properties created since
    /// the tree was built call for. Returns the new values.
    #[instrument(skip_all, fields(user = %ctx.user, property = %property_id))]
    pub async fn reconcile_tree(&self, ctx: &HistoryContext, property_id: VertexId) -> Result<Vec<ObjectValue>> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<Vec<ObjectValue>> {
                let created = self.materializer.reconcile(session, ctx, property_id).await?;
                let mut values = Vec::with_capacity(created.len());
                for id in created {
                    values.push(session.view::<ObjectValueView>(id).await?.to_dto(session).await?);
                }
                Ok(values)
            })
            .await
    }

    pub async fn value_tree(&self, property_id: VertexId) -> Result<ValueTree> {
        self.store
            .with_transaction(TxMode::ReadOnly, async move |session: &mut Session<'_, B>| -> Result<ValueTree> {
                self.materializer.tree(session, property_id).await
            })
            .await
    }

    pub async fn validate_tree(&self, property_id: VertexId) -> Result<()> {
        self.store
            .with_transaction(TxMode::ReadOnly, async move |session: &mut Session<'_, B>| -> Result<()> {
                self.materializer.validate_tree(session, property_id).await
            })
            .await
    }
}

async fn live_object<B: StorageBackend>(session: &Session<'_, B>, id: VertexId) -> Result<ObjectView> {
    let object = session.view::<ObjectView>(id).await?;
    if object.is_deleted() {
        return Err(Error::Deleted { class: OBJECT_CLASS.to_string(), id });
    }
    Ok(object)
}
