//! ObjectProperty: an object's use of an aspect, rooting a value tree.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    Cardinality, DESCRIPTION, EntityView, HAS_PROPERTY, HAS_VALUE, NAME, OBJECT_PROPERTY_CLASS, OF_ASPECT,
    ObjectValueView, entity_view, owned_str, write_field,
};
use super::aspect_property::CARDINALITY;
use super::object_value::SCALAR;
use crate::history::{HistoryAware, Snapshot};
use crate::model::VertexId;
use crate::storage::StorageBackend;
use crate::{Error, Result, Session};

pub const ROLE_NAME: &str = "roleName";

entity_view!(
    /// View over an `ObjectProperty` vertex.
    ObjectPropertyView,
    OBJECT_PROPERTY_CLASS
);

impl ObjectPropertyView {
    pub fn role_name(&self) -> Option<&str> {
        self.vertex.get_str(NAME)
    }

    /// Pinned when the property is created; never rewritten.
    pub fn cardinality(&self) -> Result<Cardinality> {
        self.vertex
            .get_str(CARDINALITY)
            .ok_or_else(|| Error::InvalidValue(format!("object property {} has no cardinality", self.vertex.id)))?
            .parse()
    }

    pub fn description(&self) -> Option<&str> {
        self.vertex.get_str(DESCRIPTION)
    }

    pub async fn set_role_name<B: StorageBackend>(
        &mut self,
        session: &mut Session<'_, B>,
        role_name: Option<&str>,
    ) -> Result<()> {
        write_field(session, &mut self.vertex, NAME, role_name.into()).await
    }

    pub async fn set_description<B: StorageBackend>(
        &mut self,
        session: &mut Session<'_, B>,
        description: Option<&str>,
    ) -> Result<()> {
        write_field(session, &mut self.vertex, DESCRIPTION, description.into()).await
    }

    pub async fn object_id<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<VertexId> {
        session
            .in_neighbors(self.vertex.id, HAS_PROPERTY)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("object of property {}", self.vertex.id)))
    }

    pub async fn aspect_id<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<VertexId> {
        session
            .out_neighbor(self.vertex.id, OF_ASPECT)
            .await?
            .ok_or_else(|| Error::NotFound(format!("aspect of object property {}", self.vertex.id)))
    }

    /// Top-level values, in creation order.
    pub async fn root_values<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Vec<ObjectValueView>> {
        let mut views = Vec::new();
        for id in session.out_neighbors(self.vertex.id, HAS_VALUE).await? {
            views.push(session.view::<ObjectValueView>(id).await?);
        }
        Ok(views)
    }

    pub async fn to_dto<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<ObjectProperty> {
        Ok(ObjectProperty {
            id: self.vertex.id,
            object_id: self.object_id(session).await?,
            aspect_id: self.aspect_id(session).await?,
            cardinality: self.cardinality()?,
            role_name: owned_str(&self.vertex, NAME),
            description: owned_str(&self.vertex, DESCRIPTION),
            version: self.version(),
        })
    }
}

#[async_trait]
impl HistoryAware for ObjectPropertyView {
    /// For a `ONE` property the scalar of its single value is part of the
    /// property's own state, so assigning it shows up as a `value` change.
    async fn current_snapshot<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Snapshot> {
        let roots = self.root_values(session).await?;
        let single_scalar = match (self.cardinality()?, roots.as_slice()) {
            (Cardinality::One, [only]) => only.scalar().map(str::to_string),
            _ => None,
        };
        Ok(Snapshot::new()
            .data(ROLE_NAME, self.role_name())
            .data(CARDINALITY, self.vertex.get_str(CARDINALITY))
            .data(DESCRIPTION, self.description())
            .data(SCALAR, single_scalar)
            .link("object", session.in_neighbors(self.vertex.id, HAS_PROPERTY).await?.first().copied())
            .link("aspect", session.out_neighbor(self.vertex.id, OF_ASPECT).await?)
            .links("values", roots.iter().map(|v| v.id())))
    }

    fn entity_name(&self) -> String {
        self.role_name().unwrap_or_default().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPropertyData {
    pub object_id: VertexId,
    pub aspect_id: VertexId,
    pub cardinality: Cardinality,
    pub role_name: Option<String>,
    pub description: Option<String>,
}

impl ObjectPropertyData {
    pub fn new(object_id: VertexId, aspect_id: VertexId, cardinality: Cardinality) -> Self {
        Self { object_id, aspect_id, cardinality, role_name: None, description: None }
    }

    pub fn with_role_name(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = Some(role_name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectProperty {
    pub id: VertexId,
    pub object_id: VertexId,
    pub aspect_id: VertexId,
    pub cardinality: Cardinality,
    pub role_name: Option<String>,
    pub description: Option<String>,
    pub version: u64,
}
