//! ObjectValue: one node of an object property's value tree.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::aspect::MEASURE;
use super::aspect_property::CARDINALITY;
use super::{
    Cardinality, EntityView, OBJECT_VALUE_CLASS, OF_ASPECT_PROPERTY, OF_PROPERTY, PARENT_VALUE, entity_view,
    owned_str, write_field,
};
use crate::history::{HistoryAware, Snapshot};
use crate::model::VertexId;
use crate::storage::StorageBackend;
use crate::{Error, Result, Session};

pub const SCALAR: &str = "value";

entity_view!(
    /// View over an `ObjectValue` vertex.
    ObjectValueView,
    OBJECT_VALUE_CLASS
);

impl ObjectValueView {
    pub fn scalar(&self) -> Option<&str> {
        self.vertex.get_str(SCALAR)
    }

    pub fn measure_id(&self) -> Option<&str> {
        self.vertex.get_str(MEASURE)
    }

    /// Cardinality of the group this value was created in.
    pub fn cardinality(&self) -> Result<Cardinality> {
        self.vertex
            .get_str(CARDINALITY)
            .ok_or_else(|| Error::InvalidValue(format!("object value {} has no cardinality", self.vertex.id)))?
            .parse()
    }

    pub async fn set_scalar<B: StorageBackend>(&mut self, session: &mut Session<'_, B>, scalar: Option<&str>) -> Result<()> {
        write_field(session, &mut self.vertex, SCALAR, scalar.into()).await
    }

    pub async fn set_measure_id<B: StorageBackend>(
        &mut self,
        session: &mut Session<'_, B>,
        measure: Option<&str>,
    ) -> Result<()> {
        write_field(session, &mut self.vertex, MEASURE, measure.into()).await
    }

    pub async fn property_id<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<VertexId> {
        session
            .out_neighbor(self.vertex.id, OF_PROPERTY)
            .await?
            .ok_or_else(|| Error::NotFound(format!("object property of value {}", self.vertex.id)))
    }

    pub async fn parent_id<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Option<VertexId>> {
        session.out_neighbor(self.vertex.id, PARENT_VALUE).await
    }

    /// The aspect property this value instantiates; `None` for root values.
    pub async fn aspect_property_id<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Option<VertexId>> {
        session.out_neighbor(self.vertex.id, OF_ASPECT_PROPERTY).await
    }

    pub async fn children<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Vec<ObjectValueView>> {
        let mut views = Vec::new();
        for id in session.in_neighbors(self.vertex.id, PARENT_VALUE).await? {
            views.push(session.view::<ObjectValueView>(id).await?);
        }
        Ok(views)
    }

    pub async fn to_dto<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<ObjectValue> {
        Ok(ObjectValue {
            id: self.vertex.id,
            object_property_id: self.property_id(session).await?,
            parent_value_id: self.parent_id(session).await?,
            aspect_property_id: self.aspect_property_id(session).await?,
            scalar: owned_str(&self.vertex, SCALAR),
            measure_id: owned_str(&self.vertex, MEASURE),
            cardinality: self.cardinality()?,
            version: self.version(),
        })
    }
}

#[async_trait]
impl HistoryAware for ObjectValueView {
    async fn current_snapshot<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Snapshot> {
        let children = session.in_neighbors(self.vertex.id, PARENT_VALUE).await?;
        Ok(Snapshot::new()
            .data(SCALAR, self.scalar())
            .data(MEASURE, self.measure_id())
            .data(CARDINALITY, self.vertex.get_str(CARDINALITY))
            .link("property", session.out_neighbor(self.vertex.id, OF_PROPERTY).await?)
            .link("parent", self.parent_id(session).await?)
            .link("aspectProperty", self.aspect_property_id(session).await?)
            .links("children", children))
    }

    fn entity_name(&self) -> String {
        self.scalar().unwrap_or_default().to_string()
    }
}

/// Scalar payload for a value edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueData {
    pub scalar: Option<String>,
    pub measure_id: Option<String>,
}

impl ValueData {
    pub fn scalar(scalar: impl Into<String>) -> Self {
        Self { scalar: Some(scalar.into()), measure_id: None }
    }

    /// A value with no scalar, for composite nodes.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_measure(mut self, measure_id: impl Into<String>) -> Self {
        self.measure_id = Some(measure_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectValue {
    pub id: VertexId,
    pub object_property_id: VertexId,
    pub parent_value_id: Option<VertexId>,
    pub aspect_property_id: Option<VertexId>,
    pub scalar: Option<String>,
    pub measure_id: Option<String>,
    pub cardinality: Cardinality,
    pub version: u64,
}
