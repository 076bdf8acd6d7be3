//! AspectProperty: a named slot of an aspect, pointing at the aspect that
//! describes its values.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    ASPECT_PROPERTY_CLASS, Cardinality, DELETED, EntityView, HAS_PROPERTY, NAME, REFERENCES,
    entity_view, owned_str, write_field,
};
use crate::history::{HistoryAware, Snapshot};
use crate::model::{Value, VertexId};
use crate::storage::StorageBackend;
use crate::{Error, Result, Session};

pub const CARDINALITY: &str = "cardinality";
pub const POWER: &str = "power";

entity_view!(
    /// View over an `AspectProperty` vertex.
    AspectPropertyView,
    ASPECT_PROPERTY_CLASS
);

impl AspectPropertyView {
    pub fn name(&self) -> Option<&str> {
        self.vertex.get_str(NAME)
    }

    pub fn cardinality(&self) -> Result<Cardinality> {
        self.vertex
            .get_str(CARDINALITY)
            .ok_or_else(|| Error::InvalidValue(format!("aspect property {} has no cardinality", self.vertex.id)))?
            .parse()
    }

    pub fn power(&self) -> Option<&str> {
        self.vertex.get_str(POWER)
    }

    pub fn is_deleted(&self) -> bool {
        self.vertex.get_flag(DELETED)
    }

    pub async fn set_name<B: StorageBackend>(&mut self, session: &mut Session<'_, B>, name: Option<&str>) -> Result<()> {
        write_field(session, &mut self.vertex, NAME, name.into()).await
    }

    pub async fn set_cardinality<B: StorageBackend>(
        &mut self,
        session: &mut Session<'_, B>,
        cardinality: Cardinality,
    ) -> Result<()> {
        write_field(session, &mut self.vertex, CARDINALITY, cardinality.as_str().into()).await
    }

    pub async fn set_power<B: StorageBackend>(&mut self, session: &mut Session<'_, B>, power: Option<&str>) -> Result<()> {
        write_field(session, &mut self.vertex, POWER, power.into()).await
    }

    pub async fn set_deleted<B: StorageBackend>(&mut self, session: &mut Session<'_, B>, deleted: bool) -> Result<()> {
        write_field(session, &mut self.vertex, DELETED, Value::Bool(deleted)).await
    }

    /// The aspect this property belongs to.
    pub async fn owner_id<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<VertexId> {
        session
            .in_neighbors(self.vertex.id, HAS_PROPERTY)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("owner aspect of property {}", self.vertex.id)))
    }

    /// The aspect describing this property's values.
    pub async fn target_id<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<VertexId> {
        session
            .out_neighbor(self.vertex.id, REFERENCES)
            .await?
            .ok_or_else(|| Error::NotFound(format!("target aspect of property {}", self.vertex.id)))
    }

    pub async fn set_target<B: StorageBackend>(&self, session: &mut Session<'_, B>, target: VertexId) -> Result<()> {
        session.replace_out_edge(self.vertex.id, REFERENCES, Some(target)).await
    }

    pub async fn to_dto<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<AspectProperty> {
        Ok(AspectProperty {
            id: self.vertex.id,
            name: owned_str(&self.vertex, NAME),
            cardinality: self.cardinality()?,
            owner_aspect_id: self.owner_id(session).await?,
            target_aspect_id: self.target_id(session).await?,
            power: owned_str(&self.vertex, POWER),
            deleted: self.is_deleted(),
            version: self.version(),
        })
    }
}

#[async_trait]
impl HistoryAware for AspectPropertyView {
    async fn current_snapshot<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Snapshot> {
        Ok(Snapshot::new()
            .data(NAME, self.name())
            .data(CARDINALITY, self.vertex.get_str(CARDINALITY))
            .data(POWER, self.power())
            .flag(DELETED, self.is_deleted())
            .link("aspect", Some(self.owner_id(session).await?))
            .link("target", session.out_neighbor(self.vertex.id, REFERENCES).await?))
    }

    fn entity_name(&self) -> String {
        self.name().unwrap_or_default().to_string()
    }
}

/// Input for adding or changing an aspect property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectPropertyData {
    pub name: Option<String>,
    pub target_aspect_id: VertexId,
    pub cardinality: Cardinality,
    pub power: Option<String>,
}

impl AspectPropertyData {
    pub fn new(target_aspect_id: VertexId, cardinality: Cardinality) -> Self {
        Self { name: None, target_aspect_id, cardinality, power: None }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_power(mut self, power: impl Into<String>) -> Self {
        self.power = Some(power.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectProperty {
    pub id: VertexId,
    pub name: Option<String>,
    pub cardinality: Cardinality,
    pub owner_aspect_id: VertexId,
    pub target_aspect_id: VertexId,
    pub power: Option<String>,
    pub deleted: bool,
    pub version: u64,
}
