//! Aspect: a named, typed measure definition that may be composed of
//! properties referencing other aspects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    AspectProperty, AspectPropertyView, BaseType, EntityView, ASPECT_CLASS, DELETED, DESCRIPTION,
    HAS_PROPERTY, NAME, OF_SUBJECT, entity_view, owned_str, write_field,
};
use crate::history::{HistoryAware, Snapshot};
use crate::model::{Value, VertexId};
use crate::storage::StorageBackend;
use crate::{Error, Result, Session};

pub const MEASURE: &str = "measure";
pub const BASE_TYPE: &str = "baseType";

entity_view!(
    /// View over an `Aspect` vertex.
    AspectView,
    ASPECT_CLASS
);

impl AspectView {
    pub fn name(&self) -> &str {
        self.vertex.get_str(NAME).unwrap_or_default()
    }

    pub fn measure_unit(&self) -> Option<&str> {
        self.vertex.get_str(MEASURE)
    }

    pub fn base_type(&self) -> Result<BaseType> {
        self.vertex
            .get_str(BASE_TYPE)
            .ok_or_else(|| Error::InvalidValue(format!("aspect {} has no base type", self.vertex.id)))?
            .parse()
    }

    pub fn description(&self) -> Option<&str> {
        self.vertex.get_str(DESCRIPTION)
    }

    pub fn is_deleted(&self) -> bool {
        self.vertex.get_flag(DELETED)
    }

    pub async fn set_name<B: StorageBackend>(&mut self, session: &mut Session<'_, B>, name: &str) -> Result<()> {
        write_field(session, &mut self.vertex, NAME, name.into()).await
    }

    pub async fn set_measure_unit<B: StorageBackend>(
        &mut self,
        session: &mut Session<'_, B>,
        measure: Option<&str>,
    ) -> Result<()> {
        write_field(session, &mut self.vertex, MEASURE, measure.into()).await
    }

    pub async fn set_base_type<B: StorageBackend>(
        &mut self,
        session: &mut Session<'_, B>,
        base_type: BaseType,
    ) -> Result<()> {
        write_field(session, &mut self.vertex, BASE_TYPE, base_type.as_str().into()).await
    }

    pub async fn set_description<B: StorageBackend>(
        &mut self,
        session: &mut Session<'_, B>,
        description: Option<&str>,
    ) -> Result<()> {
        write_field(session, &mut self.vertex, DESCRIPTION, description.into()).await
    }

    pub async fn set_deleted<B: StorageBackend>(&mut self, session: &mut Session<'_, B>, deleted: bool) -> Result<()> {
        write_field(session, &mut self.vertex, DELETED, Value::Bool(deleted)).await
    }

    pub async fn subject_id<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Option<VertexId>> {
        session.out_neighbor(self.vertex.id, OF_SUBJECT).await
    }

    pub async fn set_subject<B: StorageBackend>(
        &self,
        session: &mut Session<'_, B>,
        subject: Option<VertexId>,
    ) -> Result<()> {
        session.replace_out_edge(self.vertex.id, OF_SUBJECT, subject).await
    }

    /// Every property ever attached, soft-deleted ones included.
    pub async fn properties<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Vec<AspectPropertyView>> {
        let mut views = Vec::new();
        for id in session.out_neighbors(self.vertex.id, HAS_PROPERTY).await? {
            views.push(session.view::<AspectPropertyView>(id).await?);
        }
        Ok(views)
    }

    /// Properties that take part in schema resolution.
    pub async fn active_properties<B: StorageBackend>(
        &self,
        session: &Session<'_, B>,
    ) -> Result<Vec<AspectPropertyView>> {
        let mut views = self.properties(session).await?;
        views.retain(|p| !p.is_deleted());
        Ok(views)
    }

    pub async fn to_dto<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Aspect> {
        let mut properties = Vec::new();
        for property in self.active_properties(session).await? {
            properties.push(property.to_dto(session).await?);
        }
        Ok(Aspect {
            id: self.vertex.id,
            name: self.name().to_string(),
            measure_unit: owned_str(&self.vertex, MEASURE),
            base_type: self.base_type()?,
            description: owned_str(&self.vertex, DESCRIPTION),
            subject_id: self.subject_id(session).await?,
            deleted: self.is_deleted(),
            version: self.version(),
            properties,
        })
    }
}

#[async_trait]
impl HistoryAware for AspectView {
    async fn current_snapshot<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Snapshot> {
        let properties = self.active_properties(session).await?;
        Ok(Snapshot::new()
            .data(NAME, Some(self.name()))
            .data(MEASURE, self.measure_unit())
            .data(BASE_TYPE, self.vertex.get_str(BASE_TYPE))
            .data(DESCRIPTION, self.description())
            .flag(DELETED, self.is_deleted())
            .link("subject", self.subject_id(session).await?)
            .links("properties", properties.iter().map(|p| p.id())))
    }

    fn entity_name(&self) -> String {
        self.name().to_string()
    }
}

/// Input for creating or replacing an aspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectData {
    pub name: String,
    pub measure_unit: Option<String>,
    pub base_type: BaseType,
    pub description: Option<String>,
    pub subject_id: Option<VertexId>,
}

impl AspectData {
    pub fn new(name: impl Into<String>, base_type: BaseType) -> Self {
        Self {
            name: name.into(),
            measure_unit: None,
            base_type,
            description: None,
            subject_id: None,
        }
    }

    pub fn with_measure_unit(mut self, measure: impl Into<String>) -> Self {
        self.measure_unit = Some(measure.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn in_subject(mut self, subject_id: VertexId) -> Self {
        self.subject_id = Some(subject_id);
        self
    }
}

/// Detached aspect returned by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aspect {
    pub id: VertexId,
    pub name: String,
    pub measure_unit: Option<String>,
    pub base_type: BaseType,
    pub description: Option<String>,
    pub subject_id: Option<VertexId>,
    pub deleted: bool,
    pub version: u64,
    /// Non-deleted properties in creation order.
    pub properties: Vec<AspectProperty>,
}
