//! Object: a concrete catalog item belonging to a subject.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    DELETED, DESCRIPTION, EntityView, HAS_PROPERTY, NAME, OBJECT_CLASS, OF_SUBJECT, ObjectPropertyView,
    entity_view, owned_str, write_field,
};
use crate::history::{HistoryAware, Snapshot};
use crate::model::{Value, VertexId};
use crate::storage::StorageBackend;
use crate::{Error, Result, Session};

entity_view!(
    /// View over an `Object` vertex.
    ObjectView,
    OBJECT_CLASS
);

impl ObjectView {
    pub fn name(&self) -> &str {
        self.vertex.get_str(NAME).unwrap_or_default()
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

    pub async fn subject_id<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<VertexId> {
        session
            .out_neighbor(self.vertex.id, OF_SUBJECT)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subject of object {}", self.vertex.id)))
    }

    pub async fn set_subject<B: StorageBackend>(&self, session: &mut Session<'_, B>, subject: VertexId) -> Result<()> {
        session.replace_out_edge(self.vertex.id, OF_SUBJECT, Some(subject)).await
    }

    pub async fn properties<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Vec<ObjectPropertyView>> {
        let mut views = Vec::new();
        for id in session.out_neighbors(self.vertex.id, HAS_PROPERTY).await? {
            views.push(session.view::<ObjectPropertyView>(id).await?);
        }
        Ok(views)
    }

    pub async fn to_dto<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Object> {
        Ok(Object {
            id: self.vertex.id,
            name: self.name().to_string(),
            description: owned_str(&self.vertex, DESCRIPTION),
            subject_id: self.subject_id(session).await?,
            deleted: self.is_deleted(),
            version: self.version(),
        })
    }
}

#[async_trait]
impl HistoryAware for ObjectView {
    async fn current_snapshot<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Snapshot> {
        Ok(Snapshot::new()
            .data(NAME, Some(self.name()))
            .data(DESCRIPTION, self.description())
            .flag(DELETED, self.is_deleted())
            .link("subject", session.out_neighbor(self.vertex.id, OF_SUBJECT).await?))
    }

    fn entity_name(&self) -> String {
        self.name().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectData {
    pub name: String,
    pub description: Option<String>,
    pub subject_id: VertexId,
}

impl ObjectData {
    pub fn new(name: impl Into<String>, subject_id: VertexId) -> Self {
        Self { name: name.into(), description: None, subject_id }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    pub id: VertexId,
    pub name: String,
    pub description: Option<String>,
    pub subject_id: VertexId,
    pub deleted: bool,
    pub version: u64,
}
