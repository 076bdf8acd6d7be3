//! Subject: a named grouping that scopes aspects and owns objects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{DELETED, DESCRIPTION, EntityView, NAME, SUBJECT_CLASS, entity_view, owned_str, write_field};
use crate::history::{HistoryAware, Snapshot};
use crate::model::{Value, VertexId};
use crate::storage::StorageBackend;
use crate::{Result, Session};

entity_view!(
    /// View over a `Subject` vertex.
    SubjectView,
    SUBJECT_CLASS
);

impl SubjectView {
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

    pub fn to_dto(&self) -> Subject {
        Subject {
            id: self.vertex.id,
            name: self.name().to_string(),
            description: owned_str(&self.vertex, DESCRIPTION),
            deleted: self.is_deleted(),
            version: self.version(),
        }
    }
}

#[async_trait]
impl HistoryAware for SubjectView {
    async fn current_snapshot<B: StorageBackend>(&self, _session: &Session<'_, B>) -> Result<Snapshot> {
        Ok(Snapshot::new()
            .data(NAME, Some(self.name()))
            .data(DESCRIPTION, self.description())
            .flag(DELETED, self.is_deleted()))
    }

    fn entity_name(&self) -> String {
        self.name().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectData {
    pub name: String,
    pub description: Option<String>,
}

impl SubjectData {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: VertexId,
    pub name: String,
    pub description: Option<String>,
    pub deleted: bool,
    pub version: u64,
}
