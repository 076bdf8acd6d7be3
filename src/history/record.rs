//! Persisted history records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::{Delta, Snapshot};
use crate::model::{PropertyMap, Value, Vertex, VertexId};
use crate::{Error, Result};

pub const HISTORY_CLASS: &str = "HistoryEvent";

pub const USER: &str = "user";
pub const EVENT: &str = "event";
pub const ENTITY_CLASS: &str = "entityClass";
pub const ENTITY_ID: &str = "entityId";
pub const ENTITY_NAME: &str = "entityName";
pub const INFO: &str = "info";
pub const DELETED: &str = "deleted";
pub const TIMESTAMP: &str = "timestamp";
pub const VERSION: &str = "version";
pub const FULL_DATA: &str = "fullData";
pub const CHANGES: &str = "changes";

/// What kind of mutation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Create,
    Update,
    SoftDelete,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Create => "CREATE",
            EventKind::Update => "UPDATE",
            EventKind::SoftDelete => "SOFT_DELETE",
            EventKind::Delete => "DELETE",
        }
    }

    /// Classify a transition between two snapshots of one entity.
    pub fn classify(before: Option<&Snapshot>, after: Option<&Snapshot>) -> Self {
        match (before, after) {
            (None, _) => EventKind::Create,
            (Some(_), None) => EventKind::Delete,
            (Some(b), Some(a)) if !b.is_deleted() && a.is_deleted() => EventKind::SoftDelete,
            (Some(_), Some(_)) => EventKind::Update,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATE" => Ok(EventKind::Create),
            "UPDATE" => Ok(EventKind::Update),
            "SOFT_DELETE" => Ok(EventKind::SoftDelete),
            "DELETE" => Ok(EventKind::Delete),
            other => Err(Error::StorageError(format!("unknown history event '{other}'"))),
        }
    }
}

/// One immutable entry of an entity's change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Vertex holding this record.
    pub id: VertexId,
    pub user: String,
    pub event: EventKind,
    pub entity_class: String,
    pub entity_id: VertexId,
    pub entity_name: String,
    pub info: Option<String>,
    pub deleted: bool,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
    /// The entity after the mutation, or before it for `DELETE`.
    pub full_data: Snapshot,
    pub changes: Vec<Delta>,
}

impl HistoryRecord {
    pub(crate) fn to_properties(&self) -> Result<PropertyMap> {
        let mut props = PropertyMap::new();
        props.insert(USER.into(), self.user.as_str().into());
        props.insert(EVENT.into(), self.event.as_str().into());
        props.insert(ENTITY_CLASS.into(), self.entity_class.as_str().into());
        props.insert(ENTITY_ID.into(), self.entity_id.0.into());
        props.insert(ENTITY_NAME.into(), self.entity_name.as_str().into());
        if let Some(info) = &self.info {
            props.insert(INFO.into(), info.as_str().into());
        }
        props.insert(DELETED.into(), self.deleted.into());
        props.insert(
            TIMESTAMP.into(),
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true).into(),
        );
        props.insert(VERSION.into(), self.version.into());
        props.insert(FULL_DATA.into(), serde_json::to_string(&self.full_data)?.into());
        props.insert(CHANGES.into(), serde_json::to_string(&self.changes)?.into());
        Ok(props)
    }

    pub(crate) fn from_vertex(vertex: &Vertex) -> Result<Self> {
        if !vertex.is_class(HISTORY_CLASS) {
            return Err(Error::TypeMismatch {
                id: vertex.id,
                expected: HISTORY_CLASS.to_string(),
                got: vertex.class.clone(),
            });
        }
        let text = |key: &str| {
            vertex
                .get_str(key)
                .ok_or_else(|| Error::StorageError(format!("history record {} lacks '{key}'", vertex.id)))
        };
        let int = |key: &str| {
            vertex
                .get(key)
                .and_then(Value::as_int)
                .ok_or_else(|| Error::StorageError(format!("history record {} lacks '{key}'", vertex.id)))
        };
        let timestamp = DateTime::parse_from_rfc3339(text(TIMESTAMP)?)
            .map_err(|e| Error::StorageError(format!("history record {}: {e}", vertex.id)))?
            .with_timezone(&Utc);

        Ok(Self {
            id: vertex.id,
            user: text(USER)?.to_string(),
            event: text(EVENT)?.parse()?,
            entity_class: text(ENTITY_CLASS)?.to_string(),
            entity_id: VertexId(int(ENTITY_ID)? as u64),
            entity_name: text(ENTITY_NAME)?.to_string(),
            info: vertex.get_str(INFO).map(str::to_string),
            deleted: vertex.get_flag(DELETED),
            timestamp,
            version: int(VERSION)? as u64,
            full_data: serde_json::from_str(text(FULL_DATA)?)?,
            changes: serde_json::from_str(text(CHANGES)?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> HistoryRecord {
        HistoryRecord {
            id: VertexId(40),
            user: "admin".into(),
            event: EventKind::Update,
            entity_class: "Aspect".into(),
            entity_id: VertexId(3),
            entity_name: "Length".into(),
            info: None,
            deleted: false,
            timestamp: DateTime::parse_from_rfc3339("2024-05-01T10:00:00.123456Z").unwrap().with_timezone(&Utc),
            version: 2,
            full_data: Snapshot::new().data("name", Some("Length")),
            changes: vec![Delta::data("name", Some("Len"), Some("Length"))],
        }
    }

    #[test]
    fn test_vertex_round_trip() {
        let record = sample();
        let mut vertex = Vertex::new(record.id, HISTORY_CLASS);
        vertex.properties = record.to_properties().unwrap();
        assert_eq!(HistoryRecord::from_vertex(&vertex).unwrap(), record);
    }

    #[test]
    fn test_classify() {
        let live = Snapshot::new().flag("deleted", false);
        let gone = Snapshot::new().flag("deleted", true);
        assert_eq!(EventKind::classify(None, Some(&live)), EventKind::Create);
        assert_eq!(EventKind::classify(Some(&live), Some(&live)), EventKind::Update);
        assert_eq!(EventKind::classify(Some(&live), Some(&gone)), EventKind::SoftDelete);
        assert_eq!(EventKind::classify(Some(&gone), Some(&gone)), EventKind::Update);
        assert_eq!(EventKind::classify(Some(&live), None), EventKind::Delete);
    }

    #[test]
    fn test_wrong_class_rejected() {
        let vertex = Vertex::new(VertexId(1), "Aspect");
        assert!(matches!(HistoryRecord::from_vertex(&vertex), Err(Error::TypeMismatch { .. })));
    }
}
