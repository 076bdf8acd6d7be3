//! # History engine
//!
//! Every accepted mutation appends one immutable [`HistoryRecord`] for each
//! entity it touched. The caller captures a [`Snapshot`] before mutating,
//! mutates through the entity view, then hands the view back to the engine,
//! which snapshots again, diffs the two and appends the record in the same
//! transaction as the mutation.
//!
//! Versions are per entity: 1 on `CREATE`, then +1 per appended record. The
//! current version lives on the entity vertex itself, so two transactions
//! appending for one entity touch the same vertex and the later commit is
//! aborted by the store.

pub mod record;
pub mod snapshot;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::HistoryConfig;
use crate::entity::{EntityView, VERSION, write_field};
use crate::model::{PropertyMap, Value, VertexId, property_map};
use crate::storage::{Pattern, StorageBackend, UniqueClaim};
use crate::{Result, Session};

pub use record::{EventKind, HISTORY_CLASS, HistoryRecord};
pub use snapshot::{Delta, FieldKind, Snapshot, apply, delta};

/// Who is performing a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryContext {
    pub user: String,
}

impl HistoryContext {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }
}

/// An entity whose state can be captured as a flat snapshot.
#[async_trait]
pub trait HistoryAware: EntityView {
    async fn current_snapshot<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Snapshot>;

    /// Human-readable name stored alongside each record.
    fn entity_name(&self) -> String;

    /// Free-form context stored alongside each record.
    fn info(&self) -> Option<String> {
        None
    }
}

/// Appends and reads history records.
#[derive(Debug, Clone, Default)]
pub struct HistoryEngine {
    config: HistoryConfig,
}

impl HistoryEngine {
    pub fn new(config: HistoryConfig) -> Self {
        Self { config }
    }

    /// Record the transition from `before` (`None` for a new entity) to the
    /// entity's current state.
    ///
    /// Returns `None` when the mutation changed nothing and no-op updates
    /// are not being recorded.
    #[instrument(skip_all, fields(class = E::CLASS, id = %entity.id()))]
    pub async fn record<B: StorageBackend, E: HistoryAware>(
        &self,
        session: &mut Session<'_, B>,
        ctx: &HistoryContext,
        entity: &mut E,
        before: Option<Snapshot>,
    ) -> Result<Option<HistoryRecord>> {
        let after = entity.current_snapshot(session).await?;
        let changes = delta(before.as_ref(), Some(&after));
        let event = EventKind::classify(before.as_ref(), Some(&after));
        if event == EventKind::Update && changes.is_empty() && !self.config.record_noop_updates {
            debug!("no-op update not recorded");
            return Ok(None);
        }

        let version = entity.version() + 1;
        let id = entity.id();
        write_field(session, entity.vertex_mut(), VERSION, Value::from(version)).await?;

        let record = HistoryRecord {
            id,
            user: ctx.user.clone(),
            event,
            entity_class: E::CLASS.to_string(),
            entity_id: id,
            entity_name: entity.entity_name(),
            info: entity.info(),
            deleted: after.is_deleted(),
            timestamp: Utc::now(),
            version,
            full_data: after,
            changes,
        };
        self.append(session, record).await.map(Some)
    }

    /// Record the physical removal of `entity`. Call before deleting the vertex.
    #[instrument(skip_all, fields(class = E::CLASS, id = %entity.id()))]
    pub async fn record_delete<B: StorageBackend, E: HistoryAware>(
        &self,
        session: &mut Session<'_, B>,
        ctx: &HistoryContext,
        entity: &E,
    ) -> Result<HistoryRecord> {
        let before = entity.current_snapshot(session).await?;
        let record = HistoryRecord {
            id: entity.id(),
            user: ctx.user.clone(),
            event: EventKind::Delete,
            entity_class: E::CLASS.to_string(),
            entity_id: entity.id(),
            entity_name: entity.entity_name(),
            info: entity.info(),
            deleted: true,
            timestamp: Utc::now(),
            version: entity.version() + 1,
            changes: delta(Some(&before), None),
            full_data: before,
        };
        self.append(session, record).await
    }

    async fn append<B: StorageBackend>(
        &self,
        session: &mut Session<'_, B>,
        record: HistoryRecord,
    ) -> Result<HistoryRecord> {
        let id = session.new_vertex(HISTORY_CLASS, record.to_properties()?).await?;
        session
            .claim_unique(UniqueClaim {
                key: format!("history:{}:{}", record.entity_id, record.version),
                class: HISTORY_CLASS.to_string(),
                name: format!("{} v{}", record.entity_id, record.version),
                owner: id,
            })
            .await?;
        debug!(
            event = %record.event,
            entity = %record.entity_id,
            version = record.version,
            changes = record.changes.len(),
            "history appended"
        );
        Ok(HistoryRecord { id, ..record })
    }

    /// All records of one entity, oldest version first.
    pub async fn history_of<B: StorageBackend>(
        &self,
        session: &Session<'_, B>,
        entity_id: VertexId,
    ) -> Result<Vec<HistoryRecord>> {
        let pattern = Pattern::class(HISTORY_CLASS).eq_param(record::ENTITY_ID, "entity");
        let params: PropertyMap = property_map([("entity", Value::from(entity_id.0))]);
        let mut records = session
            .query(&pattern, &params)
            .await?
            .map(|v| HistoryRecord::from_vertex(&v))
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|r| r.version);
        Ok(records)
    }

    /// Every record in the store, in timestamp order.
    pub async fn all_history<B: StorageBackend>(&self, session: &Session<'_, B>) -> Result<Vec<HistoryRecord>> {
        let mut records = session
            .vertices_by_class(HISTORY_CLASS)
            .await?
            .iter()
            .map(HistoryRecord::from_vertex)
            .collect::<Result<Vec<_>>>()?;
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Rebuild an entity's state at `up_to` by folding its change log.
    ///
    /// `records` must belong to one entity. Returns `None` if the entity did
    /// not exist at that version (never created, or physically deleted).
    pub fn replay(records: &[HistoryRecord], up_to: u64) -> Option<Snapshot> {
        let mut ordered: Vec<&HistoryRecord> = records.iter().filter(|r| r.version <= up_to).collect();
        ordered.sort_by_key(|r| r.version);

        let mut state: Option<Snapshot> = None;
        for record in ordered {
            state = match record.event {
                EventKind::Delete => None,
                EventKind::Create => Some(apply(&Snapshot::default(), &record.changes)),
                EventKind::Update | EventKind::SoftDelete => {
                    Some(apply(state.as_ref().unwrap_or(&Snapshot::default()), &record.changes))
                }
            };
        }
        state
    }
}
