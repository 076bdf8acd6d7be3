//! Subject services.

use tracing::{info, instrument};

use super::Catalog;
use crate::entity::{
    DELETED, DESCRIPTION, EntityView, NAME, SUBJECT_CLASS, Subject, SubjectData, SubjectView, normalize_name,
    normalize_optional,
};
use crate::history::{HistoryAware, HistoryContext};
use crate::model::{Value, VertexId, property_map};
use crate::schema::{self, NameScope};
use crate::storage::StorageBackend;
use crate::tx::TxMode;
use crate::{Error, Result, Session};

impl<B: StorageBackend> Catalog<B> {
    #[instrument(skip_all, fields(user = %ctx.user, name = %data.name))]
    pub async fn create_subject(&self, ctx: &HistoryContext, data: SubjectData) -> Result<Subject> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<Subject> {
                let name = normalize_name(SUBJECT_CLASS, &data.name)?;
                let props = property_map([
                    (NAME, Value::from(name.as_str())),
                    (DESCRIPTION, normalize_optional(data.description.as_deref()).into()),
                    (DELETED, false.into()),
                ]);
                let id = session.new_vertex(SUBJECT_CLASS, props).await?;
                schema::claim_name(session, NameScope::Subject, &name, id).await?;
                let mut subject = session.view::<SubjectView>(id).await?;
                self.history.record(session, ctx, &mut subject, None).await?;
                info!(subject = %id, "subject created");
                Ok(subject.to_dto())
            })
            .await
    }

    #[instrument(skip_all, fields(user = %ctx.user, subject = %id))]
    pub async fn update_subject(&self, ctx: &HistoryContext, id: VertexId, data: SubjectData) -> Result<Subject> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<Subject> {
                let mut subject = live_subject_for_edit(session, id).await?;
                let name = normalize_name(SUBJECT_CLASS, &data.name)?;
                let before = subject.current_snapshot(session).await?;
                if NameScope::Subject.key(subject.name()) != NameScope::Subject.key(&name) {
                    schema::release_name(session, NameScope::Subject, subject.name()).await?;
                    schema::claim_name(session, NameScope::Subject, &name, id).await?;
                }
                subject.set_name(session, &name).await?;
                subject
                    .set_description(session, normalize_optional(data.description.as_deref()).as_deref())
                    .await?;
                self.history.record(session, ctx, &mut subject, Some(before)).await?;
                Ok(subject.to_dto())
            })
            .await
    }

    /// Flag a subject deleted. Its aspects and objects are left untouched.
    #[instrument(skip_all, fields(user = %ctx.user, subject = %id))]
    pub async fn soft_delete_subject(&self, ctx: &HistoryContext, id: VertexId) -> Result<()> {
        self.store
            .with_transaction(TxMode::ReadWrite, async move |session: &mut Session<'_, B>| -> Result<()> {
                let mut subject = live_subject_for_edit(session, id).await?;
                let before = subject.current_snapshot(session).await?;
                schema::release_name(session, NameScope::Subject, subject.name()).await?;
                subject.set_deleted(session, true).await?;
                self.history.record(session, ctx, &mut subject, Some(before)).await?;
                info!(subject = %id, "subject soft-deleted");
                Ok(())
            })
            .await
    }

    /// Any subject by id, deleted or not.
    pub async fn subject(&self, id: VertexId) -> Result<Subject> {
        self.store
            .with_transaction(TxMode::ReadOnly, async move |session: &mut Session<'_, B>| -> Result<Subject> {
                Ok(session.view::<SubjectView>(id).await?.to_dto())
            })
            .await
    }

    /// The live subject named `name` (trimmed, any case), if any.
    pub async fn find_subject_by_name(&self, name: &str) -> Result<Option<Subject>> {
        self.store
            .with_transaction(TxMode::ReadOnly, async move |session: &mut Session<'_, B>| -> Result<Option<Subject>> {
                let found = schema::find_by_name(session, NameScope::Subject, name, None).await?;
                found
                    .into_iter()
                    .next()
                    .map(|v| SubjectView::from_vertex(v).map(|s| s.to_dto()))
                    .transpose()
            })
            .await
    }

    /// Every live subject, in creation order.
    pub async fn subjects(&self) -> Result<Vec<Subject>> {
        self.store
            .with_transaction(TxMode::ReadOnly, async move |session: &mut Session<'_, B>| -> Result<Vec<Subject>> {
                let mut all = Vec::new();
                for vertex in session.vertices_by_class(SUBJECT_CLASS).await? {
                    let view = SubjectView::from_vertex(vertex)?;
                    if !view.is_deleted() {
                        all.push(view.to_dto());
                    }
                }
                Ok(all)
            })
            .await
    }
}

async fn live_subject_for_edit<B: StorageBackend>(session: &Session<'_, B>, id: VertexId) -> Result<SubjectView> {
    let subject = session.view::<SubjectView>(id).await?;
    if subject.is_deleted() {
        return Err(Error::Deleted { class: SUBJECT_CLASS.to_string(), id });
    }
    Ok(subject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_subject_lifecycle() {
        let catalog = Catalog::open_memory();
        let ctx = HistoryContext::new("admin");
        let created = catalog
            .create_subject(&ctx, SubjectData::new("  Vehicles ").with_description("things with wheels"))
            .await
            .unwrap();
        assert_eq!(created.name, "Vehicles");
        assert_eq!(created.version, 1);

        let err = catalog.create_subject(&ctx, SubjectData::new("vehicles")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateName { conflicting, .. } if conflicting == created.id));

        let found = catalog.find_subject_by_name("VEHICLES").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);

        catalog.soft_delete_subject(&ctx, created.id).await.unwrap();
        assert!(catalog.find_subject_by_name("Vehicles").await.unwrap().is_none());
        assert!(catalog.subject(created.id).await.unwrap().deleted);
        assert!(catalog.subjects().await.unwrap().is_empty());

        let again = catalog.create_subject(&ctx, SubjectData::new("Vehicles")).await.unwrap();
        assert_ne!(again.id, created.id);
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let catalog = Catalog::open_memory();
        let err = catalog
            .create_subject(&HistoryContext::new("admin"), SubjectData::new("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
        assert!(catalog.subjects().await.unwrap().is_empty());
    }
}
