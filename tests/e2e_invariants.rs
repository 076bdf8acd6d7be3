//! End-to-end tests for the catalog's structural guarantees: acyclic aspect
//! references, scoped unique names, cardinality of value groups and
//! all-or-nothing mutations.

use aspect_catalog::entity::{
    ASPECT_CLASS, ASPECT_PROPERTY_CLASS, AspectData, AspectPropertyData, BaseType, HAS_PROPERTY, ObjectData,
    ObjectPropertyData, REFERENCES, SubjectData, ValueData,
};
use aspect_catalog::schema::{self, NameScope};
use aspect_catalog::{Cardinality, Catalog, Error, HistoryContext, MemoryBackend, PropertyMap, Session, TxMode, VertexId};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn ctx() -> HistoryContext {
    HistoryContext::new("admin")
}

async fn counts(catalog: &Catalog) -> (u64, u64) {
    let session = catalog.store().begin(TxMode::ReadOnly).await.unwrap();
    (session.vertex_count().await.unwrap(), session.edge_count().await.unwrap())
}

async fn has_cycle(catalog: &Catalog) -> bool {
    let session = catalog.store().begin(TxMode::ReadOnly).await.unwrap();
    schema::find_any_cycle(&session).await.unwrap().is_some()
}

// ============================================================================
// 1. Reference graph stays acyclic
// ============================================================================

#[tokio::test]
async fn test_transitive_cycle_is_rejected_without_side_effects() {
    let catalog = Catalog::open_memory();
    let a = catalog.create_aspect(&ctx(), AspectData::new("A", BaseType::Text)).await.unwrap();
    let b = catalog.create_aspect(&ctx(), AspectData::new("B", BaseType::Text)).await.unwrap();
    let c = catalog.create_aspect(&ctx(), AspectData::new("C", BaseType::Text)).await.unwrap();
    catalog
        .add_aspect_property(&ctx(), a.id, AspectPropertyData::new(b.id, Cardinality::One))
        .await
        .unwrap();
    catalog
        .add_aspect_property(&ctx(), b.id, AspectPropertyData::new(c.id, Cardinality::Infinity))
        .await
        .unwrap();

    let before = counts(&catalog).await;
    let history_before = catalog.all_history().await.unwrap().len();

    let err = catalog
        .add_aspect_property(&ctx(), c.id, AspectPropertyData::new(a.id, Cardinality::One))
        .await
        .unwrap_err();
    match err {
        Error::CyclicReference { owner, target, path } => {
            assert_eq!(owner, c.id);
            assert_eq!(target, a.id);
            assert_eq!(path.first(), Some(&c.id));
            assert_eq!(path.last(), Some(&c.id));
        }
        other => panic!("expected CyclicReference, got {other:?}"),
    }

    assert_eq!(counts(&catalog).await, before);
    assert_eq!(catalog.all_history().await.unwrap().len(), history_before);
    let c_now = catalog.aspect(c.id).await.unwrap();
    assert!(c_now.properties.is_empty());
    assert_eq!(c_now.version, 1);
    assert!(!has_cycle(&catalog).await);
}

#[tokio::test]
async fn test_self_reference_is_rejected() {
    let catalog = Catalog::open_memory();
    let a = catalog.create_aspect(&ctx(), AspectData::new("A", BaseType::Text)).await.unwrap();
    let err = catalog
        .add_aspect_property(&ctx(), a.id, AspectPropertyData::new(a.id, Cardinality::Infinity))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CyclicReference { owner, target, .. } if owner == a.id && target == a.id));
}

/// Stage `owner → target` in an open session the way the catalog does.
async fn stage_reference(session: &mut Session<'_, MemoryBackend>, owner: VertexId, target: VertexId) -> aspect_catalog::Result<()> {
    schema::live_aspect(session, target).await?;
    schema::ensure_acyclic(session, owner, target, None).await?;
    let property = session.new_vertex(ASPECT_PROPERTY_CLASS, PropertyMap::new()).await?;
    session.create_edge(owner, property, HAS_PROPERTY).await?;
    session.create_edge(property, target, REFERENCES).await?;
    Ok(())
}

#[tokio::test]
async fn test_interleaved_references_cannot_close_a_cycle() {
    let catalog = Catalog::open_memory();
    let a = catalog.create_aspect(&ctx(), AspectData::new("A", BaseType::Text)).await.unwrap();
    let b = catalog.create_aspect(&ctx(), AspectData::new("B", BaseType::Text)).await.unwrap();

    // Each session checks against the committed graph before either commits.
    let mut first = catalog.store().begin(TxMode::ReadWrite).await.unwrap();
    let mut second = catalog.store().begin(TxMode::ReadWrite).await.unwrap();
    stage_reference(&mut first, a.id, b.id).await.unwrap();
    stage_reference(&mut second, b.id, a.id).await.unwrap();

    first.commit().await.unwrap();
    let err = second.commit().await.unwrap_err();
    assert!(matches!(err, Error::TransactionAborted(_)));
    assert!(err.is_retryable());
    assert!(!has_cycle(&catalog).await);

    // Retrying now sees the committed reference.
    let err = catalog
        .add_aspect_property(&ctx(), b.id, AspectPropertyData::new(a.id, Cardinality::One))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CyclicReference { .. }));
}

#[tokio::test]
async fn test_interleaved_retarget_cannot_close_a_cycle() {
    let catalog = Catalog::open_memory();
    let a = catalog.create_aspect(&ctx(), AspectData::new("A", BaseType::Text)).await.unwrap();
    let b = catalog.create_aspect(&ctx(), AspectData::new("B", BaseType::Text)).await.unwrap();
    let c = catalog.create_aspect(&ctx(), AspectData::new("C", BaseType::Text)).await.unwrap();
    // a → c, about to be pointed at b.
    let slot = catalog
        .add_aspect_property(&ctx(), a.id, AspectPropertyData::new(c.id, Cardinality::One))
        .await
        .unwrap();

    let mut second = catalog.store().begin(TxMode::ReadWrite).await.unwrap();
    stage_reference(&mut second, b.id, a.id).await.unwrap();

    catalog
        .update_aspect_property(&ctx(), slot.id, AspectPropertyData::new(b.id, Cardinality::One))
        .await
        .unwrap();
    let err = second.commit().await.unwrap_err();
    assert!(matches!(err, Error::TransactionAborted(_)));
    assert!(!has_cycle(&catalog).await);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_reference_graph_stays_acyclic(edges in prop::collection::vec((0usize..5, 0usize..5), 1..16)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let catalog = Catalog::open_memory();
            let mut aspects: Vec<VertexId> = Vec::new();
            for i in 0..5 {
                let aspect = catalog
                    .create_aspect(&ctx(), AspectData::new(format!("A{i}"), BaseType::Text))
                    .await
                    .unwrap();
                aspects.push(aspect.id);
            }
            for (owner, target) in edges {
                let result = catalog
                    .add_aspect_property(&ctx(), aspects[owner], AspectPropertyData::new(aspects[target], Cardinality::One))
                    .await;
                match result {
                    Ok(_) | Err(Error::CyclicReference { .. }) | Err(Error::DuplicateName { .. }) => {}
                    Err(other) => panic!("unexpected error {other:?}"),
                }
                assert!(!has_cycle(&catalog).await);
            }
        });
    }
}

// ============================================================================
// 2. Scoped unique names
// ============================================================================

#[tokio::test]
async fn test_duplicate_aspect_name_leaves_one() {
    let catalog = Catalog::open_memory();
    catalog.create_aspect(&ctx(), AspectData::new("Length", BaseType::Decimal)).await.unwrap();
    let err = catalog
        .create_aspect(&ctx(), AspectData::new("length ", BaseType::Long))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateName { .. }));

    let found = catalog.find_aspects_by_name("LENGTH").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].base_type, BaseType::Decimal);
    assert_eq!(catalog.aspects().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_object_names_are_scoped_to_subjects() {
    let catalog = Catalog::open_memory();
    let vehicles = catalog.create_subject(&ctx(), SubjectData::new("Vehicles")).await.unwrap();
    let boats = catalog.create_subject(&ctx(), SubjectData::new("Boats")).await.unwrap();
    catalog.create_object(&ctx(), ObjectData::new("Unit-1", vehicles.id)).await.unwrap();
    catalog.create_object(&ctx(), ObjectData::new("Unit-1", boats.id)).await.unwrap();
    let err = catalog
        .create_object(&ctx(), ObjectData::new("unit-1", vehicles.id))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateName { .. }));
}

#[tokio::test]
async fn test_racing_claims_lose_at_commit() {
    let catalog = Catalog::open_memory();
    let scope = NameScope::Aspect { subject: None };

    // Both sessions pass the read-time check before either commits.
    let mut first = catalog.store().begin(TxMode::ReadWrite).await.unwrap();
    let mut second = catalog.store().begin(TxMode::ReadWrite).await.unwrap();
    let a = first.new_vertex(ASPECT_CLASS, PropertyMap::new()).await.unwrap();
    let b = second.new_vertex(ASPECT_CLASS, PropertyMap::new()).await.unwrap();
    schema::claim_name(&mut first, scope, "Length", a).await.unwrap();
    schema::claim_name(&mut second, scope, "length", b).await.unwrap();

    first.commit().await.unwrap();
    let err = second.commit().await.unwrap_err();
    assert!(matches!(err, Error::DuplicateName { conflicting, .. } if conflicting == a));

    let session = catalog.store().begin(TxMode::ReadOnly).await.unwrap();
    assert_eq!(session.vertices_by_class(ASPECT_CLASS).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_joined_creates_keep_names_unique() {
    let catalog = Catalog::open_memory();
    let ctx = ctx();
    let (left, right) = tokio::join!(
        catalog.create_aspect(&ctx, AspectData::new("Width", BaseType::Decimal)),
        catalog.create_aspect(&ctx, AspectData::new("WIDTH", BaseType::Decimal)),
    );
    let outcomes = [left.is_ok(), right.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let failure = left.err().or(right.err()).unwrap();
    assert!(matches!(failure, Error::DuplicateName { .. }));
    assert_eq!(catalog.find_aspects_by_name("width").await.unwrap().len(), 1);
}

// ============================================================================
// 3. Value group cardinality
// ============================================================================

#[tokio::test]
async fn test_zero_group_keeps_its_single_child() {
    let catalog = Catalog::open_memory();
    let marker = catalog.create_aspect(&ctx(), AspectData::new("Marker", BaseType::Boolean)).await.unwrap();
    let tagged = catalog.create_aspect(&ctx(), AspectData::new("Tagged", BaseType::Text)).await.unwrap();
    let slot = catalog
        .add_aspect_property(&ctx(), tagged.id, AspectPropertyData::new(marker.id, Cardinality::Zero))
        .await
        .unwrap();
    let vehicles = catalog.create_subject(&ctx(), SubjectData::new("Vehicles")).await.unwrap();
    let car = catalog.create_object(&ctx(), ObjectData::new("Car-1", vehicles.id)).await.unwrap();
    let prop = catalog
        .create_object_property(&ctx(), ObjectPropertyData::new(car.id, tagged.id, Cardinality::Infinity))
        .await
        .unwrap();
    let root = catalog.add_value(&ctx(), prop.id, None, None, ValueData::empty()).await.unwrap();

    let tree = catalog.value_tree(prop.id).await.unwrap();
    assert_eq!(tree.len(), 2);
    assert_eq!(tree.roots[0].children_of(slot.id).count(), 1);

    let err = catalog
        .add_value(&ctx(), prop.id, Some(root.id), Some(slot.id), ValueData::empty())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CardinalityViolation { cardinality: Cardinality::Zero, .. }));

    let tree = catalog.value_tree(prop.id).await.unwrap();
    assert_eq!(tree.roots[0].children_of(slot.id).count(), 1);
    catalog.validate_tree(prop.id).await.unwrap();
}

#[tokio::test]
async fn test_infinity_group_accepts_many_siblings() {
    let catalog = Catalog::open_memory();
    let color = catalog.create_aspect(&ctx(), AspectData::new("Color", BaseType::Text)).await.unwrap();
    let vehicles = catalog.create_subject(&ctx(), SubjectData::new("Vehicles")).await.unwrap();
    let car = catalog.create_object(&ctx(), ObjectData::new("Car-1", vehicles.id)).await.unwrap();
    let prop = catalog
        .create_object_property(&ctx(), ObjectPropertyData::new(car.id, color.id, Cardinality::Infinity))
        .await
        .unwrap();

    let colors = ["red", "green", "blue", "black", "white"];
    for c in colors {
        catalog.add_value(&ctx(), prop.id, None, None, ValueData::scalar(c)).await.unwrap();
    }
    let tree = catalog.value_tree(prop.id).await.unwrap();
    assert_eq!(
        tree.roots.iter().map(|n| n.value.scalar.as_deref().unwrap()).collect::<Vec<_>>(),
        colors.to_vec()
    );

    catalog.remove_value(&ctx(), tree.roots[1].value.id).await.unwrap();
    assert_eq!(catalog.value_tree(prop.id).await.unwrap().len(), colors.len() - 1);
}

#[tokio::test]
async fn test_one_group_rejects_a_second_value() {
    let catalog = Catalog::open_memory();
    let length = catalog.create_aspect(&ctx(), AspectData::new("Length", BaseType::Decimal)).await.unwrap();
    let vehicles = catalog.create_subject(&ctx(), SubjectData::new("Vehicles")).await.unwrap();
    let car = catalog.create_object(&ctx(), ObjectData::new("Car-1", vehicles.id)).await.unwrap();
    let prop = catalog
        .create_object_property(&ctx(), ObjectPropertyData::new(car.id, length.id, Cardinality::One))
        .await
        .unwrap();
    catalog.add_value(&ctx(), prop.id, None, None, ValueData::scalar("4.5")).await.unwrap();

    let before = counts(&catalog).await;
    let err = catalog
        .add_value(&ctx(), prop.id, None, None, ValueData::scalar("5.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CardinalityViolation { cardinality: Cardinality::One, .. }));
    assert_eq!(counts(&catalog).await, before);

    // Malformed scalars are refused before anything is written.
    let err = catalog
        .set_single_value(&ctx(), prop.id, None, None, ValueData::scalar("long"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidValue(_)));
    let tree = catalog.value_tree(prop.id).await.unwrap();
    assert_eq!(tree.roots[0].value.scalar.as_deref(), Some("4.5"));
}

// ============================================================================
// 4. Deleted owners
// ============================================================================

#[tokio::test]
async fn test_deleted_subject_refuses_new_objects() {
    let catalog = Catalog::open_memory();
    let vehicles = catalog.create_subject(&ctx(), SubjectData::new("Vehicles")).await.unwrap();
    catalog.soft_delete_subject(&ctx(), vehicles.id).await.unwrap();
    let err = catalog
        .create_object(&ctx(), ObjectData::new("Car-1", vehicles.id))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Deleted { id, .. } if id == vehicles.id));
    assert!(catalog.find_subject_by_name("Vehicles").await.unwrap().is_none());
}
