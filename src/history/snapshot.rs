//! Flat entity snapshots and field-level deltas.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::DELETED;
use crate::model::VertexId;

/// Flat rendering of one entity: scalar fields in `data`, relations in `links`.
///
/// Absent fields are omitted rather than stored as empty strings. Multi-valued
/// links are rendered as sorted, comma-joined vertex ids so that two snapshots
/// of the same state always compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub data: BTreeMap<String, String>,
    pub links: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(mut self, key: &str, value: Option<impl Into<String>>) -> Self {
        if let Some(value) = value {
            self.data.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn flag(mut self, key: &str, value: bool) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }

    pub fn link(mut self, key: &str, target: Option<VertexId>) -> Self {
        if let Some(target) = target {
            self.links.insert(key.to_string(), target.to_string());
        }
        self
    }

    pub fn links(mut self, key: &str, targets: impl IntoIterator<Item = VertexId>) -> Self {
        let mut ids: Vec<VertexId> = targets.into_iter().collect();
        if ids.is_empty() {
            return self;
        }
        ids.sort();
        ids.dedup();
        let joined = ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        self.links.insert(key.to_string(), joined);
        self
    }

    pub fn get(&self, kind: FieldKind, key: &str) -> Option<&str> {
        match kind {
            FieldKind::Data => self.data.get(key),
            FieldKind::Link => self.links.get(key),
        }
        .map(String::as_str)
    }

    pub fn is_deleted(&self) -> bool {
        self.data.get(DELETED).is_some_and(|v| v == "true")
    }

    fn section_mut(&mut self, kind: FieldKind) -> &mut BTreeMap<String, String> {
        match kind {
            FieldKind::Data => &mut self.data,
            FieldKind::Link => &mut self.links,
        }
    }
}

/// Which half of a snapshot a delta touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Data,
    Link,
}

/// One changed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub field: String,
    pub kind: FieldKind,
    pub before: Option<String>,
    pub after: Option<String>,
}

impl Delta {
    pub fn data(field: &str, before: Option<&str>, after: Option<&str>) -> Self {
        Self {
            field: field.to_string(),
            kind: FieldKind::Data,
            before: before.map(str::to_string),
            after: after.map(str::to_string),
        }
    }

    pub fn link(field: &str, before: Option<&str>, after: Option<&str>) -> Self {
        Self { kind: FieldKind::Link, ..Self::data(field, before, after) }
    }
}

/// Every field whose value differs between `before` and `after`.
///
/// Data fields come first, then links, each in field-name order. A missing
/// snapshot compares as empty.
pub fn delta(before: Option<&Snapshot>, after: Option<&Snapshot>) -> Vec<Delta> {
    let empty = Snapshot::default();
    let before = before.unwrap_or(&empty);
    let after = after.unwrap_or(&empty);

    let mut changes = Vec::new();
    for kind in [FieldKind::Data, FieldKind::Link] {
        let (old, new) = match kind {
            FieldKind::Data => (&before.data, &after.data),
            FieldKind::Link => (&before.links, &after.links),
        };
        let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
        keys.sort();
        keys.dedup();
        for key in keys {
            let (b, a) = (old.get(key), new.get(key));
            if b != a {
                changes.push(Delta {
                    field: key.clone(),
                    kind,
                    before: b.cloned(),
                    after: a.cloned(),
                });
            }
        }
    }
    changes
}

/// Apply `changes` on top of `base`, producing the later snapshot.
pub fn apply(base: &Snapshot, changes: &[Delta]) -> Snapshot {
    let mut out = base.clone();
    for change in changes {
        let section = out.section_mut(change.kind);
        match &change.after {
            Some(value) => {
                section.insert(change.field.clone(), value.clone());
            }
            None => {
                section.remove(&change.field);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_links_are_sorted_and_joined() {
        let snap = Snapshot::new().links("properties", [VertexId(12), VertexId(3), VertexId(7)]);
        assert_eq!(snap.links.get("properties").map(String::as_str), Some("3,7,12"));
        assert!(Snapshot::new().links("properties", []).links.is_empty());
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let snap = Snapshot::new().data("measure", None::<String>).data("name", Some("Length"));
        assert_eq!(snap.data.len(), 1);
        assert_eq!(snap.get(FieldKind::Data, "name"), Some("Length"));
    }

    #[test]
    fn test_delta_covers_data_and_links() {
        let before = Snapshot::new().data("name", Some("Length")).link("subject", Some(VertexId(1)));
        let after = Snapshot::new()
            .data("name", Some("Width"))
            .data("description", Some("cross"))
            .link("subject", None);
        assert_eq!(
            delta(Some(&before), Some(&after)),
            vec![
                Delta::data("description", None, Some("cross")),
                Delta::data("name", Some("Length"), Some("Width")),
                Delta::link("subject", Some("1"), None),
            ]
        );
    }

    #[test]
    fn test_delta_against_nothing() {
        let snap = Snapshot::new().data("name", Some("x"));
        assert_eq!(delta(None, Some(&snap)), vec![Delta::data("name", None, Some("x"))]);
        assert_eq!(delta(Some(&snap), None), vec![Delta::data("name", Some("x"), None)]);
    }

    #[test]
    fn test_deleted_flag() {
        assert!(Snapshot::new().flag(DELETED, true).is_deleted());
        assert!(!Snapshot::new().flag(DELETED, false).is_deleted());
        assert!(!Snapshot::new().is_deleted());
    }

    fn arb_section() -> impl Strategy<Value = BTreeMap<String, String>> {
        prop::collection::btree_map("[a-d]", "[a-z0-9]{0,3}", 0..4)
    }

    fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
        (arb_section(), arb_section()).prop_map(|(data, links)| Snapshot { data, links })
    }

    proptest! {
        #[test]
        fn prop_apply_delta_reaches_after(before in arb_snapshot(), after in arb_snapshot()) {
            let changes = delta(Some(&before), Some(&after));
            prop_assert_eq!(apply(&before, &changes), after);
        }

        #[test]
        fn prop_self_delta_is_empty(snap in arb_snapshot()) {
            prop_assert!(delta(Some(&snap), Some(&snap)).is_empty());
        }
    }
}
