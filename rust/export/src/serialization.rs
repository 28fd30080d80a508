// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! JSON serialization for target documents.
//!
//! Slot map handles are not portable, so entities are numbered sequentially in
//! creation order and every reference is rewritten to that number. References
//! to entities that no longer exist serialize as `null`.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::attributes::AttributeValue;
use crate::document::TargetDocument;
use crate::entity::EntityKind;
use crate::error::Result;
use crate::keys::Handle;

/// Serializable representation of a whole document.
#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub entities: Vec<EntitySnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: usize,
    pub kind: EntityKind,
    pub attributes: BTreeMap<String, ValueSnapshot>,
}

/// Portable attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSnapshot {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Enum(String),
    Real3([f64; 3]),
    Ref(usize),
    RefList(Vec<usize>),
    List(Vec<ValueSnapshot>),
}

impl TargetDocument {
    /// Serializes the document to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_snapshot())?)
    }

    /// Creates a serializable snapshot of the document.
    pub fn to_snapshot(&self) -> DocumentSnapshot {
        let ids: FxHashMap<Handle, usize> = self
            .entities
            .keys()
            .enumerate()
            .map(|(i, h)| (h, i))
            .collect();

        let entities = self
            .entities
            .iter()
            .enumerate()
            .map(|(i, (_, e))| EntitySnapshot {
                id: i,
                kind: e.kind,
                attributes: e
                    .attributes
                    .iter()
                    .map(|(name, value)| (name.clone(), snapshot_value(value, &ids)))
                    .collect(),
            })
            .collect();

        DocumentSnapshot { entities }
    }
}

fn snapshot_value(value: &AttributeValue, ids: &FxHashMap<Handle, usize>) -> ValueSnapshot {
    match value {
        AttributeValue::Null => ValueSnapshot::Null,
        AttributeValue::Bool(b) => ValueSnapshot::Bool(*b),
        AttributeValue::Int(i) => ValueSnapshot::Int(*i),
        AttributeValue::Double(d) => ValueSnapshot::Double(*d),
        AttributeValue::String(s) => ValueSnapshot::String(s.clone()),
        AttributeValue::Enum(s) => ValueSnapshot::Enum(s.clone()),
        AttributeValue::Real3(v) => ValueSnapshot::Real3(*v),
        AttributeValue::Ref(h) => match ids.get(h) {
            Some(&id) => ValueSnapshot::Ref(id),
            None => ValueSnapshot::Null,
        },
        AttributeValue::RefList(list) => {
            ValueSnapshot::RefList(list.iter().filter_map(|h| ids.get(h).copied()).collect())
        }
        AttributeValue::List(items) => {
            ValueSnapshot::List(items.iter().map(|v| snapshot_value(v, ids)).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{attrs, names};
    use crate::document::DocumentBuilder;

    #[test]
    fn references_become_sequential_ids() {
        let mut doc = TargetDocument::new();
        let storey = doc
            .create_entity(EntityKind::IfcBuildingStorey, attrs([(names::NAME, "L1".into())]))
            .unwrap();
        let wall = doc.create_entity(EntityKind::IfcWall, Default::default()).unwrap();
        doc.create_entity(
            EntityKind::IfcRelContainedInSpatialStructure,
            attrs([
                (names::RELATING_STRUCTURE, storey.into()),
                (names::RELATED_ELEMENTS, vec![wall].into()),
            ]),
        )
        .unwrap();

        let snapshot = doc.to_snapshot();
        assert_eq!(snapshot.entities.len(), 3);
        let rel = &snapshot.entities[2];
        assert_eq!(rel.attributes[names::RELATING_STRUCTURE], ValueSnapshot::Ref(0));
        assert_eq!(rel.attributes[names::RELATED_ELEMENTS], ValueSnapshot::RefList(vec![1]));
    }

    #[test]
    fn dangling_references_serialize_as_null() {
        let mut doc = TargetDocument::new();
        let gone = doc.create_entity(EntityKind::IfcWall, Default::default()).unwrap();
        let rel = doc
            .create_entity(
                EntityKind::IfcRelAggregates,
                attrs([
                    (names::RELATING_OBJECT, gone.into()),
                    (names::RELATED_OBJECTS, vec![gone].into()),
                ]),
            )
            .unwrap();
        doc.mark_for_removal(gone);
        doc.apply_removals();

        let snapshot = doc.to_snapshot();
        assert_eq!(snapshot.entities.len(), 1);
        assert_eq!(snapshot.entities[0].attributes[names::RELATING_OBJECT], ValueSnapshot::Null);
        assert_eq!(
            snapshot.entities[0].attributes[names::RELATED_OBJECTS],
            ValueSnapshot::RefList(Vec::new())
        );
        assert!(doc.contains(rel));
    }

    #[test]
    fn json_round_trips_through_serde() {
        let mut doc = TargetDocument::new();
        doc.create_entity(EntityKind::IfcProject, attrs([(names::NAME, "P".into())]))
            .unwrap();

        let json = doc.to_json().unwrap();
        let parsed: DocumentSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.entities[0].kind, EntityKind::IfcProject);
        assert_eq!(
            parsed.entities[0].attributes[names::NAME],
            ValueSnapshot::String("P".into())
        );
    }
}
