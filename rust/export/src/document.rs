// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Target document builder.
//!
//! The exporter never talks to a concrete file format. Everything it produces
//! goes through [`DocumentBuilder`]: create an entity, read or write one of its
//! attributes, or queue it for removal. Removal is deferred; queued handles
//! still resolve until [`DocumentBuilder::apply_removals`] runs at the end of
//! the export, but they are no longer [live](DocumentBuilder::is_live) and
//! nothing new may reference them.
//!
//! [`TargetDocument`] is the in-memory implementation. Entities live in a slot
//! map, so a handle to a removed entity stops resolving instead of aliasing a
//! newer one.

use rustc_hash::FxHashSet;
use slotmap::SlotMap;

use crate::attributes::{AttributeValue, Attributes};
use crate::entity::EntityKind;
use crate::error::{Error, Result};
use crate::keys::Handle;

/// Entity-creation interface of the target document.
pub trait DocumentBuilder {
    /// Creates a new entity and returns its handle.
    fn create_entity(&mut self, kind: EntityKind, attributes: Attributes) -> Result<Handle>;

    /// Returns the kind of an entity, or `None` if the handle does not resolve.
    fn kind(&self, handle: Handle) -> Option<EntityKind>;

    /// Returns one attribute of an entity.
    fn get_attribute(&self, handle: Handle, name: &str) -> Option<&AttributeValue>;

    /// Sets (or replaces) one attribute of an entity.
    fn set_attribute(&mut self, handle: Handle, name: &str, value: AttributeValue) -> Result<()>;

    /// Queues an entity for removal at the end of the run.
    fn mark_for_removal(&mut self, handle: Handle);

    /// Returns `true` if the entity is queued for removal.
    fn is_pending_removal(&self, handle: Handle) -> bool;

    /// Removes every queued entity. Returns how many were removed.
    fn apply_removals(&mut self) -> usize;

    /// Returns `true` if the handle resolves.
    fn contains(&self, handle: Handle) -> bool {
        self.kind(handle).is_some()
    }

    /// Returns `true` if the handle resolves and is not queued for removal.
    fn is_live(&self, handle: Handle) -> bool {
        self.contains(handle) && !self.is_pending_removal(handle)
    }
}

/// Data stored for one entity.
#[derive(Debug, Clone)]
pub struct EntityData {
    pub kind: EntityKind,
    pub attributes: Attributes,
}

/// In-memory target document.
///
/// # Example
///
/// ```
/// use ifc_lite_export::{attrs, DocumentBuilder, EntityKind, TargetDocument};
///
/// let mut doc = TargetDocument::new();
/// let wall = doc
///     .create_entity(EntityKind::IfcWall, attrs([("Name", "W1".into())]))
///     .unwrap();
///
/// assert_eq!(doc.kind(wall), Some(EntityKind::IfcWall));
/// assert_eq!(doc.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct TargetDocument {
    pub(crate) entities: SlotMap<Handle, EntityData>,
    pending_removals: FxHashSet<Handle>,
    closed: Option<String>,
}

impl TargetDocument {
    /// Creates a new, empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a document that rejects every write.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self {
            closed: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Returns the entity data for a handle.
    pub fn entity(&self, handle: Handle) -> Option<&EntityData> {
        self.entities.get(handle)
    }

    /// Returns the number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if the document holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Iterates over all entities in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &EntityData)> {
        self.entities.iter()
    }

    /// Returns all handles of one kind, in creation order.
    pub fn entities_of_kind(&self, kind: EntityKind) -> Vec<Handle> {
        self.entities
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(h, _)| h)
            .collect()
    }

    /// Returns the number of entities queued for removal.
    pub fn pending_removal_count(&self) -> usize {
        self.pending_removals.len()
    }

    /// Returns the `GlobalId` string of an entity, if it has one.
    pub fn global_id(&self, handle: Handle) -> Option<&str> {
        self.get_attribute(handle, crate::attributes::names::GLOBAL_ID)
            .and_then(AttributeValue::as_str)
    }
}

impl DocumentBuilder for TargetDocument {
    fn create_entity(&mut self, kind: EntityKind, attributes: Attributes) -> Result<Handle> {
        if let Some(reason) = &self.closed {
            return Err(Error::DocumentUnavailable(reason.clone()));
        }
        Ok(self.entities.insert(EntityData { kind, attributes }))
    }

    fn kind(&self, handle: Handle) -> Option<EntityKind> {
        self.entities.get(handle).map(|e| e.kind)
    }

    fn get_attribute(&self, handle: Handle, name: &str) -> Option<&AttributeValue> {
        self.entities.get(handle)?.attributes.get(name)
    }

    fn set_attribute(&mut self, handle: Handle, name: &str, value: AttributeValue) -> Result<()> {
        if let Some(reason) = &self.closed {
            return Err(Error::DocumentUnavailable(reason.clone()));
        }
        let entity = self
            .entities
            .get_mut(handle)
            .ok_or(Error::HandleNotFound(handle))?;
        entity.attributes.insert(name.to_string(), value);
        Ok(())
    }

    fn mark_for_removal(&mut self, handle: Handle) {
        self.pending_removals.insert(handle);
    }

    fn is_pending_removal(&self, handle: Handle) -> bool {
        self.pending_removals.contains(&handle)
    }

    fn apply_removals(&mut self) -> usize {
        self.pending_removals
            .drain()
            .filter(|&h| self.entities.remove(h).is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{attrs, names};

    #[test]
    fn new_document_is_empty() {
        let doc = TargetDocument::new();
        assert!(doc.is_empty());
        assert_eq!(doc.len(), 0);
    }

    #[test]
    fn create_and_read_attributes() {
        let mut doc = TargetDocument::new();
        let h = doc
            .create_entity(
                EntityKind::IfcBuildingStorey,
                attrs([
                    (names::NAME, "Level 1".into()),
                    (names::ELEVATION, 3.5.into()),
                ]),
            )
            .unwrap();

        assert_eq!(doc.kind(h), Some(EntityKind::IfcBuildingStorey));
        assert_eq!(
            doc.get_attribute(h, names::ELEVATION).and_then(AttributeValue::as_f64),
            Some(3.5)
        );
        assert!(doc.get_attribute(h, names::TAG).is_none());
    }

    #[test]
    fn set_attribute_on_missing_handle_fails() {
        let mut doc = TargetDocument::new();
        let h = doc.create_entity(EntityKind::IfcWall, Attributes::new()).unwrap();
        doc.mark_for_removal(h);
        assert_eq!(doc.apply_removals(), 1);

        let err = doc.set_attribute(h, names::NAME, "x".into()).unwrap_err();
        assert!(matches!(err, Error::HandleNotFound(_)));
    }

    #[test]
    fn removals_are_deferred() {
        let mut doc = TargetDocument::new();
        let h = doc.create_entity(EntityKind::IfcWall, Attributes::new()).unwrap();
        doc.mark_for_removal(h);

        assert!(doc.contains(h));
        assert!(!doc.is_live(h));
        assert_eq!(doc.pending_removal_count(), 1);
        assert_eq!(doc.apply_removals(), 1);
        assert!(!doc.contains(h));
        assert_eq!(doc.pending_removal_count(), 0);
    }

    #[test]
    fn double_removal_counts_once() {
        let mut doc = TargetDocument::new();
        let h = doc.create_entity(EntityKind::IfcWall, Attributes::new()).unwrap();
        doc.mark_for_removal(h);
        doc.mark_for_removal(h);
        assert_eq!(doc.pending_removal_count(), 1);
        assert_eq!(doc.apply_removals(), 1);
    }

    #[test]
    fn closed_document_rejects_writes() {
        let mut doc = TargetDocument::closed("read-only file");
        let err = doc
            .create_entity(EntityKind::IfcProject, Attributes::new())
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn entities_of_kind_in_creation_order() {
        let mut doc = TargetDocument::new();
        let a = doc.create_entity(EntityKind::IfcWall, Attributes::new()).unwrap();
        doc.create_entity(EntityKind::IfcSlab, Attributes::new()).unwrap();
        let c = doc.create_entity(EntityKind::IfcWall, Attributes::new()).unwrap();

        assert_eq!(doc.entities_of_kind(EntityKind::IfcWall), vec![a, c]);
    }
}
