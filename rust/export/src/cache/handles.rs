// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handle cache: source identity ↔ target handles, plus the auxiliary
//! membership maps filled while visiting.

use std::collections::hash_map::Entry;
use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::keys::{ElementId, Handle};
use crate::source::ContainerOverride;

/// How a product takes part in spatial structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainmentRole {
    /// Contained in a spatial container (walls, doors, stairs).
    Element,
    /// Aggregated under a spatial container (spaces).
    SpatialChild,
    /// Owned by another product; never placed in a spatial container.
    Owned,
}

/// A product that was exported without a resolvable level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductRecord {
    pub handle: Handle,
    pub element: Option<ElementId>,
    pub container_override: Option<ContainerOverride>,
    pub role: ContainmentRole,
}

/// Bidirectional element/handle map with membership side tables.
#[derive(Debug, Default)]
pub struct HandleCache {
    by_element: FxHashMap<ElementId, Handle>,
    by_handle: FxHashMap<Handle, ElementId>,
    type_instances: BTreeMap<Handle, Vec<Handle>>,
    instance_type: FxHashMap<Handle, Handle>,
    aggregates: BTreeMap<Handle, Vec<Handle>>,
    assembly_members: BTreeMap<ElementId, Vec<Handle>>,
    group_members: BTreeMap<ElementId, Vec<Handle>>,
    orphans: Vec<ProductRecord>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the primary handle of an element.
    pub fn insert(&mut self, element: ElementId, handle: Handle) {
        self.by_element.insert(element, handle);
        self.by_handle.insert(handle, element);
    }

    pub fn handle_for(&self, element: ElementId) -> Option<Handle> {
        self.by_element.get(&element).copied()
    }

    pub fn element_for(&self, handle: Handle) -> Option<ElementId> {
        self.by_handle.get(&handle).copied()
    }

    /// Number of registered elements.
    pub fn len(&self) -> usize {
        self.by_element.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_element.is_empty()
    }

    /// All element registrations, ordered by element id.
    pub fn elements(&self) -> BTreeMap<ElementId, Handle> {
        self.by_element.iter().map(|(&e, &h)| (e, h)).collect()
    }

    /// Relates an instance to its type object. The first type an instance
    /// is related to is kept.
    pub fn add_type_instance(&mut self, type_handle: Handle, instance: Handle) {
        if let Entry::Vacant(entry) = self.instance_type.entry(instance) {
            entry.insert(type_handle);
            self.type_instances.entry(type_handle).or_default().push(instance);
        }
    }

    pub fn type_of(&self, instance: Handle) -> Option<Handle> {
        self.instance_type.get(&instance).copied()
    }

    pub fn type_instances(&self) -> &BTreeMap<Handle, Vec<Handle>> {
        &self.type_instances
    }

    /// Records `parts` as components of the aggregate `parent`.
    pub fn add_parts(&mut self, parent: Handle, parts: impl IntoIterator<Item = Handle>) {
        self.aggregates.entry(parent).or_default().extend(parts);
    }

    pub fn parts_of(&self, parent: Handle) -> &[Handle] {
        self.aggregates.get(&parent).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn aggregates(&self) -> &BTreeMap<Handle, Vec<Handle>> {
        &self.aggregates
    }

    pub fn add_assembly_member(&mut self, assembly: ElementId, member: Handle) {
        self.assembly_members.entry(assembly).or_default().push(member);
    }

    pub fn assembly_members(&self) -> &BTreeMap<ElementId, Vec<Handle>> {
        &self.assembly_members
    }

    pub fn add_group_member(&mut self, group: ElementId, member: Handle) {
        self.group_members.entry(group).or_default().push(member);
    }

    pub fn group_members(&self) -> &BTreeMap<ElementId, Vec<Handle>> {
        &self.group_members
    }

    /// Records a product that has no level; the resolver picks its container.
    pub fn add_orphan(&mut self, record: ProductRecord) {
        self.orphans.push(record);
    }

    pub fn orphans(&self) -> &[ProductRecord] {
        &self.orphans
    }
}
