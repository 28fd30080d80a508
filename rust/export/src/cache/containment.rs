// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Containment cache.
//!
//! Maps each container to the members it contains or aggregates. A member can
//! have one parent only; a second insertion is refused, which is what keeps
//! assembly members and stair components out of their level.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;

use crate::entity::EntityKind;
use crate::keys::Handle;

/// Relationship used between a container and its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationKind {
    /// Spatial containment.
    Contained,
    /// Whole/part decomposition.
    Aggregated,
}

impl RelationKind {
    /// Target entity kind emitted for the relationship.
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            RelationKind::Contained => EntityKind::IfcRelContainedInSpatialStructure,
            RelationKind::Aggregated => EntityKind::IfcRelAggregates,
        }
    }
}

/// Members of one container under one relationship kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerEntry {
    pub members: BTreeSet<Handle>,
    /// The emitted relationship entity, once resolved.
    pub relation: Option<Handle>,
}

#[derive(Debug, Default, Clone)]
pub struct ContainmentCache {
    entries: BTreeMap<(Handle, RelationKind), ContainerEntry>,
    parents: FxHashMap<Handle, Handle>,
}

impl ContainmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `member` under `container`. Returns `false` if the member already
    /// has a parent or is the container itself.
    pub fn insert(&mut self, container: Handle, kind: RelationKind, member: Handle) -> bool {
        if member == container || self.parents.contains_key(&member) {
            return false;
        }
        self.parents.insert(member, container);
        self.entries
            .entry((container, kind))
            .or_default()
            .members
            .insert(member);
        true
    }

    /// The parent a member was assigned to.
    pub fn container_of(&self, member: Handle) -> Option<Handle> {
        self.parents.get(&member).copied()
    }

    pub fn has_parent(&self, member: Handle) -> bool {
        self.parents.contains_key(&member)
    }

    pub fn members(&self, container: Handle, kind: RelationKind) -> Option<&BTreeSet<Handle>> {
        self.entries.get(&(container, kind)).map(|e| &e.members)
    }

    pub fn set_relation(&mut self, container: Handle, kind: RelationKind, relation: Handle) {
        if let Some(entry) = self.entries.get_mut(&(container, kind)) {
            entry.relation = Some(relation);
        }
    }

    /// Entries in container order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, RelationKind, &ContainerEntry)> {
        self.entries.iter().map(|(&(c, k), e)| (c, k, e))
    }

    /// Number of containers with at least one member.
    pub fn container_count(&self) -> usize {
        self.entries.values().filter(|e| !e.members.is_empty()).count()
    }

    /// Number of members with a parent.
    pub fn member_count(&self) -> usize {
        self.parents.len()
    }
}
