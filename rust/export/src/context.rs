// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Run-scoped state.
//!
//! A [`RunContext`] is built when a run begins and is moved from phase to
//! phase until the run ends. Nothing in it outlives the run.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::cache::{HandleCache, LevelTable, TypeCache};
use crate::duplicator::StackingRequest;
use crate::entity::EntityKind;
use crate::guid::{GuidService, StableId};
use crate::keys::{ElementId, Handle};
use crate::placement::Transform;
use crate::source::ContainerOverride;

/// The spatial containers created when the run began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpatialChain {
    pub project: Handle,
    pub site: Option<Handle>,
    pub site_placement: Option<Handle>,
    pub building: Option<Handle>,
    pub building_placement: Option<Handle>,
}

impl SpatialChain {
    /// Container for a product without a level: the override's target when it
    /// exists, else site, then building, then project.
    pub fn fallback_container(&self, container_override: Option<ContainerOverride>) -> Handle {
        let preferred = match container_override {
            Some(ContainerOverride::Site) => self.site,
            Some(ContainerOverride::Building) => self.building,
            _ => None,
        };
        preferred
            .or(self.site)
            .or(self.building)
            .unwrap_or(self.project)
    }

    /// Placement matching [`SpatialChain::fallback_container`].
    pub fn fallback_placement(&self, container_override: Option<ContainerOverride>) -> Option<Handle> {
        let preferred = match container_override {
            Some(ContainerOverride::Site) => self.site_placement,
            Some(ContainerOverride::Building) => self.building_placement,
            _ => None,
        };
        preferred.or(self.site_placement).or(self.building_placement)
    }
}

/// Kind of system an element was tagged for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SystemKind {
    /// Ducts, pipes and their fittings.
    Distribution,
    /// Cable trays and conduits.
    Cable,
}

impl SystemKind {
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            SystemKind::Distribution => EntityKind::IfcDistributionSystem,
            SystemKind::Cable => EntityKind::IfcSystem,
        }
    }
}

/// Grouping key of a system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemKey {
    pub kind: SystemKind,
    pub name: String,
}

/// An opening to cut into a host once both exist.
#[derive(Debug, Clone, PartialEq)]
pub struct OpeningRequest {
    pub host: ElementId,
    pub filler: Handle,
    /// Persistent identity of the filling element.
    pub unique_id: String,
    pub world: Transform,
}

/// Work recorded while visiting and carried out after it.
#[derive(Debug, Default)]
pub struct DeferredWork {
    pub stacking: Vec<StackingRequest>,
    pub openings: Vec<OpeningRequest>,
    pub systems: BTreeMap<SystemKey, Vec<Handle>>,
    /// Material name to the handles associated with it.
    pub materials: BTreeMap<String, BTreeSet<Handle>>,
    /// Identifiers reserved for filtered elements that are referenced elsewhere.
    pub reserved: BTreeMap<ElementId, StableId>,
}

impl DeferredWork {
    /// Associates `copy` with every material `original` is associated with.
    pub fn copy_material(&mut self, original: Handle, copy: Handle) {
        for handles in self.materials.values_mut() {
            if handles.contains(&original) {
                handles.insert(copy);
            }
        }
    }
}

/// Counters of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub visited: usize,
    pub exported: usize,
    pub exported_empty: usize,
    pub part_of_assembly: usize,
    pub filtered: usize,
    pub failed: usize,
    pub reserved_ids: usize,
    pub type_records: usize,
    pub builder_calls: usize,
    pub duplicated_containers: usize,
    pub duplicated_components: usize,
    pub openings: usize,
    pub systems: usize,
    pub relationships: usize,
    pub stale_handles: usize,
    pub removed_entities: usize,
}

/// A contained per-element failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportWarning {
    pub element: ElementId,
    pub unique_id: String,
    pub message: String,
}

/// Everything one run owns.
#[derive(Debug)]
pub struct RunContext {
    pub project_unique_id: String,
    pub guids: GuidService,
    pub handles: HandleCache,
    pub types: TypeCache,
    pub levels: LevelTable,
    pub spatial: SpatialChain,
    pub deferred: DeferredWork,
    pub stats: RunStats,
    pub warnings: Vec<ExportWarning>,
}

impl RunContext {
    pub fn new(
        project_unique_id: impl Into<String>,
        guids: GuidService,
        levels: LevelTable,
        spatial: SpatialChain,
    ) -> Self {
        Self {
            project_unique_id: project_unique_id.into(),
            guids,
            handles: HandleCache::new(),
            types: TypeCache::new(),
            levels,
            spatial,
            deferred: DeferredWork::default(),
            stats: RunStats::default(),
            warnings: Vec::new(),
        }
    }

    /// Records a contained failure for an element.
    pub fn warn(&mut self, element: ElementId, unique_id: &str, message: impl Into<String>) {
        self.warnings.push(ExportWarning {
            element,
            unique_id: unique_id.to_string(),
            message: message.into(),
        });
    }
}
