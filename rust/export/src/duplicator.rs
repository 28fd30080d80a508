// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Multi-level duplication.
//!
//! Stairs, ramps and railings modelled once may stand for the same element
//! repeated on several levels. After visiting, every stacking request is
//! turned into a list of vertical offsets and each offset past the first gets
//! a copy of the container and its components. Copies keep the rotation and
//! plan position of the original, move only vertically, and point at the
//! original representation; geometry is never rebuilt.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::attributes::{names, AttributeValue, Attributes};
use crate::cache::{ContainmentRole, LevelTable, ProductRecord};
use crate::config::ExportConfig;
use crate::context::RunContext;
use crate::document::DocumentBuilder;
use crate::entity::EntityKind;
use crate::error::{Error, Result};
use crate::keys::{ElementId, Handle};
use crate::placement::{
    create_local_placement, object_placement, parent_placement, place_in, read_relative,
    world_transform, Transform,
};

/// Identifier role of duplicated components.
const LEVEL_COPY_ROLE: &str = "LevelCopy";

/// Product attributes carried over to a copy.
const COPIED_ATTRIBUTES: [&str; 4] = [
    names::NAME,
    names::TAG,
    names::PREDEFINED_TYPE,
    names::REPRESENTATION,
];

/// How an element repeats vertically.
#[derive(Debug, Clone, PartialEq)]
pub enum StackPlan {
    /// `count` copies spaced `height` apart, starting at the element's level.
    Stacked { count: usize, height: f64 },
    /// One copy per listed level, offset by its elevation from the base level.
    Levels(Vec<ElementId>),
    /// Same offsets as the host element.
    FollowHost(ElementId),
}

/// A container to duplicate, recorded by the visitor.
#[derive(Debug, Clone, PartialEq)]
pub struct StackingRequest {
    pub element: ElementId,
    pub unique_id: String,
    pub container: Handle,
    pub components: Vec<Handle>,
    pub base_level: Option<ElementId>,
    pub plan: StackPlan,
}

/// The copies made for one element, primary first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StairRampContainerInfo {
    pub containers: Vec<Handle>,
    pub components: Vec<Vec<Handle>>,
    pub placements: Vec<Handle>,
}

impl StairRampContainerInfo {
    /// Number of levels the element appears on.
    pub fn level_count(&self) -> usize {
        self.containers.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Offset {
    index: usize,
    dz: f64,
    level: Option<ElementId>,
}

/// Run state after visiting.
#[derive(Debug)]
pub struct VisitedGraph {
    pub(crate) ctx: RunContext,
}

impl VisitedGraph {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }
}

/// Run state after duplication.
#[derive(Debug)]
pub struct DuplicatedGraph {
    pub(crate) ctx: RunContext,
    pub(crate) duplicates: BTreeMap<ElementId, StairRampContainerInfo>,
}

impl DuplicatedGraph {
    pub fn duplicates(&self) -> &BTreeMap<ElementId, StairRampContainerInfo> {
        &self.duplicates
    }
}

/// Runs every stacking request of the visited graph.
///
/// Per-element failures are recorded as warnings; fatal failures end the run.
pub fn duplicate(
    visited: VisitedGraph,
    doc: &mut dyn DocumentBuilder,
    config: &ExportConfig,
) -> Result<DuplicatedGraph> {
    let VisitedGraph { mut ctx } = visited;
    let (followers, primaries): (Vec<_>, Vec<_>) = std::mem::take(&mut ctx.deferred.stacking)
        .into_iter()
        .partition(|r| matches!(r.plan, StackPlan::FollowHost(_)));

    let mut offsets_by_element: FxHashMap<ElementId, Vec<Offset>> = FxHashMap::default();
    let mut duplicates = BTreeMap::new();

    for request in primaries.iter().chain(followers.iter()) {
        if !doc.is_live(request.container) {
            tracing::debug!(element = %request.element, "Stacked container is queued for removal");
            continue;
        }
        let offsets = match &request.plan {
            StackPlan::FollowHost(host) => match offsets_by_element.get(host) {
                Some(offsets) => offsets.clone(),
                None => {
                    tracing::debug!(element = %request.element, host = %host, "Host is not stacked");
                    continue;
                }
            },
            plan => offsets_for(&ctx.levels, request.base_level, plan, config.level_tolerance),
        };
        if offsets.len() < 2 {
            continue;
        }

        let mut created = Vec::new();
        match replicate(&mut ctx, doc, request, &offsets, &mut created) {
            Ok(info) => {
                ctx.stats.duplicated_containers += info.containers.len() - 1;
                ctx.stats.duplicated_components += info
                    .components
                    .iter()
                    .skip(1)
                    .map(Vec::len)
                    .sum::<usize>();
                duplicates.insert(request.element, info);
                offsets_by_element.insert(request.element, offsets);
            }
            Err(err) => {
                for handle in created {
                    doc.mark_for_removal(handle);
                }
                if err.is_fatal() {
                    return Err(err);
                }
                tracing::warn!(element = %request.element, error = %err, "Level duplication failed");
                ctx.warn(
                    request.element,
                    &request.unique_id,
                    format!("level duplication failed: {err}"),
                );
            }
        }
    }

    tracing::info!(
        elements = duplicates.len(),
        copies = ctx.stats.duplicated_containers,
        components = ctx.stats.duplicated_components,
        "Multi-level duplication complete"
    );
    Ok(DuplicatedGraph { ctx, duplicates })
}

fn offsets_for(
    levels: &LevelTable,
    base_level: Option<ElementId>,
    plan: &StackPlan,
    tolerance: f64,
) -> Vec<Offset> {
    match plan {
        StackPlan::Stacked { count, height } => {
            let base_elevation = base_level.and_then(|l| levels.get(l)).map(|l| l.elevation);
            (0..*count)
                .map(|index| {
                    let dz = index as f64 * height;
                    Offset {
                        index,
                        dz,
                        level: base_elevation.and_then(|e| levels.level_at(e + dz, tolerance)),
                    }
                })
                .collect()
        }
        StackPlan::Levels(listed) => {
            let Some(base) = base_level
                .filter(|&b| levels.contains(b))
                .or_else(|| listed.iter().copied().find(|&l| levels.contains(l)))
            else {
                return Vec::new();
            };
            let Some(base_elevation) = levels.get(base).map(|l| l.elevation) else {
                return Vec::new();
            };
            let mut offsets = vec![Offset {
                index: 0,
                dz: 0.0,
                level: Some(base),
            }];
            for &id in listed.iter().filter(|&&id| id != base) {
                if let Some(level) = levels.get(id) {
                    offsets.push(Offset {
                        index: offsets.len(),
                        dz: level.elevation - base_elevation,
                        level: Some(id),
                    });
                }
            }
            offsets
        }
        StackPlan::FollowHost(_) => Vec::new(),
    }
}

fn replicate(
    ctx: &mut RunContext,
    doc: &mut dyn DocumentBuilder,
    request: &StackingRequest,
    offsets: &[Offset],
    created: &mut Vec<Handle>,
) -> Result<StairRampContainerInfo> {
    let container = request.container;
    let kind = doc.kind(container).ok_or(Error::HandleNotFound(container))?;
    let placement = object_placement(doc, container).ok_or(Error::MissingAttribute {
        handle: container,
        name: names::OBJECT_PLACEMENT,
    })?;
    let world = world_transform(doc, placement)?;
    let original_parent = parent_placement(doc, placement);

    let components: Vec<Handle> = request
        .components
        .iter()
        .copied()
        .filter(|&component| doc.is_live(component))
        .collect();
    let frames = components
        .iter()
        .map(|&component| component_frame(doc, component))
        .collect::<Result<Vec<_>>>()?;

    let mut info = StairRampContainerInfo {
        containers: vec![container],
        components: vec![components],
        placements: vec![placement],
    };

    let mut copies = Vec::with_capacity(offsets.len() - 1);
    for offset in &offsets[1..] {
        let parent = offset
            .level
            .and_then(|l| ctx.levels.storey_for(l))
            .and_then(|storey| storey.placement)
            .or(original_parent);
        let copy_placement = place_in(doc, parent, &world.offset_z(offset.dz))?;
        created.push(copy_placement);

        let disambiguator = offset.index.to_string();
        let global_id = ctx
            .guids
            .identifier_for(&request.unique_id, kind.as_str(), Some(&disambiguator));
        let copy = copy_product(doc, container, kind, global_id.as_str(), copy_placement)?;
        created.push(copy);

        let mut parts = Vec::with_capacity(frames.len());
        for frame in &frames {
            let part_placement = create_local_placement(doc, Some(copy_placement), &frame.relative)?;
            created.push(part_placement);
            let part_id = ctx
                .guids
                .identifier_for(&frame.global_id, LEVEL_COPY_ROLE, Some(&disambiguator));
            let part = copy_product(doc, frame.handle, frame.kind, part_id.as_str(), part_placement)?;
            created.push(part);
            parts.push((frame.handle, part));
        }
        copies.push((*offset, copy, copy_placement, parts));
    }

    for (offset, copy, copy_placement, parts) in copies {
        if let Some(type_handle) = ctx.handles.type_of(container) {
            ctx.handles.add_type_instance(type_handle, copy);
        }
        ctx.deferred.copy_material(container, copy);
        for &(original, part) in &parts {
            if let Some(type_handle) = ctx.handles.type_of(original) {
                ctx.handles.add_type_instance(type_handle, part);
            }
            ctx.deferred.copy_material(original, part);
        }
        let part_handles: Vec<Handle> = parts.iter().map(|&(_, part)| part).collect();
        ctx.handles.add_parts(copy, part_handles.iter().copied());

        let on_level = offset
            .level
            .map(|level| ctx.levels.add_element(level, copy))
            .unwrap_or(false);
        if !on_level {
            ctx.handles.add_orphan(ProductRecord {
                handle: copy,
                element: Some(request.element),
                container_override: None,
                role: ContainmentRole::Element,
            });
        }

        info.containers.push(copy);
        info.components.push(part_handles);
        info.placements.push(copy_placement);
    }

    tracing::debug!(
        element = %request.element,
        levels = info.level_count(),
        components = frames.len(),
        "Duplicated across levels"
    );
    Ok(info)
}

struct ComponentFrame {
    handle: Handle,
    kind: EntityKind,
    global_id: String,
    relative: Transform,
}

fn component_frame(doc: &dyn DocumentBuilder, component: Handle) -> Result<ComponentFrame> {
    let kind = doc.kind(component).ok_or(Error::HandleNotFound(component))?;
    let placement = object_placement(doc, component).ok_or(Error::MissingAttribute {
        handle: component,
        name: names::OBJECT_PLACEMENT,
    })?;
    let global_id = doc
        .get_attribute(component, names::GLOBAL_ID)
        .and_then(AttributeValue::as_str)
        .ok_or(Error::MissingAttribute {
            handle: component,
            name: names::GLOBAL_ID,
        })?
        .to_string();
    Ok(ComponentFrame {
        handle: component,
        kind,
        global_id,
        relative: read_relative(doc, placement)?,
    })
}

/// Creates a product sharing the identity attributes and representation of
/// `source`, with a new identifier and placement.
fn copy_product(
    doc: &mut dyn DocumentBuilder,
    source: Handle,
    kind: EntityKind,
    global_id: &str,
    placement: Handle,
) -> Result<Handle> {
    let mut attributes: Attributes = COPIED_ATTRIBUTES
        .iter()
        .filter_map(|&name| {
            doc.get_attribute(source, name)
                .map(|value| (name.to_string(), value.clone()))
        })
        .collect();
    attributes.insert(names::GLOBAL_ID.to_string(), global_id.into());
    attributes.insert(names::OBJECT_PLACEMENT.to_string(), placement.into());
    doc.create_entity(kind, attributes)
}
