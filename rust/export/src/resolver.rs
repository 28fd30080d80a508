// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Containment resolution.
//!
//! Runs once per export, after duplication. Every exported product ends up
//! with exactly one parent: an owning assembly or aggregate if it has one,
//! otherwise the storey its level resolves to, otherwise the fallback chain
//! of site, building and project. Handles that no longer resolve in the
//! document are dropped here. The pass then emits the deferred
//! relationships: openings, type and material associations, systems and
//! groups, and one containment relationship per container.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashSet;

use crate::attributes::{attrs, names, AttributeValue};
use crate::cache::{ContainmentCache, ContainmentRole, RelationKind};
use crate::context::{OpeningRequest, RunContext};
use crate::document::DocumentBuilder;
use crate::duplicator::{DuplicatedGraph, StairRampContainerInfo};
use crate::entity::EntityKind;
use crate::error::Result;
use crate::keys::{ElementId, Handle};
use crate::placement::place_under_container;
use crate::source::ContainerOverride;

/// Run state after containment resolution.
#[derive(Debug)]
pub struct ResolvedGraph {
    pub(crate) ctx: RunContext,
    pub(crate) duplicates: BTreeMap<ElementId, StairRampContainerInfo>,
    pub(crate) containment: ContainmentCache,
}

impl ResolvedGraph {
    pub fn containment(&self) -> &ContainmentCache {
        &self.containment
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }
}

/// Resolves containment for every exported product and writes the
/// relationships into the document.
pub fn resolve(graph: DuplicatedGraph, doc: &mut dyn DocumentBuilder) -> Result<ResolvedGraph> {
    let DuplicatedGraph {
        mut ctx,
        duplicates,
    } = graph;
    let mut containment = ContainmentCache::new();

    cut_openings(&mut ctx, doc)?;
    aggregate_spatial_chain(&ctx, &mut containment);
    let owned = owned_products(&ctx, doc);
    contain_in_storeys(&mut ctx, doc, &owned, &mut containment);
    contain_orphans(&mut ctx, doc, &owned, &mut containment);
    aggregate_owners(&mut ctx, doc, &mut containment)?;
    assign_systems(&mut ctx, doc)?;
    define_types(&mut ctx, doc)?;
    associate_materials(&mut ctx, doc)?;
    emit_containment(&mut ctx, doc, &mut containment)?;

    tracing::info!(
        containers = containment.container_count(),
        members = containment.member_count(),
        relationships = ctx.stats.relationships,
        stale = ctx.stats.stale_handles,
        "Containment resolved"
    );
    Ok(ResolvedGraph {
        ctx,
        duplicates,
        containment,
    })
}

fn global_id(doc: &dyn DocumentBuilder, handle: Handle) -> String {
    doc.get_attribute(handle, names::GLOBAL_ID)
        .and_then(AttributeValue::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{handle:?}"))
}

fn alive(doc: &dyn DocumentBuilder, handles: &[Handle]) -> Vec<Handle> {
    handles.iter().copied().filter(|&h| doc.is_live(h)).collect()
}

fn relate(
    ctx: &mut RunContext,
    doc: &mut dyn DocumentBuilder,
    kind: EntityKind,
    seed: &str,
    disambiguator: Option<&str>,
    attributes: [(&'static str, AttributeValue); 2],
) -> Result<Handle> {
    let id = ctx.guids.identifier_for(seed, kind.as_str(), disambiguator);
    let mut attributes = attrs(attributes);
    attributes.insert(names::GLOBAL_ID.to_string(), id.as_str().into());
    let relation = doc.create_entity(kind, attributes)?;
    ctx.stats.relationships += 1;
    Ok(relation)
}

fn cut_openings(ctx: &mut RunContext, doc: &mut dyn DocumentBuilder) -> Result<()> {
    for request in std::mem::take(&mut ctx.deferred.openings) {
        let Some(host) = ctx
            .handles
            .handle_for(request.host)
            .filter(|&h| doc.is_live(h))
        else {
            tracing::debug!(host = %request.host, "Opening host was not exported");
            continue;
        };
        if !doc.is_live(request.filler) {
            continue;
        }
        if let Err(err) = cut_opening(ctx, doc, host, &request) {
            if err.is_fatal() {
                return Err(err);
            }
            let element = ctx.handles.element_for(request.filler).unwrap_or(request.host);
            tracing::warn!(element = %element, error = %err, "Opening could not be created");
            ctx.warn(element, &request.unique_id, format!("opening failed: {err}"));
        }
    }
    Ok(())
}

fn cut_opening(
    ctx: &mut RunContext,
    doc: &mut dyn DocumentBuilder,
    host: Handle,
    request: &OpeningRequest,
) -> Result<()> {
    let placement = place_under_container(doc, Some(host), &request.world)?;
    let id = ctx
        .guids
        .identifier_for(&request.unique_id, EntityKind::IfcOpeningElement.as_str(), None);
    let opening = doc.create_entity(
        EntityKind::IfcOpeningElement,
        attrs([
            (names::GLOBAL_ID, id.as_str().into()),
            (names::NAME, "Opening".into()),
            (names::OBJECT_PLACEMENT, placement.into()),
        ]),
    )?;
    relate(
        ctx,
        doc,
        EntityKind::IfcRelVoidsElement,
        &request.unique_id,
        None,
        [
            (names::RELATING_BUILDING_ELEMENT, host.into()),
            (names::RELATED_OPENING_ELEMENT, opening.into()),
        ],
    )?;
    relate(
        ctx,
        doc,
        EntityKind::IfcRelFillsElement,
        &request.unique_id,
        None,
        [
            (names::RELATING_OPENING_ELEMENT, opening.into()),
            (names::RELATED_BUILDING_ELEMENT, request.filler.into()),
        ],
    )?;
    ctx.stats.openings += 1;
    Ok(())
}

fn aggregate_spatial_chain(ctx: &RunContext, containment: &mut ContainmentCache) {
    let spatial = ctx.spatial;
    if let Some(site) = spatial.site {
        containment.insert(spatial.project, RelationKind::Aggregated, site);
    }
    if let Some(building) = spatial.building {
        let parent = spatial.site.unwrap_or(spatial.project);
        containment.insert(parent, RelationKind::Aggregated, building);
    }
    let storey_parent = spatial
        .building
        .or(spatial.site)
        .unwrap_or(spatial.project);
    for storey in ctx.levels.iter().filter_map(|l| l.container) {
        containment.insert(storey_parent, RelationKind::Aggregated, storey);
    }
}

/// Products that belong to an owner and never enter a spatial container.
fn owned_products(ctx: &RunContext, doc: &dyn DocumentBuilder) -> FxHashSet<Handle> {
    let mut owned = FxHashSet::default();
    let live_owner = |id: &ElementId| {
        ctx.handles
            .handle_for(*id)
            .filter(|&h| doc.is_live(h))
    };
    for (assembly, members) in ctx.handles.assembly_members() {
        if live_owner(assembly).is_some() {
            owned.extend(members.iter().copied());
        }
    }
    for (parent, parts) in ctx.handles.aggregates() {
        if doc.is_live(*parent) {
            owned.extend(parts.iter().copied());
        }
    }
    for (group, members) in ctx.handles.group_members() {
        let aggregating = live_owner(group)
            .and_then(|h| doc.kind(h))
            .is_some_and(|kind| kind == EntityKind::IfcElementAssembly);
        if aggregating {
            owned.extend(members.iter().copied());
        }
    }
    owned
}

fn place_member(
    ctx: &mut RunContext,
    doc: &dyn DocumentBuilder,
    owned: &FxHashSet<Handle>,
    containment: &mut ContainmentCache,
    container: Handle,
    kind: RelationKind,
    member: Handle,
) {
    if !doc.is_live(member) {
        ctx.stats.stale_handles += 1;
        tracing::warn!(member = ?member, "Dropping stale handle");
        return;
    }
    if owned.contains(&member) {
        return;
    }
    if !containment.insert(container, kind, member) {
        tracing::debug!(member = ?member, "Product already has a parent");
    }
}

fn contain_in_storeys(
    ctx: &mut RunContext,
    doc: &dyn DocumentBuilder,
    owned: &FxHashSet<Handle>,
    containment: &mut ContainmentCache,
) {
    let storeys: Vec<(ElementId, Handle)> = ctx
        .levels
        .iter()
        .filter_map(|l| l.container.map(|c| (l.level_id, c)))
        .collect();
    for (level, storey) in storeys {
        let (elements, products) = ctx.levels.folded_members(level);
        for member in elements {
            place_member(ctx, doc, owned, containment, storey, RelationKind::Contained, member);
        }
        for member in products {
            place_member(ctx, doc, owned, containment, storey, RelationKind::Aggregated, member);
        }
    }
}

fn contain_orphans(
    ctx: &mut RunContext,
    doc: &dyn DocumentBuilder,
    owned: &FxHashSet<Handle>,
    containment: &mut ContainmentCache,
) {
    let mut orphans: Vec<(Handle, Option<ContainerOverride>, ContainmentRole)> = ctx
        .handles
        .orphans()
        .iter()
        .map(|r| (r.handle, r.container_override, r.role))
        .collect();
    for level in ctx.levels.unresolved() {
        tracing::debug!(level = %level.level_id, "Level has no storey, members fall back");
        orphans.extend(
            level
                .related_elements
                .iter()
                .map(|&h| (h, None, ContainmentRole::Element)),
        );
        orphans.extend(
            level
                .related_products
                .iter()
                .map(|&h| (h, None, ContainmentRole::SpatialChild)),
        );
    }

    for (member, container_override, role) in orphans {
        let kind = match role {
            ContainmentRole::Element => RelationKind::Contained,
            ContainmentRole::SpatialChild => RelationKind::Aggregated,
            ContainmentRole::Owned => continue,
        };
        let container = ctx.spatial.fallback_container(container_override);
        place_member(ctx, doc, owned, containment, container, kind, member);
    }
}

fn aggregate_owners(
    ctx: &mut RunContext,
    doc: &mut dyn DocumentBuilder,
    containment: &mut ContainmentCache,
) -> Result<()> {
    let assemblies: Vec<(Handle, Vec<Handle>)> = ctx
        .handles
        .assembly_members()
        .iter()
        .filter_map(|(id, members)| {
            let assembly = ctx.handles.handle_for(*id).filter(|&h| doc.is_live(h))?;
            Some((assembly, members.clone()))
        })
        .chain(
            ctx.handles
                .aggregates()
                .iter()
                .filter(|(parent, _)| doc.is_live(**parent))
                .map(|(parent, parts)| (*parent, parts.clone())),
        )
        .collect();
    for (owner, members) in assemblies {
        for member in alive(doc, &members) {
            containment.insert(owner, RelationKind::Aggregated, member);
        }
    }

    let groups: Vec<(Handle, Vec<Handle>)> = ctx
        .handles
        .group_members()
        .iter()
        .filter_map(|(id, members)| {
            let group = ctx.handles.handle_for(*id).filter(|&h| doc.is_live(h))?;
            Some((group, members.clone()))
        })
        .collect();
    for (group, members) in groups {
        let members = alive(doc, &members);
        if members.is_empty() {
            continue;
        }
        if doc.kind(group) == Some(EntityKind::IfcElementAssembly) {
            for member in members {
                containment.insert(group, RelationKind::Aggregated, member);
            }
            continue;
        }
        let seed = global_id(doc, group);
        relate(
            ctx,
            doc,
            EntityKind::IfcRelAssignsToGroup,
            &seed,
            None,
            [
                (names::RELATING_GROUP, group.into()),
                (names::RELATED_OBJECTS, members.into()),
            ],
        )?;
    }
    Ok(())
}

fn assign_systems(ctx: &mut RunContext, doc: &mut dyn DocumentBuilder) -> Result<()> {
    for (key, members) in std::mem::take(&mut ctx.deferred.systems) {
        let members = alive(doc, &members);
        if members.is_empty() {
            continue;
        }
        let kind = key.kind.entity_kind();
        let id = ctx
            .guids
            .identifier_for(&ctx.project_unique_id, kind.as_str(), Some(&key.name));
        let system = doc.create_entity(
            kind,
            attrs([
                (names::GLOBAL_ID, id.as_str().into()),
                (names::NAME, key.name.as_str().into()),
            ]),
        )?;
        relate(
            ctx,
            doc,
            EntityKind::IfcRelAssignsToGroup,
            id.as_str(),
            None,
            [
                (names::RELATING_GROUP, system.into()),
                (names::RELATED_OBJECTS, members.into()),
            ],
        )?;
        if let Some(building) = ctx.spatial.building {
            relate(
                ctx,
                doc,
                EntityKind::IfcRelServicesBuildings,
                id.as_str(),
                None,
                [
                    (names::RELATING_SYSTEM, system.into()),
                    (names::RELATED_BUILDINGS, vec![building].into()),
                ],
            )?;
        }
        ctx.stats.systems += 1;
    }
    Ok(())
}

fn define_types(ctx: &mut RunContext, doc: &mut dyn DocumentBuilder) -> Result<()> {
    let types: Vec<(Handle, Vec<Handle>)> = ctx
        .handles
        .type_instances()
        .iter()
        .filter(|(type_handle, _)| doc.is_live(**type_handle))
        .map(|(type_handle, instances)| (*type_handle, alive(doc, instances)))
        .filter(|(_, instances)| !instances.is_empty())
        .collect();
    for (type_handle, instances) in types {
        let seed = global_id(doc, type_handle);
        relate(
            ctx,
            doc,
            EntityKind::IfcRelDefinesByType,
            &seed,
            None,
            [
                (names::RELATING_TYPE, type_handle.into()),
                (names::RELATED_OBJECTS, instances.into()),
            ],
        )?;
    }
    Ok(())
}

fn associate_materials(ctx: &mut RunContext, doc: &mut dyn DocumentBuilder) -> Result<()> {
    let materials: BTreeMap<String, BTreeSet<Handle>> = std::mem::take(&mut ctx.deferred.materials);
    for (name, handles) in materials {
        let related: Vec<Handle> = handles.into_iter().filter(|&h| doc.is_live(h)).collect();
        if related.is_empty() {
            continue;
        }
        let material = doc.create_entity(
            EntityKind::IfcMaterial,
            attrs([(names::NAME, name.as_str().into())]),
        )?;
        let seed = ctx.project_unique_id.clone();
        relate(
            ctx,
            doc,
            EntityKind::IfcRelAssociatesMaterial,
            &seed,
            Some(&name),
            [
                (names::RELATING_MATERIAL, material.into()),
                (names::RELATED_OBJECTS, related.into()),
            ],
        )?;
    }
    Ok(())
}

fn emit_containment(
    ctx: &mut RunContext,
    doc: &mut dyn DocumentBuilder,
    containment: &mut ContainmentCache,
) -> Result<()> {
    let entries: Vec<(Handle, RelationKind, Vec<Handle>)> = containment
        .iter()
        .filter(|(_, _, entry)| !entry.members.is_empty())
        .map(|(container, kind, entry)| (container, kind, entry.members.iter().copied().collect()))
        .collect();
    for (container, kind, members) in entries {
        let (relating, related) = match kind {
            RelationKind::Contained => (names::RELATING_STRUCTURE, names::RELATED_ELEMENTS),
            RelationKind::Aggregated => (names::RELATING_OBJECT, names::RELATED_OBJECTS),
        };
        let seed = global_id(doc, container);
        let relation = relate(
            ctx,
            doc,
            kind.entity_kind(),
            &seed,
            None,
            [(relating, container.into()), (related, members.into())],
        )?;
        containment.set_relation(container, kind, relation);
    }
    Ok(())
}
