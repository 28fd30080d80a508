// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-category export routines and the dispatch table that selects them.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::attributes::{attrs, names};
use crate::cache::ContainmentRole;
use crate::config::{ExportConfig, GroupMode};
use crate::context::{OpeningRequest, SystemKey, SystemKind};
use crate::duplicator::StackPlan;
use crate::entity::EntityKind;
use crate::error::Result;
use crate::source::{Category, SourceElement};
use crate::visitor::{ElementContext, ElementHandler, ExportTarget, Exported};

/// Maps a category and optional sub-type to the default export target.
pub fn default_target(category: Category, sub_type: Option<&str>) -> ExportTarget {
    use EntityKind::*;

    let (kind, predefined) = match (category, sub_type.map(str::to_ascii_lowercase).as_deref()) {
        (Category::StructuralFraming, Some("brace")) => (IfcMember, Some("BRACE")),
        (Category::Wall, _) => (IfcWall, None),
        (Category::Floor, _) => (IfcSlab, Some("FLOOR")),
        (Category::Roof, _) => (IfcRoof, None),
        (Category::Ceiling, _) => (IfcCovering, Some("CEILING")),
        (Category::Column, _) => (IfcColumn, None),
        (Category::StructuralFraming, _) => (IfcBeam, None),
        (Category::Door, _) => (IfcDoor, None),
        (Category::Window, _) => (IfcWindow, None),
        (Category::Stair, _) => (IfcStair, None),
        (Category::StairRun, _) => (IfcStairFlight, None),
        (Category::StairLanding, _) => (IfcSlab, Some("LANDING")),
        (Category::StairSupport, _) => (IfcMember, Some("STRINGER")),
        (Category::Ramp, _) => (IfcRamp, None),
        (Category::RampRun, _) => (IfcRampFlight, None),
        (Category::Railing, _) => (IfcRailing, None),
        (Category::Room, _) => (IfcSpace, None),
        (Category::Furniture, _) => (IfcFurnishingElement, None),
        (Category::GenericModel, _) => (IfcBuildingElementProxy, None),
        (Category::Duct, _) => (IfcDuctSegment, None),
        (Category::DuctFitting, _) => (IfcDuctFitting, None),
        (Category::Pipe, _) => (IfcPipeSegment, None),
        (Category::PipeFitting, _) => (IfcPipeFitting, None),
        (Category::CableTray, _) => (IfcCableCarrierSegment, Some("CABLETRAYSEGMENT")),
        (Category::Conduit, _) => (IfcCableCarrierSegment, Some("CONDUITSEGMENT")),
        (Category::Assembly, _) => (IfcElementAssembly, None),
        (Category::Group, _) => (IfcGroup, None),
    };
    ExportTarget {
        kind,
        predefined_type: predefined.map(str::to_string),
    }
}

/// Stacking plan read from an element's parameters, if it repeats vertically.
fn stacking_plan(cx: &ElementContext<'_>, element: &SourceElement) -> Option<StackPlan> {
    let stories = cx
        .parameter(element.id, &cx.config.number_of_stories_parameter)
        .and_then(|v| v.as_int())
        .unwrap_or(1);
    if stories > 1 {
        let height = cx
            .parameter(element.id, &cx.config.flight_height_parameter)
            .and_then(|v| v.as_f64())
            .or_else(|| cx.level_info().and_then(|l| l.height))
            .or_else(|| cx.payload(element.id).map(|g| g.height()))
            .filter(|h| *h > 0.0);
        match height {
            Some(height) => {
                return Some(StackPlan::Stacked {
                    count: stories as usize,
                    height,
                })
            }
            None => {
                tracing::warn!(element = %element.id, stories, "No flight height, not stacking");
            }
        }
    }
    if !element.multistory_levels.is_empty() {
        return Some(StackPlan::Levels(element.multistory_levels.clone()));
    }
    None
}

/// Generic routine: placed product with a body representation.
#[derive(Debug, Default)]
pub struct BuildingElementHandler;

impl ElementHandler for BuildingElementHandler {
    fn target(&self, element: &SourceElement, _config: &ExportConfig) -> ExportTarget {
        default_target(element.category, element.sub_type.as_deref())
    }

    fn export(
        &self,
        cx: &mut ElementContext<'_>,
        element: &SourceElement,
        target: &ExportTarget,
    ) -> Result<Exported> {
        let (product, _) = cx.create_placed_product(element, target)?;
        let has_representation = cx.export_body(element, target, product)?;
        Ok(Exported::element(product, has_representation))
    }
}

/// Doors and windows. A hosted insert asks for an opening in its host.
#[derive(Debug, Default)]
pub struct InsertHandler;

impl ElementHandler for InsertHandler {
    fn target(&self, element: &SourceElement, _config: &ExportConfig) -> ExportTarget {
        default_target(element.category, None)
    }

    fn export(
        &self,
        cx: &mut ElementContext<'_>,
        element: &SourceElement,
        target: &ExportTarget,
    ) -> Result<Exported> {
        let (product, _) = cx.create_placed_product(element, target)?;
        let has_representation = cx.export_body(element, target, product)?;
        if let Some(host) = element.host_id {
            let world = cx.model.transform(element.id);
            cx.request_opening(OpeningRequest {
                host,
                filler: product,
                unique_id: element.unique_id.clone(),
                world,
            });
        }
        Ok(Exported::element(product, has_representation))
    }
}

/// Duct and pipe segments and fittings, grouped by their system parameter.
#[derive(Debug, Default)]
pub struct MepHandler;

impl ElementHandler for MepHandler {
    fn target(&self, element: &SourceElement, _config: &ExportConfig) -> ExportTarget {
        default_target(element.category, element.sub_type.as_deref())
    }

    fn export(
        &self,
        cx: &mut ElementContext<'_>,
        element: &SourceElement,
        target: &ExportTarget,
    ) -> Result<Exported> {
        let (product, _) = cx.create_placed_product(element, target)?;
        let has_representation = cx.export_body(element, target, product)?;
        let system = cx
            .parameter(element.id, &cx.config.system_parameter)
            .and_then(|v| v.as_str().map(str::trim).map(str::to_string))
            .filter(|name| !name.is_empty());
        if let Some(name) = system {
            cx.tag_system(SystemKey {
                kind: SystemKind::Distribution,
                name,
            });
        }
        Ok(Exported::element(product, has_representation))
    }
}

/// Cable trays and conduits. Untagged elements fall into a system named after
/// their sub-type or category.
#[derive(Debug, Default)]
pub struct CableHandler;

impl ElementHandler for CableHandler {
    fn target(&self, element: &SourceElement, _config: &ExportConfig) -> ExportTarget {
        default_target(element.category, None)
    }

    fn export(
        &self,
        cx: &mut ElementContext<'_>,
        element: &SourceElement,
        target: &ExportTarget,
    ) -> Result<Exported> {
        let (product, _) = cx.create_placed_product(element, target)?;
        let has_representation = cx.export_body(element, target, product)?;
        let name = cx
            .parameter(element.id, &cx.config.system_parameter)
            .and_then(|v| v.as_str().map(str::trim).map(str::to_string))
            .filter(|name| !name.is_empty())
            .or_else(|| element.sub_type.clone())
            .unwrap_or_else(|| element.category.as_str().to_string());
        cx.tag_system(SystemKey {
            kind: SystemKind::Cable,
            name,
        });
        Ok(Exported::element(product, has_representation))
    }
}

/// Stairs and ramps: a container aggregating runs, landings and supports.
#[derive(Debug, Default)]
pub struct StairHandler;

impl StairHandler {
    fn component_target(sub: &SourceElement) -> ExportTarget {
        default_target(sub.category, None)
    }
}

impl ElementHandler for StairHandler {
    fn target(&self, element: &SourceElement, _config: &ExportConfig) -> ExportTarget {
        default_target(element.category, None)
    }

    fn export(
        &self,
        cx: &mut ElementContext<'_>,
        element: &SourceElement,
        target: &ExportTarget,
    ) -> Result<Exported> {
        let (product, placement) = cx.create_placed_product(element, target)?;

        let model = cx.model;
        let subs = model.sub_elements(element.id);
        let mut has_representation = false;
        for sub in &subs {
            let sub_target = Self::component_target(sub);
            let world = model.transform(sub.id);
            let sub_placement = cx.place(Some(placement), &world)?;
            let component = cx.create_product(sub, &sub_target, Some(sub_placement))?;
            has_representation |= cx.export_body(sub, &sub_target, component)?;
            cx.add_part(sub.id, component);
        }
        if subs.is_empty() {
            has_representation = cx.export_body(element, target, product)?;
        }

        if let Some(plan) = stacking_plan(cx, element) {
            cx.request_stacking(plan);
        }
        Ok(Exported::element(product, has_representation))
    }
}

/// Railings. One hosted by a stair or ramp repeats wherever its host does.
#[derive(Debug, Default)]
pub struct RailingHandler;

impl ElementHandler for RailingHandler {
    fn target(&self, element: &SourceElement, _config: &ExportConfig) -> ExportTarget {
        default_target(element.category, element.sub_type.as_deref())
    }

    fn export(
        &self,
        cx: &mut ElementContext<'_>,
        element: &SourceElement,
        target: &ExportTarget,
    ) -> Result<Exported> {
        let (product, _) = cx.create_placed_product(element, target)?;
        let has_representation = cx.export_body(element, target, product)?;

        let stair_host = element
            .host_id
            .and_then(|host| cx.model.element(host))
            .filter(|host| matches!(host.category, Category::Stair | Category::Ramp))
            .map(|host| host.id);
        let plan = match stair_host {
            Some(host) => Some(StackPlan::FollowHost(host)),
            None => stacking_plan(cx, element),
        };
        if let Some(plan) = plan {
            cx.request_stacking(plan);
        }
        Ok(Exported::element(product, has_representation))
    }
}

/// Spaces, aggregated by their storey.
#[derive(Debug, Default)]
pub struct RoomHandler;

impl ElementHandler for RoomHandler {
    fn target(&self, element: &SourceElement, _config: &ExportConfig) -> ExportTarget {
        default_target(element.category, None)
    }

    fn export(
        &self,
        cx: &mut ElementContext<'_>,
        element: &SourceElement,
        target: &ExportTarget,
    ) -> Result<Exported> {
        let (product, _) = cx.create_placed_product(element, target)?;
        let has_representation = cx.export_body(element, target, product)?;
        Ok(Exported {
            product,
            has_representation,
            role: ContainmentRole::SpatialChild,
        })
    }
}

/// Assemblies. Members register themselves and are aggregated on resolution.
#[derive(Debug, Default)]
pub struct AssemblyHandler;

impl ElementHandler for AssemblyHandler {
    fn target(&self, element: &SourceElement, _config: &ExportConfig) -> ExportTarget {
        default_target(element.category, None)
    }

    fn export(
        &self,
        cx: &mut ElementContext<'_>,
        element: &SourceElement,
        target: &ExportTarget,
    ) -> Result<Exported> {
        let (product, _) = cx.create_placed_product(element, target)?;
        let has_representation = cx.export_body(element, target, product)?;
        Ok(Exported::element(product, has_representation))
    }
}

/// Groups, as a plain collection or as an owning assembly.
#[derive(Debug, Default)]
pub struct GroupHandler;

impl ElementHandler for GroupHandler {
    fn target(&self, _element: &SourceElement, config: &ExportConfig) -> ExportTarget {
        match config.group_mode {
            GroupMode::Collection => ExportTarget::new(EntityKind::IfcGroup),
            GroupMode::Aggregate => ExportTarget::new(EntityKind::IfcElementAssembly),
        }
    }

    fn export(
        &self,
        cx: &mut ElementContext<'_>,
        element: &SourceElement,
        target: &ExportTarget,
    ) -> Result<Exported> {
        if !target.kind.is_group() {
            let (product, _) = cx.create_placed_product(element, target)?;
            return Ok(Exported::element(product, false));
        }
        let global_id = cx.identifier(&element.unique_id, target.kind.as_str(), None);
        let group = cx.create(
            target.kind,
            attrs([
                (names::GLOBAL_ID, global_id.as_str().into()),
                (names::NAME, element.display_name().into()),
            ]),
        )?;
        Ok(Exported {
            product: group,
            has_representation: false,
            role: ContainmentRole::Owned,
        })
    }
}

/// Category → handler dispatch table.
pub struct HandlerRegistry {
    handlers: FxHashMap<Category, Arc<dyn ElementHandler>>,
    fallback: Arc<dyn ElementHandler>,
}

impl HandlerRegistry {
    /// Creates an empty table that sends everything to `fallback`.
    pub fn new(fallback: Arc<dyn ElementHandler>) -> Self {
        Self {
            handlers: FxHashMap::default(),
            fallback,
        }
    }

    /// Creates the table with the built-in routines.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new(Arc::new(BuildingElementHandler));

        let insert: Arc<dyn ElementHandler> = Arc::new(InsertHandler);
        let mep: Arc<dyn ElementHandler> = Arc::new(MepHandler);
        let cable: Arc<dyn ElementHandler> = Arc::new(CableHandler);
        let stair: Arc<dyn ElementHandler> = Arc::new(StairHandler);

        registry.register_shared(&[Category::Door, Category::Window], &insert);
        registry.register_shared(
            &[
                Category::Duct,
                Category::DuctFitting,
                Category::Pipe,
                Category::PipeFitting,
            ],
            &mep,
        );
        registry.register_shared(&[Category::CableTray, Category::Conduit], &cable);
        registry.register_shared(&[Category::Stair, Category::Ramp], &stair);
        registry.register(Category::Railing, Arc::new(RailingHandler));
        registry.register(Category::Room, Arc::new(RoomHandler));
        registry.register(Category::Assembly, Arc::new(AssemblyHandler));
        registry.register(Category::Group, Arc::new(GroupHandler));

        registry
    }

    /// Registers a handler, returning the one it replaces.
    pub fn register(
        &mut self,
        category: Category,
        handler: Arc<dyn ElementHandler>,
    ) -> Option<Arc<dyn ElementHandler>> {
        self.handlers.insert(category, handler)
    }

    fn register_shared(&mut self, categories: &[Category], handler: &Arc<dyn ElementHandler>) {
        for &category in categories {
            self.handlers.insert(category, Arc::clone(handler));
        }
    }

    /// The handler for a category, or the fallback.
    pub fn handler_for(&self, category: Category) -> &dyn ElementHandler {
        self.handlers
            .get(&category)
            .unwrap_or(&self.fallback)
            .as_ref()
    }

    pub fn has_handler(&self, category: Category) -> bool {
        self.handlers.contains_key(&category)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut categories: Vec<&str> = self.handlers.keys().map(|c| c.as_str()).collect();
        categories.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("categories", &categories)
            .finish()
    }
}
