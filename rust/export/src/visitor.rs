// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Element visitor.
//!
//! Each element goes through the same steps: filter, resolve its level
//! context, look up the handler for its category, and let the handler create
//! entities through an [`ElementContext`]. Side effects on the run (handle
//! registrations, level membership, deferred work) are staged in the context
//! and committed only when the handler succeeds. On failure every entity the
//! element created is queued for removal and the run moves on, unless the
//! failure is fatal.

use crate::attributes::{attrs, names, AttributeValue, Attributes};
use crate::cache::{ContainmentRole, LevelInfo, LookupState, ProductRecord, TypeSignature};
use crate::config::ExportConfig;
use crate::context::{OpeningRequest, RunContext, SystemKey};
use crate::document::DocumentBuilder;
use crate::duplicator::{StackPlan, StackingRequest};
use crate::entity::EntityKind;
use crate::error::{Error, Result};
use crate::geometry::{BuildConstraints, RepresentationBuilder};
use crate::guid::StableId;
use crate::handlers::HandlerRegistry;
use crate::keys::{ElementId, Handle};
use crate::placement::{place_in, Transform};
use crate::source::{
    ContainerOverride, GeometryOptions, GeometryPayload, ParamValue, SourceElement, SourceModel,
};

/// Host chains longer than this are assumed to be cyclic.
const MAX_HOST_DEPTH: usize = 16;

/// Parameter value that filters an element out.
pub const DONT_EXPORT: &str = "DontExport";

/// Terminal state of one visited element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementOutcome {
    /// Rejected by a filter. Carries the identifier reserved for it, if any.
    FilteredOut { reserved: Option<StableId> },
    ExportedEmpty(Handle),
    ExportedWithRepresentation(Handle),
    /// Exported, and owned by an assembly.
    ExportedAsPartOfAssembly(Handle),
    /// Export failed; the failure was recorded as a warning.
    Failed,
}

impl ElementOutcome {
    /// The primary handle, for exported outcomes.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            ElementOutcome::ExportedEmpty(h)
            | ElementOutcome::ExportedWithRepresentation(h)
            | ElementOutcome::ExportedAsPartOfAssembly(h) => Some(*h),
            _ => None,
        }
    }
}

/// Entity kind and predefined type an element is exported as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTarget {
    pub kind: EntityKind,
    pub predefined_type: Option<String>,
}

impl ExportTarget {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            predefined_type: None,
        }
    }

    pub fn with_predefined(kind: EntityKind, predefined_type: impl Into<String>) -> Self {
        Self {
            kind,
            predefined_type: Some(predefined_type.into()),
        }
    }
}

/// Decoded export-as parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportAs {
    DontExport,
    Target(ExportTarget),
}

/// Parses `DontExport`, `IfcSlab` or `IfcSlab.BASESLAB`.
///
/// Only product kinds are accepted; anything else yields `None`.
pub fn parse_export_as(value: &str) -> Option<ExportAs> {
    let value = value.trim();
    if value.eq_ignore_ascii_case(DONT_EXPORT) {
        return Some(ExportAs::DontExport);
    }
    let (kind, predefined) = match value.split_once('.') {
        Some((kind, predefined)) => (kind, Some(predefined.trim())),
        None => (value, None),
    };
    let kind: EntityKind = kind.parse().ok()?;
    if !kind.is_product() {
        return None;
    }
    Some(ExportAs::Target(ExportTarget {
        kind,
        predefined_type: predefined
            .filter(|p| !p.is_empty())
            .map(str::to_ascii_uppercase),
    }))
}

/// Decides whether an element is exported at all.
pub trait ExportFilter {
    fn accept(&self, element: &SourceElement, config: &ExportConfig) -> bool;
}

/// Rejects excluded categories and, unless configured otherwise, hidden elements.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFilter;

impl ExportFilter for DefaultFilter {
    fn accept(&self, element: &SourceElement, config: &ExportConfig) -> bool {
        !config.is_excluded(element.category) && (element.visible || config.export_hidden)
    }
}

/// What a handler produced for one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exported {
    pub product: Handle,
    pub has_representation: bool,
    pub role: ContainmentRole,
}

impl Exported {
    /// A product contained in its level.
    pub fn element(product: Handle, has_representation: bool) -> Self {
        Self {
            product,
            has_representation,
            role: ContainmentRole::Element,
        }
    }
}

/// Per-category export routine.
pub trait ElementHandler: Send + Sync {
    /// Default target of an element handled here.
    fn target(&self, element: &SourceElement, config: &ExportConfig) -> ExportTarget;

    /// Creates the element's entities.
    fn export(
        &self,
        cx: &mut ElementContext<'_>,
        element: &SourceElement,
        target: &ExportTarget,
    ) -> Result<Exported>;
}

#[derive(Debug, Default)]
struct Staged {
    parts: Vec<Handle>,
    registrations: Vec<(ElementId, Handle)>,
    type_instances: Vec<(Handle, Handle)>,
    materials: Vec<(String, Handle)>,
    system: Option<SystemKey>,
    openings: Vec<OpeningRequest>,
    stacking: Option<StackPlan>,
}

/// Everything a handler may touch while exporting one element.
pub struct ElementContext<'a> {
    pub model: &'a dyn SourceModel,
    pub config: &'a ExportConfig,
    doc: &'a mut dyn DocumentBuilder,
    geometry: &'a dyn RepresentationBuilder,
    run: &'a mut RunContext,
    level: Option<ElementId>,
    created: Vec<Handle>,
    staged: Staged,
}

impl<'a> ElementContext<'a> {
    /// The level the element was resolved to.
    pub fn level(&self) -> Option<ElementId> {
        self.level
    }

    pub fn level_info(&self) -> Option<&LevelInfo> {
        self.run.levels.get(self.level?)
    }

    pub fn document(&self) -> &dyn DocumentBuilder {
        &*self.doc
    }

    pub fn parameter(&self, element: ElementId, key: &str) -> Option<ParamValue> {
        self.model.parameter(element, key)
    }

    pub fn geometry_options(&self) -> GeometryOptions {
        GeometryOptions {
            include_invisible: self.config.export_hidden,
        }
    }

    pub fn payload(&self, element: ElementId) -> Option<GeometryPayload> {
        self.model.geometry(element, &self.geometry_options())
    }

    pub fn identifier(&mut self, unique_id: &str, role: &str, disambiguator: Option<&str>) -> StableId {
        self.run.guids.identifier_for(unique_id, role, disambiguator)
    }

    /// Creates an entity owned by this element.
    pub fn create(&mut self, kind: EntityKind, attributes: Attributes) -> Result<Handle> {
        let handle = self.doc.create_entity(kind, attributes)?;
        self.created.push(handle);
        Ok(handle)
    }

    /// Creates a placement for a world frame under `parent`.
    pub fn place(&mut self, parent: Option<Handle>, world: &Transform) -> Result<Handle> {
        let placement = place_in(&mut *self.doc, parent, world)?;
        self.created.push(placement);
        Ok(placement)
    }

    /// Placement of the container the element will end up in.
    pub fn container_placement(&self, element: &SourceElement) -> Option<Handle> {
        self.level
            .and_then(|level| self.run.levels.storey_for(level))
            .and_then(|storey| storey.placement)
            .or_else(|| {
                self.run
                    .spatial
                    .fallback_placement(element.containment_override)
            })
    }

    /// Creates a product entity with identity attributes and a placement.
    pub fn create_product(
        &mut self,
        element: &SourceElement,
        target: &ExportTarget,
        placement: Option<Handle>,
    ) -> Result<Handle> {
        let global_id = self.identifier(&element.unique_id, target.kind.as_str(), None);
        let mut attributes = attrs([
            (names::GLOBAL_ID, global_id.as_str().into()),
            (names::NAME, element.display_name().into()),
            (names::TAG, element.id.get().to_string().into()),
        ]);
        if let Some(predefined) = &target.predefined_type {
            attributes.insert(
                names::PREDEFINED_TYPE.to_string(),
                AttributeValue::Enum(predefined.clone()),
            );
        }
        if let Some(placement) = placement {
            attributes.insert(names::OBJECT_PLACEMENT.to_string(), placement.into());
        }
        self.create(target.kind, attributes)
    }

    /// Places a product at the element's source transform under its container.
    /// Returns the product and its placement.
    pub fn create_placed_product(
        &mut self,
        element: &SourceElement,
        target: &ExportTarget,
    ) -> Result<(Handle, Handle)> {
        let world = self.model.transform(element.id);
        let parent = self.container_placement(element);
        let placement = self.place(parent, &world)?;
        let product = self.create_product(element, target, Some(placement))?;
        Ok((product, placement))
    }

    /// Builds and attaches the body representation of `product`.
    ///
    /// Typed elements with shared geometry go through the type cache and get
    /// mapped items of the type's representation maps. Everything else calls
    /// the builder directly. Returns `true` if a representation was attached.
    pub fn export_body(
        &mut self,
        element: &SourceElement,
        target: &ExportTarget,
        product: Handle,
    ) -> Result<bool> {
        let payload = self.payload(element.id);
        let shared = if element.unique_geometry {
            None
        } else {
            target.kind.type_kind().and_then(|type_kind| {
                TypeSignature::for_element(element, target.kind, target.predefined_type.as_deref())
                    .map(|signature| (type_kind, signature))
            })
        };

        let representations = match shared {
            Some((type_kind, signature)) => self.shared_body(
                element,
                target,
                type_kind,
                &signature,
                payload.as_ref(),
                product,
            )?,
            None => {
                let constraints = BuildConstraints {
                    kind: target.kind,
                    shared: false,
                };
                let built = self
                    .geometry
                    .build(&mut *self.doc, element, payload.as_ref(), &constraints)
                    .map_err(|err| builder_error(element, err))?;
                self.run.stats.builder_calls += 1;
                self.created.extend(built.representations.iter().copied());
                if let Some(material) = built.material {
                    self.staged.materials.push((material, product));
                }
                built.representations
            }
        };

        if representations.is_empty() {
            return Ok(false);
        }
        let shape = self.create(
            EntityKind::IfcProductDefinitionShape,
            attrs([(names::REPRESENTATIONS, representations.into())]),
        )?;
        self.doc
            .set_attribute(product, names::REPRESENTATION, shape.into())?;
        Ok(true)
    }

    fn shared_body(
        &mut self,
        element: &SourceElement,
        target: &ExportTarget,
        type_kind: EntityKind,
        signature: &TypeSignature,
        payload: Option<&GeometryPayload>,
        product: Handle,
    ) -> Result<Vec<Handle>> {
        let constraints = BuildConstraints {
            kind: target.kind,
            shared: true,
        };
        let doc = &mut *self.doc;
        let geometry = self.geometry;
        let builds = self.run.types.build_count();
        let lookup = self
            .run
            .types
            .get_or_create(signature, || geometry.build(doc, element, payload, &constraints))
            .map_err(|err| builder_error(element, err))?;
        self.run.stats.builder_calls += self.run.types.build_count() - builds;

        let mut record = lookup.record;
        match record.type_handle {
            None => {
                let maps = self.representation_maps(&record.representations)?;
                let type_handle = self.create_type_object(element, target, type_kind, signature, &maps)?;
                self.run.types.attach_type(signature, type_handle, maps.clone());
                record.type_handle = Some(type_handle);
                record.representation_maps = maps;
            }
            Some(type_handle) if lookup.state == LookupState::Rebuilt => {
                let maps = self.representation_maps(&record.representations)?;
                self.doc.set_attribute(
                    type_handle,
                    names::REPRESENTATION_MAPS,
                    maps.clone().into(),
                )?;
                self.run.types.attach_type(signature, type_handle, maps.clone());
                record.representation_maps = maps;
            }
            Some(_) => {}
        }

        if let Some(type_handle) = record.type_handle {
            self.staged.type_instances.push((type_handle, product));
            if let Some(material) = record.material.clone() {
                self.staged.materials.push((material, type_handle));
            }
        }

        let mut representations = Vec::with_capacity(record.representation_maps.len());
        for map in record.representation_maps {
            let item = self.create(
                EntityKind::IfcMappedItem,
                attrs([(names::MAPPING_SOURCE, map.into())]),
            )?;
            representations.push(self.create(
                EntityKind::IfcShapeRepresentation,
                attrs([
                    ("RepresentationIdentifier", "Body".into()),
                    (names::REPRESENTATION_TYPE, "MappedRepresentation".into()),
                    (names::ITEMS, vec![item].into()),
                ]),
            )?);
        }
        Ok(representations)
    }

    // Shared definitions outlive the element that first created them, so they
    // are not tracked for rollback.
    fn representation_maps(&mut self, representations: &[Handle]) -> Result<Vec<Handle>> {
        representations
            .iter()
            .map(|&representation| {
                self.doc.create_entity(
                    EntityKind::IfcRepresentationMap,
                    attrs([(names::MAPPED_REPRESENTATION, representation.into())]),
                )
            })
            .collect()
    }

    fn create_type_object(
        &mut self,
        element: &SourceElement,
        target: &ExportTarget,
        type_kind: EntityKind,
        signature: &TypeSignature,
        maps: &[Handle],
    ) -> Result<Handle> {
        let global_id = self.identifier(&signature.key_string(), type_kind.as_str(), None);
        let name = element
            .sub_type
            .clone()
            .unwrap_or_else(|| format!("{}:{}", element.category.as_str(), signature.type_id.get()));
        let mut attributes = attrs([
            (names::GLOBAL_ID, global_id.as_str().into()),
            (names::NAME, name.into()),
            (names::REPRESENTATION_MAPS, maps.to_vec().into()),
        ]);
        if let Some(predefined) = &target.predefined_type {
            attributes.insert(
                names::PREDEFINED_TYPE.to_string(),
                AttributeValue::Enum(predefined.clone()),
            );
        }
        self.doc.create_entity(type_kind, attributes)
    }

    /// Registers a component of the element being exported.
    pub fn add_part(&mut self, element: ElementId, part: Handle) {
        self.staged.parts.push(part);
        self.staged.registrations.push((element, part));
    }

    /// Tags the element for system grouping.
    pub fn tag_system(&mut self, key: SystemKey) {
        self.staged.system = Some(key);
    }

    pub fn request_opening(&mut self, request: OpeningRequest) {
        self.staged.openings.push(request);
    }

    /// Asks for the element to be repeated on several levels.
    pub fn request_stacking(&mut self, plan: StackPlan) {
        self.staged.stacking = Some(plan);
    }

    fn rollback(self) -> usize {
        let count = self.created.len();
        for handle in self.created {
            self.doc.mark_for_removal(handle);
        }
        count
    }

    fn commit(self, element: &SourceElement, exported: Exported) -> ElementOutcome {
        let ElementContext {
            run, level, staged, ..
        } = self;
        let product = exported.product;

        run.handles.insert(element.id, product);
        for (id, handle) in staged.registrations {
            run.handles.insert(id, handle);
        }
        if let Some(plan) = staged.stacking {
            run.deferred.stacking.push(StackingRequest {
                element: element.id,
                unique_id: element.unique_id.clone(),
                container: product,
                components: staged.parts.clone(),
                base_level: level,
                plan,
            });
        }
        if !staged.parts.is_empty() {
            run.handles.add_parts(product, staged.parts);
        }
        for (type_handle, instance) in staged.type_instances {
            run.handles.add_type_instance(type_handle, instance);
        }
        for (material, handle) in staged.materials {
            run.deferred.materials.entry(material).or_default().insert(handle);
        }
        if let Some(key) = staged.system {
            run.deferred.systems.entry(key).or_default().push(product);
        }
        run.deferred.openings.extend(staged.openings);

        let registered = match (exported.role, level) {
            (ContainmentRole::Element, Some(level)) => run.levels.add_element(level, product),
            (ContainmentRole::SpatialChild, Some(level)) => run.levels.add_product(level, product),
            (ContainmentRole::Owned, _) => true,
            (_, None) => false,
        };
        if !registered {
            run.handles.add_orphan(ProductRecord {
                handle: product,
                element: Some(element.id),
                container_override: element.containment_override,
                role: exported.role,
            });
        }
        if let Some(assembly) = element.assembly_id {
            run.handles.add_assembly_member(assembly, product);
        }
        if let Some(group) = element.group_id {
            run.handles.add_group_member(group, product);
        }

        run.stats.exported += 1;
        if element.assembly_id.is_some() {
            run.stats.part_of_assembly += 1;
            ElementOutcome::ExportedAsPartOfAssembly(product)
        } else if exported.has_representation {
            ElementOutcome::ExportedWithRepresentation(product)
        } else {
            run.stats.exported_empty += 1;
            ElementOutcome::ExportedEmpty(product)
        }
    }
}

fn builder_error(element: &SourceElement, err: Error) -> Error {
    match err {
        err if err.is_fatal() => err,
        err @ Error::Representation { .. } => err,
        err => Error::Representation {
            element: element.id,
            reason: err.to_string(),
        },
    }
}

/// Resolves the level an element belongs to.
///
/// An explicit level override wins; a site or building override means no
/// level. Otherwise the element's own level is used, then its host's, up the
/// host chain.
pub fn resolve_level(
    run: &RunContext,
    model: &dyn SourceModel,
    element: &SourceElement,
) -> Option<ElementId> {
    match element.containment_override {
        Some(ContainerOverride::Level(id)) if run.levels.contains(id) => return Some(id),
        Some(ContainerOverride::Site | ContainerOverride::Building) => return None,
        _ => {}
    }
    let mut current = Some(element);
    for _ in 0..MAX_HOST_DEPTH {
        let e = current?;
        if let Some(level) = e.level_id.filter(|&l| run.levels.contains(l)) {
            return Some(level);
        }
        current = e.host_id.and_then(|host| model.element(host));
    }
    None
}

/// Visits single elements against a run.
pub struct Visitor<'a> {
    pub model: &'a dyn SourceModel,
    pub geometry: &'a dyn RepresentationBuilder,
    pub config: &'a ExportConfig,
    pub registry: &'a HandlerRegistry,
    pub filter: &'a dyn ExportFilter,
}

impl Visitor<'_> {
    /// Reads and decodes the export-as parameter of an element.
    pub fn export_as(&self, element: &SourceElement) -> Option<ExportAs> {
        let value = self
            .model
            .parameter(element.id, &self.config.export_as_parameter)?;
        let text = value.as_str()?;
        let parsed = parse_export_as(text);
        if parsed.is_none() {
            tracing::debug!(element = %element.id, value = %text, "Ignoring unknown export-as value");
        }
        parsed
    }

    /// Visits one element. Only fatal failures are returned as errors.
    pub fn visit(
        &self,
        run: &mut RunContext,
        doc: &mut dyn DocumentBuilder,
        element: &SourceElement,
    ) -> Result<ElementOutcome> {
        run.stats.visited += 1;

        let handler = self.registry.handler_for(element.category);
        let export_as = self.export_as(element);
        let target = match &export_as {
            Some(ExportAs::Target(target)) => target.clone(),
            _ => handler.target(element, self.config),
        };

        if !self.filter.accept(element, self.config) || export_as == Some(ExportAs::DontExport) {
            run.stats.filtered += 1;
            let reserved = element.referenced.then(|| {
                let id = run
                    .guids
                    .identifier_for(&element.unique_id, target.kind.as_str(), None);
                run.deferred.reserved.insert(element.id, id.clone());
                run.stats.reserved_ids += 1;
                id
            });
            tracing::debug!(element = %element.id, reserved = reserved.is_some(), "Element filtered out");
            return Ok(ElementOutcome::FilteredOut { reserved });
        }

        let level = resolve_level(run, self.model, element);
        let mut cx = ElementContext {
            model: self.model,
            config: self.config,
            doc,
            geometry: self.geometry,
            run,
            level,
            created: Vec::new(),
            staged: Staged::default(),
        };

        match handler.export(&mut cx, element, &target) {
            Ok(exported) => Ok(cx.commit(element, exported)),
            Err(err) => {
                cx.run.stats.failed += 1;
                if err.is_fatal() {
                    cx.rollback();
                    tracing::error!(element = %element.id, error = %err, "Fatal failure, aborting run");
                    return Err(err);
                }
                cx.run.warn(element.id, &element.unique_id, err.to_string());
                let removed = cx.rollback();
                tracing::warn!(
                    element = %element.id,
                    unique_id = %element.unique_id,
                    removed,
                    error = %err,
                    "Element export failed"
                );
                Ok(ElementOutcome::Failed)
            }
        }
    }
}
