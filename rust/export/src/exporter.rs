// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Export orchestration.
//!
//! An [`Exporter`] holds what is shared across runs: configuration, the
//! handler table and the export filter. Each run goes through three steps:
//!
//! 1. [`Exporter::begin_run`] creates the project, site, building and storeys
//!    and returns an [`ExportRun`] that owns every run-scoped cache.
//! 2. [`ExportRun::visit`] exports one element at a time.
//! 3. [`ExportRun::finalize_run`] duplicates stacked elements, resolves
//!    containment, applies removals and returns an [`ExportReport`].
//!
//! Dropping an `ExportRun` drops its caches; nothing leaks into the next run.
//!
//! # Example
//!
//! ```
//! use ifc_lite_export::{
//!     BoundingBoxBuilder, Category, ElementRecord, EntityKind, Exporter, ExportConfig,
//!     GeometryPayload, InMemoryModel, ProjectInfo, SourceElement, SourceLevel, TargetDocument,
//! };
//!
//! let mut model = InMemoryModel::new(ProjectInfo::new("project-1"));
//! model.add_level(SourceLevel::storey(1, "Ground", 0.0));
//! model.add(
//!     ElementRecord::new(SourceElement::new(10, "wall-10", Category::Wall).on_level(1))
//!         .with_geometry(GeometryPayload::boxed([0.0; 3], [4.0, 0.2, 3.0])),
//! );
//!
//! let exporter = Exporter::new(ExportConfig::default());
//! let mut doc = TargetDocument::new();
//! let report = exporter.export_model(&model, &mut doc, &BoundingBoxBuilder).unwrap();
//!
//! assert_eq!(report.stats.exported, 1);
//! assert_eq!(doc.entities_of_kind(EntityKind::IfcWall).len(), 1);
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use crate::attributes::{attrs, names, AttributeValue};
use crate::cache::{ContainmentCache, LevelTable};
use crate::config::ExportConfig;
use crate::context::{ExportWarning, RunContext, RunStats, SpatialChain};
use crate::document::DocumentBuilder;
use crate::duplicator::{duplicate, StairRampContainerInfo, VisitedGraph};
use crate::entity::EntityKind;
use crate::error::{Error, Result};
use crate::geometry::RepresentationBuilder;
use crate::guid::{GuidService, StableId};
use crate::handlers::HandlerRegistry;
use crate::keys::{ElementId, Handle};
use crate::placement::{create_local_placement, place_in, Transform};
use crate::resolver::resolve;
use crate::source::{ElementQuery, SourceElement, SourceModel};
use crate::visitor::{DefaultFilter, ElementOutcome, ExportFilter, Visitor};

/// Entry point of the export engine.
pub struct Exporter {
    config: ExportConfig,
    registry: HandlerRegistry,
    filter: Box<dyn ExportFilter>,
}

impl Exporter {
    /// Creates an exporter with the built-in handlers and the default filter.
    pub fn new(config: ExportConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::with_defaults(),
            filter: Box::new(DefaultFilter),
        }
    }

    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_filter(mut self, filter: impl ExportFilter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Handler table, for registering custom routines.
    pub fn registry_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.registry
    }

    /// Starts a run: creates the spatial chain and the storeys, and sets up
    /// fresh caches.
    pub fn begin_run<'a>(
        &'a self,
        model: &'a dyn SourceModel,
        doc: &'a mut dyn DocumentBuilder,
        geometry: &'a dyn RepresentationBuilder,
    ) -> Result<ExportRun<'a>> {
        let project_info = model.project();
        let mut guids = GuidService::new();
        let mut levels = LevelTable::from_source(model.levels());
        let uid = project_info.unique_id.as_str();

        let project_id = guids.identifier_for(uid, EntityKind::IfcProject.as_str(), None);
        let project_name = project_info
            .name
            .clone()
            .unwrap_or_else(|| self.config.project_name.clone());
        let project = doc.create_entity(
            EntityKind::IfcProject,
            attrs([
                (names::GLOBAL_ID, project_id.as_str().into()),
                (names::NAME, project_name.into()),
            ]),
        )?;

        let (site, site_placement) = match &project_info.site {
            Some(geo) => {
                let placement = create_local_placement(&mut *doc, None, &Transform::identity())?;
                let id = guids.identifier_for(uid, EntityKind::IfcSite.as_str(), None);
                let (sin, cos) = geo.true_north.sin_cos();
                let site = doc.create_entity(
                    EntityKind::IfcSite,
                    attrs([
                        (names::GLOBAL_ID, id.as_str().into()),
                        (names::NAME, "Default Site".into()),
                        (names::OBJECT_PLACEMENT, placement.into()),
                        (names::REF_LATITUDE, geo.latitude.into()),
                        (names::REF_LONGITUDE, geo.longitude.into()),
                        (names::REF_ELEVATION, geo.elevation.into()),
                        ("TrueNorth", AttributeValue::Real3([-sin, cos, 0.0])),
                    ]),
                )?;
                (Some(site), Some(placement))
            }
            None => (None, None),
        };

        let (building, building_placement) =
            if levels.has_storeys() || self.config.building_without_storeys {
                let placement =
                    create_local_placement(&mut *doc, site_placement, &Transform::identity())?;
                let id = guids.identifier_for(uid, EntityKind::IfcBuilding.as_str(), None);
                let name = project_info
                    .building_name
                    .clone()
                    .unwrap_or_else(|| "Default Building".to_string());
                let building = doc.create_entity(
                    EntityKind::IfcBuilding,
                    attrs([
                        (names::GLOBAL_ID, id.as_str().into()),
                        (names::NAME, name.into()),
                        (names::OBJECT_PLACEMENT, placement.into()),
                    ]),
                )?;
                (Some(building), Some(placement))
            } else {
                (None, None)
            };

        let storey_parent = building_placement.or(site_placement);
        for source in model.levels().iter().filter(|l| l.is_building_storey) {
            let placement = place_in(
                &mut *doc,
                storey_parent,
                &Transform::translation(0.0, 0.0, source.elevation),
            )?;
            let id = guids.identifier_for(
                &source.unique_id,
                EntityKind::IfcBuildingStorey.as_str(),
                None,
            );
            let storey = doc.create_entity(
                EntityKind::IfcBuildingStorey,
                attrs([
                    (names::GLOBAL_ID, id.as_str().into()),
                    (names::NAME, source.name.as_str().into()),
                    (names::OBJECT_PLACEMENT, placement.into()),
                    (names::ELEVATION, source.elevation.into()),
                ]),
            )?;
            levels.set_container(source.id, storey, placement);
        }

        let spatial = SpatialChain {
            project,
            site,
            site_placement,
            building,
            building_placement,
        };
        tracing::info!(
            project = %uid,
            levels = levels.len(),
            site = site.is_some(),
            building = building.is_some(),
            "Export run started"
        );

        Ok(ExportRun {
            exporter: self,
            model,
            doc,
            geometry,
            ctx: RunContext::new(uid, guids, levels, spatial),
            aborted: None,
        })
    }

    /// Exports every element of the model in one run.
    ///
    /// Ordinary elements are visited before assemblies and groups; within a
    /// phase the model's collection order is kept.
    pub fn export_model(
        &self,
        model: &dyn SourceModel,
        doc: &mut dyn DocumentBuilder,
        geometry: &dyn RepresentationBuilder,
    ) -> Result<ExportReport> {
        let mut run = self.begin_run(model, doc, geometry)?;
        let mut elements = model.enumerate(&ElementQuery {
            categories: None,
            include_hidden: self.config.export_hidden,
        });
        elements.sort_by_key(|e| e.category.visit_phase());
        for element in elements {
            run.visit(element)?;
        }
        run.finalize_run()
    }
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// One export run in progress.
pub struct ExportRun<'a> {
    exporter: &'a Exporter,
    model: &'a dyn SourceModel,
    doc: &'a mut dyn DocumentBuilder,
    geometry: &'a dyn RepresentationBuilder,
    ctx: RunContext,
    aborted: Option<String>,
}

impl<'a> ExportRun<'a> {
    /// Visits one element. Per-element failures come back as
    /// [`ElementOutcome::Failed`]; an error means the run is over.
    pub fn visit(&mut self, element: &SourceElement) -> Result<ElementOutcome> {
        if let Some(reason) = &self.aborted {
            return Err(Error::Aborted(reason.clone()));
        }
        let visitor = Visitor {
            model: self.model,
            geometry: self.geometry,
            config: &self.exporter.config,
            registry: &self.exporter.registry,
            filter: self.exporter.filter.as_ref(),
        };
        let outcome = visitor.visit(&mut self.ctx, &mut *self.doc, element);
        if let Err(err) = &outcome {
            self.aborted = Some(err.to_string());
        }
        outcome
    }

    /// Stops the run. Every later call fails with [`Error::Aborted`].
    pub fn abort(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(reason = %reason, "Export run aborted");
        self.aborted = Some(reason);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// The target document, for host-side edits during the run.
    pub fn document_mut(&mut self) -> &mut (dyn DocumentBuilder + 'a) {
        &mut *self.doc
    }

    /// Completes the run.
    pub fn finalize_run(self) -> Result<ExportReport> {
        let ExportRun {
            exporter,
            doc,
            ctx,
            aborted,
            ..
        } = self;
        if let Some(reason) = aborted {
            return Err(Error::Aborted(reason));
        }

        let duplicated = duplicate(VisitedGraph::new(ctx), &mut *doc, &exporter.config)?;
        let resolved = resolve(duplicated, &mut *doc)?;
        let removed = doc.apply_removals();

        let mut ctx = resolved.ctx;
        ctx.stats.removed_entities = removed;
        ctx.stats.type_records = ctx.types.len();

        let status = if ctx.warnings.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithWarnings
        };
        tracing::info!(
            status = ?status,
            visited = ctx.stats.visited,
            exported = ctx.stats.exported,
            failed = ctx.stats.failed,
            types_built = ctx.types.build_count(),
            type_hits = ctx.types.hit_count(),
            identifiers = ctx.guids.issued_count(),
            removed,
            "Export run finished"
        );

        Ok(ExportReport {
            status,
            element_handles: ctx.handles.elements(),
            type_instances: ctx.handles.type_instances().clone(),
            reserved_ids: ctx.deferred.reserved,
            spatial: ctx.spatial,
            stats: ctx.stats,
            warnings: ctx.warnings,
            containment: resolved.containment,
            duplicates: resolved.duplicates,
        })
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithWarnings,
}

/// Result of a completed run.
#[derive(Debug)]
pub struct ExportReport {
    pub status: RunStatus,
    pub stats: RunStats,
    pub warnings: Vec<ExportWarning>,
    pub spatial: SpatialChain,
    pub containment: ContainmentCache,
    pub duplicates: BTreeMap<ElementId, StairRampContainerInfo>,
    pub element_handles: BTreeMap<ElementId, Handle>,
    pub type_instances: BTreeMap<Handle, Vec<Handle>>,
    pub reserved_ids: BTreeMap<ElementId, StableId>,
}

/// Serializable digest of an [`ExportReport`].
#[derive(Debug, Serialize)]
pub struct ExportSummary<'a> {
    pub status: RunStatus,
    pub stats: &'a RunStats,
    pub warnings: &'a [ExportWarning],
    pub reserved_ids: &'a BTreeMap<ElementId, StableId>,
}

impl ExportReport {
    /// Handle of an exported element.
    pub fn handle_for(&self, element: ElementId) -> Option<Handle> {
        self.element_handles.get(&element).copied()
    }

    pub fn summary(&self) -> ExportSummary<'_> {
        ExportSummary {
            status: self.status,
            stats: &self.stats,
            warnings: &self.warnings,
            reserved_ids: &self.reserved_ids,
        }
    }
}
