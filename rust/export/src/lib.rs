// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # IFC-Lite Export
//!
//! Single-pass export engine that turns a read-only building model into an
//! IFC entity graph.
//!
//! Elements are visited one at a time and dispatched by category to an
//! export routine. Routines create entities in a [`DocumentBuilder`] and
//! record what they cannot finish yet: containment, openings, systems, type
//! and material associations. Once every element has been visited, stacked
//! stairs and ramps are copied onto the levels they repeat on, and a single
//! resolution pass gives every product exactly one spatial parent and emits
//! the relationships.
//!
//! Identifiers are derived from each element's persistent identity, so two
//! exports of the same model produce the same `GlobalId`s.
//!
//! See [`Exporter`] for the entry point.

pub mod attributes;
pub mod cache;
pub mod config;
pub mod context;
pub mod document;
pub mod duplicator;
pub mod entity;
pub mod error;
pub mod exporter;
pub mod geometry;
pub mod guid;
pub mod handlers;
pub mod keys;
pub mod placement;
pub mod resolver;
pub mod serialization;
pub mod source;
pub mod visitor;

pub use attributes::{attrs, AttributeValue, Attributes};
pub use cache::{ContainmentCache, HandleCache, LevelTable, RelationKind, TypeCache};
pub use config::{ExportConfig, GroupMode};
pub use context::{ExportWarning, RunContext, RunStats, SpatialChain};
pub use document::{DocumentBuilder, TargetDocument};
pub use duplicator::{StackPlan, StairRampContainerInfo};
pub use entity::EntityKind;
pub use error::{Error, Result};
pub use exporter::{ExportReport, ExportRun, ExportSummary, Exporter, RunStatus};
pub use geometry::{BoundingBoxBuilder, BuildConstraints, BuiltRepresentation, RepresentationBuilder};
pub use guid::{GuidService, StableId};
pub use handlers::HandlerRegistry;
pub use keys::{ElementId, Handle};
pub use placement::Transform;
pub use source::{
    Category, ContainerOverride, ElementQuery, ElementRecord, GeodeticInfo, GeometryPayload,
    InMemoryModel, ParamValue, ProjectInfo, SourceElement, SourceLevel, SourceModel,
};
pub use visitor::{ElementContext, ElementHandler, ElementOutcome, ExportFilter, ExportTarget, Exported};
