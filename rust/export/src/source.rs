// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Source model provider.
//!
//! The exporter reads the building model through [`SourceModel`] only. Reads
//! must be idempotent: the visitor, the handlers and the duplicator may ask
//! for the same element's transform or parameters several times in one run.
//!
//! [`InMemoryModel`] is a plain implementation that can be built in code or
//! loaded from JSON.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::keys::ElementId;
use crate::placement::Transform;

/// Category tag of a source element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Wall,
    Floor,
    Roof,
    Ceiling,
    Column,
    StructuralFraming,
    Door,
    Window,
    Stair,
    StairRun,
    StairLanding,
    StairSupport,
    Ramp,
    RampRun,
    Railing,
    Room,
    Furniture,
    GenericModel,
    Duct,
    DuctFitting,
    Pipe,
    PipeFitting,
    CableTray,
    Conduit,
    Assembly,
    Group,
}

/// Visiting order bucket. Buckets are visited in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VisitPhase {
    /// Ordinary elements, which may default-contain into spatial containers.
    Element,
    /// Elements whose export depends on other elements existing (assemblies, groups).
    Container,
}

impl Category {
    /// Returns the visiting bucket of the category.
    pub fn visit_phase(&self) -> VisitPhase {
        match self {
            Category::Assembly | Category::Group => VisitPhase::Container,
            _ => VisitPhase::Element,
        }
    }

    /// Returns the snake_case name used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Wall => "wall",
            Category::Floor => "floor",
            Category::Roof => "roof",
            Category::Ceiling => "ceiling",
            Category::Column => "column",
            Category::StructuralFraming => "structural_framing",
            Category::Door => "door",
            Category::Window => "window",
            Category::Stair => "stair",
            Category::StairRun => "stair_run",
            Category::StairLanding => "stair_landing",
            Category::StairSupport => "stair_support",
            Category::Ramp => "ramp",
            Category::RampRun => "ramp_run",
            Category::Railing => "railing",
            Category::Room => "room",
            Category::Furniture => "furniture",
            Category::GenericModel => "generic_model",
            Category::Duct => "duct",
            Category::DuctFitting => "duct_fitting",
            Category::Pipe => "pipe",
            Category::PipeFitting => "pipe_fitting",
            Category::CableTray => "cable_tray",
            Category::Conduit => "conduit",
            Category::Assembly => "assembly",
            Category::Group => "group",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_ascii_lowercase()))
            .map_err(|_| format!("unknown category: {s}"))
    }
}

/// Explicit containment requested by an element, overriding its level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerOverride {
    Site,
    Building,
    Level(ElementId),
}

/// A read-only element of the source model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceElement {
    pub id: ElementId,
    /// Persistent identity, stable across sessions. Seeds every identifier.
    pub unique_id: String,
    pub category: Category,
    #[serde(default)]
    pub name: Option<String>,
    /// Finer classification used by the generic export routine.
    #[serde(default)]
    pub sub_type: Option<String>,
    /// Declared type identity.
    #[serde(default)]
    pub type_id: Option<ElementId>,
    #[serde(default)]
    pub level_id: Option<ElementId>,
    #[serde(default)]
    pub host_id: Option<ElementId>,
    #[serde(default)]
    pub assembly_id: Option<ElementId>,
    #[serde(default)]
    pub group_id: Option<ElementId>,
    #[serde(default)]
    pub containment_override: Option<ContainerOverride>,
    #[serde(default)]
    pub mirrored: bool,
    /// Geometry is per instance and never shared with siblings.
    #[serde(default)]
    pub unique_geometry: bool,
    #[serde(default = "visible_by_default")]
    pub visible: bool,
    /// Material override.
    #[serde(default)]
    pub material: Option<String>,
    /// Levels listed by a multi-story grouping construct.
    #[serde(default)]
    pub multistory_levels: Vec<ElementId>,
    /// Referenced from elsewhere, so an identifier is reserved even if filtered.
    #[serde(default)]
    pub referenced: bool,
}

fn visible_by_default() -> bool {
    true
}

impl SourceElement {
    pub fn new(id: u64, unique_id: impl Into<String>, category: Category) -> Self {
        Self {
            id: ElementId(id),
            unique_id: unique_id.into(),
            category,
            name: None,
            sub_type: None,
            type_id: None,
            level_id: None,
            host_id: None,
            assembly_id: None,
            group_id: None,
            containment_override: None,
            mirrored: false,
            unique_geometry: false,
            visible: true,
            material: None,
            multistory_levels: Vec::new(),
            referenced: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn of_type(mut self, type_id: u64) -> Self {
        self.type_id = Some(ElementId(type_id));
        self
    }

    pub fn on_level(mut self, level_id: u64) -> Self {
        self.level_id = Some(ElementId(level_id));
        self
    }

    pub fn hosted_by(mut self, host_id: u64) -> Self {
        self.host_id = Some(ElementId(host_id));
        self
    }

    pub fn in_assembly(mut self, assembly_id: u64) -> Self {
        self.assembly_id = Some(ElementId(assembly_id));
        self
    }

    pub fn in_group(mut self, group_id: u64) -> Self {
        self.group_id = Some(ElementId(group_id));
        self
    }

    pub fn with_unique_geometry(mut self) -> Self {
        self.unique_geometry = true;
        self
    }

    /// Display name, falling back to the persistent identity.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.unique_id)
    }
}

/// A vertical level of the source model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLevel {
    pub id: ElementId,
    pub unique_id: String,
    pub name: String,
    pub elevation: f64,
    /// Only storey-bearing levels become containers; the rest fold into the
    /// nearest storey below.
    #[serde(default = "storey_by_default")]
    pub is_building_storey: bool,
}

fn storey_by_default() -> bool {
    true
}

impl SourceLevel {
    pub fn storey(id: u64, name: impl Into<String>, elevation: f64) -> Self {
        Self {
            id: ElementId(id),
            unique_id: format!("level-{id}"),
            name: name.into(),
            elevation,
            is_building_storey: true,
        }
    }

    pub fn non_storey(id: u64, name: impl Into<String>, elevation: f64) -> Self {
        Self {
            is_building_storey: false,
            ..Self::storey(id, name, elevation)
        }
    }
}

/// Geodetic reference of the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeodeticInfo {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub elevation: f64,
    /// Angle of true north from the project Y axis, radians, counter-clockwise.
    #[serde(default)]
    pub true_north: f64,
}

/// Project-level information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub unique_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub building_name: Option<String>,
    #[serde(default)]
    pub site: Option<GeodeticInfo>,
}

impl ProjectInfo {
    pub fn new(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            name: None,
            building_name: None,
            site: None,
        }
    }
}

/// Geometry of an element as delivered by the source model.
///
/// Only a bounding summary travels through the exporter; turning it into
/// shape representations is the job of the representation builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryPayload {
    pub min: [f64; 3],
    pub max: [f64; 3],
    #[serde(default = "one_solid")]
    pub solids: usize,
}

fn one_solid() -> usize {
    1
}

impl GeometryPayload {
    pub fn boxed(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max, solids: 1 }
    }

    /// Payload with no solids.
    pub fn empty() -> Self {
        Self {
            min: [0.0; 3],
            max: [0.0; 3],
            solids: 0,
        }
    }

    pub fn height(&self) -> f64 {
        self.max[2] - self.min[2]
    }
}

/// Options controlling geometry extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeometryOptions {
    /// Include geometry that is hidden in the export view.
    pub include_invisible: bool,
}

/// A parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Double(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Double(d) => Some(*d),
            ParamValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            ParamValue::Double(d) if d.fract() == 0.0 => Some(*d as i64),
            ParamValue::Double(_) => None,
            ParamValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Element query passed to [`SourceModel::enumerate`].
#[derive(Debug, Clone, Default)]
pub struct ElementQuery {
    /// Restrict to these categories; `None` means all.
    pub categories: Option<Vec<Category>>,
    pub include_hidden: bool,
}

impl ElementQuery {
    pub fn matches(&self, element: &SourceElement) -> bool {
        if !self.include_hidden && !element.visible {
            return false;
        }
        match &self.categories {
            Some(categories) => categories.contains(&element.category),
            None => true,
        }
    }
}

/// Read access to the source model.
pub trait SourceModel {
    /// Project information.
    fn project(&self) -> &ProjectInfo;

    /// All vertical levels.
    fn levels(&self) -> &[SourceLevel];

    /// Top-level elements matching the query, in collection order.
    fn enumerate(&self, query: &ElementQuery) -> Vec<&SourceElement>;

    /// Looks up any element, including sub-elements.
    fn element(&self, id: ElementId) -> Option<&SourceElement>;

    /// Parts of a composite element (stair runs, landings, supports).
    fn sub_elements(&self, id: ElementId) -> Vec<&SourceElement>;

    /// Geometry of an element, or `None` if it has none.
    fn geometry(&self, id: ElementId, options: &GeometryOptions) -> Option<GeometryPayload>;

    /// World transform of an element.
    fn transform(&self, id: ElementId) -> Transform;

    /// Reads a named parameter.
    fn parameter(&self, id: ElementId, key: &str) -> Option<ParamValue>;
}

/// An element plus everything the model knows about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementRecord {
    #[serde(flatten)]
    pub element: SourceElement,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub geometry: Option<GeometryPayload>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub sub_elements: Vec<ElementRecord>,
}

impl ElementRecord {
    pub fn new(element: SourceElement) -> Self {
        Self {
            element,
            transform: Transform::identity(),
            geometry: None,
            parameters: BTreeMap::new(),
            sub_elements: Vec::new(),
        }
    }

    pub fn at(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_geometry(mut self, geometry: GeometryPayload) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_sub_element(mut self, sub: ElementRecord) -> Self {
        self.sub_elements.push(sub);
        self
    }
}

/// Serialized form of an [`InMemoryModel`].
#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    project: ProjectInfo,
    #[serde(default)]
    levels: Vec<SourceLevel>,
    #[serde(default)]
    elements: Vec<ElementRecord>,
}

#[derive(Debug, Clone)]
struct StoredElement {
    element: SourceElement,
    transform: Transform,
    geometry: Option<GeometryPayload>,
    parameters: BTreeMap<String, ParamValue>,
    children: Vec<ElementId>,
}

/// A source model held entirely in memory.
#[derive(Debug, Clone)]
pub struct InMemoryModel {
    project: ProjectInfo,
    levels: Vec<SourceLevel>,
    elements: FxHashMap<ElementId, StoredElement>,
    top_level: Vec<ElementId>,
}

impl InMemoryModel {
    pub fn new(project: ProjectInfo) -> Self {
        Self {
            project,
            levels: Vec::new(),
            elements: FxHashMap::default(),
            top_level: Vec::new(),
        }
    }

    /// Loads a model from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ModelFile = serde_json::from_str(json)?;
        let mut model = Self::new(file.project);
        for level in file.levels {
            model.add_level(level);
        }
        for record in file.elements {
            model.add(record);
        }
        Ok(model)
    }

    pub fn add_level(&mut self, level: SourceLevel) -> &mut Self {
        self.levels.push(level);
        self
    }

    /// Adds a top-level element together with its sub-elements.
    pub fn add(&mut self, record: ElementRecord) -> &mut Self {
        let id = record.element.id;
        self.store(record);
        self.top_level.push(id);
        self
    }

    /// Removes an element, leaving references to it dangling.
    pub fn remove(&mut self, id: ElementId) -> Option<SourceElement> {
        self.top_level.retain(|&e| e != id);
        self.elements.remove(&id).map(|s| s.element)
    }

    fn store(&mut self, record: ElementRecord) -> ElementId {
        let id = record.element.id;
        let children = record
            .sub_elements
            .into_iter()
            .map(|sub| self.store(sub))
            .collect();
        self.elements.insert(
            id,
            StoredElement {
                element: record.element,
                transform: record.transform,
                geometry: record.geometry,
                parameters: record.parameters,
                children,
            },
        );
        id
    }
}

impl SourceModel for InMemoryModel {
    fn project(&self) -> &ProjectInfo {
        &self.project
    }

    fn levels(&self) -> &[SourceLevel] {
        &self.levels
    }

    fn enumerate(&self, query: &ElementQuery) -> Vec<&SourceElement> {
        self.top_level
            .iter()
            .filter_map(|id| self.elements.get(id))
            .map(|s| &s.element)
            .filter(|e| query.matches(e))
            .collect()
    }

    fn element(&self, id: ElementId) -> Option<&SourceElement> {
        self.elements.get(&id).map(|s| &s.element)
    }

    fn sub_elements(&self, id: ElementId) -> Vec<&SourceElement> {
        self.elements
            .get(&id)
            .map(|s| {
                s.children
                    .iter()
                    .filter_map(|c| self.elements.get(c))
                    .map(|c| &c.element)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn geometry(&self, id: ElementId, options: &GeometryOptions) -> Option<GeometryPayload> {
        let stored = self.elements.get(&id)?;
        if !stored.element.visible && !options.include_invisible {
            return None;
        }
        stored.geometry.clone()
    }

    fn transform(&self, id: ElementId) -> Transform {
        self.elements
            .get(&id)
            .map(|s| s.transform)
            .unwrap_or_default()
    }

    fn parameter(&self, id: ElementId, key: &str) -> Option<ParamValue> {
        self.elements.get(&id)?.parameters.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InMemoryModel {
        let mut model = InMemoryModel::new(ProjectInfo::new("proj"));
        model.add_level(SourceLevel::storey(1, "L0", 0.0));
        model.add(
            ElementRecord::new(SourceElement::new(10, "stair-10", Category::Stair).on_level(1))
                .with_param("NumberOfStories", ParamValue::Int(3))
                .with_sub_element(ElementRecord::new(SourceElement::new(
                    11,
                    "run-11",
                    Category::StairRun,
                ))),
        );
        let mut hidden = SourceElement::new(20, "wall-20", Category::Wall);
        hidden.visible = false;
        model.add(ElementRecord::new(hidden).with_geometry(GeometryPayload::boxed(
            [0.0; 3],
            [1.0, 1.0, 1.0],
        )));
        model
    }

    #[test]
    fn enumerate_skips_sub_elements_and_hidden() {
        let model = sample();
        let ids: Vec<u64> = model
            .enumerate(&ElementQuery::default())
            .iter()
            .map(|e| e.id.get())
            .collect();
        assert_eq!(ids, vec![10]);

        let all = model.enumerate(&ElementQuery {
            include_hidden: true,
            ..Default::default()
        });
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn sub_elements_are_reachable() {
        let model = sample();
        let subs = model.sub_elements(ElementId(10));
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].category, Category::StairRun);
        assert!(model.element(ElementId(11)).is_some());
    }

    #[test]
    fn hidden_geometry_requires_option() {
        let model = sample();
        assert!(model.geometry(ElementId(20), &GeometryOptions::default()).is_none());
        assert!(model
            .geometry(
                ElementId(20),
                &GeometryOptions {
                    include_invisible: true
                }
            )
            .is_some());
    }

    #[test]
    fn parameter_conversions() {
        assert_eq!(ParamValue::Text(" 3 ".into()).as_int(), Some(3));
        assert_eq!(ParamValue::Double(2.0).as_int(), Some(2));
        assert_eq!(ParamValue::Double(2.5).as_int(), None);
        assert_eq!(ParamValue::Int(4).as_f64(), Some(4.0));
        assert_eq!(ParamValue::Text("Supply Air".into()).as_str(), Some("Supply Air"));
    }

    #[test]
    fn category_parsing() {
        assert_eq!("stair_run".parse(), Ok(Category::StairRun));
        assert_eq!("Wall".parse(), Ok(Category::Wall));
        assert!("spaceship".parse::<Category>().is_err());
        assert_eq!(Category::Group.visit_phase(), VisitPhase::Container);
        assert_eq!(Category::Wall.visit_phase(), VisitPhase::Element);
    }

    #[test]
    fn model_loads_from_json() {
        let json = r#"{
            "project": { "unique_id": "p-1", "site": { "latitude": 47.3, "longitude": 8.5 } },
            "levels": [ { "id": 1, "unique_id": "lvl-1", "name": "L0", "elevation": 0.0 } ],
            "elements": [
                { "id": 5, "unique_id": "w-5", "category": "wall", "level_id": 1, "type_id": 900,
                  "geometry": { "min": [0,0,0], "max": [4,0.2,3] },
                  "parameters": { "System Name": "none", "Count": 2 } }
            ]
        }"#;
        let model = InMemoryModel::from_json(json).unwrap();
        assert!(model.project().site.is_some());
        assert!(model.levels()[0].is_building_storey);

        let wall = model.element(ElementId(5)).unwrap();
        assert_eq!(wall.type_id, Some(ElementId(900)));
        assert!(wall.visible);
        assert_eq!(
            model.parameter(ElementId(5), "Count"),
            Some(ParamValue::Int(2))
        );
        assert_eq!(model.geometry(ElementId(5), &GeometryOptions::default()).unwrap().solids, 1);
    }
}
