// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed attribute values stored on target entities.

use std::collections::BTreeMap;

use crate::keys::Handle;

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    /// Enumeration literal, e.g. `.USERDEFINED.`.
    Enum(String),
    /// Three reals (a point or a direction).
    Real3([f64; 3]),
    Ref(Handle),
    RefList(Vec<Handle>),
    List(Vec<AttributeValue>),
}

/// Attribute map of one entity, ordered by name for stable output.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Builds an attribute map from `(name, value)` pairs.
pub fn attrs<I>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (&'static str, AttributeValue)>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

impl AttributeValue {
    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            AttributeValue::Ref(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_handle_list(&self) -> Option<&[Handle]> {
        match self {
            AttributeValue::RefList(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Double(v) => Some(*v),
            AttributeValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) | AttributeValue::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_real3(&self) -> Option<[f64; 3]> {
        match self {
            AttributeValue::Real3(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns every handle this value references.
    pub fn handles(&self) -> Vec<Handle> {
        match self {
            AttributeValue::Ref(h) => vec![*h],
            AttributeValue::RefList(list) => list.clone(),
            AttributeValue::List(items) => items.iter().flat_map(|v| v.handles()).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Double(v)
    }
}

impl From<Handle> for AttributeValue {
    fn from(h: Handle) -> Self {
        AttributeValue::Ref(h)
    }
}

impl From<Vec<Handle>> for AttributeValue {
    fn from(list: Vec<Handle>) -> Self {
        AttributeValue::RefList(list)
    }
}

/// Attribute names used by the exporter.
pub mod names {
    pub const GLOBAL_ID: &str = "GlobalId";
    pub const NAME: &str = "Name";
    pub const TAG: &str = "Tag";
    pub const PREDEFINED_TYPE: &str = "PredefinedType";
    pub const OBJECT_PLACEMENT: &str = "ObjectPlacement";
    pub const REPRESENTATION: &str = "Representation";
    pub const REPRESENTATIONS: &str = "Representations";
    pub const REPRESENTATION_MAPS: &str = "RepresentationMaps";
    pub const MAPPED_REPRESENTATION: &str = "MappedRepresentation";
    pub const MAPPING_SOURCE: &str = "MappingSource";
    pub const REPRESENTATION_TYPE: &str = "RepresentationType";
    pub const ITEMS: &str = "Items";
    pub const PLACEMENT_REL_TO: &str = "PlacementRelTo";
    pub const LOCATION: &str = "Location";
    pub const AXIS: &str = "Axis";
    pub const REF_DIRECTION: &str = "RefDirection";
    pub const ELEVATION: &str = "Elevation";
    pub const REF_LATITUDE: &str = "RefLatitude";
    pub const REF_LONGITUDE: &str = "RefLongitude";
    pub const REF_ELEVATION: &str = "RefElevation";
    pub const RELATING_OBJECT: &str = "RelatingObject";
    pub const RELATED_OBJECTS: &str = "RelatedObjects";
    pub const RELATING_STRUCTURE: &str = "RelatingStructure";
    pub const RELATED_ELEMENTS: &str = "RelatedElements";
    pub const RELATING_TYPE: &str = "RelatingType";
    pub const RELATING_GROUP: &str = "RelatingGroup";
    pub const RELATING_SYSTEM: &str = "RelatingSystem";
    pub const RELATED_BUILDINGS: &str = "RelatedBuildings";
    pub const RELATING_MATERIAL: &str = "RelatingMaterial";
    pub const RELATING_BUILDING_ELEMENT: &str = "RelatingBuildingElement";
    pub const RELATED_OPENING_ELEMENT: &str = "RelatedOpeningElement";
    pub const RELATING_OPENING_ELEMENT: &str = "RelatingOpeningElement";
    pub const RELATED_BUILDING_ELEMENT: &str = "RelatedBuildingElement";
}
