// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Representation builder interface.
//!
//! Turning source geometry into shape representations (tessellation, swept
//! solids, clipping) happens outside the exporter. The builder is handed an
//! element and its geometry payload and returns zero or more representation
//! handles it created in the document. It must be a pure function of its
//! inputs; the type cache relies on that to reuse results.

use crate::attributes::{attrs, names, AttributeValue};
use crate::document::DocumentBuilder;
use crate::entity::EntityKind;
use crate::error::Result;
use crate::keys::Handle;
use crate::source::{GeometryPayload, SourceElement};

/// Constraints passed to the builder.
#[derive(Debug, Clone, Copy)]
pub struct BuildConstraints {
    /// Entity kind the representation is for.
    pub kind: EntityKind,
    /// `true` when the result becomes a shared type definition.
    pub shared: bool,
}

/// Output of one builder call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltRepresentation {
    pub representations: Vec<Handle>,
    pub material: Option<String>,
    pub profile: Option<String>,
}

impl BuiltRepresentation {
    pub fn is_empty(&self) -> bool {
        self.representations.is_empty()
    }
}

/// Geometry collaborator.
pub trait RepresentationBuilder {
    fn build(
        &self,
        doc: &mut dyn DocumentBuilder,
        element: &SourceElement,
        payload: Option<&GeometryPayload>,
        constraints: &BuildConstraints,
    ) -> Result<BuiltRepresentation>;
}

/// Emits one axis-aligned bounding box representation per payload.
///
/// Payloads without solids or with zero extent produce nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundingBoxBuilder;

impl RepresentationBuilder for BoundingBoxBuilder {
    fn build(
        &self,
        doc: &mut dyn DocumentBuilder,
        element: &SourceElement,
        payload: Option<&GeometryPayload>,
        _constraints: &BuildConstraints,
    ) -> Result<BuiltRepresentation> {
        let Some(payload) = payload else {
            return Ok(BuiltRepresentation::default());
        };
        let extent = [
            payload.max[0] - payload.min[0],
            payload.max[1] - payload.min[1],
            payload.max[2] - payload.min[2],
        ];
        if payload.solids == 0 || extent.iter().any(|&d| d <= 0.0) {
            return Ok(BuiltRepresentation::default());
        }

        let representation = doc.create_entity(
            EntityKind::IfcShapeRepresentation,
            attrs([
                ("RepresentationIdentifier", "Body".into()),
                (names::REPRESENTATION_TYPE, "BoundingBox".into()),
                ("Corner", AttributeValue::Real3(payload.min)),
                ("Dimensions", AttributeValue::Real3(extent)),
            ]),
        )?;

        Ok(BuiltRepresentation {
            representations: vec![representation],
            material: element.material.clone(),
            profile: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::TargetDocument;
    use crate::source::Category;

    const CONSTRAINTS: BuildConstraints = BuildConstraints {
        kind: EntityKind::IfcWall,
        shared: true,
    };

    #[test]
    fn box_payload_builds_one_representation() {
        let mut doc = TargetDocument::new();
        let mut wall = SourceElement::new(1, "w", Category::Wall);
        wall.material = Some("Concrete".into());
        let payload = GeometryPayload::boxed([0.0; 3], [4.0, 0.2, 3.0]);

        let built = BoundingBoxBuilder
            .build(&mut doc, &wall, Some(&payload), &CONSTRAINTS)
            .unwrap();

        assert_eq!(built.representations.len(), 1);
        assert_eq!(built.material.as_deref(), Some("Concrete"));
        assert_eq!(
            doc.get_attribute(built.representations[0], "Dimensions"),
            Some(&AttributeValue::Real3([4.0, 0.2, 3.0]))
        );
    }

    #[test]
    fn missing_or_flat_payload_builds_nothing() {
        let mut doc = TargetDocument::new();
        let wall = SourceElement::new(1, "w", Category::Wall);

        let none = BoundingBoxBuilder.build(&mut doc, &wall, None, &CONSTRAINTS).unwrap();
        assert!(none.is_empty());

        let flat = GeometryPayload::boxed([0.0; 3], [4.0, 0.0, 3.0]);
        let built = BoundingBoxBuilder
            .build(&mut doc, &wall, Some(&flat), &CONSTRAINTS)
            .unwrap();
        assert!(built.is_empty());

        let empty = GeometryPayload::empty();
        let built = BoundingBoxBuilder
            .build(&mut doc, &wall, Some(&empty), &CONSTRAINTS)
            .unwrap();
        assert!(built.is_empty());
        assert!(doc.is_empty());
    }
}
