// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Placement resolution.
//!
//! A source element arrives with a world transform. The target document wants
//! a local placement chained to the placement of its container, so the
//! resolver expresses the world transform relative to the parent frame:
//! `relative = parent_world⁻¹ · world`. Reading a placement back walks the
//! `PlacementRelTo` chain and composes it.

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::attributes::{attrs, names, AttributeValue};
use crate::document::DocumentBuilder;
use crate::entity::EntityKind;
use crate::error::{Error, Result};
use crate::keys::Handle;

/// Longest placement chain followed before assuming a cycle.
const MAX_CHAIN_DEPTH: usize = 64;

/// Axes shorter than this are treated as degenerate.
const AXIS_EPSILON: f64 = 1e-12;

fn default_x_axis() -> [f64; 3] {
    [1.0, 0.0, 0.0]
}

fn default_z_axis() -> [f64; 3] {
    [0.0, 0.0, 1.0]
}

/// A rigid frame: origin plus local X and Z directions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub origin: [f64; 3],
    #[serde(default = "default_x_axis")]
    pub x_axis: [f64; 3],
    #[serde(default = "default_z_axis")]
    pub z_axis: [f64; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    /// The identity frame.
    pub fn identity() -> Self {
        Self {
            origin: [0.0; 3],
            x_axis: default_x_axis(),
            z_axis: default_z_axis(),
        }
    }

    /// A pure translation.
    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        Self {
            origin: [x, y, z],
            ..Self::identity()
        }
    }

    /// A translation combined with a rotation about the vertical axis.
    pub fn with_rotation_z(x: f64, y: f64, z: f64, angle: f64) -> Self {
        Self {
            origin: [x, y, z],
            x_axis: [angle.cos(), angle.sin(), 0.0],
            z_axis: default_z_axis(),
        }
    }

    /// Returns a copy whose origin is moved vertically by `dz`.
    pub fn offset_z(&self, dz: f64) -> Self {
        let mut t = *self;
        t.origin[2] += dz;
        t
    }

    /// Converts to an isometry, orthonormalizing the axes.
    pub fn to_isometry(&self) -> Result<Isometry3<f64>> {
        let z = Vector3::from(self.z_axis);
        let x = Vector3::from(self.x_axis);
        if z.norm() < AXIS_EPSILON || x.norm() < AXIS_EPSILON {
            return Err(Error::InvalidPlacement("zero-length axis".into()));
        }
        let z = z.normalize();
        let x = x - z * x.dot(&z);
        if x.norm() < AXIS_EPSILON {
            return Err(Error::InvalidPlacement("x axis parallel to z axis".into()));
        }
        let x = x.normalize();
        let y = z.cross(&x);

        let rotation = Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[x, y, z]));
        let translation = Translation3::new(self.origin[0], self.origin[1], self.origin[2]);
        Ok(Isometry3::from_parts(
            translation,
            UnitQuaternion::from_rotation_matrix(&rotation),
        ))
    }

    /// Converts back from an isometry.
    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        let x = iso.rotation * Vector3::x();
        let z = iso.rotation * Vector3::z();
        Self {
            origin: [
                iso.translation.vector.x,
                iso.translation.vector.y,
                iso.translation.vector.z,
            ],
            x_axis: [x.x, x.y, x.z],
            z_axis: [z.x, z.y, z.z],
        }
    }

    /// Expresses `self` (a world frame) relative to `parent` (another world frame).
    pub fn relative_to(&self, parent: &Transform) -> Result<Transform> {
        let world = self.to_isometry()?;
        let parent = parent.to_isometry()?;
        Ok(Self::from_isometry(&(parent.inverse() * world)))
    }

    /// Composes `self` (a parent world frame) with a frame expressed relative to it.
    pub fn compose(&self, relative: &Transform) -> Result<Transform> {
        Ok(Self::from_isometry(
            &(self.to_isometry()? * relative.to_isometry()?),
        ))
    }
}

/// Creates a local placement holding `relative`, chained to `parent`.
pub fn create_local_placement(
    doc: &mut dyn DocumentBuilder,
    parent: Option<Handle>,
    relative: &Transform,
) -> Result<Handle> {
    // Normalize through the isometry so stored axes are orthonormal.
    let relative = Transform::from_isometry(&relative.to_isometry()?);
    doc.create_entity(
        EntityKind::IfcLocalPlacement,
        attrs([
            (
                names::PLACEMENT_REL_TO,
                parent.map(AttributeValue::Ref).unwrap_or(AttributeValue::Null),
            ),
            (names::LOCATION, AttributeValue::Real3(relative.origin)),
            (names::AXIS, AttributeValue::Real3(relative.z_axis)),
            (names::REF_DIRECTION, AttributeValue::Real3(relative.x_axis)),
        ]),
    )
}

/// Creates a placement for a world frame under the given parent placement.
pub fn place_in(
    doc: &mut dyn DocumentBuilder,
    parent: Option<Handle>,
    world: &Transform,
) -> Result<Handle> {
    let relative = match parent {
        Some(p) => world.relative_to(&world_transform(doc, p)?)?,
        None => *world,
    };
    create_local_placement(doc, parent, &relative)
}

/// Creates a placement for a world frame under the placement of `container`.
pub fn place_under_container(
    doc: &mut dyn DocumentBuilder,
    container: Option<Handle>,
    world: &Transform,
) -> Result<Handle> {
    let parent = match container {
        Some(c) => object_placement(doc, c),
        None => None,
    };
    place_in(doc, parent, world)
}

/// Returns the `ObjectPlacement` of a product, if it has one.
pub fn object_placement(doc: &dyn DocumentBuilder, product: Handle) -> Option<Handle> {
    doc.get_attribute(product, names::OBJECT_PLACEMENT)
        .and_then(AttributeValue::as_handle)
}

/// Returns the parent placement a placement is chained to.
pub fn parent_placement(doc: &dyn DocumentBuilder, placement: Handle) -> Option<Handle> {
    doc.get_attribute(placement, names::PLACEMENT_REL_TO)
        .and_then(AttributeValue::as_handle)
}

/// Reads the relative frame stored on a placement.
pub fn read_relative(doc: &dyn DocumentBuilder, placement: Handle) -> Result<Transform> {
    if doc.kind(placement) != Some(EntityKind::IfcLocalPlacement) {
        return Err(Error::HandleNotFound(placement));
    }
    let real3 = |name: &'static str| -> Result<[f64; 3]> {
        doc.get_attribute(placement, name)
            .ok_or(Error::MissingAttribute {
                handle: placement,
                name,
            })?
            .as_real3()
            .ok_or(Error::AttributeType {
                handle: placement,
                name,
            })
    };
    Ok(Transform {
        origin: real3(names::LOCATION)?,
        z_axis: real3(names::AXIS)?,
        x_axis: real3(names::REF_DIRECTION)?,
    })
}

/// Composes a placement with all of its ancestors into a world frame.
pub fn world_transform(doc: &dyn DocumentBuilder, placement: Handle) -> Result<Transform> {
    let mut chain = Vec::new();
    let mut current = Some(placement);
    while let Some(p) = current {
        if chain.len() >= MAX_CHAIN_DEPTH {
            return Err(Error::InvalidPlacement(format!(
                "placement chain deeper than {MAX_CHAIN_DEPTH}"
            )));
        }
        chain.push(read_relative(doc, p)?);
        current = parent_placement(doc, p);
    }

    let mut world = Transform::identity();
    for relative in chain.iter().rev() {
        world = world.compose(relative)?;
    }
    Ok(world)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::TargetDocument;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn assert_transform_eq(a: &Transform, b: &Transform) {
        for i in 0..3 {
            assert_relative_eq!(a.origin[i], b.origin[i], epsilon = 1e-9);
            assert_relative_eq!(a.x_axis[i], b.x_axis[i], epsilon = 1e-9);
            assert_relative_eq!(a.z_axis[i], b.z_axis[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn isometry_round_trip() {
        let t = Transform::with_rotation_z(1.0, 2.0, 3.0, FRAC_PI_2);
        let back = Transform::from_isometry(&t.to_isometry().unwrap());
        assert_transform_eq(&t, &back);
    }

    #[test]
    fn degenerate_axes_are_rejected() {
        let t = Transform {
            origin: [0.0; 3],
            x_axis: [0.0, 0.0, 2.0],
            z_axis: [0.0, 0.0, 1.0],
        };
        assert!(matches!(t.to_isometry(), Err(Error::InvalidPlacement(_))));
    }

    #[test]
    fn relative_then_compose_is_identity() {
        let parent = Transform::with_rotation_z(5.0, 0.0, 10.0, 0.3);
        let world = Transform::with_rotation_z(7.0, 2.0, 12.0, 1.1);
        let rel = world.relative_to(&parent).unwrap();
        assert_transform_eq(&parent.compose(&rel).unwrap(), &world);
    }

    #[test]
    fn place_in_chains_to_parent() {
        let mut doc = TargetDocument::new();
        let storey = create_local_placement(&mut doc, None, &Transform::translation(0.0, 0.0, 10.0))
            .unwrap();
        let world = Transform::with_rotation_z(3.0, 4.0, 11.5, FRAC_PI_2);
        let placement = place_in(&mut doc, Some(storey), &world).unwrap();

        let rel = read_relative(&doc, placement).unwrap();
        assert_relative_eq!(rel.origin[2], 1.5, epsilon = 1e-9);
        assert_eq!(parent_placement(&doc, placement), Some(storey));
        assert_transform_eq(&world_transform(&doc, placement).unwrap(), &world);
    }

    #[test]
    fn offset_z_keeps_rotation() {
        let t = Transform::with_rotation_z(1.0, 2.0, 0.0, 0.7);
        let moved = t.offset_z(10.0);
        assert_eq!(moved.x_axis, t.x_axis);
        assert_eq!(moved.z_axis, t.z_axis);
        assert_eq!(moved.origin, [1.0, 2.0, 10.0]);
    }

    #[test]
    fn reading_a_non_placement_fails() {
        let mut doc = TargetDocument::new();
        let wall = doc.create_entity(EntityKind::IfcWall, Default::default()).unwrap();
        assert!(read_relative(&doc, wall).is_err());
    }
}
