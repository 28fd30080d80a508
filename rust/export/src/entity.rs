// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Target schema entity kinds produced by the exporter.

use serde::{Deserialize, Serialize};

macro_rules! entity_kinds {
    ($($name:ident),+ $(,)?) => {
        /// Closed set of target schema entities the exporter creates.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum EntityKind {
            $($name),+
        }

        impl EntityKind {
            /// Every kind, in declaration order.
            pub const ALL: &'static [EntityKind] = &[$(EntityKind::$name),+];

            /// Returns the schema name, e.g. `"IfcWall"`.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(EntityKind::$name => stringify!($name)),+
                }
            }
        }
    };
}

entity_kinds! {
    // Spatial structure
    IfcProject,
    IfcSite,
    IfcBuilding,
    IfcBuildingStorey,
    IfcSpace,

    // Placement and representation
    IfcLocalPlacement,
    IfcShapeRepresentation,
    IfcProductDefinitionShape,
    IfcRepresentationMap,
    IfcMappedItem,
    IfcMaterial,

    // Products
    IfcWall,
    IfcSlab,
    IfcRoof,
    IfcColumn,
    IfcBeam,
    IfcMember,
    IfcDoor,
    IfcWindow,
    IfcStair,
    IfcStairFlight,
    IfcRamp,
    IfcRampFlight,
    IfcRailing,
    IfcCovering,
    IfcFurnishingElement,
    IfcBuildingElementProxy,
    IfcDuctSegment,
    IfcDuctFitting,
    IfcPipeSegment,
    IfcPipeFitting,
    IfcCableCarrierSegment,
    IfcCableSegment,
    IfcElementAssembly,
    IfcOpeningElement,

    // Groups
    IfcGroup,
    IfcZone,
    IfcSystem,
    IfcDistributionSystem,

    // Type objects
    IfcWallType,
    IfcSlabType,
    IfcColumnType,
    IfcBeamType,
    IfcMemberType,
    IfcDoorType,
    IfcWindowType,
    IfcStairFlightType,
    IfcRampFlightType,
    IfcRailingType,
    IfcCoveringType,
    IfcFurnitureType,
    IfcBuildingElementProxyType,
    IfcDuctSegmentType,
    IfcDuctFittingType,
    IfcPipeSegmentType,
    IfcPipeFittingType,
    IfcCableCarrierSegmentType,
    IfcCableSegmentType,

    // Relationships
    IfcRelAggregates,
    IfcRelContainedInSpatialStructure,
    IfcRelAssignsToGroup,
    IfcRelServicesBuildings,
    IfcRelDefinesByType,
    IfcRelAssociatesMaterial,
    IfcRelVoidsElement,
    IfcRelFillsElement,
}

impl EntityKind {
    /// Returns the type object kind that instances of this kind are typed by.
    pub fn type_kind(&self) -> Option<EntityKind> {
        use EntityKind::*;
        let ty = match self {
            IfcWall => IfcWallType,
            IfcSlab | IfcRoof => IfcSlabType,
            IfcColumn => IfcColumnType,
            IfcBeam => IfcBeamType,
            IfcMember => IfcMemberType,
            IfcDoor => IfcDoorType,
            IfcWindow => IfcWindowType,
            IfcStairFlight => IfcStairFlightType,
            IfcRampFlight => IfcRampFlightType,
            IfcRailing => IfcRailingType,
            IfcCovering => IfcCoveringType,
            IfcFurnishingElement => IfcFurnitureType,
            IfcBuildingElementProxy => IfcBuildingElementProxyType,
            IfcDuctSegment => IfcDuctSegmentType,
            IfcDuctFitting => IfcDuctFittingType,
            IfcPipeSegment => IfcPipeSegmentType,
            IfcPipeFitting => IfcPipeFittingType,
            IfcCableCarrierSegment => IfcCableCarrierSegmentType,
            IfcCableSegment => IfcCableSegmentType,
            _ => return None,
        };
        Some(ty)
    }

    /// Returns `true` for spatial structure elements (valid containers).
    pub fn is_spatial(&self) -> bool {
        matches!(
            self,
            EntityKind::IfcProject
                | EntityKind::IfcSite
                | EntityKind::IfcBuilding
                | EntityKind::IfcBuildingStorey
                | EntityKind::IfcSpace
        )
    }

    /// Returns `true` for objectified relationships.
    pub fn is_relationship(&self) -> bool {
        self.as_str().starts_with("IfcRel")
    }

    /// Returns `true` for group-like kinds whose members are assigned, not contained.
    pub fn is_group(&self) -> bool {
        matches!(
            self,
            EntityKind::IfcGroup
                | EntityKind::IfcZone
                | EntityKind::IfcSystem
                | EntityKind::IfcDistributionSystem
        )
    }

    /// Returns `true` for kinds that own their parts through aggregation.
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            EntityKind::IfcElementAssembly | EntityKind::IfcStair | EntityKind::IfcRamp
        )
    }

    /// Returns `true` for physical products that need spatial containment.
    pub fn is_product(&self) -> bool {
        !self.is_spatial()
            && !self.is_relationship()
            && !self.is_group()
            && self.type_kind().is_some()
            || matches!(
                self,
                EntityKind::IfcStair | EntityKind::IfcRamp | EntityKind::IfcElementAssembly
            )
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    /// Parses a schema name case-insensitively, e.g. `"IFCWALL"` or `"IfcWall"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown entity kind: {trimmed}"))
    }
}
