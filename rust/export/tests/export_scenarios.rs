// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end export runs over small in-memory models.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_relative_eq;
use ifc_lite_export::attributes::names;
use ifc_lite_export::placement::{object_placement, world_transform};
use ifc_lite_export::{
    AttributeValue, BoundingBoxBuilder, BuildConstraints, BuiltRepresentation, Category,
    DocumentBuilder, ElementId, ElementRecord, EntityKind, ExportConfig, Exporter, GeodeticInfo,
    GeometryPayload, GroupMode, Handle, InMemoryModel, ParamValue, ProjectInfo,
    RepresentationBuilder, Result, RunStatus, SourceElement, SourceLevel, StableId,
    TargetDocument, Transform,
};

fn wall_box() -> GeometryPayload {
    GeometryPayload::boxed([0.0; 3], [4.0, 0.2, 3.0])
}

fn project(with_site: bool) -> ProjectInfo {
    let mut project = ProjectInfo::new("project-1");
    if with_site {
        project.site = Some(GeodeticInfo {
            latitude: 47.37,
            longitude: 8.54,
            elevation: 408.0,
            true_north: 0.0,
        });
    }
    project
}

/// Builder that counts how often it is asked for geometry.
#[derive(Default)]
struct CountingBuilder {
    calls: AtomicUsize,
}

impl RepresentationBuilder for CountingBuilder {
    fn build(
        &self,
        doc: &mut dyn DocumentBuilder,
        element: &SourceElement,
        payload: Option<&GeometryPayload>,
        constraints: &BuildConstraints,
    ) -> Result<BuiltRepresentation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        BoundingBoxBuilder.build(doc, element, payload, constraints)
    }
}

fn office() -> InMemoryModel {
    let mut model = InMemoryModel::new(project(true));
    model
        .add_level(SourceLevel::storey(1, "Ground", 0.0))
        .add_level(SourceLevel::storey(2, "First", 3.5))
        .add_level(SourceLevel::non_storey(3, "Mezzanine", 1.8));

    for (id, level) in [(10, 1), (11, 1), (12, 2)] {
        model.add(
            ElementRecord::new(
                SourceElement::new(id, format!("wall-{id}"), Category::Wall)
                    .on_level(level)
                    .of_type(7),
            )
            .with_geometry(wall_box()),
        );
    }
    model.add(
        ElementRecord::new(SourceElement::new(20, "door-20", Category::Door).hosted_by(10).of_type(8))
            .at(Transform::translation(1.0, 0.0, 0.0))
            .with_geometry(GeometryPayload::boxed([0.0; 3], [0.9, 0.2, 2.1])),
    );
    for id in [30, 31] {
        model.add(
            ElementRecord::new(SourceElement::new(id, format!("duct-{id}"), Category::Duct).on_level(3))
                .with_param("System Name", ParamValue::Text("Supply Air".into()))
                .with_geometry(GeometryPayload::boxed([0.0; 3], [2.0, 0.3, 0.3])),
        );
    }
    model.add(
        ElementRecord::new(SourceElement::new(40, "room-40", Category::Room).named("Office").on_level(1))
            .with_geometry(GeometryPayload::boxed([0.0; 3], [5.0, 4.0, 3.0])),
    );
    model.add(ElementRecord::new(
        SourceElement::new(50, "assembly-50", Category::Assembly).on_level(2),
    ));
    for id in [51, 52] {
        model.add(
            ElementRecord::new(
                SourceElement::new(id, format!("beam-{id}"), Category::StructuralFraming)
                    .on_level(2)
                    .in_assembly(50),
            )
            .with_geometry(GeometryPayload::boxed([0.0; 3], [6.0, 0.3, 0.5])),
        );
    }
    model
}

fn export(model: &InMemoryModel, config: ExportConfig) -> (TargetDocument, ifc_lite_export::ExportReport) {
    let exporter = Exporter::new(config);
    let mut doc = TargetDocument::new();
    let report = exporter
        .export_model(model, &mut doc, &BoundingBoxBuilder)
        .unwrap();
    (doc, report)
}

fn related(doc: &TargetDocument, relation: Handle) -> Vec<Handle> {
    [names::RELATED_ELEMENTS, names::RELATED_OBJECTS]
        .iter()
        .find_map(|name| doc.get_attribute(relation, name))
        .and_then(AttributeValue::as_handle_list)
        .map(<[Handle]>::to_vec)
        .unwrap_or_default()
}

/// Counts how many containment or aggregation relationships list each handle.
fn parent_counts(doc: &TargetDocument) -> BTreeMap<Handle, usize> {
    let mut counts = BTreeMap::new();
    for kind in [
        EntityKind::IfcRelContainedInSpatialStructure,
        EntityKind::IfcRelAggregates,
    ] {
        for relation in doc.entities_of_kind(kind) {
            for member in related(doc, relation) {
                *counts.entry(member).or_insert(0) += 1;
            }
        }
    }
    counts
}

#[test]
fn repeated_exports_produce_identical_identifiers() {
    let model = office();
    let ids = |doc: &TargetDocument| {
        let mut ids: Vec<String> = doc
            .iter()
            .filter_map(|(h, _)| doc.global_id(h).map(str::to_string))
            .collect();
        ids.sort();
        ids
    };

    let (first, _) = export(&model, ExportConfig::default());
    let (second, _) = export(&model, ExportConfig::default());

    assert_eq!(first.len(), second.len());
    assert_eq!(ids(&first), ids(&second));

    let wall = ids(&first);
    let expected = StableId::derive("wall-10", "IfcWall", None);
    assert!(wall.iter().any(|id| id == expected.as_str()));
}

#[test]
fn typed_walls_share_one_build() {
    let model = office();
    let builder = CountingBuilder::default();
    let exporter = Exporter::new(ExportConfig::default());
    let mut doc = TargetDocument::new();
    let report = exporter.export_model(&model, &mut doc, &builder).unwrap();

    assert_eq!(doc.entities_of_kind(EntityKind::IfcWallType).len(), 1);
    let wall_type = doc.entities_of_kind(EntityKind::IfcWallType)[0];
    assert_eq!(report.type_instances[&wall_type].len(), 3);

    let by_type = doc
        .entities_of_kind(EntityKind::IfcRelDefinesByType)
        .into_iter()
        .find(|&r| {
            doc.get_attribute(r, names::RELATING_TYPE)
                .and_then(AttributeValue::as_handle)
                == Some(wall_type)
        })
        .expect("wall type relationship");
    assert_eq!(related(&doc, by_type).len(), 3);

    // One build per distinct type, one per untyped element:
    // walls 1, door type 1, ducts 2, room 1, assembly 1, beams 2.
    assert_eq!(builder.calls.load(Ordering::SeqCst), 8);
    assert_eq!(report.stats.builder_calls, 8);
}

#[test]
fn every_product_has_exactly_one_parent() {
    let model = office();
    let (doc, report) = export(&model, ExportConfig::default());
    let counts = parent_counts(&doc);

    for (&element, &handle) in &report.element_handles {
        let kind = doc.kind(handle).unwrap();
        if !(kind.is_product() || kind == EntityKind::IfcSpace) {
            continue;
        }
        assert_eq!(counts.get(&handle), Some(&1), "element {element} ({kind})");
    }
    assert_eq!(report.status, RunStatus::Completed);
}

#[test]
fn folded_level_members_are_contained_in_the_storey_below() {
    let model = office();
    let (_, report) = export(&model, ExportConfig::default());
    let duct = report.handle_for(ElementId(30)).unwrap();
    let ground = report.containment.container_of(report.handle_for(ElementId(10)).unwrap());

    assert!(ground.is_some());
    assert_eq!(report.containment.container_of(duct), ground);
}

#[test]
fn assembly_members_are_aggregated_not_contained() {
    let model = office();
    let (_, report) = export(&model, ExportConfig::default());
    let assembly = report.handle_for(ElementId(50)).unwrap();

    for beam in [51, 52] {
        let beam = report.handle_for(ElementId(beam)).unwrap();
        assert_eq!(report.containment.container_of(beam), Some(assembly));
    }
    assert_eq!(report.stats.part_of_assembly, 2);
}

#[test]
fn hosted_door_cuts_an_opening() {
    let model = office();
    let (doc, report) = export(&model, ExportConfig::default());
    let wall = report.handle_for(ElementId(10)).unwrap();
    let door = report.handle_for(ElementId(20)).unwrap();

    let voids = doc.entities_of_kind(EntityKind::IfcRelVoidsElement);
    let fills = doc.entities_of_kind(EntityKind::IfcRelFillsElement);
    assert_eq!(voids.len(), 1);
    assert_eq!(fills.len(), 1);
    assert_eq!(
        doc.get_attribute(voids[0], names::RELATING_BUILDING_ELEMENT)
            .and_then(AttributeValue::as_handle),
        Some(wall)
    );
    assert_eq!(
        doc.get_attribute(fills[0], names::RELATED_BUILDING_ELEMENT)
            .and_then(AttributeValue::as_handle),
        Some(door)
    );

    let opening = doc.entities_of_kind(EntityKind::IfcOpeningElement)[0];
    let placement = object_placement(&doc, opening).unwrap();
    let world = world_transform(&doc, placement).unwrap();
    assert_relative_eq!(world.origin[0], 1.0, epsilon = 1e-9);
    assert_eq!(report.stats.openings, 1);
}

#[test]
fn ducts_sharing_a_system_name_form_one_system() {
    let model = office();
    let (doc, report) = export(&model, ExportConfig::default());

    let systems = doc.entities_of_kind(EntityKind::IfcDistributionSystem);
    assert_eq!(systems.len(), 1);
    assert_eq!(
        doc.get_attribute(systems[0], names::NAME).and_then(AttributeValue::as_str),
        Some("Supply Air")
    );
    assert_eq!(doc.entities_of_kind(EntityKind::IfcRelServicesBuildings).len(), 1);
    assert_eq!(report.stats.systems, 1);
}

#[test]
fn stair_on_three_levels_is_duplicated_per_storey() {
    let mut model = InMemoryModel::new(project(true));
    model
        .add_level(SourceLevel::storey(1, "L0", 0.0))
        .add_level(SourceLevel::storey(2, "L1", 10.0))
        .add_level(SourceLevel::storey(3, "L2", 20.0));
    model.add(
        ElementRecord::new(SourceElement::new(100, "stair-100", Category::Stair).on_level(1))
            .at(Transform::with_rotation_z(5.0, 2.0, 0.0, std::f64::consts::FRAC_PI_2))
            .with_param("NumberOfStories", ParamValue::Int(3))
            .with_sub_element(
                ElementRecord::new(
                    SourceElement::new(101, "flight-101", Category::StairRun).of_type(900),
                )
                .at(Transform::with_rotation_z(5.0, 2.0, 0.0, std::f64::consts::FRAC_PI_2))
                .with_geometry(GeometryPayload::boxed([0.0; 3], [1.2, 4.0, 10.0])),
            ),
    );

    let (doc, report) = export(&model, ExportConfig::default());

    let stairs = doc.entities_of_kind(EntityKind::IfcStair);
    assert_eq!(stairs.len(), 3);
    assert_eq!(doc.entities_of_kind(EntityKind::IfcStairFlight).len(), 3);
    assert_eq!(doc.entities_of_kind(EntityKind::IfcStairFlightType).len(), 1);

    let info = &report.duplicates[&ElementId(100)];
    assert_eq!(info.level_count(), 3);
    for (index, (&stair, level)) in info.containers.iter().zip([1, 2, 3]).enumerate() {
        let storey = report
            .containment
            .container_of(stair)
            .expect("stair copy has a container");
        assert_eq!(
            doc.get_attribute(storey, names::ELEVATION).and_then(AttributeValue::as_f64),
            Some(10.0 * (level - 1) as f64),
            "copy {index}"
        );
        let world = world_transform(&doc, object_placement(&doc, stair).unwrap()).unwrap();
        assert_relative_eq!(world.origin[0], 5.0, epsilon = 1e-9);
        assert_relative_eq!(world.origin[2], 10.0 * index as f64, epsilon = 1e-9);
        assert_relative_eq!(world.x_axis[1], 1.0, epsilon = 1e-9);

        let flight = info.components[index][0];
        assert_eq!(report.containment.container_of(flight), Some(stair));
    }

    let flight_type = doc.entities_of_kind(EntityKind::IfcStairFlightType)[0];
    assert_eq!(report.type_instances[&flight_type].len(), 3);
    assert_eq!(report.stats.duplicated_containers, 2);
    assert_eq!(report.stats.duplicated_components, 2);
}

#[test]
fn orphans_follow_the_fallback_chain() {
    let proxy = || ElementRecord::new(SourceElement::new(1, "proxy-1", Category::GenericModel));

    // Site present.
    let mut model = InMemoryModel::new(project(true));
    model.add(proxy());
    let (_, report) = export(&model, ExportConfig::default());
    let handle = report.handle_for(ElementId(1)).unwrap();
    assert_eq!(report.containment.container_of(handle), report.spatial.site);

    // No site: building.
    let mut model = InMemoryModel::new(project(false));
    model.add(proxy());
    let (_, report) = export(&model, ExportConfig::default());
    let handle = report.handle_for(ElementId(1)).unwrap();
    assert_eq!(report.containment.container_of(handle), report.spatial.building);

    // Neither: project.
    let config = ExportConfig {
        building_without_storeys: false,
        ..ExportConfig::default()
    };
    let (_, report) = export(&model, config);
    let handle = report.handle_for(ElementId(1)).unwrap();
    assert_eq!(
        report.containment.container_of(handle),
        Some(report.spatial.project)
    );
}

#[test]
fn unique_geometry_skips_the_type_object() {
    let mut model = InMemoryModel::new(project(false));
    model.add_level(SourceLevel::storey(1, "L0", 0.0));
    model.add(
        ElementRecord::new(
            SourceElement::new(1, "wall-1", Category::Wall)
                .on_level(1)
                .of_type(7)
                .with_unique_geometry(),
        )
        .with_geometry(wall_box()),
    );
    model.add(
        ElementRecord::new(SourceElement::new(2, "wall-2", Category::Wall).on_level(1).of_type(7))
            .with_geometry(wall_box()),
    );

    let (doc, report) = export(&model, ExportConfig::default());
    let unique = report.handle_for(ElementId(1)).unwrap();
    let shared = report.handle_for(ElementId(2)).unwrap();
    let wall_type = doc.entities_of_kind(EntityKind::IfcWallType)[0];

    assert_eq!(report.type_instances[&wall_type], vec![shared]);
    assert!(!report.type_instances.values().any(|v| v.contains(&unique)));
    // Only the shared wall is mapped.
    assert_eq!(doc.entities_of_kind(EntityKind::IfcMappedItem).len(), 1);
    assert!(doc.get_attribute(unique, names::REPRESENTATION).is_some());
}

#[test]
fn dont_export_reserves_identifier_for_referenced_elements() {
    let mut model = InMemoryModel::new(project(false));
    let mut hidden = SourceElement::new(1, "column-1", Category::Column);
    hidden.referenced = true;
    model.add(
        ElementRecord::new(hidden).with_param("IfcExportAs", ParamValue::Text("DontExport".into())),
    );
    model.add(
        ElementRecord::new(SourceElement::new(2, "slab-2", Category::GenericModel))
            .with_param("IfcExportAs", ParamValue::Text("IfcSlab.BASESLAB".into())),
    );

    let (doc, report) = export(&model, ExportConfig::default());

    assert_eq!(
        report.reserved_ids.get(&ElementId(1)),
        Some(&StableId::derive("column-1", "IfcColumn", None))
    );
    assert!(doc.entities_of_kind(EntityKind::IfcColumn).is_empty());
    let slab = report.handle_for(ElementId(2)).unwrap();
    assert_eq!(doc.kind(slab), Some(EntityKind::IfcSlab));
    assert_eq!(
        doc.get_attribute(slab, names::PREDEFINED_TYPE),
        Some(&AttributeValue::Enum("BASESLAB".into()))
    );
}

#[test]
fn aggregate_groups_own_their_members() {
    let mut model = InMemoryModel::new(project(false));
    model.add_level(SourceLevel::storey(1, "L0", 0.0));
    model.add(ElementRecord::new(SourceElement::new(5, "group-5", Category::Group).on_level(1)));
    model.add(
        ElementRecord::new(SourceElement::new(6, "chair-6", Category::Furniture).on_level(1).in_group(5))
            .with_geometry(GeometryPayload::boxed([0.0; 3], [0.5, 0.5, 1.0])),
    );

    let (doc, report) = export(&model, ExportConfig::default());
    let chair = report.handle_for(ElementId(6)).unwrap();
    assert_eq!(doc.entities_of_kind(EntityKind::IfcRelAssignsToGroup).len(), 1);
    assert_ne!(
        report.containment.container_of(chair),
        report.handle_for(ElementId(5))
    );

    let config = ExportConfig {
        group_mode: GroupMode::Aggregate,
        ..ExportConfig::default()
    };
    let (doc, report) = export(&model, config);
    let group = report.handle_for(ElementId(5)).unwrap();
    let chair = report.handle_for(ElementId(6)).unwrap();
    assert_eq!(doc.kind(group), Some(EntityKind::IfcElementAssembly));
    assert_eq!(report.containment.container_of(chair), Some(group));
}

fn three_storeys() -> InMemoryModel {
    let mut model = InMemoryModel::new(project(true));
    model
        .add_level(SourceLevel::storey(1, "L0", 0.0))
        .add_level(SourceLevel::storey(2, "L1", 10.0))
        .add_level(SourceLevel::storey(3, "L2", 20.0));
    model
}

fn storey_elevations(doc: &TargetDocument, report: &ifc_lite_export::ExportReport, products: &[Handle]) -> Vec<f64> {
    products
        .iter()
        .map(|&product| {
            let storey = report
                .containment
                .container_of(product)
                .expect("copy has a container");
            doc.get_attribute(storey, names::ELEVATION)
                .and_then(AttributeValue::as_f64)
                .expect("container is a storey")
        })
        .collect()
}

#[test]
fn railing_on_a_stacked_stair_repeats_with_it() {
    let mut model = three_storeys();
    model.add(
        ElementRecord::new(SourceElement::new(100, "stair-100", Category::Stair).on_level(1))
            .with_param("NumberOfStories", ParamValue::Int(3))
            .with_geometry(GeometryPayload::boxed([0.0; 3], [1.2, 4.0, 10.0])),
    );
    model.add(
        ElementRecord::new(
            SourceElement::new(110, "railing-110", Category::Railing)
                .on_level(1)
                .hosted_by(100),
        )
        .at(Transform::translation(1.2, 0.0, 0.0))
        .with_geometry(GeometryPayload::boxed([0.0; 3], [0.05, 4.0, 1.0])),
    );

    let (doc, report) = export(&model, ExportConfig::default());

    assert_eq!(doc.entities_of_kind(EntityKind::IfcStair).len(), 3);
    let railings = doc.entities_of_kind(EntityKind::IfcRailing);
    assert_eq!(railings.len(), 3);

    let info = &report.duplicates[&ElementId(110)];
    assert_eq!(info.level_count(), 3);
    assert_eq!(storey_elevations(&doc, &report, &info.containers), vec![0.0, 10.0, 20.0]);
    for (index, &railing) in info.containers.iter().enumerate() {
        let world = world_transform(&doc, object_placement(&doc, railing).unwrap()).unwrap();
        assert_relative_eq!(world.origin[0], 1.2, epsilon = 1e-9);
        assert_relative_eq!(world.origin[2], 10.0 * index as f64, epsilon = 1e-9);
    }

    let counts = parent_counts(&doc);
    for railing in railings {
        assert_eq!(counts.get(&railing), Some(&1));
    }
}

#[test]
fn stair_listed_on_explicit_levels_is_copied_to_each() {
    let mut model = three_storeys();
    let mut stair = SourceElement::new(200, "stair-200", Category::Stair).on_level(1);
    stair.multistory_levels = vec![ElementId(1), ElementId(2), ElementId(3)];
    model.add(
        ElementRecord::new(stair)
            .at(Transform::translation(3.0, 1.0, 0.0))
            .with_geometry(GeometryPayload::boxed([0.0; 3], [1.2, 4.0, 3.0])),
    );

    let (doc, report) = export(&model, ExportConfig::default());

    let stairs = doc.entities_of_kind(EntityKind::IfcStair);
    assert_eq!(stairs.len(), 3);
    let info = &report.duplicates[&ElementId(200)];
    assert_eq!(storey_elevations(&doc, &report, &info.containers), vec![0.0, 10.0, 20.0]);
    for (index, &copy) in info.containers.iter().enumerate() {
        let world = world_transform(&doc, object_placement(&doc, copy).unwrap()).unwrap();
        assert_relative_eq!(world.origin[0], 3.0, epsilon = 1e-9);
        assert_relative_eq!(world.origin[1], 1.0, epsilon = 1e-9);
        assert_relative_eq!(world.origin[2], 10.0 * index as f64, epsilon = 1e-9);
    }

    let counts = parent_counts(&doc);
    for stair in stairs {
        assert_eq!(counts.get(&stair), Some(&1));
    }
    assert_eq!(report.stats.duplicated_containers, 2);
}

/// Builder whose first call produces nothing.
#[derive(Default)]
struct EmptyOnFirstCall {
    calls: AtomicUsize,
}

impl RepresentationBuilder for EmptyOnFirstCall {
    fn build(
        &self,
        doc: &mut dyn DocumentBuilder,
        element: &SourceElement,
        payload: Option<&GeometryPayload>,
        constraints: &BuildConstraints,
    ) -> Result<BuiltRepresentation> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(BuiltRepresentation::default());
        }
        BoundingBoxBuilder.build(doc, element, payload, constraints)
    }
}

#[test]
fn empty_type_is_rebuilt_once_and_shared_afterwards() {
    let mut model = InMemoryModel::new(project(false));
    model.add_level(SourceLevel::storey(1, "L0", 0.0));
    for id in 1..=3 {
        model.add(
            ElementRecord::new(
                SourceElement::new(id, format!("wall-{id}"), Category::Wall)
                    .on_level(1)
                    .of_type(7),
            )
            .with_geometry(wall_box()),
        );
    }

    let builder = EmptyOnFirstCall::default();
    let exporter = Exporter::new(ExportConfig::default());
    let mut doc = TargetDocument::new();
    let report = exporter.export_model(&model, &mut doc, &builder).unwrap();

    assert_eq!(builder.calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.stats.builder_calls, 2);
    assert_eq!(report.stats.exported_empty, 1);

    let types = doc.entities_of_kind(EntityKind::IfcWallType);
    assert_eq!(types.len(), 1);
    let maps = doc
        .get_attribute(types[0], names::REPRESENTATION_MAPS)
        .and_then(AttributeValue::as_handle_list)
        .map(<[Handle]>::to_vec)
        .unwrap_or_default();
    assert_eq!(maps.len(), 1);

    let first = report.handle_for(ElementId(1)).unwrap();
    assert!(doc.get_attribute(first, names::REPRESENTATION).is_none());
    for id in [2, 3] {
        let wall = report.handle_for(ElementId(id)).unwrap();
        assert!(doc.get_attribute(wall, names::REPRESENTATION).is_some(), "wall {id}");
    }
    assert_eq!(doc.entities_of_kind(EntityKind::IfcMappedItem).len(), 2);
    assert_eq!(report.type_instances[&types[0]].len(), 3);
}
