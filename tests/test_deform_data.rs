use std::path::{Path, PathBuf};

use approx::assert_abs_diff_eq;
use neurodeform::cell::CellProjection;
use neurodeform::deform_data::{deform_cells, deform_flat_coordinates, RegistrationSurfaces};
use neurodeform::fs_curv::FsCurv;
use neurodeform::{
    deform, deform_data_files, read_curv, read_node_data, write_deformation_map, BrainMesh, CellProjectionFile,
    DataFileType, DeformError, DeformOptions, DeformationMap, DeformationType, FlatTopology, MetricDeformation,
    NodeDataFile, NodeDataKind, NodeDeformation, PointProjector, SurfaceGeometry,
};

fn tile(nodes: [i32; 3], areas: [f32; 3]) -> NodeDeformation {
    NodeDeformation {
        tile_nodes: nodes,
        tile_areas: areas,
    }
}

/// A flat map onto three target nodes of a four node source.
fn flat_map(source_dir: &Path, target_dir: &Path) -> DeformationMap {
    let mut map = DeformationMap::new();
    map.deformation_type = DeformationType::Flat;
    map.source.directory = source_dir.to_string_lossy().into_owned();
    map.target.directory = target_dir.to_string_lossy().into_owned();
    map.set_nodes(vec![
        tile([0, 1, 2], [0.2, 0.5, 0.3]),
        NodeDeformation::nearest(3),
        NodeDeformation::default(),
    ]);
    map
}

struct Fixture {
    _source: tempfile::TempDir,
    _target: tempfile::TempDir,
    source_dir: PathBuf,
    target_dir: PathBuf,
    map_path: PathBuf,
}

fn fixture(metric_mode: MetricDeformation) -> Fixture {
    let source = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    let mut map = flat_map(source.path(), target.path());
    map.metric_deformation = metric_mode;
    let map_path = target.path().join("indiv_to_atlas.deform_map");
    write_deformation_map(&map_path, &map).unwrap();
    Fixture {
        source_dir: source.path().to_path_buf(),
        target_dir: target.path().to_path_buf(),
        map_path,
        _source: source,
        _target: target,
    }
}

fn write_metric(path: &Path) {
    let mut metric = NodeDataFile::new(NodeDataKind::Metric, 4);
    metric.add_float_column("thickness", &[1.0, 2.0, 3.0, 4.0]).unwrap();
    metric.add_float_column("depth", &[-1.0, -2.0, -3.0, -4.0]).unwrap();
    metric.comment = String::from("measured by hand");
    metric.to_file(path).unwrap();
}

#[test]
fn a_metric_file_is_deformed_into_the_target_directory() {
    let f = fixture(MetricDeformation::NearestNode);
    let input = f.source_dir.join("thickness.metric");
    write_metric(&input);

    let out = deform(&f.map_path, DataFileType::Metric, &input, None, &DeformOptions::default()).unwrap();
    assert_eq!(f.target_dir.join("deformed_thickness.metric"), out);

    let deformed = read_node_data(&out, NodeDataKind::Metric).unwrap();
    assert_eq!(3, deformed.num_nodes());
    assert_eq!(vec![String::from("thickness"), String::from("depth")], deformed.float_names);
    assert_eq!(1.0, deformed.floats[[0, 0]]);
    assert_eq!(4.0, deformed.floats[[1, 0]]);
    assert_eq!(-4.0, deformed.floats[[1, 1]]);
    assert_eq!(0.0, deformed.floats[[2, 0]]);
    assert_eq!(
        "Deformed from: thickness.metric\nDeformed with: indiv_to_atlas.deform_map\nmeasured by hand",
        deformed.comment
    );
}

#[test]
fn average_mode_interpolates_metric_columns() {
    let f = fixture(MetricDeformation::AverageTileNodes);
    let input = f.source_dir.join("thickness.metric");
    write_metric(&input);
    let out = f.target_dir.join("averaged.metric");

    deform(&f.map_path, DataFileType::Metric, &input, Some(&out), &DeformOptions::default()).unwrap();
    let deformed = read_node_data(&out, NodeDataKind::Metric).unwrap();
    assert_abs_diff_eq!(2.1, deformed.floats[[0, 0]], epsilon = 1e-5);
    assert_abs_diff_eq!(-2.1, deformed.floats[[0, 1]], epsilon = 1e-5);
    assert_abs_diff_eq!(4.0, deformed.floats[[1, 0]], epsilon = 1e-5);
}

#[test]
fn paint_labels_keep_their_names() {
    let f = fixture(MetricDeformation::AverageTileNodes);
    let mut paint = NodeDataFile::new(NodeDataKind::Paint, 4);
    let v1 = paint.label_table.add("V1", Some([255, 0, 0, 255])) as i32;
    let mt = paint.label_table.add("MT", None) as i32;
    paint.add_label_column("areas", &[v1, mt, mt, v1]).unwrap();
    let input = f.source_dir.join("areas.paint");
    paint.to_file(&input).unwrap();

    let out = deform(&f.map_path, DataFileType::Paint, &input, None, &DeformOptions::default()).unwrap();
    let deformed = read_node_data(&out, NodeDataKind::Paint).unwrap();
    assert_eq!(paint.label_table, deformed.label_table);
    assert_eq!(v1, deformed.labels[[0, 0]]);
    assert_eq!(v1, deformed.labels[[1, 0]]);
    assert_eq!(0, deformed.labels[[2, 0]]);
}

#[test]
fn curv_input_gives_curv_output() {
    let f = fixture(MetricDeformation::NearestNode);
    let mut shape = NodeDataFile::new(NodeDataKind::Shape, 4);
    shape.add_float_column("lh.sulc", &[0.5, 1.5, 2.5, 3.5]).unwrap();
    let input = f.source_dir.join("lh.sulc");
    FsCurv::from_node_data(&shape, 0).unwrap().to_file(&input).unwrap();

    let out = deform(&f.map_path, DataFileType::Shape, &input, None, &DeformOptions::default()).unwrap();
    let curv = read_curv(&out).unwrap();
    assert_eq!(vec![0.5, 3.5, 0.0], curv.data);
}

#[test]
fn missing_map_directories_are_reported() {
    let f = fixture(MetricDeformation::NearestNode);
    let mut map = flat_map(Path::new("/no/such/source/dir"), &f.target_dir);
    map.file_version = 2;
    let map_path = f.target_dir.join("broken.deform_map");
    write_deformation_map(&map_path, &map).unwrap();
    let input = f.source_dir.join("thickness.metric");
    write_metric(&input);

    match deform(&map_path, DataFileType::Metric, &input, None, &DeformOptions::default()) {
        Err(DeformError::InvalidDirectory(which, dir)) => {
            assert_eq!("Source", which);
            assert_eq!(PathBuf::from("/no/such/source/dir"), dir);
        }
        other => panic!("expected an invalid directory, got {:?}", other),
    }
}

#[test]
fn flat_coordinates_need_topology_files() {
    let f = fixture(MetricDeformation::NearestNode);
    let input = f.source_dir.join("lh.flat");
    let result = deform(&f.map_path, DataFileType::CoordinateFlat, &input, None, &DeformOptions::default());
    assert!(matches!(result, Err(DeformError::MissingFlatTopology)));

    let named = FlatTopology {
        source: f.source_dir.join("lh.flat.topo"),
        target: f.target_dir.join("atlas.flat.topo"),
        output: PathBuf::new(),
    };
    for topology in [
        FlatTopology {
            source: PathBuf::new(),
            ..named.clone()
        },
        FlatTopology {
            target: PathBuf::new(),
            ..named.clone()
        },
        FlatTopology::default(),
    ] {
        let options = DeformOptions {
            flat_topology: Some(topology),
            ..DeformOptions::default()
        };
        let result = deform(&f.map_path, DataFileType::CoordinateFlat, &input, None, &options);
        assert!(matches!(result, Err(DeformError::MissingFlatTopology)), "{:?}", result);
    }
}

#[test]
fn data_from_a_larger_mesh_is_rejected() {
    let f = fixture(MetricDeformation::NearestNode);
    let mut metric = NodeDataFile::new(NodeDataKind::Metric, 2);
    metric.add_float_column("thickness", &[1.0, 2.0]).unwrap();
    let input = f.source_dir.join("short.metric");
    metric.to_file(&input).unwrap();
    let result = deform(&f.map_path, DataFileType::Metric, &input, None, &DeformOptions::default());
    assert!(matches!(result, Err(DeformError::NodeCountMismatch(4, 2))));
}

#[test]
fn one_bad_file_does_not_stop_a_batch() {
    let f = fixture(MetricDeformation::NearestNode);
    let good = f.source_dir.join("thickness.metric");
    write_metric(&good);
    let missing = f.source_dir.join("missing.metric");
    let map = flat_map(&f.source_dir, &f.target_dir);

    let report = deform_data_files(
        &map,
        "indiv_to_atlas.deform_map",
        DeformOptions::default(),
        &[(DataFileType::Metric, missing), (DataFileType::Metric, good)],
    );
    assert_eq!(1, report.outputs.len());
    assert_eq!(1, report.errors.len());
    assert!(report.errors[0].contains("missing.metric"));
    assert!(f.target_dir.join("deformed_thickness.metric").is_file());
    assert!(matches!(report.into_result(), Err(DeformError::DataFileErrors(_))));
}

fn offset_square(scale: f32) -> BrainMesh {
    BrainMesh::from_points(
        &[
            [1.0 * scale, 1.0 * scale, 0.0],
            [11.0 * scale, 1.0 * scale, 0.0],
            [11.0 * scale, 11.0 * scale, 0.0],
            [1.0 * scale, 11.0 * scale, 0.0],
        ],
        &[[0, 1, 2], [0, 2, 3]],
    )
    .unwrap()
}

#[test]
fn flat_deformation_cuts_triangles_of_lost_nodes() {
    let source = offset_square(1.0);
    let projector = PointProjector::new(&source, SurfaceGeometry::Flat);
    let target = BrainMesh::from_points(&[[0.0; 3]; 5], &[[0, 1, 2], [0, 2, 3], [1, 4, 2]]).unwrap();
    let mut map = DeformationMap::new();
    map.deformation_type = DeformationType::Flat;
    map.set_nodes(vec![
        NodeDeformation::nearest(0),
        NodeDeformation::nearest(1),
        NodeDeformation::nearest(2),
        NodeDeformation::nearest(3),
        NodeDeformation::default(),
    ]);

    let deformed = deform_flat_coordinates(&map, &projector, &target, 20.0).unwrap();
    assert_eq!(2, deformed.num_faces());
    assert_eq!([11.0, 11.0, 0.0], deformed.vertex(2));
    assert_eq!([0.0, 0.0, 0.0], deformed.vertex(4));

    let cut = deform_flat_coordinates(&map, &projector, &target, 5.0).unwrap();
    assert_eq!(0, cut.num_faces());
    assert_eq!([0.0, 0.0, 0.0], cut.vertex(1));
}

#[test]
fn cells_follow_the_map_onto_the_target_fiducial() {
    let flat = offset_square(1.0);
    let surfaces = RegistrationSurfaces {
        source: &flat,
        deformed_source: &flat,
        target: &flat,
    };
    let mut map = DeformationMap::new();
    map.deformation_type = DeformationType::Flat;
    let cells = CellProjectionFile {
        projections: vec![CellProjection {
            name: String::from("focus"),
            class_name: String::new(),
            projection: tile([0, 1, 2], [0.5, 0.25, 0.25]),
            fiducial_xyz: [0.0; 3],
        }],
    };

    let target_fiducial = offset_square(2.0);
    let moved = deform_cells(&map, &cells, &surfaces, &target_fiducial);
    let xyz = moved.projections[0].fiducial_xyz;
    // 0.5 * (1, 1) + 0.25 * (11, 1) + 0.25 * (11, 11) on the flat square, doubled on the fiducial.
    assert_abs_diff_eq!(12.0, xyz[0], epsilon = 1e-3);
    assert_abs_diff_eq!(7.0, xyz[1], epsilon = 1e-3);
    assert_eq!("focus", moved.projections[0].name);
}
