use std::fs::File;
use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use neurodeform::deformation_map::MapEncoding;
use neurodeform::{
    read_deformation_map, read_deformation_map_header, write_deformation_map, BorderFileType, DeformError,
    DeformationMap, DeformationType, MetricDeformation, NodeDeformation,
};

fn sample_map() -> DeformationMap {
    let mut map = DeformationMap::new();
    map.deformation_type = DeformationType::SphereMultiStageVector;
    map.source.directory = String::from("/data/indiv");
    map.source.spec = String::from("indiv.L.spec");
    map.source.border = String::from("indiv.L.landmarks.border");
    map.source.border_type = BorderFileType::Spherical;
    map.target.directory = String::from("/data/atlas");
    map.target.sphere_coord = String::from("atlas.L.sphere");
    map.metric_deformation = MetricDeformation::AverageTileNodes;
    map.set_nodes(vec![
        NodeDeformation {
            tile_nodes: [4, 7, 9],
            tile_areas: [0.25, 0.5, 0.25],
        },
        NodeDeformation::nearest(3),
        NodeDeformation::default(),
    ]);
    map
}

#[test]
fn ascii_and_binary_maps_read_back_the_same() {
    let dir = tempfile::tempdir().unwrap();
    let ascii = dir.path().join("ascii.deform_map");
    let binary = dir.path().join("binary.deform_map");
    let map = sample_map();
    write_deformation_map(&ascii, &map).unwrap();
    let mut bin_map = map.clone();
    bin_map.encoding = MapEncoding::Binary;
    write_deformation_map(&binary, &bin_map).unwrap();

    let from_ascii = read_deformation_map(&ascii).unwrap();
    let from_binary = read_deformation_map(&binary).unwrap();
    assert_eq!(map, from_ascii);
    assert_eq!(from_ascii.nodes(), from_binary.nodes());
    assert_eq!(MapEncoding::Binary, from_binary.encoding);
}

#[test]
fn gzipped_maps_can_be_read() {
    let dir = tempfile::tempdir().unwrap();
    let mut text: Vec<u8> = Vec::new();
    sample_map().write_to(&mut text).unwrap();
    let path = dir.path().join("indiv_to_atlas.deform_map.gz");
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    encoder.write_all(&text).unwrap();
    encoder.finish().unwrap();

    assert_eq!(sample_map(), read_deformation_map(&path).unwrap());
}

#[test]
fn the_header_can_be_read_without_the_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("indiv_to_atlas.deform_map");
    write_deformation_map(&path, &sample_map()).unwrap();

    let header = read_deformation_map_header(&path).unwrap();
    assert_eq!(0, header.number_of_nodes());
    assert_eq!(DeformationType::SphereMultiStageVector, header.deformation_type);
    assert_eq!("indiv.L.spec", header.source.spec);
    assert_eq!(MetricDeformation::AverageTileNodes, header.metric_deformation);
}

#[test]
fn a_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = read_deformation_map(dir.path().join("nope.deform_map"));
    assert!(matches!(result, Err(DeformError::Io(_))));
}

#[test]
fn deformed_files_land_in_the_target_directory() {
    let map = sample_map();
    assert_eq!(
        std::path::PathBuf::from("/data/atlas/deformed_thickness.metric"),
        map.deformed_file_name("/data/indiv/thickness.metric")
    );
    assert!(format!("{}", map).contains("3 target nodes"));
}
