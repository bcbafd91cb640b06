use approx::assert_abs_diff_eq;
use neurodeform::border::BorderMatch;
use neurodeform::{
    resample_border_sets, Border, BorderFile, BorderFileType, BorderProjectionFile, BorderResampling, BrainMesh,
    DeformError, PointProjector, SurfaceGeometry,
};

fn arc(name: &str, n: usize, length: f32) -> Border {
    let links = (0..n)
        .map(|i| [length * i as f32 / (n - 1) as f32, 0.5 * i as f32, 0.0])
        .collect();
    Border::new(name, 5.0, links)
}

#[test]
fn borders_read_from_disk_are_resampled_pairwise() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("source.border");
    let target_path = dir.path().join("target.border");
    BorderFile::new(
        BorderFileType::Flat,
        vec![arc("LANDMARK.CentralSulcus", 7, 60.0), arc("LANDMARK.Calcarine", 3, 20.0)],
    )
    .to_file(&source_path)
    .unwrap();
    BorderFile::new(
        BorderFileType::Flat,
        vec![arc("LANDMARK.Calcarine", 40, 25.0), arc("LANDMARK.CentralSulcus", 12, 55.0)],
    )
    .to_file(&target_path)
    .unwrap();

    let source = BorderFile::from_file(&source_path).unwrap();
    let target = BorderFile::from_file(&target_path).unwrap();
    let resampled = resample_border_sets(&source, &target, BorderResampling::Value, 2.0, false, false).unwrap();

    assert!(!resampled.source_flipped);
    for (s, t) in resampled.source.borders.iter().zip(resampled.target.borders.iter()) {
        assert_eq!(s.name, t.name);
        assert_eq!(s.num_links(), t.num_links());
        assert!(s.num_links() >= 2);
    }
    let central = resampled
        .target
        .border_by_name("LANDMARK.CentralSulcus", BorderMatch::Exact)
        .unwrap();
    let first = central.links[0];
    assert_abs_diff_eq!(0.0, first[0], epsilon = 1e-5);
    let last = central.links[central.num_links() - 1];
    assert_abs_diff_eq!(55.0, last[0], epsilon = 1e-3);
}

#[test]
fn count_mismatch_is_reported_before_anything_changes() {
    let source = BorderFile::new(BorderFileType::Flat, vec![arc("A", 4, 10.0)]);
    let target = BorderFile::new(BorderFileType::Flat, vec![arc("A", 4, 10.0), arc("B", 4, 10.0)]);
    match resample_border_sets(&source, &target, BorderResampling::Value, 1.0, false, false) {
        Err(DeformError::BorderCountMismatch(s, t)) => {
            assert_eq!(1, s);
            assert_eq!(2, t);
        }
        other => panic!("expected a count mismatch, got {:?}", other),
    }
}

#[test]
fn the_resampling_policy_can_come_from_the_border_file() {
    let source = BorderFile::new(BorderFileType::Flat, vec![arc("A", 3, 20.0)]);
    let target = BorderFile::new(BorderFileType::Flat, vec![arc("A", 9, 20.0)]);
    let kept = resample_border_sets(&source, &target, BorderResampling::None, 0.0, false, false).unwrap();
    assert_eq!(3, kept.source.borders[0].num_links());
    assert_eq!(9, kept.target.borders[0].num_links());

    let own = resample_border_sets(&source, &target, BorderResampling::FromBorderFile, 0.0, false, false).unwrap();
    assert_eq!(own.source.borders[0].num_links(), own.target.borders[0].num_links());
    assert!(own.source.borders[0].num_links() > 3);
}

#[test]
fn hemispheres_are_flipped_once() {
    let source = BorderFile::new(BorderFileType::Flat, vec![arc("A", 5, 20.0)]);
    let target = source.clone();
    let flipped = resample_border_sets(&source, &target, BorderResampling::None, 0.0, true, false).unwrap();
    assert!(flipped.source_flipped);
    assert_abs_diff_eq!(-20.0, flipped.source.borders[0].links[4][0], epsilon = 1e-5);

    let again = resample_border_sets(&flipped.source, &target, BorderResampling::None, 0.0, true, true).unwrap();
    assert!(again.source_flipped);
    assert_abs_diff_eq!(-20.0, again.source.borders[0].links[4][0], epsilon = 1e-5);
}

#[test]
fn border_projections_carry_borders_between_meshes() {
    let flat = BrainMesh::from_points(
        &[[0.0, 0.0, 0.0], [40.0, 0.0, 0.0], [40.0, 40.0, 0.0], [0.0, 40.0, 0.0]],
        &[[0, 1, 2], [0, 2, 3]],
    )
    .unwrap();
    let projector = PointProjector::new(&flat, SurfaceGeometry::Flat);
    let borders = BorderFile::new(
        BorderFileType::Flat,
        vec![Border::new("A", 5.0, vec![[5.0, 5.0, 0.0], [20.0, 30.0, 0.0], [35.0, 10.0, 0.0]])],
    );
    let projected = BorderProjectionFile::project(&borders, &projector);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.borderproj");
    projected.to_file(&path).unwrap();
    let reread = BorderProjectionFile::from_file(&path).unwrap();

    let stretched = flat.with_points(&flat.points().iter().map(|p| [p[0] * 2.0, p[1], p[2]]).collect::<Vec<_>>()).unwrap();
    let moved = reread.unproject(&stretched, BorderFileType::Flat);
    assert_eq!(BorderFileType::Flat, moved.configuration);
    let links = &moved.borders[0].links;
    assert_eq!(3, links.len());
    assert_abs_diff_eq!(40.0, links[1][0], epsilon = 1e-3);
    assert_abs_diff_eq!(30.0, links[1][1], epsilon = 1e-3);
}
