use criterion::{black_box, criterion_group, criterion_main, Criterion};
use neurodeform::deform_data::deform_node_data;
use neurodeform::{
    create_node_deformation, resample_border_sets, Border, BorderFile, BorderFileType, BorderResampling, BrainMesh,
    DeformationMap, MetricDeformation, NodeDataFile, NodeDataKind, SurfaceGeometry,
};

/// A latitude/longitude sphere with `rings` rings of `segments` vertices plus the two poles.
fn uv_sphere(rings: usize, segments: usize, radius: f32) -> BrainMesh {
    let mut points = vec![[0.0, 0.0, radius]];
    for i in 1..=rings {
        let theta = std::f32::consts::PI * i as f32 / (rings + 1) as f32;
        for j in 0..segments {
            let phi = std::f32::consts::TAU * j as f32 / segments as f32;
            points.push([
                radius * theta.sin() * phi.cos(),
                radius * theta.sin() * phi.sin(),
                radius * theta.cos(),
            ]);
        }
    }
    points.push([0.0, 0.0, -radius]);
    let south = points.len() - 1;
    let at = |ring: usize, seg: usize| 1 + ring * segments + seg % segments;

    let mut faces = Vec::new();
    for j in 0..segments {
        faces.push([0, at(0, j), at(0, j + 1)]);
        faces.push([south, at(rings - 1, j + 1), at(rings - 1, j)]);
    }
    for i in 0..rings - 1 {
        for j in 0..segments {
            faces.push([at(i, j), at(i + 1, j), at(i + 1, j + 1)]);
            faces.push([at(i, j), at(i + 1, j + 1), at(i, j + 1)]);
        }
    }
    BrainMesh::from_points(&points, &faces).unwrap()
}

fn rotated(mesh: &BrainMesh, angle: f32) -> BrainMesh {
    let (s, c) = angle.sin_cos();
    let points: Vec<[f32; 3]> = mesh
        .points()
        .iter()
        .map(|p| [c * p[0] - s * p[1], s * p[0] + c * p[1], p[2]])
        .collect();
    mesh.with_points(&points).unwrap()
}

fn bench_projection(c: &mut Criterion) {
    let target = uv_sphere(120, 240, 100.0);
    let deformed = rotated(&target, 0.01);
    c.bench_function("create_node_deformation", |b| {
        b.iter(|| create_node_deformation(black_box(&deformed), black_box(&target), SurfaceGeometry::Spherical))
    });

    let mut map = DeformationMap::new();
    map.metric_deformation = MetricDeformation::AverageTileNodes;
    map.set_nodes(create_node_deformation(&deformed, &target, SurfaceGeometry::Spherical));
    let values: Vec<f32> = (0..deformed.num_vertices()).map(|v| v as f32).collect();
    let mut metric = NodeDataFile::new(NodeDataKind::Metric, values.len());
    metric.add_float_column("index", &values).unwrap();
    c.bench_function("deform_node_data", |b| {
        b.iter(|| deform_node_data(black_box(&map), black_box(&metric)).unwrap())
    });
}

fn bench_resampling(c: &mut Criterion) {
    let borders: Vec<Border> = (0..20)
        .map(|k| {
            let links = (0..500)
                .map(|i| {
                    let a = i as f32 / 100.0;
                    [100.0 * a.cos(), 100.0 * a.sin(), k as f32]
                })
                .collect();
            Border::new(&format!("LANDMARK.{}", k), 1.0, links)
        })
        .collect();
    let source = BorderFile::new(BorderFileType::Spherical, borders);
    let target = source.clone();
    c.bench_function("resample_border_sets", |b| {
        b.iter(|| {
            resample_border_sets(
                black_box(&source),
                black_box(&target),
                BorderResampling::Value,
                2.0,
                false,
                false,
            )
            .unwrap()
        })
    });
}

criterion_group!(benches, bench_projection, bench_resampling);
criterion_main!(benches);
