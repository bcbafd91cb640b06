//! Barycentric point location on flat and spherical brain meshes.
//!
//! A [`PointProjector`] is built once per mesh. It owns the mesh adjacency and a uniform
//! bucket grid over the connected vertices, so that the many queries issued while building a
//! deformation map only look at a handful of candidate triangles each.

use std::collections::HashSet;

use crate::deformation_map::NodeDeformation;
use crate::mesh::{
    dot, signed_triangle_area_2d, signed_triangle_area_3d, triangle_normal, BrainMesh,
    MeshAdjacency, SurfaceGeometry,
};
use crate::util::{distance_squared, vector_length};

/// Squared distance below which a point that lies in no triangle counts as sitting on its nearest vertex.
pub const ON_NODE_TOLERANCE_SQUARED: f32 = 0.01 * 0.01;

/// Sub-triangle areas down to this (negative) value still count as inside, to catch points on edges.
pub const TILE_AREA_TOLERANCE: f64 = -0.01;

/// A point located inside a triangle.
///
/// `weights[k]` is the barycentric weight of `nodes[k]`; the weights are non-negative and sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileProjection {
    pub tile: usize,
    pub nodes: [usize; 3],
    pub weights: [f32; 3],
}

/// Result of projecting a point onto a mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// The point lies in (or on the border of) a triangle.
    Tile(TileProjection),
    /// The point lies in no triangle, it is represented by the closest vertex.
    Nearest(usize),
}

impl Projection {
    /// The deformation record for this projection. Nearest-vertex results become `{k,k,k}` with weights `{1,0,0}`.
    pub fn to_node_deformation(&self) -> NodeDeformation {
        match *self {
            Projection::Tile(tp) => NodeDeformation {
                tile_nodes: [tp.nodes[0] as i32, tp.nodes[1] as i32, tp.nodes[2] as i32],
                tile_areas: tp.weights,
            },
            Projection::Nearest(v) => NodeDeformation::nearest(v),
        }
    }

    pub fn is_tile(&self) -> bool {
        matches!(self, Projection::Tile(_))
    }
}

/// The result of testing a point against one triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TileTest {
    Outside,
    /// All sub-areas are above the tolerance but at least one is not positive.
    OnEdge(TileProjection),
    Inside(TileProjection),
}

/// Uniform bucket grid over the connected vertices of a mesh.
///
/// Flat meshes are bucketed on x and y only, all other meshes in 3D.
#[derive(Debug, Clone)]
struct VertexLocator {
    dims: usize,
    origin: [f32; 3],
    cell_size: f32,
    counts: [usize; 3],
    buckets: Vec<Vec<usize>>,
    points: Vec<[f32; 3]>,
}

impl VertexLocator {
    fn new(mesh: &BrainMesh, geometry: SurfaceGeometry) -> VertexLocator {
        let dims = match geometry {
            SurfaceGeometry::Flat => 2,
            SurfaceGeometry::Spherical => 3,
        };
        let connected = mesh.connected_vertices();
        let points = mesh.points();
        let used: Vec<usize> = (0..points.len()).filter(|&v| connected[v]).collect();

        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for &v in &used {
            for k in 0..dims {
                min[k] = min[k].min(points[v][k]);
                max[k] = max[k].max(points[v][k]);
            }
        }
        if used.is_empty() {
            min = [0.0; 3];
            max = [0.0; 3];
        }
        for k in dims..3 {
            min[k] = 0.0;
            max[k] = 0.0;
        }

        // Aim for a few vertices per bucket.
        let extent: Vec<f32> = (0..dims).map(|k| (max[k] - min[k]).max(0.0)).collect();
        let volume: f64 = extent.iter().map(|&e| e.max(1e-6) as f64).product();
        let target_buckets = (used.len() / 4).max(1) as f64;
        let mut cell_size = (volume / target_buckets).powf(1.0 / dims as f64) as f32;
        if !(cell_size.is_finite() && cell_size > 0.0) {
            cell_size = 1.0;
        }

        let mut counts = [1usize; 3];
        for k in 0..dims {
            counts[k] = ((extent[k] / cell_size).floor() as usize + 1).min(1 << 10);
        }

        let mut locator = VertexLocator {
            dims,
            origin: min,
            cell_size,
            counts,
            buckets: vec![Vec::new(); counts[0] * counts[1] * counts[2]],
            points,
        };
        for &v in &used {
            let key = locator.cell_of(locator.points[v]);
            let idx = locator.bucket_index(key);
            locator.buckets[idx].push(v);
        }
        locator
    }

    fn cell_of(&self, p: [f32; 3]) -> [usize; 3] {
        let mut key = [0usize; 3];
        for k in 0..self.dims {
            let c = ((p[k] - self.origin[k]) / self.cell_size).floor();
            key[k] = if c <= 0.0 {
                0
            } else {
                (c as usize).min(self.counts[k] - 1)
            };
        }
        key
    }

    fn bucket_index(&self, key: [usize; 3]) -> usize {
        (key[2] * self.counts[1] + key[1]) * self.counts[0] + key[0]
    }

    fn query_distance_squared(&self, q: [f32; 3], v: usize) -> f32 {
        let p = self.points[v];
        if self.dims == 2 {
            let dx = p[0] - q[0];
            let dy = p[1] - q[1];
            dx * dx + dy * dy
        } else {
            distance_squared(p, q)
        }
    }

    /// Lower bound of the distance from `q` to any cell outside the `ring` around `center`.
    fn ring_clearance(&self, q: [f32; 3], center: [usize; 3], ring: usize) -> f32 {
        let mut clearance = f32::MAX;
        for k in 0..self.dims {
            let lo_cell = center[k] as i64 - ring as i64;
            let hi_cell = center[k] as i64 + ring as i64 + 1;
            if lo_cell > 0 {
                let lo = self.origin[k] + lo_cell as f32 * self.cell_size;
                clearance = clearance.min(q[k] - lo);
            }
            if hi_cell < self.counts[k] as i64 {
                let hi = self.origin[k] + hi_cell as f32 * self.cell_size;
                clearance = clearance.min(hi - q[k]);
            }
        }
        clearance.max(0.0)
    }

    /// The connected vertex closest to `q`, or `None` if the mesh has no faces.
    fn nearest(&self, q: [f32; 3]) -> Option<usize> {
        let center = self.cell_of(q);
        let max_ring = *self.counts.iter().max().unwrap_or(&1);
        let mut best: Option<(f32, usize)> = None;
        for ring in 0..=max_ring {
            self.visit_ring(center, ring, |bucket| {
                for &v in bucket {
                    let d = self.query_distance_squared(q, v);
                    if best.map_or(true, |(bd, bv)| d < bd || (d == bd && v < bv)) {
                        best = Some((d, v));
                    }
                }
            });
            if let Some((bd, _)) = best {
                let clearance = self.ring_clearance(q, center, ring);
                if bd < clearance * clearance {
                    break;
                }
            }
        }
        best.map(|(_, v)| v)
    }

    /// Call `f` for every bucket on the shell at Chebyshev distance `ring` from `center`.
    fn visit_ring<F: FnMut(&[usize])>(&self, center: [usize; 3], ring: usize, mut f: F) {
        let r = ring as i64;
        let range = |k: usize| -> (i64, i64) {
            if k < self.dims {
                (
                    (center[k] as i64 - r).max(0),
                    (center[k] as i64 + r).min(self.counts[k] as i64 - 1),
                )
            } else {
                (0, 0)
            }
        };
        let (x0, x1) = range(0);
        let (y0, y1) = range(1);
        let (z0, z1) = range(2);
        for z in z0..=z1 {
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let on_shell = (x - center[0] as i64).abs() == r
                        || (y - center[1] as i64).abs() == r
                        || (self.dims == 3 && (z - center[2] as i64).abs() == r);
                    if !on_shell {
                        continue;
                    }
                    let idx = self.bucket_index([x as usize, y as usize, z as usize]);
                    f(&self.buckets[idx]);
                }
            }
        }
    }
}

/// Nearest connected vertex lookups on an arbitrary 3D surface, such as a folded fiducial surface.
#[derive(Debug, Clone)]
pub struct VertexFinder {
    locator: VertexLocator,
}

impl VertexFinder {
    pub fn new(mesh: &BrainMesh) -> VertexFinder {
        VertexFinder {
            locator: VertexLocator::new(mesh, SurfaceGeometry::Spherical),
        }
    }

    /// The connected vertex closest to `xyz`, `None` if the mesh has no faces.
    pub fn nearest(&self, xyz: [f32; 3]) -> Option<usize> {
        self.locator.nearest(xyz)
    }
}

/// Locates points on a mesh.
///
/// # Examples
///
/// ```
/// use neurodeform::{BrainMesh, PointProjector, Projection, SurfaceGeometry};
///
/// let square = BrainMesh::from_points(
///     &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
///     &[[0, 1, 2], [0, 2, 3]],
/// ).unwrap();
/// let projector = PointProjector::new(&square, SurfaceGeometry::Flat);
/// match projector.project([0.25, 0.1, 0.0]) {
///     Some(Projection::Tile(tp)) => assert_eq!(0, tp.tile),
///     other => panic!("unexpected projection {:?}", other),
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PointProjector<'a> {
    mesh: &'a BrainMesh,
    geometry: SurfaceGeometry,
    adjacency: MeshAdjacency,
    locator: VertexLocator,
    radius: f32,
}

impl<'a> PointProjector<'a> {
    pub fn new(mesh: &'a BrainMesh, geometry: SurfaceGeometry) -> PointProjector<'a> {
        PointProjector {
            mesh,
            geometry,
            adjacency: MeshAdjacency::new(mesh),
            locator: VertexLocator::new(mesh, geometry),
            radius: mesh.spherical_radius(),
        }
    }

    pub fn mesh(&self) -> &BrainMesh {
        self.mesh
    }

    pub fn geometry(&self) -> SurfaceGeometry {
        self.geometry
    }

    pub fn adjacency(&self) -> &MeshAdjacency {
        &self.adjacency
    }

    /// Radial rescale onto the mesh's sphere for spherical meshes; flat meshes take the point as is.
    fn prepare_query(&self, xyz: [f32; 3]) -> [f32; 3] {
        match self.geometry {
            SurfaceGeometry::Flat => xyz,
            SurfaceGeometry::Spherical => {
                let len = vector_length(xyz);
                if len > 0.0 {
                    let scale = self.radius / len;
                    [xyz[0] * scale, xyz[1] * scale, xyz[2] * scale]
                } else {
                    xyz
                }
            }
        }
    }

    /// Index of the connected vertex closest to `xyz`, `None` if the mesh has no faces.
    pub fn nearest_vertex(&self, xyz: [f32; 3]) -> Option<usize> {
        self.locator.nearest(self.prepare_query(xyz))
    }

    /// Project `xyz` onto the mesh, falling back to the nearest vertex when it lies in no triangle.
    ///
    /// Returns `None` only for a mesh without faces.
    pub fn project(&self, xyz: [f32; 3]) -> Option<Projection> {
        let q = self.prepare_query(xyz);
        let nearest = self.locator.nearest(q)?;
        match self.search_tiles(q, nearest) {
            Some(tp) => Some(Projection::Tile(tp)),
            None => Some(Projection::Nearest(nearest)),
        }
    }

    /// Project `xyz` into a triangle without the nearest vertex fallback.
    pub fn project_to_tile(&self, xyz: [f32; 3]) -> Option<TileProjection> {
        let q = self.prepare_query(xyz);
        let nearest = self.locator.nearest(q)?;
        self.search_tiles(q, nearest)
    }

    /// Search the triangles of `nearest`, then those of its neighbors.
    fn search_tiles(&self, q: [f32; 3], nearest: usize) -> Option<TileProjection> {
        let mut searched: HashSet<usize> = HashSet::new();
        let mut degenerate: Option<TileProjection> = None;

        let candidates = std::iter::once(nearest).chain(self.adjacency.neighbors_of(nearest).iter().copied());
        for vertex in candidates {
            for &tile in self.adjacency.faces_of(vertex) {
                if !searched.insert(tile) {
                    continue;
                }
                match self.test_tile(tile, q) {
                    TileTest::Inside(tp) => return Some(tp),
                    TileTest::OnEdge(tp) => degenerate = Some(tp),
                    TileTest::Outside => {}
                }
            }
        }

        if degenerate.is_some() {
            return degenerate;
        }
        if distance_squared(q, self.mesh.vertex(nearest)) <= ON_NODE_TOLERANCE_SQUARED {
            log::debug!("Point is on nearest node {}.", nearest);
        }
        None
    }

    fn test_tile(&self, tile: usize, query: [f32; 3]) -> TileTest {
        let nodes = self.mesh.face(tile);
        let p1 = self.mesh.vertex(nodes[0]);
        let p2 = self.mesh.vertex(nodes[1]);
        let p3 = self.mesh.vertex(nodes[2]);

        let (a1, a2, a3, total) = match self.geometry {
            SurfaceGeometry::Flat => {
                let a1 = signed_triangle_area_2d(p1, p2, query);
                if a1 <= TILE_AREA_TOLERANCE {
                    return TileTest::Outside;
                }
                let a2 = signed_triangle_area_2d(p2, p3, query);
                if a2 <= TILE_AREA_TOLERANCE {
                    return TileTest::Outside;
                }
                let a3 = signed_triangle_area_2d(p3, p1, query);
                if a3 <= TILE_AREA_TOLERANCE {
                    return TileTest::Outside;
                }
                (a1, a2, a3, signed_triangle_area_2d(p1, p2, p3))
            }
            SurfaceGeometry::Spherical => {
                let normal = triangle_normal(p1, p2, p3);
                let q = match ray_from_origin_hits_plane(p1, normal, query) {
                    Some(q) => q,
                    None => return TileTest::Outside,
                };
                let a1 = signed_triangle_area_3d(normal, p1, p2, q);
                if a1 < TILE_AREA_TOLERANCE {
                    return TileTest::Outside;
                }
                let a2 = signed_triangle_area_3d(normal, p2, p3, q);
                if a2 < TILE_AREA_TOLERANCE {
                    return TileTest::Outside;
                }
                let a3 = signed_triangle_area_3d(normal, p3, p1, q);
                if a3 < TILE_AREA_TOLERANCE {
                    return TileTest::Outside;
                }
                (a1, a2, a3, crate::mesh::triangle_area(p1, p2, p3) as f64)
            }
        };

        let inside = a1 > 0.0 && a2 > 0.0 && a3 > 0.0;
        let tp = TileProjection {
            tile,
            nodes,
            weights: barycentric_weights([a1.abs(), a2.abs(), a3.abs()], total),
        };
        if inside {
            TileTest::Inside(tp)
        } else {
            TileTest::OnEdge(tp)
        }
    }
}

/// Turn the three sub-triangle areas `(area(p1,p2,q), area(p2,p3,q), area(p3,p1,q))` into
/// natural-order weights.
///
/// The sub-triangle opposite node `k` is the one at index `(k + 1) % 3`.
fn barycentric_weights(sub_areas: [f64; 3], triangle_area: f64) -> [f32; 3] {
    let sum: f64 = sub_areas.iter().sum();
    if triangle_area <= 0.0 || sum <= 0.0 {
        return [1.0, 0.0, 0.0];
    }
    let mut w = [0.0f32; 3];
    for k in 0..3 {
        w[k] = (sub_areas[(k + 1) % 3] / sum) as f32;
    }
    w
}

/// Where the ray from the origin through `query` hits the plane through `p` with `normal`.
fn ray_from_origin_hits_plane(p: [f32; 3], normal: [f32; 3], query: [f32; 3]) -> Option<[f32; 3]> {
    let denom = dot(normal, query);
    if denom.abs() < 1e-12 {
        return None;
    }
    let t = dot(normal, p) / denom;
    if t <= 0.0 {
        return None;
    }
    Some([query[0] * t, query[1] * t, query[2] * t])
}

/// Reconstruct a point on `mesh` from a deformation record.
///
/// Returns `None` for the no-match sentinel or records referencing vertices `mesh` does not have.
/// A record with zero total weight yields the position of its first node.
pub fn unproject(mesh: &BrainMesh, record: &NodeDeformation) -> Option<[f32; 3]> {
    let n = mesh.num_vertices() as i32;
    if record.tile_nodes.iter().any(|&v| v < 0 || v >= n) {
        return None;
    }
    let p: Vec<[f32; 3]> = record
        .tile_nodes
        .iter()
        .map(|&v| mesh.vertex(v as usize))
        .collect();
    let total: f32 = record.tile_areas.iter().sum();
    if total == 0.0 {
        return Some(p[0]);
    }
    let mut out = [0.0f32; 3];
    for k in 0..3 {
        out[k] = (p[0][k] * record.tile_areas[0]
            + p[1][k] * record.tile_areas[1]
            + p[2][k] * record.tile_areas[2])
            / total;
    }
    Some(out)
}

/// Squared distance of `xyz` to each of the three nodes of a tile projection.
pub(crate) fn distances_to_nodes(mesh: &BrainMesh, nodes: [usize; 3], xyz: [f32; 3]) -> [f32; 3] {
    [
        distance_squared(xyz, mesh.vertex(nodes[0])),
        distance_squared(xyz, mesh.vertex(nodes[1])),
        distance_squared(xyz, mesh.vertex(nodes[2])),
    ]
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn square() -> BrainMesh {
        BrainMesh::from_points(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            &[[0, 1, 2], [0, 2, 3]],
        )
        .unwrap()
    }

    #[test]
    fn a_point_on_the_shared_diagonal_projects_into_a_tile() {
        let mesh = square();
        let pp = PointProjector::new(&mesh, SurfaceGeometry::Flat);
        match pp.project([0.5, 0.5, 0.0]) {
            Some(Projection::Tile(tp)) => {
                assert_abs_diff_eq!(1.0, tp.weights.iter().sum::<f32>(), epsilon = 1e-6);
            }
            other => panic!("expected a tile, got {:?}", other),
        }
    }

    #[test]
    fn a_far_point_falls_back_to_the_nearest_vertex() {
        let mesh = square();
        let pp = PointProjector::new(&mesh, SurfaceGeometry::Flat);
        assert_eq!(Some(Projection::Nearest(2)), pp.project([5.0, 5.0, 0.0]));
        let rec = pp.project([5.0, 5.0, 0.0]).unwrap().to_node_deformation();
        assert_eq!([2, 2, 2], rec.tile_nodes);
        assert_eq!([1.0, 0.0, 0.0], rec.tile_areas);
    }

    #[test]
    fn weights_reconstruct_the_query_point() {
        let mesh = square();
        let pp = PointProjector::new(&mesh, SurfaceGeometry::Flat);
        let q = [0.7, 0.2, 0.0];
        let tp = pp.project_to_tile(q).unwrap();
        assert_eq!(0, tp.tile);
        let rec = Projection::Tile(tp).to_node_deformation();
        let back = unproject(&mesh, &rec).unwrap();
        assert_abs_diff_eq!(q[0], back[0], epsilon = 1e-5);
        assert_abs_diff_eq!(q[1], back[1], epsilon = 1e-5);
    }

    #[test]
    fn sub_areas_are_rotated_into_natural_order() {
        // area(p1,p2,q) weights node 2, area(p2,p3,q) node 0, area(p3,p1,q) node 1
        let w = barycentric_weights([0.3, 0.2, 0.5], 1.0);
        assert_abs_diff_eq!(0.2, w[0], epsilon = 1e-6);
        assert_abs_diff_eq!(0.5, w[1], epsilon = 1e-6);
        assert_abs_diff_eq!(0.3, w[2], epsilon = 1e-6);
    }

    #[test]
    fn degenerate_tiles_weight_the_first_node() {
        assert_eq!([1.0, 0.0, 0.0], barycentric_weights([0.0, 0.0, 0.0], 0.0));
    }

    #[test]
    fn the_sentinel_cannot_be_unprojected() {
        let mesh = square();
        assert_eq!(None, unproject(&mesh, &NodeDeformation::default()));
    }

    #[test]
    fn a_mesh_without_faces_projects_nothing() {
        let mesh = BrainMesh::new(vec![0.0; 6], vec![]).unwrap();
        let pp = PointProjector::new(&mesh, SurfaceGeometry::Flat);
        assert_eq!(None, pp.project([0.0, 0.0, 0.0]));
    }

    #[test]
    fn spherical_queries_are_pushed_onto_the_sphere() {
        // octahedron of radius 1
        let mesh = BrainMesh::from_points(
            &[
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [-1.0, 0.0, 0.0],
                [0.0, -1.0, 0.0],
                [0.0, 0.0, 1.0],
                [0.0, 0.0, -1.0],
            ],
            &[
                [0, 1, 4],
                [1, 2, 4],
                [2, 3, 4],
                [3, 0, 4],
                [1, 0, 5],
                [2, 1, 5],
                [3, 2, 5],
                [0, 3, 5],
            ],
        )
        .unwrap();
        let pp = PointProjector::new(&mesh, SurfaceGeometry::Spherical);
        let tp = pp.project_to_tile([10.0, 10.0, 10.0]).unwrap();
        assert_eq!(0, tp.tile);
        for w in tp.weights.iter() {
            assert_abs_diff_eq!(1.0 / 3.0, *w, epsilon = 1e-4);
        }
    }

    #[test]
    fn nearest_vertex_search_agrees_with_a_linear_scan() {
        let mut points = Vec::new();
        let mut faces = Vec::new();
        let n = 12;
        for j in 0..n {
            for i in 0..n {
                points.push([i as f32 * 0.7, j as f32 * 1.3, 0.0]);
            }
        }
        for j in 0..n - 1 {
            for i in 0..n - 1 {
                let a = j * n + i;
                faces.push([a, a + 1, a + n + 1]);
                faces.push([a, a + n + 1, a + n]);
            }
        }
        let mesh = BrainMesh::from_points(&points, &faces).unwrap();
        let pp = PointProjector::new(&mesh, SurfaceGeometry::Flat);
        for q in [[3.1f32, 4.4, 0.0], [-2.0, 20.0, 0.0], [7.65, 0.1, 0.0]] {
            let expected = (0..points.len())
                .min_by(|&a, &b| {
                    let da = (points[a][0] - q[0]).powi(2) + (points[a][1] - q[1]).powi(2);
                    let db = (points[b][0] - q[0]).powi(2) + (points[b][1] - q[1]).powi(2);
                    da.partial_cmp(&db).unwrap()
                })
                .unwrap();
            assert_eq!(Some(expected), pp.nearest_vertex(q));
        }
    }
}
