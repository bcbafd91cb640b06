//! Triangle meshes of brain surfaces and the topology queries needed to work with them.

use std::fmt;

use crate::error::{DeformError, Result};
use crate::util::vector_length;

/// Geometric regime of a registration surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceGeometry {
    /// A cut, flattened surface. All z coordinates are zero.
    Flat,
    /// A closed surface registered onto a sphere around the origin.
    Spherical,
}

/// A brain mesh: vertex coordinates and triangles, stored as flat arrays.
///
/// `vertices` holds 3 coordinates per vertex, `faces` holds 3 vertex indices per triangle.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct BrainMesh {
    pub vertices: Vec<f32>,
    pub faces: Vec<i32>,
}

impl BrainMesh {
    /// Create a mesh from flat coordinate and face arrays, checking that every face index refers to an existing vertex.
    pub fn new(vertices: Vec<f32>, faces: Vec<i32>) -> Result<BrainMesh> {
        if vertices.len() % 3 != 0 {
            return Err(DeformError::InvalidParameter(format!(
                "vertex array length {} is not a multiple of 3",
                vertices.len()
            )));
        }
        if faces.len() % 3 != 0 {
            return Err(DeformError::InvalidParameter(format!(
                "face array length {} is not a multiple of 3",
                faces.len()
            )));
        }
        let num_vertices = (vertices.len() / 3) as i32;
        if let Some(bad) = faces.iter().find(|&&v| v < 0 || v >= num_vertices) {
            return Err(DeformError::InvalidParameter(format!(
                "face references vertex {} but the mesh has {} vertices",
                bad, num_vertices
            )));
        }
        Ok(BrainMesh { vertices, faces })
    }

    /// Create a mesh from per-vertex points and per-face index triples.
    ///
    /// # Examples
    ///
    /// ```
    /// let square = neurodeform::BrainMesh::from_points(
    ///     &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
    ///     &[[0, 1, 2], [0, 2, 3]],
    /// ).unwrap();
    /// assert_eq!(4, square.num_vertices());
    /// assert!(square.is_flat());
    /// ```
    pub fn from_points(points: &[[f32; 3]], triangles: &[[usize; 3]]) -> Result<BrainMesh> {
        let vertices = points.iter().flat_map(|p| p.iter().copied()).collect();
        let faces = triangles
            .iter()
            .flat_map(|t| t.iter().map(|&v| v as i32))
            .collect();
        BrainMesh::new(vertices, faces)
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len() / 3
    }

    /// The coordinate of vertex `index`.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn vertex(&self, index: usize) -> [f32; 3] {
        let i = index * 3;
        [self.vertices[i], self.vertices[i + 1], self.vertices[i + 2]]
    }

    pub fn set_vertex(&mut self, index: usize, xyz: [f32; 3]) {
        let i = index * 3;
        self.vertices[i..i + 3].copy_from_slice(&xyz);
    }

    /// The vertex indices of face `index`.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn face(&self, index: usize) -> [usize; 3] {
        let i = index * 3;
        [
            self.faces[i] as usize,
            self.faces[i + 1] as usize,
            self.faces[i + 2] as usize,
        ]
    }

    /// All vertex coordinates as points.
    pub fn points(&self) -> Vec<[f32; 3]> {
        self.vertices
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect()
    }

    /// A copy of this mesh with the same topology but different coordinates.
    pub fn with_points(&self, points: &[[f32; 3]]) -> Result<BrainMesh> {
        if points.len() != self.num_vertices() {
            return Err(DeformError::VertexCountMismatch(
                self.num_vertices(),
                points.len(),
            ));
        }
        Ok(BrainMesh {
            vertices: points.iter().flat_map(|p| p.iter().copied()).collect(),
            faces: self.faces.clone(),
        })
    }

    /// A copy of this mesh's coordinates combined with the faces of `topology`.
    pub fn with_topology_of(&self, topology: &BrainMesh) -> Result<BrainMesh> {
        BrainMesh::new(self.vertices.clone(), topology.faces.clone())
    }

    /// Average distance of the vertices from the origin.
    pub fn spherical_radius(&self) -> f32 {
        let n = self.num_vertices();
        if n == 0 {
            return 0.0;
        }
        let total: f64 = self
            .vertices
            .chunks_exact(3)
            .map(|c| vector_length([c[0], c[1], c[2]]) as f64)
            .sum();
        (total / n as f64) as f32
    }

    /// Whether all vertices lie in the z = 0 plane.
    pub fn is_flat(&self) -> bool {
        self.vertices.chunks_exact(3).all(|c| c[2] == 0.0)
    }

    /// Flat if all z coordinates are zero, spherical otherwise.
    pub fn geometry(&self) -> SurfaceGeometry {
        if self.is_flat() {
            SurfaceGeometry::Flat
        } else {
            SurfaceGeometry::Spherical
        }
    }

    /// Mirror the mesh on the x = 0 plane.
    pub fn flip_x(&mut self) {
        for c in self.vertices.chunks_exact_mut(3) {
            c[0] = -c[0];
        }
    }

    /// Push every vertex radially onto a sphere of the given radius. Vertices at the origin stay there.
    pub fn project_to_sphere(&mut self, radius: f32) {
        for c in self.vertices.chunks_exact_mut(3) {
            let len = vector_length([c[0], c[1], c[2]]);
            if len > 0.0 {
                let scale = radius / len;
                c[0] *= scale;
                c[1] *= scale;
                c[2] *= scale;
            }
        }
    }

    /// Flags for all vertices that are used by at least one face.
    pub fn connected_vertices(&self) -> Vec<bool> {
        let mut connected = vec![false; self.num_vertices()];
        for &v in &self.faces {
            connected[v as usize] = true;
        }
        connected
    }

    /// Area-weighted smoothing.
    ///
    /// Each vertex moves towards the area-weighted average of the centers of its incident
    /// triangles. A `strength` of 1.0 moves it all the way.
    pub fn smooth_areal(&mut self, adjacency: &MeshAdjacency, strength: f32, iterations: usize) {
        let num_vertices = self.num_vertices();
        for _ in 0..iterations {
            let points = self.points();
            for v in 0..num_vertices {
                let faces = adjacency.faces_of(v);
                if faces.is_empty() {
                    continue;
                }
                let mut weighted = [0.0f64; 3];
                let mut total_area = 0.0f64;
                for &f in faces {
                    let [a, b, c] = self.face(f);
                    let (pa, pb, pc) = (points[a], points[b], points[c]);
                    let area = triangle_area(pa, pb, pc) as f64;
                    for k in 0..3 {
                        weighted[k] += area * (pa[k] + pb[k] + pc[k]) as f64 / 3.0;
                    }
                    total_area += area;
                }
                if total_area <= 0.0 {
                    continue;
                }
                let old = points[v];
                let mut new = old;
                for k in 0..3 {
                    let avg = (weighted[k] / total_area) as f32;
                    new[k] = old[k] * (1.0 - strength) + avg * strength;
                }
                self.set_vertex(v, new);
            }
        }
    }

    /// Length of the longest edge of face `index`.
    pub fn longest_edge(&self, index: usize) -> f32 {
        let [a, b, c] = self.face(index);
        let (pa, pb, pc) = (self.vertex(a), self.vertex(b), self.vertex(c));
        crate::util::distance(pa, pb)
            .max(crate::util::distance(pb, pc))
            .max(crate::util::distance(pc, pa))
    }
}

impl fmt::Display for BrainMesh {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Brain mesh with {} vertices and {} faces.",
            self.num_vertices(),
            self.num_faces()
        )
    }
}

/// Unsigned area of the triangle (p1, p2, p3).
pub fn triangle_area(p1: [f32; 3], p2: [f32; 3], p3: [f32; 3]) -> f32 {
    let n = cross(sub(p2, p1), sub(p3, p1));
    0.5 * vector_length(n)
}

/// Signed area of the triangle (p1, p2, q) in the xy plane. Positive for counter-clockwise order.
pub fn signed_triangle_area_2d(p1: [f32; 3], p2: [f32; 3], q: [f32; 3]) -> f64 {
    let (ax, ay) = (p1[0] as f64, p1[1] as f64);
    let (bx, by) = (p2[0] as f64, p2[1] as f64);
    let (cx, cy) = (q[0] as f64, q[1] as f64);
    0.5 * ((bx - ax) * (cy - ay) - (cx - ax) * (by - ay))
}

/// Signed area of the triangle (p1, p2, q), positive when its winding agrees with `normal`.
pub fn signed_triangle_area_3d(normal: [f32; 3], p1: [f32; 3], p2: [f32; 3], q: [f32; 3]) -> f64 {
    let n = cross(sub(p2, p1), sub(q, p1));
    let area = 0.5 * vector_length(n) as f64;
    if dot(n, normal) < 0.0 {
        -area
    } else {
        area
    }
}

/// Unit normal of the triangle (p1, p2, p3), or zero for a degenerate triangle.
pub fn triangle_normal(p1: [f32; 3], p2: [f32; 3], p3: [f32; 3]) -> [f32; 3] {
    let n = cross(sub(p2, p1), sub(p3, p1));
    let len = vector_length(n);
    if len > 0.0 {
        [n[0] / len, n[1] / len, n[2] / len]
    } else {
        [0.0; 3]
    }
}

pub(crate) fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub(crate) fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Vertex to face and vertex to vertex adjacency of a mesh.
///
/// Neighbors are listed in order of first appearance while walking the faces.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshAdjacency {
    vertex_faces: Vec<Vec<usize>>,
    vertex_neighbors: Vec<Vec<usize>>,
}

impl MeshAdjacency {
    pub fn new(mesh: &BrainMesh) -> MeshAdjacency {
        let n = mesh.num_vertices();
        let mut vertex_faces = vec![Vec::new(); n];
        let mut vertex_neighbors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for f in 0..mesh.num_faces() {
            let tri = mesh.face(f);
            for k in 0..3 {
                let v = tri[k];
                vertex_faces[v].push(f);
                for other in [tri[(k + 1) % 3], tri[(k + 2) % 3]] {
                    if !vertex_neighbors[v].contains(&other) {
                        vertex_neighbors[v].push(other);
                    }
                }
            }
        }
        MeshAdjacency {
            vertex_faces,
            vertex_neighbors,
        }
    }

    pub fn faces_of(&self, vertex: usize) -> &[usize] {
        &self.vertex_faces[vertex]
    }

    pub fn neighbors_of(&self, vertex: usize) -> &[usize] {
        &self.vertex_neighbors[vertex]
    }

    pub fn num_vertices(&self) -> usize {
        self.vertex_faces.len()
    }
}
