//! Applying a deformation map to the data files of the source subject.
//!
//! Per-vertex tables are resampled directly through the map records. Coordinate files are
//! unprojected vertex by vertex. Borders, cells and foci are carried over geometrically: they are
//! located on the source surfaces, moved onto the deformed source surface and located again on
//! the target.
//!
//! Every operation computes its complete result in memory before anything is written.

use rayon::prelude::*;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::border::{BorderFile, BorderProjectionFile};
use crate::cell::{Cell, CellFile, CellProjection, CellProjectionFile};
use crate::deformation_map::{
    BorderFileType, DeformationMap, DeformationType, MetricDeformation, NodeDeformation,
};
use crate::error::{DeformError, Result};
use crate::fs_surface::{read_mesh_with_topology, write_surf};
use crate::mesh::{
    dot, signed_triangle_area_3d, sub, triangle_normal, BrainMesh, MeshAdjacency, SurfaceGeometry,
};
use crate::node_data::{read_node_data, write_node_data, NodeDataFile, NodeDataKind};
use crate::point_projector::{unproject, PointProjector, VertexFinder, TILE_AREA_TOLERANCE};
use crate::spec_file::{tags, SpecFile};
use crate::util::basename;

/// Edges longer than this are cut when deforming flat coordinates, unless configured otherwise.
pub const DEFAULT_MAX_EDGE_LENGTH: f32 = 10.0;

/// Every kind of file a deformation map can be applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFileType {
    ArealEstimation,
    Atlas,
    BorderFlat,
    BorderSpherical,
    BorderProjection,
    Cell,
    CellProjection,
    Coordinate,
    CoordinateFlat,
    Foci,
    FociProjection,
    LatLon,
    Metric,
    Paint,
    RgbPaint,
    Shape,
    Topography,
}

const ALL_DATA_FILE_TYPES: [DataFileType; 17] = [
    DataFileType::ArealEstimation,
    DataFileType::Atlas,
    DataFileType::BorderFlat,
    DataFileType::BorderSpherical,
    DataFileType::BorderProjection,
    DataFileType::Cell,
    DataFileType::CellProjection,
    DataFileType::Coordinate,
    DataFileType::CoordinateFlat,
    DataFileType::Foci,
    DataFileType::FociProjection,
    DataFileType::LatLon,
    DataFileType::Metric,
    DataFileType::Paint,
    DataFileType::RgbPaint,
    DataFileType::Shape,
    DataFileType::Topography,
];

impl DataFileType {
    pub fn all() -> &'static [DataFileType] {
        &ALL_DATA_FILE_TYPES
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataFileType::ArealEstimation => "AREAL_ESTIMATION",
            DataFileType::Atlas => "ATLAS",
            DataFileType::BorderFlat => "BORDER_FLAT",
            DataFileType::BorderSpherical => "BORDER_SPHERICAL",
            DataFileType::BorderProjection => "BORDER_PROJECTION",
            DataFileType::Cell => "CELL",
            DataFileType::CellProjection => "CELL_PROJECTION",
            DataFileType::Coordinate => "COORDINATE",
            DataFileType::CoordinateFlat => "COORDINATE_FLAT",
            DataFileType::Foci => "FOCI",
            DataFileType::FociProjection => "FOCI_PROJECTION",
            DataFileType::LatLon => "LAT_LON",
            DataFileType::Metric => "METRIC",
            DataFileType::Paint => "PAINT",
            DataFileType::RgbPaint => "RGB_PAINT",
            DataFileType::Shape => "SHAPE",
            DataFileType::Topography => "TOPOGRAPHY",
        }
    }

    /// The spec file tag deformed files of this type are listed under.
    pub fn spec_tag(&self) -> &'static str {
        match self {
            DataFileType::ArealEstimation => tags::AREAL_ESTIMATION,
            DataFileType::Atlas => tags::ATLAS,
            DataFileType::BorderFlat => tags::FLAT_BORDER,
            DataFileType::BorderSpherical => tags::SPHERICAL_BORDER,
            DataFileType::BorderProjection => tags::BORDER_PROJECTION,
            DataFileType::Cell => tags::CELL,
            DataFileType::CellProjection => tags::CELL_PROJECTION,
            DataFileType::Coordinate => tags::FIDUCIAL_COORD,
            DataFileType::CoordinateFlat => tags::FLAT_COORD,
            DataFileType::Foci => tags::FOCI,
            DataFileType::FociProjection => tags::FOCI_PROJECTION,
            DataFileType::LatLon => tags::LAT_LON,
            DataFileType::Metric => tags::METRIC,
            DataFileType::Paint => tags::PAINT,
            DataFileType::RgbPaint => tags::RGB_PAINT,
            DataFileType::Shape => tags::SURFACE_SHAPE,
            DataFileType::Topography => tags::TOPOGRAPHY,
        }
    }

    pub fn from_spec_tag(tag: &str) -> Option<DataFileType> {
        ALL_DATA_FILE_TYPES.iter().copied().find(|t| t.spec_tag() == tag)
    }

    /// The table kind for per-vertex data types, `None` for geometric types.
    pub fn node_data_kind(&self) -> Option<NodeDataKind> {
        match self {
            DataFileType::ArealEstimation => Some(NodeDataKind::ArealEstimation),
            DataFileType::Atlas => Some(NodeDataKind::Atlas),
            DataFileType::LatLon => Some(NodeDataKind::LatLon),
            DataFileType::Metric => Some(NodeDataKind::Metric),
            DataFileType::Paint => Some(NodeDataKind::Paint),
            DataFileType::RgbPaint => Some(NodeDataKind::RgbPaint),
            DataFileType::Shape => Some(NodeDataKind::Shape),
            DataFileType::Topography => Some(NodeDataKind::Topography),
            _ => None,
        }
    }

    /// Tag of the color files that go with deformed files of this type.
    pub fn color_tag(&self) -> Option<&'static str> {
        match self {
            DataFileType::Paint => Some(tags::AREA_COLOR),
            DataFileType::BorderFlat | DataFileType::BorderSpherical | DataFileType::BorderProjection => {
                Some(tags::BORDER_COLOR)
            }
            DataFileType::Cell | DataFileType::CellProjection => Some(tags::CELL_COLOR),
            DataFileType::Foci | DataFileType::FociProjection => Some(tags::FOCI_COLOR),
            _ => None,
        }
    }

    pub fn is_coordinate(&self) -> bool {
        matches!(self, DataFileType::Coordinate | DataFileType::CoordinateFlat)
    }
}

impl fmt::Display for DataFileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DataFileType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PROB_ATLAS" => return Ok(DataFileType::Atlas),
            "SURFACE_SHAPE" => return Ok(DataFileType::Shape),
            _ => {}
        }
        ALL_DATA_FILE_TYPES
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| format!("unknown data file type {}", s))
    }
}

/// Topology files needed to deform flat coordinates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlatTopology {
    /// Triangles of the source flat surface, used to check where deformed nodes land.
    pub source: PathBuf,
    /// Triangles of the target, trimmed and written with the deformed coordinates.
    pub target: PathBuf,
    /// Where the trimmed topology is written. Empty writes it next to the deformed coordinates.
    pub output: PathBuf,
}

impl FlatTopology {
    /// Both input topologies are named. `output` may stay empty.
    pub fn is_complete(&self) -> bool {
        !self.source.as_os_str().is_empty() && !self.target.as_os_str().is_empty()
    }
}

/// The flat topology of `options`, or `MissingFlatTopology` if it is absent or incomplete.
fn required_flat_topology(options: &DeformOptions) -> Result<&FlatTopology> {
    match &options.flat_topology {
        Some(topology) if topology.is_complete() => Ok(topology),
        _ => Err(DeformError::MissingFlatTopology),
    }
}

/// Per-call options of data file deformation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeformOptions {
    pub max_edge_length: f32,
    pub flat_topology: Option<FlatTopology>,
    /// Smooth deformed coordinates once. `None` follows the map's setting.
    pub smooth_coordinates: Option<bool>,
}

impl Default for DeformOptions {
    fn default() -> DeformOptions {
        DeformOptions {
            max_edge_length: DEFAULT_MAX_EDGE_LENGTH,
            flat_topology: None,
            smooth_coordinates: None,
        }
    }
}

/// The three registration surfaces a geometric deformation moves through.
///
/// All three have the registration geometry of the map (all flat or all spherical).
#[derive(Debug, Clone, Copy)]
pub struct RegistrationSurfaces<'a> {
    pub source: &'a BrainMesh,
    pub deformed_source: &'a BrainMesh,
    pub target: &'a BrainMesh,
}

impl<'a> RegistrationSurfaces<'a> {
    /// Surfaces to unproject source records on and to project onto for the target.
    ///
    /// A forward map moves features from the source onto the deformed source, which lives in
    /// target space. An inverse map unprojects on its own source and projects onto the deformed
    /// surface, whose vertices are those of its target.
    fn for_map(&self, map: &DeformationMap) -> (&'a BrainMesh, &'a BrainMesh) {
        if map.inverse_deformation {
            (self.source, self.deformed_source)
        } else {
            (self.deformed_source, self.target)
        }
    }
}

/// Resample a per-vertex table onto the target of `map`.
///
/// The result has one row per map node and the columns, names and label table of `file`.
/// Label columns always take the value of the nearest node. Float columns of continuous kinds
/// follow the map's metric mode, those of categorical kinds use the nearest node. A record
/// without nodes yields 0, as does an averaged record that references a missing node.
pub fn deform_node_data(map: &DeformationMap, file: &NodeDataFile) -> Result<NodeDataFile> {
    map.validate_for_source(file.num_nodes())?;
    let average = file.kind.interpolates_floats() && map.metric_deformation == MetricDeformation::AverageTileNodes;
    let num_nodes = map.number_of_nodes();
    let num_floats = file.num_float_columns();
    let num_labels = file.num_label_columns();

    let float_rows: Vec<Vec<f32>> = map
        .nodes()
        .par_iter()
        .map(|record| {
            (0..num_floats)
                .map(|c| {
                    if average {
                        averaged_value(record, |v| file.floats[[v, c]])
                    } else {
                        record.nearest_node().map(|v| file.floats[[v, c]]).unwrap_or(0.0)
                    }
                })
                .collect()
        })
        .collect();
    let label_rows: Vec<Vec<i32>> = map
        .nodes()
        .par_iter()
        .map(|record| {
            (0..num_labels)
                .map(|c| record.nearest_node().map(|v| file.labels[[v, c]]).unwrap_or(0))
                .collect()
        })
        .collect();

    let mut out = file.clone();
    out.floats = ndarray::Array2::from_shape_fn((num_nodes, num_floats), |(i, c)| float_rows[i][c]);
    out.labels = ndarray::Array2::from_shape_fn((num_nodes, num_labels), |(i, c)| label_rows[i][c]);
    Ok(out)
}

fn averaged_value<F: Fn(usize) -> f32>(record: &NodeDeformation, value: F) -> f32 {
    if record.tile_nodes.iter().any(|&v| v < 0) {
        return 0.0;
    }
    let total: f32 = record.tile_areas.iter().sum();
    if total <= 0.0 {
        return value(record.tile_nodes[0] as usize);
    }
    let sum: f32 = (0..3)
        .map(|k| record.tile_areas[k] * value(record.tile_nodes[k] as usize))
        .sum();
    sum / total
}

/// The comment of a deformed file: where it came from, then the comment of the input.
pub fn provenance_comment(input_name: &str, map_name: &str, comment: &str) -> String {
    let mut text = format!(
        "Deformed from: {}\nDeformed with: {}\n",
        basename(input_name),
        basename(map_name)
    );
    text.push_str(comment);
    text
}

/// Carry coordinates of the source subject over to the target.
///
/// Each target vertex is the weighted position of its record on `source_coords`; records without
/// nodes put the vertex at the origin. The result uses the triangles of `target_topology`.
/// With `smooth`, one pass of areal smoothing is applied unless the result is flat.
pub fn deform_coordinates(
    map: &DeformationMap,
    source_coords: &BrainMesh,
    target_topology: &BrainMesh,
    smooth: bool,
) -> Result<BrainMesh> {
    map.validate_for_source(source_coords.num_vertices())?;
    let points: Vec<[f32; 3]> = map
        .nodes()
        .par_iter()
        .map(|record| unproject(source_coords, record).unwrap_or([0.0; 3]))
        .collect();
    let mut deformed = target_topology.with_points(&points)?;
    if smooth && !deformed.is_flat() {
        let adjacency = MeshAdjacency::new(&deformed);
        deformed.smooth_areal(&adjacency, 1.0, 1);
    }
    Ok(deformed)
}

/// Carry flat coordinates over to the target and cut the target topology where the flat map
/// tears.
///
/// Nodes that end up at the origin, nodes that do not land in a triangle of `source_flat` and the
/// nodes of every triangle with an edge longer than `max_edge_length` are removed: their
/// triangles are deleted and they are moved to the origin.
pub fn deform_flat_coordinates(
    map: &DeformationMap,
    source_flat: &PointProjector,
    target_topology: &BrainMesh,
    max_edge_length: f32,
) -> Result<BrainMesh> {
    let deformed = deform_coordinates(map, source_flat.mesh(), target_topology, false)?;
    let mut removed: Vec<bool> = deformed
        .points()
        .par_iter()
        .map(|&xyz| xyz == [0.0; 3] || source_flat.project_to_tile(xyz).is_none())
        .collect();
    for f in 0..deformed.num_faces() {
        if deformed.longest_edge(f) > max_edge_length {
            for v in deformed.face(f) {
                removed[v] = true;
            }
        }
    }

    let mut faces = Vec::with_capacity(deformed.faces.len());
    for f in 0..deformed.num_faces() {
        let tri = deformed.face(f);
        if tri.iter().all(|&v| !removed[v]) {
            faces.extend(tri.iter().map(|&v| v as i32));
        }
    }
    let mut vertices = deformed.vertices;
    for (v, &r) in removed.iter().enumerate() {
        if r {
            vertices[3 * v..3 * v + 3].copy_from_slice(&[0.0; 3]);
        }
    }
    log::info!(
        "Flat deformation kept {} of {} triangles.",
        faces.len() / 3,
        target_topology.num_faces()
    );
    BrainMesh::new(vertices, faces)
}

/// Carry projected borders over to the target registration surface.
///
/// The returned projections are on the target. Links that land in no triangle are dropped, as
/// are borders left without links.
pub fn deform_borders(
    map: &DeformationMap,
    borders: &BorderProjectionFile,
    surfaces: &RegistrationSurfaces,
) -> BorderProjectionFile {
    let (unproject_on, project_on) = surfaces.for_map(map);
    let moved = borders.unproject(unproject_on, BorderFileType::Unknown);
    let projector = PointProjector::new(project_on, map.deformation_type.geometry());
    BorderProjectionFile::project(&moved, &projector)
}

/// Carry projected cells or foci over to the target.
///
/// The returned records are on the target; their stored position is on `target_fiducial`. A
/// point in no target triangle uses the nearest target vertex, a point that cannot be placed at
/// all ends up at the origin.
pub fn deform_cells(
    map: &DeformationMap,
    cells: &CellProjectionFile,
    surfaces: &RegistrationSurfaces,
    target_fiducial: &BrainMesh,
) -> CellProjectionFile {
    let (unproject_on, project_on) = surfaces.for_map(map);
    let projector = PointProjector::new(project_on, map.deformation_type.geometry());
    let projections = cells
        .projections
        .par_iter()
        .map(|cp| {
            let projection = unproject(unproject_on, &cp.projection)
                .and_then(|xyz| projector.project(xyz))
                .map(|p| p.to_node_deformation())
                .unwrap_or_default();
            CellProjection {
                name: cp.name.clone(),
                class_name: cp.class_name.clone(),
                projection,
                fiducial_xyz: unproject(target_fiducial, &projection).unwrap_or([0.0; 3]),
            }
        })
        .collect();
    CellProjectionFile { projections }
}

/// Locates points on a folded surface: the triangles around the nearest vertex are tried with
/// the point dropped onto their plane, else the nearest vertex is used.
struct FiducialProjector<'a> {
    mesh: &'a BrainMesh,
    adjacency: MeshAdjacency,
    finder: VertexFinder,
}

impl<'a> FiducialProjector<'a> {
    fn new(mesh: &'a BrainMesh) -> FiducialProjector<'a> {
        FiducialProjector {
            mesh,
            adjacency: MeshAdjacency::new(mesh),
            finder: VertexFinder::new(mesh),
        }
    }

    fn project(&self, xyz: [f32; 3]) -> NodeDeformation {
        let nearest = match self.finder.nearest(xyz) {
            Some(v) => v,
            None => return NodeDeformation::default(),
        };
        for &f in self.adjacency.faces_of(nearest) {
            let nodes = self.mesh.face(f);
            let [p1, p2, p3] = nodes.map(|v| self.mesh.vertex(v));
            let normal = triangle_normal(p1, p2, p3);
            if normal == [0.0; 3] {
                continue;
            }
            let d = dot(sub(xyz, p1), normal);
            let q = [xyz[0] - d * normal[0], xyz[1] - d * normal[1], xyz[2] - d * normal[2]];
            let opposite = [
                signed_triangle_area_3d(normal, p2, p3, q),
                signed_triangle_area_3d(normal, p3, p1, q),
                signed_triangle_area_3d(normal, p1, p2, q),
            ];
            if opposite.iter().any(|&a| a < TILE_AREA_TOLERANCE) {
                continue;
            }
            let total: f64 = opposite.iter().map(|a| a.abs()).sum();
            if total <= 0.0 {
                continue;
            }
            return NodeDeformation {
                tile_nodes: nodes.map(|v| v as i32),
                tile_areas: opposite.map(|a| (a.abs() / total) as f32),
            };
        }
        NodeDeformation::nearest(nearest)
    }
}

/// Locate cells on the source fiducial surface.
pub fn project_cells_on_fiducial(cells: &CellFile, fiducial: &BrainMesh) -> CellProjectionFile {
    let projector = FiducialProjector::new(fiducial);
    let projections = cells
        .cells
        .par_iter()
        .map(|c| CellProjection {
            name: c.name.clone(),
            class_name: c.class_name.clone(),
            projection: projector.project(c.xyz),
            fiducial_xyz: c.xyz,
        })
        .collect();
    CellProjectionFile { projections }
}

/// What a batch of data file deformations produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeformReport {
    /// Spec file tag and path of every file written.
    pub outputs: Vec<(String, PathBuf)>,
    /// One message per file that could not be deformed or linked.
    pub errors: Vec<String>,
}

impl DeformReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turn collected failures into a single [`DeformError::DataFileErrors`].
    pub fn into_result(self) -> Result<Vec<(String, PathBuf)>> {
        if self.errors.is_empty() {
            Ok(self.outputs)
        } else {
            Err(DeformError::DataFileErrors(self.errors))
        }
    }
}

/// Everything data file deformation needs besides the files themselves: the map, where it was
/// read from and the surfaces it refers to, loaded on first use.
pub struct DeformContext<'m> {
    map: &'m DeformationMap,
    map_name: String,
    pub options: DeformOptions,
    surfaces: HashMap<PathBuf, Arc<BrainMesh>>,
}

impl<'m> DeformContext<'m> {
    pub fn new(map: &'m DeformationMap, map_name: &str, options: DeformOptions) -> DeformContext<'m> {
        DeformContext {
            map,
            map_name: map_name.to_string(),
            options,
            surfaces: HashMap::new(),
        }
    }

    pub fn map(&self) -> &DeformationMap {
        self.map
    }

    /// Use an already loaded surface for `coords` instead of reading the file.
    pub fn insert_surface<P: AsRef<Path>>(&mut self, coords: P, mesh: BrainMesh) {
        self.surfaces.insert(coords.as_ref().to_path_buf(), Arc::new(mesh));
    }

    fn surface(&mut self, what: &str, coords: PathBuf, topology: PathBuf) -> Result<Arc<BrainMesh>> {
        if coords.as_os_str().is_empty() {
            return Err(DeformError::InvalidParameter(format!(
                "the deformation map names no {}",
                what
            )));
        }
        if let Some(mesh) = self.surfaces.get(&coords) {
            return Ok(Arc::clone(mesh));
        }
        log::debug!("Loading {} from {}", what, coords.display());
        let mesh = Arc::new(read_mesh_with_topology(&coords, &topology)?);
        self.surfaces.insert(coords, Arc::clone(&mesh));
        Ok(mesh)
    }

    fn is_flat(&self) -> bool {
        self.map.deformation_type == DeformationType::Flat
    }

    fn source_topology(&self, flat: bool) -> PathBuf {
        let side = &self.map.source;
        side.resolve(if flat { &side.cut_topo } else { &side.closed_topo })
    }

    fn target_topology(&self, flat: bool) -> PathBuf {
        let side = &self.map.target;
        side.resolve(if flat { &side.cut_topo } else { &side.closed_topo })
    }

    fn source_surface(&mut self, flat: bool) -> Result<Arc<BrainMesh>> {
        let side = &self.map.source;
        let coords = side.resolve(if flat { &side.flat_coord } else { &side.sphere_coord });
        let topo = self.source_topology(flat);
        self.surface(if flat { "source flat surface" } else { "source spherical surface" }, coords, topo)
    }

    fn target_surface(&mut self, flat: bool) -> Result<Arc<BrainMesh>> {
        let side = &self.map.target;
        let coords = side.resolve(if flat { &side.flat_coord } else { &side.sphere_coord });
        let topo = self.target_topology(flat);
        self.surface(if flat { "target flat surface" } else { "target spherical surface" }, coords, topo)
    }

    /// The deformed source surface. A forward map keeps it with the source files, an inverse map
    /// with its target files, whose topology it shares.
    fn deformed_source_surface(&mut self) -> Result<Arc<BrainMesh>> {
        let flat = self.is_flat();
        let name = if flat {
            &self.map.source_deformed_flat_coord
        } else {
            &self.map.source_deformed_sphere_coord
        };
        let (coords, topo) = if self.map.inverse_deformation {
            (self.map.target.resolve(name), self.target_topology(flat))
        } else {
            (self.map.source.resolve(name), self.source_topology(flat))
        };
        self.surface("deformed source surface", coords, topo)
    }

    fn source_fiducial(&mut self) -> Result<Arc<BrainMesh>> {
        let coords = self.map.resolve_source_path(&self.map.source.fiducial_coord);
        let topo = self.source_topology(false);
        self.surface("source fiducial surface", coords, topo)
    }

    fn target_fiducial(&mut self) -> Result<Arc<BrainMesh>> {
        let coords = self.map.resolve_target_path(&self.map.target.fiducial_coord);
        let topo = self.target_topology(false);
        self.surface("target fiducial surface", coords, topo)
    }

    fn registration_surfaces(&mut self) -> Result<[Arc<BrainMesh>; 3]> {
        let flat = self.is_flat();
        Ok([
            self.source_surface(flat)?,
            self.deformed_source_surface()?,
            self.target_surface(flat)?,
        ])
    }

    /// Any surface with the target's vertices, for the triangles of deformed coordinates.
    fn target_triangles(&mut self) -> Result<Arc<BrainMesh>> {
        let side = &self.map.target;
        let coords = [&side.closed_topo, &side.fiducial_coord, &side.sphere_coord]
            .iter()
            .find(|n| !n.is_empty())
            .map(|n| side.resolve(n))
            .ok_or_else(|| DeformError::MissingTopology(String::from("target")))?;
        self.surface("target topology", coords, PathBuf::new())
    }

    fn output_name(&self, input: &Path, output: Option<&Path>) -> PathBuf {
        match output {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => self.map.deformed_file_name(&input.to_string_lossy()),
        }
    }

    /// Deform one file and list the result in the output spec file, if there is one.
    ///
    /// Returns the path of the written file.
    pub fn deform_file(&mut self, kind: DataFileType, input: &Path, output: Option<&Path>) -> Result<PathBuf> {
        let output = self.output_name(input, output);
        log::info!("Deforming {} file {} to {}", kind, input.display(), output.display());
        match kind {
            DataFileType::ArealEstimation
            | DataFileType::Atlas
            | DataFileType::LatLon
            | DataFileType::Metric
            | DataFileType::Paint
            | DataFileType::RgbPaint
            | DataFileType::Shape
            | DataFileType::Topography => self.node_data_file(kind, input, &output)?,
            DataFileType::Coordinate => self.coordinate_file(input, &output)?,
            DataFileType::CoordinateFlat => self.flat_coordinate_file(input, &output)?,
            DataFileType::BorderFlat | DataFileType::BorderSpherical | DataFileType::BorderProjection => {
                self.border_file(kind, input, &output)?
            }
            DataFileType::Cell | DataFileType::Foci | DataFileType::CellProjection | DataFileType::FociProjection => {
                self.cell_file(kind, input, &output)?
            }
        }
        self.add_to_output_spec(kind.spec_tag(), &output)?;
        Ok(output)
    }

    fn node_data_file(&mut self, kind: DataFileType, input: &Path, output: &Path) -> Result<()> {
        let data_kind = kind
            .node_data_kind()
            .ok_or_else(|| DeformError::InvalidParameter(format!("{} is not a per-vertex data type", kind)))?;
        let file = read_node_data(input, data_kind)?;
        let mut deformed = deform_node_data(self.map, &file)?;
        deformed.comment = provenance_comment(&input.to_string_lossy(), &self.map_name, &file.comment);
        write_node_data(output, &deformed, input)
    }

    fn coordinate_file(&mut self, input: &Path, output: &Path) -> Result<()> {
        let source_coords = read_mesh_with_topology(input, PathBuf::new())?;
        let triangles = self.target_triangles()?;
        let smooth = self
            .options
            .smooth_coordinates
            .unwrap_or(self.map.smooth_deformed_surfaces);
        let deformed = deform_coordinates(self.map, &source_coords, &triangles, smooth)?;
        write_surf(output, &deformed)
    }

    fn flat_coordinate_file(&mut self, input: &Path, output: &Path) -> Result<()> {
        let topology = required_flat_topology(&self.options)?.clone();
        let source_flat = read_mesh_with_topology(input, &topology.source)?;
        let target = read_mesh_with_topology(&topology.target, PathBuf::new())?;
        let projector = PointProjector::new(&source_flat, SurfaceGeometry::Flat);
        let deformed = deform_flat_coordinates(self.map, &projector, &target, self.options.max_edge_length)?;
        write_surf(output, &deformed)?;
        let topology_out = if topology.output.as_os_str().is_empty() {
            output.with_extension("topo")
        } else {
            topology.output
        };
        write_surf(&topology_out, &deformed)?;
        self.add_to_output_spec(tags::CUT_TOPO, &topology_out)
    }

    fn border_file(&mut self, kind: DataFileType, input: &Path, output: &Path) -> Result<()> {
        let [source, deformed_source, target] = self.registration_surfaces()?;
        let surfaces = RegistrationSurfaces {
            source: &source,
            deformed_source: &deformed_source,
            target: &target,
        };
        let projected = match kind {
            DataFileType::BorderProjection => BorderProjectionFile::from_file(input)?,
            _ => {
                let flat = kind == DataFileType::BorderFlat;
                let borders = BorderFile::from_file(input)?;
                let surface = self.source_surface(flat)?;
                let projector = PointProjector::new(&surface, geometry_of(flat));
                BorderProjectionFile::project(&borders, &projector)
            }
        };
        let on_target = deform_borders(self.map, &projected, &surfaces);
        match kind {
            DataFileType::BorderProjection => on_target.to_file(output),
            _ => {
                let flat = kind == DataFileType::BorderFlat;
                let surface = self.target_surface(flat)?;
                let configuration = if flat {
                    BorderFileType::Flat
                } else {
                    BorderFileType::Spherical
                };
                on_target.unproject(&surface, configuration).to_file(output)
            }
        }
    }

    fn cell_file(&mut self, kind: DataFileType, input: &Path, output: &Path) -> Result<()> {
        let [source, deformed_source, target] = self.registration_surfaces()?;
        let surfaces = RegistrationSurfaces {
            source: &source,
            deformed_source: &deformed_source,
            target: &target,
        };
        let projected_input = matches!(kind, DataFileType::CellProjection | DataFileType::FociProjection);
        let projected = if projected_input {
            CellProjectionFile::from_file(input)?
        } else {
            let fiducial = self.source_fiducial()?;
            project_cells_on_fiducial(&CellFile::from_file(input)?, &fiducial)
        };
        let target_fiducial = self.target_fiducial()?;
        let on_target = deform_cells(self.map, &projected, &surfaces, &target_fiducial);
        let lost = on_target.projections.iter().filter(|cp| cp.projection.is_unmatched()).count();
        if lost > 0 {
            log::warn!("{} of {} points of {} could not be placed on the target.", lost, on_target.projections.len(), input.display());
        }
        if projected_input {
            on_target.to_file(output)
        } else {
            let cells = on_target
                .projections
                .iter()
                .map(|cp| Cell {
                    name: cp.name.clone(),
                    class_name: cp.class_name.clone(),
                    xyz: cp.fiducial_xyz,
                })
                .collect();
            CellFile { cells }.to_file(output)
        }
    }

    fn output_spec_path(&self) -> Option<PathBuf> {
        if self.map.output_spec_file.is_empty() {
            return None;
        }
        Some(self.map.resolve_target_path(&self.map.output_spec_file))
    }

    /// List `file` in the output spec file when that file exists.
    fn add_to_output_spec(&self, tag: &str, file: &Path) -> Result<()> {
        let path = match self.output_spec_path() {
            Some(p) if p.is_file() => p,
            _ => return Ok(()),
        };
        let update = || -> Result<()> {
            let mut spec = SpecFile::from_file(&path)?;
            let before = spec.entries.len();
            spec.add_file(tag, file);
            if spec.entries.len() != before {
                spec.to_file(&path)?;
            }
            Ok(())
        };
        update().map_err(|e| {
            DeformError::InvalidParameter(format!(
                "File successfully deformed. However, unable to update spec file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// List the color files of the source spec file that go with `kinds` in the output spec file.
    ///
    /// Failures are logged and returned; they never stop a deformation.
    pub fn link_color_files(&self, kinds: &[DataFileType]) -> Vec<String> {
        let mut color_tags: Vec<&str> = kinds.iter().filter_map(|k| k.color_tag()).collect();
        color_tags.sort_unstable();
        color_tags.dedup();
        if color_tags.is_empty() {
            return Vec::new();
        }
        let output_spec = match self.output_spec_path() {
            Some(p) if !self.map.source.spec.is_empty() => p,
            _ => return Vec::new(),
        };
        let source_spec = self.map.resolve_source_path(&self.map.source.spec);
        let link = || -> Result<usize> {
            let source = SpecFile::from_file(&source_spec)?;
            let mut output = SpecFile::from_file(&output_spec)?;
            let before = output.entries.len();
            for tag in &color_tags {
                for file in crate::traits::ProjectManifest::files(&source, tag) {
                    output.add_file(tag, file);
                }
            }
            let added = output.entries.len() - before;
            if added > 0 {
                output.to_file(&output_spec)?;
            }
            Ok(added)
        };
        match link() {
            Ok(added) => {
                log::debug!("Linked {} color files into {}", added, output_spec.display());
                Vec::new()
            }
            Err(e) => {
                let msg = format!("Unable to link color files: {}", e);
                log::warn!("{}", msg);
                vec![msg]
            }
        }
    }

    /// Deform a batch of files. A file that fails is reported and the batch continues.
    pub fn deform_data_files(&mut self, files: &[(DataFileType, PathBuf)]) -> DeformReport {
        let mut report = DeformReport::default();
        for (kind, input) in files {
            match self.deform_file(*kind, input, None) {
                Ok(output) => report.outputs.push((kind.spec_tag().to_string(), output)),
                Err(e) => {
                    let msg = format!("{}: {}", input.display(), e);
                    log::warn!("Unable to deform {}", msg);
                    report.errors.push(msg);
                }
            }
        }
        let kinds: Vec<DataFileType> = files.iter().map(|(k, _)| *k).collect();
        report.errors.extend(self.link_color_files(&kinds));
        report
    }
}

fn geometry_of(flat: bool) -> SurfaceGeometry {
    if flat {
        SurfaceGeometry::Flat
    } else {
        SurfaceGeometry::Spherical
    }
}

/// Deform a batch of files with `map`, see [`DeformContext::deform_data_files`].
pub fn deform_data_files(
    map: &DeformationMap,
    map_name: &str,
    options: DeformOptions,
    files: &[(DataFileType, PathBuf)],
) -> DeformReport {
    DeformContext::new(map, map_name, options).deform_data_files(files)
}

/// Deform one data file with the map stored at `map_path`.
///
/// For maps of version 2 and later both map directories must exist. Flat coordinate files need
/// the flat topology files in `options`. Without `output`, the deformed file is named after the
/// input with the map's prefix and placed in the target directory.
///
/// # Examples
///
/// ```no_run
/// use neurodeform::{deform, DataFileType, DeformOptions};
/// use std::path::Path;
///
/// let out = deform(
///     Path::new("/atlas/subject1_to_atlas.deform_map"),
///     DataFileType::Metric,
///     Path::new("/subjects/subject1/thickness.metric"),
///     None,
///     &DeformOptions::default(),
/// ).unwrap();
/// println!("Wrote {}", out.display());
/// ```
pub fn deform(
    map_path: &Path,
    kind: DataFileType,
    input: &Path,
    output: Option<&Path>,
    options: &DeformOptions,
) -> Result<PathBuf> {
    let map = DeformationMap::from_file(map_path)?;
    if map.file_version >= 2 {
        for (which, dir) in [("Source", &map.source.directory), ("Target", &map.target.directory)] {
            let dir = PathBuf::from(dir);
            if !dir.is_dir() {
                return Err(DeformError::InvalidDirectory(which.to_string(), dir));
            }
        }
    }
    if kind == DataFileType::CoordinateFlat {
        required_flat_topology(options)?;
    }
    let mut context = DeformContext::new(&map, &map_path.to_string_lossy(), options.clone());
    context.deform_file(kind, input, output)
}
