//! The deformation map: for every vertex of a target mesh, the source triangle and barycentric
//! weights used to pull values over from the source mesh, plus the settings of the registration
//! run that produced it.
//!
//! Maps are stored as tag lines, followed by `DATA-START` and the per-node records either as
//! ASCII rows or as a big-endian binary block.

use byteordered::ByteOrdered;

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{DeformError, Result};
use crate::util::{
    basename, flag_str, parse_flag, parse_token, parse_tokens, relative_to, resolve_path,
    split_tag_line, write_output,
};

/// The newest map file version this crate reads and the version it writes.
pub const DEFAULT_DEFORMATION_MAP_VERSION: i32 = 3;

/// Upper bound for the number of spherical stages and of cycles per stage.
pub const MAX_SPHERICAL_STAGES: usize = 10;
pub const MAX_SPHERICAL_CYCLES: usize = 10;

const TAG_VERSION: &str = "deform-map-file-version";
const TAG_FLAT_OR_SPHERE: &str = "flat-or-sphere";
const TAG_FILE_PREFIX: &str = "deformed-file-name-prefix";
const TAG_COLUMN_PREFIX: &str = "deformed-column-name-prefix";
const TAG_SOURCE_DIRECTORY: &str = "source-directory";
const TAG_SOURCE_SPEC: &str = "source-spec";
const TAG_SOURCE_BORDER: &str = "source-landmark-border";
const TAG_SOURCE_CLOSED_TOPO: &str = "source-closed-topo";
const TAG_SOURCE_CUT_TOPO: &str = "source-cut-topo";
const TAG_SOURCE_FIDUCIAL: &str = "source-fiducial-coord";
const TAG_SOURCE_SPHERE: &str = "source-sphere-coord";
const TAG_SOURCE_DEFORMED_SPHERE: &str = "source-deform-sphere-coord";
const TAG_SOURCE_DEFORMED_FLAT: &str = "source-deform-flat-coord";
const TAG_SOURCE_FLAT: &str = "source-flat-coord";
const TAG_SOURCE_RESAMPLED_FLAT: &str = "source-resampled-flat-coord";
const TAG_SOURCE_RESAMPLED_DEFORMED_FLAT: &str = "source-resampled-deformed-flat-coord";
const TAG_SOURCE_RESAMPLED_CUT_TOPO: &str = "source-resampled-cut-topo";
const TAG_TARGET_DIRECTORY: &str = "target-directory";
const TAG_TARGET_SPEC: &str = "target-spec";
const TAG_TARGET_BORDER: &str = "target-landmark-border";
const TAG_TARGET_CLOSED_TOPO: &str = "target-closed-topo";
const TAG_TARGET_CUT_TOPO: &str = "target-cut-topo";
const TAG_TARGET_FIDUCIAL: &str = "target-fiducial-coord";
const TAG_TARGET_SPHERE: &str = "target-sphere-coord";
const TAG_TARGET_FLAT: &str = "target-flat-coord";
const TAG_OUTPUT_SPEC: &str = "output-spec-file";
const TAG_SPHERE_RESOLUTION: &str = "sphere-resolution";
const TAG_BORDER_RESAMPLING: &str = "border-resampling";
const TAG_NUMBER_OF_STAGES: &str = "spherical-number-of-stages";
const TAG_NUMBER_OF_CYCLES: &str = "spherical-number-of-cycles";
const TAG_SMOOTHING: &str = "smoothing-parameters";
const TAG_MORPHING: &str = "morphing-parameters";
const TAG_LANDMARK_VECTOR: &str = "landmark-vector-parameters";
const TAG_LANDMARK_VECTOR_STAGE: &str = "landmark-vector-stage-parameters";
const TAG_FLAT_PARAMETERS: &str = "flat-parameters";
const TAG_FIDUCIAL_SPHERE_RATIO: &str = "sphere-fiducial-sphere-ratio";
const TAG_SMOOTH_DEFORMED: &str = "smooth-deformed-surface-flag";
const TAG_PAUSE_FOR_CROSSOVERS: &str = "pause-for-crossovers-confirmation";
const TAG_INVERSE: &str = "inverse-deformation";
const TAG_METRIC_DEFORMATION: &str = "metric-deformation-type";
const TAG_DEFORM_BOTH_WAYS: &str = "deform-both-ways";
const TAG_DELETE_INTERMEDIATE: &str = "delete-intermediate-files";
const TAG_ENCODING: &str = "encoding";
const TAG_DATA_START: &str = "DATA-START";

/// Correspondence of one target vertex: a source triangle and the weight of each of its nodes.
///
/// `tile_areas[k]` is the weight of `tile_nodes[k]`. A record with all nodes `-1` and all
/// weights `0` means the vertex could not be matched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeDeformation {
    pub tile_nodes: [i32; 3],
    pub tile_areas: [f32; 3],
}

impl Default for NodeDeformation {
    fn default() -> NodeDeformation {
        NodeDeformation {
            tile_nodes: [-1; 3],
            tile_areas: [0.0; 3],
        }
    }
}

impl NodeDeformation {
    /// The nearest-node record `{v,v,v}` with weights `{1,0,0}`.
    pub fn nearest(vertex: usize) -> NodeDeformation {
        NodeDeformation {
            tile_nodes: [vertex as i32; 3],
            tile_areas: [1.0, 0.0, 0.0],
        }
    }

    /// Whether this is the no-match sentinel.
    pub fn is_unmatched(&self) -> bool {
        self.tile_nodes.iter().any(|&v| v < 0)
    }

    /// The node in the first slot, the one nearest-node interpolation uses.
    pub fn nearest_node(&self) -> Option<usize> {
        if self.tile_nodes[0] < 0 {
            None
        } else {
            Some(self.tile_nodes[0] as usize)
        }
    }

    /// The weights in the on-disk order, where node `k` is weighted by area `(k + 1) % 3`.
    pub fn legacy_areas(&self) -> [f32; 3] {
        let w = self.tile_areas;
        [w[2], w[0], w[1]]
    }

    /// Build a record from nodes and weights stored in the on-disk order.
    pub fn from_legacy(tile_nodes: [i32; 3], legacy_areas: [f32; 3]) -> NodeDeformation {
        let a = legacy_areas;
        NodeDeformation {
            tile_nodes,
            tile_areas: [a[1], a[2], a[0]],
        }
    }
}

/// Registration regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeformationType {
    Flat,
    Sphere,
    SphereMultiStageVector,
    SphereSingleStageVector,
}

impl DeformationType {
    pub fn is_spherical(&self) -> bool {
        !matches!(self, DeformationType::Flat)
    }

    pub fn geometry(&self) -> crate::mesh::SurfaceGeometry {
        if self.is_spherical() {
            crate::mesh::SurfaceGeometry::Spherical
        } else {
            crate::mesh::SurfaceGeometry::Flat
        }
    }
}

impl fmt::Display for DeformationType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            DeformationType::Flat => "DEFORM_FLAT",
            DeformationType::Sphere => "DEFORM_SPHERE",
            DeformationType::SphereMultiStageVector => "DEFORM_SPHERE_MULTI_STAGE_VECTOR",
            DeformationType::SphereSingleStageVector => "DEFORM_SPHERE_SINGLE_STAGE_VECTOR",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DeformationType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "DEFORM_FLAT" => Ok(DeformationType::Flat),
            "DEFORM_SPHERE" => Ok(DeformationType::Sphere),
            "DEFORM_SPHERE_MULTI_STAGE_VECTOR" => Ok(DeformationType::SphereMultiStageVector),
            "DEFORM_SPHERE_SINGLE_STAGE_VECTOR" => Ok(DeformationType::SphereSingleStageVector),
            other => Err(format!("invalid deformation flat/sphere value {}", other)),
        }
    }
}

/// How scalar per-vertex data is interpolated from the three source nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricDeformation {
    /// Take the value of the node in the first slot.
    NearestNode,
    /// Barycentric average of the three nodes.
    AverageTileNodes,
}

impl fmt::Display for MetricDeformation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MetricDeformation::NearestNode => write!(f, "NEAREST_NODE"),
            MetricDeformation::AverageTileNodes => write!(f, "AVERAGE_TILE_NODES"),
        }
    }
}

impl FromStr for MetricDeformation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "NEAREST_NODE" => Ok(MetricDeformation::NearestNode),
            "AVERAGE_TILE_NODES" => Ok(MetricDeformation::AverageTileNodes),
            other => Err(format!("invalid metric deformation type {}", other)),
        }
    }
}

/// Border resampling policy applied to landmark borders before morphing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderResampling {
    None,
    /// Use each border's own sampling density.
    FromBorderFile,
    /// Use `border_resampling_value` for all borders.
    Value,
}

impl BorderResampling {
    fn code(&self) -> i32 {
        match self {
            BorderResampling::None => 0,
            BorderResampling::FromBorderFile => 1,
            BorderResampling::Value => 2,
        }
    }

    fn from_code(code: i32) -> Option<BorderResampling> {
        match code {
            0 => Some(BorderResampling::None),
            1 => Some(BorderResampling::FromBorderFile),
            2 => Some(BorderResampling::Value),
            _ => None,
        }
    }
}

/// Geometric type of a landmark border file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderFileType {
    Unknown,
    Flat,
    FlatLobar,
    Spherical,
    Projection,
}

/// Smoothing applied by the morphing engine in one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingParameters {
    pub strength: f32,
    pub cycles: i32,
    pub iterations: i32,
    pub neighbor_iterations: i32,
    pub final_iterations: i32,
}

/// Morphing forces and step sizes for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphingParameters {
    pub cycles: i32,
    pub linear_force: f32,
    pub angular_force: f32,
    pub step_size: f32,
    pub landmark_step_size: f32,
    pub iterations: i32,
    pub smooth_iterations: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkVectorParameters {
    pub smoothing_iterations: i32,
    pub displacement_factor: f32,
}

/// Everything the morphing engine needs for one cycle of one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleParameters {
    pub smoothing: SmoothingParameters,
    pub morphing: MorphingParameters,
    pub landmark_vector: LandmarkVectorParameters,
}

impl Default for CycleParameters {
    fn default() -> CycleParameters {
        CycleParameters {
            smoothing: SmoothingParameters {
                strength: 1.0,
                cycles: 100,
                iterations: 20,
                neighbor_iterations: 10,
                final_iterations: 5,
            },
            morphing: MorphingParameters {
                cycles: 1,
                linear_force: 0.3,
                angular_force: 0.4,
                step_size: 0.5,
                landmark_step_size: 0.5,
                iterations: 80,
                smooth_iterations: 5,
            },
            landmark_vector: LandmarkVectorParameters {
                smoothing_iterations: 10,
                displacement_factor: 1.0,
            },
        }
    }
}

/// One spherical registration stage: a sphere resolution and a sequence of morphing cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct SphericalStage {
    pub sphere_resolution: i32,
    pub cycles: Vec<CycleParameters>,
    pub landmark_vector_endpoint_factor: f32,
}

impl Default for SphericalStage {
    fn default() -> SphericalStage {
        let mut first = CycleParameters::default();
        first.smoothing.final_iterations = 30;
        first.morphing.angular_force = 0.6;
        first.morphing.iterations = 300;
        first.morphing.smooth_iterations = 20;

        let mut second = CycleParameters::default();
        second.morphing.angular_force = 0.6;
        second.morphing.iterations = 300;

        let mut third = CycleParameters::default();
        third.smoothing.cycles = 50;
        third.smoothing.final_iterations = 1;
        third.morphing.angular_force = 0.6;
        third.morphing.iterations = 300;
        third.morphing.smooth_iterations = 2;

        SphericalStage {
            sphere_resolution: 4610,
            cycles: vec![first, second, third],
            landmark_vector_endpoint_factor: 1.0,
        }
    }
}

/// Parameters of flat registration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatParameters {
    pub sub_sampling_tiles: i32,
    pub beta: f32,
    pub variance_multiplier: f32,
    pub iterations: i32,
}

impl Default for FlatParameters {
    fn default() -> FlatParameters {
        FlatParameters {
            sub_sampling_tiles: 900,
            beta: 0.00001,
            variance_multiplier: 1.0,
            iterations: 20,
        }
    }
}

/// Encoding of the per-node block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapEncoding {
    Ascii,
    Binary,
}

/// File names of one side (source or target) of a registration.
///
/// Names are relative to `directory` unless absolute.
#[derive(Debug, Clone, PartialEq)]
pub struct MapSide {
    pub directory: String,
    pub spec: String,
    pub border: String,
    pub border_type: BorderFileType,
    pub closed_topo: String,
    pub cut_topo: String,
    pub fiducial_coord: String,
    pub sphere_coord: String,
    pub flat_coord: String,
}

impl Default for MapSide {
    fn default() -> MapSide {
        MapSide {
            directory: String::new(),
            spec: String::new(),
            border: String::new(),
            border_type: BorderFileType::Unknown,
            closed_topo: String::new(),
            cut_topo: String::new(),
            fiducial_coord: String::new(),
            sphere_coord: String::new(),
            flat_coord: String::new(),
        }
    }
}

impl MapSide {
    /// Resolve one of this side's file names against its directory.
    pub fn resolve(&self, name: &str) -> PathBuf {
        resolve_path(&self.directory, name)
    }

    fn make_relative(&mut self) {
        let dir = self.directory.clone();
        for name in [
            &mut self.spec,
            &mut self.border,
            &mut self.closed_topo,
            &mut self.cut_topo,
            &mut self.fiducial_coord,
            &mut self.sphere_coord,
            &mut self.flat_coord,
        ] {
            *name = relative_to(&dir, name);
        }
    }
}

/// A deformation map and the metadata of the registration that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeformationMap {
    pub file_version: i32,
    pub deformation_type: DeformationType,
    pub deformed_file_name_prefix: String,
    pub deformed_column_name_prefix: String,
    pub source: MapSide,
    pub target: MapSide,
    pub source_deformed_sphere_coord: String,
    pub source_deformed_flat_coord: String,
    pub source_resampled_flat_coord: String,
    pub source_resampled_deformed_flat_coord: String,
    pub source_resampled_cut_topo: String,
    pub output_spec_file: String,
    pub border_resampling: BorderResampling,
    pub border_resampling_value: f32,
    pub stages: Vec<SphericalStage>,
    pub flat_parameters: FlatParameters,
    pub fiducial_sphere_ratio_enabled: bool,
    pub fiducial_sphere_ratio: f32,
    pub pause_for_crossovers_confirmation: bool,
    pub inverse_deformation: bool,
    pub smooth_deformed_surfaces: bool,
    pub metric_deformation: MetricDeformation,
    pub deform_both_ways: bool,
    pub delete_intermediate_files: bool,
    pub encoding: MapEncoding,
    nodes: Vec<NodeDeformation>,
}

impl Default for DeformationMap {
    fn default() -> DeformationMap {
        DeformationMap {
            file_version: DEFAULT_DEFORMATION_MAP_VERSION,
            deformation_type: DeformationType::Sphere,
            deformed_file_name_prefix: String::from("deformed_"),
            deformed_column_name_prefix: String::from("deformed_"),
            source: MapSide::default(),
            target: MapSide::default(),
            source_deformed_sphere_coord: String::new(),
            source_deformed_flat_coord: String::new(),
            source_resampled_flat_coord: String::new(),
            source_resampled_deformed_flat_coord: String::new(),
            source_resampled_cut_topo: String::new(),
            output_spec_file: String::new(),
            border_resampling: BorderResampling::Value,
            border_resampling_value: 10.0,
            stages: vec![SphericalStage::default()],
            flat_parameters: FlatParameters::default(),
            fiducial_sphere_ratio_enabled: true,
            fiducial_sphere_ratio: 0.5,
            pause_for_crossovers_confirmation: false,
            inverse_deformation: false,
            smooth_deformed_surfaces: true,
            metric_deformation: MetricDeformation::NearestNode,
            deform_both_ways: true,
            delete_intermediate_files: true,
            encoding: MapEncoding::Ascii,
            nodes: Vec::new(),
        }
    }
}

impl DeformationMap {
    pub fn new() -> DeformationMap {
        DeformationMap::default()
    }

    pub fn number_of_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Resize the per-node records. New records are the no-match sentinel.
    pub fn set_number_of_nodes(&mut self, num_nodes: usize) {
        self.nodes.resize(num_nodes, NodeDeformation::default());
    }

    /// # Panics
    ///
    /// If `node` is out of range.
    pub fn deform_data_for_node(&self, node: usize) -> NodeDeformation {
        self.nodes[node]
    }

    /// # Panics
    ///
    /// If `node` is out of range.
    pub fn set_deform_data_for_node(&mut self, node: usize, tile_nodes: [i32; 3], tile_areas: [f32; 3]) {
        self.nodes[node] = NodeDeformation {
            tile_nodes,
            tile_areas,
        };
    }

    pub fn nodes(&self) -> &[NodeDeformation] {
        &self.nodes
    }

    /// Replace all per-node records at once.
    pub fn set_nodes(&mut self, nodes: Vec<NodeDeformation>) {
        self.nodes = nodes;
    }

    /// Largest source node index referenced by any record, `None` if no record references a node.
    pub fn max_node_index(&self) -> Option<usize> {
        self.nodes
            .iter()
            .flat_map(|n| n.tile_nodes.iter())
            .filter(|&&v| v >= 0)
            .map(|&v| v as usize)
            .max()
    }

    /// Check that this map can be applied to data with `num_source_nodes` nodes.
    pub fn validate_for_source(&self, num_source_nodes: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(DeformError::EmptyDeformationMap);
        }
        if let Some(max) = self.max_node_index() {
            if max >= num_source_nodes {
                return Err(DeformError::NodeCountMismatch(max + 1, num_source_nodes));
            }
        }
        Ok(())
    }

    /// Exchange all source and target file names. Per-node records are not touched.
    pub fn swap_source_and_target_files(&mut self) {
        std::mem::swap(&mut self.source, &mut self.target);
    }

    /// A source file name resolved against the source directory.
    pub fn resolve_source_path(&self, name: &str) -> PathBuf {
        self.source.resolve(name)
    }

    /// A target file name resolved against the target directory.
    pub fn resolve_target_path(&self, name: &str) -> PathBuf {
        self.target.resolve(name)
    }

    /// Rewrite all file names inside their side's directory as relative names.
    pub fn make_paths_relative(&mut self) {
        self.source.make_relative();
        self.target.make_relative();
        let src = self.source.directory.clone();
        for name in [
            &mut self.source_deformed_sphere_coord,
            &mut self.source_deformed_flat_coord,
            &mut self.source_resampled_flat_coord,
            &mut self.source_resampled_deformed_flat_coord,
            &mut self.source_resampled_cut_topo,
        ] {
            *name = relative_to(&src, name);
        }
        self.output_spec_file = relative_to(&self.target.directory, &self.output_spec_file);
    }

    /// Name of the deformed version of `input_file`: the deformed file prefix plus its base
    /// name, placed next to the output spec file or in the target directory.
    pub fn deformed_file_name(&self, input_file: &str) -> PathBuf {
        let name = format!("{}{}", self.deformed_file_name_prefix, basename(input_file));
        let output_spec = self.resolve_target_path(&self.output_spec_file);
        match output_spec.parent() {
            Some(dir) if !self.output_spec_file.is_empty() => dir.join(name),
            _ => resolve_path(&self.target.directory, &name),
        }
    }

    fn stage_mut(&mut self, path: &Path, stage: usize) -> Result<&mut SphericalStage> {
        if stage >= MAX_SPHERICAL_STAGES {
            return Err(DeformError::format(path, format!("invalid spherical stage {}", stage)));
        }
        if self.stages.len() <= stage {
            self.stages.resize(stage + 1, SphericalStage::default());
        }
        Ok(&mut self.stages[stage])
    }

    fn cycle_mut(&mut self, path: &Path, stage: usize, cycle: usize) -> Result<&mut CycleParameters> {
        if cycle >= MAX_SPHERICAL_CYCLES {
            return Err(DeformError::format(path, format!("invalid spherical cycle {}", cycle)));
        }
        let st = self.stage_mut(path, stage)?;
        if st.cycles.len() <= cycle {
            st.cycles.resize(cycle + 1, CycleParameters::default());
        }
        Ok(&mut st.cycles[cycle])
    }

    /// Read a deformation map file. Files ending in ".gz" are decompressed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<DeformationMap> {
        let path = path.as_ref();
        let reader = crate::util::open_input(path)?;
        DeformationMap::from_reader(reader, path)
    }

    /// Read a deformation map from `input`. `path` is only used in error messages.
    pub fn from_reader<R: BufRead>(mut input: R, path: &Path) -> Result<DeformationMap> {
        let mut map = DeformationMap::default();
        // Files without a version tag predate versioning.
        map.file_version = 0;
        let mut line = String::new();
        let mut found_data = false;
        loop {
            line.clear();
            if input.read_line(&mut line)? == 0 {
                break;
            }
            let (tag, value) = match split_tag_line(&line) {
                Some(tv) => tv,
                None => continue,
            };
            if tag == TAG_DATA_START {
                found_data = true;
                break;
            }
            map.read_tag(path, tag, value)?;
        }
        if !found_data {
            return Err(DeformError::format(path, "missing DATA-START tag"));
        }

        match map.encoding {
            MapEncoding::Ascii => map.read_ascii_nodes(&mut input, path)?,
            MapEncoding::Binary => map.read_binary_nodes(&mut input, path)?,
        }
        Ok(map)
    }

    fn read_tag(&mut self, path: &Path, tag: &str, value: &str) -> Result<()> {
        let tokens: Vec<&str> = value.split_whitespace().collect();
        let version = self.file_version;
        match tag {
            TAG_VERSION => {
                self.file_version = parse_token(path, value, "file version")?;
                if self.file_version > DEFAULT_DEFORMATION_MAP_VERSION {
                    return Err(DeformError::UnsupportedVersion(
                        self.file_version,
                        DEFAULT_DEFORMATION_MAP_VERSION,
                    ));
                }
            }
            TAG_FLAT_OR_SPHERE => {
                self.deformation_type = value
                    .parse()
                    .map_err(|msg: String| DeformError::format(path, msg))?;
            }
            TAG_FILE_PREFIX => self.deformed_file_name_prefix = value.to_string(),
            TAG_COLUMN_PREFIX => self.deformed_column_name_prefix = value.to_string(),
            TAG_SOURCE_DIRECTORY => self.source.directory = value.to_string(),
            TAG_SOURCE_SPEC => self.source.spec = value.to_string(),
            TAG_SOURCE_BORDER => {
                self.source.border = value.to_string();
                self.source.border_type = BorderFileType::Unknown;
            }
            TAG_SOURCE_CLOSED_TOPO => self.source.closed_topo = value.to_string(),
            TAG_SOURCE_CUT_TOPO => self.source.cut_topo = value.to_string(),
            TAG_SOURCE_FIDUCIAL => self.source.fiducial_coord = value.to_string(),
            TAG_SOURCE_SPHERE => self.source.sphere_coord = value.to_string(),
            TAG_SOURCE_DEFORMED_SPHERE => self.source_deformed_sphere_coord = value.to_string(),
            TAG_SOURCE_DEFORMED_FLAT => self.source_deformed_flat_coord = value.to_string(),
            TAG_SOURCE_FLAT => self.source.flat_coord = value.to_string(),
            TAG_SOURCE_RESAMPLED_FLAT => self.source_resampled_flat_coord = value.to_string(),
            TAG_SOURCE_RESAMPLED_DEFORMED_FLAT => {
                self.source_resampled_deformed_flat_coord = value.to_string()
            }
            TAG_SOURCE_RESAMPLED_CUT_TOPO => self.source_resampled_cut_topo = value.to_string(),
            TAG_TARGET_DIRECTORY => self.target.directory = value.to_string(),
            TAG_TARGET_SPEC => self.target.spec = value.to_string(),
            TAG_TARGET_BORDER => {
                if version >= 3 {
                    let (index, name) = split_index(path, value)?;
                    if index == 0 {
                        self.target.border = name.to_string();
                    } else {
                        log::warn!("Ignoring target landmark border for stage {}: {}", index, name);
                    }
                } else {
                    self.target.border = value.to_string();
                }
                self.target.border_type = BorderFileType::Unknown;
            }
            TAG_TARGET_CLOSED_TOPO => self.target.closed_topo = value.to_string(),
            TAG_TARGET_CUT_TOPO => self.target.cut_topo = value.to_string(),
            TAG_TARGET_FIDUCIAL => self.target.fiducial_coord = value.to_string(),
            TAG_TARGET_SPHERE => self.target.sphere_coord = value.to_string(),
            TAG_TARGET_FLAT => self.target.flat_coord = value.to_string(),
            TAG_OUTPUT_SPEC => self.output_spec_file = value.to_string(),
            TAG_SPHERE_RESOLUTION => {
                if version >= 3 {
                    let [stage, resolution]: [i32; 2] = parse_tokens(path, &tokens, tag)?;
                    self.stage_mut(path, stage_index(path, stage)?)?.sphere_resolution = resolution;
                } else {
                    self.stage_mut(path, 0)?.sphere_resolution = parse_token(path, value, tag)?;
                }
            }
            TAG_BORDER_RESAMPLING => {
                if tokens.len() < 2 {
                    return Err(DeformError::format(path, "border-resampling needs a type and a value"));
                }
                let code: i32 = parse_token(path, tokens[0], tag)?;
                self.border_resampling = BorderResampling::from_code(code).ok_or_else(|| {
                    DeformError::format(path, format!("invalid border resampling type {}", code))
                })?;
                self.border_resampling_value = parse_token(path, tokens[1], tag)?;
            }
            TAG_NUMBER_OF_STAGES => {
                let n: usize = parse_token(path, value, tag)?;
                if n == 0 || n > MAX_SPHERICAL_STAGES {
                    return Err(DeformError::format(path, format!("invalid number of stages {}", n)));
                }
                self.stages.resize(n, SphericalStage::default());
            }
            TAG_NUMBER_OF_CYCLES => {
                let (stage, cycles) = if version >= 3 {
                    let [stage, cycles]: [i32; 2] = parse_tokens(path, &tokens, tag)?;
                    (stage_index(path, stage)?, cycles)
                } else {
                    (0, parse_token(path, value, tag)?)
                };
                if cycles < 1 || cycles as usize > MAX_SPHERICAL_CYCLES {
                    return Err(DeformError::format(path, format!("invalid number of cycles {}", cycles)));
                }
                self.stage_mut(path, stage)?
                    .cycles
                    .resize(cycles as usize, CycleParameters::default());
            }
            TAG_SMOOTHING => {
                let (stage, cycle, rest) = self.stage_cycle_prefix(path, &tokens, version)?;
                let strength: f32 = parse_token(path, rest.first().copied().unwrap_or(""), tag)?;
                let [cycles, iterations, neighbor_iterations, final_iterations]: [i32; 4] =
                    parse_tokens(path, rest.get(1..).unwrap_or(&[]), tag)?;
                self.cycle_mut(path, stage, cycle)?.smoothing = SmoothingParameters {
                    strength,
                    cycles,
                    iterations,
                    neighbor_iterations,
                    final_iterations,
                };
            }
            TAG_MORPHING => {
                let (stage, cycle, rest) = self.stage_cycle_prefix(path, &tokens, version)?;
                if rest.len() < 7 {
                    return Err(DeformError::format(path, "morphing-parameters needs 7 values"));
                }
                let morphing = MorphingParameters {
                    cycles: parse_token(path, rest[0], tag)?,
                    linear_force: parse_token(path, rest[1], tag)?,
                    angular_force: parse_token(path, rest[2], tag)?,
                    step_size: parse_token(path, rest[3], tag)?,
                    landmark_step_size: parse_token(path, rest[4], tag)?,
                    iterations: parse_token(path, rest[5], tag)?,
                    smooth_iterations: parse_token(path, rest[6], tag)?,
                };
                self.cycle_mut(path, stage, cycle)?.morphing = morphing;
            }
            TAG_LANDMARK_VECTOR => {
                let (stage, cycle, rest) = self.stage_cycle_prefix(path, &tokens, version.max(1))?;
                if rest.len() < 2 {
                    return Err(DeformError::format(path, "landmark-vector-parameters needs 2 values"));
                }
                self.cycle_mut(path, stage, cycle)?.landmark_vector = LandmarkVectorParameters {
                    smoothing_iterations: parse_token(path, rest[0], tag)?,
                    displacement_factor: parse_token(path, rest[1], tag)?,
                };
            }
            TAG_LANDMARK_VECTOR_STAGE => {
                if tokens.len() < 2 {
                    return Err(DeformError::format(path, "landmark-vector-stage-parameters needs 2 values"));
                }
                let stage: i32 = parse_token(path, tokens[0], tag)?;
                let factor: f32 = parse_token(path, tokens[1], tag)?;
                self.stage_mut(path, stage_index(path, stage)?)?
                    .landmark_vector_endpoint_factor = factor;
            }
            TAG_FLAT_PARAMETERS => {
                if tokens.len() < 4 {
                    return Err(DeformError::format(path, "flat-parameters needs 4 values"));
                }
                self.flat_parameters = FlatParameters {
                    sub_sampling_tiles: parse_token(path, tokens[0], tag)?,
                    beta: parse_token(path, tokens[1], tag)?,
                    variance_multiplier: parse_token(path, tokens[2], tag)?,
                    iterations: parse_token(path, tokens[3], tag)?,
                };
            }
            TAG_FIDUCIAL_SPHERE_RATIO => {
                self.fiducial_sphere_ratio_enabled = tokens.first() == Some(&"true");
                if let Some(ratio) = tokens.get(1) {
                    self.fiducial_sphere_ratio = parse_token(path, ratio, tag)?;
                }
            }
            TAG_SMOOTH_DEFORMED => self.smooth_deformed_surfaces = parse_flag(value),
            TAG_PAUSE_FOR_CROSSOVERS => self.pause_for_crossovers_confirmation = parse_flag(value),
            TAG_INVERSE => self.inverse_deformation = parse_flag(value),
            TAG_METRIC_DEFORMATION => {
                self.metric_deformation = value
                    .parse()
                    .map_err(|msg: String| DeformError::format(path, msg))?;
            }
            TAG_DEFORM_BOTH_WAYS => self.deform_both_ways = parse_flag(value),
            TAG_DELETE_INTERMEDIATE => self.delete_intermediate_files = parse_flag(value),
            TAG_ENCODING => {
                self.encoding = match value {
                    "ASCII" => MapEncoding::Ascii,
                    "BINARY" => MapEncoding::Binary,
                    other => {
                        return Err(DeformError::format(path, format!("invalid encoding {}", other)))
                    }
                }
            }
            _ => log::warn!("Unrecognized deformation map file tag: {}", tag),
        }
        Ok(())
    }

    /// Split the leading stage (version >= 3) and cycle (version >= 1) indices off a parameter line.
    fn stage_cycle_prefix<'t>(
        &self,
        path: &Path,
        tokens: &'t [&'t str],
        version: i32,
    ) -> Result<(usize, usize, &'t [&'t str])> {
        let (stage, rest) = if version >= 3 {
            let stage: i32 = parse_token(path, tokens.first().copied().unwrap_or(""), "stage")?;
            (stage_index(path, stage)?, &tokens[1..])
        } else {
            (0, tokens)
        };
        if version >= 1 {
            let cycle: i32 = parse_token(path, rest.first().copied().unwrap_or(""), "cycle")?;
            if cycle < 0 {
                return Err(DeformError::format(path, format!("invalid cycle {}", cycle)));
            }
            Ok((stage, cycle as usize, &rest[1..]))
        } else {
            Ok((stage, 0, rest))
        }
    }

    fn read_ascii_nodes<R: Read>(&mut self, input: &mut R, path: &Path) -> Result<()> {
        let mut text = String::new();
        input.read_to_string(&mut text)?;
        let mut tokens = text.split_whitespace();
        let num_nodes: usize = match tokens.next() {
            Some(t) => parse_token(path, t, "number of nodes")?,
            None => return Err(DeformError::format(path, "missing number of nodes")),
        };
        let mut nodes = Vec::with_capacity(num_nodes);
        for i in 0..num_nodes {
            let row: Vec<&str> = tokens.by_ref().take(7).collect();
            if row.len() < 7 {
                return Err(DeformError::format(
                    path,
                    format!("expected {} nodes but data ends at node {}", num_nodes, i),
                ));
            }
            let tile_nodes: [i32; 3] = parse_tokens(path, &row[1..4], "tile nodes")?;
            let areas: [f32; 3] = parse_tokens(path, &row[4..7], "tile areas")?;
            nodes.push(NodeDeformation::from_legacy(tile_nodes, areas));
        }
        self.nodes = nodes;
        Ok(())
    }

    fn read_binary_nodes<R: Read>(&mut self, input: &mut R, path: &Path) -> Result<()> {
        let mut input = ByteOrdered::be(input);
        let num_nodes = input.read_i32()?;
        if num_nodes < 0 {
            return Err(DeformError::format(path, format!("invalid number of nodes {}", num_nodes)));
        }
        let mut nodes = Vec::with_capacity(num_nodes as usize);
        for _ in 0..num_nodes {
            let tile_nodes = [input.read_i32()?, input.read_i32()?, input.read_i32()?];
            let areas = [input.read_f32()?, input.read_f32()?, input.read_f32()?];
            nodes.push(NodeDeformation::from_legacy(tile_nodes, areas));
        }
        self.nodes = nodes;
        Ok(())
    }

    /// Serialize the map into `out` using the current file version.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let relative = DEFAULT_DEFORMATION_MAP_VERSION >= 2;
        let src = |name: &str| -> String {
            if relative {
                relative_to(&self.source.directory, name)
            } else {
                name.to_string()
            }
        };
        let tgt = |name: &str| -> String {
            if relative {
                relative_to(&self.target.directory, name)
            } else {
                name.to_string()
            }
        };

        writeln!(out, "{} {}", TAG_VERSION, DEFAULT_DEFORMATION_MAP_VERSION)?;
        writeln!(out, "{} {}", TAG_FLAT_OR_SPHERE, self.deformation_type)?;
        writeln!(out, "{} {}", TAG_FILE_PREFIX, self.deformed_file_name_prefix)?;
        writeln!(out, "{} {}", TAG_COLUMN_PREFIX, self.deformed_column_name_prefix)?;
        writeln!(out, "{} {}", TAG_SOURCE_DIRECTORY, self.source.directory)?;
        writeln!(out, "{} {}", TAG_SOURCE_SPEC, src(&self.source.spec))?;
        writeln!(out, "{} {}", TAG_SOURCE_BORDER, src(&self.source.border))?;
        writeln!(out, "{} {}", TAG_SOURCE_CLOSED_TOPO, src(&self.source.closed_topo))?;
        writeln!(out, "{} {}", TAG_SOURCE_CUT_TOPO, src(&self.source.cut_topo))?;
        writeln!(out, "{} {}", TAG_SOURCE_FIDUCIAL, src(&self.source.fiducial_coord))?;
        writeln!(out, "{} {}", TAG_SOURCE_SPHERE, src(&self.source.sphere_coord))?;
        writeln!(out, "{} {}", TAG_SOURCE_DEFORMED_SPHERE, src(&self.source_deformed_sphere_coord))?;
        writeln!(out, "{} {}", TAG_SOURCE_DEFORMED_FLAT, src(&self.source_deformed_flat_coord))?;
        writeln!(out, "{} {}", TAG_SOURCE_FLAT, src(&self.source.flat_coord))?;
        writeln!(out, "{} {}", TAG_SOURCE_RESAMPLED_FLAT, src(&self.source_resampled_flat_coord))?;
        writeln!(
            out,
            "{} {}",
            TAG_SOURCE_RESAMPLED_DEFORMED_FLAT,
            src(&self.source_resampled_deformed_flat_coord)
        )?;
        writeln!(out, "{} {}", TAG_SOURCE_RESAMPLED_CUT_TOPO, src(&self.source_resampled_cut_topo))?;

        for (i, stage) in self.stages.iter().enumerate() {
            writeln!(out, "{} {} {}", TAG_SPHERE_RESOLUTION, i, stage.sphere_resolution)?;
        }
        writeln!(
            out,
            "{} {} {}",
            TAG_BORDER_RESAMPLING,
            self.border_resampling.code(),
            self.border_resampling_value
        )?;
        writeln!(out, "{} {}", TAG_NUMBER_OF_STAGES, self.stages.len())?;
        for (i, stage) in self.stages.iter().enumerate() {
            writeln!(out, "{} {} {}", TAG_NUMBER_OF_CYCLES, i, stage.cycles.len())?;
        }
        for (i, stage) in self.stages.iter().enumerate() {
            for (j, c) in stage.cycles.iter().enumerate() {
                let s = &c.smoothing;
                writeln!(
                    out,
                    "{} {} {} {} {} {} {} {}",
                    TAG_SMOOTHING, i, j, s.strength, s.cycles, s.iterations, s.neighbor_iterations, s.final_iterations
                )?;
                let m = &c.morphing;
                writeln!(
                    out,
                    "{} {} {} {} {} {} {} {} {} {}",
                    TAG_MORPHING,
                    i,
                    j,
                    m.cycles,
                    m.linear_force,
                    m.angular_force,
                    m.step_size,
                    m.landmark_step_size,
                    m.iterations,
                    m.smooth_iterations
                )?;
                writeln!(
                    out,
                    "{} {} {} {} {}",
                    TAG_LANDMARK_VECTOR,
                    i,
                    j,
                    c.landmark_vector.smoothing_iterations,
                    c.landmark_vector.displacement_factor
                )?;
            }
            writeln!(out, "{} {} {}", TAG_LANDMARK_VECTOR_STAGE, i, stage.landmark_vector_endpoint_factor)?;
        }
        let fp = &self.flat_parameters;
        writeln!(
            out,
            "{} {} {} {} {}",
            TAG_FLAT_PARAMETERS, fp.sub_sampling_tiles, fp.beta, fp.variance_multiplier, fp.iterations
        )?;

        writeln!(out, "{} {}", TAG_TARGET_DIRECTORY, self.target.directory)?;
        writeln!(out, "{} {}", TAG_SMOOTH_DEFORMED, flag_str(self.smooth_deformed_surfaces))?;
        writeln!(out, "{} {}", TAG_TARGET_SPEC, tgt(&self.target.spec))?;
        writeln!(out, "{} 0 {}", TAG_TARGET_BORDER, tgt(&self.target.border))?;
        writeln!(out, "{} {}", TAG_TARGET_CLOSED_TOPO, tgt(&self.target.closed_topo))?;
        writeln!(out, "{} {}", TAG_TARGET_CUT_TOPO, tgt(&self.target.cut_topo))?;
        writeln!(out, "{} {}", TAG_TARGET_SPHERE, tgt(&self.target.sphere_coord))?;
        writeln!(out, "{} {}", TAG_TARGET_FIDUCIAL, tgt(&self.target.fiducial_coord))?;
        writeln!(out, "{} {}", TAG_TARGET_FLAT, tgt(&self.target.flat_coord))?;
        writeln!(out, "{} {}", TAG_OUTPUT_SPEC, tgt(&self.output_spec_file))?;
        writeln!(
            out,
            "{} {} {}",
            TAG_FIDUCIAL_SPHERE_RATIO,
            flag_str(self.fiducial_sphere_ratio_enabled),
            self.fiducial_sphere_ratio
        )?;
        writeln!(out, "{} {}", TAG_PAUSE_FOR_CROSSOVERS, flag_str(self.pause_for_crossovers_confirmation))?;
        writeln!(out, "{} {}", TAG_INVERSE, flag_str(self.inverse_deformation))?;
        writeln!(out, "{} {}", TAG_METRIC_DEFORMATION, self.metric_deformation)?;
        writeln!(out, "{} {}", TAG_DEFORM_BOTH_WAYS, flag_str(self.deform_both_ways))?;
        writeln!(out, "{} {}", TAG_DELETE_INTERMEDIATE, flag_str(self.delete_intermediate_files))?;
        match self.encoding {
            MapEncoding::Ascii => writeln!(out, "{} ASCII", TAG_ENCODING)?,
            MapEncoding::Binary => writeln!(out, "{} BINARY", TAG_ENCODING)?,
        }
        writeln!(out, "{}", TAG_DATA_START)?;

        match self.encoding {
            MapEncoding::Ascii => {
                writeln!(out, "{}", self.nodes.len())?;
                for (i, nd) in self.nodes.iter().enumerate() {
                    let a = nd.legacy_areas();
                    writeln!(
                        out,
                        "{} {} {} {} {} {} {}",
                        i, nd.tile_nodes[0], nd.tile_nodes[1], nd.tile_nodes[2], a[0], a[1], a[2]
                    )?;
                }
            }
            MapEncoding::Binary => {
                let mut bin = ByteOrdered::be(out);
                bin.write_i32(self.nodes.len() as i32)?;
                for nd in &self.nodes {
                    for v in nd.tile_nodes.iter() {
                        bin.write_i32(*v)?;
                    }
                    for a in nd.legacy_areas().iter() {
                        bin.write_f32(*a)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Write the map to `path`. Nothing is written if serialization fails.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut buffer: Vec<u8> = Vec::new();
        self.write_to(&mut buffer)?;
        write_output(path, &buffer)
    }
}

impl fmt::Display for DeformationMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} deformation map for {} target nodes ({}).",
            self.deformation_type,
            self.nodes.len(),
            if self.inverse_deformation { "inverse" } else { "forward" }
        )
    }
}

fn stage_index(path: &Path, stage: i32) -> Result<usize> {
    if stage < 0 {
        Err(DeformError::format(path, format!("invalid spherical stage {}", stage)))
    } else {
        Ok(stage as usize)
    }
}

/// Split "<index> <name>" where the name may contain spaces.
fn split_index<'v>(path: &Path, value: &'v str) -> Result<(usize, &'v str)> {
    let (index, rest) = match value.find(char::is_whitespace) {
        Some(pos) => (&value[..pos], value[pos..].trim()),
        None => (value, ""),
    };
    let index: i32 = parse_token(path, index, "stage")?;
    Ok((stage_index(path, index)?, rest))
}

/// Read a deformation map file.
///
/// # Examples
///
/// ```no_run
/// let map = neurodeform::read_deformation_map("/path/to/indiv_to_atlas.deform_map").unwrap();
/// println!("{}", map);
/// ```
pub fn read_deformation_map<P: AsRef<Path>>(path: P) -> Result<DeformationMap> {
    DeformationMap::from_file(path)
}

/// Write a deformation map file.
pub fn write_deformation_map<P: AsRef<Path>>(path: P, map: &DeformationMap) -> Result<()> {
    map.to_file(path)
}

/// Read only the header of a map, leaving the per-node records empty.
pub fn read_deformation_map_header<P: AsRef<Path>>(path: P) -> Result<DeformationMap> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path)?);
    let mut map = DeformationMap::default();
    map.file_version = 0;
    for line in file.lines() {
        let line = line?;
        match split_tag_line(&line) {
            Some((TAG_DATA_START, _)) => return Ok(map),
            Some((tag, value)) => map.read_tag(path, tag, value)?,
            None => {}
        }
    }
    Err(DeformError::format(path, "missing DATA-START tag"))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn populated() -> DeformationMap {
        let mut map = DeformationMap::default();
        map.deformation_type = DeformationType::Flat;
        map.source.directory = String::from("/data/indiv");
        map.source.spec = String::from("indiv.spec");
        map.target.directory = String::from("/data/atlas dir");
        map.target.spec = String::from("atlas.spec");
        map.target.border = String::from("atlas landmarks.border");
        map.metric_deformation = MetricDeformation::AverageTileNodes;
        map.deform_both_ways = false;
        map.inverse_deformation = true;
        map.border_resampling = BorderResampling::FromBorderFile;
        map.border_resampling_value = 12.5;
        map.stages[0].cycles[1].morphing.linear_force = 0.35;
        map.set_number_of_nodes(3);
        map.set_deform_data_for_node(0, [0, 1, 2], [0.2, 0.5, 0.3]);
        map.set_deform_data_for_node(1, [4, 4, 4], [1.0, 0.0, 0.0]);
        map
    }

    fn round_trip(map: &DeformationMap) -> DeformationMap {
        let mut buf = Vec::new();
        map.write_to(&mut buf).unwrap();
        DeformationMap::from_reader(Cursor::new(buf), Path::new("mem")).unwrap()
    }

    #[test]
    fn a_populated_map_survives_a_round_trip() {
        let map = populated();
        assert_eq!(map, round_trip(&map));
    }

    #[test]
    fn an_empty_map_survives_a_round_trip() {
        let map = DeformationMap::default();
        assert_eq!(map, round_trip(&map));
    }

    #[test]
    fn a_binary_map_survives_a_round_trip() {
        let mut map = populated();
        map.encoding = MapEncoding::Binary;
        assert_eq!(map, round_trip(&map));
    }

    #[test]
    fn areas_are_stored_in_the_legacy_layout() {
        let map = populated();
        let mut buf = Vec::new();
        map.write_to(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\n0 0 1 2 0.3 0.2 0.5\n"));
        assert!(text.contains("\n2 -1 -1 -1 0 0 0\n"));
    }

    #[test]
    fn legacy_area_k_plus_one_weights_node_k() {
        let nd = NodeDeformation::from_legacy([7, 8, 9], [0.1, 0.6, 0.3]);
        assert_eq!([0.6, 0.3, 0.1], nd.tile_areas);
        for k in 0..3 {
            assert_eq!(nd.legacy_areas()[(k + 1) % 3], nd.tile_areas[k]);
        }
    }

    #[test]
    fn newer_versions_are_rejected() {
        let text = "deform-map-file-version 4\nDATA-START\n0\n";
        let res = DeformationMap::from_reader(Cursor::new(text), Path::new("mem"));
        assert!(matches!(res, Err(DeformError::UnsupportedVersion(4, 3))));
    }

    #[test]
    fn unknown_tags_are_tolerated_and_invalid_modes_are_not() {
        let text = "deform-map-file-version 2\nsome-new-tag 1\nflat-or-sphere DEFORM_FLAT\nDATA-START\n1\n0 1 2 3 0.5 0.25 0.25\n";
        let map = DeformationMap::from_reader(Cursor::new(text), Path::new("mem")).unwrap();
        assert_eq!(DeformationType::Flat, map.deformation_type);
        assert_eq!(1, map.number_of_nodes());
        assert_eq!([0.25, 0.25, 0.5], map.deform_data_for_node(0).tile_areas);

        let bad = "flat-or-sphere DEFORM_CUBE\nDATA-START\n0\n";
        assert!(DeformationMap::from_reader(Cursor::new(bad), Path::new("mem")).is_err());
    }

    #[test]
    fn version_one_parameters_have_no_stage_index() {
        let text = "deform-map-file-version 1\nsphere-resolution 18434\nspherical-number-of-cycles 2\nsmoothing-parameters 1 0.5 10 20 30 40\nDATA-START\n0\n";
        let map = DeformationMap::from_reader(Cursor::new(text), Path::new("mem")).unwrap();
        assert_eq!(18434, map.stages[0].sphere_resolution);
        assert_eq!(2, map.stages[0].cycles.len());
        assert_eq!(0.5, map.stages[0].cycles[1].smoothing.strength);
        assert_eq!(40, map.stages[0].cycles[1].smoothing.final_iterations);
    }

    #[test]
    fn swapping_exchanges_files_but_not_nodes() {
        let mut map = populated();
        let nodes = map.nodes().to_vec();
        map.swap_source_and_target_files();
        assert_eq!("atlas.spec", map.source.spec);
        assert_eq!("indiv.spec", map.target.spec);
        assert_eq!("atlas landmarks.border", map.source.border);
        assert_eq!(nodes, map.nodes());
        map.swap_source_and_target_files();
        assert_eq!(populated(), map);
    }

    #[test]
    fn validation_checks_node_indices() {
        let map = populated();
        assert!(map.validate_for_source(5).is_ok());
        assert!(matches!(map.validate_for_source(4), Err(DeformError::NodeCountMismatch(5, 4))));
        assert!(matches!(
            DeformationMap::default().validate_for_source(10),
            Err(DeformError::EmptyDeformationMap)
        ));
    }

    #[test]
    fn absolute_names_inside_the_directory_are_written_relative() {
        let mut map = DeformationMap::default();
        map.source.directory = String::from("/data/indiv");
        map.source.fiducial_coord = String::from("/data/indiv/lh.fiducial");
        let back = round_trip(&map);
        assert_eq!("lh.fiducial", back.source.fiducial_coord);
        assert_eq!(
            PathBuf::from("/data/indiv/lh.fiducial"),
            back.source.resolve(&back.source.fiducial_coord)
        );
    }

    #[test]
    fn deformed_file_names_get_the_prefix_and_the_target_directory() {
        let mut map = DeformationMap::default();
        map.target.directory = String::from("/atlas");
        assert_eq!(
            PathBuf::from("/atlas/deformed_thickness.metric"),
            map.deformed_file_name("/indiv/thickness.metric")
        );
        map.output_spec_file = String::from("out/deformed.spec");
        assert_eq!(
            PathBuf::from("/atlas/out/deformed_thickness.metric"),
            map.deformed_file_name("thickness.metric")
        );
    }
}
