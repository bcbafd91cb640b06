//! Registration of a source surface onto a target surface through landmark borders.
//!
//! A [`MeshRegistration`] reads both subjects, pairs and resamples their landmark borders,
//! hands everything to a [`SurfaceMorpher`] and turns the deformed source surface into a
//! [`DeformationMap`]. The map (and optionally its inverse) is written next to the data it
//! applies to, and the data files of the source can be deformed right away.

use rayon::prelude::*;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::border::{resample_border_sets, BorderFile, BorderProjectionFile};
use crate::deform_data::{DataFileType, DeformContext, DeformOptions};
use crate::deformation_map::{BorderFileType, DeformationMap, MapSide, NodeDeformation};
use crate::error::{DeformError, Result};
use crate::fs_surface::{read_mesh_with_topology, write_surf};
use crate::mesh::{BrainMesh, SurfaceGeometry};
use crate::point_projector::{distances_to_nodes, PointProjector, Projection, TileProjection};
use crate::spec_file::{tags, SpecFile};
use crate::traits::{MorphRequest, ProjectManifest, SurfaceMorpher, UserInteraction};
use crate::util::{basename, vector_length};

/// Extension of deformation map files.
pub const DEFORMATION_MAP_EXTENSION: &str = "deform_map";

/// The steps of a registration run, in order. `Failed` can follow any step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Init,
    ReadSource,
    ReadTarget,
    ResampleBorders,
    Morph,
    BuildCorrespondence,
    WriteMap,
    DeformDataFiles,
    Done,
    Failed,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RegistrationState::Init => "init",
            RegistrationState::ReadSource => "reading source",
            RegistrationState::ReadTarget => "reading target",
            RegistrationState::ResampleBorders => "resampling borders",
            RegistrationState::Morph => "morphing",
            RegistrationState::BuildCorrespondence => "building correspondence",
            RegistrationState::WriteMap => "writing deformation maps",
            RegistrationState::DeformDataFiles => "deforming data files",
            RegistrationState::Done => "done",
            RegistrationState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Options of one registration run that are not stored in the deformation map.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationOptions {
    /// Deform data files once the maps are written.
    pub deform_data_files: bool,
    /// Source files to deform. `None` deforms every data file listed in the source manifest.
    pub data_files: Option<Vec<(DataFileType, PathBuf)>>,
    /// Target files to deform with the reverse map. `None` takes them from the target manifest.
    pub reverse_data_files: Option<Vec<(DataFileType, PathBuf)>>,
    /// File name of the forward map in the target directory.
    pub forward_map_name: Option<String>,
    /// File name of the reverse map in the source directory.
    pub reverse_map_name: Option<String>,
    /// Overrides the map's setting when present.
    pub delete_intermediate_files: Option<bool>,
    pub deform_options: DeformOptions,
}

impl Default for RegistrationOptions {
    fn default() -> RegistrationOptions {
        RegistrationOptions {
            deform_data_files: true,
            data_files: None,
            reverse_data_files: None,
            forward_map_name: None,
            reverse_map_name: None,
            delete_intermediate_files: None,
            deform_options: DeformOptions::default(),
        }
    }
}

/// Files written only for the duration of a run. They are removed when the list is dropped,
/// unless they are to be kept.
#[derive(Debug, Default)]
pub struct IntermediateFiles {
    paths: Vec<PathBuf>,
    delete: bool,
}

impl IntermediateFiles {
    pub fn new(delete: bool) -> IntermediateFiles {
        IntermediateFiles {
            paths: Vec::new(),
            delete,
        }
    }

    pub fn add<P: Into<PathBuf>>(&mut self, path: P) {
        self.paths.push(path.into());
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn will_delete(&self) -> bool {
        self.delete
    }
}

impl Drop for IntermediateFiles {
    fn drop(&mut self) {
        if !self.delete {
            return;
        }
        for path in &self.paths {
            if let Err(e) = fs::remove_file(path) {
                log::debug!("Could not remove intermediate file {}: {}", path.display(), e);
            }
        }
    }
}

/// What a successful registration produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationOutcome {
    /// Maps target vertices onto the source surface.
    pub map: DeformationMap,
    pub map_path: PathBuf,
    /// Maps source vertices onto the target surface, when both ways were requested.
    pub reverse_map: Option<DeformationMap>,
    pub reverse_map_path: Option<PathBuf>,
    /// The morphed source registration surface.
    pub deformed_source_path: PathBuf,
    /// Whether the source was mirrored on x to match the target hemisphere.
    pub source_flipped: bool,
    pub warnings: Vec<String>,
    pub data_file_errors: Vec<String>,
    /// Intermediate files left on disk because deleting them was turned off.
    pub intermediate_files_kept: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Source,
    Target,
}

impl Side {
    fn name(&self) -> &'static str {
        match self {
            Side::Source => "source",
            Side::Target => "target",
        }
    }
}

/// One subject as needed by the registration.
#[derive(Debug)]
struct Subject {
    directory: PathBuf,
    structure: Option<String>,
    surface_path: PathBuf,
    /// The registration surface: spherical or flat, depending on the deformation type.
    surface: BrainMesh,
    borders: BorderFile,
}

/// Registers a source surface onto a target surface and writes the resulting deformation maps.
///
/// The map given to [`MeshRegistration::new`] carries the parameters of the run. File names it
/// leaves empty are taken from the manifests.
pub struct MeshRegistration<'a, M, U> {
    params: DeformationMap,
    source_manifest: &'a dyn ProjectManifest,
    target_manifest: &'a dyn ProjectManifest,
    morpher: M,
    interaction: U,
    options: RegistrationOptions,
    state: RegistrationState,
    warnings: Vec<String>,
}

impl<'a, M: SurfaceMorpher, U: UserInteraction> MeshRegistration<'a, M, U> {
    pub fn new(
        params: DeformationMap,
        source_manifest: &'a dyn ProjectManifest,
        target_manifest: &'a dyn ProjectManifest,
        morpher: M,
        interaction: U,
    ) -> MeshRegistration<'a, M, U> {
        MeshRegistration {
            params,
            source_manifest,
            target_manifest,
            morpher,
            interaction,
            options: RegistrationOptions::default(),
            state: RegistrationState::Init,
            warnings: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: RegistrationOptions) -> MeshRegistration<'a, M, U> {
        self.options = options;
        self
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn morpher(&self) -> &M {
        &self.morpher
    }

    /// Run the registration. On error the state is [`RegistrationState::Failed`].
    pub fn execute(&mut self) -> Result<RegistrationOutcome> {
        match self.run() {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                log::warn!("Registration failed while {}: {}", self.state, e);
                self.enter(RegistrationState::Failed);
                Err(e)
            }
        }
    }

    fn enter(&mut self, state: RegistrationState) {
        log::info!("Registration: {} -> {}", self.state, state);
        self.state = state;
    }

    fn step(&mut self, state: RegistrationState) -> Result<()> {
        if self.interaction.is_canceled() {
            return Err(DeformError::Canceled);
        }
        self.enter(state);
        Ok(())
    }

    fn run(&mut self) -> Result<RegistrationOutcome> {
        self.warnings.clear();
        let mut map = self.params.clone();
        let spherical = map.deformation_type.is_spherical();
        let geometry = map.deformation_type.geometry();
        let delete = self
            .options
            .delete_intermediate_files
            .unwrap_or(map.delete_intermediate_files);
        let mut intermediates = IntermediateFiles::new(delete);

        self.step(RegistrationState::ReadSource)?;
        let mut source = read_subject(Side::Source, self.source_manifest, &mut map.source, spherical)?;
        if spherical {
            self.check_spherical_border(Side::Source, &source.surface, &source.borders)?;
        }

        self.step(RegistrationState::ReadTarget)?;
        let target = read_subject(Side::Target, self.target_manifest, &mut map.target, spherical)?;
        if spherical {
            self.check_spherical_border(Side::Target, &target.surface, &target.borders)?;
        }

        self.step(RegistrationState::ResampleBorders)?;
        let structures_differ = match (&source.structure, &target.structure) {
            (Some(a), Some(b)) => !a.eq_ignore_ascii_case(b),
            _ => false,
        };
        let resampled = resample_border_sets(
            &source.borders,
            &target.borders,
            map.border_resampling,
            map.border_resampling_value,
            structures_differ,
            false,
        )?;
        let source_flipped = resampled.source_flipped;
        let (mut source_borders, mut target_borders) = (resampled.source, resampled.target);
        if source_flipped {
            log::info!("Source and target hemispheres differ, mirroring the source surface");
            source.surface.flip_x();
        }
        let configuration = if spherical {
            BorderFileType::Spherical
        } else {
            BorderFileType::Flat
        };
        source_borders.configuration = configuration;
        target_borders.configuration = configuration;
        if spherical {
            let radius = target.surface.spherical_radius();
            source.surface.project_to_sphere(radius);
            source_borders.set_spherical_radius(radius);
            target_borders.set_spherical_radius(radius);
        }
        let source_resampled = source.directory.join("source_after_resample.border");
        source_borders.to_file(&source_resampled)?;
        intermediates.add(source_resampled);
        let target_resampled = target.directory.join("target_after_resample.border");
        target_borders.to_file(&target_resampled)?;
        intermediates.add(target_resampled);

        self.step(RegistrationState::Morph)?;
        let request = MorphRequest {
            source_surface: &source.surface,
            source_borders: &source_borders,
            target_surface: &target.surface,
            target_borders: &target_borders,
            source_flipped,
            map: &map,
        };
        let deformed = self.morpher.morph(&request)?;
        if deformed.num_vertices() != source.surface.num_vertices() {
            return Err(DeformError::Morph(format!(
                "deformed surface has {} vertices, the source surface has {}",
                deformed.num_vertices(),
                source.surface.num_vertices()
            )));
        }
        if map.pause_for_crossovers_confirmation
            && !self
                .interaction
                .confirm_continue("Check the deformed source surface for crossovers before the deformation map is built.")
        {
            return Err(DeformError::Canceled);
        }
        let deformed_name = format!(
            "{}{}",
            map.deformed_file_name_prefix,
            basename(&source.surface_path.to_string_lossy())
        );
        let deformed_path = source.directory.join(deformed_name);
        write_surf(&deformed_path, &deformed)?;
        let deformed_str = deformed_path.to_string_lossy().into_owned();
        if spherical {
            map.source_deformed_sphere_coord = deformed_str;
        } else {
            map.source_deformed_flat_coord = deformed_str;
        }

        self.step(RegistrationState::BuildCorrespondence)?;
        map.inverse_deformation = false;
        map.set_nodes(create_node_deformation(&deformed, &target.surface, geometry));
        log_fallbacks("forward", map.nodes());

        self.step(RegistrationState::WriteMap)?;
        let output_spec = target.directory.join(deformed_spec_name(&map, &map.source.spec));
        copy_spec(&map.target, &target.directory, &output_spec, None)?;
        map.output_spec_file = output_spec.to_string_lossy().into_owned();
        let map_name = self
            .options
            .forward_map_name
            .clone()
            .unwrap_or_else(|| default_map_name(&map, &map.source.spec, "source"));
        let map_path = target.directory.join(map_name);
        write_map(&map, &map_path)?;
        log::info!("Wrote deformation map {}", map_path.display());

        let mut reverse: Option<(DeformationMap, PathBuf)> = None;
        if map.deform_both_ways {
            let mut rev = map.clone();
            rev.inverse_deformation = true;
            rev.set_nodes(create_node_deformation(&target.surface, &deformed, geometry));
            log_fallbacks("reverse", rev.nodes());
            rev.swap_source_and_target_files();
            let rev_spec = source.directory.join(deformed_spec_name(&map, &map.target.spec));
            let deformed_tag = if spherical {
                tags::SPHERICAL_COORD
            } else {
                tags::FLAT_COORD
            };
            copy_spec(&map.source, &source.directory, &rev_spec, Some((deformed_tag, &deformed_path)))?;
            rev.output_spec_file = rev_spec.to_string_lossy().into_owned();
            let rev_name = self
                .options
                .reverse_map_name
                .clone()
                .unwrap_or_else(|| default_map_name(&map, &map.target.spec, "target"));
            let rev_path = source.directory.join(rev_name);
            write_map(&rev, &rev_path)?;
            log::info!("Wrote reverse deformation map {}", rev_path.display());
            reverse = Some((rev, rev_path));
        }

        let mut data_file_errors = Vec::new();
        if self.options.deform_data_files {
            self.step(RegistrationState::DeformDataFiles)?;
            let forward_files = match &self.options.data_files {
                Some(files) => files.clone(),
                None => data_files_in(self.source_manifest, spherical),
            };
            let mut context = DeformContext::new(&map, &map_path.to_string_lossy(), self.options.deform_options.clone());
            data_file_errors.extend(context.deform_data_files(&forward_files).errors);

            if let Some((rev, rev_path)) = &reverse {
                let reverse_files = match &self.options.reverse_data_files {
                    Some(files) => files.clone(),
                    None => data_files_in(self.target_manifest, false),
                };
                let mut context = DeformContext::new(rev, &rev_path.to_string_lossy(), self.options.deform_options.clone());
                data_file_errors.extend(context.deform_data_files(&reverse_files).errors);
            }
        }

        self.enter(RegistrationState::Done);
        let intermediate_files_kept = if intermediates.will_delete() {
            Vec::new()
        } else {
            intermediates.paths().to_vec()
        };
        let (reverse_map, reverse_map_path) = match reverse {
            Some((m, p)) => (Some(m), Some(p)),
            None => (None, None),
        };
        Ok(RegistrationOutcome {
            map,
            map_path,
            reverse_map,
            reverse_map_path,
            deformed_source_path: deformed_path,
            source_flipped,
            warnings: self.warnings.clone(),
            data_file_errors,
            intermediate_files_kept,
        })
    }

    /// Warn when consecutive border links are more than half the sphere radius apart, which
    /// usually means some links were misprojected to the origin.
    fn check_spherical_border(&mut self, side: Side, surface: &BrainMesh, borders: &BorderFile) -> Result<()> {
        let half_radius = surface.spherical_radius() * 0.5;
        let suspicious = borders.borders.iter().find(|b| b.max_link_spacing() > half_radius);
        if let Some(border) = suspicious {
            let warning = format!(
                "Border file for {} has abnormally large spacing: links of border {} are {:.2} apart, \
                 half the sphere radius is {:.2}. Misprojected border points are probably at the origin.",
                side.name(),
                border.name,
                border.max_link_spacing(),
                half_radius
            );
            log::warn!("{}", warning);
            self.warnings.push(warning.clone());
            if !self.interaction.confirm_continue(&warning) {
                return Err(DeformError::Canceled);
            }
        }
        Ok(())
    }
}

/// For every vertex of `query`, the triangle of `against` it falls into.
///
/// On spheres the vertex is first pushed onto the radius of `against`. The tile node closest to
/// the vertex is moved to the first slot. Vertices in no triangle use the nearest vertex of
/// `against`; the no-match record is only produced for a mesh without triangles.
pub fn create_node_deformation(
    against: &BrainMesh,
    query: &BrainMesh,
    geometry: SurfaceGeometry,
) -> Vec<NodeDeformation> {
    let projector = PointProjector::new(against, geometry);
    let radius = against.spherical_radius();
    query
        .points()
        .par_iter()
        .map(|&p| {
            let xyz = match geometry {
                SurfaceGeometry::Flat => p,
                SurfaceGeometry::Spherical => {
                    let len = vector_length(p);
                    if len != 0.0 {
                        let scale = radius / len;
                        [p[0] * scale, p[1] * scale, p[2] * scale]
                    } else {
                        p
                    }
                }
            };
            match projector.project(xyz) {
                Some(Projection::Tile(tp)) => closest_node_first(against, tp, xyz),
                Some(Projection::Nearest(v)) => NodeDeformation::nearest(v),
                None => NodeDeformation::default(),
            }
        })
        .collect()
}

fn closest_node_first(mesh: &BrainMesh, tp: TileProjection, xyz: [f32; 3]) -> NodeDeformation {
    let d = distances_to_nodes(mesh, tp.nodes, xyz);
    let closest = if d[1] < d[0] && d[1] < d[2] {
        1
    } else if d[2] < d[0] && d[2] < d[1] {
        2
    } else {
        0
    };
    let mut nodes = tp.nodes.map(|v| v as i32);
    let mut weights = tp.weights;
    nodes.swap(0, closest);
    weights.swap(0, closest);
    NodeDeformation {
        tile_nodes: nodes,
        tile_areas: weights,
    }
}

fn log_fallbacks(direction: &str, nodes: &[NodeDeformation]) {
    let nearest = nodes
        .iter()
        .filter(|n| n.tile_nodes[0] >= 0 && n.tile_nodes[0] == n.tile_nodes[1] && n.tile_nodes[1] == n.tile_nodes[2])
        .count();
    let unmatched = nodes.iter().filter(|n| n.is_unmatched()).count();
    log::debug!(
        "{} map: {} of {} nodes use their nearest node, {} are unmatched",
        direction,
        nearest,
        nodes.len(),
        unmatched
    );
}

/// Fill the empty names of `names` from the manifest, then load the registration surface and
/// landmark borders of one side.
fn read_subject(
    side: Side,
    manifest: &dyn ProjectManifest,
    names: &mut MapSide,
    spherical: bool,
) -> Result<Subject> {
    let which = side.name();
    if names.directory.is_empty() {
        names.directory = manifest.directory().to_string_lossy().into_owned();
    }
    fill(&mut names.fiducial_coord, manifest.fiducial_coord());
    fill(&mut names.closed_topo, manifest.closed_topo());
    fill(&mut names.cut_topo, manifest.cut_topo());
    fill(&mut names.sphere_coord, manifest.spherical_coord());
    fill(&mut names.flat_coord, manifest.flat_coord());

    if names.fiducial_coord.is_empty() {
        return Err(DeformError::MissingFiducialSurface(which.to_string()));
    }
    let (coords, topology, kind) = if spherical {
        (&names.sphere_coord, &names.closed_topo, "spherical")
    } else {
        (&names.flat_coord, &names.cut_topo, "flat")
    };
    let surface_name = format!("{} {} surface", which, kind);
    if coords.is_empty() {
        return Err(DeformError::MissingTopology(surface_name));
    }
    let surface_path = names.resolve(coords);
    let surface = read_mesh_with_topology(&surface_path, names.resolve(topology))?;
    if surface.num_faces() == 0 {
        return Err(DeformError::MissingTopology(surface_name));
    }

    let wanted = if spherical {
        BorderFileType::Spherical
    } else {
        BorderFileType::Flat
    };
    if names.border.is_empty() {
        let (path, kind) = manifest
            .landmark_borders(wanted)
            .ok_or_else(|| DeformError::MissingBorders(which.to_string()))?;
        names.border = path.to_string_lossy().into_owned();
        names.border_type = kind;
    }
    let borders = load_borders(side, manifest, names, &surface, wanted)?;
    if borders.num_borders() == 0 {
        return Err(DeformError::MissingBorders(which.to_string()));
    }
    log::info!(
        "Read {} surface {} ({} vertices) and {} landmark borders",
        which,
        surface_path.display(),
        surface.num_vertices(),
        borders.num_borders()
    );

    Ok(Subject {
        directory: PathBuf::from(&names.directory),
        structure: manifest.structure(),
        surface_path,
        surface,
        borders,
    })
}

fn fill(name: &mut String, found: Option<PathBuf>) {
    if name.is_empty() {
        if let Some(path) = found {
            *name = path.to_string_lossy().into_owned();
        }
    }
}

/// Landmark borders on the registration surface. Border projections are unprojected onto it,
/// borders drawn on another surface are projected there first and carried over by vertex.
fn load_borders(
    side: Side,
    manifest: &dyn ProjectManifest,
    names: &MapSide,
    surface: &BrainMesh,
    wanted: BorderFileType,
) -> Result<BorderFile> {
    let path = names.resolve(&names.border);
    if names.border_type == BorderFileType::Projection {
        return Ok(BorderProjectionFile::from_file(&path)?.unproject(surface, wanted));
    }
    let mut borders = BorderFile::from_file(&path)?;
    let drawn_on = match names.border_type {
        BorderFileType::Unknown => borders.configuration,
        other => other,
    };
    let matches = drawn_on == wanted
        || drawn_on == BorderFileType::Unknown
        || (wanted == BorderFileType::Flat && drawn_on == BorderFileType::FlatLobar);
    if matches {
        borders.configuration = wanted;
        return Ok(borders);
    }

    let (coords, topology, geometry) = match drawn_on {
        BorderFileType::Spherical => (
            names.resolve(&names.sphere_coord),
            names.resolve(&names.closed_topo),
            SurfaceGeometry::Spherical,
        ),
        BorderFileType::FlatLobar => (
            manifest.first_file(tags::LOBAR_FLAT_COORD).unwrap_or_default(),
            names.resolve(&names.cut_topo),
            SurfaceGeometry::Flat,
        ),
        _ => (
            names.resolve(&names.flat_coord),
            names.resolve(&names.cut_topo),
            SurfaceGeometry::Flat,
        ),
    };
    if coords.as_os_str().is_empty() {
        return Err(DeformError::MissingBorders(format!(
            "{} (no surface to project its {} borders)",
            side.name(),
            drawn_on
        )));
    }
    log::info!("Projecting {} {} borders onto the {} surface", side.name(), drawn_on, wanted);
    let drawn_surface = read_mesh_with_topology(&coords, &topology)?;
    let projector = PointProjector::new(&drawn_surface, geometry);
    Ok(BorderProjectionFile::project(&borders, &projector).unproject(surface, wanted))
}

/// Data files of a manifest, in the order of [`DataFileType::all`]. Flat coordinates are never
/// included; coordinates only when `with_coordinates` is set.
fn data_files_in(manifest: &dyn ProjectManifest, with_coordinates: bool) -> Vec<(DataFileType, PathBuf)> {
    DataFileType::all()
        .iter()
        .filter(|t| **t != DataFileType::CoordinateFlat)
        .filter(|t| with_coordinates || !t.is_coordinate())
        .flat_map(|t| manifest.files(t.spec_tag()).into_iter().map(move |p| (*t, p)))
        .collect()
}

fn stem_of(spec: &str, fallback: &str) -> String {
    Path::new(spec)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| fallback.to_string())
}

fn default_map_name(map: &DeformationMap, spec: &str, fallback: &str) -> String {
    format!(
        "{}{}.{}",
        map.deformed_file_name_prefix,
        stem_of(spec, fallback),
        DEFORMATION_MAP_EXTENSION
    )
}

fn deformed_spec_name(map: &DeformationMap, spec: &str) -> String {
    let name = if spec.is_empty() {
        String::from("source.spec")
    } else {
        basename(spec)
    };
    format!("{}{}", map.deformed_file_name_prefix, name)
}

/// Write a copy of the spec file of `side` to `output`, so deformed files can be added to it.
fn copy_spec(side: &MapSide, directory: &Path, output: &Path, extra: Option<(&str, &Path)>) -> Result<()> {
    let mut spec = if side.spec.is_empty() {
        SpecFile::new(directory)
    } else {
        let path = side.resolve(&side.spec);
        SpecFile::from_file(&path).unwrap_or_else(|e| {
            log::warn!("Unable to read spec file {}, starting an empty one: {}", path.display(), e);
            SpecFile::new(directory)
        })
    };
    spec.directory = directory.to_path_buf();
    if let Some((tag, file)) = extra {
        spec.add_file(tag, file);
    }
    spec.to_file(output)
}

fn write_map(map: &DeformationMap, path: &Path) -> Result<()> {
    let mut relative = map.clone();
    relative.make_paths_relative();
    relative.to_file(path)
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
    fn the_closest_tile_node_comes_first() {
        let mesh = square();
        let query = BrainMesh::from_points(&[[0.9, 0.2, 0.0]], &[]).unwrap();
        let records = create_node_deformation(&mesh, &query, SurfaceGeometry::Flat);
        let r = records[0];
        assert_eq!(1, r.tile_nodes[0]);
        assert_abs_diff_eq!(1.0, r.tile_areas.iter().sum::<f32>(), epsilon = 1e-6);
        let back = crate::point_projector::unproject(&mesh, &r).unwrap();
        assert_abs_diff_eq!(0.9, back[0], epsilon = 1e-5);
        assert_abs_diff_eq!(0.2, back[1], epsilon = 1e-5);
    }

    #[test]
    fn far_points_fall_back_to_the_nearest_node() {
        let mesh = square();
        let query = BrainMesh::from_points(&[[5.0, 5.0, 0.0]], &[]).unwrap();
        let records = create_node_deformation(&mesh, &query, SurfaceGeometry::Flat);
        assert_eq!(NodeDeformation::nearest(2), records[0]);
    }

    #[test]
    fn identical_meshes_map_every_vertex_onto_itself() {
        let mesh = square();
        for (i, r) in create_node_deformation(&mesh, &mesh, SurfaceGeometry::Flat)
            .iter()
            .enumerate()
        {
            let back = crate::point_projector::unproject(&mesh, r).unwrap();
            let p = mesh.vertex(i);
            assert_abs_diff_eq!(p[0], back[0], epsilon = 1e-5);
            assert_abs_diff_eq!(p[1], back[1], epsilon = 1e-5);
        }
    }

    #[test]
    fn intermediate_files_are_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let doomed = dir.path().join("a.border");
        let kept = dir.path().join("b.border");
        fs::write(&doomed, "x").unwrap();
        fs::write(&kept, "x").unwrap();
        {
            let mut files = IntermediateFiles::new(true);
            files.add(&doomed);
        }
        {
            let mut files = IntermediateFiles::new(false);
            files.add(&kept);
        }
        assert!(!doomed.exists());
        assert!(kept.exists());
    }

    #[test]
    fn default_names_use_the_prefix() {
        let map = DeformationMap::new();
        assert_eq!(
            "deformed_subj.L.deform_map",
            default_map_name(&map, "/data/subj.L.spec", "source")
        );
        assert_eq!("deformed_source.deform_map", default_map_name(&map, "", "source"));
        assert_eq!("deformed_subj.L.spec", deformed_spec_name(&map, "/data/subj.L.spec"));
    }
}
