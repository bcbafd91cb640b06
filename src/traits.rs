//! Seams between the registration pipeline and its collaborators.

use std::path::PathBuf;

use crate::border::BorderFile;
use crate::deformation_map::{BorderFileType, DeformationMap};
use crate::error::Result;
use crate::mesh::BrainMesh;
use crate::spec_file::tags;

/// Everything the morphing engine receives for one registration.
#[derive(Debug, Clone, Copy)]
pub struct MorphRequest<'a> {
    /// The source registration surface (sphere or flat), mirrored on x when `source_flipped`.
    pub source_surface: &'a BrainMesh,
    /// Resampled source landmarks, paired by index with `target_borders`.
    pub source_borders: &'a BorderFile,
    pub target_surface: &'a BrainMesh,
    pub target_borders: &'a BorderFile,
    /// Source surface and borders were mirrored once because the hemispheres differ.
    pub source_flipped: bool,
    /// Stage, cycle and flat parameters of the run.
    pub map: &'a DeformationMap,
}

/// The external engine that moves the source surface so its landmarks land on the target's.
pub trait SurfaceMorpher {
    /// Return the deformed source surface. It must have the topology of `source_surface`.
    fn morph(&mut self, request: &MorphRequest) -> Result<BrainMesh>;
}

/// Decisions a registration may need from whoever runs it.
pub trait UserInteraction {
    /// Called with a warning that may warrant stopping. Return false to cancel the run.
    fn confirm_continue(&mut self, _warning: &str) -> bool {
        true
    }

    /// Polled between registration steps.
    fn is_canceled(&self) -> bool {
        false
    }
}

/// Never asks, never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct Headless;

impl UserInteraction for Headless {}

/// Read access to the files of one subject (a spec file or anything like it).
///
/// Returned paths are resolved against the manifest's directory.
pub trait ProjectManifest {
    /// Directory all relative names are resolved against.
    fn directory(&self) -> PathBuf;

    /// All files listed under `tag`, in order.
    fn files(&self, tag: &str) -> Vec<PathBuf>;

    /// Hemisphere or structure name, if known.
    fn structure(&self) -> Option<String>;

    fn first_file(&self, tag: &str) -> Option<PathBuf> {
        self.files(tag).into_iter().next()
    }

    fn fiducial_coord(&self) -> Option<PathBuf> {
        self.first_file(tags::FIDUCIAL_COORD)
    }

    fn spherical_coord(&self) -> Option<PathBuf> {
        self.first_file(tags::SPHERICAL_COORD)
    }

    fn flat_coord(&self) -> Option<PathBuf> {
        self.first_file(tags::FLAT_COORD)
    }

    fn closed_topo(&self) -> Option<PathBuf> {
        self.first_file(tags::CLOSED_TOPO)
    }

    fn cut_topo(&self) -> Option<PathBuf> {
        self.first_file(tags::CUT_TOPO)
    }

    /// The first landmark border file of the wanted type, else the first one of any type.
    fn landmark_borders(&self, wanted: BorderFileType) -> Option<(PathBuf, BorderFileType)> {
        let kinds = [
            (tags::SPHERICAL_BORDER, BorderFileType::Spherical),
            (tags::FLAT_BORDER, BorderFileType::Flat),
            (tags::LOBAR_FLAT_BORDER, BorderFileType::FlatLobar),
            (tags::BORDER_PROJECTION, BorderFileType::Projection),
        ];
        let pick = |(tag, kind): &(&str, BorderFileType)| self.first_file(tag).map(|p| (p, *kind));
        kinds
            .iter()
            .filter(|(_, kind)| *kind == wanted)
            .find_map(pick)
            .or_else(|| kinds.iter().find_map(pick))
    }
}
