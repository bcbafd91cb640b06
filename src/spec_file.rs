//! Spec files: the manifest listing the surfaces and data files of one subject.
//!
//! A spec file has an optional header block between `BeginHeader` and `EndHeader` holding
//! `tag value` pairs such as `Structure`, followed by one `tag file` line per file.

use std::fmt;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::traits::ProjectManifest;
use crate::util::{directory_of, open_input, relative_to, resolve_path, split_tag_line, write_output};

/// File tags understood by the deformation pipeline.
pub mod tags {
    pub const STRUCTURE: &str = "Structure";
    pub const FIDUCIAL_COORD: &str = "FIDUCIALcoord_file";
    pub const SPHERICAL_COORD: &str = "SPHERICALcoord_file";
    pub const FLAT_COORD: &str = "FLATcoord_file";
    pub const LOBAR_FLAT_COORD: &str = "LOBAR_FLATcoord_file";
    pub const CLOSED_TOPO: &str = "CLOSEDtopo_file";
    pub const CUT_TOPO: &str = "CUTtopo_file";
    pub const SPHERICAL_BORDER: &str = "SPHERICALborder_file";
    pub const FLAT_BORDER: &str = "FLATborder_file";
    pub const LOBAR_FLAT_BORDER: &str = "LOBAR_FLATborder_file";
    pub const BORDER_PROJECTION: &str = "borderproj_file";
    pub const BORDER_COLOR: &str = "border_color_file";
    pub const METRIC: &str = "metric_file";
    pub const SURFACE_SHAPE: &str = "surface_shape_file";
    pub const PAINT: &str = "paint_file";
    pub const AREA_COLOR: &str = "area_color_file";
    pub const RGB_PAINT: &str = "RGBpaint_file";
    pub const ATLAS: &str = "atlas_file";
    pub const AREAL_ESTIMATION: &str = "areal_estimation_file";
    pub const LAT_LON: &str = "lat_lon_file";
    pub const TOPOGRAPHY: &str = "topography_file";
    pub const CELL: &str = "cell_file";
    pub const CELL_COLOR: &str = "cell_color_file";
    pub const CELL_PROJECTION: &str = "cellproj_file";
    pub const FOCI: &str = "foci_file";
    pub const FOCI_COLOR: &str = "foci_color_file";
    pub const FOCI_PROJECTION: &str = "fociproj_file";
    pub const DEFORMATION_MAP: &str = "deform_map_file";
}

/// A parsed spec file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecFile {
    /// Directory the file names are relative to, normally the directory of the spec file.
    pub directory: PathBuf,
    pub header: Vec<(String, String)>,
    pub entries: Vec<(String, String)>,
}

impl SpecFile {
    pub fn new<P: AsRef<Path>>(directory: P) -> SpecFile {
        SpecFile {
            directory: directory.as_ref().to_path_buf(),
            ..SpecFile::default()
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SpecFile> {
        let path = path.as_ref();
        let mut spec = SpecFile::from_reader(open_input(path)?)?;
        spec.directory = directory_of(path);
        Ok(spec)
    }

    pub fn from_reader<R: BufRead>(input: R) -> Result<SpecFile> {
        let mut spec = SpecFile::default();
        let mut in_header = false;
        for line in input.lines() {
            let line = line?;
            match split_tag_line(&line) {
                Some(("BeginHeader", _)) => in_header = true,
                Some(("EndHeader", _)) => in_header = false,
                Some((tag, value)) if in_header || tag == tags::STRUCTURE => {
                    spec.header.push((tag.to_string(), value.to_string()))
                }
                Some((tag, value)) => spec.entries.push((tag.to_string(), value.to_string())),
                None => {}
            }
        }
        Ok(spec)
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "BeginHeader")?;
        for (tag, value) in &self.header {
            writeln!(out, "{} {}", tag, value)?;
        }
        writeln!(out, "EndHeader")?;
        writeln!(out)?;
        for (tag, value) in &self.entries {
            writeln!(out, "{} {}", tag, value)?;
        }
        Ok(())
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut buffer: Vec<u8> = Vec::new();
        self.write_to(&mut buffer)?;
        write_output(path, &buffer)
    }

    pub fn header_value(&self, tag: &str) -> Option<&str> {
        self.header
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_header_value(&mut self, tag: &str, value: &str) {
        match self.header.iter_mut().find(|(t, _)| t == tag) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.header.push((tag.to_string(), value.to_string())),
        }
    }

    /// Names listed under `tag`, as written in the file.
    pub fn names(&self, tag: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(t, _)| t == tag)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Add a file, storing it relative to this spec's directory when it lies inside it.
    /// Files already listed under the same tag are not added twice.
    pub fn add_file<P: AsRef<Path>>(&mut self, tag: &str, file: P) {
        let dir = self.directory.to_string_lossy().into_owned();
        let name = relative_to(&dir, &file.as_ref().to_string_lossy());
        if !self.entries.iter().any(|(t, v)| t == tag && *v == name) {
            self.entries.push((tag.to_string(), name));
        }
    }

    /// Every listed file with its tag, resolved against the spec directory.
    pub fn all_files(&self) -> Vec<(String, PathBuf)> {
        self.entries
            .iter()
            .map(|(t, v)| (t.clone(), resolve_path(&self.directory, v)))
            .collect()
    }
}

impl ProjectManifest for SpecFile {
    fn directory(&self) -> PathBuf {
        self.directory.clone()
    }

    fn files(&self, tag: &str) -> Vec<PathBuf> {
        self.names(tag)
            .into_iter()
            .map(|n| resolve_path(&self.directory, n))
            .collect()
    }

    fn structure(&self) -> Option<String> {
        self.header_value(tags::STRUCTURE)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    }
}

impl fmt::Display for SpecFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Spec file in {} listing {} files.",
            self.directory.display(),
            self.entries.len()
        )
    }
}
