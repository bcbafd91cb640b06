use quick_error::quick_error;
use std::io::Error as IOError;
use std::path::PathBuf;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum DeformError {
        /// The manifest does not name a fiducial surface for the given side.
        MissingFiducialSurface(which: String) {
            display("No fiducial coordinate file found for {}", which)
        }

        /// A surface needed for registration has no topology.
        MissingTopology(which: String) {
            display("No topology available for {}", which)
        }

        /// Landmark borders are missing or empty.
        MissingBorders(which: String) {
            display("No landmark borders found for {}", which)
        }

        BorderCountMismatch(source_count: usize, target_count: usize) {
            display("Source has {} borders but target has {} borders", source_count, target_count)
        }

        BorderNotFound(name: String) {
            display("Border named {} not found in target borders.", name)
        }

        /// Deforming flat coordinates needs the source, deformed source and target topology.
        MissingFlatTopology {
            display("Deforming flat coordinates requires source, source deformed and target topology files")
        }

        InvalidParameter(msg: String) {
            display("Invalid parameter: {}", msg)
        }

        /// A file could not be parsed.
        FileFormat(path: PathBuf, msg: String) {
            display("{}: {}", path.display(), msg)
        }

        UnsupportedVersion(found: i32, supported: i32) {
            display("File version {} is newer than the supported version {}", found, supported)
        }

        InvalidDirectory(which: String, path: PathBuf) {
            display("{} directory is invalid: {}", which, path.display())
        }

        /// Invalid FreeSurfer surf file: wrong magic number.
        InvalidFsSurfaceFormat {
            display("Invalid FreeSurfer surf file")
        }

        /// Invalid curv file: wrong magic number.
        InvalidCurvFormat {
            display("Invalid Curv file")
        }

        UnsupportedFsAnnotFormatVersion {
            display("Unsupported FreeSurfer annot file format version")
        }

        /// The deformation map references nodes the data file does not have.
        NodeCountMismatch(expected: usize, found: usize) {
            display("Data file has {} nodes but the deformation map needs at least {}", found, expected)
        }

        /// New coordinates for a mesh do not match its number of vertices.
        VertexCountMismatch(expected: usize, found: usize) {
            display("Surface has {} vertices but {} coordinates were given", expected, found)
        }

        EmptyDeformationMap {
            display("Deformation map contains no nodes")
        }

        Canceled {
            display("Canceled by user")
        }

        /// The external morphing engine failed.
        Morph(msg: String) {
            display("Surface morphing failed: {}", msg)
        }

        /// Errors collected while deforming a batch of data files, one per line.
        DataFileErrors(messages: Vec<String>) {
            display("{}", messages.join("\n"))
        }

        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
        }
    }
}

impl DeformError {
    /// Convenience constructor for parse failures in `path`.
    pub fn format<P: Into<PathBuf>, S: Into<String>>(path: P, msg: S) -> DeformError {
        DeformError::FileFormat(path.into(), msg.into())
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, DeformError>;
