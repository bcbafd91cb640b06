//! Surface-based registration of brain meshes.
//!
//! The central type is the [`DeformationMap`], which stores for every vertex of a target mesh the
//! source triangle and barycentric weights it was pulled from. Maps are produced by a
//! [`MeshRegistration`] and applied to per-vertex data, coordinates, borders and cells with
//! [`deform`] or a [`DeformContext`]. Geometry and single-column data can be read from
//! FreeSurfer files.

pub mod border;
pub mod cell;
pub mod deform_data;
pub mod deformation_map;
pub mod error;
pub mod fs_annot;
pub mod fs_curv;
pub mod fs_surface;
pub mod mesh;
pub mod node_data;
pub mod point_projector;
pub mod registration;
pub mod spec_file;
pub mod traits;
pub mod util;

pub use border::{resample_border_sets, Border, BorderFile, BorderProjectionFile};
pub use cell::{Cell, CellFile, CellProjectionFile};
pub use deform_data::{deform, deform_data_files, DataFileType, DeformContext, DeformOptions, DeformReport, FlatTopology};
pub use deformation_map::{
    read_deformation_map, read_deformation_map_header, write_deformation_map, BorderFileType, BorderResampling,
    DeformationMap, DeformationType, MetricDeformation, NodeDeformation,
};
pub use error::{DeformError, Result};
pub use fs_annot::{read_annot, write_annot, FsAnnot};
pub use fs_curv::{read_curv, write_curv, CurvHeader, FsCurv};
pub use fs_surface::{read_mesh, read_surf, write_surf, FsSurface};
pub use mesh::{BrainMesh, SurfaceGeometry};
pub use node_data::{read_node_data, write_node_data, NodeDataFile, NodeDataKind};
pub use point_projector::{unproject, PointProjector, Projection, TileProjection, VertexFinder};
pub use registration::{create_node_deformation, MeshRegistration, RegistrationOptions, RegistrationOutcome, RegistrationState};
pub use spec_file::SpecFile;
pub use traits::{Headless, MorphRequest, ProjectManifest, SurfaceMorpher, UserInteraction};
