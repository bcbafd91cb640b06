//! Functions for FreeSurfer brain surface meshes in binary 'surf' files.
//!
//! These files store a triangular mesh, where each vertex is defined by its x,y,z coord and
//! each face is defined by 3 vertices, stored as 3 indices into the vertices. Coordinate files
//! and topology files of a registration are both surf files; a topology is just the faces.

use byteordered::ByteOrdered;

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{DeformError, Result};
use crate::mesh::BrainMesh;
use crate::util::{open_input, write_output};

pub const TRIS_MAGIC_FILE_TYPE_NUMBER: i32 = 16777214;

#[derive(Debug, Clone, PartialEq)]
pub struct FsSurfaceHeader {
    pub surf_magic: [u8; 3],
    pub info_line: String,
    pub num_vertices: i32,
    pub num_faces: i32,
}

impl Default for FsSurfaceHeader {
    fn default() -> FsSurfaceHeader {
        FsSurfaceHeader {
            surf_magic: [255, 255, 254],
            info_line: String::from("created by neurodeform"),
            num_vertices: 0,
            num_faces: 0,
        }
    }
}

impl FsSurfaceHeader {
    /// Read a surf header from the given byte stream, positioned at the start of the file.
    ///
    /// The info line runs up to the first pair of newlines.
    pub fn from_reader<S>(input: &mut S) -> Result<FsSurfaceHeader>
    where
        S: Read,
    {
        let mut hdr = FsSurfaceHeader::default();
        let mut input = ByteOrdered::be(input);

        for v in &mut hdr.surf_magic {
            *v = input.read_u8()?;
        }
        let magic = interpret_fs_int24(hdr.surf_magic[0], hdr.surf_magic[1], hdr.surf_magic[2]);
        if magic != TRIS_MAGIC_FILE_TYPE_NUMBER {
            return Err(DeformError::InvalidFsSurfaceFormat);
        }

        let mut info: Vec<u8> = Vec::new();
        loop {
            let b = input.read_u8()?;
            if b == b'\n' && info.last() == Some(&b'\n') {
                info.pop();
                break;
            }
            info.push(b);
        }
        hdr.info_line = String::from_utf8_lossy(&info).into_owned();
        hdr.num_vertices = input.read_i32()?;
        hdr.num_faces = input.read_i32()?;
        if hdr.num_vertices < 0 || hdr.num_faces < 0 {
            return Err(DeformError::InvalidFsSurfaceFormat);
        }
        Ok(hdr)
    }
}

/// Header counts are not trusted for allocation beyond this many values; a truncated file
/// then fails on reading instead of on allocating.
const MAX_PREALLOCATED_VALUES: usize = 1 << 22;

/// Number of values stored for `count` vertices or faces.
fn times_three(count: i32) -> Result<usize> {
    usize::try_from(count)
        .ok()
        .and_then(|n| n.checked_mul(3))
        .ok_or(DeformError::InvalidFsSurfaceFormat)
}

/// Interpret three bytes as a single 24 bit integer, FreeSurfer style.
pub fn interpret_fs_int24(b1: u8, b2: u8, b3: u8) -> i32 {
    ((b1 as i32) << 16) + ((b2 as i32) << 8) + b3 as i32
}

/// A FreeSurfer surface: header and mesh.
#[derive(Debug, PartialEq, Clone)]
pub struct FsSurface {
    pub header: FsSurfaceHeader,
    pub mesh: BrainMesh,
}

impl FsSurface {
    pub fn new(mesh: BrainMesh) -> FsSurface {
        FsSurface {
            header: FsSurfaceHeader {
                num_vertices: mesh.num_vertices() as i32,
                num_faces: mesh.num_faces() as i32,
                ..FsSurfaceHeader::default()
            },
            mesh,
        }
    }

    /// Read a surf file. Files ending in ".gz" are decompressed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsSurface> {
        let mut input = open_input(path)?;
        FsSurface::from_reader(&mut input)
    }

    pub fn from_reader<S: Read>(input: &mut S) -> Result<FsSurface> {
        let header = FsSurfaceHeader::from_reader(input)?;
        let mut input = ByteOrdered::be(input);

        let num_coords = times_three(header.num_vertices)?;
        let num_indices = times_three(header.num_faces)?;

        let mut vertices: Vec<f32> = Vec::with_capacity(num_coords.min(MAX_PREALLOCATED_VALUES));
        for _ in 0..num_coords {
            vertices.push(input.read_f32()?);
        }
        let mut faces: Vec<i32> = Vec::with_capacity(num_indices.min(MAX_PREALLOCATED_VALUES));
        for _ in 0..num_indices {
            faces.push(input.read_i32()?);
        }

        let mesh = BrainMesh::new(vertices, faces)?;
        Ok(FsSurface { header, mesh })
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut out = ByteOrdered::be(out);
        for b in [255u8, 255, 254].iter() {
            out.write_u8(*b)?;
        }
        out.write_all(self.header.info_line.as_bytes())?;
        out.write_all(b"\n\n")?;
        out.write_i32(self.mesh.num_vertices() as i32)?;
        out.write_i32(self.mesh.num_faces() as i32)?;
        for v in &self.mesh.vertices {
            out.write_f32(*v)?;
        }
        for f in &self.mesh.faces {
            out.write_i32(*f)?;
        }
        Ok(())
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut buffer: Vec<u8> = Vec::new();
        self.write_to(&mut buffer)?;
        write_output(path, &buffer)
    }
}

impl fmt::Display for FsSurface {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Surface with {}", self.mesh)
    }
}

/// Read a surface mesh from a FreeSurfer surf file.
///
/// # Examples
///
/// ```no_run
/// let surf = neurodeform::read_surf("/path/to/subjects_dir/subject1/surf/lh.sphere.reg").unwrap();
/// println!("{}", surf);
/// ```
pub fn read_surf<P: AsRef<Path>>(path: P) -> Result<FsSurface> {
    FsSurface::from_file(path)
}

/// Write a mesh as a FreeSurfer surf file.
pub fn write_surf<P: AsRef<Path>>(path: P, mesh: &BrainMesh) -> Result<()> {
    FsSurface::new(mesh.clone()).to_file(path)
}

/// Read the mesh of a surf file.
pub fn read_mesh<P: AsRef<Path>>(path: P) -> Result<BrainMesh> {
    Ok(FsSurface::from_file(path)?.mesh)
}

/// Read the coordinates of one surf file and the triangles of another.
///
/// A registration keeps coordinates and topology in separate files; an empty `topology` path
/// uses the faces stored with the coordinates.
pub fn read_mesh_with_topology<P: AsRef<Path>, Q: AsRef<Path>>(coords: P, topology: Q) -> Result<BrainMesh> {
    let coords = read_mesh(coords)?;
    if topology.as_ref().as_os_str().is_empty() {
        return Ok(coords);
    }
    let topo = read_mesh(topology)?;
    coords.with_topology_of(&topo)
}

#[cfg(test)]
mod test {
    use super::*;

    fn tetra() -> BrainMesh {
        BrainMesh::from_points(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            &[[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        )
        .unwrap()
    }

    #[test]
    fn a_written_surf_file_can_be_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lh.sphere");
        write_surf(&path, &tetra()).unwrap();

        let surf = read_surf(&path).unwrap();
        assert_eq!(4, surf.header.num_vertices);
        assert_eq!(4, surf.header.num_faces);
        assert_eq!("created by neurodeform", surf.header.info_line);
        assert_eq!(tetra(), surf.mesh);
    }

    #[test]
    fn coordinates_and_topology_can_come_from_different_files() {
        let dir = tempfile::tempdir().unwrap();
        let coords = dir.path().join("lh.fiducial");
        let topo = dir.path().join("lh.closed");
        let mut moved = tetra();
        moved.set_vertex(0, [-1.0, -1.0, -1.0]);
        write_surf(&coords, &BrainMesh::new(moved.vertices.clone(), Vec::new()).unwrap()).unwrap();
        write_surf(&topo, &tetra()).unwrap();

        let mesh = read_mesh_with_topology(&coords, &topo).unwrap();
        assert_eq!(moved, mesh);
    }

    #[test]
    fn the_magic_number_is_checked() {
        let bytes: Vec<u8> = vec![255, 255, 255, b'\n', b'\n', 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            FsSurface::from_reader(&mut bytes.as_slice()),
            Err(DeformError::InvalidFsSurfaceFormat)
        ));
    }

    #[test]
    fn a_truncated_file_with_a_huge_vertex_count_fails_on_reading() {
        let mut bytes: Vec<u8> = vec![255, 255, 254, b'x', b'\n', b'\n'];
        bytes.extend_from_slice(&i32::MAX.to_be_bytes());
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&1.0f32.to_be_bytes());
        assert!(matches!(
            FsSurface::from_reader(&mut bytes.as_slice()),
            Err(DeformError::Io(_))
        ));
    }

    #[test]
    fn negative_counts_are_rejected() {
        let mut bytes: Vec<u8> = vec![255, 255, 254, b'x', b'\n', b'\n'];
        bytes.extend_from_slice(&(-3i32).to_be_bytes());
        bytes.extend_from_slice(&0i32.to_be_bytes());
        assert!(matches!(
            FsSurface::from_reader(&mut bytes.as_slice()),
            Err(DeformError::InvalidFsSurfaceFormat)
        ));
    }

    #[test]
    fn int24_values_are_decoded() {
        assert_eq!(TRIS_MAGIC_FILE_TYPE_NUMBER, interpret_fs_int24(255, 255, 254));
        assert_eq!(16777215, interpret_fs_int24(255, 255, 255));
    }
}
