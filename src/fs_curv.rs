//! Functions for FreeSurfer per-vertex data in binary 'curv' files.
//!
//! These files store one scalar value per vertex of a brain surface mesh, e.g. cortical
//! thickness or sulcal depth. They carry a single float column, so they map onto one-column
//! metric or shape tables.

use byteordered::ByteOrdered;

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{DeformError, Result};
use crate::node_data::{NodeDataFile, NodeDataKind};
use crate::util::{open_input, write_output};

pub const CURV_MAGIC: [u8; 3] = [255; 3];

#[derive(Debug, Clone, PartialEq)]
pub struct CurvHeader {
    pub curv_magic: [u8; 3],
    pub num_vertices: i32,
    pub num_faces: i32,
    pub num_values_per_vertex: i32,
}

impl Default for CurvHeader {
    fn default() -> CurvHeader {
        CurvHeader {
            curv_magic: CURV_MAGIC,
            num_vertices: 0,
            num_faces: 0,
            num_values_per_vertex: 1,
        }
    }
}

impl CurvHeader {
    /// Read a curv header from the given byte stream, positioned at the start of the file.
    pub fn from_reader<S>(input: &mut S) -> Result<CurvHeader>
    where
        S: Read,
    {
        let mut hdr = CurvHeader::default();
        let mut input = ByteOrdered::be(input);

        for v in &mut hdr.curv_magic {
            *v = input.read_u8()?;
        }
        if hdr.curv_magic != CURV_MAGIC {
            return Err(DeformError::InvalidCurvFormat);
        }
        hdr.num_vertices = input.read_i32()?;
        hdr.num_faces = input.read_i32()?;
        hdr.num_values_per_vertex = input.read_i32()?;
        if hdr.num_vertices < 0 || hdr.num_values_per_vertex != 1 {
            return Err(DeformError::InvalidCurvFormat);
        }
        Ok(hdr)
    }
}

/// A FreeSurfer curv file: header plus one value per vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct FsCurv {
    pub header: CurvHeader,
    pub data: Vec<f32>,
}

impl FsCurv {
    /// Wrap per-vertex values. `num_faces` is informational and may be 0.
    pub fn new(data: Vec<f32>, num_faces: i32) -> FsCurv {
        FsCurv {
            header: CurvHeader {
                num_vertices: data.len() as i32,
                num_faces,
                ..CurvHeader::default()
            },
            data,
        }
    }

    /// Read a curv file. Files ending in ".gz" are decompressed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsCurv> {
        let mut input = open_input(path)?;
        FsCurv::from_reader(&mut input)
    }

    pub fn from_reader<S: Read>(input: &mut S) -> Result<FsCurv> {
        let header = CurvHeader::from_reader(input)?;
        let mut input = ByteOrdered::be(input);
        let mut data = Vec::with_capacity(header.num_vertices as usize);
        for _ in 0..header.num_vertices {
            data.push(input.read_f32()?);
        }
        Ok(FsCurv { header, data })
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut out = ByteOrdered::be(out);
        for b in CURV_MAGIC.iter() {
            out.write_u8(*b)?;
        }
        out.write_i32(self.data.len() as i32)?;
        out.write_i32(self.header.num_faces)?;
        out.write_i32(1)?;
        for v in &self.data {
            out.write_f32(*v)?;
        }
        Ok(())
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut buffer: Vec<u8> = Vec::with_capacity(15 + 4 * self.data.len());
        self.write_to(&mut buffer)?;
        write_output(path, &buffer)
    }

    /// A one-column table of the given kind named after `column_name`.
    pub fn to_node_data(&self, kind: NodeDataKind, column_name: &str) -> Result<NodeDataFile> {
        let mut file = NodeDataFile::new(kind, self.data.len());
        file.add_float_column(column_name, &self.data)?;
        Ok(file)
    }

    /// Take float column `column` of a table.
    pub fn from_node_data(file: &NodeDataFile, column: usize) -> Result<FsCurv> {
        if column >= file.num_float_columns() {
            return Err(DeformError::InvalidParameter(format!(
                "column {} does not exist, the file has {} float columns",
                column,
                file.num_float_columns()
            )));
        }
        Ok(FsCurv::new(file.float_column(column).to_vec(), 0))
    }
}

impl fmt::Display for FsCurv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Per-vertex data for {} vertices.", self.data.len())
    }
}

/// Whether the file starts with the curv magic number.
pub fn is_curv_file<P: AsRef<Path>>(path: P) -> Result<bool> {
    let mut input = open_input(path)?;
    let mut magic = [0u8; 3];
    match input.read_exact(&mut magic) {
        Ok(()) => Ok(magic == CURV_MAGIC),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Read per-vertex data from a FreeSurfer curv file.
///
/// # Examples
///
/// ```no_run
/// let curv = neurodeform::read_curv("/path/to/subjects_dir/subject1/surf/lh.thickness").unwrap();
/// assert_eq!(curv.data.len(), curv.header.num_vertices as usize);
/// ```
pub fn read_curv<P: AsRef<Path>>(path: P) -> Result<FsCurv> {
    FsCurv::from_file(path)
}

pub fn write_curv<P: AsRef<Path>>(path: P, curv: &FsCurv) -> Result<()> {
    curv.to_file(path)
}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    #[test]
    fn a_written_curv_file_can_be_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lh.thickness");
        let curv = FsCurv::new(vec![1.5, 2.25, 0.0, -3.0], 4);
        write_curv(&path, &curv).unwrap();

        assert!(is_curv_file(&path).unwrap());
        let back = read_curv(&path).unwrap();
        assert_eq!(curv, back);
        assert_eq!(4, back.header.num_vertices);
        assert_eq!(1, back.header.num_values_per_vertex);
    }

    #[test]
    fn gzipped_curv_files_can_be_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lh.thickness.gz");
        let curv = FsCurv::new(vec![0.5, 0.75], 0);
        let mut raw = Vec::new();
        curv.write_to(&mut raw).unwrap();
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&raw).unwrap();
        std::fs::write(&path, gz.finish().unwrap()).unwrap();

        assert_eq!(curv, read_curv(&path).unwrap());
    }

    #[test]
    fn the_magic_number_is_checked() {
        let bytes: Vec<u8> = vec![0, 0, 0, 0, 0, 0, 1];
        assert!(matches!(
            FsCurv::from_reader(&mut bytes.as_slice()),
            Err(DeformError::InvalidCurvFormat)
        ));
    }

    #[test]
    fn curv_data_converts_to_a_single_column() {
        let curv = FsCurv::new(vec![1.0, 2.0, 3.0], 0);
        let table = curv.to_node_data(NodeDataKind::Shape, "lh.sulc").unwrap();
        assert_eq!(3, table.num_nodes());
        assert_eq!(vec![String::from("lh.sulc")], table.float_names);
        assert_eq!(curv.data, FsCurv::from_node_data(&table, 0).unwrap().data);
        assert!(FsCurv::from_node_data(&table, 1).is_err());
    }
}
