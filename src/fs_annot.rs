//! Functions for FreeSurfer brain surface parcellations in annot files.
//!
//! These files assign each vertex of a brain surface mesh to exactly one brain region
//! or label. A so-called colortable contains data on the regions, including the region's
//! name, an RGB display color, and a unique identifier. Parcellations deform like paint
//! files: one label column whose label table is the colortable.

use byteordered::ByteOrdered;

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{DeformError, Result};
use crate::node_data::{NodeDataFile, NodeDataKind};
use crate::util::{open_input, read_fixed_length_string, write_output};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FsAnnotColortable {
    pub id: Vec<i32>,
    pub name: Vec<String>,
    pub r: Vec<i32>,
    pub g: Vec<i32>,
    pub b: Vec<i32>,
    pub a: Vec<i32>,
    /// A unique label computed from r,g,b,a. Used in `FsAnnot::vertex_labels` to identify the region.
    pub label: Vec<i32>,
}

/// The label FreeSurfer derives from a region color.
pub fn color_label(r: i32, g: i32, b: i32, a: i32) -> i32 {
    r + g * (1 << 8) + b * (1 << 16) + a * (1 << 24)
}

impl FsAnnotColortable {
    /// Read a colortable in format version 2 from a reader. The reader must be positioned right
    /// after the version marker and entry count.
    pub fn from_reader<S>(input: &mut S) -> Result<FsAnnotColortable>
    where
        S: Read,
    {
        let mut input = ByteOrdered::be(input);

        let num_chars_orig_filename: i32 = input.read_i32()?;
        let _orig_filename = read_fixed_length_string(&mut input, num_chars_orig_filename.max(0) as usize)?;
        let num_entries: i32 = input.read_i32()?;

        let mut ct = FsAnnotColortable::default();
        for _ in 0..num_entries.max(0) {
            ct.id.push(input.read_i32()?);
            let num_chars_region_name: i32 = input.read_i32()?;
            ct.name
                .push(read_fixed_length_string(&mut input, num_chars_region_name.max(0) as usize)?);
            let (r, g, b, a) = (input.read_i32()?, input.read_i32()?, input.read_i32()?, input.read_i32()?);
            ct.r.push(r);
            ct.g.push(g);
            ct.b.push(b);
            ct.a.push(a);
            ct.label.push(color_label(r, g, b, a));
        }
        Ok(ct)
    }

    pub fn len(&self) -> usize {
        self.name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut out = ByteOrdered::be(out);
        let orig = b"neurodeform\0";
        out.write_i32(orig.len() as i32)?;
        out.write_all(orig)?;
        out.write_i32(self.len() as i32)?;
        for i in 0..self.len() {
            out.write_i32(self.id[i])?;
            let name = self.name[i].as_bytes();
            out.write_i32(name.len() as i32 + 1)?;
            out.write_all(name)?;
            out.write_u8(0)?;
            out.write_i32(self.r[i])?;
            out.write_i32(self.g[i])?;
            out.write_i32(self.b[i])?;
            out.write_i32(self.a[i])?;
        }
        Ok(())
    }
}

impl fmt::Display for FsAnnotColortable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Colortable for {} brain regions.", self.id.len())
    }
}

/// A FreeSurfer brain surface parcellation from an annot file.
///
/// `vertex_labels` contains one entry per mesh vertex, in order, and assigns each vertex a brain
/// region using the `label` field (not the `id` field) of the `colortable`.
#[derive(Debug, Clone, PartialEq)]
pub struct FsAnnot {
    pub vertex_indices: Vec<i32>,
    pub vertex_labels: Vec<i32>,
    pub colortable: FsAnnotColortable,
}

impl FsAnnot {
    /// Read an annot file. Files ending in ".gz" are decompressed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsAnnot> {
        let mut input = open_input(path)?;
        FsAnnot::from_reader(&mut input)
    }

    pub fn from_reader<S: Read>(input: &mut S) -> Result<FsAnnot> {
        let mut file = ByteOrdered::be(input);

        let num_vertices: i32 = file.read_i32()?;
        let mut vertex_indices: Vec<i32> = Vec::with_capacity(num_vertices.max(0) as usize);
        let mut vertex_labels: Vec<i32> = Vec::with_capacity(num_vertices.max(0) as usize);
        for _ in 0..num_vertices {
            vertex_indices.push(file.read_i32()?);
            vertex_labels.push(file.read_i32()?);
        }

        let has_colortable: i32 = file.read_i32()?;
        if has_colortable != 1 {
            return Err(DeformError::UnsupportedFsAnnotFormatVersion);
        }

        // A negative entry count encodes the format version. Only version 2 is supported.
        let version: i32 = file.read_i32()?;
        if version != -2 {
            return Err(DeformError::UnsupportedFsAnnotFormatVersion);
        }
        let _max_structure_id: i32 = file.read_i32()?;
        let colortable = FsAnnotColortable::from_reader(&mut file)?;

        Ok(FsAnnot {
            vertex_indices,
            vertex_labels,
            colortable,
        })
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut out = ByteOrdered::be(out);
        out.write_i32(self.vertex_labels.len() as i32)?;
        for (i, label) in self.vertex_labels.iter().enumerate() {
            out.write_i32(i as i32)?;
            out.write_i32(*label)?;
        }
        out.write_i32(1)?;
        out.write_i32(-2)?;
        out.write_i32(self.colortable.len() as i32)?;
        self.colortable.write_to(&mut out)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut buffer: Vec<u8> = Vec::new();
        self.write_to(&mut buffer)?;
        write_output(path, &buffer)
    }

    /// Get the region names contained in the colortable.
    pub fn regions(&self) -> Vec<String> {
        self.colortable.name.clone()
    }

    pub fn num_regions(&self) -> usize {
        self.colortable.len()
    }

    /// Get the indices of all vertices which are part of the given brain region, `None` if there
    /// is no such region.
    pub fn region_vertices(&self, region: &str) -> Option<Vec<usize>> {
        let region_idx = self.colortable.name.iter().position(|x| x == region)?;
        let region_label = self.colortable.label[region_idx];
        Some(
            self.vertex_labels
                .iter()
                .enumerate()
                .filter(|(_, &l)| l == region_label)
                .map(|(idx, _)| idx)
                .collect(),
        )
    }

    /// The colortable index of each vertex, or `-1` for labels that match no region.
    pub fn vertex_colortable_indices(&self) -> Vec<i32> {
        self.vertex_labels
            .iter()
            .map(|l| {
                self.colortable
                    .label
                    .iter()
                    .position(|x| x == l)
                    .map(|i| i as i32)
                    .unwrap_or(-1)
            })
            .collect()
    }

    /// A paint table with a single label column. Unmatched vertices get the first region.
    pub fn to_node_data(&self) -> NodeDataFile {
        let mut file = NodeDataFile::new(NodeDataKind::Paint, self.vertex_labels.len());
        for i in 0..self.colortable.len() {
            file.label_table.labels.push(crate::node_data::Label {
                name: self.colortable.name[i].clone(),
                color: Some([
                    self.colortable.r[i] as u8,
                    self.colortable.g[i] as u8,
                    self.colortable.b[i] as u8,
                    self.colortable.a[i] as u8,
                ]),
            });
        }
        let column: Vec<i32> = self.vertex_colortable_indices().into_iter().map(|i| i.max(0)).collect();
        // Lengths match by construction.
        let _ = file.add_label_column("parcellation", &column);
        file
    }

    /// Build a parcellation from the first label column of a table. Labels without a color get a
    /// gray derived from their index so the labels stay unique.
    pub fn from_node_data(file: &NodeDataFile) -> Result<FsAnnot> {
        if file.num_label_columns() == 0 {
            return Err(DeformError::InvalidParameter(String::from(
                "an annot needs a label column",
            )));
        }
        let mut ct = FsAnnotColortable::default();
        for (i, label) in file.label_table.labels.iter().enumerate() {
            let [r, g, b, a] = label.color.unwrap_or([i as u8, i as u8, (i >> 8) as u8, 0]);
            let (r, g, b, a) = (r as i32, g as i32, b as i32, a as i32);
            ct.id.push(i as i32);
            ct.name.push(label.name.clone());
            ct.r.push(r);
            ct.g.push(g);
            ct.b.push(b);
            ct.a.push(a);
            ct.label.push(color_label(r, g, b, a));
        }
        let mut vertex_labels = Vec::with_capacity(file.num_nodes());
        for &idx in file.label_column(0).iter() {
            let label = ct.label.get(idx.max(0) as usize).copied().ok_or_else(|| {
                DeformError::InvalidParameter(format!("label index {} is not in the label table", idx))
            })?;
            vertex_labels.push(label);
        }
        Ok(FsAnnot {
            vertex_indices: (0..vertex_labels.len() as i32).collect(),
            vertex_labels,
            colortable: ct,
        })
    }
}

impl fmt::Display for FsAnnot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Surface parcellation assigning {} vertices to {} brain regions.",
            self.vertex_indices.len(),
            self.colortable.id.len()
        )
    }
}

/// Read a brain parcellation from a FreeSurfer annot file.
///
/// # Examples
///
/// ```no_run
/// let annot = neurodeform::read_annot("/path/to/subjects_dir/subject1/label/lh.aparc.annot").unwrap();
/// println!("Annotation assigns the {} brain mesh vertices to {} different regions.", annot.vertex_indices.len(), annot.regions().len());
/// ```
pub fn read_annot<P: AsRef<Path>>(path: P) -> Result<FsAnnot> {
    FsAnnot::from_file(path)
}

pub fn write_annot<P: AsRef<Path>>(path: P, annot: &FsAnnot) -> Result<()> {
    annot.to_file(path)
}

#[cfg(test)]
mod test {
    use super::*;

    fn lobes() -> FsAnnot {
        let mut file = NodeDataFile::new(NodeDataKind::Paint, 4);
        file.label_table.add("unknown", Some([25, 5, 25, 0]));
        file.label_table.add("frontal", Some([220, 20, 10, 0]));
        file.add_label_column("lobes", &[0, 1, 1, 0]).unwrap();
        FsAnnot::from_node_data(&file).unwrap()
    }

    #[test]
    fn a_written_annot_file_can_be_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lh.lobes.annot");
        let annot = lobes();
        write_annot(&path, &annot).unwrap();

        let back = read_annot(&path).unwrap();
        assert_eq!(annot, back);
        assert_eq!(1639705, back.colortable.label[0]);
        assert_eq!(vec![String::from("unknown"), String::from("frontal")], back.regions());
    }

    #[test]
    fn region_vertices_are_found_by_name() {
        let annot = lobes();
        assert_eq!(Some(vec![1, 2]), annot.region_vertices("frontal"));
        assert_eq!(None, annot.region_vertices("insula"));
    }

    #[test]
    fn annots_convert_to_paint_tables() {
        let annot = lobes();
        let table = annot.to_node_data();
        assert_eq!(NodeDataKind::Paint, table.kind);
        assert_eq!(vec![0, 1, 1, 0], table.label_column(0).to_vec());
        assert_eq!(Some("frontal"), table.label_table.name(1));
        assert_eq!(annot, FsAnnot::from_node_data(&table).unwrap());
    }

    #[test]
    fn other_format_versions_are_rejected() {
        let mut bytes = Vec::new();
        {
            let mut out = ByteOrdered::be(&mut bytes);
            out.write_i32(0).unwrap();
            out.write_i32(1).unwrap();
            out.write_i32(36).unwrap();
        }
        assert!(matches!(
            FsAnnot::from_reader(&mut bytes.as_slice()),
            Err(DeformError::UnsupportedFsAnnotFormatVersion)
        ));
    }
}
