//! Per-vertex data tables: metric, surface shape, paint, atlas and related files.
//!
//! A table holds any number of float columns and label columns, one row per surface vertex.
//! Label columns index into a label table of names and optional display colors.

use ndarray::{s, Array2, ArrayView1, Axis};
use ndarray_stats::QuantileExt;

use std::fmt;
use std::io::{BufRead, Read, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{DeformError, Result};
use crate::util::{open_input, parse_token, parse_tokens, split_tag_line, write_output};

/// The kind of a per-vertex data file. The kind decides how float columns are interpolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeDataKind {
    ArealEstimation,
    Atlas,
    LatLon,
    Metric,
    Paint,
    RgbPaint,
    Shape,
    Topography,
}

impl NodeDataKind {
    /// Whether float columns of this kind are continuous values that may be averaged.
    ///
    /// Categorical or mixed kinds always use the value of the nearest node.
    pub fn interpolates_floats(&self) -> bool {
        matches!(
            self,
            NodeDataKind::Metric | NodeDataKind::Shape | NodeDataKind::LatLon | NodeDataKind::RgbPaint
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            NodeDataKind::ArealEstimation => "AREAL_ESTIMATION",
            NodeDataKind::Atlas => "ATLAS",
            NodeDataKind::LatLon => "LAT_LON",
            NodeDataKind::Metric => "METRIC",
            NodeDataKind::Paint => "PAINT",
            NodeDataKind::RgbPaint => "RGB_PAINT",
            NodeDataKind::Shape => "SHAPE",
            NodeDataKind::Topography => "TOPOGRAPHY",
        }
    }
}

impl fmt::Display for NodeDataKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for NodeDataKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "AREAL_ESTIMATION" => Ok(NodeDataKind::ArealEstimation),
            "ATLAS" | "PROB_ATLAS" => Ok(NodeDataKind::Atlas),
            "LAT_LON" => Ok(NodeDataKind::LatLon),
            "METRIC" => Ok(NodeDataKind::Metric),
            "PAINT" => Ok(NodeDataKind::Paint),
            "RGB_PAINT" => Ok(NodeDataKind::RgbPaint),
            "SHAPE" | "SURFACE_SHAPE" => Ok(NodeDataKind::Shape),
            "TOPOGRAPHY" => Ok(NodeDataKind::Topography),
            other => Err(format!("unknown node data kind {}", other)),
        }
    }
}

/// One entry of a label table.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub name: String,
    pub color: Option<[u8; 4]>,
}

/// Names (and display colors) of the values stored in label columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabelTable {
    pub labels: Vec<Label>,
}

impl LabelTable {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Index of the label with the given name, adding it if needed.
    pub fn add(&mut self, name: &str, color: Option<[u8; 4]>) -> usize {
        match self.index_of(name) {
            Some(idx) => idx,
            None => {
                self.labels.push(Label {
                    name: name.to_string(),
                    color,
                });
                self.labels.len() - 1
            }
        }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.labels.iter().position(|l| l.name == name)
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(|l| l.name.as_str())
    }

    fn set(&mut self, index: usize, label: Label) {
        if self.labels.len() <= index {
            self.labels.resize(
                index + 1,
                Label {
                    name: String::new(),
                    color: None,
                },
            );
        }
        self.labels[index] = label;
    }
}

/// A per-vertex data table.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDataFile {
    pub kind: NodeDataKind,
    pub title: String,
    pub comment: String,
    pub float_names: Vec<String>,
    /// One row per node, one column per float column.
    pub floats: Array2<f32>,
    pub label_names: Vec<String>,
    /// One row per node, one column per label column.
    pub labels: Array2<i32>,
    pub label_table: LabelTable,
}

impl NodeDataFile {
    /// An empty table for `num_nodes` nodes without any columns.
    pub fn new(kind: NodeDataKind, num_nodes: usize) -> NodeDataFile {
        NodeDataFile {
            kind,
            title: String::new(),
            comment: String::new(),
            float_names: Vec::new(),
            floats: Array2::zeros((num_nodes, 0)),
            label_names: Vec::new(),
            labels: Array2::zeros((num_nodes, 0)),
            label_table: LabelTable::default(),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.floats.nrows()
    }

    pub fn num_float_columns(&self) -> usize {
        self.floats.ncols()
    }

    pub fn num_label_columns(&self) -> usize {
        self.labels.ncols()
    }

    /// Append a float column. `values` must have one entry per node.
    pub fn add_float_column(&mut self, name: &str, values: &[f32]) -> Result<()> {
        if values.len() != self.num_nodes() {
            return Err(DeformError::NodeCountMismatch(self.num_nodes(), values.len()));
        }
        self.floats = with_column(&self.floats, values);
        self.float_names.push(name.to_string());
        Ok(())
    }

    /// Append a label column of label table indices. `values` must have one entry per node.
    pub fn add_label_column(&mut self, name: &str, values: &[i32]) -> Result<()> {
        if values.len() != self.num_nodes() {
            return Err(DeformError::NodeCountMismatch(self.num_nodes(), values.len()));
        }
        self.labels = with_column(&self.labels, values);
        self.label_names.push(name.to_string());
        Ok(())
    }

    /// # Panics
    ///
    /// If `column` is out of range.
    pub fn float_column(&self, column: usize) -> ArrayView1<f32> {
        self.floats.column(column)
    }

    /// # Panics
    ///
    /// If `column` is out of range.
    pub fn label_column(&self, column: usize) -> ArrayView1<i32> {
        self.labels.column(column)
    }

    /// Minimum and maximum of a float column, `None` if the column is empty or contains NaN.
    pub fn column_range(&self, column: usize) -> Option<(f32, f32)> {
        if column >= self.num_float_columns() {
            return None;
        }
        let col = self.floats.column(column);
        match (col.min(), col.max()) {
            (Ok(min), Ok(max)) => Some((*min, *max)),
            _ => None,
        }
    }

    /// Read a table written by [`NodeDataFile::write_to`]. Files ending in ".gz" are decompressed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<NodeDataFile> {
        let path = path.as_ref();
        NodeDataFile::from_reader(open_input(path)?, path)
    }

    pub fn from_reader<R: BufRead>(mut input: R, path: &Path) -> Result<NodeDataFile> {
        let mut kind = NodeDataKind::Metric;
        let mut title = String::new();
        let mut comment_lines: Vec<String> = Vec::new();
        let mut float_names = Vec::new();
        let mut label_names = Vec::new();
        let mut label_table = LabelTable::default();
        let mut found_data = false;

        let mut line = String::new();
        loop {
            line.clear();
            if input.read_line(&mut line)? == 0 {
                break;
            }
            let (tag, value) = match split_tag_line(&line) {
                Some(tv) => tv,
                None => continue,
            };
            match tag {
                "kind" => kind = value.parse().map_err(|msg: String| DeformError::format(path, msg))?,
                "title" => title = value.to_string(),
                "comment" => comment_lines.push(value.to_string()),
                "float-column" => float_names.push(value.to_string()),
                "label-column" => label_names.push(value.to_string()),
                "label" => {
                    let (index, name) = split_first(value);
                    let index: usize = parse_token(path, index, "label index")?;
                    let color = label_table.labels.get(index).and_then(|l| l.color);
                    label_table.set(
                        index,
                        Label {
                            name: name.to_string(),
                            color,
                        },
                    );
                }
                "label-color" => {
                    let (index, rgba) = split_first(value);
                    let index: usize = parse_token(path, index, "label index")?;
                    let tokens: Vec<&str> = rgba.split_whitespace().collect();
                    let color: [u8; 4] = parse_tokens(path, &tokens, "label color")?;
                    let name = label_table.name(index).unwrap_or("").to_string();
                    label_table.set(
                        index,
                        Label {
                            name,
                            color: Some(color),
                        },
                    );
                }
                "data" => {
                    found_data = true;
                    break;
                }
                other => log::warn!("Unrecognized node data file tag: {}", other),
            }
        }
        if !found_data {
            return Err(DeformError::format(path, "missing data tag"));
        }

        let mut body = String::new();
        input.read_to_string(&mut body)?;
        let mut tokens = body.split_whitespace();
        let num_nodes: usize = match tokens.next() {
            Some(t) => parse_token(path, t, "number of nodes")?,
            None => return Err(DeformError::format(path, "missing number of nodes")),
        };
        let num_floats = float_names.len();
        let num_labels = label_names.len();
        let mut floats = Array2::<f32>::zeros((num_nodes, num_floats));
        let mut labels = Array2::<i32>::zeros((num_nodes, num_labels));
        for node in 0..num_nodes {
            for col in 0..num_floats {
                let t = tokens.next().ok_or_else(|| truncated(path, node))?;
                floats[[node, col]] = parse_token(path, t, "float value")?;
            }
            for col in 0..num_labels {
                let t = tokens.next().ok_or_else(|| truncated(path, node))?;
                labels[[node, col]] = parse_token(path, t, "label value")?;
            }
        }

        Ok(NodeDataFile {
            kind,
            title,
            comment: comment_lines.join("\n"),
            float_names,
            floats,
            label_names,
            labels,
            label_table,
        })
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "kind {}", self.kind)?;
        if !self.title.is_empty() {
            writeln!(out, "title {}", self.title)?;
        }
        for line in self.comment.lines() {
            writeln!(out, "comment {}", line)?;
        }
        for name in &self.float_names {
            writeln!(out, "float-column {}", name)?;
        }
        for name in &self.label_names {
            writeln!(out, "label-column {}", name)?;
        }
        for (i, label) in self.label_table.labels.iter().enumerate() {
            writeln!(out, "label {} {}", i, label.name)?;
            if let Some([r, g, b, a]) = label.color {
                writeln!(out, "label-color {} {} {} {} {}", i, r, g, b, a)?;
            }
        }
        writeln!(out, "data")?;
        writeln!(out, "{}", self.num_nodes())?;
        for (frow, lrow) in self.floats.axis_iter(Axis(0)).zip(self.labels.axis_iter(Axis(0))) {
            let mut first = true;
            for v in frow.iter() {
                write!(out, "{}{}", if first { "" } else { " " }, v)?;
                first = false;
            }
            for v in lrow.iter() {
                write!(out, "{}{}", if first { "" } else { " " }, v)?;
                first = false;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut buffer: Vec<u8> = Vec::new();
        self.write_to(&mut buffer)?;
        write_output(path, &buffer)
    }

    /// Keep only the first `num_nodes` rows.
    pub fn truncate_nodes(&mut self, num_nodes: usize) {
        let n = num_nodes.min(self.num_nodes());
        self.floats = self.floats.slice(s![..n, ..]).to_owned();
        self.labels = self.labels.slice(s![..n, ..]).to_owned();
    }
}

impl fmt::Display for NodeDataFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} data for {} nodes with {} float and {} label columns.",
            self.kind,
            self.num_nodes(),
            self.num_float_columns(),
            self.num_label_columns()
        )
    }
}

fn with_column<T: Copy>(table: &Array2<T>, values: &[T]) -> Array2<T> {
    let (rows, cols) = table.dim();
    Array2::from_shape_fn((rows, cols + 1), |(r, c)| if c < cols { table[[r, c]] } else { values[r] })
}

fn split_first(value: &str) -> (&str, &str) {
    match value.find(char::is_whitespace) {
        Some(pos) => (&value[..pos], value[pos..].trim()),
        None => (value, ""),
    }
}

fn truncated(path: &Path, node: usize) -> DeformError {
    DeformError::format(path, format!("data ends at node {}", node))
}

/// Read a per-vertex data file in any supported format.
///
/// FreeSurfer curv files (detected by their magic number) become a one-column table of the given
/// kind, files ending in ".annot" become a paint table. Everything else is read as a text table.
pub fn read_node_data<P: AsRef<Path>>(path: P, kind: NodeDataKind) -> Result<NodeDataFile> {
    let path = path.as_ref();
    let name = path.to_string_lossy();
    if name.ends_with(".annot") || name.ends_with(".annot.gz") {
        let annot = crate::fs_annot::FsAnnot::from_file(path)?;
        return Ok(annot.to_node_data());
    }
    if crate::fs_curv::is_curv_file(path)? {
        let curv = crate::fs_curv::FsCurv::from_file(path)?;
        return curv.to_node_data(kind, &crate::util::basename(&name));
    }
    let mut file = NodeDataFile::from_file(path)?;
    file.kind = kind;
    Ok(file)
}

/// Write a per-vertex data file, keeping the format of `format_of` (the file it was derived from).
pub fn write_node_data<P: AsRef<Path>, Q: AsRef<Path>>(
    path: P,
    data: &NodeDataFile,
    format_of: Q,
) -> Result<()> {
    let name = format_of.as_ref().to_string_lossy().into_owned();
    if (name.ends_with(".annot") || name.ends_with(".annot.gz")) && data.num_label_columns() == 1 {
        let annot = crate::fs_annot::FsAnnot::from_node_data(data)?;
        return annot.to_file(path);
    }
    if format_of.as_ref().exists()
        && crate::fs_curv::is_curv_file(format_of.as_ref())?
        && data.num_float_columns() == 1
    {
        let curv = crate::fs_curv::FsCurv::from_node_data(data, 0)?;
        return curv.to_file(path);
    }
    data.to_file(path)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn paint() -> NodeDataFile {
        let mut file = NodeDataFile::new(NodeDataKind::Paint, 3);
        file.title = String::from("lobes");
        file.comment = String::from("first line\nsecond line");
        let frontal = file.label_table.add("frontal lobe", Some([255, 0, 0, 255]));
        let occipital = file.label_table.add("occipital", None);
        file.add_label_column("lobe", &[frontal as i32, occipital as i32, frontal as i32])
            .unwrap();
        file.add_float_column("confidence", &[0.5, 1.0, 0.25]).unwrap();
        file
    }

    #[test]
    fn a_table_survives_a_round_trip() {
        let file = paint();
        let mut buf = Vec::new();
        file.write_to(&mut buf).unwrap();
        let back = NodeDataFile::from_reader(Cursor::new(buf), Path::new("mem")).unwrap();
        assert_eq!(file, back);
    }

    #[test]
    fn columns_must_match_the_node_count() {
        let mut file = NodeDataFile::new(NodeDataKind::Metric, 3);
        assert!(file.add_float_column("x", &[1.0, 2.0]).is_err());
        assert_eq!(0, file.num_float_columns());
    }

    #[test]
    fn column_ranges_are_computed() {
        let file = paint();
        assert_eq!(Some((0.25, 1.0)), file.column_range(0));
        assert_eq!(None, file.column_range(1));
    }

    #[test]
    fn kind_aliases_are_accepted() {
        assert_eq!(Ok(NodeDataKind::Shape), "SURFACE_SHAPE".parse());
        assert_eq!(Ok(NodeDataKind::Atlas), "PROB_ATLAS".parse());
        assert!("VOLUME".parse::<NodeDataKind>().is_err());
        assert!(NodeDataKind::Metric.interpolates_floats());
        assert!(!NodeDataKind::Paint.interpolates_floats());
    }

    #[test]
    fn truncated_data_is_an_error() {
        let text = "kind METRIC\nfloat-column a\nfloat-column b\ndata\n2\n1 2\n3\n";
        assert!(NodeDataFile::from_reader(Cursor::new(text), Path::new("mem")).is_err());
    }

    #[test]
    fn label_colors_must_fit_in_a_byte() {
        let text = "kind PAINT\nlabel-column region\nlabel 0 V1\nlabel-color 0 255 128 0 255\ndata\n1\n0\n";
        let file = NodeDataFile::from_reader(Cursor::new(text), Path::new("mem")).unwrap();
        assert_eq!(Some([255, 128, 0, 255]), file.label_table.labels[0].color);

        let text = "kind PAINT\nlabel-column region\nlabel 0 V1\nlabel-color 0 300 0 0 255\ndata\n1\n0\n";
        assert!(matches!(
            NodeDataFile::from_reader(Cursor::new(text), Path::new("mem")),
            Err(DeformError::FileFormat(_, _))
        ));
    }
}
