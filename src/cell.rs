//! Discrete point features on a surface: cells and foci, and their projections onto a mesh.

use std::fmt;
use std::io::{BufRead, Write};
use std::path::Path;

use crate::deformation_map::NodeDeformation;
use crate::error::{DeformError, Result};
use crate::mesh::BrainMesh;
use crate::point_projector::{unproject, PointProjector};
use crate::util::{open_input, parse_tokens, split_tag_line, write_output};

/// A named point. Used for cells and for foci.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub name: String,
    pub class_name: String,
    pub xyz: [f32; 3],
}

impl Cell {
    pub fn new(name: &str, xyz: [f32; 3]) -> Cell {
        Cell {
            name: name.to_string(),
            class_name: String::new(),
            xyz,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CellFile {
    pub cells: Vec<Cell>,
}

impl CellFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<CellFile> {
        let path = path.as_ref();
        CellFile::from_reader(open_input(path)?, path)
    }

    /// Each cell is a `cell x y z name` line, optionally followed by a `class name` line.
    pub fn from_reader<R: BufRead>(input: R, path: &Path) -> Result<CellFile> {
        let mut file = CellFile::default();
        for line in input.lines() {
            let line = line?;
            match split_tag_line(&line) {
                Some(("cell", value)) => {
                    let (xyz, name) = split_numbers::<f32, 3>(path, value)?;
                    file.cells.push(Cell::new(name, xyz));
                }
                Some(("class", value)) => {
                    let cell = file
                        .cells
                        .last_mut()
                        .ok_or_else(|| DeformError::format(path, "class before the first cell"))?;
                    cell.class_name = value.to_string();
                }
                Some((other, _)) => log::warn!("Unrecognized cell file tag: {}", other),
                None => {}
            }
        }
        Ok(file)
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        for c in &self.cells {
            writeln!(out, "cell {} {} {} {}", c.xyz[0], c.xyz[1], c.xyz[2], c.name)?;
            if !c.class_name.is_empty() {
                writeln!(out, "class {}", c.class_name)?;
            }
        }
        Ok(())
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut buffer: Vec<u8> = Vec::new();
        self.write_to(&mut buffer)?;
        write_output(path, &buffer)
    }
}

impl fmt::Display for CellFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Cell file with {} cells.", self.cells.len())
    }
}

/// A cell stored as a barycentric record on a mesh plus its original position.
#[derive(Debug, Clone, PartialEq)]
pub struct CellProjection {
    pub name: String,
    pub class_name: String,
    pub projection: NodeDeformation,
    pub fiducial_xyz: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CellProjectionFile {
    pub projections: Vec<CellProjection>,
}

impl CellProjectionFile {
    /// Project cells onto the projector's mesh. Cells in no triangle use their nearest vertex;
    /// cells that cannot be placed at all keep the no-match record.
    pub fn project(cells: &CellFile, projector: &PointProjector) -> CellProjectionFile {
        let projections = cells
            .cells
            .iter()
            .map(|c| CellProjection {
                name: c.name.clone(),
                class_name: c.class_name.clone(),
                projection: projector
                    .project(c.xyz)
                    .map(|p| p.to_node_deformation())
                    .unwrap_or_default(),
                fiducial_xyz: c.xyz,
            })
            .collect();
        CellProjectionFile { projections }
    }

    /// Positions on `mesh`. Cells with an unusable record keep their stored position.
    pub fn unproject(&self, mesh: &BrainMesh) -> CellFile {
        let cells = self
            .projections
            .iter()
            .map(|cp| Cell {
                name: cp.name.clone(),
                class_name: cp.class_name.clone(),
                xyz: unproject(mesh, &cp.projection).unwrap_or(cp.fiducial_xyz),
            })
            .collect();
        CellFile { cells }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<CellProjectionFile> {
        let path = path.as_ref();
        CellProjectionFile::from_reader(open_input(path)?, path)
    }

    /// Each cell is a `cell n0 n1 n2 a0 a1 a2 x y z name` line (areas in the legacy layout),
    /// optionally followed by a `class name` line.
    pub fn from_reader<R: BufRead>(input: R, path: &Path) -> Result<CellProjectionFile> {
        let mut file = CellProjectionFile::default();
        for line in input.lines() {
            let line = line?;
            match split_tag_line(&line) {
                Some(("cell", value)) => {
                    let (v, name) = split_numbers::<f32, 9>(path, value)?;
                    let nodes = [v[0] as i32, v[1] as i32, v[2] as i32];
                    file.projections.push(CellProjection {
                        name: name.to_string(),
                        class_name: String::new(),
                        projection: NodeDeformation::from_legacy(nodes, [v[3], v[4], v[5]]),
                        fiducial_xyz: [v[6], v[7], v[8]],
                    });
                }
                Some(("class", value)) => {
                    let cp = file
                        .projections
                        .last_mut()
                        .ok_or_else(|| DeformError::format(path, "class before the first cell"))?;
                    cp.class_name = value.to_string();
                }
                Some((other, _)) => log::warn!("Unrecognized cell projection file tag: {}", other),
                None => {}
            }
        }
        Ok(file)
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        for cp in &self.projections {
            let n = cp.projection.tile_nodes;
            let a = cp.projection.legacy_areas();
            let p = cp.fiducial_xyz;
            writeln!(
                out,
                "cell {} {} {} {} {} {} {} {} {} {}",
                n[0], n[1], n[2], a[0], a[1], a[2], p[0], p[1], p[2], cp.name
            )?;
            if !cp.class_name.is_empty() {
                writeln!(out, "class {}", cp.class_name)?;
            }
        }
        Ok(())
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut buffer: Vec<u8> = Vec::new();
        self.write_to(&mut buffer)?;
        write_output(path, &buffer)
    }
}

/// Split `N` leading numbers off a value; the rest of the line is the name.
fn split_numbers<'v, T, const N: usize>(path: &Path, value: &'v str) -> Result<([T; N], &'v str)>
where
    T: std::str::FromStr + Copy + Default,
{
    let mut rest = value.trim_start();
    let mut tokens: Vec<&str> = Vec::with_capacity(N);
    for _ in 0..N {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        if end == 0 {
            break;
        }
        tokens.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    let numbers = parse_tokens(path, &tokens, "cell value")?;
    Ok((numbers, rest.trim_end()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::SurfaceGeometry;
    use approx::assert_abs_diff_eq;
    use std::io::Cursor;

    fn square() -> BrainMesh {
        BrainMesh::from_points(
            &[[0.0, 0.0, 0.0], [10.0, 0.0, 0.0], [10.0, 10.0, 0.0], [0.0, 10.0, 0.0]],
            &[[0, 1, 2], [0, 2, 3]],
        )
        .unwrap()
    }

    #[test]
    fn cell_files_survive_a_round_trip() {
        let mut cell = Cell::new("V1 focus", [1.5, -2.0, 3.25]);
        cell.class_name = String::from("visual");
        let file = CellFile {
            cells: vec![cell, Cell::new("other", [0.0, 0.0, 0.0])],
        };
        let mut buf = Vec::new();
        file.write_to(&mut buf).unwrap();
        assert_eq!(file, CellFile::from_reader(Cursor::new(buf), Path::new("mem")).unwrap());
    }

    #[test]
    fn projected_cells_unproject_to_their_position() {
        let mesh = square();
        let projector = PointProjector::new(&mesh, SurfaceGeometry::Flat);
        let cells = CellFile {
            cells: vec![Cell::new("a", [7.0, 2.0, 0.0]), Cell::new("b", [2.0, 6.0, 0.0])],
        };
        let projected = CellProjectionFile::project(&cells, &projector);
        let back = projected.unproject(&mesh);
        for (c, b) in cells.cells.iter().zip(back.cells.iter()) {
            assert_eq!(c.name, b.name);
            for k in 0..3 {
                assert_abs_diff_eq!(c.xyz[k], b.xyz[k], epsilon = 1e-4);
            }
        }

        let mut buf = Vec::new();
        projected.write_to(&mut buf).unwrap();
        let reread = CellProjectionFile::from_reader(Cursor::new(buf), Path::new("mem")).unwrap();
        assert_eq!(projected, reread);
    }

    #[test]
    fn unusable_records_keep_the_stored_position() {
        let file = CellProjectionFile {
            projections: vec![CellProjection {
                name: String::from("lost"),
                class_name: String::new(),
                projection: NodeDeformation::default(),
                fiducial_xyz: [1.0, 2.0, 3.0],
            }],
        };
        assert_eq!([1.0, 2.0, 3.0], file.unproject(&square()).cells[0].xyz);
    }
}
