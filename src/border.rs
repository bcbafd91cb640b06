//! Landmark borders: named polylines drawn on a surface, and their projections onto a mesh.
//!
//! Registration pairs source and target borders by name and resamples each pair to the same
//! number of links, so that link `i` of a source border corresponds to link `i` of its target.

use std::fmt;
use std::io::{BufRead, Write};
use std::path::Path;
use std::str::FromStr;

use crate::deformation_map::{BorderFileType, BorderResampling, NodeDeformation};
use crate::error::{DeformError, Result};
use crate::mesh::BrainMesh;
use crate::point_projector::{unproject, PointProjector, Projection};
use crate::util::{distance, open_input, parse_token, parse_tokens, split_tag_line, vector_length, write_output};

impl fmt::Display for BorderFileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            BorderFileType::Unknown => "UNKNOWN",
            BorderFileType::Flat => "FLAT",
            BorderFileType::FlatLobar => "FLAT_LOBAR",
            BorderFileType::Spherical => "SPHERICAL",
            BorderFileType::Projection => "PROJECTION",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for BorderFileType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "FLAT" => Ok(BorderFileType::Flat),
            "FLAT_LOBAR" => Ok(BorderFileType::FlatLobar),
            "SPHERICAL" => Ok(BorderFileType::Spherical),
            "PROJECTION" => Ok(BorderFileType::Projection),
            "UNKNOWN" | "" => Ok(BorderFileType::Unknown),
            other => Err(format!("unknown border configuration {}", other)),
        }
    }
}

/// A named polyline.
#[derive(Debug, Clone, PartialEq)]
pub struct Border {
    pub name: String,
    /// Preferred distance between links, used when resampling from the border file.
    pub sampling_density: f32,
    pub links: Vec<[f32; 3]>,
}

impl Border {
    pub fn new(name: &str, sampling_density: f32, links: Vec<[f32; 3]>) -> Border {
        Border {
            name: name.to_string(),
            sampling_density,
            links,
        }
    }

    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    /// Sum of the link-to-link distances.
    pub fn length(&self) -> f32 {
        self.links.windows(2).map(|w| distance(w[0], w[1])).sum()
    }

    /// Largest link-to-link distance, 0 for borders with fewer than 2 links.
    pub fn max_link_spacing(&self) -> f32 {
        self.links
            .windows(2)
            .map(|w| distance(w[0], w[1]))
            .fold(0.0, f32::max)
    }

    /// Resample so that links are about `density` apart, keeping both end points.
    ///
    /// Returns the new number of links, which is `length / density + 1` but at least
    /// `min_links` (when that is larger than 1).
    pub fn resample_to_density(&mut self, density: f32, min_links: usize) -> usize {
        let mut n = if density > 0.0 {
            (self.length() / density) as usize + 1
        } else {
            self.links.len()
        };
        if min_links > 1 && n < min_links {
            n = min_links;
        }
        self.resample_to_number_of_links(n);
        n
    }

    /// Resample to exactly `n` links placed uniformly by arc length. Both end points are kept.
    pub fn resample_to_number_of_links(&mut self, n: usize) {
        if self.links.is_empty() || n == 0 {
            self.links.clear();
            return;
        }
        let first = self.links[0];
        if n == 1 {
            self.links = vec![first];
            return;
        }
        let mut cumulative = Vec::with_capacity(self.links.len());
        let mut total = 0.0f32;
        cumulative.push(0.0f32);
        for w in self.links.windows(2) {
            total += distance(w[0], w[1]);
            cumulative.push(total);
        }
        let last = self.links[self.links.len() - 1];
        if total <= 0.0 {
            self.links = vec![first; n];
            return;
        }

        let step = total / (n - 1) as f32;
        let mut out = Vec::with_capacity(n);
        let mut seg = 0usize;
        for i in 0..n - 1 {
            let t = step * i as f32;
            while seg + 2 < cumulative.len() && cumulative[seg + 1] < t {
                seg += 1;
            }
            let seg_len = cumulative[seg + 1] - cumulative[seg];
            let frac = if seg_len > 0.0 {
                ((t - cumulative[seg]) / seg_len).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let (a, b) = (self.links[seg], self.links[seg + 1]);
            out.push([
                a[0] + (b[0] - a[0]) * frac,
                a[1] + (b[1] - a[1]) * frac,
                a[2] + (b[2] - a[2]) * frac,
            ]);
        }
        out.push(last);
        self.links = out;
    }

    pub fn flip_x(&mut self) {
        for link in &mut self.links {
            link[0] = -link[0];
        }
    }

    /// Push every link radially onto a sphere of the given radius. Links at the origin stay put.
    pub fn set_spherical_radius(&mut self, radius: f32) {
        for link in &mut self.links {
            let len = vector_length(*link);
            if len > 0.0 {
                let s = radius / len;
                *link = [link[0] * s, link[1] * s, link[2] * s];
            }
        }
    }
}

/// How border names are compared when pairing borders of two files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMatch {
    Exact,
    /// Ignore case and surrounding or repeated whitespace.
    Relaxed,
}

impl BorderMatch {
    pub fn matches(&self, a: &str, b: &str) -> bool {
        match self {
            BorderMatch::Exact => a == b,
            BorderMatch::Relaxed => {
                let norm = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
                norm(a) == norm(b)
            }
        }
    }
}

/// A set of borders sharing one surface configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BorderFile {
    pub configuration: BorderFileType,
    pub borders: Vec<Border>,
}

impl Default for BorderFile {
    fn default() -> BorderFile {
        BorderFile {
            configuration: BorderFileType::Unknown,
            borders: Vec::new(),
        }
    }
}

impl BorderFile {
    pub fn new(configuration: BorderFileType, borders: Vec<Border>) -> BorderFile {
        BorderFile {
            configuration,
            borders,
        }
    }

    pub fn num_borders(&self) -> usize {
        self.borders.len()
    }

    pub fn border_by_name(&self, name: &str, how: BorderMatch) -> Option<&Border> {
        self.borders.iter().find(|b| how.matches(&b.name, name))
    }

    pub fn flip_x(&mut self) {
        for b in &mut self.borders {
            b.flip_x();
        }
    }

    pub fn set_spherical_radius(&mut self, radius: f32) {
        for b in &mut self.borders {
            b.set_spherical_radius(radius);
        }
    }

    /// Total number of links over all borders.
    pub fn num_links(&self) -> usize {
        self.borders.iter().map(|b| b.num_links()).sum()
    }

    /// Read a border file. Files ending in ".gz" are decompressed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<BorderFile> {
        let path = path.as_ref();
        BorderFile::from_reader(open_input(path)?, path)
    }

    pub fn from_reader<R: BufRead>(input: R, path: &Path) -> Result<BorderFile> {
        let mut file = BorderFile::default();
        let mut expected_links = 0usize;
        for line in input.lines() {
            let line = line?;
            let (tag, value) = match split_tag_line(&line) {
                Some(tv) => tv,
                None => continue,
            };
            match tag {
                "configuration" => {
                    file.configuration = value.parse().map_err(|msg: String| DeformError::format(path, msg))?
                }
                "border" => {
                    check_link_count(path, &file.borders, expected_links)?;
                    let (header, name) = split_border_header(path, value)?;
                    let density: f32 = parse_token(path, header[0], "sampling density")?;
                    expected_links = parse_token(path, header[1], "number of links")?;
                    file.borders.push(Border::new(name, density, Vec::with_capacity(expected_links)));
                }
                "link" => {
                    let border = file
                        .borders
                        .last_mut()
                        .ok_or_else(|| DeformError::format(path, "link before the first border"))?;
                    let tokens: Vec<&str> = value.split_whitespace().collect();
                    border.links.push(parse_tokens(path, &tokens, "link coordinate")?);
                }
                other => log::warn!("Unrecognized border file tag: {}", other),
            }
        }
        check_link_count(path, &file.borders, expected_links)?;
        Ok(file)
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "configuration {}", self.configuration)?;
        for b in &self.borders {
            writeln!(out, "border {} {} {}", b.sampling_density, b.links.len(), b.name)?;
            for l in &b.links {
                writeln!(out, "link {} {} {}", l[0], l[1], l[2])?;
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

impl fmt::Display for BorderFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} border file with {} borders and {} links.",
            self.configuration,
            self.borders.len(),
            self.num_links()
        )
    }
}

/// Split "<density-or-count> <count> <name with spaces>".
fn split_border_header<'v>(path: &Path, value: &'v str) -> Result<([&'v str; 2], &'v str)> {
    let mut rest = value.trim_start();
    let mut header = [""; 2];
    for slot in header.iter_mut() {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        if end == 0 {
            return Err(DeformError::format(path, format!("invalid border header '{}'", value)));
        }
        *slot = &rest[..end];
        rest = rest[end..].trim_start();
    }
    Ok((header, rest.trim_end()))
}

fn check_link_count<T>(path: &Path, borders: &[T], expected: usize) -> Result<()>
where
    T: HasLinks,
{
    if let Some(b) = borders.last() {
        if b.link_count() != expected {
            return Err(DeformError::format(
                path,
                format!("border has {} links but its header announces {}", b.link_count(), expected),
            ));
        }
    }
    Ok(())
}

trait HasLinks {
    fn link_count(&self) -> usize;
}

impl HasLinks for Border {
    fn link_count(&self) -> usize {
        self.links.len()
    }
}

impl HasLinks for BorderProjection {
    fn link_count(&self) -> usize {
        self.links.len()
    }
}

/// A border stored as barycentric records on a mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct BorderProjection {
    pub name: String,
    pub sampling_density: f32,
    pub links: Vec<NodeDeformation>,
}

/// A set of projected borders.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BorderProjectionFile {
    pub projections: Vec<BorderProjection>,
}

impl BorderProjectionFile {
    /// Project every link of `borders` into the triangles of the projector's mesh.
    ///
    /// Links that lie in no triangle are dropped, as are borders left without links.
    pub fn project(borders: &BorderFile, projector: &PointProjector) -> BorderProjectionFile {
        let projections = borders
            .borders
            .iter()
            .filter_map(|b| {
                let links: Vec<NodeDeformation> = b
                    .links
                    .iter()
                    .filter_map(|&xyz| projector.project_to_tile(xyz))
                    .map(|tp| Projection::Tile(tp).to_node_deformation())
                    .collect();
                if links.is_empty() {
                    None
                } else {
                    Some(BorderProjection {
                        name: b.name.clone(),
                        sampling_density: b.sampling_density,
                        links,
                    })
                }
            })
            .collect();
        BorderProjectionFile { projections }
    }

    /// Rebuild coordinate borders on `mesh`. Links that cannot be unprojected are dropped, as
    /// are borders left without links.
    pub fn unproject(&self, mesh: &BrainMesh, configuration: BorderFileType) -> BorderFile {
        let borders = self
            .projections
            .iter()
            .filter_map(|bp| {
                let links: Vec<[f32; 3]> = bp.links.iter().filter_map(|r| unproject(mesh, r)).collect();
                if links.is_empty() {
                    None
                } else {
                    Some(Border::new(&bp.name, bp.sampling_density, links))
                }
            })
            .collect();
        BorderFile::new(configuration, borders)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<BorderProjectionFile> {
        let path = path.as_ref();
        BorderProjectionFile::from_reader(open_input(path)?, path)
    }

    pub fn from_reader<R: BufRead>(input: R, path: &Path) -> Result<BorderProjectionFile> {
        let mut file = BorderProjectionFile::default();
        let mut expected_links = 0usize;
        for line in input.lines() {
            let line = line?;
            let (tag, value) = match split_tag_line(&line) {
                Some(tv) => tv,
                None => continue,
            };
            match tag {
                "border" => {
                    check_link_count(path, &file.projections, expected_links)?;
                    let (header, name) = split_border_header(path, value)?;
                    let density: f32 = parse_token(path, header[0], "sampling density")?;
                    expected_links = parse_token(path, header[1], "number of links")?;
                    file.projections.push(BorderProjection {
                        name: name.to_string(),
                        sampling_density: density,
                        links: Vec::with_capacity(expected_links),
                    });
                }
                "link" => {
                    let bp = file
                        .projections
                        .last_mut()
                        .ok_or_else(|| DeformError::format(path, "link before the first border"))?;
                    let tokens: Vec<&str> = value.split_whitespace().collect();
                    if tokens.len() < 6 {
                        return Err(DeformError::format(path, "border projection link needs 6 values"));
                    }
                    let nodes: [i32; 3] = parse_tokens(path, &tokens[..3], "link nodes")?;
                    let areas: [f32; 3] = parse_tokens(path, &tokens[3..6], "link areas")?;
                    bp.links.push(NodeDeformation::from_legacy(nodes, areas));
                }
                other => log::warn!("Unrecognized border projection file tag: {}", other),
            }
        }
        check_link_count(path, &file.projections, expected_links)?;
        Ok(file)
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        for bp in &self.projections {
            writeln!(out, "border {} {} {}", bp.sampling_density, bp.links.len(), bp.name)?;
            for r in &bp.links {
                let a = r.legacy_areas();
                writeln!(
                    out,
                    "link {} {} {} {} {} {}",
                    r.tile_nodes[0], r.tile_nodes[1], r.tile_nodes[2], a[0], a[1], a[2]
                )?;
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

/// Source and target landmark borders after resampling, paired by index.
#[derive(Debug, Clone, PartialEq)]
pub struct ResampledBorders {
    pub source: BorderFile,
    /// Target borders in the order of the source borders.
    pub target: BorderFile,
    /// Whether the x coordinates of the source borders were negated.
    pub source_flipped: bool,
}

/// Resample source and target landmark borders so that corresponding borders have the same
/// number of links.
///
/// Each source border with more than one link is resampled to the policy's density (at least 2
/// links) and the target border of the same name is resampled to the same number of links.
/// Targets are then reordered to follow the sources. With [`BorderResampling::None`], or for a
/// source border of a single link, the pair keeps its link counts, which may differ; a warning
/// is logged for every such pair. When the two sides are different
/// hemispheres and the source borders were not flipped before, the source x coordinates are
/// negated once.
pub fn resample_border_sets(
    source: &BorderFile,
    target: &BorderFile,
    policy: BorderResampling,
    density: f32,
    structures_differ: bool,
    already_flipped: bool,
) -> Result<ResampledBorders> {
    if source.num_borders() != target.num_borders() {
        return Err(DeformError::BorderCountMismatch(source.num_borders(), target.num_borders()));
    }
    if policy == BorderResampling::Value && density <= 0.0 {
        return Err(DeformError::InvalidParameter(format!(
            "border resampling density must be positive, got {}",
            density
        )));
    }

    let mut resampled_source = source.clone();
    let mut ordered_target = Vec::with_capacity(target.num_borders());
    for sb in resampled_source.borders.iter_mut() {
        let tb = target
            .border_by_name(&sb.name, BorderMatch::Exact)
            .ok_or_else(|| DeformError::BorderNotFound(sb.name.clone()))?;
        let mut tb = tb.clone();
        if sb.num_links() > 1 {
            let step = match policy {
                BorderResampling::None => None,
                BorderResampling::FromBorderFile => Some(sb.sampling_density),
                BorderResampling::Value => Some(density),
            };
            if let Some(step) = step {
                let new_links = sb.resample_to_density(step, 2);
                tb.resample_to_number_of_links(new_links);
                log::debug!("Border {} resampled to {} links", sb.name, new_links);
            }
        }
        if sb.num_links() != tb.num_links() {
            log::warn!(
                "Border {} has {} source links but {} target links",
                sb.name,
                sb.num_links(),
                tb.num_links()
            );
        }
        ordered_target.push(tb);
    }

    let mut source_flipped = already_flipped;
    if structures_differ && !already_flipped {
        resampled_source.flip_x();
        source_flipped = true;
        log::info!("Source and target are different hemispheres, source borders flipped in x");
    }

    Ok(ResampledBorders {
        source: resampled_source,
        target: BorderFile::new(target.configuration, ordered_target),
        source_flipped,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Cursor;

    fn line(name: &str, len: f32, n: usize) -> Border {
        let links = (0..n)
            .map(|i| [len * i as f32 / (n - 1) as f32, 0.0, 0.0])
            .collect();
        Border::new(name, 2.0, links)
    }

    #[test]
    fn resampling_keeps_the_end_points() {
        let mut b = Border::new("bent", 1.0, vec![[0.0, 0.0, 0.0], [3.0, 0.0, 0.0], [3.0, 4.0, 0.0]]);
        let n = b.resample_to_density(1.0, 2);
        assert_eq!(8, n);
        assert_eq!(8, b.num_links());
        assert_eq!([0.0, 0.0, 0.0], b.links[0]);
        assert_eq!([3.0, 4.0, 0.0], b.links[7]);
        assert_abs_diff_eq!(7.0, b.length(), epsilon = 1e-4);
        assert_abs_diff_eq!(1.0, b.max_link_spacing(), epsilon = 1e-4);
    }

    #[test]
    fn short_borders_get_at_least_two_links() {
        let mut b = line("short", 1.0, 5);
        assert_eq!(2, b.resample_to_density(10.0, 2));
        assert_eq!(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], b.links);
    }

    #[test]
    fn border_files_survive_a_round_trip() {
        let file = BorderFile::new(
            BorderFileType::Spherical,
            vec![line("central sulcus", 4.0, 3), Border::new("dot", 1.0, vec![[1.0, 2.0, 3.0]])],
        );
        let mut buf = Vec::new();
        file.write_to(&mut buf).unwrap();
        let back = BorderFile::from_reader(Cursor::new(buf), Path::new("mem")).unwrap();
        assert_eq!(file, back);
    }

    #[test]
    fn announced_link_counts_are_checked() {
        let text = "border 1.0 3 a\nlink 0 0 0\nlink 1 0 0\n";
        assert!(BorderFile::from_reader(Cursor::new(text), Path::new("mem")).is_err());
    }

    #[test]
    fn relaxed_matching_ignores_case_and_spacing() {
        assert!(BorderMatch::Relaxed.matches(" Central  Sulcus", "central sulcus"));
        assert!(!BorderMatch::Exact.matches("Central Sulcus", "central sulcus"));
    }

    #[test]
    fn targets_follow_the_source_order_and_link_counts() {
        let source = BorderFile::new(BorderFileType::Flat, vec![line("a", 10.0, 2), line("b", 4.0, 9)]);
        let target = BorderFile::new(BorderFileType::Flat, vec![line("b", 8.0, 3), line("a", 5.0, 20)]);
        let r = resample_border_sets(&source, &target, BorderResampling::Value, 2.0, false, false).unwrap();
        assert_eq!(vec!["a", "b"], r.target.borders.iter().map(|b| b.name.as_str()).collect::<Vec<_>>());
        for (s, t) in r.source.borders.iter().zip(r.target.borders.iter()) {
            assert_eq!(s.num_links(), t.num_links());
        }
        assert_eq!(6, r.source.borders[0].num_links());
        assert_eq!(3, r.source.borders[1].num_links());
        assert!(!r.source_flipped);
    }

    #[test]
    fn different_hemispheres_flip_the_source_once() {
        let source = BorderFile::new(BorderFileType::Flat, vec![line("a", 4.0, 3)]);
        let target = source.clone();
        let r = resample_border_sets(&source, &target, BorderResampling::None, 0.0, true, false).unwrap();
        assert!(r.source_flipped);
        assert_eq!([-4.0, 0.0, 0.0], r.source.borders[0].links[2]);

        let again = resample_border_sets(&r.source, &target, BorderResampling::None, 0.0, true, true).unwrap();
        assert_eq!([-4.0, 0.0, 0.0], again.source.borders[0].links[2]);
    }

    #[test]
    fn single_link_sources_leave_the_target_alone() {
        let source = BorderFile::new(BorderFileType::Flat, vec![Border::new("a", 1.0, vec![[1.0, 2.0, 0.0]])]);
        let target = BorderFile::new(BorderFileType::Flat, vec![line("a", 8.0, 5)]);
        let r = resample_border_sets(&source, &target, BorderResampling::Value, 2.0, false, false).unwrap();
        assert_eq!(1, r.source.borders[0].num_links());
        assert_eq!(5, r.target.borders[0].num_links());
    }

    #[test]
    fn missing_target_borders_are_reported() {
        let source = BorderFile::new(BorderFileType::Flat, vec![line("a", 4.0, 3)]);
        let target = BorderFile::new(BorderFileType::Flat, vec![line("A", 4.0, 3)]);
        let err = resample_border_sets(&source, &target, BorderResampling::Value, 1.0, false, false).unwrap_err();
        assert_eq!("Border named a not found in target borders.", err.to_string());
    }
}
