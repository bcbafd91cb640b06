//! Utility functions used in all other neurodeform modules.

use flate2::bufread::GzDecoder;

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{DeformError, Result};

use byteordered::byteorder::ReadBytesExt;

/// Check whether the file extension ends with ".gz".
pub fn is_gz_file<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref()
        .file_name()
        .map(|a| a.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false)
}

/// Open a file for buffered reading, decompressing it on the fly if its name ends with ".gz".
pub fn open_input<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let gz = is_gz_file(&path);
    let file = BufReader::new(File::open(path)?);
    if gz {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(file))
    }
}

/// Read a fixed length zero-terminated byte string of the given length from the input. Embedded '\0' chars are allowed, but not added to the returned String.
pub fn read_fixed_length_string<S>(input: &mut S, len: usize) -> Result<String>
where
    S: Read,
{
    let mut info_line = String::with_capacity(len);
    for _ in 0..len {
        let cur_char = input.read_u8()? as char;
        if cur_char != '\0' {
            info_line.push(cur_char);
        }
    }
    Ok(info_line)
}

/// Write `data` to `path` in one step.
///
/// The bytes go to a sibling temporary file first which is then renamed over the target, so a
/// failed write never leaves a truncated output behind.
pub fn write_output<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let mut tmp_name = OsString::from(".");
    tmp_name.push(path.file_name().unwrap_or_default());
    tmp_name.push(".part");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, data)?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

/// Split a text line into its tag and the remaining value.
///
/// Blank lines and lines starting with '#' yield `None`. The value is trimmed and may be empty or contain spaces.
pub fn split_tag_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match line.find(char::is_whitespace) {
        Some(pos) => Some((&line[..pos], line[pos..].trim())),
        None => Some((line, "")),
    }
}

/// Parse a single whitespace-free token, reporting `what` failed to parse in `path` on error.
pub fn parse_token<T: FromStr>(path: &Path, token: &str, what: &str) -> Result<T> {
    token
        .parse::<T>()
        .map_err(|_| DeformError::format(path, format!("invalid {} '{}'", what, token)))
}

/// Parse exactly `N` whitespace separated tokens of the same type.
pub fn parse_tokens<T: FromStr + Copy + Default, const N: usize>(
    path: &Path,
    tokens: &[&str],
    what: &str,
) -> Result<[T; N]> {
    if tokens.len() < N {
        return Err(DeformError::format(
            path,
            format!("expected {} values for {}, found {}", N, what, tokens.len()),
        ));
    }
    let mut out = [T::default(); N];
    for (slot, token) in out.iter_mut().zip(tokens.iter()) {
        *slot = parse_token(path, token, what)?;
    }
    Ok(out)
}

/// Parse "true"/"false" the way the tag-line formats store flags. Anything but "true" is false.
pub fn parse_flag(value: &str) -> bool {
    value.split_whitespace().next() == Some("true")
}

pub fn flag_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Resolve `name` against `base` unless it is empty or already absolute.
pub fn resolve_path<P: AsRef<Path>>(base: P, name: &str) -> PathBuf {
    let candidate = Path::new(name);
    if name.is_empty() || candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.as_ref().join(candidate)
    }
}

/// Express `name` relative to `dir` when it lies inside `dir`, otherwise return it unchanged.
pub fn relative_to(dir: &str, name: &str) -> String {
    if dir.is_empty() || name.is_empty() {
        return name.to_string();
    }
    match Path::new(name).strip_prefix(dir) {
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => name.to_string(),
    }
}

/// The last path component of `name`, or `name` itself if it has none.
pub fn basename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

/// The directory part of `path`, or "." for bare file names.
pub fn directory_of<P: AsRef<Path>>(path: P) -> PathBuf {
    match path.as_ref().parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Squared euclidean distance between two points.
pub fn distance_squared(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

pub fn distance(a: [f32; 3], b: [f32; 3]) -> f32 {
    distance_squared(a, b).sqrt()
}

pub fn vector_length(v: [f32; 3]) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tag_lines_are_split_into_tag_and_value() {
        assert_eq!(Some(("source-spec", "a b.spec")), split_tag_line("source-spec   a b.spec \n"));
        assert_eq!(Some(("DATA-START", "")), split_tag_line("DATA-START"));
        assert_eq!(None, split_tag_line("   "));
        assert_eq!(None, split_tag_line("# comment"));
    }

    #[test]
    fn paths_are_made_relative_only_inside_the_directory() {
        assert_eq!("lh.sphere", relative_to("/data/subj", "/data/subj/lh.sphere"));
        assert_eq!("/other/lh.sphere", relative_to("/data/subj", "/other/lh.sphere"));
        assert_eq!("lh.sphere", relative_to("", "lh.sphere"));
    }

    #[test]
    fn relative_names_are_resolved_against_the_base() {
        assert_eq!(PathBuf::from("/data/subj/lh.sphere"), resolve_path("/data/subj", "lh.sphere"));
        assert_eq!(PathBuf::from("/abs/lh.sphere"), resolve_path("/data/subj", "/abs/lh.sphere"));
    }

    #[test]
    fn output_is_written_completely() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        write_output(&out, b"hello").unwrap();
        assert_eq!("hello", fs::read_to_string(&out).unwrap());
        assert_eq!(1, fs::read_dir(dir.path()).unwrap().count());
    }

    #[test]
    fn token_arrays_report_short_input() {
        let p = Path::new("x");
        let ok: [i32; 3] = parse_tokens(p, &["1", "2", "3"], "nodes").unwrap();
        assert_eq!([1, 2, 3], ok);
        assert!(parse_tokens::<i32, 3>(p, &["1", "2"], "nodes").is_err());
    }
}
