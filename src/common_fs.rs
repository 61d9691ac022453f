//! A module to hold all common file system functionality: the file filter,
//! the byte-offset index, and the bounded-time read/write primitive used
//! around the analyzer's auto-fix pass.

use std::io::{Read, Write};
use std::ops::Range;
use std::path::{Component, Path};
use std::time::{Duration, Instant};
use std::{fs, io};
use std::path::PathBuf;

use crate::config::LinesChangedOnly;
use crate::error::{LinterError, Result};

/// A structure to represent a file's path and line changes.
#[derive(Debug, Clone)]
pub struct FileObj {
    /// The path to the file.
    pub name: PathBuf,

    /// The list of lines with additions.
    pub added_lines: Vec<u32>,

    /// The list of ranges that span only lines with additions.
    pub added_ranges: Vec<Range<u32>>,

    /// The list of ranges (`[start, end)`) that span the lines present in diff chunks.
    pub diff_chunks: Vec<Range<u32>>,
}

impl FileObj {
    /// Instantiate a rudimentary object with only file name information.
    ///
    /// To instantiate an object with line information, use [`FileObj::from`].
    pub fn new(name: PathBuf) -> Self {
        FileObj {
            name,
            added_lines: Vec::new(),
            added_ranges: Vec::new(),
            diff_chunks: Vec::new(),
        }
    }

    /// Instantiate an object with file name and changed lines information.
    pub fn from(name: PathBuf, added_lines: Vec<u32>, diff_chunks: Vec<Range<u32>>) -> Self {
        let added_ranges = consolidate_numbers_to_ranges(&added_lines);
        FileObj {
            name,
            added_lines,
            added_ranges,
            diff_chunks,
        }
    }

    /// The set of line numbers in scope for a tool invocation, per
    /// `--lines-changed-only`. `All` returns `None` (analyze the whole file).
    pub fn range_of_changed_lines(&self, scope: LinesChangedOnly) -> Option<Vec<Range<u32>>> {
        match scope {
            LinesChangedOnly::All => None,
            LinesChangedOnly::Diff => Some(self.diff_chunks.clone()),
            LinesChangedOnly::Added => Some(self.added_ranges.clone()),
        }
    }

    /// Whether a file has any changes at all in the given scope. Used to
    /// decide whether a worker should bother invoking a tool on this file.
    pub fn has_line_changes(&self, scope: LinesChangedOnly) -> bool {
        match scope {
            LinesChangedOnly::All => true,
            LinesChangedOnly::Diff => !self.diff_chunks.is_empty(),
            LinesChangedOnly::Added => !self.added_lines.is_empty(),
        }
    }

    /// If `[start, end]` (inclusive) lies entirely inside exactly one diff
    /// chunk, return that chunk's bounds as `(start, end)` exclusive-end
    /// pair expressed in the caller's coordinates (i.e. itself). Otherwise
    /// `None`.
    pub fn is_range_contained(&self, start: u32, end: u32) -> bool {
        self.diff_chunks
            .iter()
            .any(|chunk| chunk.start <= start && end < chunk.end)
    }
}

/// Coalesce a sorted `Vec<u32>` of line numbers into `[start, end)` ranges of
/// consecutive numbers.
fn consolidate_numbers_to_ranges(lines: &[u32]) -> Vec<Range<u32>> {
    let mut ranges: Vec<Range<u32>> = Vec::new();
    let mut iter = lines.iter().peekable();
    while let Some(&start) = iter.next() {
        let mut end = start;
        while let Some(&&next) = iter.peek() {
            if next == end + 1 {
                end = next;
                iter.next();
            } else {
                break;
            }
        }
        ranges.push(start..(end + 1));
    }
    ranges
}

/// Describes if a specified `file_name` is contained within the given `set` of paths.
///
/// The `set` of paths is used as domains, so the specified `file_name` can be a direct
/// or distant descendant of any given paths in the `set`.
pub fn is_file_in_list(file_name: &Path, set: &[String], prompt: &str) -> bool {
    for pattern in set {
        let pat = Path::new(pattern);
        if pat.is_file() {
            if file_name == pat {
                log::debug!(
                    "{} is {prompt} as specified via {:?}",
                    file_name.to_string_lossy().replace('\\', "/"),
                    pat
                );
                return true;
            }
        } else if pat.is_dir() && file_name.starts_with(pat) {
            log::debug!(
                "{} is {prompt} as specified in domain {:?}",
                file_name.to_string_lossy().replace('\\', "/"),
                pat
            );
            return true;
        }
        // else the pattern names a path that doesn't exist on disk; it cannot match.
    }
    false
}

/// A helper function that checks if `entry` satisfies the following conditions (in
/// ordered priority):
///
/// - Does `entry`'s path use at least 1 of the listed file `extensions`? (takes
///   precedence)
/// - Is `entry` specified in the list of explicitly `not_ignored` paths? (supersedes
///   `ignored` paths)
/// - Is `entry` *not* specified in list of `ignored` paths?
pub fn is_source_or_ignored(
    entry: &Path,
    extensions: &[String],
    ignored: &[String],
    not_ignored: &[String],
) -> bool {
    let extension = match entry.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext,
        None => return false,
    };
    if !extensions.iter().any(|e| e == extension) {
        return false;
    }
    log::debug!(
        "{} is a source file",
        entry.to_string_lossy().replace('\\', "/")
    );
    let is_in_not_ignored = is_file_in_list(entry, not_ignored, "not ignored");
    let is_in_ignored = is_file_in_list(entry, ignored, "ignored");
    is_in_not_ignored || !is_in_ignored
}

/// Walks a given `root_path` recursively and returns a [`Vec<FileObj>`] that
///
/// - uses at least 1 of the `extensions`
/// - is not specified in the given list of `ignored` paths
/// - is specified in the given list `not_ignored` paths (which supersedes `ignored` paths)
pub fn list_source_files(
    extensions: &[String],
    ignored: &[String],
    not_ignored: &[String],
    root_path: &str,
) -> Vec<FileObj> {
    let mut files: Vec<FileObj> = Vec::new();
    let Ok(read_dir) = fs::read_dir(root_path) else {
        return files;
    };
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in read_dir.flatten() {
        entries.push(entry.path());
    }
    for entry in entries {
        if entry.is_dir() {
            let is_hidden = entry
                .components()
                .last()
                .and_then(|c| c.as_os_str().to_str())
                .map(|s| s.starts_with('.'))
                .unwrap_or(false);
            if !is_hidden {
                if let Some(path_str) = entry.to_str() {
                    files.extend(list_source_files(extensions, ignored, not_ignored, path_str));
                }
            }
        } else if is_source_or_ignored(&entry, extensions, ignored, not_ignored) {
            let name = entry
                .strip_prefix("./")
                .unwrap_or(&entry)
                .to_path_buf();
            files.push(FileObj::new(name));
        }
    }
    files
}

/// Gets the line and column number from a given `offset` (of bytes) for given
/// `file_path`.
///
/// This computes the line and column numbers from a buffer of bytes read from the
/// `file_path`. In non-UTF-8 encoded files, this does not guarantee that a word
/// boundary exists at the returned column number. However, the `offset` given to this
/// function is expected to originate from diagnostic information provided by
/// clang-format or clang-tidy.
pub fn get_line_cols_from_offset(file_path: &Path, offset: usize) -> Result<(usize, usize)> {
    let mut file_buf = vec![0; offset];
    fs::File::open(file_path)?.read_exact(&mut file_buf)?;
    get_line_cols_from_bytes(&file_buf)
}

/// Like [`get_line_cols_from_offset`] but operating on an already-read
/// prefix of bytes (the bytes up to and including the offset).
pub fn get_line_cols_from_bytes(prefix: &[u8]) -> Result<(usize, usize)> {
    let line_count = prefix.iter().filter(|&&b| b == b'\n').count() + 1;
    let column_count = match prefix.iter().rposition(|&b| b == b'\n') {
        Some(idx) => prefix.len() - idx,
        None => prefix.len() + 1,
    };
    Ok((line_count, column_count))
}

/// This was adapted from [cargo source code](https://github.com/rust-lang/cargo/blob/fede83ccf973457de319ba6fa0e36ead454d2e20/src/cargo/util/paths.rs#L61).
///
/// NOTE: Rust [std::path] crate has no native functionality equivalent to this.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        PathBuf::from(c.as_os_str())
    } else {
        PathBuf::new()
    };

    for component in components {
        match component {
            Component::Prefix(..) => unreachable!(),
            Component::RootDir => {
                ret.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                ret.pop();
            }
            Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

/// Read the full contents of `path`, retrying for up to `timeout` if the
/// file is transiently unavailable (e.g. being rewritten concurrently by a
/// tool's auto-fix pass). Used to snapshot a file before invoking
/// clang-tidy's `--fix-errors`.
pub fn read_with_timeout(path: &Path, timeout: Duration) -> Result<Vec<u8>> {
    let start = Instant::now();
    loop {
        match fs::read(path) {
            Ok(contents) => return Ok(contents),
            Err(e) if start.elapsed() < timeout => {
                log::debug!("retrying read of {path:?} after {e}");
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(_) => {
                return Err(LinterError::FileIoTimeout {
                    path: path.to_path_buf(),
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        }
    }
}

/// Write `contents` to `path`, retrying for up to `timeout` on transient
/// failure. Used to restore a file's original bytes after a tool's
/// auto-fix pass has rewritten it in place.
pub fn write_with_timeout(path: &Path, contents: &[u8], timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        match fs::File::create(path).and_then(|mut f| f.write_all(contents)) {
            Ok(()) => return Ok(()),
            Err(e) if start.elapsed() < timeout => {
                log::debug!("retrying write of {path:?} after {e}");
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(_) => {
                return Err(LinterError::FileIoTimeout {
                    path: path.to_path_buf(),
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        }
    }
}

/// Run `op` against `path`'s on-disk bytes while guaranteeing the original
/// bytes are restored afterward, even if `op` returns an error. This is the
/// snapshot/restore pattern used around the analyzer's auto-fix pass.
pub fn with_snapshot_restore<T>(
    path: &Path,
    timeout: Duration,
    op: impl FnOnce() -> Result<T>,
) -> Result<(T, Vec<u8>)> {
    let original = read_with_timeout(path, timeout)?;
    let result = op();
    let patched = read_with_timeout(path, timeout);
    write_with_timeout(path, &original, timeout)?;
    let patched = patched?;
    let value = result?;
    Ok((value, patched))
}

#[cfg(test)]
mod test {
    use super::{get_line_cols_from_bytes, is_file_in_list, list_source_files, normalize_path};
    use std::env::current_dir;
    use std::path::PathBuf;

    #[test]
    fn normalize_redirects() {
        let mut src = current_dir().unwrap();
        src.push("..");
        src.push(
            current_dir()
                .unwrap()
                .strip_prefix(current_dir().unwrap().parent().unwrap())
                .unwrap(),
        );
        assert_eq!(normalize_path(&src), current_dir().unwrap());
    }

    #[test]
    fn normalize_current_redirect() {
        let src = PathBuf::from("tests/./ignored_paths");
        assert_eq!(normalize_path(&src), PathBuf::from("tests/ignored_paths"));
    }

    use crate::cli::{get_arg_parser, parse_ignore};

    fn setup_ignore(input: &str) -> (Vec<String>, Vec<String>) {
        let arg_parser = get_arg_parser();
        let args = arg_parser.get_matches_from(vec!["cpp-linter", "-i", input]);
        let ignore_arg = args
            .get_many::<String>("ignore")
            .unwrap()
            .map(|s| s.as_str())
            .collect::<Vec<_>>();
        parse_ignore(&ignore_arg)
    }

    #[test]
    fn ignore_src() {
        let (ignored, not_ignored) = setup_ignore("src");
        assert!(is_file_in_list(&PathBuf::from("./src/lib.rs"), &ignored, "ignored"));
        assert!(!is_file_in_list(
            &PathBuf::from("./src/lib.rs"),
            &not_ignored,
            "not_ignored"
        ));
    }

    #[test]
    fn ignore_root() {
        let (ignored, not_ignored) = setup_ignore("!src/lib.rs|./");
        assert!(is_file_in_list(&PathBuf::from("./Cargo.toml"), &ignored, "ignored"));
        assert!(is_file_in_list(
            &PathBuf::from("./src/lib.rs"),
            &not_ignored,
            "not_ignored"
        ));
    }

    #[test]
    fn walk_dir_recursively() {
        let (ignored, not_ignored) = setup_ignore("target");
        let extensions = vec!["rs".to_string()];
        let files = list_source_files(&extensions, &ignored, &not_ignored, ".");
        assert!(!files.is_empty());
        for file in files {
            assert_eq!(
                file.name.extension().unwrap_or_default().to_string_lossy(),
                "rs"
            );
        }
    }

    #[test]
    fn translate_byte_offset() {
        let (lines, cols) = get_line_cols_from_bytes(b"line one\nline two\nabcd").unwrap();
        assert_eq!(lines, 3);
        assert_eq!(cols, 5);
    }

    #[test]
    fn translate_byte_offset_first_line() {
        let (lines, cols) = get_line_cols_from_bytes(b"abcde").unwrap();
        assert_eq!(lines, 1);
        assert_eq!(cols, 6);
    }
}
