//! This module is primarily used to parse diff blobs.
//!
//! It can also be used (locally) to get a list of files changes from either the last
//! commit or the next commit's staging area.
//!
//! This also includes a private module that is used as a fallback (brute force)
//! mechanism when parsing diffs fail using libgit2. NOTE: parsing a diff from a buffer
//! (str or bytes) only happens in CI or when libgit2 cannot be used to initialize a
//! repository.

use std::{ops::Range, path::PathBuf};

// non-std crates
use git2::{Diff, Error, Patch, Repository};

// project specific modules/crates
use crate::common_fs::{is_source_or_ignored, FileObj};

/// This (re-)initializes the repository located in the specified `path`.
///
/// This is actually not used in CI for file permissions and ownership reasons.
/// Rather this is only (supposed to be) used when executed on a local developer
/// machine.
pub fn open_repo(path: &str) -> Result<Repository, Error> {
    Repository::open(PathBuf::from(path).as_path())
}

/// Fetches the SHA1 of the commit for the specified [`git2::Repository`].
///
/// The optionally specified `depth` can be used to traverse the tree a number of times
/// since the current `"HEAD"`.
fn get_sha(repo: &Repository, depth: Option<u32>) -> Result<git2::Object<'_>, Error> {
    match depth {
        Some(int) => repo.revparse_single(format!("HEAD~{int}").as_str()),
        None => repo.revparse_single("HEAD"),
    }
}

/// Fetch the [`git2::Diff`] about a given [`git2::Repository`].
///
/// This is actually not used in CI for file permissions and ownership reasons.
/// Rather this is only (supposed to be) used when executed on a local developer
/// machine.
///
/// If there are files staged for a commit, then the resulting [`Diff`] will describe
/// the staged changes. However, if there are no staged changes, then the last commit's
/// [`Diff`] is returned.
pub fn get_diff(repo: &Repository) -> Result<git2::Diff, Error> {
    let head = get_sha(repo, None)?.peel_to_tree()?;
    let mut has_staged_files = false;
    for entry in repo.statuses(None)?.iter() {
        if entry.status().bits()
            & (git2::Status::INDEX_NEW.bits()
                | git2::Status::INDEX_MODIFIED.bits()
                | git2::Status::INDEX_RENAMED.bits())
            > 0
        {
            has_staged_files = true;
            break;
        }
    }

    if has_staged_files {
        repo.diff_tree_to_index(Some(&head), None, None)
    } else {
        let base = get_sha(repo, Some(1))?.peel_to_tree()?;
        repo.diff_tree_to_tree(Some(&base), Some(&head), None)
    }
}

/// Parses a patch for a single file in a diff.
///
/// Returns the list of line numbers that have additions and the `[start, end)`
/// ranges spanning each hunk present in the `patch`.
fn parse_patch(patch: &Patch) -> Result<(Vec<u32>, Vec<Range<u32>>), Error> {
    let mut additions = Vec::new();
    let mut diff_hunks = Vec::new();
    for hunk_idx in 0..patch.num_hunks() {
        let (hunk, line_count) = patch.hunk(hunk_idx)?;
        diff_hunks.push(hunk.new_start()..(hunk.new_start() + hunk.new_lines()));
        for line in 0..line_count {
            let diff_line = patch.line_in_hunk(hunk_idx, line)?;
            if diff_line.origin_value() == git2::DiffLineType::Addition {
                if let Some(lineno) = diff_line.new_lineno() {
                    additions.push(lineno);
                }
            }
        }
    }
    Ok((additions, diff_hunks))
}

/// Parses a given [`git2::Diff`] and returns a list of [`FileObj`]s.
///
/// The specified list of `extensions`, `ignored` and `not_ignored` files are used as
/// filters to expedite the process and only focus on the data this system can use.
pub fn parse_diff(
    diff: &git2::Diff,
    extensions: &[String],
    ignored: &[String],
    not_ignored: &[String],
) -> Vec<FileObj> {
    let mut files: Vec<FileObj> = Vec::new();
    for file_idx in 0..diff.deltas().count() {
        let Ok(diff_delta) = diff.get_delta(file_idx).ok_or(()) else {
            continue;
        };
        let Some(file_path) = diff_delta.new_file().path().map(|p| p.to_path_buf()) else {
            continue;
        };
        if ![
            git2::Delta::Added,
            git2::Delta::Modified,
            git2::Delta::Renamed,
        ]
        .contains(&diff_delta.status())
        {
            continue;
        }
        if !is_source_or_ignored(&file_path, extensions, ignored, not_ignored) {
            continue;
        }
        let Ok(Some(patch)) = Patch::from_diff(diff, file_idx) else {
            continue;
        };
        let Ok((added_lines, diff_chunks)) = parse_patch(&patch) else {
            continue;
        };
        if diff_chunks.is_empty() && added_lines.is_empty() {
            // rename-only section with identical content; drop it.
            continue;
        }
        files.push(FileObj::from(file_path, added_lines, diff_chunks));
    }
    files
}

/// Same as [`parse_diff`] but takes a buffer of bytes instead of a [`git2::Diff`].
///
/// In the case that libgit2 fails to parse the buffer of bytes, a private algorithm is
/// used. In such a case, brute force parsing the diff as a string can be costly. So, a
/// log warning and error are output when this occurs. Please report this instance for
/// troubleshooting/diagnosis as this likely means the diff is malformed or there is a
/// bug in libgit2 source.
pub fn parse_diff_from_buf(
    buff: &[u8],
    extensions: &[String],
    ignored: &[String],
    not_ignored: &[String],
) -> Vec<FileObj> {
    if let Ok(diff_obj) = &Diff::from_buffer(buff) {
        parse_diff(diff_obj, extensions, ignored, not_ignored)
    } else {
        log::warn!("libgit2 failed to parse the diff");
        brute_force_parse_diff::parse_diff(
            &String::from_utf8_lossy(buff),
            extensions,
            ignored,
            not_ignored,
        )
    }
}

mod brute_force_parse_diff {
    //! A private module to house the brute force algorithms of parsing a diff as a string.
    //! This module is only intended as a fall back mechanism when [super::parse_diff_from_buf]
    //! fails to use libgit2 C bindings.
    //!
    //! Since this is a fail safe, there are log messages that indicate when it is used.
    //! Any instance where this mechanism is used should be reported as it is likely a bug
    //! in libgit2 source.

    use regex::Regex;
    use std::{ops::Range, path::PathBuf};

    use crate::common_fs::{is_source_or_ignored, FileObj};

    fn get_filename_from_front_matter(front_matter: &str) -> Option<&str> {
        let diff_file_name = Regex::new(r"(?m)^\+\+\+\sb?/(.*)$").unwrap();
        let diff_renamed_file = Regex::new(r"(?m)^rename to (.*)$").unwrap();
        let diff_binary_file = Regex::new(r"(?m)^Binary\sfiles\s").unwrap();
        if let Some(captures) = diff_file_name.captures(front_matter) {
            return Some(captures.get(1).unwrap().as_str());
        }
        if front_matter.trim_start().starts_with("similarity") {
            if let Some(captures) = diff_renamed_file.captures(front_matter) {
                return Some(captures.get(1).unwrap().as_str());
            }
        }
        if diff_binary_file.is_match(front_matter) {
            log::warn!("Unrecognized diff starting with:\n{front_matter}");
        }
        None
    }

    /// A regex pattern used in multiple functions
    static HUNK_INFO_PATTERN: &str = r"(?m)@@\s\-\d+,\d+\s\+(\d+,\d+)\s@@";

    /// Parses a single file's patch containing one or more hunks.
    /// Returns the line numbers that contain additions and the `[start, end)`
    /// ranges of lines that span each hunk.
    fn parse_patch(patch: &str) -> (Vec<u32>, Vec<Range<u32>>) {
        let mut diff_chunks = Vec::new();
        let mut additions = Vec::new();

        let hunk_info = Regex::new(HUNK_INFO_PATTERN).unwrap();
        if let Some(hunk_headers) = hunk_info.captures(patch) {
            for (index, (hunk, header)) in
                hunk_info.split(patch).zip(hunk_headers.iter()).enumerate()
            {
                if index == 0 {
                    continue; // we don't need the whole match, just the capture groups
                }
                let new_range: Vec<u32> = header
                    .unwrap()
                    .as_str()
                    .split(',')
                    .take(2)
                    .map(|val| val.parse::<u32>().unwrap())
                    .collect();
                let start_line = new_range[0];
                let hunk_len = new_range[1];
                let mut line_numb_in_diff = start_line;
                diff_chunks.push(start_line..(start_line + hunk_len));
                for (line_index, line) in hunk.split('\n').enumerate() {
                    if line.starts_with('+') {
                        additions.push(line_numb_in_diff);
                    }
                    if line_index > 0 && !line.starts_with('-') {
                        line_numb_in_diff += 1;
                    }
                }
            }
        }
        (additions, diff_chunks)
    }

    pub fn parse_diff(
        diff: &str,
        extensions: &[String],
        ignored: &[String],
        not_ignored: &[String],
    ) -> Vec<FileObj> {
        log::error!("Using brute force diff parsing!");
        let mut results = Vec::new();
        let diff_file_delimiter = Regex::new(r"(?m)^diff --git a/.*$").unwrap();
        let hunk_info = Regex::new(HUNK_INFO_PATTERN).unwrap();

        let file_diffs = diff_file_delimiter.split(diff);
        for file_diff in file_diffs {
            if file_diff.is_empty() || file_diff.starts_with("deleted file") {
                continue;
            }
            if let Some(first_hunk) = hunk_info.find(file_diff) {
                let front_matter = &file_diff[..first_hunk.start()];
                if let Some(file_name) = get_filename_from_front_matter(front_matter) {
                    let file_path = PathBuf::from(file_name);
                    if is_source_or_ignored(&file_path, extensions, ignored, not_ignored) {
                        let (added_lines, diff_chunks) =
                            parse_patch(&file_diff[first_hunk.start()..]);
                        results.push(FileObj::from(file_path, added_lines, diff_chunks));
                    }
                }
            }
            // else: file has no changed content (rename only); skip it.
        }
        results
    }

    // ******************* UNIT TESTS ***********************
    #[cfg(test)]
    mod test {

        use super::parse_diff;
        use crate::{common_fs::FileObj, git::parse_diff_from_buf, logger};

        static RENAMED_DIFF: &str = r"diff --git a/tests/demo/some source.cpp b/tests/demo/some source.cpp
similarity index 100%
rename from /tests/demo/some source.cpp
rename to /tests/demo/some source.cpp\n";

        static RENAMED_DIFF_WITH_CHANGES: &str = r#"diff --git a/tests/demo/some source.cpp b/tests/demo/some source.cpp
similarity index 99%
rename from /tests/demo/some source.cpp
rename to /tests/demo/some source.cpp
@@ -3,7 +3,7 @@
\n \n \n-#include "iomanip"
+#include <iomanip>\n \n \n \n"#;

        fn ext(s: &str) -> Vec<String> {
            vec![s.to_string()]
        }

        #[test]
        fn parse_renamed_diff() {
            let diff_buf = RENAMED_DIFF.as_bytes();
            let files = parse_diff_from_buf(diff_buf, &ext("cpp"), &[], &[]);
            assert!(files.is_empty());
        }

        #[test]
        fn parse_renamed_diff_with_patch() {
            let diff_buf = RENAMED_DIFF_WITH_CHANGES.as_bytes();
            let files = parse_diff_from_buf(diff_buf, &ext("cpp"), &[], &[]);
            assert!(!files.is_empty());
        }

        /// Used to parse the same string buffer using both libgit2 and brute force regex.
        /// Returns 2 vectors of [FileObj] that should be equivalent.
        fn setup_parsed(buf: &str, extensions: &[String]) -> (Vec<FileObj>, Vec<FileObj>) {
            logger::init().unwrap_or_default();
            (
                parse_diff_from_buf(buf.as_bytes(), extensions, &[], &[]),
                parse_diff(buf, extensions, &[], &[]),
            )
        }

        fn assert_files_eq(files_from_a: &[FileObj], files_from_b: &[FileObj]) {
            assert_eq!(files_from_a.len(), files_from_b.len());
            for (a, b) in files_from_a.iter().zip(files_from_b) {
                assert_eq!(a.name, b.name);
                assert_eq!(a.added_lines, b.added_lines);
                assert_eq!(a.added_ranges, b.added_ranges);
                assert_eq!(a.diff_chunks, b.diff_chunks);
            }
        }

        #[test]
        fn parse_typical_diff() {
            let diff_buf = "diff --git a/path/for/Some file.cpp b/path/to/Some file.cpp\n\
                            --- a/path/for/Some file.cpp\n\
                            +++ b/path/to/Some file.cpp\n\
                            @@ -3,7 +3,7 @@\n \n \n \n\
                            -#include <some_lib/render/animation.hpp>\n\
                            +#include <some_lib/render/animations.hpp>\n \n \n \n";

            let (files_from_buf, files_from_str) = setup_parsed(diff_buf, &ext("cpp"));
            assert!(!files_from_buf.is_empty());
            assert_files_eq(&files_from_buf, &files_from_str);
        }

        #[test]
        fn parse_binary_diff() {
            let diff_buf = "diff --git a/some picture.png b/some picture.png\n\
                new file mode 100644\n\
                Binary files /dev/null and b/some picture.png differ\n";

            let (files_from_buf, files_from_str) = setup_parsed(diff_buf, &ext("png"));
            assert!(files_from_buf.is_empty());
            assert_files_eq(&files_from_buf, &files_from_str);
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use git2::{IndexAddOption, Repository, Signature};
    use tempfile::tempdir;

    use super::{get_diff, open_repo, parse_diff};

    /// Builds a throwaway local repository with one commit, then a second
    /// uncommitted edit, so `get_diff`/`parse_diff` can be exercised without
    /// any network access.
    #[test]
    fn local_repo_diff_round_trip() {
        let tmp = tempdir().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        let file_path = tmp.path().join("a.cpp");
        fs::write(&file_path, "int main() {\n    return 0;\n}\n").unwrap();

        let sig = Signature::now("tester", "tester@example.com").unwrap();
        {
            let mut index = repo.index().unwrap();
            index.add_path(std::path::Path::new("a.cpp")).unwrap();
            index.write().unwrap();
            let tree_id = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
                .unwrap();
        }

        fs::write(&file_path, "int main() {\n    return 1;\n}\n").unwrap();
        {
            let mut index = repo.index().unwrap();
            index
                .add_all(["a.cpp"], IndexAddOption::DEFAULT, None)
                .unwrap();
            index.write().unwrap();
        }

        let repo = open_repo(tmp.path().to_str().unwrap()).unwrap();
        let diff = get_diff(&repo).unwrap();
        let files = parse_diff(&diff, &["cpp".to_string()], &[], &[]);
        assert_eq!(files.len(), 1);
        assert!(files[0].added_lines.contains(&2));
    }
}
