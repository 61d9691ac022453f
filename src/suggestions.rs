//! The suggestion builder: turns a tool's patched buffer into PR review
//! comments, confined to the lines the triggering event actually touched.

use std::collections::HashMap;
use std::path::Path;

use similar::{ChangeTag, TextDiff};

use crate::advice::PatchSource;
use crate::clang_tools::clang_tidy::TidyAdvice;
use crate::clang_tools::clang_format::FormatAdvice;
use crate::common_fs::FileObj;

/// A single PR review comment anchored to a line range.
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub file_name: String,
    /// The line a multi-line suggestion starts on, or `-1` when the
    /// suggestion is single-line (GitHub's API omits `start_line` then).
    pub line_start: i64,
    pub line_end: i64,
    pub comment: String,
}

impl Suggestion {
    /// Serialize into the JSON body GitHub's "create review comment" API
    /// expects.
    pub fn to_review_comment_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "path": self.file_name,
            "body": format!("{}{}", crate::comments::COMMENT_MARKER, self.comment),
            "line": self.line_end,
        });
        if self.line_start != self.line_end && self.line_start > 0 {
            payload["start_line"] = serde_json::json!(self.line_start);
        }
        payload
    }
}

/// The accumulated review material across every file and both tools.
#[derive(Debug, Default)]
pub struct ReviewBatch {
    pub suggestions: Vec<Suggestion>,
    /// `None` means the tool wasn't asked to produce a review at all.
    pub tool_total: HashMap<&'static str, Option<u32>>,
    pub full_patch: HashMap<&'static str, String>,
}

impl ReviewBatch {
    pub fn new() -> Self {
        ReviewBatch {
            suggestions: Vec::new(),
            tool_total: HashMap::from([("clang-tidy", None), ("clang-format", None)]),
            full_patch: HashMap::from([("clang-tidy", String::new()), ("clang-format", String::new())]),
        }
    }

    /// Render the PR review's summary body and the list of inline comment
    /// payloads, parallel to what GitHub's "create review" API expects.
    pub fn render_summary(
        &self,
        tidy_version: Option<&str>,
        format_version: Option<&str>,
    ) -> (String, Vec<serde_json::Value>) {
        let mut summary = String::new();
        let mut comments = Vec::new();
        let mut posted = HashMap::from([("clang-tidy", 0u32), ("clang-format", 0u32)]);
        for suggestion in &self.suggestions {
            comments.push(suggestion.to_review_comment_payload());
            if suggestion.comment.contains("### clang-format") {
                *posted.get_mut("clang-format").unwrap() += 1;
            }
            if suggestion.comment.contains("### clang-tidy") {
                *posted.get_mut("clang-tidy").unwrap() += 1;
            }
        }
        for tool_name in ["clang-tidy", "clang-format"] {
            let tool_version = if tool_name == "clang-format" {
                format_version
            } else {
                tidy_version
            };
            let Some(tool_version) = tool_version else {
                continue;
            };
            let Some(total) = self.tool_total[tool_name] else {
                continue;
            };
            summary.push_str(&format!("### Used {tool_name} v{tool_version}\n\n"));
            if !comments.is_empty() && posted[tool_name] != total {
                summary.push_str(&format!(
                    "Only {} out of {total} {tool_name} concerns fit within this pull request's diff.\n",
                    posted[tool_name]
                ));
            }
            let patch = &self.full_patch[tool_name];
            if !patch.is_empty() {
                summary.push_str(&format!(
                    "\n<details><summary>Click here for the full {tool_name} patch</summary>\n\n\n```diff\n{patch}\n```\n\n\n</details>\n\n"
                ));
            } else if total == 0 {
                summary.push_str(&format!("No concerns from {tool_name}.\n"));
            }
        }
        (summary, comments)
    }

    /// Merge `suggestion` into an existing one at the same `(file, start, end)`
    /// by concatenating bodies; otherwise append it.
    fn merge_or_push(&mut self, suggestion: Suggestion) {
        for known in &mut self.suggestions {
            if known.file_name == suggestion.file_name
                && known.line_start == suggestion.line_start
                && known.line_end == suggestion.line_end
            {
                known.comment.push('\n');
                known.comment.push_str(&suggestion.comment);
                return;
            }
        }
        self.suggestions.push(suggestion);
    }
}

struct Hunk {
    old_start: usize,
    old_len: usize,
    new_start: usize,
    added: Vec<String>,
    removed: Vec<u32>,
}

/// Regroup a line-level diff into zero-context hunks: maximal runs of
/// consecutive non-equal changes.
fn collect_hunks(original: &str, patched: &str) -> Vec<Hunk> {
    let diff = TextDiff::from_lines(original, patched);
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Equal => {
                if let Some(hunk) = current.take() {
                    hunks.push(hunk);
                }
            }
            ChangeTag::Delete => {
                let old_index = change.old_index().unwrap_or(0);
                let hunk = current.get_or_insert_with(|| Hunk {
                    old_start: old_index,
                    old_len: 0,
                    new_start: change.new_index().unwrap_or(old_index),
                    added: Vec::new(),
                    removed: Vec::new(),
                });
                hunk.old_len = old_index + 1 - hunk.old_start;
                hunk.removed.push(old_index as u32 + 1);
            }
            ChangeTag::Insert => {
                let new_index = change.new_index().unwrap_or(0);
                let old_index = change.old_index().unwrap_or(new_index);
                let hunk = current.get_or_insert_with(|| Hunk {
                    old_start: old_index,
                    old_len: 0,
                    new_start: new_index,
                    added: Vec::new(),
                    removed: Vec::new(),
                });
                hunk.added.push(change.value().to_string());
            }
        }
    }
    if let Some(hunk) = current.take() {
        hunks.push(hunk);
    }
    hunks
}

fn unified_patch_text(original: &str, patched: &str, path: &str) -> String {
    TextDiff::from_lines(original, patched)
        .unified_diff()
        .context_radius(0)
        .header(path, path)
        .to_string()
}

fn render_body(header: &str, added: &[String], removed: &[u32]) -> String {
    let mut body = header.to_string();
    let suggestion: String = added.concat();
    if suggestion.is_empty() && !removed.is_empty() {
        body.push_str("\nPlease remove the line(s)\n- ");
        let lines: Vec<String> = removed.iter().map(u32::to_string).collect();
        body.push_str(&lines.join("\n- "));
    } else {
        body.push_str(&format!("\n```suggestion\n{suggestion}```"));
    }
    body
}

/// Diff `source.patched()` against `file`'s on-disk bytes, folding the
/// result into `batch`. `tool_name` must be a key already present in
/// `batch.tool_total`/`batch.full_patch`.
fn add_patch_source(
    batch: &mut ReviewBatch,
    file: &FileObj,
    original: &[u8],
    source: &dyn PatchSource,
    summary_only: bool,
) {
    let Some(patched) = source.patched() else {
        return;
    };
    let original_text = String::from_utf8_lossy(original);
    let patched_text = String::from_utf8_lossy(patched);
    let path = file.name.to_string_lossy().replace('\\', "/");

    let patch_text = unified_patch_text(&original_text, &patched_text, &path);
    batch
        .full_patch
        .entry(source.tool_name())
        .and_modify(|s| s.push_str(&patch_text))
        .or_insert(patch_text);

    let hunks = collect_hunks(&original_text, &patched_text);
    let total = batch.tool_total.entry(source.tool_name()).or_insert(Some(0));
    *total = Some(total.unwrap_or(0) + hunks.len() as u32);

    if summary_only {
        return;
    }

    for hunk in hunks {
        let (span_start, span_end) = if hunk.old_len > 0 {
            (hunk.old_start as u32 + 1, (hunk.old_start + hunk.old_len) as u32)
        } else {
            let point = hunk.new_start as u32 + 1;
            (point, point)
        };
        if !file.is_range_contained(span_start, span_end) {
            continue;
        }
        let header = source.suggestion_header(span_start, span_end);
        let body = render_body(&header, &hunk.added, &hunk.removed);
        let (line_start, line_end) = if span_start < span_end {
            (span_start as i64, span_end as i64)
        } else {
            (-1, span_end as i64)
        };
        batch.merge_or_push(Suggestion {
            file_name: path.clone(),
            line_start,
            line_end,
            comment: body,
        });
    }
}

/// Emit single-line suggestions for clang-tidy diagnostics whose fixits
/// didn't fold into a patch-derived suggestion (ie `--export-fixes` found
/// nothing replaceable, or no tidy review was requested at all).
fn add_unpatched_diagnostics(batch: &mut ReviewBatch, file: &FileObj, tidy: &TidyAdvice) {
    let path = file.name.to_string_lossy().replace('\\', "/");
    let ext = Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    for note in &tidy.notes {
        if note.applied_fixes || note.filename != path {
            continue;
        }
        let total = batch.tool_total.entry("clang-tidy").or_insert(Some(0));
        *total = Some(total.unwrap_or(0) + 1);
        if !file.is_range_contained(note.line, note.line) {
            continue;
        }
        let mut body = format!(
            "### clang-tidy diagnostics\n- **{}:{}:{}:** {}: [{}]\n   > {}\n",
            note.filename, note.line, note.cols, note.severity, note.diagnostic_link(), note.rationale
        );
        if !note.fixit_lines.is_empty() {
            let suggestion = note.fixit_lines.join("\n   ");
            body.push_str(&format!("\n   ```{ext}\n   {suggestion}\n   ```\n"));
        }
        batch.merge_or_push(Suggestion {
            file_name: path.clone(),
            line_start: -1,
            line_end: note.line as i64,
            comment: body,
        });
    }
}

/// Build the review batch for every file, folding in both tools' advice.
/// `originals` holds each file's on-disk bytes read before either tool ran
/// (the patch's pre-image).
pub fn build_review_batch(
    files: &[FileObj],
    originals: &[Vec<u8>],
    format_advice: &[Option<FormatAdvice>],
    tidy_advice: &[Option<TidyAdvice>],
    summary_only: bool,
) -> ReviewBatch {
    let mut batch = ReviewBatch::new();
    for ((file, original), (format, tidy)) in files
        .iter()
        .zip(originals.iter())
        .zip(format_advice.iter().zip(tidy_advice.iter()))
    {
        if let Some(format) = format {
            add_patch_source(&mut batch, file, original, format, summary_only);
        }
        if let Some(tidy) = tidy {
            add_patch_source(&mut batch, file, original, tidy, summary_only);
            if !summary_only {
                add_unpatched_diagnostics(&mut batch, file, tidy);
            }
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Range;
    use std::path::PathBuf;

    fn file_with_chunk(range: Range<u32>) -> FileObj {
        FileObj::from(PathBuf::from("a.cpp"), vec![], vec![range])
    }

    #[test]
    fn pure_insertion_hunk_uses_new_start_as_span() {
        let hunks = collect_hunks("a\nb\n", "a\nx\nb\n");
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].old_len, 0);
        assert_eq!(hunks[0].added, vec!["x\n".to_string()]);
    }

    #[test]
    fn deletion_hunk_spans_removed_lines() {
        let hunks = collect_hunks("a\nb\nc\n", "a\nc\n");
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].old_len, 1);
        assert_eq!(hunks[0].removed, vec![2]);
    }

    struct FakeSource {
        patched: Vec<u8>,
    }

    impl PatchSource for FakeSource {
        fn tool_name(&self) -> &'static str {
            "clang-format"
        }
        fn patched(&self) -> Option<&[u8]> {
            Some(&self.patched)
        }
        fn suggestion_header(&self, _start: u32, _end: u32) -> String {
            "### clang-format suggestions\n".to_string()
        }
    }

    #[test]
    fn suggestion_confined_to_diff_chunk() {
        let file = file_with_chunk(1..3);
        let original = b"a\nb\nc\n".to_vec();
        let source = FakeSource {
            patched: b"a\nB\nc\n".to_vec(),
        };
        let mut batch = ReviewBatch::new();
        add_patch_source(&mut batch, &file, &original, &source, false);
        assert_eq!(batch.suggestions.len(), 1);
        assert_eq!(batch.suggestions[0].line_end, 2);
    }

    #[test]
    fn suggestion_outside_diff_chunk_is_dropped_but_counted() {
        let file = file_with_chunk(10..12);
        let original = b"a\nb\nc\n".to_vec();
        let source = FakeSource {
            patched: b"a\nB\nc\n".to_vec(),
        };
        let mut batch = ReviewBatch::new();
        add_patch_source(&mut batch, &file, &original, &source, false);
        assert!(batch.suggestions.is_empty());
        assert_eq!(batch.tool_total["clang-format"], Some(1));
    }
}
