//! End-to-end tests of the components the orchestrator wires together:
//! diff parsing, per-file scoping, and suggestion building, without
//! shelling out to the real clang-format/clang-tidy binaries.

use std::path::PathBuf;

use cpp_linter::clang_tools::clang_format::{FormatAdvice, ReplacementLine};
use cpp_linter::clang_tools::clang_tidy::{TidyAdvice, TidyDiagnostic};
use cpp_linter::common_fs::FileObj;
use cpp_linter::git::parse_diff_from_buf;
use cpp_linter::suggestions::build_review_batch;

const EXTENSIONS: &[&str] = &["cpp", "hpp"];

fn extensions() -> Vec<String> {
    EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

/// A single-hunk formatter-only diff: one file, one line touched.
const SINGLE_HUNK_DIFF: &str = "\
diff --git a/demo.cpp b/demo.cpp
index 1111111..2222222 100644
--- a/demo.cpp
+++ b/demo.cpp
@@ -1,3 +1,3 @@
 int main() {
-    int x=1;
+    int x = 1;
 }
";

/// A rename with no content change: libgit2 reports zero added lines and no
/// diff chunks, so the file must be dropped entirely rather than kept as an
/// empty `FileObj`.
const RENAME_ONLY_DIFF: &str = "\
diff --git a/old_name.cpp b/new_name.cpp
similarity index 100%
rename from old_name.cpp
rename to new_name.cpp
";

#[test]
fn single_hunk_formatter_change_produces_one_file_with_one_added_line() {
    let files = parse_diff_from_buf(SINGLE_HUNK_DIFF.as_bytes(), &extensions(), &[], &[]);
    assert_eq!(files.len(), 1);
    let file = &files[0];
    assert_eq!(file.name, PathBuf::from("demo.cpp"));
    assert!(file.added_lines.contains(&2));
}

#[test]
fn rename_only_section_yields_no_file_record() {
    let files = parse_diff_from_buf(RENAME_ONLY_DIFF.as_bytes(), &extensions(), &[], &[]);
    assert!(files.is_empty());
}

#[test]
fn analyzer_diagnostic_without_a_fix_is_not_dropped_on_the_floor() {
    let files = parse_diff_from_buf(SINGLE_HUNK_DIFF.as_bytes(), &extensions(), &[], &[]);
    let file = files.into_iter().next().unwrap();
    let original = b"int main() {\n    int x=1;\n}\n".to_vec();

    let tidy = TidyAdvice {
        notes: vec![TidyDiagnostic {
            filename: "demo.cpp".to_string(),
            line: 2,
            cols: 9,
            severity: "warning".to_string(),
            rationale: "variable 'x' is never used".to_string(),
            diagnostic: "clang-analyzer-deadcode.DeadStores".to_string(),
            fixit_lines: vec!["    int x=1;".to_string()],
            fixits: vec![],
            applied_fixes: false,
        }],
        patched: None,
    };

    let batch = build_review_batch(&[file], &[original], &[None], &[Some(tidy)], false);
    assert_eq!(batch.suggestions.len(), 1);
    assert!(batch.suggestions[0].comment.contains("clang-analyzer-deadcode.DeadStores"));
    assert_eq!(batch.tool_total["clang-tidy"], Some(1));
}

#[test]
fn cross_tool_suggestions_on_the_same_span_merge_into_one_comment() {
    let files = parse_diff_from_buf(SINGLE_HUNK_DIFF.as_bytes(), &extensions(), &[], &[]);
    let file = files.into_iter().next().unwrap();
    let original = b"int main() {\n    int x=1;\n}\n".to_vec();

    let format_advice = FormatAdvice {
        filename: "demo.cpp".to_string(),
        replaced_lines: vec![ReplacementLine {
            line: 2,
            replacements: vec![],
        }],
        patched: Some(b"int main() {\n    int x = 1;\n}\n".to_vec()),
    };
    let tidy_advice = TidyAdvice {
        notes: vec![TidyDiagnostic {
            filename: "demo.cpp".to_string(),
            line: 2,
            cols: 9,
            severity: "warning".to_string(),
            rationale: "insert whitespace".to_string(),
            diagnostic: "whitespace-operator".to_string(),
            fixit_lines: vec![],
            fixits: vec![],
            applied_fixes: true,
        }],
        patched: Some(b"int main() {\n    int x = 1;\n}\n".to_vec()),
    };

    let batch = build_review_batch(
        &[file],
        &[original],
        &[Some(format_advice)],
        &[Some(tidy_advice)],
        false,
    );

    // Both tools propose the identical single-line fix, so it merges into
    // one suggestion rather than two separate comments on the same line.
    assert_eq!(batch.suggestions.len(), 1);
    assert!(batch.suggestions[0].comment.contains("clang-format"));
    assert!(batch.suggestions[0].comment.contains("clang-tidy"));
}

#[test]
fn lines_changed_only_skips_files_with_no_added_lines() {
    use cpp_linter::config::LinesChangedOnly;

    let touched = parse_diff_from_buf(SINGLE_HUNK_DIFF.as_bytes(), &extensions(), &[], &[])
        .into_iter()
        .next()
        .unwrap();
    assert!(touched.has_line_changes(LinesChangedOnly::Added));

    let untouched = FileObj::new(PathBuf::from("untouched.cpp"));
    assert!(!untouched.has_line_changes(LinesChangedOnly::Added));
    assert!(untouched.has_line_changes(LinesChangedOnly::All));
}
