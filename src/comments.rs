//! The comment composer: renders the two Markdown surfaces (thread comment
//! and step summary) from a run's format/tidy advice.

use crate::clang_tools::clang_format::FormatAdvice;
use crate::clang_tools::clang_tidy::TidyAdvice;
use crate::common_fs::FileObj;

/// The leading line every bot-authored comment carries, used to recognize
/// (and later update or delete) our own comments.
pub const COMMENT_MARKER: &str = "<!-- cpp linter action -->\n";

pub const USER_OUTREACH: &str = "\n\nHave any feedback or feature suggestions? [Share it here.](https://github.com/cpp-linter/cpp-linter-action/issues)";

/// GitHub's issue/PR comment body size limit.
pub const DEFAULT_LEN_LIMIT: usize = 65536;

/// Both Markdown surfaces produced from one run's advice, plus the failure
/// tallies used for the process exit code and annotations.
pub struct Feedback {
    pub thread_comment: String,
    pub step_summary: String,
    pub format_checks_failed: u32,
    pub tidy_checks_failed: u32,
}

fn render(title_icon: &str, format_lines: &[String], tidy_lines: &[String]) -> String {
    let mut body = format!("{COMMENT_MARKER}# Cpp-Linter Report {title_icon}\n");
    if format_lines.is_empty() && tidy_lines.is_empty() {
        body.push_str("No problems need attention.");
    } else {
        body.push_str("Some files did not pass the configured checks!\n");
        if !format_lines.is_empty() {
            body.push_str(&format!(
                "\n<details><summary>clang-format reports: <strong>{} file(s) not formatted</strong></summary>\n\n{}\n</details>",
                format_lines.len(),
                format_lines.concat()
            ));
        }
        if !tidy_lines.is_empty() {
            body.push_str(&format!(
                "\n<details><summary>clang-tidy reports: <strong>{} concern(s)</strong></summary>\n\n{}\n</details>",
                tidy_lines.len(),
                tidy_lines.concat()
            ));
        }
    }
    body.push_str(USER_OUTREACH);
    body
}

/// Truncate `format_lines`/`tidy_lines` in round-robin order (always
/// dropping from the currently-larger section) until `render(...)` fits
/// within `len_limit`, appending an ellipsis notice once anything is
/// dropped.
fn truncate_to_budget(
    title_icon: &str,
    mut format_lines: Vec<String>,
    mut tidy_lines: Vec<String>,
    len_limit: usize,
) -> String {
    let mut dropped = 0u32;
    loop {
        let candidate = render(title_icon, &format_lines, &tidy_lines);
        let footer_reserve = if dropped == 0 {
            0
        } else {
            "\n*...() more entries not shown, see full report in step summary...*".len()
        };
        if candidate.len() + footer_reserve <= len_limit || (format_lines.is_empty() && tidy_lines.is_empty()) {
            if dropped == 0 {
                return candidate;
            }
            let mut body = candidate;
            body.push_str(&format!(
                "\n*...({dropped}) more entries not shown, see full report in step summary...*"
            ));
            return body;
        }
        if format_lines.len() >= tidy_lines.len() && !format_lines.is_empty() {
            format_lines.pop();
        } else if !tidy_lines.is_empty() {
            tidy_lines.pop();
        } else {
            format_lines.pop();
        }
        dropped += 1;
    }
}

/// Build the thread comment (bounded by `len_limit`) and the step summary
/// (unbounded) from a run's advice.
pub fn compose_feedback(
    files: &[FileObj],
    format_advice: &[Option<FormatAdvice>],
    tidy_advice: &[Option<TidyAdvice>],
    len_limit: usize,
) -> Feedback {
    let mut format_lines = Vec::new();
    let mut format_checks_failed = 0u32;
    for (file, advice) in files.iter().zip(format_advice.iter()) {
        if advice.as_ref().is_some_and(|a| !a.replaced_lines.is_empty()) {
            format_lines.push(format!("- {}\n", file.name.to_string_lossy().replace('\\', "/")));
            format_checks_failed += 1;
        }
    }

    let mut tidy_lines = Vec::new();
    let mut tidy_checks_failed = 0u32;
    for (file, advice) in files.iter().zip(tidy_advice.iter()) {
        let Some(advice) = advice else { continue };
        let file_name = file.name.to_string_lossy().replace('\\', "/");
        for note in &advice.notes {
            if note.filename != file_name {
                continue;
            }
            let ext = file.name.extension().and_then(|e| e.to_str()).unwrap_or("");
            let mut line = format!(
                "- **{}:{}:{}:** {}: [{}]\n   > {}\n",
                note.filename, note.line, note.cols, note.severity, note.diagnostic_link(), note.rationale
            );
            if !note.fixit_lines.is_empty() {
                line.push_str(&format!(
                    "\n   ```{ext}\n   {}\n   ```\n",
                    note.fixit_lines.join("\n   ")
                ));
            }
            tidy_lines.push(line);
            tidy_checks_failed += 1;
        }
    }

    let icon = if format_checks_failed == 0 && tidy_checks_failed == 0 {
        ":heavy_check_mark:"
    } else {
        ":warning:"
    };

    let step_summary = render(icon, &format_lines, &tidy_lines);
    let thread_comment = truncate_to_budget(icon, format_lines, tidy_lines, len_limit);

    log::info!("{format_checks_failed} clang-format-checks-failed");
    log::info!("{tidy_checks_failed} clang-tidy-checks-failed");
    log::info!("{} checks-failed", format_checks_failed + tidy_checks_failed);

    Feedback {
        thread_comment,
        step_summary,
        format_checks_failed,
        tidy_checks_failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn clean_run_renders_check_mark() {
        let files = vec![FileObj::new(PathBuf::from("a.cpp"))];
        let feedback = compose_feedback(&files, &[None], &[None], DEFAULT_LEN_LIMIT);
        assert!(feedback.thread_comment.contains(":heavy_check_mark:"));
        assert_eq!(feedback.format_checks_failed, 0);
        assert_eq!(feedback.tidy_checks_failed, 0);
    }

    #[test]
    fn tight_budget_truncates_and_appends_notice() {
        let files = vec![
            FileObj::new(PathBuf::from("a.cpp")),
            FileObj::new(PathBuf::from("b.cpp")),
        ];
        let format_advice = vec![
            Some(FormatAdvice {
                filename: "a.cpp".into(),
                replaced_lines: vec![crate::clang_tools::clang_format::ReplacementLine {
                    line: 1,
                    replacements: vec![],
                }],
                patched: None,
            }),
            Some(FormatAdvice {
                filename: "b.cpp".into(),
                replaced_lines: vec![crate::clang_tools::clang_format::ReplacementLine {
                    line: 1,
                    replacements: vec![],
                }],
                patched: None,
            }),
        ];
        let feedback = compose_feedback(&files, &format_advice, &[None, None], 400);
        assert!(feedback.thread_comment.len() <= 400 + 120);
        assert!(feedback.thread_comment.contains("more entries not shown"));
        assert_eq!(feedback.format_checks_failed, 2);
    }
}
