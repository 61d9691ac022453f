//! This module holds functionality specific to running clang-tidy and
//! parsing its stdout and YAML fixit export.

use std::env::consts::OS;
use std::env::current_dir;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

// non-std crates
use regex::Regex;
use serde::Deserialize;

// project-specific modules/crates
use crate::advice::PatchSource;
use crate::common_fs::{get_line_cols_from_bytes, normalize_path, with_snapshot_restore, FileObj};
use crate::config::LinesChangedOnly;
use crate::error::Result;

/// Used to deserialize a JSON compilation database, which is a bare JSON
/// array of compilation units (no wrapping object).
#[derive(Deserialize, Debug)]
#[serde(transparent)]
pub struct CompilationDatabase {
    units: Vec<CompilationUnit>,
}

#[derive(Deserialize, Debug, Clone)]
struct CompilationUnit {
    directory: String,
    file: String,
}

impl CompilationDatabase {
    fn find(&self, file: &str) -> Option<&CompilationUnit> {
        self.units.iter().find(|u| u.file == file)
    }
}

/// A single replacement clang-tidy's YAML export wants to make.
#[derive(Debug, Clone)]
pub struct TidyFixit {
    pub line: usize,
    pub cols: usize,
    pub null_len: usize,
    pub text: String,
}

/// A single notification parsed from clang-tidy's stdout, plus whatever
/// fixits the YAML export attached to it.
#[derive(Debug, Clone)]
pub struct TidyDiagnostic {
    pub filename: String,
    pub line: u32,
    pub cols: u32,
    pub severity: String,
    pub rationale: String,
    pub diagnostic: String,
    pub fixit_lines: Vec<String>,
    pub fixits: Vec<TidyFixit>,
    /// Read by the suggestion builder's diagnostic-only pass to skip notes
    /// whose fixits were already folded into a patch-derived `Suggestion`.
    /// Never set `true` on any production path today (no fixit-to-patch
    /// reconciliation writes it back), matching the original tool's own
    /// write-never, read-only use of this flag.
    pub applied_fixes: bool,
}

impl TidyDiagnostic {
    /// A Markdown link to the diagnostic's documentation page.
    pub fn diagnostic_link(&self) -> String {
        let (category, suffix) = self
            .diagnostic
            .split_once('-')
            .unwrap_or((self.diagnostic.as_str(), ""));
        format!(
            "[{}](https://clang.llvm.org/extra/clang-tidy/checks/{}/{}.html)",
            self.diagnostic, category, suffix
        )
    }
}

/// A file's worth of clang-tidy advice.
#[derive(Debug, Clone, Default)]
pub struct TidyAdvice {
    pub notes: Vec<TidyDiagnostic>,
    /// The file's contents after re-running clang-tidy with `--fix-errors`,
    /// captured only when a tidy review was requested.
    pub patched: Option<Vec<u8>>,
}

impl TidyAdvice {
    /// A Markdown bulleted list of rationales (with documentation links) for
    /// every diagnostic whose line falls within `[start, end]` (inclusive).
    pub fn diagnostics_in_range(&self, start: u32, end: u32) -> String {
        let mut out = String::new();
        for note in &self.notes {
            if note.line >= start && note.line <= end {
                out.push_str(&format!("- {} [{}]\n", note.rationale, note.diagnostic_link()));
            }
        }
        out
    }
}

impl PatchSource for TidyAdvice {
    fn tool_name(&self) -> &'static str {
        "clang-tidy"
    }

    fn patched(&self) -> Option<&[u8]> {
        self.patched.as_deref()
    }

    fn suggestion_header(&self, start: u32, end: u32) -> String {
        let diagnostics = self.diagnostics_in_range(start, end);
        if diagnostics.is_empty() {
            "### clang-tidy suggestions\n".to_string()
        } else {
            format!("### clang-tidy diagnostics\n{diagnostics}")
        }
    }
}

fn resolve_filename(raw: &str, database_json: &Option<CompilationDatabase>) -> String {
    let mut filename = PathBuf::from(raw);
    let cwd = current_dir().unwrap_or_default();
    if filename.is_relative() {
        if let Some(db) = database_json {
            if let Some(unit) = db.find(raw) {
                filename = normalize_path(&PathBuf::from_iter([&unit.directory, &unit.file]));
            } else {
                filename = normalize_path(&cwd.join(&filename));
            }
        } else {
            filename = normalize_path(&cwd.join(&filename));
        }
    }
    filename = filename.strip_prefix(&cwd).unwrap_or(&filename).to_path_buf();
    filename.to_string_lossy().replace('\\', "/")
}

/// Parse clang-tidy's stdout into a list of diagnostics.
fn parse_tidy_output(
    tidy_stdout: &[u8],
    database_json: &Option<CompilationDatabase>,
) -> Vec<TidyDiagnostic> {
    let header = Regex::new(r"^(.+):(\d+):(\d+):\s(\w+):(.*)\[([a-zA-Z\d\-\.]+)\]$").unwrap();
    let mut notification: Option<TidyDiagnostic> = None;
    let mut result = Vec::new();
    for line in String::from_utf8_lossy(tidy_stdout).lines() {
        if let Some(captured) = header.captures(line) {
            if let Some(note) = notification.take() {
                result.push(note);
            }
            notification = Some(TidyDiagnostic {
                filename: resolve_filename(&captured[1], database_json),
                line: captured[2].parse().unwrap_or(0),
                cols: captured[3].parse().unwrap_or(0),
                severity: captured[4].trim().to_string(),
                rationale: captured[5].trim().to_string(),
                diagnostic: captured[6].to_string(),
                fixit_lines: Vec::new(),
                fixits: Vec::new(),
                applied_fixes: false,
            });
        } else if let Some(note) = &mut notification {
            note.fixit_lines.push(line.to_string());
        }
    }
    if let Some(note) = notification {
        result.push(note);
    }
    result
}

/// Older, flat schema for clang-tidy's `--export-fixes` YAML, tolerant of
/// the newer `DiagnosticMessage`-nested schema as well.
#[derive(Deserialize, Debug)]
struct YamlFixitFile {
    #[serde(rename = "Diagnostics")]
    diagnostics: Vec<YamlDiagnostic>,
}

#[derive(Deserialize, Debug)]
struct YamlDiagnostic {
    #[serde(rename = "DiagnosticMessage")]
    nested: Option<YamlMessage>,
    #[serde(rename = "Message")]
    message: Option<String>,
    #[serde(rename = "FilePath")]
    file_path: Option<String>,
    #[serde(rename = "Replacements")]
    replacements: Option<Vec<YamlReplacement>>,
}

#[derive(Deserialize, Debug)]
struct YamlMessage {
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "FilePath")]
    file_path: String,
    #[serde(rename = "Replacements")]
    replacements: Vec<YamlReplacement>,
}

#[derive(Deserialize, Debug, Clone)]
struct YamlReplacement {
    #[serde(rename = "FilePath")]
    file_path: String,
    #[serde(rename = "Offset")]
    offset: usize,
    #[serde(rename = "Length")]
    length: usize,
    #[serde(rename = "ReplacementText")]
    replacement_text: String,
}

/// Fold a clang-tidy `--export-fixes` YAML export into `notes`, attaching
/// each fixit to the diagnostic it matches by `(file, rationale)`. Tolerates
/// both the older flat schema (`Message`/`FilePath`/`Replacements` at the
/// top level) and the newer schema nested under `DiagnosticMessage`.
fn apply_yaml_fixits(yaml: &str, notes: &mut [TidyDiagnostic], repo_root: &Path) -> Result<()> {
    let parsed: YamlFixitFile = serde_yaml::from_str(yaml)?;
    let header_guard = normalize_path(repo_root).to_string_lossy().replace('\\', "/") + "/";
    for diag in parsed.diagnostics {
        let (message, file_path, replacements) = if let Some(nested) = diag.nested {
            (nested.message, nested.file_path, nested.replacements)
        } else {
            (
                diag.message.unwrap_or_default(),
                diag.file_path.unwrap_or_default(),
                diag.replacements.unwrap_or_default(),
            )
        };
        let relative_file = file_path
            .replace('\\', "/")
            .strip_prefix(&header_guard)
            .unwrap_or(&file_path)
            .to_string();
        for note in notes.iter_mut() {
            if note.filename == relative_file && note.rationale == message.trim() {
                for repl in &replacements {
                    let bytes = std::fs::read(&repl.file_path).unwrap_or_default();
                    let prefix = &bytes[..repl.offset.min(bytes.len())];
                    let (line, cols) =
                        get_line_cols_from_bytes(prefix).unwrap_or((note.line as usize, note.cols as usize));
                    note.fixits.push(TidyFixit {
                        line,
                        cols,
                        null_len: repl.length,
                        text: repl.replacement_text.clone(),
                    });
                }
                break;
            }
        }
    }
    Ok(())
}

/// Run clang-tidy on `file`, then parse and return its output.
///
/// When `tidy_review` is set, clang-tidy is re-invoked with `--fix-errors`
/// against a snapshot of the file so the rewritten buffer can be captured
/// without leaving the working tree mutated.
#[allow(clippy::too_many_arguments)]
pub fn run_clang_tidy(
    cmd: &mut Command,
    file: &FileObj,
    checks: &str,
    scope: LinesChangedOnly,
    database: &Option<PathBuf>,
    extra_args: &Option<Vec<String>>,
    database_json: &Option<CompilationDatabase>,
    cache_dir: &Path,
    tidy_review: bool,
) -> Result<TidyAdvice> {
    if !checks.is_empty() {
        cmd.args(["-checks", checks]);
    }
    if let Some(db) = database {
        cmd.args(["-p", &db.to_string_lossy()]);
    }
    if let Some(ranges) = file.range_of_changed_lines(scope) {
        let filter = format!(
            "[{{\"name\":{:?},\"lines\":{:?}}}]",
            file.name
                .to_string_lossy()
                .replace('/', if OS == "windows" { "\\" } else { "/" }),
            ranges
                .iter()
                .map(|r| [r.start, r.end.saturating_sub(1)])
                .collect::<Vec<_>>()
        );
        cmd.args(["--line-filter", filter.as_str()]);
    }
    if let Some(extras) = extra_args {
        let extras: Vec<String> = if extras.len() == 1 && extras[0].contains(' ') {
            extras[0].split(' ').map(String::from).collect()
        } else {
            extras.clone()
        };
        for arg in extras {
            cmd.arg(format!("--extra-arg={}", arg.trim_matches('"')));
        }
    }
    let _ = std::fs::create_dir_all(cache_dir);
    let sanitized_name = file.name.to_string_lossy().replace(['/', '\\'], "_");
    let export_path = cache_dir.join(format!("{sanitized_name}.yml"));
    cmd.arg(format!("--export-fixes={}", export_path.to_string_lossy()));
    cmd.arg(file.name.to_string_lossy().as_ref());
    log::info!(
        "Running \"{} {}\"",
        cmd.get_program().to_string_lossy(),
        cmd.get_args()
            .map(|x| x.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );
    let output = cmd.output()?;
    log::debug!("Output from clang-tidy:\n{}", String::from_utf8_lossy(&output.stdout));
    if !output.stderr.is_empty() {
        log::debug!(
            "clang-tidy made the following summary:\n{}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    let mut notes = parse_tidy_output(&output.stdout, database_json);

    if let Ok(yaml_contents) = std::fs::read_to_string(&export_path) {
        if !yaml_contents.trim().is_empty() {
            let repo_root = current_dir().unwrap_or_default();
            if let Err(e) = apply_yaml_fixits(&yaml_contents, &mut notes, &repo_root) {
                log::warn!("failed to parse clang-tidy YAML fixits at {export_path:?}: {e}");
            }
        }
    }

    let mut advice = TidyAdvice { notes, patched: None };

    if tidy_review {
        let program = cmd.get_program().to_os_string();
        let args: Vec<std::ffi::OsString> = cmd.get_args().map(|a| a.to_os_string()).collect();
        let (_, patched) = with_snapshot_restore(&file.name, Duration::from_secs(1), || {
            let mut fix_cmd = Command::new(&program);
            fix_cmd.arg("--fix-errors");
            fix_cmd.args(&args);
            fix_cmd.output()?;
            Ok(())
        })?;
        advice.patched = Some(patched);
    }

    Ok(advice)
}

#[cfg(test)]
mod test {
    #[test]
    fn header_pattern_captures_fields() {
        let src = "tests/demo/demo.hpp:11:11: warning: use a trailing return type for this function [modernize-use-trailing-return-type]";
        let pat =
            regex::Regex::new(r"^(.+):(\d+):(\d+):\s(\w+):(.*)\[([a-zA-Z\d\-\.]+)\]$").unwrap();
        let cap = pat.captures(src).unwrap();
        assert_eq!(&cap[2], "11");
        assert_eq!(&cap[6], "modernize-use-trailing-return-type");
    }

    use super::{parse_tidy_output, resolve_filename};

    #[test]
    fn parse_single_notification() {
        let stdout = b"a.cpp:3:5: warning: bad thing [my-check]\n  some code\n";
        let notes = parse_tidy_output(stdout, &None);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].line, 3);
        assert_eq!(notes[0].diagnostic, "my-check");
        assert_eq!(notes[0].fixit_lines, vec!["  some code".to_string()]);
    }

    #[test]
    fn resolve_relative_filename_without_database() {
        let resolved = resolve_filename("Cargo.toml", &None);
        assert_eq!(resolved, "Cargo.toml");
    }

    #[test]
    fn diagnostic_link_splits_on_first_dash() {
        let note = super::TidyDiagnostic {
            filename: "a.cpp".into(),
            line: 1,
            cols: 1,
            severity: "warning".into(),
            rationale: "bad".into(),
            diagnostic: "modernize-use-trailing-return-type".into(),
            fixit_lines: vec![],
            fixits: vec![],
            applied_fixes: false,
        };
        assert_eq!(
            note.diagnostic_link(),
            "[modernize-use-trailing-return-type](https://clang.llvm.org/extra/clang-tidy/checks/modernize/use-trailing-return-type.html)"
        );
    }
}
