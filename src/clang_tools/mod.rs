//! This module holds the functionality related to running clang-format
//! and/or clang-tidy: locating their executables and driving a single
//! file's checkup through both.

use std::path::{Path, PathBuf};
use std::process::Command;

// non-std crates
use lenient_semver;
use semver::Version;
use which::{which, which_in};

// project-specific modules/crates
use crate::common_fs::{is_file_in_list, FileObj};
use crate::config::{Config, LinesChangedOnly};
use crate::error::{LinterError, Result};

/// Whether `file` is suppressed for a specific tool by `--ignore-tidy` /
/// `--ignore-format`, layered on top of the file's already-passed global
/// `--ignore` filtering.
fn is_tool_ignored(file: &FileObj, ignored: &[String], not_ignored: &[String]) -> bool {
    if ignored.is_empty() && not_ignored.is_empty() {
        return false;
    }
    let is_not_ignored = is_file_in_list(&file.name, not_ignored, "not ignored for this tool");
    let is_ignored = is_file_in_list(&file.name, ignored, "ignored for this tool");
    !is_not_ignored && is_ignored
}

pub mod clang_format;
pub mod clang_tidy;

pub use clang_format::FormatAdvice;
pub use clang_tidy::{CompilationDatabase, TidyAdvice};

/// Fetch the path to a clang tool by `name` (ie `"clang-tidy"` or
/// `"clang-format"`) and `version`.
///
/// The specified `version` can be either a full or partial semantic version
/// specification, or a path to a directory containing the executable binary
/// `name`d. If the executable is not found using the specified `version`,
/// then the tool is sought only by its `name`.
pub fn get_clang_tool_exe(name: &str, version: &str) -> Result<PathBuf> {
    if version.is_empty() {
        return which(name)
            .map_err(|_| LinterError::ToolNotFound {
                tool: name.to_string(),
                version: version.to_string(),
            });
    }
    if let Ok(semver) = lenient_semver::parse_into::<Version>(version) {
        if let Ok(cmd) = which(format!("{}-{}", name, semver.major)) {
            Ok(cmd)
        } else if let Ok(cmd) = which(name) {
            // Some platforms (notably Windows) don't append the major
            // version number to the executable/symlink name.
            Ok(cmd)
        } else {
            Err(LinterError::ToolNotFound {
                tool: name.to_string(),
                version: version.to_string(),
            })
        }
    } else {
        let cwd = std::env::current_dir()?;
        which_in(name, Some(version), cwd).map_err(|_| LinterError::ToolNotFound {
            tool: name.to_string(),
            version: version.to_string(),
        })
    }
}

/// The resolved paths and parsed configuration needed to run the clang tools
/// against each file. Built once per invocation and shared (read-only)
/// across workers.
pub struct ToolPaths {
    pub clang_format: Option<PathBuf>,
    pub clang_tidy: Option<PathBuf>,
    pub database_json: Option<CompilationDatabase>,
}

impl ToolPaths {
    pub fn resolve(config: &Config) -> Result<Self> {
        let clang_tidy = if config.tidy_checks != "-*" {
            let cmd = get_clang_tool_exe("clang-tidy", &config.version)?;
            log_tool_version(&cmd);
            Some(cmd)
        } else {
            None
        };
        let clang_format = if !config.style.is_empty() {
            let cmd = get_clang_tool_exe("clang-format", &config.version)?;
            log_tool_version(&cmd);
            Some(cmd)
        } else {
            None
        };
        let database_json = match &config.database {
            Some(db_path) => {
                let contents = std::fs::read_to_string(db_path)?;
                Some(serde_json::from_str(&contents)?)
            }
            None => None,
        };
        Ok(ToolPaths {
            clang_format,
            clang_tidy,
            database_json,
        })
    }
}

fn log_tool_version(cmd: &Path) {
    if let Ok(output) = Command::new(cmd).arg("--version").output() {
        log::debug!(
            "{} --version\n{}",
            cmd.to_string_lossy(),
            String::from_utf8_lossy(&output.stdout)
        );
    }
}

/// Run clang-format and/or clang-tidy on a single `file`, honoring whichever
/// tools were resolved in `tools`. Returns `None` for a tool that wasn't
/// requested.
pub fn run_on_file(
    tools: &ToolPaths,
    file: &FileObj,
    config: &Config,
) -> Result<(Option<FormatAdvice>, Option<TidyAdvice>)> {
    let scope = config.lines_changed_only;

    let format_advice = match &tools.clang_format {
        Some(cmd)
            if !is_tool_ignored(file, &config.ignored_format, &config.not_ignored_format)
                && (file.has_line_changes(scope) || scope == LinesChangedOnly::All) =>
        {
            Some(clang_format::run_clang_format(
                &mut Command::new(cmd),
                file,
                &config.style,
                scope,
                config.format_review,
            )?)
        }
        _ => None,
    };

    let tidy_advice = match &tools.clang_tidy {
        Some(cmd)
            if !is_tool_ignored(file, &config.ignored_tidy, &config.not_ignored_tidy)
                && (file.has_line_changes(scope) || scope == LinesChangedOnly::All) =>
        {
            Some(clang_tidy::run_clang_tidy(
                &mut Command::new(cmd),
                file,
                &config.tidy_checks,
                scope,
                &config.database,
                &config.extra_args,
                &tools.database_json,
                &config.cache_dir,
                config.tidy_review,
            )?)
        }
        _ => None,
    };

    Ok((format_advice, tidy_advice))
}

#[cfg(test)]
mod tests {
    use std::env;

    use super::get_clang_tool_exe;

    const TOOL_NAME: &str = "clang-format";

    #[test]
    fn get_exe_by_version() {
        let clang_version = env::var("CLANG_VERSION").unwrap_or("16".to_string());
        let tool_exe = get_clang_tool_exe(TOOL_NAME, clang_version.as_str());
        if let Ok(exe) = tool_exe {
            assert!(exe.file_name().unwrap().to_string_lossy().contains(TOOL_NAME));
        }
    }

    #[test]
    fn get_exe_by_default() {
        let tool_exe = get_clang_tool_exe(TOOL_NAME, "");
        if let Ok(exe) = tool_exe {
            assert!(exe.file_name().unwrap().to_string_lossy().contains(TOOL_NAME));
        }
    }
}
