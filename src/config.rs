//! Resolves CLI arguments and environment variables into a single [`Config`]
//! value. Every other component receives an already-resolved `Config`
//! instead of reading `std::env::var` or clap matches directly.

use std::env;
use std::fs::OpenOptions;
use std::io::Read;
use std::path::PathBuf;

use crate::cli::{convert_extra_arg_val, get_arg_parser, parse_ignore};

/// The scope of lines a tool should pay attention to, mirroring
/// `--lines-changed-only`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinesChangedOnly {
    /// `false`: analyze every line in the file.
    All = 0,
    /// `diff`: analyze every line touched by the diff (including context).
    Diff = 1,
    /// `true`: analyze only lines that were added.
    Added = 2,
}

impl LinesChangedOnly {
    fn from_str(val: &str) -> Self {
        match val {
            "true" => LinesChangedOnly::Added,
            "diff" => LinesChangedOnly::Diff,
            _ => LinesChangedOnly::All,
        }
    }

    pub fn as_int(self) -> u8 {
        self as u8
    }
}

/// Mirrors the three-way `--thread-comments` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadComments {
    Off,
    On,
    Update,
}

impl ThreadComments {
    fn from_str(val: &str) -> Self {
        match val {
            "true" => ThreadComments::On,
            "update" => ThreadComments::Update,
            _ => ThreadComments::Off,
        }
    }

    pub fn is_enabled(self) -> bool {
        !matches!(self, ThreadComments::Off)
    }

    pub fn update_only(self) -> bool {
        matches!(self, ThreadComments::Update)
    }
}

/// A resolved, immutable snapshot of everything downstream components need:
/// CLI options plus the environment inputs of the GitHub Actions runner.
pub struct Config {
    pub verbosity_is_debug: bool,
    pub database: Option<PathBuf>,
    pub style: String,
    pub tidy_checks: String,
    pub version: String,
    pub extensions: Vec<String>,
    pub repo_root: PathBuf,
    pub ignored: Vec<String>,
    pub not_ignored: Vec<String>,
    pub ignored_tidy: Vec<String>,
    pub not_ignored_tidy: Vec<String>,
    pub ignored_format: Vec<String>,
    pub not_ignored_format: Vec<String>,
    pub lines_changed_only: LinesChangedOnly,
    pub files_changed_only: bool,
    pub thread_comments: ThreadComments,
    pub no_lgtm: bool,
    pub step_summary: bool,
    pub file_annotations: bool,
    pub extra_args: Option<Vec<String>>,
    pub tidy_review: bool,
    pub format_review: bool,
    pub jobs: usize,

    // Environment inputs.
    pub ci: bool,
    pub api_url: String,
    pub repo: Option<String>,
    pub sha: Option<String>,
    pub event_name: String,
    pub event_payload: Option<serde_json::Value>,
    pub token: Option<String>,
    pub cache_dir: PathBuf,
    pub pr_review_summary_only: bool,
    pub github_output: Option<PathBuf>,
    pub github_step_summary: Option<PathBuf>,
}

impl Config {
    /// Build a `Config` from `std::env::args()` and the process environment.
    pub fn from_env_and_args(args: Vec<String>) -> Self {
        let matches = get_arg_parser().get_matches_from(args);

        let extensions: Vec<String> = matches
            .get_many::<String>("extensions")
            .unwrap_or_default()
            .map(|s| s.trim_start_matches('.').to_string())
            .collect();

        let ignore_opt: Vec<&str> = matches
            .get_many::<String>("ignore")
            .unwrap_or_default()
            .map(String::as_str)
            .collect();
        let (ignored, not_ignored) = parse_ignore(&ignore_opt);

        let ignore_tidy_opt: Vec<&str> = matches
            .get_many::<String>("ignore-tidy")
            .unwrap_or_default()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .collect();
        let (ignored_tidy, not_ignored_tidy) = parse_ignore(&ignore_tidy_opt);

        let ignore_format_opt: Vec<&str> = matches
            .get_many::<String>("ignore-format")
            .unwrap_or_default()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .collect();
        let (ignored_format, not_ignored_format) = parse_ignore(&ignore_format_opt);

        let lines_changed_only = LinesChangedOnly::from_str(
            matches
                .get_one::<String>("lines-changed-only")
                .map(String::as_str)
                .unwrap_or("true"),
        );
        let files_changed_only = matches.get_flag("files-changed-only")
            || lines_changed_only != LinesChangedOnly::All;

        let thread_comments = ThreadComments::from_str(
            matches
                .get_one::<String>("thread-comments")
                .map(String::as_str)
                .unwrap_or("false"),
        );

        let extra_args = convert_extra_arg_val(&matches)
            .map(|v| v.into_iter().map(String::from).collect::<Vec<_>>());

        let database = matches
            .get_one::<String>("database")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let repo_root = PathBuf::from(
            matches
                .get_one::<String>("repo-root")
                .cloned()
                .unwrap_or_else(|| ".".to_string()),
        );

        let cache_dir = env::var("CPP_LINTER_CACHE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".cpp-linter_cache"));

        let event_payload = env::var("GITHUB_EVENT_PATH").ok().and_then(|path| {
            let mut buf = String::new();
            OpenOptions::new()
                .read(true)
                .open(path)
                .ok()?
                .read_to_string(&mut buf)
                .ok()?;
            serde_json::from_str(&buf).ok()
        });

        Config {
            verbosity_is_debug: matches
                .get_one::<String>("verbosity")
                .map(|s| s == "debug")
                .unwrap_or(false),
            database,
            style: matches
                .get_one::<String>("style")
                .cloned()
                .unwrap_or_default(),
            tidy_checks: matches
                .get_one::<String>("tidy-checks")
                .cloned()
                .unwrap_or_default(),
            version: matches
                .get_one::<String>("version")
                .cloned()
                .unwrap_or_default(),
            extensions,
            repo_root,
            ignored,
            not_ignored,
            ignored_tidy,
            not_ignored_tidy,
            ignored_format,
            not_ignored_format,
            lines_changed_only,
            files_changed_only,
            thread_comments,
            no_lgtm: matches.get_flag("no-lgtm"),
            step_summary: matches.get_flag("step-summary"),
            file_annotations: matches.get_flag("file-annotations"),
            extra_args,
            tidy_review: matches.get_flag("tidy-review"),
            format_review: matches.get_flag("format-review"),
            jobs: matches.get_one::<usize>("jobs").copied().unwrap_or(0),

            ci: env::var("CI").is_ok_and(|v| v == "true"),
            api_url: env::var("GITHUB_API_URL")
                .unwrap_or_else(|_| "https://api.github.com".to_string()),
            repo: env::var("GITHUB_REPOSITORY").ok(),
            sha: env::var("GITHUB_SHA").ok(),
            event_name: env::var("GITHUB_EVENT_NAME").unwrap_or_else(|_| "push".to_string()),
            event_payload,
            token: env::var("GITHUB_TOKEN").ok(),
            cache_dir,
            pr_review_summary_only: env::var("CPP_LINTER_PR_REVIEW_SUMMARY_ONLY").is_ok(),
            github_output: env::var("GITHUB_OUTPUT").ok().map(PathBuf::from),
            github_step_summary: env::var("GITHUB_STEP_SUMMARY").ok().map(PathBuf::from),
        }
    }

    /// Whether the event payload names a private repository.
    pub fn repository_is_private(&self) -> bool {
        self.event_payload
            .as_ref()
            .and_then(|p| p.get("repository"))
            .and_then(|r| r.get("private"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// The effective worker count for the concurrency pool: `jobs` if
    /// nonzero, otherwise the number of available CPUs.
    pub fn effective_jobs(&self) -> usize {
        if self.jobs == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.jobs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_reviews_and_use_auto_jobs() {
        let cfg = Config::from_env_and_args(vec!["cpp-linter".to_string()]);
        assert!(!cfg.tidy_review);
        assert!(!cfg.format_review);
        assert_eq!(cfg.jobs, 0);
        assert!(cfg.effective_jobs() >= 1);
    }

    #[test]
    fn thread_comments_update_is_update_only() {
        let cfg = Config::from_env_and_args(vec![
            "cpp-linter".to_string(),
            "--thread-comments=update".to_string(),
        ]);
        assert!(cfg.thread_comments.is_enabled());
        assert!(cfg.thread_comments.update_only());
    }

    #[test]
    fn lines_changed_only_true_forces_files_changed_only() {
        let cfg = Config::from_env_and_args(vec!["cpp-linter".to_string()]);
        assert_eq!(cfg.lines_changed_only, LinesChangedOnly::Added);
        assert!(cfg.files_changed_only);
    }
}
