//! This module holds functionality that uses the REST API of various
//! git-based servers. Currently, only GitHub is supported.

pub mod github_api;

use std::sync::Mutex;

use crate::clang_tools::clang_format::FormatAdvice;
use crate::clang_tools::clang_tidy::TidyAdvice;
use crate::common_fs::FileObj;
use crate::config::Config;
use crate::error::Result;

/// Rate-limit bookkeeping shared (behind a `Mutex`) by every worker's client
/// handle, so a single counter governs the whole run regardless of which
/// thread makes the next request.
#[derive(Debug)]
pub struct RateLimitState {
    /// `-1` means unknown (no request made yet).
    pub remaining: i64,
    /// Incremented on each secondary-rate-limit backoff, reset on success.
    pub back_step: u32,
}

impl Default for RateLimitState {
    fn default() -> Self {
        RateLimitState {
            remaining: -1,
            back_step: 0,
        }
    }
}

pub type SharedRateLimit = Mutex<RateLimitState>;

/// A template for the operations the orchestrator needs from a
/// Git-hosting platform's REST API.
pub trait RestApiClient {
    /// Discover the event's changed files (diff-based, falling back to
    /// paginated JSON) and filter them per `config`.
    fn get_list_of_changed_files(&self, config: &Config) -> Result<Vec<FileObj>>;

    /// Download any of `files` missing from the local checkout.
    fn ensure_files_present(&self, files: &[FileObj], config: &Config) -> Result<()>;

    /// Post thread comments, a PR review, file annotations, and the step
    /// summary, then export the exit-code outputs. Returns the process exit
    /// code.
    fn publish(
        &self,
        files: &[FileObj],
        format_advice: &[Option<FormatAdvice>],
        tidy_advice: &[Option<TidyAdvice>],
        config: &Config,
    ) -> Result<i32>;
}
