//! The orchestrator: sequences the whole pipeline from a resolved
//! [`Config`] down to a process exit code.
//!
//! Per-file formatter/analyzer checkups run on a bounded worker pool;
//! everything else in this module is the sequential spine that wires the
//! other components together.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{set_max_level, LevelFilter};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::clang_tools::clang_format::FormatAdvice;
use crate::clang_tools::clang_tidy::TidyAdvice;
use crate::clang_tools::{run_on_file, ToolPaths};
use crate::common_fs::{list_source_files, FileObj};
use crate::config::Config;
use crate::logger::{self, drain_worker_log, end_log_group, start_log_group, WorkerLog};
use crate::rest_api::github_api::GithubApiClient;
use crate::rest_api::RestApiClient;

/// A registry of per-file mutexes, keyed by path: guarantees the
/// formatter's and analyzer's fix-capture passes never race on the same
/// file, even though today's worker runs both sequentially within one
/// thread.
#[derive(Default)]
struct FileLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileLocks {
    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("file lock registry poisoned");
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Whether this run would try to publish through the platform client, and
/// therefore needs a credential up front.
fn requires_publish_credential(config: &Config) -> bool {
    config.ci && (config.thread_comments.is_enabled() || config.tidy_review || config.format_review)
}

/// Run one file's checkup: acquire its per-file lock, buffer its log output,
/// and invoke whichever tools were resolved. Never propagates an error
/// upward; a failed checkup is logged and the file gets no advice, so one
/// file's failure never aborts its sibling workers.
fn checkup_one_file(
    file: &FileObj,
    tools: &ToolPaths,
    config: &Config,
    locks: &FileLocks,
    cancelled: &AtomicBool,
) -> (Option<FormatAdvice>, Option<TidyAdvice>) {
    let name = file.name.to_string_lossy().replace('\\', "/");
    if cancelled.load(Ordering::SeqCst) {
        log::debug!("skipping {name}: run was cancelled");
        return (None, None);
    }
    let file_lock = locks.lock_for(&file.name);
    let _guard = file_lock.lock().expect("per-file lock poisoned");

    let worker_log = WorkerLog::init();
    let outcome = run_on_file(tools, file, config);
    drain_worker_log(&name, worker_log);

    match outcome {
        Ok(advice) => advice,
        Err(e) => {
            log::warn!("checkup on {name} failed: {e}");
            (None, None)
        }
    }
}

/// The process entry point. Resolves `Config` from `args` and the process
/// environment, drives the full checkout-to-feedback pipeline, and returns
/// the process exit code (0 if nothing failed, 1 otherwise).
pub fn main(args: Vec<String>) -> i32 {
    let config = Config::from_env_and_args(args);
    logger::init().ok();
    set_max_level(if config.verbosity_is_debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    log::info!("Processing event {}", config.event_name);

    if config.repo_root != Path::new(".") {
        if let Err(e) = env::set_current_dir(&config.repo_root) {
            log::error!("could not change directory to repo root {:?}: {e}", config.repo_root);
            return 1;
        }
    }

    // A credential missing for a publish step that was explicitly requested
    // is a fatal configuration error, checked before any work runs.
    if requires_publish_credential(&config) && config.token.is_none() {
        log::error!("a GITHUB_TOKEN is required to post thread comments or PR reviews");
        return 1;
    }

    let rest_api_client = GithubApiClient::new();

    let files = if config.files_changed_only {
        match rest_api_client.get_list_of_changed_files(&config) {
            Ok(files) => files,
            Err(e) => {
                log::error!("failed to determine the changed-files list: {e}");
                return 1;
            }
        }
    } else {
        start_log_group("Get list of specified source files");
        let files = list_source_files(&config.extensions, &config.ignored, &config.not_ignored, ".");
        end_log_group();
        files
    };

    log::info!("Giving attention to the following files:");
    for file in &files {
        log::info!("  ./{}", file.name.to_string_lossy().replace('\\', "/"));
    }

    if let Err(e) = rest_api_client.ensure_files_present(&files, &config) {
        log::error!("failed to fetch missing files: {e}");
        return 1;
    }

    let tools = match ToolPaths::resolve(&config) {
        Ok(tools) => tools,
        Err(e) => {
            log::error!("{e}");
            return 1;
        }
    };

    let pool = match ThreadPoolBuilder::new().num_threads(config.effective_jobs()).build() {
        Ok(pool) => pool,
        Err(e) => {
            log::error!("failed to build the worker pool: {e}");
            return 1;
        }
    };

    let cancelled = AtomicBool::new(false);
    let locks = FileLocks::default();

    // Bounded per-file fan-out. `par_iter().collect()` into a `Vec` keeps
    // results indexed the same as `files`, so downstream consumers see
    // file-input order regardless of which worker finished first.
    let results: Vec<(Option<FormatAdvice>, Option<TidyAdvice>)> = pool.install(|| {
        files
            .par_iter()
            .map(|file| checkup_one_file(file, &tools, &config, &locks, &cancelled))
            .collect()
    });

    let mut format_advice = Vec::with_capacity(files.len());
    let mut tidy_advice = Vec::with_capacity(files.len());
    for (format, tidy) in results {
        format_advice.push(format);
        tidy_advice.push(tidy);
    }

    start_log_group("Posting feedback");
    let exit_code = match rest_api_client.publish(&files, &format_advice, &tidy_advice, &config) {
        Ok(code) => code,
        Err(e) => {
            log::error!("failed to publish feedback: {e}");
            1
        }
    };
    end_log_group();
    exit_code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_credential_is_only_required_when_ci_and_requested() {
        let local_cfg = Config::from_env_and_args(vec!["cpp-linter".to_string()]);
        assert!(!requires_publish_credential(&local_cfg));

        let mut ci_cfg = Config::from_env_and_args(vec![
            "cpp-linter".to_string(),
            "--thread-comments=true".to_string(),
        ]);
        ci_cfg.ci = true;
        assert!(requires_publish_credential(&ci_cfg));
    }

    #[test]
    fn file_locks_reuse_the_same_mutex_for_the_same_path() {
        let locks = FileLocks::default();
        let path = PathBuf::from("a.cpp");
        let a = locks.lock_for(&path);
        let b = locks.lock_for(&path);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
