//! This module holds functionality specific to using GitHub's REST API.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Deserialize;

use super::{RateLimitState, RestApiClient, SharedRateLimit};
use crate::clang_tools::clang_format::{formalize_style_name, FormatAdvice};
use crate::clang_tools::clang_tidy::TidyAdvice;
use crate::comments::{self, COMMENT_MARKER, DEFAULT_LEN_LIMIT};
use crate::common_fs::FileObj;
use crate::config::{Config, ThreadComments};
use crate::error::{LinterError, Result};
use crate::git::{get_diff, open_repo, parse_diff, parse_diff_from_buf};
use crate::suggestions::{self, ReviewBatch};

/// A client for GitHub's REST API, shared (via `Clone`) across every worker
/// thread. The underlying `reqwest::blocking::Client` is already
/// internally thread-safe; rate-limit bookkeeping is the one piece of
/// mutable state we protect explicitly.
#[derive(Clone)]
pub struct GithubApiClient {
    client: Client,
    rate_limit: Arc<SharedRateLimit>,
}

impl Default for GithubApiClient {
    fn default() -> Self {
        Self::new()
    }
}

const MAX_TRANSIENT_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 200;

/// A small deterministic spread so concurrent workers retrying the same
/// transient failure don't all wake up on the same tick.
fn jitter_ms(attempt: u32) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 100) as u64 * attempt as u64
}

impl GithubApiClient {
    pub fn new() -> Self {
        GithubApiClient {
            client: Client::new(),
            rate_limit: Arc::new(Mutex::new(RateLimitState::default())),
        }
    }

    fn make_headers(&self, use_diff: bool, config: &Config) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let accept = format!("application/vnd.github.{}", if use_diff { "diff" } else { "raw+json" });
        headers.insert("Accept", HeaderValue::from_str(&accept).unwrap());
        if let Some(token) = &config.token {
            if let Ok(value) = HeaderValue::from_str(&format!("token {token}")) {
                headers.insert("Authorization", value);
            }
        }
        headers
    }

    /// The central request dispatcher: tracks `X-RateLimit-Remaining`,
    /// short-circuits once exhausted, and retries on a 403/429 carrying a
    /// `Retry-After` header with an incrementing back-off.
    fn api_request(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
        headers: HeaderMap,
    ) -> Result<Option<Response>> {
        {
            let state = self.rate_limit.lock().unwrap();
            if state.back_step > 5 || state.remaining == 0 {
                log::error!("RATE LIMIT EXCEEDED!");
                return Ok(None);
            }
        }
        let response = self.send_with_retries(method.clone(), url, &body, &headers)?;

        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(-1);
        {
            let mut state = self.rate_limit.lock().unwrap();
            state.remaining = remaining;
        }

        // A primary rate limit is fatal the moment it's reported, regardless
        // of whether this particular response was itself an error status.
        if remaining == 0 {
            if let Some(reset) = response
                .headers()
                .get("x-ratelimit-reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
            {
                log::error!("RATE LIMIT EXCEEDED! Resets at unix time {reset}");
                return Err(LinterError::RateLimited { reset });
            }
        }

        if response.status().as_u16() >= 400 {
            if matches!(response.status().as_u16(), 403 | 429) {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<f64>().ok())
                {
                    let back_step = {
                        let mut state = self.rate_limit.lock().unwrap();
                        let step = state.back_step;
                        state.back_step += 1;
                        step
                    };
                    let wait = retry_after * (back_step as f64).max(1.0);
                    log::warn!("SECONDARY RATE LIMIT HIT! Backing off for {wait} seconds");
                    std::thread::sleep(std::time::Duration::from_secs_f64(wait));
                    return self.api_request(method, url, body, headers);
                }
            }
            log::error!("Got {} response from {url}", response.status());
            return Ok(None);
        }
        {
            let mut state = self.rate_limit.lock().unwrap();
            state.back_step = 0;
        }
        Ok(Some(response))
    }

    /// Send a request, retrying up to [`MAX_TRANSIENT_RETRIES`] times with
    /// jittered exponential back-off on a connection error or a 5xx
    /// response. A transient network failure is fatal only for the
    /// affected request, never for the whole run.
    fn send_with_retries(
        &self,
        method: Method,
        url: &str,
        body: &Option<serde_json::Value>,
        headers: &HeaderMap,
    ) -> Result<Response> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut request = self.client.request(method.clone(), url).headers(headers.clone());
            if let Some(body) = body {
                request = request.json(body);
            }
            match request.send() {
                Ok(response) if response.status().is_server_error() && attempt < MAX_TRANSIENT_RETRIES => {
                    let wait = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1) + jitter_ms(attempt);
                    log::warn!(
                        "got {} from {url}, retrying in {wait}ms (attempt {attempt}/{MAX_TRANSIENT_RETRIES})",
                        response.status()
                    );
                    std::thread::sleep(Duration::from_millis(wait));
                }
                Ok(response) => return Ok(response),
                Err(e) if attempt < MAX_TRANSIENT_RETRIES => {
                    let wait = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1) + jitter_ms(attempt);
                    log::warn!(
                        "request to {url} failed: {e}, retrying in {wait}ms (attempt {attempt}/{MAX_TRANSIENT_RETRIES})"
                    );
                    std::thread::sleep(Duration::from_millis(wait));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn repo_base_url(&self, config: &Config) -> Result<String> {
        let repo = config
            .repo
            .as_ref()
            .ok_or_else(|| LinterError::Config("GITHUB_REPOSITORY is required".to_string()))?;
        Ok(format!("{}/repos/{}/", config.api_url, repo))
    }

    fn pr_number(&self, config: &Config) -> Option<i64> {
        config
            .event_payload
            .as_ref()
            .and_then(|p| p.get("number"))
            .and_then(|n| n.as_i64())
    }

    fn paginate(&self, url: &str, config: &Config) -> Result<Vec<serde_json::Value>> {
        let mut page = 1;
        let mut items = Vec::new();
        loop {
            let paged_url = format!("{url}?page={page}");
            let Some(response) = self.api_request(
                Method::GET,
                &paged_url,
                None,
                self.make_headers(false, config),
            )?
            else {
                break;
            };
            let link_header = response
                .headers()
                .get("link")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let chunk: Vec<serde_json::Value> = response.json().unwrap_or_default();
            if chunk.is_empty() {
                break;
            }
            items.extend(chunk);
            page += 1;
            let has_next = link_header.is_some_and(|l| l.contains("rel=\"next\""));
            if !has_next {
                break;
            }
        }
        Ok(items)
    }
}

impl RestApiClient for GithubApiClient {
    fn get_list_of_changed_files(&self, config: &Config) -> Result<Vec<FileObj>> {
        crate::logger::start_log_group("Get list of specified source files");
        let files = if config.ci && config.repo.is_some() && config.sha.is_some() {
            let base = self.repo_base_url(config)?;
            let url = if config.event_name == "pull_request" {
                let number = self
                    .pr_number(config)
                    .ok_or_else(|| LinterError::Config("missing PR number in event payload".to_string()))?;
                format!("{base}pulls/{number}")
            } else {
                if config.event_name != "push" {
                    log::warn!(
                        "Triggered on unsupported event '{}'. Behaving like a push event.",
                        config.event_name
                    );
                }
                format!("{base}commits/{}", config.sha.as_ref().unwrap())
            };
            log::info!("Fetching files list from url: {url}");
            match self.api_request(Method::GET, &url, None, self.make_headers(true, config))? {
                Some(response) if response.status().as_u16() < 400 => {
                    let buf = response.bytes()?;
                    if config.verbosity_is_debug {
                        if let Some(sha_after) = &config.sha {
                            let sha_before = config
                                .event_payload
                                .as_ref()
                                .and_then(|p| {
                                    p.get("before")
                                        .or_else(|| p.get("pull_request").and_then(|pr| pr.get("base")).and_then(|b| b.get("sha")))
                                })
                                .and_then(|v| v.as_str())
                                .unwrap_or(sha_after);
                            let _ = std::fs::create_dir_all(&config.cache_dir);
                            let path = short_sha_diff_path(&config.cache_dir, sha_before, sha_after);
                            if let Err(e) = std::fs::write(&path, &buf) {
                                log::debug!("could not persist diff snapshot to {path:?}: {e}");
                            }
                        }
                    }
                    parse_diff_from_buf(&buf, &config.extensions, &config.ignored, &config.not_ignored)
                }
                _ => {
                    log::warn!("diff fetch failed or was refused; falling back to paginated JSON files list");
                    let files_url = if config.event_name == "pull_request" {
                        format!("{url}/files")
                    } else {
                        format!("{url}#files")
                    };
                    let items = self.paginate(&files_url, config)?;
                    let mut files = Vec::new();
                    for item in items {
                        if let Some(name) = item.get("filename").and_then(|v| v.as_str()) {
                            let path = std::path::PathBuf::from(name);
                            if crate::common_fs::is_source_or_ignored(
                                &path,
                                &config.extensions,
                                &config.ignored,
                                &config.not_ignored,
                            ) {
                                files.push(FileObj::new(path));
                            }
                        }
                    }
                    files
                }
            }
        } else {
            let repo = open_repo(".")?;
            parse_diff(&get_diff(&repo)?, &config.extensions, &config.ignored, &config.not_ignored)
        };
        crate::logger::end_log_group();
        Ok(files)
    }

    fn ensure_files_present(&self, files: &[FileObj], config: &Config) -> Result<()> {
        let Some(repo) = &config.repo else { return Ok(()) };
        let Some(sha) = &config.sha else { return Ok(()) };
        for file in files {
            if file.name.exists() {
                continue;
            }
            log::warn!("Could not find {:?}! Did you checkout the repo?", file.name);
            let encoded = urlencoding::encode(&file.name.to_string_lossy());
            let raw_url = format!("https://github.com/{repo}/raw/{sha}/{encoded}");
            log::info!("Downloading file from url: {raw_url}");
            let contents = match self.api_request(Method::GET, &raw_url, None, self.make_headers(false, config))? {
                Some(response) => response.text().unwrap_or_default(),
                None => String::new(),
            };
            if let Some(parent) = file.name.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&file.name, contents)?;
        }
        Ok(())
    }

    fn publish(
        &self,
        files: &[FileObj],
        format_advice: &[Option<FormatAdvice>],
        tidy_advice: &[Option<TidyAdvice>],
        config: &Config,
    ) -> Result<i32> {
        let feedback = comments::compose_feedback(files, format_advice, tidy_advice, DEFAULT_LEN_LIMIT);
        let checks_failed = (feedback.format_checks_failed + feedback.tidy_checks_failed) as i32;

        if config.thread_comments.is_enabled() {
            if config.token.is_none() {
                log::error!("The GITHUB_TOKEN is required!");
                return Ok(self.export_exit_code(checks_failed, &feedback, config));
            }
            self.post_thread_comment(&feedback.thread_comment, checks_failed == 0, config)?;
        }

        if config.event_name == "pull_request" && (config.tidy_review || config.format_review) {
            self.post_review(files, format_advice, tidy_advice, config)?;
        }

        if config.file_annotations {
            self.post_annotations(files, format_advice, tidy_advice, config);
        }

        if config.step_summary {
            self.write_step_summary(&feedback.step_summary, config)?;
        }

        Ok(self.export_exit_code(checks_failed, &feedback, config))
    }
}

#[derive(Debug, Deserialize)]
struct JsonComment {
    id: i64,
    url: String,
    body: String,
}

impl GithubApiClient {
    fn comments_url(&self, config: &Config) -> Result<(String, i64)> {
        let base = self.repo_base_url(config)?;
        if config.event_name == "pull_request" {
            let number = self
                .pr_number(config)
                .ok_or_else(|| LinterError::Config("missing PR number in event payload".to_string()))?;
            Ok((format!("{base}issues/{number}"), number))
        } else {
            let sha = config
                .sha
                .as_ref()
                .ok_or_else(|| LinterError::Config("GITHUB_SHA is required".to_string()))?;
            Ok((format!("{base}commits/{sha}"), 0))
        }
    }

    fn post_thread_comment(&self, comment: &str, is_lgtm: bool, config: &Config) -> Result<()> {
        let (base_comments_url, _) = self.comments_url(config)?;
        let count_response = self.api_request(
            Method::GET,
            &base_comments_url,
            None,
            self.make_headers(false, config),
        )?;
        let Some(count_response) = count_response else {
            log::error!("Could not get comment count from {base_comments_url}");
            return Ok(());
        };
        let payload: serde_json::Value = count_response.json().unwrap_or_default();
        let count = if config.event_name == "pull_request" {
            payload.get("comments").and_then(|v| v.as_i64()).unwrap_or(0)
        } else {
            payload
                .get("commit")
                .and_then(|c| c.get("comment_count"))
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
        };
        let comments_url = format!("{base_comments_url}/comments");
        let update_only = config.thread_comments.update_only();
        let delete_all = !update_only || (is_lgtm && config.no_lgtm);
        let owned_comment_url = self.remove_bot_comments(&comments_url, count, delete_all, config)?;

        if (is_lgtm && !config.no_lgtm) || !is_lgtm {
            let (url, method) = match &owned_comment_url {
                Some(url) => (url.clone(), Method::PATCH),
                None => (comments_url, Method::POST),
            };
            let payload = serde_json::json!({ "body": comment });
            if let Some(response) =
                self.api_request(method.clone(), &url, Some(payload), self.make_headers(false, config))?
            {
                log::info!("Got {} response from {method}ing comment", response.status());
            }
        }
        Ok(())
    }

    /// Delete owned comments (prefix-matched by [`COMMENT_MARKER`]); when
    /// `delete` is false the most recently seen owned comment is kept (its
    /// URL is returned for a follow-up PATCH).
    fn remove_bot_comments(
        &self,
        comments_url: &str,
        count: i64,
        delete: bool,
        config: &Config,
    ) -> Result<Option<String>> {
        let mut page = 1;
        let mut remaining = count;
        let mut kept_url = None;
        while remaining > 0 {
            let Some(response) = self.api_request(
                Method::GET,
                &format!("{comments_url}?page={page}"),
                None,
                self.make_headers(false, config),
            )?
            else {
                return Ok(kept_url);
            };
            let body = response.text().unwrap_or_default();
            if config.verbosity_is_debug {
                let _ = std::fs::create_dir_all(&config.cache_dir);
                let dump_path = config.cache_dir.join(format!("comments-pg{page}.json"));
                if let Err(e) = std::fs::write(&dump_path, &body) {
                    log::debug!("could not persist {dump_path:?}: {e}");
                }
            }
            let comments: Vec<JsonComment> = serde_json::from_str(&body).unwrap_or_default();
            if comments.is_empty() {
                break;
            }
            remaining -= comments.len() as i64;
            page += 1;
            for comment in comments {
                if !comment.body.starts_with(COMMENT_MARKER) {
                    continue;
                }
                log::debug!("comment id {}", comment.id);
                if delete || (!delete && kept_url.is_none()) {
                    let del_url = kept_url.clone().unwrap_or(comment.url.clone());
                    if let Some(response) =
                        self.api_request(Method::DELETE, &del_url, None, self.make_headers(false, config))?
                    {
                        log::info!("Got {} from DELETE {del_url}", response.status());
                    } else {
                        return Ok(None);
                    }
                }
                if !delete {
                    kept_url = Some(comment.url);
                }
            }
        }
        Ok(kept_url)
    }

    fn post_annotations(
        &self,
        files: &[FileObj],
        format_advice: &[Option<FormatAdvice>],
        tidy_advice: &[Option<TidyAdvice>],
        config: &Config,
    ) {
        let style_guide = formalize_style_name(&config.style);
        for (file, advice) in files.iter().zip(format_advice.iter()) {
            let Some(advice) = advice else { continue };
            if advice.replaced_lines.is_empty() {
                continue;
            }
            let lines: Vec<String> = advice.replaced_lines.iter().map(|r| r.line.to_string()).collect();
            let name = file.name.to_string_lossy().replace('\\', "/");
            println!(
                "::notice file={name},title=Run clang-format on {name}::File {name} does not conform to {style_guide} style guidelines. (lines {})",
                lines.join(", ")
            );
        }
        for (file, advice) in files.iter().zip(tidy_advice.iter()) {
            let Some(advice) = advice else { continue };
            let name = file.name.to_string_lossy().replace('\\', "/");
            for note in &advice.notes {
                if note.filename != name {
                    continue;
                }
                let severity = if note.severity.starts_with("note") {
                    "notice".to_string()
                } else {
                    note.severity.clone()
                };
                println!(
                    "::{severity} file={file},line={line},title={file}:{line}:{cols} [{diag}]::{info}",
                    file = name,
                    line = note.line,
                    cols = note.cols,
                    diag = note.diagnostic,
                    info = note.rationale,
                );
            }
        }
    }

    fn dismiss_stale_reviews(&self, reviews_url: &str, config: &Config) -> Result<()> {
        let Some(response) = self.api_request(Method::GET, reviews_url, None, self.make_headers(false, config))?
        else {
            log::error!("Failed to poll existing reviews for dismissal");
            return Ok(());
        };
        let reviews: Vec<serde_json::Value> = response.json().unwrap_or_default();
        for review in reviews {
            let is_owned = review
                .get("body")
                .and_then(|b| b.as_str())
                .is_some_and(|b| b.starts_with(COMMENT_MARKER));
            let state = review.get("state").and_then(|s| s.as_str()).unwrap_or("");
            if !is_owned || matches!(state, "PENDING" | "DISMISSED") {
                continue;
            }
            let Some(id) = review.get("id").and_then(|v| v.as_i64()) else { continue };
            let payload = serde_json::json!({ "message": "outdated suggestion", "event": "DISMISS" });
            self.api_request(
                Method::PUT,
                &format!("{reviews_url}/{id}/dismissals"),
                Some(payload),
                self.make_headers(false, config),
            )?;
        }
        Ok(())
    }

    fn post_review(
        &self,
        files: &[FileObj],
        format_advice: &[Option<FormatAdvice>],
        tidy_advice: &[Option<TidyAdvice>],
        config: &Config,
    ) -> Result<()> {
        let base = self.repo_base_url(config)?;
        let Some(number) = self.pr_number(config) else {
            return Ok(());
        };
        let pr_url = format!("{base}pulls/{number}");
        let reviews_url = format!("{pr_url}/reviews");

        let pr_payload = self
            .api_request(Method::GET, &pr_url, None, self.make_headers(false, config))?
            .and_then(|r| r.json::<serde_json::Value>().ok());
        let is_draft = pr_payload
            .as_ref()
            .and_then(|p| p.get("draft"))
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let is_open = pr_payload
            .as_ref()
            .and_then(|p| p.get("state"))
            .and_then(|v| v.as_str())
            .map(|s| s == "open")
            .unwrap_or(false);

        if config.token.is_none() {
            log::error!("A GITHUB_TOKEN env var is required to post review comments");
            return Ok(());
        }
        self.dismiss_stale_reviews(&reviews_url, config)?;
        if is_draft || !is_open {
            return Ok(());
        }

        let originals: Vec<Vec<u8>> = files
            .iter()
            .map(|f| crate::common_fs::read_with_timeout(&f.name, std::time::Duration::from_secs(1)).unwrap_or_default())
            .collect();
        let batch: ReviewBatch = suggestions::build_review_batch(
            files,
            &originals,
            format_advice,
            tidy_advice,
            config.pr_review_summary_only,
        );

        let (summary, mut comments) = batch.render_summary(None, None);
        let mut body = format!("{COMMENT_MARKER}## Cpp-linter Review\n{summary}");
        let total_changes: i64 = batch.tool_total.values().filter_map(|t| t.map(|v| v as i64)).sum();
        if config.pr_review_summary_only {
            comments.clear();
        }
        let event = if total_changes > 0 {
            "REQUEST_CHANGES"
        } else {
            if config.no_lgtm {
                log::debug!("Not posting an approved review because no-lgtm is true");
                return Ok(());
            }
            body.push_str("\nGreat job! :tada:");
            "APPROVE"
        };
        body.push_str(crate::comments::USER_OUTREACH);

        let payload = serde_json::json!({
            "body": body,
            "event": event,
            "comments": comments,
        });
        self.api_request(Method::POST, &reviews_url, Some(payload), self.make_headers(false, config))?;
        Ok(())
    }

    fn export_exit_code(&self, checks_failed: i32, feedback: &comments::Feedback, config: &Config) -> i32 {
        if let Some(path) = &config.github_output {
            if let Ok(mut file) = OpenOptions::new().append(true).open(path) {
                let _ = writeln!(
                    file,
                    "checks-failed={checks_failed}\nclang-format-checks-failed={}\nclang-tidy-checks-failed={}",
                    feedback.format_checks_failed, feedback.tidy_checks_failed
                );
            }
        }
        log::info!("{} clang-format-checks-failed", feedback.format_checks_failed);
        log::info!("{} clang-tidy-checks-failed", feedback.tidy_checks_failed);
        log::info!("{checks_failed} checks-failed");
        checks_failed
    }

    fn write_step_summary(&self, comment: &str, config: &Config) -> Result<()> {
        if let Some(path) = &config.github_step_summary {
            let mut file = OpenOptions::new().append(true).open(path)?;
            writeln!(file, "\n{comment}\n")?;
        }
        Ok(())
    }
}

/// The on-disk path for a persisted diff snapshot, named after the short
/// before/after SHAs like git itself does.
fn short_sha_diff_path(cache_dir: &Path, sha_before: &str, sha_after: &str) -> std::path::PathBuf {
    cache_dir.join(format!("{}...{}.diff", &sha_before[..7.min(sha_before.len())], &sha_after[..7.min(sha_after.len())]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_client_starts_with_unknown_remaining() {
        let client = GithubApiClient::new();
        assert_eq!(client.rate_limit.lock().unwrap().remaining, -1);
    }

    #[test]
    fn diff_snapshot_path_uses_short_shas() {
        let path = short_sha_diff_path(Path::new(".cache"), "0123456789abcdef", "fedcba9876543210");
        assert_eq!(path, Path::new(".cache/0123456...fedcba9.diff"));
    }

    #[test]
    fn jitter_stays_within_a_bounded_spread() {
        for attempt in 1..=MAX_TRANSIENT_RETRIES {
            assert!(jitter_ms(attempt) < 100 * attempt as u64);
        }
    }
}
