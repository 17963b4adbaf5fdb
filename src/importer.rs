use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::app::CancelToken;
use crate::markdown;
use crate::reddit::PostSource;
use crate::storage::{ImportedPost, Store};

pub const MAX_RETRIES: usize = 10;
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"reddit\.com/r/([^/]+)/comments/([^/]+)").unwrap());
static TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^# (.*?)\n").unwrap());
static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[Link\]\((.*?)\)").unwrap());
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"on (\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})").unwrap());
static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*u/.*?\*\* on \d{4}").unwrap());

/// Structured fields recovered from a rendered post document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostInfo {
    pub title: String,
    pub url: String,
    pub created: DateTime<Utc>,
    pub num_comments: i64,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub processed: usize,
    pub imported: usize,
    pub errors: Vec<String>,
}

/// `(subreddit, post_id)` from a `…reddit.com/r/<sub>/comments/<id>/…` URL.
pub fn parse_reddit_url(url: &str) -> Option<(String, String)> {
    URL_RE
        .captures(url)
        .map(|cap| (cap[1].to_string(), cap[2].to_string()))
}

/// Recover title/url/timestamp/comment-count from a rendered document.
/// Title is the leading H1, the timestamp is the first attribution time,
/// and the comment count is the number of comment-author lines.
pub fn extract_post_info_from_content(content: &str) -> Option<PostInfo> {
    let title = TITLE_RE.captures(content)?.get(1)?.as_str().to_string();
    let url = LINK_RE
        .captures(content)
        .map(|cap| cap[1].to_string())
        .unwrap_or_default();
    let time = TIME_RE.captures(content)?;
    let created = NaiveDateTime::parse_from_str(&time[1], "%Y-%m-%d %H:%M:%S").ok()?;
    let num_comments = COMMENT_RE.find_iter(content).count() as i64;
    Some(PostInfo {
        title,
        url,
        created: Utc.from_utc_datetime(&created),
        num_comments,
    })
}

/// Run `op` until it stops producing the fetch-error sentinel, sleeping
/// between attempts: 1s doubling to a 30s ceiling, no sleep after the last
/// try. None when every attempt failed.
fn retry_with_backoff(
    mut op: impl FnMut() -> String,
    mut sleep: impl FnMut(Duration),
) -> Option<String> {
    let mut delay = INITIAL_RETRY_DELAY;
    for attempt in 0..MAX_RETRIES {
        let result = op();
        if !markdown::is_fetch_error(&result) {
            return Some(result);
        }
        if attempt < MAX_RETRIES - 1 {
            tracing::warn!(
                attempt = attempt + 1,
                max = MAX_RETRIES,
                delay_secs = delay.as_secs(),
                "detail fetch failed, backing off"
            );
            sleep(delay);
            delay = (delay * 2).min(MAX_RETRY_DELAY);
        }
    }
    None
}

pub struct LinkImporter<'a> {
    store: &'a Store,
    source: &'a dyn PostSource,
    sleeper: fn(Duration),
}

impl<'a> LinkImporter<'a> {
    pub fn new(store: &'a Store, source: &'a dyn PostSource) -> Self {
        Self {
            store,
            source,
            sleeper: thread::sleep,
        }
    }

    #[cfg(test)]
    fn with_sleeper(store: &'a Store, source: &'a dyn PostSource, sleeper: fn(Duration)) -> Self {
        Self {
            store,
            source,
            sleeper,
        }
    }

    /// Import newline-delimited post URLs from a file. Bad lines are
    /// recorded, never fatal; the report carries counts plus every error.
    pub fn import_file(
        &self,
        path: &Path,
        max_links: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<ImportReport> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("importer: read links file {}", path.display()))?;
        Ok(self.import_lines(data.lines(), max_links, cancel))
    }

    pub fn import_lines<'l>(
        &self,
        lines: impl Iterator<Item = &'l str>,
        max_links: Option<usize>,
        cancel: &CancelToken,
    ) -> ImportReport {
        let mut report = ImportReport::default();
        let lines: Vec<&str> = match max_links {
            Some(limit) => lines.take(limit).collect(),
            None => lines.collect(),
        };

        for line in lines {
            if cancel.is_cancelled() {
                tracing::info!("import cancelled");
                break;
            }
            report.processed += 1;
            let link = line.trim();
            if link.is_empty() {
                continue;
            }
            self.import_one(link, &mut report);
        }
        report
    }

    fn import_one(&self, link: &str, report: &mut ImportReport) {
        let Some((subreddit, post_id)) = parse_reddit_url(link) else {
            report.errors.push(format!("Invalid Reddit URL: {link}"));
            return;
        };

        // Already on the shelf: silent skip, not an error.
        match self.store.post_exists(&post_id) {
            Ok(true) => return,
            Ok(false) => {}
            Err(err) => {
                report.errors.push(format!("Error processing {link}: {err}"));
                return;
            }
        }

        let subreddit_id = match self.store.ensure_subreddit(&subreddit) {
            Ok(id) => id,
            Err(err) => {
                report.errors.push(format!("Error processing {link}: {err}"));
                return;
            }
        };

        tracing::info!(subreddit, post_id, "importing post");
        let content = retry_with_backoff(
            || markdown::fetch_post_detail(self.source, &subreddit, &post_id),
            self.sleeper,
        );
        let Some(content) = content else {
            report
                .errors
                .push(format!("Failed to fetch post details after retries: {link}"));
            return;
        };

        let Some(info) = extract_post_info_from_content(&content) else {
            report
                .errors
                .push(format!("Could not parse post content: {link}"));
            return;
        };

        let imported = ImportedPost {
            reddit_id: post_id,
            subreddit_id,
            title: info.title,
            url: info.url,
            num_comments: info.num_comments,
            created: info.created,
            content,
        };
        match self.store.insert_imported_post(&imported) {
            Ok(true) => report.imported += 1,
            Ok(false) => {}
            Err(err) => report.errors.push(format!("Error processing {link}: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reddit::{Comment, Listing, Page, Post, PostDetail, Thing};
    use crate::storage::Options;
    use anyhow::bail;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    #[test]
    fn parses_well_formed_urls() {
        let (subreddit, post_id) =
            parse_reddit_url("https://www.reddit.com/r/rust/comments/abc123/some_title/").unwrap();
        assert_eq!(subreddit, "rust");
        assert_eq!(post_id, "abc123");
        assert!(parse_reddit_url("https://example.com/not/reddit").is_none());
    }

    #[test]
    fn retry_exhaustion_makes_exactly_ten_attempts_with_capped_delays() {
        let mut attempts = 0;
        let mut delays = Vec::new();
        let result = retry_with_backoff(
            || {
                attempts += 1;
                format!("{}: scripted", markdown::FETCH_ERROR_SENTINEL)
            },
            |delay| delays.push(delay.as_secs()),
        );
        assert!(result.is_none());
        assert_eq!(attempts, MAX_RETRIES);
        // One fewer sleep than attempts; doubling until the 30s ceiling.
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30, 30]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn retry_returns_first_non_sentinel_result() {
        let mut attempts = 0;
        let result = retry_with_backoff(
            || {
                attempts += 1;
                if attempts < 3 {
                    format!("{}: transient", markdown::FETCH_ERROR_SENTINEL)
                } else {
                    "# A document".to_string()
                }
            },
            |_| {},
        );
        assert_eq!(result.as_deref(), Some("# A document"));
        assert_eq!(attempts, 3);
    }

    fn detail(post_id: &str) -> PostDetail {
        PostDetail {
            post: Post {
                id: post_id.to_string(),
                title: "Imported title".to_string(),
                url: "https://example.com/article".to_string(),
                permalink: format!("/r/rust/comments/{post_id}/imported_title/"),
                subreddit: "rust".to_string(),
                author: "author".to_string(),
                created_utc: 1_700_000_000.0,
                num_comments: 2,
                selftext: String::new(),
            },
            comments: Listing {
                after: None,
                children: vec![
                    Thing {
                        kind: "t1".to_string(),
                        data: Comment {
                            author: "alice".to_string(),
                            body: Some("first".to_string()),
                            created_utc: 1_700_000_100.0,
                            replies: None,
                        },
                    },
                    Thing {
                        kind: "t1".to_string(),
                        data: Comment {
                            author: "bob".to_string(),
                            body: Some("second".to_string()),
                            created_utc: 1_700_000_200.0,
                            replies: None,
                        },
                    },
                ],
            },
        }
    }

    #[test]
    fn round_trip_recovers_title_timestamp_and_comment_count() {
        let document = markdown::render_document(&detail("abc"));
        let info = extract_post_info_from_content(&document).unwrap();
        assert_eq!(info.title, "Imported title");
        assert_eq!(info.url, "https://example.com/article");
        assert_eq!(info.created.timestamp(), 1_700_000_000);
        assert_eq!(info.num_comments, 2);
    }

    #[test]
    fn unparseable_documents_are_rejected() {
        assert!(extract_post_info_from_content("no title here").is_none());
        // H1 but no timestamp line.
        assert!(extract_post_info_from_content("# Title\n\nbody\n").is_none());
    }

    /// Serves one canned detail; counts detail calls.
    struct DetailSource {
        detail: PostDetail,
        calls: Mutex<usize>,
    }

    impl PostSource for DetailSource {
        fn page(&self, _subreddit: &str, _after: Option<&str>) -> anyhow::Result<Page> {
            bail!("not a listing source")
        }

        fn post_detail(&self, _subreddit: &str, _post_id: &str) -> anyhow::Result<PostDetail> {
            *self.calls.lock() += 1;
            Ok(self.detail.clone())
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> Store {
        Store::open(Options {
            path: Some(dir.path().join("shelf.db")),
        })
        .unwrap()
    }

    #[test]
    fn import_persists_parsed_posts_and_records_bad_lines() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let source = DetailSource {
            detail: detail("abc123"),
            calls: Mutex::new(0),
        };
        let importer = LinkImporter::with_sleeper(&store, &source, |_| {});

        let lines = [
            "https://www.reddit.com/r/rust/comments/abc123/imported_title/",
            "",
            "https://example.com/not/reddit",
        ];
        let report = importer.import_lines(lines.into_iter(), None, &CancelToken::new());

        assert_eq!(report.processed, 3);
        assert_eq!(report.imported, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Invalid Reddit URL"));

        let saved = store.get_saved_post("abc123").unwrap().unwrap();
        assert_eq!(saved.title, "Imported title");
        assert_eq!(saved.category, "Uncategorized");
        assert!(saved.is_read);
        assert!(saved.show_in_categories);
        assert_eq!(saved.num_comments, 2);
        assert!(saved.content.unwrap().starts_with("# Imported title"));
    }

    #[test]
    fn already_saved_posts_are_silently_skipped() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let source = DetailSource {
            detail: detail("abc123"),
            calls: Mutex::new(0),
        };
        let importer = LinkImporter::with_sleeper(&store, &source, |_| {});

        let line = "https://www.reddit.com/r/rust/comments/abc123/imported_title/";
        let first = importer.import_lines([line].into_iter(), None, &CancelToken::new());
        assert_eq!(first.imported, 1);

        let second = importer.import_lines([line].into_iter(), None, &CancelToken::new());
        assert_eq!(second.processed, 1);
        assert_eq!(second.imported, 0);
        assert!(second.errors.is_empty());
        // The skip happens before any fetch.
        assert_eq!(*source.calls.lock(), 1);
    }

    #[test]
    fn max_links_bounds_the_run() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let source = DetailSource {
            detail: detail("abc123"),
            calls: Mutex::new(0),
        };
        let importer = LinkImporter::with_sleeper(&store, &source, |_| {});

        let lines = [
            "https://www.reddit.com/r/rust/comments/abc123/t/",
            "https://www.reddit.com/r/rust/comments/def456/t/",
        ];
        let report = importer.import_lines(lines.into_iter(), Some(1), &CancelToken::new());
        assert_eq!(report.processed, 1);
    }

    #[test]
    fn cancellation_stops_between_lines() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let source = DetailSource {
            detail: detail("abc123"),
            calls: Mutex::new(0),
        };
        let importer = LinkImporter::with_sleeper(&store, &source, |_| {});

        let cancel = CancelToken::new();
        cancel.cancel();
        let lines = ["https://www.reddit.com/r/rust/comments/abc123/t/"];
        let report = importer.import_lines(lines.into_iter(), None, &cancel);
        assert_eq!(report.processed, 0);
        assert_eq!(*source.calls.lock(), 0);
    }

    /// Always fails; exercises the retry-then-record path.
    struct FailingSource;

    impl PostSource for FailingSource {
        fn page(&self, _subreddit: &str, _after: Option<&str>) -> anyhow::Result<Page> {
            bail!("not a listing source")
        }

        fn post_detail(&self, _subreddit: &str, _post_id: &str) -> anyhow::Result<PostDetail> {
            bail!("connection refused")
        }
    }

    #[test]
    fn exhausted_retries_record_an_error_and_continue() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let source = FailingSource;
        let importer = LinkImporter::with_sleeper(&store, &source, |_| {});

        let lines = ["https://www.reddit.com/r/rust/comments/abc123/t/"];
        let report = importer.import_lines(lines.into_iter(), None, &CancelToken::new());
        assert_eq!(report.imported, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Failed to fetch post details after retries"));
        assert!(!store.post_exists("abc123").unwrap());
    }
}
