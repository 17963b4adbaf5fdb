use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::analysis::{Analyzer, Insight, PostContent};
use crate::markdown;
use crate::media::ImageCache;
use crate::reddit::{self, PostSource};
use crate::storage::{SavedPost, Store};

/// Cooperative cancellation for batch loops; checked between items only,
/// never mid-fetch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
pub struct CategorizeReport {
    pub processed: usize,
    pub reassigned: usize,
    pub errors: Vec<String>,
}

/// What a subreddit browse hands the presentation layer: the fetched run of
/// posts (newest first, ending at the first already-saved one) plus the
/// saved-id set for pre-checking. Display order is the caller's call.
#[derive(Debug)]
pub struct BrowseResult {
    pub posts: Vec<reddit::Post>,
    pub saved: HashSet<String>,
}

/// The application facade: every handle is constructed once at startup and
/// injected, so there is exactly one store/client per process without any
/// hidden global state.
pub struct Explorer {
    store: Arc<Store>,
    source: Arc<dyn PostSource>,
    analyzer: Option<Analyzer>,
    images: Option<ImageCache>,
}

impl Explorer {
    pub fn new(
        store: Arc<Store>,
        source: Arc<dyn PostSource>,
        analyzer: Option<Analyzer>,
        images: Option<ImageCache>,
    ) -> Self {
        Self {
            store,
            source,
            analyzer,
            images,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn analyzer(&self) -> Option<&Analyzer> {
        self.analyzer.as_ref()
    }

    /// Everything new in a subreddit since the last save, bounded by
    /// `max_posts`.
    pub fn browse_new(&self, subreddit: &str, max_posts: usize) -> Result<BrowseResult> {
        let saved = self.store.saved_post_ids(subreddit)?;
        let posts = reddit::fetch_new_posts_until(self.source.as_ref(), subreddit, &saved, max_posts);
        Ok(BrowseResult { posts, saved })
    }

    pub fn save_post(&self, post: &reddit::Post) -> Result<bool> {
        self.store.save_post(post)
    }

    pub fn unsave_post(&self, reddit_id: &str) -> Result<bool> {
        self.store.unsave_post(reddit_id)
    }

    pub fn set_post_visibility(&self, reddit_id: &str, visible: bool) -> Result<()> {
        self.store.set_show_in_categories(reddit_id, visible)
    }

    pub fn cache_image(&self, post_id: &str, image_url: &str) -> Option<PathBuf> {
        self.images
            .as_ref()
            .and_then(|cache| cache.cache_image(post_id, image_url))
    }

    /// Download the full document for every post in a category that has no
    /// content yet. Sentinel results are recorded as errors, not stored.
    pub fn download_category_content(
        &self,
        category: &str,
        cancel: &CancelToken,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<BatchReport> {
        let pending = self.store.posts_missing_content(category)?;
        let total = pending.len();
        let mut report = BatchReport::default();

        for (idx, (reddit_id, subreddit)) in pending.into_iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            progress(idx, total);

            let content = markdown::fetch_post_detail(self.source.as_ref(), &subreddit, &reddit_id);
            if markdown::is_fetch_error(&content) {
                report.errors.push(format!("{reddit_id}: {content}"));
                continue;
            }
            self.store.update_post_content(&reddit_id, &content)?;
            report.completed += 1;
        }
        progress(total, total);
        Ok(report)
    }

    /// Categorize every post in a category that has downloaded content,
    /// downloading missing content first. Stored summaries are reused; a
    /// row is written only when the assignment changed or a summary was
    /// newly generated. Per-post failures never stop the batch.
    pub fn auto_categorize(
        &self,
        category: &str,
        cancel: &CancelToken,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<CategorizeReport> {
        let analyzer = self
            .analyzer
            .as_ref()
            .context("app: completion capability not configured")?;

        let mut report = CategorizeReport::default();
        let download = self.download_category_content(category, cancel, |_, _| {})?;
        report.errors.extend(download.errors);

        let posts = self.store.posts_with_content(category)?;
        let categories = self.store.category_descriptions()?;
        let total = posts.len();

        for (idx, post) in posts.into_iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            progress(idx, total);

            let content = PostContent {
                title: post.title.clone(),
                subreddit: post.subreddit.clone(),
                content: post.content.clone(),
            };
            let had_summary = post.summary.is_some();
            match analyzer.categorize_post(&content, &categories, post.summary.clone()) {
                Ok((assigned, summary)) => {
                    report.processed += 1;
                    if assigned != post.category || !had_summary {
                        self.store
                            .update_post_analysis(&post.reddit_id, &assigned, summary.as_deref())?;
                        if assigned != post.category {
                            report.reassigned += 1;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(reddit_id = %post.reddit_id, error = %err, "categorization failed");
                    report.errors.push(format!("{}: {err:#}", post.reddit_id));
                }
            }
        }
        progress(total, total);
        Ok(report)
    }

    /// Insight bullet points over every post summarized since `since`.
    pub fn build_digest(&self, since: DateTime<Utc>) -> Result<Vec<Insight>> {
        let analyzer = self
            .analyzer
            .as_ref()
            .context("app: completion capability not configured")?;
        let items = self.store.recent_summaries(since)?;
        analyzer.generate_bullet_points(&items)
    }
}

/// Navigation over a fixed list of saved posts: an explicit (list, index)
/// pair owned by whoever drives traversal, instead of index state scattered
/// through the presentation layer.
#[derive(Debug, Default)]
pub struct PostCursor {
    posts: Vec<SavedPost>,
    index: Option<usize>,
}

impl PostCursor {
    pub fn new(posts: Vec<SavedPost>) -> Self {
        Self { posts, index: None }
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn current(&self) -> Option<&SavedPost> {
        self.index.and_then(|idx| self.posts.get(idx))
    }

    pub fn has_next(&self) -> bool {
        match self.index {
            None => !self.posts.is_empty(),
            Some(idx) => idx + 1 < self.posts.len(),
        }
    }

    /// Advance and return the new current post; None at the end (position
    /// unchanged).
    pub fn next(&mut self) -> Option<&SavedPost> {
        let next = match self.index {
            None if !self.posts.is_empty() => 0,
            Some(idx) if idx + 1 < self.posts.len() => idx + 1,
            _ => return None,
        };
        self.index = Some(next);
        self.posts.get(next)
    }

    /// Step back and return the new current post; None at the start
    /// (position unchanged).
    pub fn prev(&mut self) -> Option<&SavedPost> {
        let prev = match self.index {
            Some(idx) if idx > 0 => idx - 1,
            _ => return None,
        };
        self.index = Some(prev);
        self.posts.get(prev)
    }
}
