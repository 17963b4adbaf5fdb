use std::collections::HashSet;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://www.reddit.com/";

/// Posts fetched per listing page, the maximum the feed allows.
pub const PAGE_LIMIT: u32 = 100;

/// Default ceiling for a listing walk when the caller has no opinion.
pub const MAX_POSTS: usize = 400;

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

/// One page of a subreddit's "new" listing plus the continuation cursor.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub posts: Vec<Post>,
    pub after: Option<String>,
}

/// A post plus its full comment tree, as returned by the detail endpoint.
#[derive(Debug, Clone)]
pub struct PostDetail {
    pub post: Post,
    pub comments: Listing<Comment>,
}

/// Seam between the listing/detail walks and the HTTP client, so the walks
/// can be driven by a scripted source in tests.
pub trait PostSource: Send + Sync {
    fn page(&self, subreddit: &str, after: Option<&str>) -> Result<Page>;
    fn post_detail(&self, subreddit: &str, post_id: &str) -> Result<PostDetail>;
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("reddit client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    fn get(&self, path: &str, params: &[(String, String)]) -> Result<reqwest::blocking::Response> {
        let mut url = self.base_url.join(path)?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, self.user_agent.clone())
            .send()?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            match status.as_u16() {
                403 => Err(anyhow!("reddit: forbidden")),
                429 => Err(anyhow!("reddit: rate limited: {}", body)),
                _ => Err(anyhow!("reddit: api error {}: {}", status, body)),
            }
        }
    }
}

impl PostSource for Client {
    fn page(&self, subreddit: &str, after: Option<&str>) -> Result<Page> {
        let path = format!("r/{}/new.json", subreddit.trim_start_matches("r/"));
        let mut params = vec![("limit".to_string(), PAGE_LIMIT.to_string())];
        if let Some(after) = after {
            params.push(("after".to_string(), after.to_string()));
        }
        let resp = self.get(&path, &params)?;
        let listing: ListingEnvelope<Post> = resp.json().context("reddit: decode listing")?;
        Ok(Page {
            posts: listing
                .data
                .children
                .into_iter()
                .map(|thing| thing.data)
                .collect(),
            after: listing.data.after,
        })
    }

    fn post_detail(&self, subreddit: &str, post_id: &str) -> Result<PostDetail> {
        let path = format!(
            "r/{}/comments/{}/.json",
            subreddit.trim_start_matches("r/"),
            post_id
        );
        let params = vec![("limit".to_string(), PAGE_LIMIT.to_string())];
        let resp = self.get(&path, &params)?;
        let payload: Vec<Value> = resp.json().context("reddit: decode detail payload")?;
        if payload.len() < 2 {
            bail!("reddit: detail payload missing elements");
        }
        let post_listing: ListingEnvelope<Post> =
            serde_json::from_value(payload[0].clone()).context("reddit: decode post listing")?;
        let comment_listing: ListingEnvelope<Comment> =
            serde_json::from_value(payload[1].clone()).context("reddit: decode comment listing")?;
        let post = post_listing
            .data
            .children
            .into_iter()
            .next()
            .map(|thing| thing.data)
            .ok_or_else(|| anyhow!("reddit: post listing empty"))?;
        Ok(PostDetail {
            post,
            comments: comment_listing.data,
        })
    }
}

/// Walk the "new" listing until `max_posts` are accumulated or the feed runs
/// out. Network or decode failure yields whatever was already collected.
pub fn fetch_new_posts(source: &dyn PostSource, subreddit: &str, max_posts: usize) -> Vec<Post> {
    walk_listing(source, subreddit, max_posts, None)
}

/// Same walk, but stop as soon as a post whose id is in `known` shows up.
/// The matching post is included; anything already fetched beyond it in the
/// same page is discarded. This keeps the result "everything new since the
/// last save", bounded by `max_posts`.
pub fn fetch_new_posts_until(
    source: &dyn PostSource,
    subreddit: &str,
    known: &HashSet<String>,
    max_posts: usize,
) -> Vec<Post> {
    walk_listing(source, subreddit, max_posts, Some(known))
}

fn walk_listing(
    source: &dyn PostSource,
    subreddit: &str,
    max_posts: usize,
    known: Option<&HashSet<String>>,
) -> Vec<Post> {
    let mut collected = Vec::new();
    if max_posts == 0 {
        return collected;
    }

    let mut after: Option<String> = None;
    loop {
        let page = match source.page(subreddit, after.as_deref()) {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(subreddit, error = %err, "listing fetch aborted, keeping partial results");
                return collected;
            }
        };
        if page.posts.is_empty() {
            return collected;
        }

        for post in page.posts {
            let hit = known.is_some_and(|ids| ids.contains(&post.id));
            collected.push(post);
            if hit || collected.len() >= max_posts {
                return collected;
            }
        }

        after = match page.after {
            Some(cursor) => Some(cursor),
            None => return collected,
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing<T> {
    pub after: Option<String>,
    pub children: Vec<Thing<T>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thing<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub selftext: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    #[serde(default)]
    pub author: String,
    /// None for removed/deleted comments; those are skipped on render.
    pub body: Option<String>,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub replies: Option<Box<Listing<Comment>>>,
}

// Reddit serializes an empty reply set as `""` instead of a listing
// envelope, so `replies` needs a hand-rolled decode.
impl<'de> Deserialize<'de> for Comment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct CommentHelper {
            #[serde(default)]
            author: String,
            #[serde(default)]
            body: Option<String>,
            #[serde(default)]
            created_utc: f64,
            #[serde(default)]
            replies: serde_json::Value,
        }

        let helper = CommentHelper::deserialize(deserializer)?;
        let replies = if helper.replies.is_null() || helper.replies == "" {
            None
        } else {
            serde_json::from_value::<ListingEnvelope<Comment>>(helper.replies)
                .ok()
                .map(|listing| Box::new(listing.data))
        };
        Ok(Comment {
            author: helper.author,
            body: helper.body,
            created_utc: helper.created_utc,
            replies,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListingEnvelope<T> {
    kind: String,
    data: Listing<T>,
}
