use chrono::{DateTime, TimeZone, Utc};

use crate::reddit::{Comment, PostDetail, PostSource, Thing};

/// In-band failure marker. Detail fetching hands back a document either way;
/// callers that need retry semantics (the link importer) match on this
/// prefix instead of an error type.
pub const FETCH_ERROR_SENTINEL: &str = "Error fetching post details";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fetch a post plus its comment tree and flatten it to markdown. Any
/// fetch or decode failure becomes a sentinel document.
pub fn fetch_post_detail(source: &dyn PostSource, subreddit: &str, post_id: &str) -> String {
    match source.post_detail(subreddit, post_id) {
        Ok(detail) => render_document(&detail),
        Err(err) => {
            tracing::warn!(subreddit, post_id, error = %err, "post detail fetch failed");
            format!("{FETCH_ERROR_SENTINEL}: {err}")
        }
    }
}

pub fn is_fetch_error(content: &str) -> bool {
    content.starts_with(FETCH_ERROR_SENTINEL)
}

/// Flatten a post and its comment tree into the markdown document shape the
/// importer knows how to parse back: H1 title, attribution line, optional
/// selftext, optional external link, then the depth-first comment rendering
/// at two spaces of indent per level.
pub fn render_document(detail: &PostDetail) -> String {
    let post = &detail.post;
    let mut out = String::new();

    out.push_str(&format!("# {}\n\n", post.title));
    out.push_str(&format!(
        "**Posted by u/{} on {}**\n\n",
        display_author(&post.author),
        format_timestamp(post.created_utc)
    ));

    if !post.selftext.is_empty() {
        out.push_str(&format!("{}\n\n", post.selftext));
    }

    // The url field holds the permalink itself for self posts; only a real
    // external target earns a link line.
    let permalink_url = format!("https://www.reddit.com{}", post.permalink);
    if !post.url.is_empty() && post.url != permalink_url {
        out.push_str(&format!("[Link]({})\n\n", post.url));
    }

    out.push_str("---\n\n");
    out.push_str("## Comments\n\n");

    for comment in &detail.comments.children {
        push_comment(&mut out, comment, 0);
    }

    out
}

fn push_comment(out: &mut String, thing: &Thing<Comment>, depth: usize) {
    // Listings mix in non-comment entries ("more" stubs); skip them, and
    // skip removed/deleted comments whose body is gone.
    if thing.kind != "t1" {
        return;
    }
    let comment = &thing.data;
    let Some(body) = comment.body.as_deref() else {
        return;
    };

    let indent = "  ".repeat(depth);
    out.push_str(&format!(
        "{indent}**u/{}** on {}\n\n",
        display_author(&comment.author),
        format_timestamp(comment.created_utc)
    ));
    out.push_str(&format!("{indent}{body}\n\n"));

    // Replies render directly under their parent, before siblings.
    if let Some(replies) = &comment.replies {
        for reply in &replies.children {
            push_comment(out, reply, depth + 1);
        }
    }
}

fn display_author(author: &str) -> &str {
    if author.is_empty() {
        "[deleted]"
    } else {
        author
    }
}

fn format_timestamp(created_utc: f64) -> String {
    let ts = Utc
        .timestamp_opt(created_utc.trunc() as i64, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    ts.format(TIMESTAMP_FORMAT).to_string()
}
