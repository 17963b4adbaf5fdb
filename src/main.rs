use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use indicatif::{ProgressBar, ProgressStyle};

use redshelf::analysis::Analyzer;
use redshelf::app::{CancelToken, Explorer};
use redshelf::completion;
use redshelf::config;
use redshelf::importer::LinkImporter;
use redshelf::media;
use redshelf::reddit::{self, PostSource};
use redshelf::storage;

const SUGGESTIONS_FILE: &str = "suggested_categories.txt";

const COMMANDS: &[&str] = &[
    "fetch",
    "save",
    "unsave",
    "hide",
    "unhide",
    "import",
    "download",
    "categorize",
    "uncategorize",
    "digest",
    "categories",
    "category",
    "subreddits",
    "subreddit",
    "cache-image",
];

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("Redshelf {}", redshelf::VERSION);
        return;
    }
    if args.is_empty() || args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_usage();
        return;
    }
    if !COMMANDS.contains(&args[0].as_str()) {
        eprintln!("error: unknown command: {} (try --help)", args[0]);
        std::process::exit(2);
    }

    if let Err(err) = run(&args) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        "Redshelf — Save, categorize, and digest Reddit posts from a local shelf.\n\n\
         Usage: redshelf <command> [args]\n\n\
         Commands:\n  \
           fetch <subreddit> [--limit N]        Show new posts up to the first saved one\n  \
           save <subreddit> <post-id>           Save a post to the shelf\n  \
           unsave <post-id>                     Remove a post from the shelf\n  \
           hide <post-id> | unhide <post-id>    Toggle a post's category visibility\n  \
           import <file> [--max N]              Import post URLs, one per line\n  \
           download <category>                  Download content for posts in a category\n  \
           categorize <category> [--suggest]    Auto-categorize posts in a category\n  \
           uncategorize <category>              Move a category's posts back to Uncategorized\n  \
           digest [--hours N]                   Insight bullet points for recent posts\n  \
           categories                           List categories with visible-post counts\n  \
           category add <name>\n  \
           category rename <old> <new>\n  \
           category remove <name>\n  \
           category describe <name> <text>\n  \
           subreddits                           List subreddits on the shelf\n  \
           subreddit rename <old> <new>\n  \
           subreddit remove <name>\n  \
           cache-image <post-id> <url>          Cache a post's image locally\n\n\
         Flags:\n  \
           --version, -V        Show version and exit\n  \
           --help,    -h        Show this help message"
    );
}

fn run(args: &[String]) -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;

    let store = Arc::new(
        storage::Store::open(storage::Options {
            path: cfg.storage.path.clone(),
        })
        .context("open storage")?,
    );
    let client = Arc::new(
        reddit::Client::new(reddit::ClientConfig {
            user_agent: cfg.reddit.user_agent.clone(),
            base_url: Some(cfg.reddit.base_url.clone()),
            timeout: Some(cfg.reddit.timeout),
            http_client: None,
        })
        .context("build reddit client")?,
    );

    match args[0].as_str() {
        "fetch" => {
            let subreddit = arg_at(args, 1, "fetch <subreddit>")?;
            let limit = flag_value(args, "--limit")?.unwrap_or(reddit::MAX_POSTS);
            let explorer = Explorer::new(store, client, None, None);
            let result = explorer.browse_new(subreddit, limit)?;

            // Oldest first, newest at the bottom, like a reading queue.
            for post in result.posts.iter().rev() {
                let marker = if result.saved.contains(&post.id) {
                    "[saved]"
                } else {
                    "       "
                };
                println!("{marker} {}  {}", post.id, post.title);
            }
            println!("{} posts", result.posts.len());
        }
        "save" => {
            let subreddit = arg_at(args, 1, "save <subreddit> <post-id>")?;
            let post_id = arg_at(args, 2, "save <subreddit> <post-id>")?;
            let detail = client
                .post_detail(subreddit, post_id)
                .context("fetch post")?;
            let explorer = Explorer::new(store, client.clone(), None, None);
            if explorer.save_post(&detail.post)? {
                println!("Saved {post_id}.");
            } else {
                println!("{post_id} was already saved.");
            }
        }
        "unsave" => {
            let post_id = arg_at(args, 1, "unsave <post-id>")?;
            let explorer = Explorer::new(store, client, None, None);
            if explorer.unsave_post(post_id)? {
                println!("Unsaved {post_id}.");
            } else {
                println!("{post_id} was not on the shelf.");
            }
        }
        "hide" | "unhide" => {
            let visible = args[0] == "unhide";
            let post_id = arg_at(args, 1, "hide <post-id>")?;
            let explorer = Explorer::new(store, client, None, None);
            explorer.set_post_visibility(post_id, visible)?;
        }
        "import" => {
            let path = PathBuf::from(arg_at(args, 1, "import <file>")?);
            let max = flag_value(args, "--max")?;
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("read links file {}", path.display()))?;
            let lines: Vec<&str> = data.lines().collect();

            let bar = progress_bar(lines.len() as u64);
            let importer = LinkImporter::new(&store, client.as_ref());
            let report = importer.import_lines(
                lines.iter().copied().inspect(|_| bar.inc(1)),
                max,
                &CancelToken::new(),
            );
            bar.finish_and_clear();

            println!(
                "Processed {} lines, imported {} posts.",
                report.processed, report.imported
            );
            print_errors(&report.errors);
        }
        "download" => {
            let category = arg_at(args, 1, "download <category>")?;
            let explorer = Explorer::new(store, client, None, None);
            let bar = progress_bar(0);
            let report = explorer.download_category_content(
                category,
                &CancelToken::new(),
                |done, total| {
                    bar.set_length(total as u64);
                    bar.set_position(done as u64);
                },
            )?;
            bar.finish_and_clear();
            println!("Downloaded {} posts in {category}.", report.completed);
            print_errors(&report.errors);
        }
        "categorize" => {
            let category = arg_at(args, 1, "categorize <category>")?;
            let suggest =
                cfg.completion.suggest_mode || args.iter().any(|arg| arg == "--suggest");
            let analyzer = build_analyzer(&cfg, suggest)?;
            let explorer = Explorer::new(store, client, Some(analyzer), None);

            let bar = progress_bar(0);
            let report = explorer.auto_categorize(category, &CancelToken::new(), |done, total| {
                bar.set_length(total as u64);
                bar.set_position(done as u64);
            })?;
            bar.finish_and_clear();

            println!(
                "Processed {} posts, moved {} out of {category}.",
                report.processed, report.reassigned
            );
            print_errors(&report.errors);

            if let Some(analyzer) = explorer.analyzer() {
                let suggestions = analyzer.suggestions();
                if !suggestions.is_empty() {
                    let added = append_suggestions(Path::new(SUGGESTIONS_FILE), &suggestions)?;
                    println!("Recorded {added} category suggestions in {SUGGESTIONS_FILE}.");
                }
            }
        }
        "digest" => {
            let hours = flag_value(args, "--hours")?.unwrap_or(24) as i64;
            let analyzer = build_analyzer(&cfg, false)?;
            let explorer = Explorer::new(store, client, Some(analyzer), None);

            let since = Utc::now() - ChronoDuration::hours(hours);
            let insights = explorer.build_digest(since)?;
            println!("Last {hours} hours:");
            for insight in insights {
                if insight.post_id.is_empty() {
                    println!("• {}", insight.text);
                } else {
                    println!("• {} ({})", insight.text, insight.post_id);
                }
            }
        }
        "uncategorize" => {
            let category = arg_at(args, 1, "uncategorize <category>")?;
            let moved = store.uncategorize_posts(category)?;
            println!("Moved {moved} posts to Uncategorized.");
        }
        "categories" => {
            for count in store.category_counts()? {
                println!("{} ({})", count.name, count.count);
            }
        }
        "subreddits" => {
            for subreddit in store.list_subreddits()? {
                println!("{}", subreddit.name);
            }
        }
        "subreddit" => {
            let action = arg_at(args, 1, "subreddit <rename|remove>")?;
            match action {
                "rename" => {
                    let old = arg_at(args, 2, "subreddit rename <old> <new>")?;
                    let new = arg_at(args, 3, "subreddit rename <old> <new>")?;
                    if !store.rename_subreddit(old, new)? {
                        println!("Nothing renamed.");
                    }
                }
                "remove" => {
                    store.remove_subreddit(arg_at(args, 2, "subreddit remove <name>")?)?;
                }
                other => bail!("unknown subreddit action: {other}"),
            }
        }
        "category" => {
            let action = arg_at(args, 1, "category <add|rename|remove|describe>")?;
            match action {
                "add" => {
                    store.add_category(arg_at(args, 2, "category add <name>")?)?;
                }
                "rename" => {
                    let old = arg_at(args, 2, "category rename <old> <new>")?;
                    let new = arg_at(args, 3, "category rename <old> <new>")?;
                    if !store.rename_category(old, new)? {
                        println!("Nothing renamed.");
                    }
                }
                "remove" => {
                    store.remove_category(arg_at(args, 2, "category remove <name>")?)?;
                }
                "describe" => {
                    let name = arg_at(args, 2, "category describe <name> <text>")?;
                    let text = arg_at(args, 3, "category describe <name> <text>")?;
                    store.set_category_description(name, Some(text))?;
                }
                other => bail!("unknown category action: {other}"),
            }
        }
        "cache-image" => {
            let post_id = arg_at(args, 1, "cache-image <post-id> <url>")?;
            let url = arg_at(args, 2, "cache-image <post-id> <url>")?;
            let cache = media::ImageCache::new(
                store.clone(),
                media::Config {
                    cache_dir: cfg.media.cache_dir.clone(),
                    user_agent: cfg.reddit.user_agent.clone(),
                    http_client: None,
                },
            )?;
            let explorer = Explorer::new(store, client, None, Some(cache));
            match explorer.cache_image(post_id, url) {
                Some(path) => println!("{}", path.display()),
                None => bail!("image not cached (unsupported url or download failure)"),
            }
        }
        other => bail!("unknown command: {other} (try --help)"),
    }

    Ok(())
}

fn build_analyzer(cfg: &config::Config, suggest: bool) -> Result<Analyzer> {
    let non_empty = |s: &String| (!s.is_empty()).then(|| s.clone());
    let client = completion::Client::new(completion::ClientConfig {
        api_key: non_empty(&cfg.completion.api_key),
        base_url: non_empty(&cfg.completion.base_url),
        model: non_empty(&cfg.completion.model),
        timeout: None,
    })
    .context("build completion client")?;
    Ok(Analyzer::new(Arc::new(client), suggest))
}

fn arg_at<'a>(args: &'a [String], idx: usize, usage: &str) -> Result<&'a str> {
    args.get(idx)
        .map(String::as_str)
        .filter(|arg| !arg.starts_with("--"))
        .with_context(|| format!("usage: redshelf {usage}"))
}

fn flag_value(args: &[String], flag: &str) -> Result<Option<usize>> {
    let Some(pos) = args.iter().position(|arg| arg == flag) else {
        return Ok(None);
    };
    let value = args
        .get(pos + 1)
        .with_context(|| format!("{flag} needs a value"))?;
    let parsed = value
        .parse()
        .with_context(|| format!("{flag} value must be a number, got {value}"))?;
    Ok(Some(parsed))
}

fn progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len}").unwrap_or(ProgressStyle::default_bar()),
    );
    bar
}

fn print_errors(errors: &[String]) {
    for error in errors {
        eprintln!("  {error}");
    }
    if !errors.is_empty() {
        eprintln!("{} errors", errors.len());
    }
}

/// Append suggestions not already present in the file; returns how many
/// were added.
fn append_suggestions(path: &Path, suggestions: &[String]) -> Result<usize> {
    let existing = std::fs::read_to_string(path).unwrap_or_default();
    let mut out = existing.clone();
    let mut added = 0;
    for suggestion in suggestions {
        if existing.lines().any(|line| line == suggestion) {
            continue;
        }
        out.push_str(suggestion);
        out.push('\n');
        added += 1;
    }
    if added > 0 {
        std::fs::write(path, out)
            .with_context(|| format!("write suggestions file {}", path.display()))?;
    }
    Ok(added)
}
