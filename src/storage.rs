use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::reddit;

/// The permanent default category. It always exists and the user-facing
/// flows may not rename or delete it.
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct Subreddit {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CategoryCount {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone)]
pub struct SavedPost {
    pub id: i64,
    pub reddit_id: String,
    pub subreddit: String,
    pub title: String,
    pub url: String,
    pub category: String,
    pub is_read: bool,
    pub show_in_categories: bool,
    pub num_comments: i64,
    pub added_date: DateTime<Utc>,
    pub content: Option<String>,
    pub content_date: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

/// Row shape for a post imported from an external link (full markdown body
/// already in hand, marked read on arrival).
#[derive(Debug, Clone)]
pub struct ImportedPost {
    pub reddit_id: String,
    pub subreddit_id: i64,
    pub title: String,
    pub url: String,
    pub num_comments: i64,
    pub created: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", &"WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "foreign_keys", &"ON")
            .context("storage: enable foreign keys")?;
        conn.pragma_update(None, "busy_timeout", &5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    /// Look up a subreddit case-insensitively, creating it when unseen.
    /// The stored case is whatever the first caller supplied.
    pub fn ensure_subreddit(&self, name: &str) -> Result<i64> {
        let name = name.trim().trim_start_matches("r/");
        if name.is_empty() {
            bail!("storage: subreddit name required");
        }
        let conn = self.conn.lock();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM subreddits WHERE LOWER(name) = LOWER(?1)",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        conn.execute("INSERT INTO subreddits (name) VALUES (?1)", params![name])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_subreddits(&self) -> Result<Vec<Subreddit>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name FROM subreddits ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Subreddit {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn remove_subreddit(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM subreddits WHERE name = ?1", params![name])?;
        Ok(())
    }

    /// Returns false when the new name already exists (no-op).
    pub fn rename_subreddit(&self, old: &str, new: &str) -> Result<bool> {
        let conn = self.conn.lock();
        match conn.execute(
            "UPDATE subreddits SET name = ?1 WHERE name = ?2",
            params![new, old],
        ) {
            Ok(n) => Ok(n > 0),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err).context("storage: rename subreddit"),
        }
    }

    /// Save a post. Saving an already-saved `reddit_id` is a no-op; the
    /// return value says whether a row was actually inserted.
    pub fn save_post(&self, post: &reddit::Post) -> Result<bool> {
        let subreddit_id = self.ensure_subreddit(&post.subreddit)?;
        let added = post.created_utc.trunc() as i64;
        let conn = self.conn.lock();
        let inserted = conn.execute(
            r#"
INSERT OR IGNORE INTO saved_posts
  (reddit_id, subreddit_id, title, url, category, show_in_categories, is_read, num_comments, added_date)
VALUES (?1, ?2, ?3, ?4, ?5, 1, 1, ?6, ?7)
"#,
            params![
                post.id,
                subreddit_id,
                post.title,
                post.url,
                DEFAULT_CATEGORY,
                post.num_comments,
                added,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn insert_imported_post(&self, post: &ImportedPost) -> Result<bool> {
        let conn = self.conn.lock();
        let now = Utc::now().timestamp();
        let inserted = conn.execute(
            r#"
INSERT OR IGNORE INTO saved_posts
  (reddit_id, subreddit_id, title, url, category, show_in_categories, is_read,
   num_comments, added_date, content, content_date)
VALUES (?1, ?2, ?3, ?4, ?5, 1, 1, ?6, ?7, ?8, ?9)
"#,
            params![
                post.reddit_id,
                post.subreddit_id,
                post.title,
                post.url,
                DEFAULT_CATEGORY,
                post.num_comments,
                post.created.timestamp(),
                post.content,
                now,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn unsave_post(&self, reddit_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM saved_posts WHERE reddit_id = ?1",
            params![reddit_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn post_exists(&self, reddit_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM saved_posts WHERE reddit_id = ?1",
                params![reddit_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Ids of every saved post belonging to a subreddit, for the listing
    /// walk's early-stop set.
    pub fn saved_post_ids(&self, subreddit: &str) -> Result<HashSet<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT sp.reddit_id
FROM saved_posts sp
JOIN subreddits s ON sp.subreddit_id = s.id
WHERE LOWER(s.name) = LOWER(?1)
"#,
        )?;
        let rows = stmt
            .query_map(params![subreddit], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(rows)
    }

    pub fn get_saved_post(&self, reddit_id: &str) -> Result<Option<SavedPost>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("{SAVED_POST_SELECT} WHERE sp.reddit_id = ?1"),
            params![reddit_id],
            saved_post_from_row,
        )
        .optional()
        .context("storage: query saved post")
    }

    pub fn set_show_in_categories(&self, reddit_id: &str, visible: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE saved_posts SET show_in_categories = ?1 WHERE reddit_id = ?2",
            params![visible as i64, reddit_id],
        )?;
        Ok(())
    }

    /// Create a category; an existing name is a no-op. Returns the id either
    /// way.
    pub fn add_category(&self, name: &str) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            bail!("storage: category name required");
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO categories (name) VALUES (?1)",
            params![name],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM categories WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Returns false when the new name already exists (no-op).
    pub fn rename_category(&self, old: &str, new: &str) -> Result<bool> {
        if old == DEFAULT_CATEGORY {
            bail!("storage: the default category cannot be renamed");
        }
        let new = new.trim();
        if new.is_empty() || new == old {
            return Ok(false);
        }
        let conn = self.conn.lock();
        match conn.execute(
            "UPDATE categories SET name = ?1 WHERE name = ?2",
            params![new, old],
        ) {
            Ok(0) => return Ok(false),
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Ok(false),
            Err(err) => return Err(err).context("storage: rename category"),
        }
        conn.execute(
            "UPDATE saved_posts SET category = ?1 WHERE category = ?2",
            params![new, old],
        )?;
        Ok(true)
    }

    /// Remove a category, reassigning its posts to the default first.
    pub fn remove_category(&self, name: &str) -> Result<()> {
        if name == DEFAULT_CATEGORY {
            bail!("storage: the default category cannot be removed");
        }
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE saved_posts SET category = ?1 WHERE category = ?2",
            params![DEFAULT_CATEGORY, name],
        )?;
        conn.execute("DELETE FROM categories WHERE name = ?1", params![name])?;
        Ok(())
    }

    /// Move every post in a category back to the default without deleting
    /// the category. Returns the number of posts moved.
    pub fn uncategorize_posts(&self, name: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let moved = conn.execute(
            "UPDATE saved_posts SET category = ?1 WHERE category = ?2",
            params![DEFAULT_CATEGORY, name],
        )?;
        Ok(moved)
    }

    pub fn set_category_description(&self, name: &str, description: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        let description = description.map(str::trim).filter(|d| !d.is_empty());
        conn.execute(
            "UPDATE categories SET description = ?1 WHERE name = ?2",
            params![description, name],
        )?;
        Ok(())
    }

    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, name, description FROM categories ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Name -> description map, the categorizer's closed candidate set.
    pub fn category_descriptions(&self) -> Result<BTreeMap<String, Option<String>>> {
        Ok(self
            .list_categories()?
            .into_iter()
            .map(|c| (c.name, c.description))
            .collect())
    }

    /// Visible-post counts per category. Hidden posts stay saved but do not
    /// count.
    pub fn category_counts(&self) -> Result<Vec<CategoryCount>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT c.name, COUNT(sp.id) AS post_count
FROM categories c
LEFT JOIN saved_posts sp ON sp.category = c.name AND sp.show_in_categories = 1
GROUP BY c.name
ORDER BY c.name
"#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CategoryCount {
                    name: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn posts_in_category(&self, category: &str) -> Result<Vec<SavedPost>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SAVED_POST_SELECT} WHERE sp.category = ?1 AND sp.show_in_categories = 1 ORDER BY sp.added_date DESC"
        ))?;
        let rows = stmt
            .query_map(params![category], saved_post_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Posts in a category whose content has not been downloaded yet, as
    /// (reddit_id, subreddit name) pairs for the detail fetcher.
    pub fn posts_missing_content(&self, category: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT sp.reddit_id, s.name
FROM saved_posts sp
JOIN subreddits s ON sp.subreddit_id = s.id
WHERE sp.category = ?1 AND sp.content IS NULL
"#,
        )?;
        let rows = stmt
            .query_map(params![category], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn posts_with_content(&self, category: &str) -> Result<Vec<SavedPost>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SAVED_POST_SELECT} WHERE sp.category = ?1 AND sp.content IS NOT NULL"
        ))?;
        let rows = stmt
            .query_map(params![category], saved_post_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn update_post_content(&self, reddit_id: &str, content: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE saved_posts SET content = ?1, content_date = ?2 WHERE reddit_id = ?3",
            params![content, Utc::now().timestamp(), reddit_id],
        )?;
        Ok(())
    }

    pub fn update_post_analysis(
        &self,
        reddit_id: &str,
        category: &str,
        summary: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE saved_posts SET category = ?1, summary = ?2 WHERE reddit_id = ?3",
            params![category, summary, reddit_id],
        )?;
        Ok(())
    }

    /// (summary, reddit_id) pairs for posts saved since `since`, newest
    /// first; feeds the insight digest.
    pub fn recent_summaries(&self, since: DateTime<Utc>) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT summary, reddit_id
FROM saved_posts
WHERE summary IS NOT NULL AND added_date >= ?1
ORDER BY added_date DESC
"#,
        )?;
        let rows = stmt
            .query_map(params![since.timestamp()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn cached_image_path(&self, post_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT image_path FROM cached_images WHERE post_id = ?1",
            params![post_id],
            |row| row.get(0),
        )
        .optional()
        .context("storage: query cached image")
    }

    pub fn insert_cached_image(&self, post_id: &str, image_path: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO cached_images (post_id, image_path, created_at) VALUES (?1, ?2, ?3)",
            params![post_id, image_path, Utc::now().timestamp()],
        )?;
        Ok(())
    }
}

const SAVED_POST_SELECT: &str = r#"
SELECT sp.id, sp.reddit_id, s.name, sp.title, sp.url, sp.category,
       sp.is_read, sp.show_in_categories, sp.num_comments, sp.added_date,
       sp.content, sp.content_date, sp.summary
FROM saved_posts sp
JOIN subreddits s ON sp.subreddit_id = s.id
"#;

fn saved_post_from_row(row: &Row<'_>) -> rusqlite::Result<SavedPost> {
    let added: i64 = row.get(9)?;
    let content_date: Option<i64> = row.get(11)?;
    Ok(SavedPost {
        id: row.get(0)?,
        reddit_id: row.get(1)?,
        subreddit: row.get(2)?,
        title: row.get(3)?,
        url: row.get(4)?,
        category: row.get(5)?,
        is_read: row.get::<_, i64>(6)? != 0,
        show_in_categories: row.get::<_, i64>(7)? != 0,
        num_comments: row.get(8)?,
        added_date: Utc
            .timestamp_opt(added, 0)
            .single()
            .unwrap_or_else(Utc::now),
        content: row.get(10)?,
        content_date: content_date.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        summary: row.get(12)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS subreddits (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS categories (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE,
  description TEXT
);

CREATE TABLE IF NOT EXISTS saved_posts (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  reddit_id TEXT NOT NULL UNIQUE,
  subreddit_id INTEGER NOT NULL,
  title TEXT NOT NULL,
  url TEXT NOT NULL DEFAULT '',
  category TEXT NOT NULL DEFAULT 'Uncategorized',
  is_read INTEGER NOT NULL DEFAULT 0,
  show_in_categories INTEGER NOT NULL DEFAULT 1,
  num_comments INTEGER NOT NULL DEFAULT 0,
  added_date INTEGER NOT NULL,
  content TEXT,
  content_date INTEGER,
  summary TEXT,
  FOREIGN KEY(subreddit_id) REFERENCES subreddits(id)
);

CREATE TABLE IF NOT EXISTS cached_images (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  post_id TEXT NOT NULL UNIQUE,
  image_path TEXT NOT NULL,
  created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_saved_posts_category ON saved_posts(category);
CREATE INDEX IF NOT EXISTS idx_saved_posts_subreddit ON saved_posts(subreddit_id);

INSERT OR IGNORE INTO categories (name) VALUES ('Uncategorized');
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("redshelf").join("shelf.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> Store {
        Store::open(Options {
            path: Some(dir.path().join("shelf.db")),
        })
        .unwrap()
    }

    fn post(id: &str, subreddit: &str) -> reddit::Post {
        reddit::Post {
            id: id.to_string(),
            title: format!("title-{id}"),
            url: format!("https://example.com/{id}"),
            permalink: format!("/r/{subreddit}/comments/{id}/slug/"),
            subreddit: subreddit.to_string(),
            author: "author".to_string(),
            created_utc: 1_700_000_000.0,
            num_comments: 3,
            selftext: String::new(),
        }
    }

    #[test]
    fn open_creates_schema_and_closes_cleanly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shelf.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
        // The default category is seeded by the migration.
        let names: Vec<String> = store
            .list_categories()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec![DEFAULT_CATEGORY.to_string()]);
        store.close().unwrap();
    }

    #[test]
    fn save_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.save_post(&post("abc", "rust")).unwrap());
        assert!(!store.save_post(&post("abc", "rust")).unwrap());

        let saved = store.get_saved_post("abc").unwrap().unwrap();
        assert_eq!(saved.category, DEFAULT_CATEGORY);
        assert!(saved.show_in_categories);
        assert!(saved.is_read);
        assert_eq!(saved.num_comments, 3);
    }

    #[test]
    fn subreddit_lookup_is_case_insensitive_and_keeps_first_case() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let first = store.ensure_subreddit("RustLang").unwrap();
        let second = store.ensure_subreddit("rustlang").unwrap();
        assert_eq!(first, second);

        let names: Vec<String> = store
            .list_subreddits()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["RustLang"]);
    }

    #[test]
    fn visibility_drives_category_counts() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.save_post(&post("a", "rust")).unwrap();
        store.save_post(&post("b", "rust")).unwrap();

        let count = |store: &Store| {
            store
                .category_counts()
                .unwrap()
                .into_iter()
                .find(|c| c.name == DEFAULT_CATEGORY)
                .unwrap()
                .count
        };
        assert_eq!(count(&store), 2);

        store.set_show_in_categories("a", false).unwrap();
        assert_eq!(count(&store), 1);
        assert_eq!(store.posts_in_category(DEFAULT_CATEGORY).unwrap().len(), 1);
        // Still saved, just hidden.
        assert!(store.post_exists("a").unwrap());

        store.set_show_in_categories("a", true).unwrap();
        assert_eq!(count(&store), 2);

        store.unsave_post("b").unwrap();
        assert_eq!(count(&store), 1);
    }

    #[test]
    fn remove_category_reassigns_posts() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.save_post(&post("a", "rust")).unwrap();
        store.add_category("Gaming").unwrap();
        store
            .update_post_analysis("a", "Gaming", Some("summary"))
            .unwrap();

        store.remove_category("Gaming").unwrap();
        let saved = store.get_saved_post("a").unwrap().unwrap();
        assert_eq!(saved.category, DEFAULT_CATEGORY);
        assert!(store
            .list_categories()
            .unwrap()
            .iter()
            .all(|c| c.name != "Gaming"));
    }

    #[test]
    fn default_category_is_protected() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.rename_category(DEFAULT_CATEGORY, "Other").is_err());
        assert!(store.remove_category(DEFAULT_CATEGORY).is_err());
    }

    #[test]
    fn add_category_twice_is_a_noop() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let first = store.add_category("Gaming").unwrap();
        let second = store.add_category("Gaming").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rename_category_moves_posts() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.save_post(&post("a", "rust")).unwrap();
        store.add_category("Tech").unwrap();
        store.update_post_analysis("a", "Tech", None).unwrap();

        assert!(store.rename_category("Tech", "Technology").unwrap());
        let saved = store.get_saved_post("a").unwrap().unwrap();
        assert_eq!(saved.category, "Technology");
    }

    #[test]
    fn rename_category_to_existing_name_is_a_noop() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.add_category("Tech").unwrap();
        store.add_category("Gaming").unwrap();
        assert!(!store.rename_category("Tech", "Gaming").unwrap());
    }

    #[test]
    fn content_updates_set_content_date() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.save_post(&post("a", "rust")).unwrap();
        assert_eq!(
            store.posts_missing_content(DEFAULT_CATEGORY).unwrap(),
            vec![("a".to_string(), "rust".to_string())]
        );

        store.update_post_content("a", "# title\n\nbody").unwrap();
        assert!(store
            .posts_missing_content(DEFAULT_CATEGORY)
            .unwrap()
            .is_empty());
        let saved = store.get_saved_post("a").unwrap().unwrap();
        assert!(saved.content_date.is_some());
        assert_eq!(saved.content.as_deref(), Some("# title\n\nbody"));
    }

    #[test]
    fn imported_posts_arrive_read_and_uncategorized() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let subreddit_id = store.ensure_subreddit("rust").unwrap();
        let imported = ImportedPost {
            reddit_id: "xyz".to_string(),
            subreddit_id,
            title: "Imported".to_string(),
            url: String::new(),
            num_comments: 2,
            created: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
            content: "# Imported".to_string(),
        };
        assert!(store.insert_imported_post(&imported).unwrap());
        assert!(!store.insert_imported_post(&imported).unwrap());

        let saved = store.get_saved_post("xyz").unwrap().unwrap();
        assert!(saved.is_read);
        assert!(saved.show_in_categories);
        assert_eq!(saved.category, DEFAULT_CATEGORY);
        assert_eq!(saved.content.as_deref(), Some("# Imported"));
    }

    #[test]
    fn recent_summaries_filters_on_date_and_presence() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let mut old = post("old", "rust");
        old.created_utc = 1_000.0;
        store.save_post(&old).unwrap();
        store.save_post(&post("new", "rust")).unwrap();
        store
            .update_post_analysis("old", DEFAULT_CATEGORY, Some("old summary"))
            .unwrap();
        store
            .update_post_analysis("new", DEFAULT_CATEGORY, Some("new summary"))
            .unwrap();

        let since = Utc.timestamp_opt(1_600_000_000, 0).single().unwrap();
        let recent = store.recent_summaries(since).unwrap();
        assert_eq!(
            recent,
            vec![("new summary".to_string(), "new".to_string())]
        );
    }

    #[test]
    fn cached_image_roundtrip() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.cached_image_path("a").unwrap().is_none());
        store.insert_cached_image("a", "/tmp/a.png").unwrap();
        store.insert_cached_image("a", "/tmp/other.png").unwrap();
        assert_eq!(
            store.cached_image_path("a").unwrap().as_deref(),
            Some("/tmp/a.png")
        );
    }
}
