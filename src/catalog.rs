//! Catalog persistence: video titles, their comments, and the admin
//! allow-list.
//!
//! The data is laid out like a small document tree (`videos/{id}/title`,
//! `videos/{id}/comments/*`, `superuser/*`) but lives in libSQL so the same
//! code talks to a hosted database in production and to a local file in
//! development and tests.

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use libsql::{Builder, Connection, params};

/// Where the catalog lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogLocation {
    Local(PathBuf),
    Remote { url: String, auth_token: String },
}

impl CatalogLocation {
    /// `libsql://`, `https://` and `http://` URLs are remote; everything else is
    /// treated as a local path, with an optional `file:` prefix.
    pub fn parse(url: &str, auth_token: Option<String>) -> Self {
        let url = url.trim();
        let is_remote = ["libsql://", "https://", "http://"]
            .iter()
            .any(|scheme| url.starts_with(scheme));
        if is_remote {
            Self::Remote {
                url: url.to_string(),
                auth_token: auth_token.unwrap_or_default(),
            }
        } else {
            Self::Local(PathBuf::from(url.strip_prefix("file:").unwrap_or(url)))
        }
    }
}

/// A single comment under `videos/{id}/comments`. `key` is the push key and
/// defines display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRecord {
    pub key: i64,
    pub text: String,
    pub posted_at: String,
}

async fn configure_local_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS videos (
            videoid TEXT PRIMARY KEY,
            title TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            videoid TEXT NOT NULL,
            text TEXT NOT NULL,
            posted_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_comments_videoid ON comments(videoid);

        CREATE TABLE IF NOT EXISTS superusers (
            email TEXT PRIMARY KEY
        );
        "#,
    )
    .await?;
    Ok(())
}

/// Handle shared by every request. Each operation is a single round trip
/// except [`CatalogStore::remove_video`], which runs in one transaction.
pub struct CatalogStore {
    conn: Connection,
}

impl CatalogStore {
    /// Opens the catalog and creates the tables if they do not exist yet.
    pub async fn open(location: &CatalogLocation) -> Result<Self> {
        let conn = match location {
            CatalogLocation::Local(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("creating catalog directory {}", parent.display())
                    })?;
                }
                let db = Builder::new_local(path)
                    .build()
                    .await
                    .with_context(|| format!("opening catalog {}", path.display()))?;
                let conn = db.connect()?;
                configure_local_connection(&conn).await?;
                conn
            }
            CatalogLocation::Remote { url, auth_token } => {
                let db = Builder::new_remote(url.clone(), auth_token.clone())
                    .build()
                    .await
                    .with_context(|| format!("connecting to catalog {url}"))?;
                db.connect()?
            }
        };

        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// `videos/*/title` as an id → title map, ordered by id.
    pub async fn list_titles(&self) -> Result<BTreeMap<String, String>> {
        let mut rows = self
            .conn
            .query("SELECT videoid, title FROM videos ORDER BY videoid", params![])
            .await?;
        let mut titles = BTreeMap::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            titles.insert(id, title);
        }
        Ok(titles)
    }

    pub async fn get_title(&self, videoid: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT title FROM videos WHERE videoid = ?1",
                params![videoid],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(row.get(0)?))
    }

    /// Creates the video or overwrites its title. Last write wins.
    pub async fn set_title(&self, videoid: &str, title: &str) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO videos (videoid, title) VALUES (?1, ?2)
                ON CONFLICT(videoid) DO UPDATE SET title = excluded.title
                "#,
                params![videoid, title],
            )
            .await?;
        Ok(())
    }

    /// Removes `videos/{id}` together with its comments. Returns whether a
    /// video entry existed.
    pub async fn remove_video(&self, videoid: &str) -> Result<bool> {
        let tx = self.conn.transaction().await?;
        tx.execute("DELETE FROM comments WHERE videoid = ?1", params![videoid])
            .await?;
        let removed = tx
            .execute("DELETE FROM videos WHERE videoid = ?1", params![videoid])
            .await?;
        tx.commit().await?;
        Ok(removed > 0)
    }

    /// Appends a comment and returns its push key.
    pub async fn push_comment(&self, videoid: &str, text: &str) -> Result<i64> {
        let posted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut rows = self
            .conn
            .query(
                r#"
                INSERT INTO comments (videoid, text, posted_at) VALUES (?1, ?2, ?3)
                RETURNING id
                "#,
                params![videoid, text, posted_at],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .context("comment insert returned no key")?;
        Ok(row.get(0)?)
    }

    /// Comments for `videoid` in append order. Unknown ids have none.
    pub async fn comments(&self, videoid: &str) -> Result<Vec<CommentRecord>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT id, text, posted_at
                FROM comments
                WHERE videoid = ?1
                ORDER BY id
                "#,
                params![videoid],
            )
            .await?;
        let mut comments = Vec::new();
        while let Some(row) = rows.next().await? {
            comments.push(CommentRecord {
                key: row.get(0)?,
                text: row.get(1)?,
                posted_at: row.get(2)?,
            });
        }
        Ok(comments)
    }

    /// Exact, case-sensitive membership test against `superuser/*`.
    pub async fn is_superuser(&self, email: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM superusers WHERE email = ?1",
                params![email],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    pub async fn add_superuser(&self, email: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO superusers (email) VALUES (?1) ON CONFLICT(email) DO NOTHING",
                params![email],
            )
            .await?;
        Ok(())
    }
}
