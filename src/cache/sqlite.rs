//! Artifact persistence using SQLite.
//!
//! Each row holds one artifact as gzip-compressed JSON; images and narration
//! are embedded base64, so compression matters.

use super::ArtifactStore;
use crate::timeline::TimelineArtifact;
use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::{params, Connection, OptionalExtension};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database and ensures the table exists.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open artifact DB at {}", db_path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS artifacts (
                id         TEXT PRIMARY KEY,
                payload    BLOB NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .context("Failed to create artifacts table")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool. Queries,
    /// compression and JSON over embedded images stay off the async workers.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            f(&conn)
        })
        .await
        .context("Artifact DB task failed")?
    }
}

fn encode(artifact: &TimelineArtifact) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(artifact).context("Failed to serialize artifact")?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .context("Failed to compress artifact")?;
    encoder.finish().context("Failed to finish compression")
}

fn decode(id: &str, payload: &[u8]) -> Result<TimelineArtifact> {
    serde_json::from_reader(GzDecoder::new(payload))
        .with_context(|| format!("Failed to decode stored artifact {}", id))
}

#[async_trait]
impl ArtifactStore for SqliteStore {
    async fn get(&self, id: &str) -> Result<Option<TimelineArtifact>> {
        let id = id.to_string();
        self.blocking(move |conn| {
            let payload: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT payload FROM artifacts WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .context("Failed to query artifact")?;

            payload.map(|p| decode(&id, &p)).transpose()
        })
        .await
    }

    async fn put(&self, artifact: &TimelineArtifact) -> Result<()> {
        let artifact = artifact.clone();
        self.blocking(move |conn| {
            let payload = encode(&artifact)?;
            conn.execute(
                "INSERT INTO artifacts (id, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET payload = excluded.payload,
                                               created_at = excluded.created_at,
                                               updated_at = excluded.updated_at",
                params![
                    artifact.id,
                    payload,
                    artifact.created_at.to_rfc3339(),
                    chrono::Utc::now().to_rfc3339()
                ],
            )
            .context("Failed to upsert artifact")?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM artifacts WHERE id = ?1", params![id])
                .context("Failed to delete artifact")?;
            Ok(())
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<TimelineArtifact>> {
        self.blocking(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, payload FROM artifacts ORDER BY created_at ASC")
                .context("Failed to prepare list_all query")?;
            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let payload: Vec<u8> = row.get(1)?;
                    Ok((id, payload))
                })
                .context("Failed to query artifacts")?;

            let mut artifacts = Vec::new();
            for row in rows {
                let (id, payload) = row.context("Failed to read artifact row")?;
                artifacts.push(decode(&id, &payload)?);
            }
            Ok(artifacts)
        })
        .await
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        self.blocking(|conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM artifacts ORDER BY created_at ASC")
                .context("Failed to prepare list_ids query")?;
            let ids = stmt
                .query_map([], |row| row.get(0))
                .context("Failed to query artifact ids")?
                .collect::<rusqlite::Result<Vec<String>>>()
                .context("Failed to read artifact id")?;
            Ok(ids)
        })
        .await
    }
}
