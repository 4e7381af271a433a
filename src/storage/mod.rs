use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::collab::{subscription_channel, DocumentStore, SnapshotFeed, Subscription};
use crate::config::{ConfigPaths, StorageOptions};
use crate::error::Error;
use crate::model::{format_timestamp, parse_timestamp, NewNote, Note, NoteUpdate, NotesSnapshot};

mod blobs;
mod identity;
mod schema;

pub use blobs::FsBlobStore;
pub use identity::LocalIdentity;

const NOTE_COLUMNS: &str =
    "id, user_id, title, content, tags, category, attachments, created_at, updated_at";

/// SQLite-backed note store. Cheap to clone; every operation opens its own
/// connection. Snapshot subscribers are shared between clones.
#[derive(Clone)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
    feeds: Arc<Mutex<Vec<(String, SnapshotFeed)>>>,
    sequence: Arc<AtomicU64>,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn insert_note(&self, note: &NewNote) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let tags = serde_json::to_string(&note.tags).context("encoding tags")?;
        let attachments = serde_json::to_string(&note.attachments).context("encoding attachments")?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO notes (id, user_id, title, content, tags, category, attachments, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    note.user_id,
                    note.title,
                    note.content,
                    tags,
                    note.category,
                    attachments,
                    utc_string(note.created_at),
                    utc_string(note.updated_at),
                ],
            )
            .context("inserting note")?;
            Ok(())
        })?;
        Ok(id)
    }

    pub fn fetch_note(&self, id: &str) -> Result<Option<Note>> {
        self.with_connection(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1"),
                    params![id],
                    NoteRow::from_row,
                )
                .optional()
                .with_context(|| format!("loading note {id}"))?;
            row.map(NoteRow::into_note).transpose()
        })
    }

    /// All notes of `owner`, most recently updated first.
    pub fn fetch_notes_for(&self, owner: &str) -> Result<Vec<Note>> {
        let rows = self.with_connection(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {NOTE_COLUMNS} FROM notes WHERE user_id = ?1 ORDER BY id"))?;
            let rows = stmt
                .query_map(params![owner], NoteRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("listing notes")?;
            Ok(rows)
        })?;
        let mut notes = rows
            .into_iter()
            .map(NoteRow::into_note)
            .collect::<Result<Vec<_>>>()?;
        notes.sort_by_key(|note| Reverse(note.updated_key()));
        Ok(notes)
    }

    /// Applies `update` and returns the note's owner, or `None` when it does not exist.
    pub fn update_note(&self, id: &str, update: &NoteUpdate) -> Result<Option<String>> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let row = tx
            .query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1"),
                params![id],
                NoteRow::from_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut note = row.into_note()?;
        update.apply_to(&mut note);
        tx.execute(
            "UPDATE notes
             SET title = ?1, content = ?2, tags = ?3, category = ?4, attachments = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                note.title,
                note.content,
                serde_json::to_string(&note.tags).context("encoding tags")?,
                note.category,
                serde_json::to_string(&note.attachments).context("encoding attachments")?,
                note.updated_at.map(utc_string),
                id,
            ],
        )
        .with_context(|| format!("updating note {id}"))?;
        tx.commit()?;
        Ok(Some(note.user_id))
    }

    /// Deletes the note and returns its owner, or `None` when it did not exist.
    pub fn delete_note(&self, id: &str) -> Result<Option<String>> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let owner: Option<String> = tx
            .query_row("SELECT user_id FROM notes WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        if owner.is_some() {
            tx.execute("DELETE FROM notes WHERE id = ?1", params![id])
                .with_context(|| format!("deleting note {id}"))?;
        }
        tx.commit()?;
        Ok(owner)
    }

    pub fn subscriber_count(&self) -> usize {
        let mut feeds = self.feeds.lock();
        feeds.retain(|(_, feed)| feed.is_open());
        feeds.len()
    }

    fn snapshot_for(&self, owner: &str) -> Result<NotesSnapshot> {
        let notes = self.fetch_notes_for(owner)?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(NotesSnapshot { sequence, notes })
    }

    /// Pushes a fresh snapshot to every open subscription of `owner`.
    fn publish(&self, owner: &str) {
        let mut feeds = self.feeds.lock();
        feeds.retain(|(_, feed)| feed.is_open());
        if !feeds.iter().any(|(subscriber, _)| subscriber == owner) {
            return;
        }
        match self.snapshot_for(owner) {
            Ok(snapshot) => {
                tracing::debug!(owner, sequence = snapshot.sequence, notes = snapshot.notes.len(), "publishing snapshot");
                for (_, feed) in feeds.iter().filter(|(subscriber, _)| subscriber == owner) {
                    feed.send(snapshot.clone());
                }
            }
            Err(err) => tracing::warn!(owner, error = %format!("{err:#}"), "failed to build snapshot"),
        }
    }
}

impl DocumentStore for StorageHandle {
    fn create(&self, note: &NewNote) -> crate::Result<String> {
        let id = self.insert_note(note)?;
        tracing::info!(note_id = %id, owner = %note.user_id, "note created");
        self.publish(&note.user_id);
        Ok(id)
    }

    fn get(&self, id: &str) -> crate::Result<Option<Note>> {
        Ok(self.fetch_note(id)?)
    }

    fn update(&self, id: &str, update: &NoteUpdate) -> crate::Result<()> {
        let owner = self
            .update_note(id, update)?
            .ok_or_else(|| Error::NoteNotFound(id.to_string()))?;
        tracing::info!(note_id = %id, "note updated");
        self.publish(&owner);
        Ok(())
    }

    fn delete(&self, id: &str) -> crate::Result<()> {
        let owner = self
            .delete_note(id)?
            .ok_or_else(|| Error::NoteNotFound(id.to_string()))?;
        tracing::info!(note_id = %id, "note deleted");
        self.publish(&owner);
        Ok(())
    }

    fn subscribe(&self, owner: &str) -> crate::Result<Subscription> {
        let (feed, subscription) = subscription_channel();
        let mut feeds = self.feeds.lock();
        feed.send(self.snapshot_for(owner)?);
        feeds.push((owner.to_string(), feed));
        tracing::info!(owner, "subscribed to notes");
        Ok(subscription)
    }
}

struct NoteRow {
    id: String,
    user_id: String,
    title: String,
    content: String,
    tags: String,
    category: Option<String>,
    attachments: String,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl NoteRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            content: row.get(3)?,
            tags: row.get(4)?,
            category: row.get(5)?,
            attachments: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_note(self) -> Result<Note> {
        let tags = serde_json::from_str(&self.tags)
            .with_context(|| format!("decoding tags of note {}", self.id))?;
        let attachments = serde_json::from_str(&self.attachments)
            .with_context(|| format!("decoding attachments of note {}", self.id))?;
        Ok(Note {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            content: self.content,
            tags,
            category: self.category,
            attachments,
            created_at: self.created_at.as_deref().and_then(parse_timestamp),
            updated_at: self.updated_at.as_deref().and_then(parse_timestamp),
        })
    }
}

fn utc_string(ts: OffsetDateTime) -> String {
    format_timestamp(ts.to_offset(UtcOffset::UTC))
}

pub fn init(paths: &ConfigPaths, storage: &StorageOptions) -> Result<StorageHandle> {
    let db_path = &paths.database_path;
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn, storage)?;
    schema::apply(&conn)?;
    Ok(StorageHandle {
        db_path: Arc::new(db_path.clone()),
        options: Arc::new(storage.clone()),
        feeds: Arc::new(Mutex::new(Vec::new())),
        sequence: Arc::new(AtomicU64::new(0)),
    })
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .context("setting busy timeout")?;
    Ok(())
}
