use serde::{Deserialize, Deserializer, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::collab::UploadFile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub uid: String,
    pub email: String,
    pub display_name: String,
}

impl UserIdentity {
    /// Single-letter avatar: display name first, then email, then `U`.
    pub fn initial(&self) -> char {
        self.display_name
            .chars()
            .chain(self.email.chars())
            .find(|ch| !ch.is_whitespace())
            .map(|ch| ch.to_uppercase().next().unwrap_or(ch))
            .unwrap_or('U')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Download reference; empty for attachments saved before uploads were tracked.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub full_path: String,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn display_size(&self) -> String {
        format_file_size(self.size)
    }
}

/// A stored note as returned by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(
        default,
        serialize_with = "time::serde::rfc3339::option::serialize",
        deserialize_with = "lenient_timestamp"
    )]
    pub created_at: Option<OffsetDateTime>,
    #[serde(
        default,
        serialize_with = "time::serde::rfc3339::option::serialize",
        deserialize_with = "lenient_timestamp"
    )]
    pub updated_at: Option<OffsetDateTime>,
}

impl Note {
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.user_id == uid
    }

    /// Sort key; absent timestamps count as the epoch.
    pub fn updated_key(&self) -> i128 {
        self.updated_at
            .map(OffsetDateTime::unix_timestamp_nanos)
            .unwrap_or(0)
    }

    pub fn created_key(&self) -> i128 {
        self.created_at
            .map(OffsetDateTime::unix_timestamp_nanos)
            .unwrap_or(0)
    }
}

/// Record handed to [`crate::collab::DocumentStore::create`]; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNote {
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub attachments: Vec<Attachment>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl NewNote {
    pub fn into_note(self, id: String) -> Note {
        Note {
            id,
            user_id: self.user_id,
            title: self.title,
            content: self.content,
            tags: self.tags,
            category: self.category,
            attachments: self.attachments,
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        }
    }
}

/// Partial record for [`crate::collab::DocumentStore::update`]. `None` leaves a field alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub category: Option<Option<String>>,
    pub attachments: Option<Vec<Attachment>>,
    pub updated_at: OffsetDateTime,
}

impl NoteUpdate {
    pub fn touch(updated_at: OffsetDateTime) -> Self {
        Self {
            title: None,
            content: None,
            tags: None,
            category: None,
            attachments: None,
            updated_at,
        }
    }

    pub fn apply_to(&self, note: &mut Note) {
        if let Some(title) = &self.title {
            note.title = title.clone();
        }
        if let Some(content) = &self.content {
            note.content = content.clone();
        }
        if let Some(tags) = &self.tags {
            note.tags = tags.clone();
        }
        if let Some(category) = &self.category {
            note.category = category.clone();
        }
        if let Some(attachments) = &self.attachments {
            note.attachments = attachments.clone();
        }
        note.updated_at = Some(self.updated_at);
    }
}

/// What the create form submits: raw tag text, editor markup and files to upload.
#[derive(Debug, Clone, Default)]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
    pub tags_input: String,
    pub category: Option<String>,
    pub files: Vec<UploadFile>,
}

/// What the edit form submits. Only populated fields change.
#[derive(Debug, Clone, Default)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags_input: Option<String>,
    pub category: Option<Option<String>>,
    pub add_files: Vec<UploadFile>,
    /// Blob paths of attachments to drop.
    pub remove_attachments: Vec<String>,
}

impl NotePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.tags_input.is_none()
            && self.category.is_none()
            && self.add_files.is_empty()
            && self.remove_attachments.is_empty()
    }
}

/// Full replacement view of one owner's notes, as pushed by a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotesSnapshot {
    pub sequence: u64,
    pub notes: Vec<Note>,
}

pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw.trim(), &Rfc3339).ok()
}

pub fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn file_sizes_use_binary_units() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(512), "512 Bytes");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(2 * 1024 * 1024), "2 MB");
        assert_eq!(format_file_size(1_234_567), "1.18 MB");
    }

    #[test]
    fn unparseable_timestamps_load_as_absent() -> anyhow::Result<()> {
        let raw = r#"{
            "id": "n1", "user_id": "u1", "title": "T", "content": "",
            "created_at": "yesterday-ish",
            "updated_at": "2024-03-01T10:00:00Z"
        }"#;
        let note: Note = serde_json::from_str(raw)?;
        assert_eq!(note.created_at, None);
        assert_eq!(note.created_key(), 0);
        assert_eq!(note.updated_at, Some(datetime!(2024-03-01 10:00 UTC)));
        assert!(note.tags.is_empty());
        Ok(())
    }

    #[test]
    fn note_round_trips_through_json() -> anyhow::Result<()> {
        let note = Note {
            id: "n1".into(),
            user_id: "u1".into(),
            title: "Plan".into(),
            content: "<p>hi</p>".into(),
            tags: vec!["#work".into()],
            category: Some("ideas".into()),
            attachments: vec![Attachment {
                name: "a.png".into(),
                size: 10,
                mime_type: "image/png".into(),
                url: String::new(),
                full_path: String::new(),
            }],
            created_at: Some(datetime!(2024-01-01 0:00 UTC)),
            updated_at: None,
        };
        let json = serde_json::to_string(&note)?;
        assert!(json.contains(r#""type":"image/png""#));
        let back: Note = serde_json::from_str(&json)?;
        assert_eq!(back, note);
        Ok(())
    }

    #[test]
    fn update_only_touches_populated_fields() {
        let mut note = NewNote {
            user_id: "u".into(),
            title: "Old".into(),
            content: "body".into(),
            tags: vec!["#a".into()],
            category: Some("c".into()),
            attachments: Vec::new(),
            created_at: datetime!(2024-01-01 0:00 UTC),
            updated_at: datetime!(2024-01-01 0:00 UTC),
        }
        .into_note("n".into());
        let mut update = NoteUpdate::touch(datetime!(2024-02-01 0:00 UTC));
        update.title = Some("New".into());
        update.category = Some(None);
        update.apply_to(&mut note);
        assert_eq!(note.title, "New");
        assert_eq!(note.content, "body");
        assert_eq!(note.category, None);
        assert_eq!(note.updated_at, Some(datetime!(2024-02-01 0:00 UTC)));
    }

    #[test]
    fn initial_falls_back_to_email_then_u() {
        let mut user = UserIdentity {
            uid: "1".into(),
            email: "zed@example.com".into(),
            display_name: "ada".into(),
        };
        assert_eq!(user.initial(), 'A');
        user.display_name.clear();
        assert_eq!(user.initial(), 'Z');
        user.email.clear();
        assert_eq!(user.initial(), 'U');
    }
}
