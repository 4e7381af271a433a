use time::OffsetDateTime;

use crate::config::EditorConfig;
use crate::editor::Editor;
use crate::model::{Note, NoteDraft, NotePatch, NotesSnapshot};
use crate::preview::preview;

/// List row for a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteSummary {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub updated_at: Option<OffsetDateTime>,
    pub attachment_count: usize,
}

impl NoteSummary {
    pub fn from_note(note: &Note, preview_words: usize) -> Self {
        Self {
            id: note.id.clone(),
            title: note.title.clone(),
            preview: preview(&note.content, preview_words),
            tags: note.tags.clone(),
            category: note.category.clone(),
            updated_at: note.updated_at,
            attachment_count: note.attachments.len(),
        }
    }
}

/// The session's local copy of the signed-in user's notes. Every snapshot
/// replaces it wholesale; stale snapshots are ignored.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    owner: Option<String>,
    sequence: u64,
    notes: Vec<Note>,
}

impl Projection {
    pub fn for_owner(owner: &str) -> Self {
        Self {
            owner: Some(owner.to_string()),
            ..Self::default()
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Returns true when the snapshot was newer and replaced the notes.
    pub fn apply(&mut self, snapshot: NotesSnapshot) -> bool {
        if snapshot.sequence <= self.sequence && self.sequence != 0 {
            return false;
        }
        let owner = self.owner.as_deref();
        self.sequence = snapshot.sequence;
        self.notes = snapshot
            .notes
            .into_iter()
            .filter(|note| owner.map_or(true, |uid| note.is_owned_by(uid)))
            .collect();
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Baseline {
    title: String,
    markup: String,
    tags_input: String,
    category: Option<String>,
}

/// An open create or edit form: title, tag text, category and the rich
/// content editor, plus what was last saved so leaving can warn about
/// unsaved changes.
#[derive(Debug, Clone)]
pub struct EditSession {
    note_id: Option<String>,
    pub title: String,
    pub tags_input: String,
    pub category: Option<String>,
    pub editor: Editor,
    baseline: Baseline,
}

impl EditSession {
    pub fn blank(settings: EditorConfig) -> Self {
        let editor = Editor::new(settings);
        let baseline = Baseline {
            title: String::new(),
            markup: editor.to_markup(),
            tags_input: String::new(),
            category: None,
        };
        Self {
            note_id: None,
            title: String::new(),
            tags_input: String::new(),
            category: None,
            editor,
            baseline,
        }
    }

    pub fn for_note(note: &Note, settings: EditorConfig) -> Self {
        let editor = Editor::from_markup(&note.content, settings);
        let tags_input = note.tags.join(" ");
        let baseline = Baseline {
            title: note.title.clone(),
            markup: editor.to_markup(),
            tags_input: tags_input.clone(),
            category: note.category.clone(),
        };
        Self {
            note_id: Some(note.id.clone()),
            title: note.title.clone(),
            tags_input,
            category: note.category.clone(),
            editor,
            baseline,
        }
    }

    pub fn note_id(&self) -> Option<&str> {
        self.note_id.as_deref()
    }

    pub fn is_new(&self) -> bool {
        self.note_id.is_none()
    }

    fn current(&self) -> Baseline {
        Baseline {
            title: self.title.clone(),
            markup: self.editor.to_markup(),
            tags_input: self.tags_input.clone(),
            category: self.category.clone(),
        }
    }

    /// Whether leaving now would lose edits. Only warns; nothing is cancelled.
    pub fn has_unsaved_changes(&self) -> bool {
        self.editor.is_dirty() || self.current() != self.baseline
    }

    pub fn to_draft(&self) -> NoteDraft {
        NoteDraft {
            title: self.title.clone(),
            content: self.editor.to_markup(),
            tags_input: self.tags_input.clone(),
            category: self.category.clone(),
            files: Vec::new(),
        }
    }

    /// Only the fields that differ from the last save.
    pub fn to_patch(&self) -> NotePatch {
        let current = self.current();
        NotePatch {
            title: (current.title != self.baseline.title).then_some(current.title),
            content: (current.markup != self.baseline.markup).then_some(current.markup),
            tags_input: (current.tags_input != self.baseline.tags_input).then_some(current.tags_input),
            category: (current.category != self.baseline.category).then_some(current.category),
            ..NotePatch::default()
        }
    }

    pub(crate) fn mark_saved(&mut self, note: &Note) {
        self.note_id = Some(note.id.clone());
        self.title = note.title.clone();
        self.tags_input = note.tags.join(" ");
        self.category = note.category.clone();
        self.editor.mark_clean();
        self.baseline = self.current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::Caret;
    use time::macros::datetime;

    fn note(id: &str, owner: &str) -> Note {
        Note {
            id: id.into(),
            user_id: owner.into(),
            title: "Groceries".into(),
            content: "<p>milk &amp; <b>eggs</b> and bread</p>".into(),
            tags: vec!["#home".into()],
            category: None,
            attachments: Vec::new(),
            created_at: Some(datetime!(2024-01-01 0:00 UTC)),
            updated_at: Some(datetime!(2024-01-02 0:00 UTC)),
        }
    }

    #[test]
    fn summary_uses_plain_preview() {
        let summary = NoteSummary::from_note(&note("n1", "u1"), 3);
        assert_eq!(summary.preview, "milk & eggs...");
        assert_eq!(summary.attachment_count, 0);
    }

    #[test]
    fn projection_replaces_and_ignores_stale_snapshots() {
        let mut projection = Projection::for_owner("u1");
        assert!(projection.apply(NotesSnapshot {
            sequence: 3,
            notes: vec![note("a", "u1"), note("b", "u2")],
        }));
        assert_eq!(projection.notes().len(), 1);

        assert!(!projection.apply(NotesSnapshot {
            sequence: 2,
            notes: Vec::new(),
        }));
        assert_eq!(projection.notes().len(), 1);

        assert!(projection.apply(NotesSnapshot {
            sequence: 4,
            notes: Vec::new(),
        }));
        assert!(projection.notes().is_empty());
    }

    #[test]
    fn unsaved_changes_track_every_field() {
        let mut session = EditSession::for_note(&note("n1", "u1"), EditorConfig::default());
        assert!(!session.has_unsaved_changes());
        assert!(session.to_patch().is_empty());

        session.tags_input.push_str(" #errands");
        assert!(session.has_unsaved_changes());
        let patch = session.to_patch();
        assert_eq!(patch.tags_input.as_deref(), Some("#home #errands"));
        assert!(patch.title.is_none());

        session.tags_input = "#home".into();
        assert!(!session.has_unsaved_changes());

        session.editor.insert_text(Caret::new(0, 0), "fresh ");
        assert!(session.has_unsaved_changes());
        assert!(session.to_patch().content.is_some());
    }

    #[test]
    fn blank_session_is_clean_until_typed_into() {
        let mut session = EditSession::blank(EditorConfig::default());
        assert!(session.is_new());
        assert!(!session.has_unsaved_changes());
        session.title = "Idea".into();
        assert!(session.has_unsaved_changes());
        assert_eq!(session.to_draft().title, "Idea");
    }
}
