use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use time::OffsetDateTime;

use crate::collab::{
    discard_blobs, BlobStore, DocumentStore, IdentityProvider, NoteExporter, StoredBlob, Subscription,
    UploadFile,
};
use crate::config::{AppConfig, ConfigPaths};
use crate::error::{Error, Result};
use crate::export::HtmlExporter;
use crate::model::{Attachment, NewNote, Note, NoteDraft, NotePatch, NoteUpdate, UserIdentity};
use crate::search::{all_tags, filter_and_sort, filter_tag_choices, Criteria};
use crate::storage::{self, FsBlobStore, LocalIdentity};
use crate::tags;

pub mod state;

pub use state::{EditSession, NoteSummary, Projection};

/// Upload progress callback: file index and percentage.
pub type ProgressFn<'a> = &'a (dyn Fn(usize, f32) + Sync);

/// Signed-in note session: composes the pure core with the collaborators and
/// enforces ownership before trusting anything the document store returns.
pub struct Workspace {
    config: Arc<AppConfig>,
    identity: Arc<dyn IdentityProvider>,
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    exporter: Arc<dyn NoteExporter>,
    subscription: Option<Subscription>,
    projection: Projection,
    saving: AtomicBool,
}

impl Workspace {
    pub fn new(
        config: Arc<AppConfig>,
        identity: Arc<dyn IdentityProvider>,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        exporter: Arc<dyn NoteExporter>,
    ) -> Self {
        Self {
            config,
            identity,
            documents,
            blobs,
            exporter,
            subscription: None,
            projection: Projection::default(),
            saving: AtomicBool::new(false),
        }
    }

    /// Wires up the SQLite, filesystem and HTML collaborators under `paths`.
    pub fn open_local(config: Arc<AppConfig>, paths: &ConfigPaths) -> anyhow::Result<Self> {
        let storage = storage::init(paths, &config.storage).context("opening note storage")?;
        let identity = LocalIdentity::open(storage.clone(), config.storage.session_file.clone())
            .context("opening identity store")?;
        let blobs = FsBlobStore::new(config.storage.blob_dir.clone());
        Ok(Self::new(
            config,
            Arc::new(identity),
            Arc::new(storage),
            Arc::new(blobs),
            Arc::new(HtmlExporter),
        ))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn current_user(&self) -> Option<UserIdentity> {
        self.identity.current_user()
    }

    fn require_user(&self) -> Result<UserIdentity> {
        self.current_user().ok_or(Error::Unauthenticated)
    }

    pub fn register(&mut self, email: &str, password: &str, display_name: &str) -> Result<UserIdentity> {
        let user = self.identity.register(email, password, display_name)?;
        self.sync()?;
        Ok(user)
    }

    pub fn login(&mut self, email: &str, password: &str, remember_me: bool) -> Result<UserIdentity> {
        let user = self.identity.login(email, password, remember_me)?;
        self.sync()?;
        Ok(user)
    }

    pub fn logout(&mut self) -> Result<()> {
        self.identity.logout()?;
        self.subscription = None;
        self.projection = Projection::default();
        Ok(())
    }

    /// Follows the current user's notes: (re)subscribes when the signed-in
    /// user changed and applies the newest delivered snapshot. Returns whether
    /// the projection changed.
    pub fn sync(&mut self) -> Result<bool> {
        let Some(user) = self.current_user() else {
            let had_notes = !self.projection.notes().is_empty();
            self.subscription = None;
            self.projection = Projection::default();
            return Ok(had_notes);
        };
        if self.subscription.is_none() || self.projection.owner() != Some(user.uid.as_str()) {
            self.subscription = Some(self.documents.subscribe(&user.uid)?);
            self.projection = Projection::for_owner(&user.uid);
        }
        let latest = self
            .subscription
            .as_ref()
            .and_then(Subscription::try_latest);
        Ok(match latest {
            Some(snapshot) => self.projection.apply(snapshot),
            None => false,
        })
    }

    pub fn notes(&self) -> &[Note] {
        self.projection.notes()
    }

    pub fn view(&self, criteria: &Criteria) -> Vec<&Note> {
        filter_and_sort(self.projection.notes(), criteria)
    }

    pub fn summaries(&self, criteria: &Criteria) -> Vec<NoteSummary> {
        self.view(criteria)
            .into_iter()
            .map(|note| NoteSummary::from_note(note, self.config.preview_words))
            .collect()
    }

    /// Tag picker entries narrowed by `query`, first-seen order.
    pub fn tag_choices(&self, query: &str) -> Vec<String> {
        let tags = all_tags(self.projection.notes());
        filter_tag_choices(&tags, query)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }

    /// Uploads the draft's files, then writes the note. Nothing is persisted
    /// when any upload fails.
    pub fn create_note(&self, draft: NoteDraft, on_progress: ProgressFn<'_>) -> Result<Note> {
        let _guard = SaveGuard::acquire(&self.saving)?;
        let user = self.require_user()?;

        let title = draft.title.trim();
        if title.is_empty() {
            return Err(Error::MissingTitle);
        }
        let tags = checked_tags(&draft.tags_input)?;
        self.validate_files(&draft.files)?;

        let uploaded = self.upload(&user, &draft.files, on_progress)?;
        let now = OffsetDateTime::now_utc();
        let record = NewNote {
            user_id: user.uid.clone(),
            title: title.to_string(),
            content: draft.content,
            tags,
            category: clean_category(draft.category),
            attachments: uploaded.iter().cloned().map(StoredBlob::into_attachment).collect(),
            created_at: now,
            updated_at: now,
        };
        match self.documents.create(&record) {
            Ok(id) => Ok(record.into_note(id)),
            Err(err) => {
                discard_blobs(self.blobs.as_ref(), &uploaded);
                Err(err)
            }
        }
    }

    /// Reads a note, refusing notes of other users.
    pub fn open_note(&self, id: &str) -> Result<Note> {
        let user = self.require_user()?;
        self.owned_note(&user, id)
    }

    pub fn begin_edit(&self, id: &str) -> Result<EditSession> {
        let note = self.open_note(id)?;
        Ok(EditSession::for_note(&note, self.config.editor))
    }

    pub fn begin_create(&self) -> EditSession {
        EditSession::blank(self.config.editor)
    }

    /// Saves an edit form: creates the note the first time, patches it after.
    pub fn save_session(&self, session: &mut EditSession, on_progress: ProgressFn<'_>) -> Result<Note> {
        let note = match session.note_id() {
            None => self.create_note(session.to_draft(), on_progress)?,
            Some(id) => {
                let id = id.to_string();
                self.update_note(&id, session.to_patch(), on_progress)?
            }
        };
        session.mark_saved(&note);
        Ok(note)
    }

    pub fn update_note(&self, id: &str, patch: NotePatch, on_progress: ProgressFn<'_>) -> Result<Note> {
        let _guard = SaveGuard::acquire(&self.saving)?;
        let user = self.require_user()?;
        let mut note = self.owned_note(&user, id)?;

        let mut update = NoteUpdate::touch(OffsetDateTime::now_utc());
        if let Some(title) = patch.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(Error::MissingTitle);
            }
            update.title = Some(title.to_string());
        }
        update.content = patch.content;
        if let Some(input) = patch.tags_input {
            update.tags = Some(checked_tags(&input)?);
        }
        update.category = patch.category.map(clean_category);
        self.validate_files(&patch.add_files)?;

        let (removed, mut kept): (Vec<_>, Vec<_>) = note
            .attachments
            .iter()
            .cloned()
            .partition(|attachment| patch.remove_attachments.contains(&attachment.full_path));
        let uploaded = self.upload(&user, &patch.add_files, on_progress)?;
        if !removed.is_empty() || !uploaded.is_empty() {
            kept.extend(uploaded.iter().cloned().map(StoredBlob::into_attachment));
            update.attachments = Some(kept);
        }

        if let Err(err) = self.documents.update(id, &update) {
            discard_blobs(self.blobs.as_ref(), &uploaded);
            return Err(err);
        }
        self.discard_attachment_blobs(&removed);
        update.apply_to(&mut note);
        Ok(note)
    }

    /// Deletes the note and, best effort, the blobs of its attachments.
    pub fn delete_note(&self, id: &str) -> Result<()> {
        let user = self.require_user()?;
        let note = self.owned_note(&user, id)?;
        self.documents.delete(id)?;
        self.discard_attachment_blobs(&note.attachments);
        Ok(())
    }

    pub fn export_note(&self, id: &str, dir: &Path) -> Result<PathBuf> {
        let note = self.open_note(id)?;
        self.exporter.export(&note, dir)
    }

    fn owned_note(&self, user: &UserIdentity, id: &str) -> Result<Note> {
        let note = self
            .documents
            .get(id)?
            .ok_or_else(|| Error::NoteNotFound(id.to_string()))?;
        if !note.is_owned_by(&user.uid) {
            tracing::warn!(note_id = id, uid = %user.uid, "refusing access to foreign note");
            return Err(Error::Forbidden(id.to_string()));
        }
        Ok(note)
    }

    fn validate_files(&self, files: &[UploadFile]) -> Result<()> {
        let uploads = &self.config.uploads;
        files
            .iter()
            .try_for_each(|file| file.validate(uploads.max_file_size, &uploads.allowed_types))
    }

    fn upload(&self, user: &UserIdentity, files: &[UploadFile], on_progress: ProgressFn<'_>) -> Result<Vec<StoredBlob>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let dir = format!("users/{}/files", user.uid);
        self.blobs.upload_many(files, &dir, on_progress)
    }

    fn discard_attachment_blobs(&self, attachments: &[Attachment]) {
        for attachment in attachments.iter().filter(|a| !a.full_path.is_empty()) {
            if let Err(err) = self.blobs.delete(&attachment.full_path) {
                tracing::warn!(path = %attachment.full_path, error = %err, "failed to delete attachment blob");
            }
        }
    }
}

/// Held for the duration of a save; a second save is refused meanwhile.
struct SaveGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SaveGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::SaveInProgress)?;
        Ok(Self { flag })
    }
}

impl Drop for SaveGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

fn checked_tags(input: &str) -> Result<Vec<String>> {
    let normalized = tags::normalize(input);
    if !normalized.is_valid() {
        return Err(Error::InvalidTags(normalized.invalid));
    }
    Ok(normalized.valid)
}

fn clean_category(category: Option<String>) -> Option<String> {
    category
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLoader, StorageOptions};
    use crate::editor::{Caret, Marks, Selection};
    use crate::search::SortKey;
    use assert_matches::assert_matches;
    use crossbeam_channel::{bounded, Receiver, Sender};
    use parking_lot::Mutex;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        paths: ConfigPaths,
        config: Arc<AppConfig>,
    }

    fn fixture() -> anyhow::Result<Fixture> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::under(temp.path());
        let config = ConfigLoader::with_paths(paths.clone()).load_or_init()?;
        Ok(Fixture {
            _temp: temp,
            paths,
            config: Arc::new(config),
        })
    }

    fn signed_in(fx: &Fixture, email: &str) -> anyhow::Result<Workspace> {
        let mut workspace = Workspace::open_local(fx.config.clone(), &fx.paths)?;
        workspace.register(email, "correct horse", "Tester")?;
        Ok(workspace)
    }

    fn draft(title: &str, tags: &str) -> NoteDraft {
        NoteDraft {
            title: title.into(),
            content: "<p>body</p>".into(),
            tags_input: tags.into(),
            ..NoteDraft::default()
        }
    }

    #[test]
    fn create_sync_and_view() -> anyhow::Result<()> {
        let fx = fixture()?;
        let mut workspace = signed_in(&fx, "ada@example.com")?;
        assert!(workspace.notes().is_empty());

        workspace.create_note(draft("  Beta ", "work, #plans"), &|_, _| {})?;
        workspace.create_note(draft("alpha", "#home"), &|_, _| {})?;
        assert!(workspace.sync()?);

        let criteria = Criteria {
            sort: SortKey::Title,
            ..Criteria::default()
        };
        let titles: Vec<_> = workspace.view(&criteria).iter().map(|n| n.title.clone()).collect();
        assert_eq!(titles, vec!["alpha", "Beta"]);
        assert_eq!(workspace.tag_choices("a"), vec!["#plans".to_string()]);
        assert_eq!(workspace.summaries(&Criteria::default()).len(), 2);
        Ok(())
    }

    #[test]
    fn validation_errors_persist_nothing() -> anyhow::Result<()> {
        let fx = fixture()?;
        let mut workspace = signed_in(&fx, "ada@example.com")?;
        assert_matches!(workspace.create_note(draft("   ", ""), &|_, _| {}), Err(Error::MissingTitle));
        assert_matches!(
            workspace.create_note(draft("T", "ok, #, a#b"), &|_, _| {}),
            Err(Error::InvalidTags(bad)) if bad == vec!["#".to_string(), "a#b".to_string()]
        );
        workspace.sync()?;
        assert!(workspace.notes().is_empty());
        Ok(())
    }

    #[test]
    fn signed_out_sessions_are_refused() -> anyhow::Result<()> {
        let fx = fixture()?;
        let workspace = Workspace::open_local(fx.config.clone(), &fx.paths)?;
        assert_matches!(workspace.create_note(draft("T", ""), &|_, _| {}), Err(Error::Unauthenticated));
        assert_matches!(workspace.open_note("x"), Err(Error::Unauthenticated));
        Ok(())
    }

    #[test]
    fn other_users_notes_are_forbidden() -> anyhow::Result<()> {
        let fx = fixture()?;
        let mut workspace = signed_in(&fx, "ada@example.com")?;
        let note = workspace.create_note(draft("Private", ""), &|_, _| {})?;
        workspace.logout()?;
        assert!(workspace.notes().is_empty());

        workspace.register("eve@example.com", "correct horse", "Eve")?;
        assert!(workspace.notes().is_empty());
        assert_matches!(workspace.open_note(&note.id), Err(Error::Forbidden(_)));
        assert_matches!(workspace.delete_note(&note.id), Err(Error::Forbidden(_)));
        assert_matches!(
            workspace.update_note(&note.id, NotePatch::default(), &|_, _| {}),
            Err(Error::Forbidden(_))
        );
        assert_matches!(workspace.open_note("missing"), Err(Error::NoteNotFound(_)));
        Ok(())
    }

    #[test]
    fn attachments_follow_the_note() -> anyhow::Result<()> {
        let fx = fixture()?;
        let mut workspace = signed_in(&fx, "ada@example.com")?;
        let mut with_file = draft("Scan", "");
        with_file.files = vec![
            UploadFile::new("a.txt", "text/plain", b"aaa".to_vec()),
            UploadFile::new("b.png", "image/png", vec![0; 16]),
        ];
        let note = workspace.create_note(with_file, &|_, _| {})?;
        assert_eq!(note.attachments.len(), 2);
        let blob_path = fx.config.storage.blob_dir.join(&note.attachments[0].full_path);
        assert!(blob_path.exists());

        let patch = NotePatch {
            remove_attachments: vec![note.attachments[0].full_path.clone()],
            ..NotePatch::default()
        };
        let updated = workspace.update_note(&note.id, patch, &|_, _| {})?;
        assert_eq!(updated.attachments.len(), 1);
        assert_eq!(updated.attachments[0].name, "b.png");
        assert!(!blob_path.exists());

        workspace.delete_note(&note.id)?;
        assert!(!fx.config.storage.blob_dir.join(&updated.attachments[0].full_path).exists());
        workspace.sync()?;
        assert!(workspace.notes().is_empty());
        Ok(())
    }

    #[test]
    fn oversized_files_are_rejected_before_upload() -> anyhow::Result<()> {
        let fx = fixture()?;
        let mut config = (*fx.config).clone();
        config.uploads.max_file_size = 4;
        let mut workspace = Workspace::open_local(Arc::new(config), &fx.paths)?;
        workspace.register("ada@example.com", "correct horse", "Ada")?;
        let mut big = draft("Big", "");
        big.files = vec![UploadFile::new("big.bin", "application/octet-stream", vec![0; 5])];
        assert_matches!(workspace.create_note(big, &|_, _| {}), Err(Error::InvalidFile { .. }));
        Ok(())
    }

    #[test]
    fn edit_session_saves_only_changes() -> anyhow::Result<()> {
        let fx = fixture()?;
        let mut workspace = signed_in(&fx, "ada@example.com")?;
        let mut session = workspace.begin_create();
        session.title = "Draft".into();
        session.editor.insert_text(Caret::new(0, 0), "hello world");
        session
            .editor
            .toggle_mark(Some(Selection::within(0, 0, 5)), Marks::BOLD);
        assert!(session.has_unsaved_changes());

        let created = workspace.save_session(&mut session, &|_, _| {})?;
        assert!(!session.has_unsaved_changes());
        assert_eq!(created.content, "<p><b>hello</b> world</p>");

        let mut editing = workspace.begin_edit(&created.id)?;
        editing.tags_input = "#greeting".into();
        let saved = workspace.save_session(&mut editing, &|_, _| {})?;
        assert_eq!(saved.tags, vec!["#greeting".to_string()]);
        assert_eq!(saved.content, created.content);
        workspace.sync()?;
        assert_eq!(workspace.notes()[0].tags, vec!["#greeting".to_string()]);
        Ok(())
    }

    /// Blob store that fails chosen files and can hold uploads until released.
    struct ScriptedBlobs {
        fail: Vec<String>,
        stored: Mutex<Vec<String>>,
        gate: Option<(Sender<()>, Receiver<()>)>,
    }

    impl ScriptedBlobs {
        fn failing(names: &[&str]) -> Self {
            Self {
                fail: names.iter().map(|n| n.to_string()).collect(),
                stored: Mutex::new(Vec::new()),
                gate: None,
            }
        }
    }

    impl BlobStore for ScriptedBlobs {
        fn upload(&self, file: &UploadFile, dir: &str, on_progress: &dyn Fn(f32)) -> Result<StoredBlob> {
            if let Some((started, release)) = &self.gate {
                let _ = started.send(());
                let _ = release.recv_timeout(Duration::from_secs(5));
            }
            if self.fail.contains(&file.name) {
                return Err(Error::Backend(anyhow::anyhow!("connection reset")));
            }
            on_progress(100.0);
            let full_path = format!("{dir}/{}", file.name);
            self.stored.lock().push(full_path.clone());
            Ok(StoredBlob {
                name: file.name.clone(),
                url: format!("test://{full_path}"),
                full_path,
                size: file.size(),
                mime_type: file.mime_type.clone(),
            })
        }

        fn delete(&self, full_path: &str) -> Result<()> {
            self.stored.lock().retain(|p| p != full_path);
            Ok(())
        }

        fn download_url(&self, full_path: &str) -> Result<String> {
            Ok(format!("test://{full_path}"))
        }

        fn list(&self, _dir: &str) -> Result<Vec<StoredBlob>> {
            Ok(Vec::new())
        }
    }

    fn scripted_workspace(fx: &Fixture, blobs: Arc<ScriptedBlobs>) -> anyhow::Result<Workspace> {
        let mut options = StorageOptions::default();
        options.database_path = fx.paths.database_path.clone();
        let storage = storage::init(&fx.paths, &options)?;
        let identity = LocalIdentity::open(storage.clone(), fx.paths.session_file.clone())?;
        let mut workspace = Workspace::new(
            fx.config.clone(),
            Arc::new(identity),
            Arc::new(storage),
            blobs,
            Arc::new(HtmlExporter),
        );
        workspace.register("ada@example.com", "correct horse", "Ada")?;
        Ok(workspace)
    }

    #[test]
    fn failed_upload_persists_no_note() -> anyhow::Result<()> {
        let fx = fixture()?;
        let blobs = Arc::new(ScriptedBlobs::failing(&["two.txt"]));
        let mut workspace = scripted_workspace(&fx, blobs.clone())?;
        let mut failing = draft("Upload", "");
        failing.files = ["one.txt", "two.txt", "three.txt"]
            .iter()
            .map(|name| UploadFile::new(*name, "text/plain", b"x".to_vec()))
            .collect();

        assert_matches!(
            workspace.create_note(failing, &|_, _| {}),
            Err(Error::Upload { index: 1, ref name, .. }) if name == "two.txt"
        );
        assert!(blobs.stored.lock().is_empty());
        workspace.sync()?;
        assert!(workspace.notes().is_empty());
        assert!(!workspace.is_saving());
        Ok(())
    }

    #[test]
    fn second_concurrent_save_is_refused() -> anyhow::Result<()> {
        let fx = fixture()?;
        let (started_tx, started_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let blobs = Arc::new(ScriptedBlobs {
            fail: Vec::new(),
            stored: Mutex::new(Vec::new()),
            gate: Some((started_tx, release_rx)),
        });
        let workspace = scripted_workspace(&fx, blobs)?;

        thread::scope(|scope| -> anyhow::Result<()> {
            let first = scope.spawn(|| {
                let mut slow = draft("Slow", "");
                slow.files = vec![UploadFile::new("a.txt", "text/plain", b"a".to_vec())];
                workspace.create_note(slow, &|_, _| {})
            });
            started_rx.recv_timeout(Duration::from_secs(5))?;
            assert!(workspace.is_saving());
            assert_matches!(workspace.create_note(draft("Fast", ""), &|_, _| {}), Err(Error::SaveInProgress));
            release_tx.send(())?;
            let created = first.join().expect("save thread")?;
            assert_eq!(created.title, "Slow");
            Ok(())
        })?;
        assert!(!workspace.is_saving());
        Ok(())
    }

    #[test]
    fn export_uses_title_for_file_name() -> anyhow::Result<()> {
        let fx = fixture()?;
        let workspace = signed_in(&fx, "ada@example.com")?;
        let note = workspace.create_note(draft("Trip Plan", "#travel"), &|_, _| {})?;
        let path = workspace.export_note(&note.id, &fx.paths.export_dir)?;
        assert_eq!(path, fx.paths.export_dir.join("trip_plan.html"));
        Ok(())
    }
}
