//! Contracts for the services the core talks to: identity, note documents,
//! file blobs and export. Local implementations live in [`crate::storage`]
//! and [`crate::export`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::auth::AuthError;
use crate::error::{Error, Result};
use crate::model::{format_file_size, Attachment, NewNote, Note, NoteUpdate, NotesSnapshot, UserIdentity};

pub trait IdentityProvider: Send + Sync {
    fn register(&self, email: &str, password: &str, display_name: &str) -> std::result::Result<UserIdentity, AuthError>;

    /// With `remember_me` the session outlives the process.
    fn login(&self, email: &str, password: &str, remember_me: bool) -> std::result::Result<UserIdentity, AuthError>;

    fn logout(&self) -> std::result::Result<(), AuthError>;

    fn current_user(&self) -> Option<UserIdentity>;

    /// Every later sign-in state change, starting with the current one.
    fn watch(&self) -> Receiver<Option<UserIdentity>>;
}

pub trait DocumentStore: Send + Sync {
    /// Persists a new note and returns the id assigned to it.
    fn create(&self, note: &NewNote) -> Result<String>;

    fn get(&self, id: &str) -> Result<Option<Note>>;

    fn update(&self, id: &str, update: &NoteUpdate) -> Result<()>;

    fn delete(&self, id: &str) -> Result<()>;

    /// Full snapshots of `owner`'s notes, newest first, after every write.
    fn subscribe(&self, owner: &str) -> Result<Subscription>;
}

pub trait BlobStore: Send + Sync {
    /// Stores `file` under `dir`. `on_progress` receives percentages in `0.0..=100.0`.
    fn upload(&self, file: &UploadFile, dir: &str, on_progress: &dyn Fn(f32)) -> Result<StoredBlob>;

    fn delete(&self, full_path: &str) -> Result<()>;

    fn download_url(&self, full_path: &str) -> Result<String>;

    fn list(&self, dir: &str) -> Result<Vec<StoredBlob>>;

    /// Uploads every file in parallel. On failure the blobs that did upload
    /// are deleted again and the lowest failing index is reported.
    fn upload_many(
        &self,
        files: &[UploadFile],
        dir: &str,
        on_progress: &(dyn Fn(usize, f32) + Sync),
    ) -> Result<Vec<StoredBlob>> {
        let results: Vec<Result<StoredBlob>> = thread::scope(|scope| {
            let handles: Vec<_> = files
                .iter()
                .enumerate()
                .map(|(index, file)| {
                    scope.spawn(move || {
                        self.upload(file, dir, &|percent| on_progress(index, percent))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(Error::Backend(anyhow::anyhow!("upload worker panicked"))))
                })
                .collect()
        });

        let mut uploaded = Vec::with_capacity(files.len());
        let mut failure = None;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(blob) => uploaded.push(blob),
                Err(err) if failure.is_none() => failure = Some((index, err)),
                Err(err) => tracing::debug!(index, error = %err, "additional upload failure"),
            }
        }
        match failure {
            None => Ok(uploaded),
            Some((index, err)) => {
                discard_blobs(self, &uploaded);
                Err(Error::Upload {
                    index,
                    name: files[index].name.clone(),
                    message: err.to_string(),
                })
            }
        }
    }
}

/// Best-effort removal of blobs that will not be referenced by any note.
pub fn discard_blobs<B: BlobStore + ?Sized>(store: &B, blobs: &[StoredBlob]) {
    for blob in blobs {
        if let Err(err) = store.delete(&blob.full_path) {
            tracing::warn!(path = %blob.full_path, error = %err, "failed to clean up blob");
        }
    }
}

pub trait NoteExporter: Send + Sync {
    /// Writes `note` into `dir` and returns the created file.
    fn export(&self, note: &Note, dir: &Path) -> Result<PathBuf>;
}

/// A file picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?;
        let mime_type = guess_mime_type(&name).to_string();
        Ok(Self {
            name,
            mime_type,
            bytes,
        })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Rejects files over `max_size` bytes or, when `allowed_types` is not
    /// empty, with a MIME type outside it.
    pub fn validate(&self, max_size: u64, allowed_types: &[String]) -> Result<()> {
        if self.size() > max_size {
            return Err(Error::InvalidFile {
                name: self.name.clone(),
                reason: format!("File size exceeds {} limit", format_file_size(max_size)),
            });
        }
        if !allowed_types.is_empty() && !allowed_types.iter().any(|ty| *ty == self.mime_type) {
            return Err(Error::InvalidFile {
                name: self.name.clone(),
                reason: format!(
                    "File type {} is not allowed. Allowed types: {}",
                    self.mime_type,
                    allowed_types.join(", ")
                ),
            });
        }
        Ok(())
    }
}

pub fn guess_mime_type(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Where a blob store put an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub name: String,
    pub full_path: String,
    pub url: String,
    pub size: u64,
    pub mime_type: String,
}

impl StoredBlob {
    pub fn into_attachment(self) -> Attachment {
        Attachment {
            name: self.name,
            size: self.size,
            mime_type: self.mime_type,
            url: self.url,
            full_path: self.full_path,
        }
    }
}

/// Consumer side of a snapshot subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    snapshots: Receiver<NotesSnapshot>,
    cancelled: Arc<AtomicBool>,
}

/// Producer side held by the document store.
#[derive(Debug, Clone)]
pub struct SnapshotFeed {
    sender: Sender<NotesSnapshot>,
    cancelled: Arc<AtomicBool>,
}

pub fn subscription_channel() -> (SnapshotFeed, Subscription) {
    let (sender, snapshots) = unbounded();
    let cancelled = Arc::new(AtomicBool::new(false));
    (
        SnapshotFeed {
            sender,
            cancelled: Arc::clone(&cancelled),
        },
        Subscription {
            snapshots,
            cancelled,
        },
    )
}

impl SnapshotFeed {
    pub fn is_open(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire)
    }

    /// Returns false once the subscriber is gone.
    pub fn send(&self, snapshot: NotesSnapshot) -> bool {
        self.is_open() && self.sender.send(snapshot).is_ok()
    }
}

impl Subscription {
    /// Drains everything delivered so far and keeps only the newest snapshot.
    pub fn try_latest(&self) -> Option<NotesSnapshot> {
        self.snapshots.try_iter().last()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MemoryBlobs {
        stored: Mutex<Vec<String>>,
        fail: Vec<String>,
    }

    impl BlobStore for MemoryBlobs {
        fn upload(&self, file: &UploadFile, dir: &str, on_progress: &dyn Fn(f32)) -> Result<StoredBlob> {
            if self.fail.contains(&file.name) {
                return Err(Error::Backend(anyhow::anyhow!("quota exceeded")));
            }
            on_progress(100.0);
            let full_path = format!("{dir}/{}", file.name);
            self.stored.lock().push(full_path.clone());
            Ok(StoredBlob {
                name: file.name.clone(),
                url: format!("mem://{full_path}"),
                full_path,
                size: file.size(),
                mime_type: file.mime_type.clone(),
            })
        }

        fn delete(&self, full_path: &str) -> Result<()> {
            self.stored.lock().retain(|path| path != full_path);
            Ok(())
        }

        fn download_url(&self, full_path: &str) -> Result<String> {
            Ok(format!("mem://{full_path}"))
        }

        fn list(&self, _dir: &str) -> Result<Vec<StoredBlob>> {
            Ok(Vec::new())
        }
    }

    fn files(names: &[&str]) -> Vec<UploadFile> {
        names
            .iter()
            .map(|name| UploadFile::new(*name, "text/plain", name.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn parallel_uploads_keep_input_order() {
        let store = MemoryBlobs::default();
        let progress = Mutex::new(Vec::new());
        let blobs = store
            .upload_many(&files(&["a.txt", "b.txt", "c.txt"]), "users/u1/notes", &|index, pct| {
                progress.lock().push((index, pct))
            })
            .expect("uploads");
        let names: Vec<_> = blobs.iter().map(|blob| blob.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
        assert_eq!(blobs[1].full_path, "users/u1/notes/b.txt");
        assert_eq!(progress.lock().len(), 3);
    }

    #[test]
    fn first_failing_index_is_reported_and_others_rolled_back() {
        let store = MemoryBlobs {
            fail: vec!["b.txt".into(), "d.txt".into()],
            ..MemoryBlobs::default()
        };
        let err = store
            .upload_many(&files(&["a.txt", "b.txt", "c.txt", "d.txt"]), "x", &|_, _| {})
            .expect_err("must fail");
        assert_matches!(err, Error::Upload { index: 1, ref name, .. } if name == "b.txt");
        assert!(store.stored.lock().is_empty());
    }

    #[test]
    fn validation_checks_size_then_type() {
        let file = UploadFile::new("big.png", "image/png", vec![0; 2048]);
        assert_matches!(file.validate(1024, &[]), Err(Error::InvalidFile { reason, .. }) if reason == "File size exceeds 1 KB limit");
        let allowed = vec!["application/pdf".to_string()];
        assert_matches!(file.validate(4096, &allowed), Err(Error::InvalidFile { .. }));
        assert!(file.validate(4096, &[]).is_ok());
    }

    #[test]
    fn mime_guess_uses_extension() {
        assert_eq!(guess_mime_type("Photo.JPG"), "image/jpeg");
        assert_eq!(guess_mime_type("notes"), "application/octet-stream");
    }

    #[test]
    fn dropping_subscription_closes_the_feed() {
        let (feed, subscription) = subscription_channel();
        assert!(feed.send(NotesSnapshot::default()));
        assert!(feed.send(NotesSnapshot {
            sequence: 2,
            notes: Vec::new()
        }));
        assert_eq!(subscription.try_latest().map(|s| s.sequence), Some(2));
        assert!(subscription.try_latest().is_none());
        subscription.cancel();
        assert!(!feed.is_open());
        assert!(!feed.send(NotesSnapshot::default()));
    }
}
