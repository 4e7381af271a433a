use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::collab::{guess_mime_type, BlobStore, StoredBlob, UploadFile};
use crate::error::Result;

const CHUNK_SIZE: usize = 64 * 1024;

/// Blob store writing uploads below a directory on disk.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> anyhow::Result<PathBuf> {
        let path = Path::new(relative);
        if path
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            bail!("blob path '{relative}' must stay inside the store");
        }
        Ok(self.root.join(path))
    }

    fn url_for(&self, path: &Path) -> String {
        let absolute = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        format!("file://{}", absolute.display())
    }

    fn write_blob(&self, file: &UploadFile, dir: &str, on_progress: &dyn Fn(f32)) -> anyhow::Result<StoredBlob> {
        let directory = self.resolve(dir)?;
        fs::create_dir_all(&directory)
            .with_context(|| format!("creating blob directory {}", directory.display()))?;

        let name = stored_name(&file.name, OffsetDateTime::now_utc());
        let full_path = format!("{}/{name}", dir.trim_end_matches('/'));
        let target = directory.join(&name);
        let mut out = fs::File::create(&target)
            .with_context(|| format!("creating blob {}", target.display()))?;

        let total = file.bytes.len();
        let mut written = 0;
        on_progress(0.0);
        for chunk in file.bytes.chunks(CHUNK_SIZE) {
            out.write_all(chunk)
                .with_context(|| format!("writing blob {}", target.display()))?;
            written += chunk.len();
            on_progress(written as f32 / total as f32 * 100.0);
        }
        out.sync_all().context("flushing blob")?;
        if total == 0 {
            on_progress(100.0);
        }

        tracing::debug!(path = %full_path, size = total, "blob stored");
        Ok(StoredBlob {
            name: file.name.clone(),
            url: self.url_for(&target),
            full_path,
            size: file.size(),
            mime_type: file.mime_type.clone(),
        })
    }
}

impl BlobStore for FsBlobStore {
    fn upload(&self, file: &UploadFile, dir: &str, on_progress: &dyn Fn(f32)) -> Result<StoredBlob> {
        Ok(self.write_blob(file, dir, on_progress)?)
    }

    fn delete(&self, full_path: &str) -> Result<()> {
        let target = self.resolve(full_path)?;
        match fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = full_path, "blob already gone");
                Ok(())
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("deleting blob {}", target.display()))
                .into()),
        }
    }

    fn download_url(&self, full_path: &str) -> Result<String> {
        let target = self.resolve(full_path)?;
        if !target.is_file() {
            return Err(anyhow::anyhow!("blob {full_path} does not exist").into());
        }
        Ok(self.url_for(&target))
    }

    fn list(&self, dir: &str) -> Result<Vec<StoredBlob>> {
        let directory = self.resolve(dir)?;
        if !directory.is_dir() {
            return Ok(Vec::new());
        }
        let mut blobs = Vec::new();
        let entries = fs::read_dir(&directory)
            .with_context(|| format!("listing {}", directory.display()))?;
        for entry in entries {
            let entry = entry.context("reading blob directory entry")?;
            let metadata = entry.metadata().context("reading blob metadata")?;
            if !metadata.is_file() {
                continue;
            }
            let stored = entry.file_name().to_string_lossy().into_owned();
            let name = original_name(&stored).to_string();
            blobs.push(StoredBlob {
                mime_type: guess_mime_type(&name).to_string(),
                full_path: format!("{}/{stored}", dir.trim_end_matches('/')),
                url: self.url_for(&entry.path()),
                size: metadata.len(),
                name,
            });
        }
        blobs.sort_by(|a, b| a.full_path.cmp(&b.full_path));
        Ok(blobs)
    }
}

/// `{millis}-{random}-{name}` with anything outside `[A-Za-z0-9._-]` replaced.
fn stored_name(original: &str, now: OffsetDateTime) -> String {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    let random = Uuid::new_v4().simple().to_string();
    let safe: String = original
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let safe = if safe.trim_matches('.').is_empty() {
        "file".to_string()
    } else {
        safe
    };
    format!("{millis}-{}-{safe}", &random[..8])
}

fn original_name(stored: &str) -> &str {
    let mut parts = stored.splitn(3, '-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(_), Some(name)) => name,
        _ => stored,
    }
}
