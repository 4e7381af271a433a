use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::preview::DEFAULT_PREVIEW_WORDS;
use crate::search::SortKey;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "NexoNotes";
const APP_NAME: &str = "nexonotes";

pub const CONFIG_ENV: &str = "NEXONOTES_CONFIG";
pub const DATA_ENV: &str = "NEXONOTES_DATA";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub blob_dir: PathBuf,
    pub export_dir: PathBuf,
    pub state_dir: PathBuf,
    pub session_file: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let override_data = env::var(DATA_ENV).ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));

        Ok(Self::rooted(config_dir, config_file, data_root, state_dir))
    }

    /// Everything below a single directory; used by tests and `--data-dir`.
    pub fn under(root: &Path) -> Self {
        let config_dir = root.join("config");
        let config_file = config_dir.join("config.toml");
        Self::rooted(config_dir, config_file, root.join("data"), root.join("state"))
    }

    fn rooted(config_dir: PathBuf, config_file: PathBuf, data_dir: PathBuf, state_dir: PathBuf) -> Self {
        Self {
            config_dir,
            config_file,
            database_path: data_dir.join("notes.db"),
            blob_dir: data_dir.join("blobs"),
            export_dir: data_dir.join("exports"),
            session_file: state_dir.join("session.json"),
            data_dir,
            state_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.blob_dir,
            &self.export_dir,
            &self.state_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub default_sort: SortKey,
    /// Words kept in list previews.
    pub preview_words: usize,
    pub editor: EditorConfig,
    pub uploads: UploadConfig,
    pub storage: StorageOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_sort: SortKey::Updated,
            preview_words: DEFAULT_PREVIEW_WORDS,
            editor: EditorConfig::default(),
            uploads: UploadConfig::default(),
            storage: StorageOptions::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        self.editor.sanitize();
        if self.preview_words == 0 {
            tracing::warn!("preview_words must be positive, using the default");
            self.preview_words = DEFAULT_PREVIEW_WORDS;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Smallest width an image can be resized to, in pixels.
    pub min_image_width: u32,
    /// Width of the editing area; images never grow past it.
    pub content_width: u32,
    pub history_limit: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            min_image_width: 50,
            content_width: 800,
            history_limit: 200,
        }
    }
}

impl EditorConfig {
    fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.content_width == 0 {
            tracing::warn!("editor.content_width must be positive, using the default");
            self.content_width = defaults.content_width;
        }
        if self.min_image_width == 0 || self.min_image_width > self.content_width {
            tracing::warn!(
                min_image_width = self.min_image_width,
                content_width = self.content_width,
                "editor.min_image_width out of range, clamping"
            );
            self.min_image_width = defaults.min_image_width.min(self.content_width);
        }
        if self.history_limit == 0 {
            self.history_limit = defaults.history_limit;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_size: u64,
    /// Accepted MIME types; empty accepts anything.
    pub allowed_types: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            allowed_types: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    #[serde(skip)]
    pub blob_dir: PathBuf,
    #[serde(skip)]
    pub session_file: PathBuf,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            blob_dir: PathBuf::new(),
            session_file: PathBuf::new(),
            wal_autocheckpoint: 1000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        if self.blob_dir.as_os_str().is_empty() {
            self.blob_dir = paths.blob_dir.clone();
        }
        if self.session_file.as_os_str().is_empty() {
            self.session_file = paths.session_file.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn first_run_writes_defaults() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let loader = ConfigLoader::with_paths(ConfigPaths::under(temp.path()));
        let cfg = loader.load_or_init()?;
        assert!(loader.paths().config_file.exists());
        assert_eq!(cfg.editor, EditorConfig::default());
        assert_eq!(cfg.uploads.max_file_size, 10 * 1024 * 1024);
        assert_eq!(cfg.storage.database_path, loader.paths().database_path);

        let reloaded = loader.load()?;
        assert_eq!(reloaded.default_sort, SortKey::Updated);
        assert_eq!(reloaded.preview_words, DEFAULT_PREVIEW_WORDS);
        Ok(())
    }

    #[test]
    fn partial_file_keeps_other_defaults() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::under(temp.path());
        paths.ensure_directories()?;
        fs::write(
            &paths.config_file,
            "default_sort = \"title\"\n[editor]\ncontent_width = 640\n",
        )?;
        let cfg = ConfigLoader::with_paths(paths).load()?;
        assert_eq!(cfg.default_sort, SortKey::Title);
        assert_eq!(cfg.editor.content_width, 640);
        assert_eq!(cfg.editor.min_image_width, 50);
        assert_eq!(cfg.storage.wal_autocheckpoint, 1000);
        Ok(())
    }

    #[test]
    fn oversized_minimum_width_is_clamped() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::under(temp.path());
        paths.ensure_directories()?;
        fs::write(
            &paths.config_file,
            "[editor]\nmin_image_width = 900\ncontent_width = 600\n",
        )?;
        let cfg = ConfigLoader::with_paths(paths).load()?;
        assert_eq!(cfg.editor.min_image_width, 50);
        assert_eq!(cfg.editor.content_width, 600);
        Ok(())
    }
}
