//! Filesystem-backed [`Store`]: atomic write-with-backup, as the teacher's
//! `main.rs::atomic_copy` does for OPML imports, generalized to three
//! artifacts and a rotating set of timestamped backups.

use super::{unmarshal_state_map, StateMap, Store, StoreError, DEFAULT_ERROR_TEMPLATE};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct LocalStore {
    dir: PathBuf,
    backup_count: usize,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>, backup_count: usize) -> Self {
        Self {
            dir: dir.into(),
            backup_count,
        }
    }

    fn config_path(&self) -> PathBuf {
        self.dir.join("config.star")
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    fn error_template_path(&self) -> PathBuf {
        self.dir.join("error.tmpl")
    }

    /// Write `content` to `path` atomically: write to a sibling temp file,
    /// fsync, rename the prior file (if any) to a timestamped `.bak`, rename
    /// the temp file into place, then prune backups beyond `backup_count`.
    fn atomic_write(&self, path: &Path, content: &[u8]) -> Result<(), StoreError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let temp_path = parent.join(format!(
            ".{}.tmp.{}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("store"),
            std::process::id()
        ));

        {
            let mut temp_file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            temp_file.write_all(content)?;
            temp_file.sync_all()?;
        }

        if path.exists() {
            let ts = chrono::Utc::now().format("%Y%m%d%H%M%S");
            let backup_name = format!(
                "{}.{}.bak",
                path.file_name().and_then(|n| n.to_str()).unwrap_or("store"),
                ts
            );
            let backup_path = parent.join(backup_name);
            std::fs::rename(path, &backup_path)?;
        }

        std::fs::rename(&temp_path, path)?;
        self.prune_backups(parent, path)?;
        Ok(())
    }

    fn prune_backups(&self, dir: &Path, original: &Path) -> Result<(), StoreError> {
        let prefix = format!(
            "{}.",
            original.file_name().and_then(|n| n.to_str()).unwrap_or("store")
        );
        let mut backups: Vec<(std::time::SystemTime, PathBuf)> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .map(|n| n.starts_with(&prefix) && n.ends_with(".bak"))
                    .unwrap_or(false)
            })
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                let modified = meta.modified().ok()?;
                Some((modified, e.path()))
            })
            .collect();

        if backups.len() <= self.backup_count {
            return Ok(());
        }

        backups.sort_by_key(|(modified, _)| *modified);
        let excess = backups.len() - self.backup_count;
        for (_, path) in backups.into_iter().take(excess) {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }

    fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Store for LocalStore {
    async fn load_config(&self) -> Result<String, StoreError> {
        Ok(Self::read_optional(&self.config_path())?.unwrap_or_default())
    }

    async fn load_state(&self) -> Result<StateMap, StoreError> {
        match Self::read_optional(&self.state_path())? {
            Some(raw) => unmarshal_state_map(&raw),
            None => Ok(StateMap::new()),
        }
    }

    async fn load_error_template(&self) -> Result<String, StoreError> {
        Ok(Self::read_optional(&self.error_template_path())?
            .unwrap_or_else(|| DEFAULT_ERROR_TEMPLATE.to_string()))
    }

    async fn save_config(&self, source: &str) -> Result<(), StoreError> {
        self.atomic_write(&self.config_path(), source.as_bytes())
    }

    async fn save_state(&self, state: &StateMap) -> Result<(), StoreError> {
        let raw = super::marshal_state_map(state)?;
        self.atomic_write(&self.state_path(), raw.as_bytes())
    }

    async fn save_state_json(&self, raw: &str) -> Result<(), StoreError> {
        // Validate round-trip before writing so a malformed PUT never
        // corrupts the on-disk state.
        let parsed = unmarshal_state_map(raw)?;
        self.save_state(&parsed).await
    }

    async fn save_error_template(&self, template: &str) -> Result<(), StoreError> {
        self.atomic_write(&self.error_template_path(), template.as_bytes())
    }
}
