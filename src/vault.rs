use crate::errors::{AppError, AppResult};
use crate::frontmatter::with_location;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// In-process lock registry keyed by resolved path.
#[derive(Clone, Default)]
pub struct PathLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, entry| Arc::strong_count(entry) > 1);
            locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Append,
}

/// A rendered record ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordWrite {
    pub path: PathBuf,
    pub mode: WriteMode,
    pub body: String,
    /// Added to the target's front-matter `locations` on append.
    pub location: Option<String>,
}

/// Writes records and attachment bytes under the vault root. Every write
/// goes through a temp file in the destination directory and is renamed into
/// place, so a failed write leaves no partial file.
#[derive(Clone)]
pub struct Vault {
    root: PathBuf,
    locks: PathLocks,
}

impl Vault {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            locks: PathLocks::new(),
        }
    }

    fn ensure_inside(&self, path: &Path) -> AppResult<()> {
        if path.starts_with(&self.root) {
            return Ok(());
        }
        Err(AppError::Io(format!(
            "{} is outside the vault {}",
            path.to_string_lossy(),
            self.root.to_string_lossy()
        )))
    }

    pub async fn write_record(&self, request: RecordWrite) -> AppResult<()> {
        self.ensure_inside(&request.path)?;
        let _guard = self.locks.acquire(&request.path).await;
        tokio::task::spawn_blocking(move || match request.mode {
            WriteMode::Create => create_file(&request.path, request.body.as_bytes()),
            WriteMode::Append => append_record(&request.path, &request.body, request.location.as_deref()),
        })
        .await
        .map_err(|error| AppError::Internal(format!("record writer task failed: {}", error)))?
    }

    pub async fn write_attachment(&self, path: PathBuf, bytes: Vec<u8>) -> AppResult<()> {
        self.ensure_inside(&path)?;
        let _guard = self.locks.acquire(&path).await;
        tokio::task::spawn_blocking(move || create_file(&path, &bytes))
            .await
            .map_err(|error| AppError::Internal(format!("attachment writer task failed: {}", error)))?
    }
}

fn temp_in(path: &Path) -> AppResult<NamedTempFile> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::Io(format!("{} has no parent directory", path.to_string_lossy())))?;
    fs::create_dir_all(parent)?;
    Ok(NamedTempFile::new_in(parent)?)
}

/// Creates `path`; fails if it already exists.
fn create_file(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let mut temp = temp_in(path)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist_noclobber(path)
        .map_err(|error| AppError::Io(format!("Failed to create {}: {}", path.to_string_lossy(), error)))?;
    Ok(())
}

fn append_record(path: &Path, addition: &str, location: Option<&str>) -> AppResult<()> {
    let existing = fs::read_to_string(path)
        .map_err(|error| AppError::Io(format!("Failed to read {}: {}", path.to_string_lossy(), error)))?;
    let mut content = match location {
        Some(location) => with_location(&existing, location)?,
        None => existing,
    };
    content.push_str(addition);

    let mut temp = temp_in(path)?;
    temp.write_all(content.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|error| AppError::Io(format!("Failed to replace {}: {}", path.to_string_lossy(), error)))?;
    Ok(())
}
