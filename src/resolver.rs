use crate::config::ConfigSnapshot;
use crate::errors::AppResult;
use crate::frontmatter::read_front_matter;
use crate::models::SenderKey;
use crate::naming::{identities_from_filename, is_record_file, FileIdentity};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use std::fs;
use std::path::{Path, PathBuf};

/// Finds the record a new message should be merged into.
#[derive(Debug, Clone)]
pub struct AppendResolver {
    window: Duration,
    timezone: Tz,
}

impl AppendResolver {
    pub fn new(window: Duration, timezone: Tz) -> Self {
        Self { window, timezone }
    }

    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        Self::new(snapshot.append_window, snapshot.timezone)
    }

    /// Most recently modified record in `group_dir` belonging to `target`
    /// and written within the window before `reference`.
    pub fn resolve(&self, group_dir: &Path, target: &SenderKey, reference: DateTime<Utc>) -> Option<PathBuf> {
        if target.is_empty() {
            return None;
        }
        let candidates = match list_candidates(group_dir) {
            Ok(candidates) => candidates,
            Err(error) => {
                tracing::debug!(dir = %group_dir.to_string_lossy(), error = %error, "no append candidates");
                return None;
            }
        };

        let found = candidates
            .into_iter()
            .find(|(path, modified)| self.is_match(path, *modified, target, reference))
            .map(|(path, _)| path);

        match &found {
            Some(path) => tracing::debug!(path = %path.to_string_lossy(), "resolved append target"),
            None => tracing::debug!(dir = %group_dir.to_string_lossy(), "no append target within window"),
        }
        found
    }

    /// True when `instant` lies in `[reference - window, reference]`.
    pub fn within_window(&self, instant: DateTime<Utc>, reference: DateTime<Utc>) -> bool {
        let age = reference - instant;
        age >= Duration::zero() && age <= self.window
    }

    fn is_match(&self, path: &Path, modified: DateTime<Utc>, target: &SenderKey, reference: DateTime<Utc>) -> bool {
        let stored = match read_front_matter(path) {
            Ok(front_matter) => front_matter
                .and_then(|front_matter| front_matter.fileid)
                .and_then(|fileid| FileIdentity::parse(&fileid)),
            Err(error) => {
                tracing::warn!(path = %path.to_string_lossy(), error = %error, "skipping unreadable record");
                return false;
            }
        };

        if let Some(identity) = stored {
            return identity.matches(target)
                && identity
                    .instant(reference, self.timezone)
                    .is_some_and(|instant| self.within_window(instant, reference));
        }

        let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        identities_from_filename(filename)
            .iter()
            .any(|identity| identity.matches(target))
            && (reference - modified).abs() <= self.window
    }
}

/// Record files in `dir`, newest modification first.
fn list_candidates(dir: &Path) -> AppResult<Vec<(PathBuf, DateTime<Utc>)>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !is_record_file(&path) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let modified: DateTime<Utc> = metadata.modified()?.into();
        candidates.push((path, modified));
    }
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
    Ok(candidates)
}
