use crate::errors::{AppError, AppResult};
use crate::models::AttachmentRef;
use crate::transport::Transport;
use crate::vault::Vault;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

pub const ATTACHMENTS_DIR: &str = "attachments";
const UNNAMED: &str = "unnamed";

/// Reduces an untrusted filename to a single safe path component.
pub fn sanitize_attachment_name(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .replace("..", "");
    let replaced: String = base
        .chars()
        .map(|ch| {
            if ch.is_control() || matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
                '_'
            } else {
                ch
            }
        })
        .collect();
    let trimmed = replaced.trim_matches(|ch: char| matches!(ch, '.' | ' ' | '\t' | '\n' | '\r'));
    if trimmed.is_empty() {
        UNNAMED.to_string()
    } else {
        trimmed.to_string()
    }
}

/// True when `candidate` is exactly one normal component below `folder`.
fn is_direct_child(folder: &Path, candidate: &Path) -> bool {
    candidate.parent() == Some(folder)
        && matches!(
            candidate.file_name().map(Path::new).and_then(|name| name.components().next()),
            Some(Component::Normal(_))
        )
}

struct Fetched {
    position: usize,
    name: String,
    bytes: Vec<u8>,
}

/// Stores the attachments of one message and returns their embed strings.
pub struct AttachmentPipeline<'a, T: Transport> {
    transport: &'a T,
    vault: &'a Vault,
    timezone: Tz,
}

impl<'a, T: Transport> AttachmentPipeline<'a, T> {
    pub fn new(transport: &'a T, vault: &'a Vault, timezone: Tz) -> Self {
        Self {
            transport,
            vault,
            timezone,
        }
    }

    /// Fetches every reference first, then writes the successful ones into
    /// a fresh subfolder. Failed attachments are logged and omitted; the
    /// subfolder is only allocated when there is something to write.
    pub async fn store(
        &self,
        group_dir: &Path,
        fileid: &str,
        timestamp: DateTime<Utc>,
        refs: &[AttachmentRef],
    ) -> Vec<String> {
        let mut fetched = Vec::with_capacity(refs.len());
        for (position, reference) in refs.iter().enumerate() {
            let bytes = match reference {
                AttachmentRef::Inline { bytes, .. } => bytes.clone(),
                AttachmentRef::Remote { id, .. } => match self.transport.fetch_attachment(id).await {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        tracing::warn!(
                            attachment = %reference.filename(),
                            id = %id,
                            error = %error,
                            "attachment fetch failed; omitting"
                        );
                        continue;
                    }
                },
            };
            fetched.push(Fetched {
                position,
                name: sanitize_attachment_name(reference.filename()),
                bytes,
            });
        }

        if fetched.is_empty() {
            return Vec::new();
        }

        let folder_name = allocate_folder_name(group_dir, fileid, timestamp, self.timezone);
        let folder = group_dir.join(ATTACHMENTS_DIR).join(&folder_name);

        let mut embeds = Vec::with_capacity(fetched.len());
        for item in fetched {
            let filename = format!("{}_{}", item.position + 1, item.name);
            match self.write_one(&folder, &filename, item.bytes).await {
                Ok(()) => embeds.push(format!("![[{}/{}/{}]]", ATTACHMENTS_DIR, folder_name, filename)),
                Err(error) => tracing::warn!(
                    folder = %folder.to_string_lossy(),
                    attachment = %filename,
                    error = %error,
                    "attachment write failed; omitting"
                ),
            }
        }
        embeds
    }

    async fn write_one(&self, folder: &Path, filename: &str, bytes: Vec<u8>) -> AppResult<()> {
        let path = folder.join(filename);
        if !is_direct_child(folder, &path) {
            return Err(AppError::Io(format!(
                "attachment name {} escapes {}",
                filename,
                folder.to_string_lossy()
            )));
        }
        self.vault.write_attachment(path, bytes).await
    }
}

/// `<YYYYmmddHHMMSS>_<fileid>`, with a short random suffix when that
/// folder already exists.
fn allocate_folder_name(group_dir: &Path, fileid: &str, timestamp: DateTime<Utc>, timezone: Tz) -> String {
    let base = format!(
        "{}_{}",
        timestamp.with_timezone(&timezone).format("%Y%m%d%H%M%S"),
        fileid
    );
    let parent: PathBuf = group_dir.join(ATTACHMENTS_DIR);
    if !parent.join(&base).exists() {
        return base;
    }
    loop {
        let suffix = Uuid::new_v4().simple().to_string();
        let candidate = format!("{}_{}", base, &suffix[..8]);
        if !parent.join(&candidate).exists() {
            return candidate;
        }
    }
}
