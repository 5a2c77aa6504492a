use crate::attachments::AttachmentPipeline;
use crate::classifier::Classifier;
use crate::config::ConfigSnapshot;
use crate::context::{build_append_context, build_report_context};
use crate::enrichment::enrich;
use crate::errors::{AppError, AppResult};
use crate::models::{DiscardReason, Disposition, Envelope};
use crate::naming::{compute_fileid, compute_filename, group_dir_name, resolve_collision};
use crate::template::{MarkdownTemplates, TemplateEngine, TemplateKind};
use crate::transport::Transport;
use crate::vault::{RecordWrite, Vault, WriteMode};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoGroup,
    NoContent,
    EmptyAppend,
}

/// What processing one envelope did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Discarded(DiscardReason),
    Command { keyword: String, replied: bool },
    Created(PathBuf),
    Appended(PathBuf),
    Skipped(SkipReason),
}

pub struct MessageProcessor<T: Transport, E: TemplateEngine = MarkdownTemplates> {
    snapshot: Arc<ConfigSnapshot>,
    transport: Arc<T>,
    vault: Vault,
    templates: E,
}

impl<T: Transport> MessageProcessor<T> {
    pub fn new(snapshot: Arc<ConfigSnapshot>, transport: Arc<T>) -> Self {
        Self::with_templates(snapshot, transport, MarkdownTemplates)
    }
}

impl<T: Transport, E: TemplateEngine> MessageProcessor<T, E> {
    pub fn with_templates(snapshot: Arc<ConfigSnapshot>, transport: Arc<T>, templates: E) -> Self {
        let vault = Vault::new(snapshot.vault_root.clone());
        Self {
            snapshot,
            transport,
            vault,
            templates,
        }
    }

    /// Classifies the envelope and carries out its disposition. Errors are
    /// write failures for this message only.
    pub async fn process(&self, envelope: &Envelope) -> AppResult<Outcome> {
        let disposition = Classifier::new(&self.snapshot).classify(envelope);
        match disposition {
            Disposition::Discard(reason) => {
                tracing::info!(reason = reason.as_str(), group = %envelope.group_title_or_empty(), "discarded envelope");
                Ok(Outcome::Discarded(reason))
            }
            Disposition::Command { keyword } => Ok(self.handle_command(envelope, keyword).await),
            Disposition::Append { target, text } => self.append(envelope, target, text).await,
            Disposition::New { text } => self.create(envelope, text).await,
        }
    }

    async fn handle_command(&self, envelope: &Envelope, keyword: String) -> Outcome {
        let Some(response) = self.snapshot.responses.get(&keyword) else {
            tracing::info!(keyword = %keyword, "no response configured for command");
            return Outcome::Command { keyword, replied: false };
        };
        let Some(group_id) = envelope.group_id.as_deref() else {
            tracing::info!(keyword = %keyword, "command outside a group; not replying");
            return Outcome::Command { keyword, replied: false };
        };

        let replied = match self.transport.send_group_message(group_id, response).await {
            Ok(()) => {
                tracing::info!(keyword = %keyword, group = %envelope.group_title_or_empty(), "sent command reply");
                true
            }
            Err(error) => {
                tracing::warn!(keyword = %keyword, error = %error, "command reply failed");
                false
            }
        };
        Outcome::Command { keyword, replied }
    }

    async fn append(&self, envelope: &Envelope, target: PathBuf, text: Option<String>) -> AppResult<Outcome> {
        let snapshot = &self.snapshot;
        let enriched = enrich(text.as_deref(), &snapshot.link_patterns);
        let identity = compute_fileid(
            envelope.source_id.as_deref(),
            envelope.sender_name.as_deref(),
            envelope.timestamp,
            snapshot.timezone,
        );
        let fileid = identity.fileid();
        let group_dir = target.parent().unwrap_or(snapshot.vault_root.as_path()).to_path_buf();

        let attachments = AttachmentPipeline::new(self.transport.as_ref(), &self.vault, snapshot.timezone)
            .store(&group_dir, &fileid, envelope.timestamp, &envelope.attachment_refs)
            .await;

        if enriched.text.is_none() && enriched.coordinates.is_none() && attachments.is_empty() {
            tracing::info!(path = %target.to_string_lossy(), "nothing to append");
            return Ok(Outcome::Skipped(SkipReason::EmptyAppend));
        }

        let location = enriched.coordinates.as_ref().map(|coordinates| coordinates.front_matter_value());
        let context = build_append_context(envelope, &fileid, enriched, attachments, snapshot.timezone);
        let body = self.templates.render(TemplateKind::Append, &context)?;

        self.write(
            envelope,
            RecordWrite {
                path: target.clone(),
                mode: WriteMode::Append,
                body,
                location,
            },
        )
        .await?;
        tracing::info!(path = %target.to_string_lossy(), "appended to record");
        Ok(Outcome::Appended(target))
    }

    async fn create(&self, envelope: &Envelope, text: Option<String>) -> AppResult<Outcome> {
        let snapshot = &self.snapshot;
        let title = envelope.group_title_or_empty();
        if title.is_empty() {
            tracing::info!("message without a group; not archived");
            return Ok(Outcome::Skipped(SkipReason::NoGroup));
        }
        let has_text = text.as_deref().is_some_and(|value| !value.trim().is_empty());
        if !has_text && envelope.attachment_refs.is_empty() {
            tracing::info!(group = %title, "message has no text and no attachments");
            return Ok(Outcome::Skipped(SkipReason::NoContent));
        }

        let group_dir = snapshot.vault_root.join(group_dir_name(title));
        let identity = compute_fileid(
            envelope.source_id.as_deref(),
            envelope.sender_name.as_deref(),
            envelope.timestamp,
            snapshot.timezone,
        );
        let fileid = identity.fileid();
        let enriched = enrich(text.as_deref(), &snapshot.link_patterns);

        let attachments = AttachmentPipeline::new(self.transport.as_ref(), &self.vault, snapshot.timezone)
            .store(&group_dir, &fileid, envelope.timestamp, &envelope.attachment_refs)
            .await;

        let context = build_report_context(envelope, &fileid, enriched, attachments, snapshot.timezone);
        let body = self.templates.render(TemplateKind::Report, &context)?;

        let path = allocate_record_path(&group_dir, &compute_filename(&identity, snapshot.filename_format));
        self.write(
            envelope,
            RecordWrite {
                path: path.clone(),
                mode: WriteMode::Create,
                body,
                location: None,
            },
        )
        .await?;
        tracing::info!(path = %path.to_string_lossy(), fileid = %fileid, "wrote record");
        Ok(Outcome::Created(path))
    }

    async fn write(&self, envelope: &Envelope, request: RecordWrite) -> AppResult<()> {
        let path = request.path.clone();
        self.vault.write_record(request).await.map_err(|error| {
            tracing::error!(
                path = %path.to_string_lossy(),
                group = %envelope.group_title_or_empty(),
                sender = %envelope.source_id.as_deref().unwrap_or_default(),
                sender_name = %envelope.sender_name.as_deref().unwrap_or_default(),
                timestamp = %envelope.timestamp.to_rfc3339(),
                error = %error,
                "record write failed"
            );
            match error {
                AppError::Io(_) => error,
                other => AppError::Io(other.to_string()),
            }
        })
    }
}

fn allocate_record_path(group_dir: &Path, base_filename: &str) -> PathBuf {
    group_dir.join(resolve_collision(group_dir, base_filename))
}
