use crate::errors::{AppError, AppResult};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub quoted_author_id: Option<String>,
    pub quoted_author_name: Option<String>,
    pub quoted_timestamp: Option<DateTime<Utc>>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentRef {
    Inline { filename: String, bytes: Vec<u8> },
    Remote { id: String, filename: String },
}

impl AttachmentRef {
    pub fn filename(&self) -> &str {
        match self {
            Self::Inline { filename, .. } | Self::Remote { filename, .. } => filename,
        }
    }
}

/// One inbound message. Read-only after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub source_id: Option<String>,
    pub sender_name: Option<String>,
    pub group_id: Option<String>,
    pub group_title: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_sync_echo: bool,
    pub text: Option<String>,
    pub quote: Option<Quote>,
    pub attachment_refs: Vec<AttachmentRef>,
}

impl Envelope {
    /// Group title as used by policy comparisons; a missing title is empty.
    pub fn group_title_or_empty(&self) -> &str {
        self.group_title.as_deref().unwrap_or_default()
    }

    pub fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|text| !text.is_empty())
    }

    pub fn sender_key(&self) -> SenderKey {
        SenderKey {
            number: self.source_id.clone(),
            name: self.sender_name.clone(),
        }
    }

    /// Parses the `params` object of a signal-cli `receive` notification.
    pub fn from_receive_params(params: &Value) -> AppResult<Self> {
        let envelope = params
            .get("envelope")
            .filter(|value| value.is_object())
            .ok_or_else(|| AppError::Envelope("receive params carry no envelope".to_string()))?;

        let (message, is_sync_echo) = if let Some(data) = envelope.get("dataMessage").filter(|v| v.is_object()) {
            (data, false)
        } else if let Some(sent) = envelope
            .get("syncMessage")
            .and_then(|sync| sync.get("sentMessage"))
            .filter(|v| v.is_object())
        {
            (sent, true)
        } else {
            return Err(AppError::Envelope(
                "envelope has neither dataMessage nor syncMessage.sentMessage".to_string(),
            ));
        };

        let timestamp = envelope
            .get("timestamp")
            .or_else(|| message.get("timestamp"))
            .and_then(Value::as_i64)
            .and_then(millis_to_utc)
            .ok_or_else(|| {
                AppError::MalformedTimestamp(format!(
                    "envelope timestamp is missing or out of range: {}",
                    envelope.get("timestamp").cloned().unwrap_or(Value::Null)
                ))
            })?;

        let group = ["groupV2", "group", "groupInfo"]
            .iter()
            .find_map(|key| message.get(*key).filter(|v| v.is_object()));
        let group_title = group.and_then(|meta| first_string(meta, &["name", "title", "groupName"]));
        let group_id = group.and_then(|meta| first_string(meta, &["groupId", "id"]));

        let text = first_string(message, &["message", "body"]);
        let quote = message.get("quote").filter(|v| v.is_object()).map(parse_quote);
        let attachment_refs = message
            .get("attachments")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_attachment).collect())
            .unwrap_or_default();

        Ok(Self {
            source_id: first_string(envelope, &["sourceNumber", "source"]),
            sender_name: first_string(envelope, &["sourceName"]),
            group_id,
            group_title,
            timestamp,
            is_sync_echo,
            text,
            quote,
            attachment_refs,
        })
    }
}

pub fn millis_to_utc(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .find(|candidate| !candidate.is_empty())
}

fn parse_quote(value: &Value) -> Quote {
    Quote {
        quoted_author_id: first_string(value, &["authorNumber", "author"]),
        quoted_author_name: first_string(value, &["authorName"]),
        quoted_timestamp: value.get("id").and_then(Value::as_i64).and_then(millis_to_utc),
        text: first_string(value, &["text"]),
    }
}

fn parse_attachment(value: &Value) -> Option<AttachmentRef> {
    let id = first_string(value, &["id"]);
    let filename = first_string(value, &["filename"]).or_else(|| id.clone());
    let Some(filename) = filename else {
        tracing::warn!("attachment without id or filename; skipping");
        return None;
    };

    if let Some(data) = first_string(value, &["data"]) {
        match base64::engine::general_purpose::STANDARD.decode(data.as_bytes()) {
            Ok(bytes) => return Some(AttachmentRef::Inline { filename, bytes }),
            Err(error) => {
                tracing::warn!(filename = %filename, error = %error, "inline attachment data is not valid base64");
            }
        }
    }

    match id {
        Some(id) => Some(AttachmentRef::Remote { id, filename }),
        None => {
            tracing::warn!(filename = %filename, "attachment has no data and no id; skipping");
            None
        }
    }
}

/// Identity a record is looked up by: the sender's own, or a quoted author's.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderKey {
    pub number: Option<String>,
    pub name: Option<String>,
}

impl SenderKey {
    pub fn is_empty(&self) -> bool {
        self.number.as_deref().unwrap_or_default().is_empty() && self.name.as_deref().unwrap_or_default().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    SyncEcho,
    NotWhitelisted,
    IgnoredGroup,
    SkipMarker,
    EmptyCommand,
}

impl DiscardReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SyncEcho => "sync-echo",
            Self::NotWhitelisted => "not-whitelisted",
            Self::IgnoredGroup => "ignored-group",
            Self::SkipMarker => "skip-marker",
            Self::EmptyCommand => "empty-command",
        }
    }
}

/// Classifier output: exactly one per envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Discard(DiscardReason),
    Command { keyword: String },
    Append { target: PathBuf, text: Option<String> },
    New { text: Option<String> },
}
