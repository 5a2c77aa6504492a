use crate::enrichment::EnrichedText;
use crate::models::{Envelope, Quote};
use crate::naming::timestamp_code;
use chrono::SecondsFormat;
use chrono_tz::Tz;
use serde::Serialize;

const UNKNOWN_SENDER: &str = "Unknown";

/// Variables handed to the template engine. The first six fields are always
/// set; the rest are omitted when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderContext {
    pub fileid: String,
    pub group_title: String,
    pub group_id: String,
    pub tnr: String,
    pub timestamp_iso: String,
    pub sender_display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_formatted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    /// Appending sender and time; only set for appends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
}

impl RenderContext {
    pub fn coordinates(&self) -> Option<(&str, &str)> {
        Some((self.lat.as_deref()?, self.lon.as_deref()?))
    }
}

/// `Name ([[+number]])`, or whichever part exists.
pub fn format_sender_display(name: Option<&str>, number: Option<&str>) -> String {
    let name = name.map(str::trim).filter(|value| !value.is_empty());
    let number = number
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| format!("[[{}]]", value));
    match (name, number) {
        (Some(name), Some(number)) => format!("{} ({})", name, number),
        (Some(name), None) => name.to_string(),
        (None, Some(number)) => number,
        (None, None) => UNKNOWN_SENDER.to_string(),
    }
}

pub fn format_quote(quote: &Quote) -> String {
    let author = format_sender_display(quote.quoted_author_name.as_deref(), quote.quoted_author_id.as_deref());
    let text = quote.text.as_deref().unwrap_or("...");
    std::iter::once(format!("> **Reply to {}:**", author))
        .chain(text.split('\n').map(|line| format!("> {}", line)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn base_context(envelope: &Envelope, fileid: &str, enriched: EnrichedText, attachments: Vec<String>, timezone: Tz) -> RenderContext {
    let local = envelope.timestamp.with_timezone(&timezone);
    let (lat, lon) = match enriched.coordinates {
        Some(coordinates) => (Some(coordinates.lat), Some(coordinates.lon)),
        None => (None, None),
    };
    RenderContext {
        fileid: fileid.to_string(),
        group_title: envelope.group_title_or_empty().to_string(),
        group_id: envelope.group_id.clone().unwrap_or_default(),
        tnr: timestamp_code(envelope.timestamp, timezone),
        timestamp_iso: local.to_rfc3339_opts(SecondsFormat::Secs, false),
        sender_display: format_sender_display(envelope.sender_name.as_deref(), envelope.source_id.as_deref()),
        sender_name: envelope.sender_name.clone(),
        sender_number: envelope.source_id.clone(),
        lat,
        lon,
        quote_formatted: None,
        message: enriched.text,
        attachments,
        attribution: None,
    }
}

/// Context for a new record.
pub fn build_report_context(
    envelope: &Envelope,
    fileid: &str,
    enriched: EnrichedText,
    attachments: Vec<String>,
    timezone: Tz,
) -> RenderContext {
    let mut context = base_context(envelope, fileid, enriched, attachments, timezone);
    context.quote_formatted = envelope.quote.as_ref().map(format_quote);
    context
}

/// Context for a block appended to an existing record. The attribution names
/// the appending sender, who may differ from the record's author.
pub fn build_append_context(
    envelope: &Envelope,
    fileid: &str,
    enriched: EnrichedText,
    attachments: Vec<String>,
    timezone: Tz,
) -> RenderContext {
    let mut context = base_context(envelope, fileid, enriched, attachments, timezone);
    context.attribution = Some(format!(
        "TNR: {} ({})\nSender: {}",
        context.tnr, context.timestamp_iso, context.sender_display
    ));
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::Coordinates;
    use chrono::{DateTime, Utc};
    use chrono_tz::Europe::Stockholm;

    fn envelope() -> Envelope {
        Envelope {
            source_id: Some("+46700000001".to_string()),
            sender_name: Some("Anna".to_string()),
            group_id: Some("group-alpha".to_string()),
            group_title: Some("Alpha".to_string()),
            timestamp: DateTime::parse_from_rfc3339("2025-07-01T09:05:00Z")
                .expect("timestamp")
                .with_timezone(&Utc),
            is_sync_echo: false,
            text: Some("Hello".to_string()),
            quote: None,
            attachment_refs: Vec::new(),
        }
    }

    #[test]
    fn sender_display_variants() {
        assert_eq!(format_sender_display(Some("Anna"), Some("+4670")), "Anna ([[+4670]])");
        assert_eq!(format_sender_display(None, Some("+4670")), "[[+4670]]");
        assert_eq!(format_sender_display(Some("Anna"), Some("  ")), "Anna");
        assert_eq!(format_sender_display(None, None), UNKNOWN_SENDER);
    }

    #[test]
    fn quote_block_prefixes_every_line() {
        let quote = Quote {
            quoted_author_id: Some("+4670".to_string()),
            quoted_author_name: Some("Bert".to_string()),
            quoted_timestamp: None,
            text: Some("one\ntwo".to_string()),
        };
        assert_eq!(format_quote(&quote), "> **Reply to Bert ([[+4670]]):**\n> one\n> two");
    }

    #[test]
    fn report_context_uses_local_time_and_omits_missing_fields() {
        let enriched = EnrichedText {
            text: Some("Hello".to_string()),
            coordinates: None,
        };
        let context = build_report_context(&envelope(), "011105-46700000001-Anna", enriched, Vec::new(), Stockholm);
        assert_eq!(context.tnr, "011105");
        assert_eq!(context.timestamp_iso, "2025-07-01T11:05:00+02:00");
        assert!(context.attribution.is_none());

        let value = serde_json::to_value(&context).expect("serialize");
        let object = value.as_object().expect("object");
        for key in ["fileid", "group_title", "group_id", "tnr", "timestamp_iso", "sender_display", "message"] {
            assert!(object.contains_key(key), "missing {}", key);
        }
        for key in ["lat", "lon", "quote_formatted", "attachments", "attribution"] {
            assert!(!object.contains_key(key), "unexpected {}", key);
        }
    }

    #[test]
    fn append_context_attributes_the_appending_sender() {
        let mut appender = envelope();
        appender.source_id = Some("+46700000002".to_string());
        appender.sender_name = Some("Bert".to_string());
        let enriched = EnrichedText {
            text: None,
            coordinates: Some(Coordinates {
                lat: "59.5".to_string(),
                lon: "17.7".to_string(),
            }),
        };
        let context = build_append_context(&appender, "011105-46700000002-Bert", enriched, Vec::new(), Stockholm);
        assert_eq!(
            context.attribution.as_deref(),
            Some("TNR: 011105 (2025-07-01T11:05:00+02:00)\nSender: Bert ([[+46700000002]])")
        );
        assert_eq!(context.coordinates(), Some(("59.5", "17.7")));
    }
}
