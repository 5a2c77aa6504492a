use crate::config::ConfigSnapshot;
use crate::models::{DiscardReason, Disposition, Envelope, Quote, SenderKey};
use crate::naming::group_dir_name;
use crate::resolver::AppendResolver;
use std::path::PathBuf;

/// Ordered, short-circuiting policy chain deciding what happens to an
/// envelope. The order of the checks is fixed.
#[derive(Debug, Clone)]
pub struct Classifier<'a> {
    snapshot: &'a ConfigSnapshot,
    resolver: AppendResolver,
}

impl<'a> Classifier<'a> {
    pub fn new(snapshot: &'a ConfigSnapshot) -> Self {
        Self {
            snapshot,
            resolver: AppendResolver::from_snapshot(snapshot),
        }
    }

    pub fn classify(&self, envelope: &Envelope) -> Disposition {
        if let Some(reason) = self.policy_discard(envelope) {
            return Disposition::Discard(reason);
        }

        let markers = &self.snapshot.markers;
        let text = envelope.trimmed_text();
        let marker_append = self.snapshot.append_marker_enabled
            && !markers.append.is_empty()
            && text.is_some_and(|value| value.starts_with(markers.append.as_str()));
        let text = if marker_append {
            text.map(|value| value[markers.append.len()..].trim())
                .filter(|value| !value.is_empty())
        } else {
            text
        };

        if marker_append || envelope.quote.is_some() {
            if let Some(target) = self.resolve_append_target(envelope, marker_append) {
                return Disposition::Append {
                    target,
                    text: text.map(str::to_string),
                };
            }
            tracing::info!(
                group = %envelope.group_title_or_empty(),
                marker = marker_append,
                "append target not found; continuing as a new message"
            );
        }

        if let Some(command) = text.and_then(|value| value.strip_prefix(markers.command.as_str())) {
            if markers.command.is_empty() {
                return Disposition::New {
                    text: text.map(str::to_string),
                };
            }
            let keyword = command
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_lowercase();
            if keyword.is_empty() {
                return Disposition::Discard(DiscardReason::EmptyCommand);
            }
            return Disposition::Command { keyword };
        }

        Disposition::New {
            text: text.map(str::to_string),
        }
    }

    fn policy_discard(&self, envelope: &Envelope) -> Option<DiscardReason> {
        if envelope.is_sync_echo {
            return Some(DiscardReason::SyncEcho);
        }

        let policy = &self.snapshot.group_policy;
        let title = envelope.group_title_or_empty();
        if !policy.whitelisted_groups.is_empty() {
            if !policy.whitelisted_groups.contains(title) {
                return Some(DiscardReason::NotWhitelisted);
            }
        } else if policy.ignored_groups.contains(title) {
            return Some(DiscardReason::IgnoredGroup);
        }

        let skip = &self.snapshot.markers.skip;
        if !skip.is_empty()
            && envelope
                .trimmed_text()
                .is_some_and(|value| value.starts_with(skip.as_str()))
        {
            return Some(DiscardReason::SkipMarker);
        }

        None
    }

    /// Quoted author first, then the sender's own records for a marker append.
    /// A quote only counts when the quoted message is itself within the window.
    fn resolve_append_target(&self, envelope: &Envelope, marker_append: bool) -> Option<PathBuf> {
        let title = envelope.group_title_or_empty();
        if title.is_empty() {
            tracing::info!("cannot append outside a group");
            return None;
        }
        let group_dir = self.snapshot.vault_root.join(group_dir_name(title));

        let quoted_author = envelope
            .quote
            .as_ref()
            .filter(|quote| self.is_recent_quote(quote, envelope))
            .and_then(|quote| quote.quoted_author_id.clone())
            .map(|number| SenderKey {
                number: Some(number),
                name: None,
            });
        let sender = marker_append.then(|| envelope.sender_key());

        quoted_author
            .into_iter()
            .chain(sender)
            .find_map(|target| self.resolver.resolve(&group_dir, &target, envelope.timestamp))
    }

    fn is_recent_quote(&self, quote: &Quote, envelope: &Envelope) -> bool {
        let recent = quote
            .quoted_timestamp
            .is_some_and(|quoted| self.resolver.within_window(quoted, envelope.timestamp));
        if !recent {
            tracing::debug!(quoted = ?quote.quoted_timestamp, "quoted message is outside the append window");
        }
        recent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use chrono::{DateTime, Utc};
    use std::fs;

    fn ts(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).expect("timestamp").with_timezone(&Utc)
    }

    fn envelope(text: &str) -> Envelope {
        Envelope {
            source_id: Some("+46700000001".to_string()),
            sender_name: Some("Anna".to_string()),
            group_id: Some("group-alpha".to_string()),
            group_title: Some("Alpha".to_string()),
            timestamp: ts("2025-12-26T14:10:00+01:00"),
            is_sync_echo: false,
            text: Some(text.to_string()),
            quote: None,
            attachment_refs: Vec::new(),
        }
    }

    fn snapshot(vault: &std::path::Path, adjust: impl FnOnce(&mut Settings)) -> ConfigSnapshot {
        let mut settings = Settings {
            vault_path: vault.to_path_buf(),
            plus_plus_enabled: true,
            ..Settings::default()
        };
        adjust(&mut settings);
        ConfigSnapshot::from_settings(&settings)
    }

    fn seed_record(vault: &std::path::Path) -> PathBuf {
        let dir = vault.join("Alpha");
        fs::create_dir_all(&dir).expect("group dir");
        let path = dir.join("261400-46700000001-Anna.md");
        fs::write(&path, "---\nfileid: 261400-46700000001-Anna\n---\n\nfirst\n").expect("record");
        path
    }

    #[test]
    fn sync_echo_wins_over_whitelist() {
        let vault = tempfile::tempdir().expect("vault");
        let snapshot = snapshot(vault.path(), |s| {
            s.whitelist_groups.insert("Alpha".to_string());
        });
        let mut echo = envelope("Hello");
        echo.is_sync_echo = true;
        assert_eq!(
            Classifier::new(&snapshot).classify(&echo),
            Disposition::Discard(DiscardReason::SyncEcho)
        );
    }

    #[test]
    fn whitelist_takes_precedence_over_ignore_list() {
        let vault = tempfile::tempdir().expect("vault");
        let snapshot = snapshot(vault.path(), |s| {
            s.whitelist_groups.insert("Alpha".to_string());
            s.ignored_groups.insert("Alpha".to_string());
        });
        let classifier = Classifier::new(&snapshot);
        assert_eq!(
            classifier.classify(&envelope("Hello")),
            Disposition::New {
                text: Some("Hello".to_string())
            }
        );

        let mut other = envelope("Hello");
        other.group_title = Some("Beta".to_string());
        assert_eq!(
            classifier.classify(&other),
            Disposition::Discard(DiscardReason::NotWhitelisted)
        );
    }

    #[test]
    fn ignored_group_and_missing_title() {
        let vault = tempfile::tempdir().expect("vault");
        let snapshot = snapshot(vault.path(), |s| {
            s.ignored_groups.insert("Alpha".to_string());
        });
        assert_eq!(
            Classifier::new(&snapshot).classify(&envelope("Hello")),
            Disposition::Discard(DiscardReason::IgnoredGroup)
        );

        let whitelisted = self::snapshot(vault.path(), |s| {
            s.whitelist_groups.insert("Alpha".to_string());
        });
        let mut untitled = envelope("Hello");
        untitled.group_title = None;
        assert_eq!(
            Classifier::new(&whitelisted).classify(&untitled),
            Disposition::Discard(DiscardReason::NotWhitelisted)
        );
    }

    #[test]
    fn skip_marker_discards_before_commands() {
        let vault = tempfile::tempdir().expect("vault");
        let snapshot = snapshot(vault.path(), |_| {});
        assert_eq!(
            Classifier::new(&snapshot).classify(&envelope("  --off the record")),
            Disposition::Discard(DiscardReason::SkipMarker)
        );
    }

    #[test]
    fn command_keyword_is_lowercased_first_token() {
        let vault = tempfile::tempdir().expect("vault");
        let snapshot = snapshot(vault.path(), |_| {});
        let classifier = Classifier::new(&snapshot);
        assert_eq!(
            classifier.classify(&envelope("#Help me please")),
            Disposition::Command {
                keyword: "help".to_string()
            }
        );
        assert_eq!(
            classifier.classify(&envelope("#")),
            Disposition::Discard(DiscardReason::EmptyCommand)
        );
    }

    #[test]
    fn marker_append_resolves_sender_record() {
        let vault = tempfile::tempdir().expect("vault");
        let target = seed_record(vault.path());
        let snapshot = snapshot(vault.path(), |_| {});
        assert_eq!(
            Classifier::new(&snapshot).classify(&envelope("++more info")),
            Disposition::Append {
                target,
                text: Some("more info".to_string())
            }
        );
    }

    #[test]
    fn marker_append_is_plain_text_when_disabled() {
        let vault = tempfile::tempdir().expect("vault");
        seed_record(vault.path());
        let snapshot = snapshot(vault.path(), |s| s.plus_plus_enabled = false);
        assert_eq!(
            Classifier::new(&snapshot).classify(&envelope("++more info")),
            Disposition::New {
                text: Some("++more info".to_string())
            }
        );
    }

    #[test]
    fn failed_marker_append_falls_through_with_marker_stripped() {
        let vault = tempfile::tempdir().expect("vault");
        let snapshot = snapshot(vault.path(), |_| {});
        let classifier = Classifier::new(&snapshot);
        assert_eq!(
            classifier.classify(&envelope("++more info")),
            Disposition::New {
                text: Some("more info".to_string())
            }
        );
        assert_eq!(
            classifier.classify(&envelope("++#help")),
            Disposition::Command {
                keyword: "help".to_string()
            }
        );
    }

    #[test]
    fn quote_appends_to_quoted_author_record() {
        let vault = tempfile::tempdir().expect("vault");
        let target = seed_record(vault.path());
        let snapshot = snapshot(vault.path(), |_| {});

        let mut reply = envelope("Agreed");
        reply.source_id = Some("+46700000002".to_string());
        reply.sender_name = Some("Bert".to_string());
        reply.quote = Some(Quote {
            quoted_author_id: Some("+46700000001".to_string()),
            quoted_author_name: None,
            quoted_timestamp: Some(ts("2025-12-26T14:00:00+01:00")),
            text: Some("first".to_string()),
        });
        assert_eq!(
            Classifier::new(&snapshot).classify(&reply),
            Disposition::Append {
                target,
                text: Some("Agreed".to_string())
            }
        );
    }

    fn reply_from_bert(quoted_at: &str) -> Envelope {
        let mut reply = envelope("Agreed");
        reply.source_id = Some("+46700000002".to_string());
        reply.sender_name = Some("Bert".to_string());
        reply.quote = Some(Quote {
            quoted_author_id: Some("+46700000001".to_string()),
            quoted_author_name: None,
            quoted_timestamp: Some(ts(quoted_at)),
            text: Some("old news".to_string()),
        });
        reply
    }

    #[test]
    fn reply_to_stale_message_is_not_an_append() {
        let vault = tempfile::tempdir().expect("vault");
        seed_record(vault.path());
        let snapshot = snapshot(vault.path(), |_| {});
        assert_eq!(
            Classifier::new(&snapshot).classify(&reply_from_bert("2025-12-26T11:00:00+01:00")),
            Disposition::New {
                text: Some("Agreed".to_string())
            }
        );
    }

    #[test]
    fn reply_without_target_record_falls_through_to_new() {
        let vault = tempfile::tempdir().expect("vault");
        let snapshot = snapshot(vault.path(), |_| {});
        assert_eq!(
            Classifier::new(&snapshot).classify(&reply_from_bert("2025-12-26T14:00:00+01:00")),
            Disposition::New {
                text: Some("Agreed".to_string())
            }
        );
    }
}
