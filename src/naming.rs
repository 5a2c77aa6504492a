use crate::models::SenderKey;
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;

const CODE_LEN: usize = 6;
const SEPARATOR: char = '-';
const RECORD_EXTENSION: &str = "md";
const UNKNOWN_SENDER: &str = "unknown";

/// On-disk presentation of a record's fileid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilenameFormat {
    /// `DDHHMM-number-name`, identical to the fileid.
    #[default]
    Classic,
    /// `DDHHMM`
    Tnr,
    /// `DDHHMM-name`, or `DDHHMM` when the sender has no name.
    TnrName,
}

/// Canonical record identity: a day/hour/minute code in the configured
/// timezone followed by the sanitised sender identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    pub code: String,
    pub identity: String,
    name: Option<String>,
}

impl FileIdentity {
    pub fn fileid(&self) -> String {
        format!("{}{}{}", self.code, SEPARATOR, self.identity)
    }

    /// Decodes a stored fileid. The sender name cannot be recovered, only the
    /// combined identity.
    pub fn parse(fileid: &str) -> Option<Self> {
        let (code, identity) = fileid.trim().split_once(SEPARATOR)?;
        if identity.is_empty() || decode_code(code).is_none() {
            return None;
        }
        Some(Self {
            code: code.to_string(),
            identity: identity.to_string(),
            name: None,
        })
    }

    pub fn matches(&self, key: &SenderKey) -> bool {
        let number = key
            .number
            .as_deref()
            .map(|value| sanitize_identity(value.trim_start_matches('+')))
            .filter(|value| !value.is_empty());
        let name = key
            .name
            .as_deref()
            .map(sanitize_identity)
            .filter(|value| !value.is_empty());

        match (number, name) {
            (Some(number), Some(name)) => self.identity == format!("{}{}{}", number, SEPARATOR, name),
            (Some(number), None) => {
                self.identity == number || self.identity.starts_with(&format!("{}{}", number, SEPARATOR))
            }
            (None, Some(name)) => {
                self.identity == name || self.identity.ends_with(&format!("{}{}", SEPARATOR, name))
            }
            (None, None) => false,
        }
    }

    /// Resolves the code to an absolute instant at or before `reference`,
    /// anchored on the reference's month in `tz` and rolling back one month
    /// when the anchored instant would lie in the future. A repeated local
    /// time prefers its later occurrence; a skipped one maps to the end of
    /// the gap.
    pub fn instant(&self, reference: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let (day, hour, minute) = decode_code(&self.code)?;
        let local = reference.with_timezone(&tz);
        let (year, month) = (local.year(), local.month());
        let previous = if month == 1 { (year - 1, 12) } else { (year, month - 1) };

        [(year, month), previous].into_iter().find_map(|(year, month)| {
            let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
            let candidates = match tz.from_local_datetime(&naive) {
                LocalResult::Single(at) => vec![at.with_timezone(&Utc)],
                LocalResult::Ambiguous(earliest, latest) => {
                    vec![latest.with_timezone(&Utc), earliest.with_timezone(&Utc)]
                }
                LocalResult::None => end_of_gap(naive, tz).into_iter().collect(),
            };
            candidates.into_iter().find(|candidate| *candidate <= reference)
        })
    }
}

const MAX_GAP_MINUTES: i64 = 180;

/// First existing local time after a skipped one.
fn end_of_gap(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    (1..=MAX_GAP_MINUTES)
        .find_map(|step| tz.from_local_datetime(&(naive + Duration::minutes(step))).earliest())
        .map(|at| at.with_timezone(&Utc))
}

fn decode_code(code: &str) -> Option<(u32, u32, u32)> {
    if code.len() != CODE_LEN || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let day: u32 = code[0..2].parse().ok()?;
    let hour: u32 = code[2..4].parse().ok()?;
    let minute: u32 = code[4..6].parse().ok()?;
    let valid = (1..=31).contains(&day) && hour <= 23 && minute <= 59;
    valid.then_some((day, hour, minute))
}

pub fn timestamp_code(timestamp: DateTime<Utc>, tz: Tz) -> String {
    timestamp.with_timezone(&tz).format("%d%H%M").to_string()
}

/// Keeps word characters, `-`, `_` and `.`; everything else becomes `_`.
pub fn sanitize_identity(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

pub fn compute_fileid(
    source_id: Option<&str>,
    sender_name: Option<&str>,
    timestamp: DateTime<Utc>,
    tz: Tz,
) -> FileIdentity {
    let number = source_id
        .map(|value| value.trim().trim_start_matches('+'))
        .filter(|value| !value.is_empty());
    let name = sender_name.map(str::trim).filter(|value| !value.is_empty());

    let parts: Vec<&str> = [number, name].into_iter().flatten().collect();
    let identity = if parts.is_empty() {
        UNKNOWN_SENDER.to_string()
    } else {
        sanitize_identity(&parts.join("-"))
    };

    FileIdentity {
        code: timestamp_code(timestamp, tz),
        identity,
        name: name.map(sanitize_identity),
    }
}

pub fn compute_filename(identity: &FileIdentity, format: FilenameFormat) -> String {
    let stem = match format {
        FilenameFormat::Classic => identity.fileid(),
        FilenameFormat::Tnr => identity.code.clone(),
        FilenameFormat::TnrName => match &identity.name {
            Some(name) => format!("{}{}{}", identity.code, SEPARATOR, name),
            None => identity.code.clone(),
        },
    };
    format!("{}.{}", stem, RECORD_EXTENSION)
}

/// Appends `-1`, `-2`, ... to the stem until the name is free in `directory`.
pub fn resolve_collision(directory: &Path, base_filename: &str) -> String {
    if !directory.join(base_filename).exists() {
        return base_filename.to_string();
    }
    let (stem, extension) = match base_filename.rsplit_once('.') {
        Some((stem, extension)) => (stem, format!(".{}", extension)),
        None => (base_filename, String::new()),
    };
    (1u32..)
        .map(|counter| format!("{}{}{}{}", stem, SEPARATOR, counter, extension))
        .find(|candidate| !directory.join(candidate).exists())
        .unwrap_or_else(|| base_filename.to_string())
}

/// Directory name for a group title. Characters outside word characters,
/// `-`, `_`, `.` and space are replaced; dot-only names are prefixed so they
/// cannot address a parent directory.
pub fn group_dir_name(group_title: &str) -> String {
    let mapped: String = group_title
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.' | ' ') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = mapped.trim();
    if cleaned.is_empty() {
        "unnamed-group".to_string()
    } else if cleaned.chars().all(|ch| ch == '.') {
        format!("_{}", cleaned)
    } else {
        cleaned.to_string()
    }
}

/// Legacy lookup for records without front-matter: the filename stem read as
/// a classic fileid, plus the same stem with a dedup suffix removed.
pub fn identities_from_filename(filename: &str) -> Vec<FileIdentity> {
    let Some(stem) = filename.strip_suffix(&format!(".{}", RECORD_EXTENSION)) else {
        return Vec::new();
    };
    let mut identities: Vec<FileIdentity> = FileIdentity::parse(stem).into_iter().collect();
    if let Some((base, suffix)) = stem.rsplit_once(SEPARATOR) {
        if suffix.bytes().all(|b| b.is_ascii_digit()) {
            identities.extend(FileIdentity::parse(base));
        }
    }
    identities
}

pub fn is_record_file(path: &Path) -> bool {
    path.extension().and_then(|value| value.to_str()) == Some(RECORD_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Stockholm;

    fn ts(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).expect("timestamp").with_timezone(&Utc)
    }

    #[test]
    fn fileid_uses_local_time_and_strips_plus() {
        let identity = compute_fileid(Some("+46700000001"), Some("Anna B"), ts("2025-12-26T13:27:00Z"), Stockholm);
        assert_eq!(identity.fileid(), "261427-46700000001-Anna_B");
    }

    #[test]
    fn fileid_is_independent_of_filename_format() {
        let timestamp = ts("2025-12-26T13:27:00Z");
        let first = compute_fileid(Some("+46700000001"), Some("Anna"), timestamp, Stockholm);
        for format in [FilenameFormat::Classic, FilenameFormat::Tnr, FilenameFormat::TnrName] {
            let _ = compute_filename(&first, format);
            let again = compute_fileid(Some("+46700000001"), Some("Anna"), timestamp, Stockholm);
            assert_eq!(again.fileid(), first.fileid());
        }
    }

    #[test]
    fn filename_variants() {
        let identity = compute_fileid(Some("+46700000001"), Some("Anna"), ts("2025-12-26T13:27:00Z"), Stockholm);
        assert_eq!(compute_filename(&identity, FilenameFormat::Classic), "261427-46700000001-Anna.md");
        assert_eq!(compute_filename(&identity, FilenameFormat::Tnr), "261427.md");
        assert_eq!(compute_filename(&identity, FilenameFormat::TnrName), "261427-Anna.md");

        let anonymous = compute_fileid(Some("+46700000001"), None, ts("2025-12-26T13:27:00Z"), Stockholm);
        assert_eq!(compute_filename(&anonymous, FilenameFormat::TnrName), "261427.md");
        let unknown = compute_fileid(None, None, ts("2025-12-26T13:27:00Z"), Stockholm);
        assert_eq!(unknown.fileid(), "261427-unknown");
    }

    #[test]
    fn collisions_get_numeric_suffixes() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(resolve_collision(dir.path(), "261427.md"), "261427.md");
        std::fs::write(dir.path().join("261427.md"), "x").expect("write");
        assert_eq!(resolve_collision(dir.path(), "261427.md"), "261427-1.md");
        std::fs::write(dir.path().join("261427-1.md"), "x").expect("write");
        assert_eq!(resolve_collision(dir.path(), "261427.md"), "261427-2.md");
    }

    #[test]
    fn parsed_identity_matches_sender_keys() {
        let identity = FileIdentity::parse("261427-46700000001-Anna").expect("parse");
        let full = SenderKey {
            number: Some("+46700000001".to_string()),
            name: Some("Anna".to_string()),
        };
        let number_only = SenderKey {
            number: Some("+46700000001".to_string()),
            name: None,
        };
        let other = SenderKey {
            number: Some("+46700000002".to_string()),
            name: Some("Anna".to_string()),
        };
        let prefix_number = SenderKey {
            number: Some("+4670000000".to_string()),
            name: None,
        };
        assert!(identity.matches(&full));
        assert!(identity.matches(&number_only));
        assert!(!identity.matches(&other));
        assert!(!identity.matches(&prefix_number));
        assert!(FileIdentity::parse("992427-x").is_none());
        assert!(FileIdentity::parse("not-a-fileid").is_none());
    }

    #[test]
    fn instant_rolls_back_across_month_boundary() {
        let identity = FileIdentity::parse("312350-1").expect("parse");
        let reference = ts("2025-11-01T00:05:00+01:00");
        let instant = identity.instant(reference, Stockholm).expect("instant");
        assert_eq!(instant, ts("2025-10-31T23:50:00+01:00"));

        let future = FileIdentity::parse("011000-1").expect("parse");
        let instant = future.instant(ts("2025-11-01T09:00:00+01:00"), Stockholm).expect("instant");
        assert_eq!(instant, ts("2025-10-01T10:00:00+02:00"));
    }

    #[test]
    fn repeated_hour_prefers_the_occurrence_before_reference() {
        // 2025-10-26 02:00-03:00 happens twice in Stockholm.
        let identity = FileIdentity::parse("260240-1").expect("parse");
        let after_fall_back = identity.instant(ts("2025-10-26T01:50:00Z"), Stockholm).expect("instant");
        assert_eq!(after_fall_back, ts("2025-10-26T01:40:00Z"));

        let before_fall_back = identity.instant(ts("2025-10-26T00:50:00Z"), Stockholm).expect("instant");
        assert_eq!(before_fall_back, ts("2025-10-26T00:40:00Z"));
    }

    #[test]
    fn skipped_hour_maps_to_end_of_gap() {
        // 2025-03-30 02:00-03:00 does not exist in Stockholm.
        let identity = FileIdentity::parse("300230-1").expect("parse");
        let instant = identity.instant(ts("2025-03-30T01:10:00Z"), Stockholm).expect("instant");
        assert_eq!(instant, ts("2025-03-30T01:00:00Z"));
    }

    #[test]
    fn group_dir_names_are_filesystem_safe() {
        assert_eq!(group_dir_name("Alpha Team"), "Alpha Team");
        assert_eq!(group_dir_name("a/b:c"), "a_b_c");
        assert_eq!(group_dir_name(".."), "_..");
        assert_eq!(group_dir_name("   "), "unnamed-group");
    }

    #[test]
    fn legacy_filenames_decode_with_dedup_suffix() {
        let key = SenderKey {
            number: Some("+46700000001".to_string()),
            name: Some("Anna".to_string()),
        };
        let identities = identities_from_filename("261427-46700000001-Anna-2.md");
        assert_eq!(identities.len(), 2);
        assert!(identities.iter().any(|identity| identity.matches(&key)));
        assert!(identities_from_filename("261427-46700000001-Anna.md")
            .iter()
            .any(|identity| identity.matches(&key)));
        assert!(identities_from_filename("notes.md").is_empty());
        assert!(identities_from_filename("261427-46700000001-Anna.txt").is_empty());
    }
}
