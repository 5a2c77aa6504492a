use crate::errors::{AppError, AppResult};
use crate::naming::FilenameFormat;
use chrono::Duration;
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_TIMEZONE: &str = "Europe/Stockholm";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedPattern {
    pub name: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Markers {
    pub skip: String,
    pub append: String,
    pub command: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            skip: "--".to_string(),
            append: "++".to_string(),
            command: "#".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartupMessage {
    Off,
    #[default]
    #[serde(rename = "self")]
    OwnNumber,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub vault_path: PathBuf,
    pub signal_number: Option<String>,
    pub display_name: Option<String>,
    pub signal_cli_host: String,
    pub signal_cli_port: u16,
    pub timezone: String,
    pub append_window_minutes: u32,
    pub ignored_groups: BTreeSet<String>,
    pub whitelist_groups: BTreeSet<String>,
    pub plus_plus_enabled: bool,
    pub filename_format: FilenameFormat,
    pub markers: Markers,
    pub regex_patterns: Vec<NamedPattern>,
    pub responses: BTreeMap<String, String>,
    pub startup_message: StartupMessage,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vault_path: PathBuf::from("signal-vault"),
            signal_number: None,
            display_name: None,
            signal_cli_host: "127.0.0.1".to_string(),
            signal_cli_port: 7583,
            timezone: DEFAULT_TIMEZONE.to_string(),
            append_window_minutes: 30,
            ignored_groups: BTreeSet::new(),
            whitelist_groups: BTreeSet::new(),
            plus_plus_enabled: false,
            filename_format: FilenameFormat::Classic,
            markers: Markers::default(),
            regex_patterns: default_patterns(),
            responses: BTreeMap::new(),
            startup_message: StartupMessage::default(),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

fn default_patterns() -> Vec<NamedPattern> {
    [
        ("registration_number", r"[A-Za-z]{3}[0-9]{2}[A-Za-z0-9]"),
        ("phone_number", r"(\+46|0)[1-9][0-9]{7,8}"),
        ("personal_number", r"[0-9]{6}-?[0-9]{4}"),
    ]
    .into_iter()
    .map(|(name, pattern)| NamedPattern {
        name: name.to_string(),
        pattern: pattern.to_string(),
    })
    .collect()
}

impl Settings {
    /// Loads settings from a YAML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.to_string_lossy(), "config file not found; using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .map_err(|error| AppError::Config(format!("Failed to read {}: {}", path.to_string_lossy(), error)))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> AppResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings = serde_yaml::from_str(raw)?;
        Ok(settings)
    }
}

#[derive(Debug, Clone)]
pub struct LinkPattern {
    pub name: String,
    pub regex: Regex,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPolicy {
    pub ignored_groups: BTreeSet<String>,
    pub whitelisted_groups: BTreeSet<String>,
}

/// Immutable view of the settings handed to every pipeline stage for one
/// message. Built once per configuration change.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub vault_root: PathBuf,
    pub markers: Markers,
    pub append_marker_enabled: bool,
    pub append_window: Duration,
    pub filename_format: FilenameFormat,
    pub group_policy: GroupPolicy,
    pub link_patterns: Vec<LinkPattern>,
    pub timezone: Tz,
    pub responses: BTreeMap<String, String>,
}

impl ConfigSnapshot {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            vault_root: settings.vault_path.clone(),
            markers: settings.markers.clone(),
            append_marker_enabled: settings.plus_plus_enabled,
            append_window: Duration::minutes(i64::from(settings.append_window_minutes)),
            filename_format: settings.filename_format,
            group_policy: GroupPolicy {
                ignored_groups: settings.ignored_groups.clone(),
                whitelisted_groups: settings.whitelist_groups.clone(),
            },
            link_patterns: compile_patterns(&settings.regex_patterns),
            timezone: parse_timezone(&settings.timezone),
            responses: settings
                .responses
                .iter()
                .map(|(keyword, reply)| (keyword.to_lowercase(), reply.clone()))
                .collect(),
        }
    }
}

/// Compiles patterns in declaration order. Invalid ones are logged and dropped.
pub fn compile_patterns(patterns: &[NamedPattern]) -> Vec<LinkPattern> {
    patterns
        .iter()
        .filter_map(|entry| match Regex::new(&entry.pattern) {
            Ok(regex) => Some(LinkPattern {
                name: entry.name.clone(),
                regex,
            }),
            Err(error) => {
                tracing::warn!(pattern = %entry.name, error = %error, "skipping invalid link pattern");
                None
            }
        })
        .collect()
}

fn parse_timezone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(error) => {
            tracing::warn!(timezone = %name, error = %error, "invalid timezone; falling back to {}", DEFAULT_TIMEZONE);
            chrono_tz::Europe::Stockholm
        }
    }
}
