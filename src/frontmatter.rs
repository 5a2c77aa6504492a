use crate::errors::{AppError, AppResult};
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const DELIMITER: &str = "---";
const HEAD_BYTES: u64 = 4096;

/// The fixed front-matter schema of a record file. Unknown keys are ignored
/// when reading and preserved when a location is added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrontMatter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fileid: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<String>,
}

impl FrontMatter {
    /// Returns `None` when `content` has no delimited front-matter block.
    pub fn parse(content: &str) -> Option<Self> {
        let (block, _) = split_block(content)?;
        let mut front_matter = Self::default();
        let mut in_locations = false;

        for line in block.lines() {
            let trimmed = line.trim();
            if in_locations && trimmed.starts_with('-') {
                let item = unquote(trimmed[1..].trim());
                if !item.is_empty() {
                    front_matter.locations.push(item.to_string());
                }
                continue;
            }
            in_locations = false;

            if line.starts_with(char::is_whitespace) {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "fileid" => {
                    let fileid = unquote(value);
                    if !fileid.is_empty() {
                        front_matter.fileid = Some(fileid.to_string());
                    }
                }
                "locations" => {
                    if value.is_empty() {
                        in_locations = true;
                    } else if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
                        front_matter.locations.extend(
                            inner
                                .split(", ")
                                .map(|item| unquote(item.trim()))
                                .filter(|item| !item.is_empty())
                                .map(str::to_string),
                        );
                    } else {
                        front_matter.locations.push(unquote(value).to_string());
                    }
                }
                _ => {}
            }
        }

        Some(front_matter)
    }

    /// Renders the block including both delimiter lines.
    pub fn render(&self) -> AppResult<String> {
        let yaml = serde_yaml::to_string(self).map_err(|error| AppError::Template(error.to_string()))?;
        Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n"))
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote).and_then(|v| v.strip_suffix(quote)) {
            return inner;
        }
    }
    value
}

/// Splits into (block without delimiters, body after the closing delimiter).
fn split_block(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == DELIMITER {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Reads the front-matter of a record from the head of the file only.
pub fn read_front_matter(path: &Path) -> AppResult<Option<FrontMatter>> {
    let file = File::open(path)?;
    let mut head = Vec::new();
    file.take(HEAD_BYTES).read_to_end(&mut head)?;
    Ok(FrontMatter::parse(&String::from_utf8_lossy(&head)))
}

/// Adds `location` to the `locations` list of `content`, creating the list
/// (or the whole block) when absent. Other keys are kept verbatim.
pub fn with_location(content: &str, location: &str) -> AppResult<String> {
    let Some((block, body)) = split_block(content) else {
        let front_matter = FrontMatter {
            fileid: None,
            locations: vec![location.to_string()],
        };
        return Ok(format!("{}\n{}", front_matter.render()?, content));
    };

    let mut locations = FrontMatter::parse(content).unwrap_or_default().locations;
    if locations.iter().any(|existing| existing == location) {
        return Ok(content.to_string());
    }
    locations.push(location.to_string());

    let mut lines: Vec<String> = block.lines().map(str::to_string).collect();
    let replacement: Vec<String> = std::iter::once("locations:".to_string())
        .chain(locations.iter().map(|item| format!("- {}", item)))
        .collect();

    match lines.iter().position(|line| line.starts_with("locations:")) {
        Some(index) => {
            let mut end = index + 1;
            while end < lines.len() && lines[end].trim_start().starts_with('-') {
                end += 1;
            }
            lines.splice(index..end, replacement);
        }
        None => lines.extend(replacement),
    }

    Ok(format!("{DELIMITER}\n{}\n{DELIMITER}\n{}", lines.join("\n"), body))
}
