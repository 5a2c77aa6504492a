use crate::config::LinkPattern;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

static LINK_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[[^\]]*\]\]").expect("valid regex"));

const COORD: &str = r"(-?\d+\.\d+)";

static LOCATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        format!(r"https://(?:www\.)?(?:maps\.)?google\.com/maps\?q={COORD}(?:%2[cC]|,){COORD}"),
        format!(r"https://maps\.apple\.com/\?(?:\S*&)?(?:q|ll)={COORD},{COORD}"),
        format!(r"https://(?:www\.)?openstreetmap\.org/?\?(?:\S*&)?mlat={COORD}&(?:\S*&)?mlon={COORD}"),
        format!(r"https://(?:www\.)?openstreetmap\.org/?\S*#map=[\d.]+/{COORD}/{COORD}"),
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid regex"))
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinates {
    pub lat: String,
    pub lon: String,
}

impl Coordinates {
    fn parse(lat: &str, lon: &str) -> Option<Self> {
        let lat_value: f64 = lat.parse().ok()?;
        let lon_value: f64 = lon.parse().ok()?;
        if lat_value.abs() > 90.0 || lon_value.abs() > 180.0 {
            return None;
        }
        Some(Self {
            lat: lat.to_string(),
            lon: lon.to_string(),
        })
    }

    /// Value stored in the record's `locations` front-matter list.
    pub fn front_matter_value(&self) -> String {
        format!("{},{}", self.lat, self.lon)
    }

    pub fn geo_uri(&self) -> String {
        format!("geo:{},{}", self.lat, self.lon)
    }
}

/// Message text after enrichment, with the extracted location carried
/// separately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichedText {
    pub text: Option<String>,
    pub coordinates: Option<Coordinates>,
}

/// Finds the first recognised map link. The returned span covers the whole
/// URL token.
pub fn extract_location(text: &str) -> Option<(Coordinates, Range<usize>)> {
    LOCATION_PATTERNS.iter().find_map(|pattern| {
        pattern.captures_iter(text).find_map(|caps| {
            let whole = caps.get(0)?;
            let coordinates = Coordinates::parse(caps.get(1)?.as_str(), caps.get(2)?.as_str())?;
            let end = text[whole.end()..]
                .find(char::is_whitespace)
                .map_or(text.len(), |offset| whole.end() + offset);
            Some((coordinates, whole.start()..end))
        })
    })
}

fn strip_span(text: &str, span: Range<usize>) -> String {
    let before = text[..span.start].trim_end();
    let after_raw = &text[span.end..];
    let after = after_raw.trim_start();
    if before.is_empty() || after.is_empty() {
        return format!("{}{}", before, after);
    }
    let separator = if after_raw.starts_with('\n') { "\n" } else { " " };
    format!("{}{}{}", before, separator, after)
}

fn link_spans(text: &str) -> Vec<Range<usize>> {
    LINK_MARKER.find_iter(text).map(|found| found.range()).collect()
}

/// Wraps every match of each pattern in `[[...]]`, in declaration order.
/// Matches touching an existing link are left alone; spans are recomputed
/// after each pattern so patterns never wrap each other's output.
pub fn auto_link(input: &str, patterns: &[LinkPattern]) -> (String, usize) {
    let mut text = input.to_string();
    let mut link_count = 0usize;

    for pattern in patterns {
        let spans = link_spans(&text);
        let mut output = String::with_capacity(text.len());
        let mut last = 0usize;
        let mut wrapped = 0usize;

        for found in pattern.regex.find_iter(&text) {
            if found.start() == found.end() {
                continue;
            }
            if spans
                .iter()
                .any(|span| span.start < found.end() && found.start() < span.end)
            {
                continue;
            }
            output.push_str(&text[last..found.start()]);
            output.push_str("[[");
            output.push_str(found.as_str());
            output.push_str("]]");
            last = found.end();
            wrapped += 1;
        }

        if wrapped == 0 {
            continue;
        }
        output.push_str(&text[last..]);
        tracing::debug!(pattern = %pattern.name, count = wrapped, "applied link pattern");
        link_count += wrapped;
        text = output;
    }

    (text, link_count)
}

/// Location extraction first (the matched URL is removed from the text),
/// then auto-linking of what remains.
pub fn enrich(text: Option<&str>, patterns: &[LinkPattern]) -> EnrichedText {
    let Some(raw) = text.map(str::trim).filter(|value| !value.is_empty()) else {
        return EnrichedText::default();
    };

    let (remaining, coordinates) = match extract_location(raw) {
        Some((coordinates, span)) => (strip_span(raw, span), Some(coordinates)),
        None => (raw.to_string(), None),
    };

    if remaining.is_empty() {
        return EnrichedText { text: None, coordinates };
    }

    let (linked, links) = auto_link(&remaining, patterns);
    tracing::debug!(links, location = coordinates.is_some(), "enriched message text");
    EnrichedText {
        text: Some(linked),
        coordinates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{compile_patterns, Settings};

    fn default_patterns() -> Vec<LinkPattern> {
        compile_patterns(&Settings::default().regex_patterns)
    }

    #[test]
    fn links_phone_number_once() {
        let (linked, count) = auto_link("Call +46701234567 now", &default_patterns());
        assert_eq!(linked, "Call [[+46701234567]] now");
        assert_eq!(count, 1);
    }

    #[test]
    fn already_linked_text_is_not_wrapped_again() {
        let (linked, count) = auto_link("[[+46701234567]]", &default_patterns());
        assert_eq!(linked, "[[+46701234567]]");
        assert_eq!(count, 0);
    }

    #[test]
    fn later_patterns_skip_earlier_links() {
        let patterns = compile_patterns(&[
            crate::config::NamedPattern {
                name: "long".to_string(),
                pattern: r"ABC123".to_string(),
            },
            crate::config::NamedPattern {
                name: "digits".to_string(),
                pattern: r"[0-9]{3}".to_string(),
            },
        ]);
        let (linked, count) = auto_link("ABC123 and 456", &patterns);
        assert_eq!(linked, "[[ABC123]] and [[456]]");
        assert_eq!(count, 2);
    }

    #[test]
    fn links_every_occurrence() {
        let (linked, _) = auto_link("ABC123 then ABC123", &default_patterns());
        assert_eq!(linked, "[[ABC123]] then [[ABC123]]");
    }

    #[test]
    fn extracts_google_apple_and_osm_links() {
        let cases = [
            ("https://maps.google.com/maps?q=59.514828%2C17.767852", ("59.514828", "17.767852")),
            ("https://www.google.com/maps?q=-33.8688,151.2093", ("-33.8688", "151.2093")),
            ("https://maps.apple.com/?ll=48.8584,2.2945&z=15", ("48.8584", "2.2945")),
            ("https://www.openstreetmap.org/?mlat=51.5007&mlon=-0.1246#map=17/51.5007/-0.1246", ("51.5007", "-0.1246")),
            ("https://www.openstreetmap.org/#map=15/40.6892/-74.0445", ("40.6892", "-74.0445")),
        ];
        for (url, (lat, lon)) in cases {
            let (coordinates, span) = extract_location(url).expect(url);
            assert_eq!(coordinates.lat, lat);
            assert_eq!(coordinates.lon, lon);
            assert_eq!(span, 0..url.len());
        }
    }

    #[test]
    fn enrich_strips_location_url_and_keeps_first_only() {
        let enriched = enrich(
            Some("Meet here https://maps.google.com/maps?q=59.5%2C17.7 or https://maps.apple.com/?q=1.0,2.0 ok"),
            &[],
        );
        assert_eq!(
            enriched.coordinates,
            Some(Coordinates {
                lat: "59.5".to_string(),
                lon: "17.7".to_string()
            })
        );
        assert_eq!(
            enriched.text.as_deref(),
            Some("Meet here or https://maps.apple.com/?q=1.0,2.0 ok")
        );
    }

    #[test]
    fn malformed_location_urls_are_untouched() {
        let text = "see https://maps.google.com/maps?q=abc,def and https://example.com/maps?q=1.0,2.0";
        let enriched = enrich(Some(text), &[]);
        assert_eq!(enriched.coordinates, None);
        assert_eq!(enriched.text.as_deref(), Some(text));

        let out_of_range = enrich(Some("https://maps.google.com/maps?q=123.0,2.0"), &[]);
        assert_eq!(out_of_range.coordinates, None);
    }

    #[test]
    fn location_only_message_has_no_text() {
        let enriched = enrich(Some("https://maps.google.com/maps?q=59.5,17.7"), &default_patterns());
        assert!(enriched.text.is_none());
        assert!(enriched.coordinates.is_some());
    }
}
