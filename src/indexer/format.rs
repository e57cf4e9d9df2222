//! Format, bitrate and duration detection shared by all indexers.
//!
//! Sources describe releases in free text ("Dune [M4B] 64kbps 21h 2m"), so the
//! same extraction rules apply regardless of where a result came from.

use std::sync::LazyLock;

use regex::Regex;

use super::utils::compile_static_regex;

/// Format tag used when nothing recognizable is found.
pub const UNKNOWN_FORMAT: &str = "Unknown";

/// Recognized format tokens, in precedence order.
///
/// Audio containers come first so an `M4B` release that also mentions `MP3`
/// is classified as `M4B`.
const FORMAT_TOKENS: [&str; 9] = ["M4B", "M4A", "MP3", "EPUB", "AZW3", "MOBI", "PDF", "CBZ", "CBR"];

static FORMAT_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    FORMAT_TOKENS
        .iter()
        .map(|token| (*token, compile_static_regex(&format!(r"(?i)\b{token}\b"))))
        .collect()
});

/// Bitrate patterns in precedence order; the first family that matches wins.
static BITRATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // "64kbps", "64-128 kbps", "128 kb/s"
        compile_static_regex(
            r"(?i)\b(\d{2,4})(?:\s*[-/]\s*(\d{2,4}))?\s*(?:kbps|kbit/s|kb/s|kbits?)\b",
        ),
        // "128k"
        compile_static_regex(r"(?i)\b(\d{2,3})\s*k\b"),
    ]
});

static HMS_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"\b(\d{1,3}):([0-5]\d):([0-5]\d)\b"));

static HOURS_MINUTES_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?i)\b(\d{1,3})\s*h(?:ours?|rs?)?\b(?:\s*(\d{1,2})\s*m(?:in(?:ute)?s?)?\b)?",
    )
});

static MINUTES_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)\b(\d{1,4})\s*min(?:ute)?s?\b"));

/// Detects the format from an explicit hint (e.g. a file-type field) and the title.
///
/// The hint is consulted first; both are matched against the same ordered
/// token list with whole-word matching. Returns [`UNKNOWN_FORMAT`] when no
/// token matches.
#[must_use]
pub fn detect_format(hint: Option<&str>, title: &str) -> String {
    hint.and_then(match_format)
        .or_else(|| match_format(title))
        .unwrap_or(UNKNOWN_FORMAT)
        .to_string()
}

fn match_format(text: &str) -> Option<&'static str> {
    FORMAT_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map(|(token, _)| *token)
}

/// True when the format tag names an audio container.
#[must_use]
pub fn is_audio_format(format: &str) -> bool {
    matches!(format.to_ascii_uppercase().as_str(), "M4B" | "M4A" | "MP3")
}

/// Extracts a bitrate in kbps; with several candidates the maximum wins.
#[must_use]
pub fn extract_bitrate_kbps(text: &str) -> Option<u32> {
    BITRATE_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures_iter(text)
            .flat_map(|caps| {
                [caps.get(1), caps.get(2)]
                    .into_iter()
                    .flatten()
                    .filter_map(|m| m.as_str().parse::<u32>().ok())
                    .collect::<Vec<_>>()
            })
            .filter(|kbps| *kbps > 0)
            .max()
    })
}

/// Extracts a duration in seconds; with several candidates the maximum wins.
///
/// Recognizes `HH:MM:SS`, `NNh NNm`/`NN hours`, and `NNN min`, in that order
/// of precedence.
#[must_use]
pub fn extract_duration_secs(text: &str) -> Option<u64> {
    let hms = HMS_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let h = caps.get(1)?.as_str().parse::<u64>().ok()?;
            let m = caps.get(2)?.as_str().parse::<u64>().ok()?;
            let s = caps.get(3)?.as_str().parse::<u64>().ok()?;
            Some(h * 3600 + m * 60 + s)
        })
        .max();
    if hms.is_some() {
        return hms;
    }

    let hours_minutes = HOURS_MINUTES_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let h = caps.get(1)?.as_str().parse::<u64>().ok()?;
            let m = caps
                .get(2)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(0);
            Some(h * 3600 + m * 60)
        })
        .max();
    if hours_minutes.is_some() {
        return hours_minutes;
    }

    MINUTES_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u64>().ok())
        .map(|minutes| minutes * 60)
        .max()
}
