//! Single-line classification: decoration stripping, status, duration, indent.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{BlockKind, LogStatus, Marker};

/// `[20:13:06.487] [INFO] ` style prefix written by the runner's logger.
static DECORATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[.*?\]\s*\[.*?\]\s*").unwrap());

/// Trailing `(1.23s)` elapsed-time suffix, with any whitespace before it.
static DURATION_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\((\d+\.\d+s)\)$").unwrap());

const MARKERS: [(&str, Marker); 6] = [
    ("START_SUITE", Marker::Start(BlockKind::Suite)),
    ("START_TEST", Marker::Start(BlockKind::Test)),
    ("START_KEYWORD", Marker::Start(BlockKind::Keyword)),
    ("END_SUITE", Marker::End(BlockKind::Suite)),
    ("END_TEST", Marker::End(BlockKind::Test)),
    ("END_KEYWORD", Marker::End(BlockKind::Keyword)),
];

/// A raw log line after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedLine {
    pub text: String,
    pub level: usize,
    pub status: LogStatus,
    pub duration: Option<String>,
    pub marker: Option<Marker>,
}

impl ClassifiedLine {
    /// Whether subsequent lines may nest under this one.
    pub fn is_structural(&self) -> bool {
        matches!(self.marker, Some(Marker::Start(_))) || self.text.ends_with(':')
    }
}

/// Classify one raw line. Returns `None` for lines that carry no content
/// (blank after stripping, or `=====` separator banners).
pub fn classify(raw: &str) -> Option<ClassifiedLine> {
    let cleaned = DECORATION.replace(raw.trim_start(), "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '=') {
        return None;
    }

    let (text, duration) = match DURATION_SUFFIX.captures(cleaned) {
        Some(caps) => {
            let start = caps.get(0).map_or(cleaned.len(), |m| m.start());
            (
                cleaned[..start].to_string(),
                caps.get(1).map(|m| m.as_str().to_string()),
            )
        }
        None => (cleaned.to_string(), None),
    };

    Some(ClassifiedLine {
        status: status_of(raw.trim_start(), cleaned),
        level: indent_of(raw),
        marker: marker_of(cleaned),
        text,
        duration,
    })
}

/// Delimited `| PASS |` markers are searched in the cleaned line; the bare
/// `PASS`/`FAIL` prefix rule only applies to the raw line, so a
/// timestamped `PASS` line stays INFO.
fn status_of(raw: &str, cleaned: &str) -> LogStatus {
    if cleaned.contains("| PASS |") || raw.starts_with("PASS") {
        LogStatus::Pass
    } else if cleaned.contains("| FAIL |") || raw.starts_with("FAIL") {
        LogStatus::Fail
    } else if cleaned.contains("| WARN |") {
        LogStatus::Warn
    } else if cleaned.contains("| INFO |") {
        LogStatus::Info
    } else if marker_of(cleaned).is_some() {
        LogStatus::Keyword
    } else {
        LogStatus::Info
    }
}

fn marker_of(line: &str) -> Option<Marker> {
    MARKERS
        .iter()
        .filter_map(|(needle, marker)| line.find(needle).map(|pos| (pos, *marker)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, marker)| marker)
}

fn indent_of(raw: &str) -> usize {
    raw.chars()
        .take_while(|c| c.is_whitespace() || *c == '|')
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_timestamp_and_level() {
        let line = classify("[20:13:06.487] [INFO] Open Browser    chrome").unwrap();
        assert_eq!(line.text, "Open Browser    chrome");
        assert_eq!(line.status, LogStatus::Info);
        assert_eq!(line.level, 0);
    }

    #[test]
    fn test_skips_blank_and_banner_lines() {
        assert!(classify("").is_none());
        assert!(classify("    ").is_none());
        assert!(classify("==============================").is_none());
        assert!(classify("[10:00:00.000] [INFO] ").is_none());
        assert!(classify("[10:00:00.000] [INFO] =====").is_none());
    }

    #[test]
    fn test_banner_with_text_is_kept() {
        assert!(classify("== Suite ==").is_some());
    }

    #[test]
    fn test_delimited_statuses() {
        assert_eq!(classify("Login Test | PASS |").unwrap().status, LogStatus::Pass);
        assert_eq!(classify("Checkout   | FAIL | boom").unwrap().status, LogStatus::Fail);
        assert_eq!(classify("Retry      | WARN | slow").unwrap().status, LogStatus::Warn);
        assert_eq!(classify("Note       | INFO | hi").unwrap().status, LogStatus::Info);
    }

    #[test]
    fn test_pass_takes_priority_over_fail() {
        let line = classify("x | PASS | then | FAIL |").unwrap();
        assert_eq!(line.status, LogStatus::Pass);
    }

    #[test]
    fn test_bare_prefix_only_on_undecorated_lines() {
        assert_eq!(classify("PASS all good").unwrap().status, LogStatus::Pass);
        assert_eq!(classify("  FAIL nope").unwrap().status, LogStatus::Fail);
        assert_eq!(
            classify("[10:00:00.100] [INFO] PASS (0.10s)").unwrap().status,
            LogStatus::Info
        );
    }

    #[test]
    fn test_markers_classify_as_keyword() {
        let line = classify("START_KEYWORD Click Button").unwrap();
        assert_eq!(line.status, LogStatus::Keyword);
        assert_eq!(line.marker, Some(Marker::Start(BlockKind::Keyword)));

        let line = classify("[t] [INFO] END_SUITE Smoke").unwrap();
        assert_eq!(line.marker, Some(Marker::End(BlockKind::Suite)));
    }

    #[test]
    fn test_first_marker_wins() {
        let line = classify("END_TEST Login START_TEST Logout").unwrap();
        assert_eq!(line.marker, Some(Marker::End(BlockKind::Test)));
    }

    #[test]
    fn test_duration_extracted_and_stripped() {
        let line = classify("Wait Until Page Loads (3.14s)").unwrap();
        assert_eq!(line.duration.as_deref(), Some("3.14s"));
        assert_eq!(line.text, "Wait Until Page Loads");
    }

    #[test]
    fn test_duration_must_be_trailing() {
        let line = classify("took (3.14s) before retry").unwrap();
        assert!(line.duration.is_none());
        assert_eq!(line.text, "took (3.14s) before retry");
    }

    #[test]
    fn test_integer_duration_is_not_a_duration() {
        let line = classify("Sleep (3s)").unwrap();
        assert!(line.duration.is_none());
    }

    #[test]
    fn test_indent_counts_spaces_and_pipes() {
        assert_eq!(classify("    Log    hello").unwrap().level, 4);
        assert_eq!(classify("| | Step").unwrap().level, 4);
        assert_eq!(classify("\tStep").unwrap().level, 1);
    }

    #[test]
    fn test_structural_lines() {
        assert!(classify("START_TEST Login").unwrap().is_structural());
        assert!(classify("Setup:").unwrap().is_structural());
        assert!(!classify("END_TEST Login").unwrap().is_structural());
        assert!(!classify("Log    done").unwrap().is_structural());
    }
}
