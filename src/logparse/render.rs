//! Plain-text outline of a log forest, for terminals and support bundles.

use std::fmt::Write;

use super::{LogEntry, LogStatus};

/// Render `entries` as an indented outline, two spaces per nesting depth.
///
/// ```text
/// [KEYWORD] START_TEST Login
///   [PASS] Open Browser (1.20s)
/// ```
pub fn render(entries: &[LogEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        render_entry(&mut out, entry, 0);
    }
    out
}

fn render_entry(out: &mut String, entry: &LogEntry, depth: usize) {
    let _ = write!(out, "{:indent$}[{}] {}", "", entry.status, entry.text, indent = depth * 2);
    if let Some(duration) = &entry.duration {
        let _ = write!(out, " ({})", duration);
    }
    out.push('\n');
    for child in &entry.children {
        render_entry(out, child, depth + 1);
    }
}

/// Count PASS and FAIL entries across the whole forest.
pub fn tally(entries: &[LogEntry]) -> (usize, usize) {
    entries.iter().fold((0, 0), |(pass, fail), entry| {
        let (p, f) = tally(&entry.children);
        let (p, f) = match entry.status {
            LogStatus::Pass => (p + 1, f),
            LogStatus::Fail => (p, f + 1),
            _ => (p, f),
        };
        (pass + p, fail + f)
    })
}
