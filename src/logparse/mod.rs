//! Log-to-tree reconstruction for Robot Framework console output.
//!
//! The remote runner emits an unstructured, line-oriented stream. This module
//! classifies each line and rebuilds a best-effort hierarchy from indentation
//! and `START_*`/`END_*` markers. Nothing here ever fails: malformed input
//! only produces a flatter tree.

pub mod classify;
pub mod render;
pub mod tree;

use serde::{Deserialize, Serialize};

pub use self::classify::{classify, ClassifiedLine};
pub use self::tree::build;

/// Outcome category of a single log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogStatus {
    Pass,
    Fail,
    Info,
    Warn,
    Keyword,
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStatus::Pass => write!(f, "PASS"),
            LogStatus::Fail => write!(f, "FAIL"),
            LogStatus::Info => write!(f, "INFO"),
            LogStatus::Warn => write!(f, "WARN"),
            LogStatus::Keyword => write!(f, "KEYWORD"),
        }
    }
}

/// Kind of block opened by a `START_*` marker, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockKind {
    Suite,
    Test,
    Keyword,
}

/// Explicit structural marker found in a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Start(BlockKind),
    End(BlockKind),
}

/// One node of the reconstructed execution trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub text: String,
    /// Indentation signal; only meaningful relative to other entries.
    pub level: usize,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default)]
    pub children: Vec<LogEntry>,
}

impl LogEntry {
    /// Total number of entries in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(LogEntry::count).sum::<usize>()
    }
}
