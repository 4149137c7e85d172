//! Indentation-stack reconstruction of the execution trace.
//!
//! Each classified line is attached to the innermost open block whose
//! indentation is shallower than its own. Lines ending in `:` open implicit
//! blocks that any line at equal or shallower indentation closes.
//! `START_*` markers open explicit blocks: decorated runner output has no
//! indentation at all, so those only close on a strictly shallower line or on
//! their matching `END_*` marker, which is folded into the block instead of
//! being emitted on its own. The runner does not always emit the end marker,
//! so a new `START_*` first closes any open block of the same or an inner
//! kind at its indentation: an unpaired `START_TEST B` becomes a sibling of
//! `START_TEST A`, not its child.
//!
//! Nesting is capped at [`MAX_DEPTH`]; structural lines past the cap are
//! attached as plain leaves.

use super::classify::{classify, ClassifiedLine};
use super::{BlockKind, LogEntry, LogStatus, Marker};

/// Deepest nesting the builder will open.
pub const MAX_DEPTH: usize = 64;

struct Frame {
    entry: LogEntry,
    indent: usize,
    explicit: Option<BlockKind>,
}

impl Frame {
    fn closes_on(&self, indent: usize) -> bool {
        match self.explicit {
            Some(_) => indent < self.indent,
            None => indent <= self.indent,
        }
    }
}

/// Rebuild the forest of entries from a log snapshot.
///
/// Pure function of its input: calling it twice on the same lines yields the
/// same tree. Never panics; unexpected shapes degrade to a flatter forest.
pub fn build<S: AsRef<str>>(lines: &[S]) -> Vec<LogEntry> {
    let mut builder = TreeBuilder::default();
    for raw in lines {
        if let Some(line) = classify(raw.as_ref()) {
            builder.push(line);
        }
    }
    builder.finish()
}

#[derive(Default)]
struct TreeBuilder {
    roots: Vec<LogEntry>,
    open: Vec<Frame>,
}

impl TreeBuilder {
    fn push(&mut self, line: ClassifiedLine) {
        if let Some(Marker::End(kind)) = line.marker {
            if self.close_block(kind, &line) {
                return;
            }
        }

        if let Some(Marker::Start(kind)) = line.marker {
            self.close_siblings(kind, line.level);
        }
        while self.open.last().is_some_and(|top| top.closes_on(line.level)) {
            self.close_top();
        }

        let level = match self.open.last() {
            Some(parent) => line.level.max(parent.entry.level + 1),
            None => line.level,
        };
        let structural = line.is_structural();
        let explicit = match line.marker {
            Some(Marker::Start(kind)) => Some(kind),
            _ => None,
        };
        let entry = LogEntry {
            text: line.text,
            level,
            status: line.status,
            duration: line.duration,
            children: Vec::new(),
        };

        if structural && self.open.len() < MAX_DEPTH {
            self.open.push(Frame {
                entry,
                indent: line.level,
                explicit,
            });
        } else {
            self.attach(entry);
        }
    }

    /// Close open explicit blocks a `START_*` of `kind` at `indent` cannot
    /// live inside: those of the same or an inner kind, down to the first
    /// shallower frame or enclosing outer-kind block.
    fn close_siblings(&mut self, kind: BlockKind, indent: usize) {
        let mut cut = None;
        for (pos, frame) in self.open.iter().enumerate().rev() {
            if frame.indent < indent {
                break;
            }
            match frame.explicit {
                Some(open) if open < kind => break,
                Some(_) => cut = Some(pos),
                None => {}
            }
        }
        if let Some(pos) = cut {
            while self.open.len() > pos {
                self.close_top();
            }
        }
    }

    /// Close the innermost explicit block of `kind`, folding the end line's
    /// status and duration into it. Returns `false` when no such block is
    /// open, in which case the end line is kept as an ordinary entry.
    fn close_block(&mut self, kind: BlockKind, end: &ClassifiedLine) -> bool {
        let Some(pos) = self.open.iter().rposition(|f| f.explicit == Some(kind)) else {
            return false;
        };
        while self.open.len() > pos + 1 {
            self.close_top();
        }
        if let Some(frame) = self.open.last_mut() {
            let entry = &mut frame.entry;
            if entry.status == LogStatus::Keyword
                && matches!(end.status, LogStatus::Pass | LogStatus::Fail | LogStatus::Warn)
            {
                entry.status = end.status;
            }
            if entry.duration.is_none() {
                entry.duration = end.duration.clone();
            }
        }
        self.close_top();
        true
    }

    fn close_top(&mut self) {
        if let Some(frame) = self.open.pop() {
            self.attach(frame.entry);
        }
    }

    fn attach(&mut self, entry: LogEntry) {
        match self.open.last_mut() {
            Some(parent) => parent.entry.children.push(entry),
            None => self.roots.push(entry),
        }
    }

    fn finish(mut self) -> Vec<LogEntry> {
        while !self.open.is_empty() {
            self.close_top();
        }
        self.roots
    }
}
