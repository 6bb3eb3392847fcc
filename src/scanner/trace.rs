use std::collections::VecDeque;

use chrono::Utc;

/// Last-N diagnostic lines for the operator's debug panel. Observational
/// only; nothing reads it to make decisions.
#[derive(Debug, Clone)]
pub struct DebugTrace {
    lines: VecDeque<String>,
    capacity: usize,
}

impl DebugTrace {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        log::debug!(target: "shelfscan::trace", "{line}");
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines
            .push_back(format!("{} {line}", Utc::now().format("%H:%M:%S%.3f")));
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
