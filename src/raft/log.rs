use serde_derive::{Deserialize, Serialize};

/// A single replicated log entry.
///
/// Commands are opaque strings to the log; only the state machine gives
/// `SET` and `NO-OP` meaning when a committed entry is applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub command: String,
}

impl LogEntry {
    pub fn new(term: u64, command: impl Into<String>) -> Self {
        Self { term, command: command.into() }
    }
}

/// The in-memory replicated log: 0-indexed, append-only except for follower
/// truncation when a conflict with the leader is discovered.
///
/// Durability is the storage layer's job; the node mirrors every mutation
/// here to disk before acknowledging it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a log from recovered entries, preserving order.
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        Self { entries }
    }

    /// Number of entries, as the protocol-level `u64` length.
    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Term of the last entry, or 0 for an empty log.
    pub fn last_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        self.entries.get(index as usize)
    }

    /// Term of the entry at `index`, or 0 when out of range.
    pub fn term_at(&self, index: u64) -> u64 {
        self.get(index).map(|e| e.term).unwrap_or(0)
    }

    /// The suffix starting at `from` (empty when `from >= len`).
    pub fn entries_from(&self, from: u64) -> &[LogEntry] {
        let from = (from as usize).min(self.entries.len());
        &self.entries[from..]
    }

    /// The half-open range `[from, to)`, clamped to the log.
    pub fn range(&self, from: u64, to: u64) -> &[LogEntry] {
        let to = (to as usize).min(self.entries.len());
        let from = (from as usize).min(to);
        &self.entries[from..to]
    }

    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Drops every entry at index `prefix_len` and beyond.
    pub fn truncate(&mut self, prefix_len: u64) {
        self.entries.truncate(prefix_len as usize);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }
}
