use serde::{Deserialize, Serialize};

/// Row counters of a single stage copy.
///
/// Only ever increased by the owning worker thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Rows read from input channels.
    pub lines_read: u64,
    /// Rows pushed to output channels, one per destination.
    pub lines_written: u64,
    /// Rows read from an external source (file, database).
    pub lines_input: u64,
    /// Rows written to an external target.
    pub lines_output: u64,
    pub lines_updated: u64,
    /// Rows sent to error handling.
    pub lines_rejected: u64,
    pub lines_skipped: u64,
    /// Fatal errors recorded for this copy.
    pub errors: u64,
}

impl Counters {
    /// Sum two counter sets.
    pub fn merge(&mut self, other: &Counters) {
        self.lines_read += other.lines_read;
        self.lines_written += other.lines_written;
        self.lines_input += other.lines_input;
        self.lines_output += other.lines_output;
        self.lines_updated += other.lines_updated;
        self.lines_rejected += other.lines_rejected;
        self.lines_skipped += other.lines_skipped;
        self.errors += other.errors;
    }
}
