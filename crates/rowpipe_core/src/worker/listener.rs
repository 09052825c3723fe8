use std::fmt::Debug;

use crate::row::Row;

/// Observes rows moving through a stage copy.
///
/// Called synchronously on the worker thread, so implementations should be
/// cheap.
pub trait RowListener: Debug + Send {
    /// A row was read from an input channel.
    fn row_read(&mut self, _row: &Row) {}

    /// A row is about to be written to the outputs.
    fn row_written(&mut self, _row: &Row) {}

    /// A row is about to be sent to error handling. The row does not include
    /// the error fields.
    fn error_row_written(&mut self, _row: &Row) {}
}
