//! GPU query types.

/// Kind of GPU query a pool holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Timestamp written by `write_timestamp`.
    Timestamp,
    /// Pipeline statistics (primitives/invocations) bracketed by begin/end.
    PipelineStatistics,
}
