//! Error types for the virtual resource loader.

use thiserror::Error;

/// Result type alias for loader operations.
pub type VfsResult<T> = Result<T, VfsError>;

/// Errors surfaced by the loading pipeline.
///
/// Handler-level failures are recorded on the carrier as `status = Failed`
/// and delivered like any other completion; the loader itself returns the
/// structural variants (`DuplicateRequest`, `PendingTableFull`,
/// `BoundaryMarshal`, `Config`). `HandlerInternal` is also returned by
/// [`UriLoader::fetch`](crate::UriLoader::fetch) when its request is
/// cancelled, and `NoHandlerMatched` by [`FailureCause::to_error`](crate::FailureCause::to_error).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VfsError {
    #[error("no handler matched uri: {0}")]
    NoHandlerMatched(String),

    #[error("request id {0} is already pending")]
    DuplicateRequest(u32),

    #[error("pending table is full ({0} requests in flight)")]
    PendingTableFull(usize),

    #[error("handler error: {0}")]
    HandlerInternal(String),

    #[error("boundary marshal error: {0}")]
    BoundaryMarshal(String),

    #[error("configuration error: {0}")]
    Config(String),
}
