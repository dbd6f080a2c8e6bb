use thiserror::Error;

/// Errors raised while constructing elevation sources.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ElevationError {
    #[error("grid needs at least 2x2 posts, got {cols}x{rows}")]
    GridTooSmall { cols: usize, rows: usize },

    #[error("grid of {cols}x{rows} posts needs {expected} heights, got {actual}")]
    GridShape {
        cols: usize,
        rows: usize,
        expected: usize,
        actual: usize,
    },

    #[error("source bounds are empty")]
    EmptyBounds,
}
