use strata_pool::PoolError;
use thiserror::Error;

/// Errors raised while building a terrain tile.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("mesh block allocation failed: {0}")]
    Pool(#[from] PoolError),

    #[error("{num_posts} posts per side is outside {min}..={max}")]
    InvalidPostCount {
        num_posts: usize,
        min: usize,
        max: usize,
    },

    #[error("mesh block of {available} bytes cannot hold {required} bytes")]
    BlockTooSmall { required: usize, available: usize },

    #[error("mesh section cast failed: {0:?}")]
    Cast(bytemuck::PodCastError),
}
