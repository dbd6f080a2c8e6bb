use strata_config::ConfigError;
use strata_mesh::BuildError;
use thiserror::Error;

/// Errors raised by the terrain cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The fetch queue is at capacity; the request is retried on a later pass.
    #[error("fetch queue saturated ({capacity} outstanding requests)")]
    QueueSaturated { capacity: usize },

    #[error("failed to start {role} thread: {source}")]
    ThreadStart {
        role: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("tile build failed: {0}")]
    Build(#[from] BuildError),

    /// A node had neither a tile nor an ancestor to derive one from.
    #[error("node at level {level} has no tile and no derive source")]
    IllegalState { level: u32 },
}
