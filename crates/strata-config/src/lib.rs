//! Configuration for the Strata terrain cache.
//!
//! Every tunable of the cache persists to disk as a RON file. Sections missing
//! from the file fall back to their defaults, and unknown fields are ignored
//! so files stay readable across versions.

mod config;
mod error;

pub use config::{
    CONFIG_FILE_NAME, CacheConfig, Config, DebugConfig, FetchConfig, MeshConfig, PoolConfig,
    default_dir,
};
pub use error::ConfigError;
