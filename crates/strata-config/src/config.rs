//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name the configuration is persisted under.
pub const CONFIG_FILE_NAME: &str = "strata.ron";

/// Finest subdivision level the cache supports.
const LEVEL_LIMIT: u32 = 20;
/// Post counts whose meshes fit 16-bit indices.
const POSTS_RANGE: std::ops::RangeInclusive<usize> = 2..=254;

/// Top-level terrain cache configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Level-of-detail selection.
    pub cache: CacheConfig,
    /// Fetch scheduling and elevation queries.
    pub fetch: FetchConfig,
    /// Tile mesh geometry.
    pub mesh: MeshConfig,
    /// Mesh block pool.
    pub pool: PoolConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Level-of-detail selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Projected error in pixels above which a tile is refined.
    pub sse_threshold: f64,
    /// Deepest level the quadtree may refine to.
    pub max_level: u32,
    /// Level from which tiles are built from elevation data; coarser tiles
    /// are flat. Roots are level 0.
    pub terrain_level: u32,
    /// Approximate missing tiles from ancestors while fetches are pending.
    pub derive_enabled: bool,
    /// Upper bound on how long the collector sleeps between checks for
    /// source changes, in milliseconds.
    pub source_poll_interval_ms: u64,
}

/// Fetch scheduling and elevation queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Fetch worker threads. `0` picks a count from the number of CPUs.
    pub worker_count: usize,
    /// Maximum outstanding fetch requests.
    pub queue_capacity: usize,
    /// Multiplier applied to a level's nominal resolution when querying.
    pub resolution_adjustment: f64,
    /// Limit the first query pass to sources no finer than the tile needs.
    pub constrain_query_res: bool,
    /// After a constrained pass, fill holes from sources of any resolution.
    pub fill_with_hi_res: bool,
}

/// Tile mesh geometry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MeshConfig {
    /// Posts per tile side.
    pub num_posts: usize,
    /// Depth of the skirt below a tile's lowest post, in meters.
    pub skirt_height: f64,
}

/// Mesh block pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Preallocated mesh blocks.
    pub block_count: usize,
    /// Allocate from the heap once every pooled block is in use.
    pub heap_fallback: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "strata_cache=trace").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sse_threshold: 2.0,
            max_level: LEVEL_LIMIT,
            terrain_level: 7,
            derive_enabled: true,
            source_poll_interval_ms: 50,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 225,
            resolution_adjustment: 2.0,
            constrain_query_res: false,
            fill_with_hi_res: true,
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            num_posts: 32,
            skirt_height: 500.0,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            block_count: 256,
            heap_fallback: true,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Platform configuration directory for Strata, if the platform has one.
pub fn default_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("strata"))
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// --- Validate / Load / Save / Reload ---

impl Config {
    /// Check every value against the range the cache accepts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cache.sse_threshold > 0.0) {
            return Err(invalid("cache.sse_threshold", "must be positive"));
        }
        if self.cache.max_level > LEVEL_LIMIT {
            return Err(invalid(
                "cache.max_level",
                format!("must be at most {LEVEL_LIMIT}"),
            ));
        }
        if self.fetch.queue_capacity == 0 {
            return Err(invalid("fetch.queue_capacity", "must be at least 1"));
        }
        if !(self.fetch.resolution_adjustment > 0.0) {
            return Err(invalid("fetch.resolution_adjustment", "must be positive"));
        }
        if !POSTS_RANGE.contains(&self.mesh.num_posts) {
            return Err(invalid(
                "mesh.num_posts",
                format!(
                    "must be within {}..={}",
                    POSTS_RANGE.start(),
                    POSTS_RANGE.end()
                ),
            ));
        }
        if !(self.mesh.skirt_height >= 0.0) {
            return Err(invalid("mesh.skirt_height", "must not be negative"));
        }
        if self.pool.block_count == 0 && !self.pool.heap_fallback {
            return Err(invalid(
                "pool.block_count",
                "an empty pool needs heap_fallback",
            ));
        }
        Ok(())
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `strata.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::WriteError {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(|source| ConfigError::WriteError {
            path: config_path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE_NAME))?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cache.sse_threshold, 2.0);
        assert_eq!(config.cache.max_level, 20);
        assert_eq!(config.cache.terrain_level, 7);
        assert_eq!(config.fetch.worker_count, 4);
        assert_eq!(config.fetch.queue_capacity, 225);
        assert_eq!(config.mesh.num_posts, 32);
        assert_eq!(config.mesh.skirt_height, 500.0);
        assert!(config.pool.heap_fallback);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(2))
                .unwrap();
        assert!(ron_str.contains("sse_threshold: 2.0"));
        assert!(ron_str.contains("queue_capacity: 225"));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(cache: (max_level: 12), debug: ())";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.cache.max_level, 12);
        assert_eq!(config.cache.terrain_level, 7);
        assert_eq!(config.fetch, FetchConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.cache.sse_threshold = 4.0;
        config.fetch.worker_count = 2;
        config.debug.log_level = "strata_cache=debug".to_string();

        config.save(dir.path()).unwrap();
        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let config = Config::load_or_create(&nested).unwrap();
        assert_eq!(config, Config::default());
        assert!(nested.join(CONFIG_FILE_NAME).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut modified = config.clone();
        modified.mesh.num_posts = 16;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.unwrap().mesh.num_posts, 16);
    }

    /// Out-of-range values are rejected when loading from disk.
    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "(mesh: (num_posts: 1000))",
        )
        .unwrap();
        let err = Config::load_or_create(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "mesh.num_posts",
                ..
            }
        ));

        let mut config = Config::default();
        config.pool.block_count = 0;
        config.pool.heap_fallback = false;
        assert!(config.validate().is_err());
        config.cache.sse_threshold = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "cache.sse_threshold",
                ..
            })
        ));
    }

    #[test]
    fn test_read_error_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::default().reload(dir.path()).unwrap_err();
        assert!(err.to_string().contains(CONFIG_FILE_NAME));
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let result: Result<Config, _> = ron::from_str("{{not valid}}");
        assert!(result.is_err());
    }
}
