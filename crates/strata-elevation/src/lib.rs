//! Elevation backend for the terrain cache.
//!
//! Sources are attached to an explicit [`ElevationContext`] rather than a
//! process-wide registry. The context answers region and point queries and
//! broadcasts [`SourceEvent`]s to subscribers whenever the set of sources or
//! their content changes.

mod context;
mod error;
mod fractal;
mod grid;
mod query;
mod source;

pub use context::{ContentNotifier, ElevationContext, RegionSources, SourceEvent};
pub use error::ElevationError;
pub use fractal::{FractalParams, FractalSource};
pub use grid::GridSource;
pub use query::{QueryParameters, ResolutionOrder};
pub use source::ElevationSource;
