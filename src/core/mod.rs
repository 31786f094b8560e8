//! Execution core: tiles, the shared tile cache, progress and cancellation,
//! the operator interface and registry, per-node runtimes and the scheduler.
pub mod cache;
pub mod operator;
pub mod params;
pub mod progress;
pub mod runtime;
pub mod scheduler;
pub mod tile;

pub use cache::{CacheStats, TileCache};
pub use operator::{
    InitContext, Operator, OperatorEntry, OperatorRegistry, ParameterSpec, SourceProduct,
    TileContext,
};
pub use params::EngineConfig;
pub use progress::ProgressMonitor;
pub use runtime::OperatorRuntime;
pub use scheduler::{Execution, ExecutionReport, Scheduler};
pub use tile::{NodeIndex, Rect, Tile, TileKey, tile_grid};
