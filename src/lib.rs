#![doc = r#"
SARGRAPH — a graph-based, tile-granular raster processing engine for SAR products.

A processing chain is a directed acyclic graph of operator nodes. Nothing is
computed until the graph is executed; then the terminal nodes (usually `Write`)
are pulled tile by tile, and every pull recurses into the node's sources. Tiles
are computed at most once at a time and kept in a shared, byte-budgeted cache.
The same engine backs the `sargraph` command-line tool.

Stability
---------
The public library API is experimental in initial releases and may evolve.

Quick start: filter a product into a GeoTIFF
--------------------------------------------
```rust,no_run
use std::sync::Arc;

use sargraph::core::{EngineConfig, ProgressMonitor, Scheduler};
use sargraph::graph::{Config, Graph, Node};
use sargraph::io::FileIo;
use sargraph::operators::builtin_registry;

fn main() -> sargraph::Result<()> {
    let mut graph = Graph::new();
    graph.add_node(
        Node::new("read", "Read").with_config(Config::new().with("file", "/data/in.dim")),
    )?;
    graph.add_node(
        Node::new("filter", "Image-Filter")
            .with_config(Config::new().with("filterSize", "5"))
            .with_source("sourceProduct", "read"),
    )?;
    graph.add_node(
        Node::new("write", "Write")
            .with_config(Config::new().with("file", "/out/filtered.tif"))
            .with_source("sourceProduct", "filter"),
    )?;

    let scheduler = Scheduler::new(
        EngineConfig::default(),
        Arc::new(builtin_registry()),
        Arc::new(FileIo),
    )?;
    let report = scheduler.execute(&graph, &ProgressMonitor::new())?;
    println!("computed {} tiles", report.tiles_computed);
    Ok(())
}
```

Product sets
------------
A `ProductSet-Reader` node lists many files in one `fileList` parameter. Call
[`graph::rewrite_product_sets`] before execution to replace it with one `Read`
node per file.

Modules
-------
- [`graph`] — graph model with observers, product-set rewriter, XML graph descriptions.
- [`core`] — operator trait and registry, runtimes, tile cache, scheduler, progress.
- [`operators`] — built-in operators (`Read`, `Write`, `Image-Filter`, ...).
- [`io`] — product readers and writers (BEAM-DIMAP, GeoTIFF, JPEG quicklooks).
- [`types`] — product descriptions and formats.
- [`error`] — crate-level `Error` and `Result`.
"#]

// Core modules (public)
pub mod core;
pub mod error;
pub mod graph;
pub mod io;
pub mod operators;
pub mod types;

// Curated public API surface
pub use core::{EngineConfig, ExecutionReport, ProgressMonitor, Scheduler};
pub use error::{Error, Result};
pub use graph::{Graph, GraphError, Node, rewrite_product_sets};
pub use io::{FileIo, RasterIo};
pub use operators::builtin_registry;
pub use types::{BandInfo, Disposal, Product, ProductFormat, ProductInfo};
