//! Tile scheduler.
//!
//! The [`Scheduler`] owns the shared tile cache and the worker pool. Running a
//! graph creates an [`Execution`]: an arena of lazily initialized
//! [`OperatorRuntime`]s indexed by [`NodeIndex`]. Terminal nodes are pulled tile
//! by tile on the pool; each pull recurses through `request_tile` into the
//! node's sources and bottoms out at read nodes.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::core::cache::{CacheStats, TileCache};
use crate::core::operator::OperatorRegistry;
use crate::core::params::EngineConfig;
use crate::core::progress::ProgressMonitor;
use crate::core::runtime::OperatorRuntime;
use crate::core::tile::{NodeIndex, Rect, Tile, TileKey, tile_grid};
use crate::error::{Error, Result};
use crate::graph::{Graph, READ_OPERATOR};
use crate::io::RasterIo;
use crate::types::{Disposal, ProductInfo};

/// Summary of a finished execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Ids of the terminal nodes that were pulled.
    pub terminals: Vec<String>,
    /// Tiles requested from terminal nodes (per band).
    pub tiles_requested: u64,
    /// Tile computations across all nodes.
    pub tiles_computed: u64,
    pub cache: CacheStats,
    pub elapsed: Duration,
}

pub struct Scheduler {
    config: EngineConfig,
    cache: TileCache,
    pool: rayon::ThreadPool,
    registry: Arc<OperatorRegistry>,
    io: Arc<dyn RasterIo>,
    next_execution: AtomicU64,
}

impl Scheduler {
    pub fn new(config: EngineConfig, registry: Arc<OperatorRegistry>, io: Arc<dyn RasterIo>) -> Result<Self> {
        config.validate()?;
        let workers = config.effective_workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("sargraph-worker-{i}"))
            .build()
            .map_err(Error::processing)?;
        info!(
            workers,
            cache_mb = config.cache_size_bytes / 1024 / 1024,
            tile_size = config.tile_size,
            "Scheduler ready"
        );
        Ok(Self {
            cache: TileCache::new(config.cache_size_bytes),
            config,
            pool,
            registry,
            io,
            next_execution: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// Validates `graph` and builds the runtime arena for one execution.
    /// No operator is created or initialized yet.
    pub fn prepare(&self, graph: &Graph) -> Result<Execution<'_>> {
        graph.validate()?;
        let order = graph.topological_order()?;

        let index: HashMap<String, NodeIndex> = graph
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), NodeIndex(i)))
            .collect();

        let mut has_consumer = vec![false; graph.len()];
        let mut runtimes = Vec::with_capacity(graph.len());
        for (i, node) in graph.nodes().iter().enumerate() {
            let mut sources = Vec::with_capacity(node.sources.len());
            for source in &node.sources {
                // validate() guarantees every source resolves
                if let Some(&idx) = index.get(&source.node_id) {
                    has_consumer[idx.0] = true;
                    sources.push((source.role.clone(), idx));
                }
            }
            runtimes.push(OperatorRuntime::new(NodeIndex(i), node.clone(), sources));
        }

        // Unconsumed Read nodes are not pulled.
        let terminals = (0..graph.len())
            .filter(|&i| !has_consumer[i])
            .filter(|&i| {
                let node = &graph.nodes()[i];
                let unused_read = node.operator == READ_OPERATOR;
                if unused_read {
                    warn!(node = %node.id, "Read node has no consumers, skipping it");
                }
                !unused_read
            })
            .map(NodeIndex)
            .collect();

        Ok(Execution {
            scheduler: self,
            id: self.next_execution.fetch_add(1, Ordering::Relaxed),
            runtimes,
            index,
            order: order.into_iter().map(NodeIndex).collect(),
            terminals,
        })
    }

    /// Runs `graph` to completion: every band of every terminal node is pulled
    /// over the full tile grid, then all runtimes are disposed.
    pub fn execute(&self, graph: &Graph, progress: &ProgressMonitor) -> Result<ExecutionReport> {
        let started = Instant::now();
        let execution = self.prepare(graph)?;
        let terminals: Vec<NodeIndex> = execution.terminals().to_vec();

        let pulled = execution.compute_nodes(&terminals, progress);
        let disposal = if pulled.is_ok() {
            Disposal::Completed
        } else {
            Disposal::Aborted
        };
        let tiles_computed = execution.computed_tiles();
        let disposed = execution.dispose(disposal);

        let tiles_requested = pulled?;
        disposed?;

        let report = ExecutionReport {
            terminals: terminals
                .iter()
                .map(|idx| graph.nodes()[idx.0].id.clone())
                .collect(),
            tiles_requested,
            tiles_computed,
            cache: self.cache.stats(),
            elapsed: started.elapsed(),
        };
        info!(
            terminals = ?report.terminals,
            tiles = report.tiles_requested,
            computed = report.tiles_computed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Execution complete"
        );
        Ok(report)
    }

    /// Drops every cached tile.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// One run of a graph on a [`Scheduler`].
pub struct Execution<'s> {
    scheduler: &'s Scheduler,
    id: u64,
    runtimes: Vec<OperatorRuntime>,
    index: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
    terminals: Vec<NodeIndex>,
}

impl<'s> Execution<'s> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn node_id(&self, node: NodeIndex) -> &str {
        self.runtimes
            .get(node.0)
            .map(|r| r.node().id.as_str())
            .unwrap_or_default()
    }

    /// Nodes no other node reads from.
    pub fn terminals(&self) -> &[NodeIndex] {
        &self.terminals
    }

    pub fn runtime(&self, node: NodeIndex) -> Result<&OperatorRuntime> {
        self.runtimes
            .get(node.0)
            .ok_or_else(|| Error::Processing(format!("no node with index {}", node.0)))
    }

    pub(crate) fn registry(&self) -> &OperatorRegistry {
        &self.scheduler.registry
    }

    pub(crate) fn io(&self) -> &Arc<dyn RasterIo> {
        &self.scheduler.io
    }

    /// Output shape of `node`, initializing it (and its sources) on first use.
    pub fn product_info(&self, node: NodeIndex, progress: &ProgressMonitor) -> Result<Arc<ProductInfo>> {
        let runtime = self.runtime(node)?;
        Ok(runtime.ensure_initialized(self, progress)?.info())
    }

    /// Rectangle `rect` of band `band` of `node`'s output.
    ///
    /// Served from the cache when present; otherwise computed once, even when
    /// several workers ask for the same key at the same time.
    pub fn request_tile(
        &self,
        node: NodeIndex,
        band: usize,
        rect: Rect,
        progress: &ProgressMonitor,
    ) -> Result<Arc<Tile>> {
        progress.check_cancelled()?;
        let key = TileKey::new(self.id, node, band, rect);
        if let Some(tile) = self.scheduler.cache.get(&key) {
            return Ok(tile);
        }

        let runtime = self.runtime(node)?;
        let state = runtime.ensure_initialized(self, progress)?;
        let info = state.info();
        if band >= info.band_count() {
            return Err(Error::Processing(format!(
                "band {band} out of range for node '{}' ({} bands)",
                runtime.node().id,
                info.band_count()
            )));
        }
        if rect.is_empty() || !Rect::full(info.width, info.height).contains(&rect) {
            return Err(Error::Processing(format!(
                "rectangle {rect} outside of node '{}' ({}x{})",
                runtime.node().id,
                info.width,
                info.height
            )));
        }

        self.scheduler.cache.get_or_compute(key, || {
            runtime.compute_tile(self, state, band, rect, progress)
        })
    }

    /// Every band of `node` over `rect`.
    pub fn request_tile_stack(
        &self,
        node: NodeIndex,
        rect: Rect,
        progress: &ProgressMonitor,
    ) -> Result<Vec<Arc<Tile>>> {
        let info = self.product_info(node, progress)?;
        (0..info.band_count())
            .map(|band| self.request_tile(node, band, rect, progress))
            .collect()
    }

    /// Pulls the full tile grid of every band of `nodes` on the worker pool.
    /// All of them are initialized before the first tile is requested.
    /// Returns the number of tiles requested.
    pub fn compute_nodes(&self, nodes: &[NodeIndex], progress: &ProgressMonitor) -> Result<u64> {
        let tile_size = self.scheduler.config.tile_size;
        let mut work: Vec<(NodeIndex, Rect)> = Vec::new();
        let mut requested = 0u64;
        for &node in nodes {
            let info = self.product_info(node, progress)?;
            for rect in tile_grid(info.width, info.height, tile_size) {
                work.push((node, rect));
                requested += info.band_count() as u64;
            }
        }

        let scope = progress.sub_monitor(1).begin(work.len() as u64);
        debug!(execution = self.id, rects = work.len(), "Pulling terminal tiles");

        let result = self.scheduler.pool.install(|| {
            work.par_iter().try_for_each(|&(node, rect)| {
                self.request_tile_stack(node, rect, &scope)?;
                scope.worked(1);
                Ok::<(), Error>(())
            })
        });

        if let Err(e) = &result {
            if e.is_cancelled() {
                warn!(execution = self.id, "Execution cancelled");
            }
        }
        result.map(|_| requested)
    }

    /// Tile computations performed so far across all nodes.
    pub fn computed_tiles(&self) -> u64 {
        self.runtimes.iter().map(OperatorRuntime::computed_tiles).sum()
    }

    /// Disposes every runtime, consumers before their sources. On an aborted
    /// execution dispose failures are only logged.
    pub fn dispose(self, disposal: Disposal) -> Result<()> {
        let mut slots: Vec<Option<OperatorRuntime>> = self.runtimes.into_iter().map(Some).collect();
        let mut first_error = None;
        for idx in self.order.iter().rev() {
            let Some(runtime) = slots[idx.0].take() else {
                continue;
            };
            if let Err(e) = runtime.dispose(disposal) {
                if disposal == Disposal::Completed && first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
