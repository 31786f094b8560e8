//! Per-node operator lifecycle.
//!
//! Uninitialized -> Initialized on the first request that reaches the node;
//! Initialized serves tile computations; Disposed once the execution ends.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::Array2;
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::core::operator::{InitContext, Operator, SourceProduct, TileContext};
use crate::core::progress::ProgressMonitor;
use crate::core::scheduler::Execution;
use crate::core::tile::{NodeIndex, Rect, Tile};
use crate::error::{Error, Result};
use crate::graph::Node;
use crate::types::{Disposal, ProductInfo};

/// State held once a node has been initialized.
pub(crate) struct Initialized {
    operator: Box<dyn Operator>,
    sources: Vec<SourceProduct>,
    info: Arc<ProductInfo>,
}

impl Initialized {
    pub(crate) fn info(&self) -> Arc<ProductInfo> {
        self.info.clone()
    }
}

pub struct OperatorRuntime {
    index: NodeIndex,
    node: Node,
    /// Source edges resolved to arena indices, in declaration order.
    sources: Vec<(String, NodeIndex)>,
    state: OnceCell<Initialized>,
    computed: AtomicU64,
}

impl OperatorRuntime {
    pub(crate) fn new(index: NodeIndex, node: Node, sources: Vec<(String, NodeIndex)>) -> Self {
        Self {
            index,
            node,
            sources,
            state: OnceCell::new(),
            computed: AtomicU64::new(0),
        }
    }

    pub fn index(&self) -> NodeIndex {
        self.index
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }

    /// Number of tiles this node has computed so far.
    pub fn computed_tiles(&self) -> u64 {
        self.computed.load(Ordering::Relaxed)
    }

    /// Runs `initialize` exactly once; concurrent callers block until it is done.
    pub(crate) fn ensure_initialized(
        &self,
        execution: &Execution<'_>,
        progress: &ProgressMonitor,
    ) -> Result<&Initialized> {
        self.state.get_or_try_init(|| self.initialize(execution, progress))
    }

    fn initialize(&self, execution: &Execution<'_>, progress: &ProgressMonitor) -> Result<Initialized> {
        progress.check_cancelled()?;
        let entry = execution.registry().resolve(&self.node.operator)?;
        entry.validate(&self.node.config)?;

        let mut sources = Vec::with_capacity(self.sources.len());
        for (role, idx) in &self.sources {
            let info = execution.product_info(*idx, progress)?;
            sources.push(SourceProduct {
                role: role.clone(),
                node: *idx,
                node_id: execution.node_id(*idx).to_string(),
                info,
            });
        }

        let mut operator = entry.create();
        let ctx = InitContext {
            node_id: &self.node.id,
            config: &self.node.config,
            parameters: &entry.parameters,
            sources: &sources,
            io: execution.io(),
        };
        let info = operator
            .initialize(&ctx)
            .map_err(|e| Error::in_node(&self.node.id, e))?;

        info!(
            node = %self.node.id,
            operator = %self.node.operator,
            width = info.width,
            height = info.height,
            bands = info.band_count(),
            "Initialized operator"
        );

        Ok(Initialized {
            operator,
            sources,
            info: Arc::new(info),
        })
    }

    /// Computes one tile; any failure is attributed to this node.
    pub(crate) fn compute_tile(
        &self,
        execution: &Execution<'_>,
        state: &Initialized,
        band: usize,
        rect: Rect,
        progress: &ProgressMonitor,
    ) -> Result<Tile> {
        progress.check_cancelled()?;
        let ctx = TileContext {
            execution,
            sources: &state.sources,
            target: &state.info,
            progress,
        };
        let data: Array2<f32> = state
            .operator
            .compute_tile(&ctx, band, rect)
            .map_err(|e| Error::in_node(&self.node.id, e))?;
        let tile = Tile::new(rect, data).map_err(|e| Error::in_node(&self.node.id, e))?;
        self.computed.fetch_add(1, Ordering::Relaxed);
        debug!(node = %self.node.id, band, rect = %rect, "Computed tile");
        Ok(tile)
    }

    /// Releases the operator. Runtimes that never initialized have nothing to do.
    pub(crate) fn dispose(self, disposal: Disposal) -> Result<()> {
        let Some(mut state) = self.state.into_inner() else {
            return Ok(());
        };
        debug!(node = %self.node.id, %disposal, "Disposing operator");
        state.operator.dispose(disposal).map_err(|e| {
            warn!(node = %self.node.id, error = %e, "Dispose failed");
            Error::in_node(&self.node.id, e)
        })
    }
}
