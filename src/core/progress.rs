//! Hierarchical progress and cancellation.
//!
//! A [`ProgressMonitor`] is passed by reference through every recursive tile
//! pull. Sub-monitors own a weighted share of their parent's work and a child
//! cancellation token: cancelling a sub-monitor aborts only its subtree, while
//! cancelling the root aborts everything.
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

type Listener = Box<dyn Fn(f64) + Send + Sync>;

struct Root {
    done: Mutex<f64>,
    listener: Option<Listener>,
}

pub struct ProgressMonitor {
    token: CancellationToken,
    root: Arc<Root>,
    /// Fraction of the root's total work owned by this scope.
    share: f64,
    /// Fraction of the root's total work represented by one unit of this scope.
    unit: f64,
}

impl fmt::Debug for ProgressMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressMonitor")
            .field("share", &self.share)
            .field("fraction", &self.fraction())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Default for ProgressMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressMonitor {
    pub fn new() -> Self {
        Self::with_root(None)
    }

    /// A root monitor reporting its completed fraction (0.0..=1.0) to `listener`.
    pub fn with_listener(listener: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self::with_root(Some(Box::new(listener)))
    }

    fn with_root(listener: Option<Listener>) -> Self {
        Self {
            token: CancellationToken::new(),
            root: Arc::new(Root {
                done: Mutex::new(0.0),
                listener,
            }),
            share: 1.0,
            unit: 1.0,
        }
    }

    /// Divides this scope into `total` units of work.
    pub fn begin(mut self, total: u64) -> Self {
        self.unit = if total == 0 {
            0.0
        } else {
            self.share / total as f64
        };
        self
    }

    /// Allocates `weight` units of this scope to a child scope.
    pub fn sub_monitor(&self, weight: u64) -> ProgressMonitor {
        let share = self.unit * weight as f64;
        ProgressMonitor {
            token: self.token.child_token(),
            root: self.root.clone(),
            share,
            unit: share,
        }
    }

    /// Records `units` of completed work in this scope.
    pub fn worked(&self, units: u64) {
        if units == 0 || self.unit == 0.0 {
            return;
        }
        let fraction = {
            let mut done = self.root.done.lock();
            *done = (*done + self.unit * units as f64).min(1.0);
            *done
        };
        if let Some(listener) = &self.root.listener {
            listener(fraction);
        }
    }

    /// Completed fraction of the root's work.
    pub fn fraction(&self) -> f64 {
        *self.root.done.lock()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
