use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::Result;
use crate::graph::{Graph, GraphConfig};
use crate::handle::ComputedBase;
use crate::operation::Registry;
use crate::value::Value;

static NEXT_GRAPH_ID: AtomicUsize = AtomicUsize::new(0);

struct Inner {
    id: usize,
    graph: Mutex<Graph>,
    evaluating: AtomicUsize,
}

/// A graph shared between handles and threads.
///
/// Every access goes through one mutex; evaluation holds it for its whole
/// duration.
#[derive(Clone)]
pub struct SharedGraph {
    inner: Arc<Inner>,
}

impl SharedGraph {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_config(registry, GraphConfig::default())
    }

    pub fn with_config(registry: Arc<Registry>, config: GraphConfig) -> Self {
        Self::from_graph(Graph::with_config(registry, config))
    }

    pub fn from_graph(graph: Graph) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
                graph: Mutex::new(graph),
                evaluating: AtomicUsize::new(0),
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Graph> {
        self.inner.graph.lock()
    }

    /// Process-unique identifier, stable for the graph's lifetime.
    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn same_graph(&self, other: &SharedGraph) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.lock().registry())
    }

    /// Lifts `value` into the graph and returns a handle on it.
    pub fn constant(&self, value: impl Into<Value>) -> Result<ComputedBase> {
        let mut locked = self.lock();
        let id = locked.add_constant(value.into())?;
        ComputedBase::attach_locked(self.clone(), &mut locked, id)
    }

    /// True while at least one `compute` on this graph is in flight.
    pub fn is_evaluating(&self) -> bool {
        self.inner.evaluating.load(Ordering::Acquire) > 0
    }

    pub fn evaluation_depth(&self) -> usize {
        self.inner.evaluating.load(Ordering::Acquire)
    }

    pub(crate) fn enter_evaluation(&self) -> EvaluationGuard<'_> {
        self.inner.evaluating.fetch_add(1, Ordering::AcqRel);
        EvaluationGuard { graph: self }
    }
}

impl fmt::Debug for SharedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedGraph")
            .field("id", &self.inner.id)
            .field("evaluating", &self.evaluation_depth())
            .finish()
    }
}

pub(crate) struct EvaluationGuard<'a> {
    graph: &'a SharedGraph,
}

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        self.graph.inner.evaluating.fetch_sub(1, Ordering::AcqRel);
    }
}
