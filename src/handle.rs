//! Reference-counted handles on graph nodes.
//!
//! A [`ComputedBase`] keeps its node alive and follows it through every
//! renumbering. Building a node from handles that live in other graphs pulls
//! their computations over, moving them when the handle was the last use and
//! copying otherwise.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::dimensions::Dimensions;
use crate::error::{GraphError, Result};
use crate::graph::{Graph, NodeId, NodeSlot, ReferenceKey, RewriteListener, Subtree};
use crate::shared::SharedGraph;
use crate::value::{TypeError, Value, ValueKind};

/// One input of [`ComputedBase::build`].
pub enum Operand<'a> {
    /// Consumed; its computation may be moved instead of copied.
    Owned(ComputedBase),
    Borrowed(&'a ComputedBase),
    /// Lifted into the destination graph as a constant.
    Value(Value),
}

impl From<ComputedBase> for Operand<'_> {
    fn from(handle: ComputedBase) -> Self {
        Operand::Owned(handle)
    }
}

impl<'a> From<&'a ComputedBase> for Operand<'a> {
    fn from(handle: &'a ComputedBase) -> Self {
        Operand::Borrowed(handle)
    }
}

impl From<Value> for Operand<'_> {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

enum Placement {
    Local(Arc<NodeSlot>),
    Constant(Value),
    Copied(Subtree),
    Moved(Subtree),
}

fn register(graph: &mut Graph, id: NodeId) -> Result<(Arc<NodeSlot>, ReferenceKey)> {
    let slot = NodeSlot::new(id);
    let listener: Arc<dyn RewriteListener> = slot.clone();
    let key = graph.reference(id, Some(Arc::downgrade(&listener)))?;
    Ok((slot, key))
}

/// Untyped handle on a node. An empty handle has no graph.
pub struct ComputedBase {
    graph: Option<SharedGraph>,
    slot: Arc<NodeSlot>,
    key: Option<ReferenceKey>,
}

impl ComputedBase {
    pub fn empty() -> Self {
        Self {
            graph: None,
            slot: NodeSlot::new(NodeId::INVALID),
            key: None,
        }
    }

    /// Takes a new reference on `id` in `graph`.
    pub fn attach(graph: SharedGraph, id: NodeId) -> Result<Self> {
        let (slot, key) = register(&mut graph.lock(), id)?;
        Ok(Self {
            graph: Some(graph),
            slot,
            key: Some(key),
        })
    }

    /// Like [`ComputedBase::attach`] for a caller already holding the lock,
    /// so that `id` cannot be compacted away in between.
    pub(crate) fn attach_locked(graph: SharedGraph, locked: &mut Graph, id: NodeId) -> Result<Self> {
        let (slot, key) = register(locked, id)?;
        Ok(Self {
            graph: Some(graph),
            slot,
            key: Some(key),
        })
    }

    /// Adds a node applying `name` to `operands`.
    ///
    /// The node lands in the graph of the first handle among the operands.
    /// Handles from other graphs are brought over: an owned handle that is
    /// the only use of its node has its computation moved, leaving the
    /// source graph compacted; everything else is copied.
    pub fn build(name: &str, dims: Dimensions, operands: Vec<Operand<'_>>) -> Result<Self> {
        let destination = operands
            .iter()
            .find_map(|operand| match operand {
                Operand::Owned(handle) => handle.graph.clone(),
                Operand::Borrowed(handle) => handle.graph.clone(),
                Operand::Value(_) => None,
            })
            .ok_or(GraphError::NoGraph)?;

        // sources are read one at a time, never while the destination is locked
        let mut plans = Vec::with_capacity(operands.len());
        let mut kept = Vec::new();
        let mut moved = Vec::new();
        for operand in operands {
            match operand {
                Operand::Value(value) => plans.push(Placement::Constant(value)),
                Operand::Borrowed(handle) => plans.push(handle.plan(&destination, false)?),
                Operand::Owned(handle) => {
                    let plan = handle.plan(&destination, true)?;
                    if matches!(plan, Placement::Moved(_)) {
                        moved.push(handle);
                    } else {
                        kept.push(handle);
                    }
                    plans.push(plan);
                }
            }
        }

        let (slot, key) = {
            let mut graph = destination.lock();
            let mut inputs = Vec::with_capacity(plans.len());
            for plan in plans {
                let id = match plan {
                    Placement::Local(slot) => slot.get(),
                    Placement::Constant(value) => graph.add_constant(value)?,
                    Placement::Copied(subtree) | Placement::Moved(subtree) => {
                        graph.insert_subtree(&subtree)?
                    }
                };
                inputs.push(id);
            }
            let id = graph.add_node(name, dims, &inputs)?;
            register(&mut graph, id)?
        };

        drop(kept);
        for mut handle in moved {
            handle.consume()?;
        }

        Ok(Self {
            graph: Some(destination),
            slot,
            key: Some(key),
        })
    }

    /// Evaluates the node, or returns its cached value.
    pub fn compute(&self) -> Result<Value> {
        let graph = self.graph.as_ref().ok_or(GraphError::NoGraph)?;
        let _evaluation = graph.enter_evaluation();
        let mut locked = graph.lock();
        locked.get_value(self.slot.get())
    }

    /// Drops the reference and detaches the handle from its graph.
    pub fn release(&mut self) -> Result<()> {
        let graph = self.graph.take();
        let key = self.key.take();
        self.slot = NodeSlot::new(NodeId::INVALID);
        match (graph, key) {
            (Some(graph), Some(key)) => graph.lock().unreference(key),
            _ => Ok(()),
        }
    }

    pub fn graph(&self) -> Option<&SharedGraph> {
        self.graph.as_ref()
    }

    /// Current id of the node. Only meaningful while the graph is not being
    /// modified by another thread.
    pub fn id(&self) -> Option<NodeId> {
        self.key.map(|_| self.slot.get())
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_none()
    }

    fn plan(&self, destination: &SharedGraph, owned: bool) -> Result<Placement> {
        let graph = self.graph.as_ref().ok_or(GraphError::NoGraph)?;
        if graph.same_graph(destination) {
            return Ok(Placement::Local(Arc::clone(&self.slot)));
        }

        let source = graph.lock();
        let id = self.slot.get();
        let movable = owned
            && source.reference_count(id) == 1
            && source.node(id)?.output_count() == 0;
        let subtree = source.snapshot(id)?;
        Ok(if movable {
            Placement::Moved(subtree)
        } else {
            Placement::Copied(subtree)
        })
    }

    /// Releases the reference of a handle whose computation was moved and
    /// compacts what it leaves behind.
    fn consume(&mut self) -> Result<()> {
        let graph = self.graph.clone();
        self.release()?;
        if let Some(graph) = graph {
            let removed = graph.lock().clean_graph()?;
            log::debug!("moved out of graph {}, {} nodes dropped", graph.id(), removed);
        }
        Ok(())
    }
}

impl Default for ComputedBase {
    fn default() -> Self {
        Self::empty()
    }
}

impl Clone for ComputedBase {
    fn clone(&self) -> Self {
        let Some(graph) = self.graph.as_ref() else {
            return Self::empty();
        };
        let registered = {
            let mut locked = graph.lock();
            let id = self.slot.get();
            register(&mut locked, id)
        };
        match registered {
            Ok((slot, key)) => Self {
                graph: Some(graph.clone()),
                slot,
                key: Some(key),
            },
            Err(err) => {
                log::error!("failed to reference cloned handle: {}", err);
                Self::empty()
            }
        }
    }
}

impl Drop for ComputedBase {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::error!("failed to release handle: {}", err);
        }
    }
}

impl fmt::Debug for ComputedBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedBase")
            .field("graph", &self.graph.as_ref().map(SharedGraph::id))
            .field("node", &self.id())
            .finish()
    }
}

/// Handle whose node is known to produce a `T`.
pub struct ComputedValue<T: ValueKind> {
    base: ComputedBase,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ValueKind> ComputedValue<T> {
    /// Wraps `base`, checking the node's declared result type.
    pub fn new(base: ComputedBase) -> Result<Self> {
        if let Some(graph) = base.graph() {
            let id = base.slot.get();
            let got = graph.lock().operation_of(id)?.result_type();
            if got != T::TYPE {
                return Err(TypeError::expected(T::TYPE, got).into());
            }
        }
        Ok(Self {
            base,
            _marker: PhantomData,
        })
    }

    pub fn constant(graph: &SharedGraph, value: T) -> Result<Self> {
        Self::new(graph.constant(value.into_value())?)
    }

    pub fn compute(&self) -> Result<T> {
        Ok(T::from_value(self.base.compute()?)?)
    }

    pub fn base(&self) -> &ComputedBase {
        &self.base
    }

    pub fn into_base(self) -> ComputedBase {
        self.base
    }
}

impl<T: ValueKind> Clone for ComputedValue<T> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ValueKind> fmt::Debug for ComputedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComputedValue")
            .field(&T::TYPE)
            .field(&self.base)
            .finish()
    }
}
