use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use slotmap::{new_key_type, SlotMap};

use crate::error::{GraphError, Result};

use super::types::NodeId;

new_key_type! { pub struct ReferenceKey; }

/// Receives a call whenever the node a reference points at changes id.
pub trait RewriteListener: Send + Sync {
    fn on_renumbered(&self, old: NodeId, new: NodeId);
}

/// Cached node id that follows its node through renumbering.
#[derive(Debug)]
pub struct NodeSlot {
    id: AtomicU32,
}

impl NodeSlot {
    pub fn new(id: NodeId) -> Arc<Self> {
        Arc::new(Self {
            id: AtomicU32::new(id.0),
        })
    }

    pub fn get(&self) -> NodeId {
        NodeId(self.id.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, id: NodeId) {
        self.id.store(id.0, Ordering::Release);
    }
}

impl RewriteListener for NodeSlot {
    fn on_renumbered(&self, _old: NodeId, new: NodeId) {
        self.set(new);
    }
}

struct Reference {
    node: NodeId,
    listener: Option<Weak<dyn RewriteListener>>,
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("node", &self.node)
            .field("listening", &self.listener.is_some())
            .finish()
    }
}

/// External references held on nodes, keyed so that a holder can drop its
/// reference without knowing the node's current id.
#[derive(Debug, Default)]
pub struct References {
    entries: SlotMap<ReferenceKey, Reference>,
    by_node: HashMap<NodeId, Vec<ReferenceKey>>,
}

impl References {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        node: NodeId,
        listener: Option<Weak<dyn RewriteListener>>,
    ) -> ReferenceKey {
        let key = self.entries.insert(Reference { node, listener });
        self.by_node.entry(node).or_default().push(key);
        key
    }

    /// Returns the node the reference was held on.
    pub fn remove(&mut self, key: ReferenceKey) -> Result<NodeId> {
        let reference = self
            .entries
            .remove(key)
            .ok_or(GraphError::UnknownReference)?;
        if let Some(keys) = self.by_node.get_mut(&reference.node) {
            keys.retain(|&k| k != key);
            if keys.is_empty() {
                self.by_node.remove(&reference.node);
            }
        }
        Ok(reference.node)
    }

    pub fn count(&self, node: NodeId) -> usize {
        self.by_node.get(&node).map_or(0, Vec::len)
    }

    pub fn node_of(&self, key: ReferenceKey) -> Option<NodeId> {
        self.entries.get(key).map(|r| r.node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Referenced nodes with their reference counts, in id order.
    pub fn counts(&self) -> Vec<(NodeId, usize)> {
        let mut counts: Vec<_> = self
            .by_node
            .iter()
            .map(|(&node, keys)| (node, keys.len()))
            .collect();
        counts.sort();
        counts
    }

    /// Fails if `mapping` (old index to new id) would drop a referenced node.
    pub fn check_mapping(&self, mapping: &[NodeId]) -> Result<()> {
        for &node in self.by_node.keys() {
            let mapped = mapping
                .get(node.index())
                .copied()
                .unwrap_or(NodeId::INVALID);
            if !mapped.is_valid() {
                return Err(GraphError::DanglingReference(node));
            }
        }
        Ok(())
    }

    /// Moves every reference through `mapping` and notifies the listeners of
    /// the ones whose id changed. Returns the number of notifications sent.
    pub fn renumber(&mut self, mapping: &[NodeId]) -> Result<usize> {
        self.check_mapping(mapping)?;

        let mut notified = 0;
        let mut by_node: HashMap<NodeId, Vec<ReferenceKey>> = HashMap::new();
        for (key, reference) in self.entries.iter_mut() {
            let old = reference.node;
            let new = mapping[old.index()];
            if new != old {
                reference.node = new;
                if let Some(listener) = reference.listener.as_ref().and_then(Weak::upgrade) {
                    listener.on_renumbered(old, new);
                    notified += 1;
                }
            }
            by_node.entry(new).or_default().push(key);
        }
        self.by_node = by_node;
        Ok(notified)
    }
}
