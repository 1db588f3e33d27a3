use std::fmt;

use crate::dimensions::Dimensions;
use crate::operation::OperationId;
use crate::value::Value;

const NODE_DOMAIN: &[u8] = b"lazygraph:node:v1";
const CONSTANT_DOMAIN: &[u8] = b"lazygraph:constant:v1";

/// 128-bit content hash identifying a node by what it computes.
///
/// Two nodes with equal hashes are treated as the same computation. The
/// graph checks operation, arity and dimensions on every hit and reports a
/// collision instead of aliasing mismatched nodes.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructuralHash(pub u128);

impl StructuralHash {
    pub fn of_node<I>(operation: OperationId, dims: &Dimensions, inputs: I) -> Self
    where
        I: IntoIterator<Item = StructuralHash>,
    {
        let mut hasher = blake3::Hasher::new();
        hasher.update(NODE_DOMAIN);
        hasher.update(&operation.0.to_le_bytes());
        hasher.update(&dims.to_bytes());
        for input in inputs {
            hasher.update(&input.0.to_le_bytes());
        }
        Self::truncate(hasher)
    }

    pub fn of_constant(operation: OperationId, dims: &Dimensions, value: &Value) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(CONSTANT_DOMAIN);
        hasher.update(&operation.0.to_le_bytes());
        hasher.update(&dims.to_bytes());
        value.hash_bytes(&mut hasher);
        Self::truncate(hasher)
    }

    fn truncate(hasher: blake3::Hasher) -> Self {
        let digest = hasher.finalize();
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&digest.as_bytes()[0..16]);
        Self(u128::from_le_bytes(raw))
    }
}

impl fmt::Debug for StructuralHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StructuralHash({:032x})", self.0)
    }
}

impl fmt::Display for StructuralHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", (self.0 >> 96) as u32)
    }
}
