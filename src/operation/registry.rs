use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::error::{GraphError, Result};
use crate::value::ValueType;

use super::{Operation, OperationId};

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

/// Name of the built-in operation carrying constants of `ty`.
pub fn constant_name(ty: ValueType) -> String {
    format!("const.{}", ty.name())
}

/// Table of operations addressed by name or [`OperationId`].
///
/// A registry is populated through `&mut` and then shared with graphs as an
/// `Arc<Registry>`, after which it can no longer change.
#[derive(Debug)]
pub struct Registry {
    operations: Vec<Arc<Operation>>,
    by_name: HashMap<String, OperationId>,
}

impl Registry {
    /// Creates a registry holding the constant operation for every value type.
    pub fn new() -> Self {
        let mut registry = Self {
            operations: Vec::new(),
            by_name: HashMap::new(),
        };
        for ty in ValueType::ALL {
            registry.insert(Operation::constant(ty));
        }
        registry
    }

    /// Installs `registry` as the process-wide registry returned by [`Registry::global`].
    pub fn install_global(registry: Registry) -> Result<Arc<Registry>> {
        let registry = Arc::new(registry);
        GLOBAL
            .set(Arc::clone(&registry))
            .map_err(|_| GraphError::RegistryAlreadyInstalled)?;
        log::debug!(
            "installed global registry with {} operations",
            registry.len()
        );
        Ok(registry)
    }

    /// The process-wide registry. Falls back to the built-in constants when
    /// nothing was installed before first use.
    pub fn global() -> Arc<Registry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Registry::new())))
    }

    pub fn add(&mut self, operation: Operation) -> Result<OperationId> {
        if self.by_name.contains_key(operation.name()) {
            return Err(GraphError::DuplicateOperation(operation.name().to_string()));
        }
        if self.operations.len() >= OperationId::NONE.index() {
            return Err(GraphError::OperationSpaceExhausted);
        }
        Ok(self.insert(operation))
    }

    fn insert(&mut self, operation: Operation) -> OperationId {
        let id = OperationId(self.operations.len() as u16);
        self.by_name.insert(operation.name().to_string(), id);
        self.operations.push(Arc::new(operation));
        id
    }

    pub fn find(&self, name: &str) -> Result<OperationId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownOperation(name.to_string()))
    }

    pub fn find_constant(&self, ty: ValueType) -> Result<OperationId> {
        self.by_name
            .get(&constant_name(ty))
            .copied()
            .ok_or(GraphError::UnknownConstant(ty))
    }

    pub fn get(&self, id: OperationId) -> Result<&Arc<Operation>> {
        self.operations
            .get(id.index())
            .ok_or(GraphError::InvalidOperation(id))
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (OperationId, &Arc<Operation>)> {
        self.operations
            .iter()
            .enumerate()
            .map(|(i, op)| (OperationId(i as u16), op))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
