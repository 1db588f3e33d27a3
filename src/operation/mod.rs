//! Operation descriptors and the processing styles the scheduler switches on.

mod group;
mod registry;

pub(crate) use group::GroupFunction;
pub use group::{GroupDispatchFn, GroupFactory, GroupInput, GroupMember, GroupPlan};
pub use registry::{constant_name, Registry};

use std::fmt;
use std::sync::Arc;

use arrayvec::ArrayVec;
use parking_lot::{const_mutex, Mutex};

use crate::dimensions::Dimensions;
use crate::error::{GraphError, Result};
use crate::value::{Value, ValueType};

pub const MAX_OPERATION_INPUTS: usize = 16;

/// Serialises every `Solitary` call in the process, across all graphs.
static SOLITARY_LOCK: Mutex<()> = const_mutex(());

/// Index into a [`Registry`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u16);

impl OperationId {
    pub const NONE: OperationId = OperationId(u16::MAX);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// How an operation may be scheduled. This says nothing about thread
/// counts, only whether the operation can be fused with its neighbours and
/// whether it must run alone.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProcessingStyle {
    /// Carries a constant; never computed.
    Value,
    Simple,
    /// Never runs concurrently with another solitary operation.
    Solitary,
    SingleThreaded,
    MultiThreaded,
    /// Each output item depends on the item at the same position in its input.
    OneToOne,
    /// Each output item may depend on several neighbouring input items.
    NToOne,
}

impl ProcessingStyle {
    pub fn is_fusable(&self) -> bool {
        matches!(self, ProcessingStyle::OneToOne | ProcessingStyle::NToOne)
    }
}

/// Direct computation: input values in declared order plus the node's dimensions.
pub type DirectFn = Arc<dyn Fn(&[Value], &Dimensions) -> Result<Value> + Send + Sync>;

/// Function object of an operation, one variant per processing style.
///
/// The fusable styles may carry a group factory. When the operation seeds a
/// subgroup, the factory is offered the group's plan and may return a single
/// dispatch for the whole cluster.
#[derive(Clone)]
pub enum OperationFunction {
    Value,
    Simple(DirectFn),
    Solitary(DirectFn),
    SingleThreaded(DirectFn),
    MultiThreaded(DirectFn),
    OneToOne {
        direct: DirectFn,
        group: Option<GroupFactory>,
    },
    NToOne {
        direct: DirectFn,
        group: Option<GroupFactory>,
    },
}

impl OperationFunction {
    pub fn style(&self) -> ProcessingStyle {
        match self {
            OperationFunction::Value => ProcessingStyle::Value,
            OperationFunction::Simple(_) => ProcessingStyle::Simple,
            OperationFunction::Solitary(_) => ProcessingStyle::Solitary,
            OperationFunction::SingleThreaded(_) => ProcessingStyle::SingleThreaded,
            OperationFunction::MultiThreaded(_) => ProcessingStyle::MultiThreaded,
            OperationFunction::OneToOne { .. } => ProcessingStyle::OneToOne,
            OperationFunction::NToOne { .. } => ProcessingStyle::NToOne,
        }
    }

    pub fn group_factory(&self) -> Option<&GroupFactory> {
        match self {
            OperationFunction::OneToOne { group, .. } | OperationFunction::NToOne { group, .. } => {
                group.as_ref()
            }
            _ => None,
        }
    }

    fn direct(&self) -> Option<&DirectFn> {
        match self {
            OperationFunction::Value => None,
            OperationFunction::Simple(f)
            | OperationFunction::Solitary(f)
            | OperationFunction::SingleThreaded(f)
            | OperationFunction::MultiThreaded(f)
            | OperationFunction::OneToOne { direct: f, .. }
            | OperationFunction::NToOne { direct: f, .. } => Some(f),
        }
    }
}

impl fmt::Debug for OperationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(<fn>)", self.style())
    }
}

/// Immutable description of a kind of computation.
#[derive(Debug, Clone)]
pub struct Operation {
    name: String,
    input_types: ArrayVec<ValueType, MAX_OPERATION_INPUTS>,
    result_type: ValueType,
    function: OperationFunction,
}

impl Operation {
    pub fn new(
        name: impl Into<String>,
        input_types: &[ValueType],
        result_type: ValueType,
        function: OperationFunction,
    ) -> Result<Self> {
        let name = name.into();
        let input_types = ArrayVec::try_from(input_types).map_err(|_| GraphError::TooManyInputs {
            operation: name.clone(),
            count: input_types.len(),
            max: MAX_OPERATION_INPUTS,
        })?;
        Ok(Self {
            name,
            input_types,
            result_type,
            function,
        })
    }

    /// Placeholder operation for nodes that carry a constant of `ty`.
    pub fn constant(ty: ValueType) -> Self {
        Self {
            name: constant_name(ty),
            input_types: ArrayVec::new(),
            result_type: ty,
            function: OperationFunction::Value,
        }
    }

    pub fn simple<F>(name: &str, inputs: &[ValueType], result: ValueType, f: F) -> Result<Self>
    where
        F: Fn(&[Value], &Dimensions) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, inputs, result, OperationFunction::Simple(Arc::new(f)))
    }

    pub fn solitary<F>(name: &str, inputs: &[ValueType], result: ValueType, f: F) -> Result<Self>
    where
        F: Fn(&[Value], &Dimensions) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, inputs, result, OperationFunction::Solitary(Arc::new(f)))
    }

    pub fn single_threaded<F>(
        name: &str,
        inputs: &[ValueType],
        result: ValueType,
        f: F,
    ) -> Result<Self>
    where
        F: Fn(&[Value], &Dimensions) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(
            name,
            inputs,
            result,
            OperationFunction::SingleThreaded(Arc::new(f)),
        )
    }

    pub fn multi_threaded<F>(
        name: &str,
        inputs: &[ValueType],
        result: ValueType,
        f: F,
    ) -> Result<Self>
    where
        F: Fn(&[Value], &Dimensions) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(
            name,
            inputs,
            result,
            OperationFunction::MultiThreaded(Arc::new(f)),
        )
    }

    pub fn one_to_one<F>(name: &str, inputs: &[ValueType], result: ValueType, f: F) -> Result<Self>
    where
        F: Fn(&[Value], &Dimensions) -> Result<Value> + Send + Sync + 'static,
    {
        let function = OperationFunction::OneToOne {
            direct: Arc::new(f),
            group: None,
        };
        Self::new(name, inputs, result, function)
    }

    pub fn n_to_one<F>(name: &str, inputs: &[ValueType], result: ValueType, f: F) -> Result<Self>
    where
        F: Fn(&[Value], &Dimensions) -> Result<Value> + Send + Sync + 'static,
    {
        let function = OperationFunction::NToOne {
            direct: Arc::new(f),
            group: None,
        };
        Self::new(name, inputs, result, function)
    }

    /// Attaches a group factory to a fusable operation.
    pub fn with_group_factory<G>(mut self, factory: G) -> Result<Self>
    where
        G: Fn(&GroupPlan) -> Option<GroupDispatchFn> + Send + Sync + 'static,
    {
        let style = self.style();
        match &mut self.function {
            OperationFunction::OneToOne { group, .. } | OperationFunction::NToOne { group, .. } => {
                *group = Some(Arc::new(factory));
            }
            _ => {
                return Err(GraphError::Operation {
                    operation: self.name,
                    message: format!("{:?} operations cannot be fused", style),
                })
            }
        }
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.input_types.len()
    }

    pub fn input_types(&self) -> &[ValueType] {
        &self.input_types
    }

    pub fn result_type(&self) -> ValueType {
        self.result_type
    }

    pub fn style(&self) -> ProcessingStyle {
        self.function.style()
    }

    pub fn function(&self) -> &OperationFunction {
        &self.function
    }

    pub(crate) fn check_result(&self, value: &Value) -> Result<()> {
        if value.value_type() != self.result_type {
            return Err(GraphError::ResultTypeMismatch {
                operation: self.name.clone(),
                expected: self.result_type,
                got: value.value_type(),
            });
        }
        Ok(())
    }

    /// Runs the direct computation and checks the result against the
    /// declared result type.
    pub fn invoke(&self, inputs: &[Value], dims: &Dimensions) -> Result<Value> {
        let f = self.function.direct().ok_or_else(|| GraphError::Operation {
            operation: self.name.clone(),
            message: "constant operations cannot be invoked".to_string(),
        })?;

        let value = match self.function {
            OperationFunction::Solitary(_) => {
                let _guard = SOLITARY_LOCK.lock();
                f(inputs, dims)?
            }
            _ => f(inputs, dims)?,
        };
        self.check_result(&value)?;
        Ok(value)
    }
}
