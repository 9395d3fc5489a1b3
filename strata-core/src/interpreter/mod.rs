//! Operator interpreters.
//!
//! An interpreter applies an [`OpExpr`] to a [`TensorTuple`] of inputs and
//! fills a tuple of outputs. [`LazyInterpreter`] appends nodes to a graph,
//! [`EagerInterpreter`] computes values immediately under a mirrored or
//! consistent policy, and [`AutogradInterpreter`](crate::autograd::AutogradInterpreter)
//! wraps either of them and records what is needed for backward.

mod consistent;
mod eager;
mod lazy;
mod mirrored;

pub use eager::{EagerConsistentInterpreter, EagerInterpreter, EagerMirroredInterpreter, EagerPolicy};
pub use lazy::{LazyGraph, LazyInterpreter, LazyOpNode};

use crate::attr::AttrMap;
use crate::error::StrataError;
use crate::op_expr::{OpBody, OpExpr};
use crate::tensor::{Tensor, TensorTuple};
use std::any::Any;
use std::sync::Arc;

/// Per call context of interpreter
#[derive(Clone, Default)]
pub struct OpExprInterpContext {
    /// Call attributes, override static attributes of operator
    pub attrs: AttrMap,
    /// Opaque kernel state
    pub state: Option<Arc<dyn Any + Send + Sync>>,
}

impl OpExprInterpContext {
    /// Context with attributes and no kernel state
    #[must_use]
    pub fn new(attrs: AttrMap) -> Self {
        Self { attrs, state: None }
    }

    /// Same context with kernel state
    #[must_use]
    pub fn with_state(mut self, state: Arc<dyn Any + Send + Sync>) -> Self {
        self.state = Some(state);
        self
    }
}

impl std::fmt::Debug for OpExprInterpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpExprInterpContext")
            .field("attrs", &self.attrs)
            .field("state", &self.state.is_some())
            .finish()
    }
}

/// Anything that can apply operator expressions to tensors
pub trait OpExprInterpreter: Send + Sync {
    /// Applies op to inputs. Outputs are cleared and refilled in declared order.
    fn apply_with_ctx(
        &self,
        op: &OpExpr,
        inputs: &TensorTuple,
        outputs: &mut TensorTuple,
        ctx: &OpExprInterpContext,
    ) -> Result<(), StrataError>;

    /// Applies op with call attributes and no kernel state
    fn apply_with_attrs(
        &self,
        op: &OpExpr,
        inputs: &TensorTuple,
        outputs: &mut TensorTuple,
        attrs: &AttrMap,
    ) -> Result<(), StrataError> {
        self.apply_with_ctx(op, inputs, outputs, &OpExprInterpContext::new(attrs.clone()))
    }

    /// Applies op without call attributes
    fn apply(&self, op: &OpExpr, inputs: &TensorTuple, outputs: &mut TensorTuple) -> Result<(), StrataError> {
        self.apply_with_attrs(op, inputs, outputs, &AttrMap::new())
    }

    /// Applies op and returns outputs
    fn call(&self, op: &OpExpr, inputs: &[Tensor], attrs: &AttrMap) -> Result<TensorTuple, StrataError> {
        let mut outputs = TensorTuple::new();
        self.apply_with_attrs(op, &TensorTuple::from(inputs), &mut outputs, attrs)?;
        Ok(outputs)
    }
}

/// Fails with arity mismatch if inputs do not match declared input arity
pub fn check_arity(op: &OpExpr, inputs: &TensorTuple) -> Result<(), StrataError> {
    if inputs.len() == op.input_arity() {
        Ok(())
    } else {
        Err(StrataError::arity(op.op_name(), op.input_arity(), inputs.len()))
    }
}

/// Checks that interpreter produced as many outputs as op declares
pub(crate) fn check_outputs(op: &OpExpr, outputs: &TensorTuple) -> Result<(), StrataError> {
    if outputs.len() == op.output_arity() {
        Ok(())
    } else {
        Err(StrataError::arity(op.op_name(), op.output_arity(), outputs.len()))
    }
}

/// Expands function op through interp, step by step.
/// Steps run with their own attributes and the kernel state of ctx.
pub(crate) fn expand_function(
    interp: &dyn OpExprInterpreter,
    op: &OpExpr,
    inputs: &TensorTuple,
    outputs: &mut TensorTuple,
    ctx: &OpExprInterpContext,
) -> Result<(), StrataError> {
    let OpBody::Function(function) = op.body() else {
        return Err(StrataError::interpret_error(format!("{} is not a function", op.op_name())));
    };
    log::debug!("Expanding function {} with {} steps", op.op_name(), function.steps.len());
    let mut values: Vec<Tensor> = inputs.to_vec();
    for step in &function.steps {
        let step_inputs: TensorTuple = step.inputs.iter().map(|i| values[*i].clone()).collect();
        let mut step_outputs = TensorTuple::new();
        let step_ctx = OpExprInterpContext { attrs: step.attrs.clone(), state: ctx.state.clone() };
        interp.apply_with_ctx(&step.op, &step_inputs, &mut step_outputs, &step_ctx)?;
        values.extend(step_outputs);
    }
    outputs.clear();
    outputs.extend(function.outputs.iter().map(|i| values[*i].clone()));
    Ok(())
}
