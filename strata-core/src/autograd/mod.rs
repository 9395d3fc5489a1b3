//! Gradient recording and backward pass.
//!
//! [`AutogradInterpreter`] forwards every call to an inner interpreter and,
//! when grad mode is on and some input requires grad, records the call on
//! the thread local tape. [`GradientTape::gradient`] replays the tape in
//! reverse to compute gradients and drops what it replayed.

mod grad_fn;

use crate::attr::AttrMap;
use crate::error::StrataError;
use crate::interpreter::{check_arity, expand_function, OpExprInterpContext, OpExprInterpreter};
use crate::op_expr::{OpBody, OpExpr};
use crate::tensor::{OpExprInterpState, Tensor, TensorId, TensorTuple};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One recorded operator invocation
#[derive(Debug, Clone)]
pub struct TapeNode {
    /// Applied operator
    pub op: OpExpr,
    /// Static attributes merged with call attributes
    pub attrs: AttrMap,
    /// Ids of inputs in argument order
    pub input_ids: Vec<TensorId>,
    /// Ids of outputs in argument order
    pub output_ids: Vec<TensorId>,
    /// Inputs followed by outputs, saved for backward
    pub state: OpExprInterpState,
}

impl TapeNode {
    fn input(&self, i: usize) -> &Tensor {
        &self.state.saved_tensors()[i]
    }

    fn output(&self, i: usize) -> &Tensor {
        &self.state.saved_tensors()[self.input_ids.len() + i]
    }
}

thread_local! {
    static TAPE: RefCell<Vec<TapeNode>> = const { RefCell::new(Vec::new()) };
    static GRAD_MODE: Cell<bool> = const { Cell::new(true) };
}

/// Is recording enabled on this thread
#[must_use]
pub fn is_grad_enabled() -> bool {
    GRAD_MODE.with(Cell::get)
}

/// Disables recording until dropped
#[derive(Debug)]
pub struct NoGradGuard {
    prev: bool,
}

/// Disables recording on this thread until the returned guard is dropped
#[must_use]
pub fn no_grad() -> NoGradGuard {
    NoGradGuard { prev: GRAD_MODE.with(|m| m.replace(false)) }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        GRAD_MODE.with(|m| m.set(self.prev));
    }
}

/// Scope on the thread local record of operator invocations.
///
/// Nodes recorded while a tape is alive are dropped together with it, which
/// releases the tensors they saved for backward. Nodes recorded outside of
/// any tape stay until a consuming gradient or [`GradientTape::clear`].
#[derive(Debug)]
#[must_use]
pub struct GradientTape {
    start: usize,
}

impl Default for GradientTape {
    fn default() -> Self {
        Self::new()
    }
}

impl GradientTape {
    /// Opens new scope of recording
    pub fn new() -> Self {
        Self { start: Self::len() }
    }

    /// Number of recorded nodes on this thread
    #[must_use]
    pub fn len() -> usize {
        TAPE.with(|t| t.borrow().len())
    }

    /// Is tape of this thread empty
    #[must_use]
    pub fn is_empty() -> bool {
        Self::len() == 0
    }

    /// Drops every recorded node
    pub fn clear() {
        TAPE.with(|t| t.borrow_mut().clear());
    }

    /// Copy of recorded nodes in recording order
    #[must_use]
    pub fn nodes() -> Vec<TapeNode> {
        TAPE.with(|t| t.borrow().clone())
    }

    fn record(node: TapeNode) {
        log::trace!("Recording {} {:?} -> {:?}", node.op.op_name(), node.input_ids, node.output_ids);
        TAPE.with(|t| t.borrow_mut().push(node));
    }

    /// Gradients of target with respect to sources, computed by interp.
    /// None for sources target does not depend on.
    /// Consumes the tape, nodes recorded in its scope are dropped.
    pub fn gradient(
        self,
        interp: &dyn OpExprInterpreter,
        target: &Tensor,
        sources: &[Tensor],
    ) -> Result<Vec<Option<Tensor>>, StrataError> {
        self.gradient_persistent(interp, target, sources)
    }

    /// Same as [`gradient`](GradientTape::gradient), but recording continues
    /// until the tape is dropped
    pub fn gradient_persistent(
        &self,
        interp: &dyn OpExprInterpreter,
        target: &Tensor,
        sources: &[Tensor],
    ) -> Result<Vec<Option<Tensor>>, StrataError> {
        replay(interp, &Self::nodes(), target, sources)
    }
}

impl Drop for GradientTape {
    fn drop(&mut self) {
        TAPE.with(|t| t.borrow_mut().truncate(self.start));
    }
}

fn replay(
    interp: &dyn OpExprInterpreter,
    nodes: &[TapeNode],
    target: &Tensor,
    sources: &[Tensor],
) -> Result<Vec<Option<Tensor>>, StrataError> {
    let _guard = no_grad();
    let mut grads: BTreeMap<TensorId, Tensor> = BTreeMap::new();
    grads.insert(target.id(), grad_fn::ones_like(interp, target)?);
    for node in nodes.iter().rev() {
        let out_grads: Vec<Option<Tensor>> = node.output_ids.iter().map(|id| grads.get(id).cloned()).collect();
        if out_grads.iter().all(Option::is_none) {
            continue;
        }
        let in_grads = grad_fn::backward(interp, node, &out_grads)?;
        for (id, grad) in node.input_ids.iter().zip(in_grads) {
            let Some(grad) = grad else { continue };
            let grad = match grads.remove(id) {
                Some(acc) => grad_fn::add(interp, &acc, &grad)?,
                None => grad,
            };
            grads.insert(*id, grad);
        }
    }
    Ok(sources.iter().map(|s| grads.get(&s.id()).cloned()).collect())
}

/// Interpreter recording calls for backward. Outputs are exactly those of the inner interpreter.
#[derive(Clone)]
pub struct AutogradInterpreter {
    inner: Arc<dyn OpExprInterpreter>,
}

impl AutogradInterpreter {
    /// Wraps inner interpreter
    #[must_use]
    pub fn new(inner: Arc<dyn OpExprInterpreter>) -> Self {
        Self { inner }
    }

    /// Wrapped interpreter
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn OpExprInterpreter> {
        &self.inner
    }

    /// Gradients of target with respect to sources, computed by the inner interpreter.
    /// Consumes every node recorded on this thread.
    pub fn gradient(&self, target: &Tensor, sources: &[Tensor]) -> Result<Vec<Option<Tensor>>, StrataError> {
        let nodes = TAPE.with(|t| std::mem::take(&mut *t.borrow_mut()));
        replay(self.inner.as_ref(), &nodes, target, sources)
    }

    /// Gradients of target with respect to sources, recorded nodes are kept
    pub fn gradient_persistent(&self, target: &Tensor, sources: &[Tensor]) -> Result<Vec<Option<Tensor>>, StrataError> {
        replay(self.inner.as_ref(), &GradientTape::nodes(), target, sources)
    }
}

impl std::fmt::Debug for AutogradInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AutogradInterpreter")
    }
}

impl OpExprInterpreter for AutogradInterpreter {
    fn apply_with_ctx(
        &self,
        op: &OpExpr,
        inputs: &TensorTuple,
        outputs: &mut TensorTuple,
        ctx: &OpExprInterpContext,
    ) -> Result<(), StrataError> {
        check_arity(op, inputs)?;
        if let OpBody::Function(_) = op.body() {
            return expand_function(self, op, inputs, outputs, ctx);
        }
        self.inner.apply_with_ctx(op, inputs, outputs, ctx)?;
        if is_grad_enabled() && inputs.iter().any(Tensor::requires_grad) {
            let mut state = OpExprInterpState::new();
            for x in inputs.iter().chain(outputs.iter()) {
                state.save_tensor_for_backward(x);
            }
            GradientTape::record(TapeNode {
                op: op.clone(),
                attrs: op.attrs().merged(&ctx.attrs),
                input_ids: inputs.iter().map(Tensor::id).collect(),
                output_ids: outputs.iter().map(Tensor::id).collect(),
                state,
            });
            for y in outputs.iter() {
                y.set_requires_grad(true);
            }
        }
        Ok(())
    }
}
