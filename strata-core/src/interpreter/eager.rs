use super::lazy::logical_desc;
use super::{check_arity, check_outputs, consistent, expand_function, mirrored, OpExprInterpContext, OpExprInterpreter};
use crate::attr::AttrMap;
use crate::backend::{KernelBackend, KernelContext};
use crate::device::{Device, Placement};
use crate::error::StrataError;
use crate::host::HostData;
use crate::infer::{InferenceRegistry, TensorDesc};
use crate::op_expr::{Initializer, OpBody, OpExpr, OpExprKind, VariableOpExpr};
use crate::rng::{default_generator, Generator};
use crate::sbp::SbpRegistry;
use crate::tensor::{ConsistentBlob, Tensor, TensorImpl, TensorTuple};
use std::sync::Arc;

/// Distribution policy of eager interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EagerPolicy {
    /// Every tensor fully resident on one device
    Mirrored,
    /// Tensors span a placement, layouts are reconciled through sbp signatures
    Consistent,
}

/// Handler of one operator kind under one policy
pub(super) type Handler = fn(
    &EagerInterpreter,
    &OpExpr,
    &TensorTuple,
    &mut TensorTuple,
    &OpExprInterpContext,
) -> Result<(), StrataError>;

/// Dispatch table of builtin operator kinds, function ops are expanded before lookup
fn handler(kind: OpExprKind, policy: EagerPolicy) -> Option<Handler> {
    use EagerPolicy::{Consistent, Mirrored};
    use OpExprKind as K;
    Some(match (kind, policy) {
        (K::User, Mirrored) => mirrored::user_op,
        (K::User, Consistent) => consistent::user_op,
        (K::Variable, Mirrored) => mirrored::variable,
        (K::Variable, Consistent) => consistent::variable,
        (K::CastToMirrored, _) => cast_to_mirrored,
        (K::CastFromMirrored, _) => cast_from_mirrored,
        (K::DistributeSplit, Mirrored) => mirrored::distribute_split,
        (K::DistributeSplit, Consistent) => consistent::distribute_split,
        (K::DistributeClone, Mirrored) => mirrored::distribute_clone,
        (K::DistributeClone, Consistent) => consistent::distribute_clone,
        (K::DistributeConcat, Mirrored) => mirrored::distribute_concat,
        (K::DistributeConcat, Consistent) => consistent::distribute_concat,
        (K::DistributeAdd, Mirrored) => mirrored::distribute_add,
        (K::DistributeAdd, Consistent) => consistent::distribute_add,
        (K::Function, _) => return None,
    })
}

/// Eager interpreter built by [`EagerInterpreter::mirrored`]
pub type EagerMirroredInterpreter = EagerInterpreter;
/// Eager interpreter built by [`EagerInterpreter::consistent`]
pub type EagerConsistentInterpreter = EagerInterpreter;

/// Interpreter executing operators immediately on a kernel backend
#[derive(Debug, Clone)]
pub struct EagerInterpreter {
    pub(super) policy: EagerPolicy,
    pub(super) backend: Arc<dyn KernelBackend>,
    pub(super) generator: Arc<Generator>,
    pub(super) inference: InferenceRegistry,
    pub(super) sbp: SbpRegistry,
    pub(super) device: Device,
    pub(super) placement: Placement,
}

impl EagerInterpreter {
    /// Mirrored interpreter, variables are created on cpu:0
    #[must_use]
    pub fn mirrored(backend: Arc<dyn KernelBackend>) -> Self {
        Self {
            policy: EagerPolicy::Mirrored,
            backend,
            generator: default_generator(),
            inference: InferenceRegistry::builtin(),
            sbp: SbpRegistry::builtin(),
            device: Device::default(),
            placement: Placement::single(Device::default()),
        }
    }

    /// Consistent interpreter, variables are laid out over placement
    #[must_use]
    pub fn consistent(backend: Arc<dyn KernelBackend>, placement: Placement) -> Self {
        Self { policy: EagerPolicy::Consistent, device: placement.device(0), placement, ..Self::mirrored(backend) }
    }

    /// Same interpreter creating mirrored variables on device
    #[must_use]
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Same interpreter drawing random numbers from generator
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<Generator>) -> Self {
        self.generator = generator;
        self
    }

    /// Same interpreter with different inference registry
    #[must_use]
    pub fn with_inference(mut self, inference: InferenceRegistry) -> Self {
        self.inference = inference;
        self
    }

    /// Same interpreter with different sbp registry
    #[must_use]
    pub fn with_sbp_registry(mut self, sbp: SbpRegistry) -> Self {
        self.sbp = sbp;
        self
    }

    /// Distribution policy
    #[must_use]
    pub const fn policy(&self) -> EagerPolicy {
        self.policy
    }

    /// Kernel backend
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn KernelBackend> {
        &self.backend
    }

    /// Generator used by kernels without generator in their state
    #[must_use]
    pub fn generator(&self) -> &Arc<Generator> {
        &self.generator
    }

    pub(super) fn kernel_ctx<'a>(&'a self, attrs: &'a AttrMap, ctx: &'a OpExprInterpContext) -> KernelContext<'a> {
        KernelContext { attrs, state: ctx.state.as_deref(), generator: &self.generator }
    }

    /// Full logical value of variable drawn from the interpreter's generator
    pub(super) fn init_variable(&self, var: &VariableOpExpr) -> HostData {
        let n = var.shape.numel();
        match var.initializer {
            Initializer::Zeros => HostData::zeros(var.dtype, n),
            Initializer::Ones => HostData::ones(var.dtype, n),
            Initializer::Constant(x) => HostData::from_f64(var.dtype, &vec![x; n]),
            Initializer::Uniform { low, high } => HostData::from_f64(var.dtype, &self.generator.uniform(n, low, high)),
            Initializer::Normal { mean, std } => HostData::from_f64(var.dtype, &self.generator.normal(n, mean, std)),
        }
    }
}

/// Every input must be mirrored eager
pub(super) fn expect_mirrored(op: &OpExpr, inputs: &TensorTuple) -> Result<(), StrataError> {
    for x in inputs {
        match x.imp() {
            TensorImpl::MirroredEager(_) => {}
            TensorImpl::ConsistentEager(_) => {
                return Err(StrataError::device_error(format!(
                    "{} expects mirrored inputs, got {x}",
                    op.op_name()
                )))
            }
            _ => {
                return Err(StrataError::interpret_error(format!(
                    "eager operator {} got lazy input {x}",
                    op.op_name()
                )))
            }
        }
    }
    Ok(())
}

/// Every input must be consistent eager
pub(super) fn expect_consistent(op: &OpExpr, inputs: &TensorTuple) -> Result<(), StrataError> {
    for x in inputs {
        match x.imp() {
            TensorImpl::ConsistentEager(_) => {}
            TensorImpl::MirroredEager(_) => {
                return Err(StrataError::device_error(format!(
                    "{} expects consistent inputs, got {x}",
                    op.op_name()
                )))
            }
            _ => {
                return Err(StrataError::interpret_error(format!(
                    "eager operator {} got lazy input {x}",
                    op.op_name()
                )))
            }
        }
    }
    Ok(())
}

/// Consistent tensor into its local components, no data movement
fn cast_to_mirrored(
    _: &EagerInterpreter,
    op: &OpExpr,
    inputs: &TensorTuple,
    outputs: &mut TensorTuple,
    _: &OpExprInterpContext,
) -> Result<(), StrataError> {
    expect_consistent(op, inputs)?;
    let blob = inputs[0].consistent_blob();
    if blob.placement.parallel_num() != op.output_arity() {
        return Err(StrataError::device_error(format!(
            "{} declares {} outputs, but input spans {}",
            op.op_name(),
            op.output_arity(),
            blob.placement
        )));
    }
    outputs.extend(blob.components.iter().cloned().map(Tensor::mirrored));
    Ok(())
}

/// Mirrored tensors on distinct devices into one consistent tensor, no data movement
fn cast_from_mirrored(
    _: &EagerInterpreter,
    op: &OpExpr,
    inputs: &TensorTuple,
    outputs: &mut TensorTuple,
    _: &OpExprInterpContext,
) -> Result<(), StrataError> {
    let OpBody::CastFromMirrored { sbp, .. } = op.body() else {
        return Err(StrataError::interpret_error(format!("{} is not cast from mirrored", op.op_name())));
    };
    expect_mirrored(op, inputs)?;
    let devices: Vec<Device> = inputs.iter().map(Tensor::device).collect();
    let placement = Placement::from_devices(&devices)?;
    let descs: Vec<TensorDesc> = inputs.iter().map(|x| x.desc().clone()).collect();
    let desc = logical_desc(op, &descs, *sbp)?;
    outputs.push(Tensor::consistent(ConsistentBlob {
        desc,
        placement,
        sbp: *sbp,
        components: inputs.iter().map(|x| x.blob().clone()).collect(),
    }));
    Ok(())
}

impl OpExprInterpreter for EagerInterpreter {
    fn apply_with_ctx(
        &self,
        op: &OpExpr,
        inputs: &TensorTuple,
        outputs: &mut TensorTuple,
        ctx: &OpExprInterpContext,
    ) -> Result<(), StrataError> {
        check_arity(op, inputs)?;
        let Some(handler) = handler(op.kind(), self.policy) else {
            return expand_function(self, op, inputs, outputs, ctx);
        };
        log::debug!("Eager {:?} {} ({})", self.policy, op.op_name(), op.op_type());
        outputs.clear();
        handler(self, op, inputs, outputs, ctx)?;
        check_outputs(op, outputs)
    }
}
