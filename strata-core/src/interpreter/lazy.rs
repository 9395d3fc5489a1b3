use super::{check_arity, check_outputs, expand_function, OpExprInterpContext, OpExprInterpreter};
use crate::attr::AttrMap;
use crate::device::{Device, Placement};
use crate::error::StrataError;
use crate::infer::{InferenceRegistry, TensorDesc};
use crate::op_expr::{OpBody, OpExpr};
use crate::sbp::{Distribute, Sbp};
use crate::shape::balanced_split;
use crate::tensor::{LazyBlob, LogicalBlobId, Tensor, TensorImpl, TensorTuple};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Operator node of lazily built graph
#[derive(Debug, Clone)]
pub struct LazyOpNode {
    /// Unique name of node in graph
    pub op_name: String,
    /// Operator type
    pub op_type: String,
    /// Static attributes merged with call attributes
    pub attrs: AttrMap,
    /// Logical blob names of inputs
    pub inputs: Vec<String>,
    /// Logical blob names of outputs
    pub outputs: Vec<String>,
}

/// Deferred graph of one job
#[derive(Debug)]
pub struct LazyGraph {
    job_name: Arc<str>,
    nodes: Vec<LazyOpNode>,
    blobs: BTreeMap<String, TensorDesc>,
    name_counts: BTreeMap<String, usize>,
}

impl LazyGraph {
    /// Name of job
    #[must_use]
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Nodes in insertion order
    #[must_use]
    pub fn nodes(&self) -> &[LazyOpNode] {
        &self.nodes
    }

    /// Node by name
    #[must_use]
    pub fn node(&self, op_name: &str) -> Option<&LazyOpNode> {
        self.nodes.iter().find(|n| n.op_name == op_name)
    }

    /// Desc of logical blob
    #[must_use]
    pub fn blob_desc(&self, lbn: &str) -> Option<&TensorDesc> {
        self.blobs.get(lbn)
    }

    fn unique_name(&mut self, op_name: &str) -> String {
        let count = self.name_counts.entry(op_name.into()).or_insert(0);
        *count += 1;
        if *count == 1 {
            op_name.into()
        } else {
            format!("{op_name}_{}", *count - 1)
        }
    }
}

/// Where a lazy output lives
#[derive(Clone)]
enum LazyPlace {
    Mirrored(Device),
    Consistent(Placement),
}

/// Interpreter that builds a graph instead of computing.
/// Holds no backend, so it can never touch device memory.
#[derive(Debug, Clone)]
pub struct LazyInterpreter {
    graph: Arc<Mutex<LazyGraph>>,
    inference: InferenceRegistry,
    device: Device,
    placement: Option<Placement>,
}

impl LazyInterpreter {
    /// Interpreter building mirrored graph of job on default device
    #[must_use]
    pub fn new(job_name: &str) -> Self {
        Self {
            graph: Arc::new(Mutex::new(LazyGraph {
                job_name: job_name.into(),
                nodes: Vec::new(),
                blobs: BTreeMap::new(),
                name_counts: BTreeMap::new(),
            })),
            inference: InferenceRegistry::builtin(),
            device: Device::default(),
            placement: None,
        }
    }

    /// Interpreter whose variables are consistent over placement
    #[must_use]
    pub fn consistent(job_name: &str, placement: Placement) -> Self {
        Self { device: placement.device(0), placement: Some(placement), ..Self::new(job_name) }
    }

    /// Same interpreter with different inference registry
    #[must_use]
    pub fn with_inference(mut self, inference: InferenceRegistry) -> Self {
        self.inference = inference;
        self
    }

    /// Locked graph
    pub fn graph(&self) -> MutexGuard<'_, LazyGraph> {
        self.graph.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Adds input node to graph and returns its output
    pub fn input(&self, op_name: &str, desc: TensorDesc) -> Tensor {
        let place = match &self.placement {
            Some(placement) => LazyPlace::Consistent(placement.clone()),
            None => LazyPlace::Mirrored(self.device),
        };
        let mut outputs =
            self.add_node(op_name, "input", AttrMap::new(), &TensorTuple::new(), vec![desc], &[place], Distribute::Auto);
        outputs.remove(0)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_node(
        &self,
        op_name: &str,
        op_type: &str,
        attrs: AttrMap,
        inputs: &TensorTuple,
        descs: Vec<TensorDesc>,
        places: &[LazyPlace],
        distribute: Distribute,
    ) -> Vec<Tensor> {
        let mut graph = self.graph();
        let op_name = graph.unique_name(op_name);
        let job_name = graph.job_name.clone();
        let outputs: Vec<Tensor> = descs
            .into_iter()
            .zip(places)
            .enumerate()
            .map(|(i, (desc, place))| {
                let blob = LazyBlob {
                    lbi: LogicalBlobId { op_name: op_name.as_str().into(), blob_name: format!("out_{i}").into() },
                    job_name: job_name.clone(),
                    distribute,
                    desc,
                };
                graph.blobs.insert(blob.lbi.lbn(), blob.desc.clone());
                Tensor::new(match place {
                    LazyPlace::Mirrored(device) => TensorImpl::MirroredLazy { blob, device: *device },
                    LazyPlace::Consistent(placement) => {
                        TensorImpl::ConsistentLazy { blob, placement: placement.clone() }
                    }
                })
            })
            .collect();
        log::debug!("Lazy node {op_name} ({op_type}) added to job {job_name}");
        graph.nodes.push(LazyOpNode {
            op_name,
            op_type: op_type.into(),
            attrs,
            inputs: inputs.iter().map(|x| x.lbi().lbn()).collect(),
            outputs: outputs.iter().map(|x| x.lbi().lbn()).collect(),
        });
        outputs
    }

    fn builtin(&self, op: &OpExpr, inputs: &TensorTuple, attrs: AttrMap) -> Result<Vec<Tensor>, StrataError> {
        if let Some(x) = inputs.iter().find(|x| !x.is_lazy()) {
            return Err(StrataError::interpret_error(format!(
                "lazy operator {} got eager input {x}",
                op.op_name()
            )));
        }
        let descs: Vec<TensorDesc> = inputs.iter().map(|x| x.desc().clone()).collect();
        let (out_descs, places, distribute): (Vec<TensorDesc>, Vec<LazyPlace>, Distribute) = match op.body() {
            OpBody::User(user) => {
                let place = common_place(op, inputs, self.device)?;
                let out = self.inference.infer(&user.op_type, &attrs, &descs)?;
                let places = vec![place; out.len()];
                (out, places, Distribute::Auto)
            }
            OpBody::Variable(var) => {
                let place = match &self.placement {
                    Some(placement) => LazyPlace::Consistent(placement.clone()),
                    None => LazyPlace::Mirrored(self.device),
                };
                let distribute = match var.sbp {
                    Sbp::Split(axis) => Distribute::Split(axis),
                    Sbp::Broadcast => Distribute::Broadcast,
                    Sbp::PartialSum => Distribute::Auto,
                };
                (vec![TensorDesc { shape: var.shape.clone(), dtype: var.dtype }], vec![place], distribute)
            }
            OpBody::CastToMirrored { num_outputs } => {
                let x = &inputs[0];
                if !x.is_consistent() {
                    return Err(StrataError::interpret_error(format!("{} expects consistent input", op.op_name())));
                }
                let placement = x.placement();
                if placement.parallel_num() != *num_outputs {
                    return Err(StrataError::arity(op.op_name(), *num_outputs, placement.parallel_num()));
                }
                let out = match x.distribute() {
                    Distribute::Split(axis) => balanced_split(x.shape().dim(axis)?, *num_outputs)
                        .into_iter()
                        .map(|r| TensorDesc { shape: x.shape().with_dim(axis, r.len()), dtype: x.dtype() })
                        .collect(),
                    _ => vec![x.desc().clone(); *num_outputs],
                };
                (out, placement.devices().map(LazyPlace::Mirrored).collect(), Distribute::Auto)
            }
            OpBody::CastFromMirrored { sbp, .. } => {
                if let Some(x) = inputs.iter().find(|x| x.is_consistent()) {
                    return Err(StrataError::interpret_error(format!("{} expects mirrored inputs, got {x}", op.op_name())));
                }
                let devices: Vec<Device> = inputs.iter().map(Tensor::device).collect();
                let placement = Placement::from_devices(&devices)?;
                let desc = logical_desc(op, &descs, *sbp)?;
                let distribute = match sbp {
                    Sbp::Split(axis) => Distribute::Split(*axis),
                    Sbp::Broadcast => Distribute::Broadcast,
                    Sbp::PartialSum => Distribute::Auto,
                };
                (vec![desc], vec![LazyPlace::Consistent(placement)], distribute)
            }
            OpBody::DistributeSplit { axis, placement } => {
                let x = &descs[0];
                let out = balanced_split(x.shape.dim(*axis)?, placement.parallel_num())
                    .into_iter()
                    .map(|r| TensorDesc { shape: x.shape.with_dim(*axis, r.len()), dtype: x.dtype })
                    .collect();
                (out, target_places(&inputs[0], placement), Distribute::Auto)
            }
            OpBody::DistributeClone { placement } => (
                vec![descs[0].clone(); placement.parallel_num()],
                target_places(&inputs[0], placement),
                Distribute::Broadcast,
            ),
            OpBody::DistributeConcat { axis, .. } => {
                let desc = logical_desc(op, &descs, Sbp::Split(*axis))?;
                (vec![desc], vec![common_place(op, &TensorTuple::from(&inputs[..1]), self.device)?], Distribute::Auto)
            }
            OpBody::DistributeAdd { .. } => {
                let desc = logical_desc(op, &descs, Sbp::PartialSum)?;
                (vec![desc], vec![common_place(op, &TensorTuple::from(&inputs[..1]), self.device)?], Distribute::Auto)
            }
            OpBody::Function(_) => {
                return Err(StrataError::interpret_error(format!("{} is not a builtin operator", op.op_name())))
            }
        };
        Ok(self.add_node(op.op_name(), op.op_type(), attrs, inputs, out_descs, &places, distribute))
    }
}

fn target_places(x: &Tensor, placement: &Placement) -> Vec<LazyPlace> {
    placement
        .devices()
        .map(|d| if x.is_consistent() { LazyPlace::Consistent(Placement::single(d)) } else { LazyPlace::Mirrored(d) })
        .collect()
}

/// Place shared by all inputs, default device if there are none
fn common_place(op: &OpExpr, inputs: &TensorTuple, default: Device) -> Result<LazyPlace, StrataError> {
    let Some(first) = inputs.first() else {
        return Ok(LazyPlace::Mirrored(default));
    };
    if first.is_consistent() {
        let placement = first.placement();
        if let Some(x) = inputs.iter().find(|x| !x.is_consistent() || x.placement() != placement) {
            return Err(StrataError::device_error(format!(
                "{} mixes inputs on {placement} with {x}",
                op.op_name()
            )));
        }
        Ok(LazyPlace::Consistent(placement.clone()))
    } else {
        let device = first.device();
        if let Some(x) = inputs.iter().find(|x| x.is_consistent() || x.device() != device) {
            return Err(StrataError::device_error(format!("{} mixes inputs on {device} with {x}", op.op_name())));
        }
        Ok(LazyPlace::Mirrored(device))
    }
}

/// Logical desc of parts assembled as sbp
pub(super) fn logical_desc(op: &OpExpr, parts: &[TensorDesc], sbp: Sbp) -> Result<TensorDesc, StrataError> {
    let Some(first) = parts.first() else {
        return Err(StrataError::arity(op.op_name(), 1, 0));
    };
    if let Some(x) = parts.iter().find(|x| x.dtype != first.dtype) {
        return Err(StrataError::dtype_error(format!("{} mixes {} and {}", op.op_name(), first.dtype, x.dtype)));
    }
    match sbp {
        Sbp::Split(axis) => {
            let mut dim = 0;
            for x in parts {
                if x.shape.rank() != first.shape.rank()
                    || x.shape.iter().zip(&first.shape).enumerate().any(|(a, (p, q))| a != axis && p != q)
                {
                    return Err(StrataError::shape_error(format!(
                        "{} can not join {} and {} along axis {axis}",
                        op.op_name(),
                        first.shape,
                        x.shape
                    )));
                }
                dim += x.shape.dim(axis)?;
            }
            Ok(TensorDesc { shape: first.shape.with_dim(axis, dim), dtype: first.dtype })
        }
        Sbp::Broadcast | Sbp::PartialSum => {
            if let Some(x) = parts.iter().find(|x| x.shape != first.shape) {
                return Err(StrataError::shape_error(format!(
                    "{} needs identical shapes, got {} and {}",
                    op.op_name(),
                    first.shape,
                    x.shape
                )));
            }
            Ok(first.clone())
        }
    }
}

impl OpExprInterpreter for LazyInterpreter {
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
        let attrs = op.attrs().merged(&ctx.attrs);
        outputs.clear();
        outputs.extend(self.builtin(op, inputs, attrs)?);
        check_outputs(op, outputs)
    }
}
