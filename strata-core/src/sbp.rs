//! Split/broadcast/partial-sum distribution descriptors and signatures.
//!
//! A consistent tensor is laid out over a [`Placement`](crate::device::Placement)
//! according to one [`Sbp`]. Each operator type declares the set of
//! [`SbpSignature`]s under which it can run locally on every device and still
//! produce the correct logical result.

use crate::attr::AttrMap;
use crate::error::StrataError;
use crate::infer::TensorDesc;
use std::collections::BTreeMap;

/// How a logical tensor is laid out over the devices of a placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Sbp {
    /// Each device holds a contiguous slice along axis
    Split(usize),
    /// Each device holds the whole tensor
    Broadcast,
    /// Logical tensor is the elementwise sum of all device tensors
    PartialSum,
}

impl std::str::FromStr for Sbp {
    type Err = StrataError;

    /// Accepts `B`, `P` and `S(axis)`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "B" => Ok(Sbp::Broadcast),
            "P" => Ok(Sbp::PartialSum),
            _ => s
                .strip_prefix("S(")
                .and_then(|s| s.strip_suffix(')'))
                .and_then(|axis| axis.parse::<usize>().ok())
                .map(Sbp::Split)
                .ok_or_else(|| StrataError::parse_error(format!("Distribute {s} is not valid"))),
        }
    }
}

impl std::fmt::Display for Sbp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sbp::Split(axis) => f.write_fmt(format_args!("S({axis})")),
            Sbp::Broadcast => f.write_str("B"),
            Sbp::PartialSum => f.write_str("P"),
        }
    }
}

/// Distribution hint carried by lazy tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distribute {
    /// Let the graph compiler decide
    #[default]
    Auto,
    /// Whole blob on every device
    Broadcast,
    /// Blob split along axis
    Split(usize),
}

/// Input and output layouts under which an operator runs device locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SbpSignature {
    /// Sbp of each input, in argument order
    pub inputs: Vec<Sbp>,
    /// Sbp of each output, in argument order
    pub outputs: Vec<Sbp>,
}

/// Declarative builder of [`SbpSignature`]
#[derive(Debug, Clone)]
pub struct SbpSignatureBuilder {
    inputs: Vec<Option<Sbp>>,
    outputs: Vec<Option<Sbp>>,
}

impl SbpSignatureBuilder {
    /// Builder for operator with given number of inputs and outputs
    #[must_use]
    pub fn new(num_inputs: usize, num_outputs: usize) -> Self {
        Self { inputs: vec![None; num_inputs], outputs: vec![None; num_outputs] }
    }

    /// Set sbp of input i
    #[must_use]
    pub fn input(mut self, i: usize, sbp: Sbp) -> Self {
        if let Some(slot) = self.inputs.get_mut(i) {
            *slot = Some(sbp);
        }
        self
    }

    /// Set sbp of output i
    #[must_use]
    pub fn output(mut self, i: usize, sbp: Sbp) -> Self {
        if let Some(slot) = self.outputs.get_mut(i) {
            *slot = Some(sbp);
        }
        self
    }

    /// Every input and output split along axis
    #[must_use]
    pub fn split_all(self, axis: usize) -> Self {
        self.all(Sbp::Split(axis))
    }

    /// Every input and output broadcast
    #[must_use]
    pub fn broadcast_all(self) -> Self {
        self.all(Sbp::Broadcast)
    }

    /// Every input and output partial sum
    #[must_use]
    pub fn partial_sum_all(self) -> Self {
        self.all(Sbp::PartialSum)
    }

    fn all(mut self, sbp: Sbp) -> Self {
        self.inputs.iter_mut().chain(self.outputs.iter_mut()).for_each(|s| *s = Some(sbp));
        self
    }

    /// Finish signature, every slot must be set
    pub fn build(self) -> Result<SbpSignature, StrataError> {
        let collect = |slots: Vec<Option<Sbp>>, what: &str| {
            slots
                .into_iter()
                .enumerate()
                .map(|(i, s)| {
                    s.ok_or_else(|| StrataError::interpret_error(format!("sbp of {what} {i} is not set")))
                })
                .collect::<Result<Vec<Sbp>, StrataError>>()
        };
        Ok(SbpSignature { inputs: collect(self.inputs, "input")?, outputs: collect(self.outputs, "output")? })
    }
}

/// What an sbp rule can look at
pub struct SbpInferCtx<'a> {
    /// Operator type
    pub op_type: &'a str,
    /// Attributes of this call
    pub attrs: &'a AttrMap,
    /// Logical descriptions of inputs
    pub inputs: &'a [TensorDesc],
    /// Number of outputs
    pub num_outputs: usize,
}

/// Rule producing candidate signatures of one operator type, best first
pub type SbpFn = fn(&SbpInferCtx<'_>) -> Result<Vec<SbpSignature>, StrataError>;

/// Registry of sbp rules keyed by operator type
#[derive(Clone)]
pub struct SbpRegistry {
    rules: BTreeMap<Box<str>, SbpFn>,
}

impl std::fmt::Debug for SbpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.rules.keys()).finish()
    }
}

impl Default for SbpRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SbpRegistry {
    /// Registry without any rules, every operator runs broadcast
    #[must_use]
    pub fn empty() -> Self {
        Self { rules: BTreeMap::new() }
    }

    /// Registry with rules for the builtin operators
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for op_type in ["identity", "neg", "scalar_mul", "cast"] {
            registry.register(op_type, linear_unary);
        }
        for op_type in ["relu", "exp", "ones_like", "zeros_like", "dropout"] {
            registry.register(op_type, pointwise);
        }
        registry.register("add", linear_binary);
        registry.register("sub", linear_binary);
        registry.register("mul", mul);
        registry.register("relu_grad", pointwise);
        registry.register("matmul", matmul);
        registry.register("reduce_sum", reduce_sum);
        registry
    }

    /// Register or replace rule for operator type
    pub fn register(&mut self, op_type: &str, rule: SbpFn) {
        self.rules.insert(op_type.into(), rule);
    }

    /// Candidate signatures, always ending with the all broadcast signature
    pub fn signatures(&self, ctx: &SbpInferCtx<'_>) -> Result<Vec<SbpSignature>, StrataError> {
        let mut signatures = match self.rules.get(ctx.op_type) {
            Some(rule) => rule(ctx)?,
            None => Vec::new(),
        };
        let fallback = SbpSignatureBuilder::new(ctx.inputs.len(), ctx.num_outputs).broadcast_all().build()?;
        if !signatures.contains(&fallback) {
            signatures.push(fallback);
        }
        Ok(signatures)
    }

    /// Picks the first signature whose inputs match exactly. If none matches,
    /// returns the first candidate and `false`, inputs must then be boxed.
    pub fn select(&self, ctx: &SbpInferCtx<'_>, input_sbps: &[Sbp]) -> Result<(SbpSignature, bool), StrataError> {
        let mut signatures = self.signatures(ctx)?;
        if let Some(i) = signatures.iter().position(|s| s.inputs == input_sbps) {
            return Ok((signatures.swap_remove(i), true));
        }
        // Prefer the candidate needing the fewest conversions
        let cost = |s: &SbpSignature| s.inputs.iter().zip(input_sbps).filter(|(a, b)| a != b).count();
        let best = signatures
            .iter()
            .enumerate()
            .min_by_key(|(i, s)| (cost(s), *i))
            .map_or(0, |(i, _)| i);
        Ok((signatures.swap_remove(best), false))
    }
}

fn min_rank(ctx: &SbpInferCtx<'_>) -> usize {
    ctx.inputs.iter().map(|d| d.shape.rank()).min().unwrap_or(0)
}

fn splits(ctx: &SbpInferCtx<'_>) -> Result<Vec<SbpSignature>, StrataError> {
    (0..min_rank(ctx))
        .map(|axis| SbpSignatureBuilder::new(ctx.inputs.len(), ctx.num_outputs).split_all(axis).build())
        .collect()
}

fn pointwise(ctx: &SbpInferCtx<'_>) -> Result<Vec<SbpSignature>, StrataError> {
    splits(ctx)
}

fn linear_unary(ctx: &SbpInferCtx<'_>) -> Result<Vec<SbpSignature>, StrataError> {
    let mut res = splits(ctx)?;
    res.push(SbpSignatureBuilder::new(ctx.inputs.len(), ctx.num_outputs).partial_sum_all().build()?);
    Ok(res)
}

fn linear_binary(ctx: &SbpInferCtx<'_>) -> Result<Vec<SbpSignature>, StrataError> {
    linear_unary(ctx)
}

fn mul(ctx: &SbpInferCtx<'_>) -> Result<Vec<SbpSignature>, StrataError> {
    let mut res = splits(ctx)?;
    let b = || SbpSignatureBuilder::new(2, 1);
    res.push(b().input(0, Sbp::PartialSum).input(1, Sbp::Broadcast).output(0, Sbp::PartialSum).build()?);
    res.push(b().input(0, Sbp::Broadcast).input(1, Sbp::PartialSum).output(0, Sbp::PartialSum).build()?);
    Ok(res)
}

fn matmul(ctx: &SbpInferCtx<'_>) -> Result<Vec<SbpSignature>, StrataError> {
    let ta = ctx.attrs.get_or("transpose_a", false)?;
    let tb = ctx.attrs.get_or("transpose_b", false)?;
    let (a_m, a_k) = if ta { (1, 0) } else { (0, 1) };
    let (b_k, b_n) = if tb { (1, 0) } else { (0, 1) };
    let b = || SbpSignatureBuilder::new(2, 1);
    Ok(vec![
        b().input(0, Sbp::Split(a_m)).input(1, Sbp::Broadcast).output(0, Sbp::Split(0)).build()?,
        b().input(0, Sbp::Broadcast).input(1, Sbp::Split(b_n)).output(0, Sbp::Split(1)).build()?,
        b().input(0, Sbp::Split(a_k)).input(1, Sbp::Split(b_k)).output(0, Sbp::PartialSum).build()?,
        b().input(0, Sbp::PartialSum).input(1, Sbp::Broadcast).output(0, Sbp::PartialSum).build()?,
        b().input(0, Sbp::Broadcast).input(1, Sbp::PartialSum).output(0, Sbp::PartialSum).build()?,
    ])
}

fn reduce_sum(ctx: &SbpInferCtx<'_>) -> Result<Vec<SbpSignature>, StrataError> {
    let axes = ctx.attrs.get::<Vec<i64>>("axes")?;
    let keepdims = ctx.attrs.get_or("keepdims", false)?;
    let rank = min_rank(ctx);
    let axes = crate::infer::normalize_axes(&axes, rank)?;
    let mut res = Vec::new();
    for axis in 0..rank {
        let out = if axes.contains(&axis) {
            Sbp::PartialSum
        } else if keepdims {
            Sbp::Split(axis)
        } else {
            Sbp::Split(axis - axes.iter().filter(|a| **a < axis).count())
        };
        res.push(SbpSignatureBuilder::new(1, 1).input(0, Sbp::Split(axis)).output(0, out).build()?);
    }
    res.push(SbpSignatureBuilder::new(1, 1).partial_sum_all().build()?);
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sbp() -> Result<(), StrataError> {
        assert_eq!("S(1)".parse::<Sbp>()?, Sbp::Split(1));
        assert_eq!("B".parse::<Sbp>()?, Sbp::Broadcast);
        assert!("S(x)".parse::<Sbp>().is_err());
        assert_eq!(Sbp::Split(2).to_string(), "S(2)");
        Ok(())
    }

    #[test]
    fn builder_requires_every_slot() {
        assert!(SbpSignatureBuilder::new(2, 1).input(0, Sbp::Broadcast).build().is_err());
    }
}
