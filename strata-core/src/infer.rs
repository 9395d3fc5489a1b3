//! Shape and dtype inference of user operators.

use crate::attr::AttrMap;
use crate::dtype::DType;
use crate::error::StrataError;
use crate::shape::Shape;
use std::collections::BTreeMap;

/// Shape and dtype of a tensor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    /// Shape
    pub shape: Shape,
    /// DType
    pub dtype: DType,
}

impl TensorDesc {
    /// New tensor desc
    #[must_use]
    pub fn new(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self { shape: shape.into(), dtype }
    }
}

impl std::fmt::Display for TensorDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}{}", self.dtype, self.shape))
    }
}

/// Turns possibly negative axes into sorted unique positive axes.
/// Empty axes mean all axes.
pub fn normalize_axes(axes: &[i64], rank: usize) -> Result<Vec<usize>, StrataError> {
    if axes.is_empty() {
        return Ok((0..rank).collect());
    }
    let irank = i64::try_from(rank).map_err(|e| StrataError::shape_error(format!("{e}")))?;
    let mut res = axes
        .iter()
        .map(|&a| {
            let axis = if a < 0 { a + irank } else { a };
            usize::try_from(axis)
                .ok()
                .filter(|axis| *axis < rank)
                .ok_or_else(|| StrataError::shape_error(format!("axis {a} is out of range for rank {rank}")))
        })
        .collect::<Result<Vec<usize>, StrataError>>()?;
    res.sort_unstable();
    res.dedup();
    Ok(res)
}

/// Rule inferring output descs of one operator type
pub type InferFn = fn(&AttrMap, &[TensorDesc]) -> Result<Vec<TensorDesc>, StrataError>;

/// Registry of inference rules keyed by operator type
#[derive(Clone)]
pub struct InferenceRegistry {
    rules: BTreeMap<Box<str>, InferFn>,
}

impl std::fmt::Debug for InferenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.rules.keys()).finish()
    }
}

impl Default for InferenceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl InferenceRegistry {
    /// Registry without rules
    #[must_use]
    pub fn empty() -> Self {
        Self { rules: BTreeMap::new() }
    }

    /// Registry with rules of every builtin operator
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for op_type in ["identity", "neg", "relu", "ones_like", "zeros_like"] {
            registry.register(op_type, same_as_input);
        }
        registry.register("exp", floating_unary);
        registry.register("scalar_mul", scalar_mul);
        registry.register("cast", cast);
        for op_type in ["add", "sub", "mul", "relu_grad"] {
            registry.register(op_type, elementwise_binary);
        }
        registry.register("matmul", matmul);
        registry.register("reduce_sum", reduce_sum);
        registry.register("broadcast_like", broadcast_like);
        registry.register("dropout", dropout);
        registry
    }

    /// Register or replace rule of operator type
    pub fn register(&mut self, op_type: &str, rule: InferFn) {
        self.rules.insert(op_type.into(), rule);
    }

    /// Output descs of operator type applied to inputs
    pub fn infer(&self, op_type: &str, attrs: &AttrMap, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, StrataError> {
        let rule = self
            .rules
            .get(op_type)
            .ok_or_else(|| StrataError::NotFound(format!("inference rule of operator {op_type:?}").into()))?;
        let outputs = rule(attrs, inputs)?;
        log::trace!("Inferred {op_type}: {inputs:?} -> {outputs:?}");
        Ok(outputs)
    }
}

fn unary_input(inputs: &[TensorDesc]) -> Result<&TensorDesc, StrataError> {
    match inputs {
        [x] => Ok(x),
        _ => Err(StrataError::shape_error(format!("expected one input, got {}", inputs.len()))),
    }
}

fn binary_inputs(inputs: &[TensorDesc]) -> Result<(&TensorDesc, &TensorDesc), StrataError> {
    match inputs {
        [x, y] => Ok((x, y)),
        _ => Err(StrataError::shape_error(format!("expected two inputs, got {}", inputs.len()))),
    }
}

fn same_as_input(_: &AttrMap, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, StrataError> {
    Ok(vec![unary_input(inputs)?.clone()])
}

fn floating_unary(_: &AttrMap, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, StrataError> {
    let x = unary_input(inputs)?;
    if !x.dtype.is_floating() {
        return Err(StrataError::dtype_error(format!("{} is not a floating dtype", x.dtype)));
    }
    Ok(vec![x.clone()])
}

fn scalar_mul(attrs: &AttrMap, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, StrataError> {
    attrs.get::<f64>("scalar")?;
    Ok(vec![unary_input(inputs)?.clone()])
}

fn cast(attrs: &AttrMap, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, StrataError> {
    let x = unary_input(inputs)?;
    Ok(vec![TensorDesc { shape: x.shape.clone(), dtype: attrs.get("dtype")? }])
}

fn elementwise_binary(_: &AttrMap, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, StrataError> {
    let (x, y) = binary_inputs(inputs)?;
    if x.dtype != y.dtype {
        return Err(StrataError::dtype_error(format!("{} and {} differ", x.dtype, y.dtype)));
    }
    if x.shape != y.shape {
        return Err(StrataError::shape_error(format!("{} and {} differ", x.shape, y.shape)));
    }
    Ok(vec![x.clone()])
}

fn matmul(attrs: &AttrMap, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, StrataError> {
    let (a, b) = binary_inputs(inputs)?;
    if a.dtype != b.dtype {
        return Err(StrataError::dtype_error(format!("{} and {} differ", a.dtype, b.dtype)));
    }
    if a.shape.rank() != 2 || b.shape.rank() != 2 {
        return Err(StrataError::shape_error(format!("matmul needs matrices, got {} and {}", a.shape, b.shape)));
    }
    let (m, ka) = if attrs.get_or("transpose_a", false)? { (a.shape[1], a.shape[0]) } else { (a.shape[0], a.shape[1]) };
    let (kb, n) = if attrs.get_or("transpose_b", false)? { (b.shape[1], b.shape[0]) } else { (b.shape[0], b.shape[1]) };
    if ka != kb {
        return Err(StrataError::shape_error(format!("can not matmul {} and {}", a.shape, b.shape)));
    }
    Ok(vec![TensorDesc::new([m, n], a.dtype)])
}

fn reduce_sum(attrs: &AttrMap, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, StrataError> {
    let x = unary_input(inputs)?;
    let axes = normalize_axes(&attrs.get::<Vec<i64>>("axes")?, x.shape.rank())?;
    let keepdims = attrs.get_or("keepdims", false)?;
    Ok(vec![TensorDesc { shape: x.shape.reduce(&axes, keepdims), dtype: x.dtype }])
}

fn broadcast_like(attrs: &AttrMap, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, StrataError> {
    let (x, like) = binary_inputs(inputs)?;
    let axes = normalize_axes(&attrs.get::<Vec<i64>>("axes")?, like.shape.rank())?;
    if x.shape != like.shape.reduce(&axes, true) && x.shape != like.shape.reduce(&axes, false) {
        return Err(StrataError::shape_error(format!(
            "{} can not be broadcasted like {} along {axes:?}",
            x.shape, like.shape
        )));
    }
    Ok(vec![TensorDesc { shape: like.shape.clone(), dtype: x.dtype }])
}

fn dropout(attrs: &AttrMap, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, StrataError> {
    let x = floating_unary(attrs, inputs)?.remove(0);
    let rate: f32 = attrs.get("rate")?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(StrataError::interpret_error(format!("dropout rate {rate} is not in 0..=1")));
    }
    let mask = TensorDesc { shape: x.shape.clone(), dtype: DType::I8 };
    Ok(vec![x, mask])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttrValue;

    #[test]
    fn matmul_with_transpose() -> Result<(), StrataError> {
        let reg = InferenceRegistry::builtin();
        let a = TensorDesc::new([3, 2], DType::F32);
        let b = TensorDesc::new([3, 4], DType::F32);
        let attrs = AttrMap::from([("transpose_a", true)]);
        assert_eq!(reg.infer("matmul", &attrs, &[a.clone(), b.clone()])?, vec![TensorDesc::new([2, 4], DType::F32)]);
        assert!(reg.infer("matmul", &AttrMap::new(), &[a, b]).is_err());
        Ok(())
    }

    #[test]
    fn reduce_negative_axis() -> Result<(), StrataError> {
        let reg = InferenceRegistry::builtin();
        let attrs = AttrMap::from([("axes", AttrValue::ListI64(vec![-1]))]);
        let out = reg.infer("reduce_sum", &attrs, &[TensorDesc::new([2, 5], DType::F64)])?;
        assert_eq!(out[0].shape, Shape::from(2));
        assert!(normalize_axes(&[2], 2).is_err());
        Ok(())
    }
}
