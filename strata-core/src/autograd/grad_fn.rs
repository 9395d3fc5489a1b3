use super::TapeNode;
use crate::attr::{AttrMap, AttrValue};
use crate::error::StrataError;
use crate::interpreter::OpExprInterpreter;
use crate::op_expr::{OpBody, OpExpr};
use crate::tensor::Tensor;

fn run(interp: &dyn OpExprInterpreter, op_type: &str, inputs: &[&Tensor], attrs: AttrMap) -> Result<Tensor, StrataError> {
    let op = inputs
        .iter()
        .enumerate()
        .fold(OpExpr::builder(op_type).op_name(&format!("{op_type}_grad")), |b, (i, _)| b.input(&format!("x{i}")))
        .output("y")
        .build()?;
    let inputs: Vec<Tensor> = inputs.iter().map(|x| (*x).clone()).collect();
    let mut outputs = interp.call(&op, &inputs, &attrs)?.into_vec();
    if outputs.is_empty() {
        return Err(StrataError::arity(op_type, 1, 0));
    }
    Ok(outputs.swap_remove(0))
}

pub(super) fn ones_like(interp: &dyn OpExprInterpreter, x: &Tensor) -> Result<Tensor, StrataError> {
    run(interp, "ones_like", &[x], AttrMap::new())
}

pub(super) fn add(interp: &dyn OpExprInterpreter, x: &Tensor, y: &Tensor) -> Result<Tensor, StrataError> {
    run(interp, "add", &[x, y], AttrMap::new())
}

fn mul(interp: &dyn OpExprInterpreter, x: &Tensor, y: &Tensor) -> Result<Tensor, StrataError> {
    run(interp, "mul", &[x, y], AttrMap::new())
}

fn matmul(interp: &dyn OpExprInterpreter, a: &Tensor, b: &Tensor, ta: bool, tb: bool) -> Result<Tensor, StrataError> {
    run(interp, "matmul", &[a, b], AttrMap::from([("transpose_a", ta), ("transpose_b", tb)]))
}

/// Gradients of inputs of node given gradients of its outputs
pub(super) fn backward(
    interp: &dyn OpExprInterpreter,
    node: &TapeNode,
    out_grads: &[Option<Tensor>],
) -> Result<Vec<Option<Tensor>>, StrataError> {
    let OpBody::User(user) = node.op.body() else {
        return Err(StrataError::interpret_error(format!(
            "no gradient for {} operator {}",
            node.op.kind().name(),
            node.op.op_name()
        )));
    };
    let Some(g) = out_grads.first().cloned().flatten() else {
        // Only secondary outputs, like the dropout mask, were used
        return Ok(vec![None; node.input_ids.len()]);
    };
    let x = |i| node.input(i);
    let y = |i| node.output(i);
    Ok(match &*user.op_type {
        "identity" => vec![Some(g)],
        "add" => vec![Some(g.clone()), Some(g)],
        "sub" => vec![Some(g.clone()), Some(run(interp, "neg", &[&g], AttrMap::new())?)],
        "mul" => vec![Some(mul(interp, &g, x(1))?), Some(mul(interp, &g, x(0))?)],
        "neg" => vec![Some(run(interp, "neg", &[&g], AttrMap::new())?)],
        "exp" => vec![Some(mul(interp, &g, y(0))?)],
        "relu" => vec![Some(run(interp, "relu_grad", &[&g, y(0)], AttrMap::new())?)],
        "scalar_mul" => {
            let scalar: f64 = node.attrs.get("scalar")?;
            vec![Some(run(interp, "scalar_mul", &[&g], AttrMap::from([("scalar", scalar)]))?)]
        }
        "cast" => {
            let dtype = x(0).dtype();
            vec![Some(run(interp, "cast", &[&g], AttrMap::from([("dtype", AttrValue::DType(dtype))]))?)]
        }
        "matmul" => {
            let ta = node.attrs.get_or("transpose_a", false)?;
            let tb = node.attrs.get_or("transpose_b", false)?;
            let (a, b) = (x(0), x(1));
            let da = match (ta, tb) {
                (false, false) => matmul(interp, &g, b, false, true)?,
                (false, true) => matmul(interp, &g, b, false, false)?,
                (true, false) => matmul(interp, b, &g, false, true)?,
                (true, true) => matmul(interp, b, &g, true, true)?,
            };
            let db = match (ta, tb) {
                (false, false) => matmul(interp, a, &g, true, false)?,
                (true, false) => matmul(interp, a, &g, false, false)?,
                (false, true) => matmul(interp, &g, a, true, false)?,
                (true, true) => matmul(interp, &g, a, true, true)?,
            };
            vec![Some(da), Some(db)]
        }
        "reduce_sum" => {
            let axes: Vec<i64> = node.attrs.get("axes")?;
            vec![Some(run(interp, "broadcast_like", &[&g, x(0)], AttrMap::from([("axes", axes)]))?)]
        }
        "dropout" => {
            let rate: f32 = node.attrs.get("rate")?;
            let mask = run(interp, "cast", &[y(1)], AttrMap::from([("dtype", AttrValue::DType(g.dtype()))]))?;
            let scale = if rate < 1.0 { 1.0 / (1.0 - f64::from(rate)) } else { 0.0 };
            let masked = mul(interp, &g, &mask)?;
            vec![Some(run(interp, "scalar_mul", &[&masked], AttrMap::from([("scalar", scale)]))?)]
        }
        op_type => {
            return Err(StrataError::interpret_error(format!("no gradient for operator type {op_type}")))
        }
    })
}
