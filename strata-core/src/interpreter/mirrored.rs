//! Handlers of the mirrored policy. Every tensor lives whole on one device.

use super::eager::{expect_mirrored, EagerInterpreter};
use super::lazy::logical_desc;
use super::OpExprInterpContext;
use crate::backend::{allocate_and_compute, EagerBlob};
use crate::error::StrataError;
use crate::host::HostData;
use crate::infer::TensorDesc;
use crate::op_expr::{OpBody, OpExpr};
use crate::sbp::Sbp;
use crate::shape::balanced_split;
use crate::tensor::{Tensor, TensorTuple};

pub(super) fn user_op(
    interp: &EagerInterpreter,
    op: &OpExpr,
    inputs: &TensorTuple,
    outputs: &mut TensorTuple,
    ctx: &OpExprInterpContext,
) -> Result<(), StrataError> {
    expect_mirrored(op, inputs)?;
    let device = inputs.first().map_or(interp.device, Tensor::device);
    let attrs = op.attrs().merged(&ctx.attrs);
    let blobs: Vec<&EagerBlob> = inputs.iter().map(Tensor::blob).collect();
    let out = allocate_and_compute(
        &interp.backend,
        &interp.inference,
        op.op_type(),
        op.output_arity(),
        &interp.kernel_ctx(&attrs, ctx),
        device,
        &blobs,
    )?;
    outputs.extend(out.into_iter().map(Tensor::mirrored));
    Ok(())
}

pub(super) fn variable(
    interp: &EagerInterpreter,
    op: &OpExpr,
    _: &TensorTuple,
    outputs: &mut TensorTuple,
    _: &OpExprInterpContext,
) -> Result<(), StrataError> {
    let OpBody::Variable(var) = op.body() else {
        return Err(StrataError::interpret_error(format!("{} is not a variable", op.op_name())));
    };
    let data = interp.init_variable(var);
    outputs.push(Tensor::from_host(&interp.backend, interp.device, var.shape.clone(), data)?);
    Ok(())
}

pub(super) fn distribute_split(
    interp: &EagerInterpreter,
    op: &OpExpr,
    inputs: &TensorTuple,
    outputs: &mut TensorTuple,
    _: &OpExprInterpContext,
) -> Result<(), StrataError> {
    let OpBody::DistributeSplit { axis, placement } = op.body() else {
        return Err(StrataError::interpret_error(format!("{} is not distribute split", op.op_name())));
    };
    expect_mirrored(op, inputs)?;
    let x = &inputs[0];
    let ranges = balanced_split(x.shape().dim(*axis)?, placement.parallel_num());
    let parts = x.to_host()?.split(x.shape(), *axis, &ranges)?;
    for ((part, range), device) in parts.into_iter().zip(ranges).zip(placement.devices()) {
        outputs.push(Tensor::from_host(&interp.backend, device, x.shape().with_dim(*axis, range.len()), part)?);
    }
    Ok(())
}

pub(super) fn distribute_clone(
    interp: &EagerInterpreter,
    op: &OpExpr,
    inputs: &TensorTuple,
    outputs: &mut TensorTuple,
    _: &OpExprInterpContext,
) -> Result<(), StrataError> {
    let OpBody::DistributeClone { placement } = op.body() else {
        return Err(StrataError::interpret_error(format!("{} is not distribute clone", op.op_name())));
    };
    expect_mirrored(op, inputs)?;
    let x = &inputs[0];
    let data = x.to_host()?;
    for device in placement.devices() {
        outputs.push(Tensor::from_host(&interp.backend, device, x.shape().clone(), data.clone())?);
    }
    Ok(())
}

/// Result lands on the device of the first input
pub(super) fn distribute_concat(
    interp: &EagerInterpreter,
    op: &OpExpr,
    inputs: &TensorTuple,
    outputs: &mut TensorTuple,
    _: &OpExprInterpContext,
) -> Result<(), StrataError> {
    let OpBody::DistributeConcat { axis, .. } = op.body() else {
        return Err(StrataError::interpret_error(format!("{} is not distribute concat", op.op_name())));
    };
    expect_mirrored(op, inputs)?;
    let parts = inputs
        .iter()
        .map(|x| Ok((x.to_host()?, x.shape().clone())))
        .collect::<Result<Vec<(HostData, _)>, StrataError>>()?;
    let (data, shape) = HostData::concat(&parts, *axis)?;
    outputs.push(Tensor::from_host(&interp.backend, inputs[0].device(), shape, data)?);
    Ok(())
}

/// Result lands on the device of the first input
pub(super) fn distribute_add(
    interp: &EagerInterpreter,
    op: &OpExpr,
    inputs: &TensorTuple,
    outputs: &mut TensorTuple,
    _: &OpExprInterpContext,
) -> Result<(), StrataError> {
    expect_mirrored(op, inputs)?;
    let descs: Vec<TensorDesc> = inputs.iter().map(|x| x.desc().clone()).collect();
    let desc = logical_desc(op, &descs, Sbp::PartialSum)?;
    let mut sum = inputs[0].to_host()?;
    for x in &inputs[1..] {
        sum = sum.add(&x.to_host()?)?;
    }
    outputs.push(Tensor::from_host(&interp.backend, inputs[0].device(), desc.shape, sum)?);
    Ok(())
}
