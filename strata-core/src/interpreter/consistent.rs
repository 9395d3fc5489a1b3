//! Handlers of the consistent policy.
//!
//! A user operator runs device locally on every parallel id of the placement
//! shared by its inputs. The sbp registry chooses a signature; inputs laid
//! out differently from the signature are boxed first.

use super::eager::{expect_consistent, EagerInterpreter};
use super::lazy::logical_desc;
use super::OpExprInterpContext;
use crate::backend::{allocate_and_compute, EagerBlob};
use crate::boxing;
use crate::device::Placement;
use crate::error::StrataError;
use crate::infer::TensorDesc;
use crate::op_expr::{OpBody, OpExpr};
use crate::sbp::{Sbp, SbpInferCtx};
use crate::shape::balanced_split;
use crate::tensor::{ConsistentBlob, Tensor, TensorTuple};

pub(super) fn user_op(
    interp: &EagerInterpreter,
    op: &OpExpr,
    inputs: &TensorTuple,
    outputs: &mut TensorTuple,
    ctx: &OpExprInterpContext,
) -> Result<(), StrataError> {
    expect_consistent(op, inputs)?;
    let placement = match inputs.first() {
        Some(first) => first.placement().clone(),
        None => interp.placement.clone(),
    };
    if let Some(x) = inputs.iter().find(|x| *x.placement() != placement) {
        return Err(StrataError::device_error(format!(
            "{} mixes inputs on {placement} and {}",
            op.op_name(),
            x.placement()
        )));
    }
    let attrs = op.attrs().merged(&ctx.attrs);
    let descs: Vec<TensorDesc> = inputs.iter().map(|x| x.desc().clone()).collect();
    let out_descs = interp.inference.infer(op.op_type(), &attrs, &descs)?;
    let infer_ctx = SbpInferCtx { op_type: op.op_type(), attrs: &attrs, inputs: &descs, num_outputs: out_descs.len() };
    let input_sbps: Vec<Sbp> = inputs.iter().map(Tensor::sbp).collect();
    let (signature, exact) = interp.sbp.select(&infer_ctx, &input_sbps)?;
    log::debug!(
        "{} on {placement} runs as {:?} -> {:?}{}",
        op.op_name(),
        signature.inputs,
        signature.outputs,
        if exact { "" } else { " after boxing" }
    );
    let boxed = inputs
        .iter()
        .zip(&signature.inputs)
        .map(|(x, sbp)| boxing::convert(&interp.backend, x.consistent_blob(), *sbp))
        .collect::<Result<Vec<ConsistentBlob>, StrataError>>()?;
    let kernel_ctx = interp.kernel_ctx(&attrs, ctx);
    let mut components: Vec<Vec<EagerBlob>> = vec![Vec::with_capacity(placement.parallel_num()); out_descs.len()];
    for (parallel_id, device) in placement.devices().enumerate() {
        let local: Vec<&EagerBlob> = boxed.iter().map(|b| &b.components[parallel_id]).collect();
        let out = allocate_and_compute(
            &interp.backend,
            &interp.inference,
            op.op_type(),
            op.output_arity(),
            &kernel_ctx,
            device,
            &local,
        )?;
        for (i, blob) in out.into_iter().enumerate() {
            components[i].push(blob);
        }
    }
    outputs.extend(out_descs.into_iter().zip(signature.outputs).zip(components).map(|((desc, sbp), components)| {
        Tensor::consistent(ConsistentBlob { desc, placement: placement.clone(), sbp, components })
    }));
    Ok(())
}

/// Full value is generated once and laid out as the declared sbp
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
    let desc = TensorDesc { shape: var.shape.clone(), dtype: var.dtype };
    let blob = boxing::store_consistent(&interp.backend, &interp.placement, var.sbp, &desc, &data)?;
    outputs.push(Tensor::consistent(blob));
    Ok(())
}

/// One single device consistent tensor per target device
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
    expect_consistent(op, inputs)?;
    let x = &inputs[0];
    let ranges = balanced_split(x.shape().dim(*axis)?, placement.parallel_num());
    let parts = x.to_host()?.split(x.shape(), *axis, &ranges)?;
    for ((part, range), device) in parts.into_iter().zip(ranges).zip(placement.devices()) {
        let desc = TensorDesc { shape: x.shape().with_dim(*axis, range.len()), dtype: x.dtype() };
        let blob = boxing::store_consistent(&interp.backend, &Placement::single(device), Sbp::Broadcast, &desc, &part)?;
        outputs.push(Tensor::consistent(blob));
    }
    Ok(())
}

/// One single device consistent copy per target device
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
    expect_consistent(op, inputs)?;
    let x = &inputs[0];
    let data = x.to_host()?;
    for device in placement.devices() {
        let blob = boxing::store_consistent(&interp.backend, &Placement::single(device), Sbp::Broadcast, x.desc(), &data)?;
        outputs.push(Tensor::consistent(blob));
    }
    Ok(())
}

/// Single device inputs joined over the union of their devices, no data movement
fn join(op: &OpExpr, inputs: &TensorTuple, sbp: Sbp) -> Result<Tensor, StrataError> {
    expect_consistent(op, inputs)?;
    let mut devices = Vec::with_capacity(inputs.len());
    let mut components = Vec::with_capacity(inputs.len());
    for x in inputs {
        let blob = x.consistent_blob();
        if blob.placement.parallel_num() != 1 {
            return Err(StrataError::device_error(format!(
                "{} expects single device inputs, got {x} on {}",
                op.op_name(),
                blob.placement
            )));
        }
        // On one device every sbp holds the logical value
        let Some(component) = blob.components.first() else {
            return Err(StrataError::device_error(format!("{x} has no components")));
        };
        devices.push(blob.placement.device(0));
        components.push(component.clone());
    }
    let placement = Placement::from_devices(&devices)?;
    let descs: Vec<TensorDesc> = inputs.iter().map(|x| x.desc().clone()).collect();
    let desc = logical_desc(op, &descs, sbp)?;
    Ok(Tensor::consistent(ConsistentBlob { desc, placement, sbp, components }))
}

pub(super) fn distribute_concat(
    _: &EagerInterpreter,
    op: &OpExpr,
    inputs: &TensorTuple,
    outputs: &mut TensorTuple,
    _: &OpExprInterpContext,
) -> Result<(), StrataError> {
    let OpBody::DistributeConcat { axis, .. } = op.body() else {
        return Err(StrataError::interpret_error(format!("{} is not distribute concat", op.op_name())));
    };
    outputs.push(join(op, inputs, Sbp::Split(*axis))?);
    Ok(())
}

pub(super) fn distribute_add(
    _: &EagerInterpreter,
    op: &OpExpr,
    inputs: &TensorTuple,
    outputs: &mut TensorTuple,
    _: &OpExprInterpContext,
) -> Result<(), StrataError> {
    outputs.push(join(op, inputs, Sbp::PartialSum)?);
    Ok(())
}
