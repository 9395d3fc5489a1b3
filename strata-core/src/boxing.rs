//! Conversions between sbp layouts of consistent values.
//!
//! Boxing goes through host memory: components are assembled into the
//! logical value and laid out again. Split uses balanced ranges, partial sum
//! puts the whole value on parallel id 0 and zeros elsewhere.

use crate::backend::{EagerBlob, KernelBackend};
use crate::device::Placement;
use crate::error::StrataError;
use crate::host::HostData;
use crate::infer::TensorDesc;
use crate::sbp::Sbp;
use crate::shape::{balanced_split, Shape};
use crate::tensor::ConsistentBlob;
use std::sync::Arc;

/// Local parts of logical value laid out as sbp over parallel_num devices
pub(crate) fn lay_out(
    desc: &TensorDesc,
    data: &HostData,
    sbp: Sbp,
    parallel_num: usize,
) -> Result<Vec<(HostData, Shape)>, StrataError> {
    Ok(match sbp {
        Sbp::Split(axis) => {
            let ranges = balanced_split(desc.shape.dim(axis)?, parallel_num);
            let parts = data.split(&desc.shape, axis, &ranges)?;
            parts
                .into_iter()
                .zip(ranges)
                .map(|(part, r)| (part, desc.shape.with_dim(axis, r.len())))
                .collect()
        }
        Sbp::Broadcast => (0..parallel_num).map(|_| (data.clone(), desc.shape.clone())).collect(),
        Sbp::PartialSum => (0..parallel_num)
            .map(|i| {
                let part = if i == 0 { data.clone() } else { HostData::zeros(desc.dtype, data.len()) };
                (part, desc.shape.clone())
            })
            .collect(),
    })
}

/// Logical value of local parts laid out as sbp
pub(crate) fn assemble(parts: &[(HostData, Shape)], sbp: Sbp) -> Result<HostData, StrataError> {
    let Some((first, _)) = parts.first() else {
        return Err(StrataError::shape_error("consistent value without components"));
    };
    match sbp {
        Sbp::Split(axis) => Ok(HostData::concat(parts, axis)?.0),
        Sbp::Broadcast => Ok(first.clone()),
        Sbp::PartialSum => parts[1..].iter().try_fold(first.clone(), |acc, (x, _)| acc.add(x)),
    }
}

/// Stores logical value on placement laid out as sbp
pub(crate) fn store_consistent(
    backend: &Arc<dyn KernelBackend>,
    placement: &Placement,
    sbp: Sbp,
    desc: &TensorDesc,
    data: &HostData,
) -> Result<ConsistentBlob, StrataError> {
    if data.len() != desc.shape.numel() {
        return Err(StrataError::shape_error(format!(
            "{} elements do not fit shape {}",
            data.len(),
            desc.shape
        )));
    }
    let components = lay_out(desc, data, sbp, placement.parallel_num())?
        .into_iter()
        .zip(placement.devices())
        .map(|((part, shape), device)| EagerBlob::from_host(backend, device, shape, part))
        .collect::<Result<Vec<EagerBlob>, StrataError>>()?;
    Ok(ConsistentBlob { desc: desc.clone(), placement: placement.clone(), sbp, components })
}

fn load_parts(blob: &ConsistentBlob) -> Result<Vec<(HostData, Shape)>, StrataError> {
    blob.components.iter().map(|c| Ok((c.to_host()?, c.desc().shape.clone()))).collect()
}

/// Logical value of consistent blob
pub(crate) fn load_logical(blob: &ConsistentBlob) -> Result<HostData, StrataError> {
    assemble(&load_parts(blob)?, blob.sbp)
}

/// Same logical value on the same placement laid out as target
pub(crate) fn convert(
    backend: &Arc<dyn KernelBackend>,
    blob: &ConsistentBlob,
    target: Sbp,
) -> Result<ConsistentBlob, StrataError> {
    if blob.sbp == target {
        return Ok(blob.clone());
    }
    log::debug!("Boxing {} from {} to {target} on {}", blob.desc, blob.sbp, blob.placement);
    let data = load_logical(blob)?;
    store_consistent(backend, &blob.placement, target, &blob.desc, &data)
}
