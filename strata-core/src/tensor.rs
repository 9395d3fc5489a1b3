//! Tensors.
//!
//! [`Tensor`] is a cheap handle to an immutable [`TensorImpl`]. A tensor is
//! either a reference into a lazily built graph or a device resident value,
//! and either mirrored (one device) or consistent (one logical value laid out
//! over a placement). Shape, dtype and device can be asked uniformly, every
//! other accessor is available only on the variants that can provide it and
//! aborts on the others.

use crate::backend::{EagerBlob, KernelBackend};
use crate::boxing;
use crate::device::{Device, Placement};
use crate::dtype::DType;
use crate::error::{unimplemented_capability, StrataError};
use crate::host::{Element, HostData};
use crate::infer::TensorDesc;
use crate::sbp::{Distribute, Sbp};
use crate::shape::Shape;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Process unique id of tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TensorId(u64);

impl TensorId {
    fn next() -> TensorId {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        TensorId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("t{}", self.0))
    }
}

/// Identity of a blob in a lazily built graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalBlobId {
    /// Producing operator
    pub op_name: Box<str>,
    /// Output blob name of producing operator
    pub blob_name: Box<str>,
}

impl LogicalBlobId {
    /// Logical blob name, `op_name/blob_name`
    #[must_use]
    pub fn lbn(&self) -> String {
        format!("{}/{}", self.op_name, self.blob_name)
    }
}

/// Reference into lazily built graph
#[derive(Debug, Clone)]
pub struct LazyBlob {
    /// Blob identity
    pub lbi: LogicalBlobId,
    /// Job owning the graph
    pub job_name: Arc<str>,
    /// Distribution hint
    pub distribute: Distribute,
    /// Symbolic shape and dtype
    pub desc: TensorDesc,
}

/// Logical value laid out over placement, one local blob per parallel id
#[derive(Debug, Clone)]
pub struct ConsistentBlob {
    /// Logical shape and dtype
    pub desc: TensorDesc,
    /// Devices
    pub placement: Placement,
    /// Layout
    pub sbp: Sbp,
    /// Local blob of each parallel id
    pub components: Vec<EagerBlob>,
}

/// Backing representation of tensor
#[derive(Debug)]
pub enum TensorImpl {
    /// Lazy graph reference on one device
    MirroredLazy {
        /// Graph reference
        blob: LazyBlob,
        /// Device
        device: Device,
    },
    /// Lazy graph reference spanning placement
    ConsistentLazy {
        /// Graph reference
        blob: LazyBlob,
        /// Devices
        placement: Placement,
    },
    /// Value on one device
    MirroredEager(EagerBlob),
    /// Value spanning placement
    ConsistentEager(ConsistentBlob),
}

impl TensorImpl {
    fn kind(&self) -> &'static str {
        match self {
            TensorImpl::MirroredLazy { .. } => "mirrored lazy",
            TensorImpl::ConsistentLazy { .. } => "consistent lazy",
            TensorImpl::MirroredEager(_) => "mirrored eager",
            TensorImpl::ConsistentEager(_) => "consistent eager",
        }
    }
}

#[derive(Debug)]
struct TensorInner {
    id: TensorId,
    imp: TensorImpl,
    requires_grad: AtomicBool,
}

/// Shared handle to tensor. Clones refer to the same tensor.
#[derive(Debug, Clone)]
pub struct Tensor(Arc<TensorInner>);

impl Tensor {
    /// Wraps implementation into new tensor with fresh id
    #[must_use]
    pub fn new(imp: TensorImpl) -> Tensor {
        Tensor(Arc::new(TensorInner { id: TensorId::next(), imp, requires_grad: AtomicBool::new(false) }))
    }

    /// Mirrored eager tensor holding blob
    #[must_use]
    pub fn mirrored(blob: EagerBlob) -> Tensor {
        Tensor::new(TensorImpl::MirroredEager(blob))
    }

    /// Consistent eager tensor
    #[must_use]
    pub fn consistent(blob: ConsistentBlob) -> Tensor {
        Tensor::new(TensorImpl::ConsistentEager(blob))
    }

    /// Stores host data on device as mirrored eager tensor
    pub fn from_host(
        backend: &Arc<dyn KernelBackend>,
        device: Device,
        shape: impl Into<Shape>,
        data: impl Into<HostData>,
    ) -> Result<Tensor, StrataError> {
        Ok(Tensor::mirrored(EagerBlob::from_host(backend, device, shape.into(), data.into())?))
    }

    /// Lays out logical host value over placement as consistent eager tensor
    pub fn consistent_from_host(
        backend: &Arc<dyn KernelBackend>,
        placement: &Placement,
        sbp: Sbp,
        shape: impl Into<Shape>,
        data: impl Into<HostData>,
    ) -> Result<Tensor, StrataError> {
        let shape = shape.into();
        let data = data.into();
        let desc = TensorDesc { shape, dtype: data.dtype() };
        Ok(Tensor::consistent(boxing::store_consistent(backend, placement, sbp, &desc, &data)?))
    }

    /// Id of tensor
    #[must_use]
    pub fn id(&self) -> TensorId {
        self.0.id
    }

    /// Is other a handle to the same tensor
    #[must_use]
    pub fn same_as(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Backing implementation
    #[must_use]
    pub fn imp(&self) -> &TensorImpl {
        &self.0.imp
    }

    /// Shape and dtype
    #[must_use]
    pub fn desc(&self) -> &TensorDesc {
        match &self.0.imp {
            TensorImpl::MirroredLazy { blob, .. } | TensorImpl::ConsistentLazy { blob, .. } => &blob.desc,
            TensorImpl::MirroredEager(blob) => blob.desc(),
            TensorImpl::ConsistentEager(blob) => &blob.desc,
        }
    }

    /// Shape, logical shape for consistent tensors
    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.desc().shape
    }

    /// DType
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.desc().dtype
    }

    /// Device, device of parallel id 0 for consistent tensors
    #[must_use]
    pub fn device(&self) -> Device {
        match &self.0.imp {
            TensorImpl::MirroredLazy { device, .. } => *device,
            TensorImpl::ConsistentLazy { placement, .. } => placement.device(0),
            TensorImpl::MirroredEager(blob) => blob.device(),
            TensorImpl::ConsistentEager(blob) => blob.placement.device(0),
        }
    }

    /// Is tensor a graph reference
    #[must_use]
    pub fn is_lazy(&self) -> bool {
        matches!(self.0.imp, TensorImpl::MirroredLazy { .. } | TensorImpl::ConsistentLazy { .. })
    }

    /// Is tensor device resident
    #[must_use]
    pub fn is_eager(&self) -> bool {
        !self.is_lazy()
    }

    /// Does tensor span a placement
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        matches!(self.0.imp, TensorImpl::ConsistentLazy { .. } | TensorImpl::ConsistentEager(_))
    }

    /// Placement of consistent tensor
    #[must_use]
    pub fn placement(&self) -> &Placement {
        match &self.0.imp {
            TensorImpl::ConsistentLazy { placement, .. } => placement,
            TensorImpl::ConsistentEager(blob) => &blob.placement,
            imp => unimplemented_capability("placement", imp.kind()),
        }
    }

    /// Sbp of consistent eager tensor
    #[must_use]
    pub fn sbp(&self) -> Sbp {
        match &self.0.imp {
            TensorImpl::ConsistentEager(blob) => blob.sbp,
            imp => unimplemented_capability("sbp", imp.kind()),
        }
    }

    /// Logical blob id of lazy tensor
    #[must_use]
    pub fn lbi(&self) -> &LogicalBlobId {
        &self.lazy_blob("lbi").lbi
    }

    /// Job name of lazy tensor
    #[must_use]
    pub fn job_name(&self) -> &str {
        &self.lazy_blob("job_name").job_name
    }

    /// Distribution hint of lazy tensor
    #[must_use]
    pub fn distribute(&self) -> Distribute {
        self.lazy_blob("distribute").distribute
    }

    fn lazy_blob(&self, capability: &str) -> &LazyBlob {
        match &self.0.imp {
            TensorImpl::MirroredLazy { blob, .. } | TensorImpl::ConsistentLazy { blob, .. } => blob,
            imp => unimplemented_capability(capability, imp.kind()),
        }
    }

    /// Device blob of mirrored eager tensor
    #[must_use]
    pub fn blob(&self) -> &EagerBlob {
        match &self.0.imp {
            TensorImpl::MirroredEager(blob) => blob,
            imp => unimplemented_capability("blob", imp.kind()),
        }
    }

    /// Layout of consistent eager tensor
    #[must_use]
    pub fn consistent_blob(&self) -> &ConsistentBlob {
        match &self.0.imp {
            TensorImpl::ConsistentEager(blob) => blob,
            imp => unimplemented_capability("consistent_blob", imp.kind()),
        }
    }

    /// Is gradient tracked for this tensor
    #[must_use]
    pub fn requires_grad(&self) -> bool {
        self.0.requires_grad.load(Ordering::Relaxed)
    }

    /// Enable or disable gradient tracking, does not touch the value
    pub fn set_requires_grad(&self, requires_grad: bool) -> &Tensor {
        self.0.requires_grad.store(requires_grad, Ordering::Relaxed);
        self
    }

    /// Copy value to host, consistent tensors are assembled into their logical value
    pub fn to_host(&self) -> Result<HostData, StrataError> {
        match &self.0.imp {
            TensorImpl::MirroredEager(blob) => blob.to_host(),
            TensorImpl::ConsistentEager(blob) => boxing::load_logical(blob),
            imp => Err(StrataError::interpret_error(format!(
                "{} tensor {} has no value",
                imp.kind(),
                self.id()
            ))),
        }
    }

    /// Copy value to host as vector of T
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, StrataError> {
        self.to_host()?.into_vec()
    }
}

impl std::fmt::Display for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Tensor {} {} {} {}", self.id(), self.0.imp.kind(), self.desc(), self.device()))
    }
}

/// Ordered tensors, order is argument order
#[derive(Debug, Clone, Default)]
pub struct TensorTuple(Vec<Tensor>);

impl TensorTuple {
    /// Empty tuple
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append tensor
    pub fn push(&mut self, tensor: Tensor) {
        self.0.push(tensor);
    }

    /// Remove every tensor
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Tensors as vector
    #[must_use]
    pub fn into_vec(self) -> Vec<Tensor> {
        self.0
    }
}

impl std::ops::Deref for TensorTuple {
    type Target = [Tensor];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Tensor>> for TensorTuple {
    fn from(value: Vec<Tensor>) -> Self {
        Self(value)
    }
}

impl From<&[Tensor]> for TensorTuple {
    fn from(value: &[Tensor]) -> Self {
        Self(value.to_vec())
    }
}

impl<const N: usize> From<[Tensor; N]> for TensorTuple {
    fn from(value: [Tensor; N]) -> Self {
        Self(value.into())
    }
}

impl FromIterator<Tensor> for TensorTuple {
    fn from_iter<I: IntoIterator<Item = Tensor>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Tensor> for TensorTuple {
    fn extend<I: IntoIterator<Item = Tensor>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for TensorTuple {
    type Item = Tensor;
    type IntoIter = std::vec::IntoIter<Tensor>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TensorTuple {
    type Item = &'a Tensor;
    type IntoIter = std::slice::Iter<'a, Tensor>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Tensors an operator invocation keeps for its backward pass.
/// Append only, offsets returned by [`save_tensor_for_backward`](Self::save_tensor_for_backward) stay valid.
#[derive(Debug, Clone, Default)]
pub struct OpExprInterpState {
    saved: TensorTuple,
}

impl OpExprInterpState {
    /// Empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Save tensor, returns its offset
    pub fn save_tensor_for_backward(&mut self, tensor: &Tensor) -> usize {
        self.saved.push(tensor.clone());
        self.saved.len() - 1
    }

    /// Saved tensors in insertion order
    #[must_use]
    pub fn saved_tensors(&self) -> &TensorTuple {
        &self.saved
    }
}
