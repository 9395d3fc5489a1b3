//! Kernel backends and device resident buffers.

use crate::attr::AttrMap;
use crate::device::Device;
use crate::error::StrataError;
use crate::host::HostData;
use crate::infer::{InferenceRegistry, TensorDesc};
use crate::rng::{Generator, RandomMaskGenerator};
use crate::shape::Shape;
use std::any::Any;
use std::sync::Arc;

/// Id of buffer allocated by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub u64);

/// What a kernel gets besides its inputs
pub struct KernelContext<'a> {
    /// Static attributes merged with call attributes
    pub attrs: &'a AttrMap,
    /// Opaque kernel state passed by caller
    pub state: Option<&'a (dyn Any + Send + Sync)>,
    /// Generator of the interpreter, used when state does not carry one
    pub generator: &'a Arc<Generator>,
}

impl KernelContext<'_> {
    /// Generator passed as kernel state, or the interpreter's generator
    #[must_use]
    pub fn generator(&self) -> &Generator {
        self.state
            .and_then(|s| s.downcast_ref::<Generator>())
            .unwrap_or_else(|| self.generator.as_ref())
    }

    /// Mask generator passed as kernel state, or one drawing from the interpreter's generator
    #[must_use]
    pub fn mask_generator(&self) -> RandomMaskGenerator {
        self.state
            .and_then(|s| s.downcast_ref::<RandomMaskGenerator>())
            .cloned()
            .unwrap_or_else(|| RandomMaskGenerator::new(self.generator.clone()))
    }
}

/// Device and kernel backend.
///
/// Backend owns device memory, the core only holds [`BufferId`]s wrapped
/// in reference counted [`Buffer`]s that release memory on drop.
pub trait KernelBackend: Send + Sync + std::fmt::Debug {
    /// Name of backend
    fn name(&self) -> &str;

    /// Copy host data to device
    fn store(&self, device: Device, data: HostData) -> Result<BufferId, StrataError>;

    /// Copy buffer to host
    fn load(&self, buffer: BufferId) -> Result<HostData, StrataError>;

    /// Free buffer
    fn release(&self, buffer: BufferId);

    /// Run kernel of operator type on device, allocating one buffer per output desc
    fn compute(
        &self,
        op_type: &str,
        ctx: &KernelContext<'_>,
        device: Device,
        inputs: &[(&TensorDesc, BufferId)],
        outputs: &[TensorDesc],
    ) -> Result<Vec<BufferId>, StrataError>;
}

/// Owned handle to device memory, released when last reference is dropped
#[derive(Debug)]
pub struct Buffer {
    id: BufferId,
    device: Device,
    backend: Arc<dyn KernelBackend>,
}

impl Buffer {
    /// Id of buffer in backend
    #[must_use]
    pub const fn id(&self) -> BufferId {
        self.id
    }

    /// Device holding buffer
    #[must_use]
    pub const fn device(&self) -> Device {
        self.device
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        log::trace!("Releasing buffer {:?} on {}", self.id, self.device);
        self.backend.release(self.id);
    }
}

/// Device resident blob, desc plus buffer
#[derive(Debug, Clone)]
pub struct EagerBlob {
    desc: TensorDesc,
    buffer: Arc<Buffer>,
}

impl EagerBlob {
    /// Stores host data on device
    pub fn from_host(
        backend: &Arc<dyn KernelBackend>,
        device: Device,
        shape: Shape,
        data: HostData,
    ) -> Result<EagerBlob, StrataError> {
        if data.len() != shape.numel() {
            return Err(StrataError::shape_error(format!(
                "{} elements do not fit shape {shape}",
                data.len()
            )));
        }
        let desc = TensorDesc { shape, dtype: data.dtype() };
        let id = backend.store(device, data)?;
        Ok(EagerBlob::wrap(backend, device, desc, id))
    }

    fn wrap(backend: &Arc<dyn KernelBackend>, device: Device, desc: TensorDesc, id: BufferId) -> EagerBlob {
        EagerBlob { desc, buffer: Arc::new(Buffer { id, device, backend: backend.clone() }) }
    }

    /// Shape and dtype
    #[must_use]
    pub const fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    /// Device holding blob
    #[must_use]
    pub fn device(&self) -> Device {
        self.buffer.device
    }

    /// Buffer id in backend
    #[must_use]
    pub fn buffer_id(&self) -> BufferId {
        self.buffer.id
    }

    /// Backend owning blob
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn KernelBackend> {
        &self.buffer.backend
    }

    /// Copy blob to host
    pub fn to_host(&self) -> Result<HostData, StrataError> {
        self.buffer.backend.load(self.buffer.id)
    }
}

/// Infers output descs of op_type, checks that every input lives on device
/// and runs the kernel there. Returns freshly allocated output blobs.
pub fn allocate_and_compute(
    backend: &Arc<dyn KernelBackend>,
    inference: &InferenceRegistry,
    op_type: &str,
    num_outputs: usize,
    ctx: &KernelContext<'_>,
    device: Device,
    inputs: &[&EagerBlob],
) -> Result<Vec<EagerBlob>, StrataError> {
    if let Some(x) = inputs.iter().find(|x| x.device() != device) {
        return Err(StrataError::device_error(format!(
            "{op_type} runs on {device}, but one of its inputs is on {}",
            x.device()
        )));
    }
    let descs: Vec<TensorDesc> = inputs.iter().map(|x| x.desc.clone()).collect();
    let outputs = inference.infer(op_type, ctx.attrs, &descs)?;
    if outputs.len() != num_outputs {
        return Err(StrataError::arity(op_type, num_outputs, outputs.len()));
    }
    let args: Vec<(&TensorDesc, BufferId)> = inputs.iter().map(|x| (&x.desc, x.buffer_id())).collect();
    log::debug!("Computing {op_type} on {device} with {} backend", backend.name());
    let ids = backend.compute(op_type, ctx, device, &args, &outputs)?;
    if ids.len() != outputs.len() {
        for id in ids {
            backend.release(id);
        }
        return Err(StrataError::device_error(format!(
            "backend {} returned wrong number of buffers for {op_type}",
            backend.name()
        )));
    }
    Ok(outputs
        .into_iter()
        .zip(ids)
        .map(|(desc, id)| EagerBlob::wrap(backend, device, desc, id))
        .collect())
}
