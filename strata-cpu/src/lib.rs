//! CPU only, pure rust kernel backend for strata
//!
//! Initialize backend and use it with an eager interpreter.
//! ```rust
//! use strata_core::interpreter::EagerInterpreter;
//! let cpu = strata_cpu::device();
//! let interp = EagerInterpreter::mirrored(cpu.clone());
//! # let _ = interp;
//! ```
//!
//! Any number of `cpu:N` devices is simulated in one process, each buffer
//! remembers the device it was stored on.

#![forbid(unsafe_code)]
#![forbid(rustdoc::broken_intra_doc_links)]
#![forbid(rustdoc::private_intra_doc_links)]
#![warn(missing_docs)]
#![forbid(rustdoc::invalid_codeblock_attributes)]
#![forbid(rustdoc::bare_urls)]

mod kernels;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use strata_core::backend::{BufferId, KernelBackend, KernelContext};
use strata_core::device::{Device, DeviceKind};
use strata_core::error::StrataError;
use strata_core::host::HostData;
use strata_core::infer::TensorDesc;

/// CPU backend
#[derive(Debug)]
pub struct Cpu {
    num_devices: u32,
    buffers: Mutex<BTreeMap<BufferId, (Device, Arc<HostData>)>>,
    next_id: AtomicU64,
    allocations: AtomicUsize,
}

/// Create new CPU backend with one device, cpu:0
#[must_use]
pub fn device() -> Arc<Cpu> {
    devices(1)
}

/// Create new CPU backend with devices cpu:0 .. cpu:num_devices
#[must_use]
pub fn devices(num_devices: u32) -> Arc<Cpu> {
    Arc::new(Cpu {
        num_devices,
        buffers: Mutex::new(BTreeMap::new()),
        next_id: AtomicU64::new(0),
        allocations: AtomicUsize::new(0),
    })
}

impl Cpu {
    /// Number of buffers allocated since creation
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Number of buffers currently alive
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers().len()
    }

    fn buffers(&self) -> MutexGuard<'_, BTreeMap<BufferId, (Device, Arc<HostData>)>> {
        self.buffers.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_device(&self, device: Device) -> Result<(), StrataError> {
        if device.kind != DeviceKind::CPU {
            return Err(StrataError::device_error(format!("cpu backend can not run on {device}")));
        }
        if device.id >= self.num_devices {
            return Err(StrataError::device_error(format!(
                "{device} does not exist, cpu backend has {} devices",
                self.num_devices
            )));
        }
        Ok(())
    }

    fn get(&self, buffer: BufferId) -> Result<(Device, Arc<HostData>), StrataError> {
        self.buffers()
            .get(&buffer)
            .cloned()
            .ok_or_else(|| StrataError::NotFound(format!("cpu buffer {buffer:?}").into()))
    }

    fn insert(&self, device: Device, data: HostData) -> BufferId {
        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.buffers().insert(id, (device, Arc::new(data)));
        id
    }
}

impl KernelBackend for Cpu {
    fn name(&self) -> &str {
        "cpu"
    }

    fn store(&self, device: Device, data: HostData) -> Result<BufferId, StrataError> {
        self.check_device(device)?;
        Ok(self.insert(device, data))
    }

    fn load(&self, buffer: BufferId) -> Result<HostData, StrataError> {
        Ok(self.get(buffer)?.1.as_ref().clone())
    }

    fn release(&self, buffer: BufferId) {
        self.buffers().remove(&buffer);
    }

    fn compute(
        &self,
        op_type: &str,
        ctx: &KernelContext<'_>,
        device: Device,
        inputs: &[(&TensorDesc, BufferId)],
        outputs: &[TensorDesc],
    ) -> Result<Vec<BufferId>, StrataError> {
        self.check_device(device)?;
        let args = inputs
            .iter()
            .map(|(desc, id)| {
                let (on, data) = self.get(*id)?;
                if on != device {
                    return Err(StrataError::device_error(format!("buffer {id:?} is on {on}, not on {device}")));
                }
                Ok((*desc, data))
            })
            .collect::<Result<Vec<(&TensorDesc, Arc<HostData>)>, StrataError>>()?;
        let results = kernels::run(op_type, ctx, &args, outputs)?;
        Ok(results.into_iter().map(|data| self.insert(device, data)).collect())
    }
}
