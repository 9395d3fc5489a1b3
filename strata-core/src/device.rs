//! Devices and placements.

use crate::error::StrataError;

/// Kind of compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceKind {
    /// Host memory and cores
    CPU,
    /// Nvidia GPU
    CUDA,
}

impl DeviceKind {
    const fn name(self) -> &'static str {
        match self {
            DeviceKind::CPU => "cpu",
            DeviceKind::CUDA => "cuda",
        }
    }
}

/// Single compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Device {
    /// Kind of device
    pub kind: DeviceKind,
    /// Index of device among devices of the same kind
    pub id: u32,
}

impl Device {
    /// Host device with given index
    #[must_use]
    pub const fn cpu(id: u32) -> Device {
        Device { kind: DeviceKind::CPU, id }
    }

    /// CUDA device with given index
    #[must_use]
    pub const fn cuda(id: u32) -> Device {
        Device { kind: DeviceKind::CUDA, id }
    }
}

impl Default for Device {
    fn default() -> Self {
        Device::cpu(0)
    }
}

impl std::str::FromStr for Device {
    type Err = StrataError;

    /// Parses "cpu", "cpu:1", "cuda:0"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = match s.split_once(':') {
            Some((kind, id)) => (
                kind,
                id.parse::<u32>()
                    .map_err(|e| StrataError::parse_error(format!("device index in {s:?}: {e}")))?,
            ),
            None => (s, 0),
        };
        let kind = match kind {
            "cpu" => DeviceKind::CPU,
            "cuda" | "gpu" => DeviceKind::CUDA,
            _ => return Err(StrataError::parse_error(format!("Unknown device {s:?}"))),
        };
        Ok(Device { kind, id })
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}:{}", self.kind.name(), self.id))
    }
}

/// Ordered group of devices of one kind. Position in the group is the parallel id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Placement {
    kind: DeviceKind,
    device_ids: Box<[u32]>,
}

impl Placement {
    /// New placement, device ids must be unique and non empty
    pub fn new(kind: DeviceKind, device_ids: impl IntoIterator<Item = u32>) -> Result<Self, StrataError> {
        let device_ids: Box<[u32]> = device_ids.into_iter().collect();
        if device_ids.is_empty() {
            return Err(StrataError::device_error("placement needs at least one device"));
        }
        for (i, id) in device_ids.iter().enumerate() {
            if device_ids[..i].contains(id) {
                return Err(StrataError::device_error(format!(
                    "device {id} appears twice in placement"
                )));
            }
        }
        Ok(Placement { kind, device_ids })
    }

    /// Placement with single device
    #[must_use]
    pub fn single(device: Device) -> Self {
        Placement { kind: device.kind, device_ids: Box::new([device.id]) }
    }

    /// Placement spanning given devices in the given order
    pub fn from_devices(devices: &[Device]) -> Result<Self, StrataError> {
        let Some(first) = devices.first() else {
            return Err(StrataError::device_error("placement needs at least one device"));
        };
        if devices.iter().any(|d| d.kind != first.kind) {
            return Err(StrataError::device_error(format!(
                "placement devices must be of one kind, got {devices:?}"
            )));
        }
        Placement::new(first.kind, devices.iter().map(|d| d.id))
    }

    /// Number of devices in placement
    #[must_use]
    pub fn parallel_num(&self) -> usize {
        self.device_ids.len()
    }

    /// Device with given parallel id
    #[must_use]
    pub fn device(&self, parallel_id: usize) -> Device {
        Device { kind: self.kind, id: self.device_ids[parallel_id] }
    }

    /// All devices in parallel id order
    pub fn devices(&self) -> impl Iterator<Item = Device> + '_ {
        self.device_ids.iter().map(|&id| Device { kind: self.kind, id })
    }

    /// Kind of devices in placement
    #[must_use]
    pub const fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Devices of self followed by devices of other not already in self
    pub fn union(&self, other: &Placement) -> Result<Placement, StrataError> {
        if self.kind != other.kind {
            return Err(StrataError::device_error(format!("can not unite {self} and {other}")));
        }
        let extra = other.device_ids.iter().filter(|id| !self.device_ids.contains(*id));
        Placement::new(self.kind, self.device_ids.iter().chain(extra).copied())
    }
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}:{:?}", self.kind.name(), self.device_ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_device() -> Result<(), StrataError> {
        assert_eq!("cpu".parse::<Device>()?, Device::cpu(0));
        assert_eq!("cuda:3".parse::<Device>()?, Device::cuda(3));
        assert!("tpu:0".parse::<Device>().is_err());
        Ok(())
    }

    #[test]
    fn placement_rejects_duplicates() {
        assert!(Placement::new(DeviceKind::CPU, [0, 1, 0]).is_err());
        assert!(Placement::from_devices(&[Device::cpu(0), Device::cuda(1)]).is_err());
    }

    #[test]
    fn placement_union() -> Result<(), StrataError> {
        let a = Placement::new(DeviceKind::CPU, [2, 0])?;
        let b = Placement::new(DeviceKind::CPU, [0, 1])?;
        assert_eq!(a.union(&b)?, Placement::new(DeviceKind::CPU, [2, 0, 1])?);
        assert!(a.union(&Placement::single(Device::cuda(0))).is_err());
        Ok(())
    }
}
