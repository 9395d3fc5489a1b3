//! Registers, capacity bounded pipeline buffers owned by one producing task.

use crate::task::TaskId;
use std::collections::{BTreeMap, BTreeSet};
use strata_core::dtype::DType;
use strata_core::error::StrataError;
use strata_core::shape::Shape;

/// Shape and dtype of one logical blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDesc {
    /// Shape
    pub shape: Shape,
    /// Data type
    pub dtype: DType,
    /// Blob carries a per record data id next to its values
    pub has_data_id_field: bool,
}

impl BlobDesc {
    /// Blob desc without data id field
    #[must_use]
    pub fn new(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self { shape: shape.into(), dtype, has_data_id_field: false }
    }
}

/// Non owning reference to a register, resolved through the task graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegstRef {
    /// Task that produces the register
    pub producer: TaskId,
    /// Name of the register among the producer's registers
    pub name: String,
}

impl std::fmt::Display for RegstRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}/{}", self.producer, self.name))
    }
}

/// Register descriptor
#[derive(Debug, Clone)]
pub struct RegstDesc {
    regst_desc_id: i64,
    name: String,
    producer: TaskId,
    min_register_num: i32,
    max_register_num: i32,
    lbn2blob_desc: BTreeMap<String, Option<BlobDesc>>,
    consumers: BTreeSet<TaskId>,
    locked: bool,
}

impl RegstDesc {
    pub(crate) fn new(regst_desc_id: i64, name: &str, producer: TaskId, min: i32, max: i32) -> Self {
        Self {
            regst_desc_id,
            name: name.into(),
            producer,
            min_register_num: min,
            max_register_num: max,
            lbn2blob_desc: BTreeMap::new(),
            consumers: BTreeSet::new(),
            locked: false,
        }
    }

    /// Graph wide unique id
    #[must_use]
    pub const fn regst_desc_id(&self) -> i64 {
        self.regst_desc_id
    }

    /// Name among the producer's registers
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Producing task
    #[must_use]
    pub const fn producer(&self) -> TaskId {
        self.producer
    }

    /// Reference to this register
    #[must_use]
    pub fn regst_ref(&self) -> RegstRef {
        RegstRef { producer: self.producer, name: self.name.clone() }
    }

    /// Minimum number of buffer instances
    #[must_use]
    pub const fn min_register_num(&self) -> i32 {
        self.min_register_num
    }

    /// Maximum number of buffer instances
    #[must_use]
    pub const fn max_register_num(&self) -> i32 {
        self.max_register_num
    }

    /// Tasks consuming this register
    #[must_use]
    pub const fn consumers(&self) -> &BTreeSet<TaskId> {
        &self.consumers
    }

    pub(crate) fn add_consumer(&mut self, consumer: TaskId) {
        self.consumers.insert(consumer);
    }

    /// Is shape of this register final
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Locks register, fails if it is locked already
    pub fn lock(&mut self) -> Result<(), StrataError> {
        if self.locked {
            return Err(StrataError::RegisterLocked(format!("{} was locked twice", self.regst_ref()).into()));
        }
        log::debug!("Locking register {} with {} blobs", self.regst_ref(), self.lbn2blob_desc.len());
        self.locked = true;
        Ok(())
    }

    fn check_unlocked(&self) -> Result<(), StrataError> {
        if self.locked {
            return Err(StrataError::RegisterLocked(self.regst_ref().to_string().into()));
        }
        Ok(())
    }

    /// Logical blob names held by this register, in lexical order
    pub fn lbns(&self) -> impl Iterator<Item = &str> {
        self.lbn2blob_desc.keys().map(String::as_str)
    }

    /// Does register hold logical blob
    #[must_use]
    pub fn contains(&self, lbn: &str) -> bool {
        self.lbn2blob_desc.contains_key(lbn)
    }

    /// Adds logical blob with yet unknown desc, adding it again is a no-op
    pub fn add_lbn(&mut self, lbn: &str) -> Result<(), StrataError> {
        self.check_unlocked()?;
        self.lbn2blob_desc.entry(lbn.into()).or_insert(None);
        Ok(())
    }

    /// Desc of logical blob, None while not inferred
    pub fn blob_desc(&self, lbn: &str) -> Result<Option<&BlobDesc>, StrataError> {
        self.lbn2blob_desc
            .get(lbn)
            .map(Option::as_ref)
            .ok_or_else(|| StrataError::NotFound(format!("blob {lbn} in register {}", self.regst_ref()).into()))
    }

    /// Mutable desc of logical blob
    pub fn mut_blob_desc(&mut self, lbn: &str) -> Result<&mut Option<BlobDesc>, StrataError> {
        self.check_unlocked()?;
        let regst = self.regst_ref();
        self.lbn2blob_desc
            .get_mut(lbn)
            .ok_or_else(|| StrataError::NotFound(format!("blob {lbn} in register {regst}").into()))
    }

    /// Sets desc of logical blob, adding the blob if needed
    pub fn set_blob_desc(&mut self, lbn: &str, desc: BlobDesc) -> Result<(), StrataError> {
        self.check_unlocked()?;
        self.lbn2blob_desc.insert(lbn.into(), Some(desc));
        Ok(())
    }

    /// One dimensional blob covering every blob of this register.
    /// None if register is empty or some desc is not known yet.
    pub fn packed_blob_desc(&self) -> Result<Option<BlobDesc>, StrataError> {
        let mut dtype = None;
        let mut numel = 0;
        let mut has_data_id_field = false;
        for (lbn, desc) in &self.lbn2blob_desc {
            let Some(desc) = desc else { return Ok(None) };
            match dtype {
                Some(dt) if dt != desc.dtype => {
                    return Err(StrataError::dtype_error(format!(
                        "register {} mixes {dt} and {} in blob {lbn}",
                        self.regst_ref(),
                        desc.dtype
                    )))
                }
                _ => dtype = Some(desc.dtype),
            }
            numel += desc.shape.numel();
            has_data_id_field |= desc.has_data_id_field;
        }
        Ok(dtype.map(|dtype| BlobDesc { shape: numel.into(), dtype, has_data_id_field }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_register_rejects_changes() -> Result<(), StrataError> {
        let mut regst = RegstDesc::new(0, "model", TaskId(0), 1, 1);
        regst.add_lbn("fc/weight")?;
        regst.lock()?;
        assert!(regst.is_locked());
        assert!(matches!(regst.add_lbn("fc/bias"), Err(StrataError::RegisterLocked(_))));
        assert!(regst.mut_blob_desc("fc/weight").is_err());
        assert!(regst.lock().is_err());
        assert_eq!(regst.blob_desc("fc/weight")?, None);
        Ok(())
    }

    #[test]
    fn packing() -> Result<(), StrataError> {
        let mut regst = RegstDesc::new(0, "model", TaskId(0), 1, 1);
        assert_eq!(regst.packed_blob_desc()?, None);
        regst.set_blob_desc("fc/weight", BlobDesc::new([4, 3], DType::F32))?;
        regst.add_lbn("fc/bias")?;
        assert_eq!(regst.packed_blob_desc()?, None);
        regst.set_blob_desc("fc/bias", BlobDesc::new(3, DType::F32))?;
        assert_eq!(regst.packed_blob_desc()?, Some(BlobDesc::new(15, DType::F32)));
        regst.set_blob_desc("fc/bias", BlobDesc::new(3, DType::F64))?;
        assert!(regst.packed_blob_desc().is_err());
        Ok(())
    }
}
