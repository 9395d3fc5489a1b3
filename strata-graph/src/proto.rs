//! Serialized form of task nodes handed to the runtime.
//!
//! Ids that may be unset use `-1`.

use nanoserde::{DeJson, SerJson};

/// Blob desc of one logical blob
#[derive(Debug, Clone, PartialEq, Eq, SerJson, DeJson)]
pub struct BlobDescProto {
    /// Logical blob name
    pub lbn: String,
    /// Shape, empty while unknown
    pub shape: Vec<u64>,
    /// Data type name, empty while unknown
    pub dtype: String,
    /// Blob carries data ids
    pub has_data_id_field: bool,
}

/// Register descriptor
#[derive(Debug, Clone, PartialEq, Eq, SerJson, DeJson)]
pub struct RegstDescProto {
    /// Graph wide id
    pub regst_desc_id: i64,
    /// Name among the producer's registers
    pub name: String,
    /// Producing task
    pub producer_task_id: i64,
    /// Minimum number of buffer instances
    pub min_register_num: i32,
    /// Maximum number of buffer instances
    pub max_register_num: i32,
    /// Blobs held by the register
    pub blobs: Vec<BlobDescProto>,
    /// Consuming tasks
    pub consumer_task_ids: Vec<i64>,
}

/// Register consumed by a task under a name
#[derive(Debug, Clone, PartialEq, Eq, SerJson, DeJson)]
pub struct ConsumedRegstProto {
    /// Name under which the register is consumed
    pub name: String,
    /// Consumed register
    pub regst_desc_id: i64,
}

/// Binding of blob name to register
#[derive(Debug, Clone, PartialEq, Eq, SerJson, DeJson)]
pub struct BindingProto {
    /// Blob name in operator
    pub bn_in_op: String,
    /// Bound register
    pub regst_desc_id: i64,
}

/// Exec node
#[derive(Debug, Clone, PartialEq, Eq, SerJson, DeJson)]
pub struct ExecNodeProto {
    /// Operator name
    pub op_name: String,
    /// Operator type
    pub op_type: String,
    /// Bindings ordered by blob name
    pub bindings: Vec<BindingProto>,
}

/// Task node
#[derive(Debug, Clone, PartialEq, Eq, SerJson, DeJson)]
pub struct TaskProto {
    /// Task id
    pub task_id: i64,
    /// Task type name
    pub task_type: String,
    /// Machine running the task
    pub machine_id: i64,
    /// Thread running the task
    pub thread_id: i64,
    /// Produced registers ordered by name
    pub produced_regst_descs: Vec<RegstDescProto>,
    /// Consumed registers in consumption order
    pub consumed_regst_descs: Vec<ConsumedRegstProto>,
    /// Exec nodes in creation order
    pub exec_sequence: Vec<ExecNodeProto>,
    /// Seed of random kernels in this task
    pub random_seed: u64,
    /// Forward task fed by this task
    pub related_fw_task_id: i64,
    /// Save task fed by this task
    pub related_save_task_id: i64,
}

impl TaskProto {
    /// Serialize as json
    #[must_use]
    pub fn to_json(&self) -> String {
        self.serialize_json()
    }

    /// Parse from json
    pub fn from_json(json: &str) -> Result<Self, strata_core::error::StrataError> {
        Self::deserialize_json(json)
            .map_err(|e| strata_core::error::StrataError::parse_error(format!("task proto: {e:?}")))
    }
}
