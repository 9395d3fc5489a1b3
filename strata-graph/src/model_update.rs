//! Model update task node.
//!
//! Produces three registers:
//! - `model`, the pipelined model versions
//! - `model_tmp`, state shared with forward and backward tasks
//! - `data_tmp`, transient blobs of the update rule
//!
//! In train mode it consumes one accumulated model diff per in edge and
//! builds a single model update operator over them.

use crate::operator::Operator;
use crate::proto::TaskProto;
use crate::register::{RegstDesc, RegstRef};
use crate::task::{CompTaskNode, TaskGraph, TaskId};
use std::sync::Arc;
use strata_core::config::JobConfig;
use strata_core::error::StrataError;

/// Capacity {min, max} of the model register under job.
///
/// Predict keeps a single model version, unbounded staleness pipelines up to
/// the global maximum and staleness S allows S + 1 versions.
#[must_use]
pub fn model_regst_capacity(job: &JobConfig) -> (i32, i32) {
    if job.is_predict() {
        return (1, 1);
    }
    match job.staleness {
        None => (2, job.max_register_num),
        Some(s) => (1, i32::try_from(s).map_or(i32::MAX, |s| s.saturating_add(1))),
    }
}

/// Behaviour of model update tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MdUpdtCompTaskNode {
    random_seed: u64,
}

impl MdUpdtCompTaskNode {
    /// Behaviour writing random_seed into its proto
    #[must_use]
    pub const fn new(random_seed: u64) -> Self {
        Self { random_seed }
    }

    /// Seed of random kernels of the task
    #[must_use]
    pub const fn random_seed(&self) -> u64 {
        self.random_seed
    }
}

fn produced(id: TaskId, name: &str) -> RegstRef {
    RegstRef { producer: id, name: name.into() }
}

impl CompTaskNode for MdUpdtCompTaskNode {
    fn produce_all_regsts_and_bind_edges(&self, graph: &mut TaskGraph, id: TaskId, job: &JobConfig) -> Result<(), StrataError> {
        let (min, max) = model_regst_capacity(job);
        let model = graph.produce_regst(id, "model", min, max)?;
        let model_tmp = graph.produce_regst(id, "model_tmp", 1, 1)?;
        graph.produce_regst(id, "data_tmp", 1, 1)?;
        for edge in graph.node(id)?.out_edges().to_vec() {
            let dst = graph.node(graph.edge(edge)?.dst())?.task_type();
            graph.add_regst_to_edge(edge, "model", model.clone())?;
            if dst.is_forward() || dst.is_backward() {
                graph.add_regst_to_edge(edge, "model_tmp", model_tmp.clone())?;
            }
        }
        Ok(())
    }

    fn consume_all_regsts(&self, graph: &mut TaskGraph, id: TaskId, job: &JobConfig) -> Result<(), StrataError> {
        if job.is_predict() {
            return Ok(());
        }
        for edge in graph.node(id)?.in_edges().to_vec() {
            let regst = graph.edge(edge)?.sole_regst()?.clone();
            let name = format!("model_diff_acc_{}", graph.new_unique_id());
            graph.consume_regst(id, &name, regst)?;
        }
        Ok(())
    }

    fn is_ready_for_build(&self, graph: &TaskGraph, id: TaskId) -> bool {
        ["model", "model_tmp"]
            .iter()
            .all(|name| graph.produced_regst(id, name).is_ok_and(RegstDesc::is_locked))
    }

    fn build_exec_gph_and_regst(&self, graph: &mut TaskGraph, id: TaskId, job: &JobConfig) -> Result<(), StrataError> {
        if job.is_predict() {
            return Ok(());
        }
        let consumed: Vec<RegstRef> = graph.node(id)?.consumed_regsts().iter().map(|(_, r)| r.clone()).collect();
        let name = format!("md_update_{}", graph.new_unique_id());
        let op = Arc::new(Operator::model_update(&name, job.model_update, consumed.len()));
        if op.input_bns().len() != consumed.len() {
            return Err(StrataError::binding_error(format!(
                "{name} declares {} inputs, {id} consumes {} registers",
                op.input_bns().len(),
                consumed.len()
            )));
        }
        let exec = graph.new_exec_node(id, op.clone())?;
        for (ibn, regst) in op.input_bns().iter().zip(consumed) {
            graph.bind_bn_in_op_and_regst(id, exec, ibn, regst)?;
        }
        graph.bind_bn_in_op_and_regst(id, exec, op.sole_obn()?, produced(id, "model"))?;
        let data_tmp = produced(id, "data_tmp");
        for dtbn in op.data_tmp_bns() {
            graph.regst_mut(&data_tmp)?.add_lbn(&op.lbn4bn(dtbn))?;
            graph.bind_bn_in_op_and_regst(id, exec, dtbn, data_tmp.clone())?;
        }
        graph.infer_exec_node_blob_descs(id, exec, job)
    }

    fn lock_regsts(&self, graph: &mut TaskGraph, id: TaskId, _: &JobConfig) -> Result<(), StrataError> {
        graph.lock_regst(&produced(id, "data_tmp"))
    }

    fn to_proto(&self, graph: &TaskGraph, id: TaskId, _: &JobConfig) -> Result<TaskProto, StrataError> {
        let mut proto = graph.base_proto(id)?;
        proto.random_seed = self.random_seed;
        for edge in graph.node(id)?.out_edges() {
            let dst = graph.node(graph.edge(*edge)?.dst())?;
            if dst.task_type().is_forward() {
                if proto.related_fw_task_id != -1 {
                    return Err(StrataError::duplicate_assignment(format!(
                        "{id} feeds forward tasks {} and {}",
                        proto.related_fw_task_id,
                        dst.id().0
                    )));
                }
                proto.related_fw_task_id = dst.id().0;
            } else if dst.task_type().is_backward() {
                // Backward tasks find their model through the forward task
            } else {
                if proto.related_save_task_id != -1 {
                    return Err(StrataError::duplicate_assignment(format!(
                        "{id} feeds save tasks {} and {}",
                        proto.related_save_task_id,
                        dst.id().0
                    )));
                }
                proto.related_save_task_id = dst.id().0;
            }
        }
        Ok(proto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity() {
        assert_eq!(model_regst_capacity(&JobConfig::predict().with_staleness(None)), (1, 1));
        assert_eq!(model_regst_capacity(&JobConfig::train().with_staleness(None).with_max_register_num(64)), (2, 64));
        assert_eq!(model_regst_capacity(&JobConfig::train().with_staleness(Some(3))), (1, 4));
    }
}
