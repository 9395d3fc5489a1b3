//! Task graph.
//!
//! Task nodes own the registers they produce. Edges and consumers refer to
//! registers through [`RegstRef`], resolved by [`TaskGraph::regst`]. Each node
//! carries a [`CompTaskNode`] behaviour whose phases are run by
//! [`TaskGraph::build`] in a fixed order:
//!
//! 1. produce registers and attach them to out edges (every node)
//! 2. consume registers of in edges (every node)
//! 3. for every node ready for build: build exec graph, then lock registers
//!
//! Nodes that never become ready are returned, an external phase locks the
//! registers they wait for and calls [`TaskGraph::build_ready`] again.

use crate::exec::ExecGraph;
use crate::operator::{BlobDescLookup, Operator, ParallelContext};
use crate::proto::{BindingProto, BlobDescProto, ConsumedRegstProto, ExecNodeProto, RegstDescProto, TaskProto};
use crate::register::{RegstDesc, RegstRef};
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_core::config::JobConfig;
use strata_core::error::StrataError;

/// Id of task node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub i64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("task_{}", self.0))
    }
}

/// Index of edge in task graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub usize);

/// Kind of work a task does
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskType {
    /// Forward pass of a model
    Forward,
    /// Backward pass of a model
    Backward,
    /// Applies accumulated model diffs
    ModelUpdate,
    /// Persists model
    ModelSave,
    /// Accumulates model diffs
    ModelDiffAcc,
    /// Loads data
    DataLoader,
    /// Moves data between devices
    Copy,
    /// Changes distribution of data
    Boxing,
}

impl TaskType {
    /// Is forward task
    #[must_use]
    pub const fn is_forward(self) -> bool {
        matches!(self, TaskType::Forward)
    }

    /// Is backward task
    #[must_use]
    pub const fn is_backward(self) -> bool {
        matches!(self, TaskType::Backward)
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TaskType::Forward => "forward",
            TaskType::Backward => "backward",
            TaskType::ModelUpdate => "model_update",
            TaskType::ModelSave => "model_save",
            TaskType::ModelDiffAcc => "model_diff_acc",
            TaskType::DataLoader => "data_loader",
            TaskType::Copy => "copy",
            TaskType::Boxing => "boxing",
        })
    }
}

/// Construction phases of a compute task node.
///
/// Phases take the graph and the id of the node they run for, so they can
/// reach registers of neighbours through edges.
pub trait CompTaskNode: Send + Sync + std::fmt::Debug {
    /// Creates produced registers and attaches them to out edges
    fn produce_all_regsts_and_bind_edges(&self, graph: &mut TaskGraph, id: TaskId, job: &JobConfig) -> Result<(), StrataError>;

    /// Consumes registers carried by in edges
    fn consume_all_regsts(&self, graph: &mut TaskGraph, id: TaskId, job: &JobConfig) -> Result<(), StrataError>;

    /// Are registers needed to build the exec graph locked
    fn is_ready_for_build(&self, graph: &TaskGraph, id: TaskId) -> bool;

    /// Builds exec graph and infers blob descs of produced registers
    fn build_exec_gph_and_regst(&self, graph: &mut TaskGraph, id: TaskId, job: &JobConfig) -> Result<(), StrataError>;

    /// Locks registers whose shape is final after build
    fn lock_regsts(&self, graph: &mut TaskGraph, id: TaskId, job: &JobConfig) -> Result<(), StrataError>;

    /// Serialized node
    fn to_proto(&self, graph: &TaskGraph, id: TaskId, job: &JobConfig) -> Result<TaskProto, StrataError> {
        let _ = job;
        graph.base_proto(id)
    }
}

/// Vertex of the task graph
#[derive(Debug, Clone)]
pub struct TaskNode {
    id: TaskId,
    task_type: TaskType,
    machine_id: i64,
    thread_id: i64,
    parallel_ctx: ParallelContext,
    produced: BTreeMap<String, RegstDesc>,
    consumed: Vec<(String, RegstRef)>,
    exec_gph: ExecGraph,
    in_edges: Vec<EdgeId>,
    out_edges: Vec<EdgeId>,
    behaviour: Arc<dyn CompTaskNode>,
    built: bool,
}

impl TaskNode {
    /// Id
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Task type
    #[must_use]
    pub const fn task_type(&self) -> TaskType {
        self.task_type
    }

    /// Machine running this task
    #[must_use]
    pub const fn machine_id(&self) -> i64 {
        self.machine_id
    }

    /// Thread running this task
    #[must_use]
    pub const fn thread_id(&self) -> i64 {
        self.thread_id
    }

    /// Position among tasks running the same operators
    #[must_use]
    pub const fn parallel_ctx(&self) -> &ParallelContext {
        &self.parallel_ctx
    }

    /// Produced register by name
    #[must_use]
    pub fn produced_regst(&self, name: &str) -> Option<&RegstDesc> {
        self.produced.get(name)
    }

    /// Produced registers ordered by name
    pub fn produced_regsts(&self) -> impl Iterator<Item = &RegstDesc> {
        self.produced.values()
    }

    /// Consumed registers in consumption order
    #[must_use]
    pub fn consumed_regsts(&self) -> &[(String, RegstRef)] {
        &self.consumed
    }

    /// Local operator graph
    #[must_use]
    pub const fn exec_gph(&self) -> &ExecGraph {
        &self.exec_gph
    }

    /// Incoming edges
    #[must_use]
    pub fn in_edges(&self) -> &[EdgeId] {
        &self.in_edges
    }

    /// Outgoing edges
    #[must_use]
    pub fn out_edges(&self) -> &[EdgeId] {
        &self.out_edges
    }

    /// Was exec graph built and were registers locked
    #[must_use]
    pub const fn is_built(&self) -> bool {
        self.built
    }

    fn sees(&self, regst: &RegstRef) -> bool {
        (regst.producer == self.id && self.produced.contains_key(&regst.name))
            || self.consumed.iter().any(|(_, r)| r == regst)
    }
}

/// Directed edge carrying registers by name
#[derive(Debug, Clone)]
pub struct TaskEdge {
    src: TaskId,
    dst: TaskId,
    regsts: BTreeMap<String, RegstRef>,
}

impl TaskEdge {
    /// Source node
    #[must_use]
    pub const fn src(&self) -> TaskId {
        self.src
    }

    /// Destination node
    #[must_use]
    pub const fn dst(&self) -> TaskId {
        self.dst
    }

    /// Carried registers by name
    #[must_use]
    pub const fn regsts(&self) -> &BTreeMap<String, RegstRef> {
        &self.regsts
    }

    /// The only carried register
    pub fn sole_regst(&self) -> Result<&RegstRef, StrataError> {
        let mut regsts = self.regsts.values();
        match (regsts.next(), regsts.next()) {
            (Some(regst), None) => Ok(regst),
            _ => Err(StrataError::binding_error(format!(
                "edge {} -> {} carries {} registers, expected one",
                self.src,
                self.dst,
                self.regsts.len()
            ))),
        }
    }
}

/// Graph of task nodes
#[derive(Debug, Default)]
pub struct TaskGraph {
    nodes: BTreeMap<TaskId, TaskNode>,
    edges: Vec<TaskEdge>,
    next_task_id: i64,
    next_regst_desc_id: i64,
    next_unique_id: u64,
}

impl TaskGraph {
    /// Empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds node on machine 0, thread 0
    pub fn add_node(&mut self, task_type: TaskType, behaviour: Arc<dyn CompTaskNode>) -> TaskId {
        self.add_node_on(task_type, 0, 0, behaviour)
    }

    /// Adds node running on given machine and thread
    pub fn add_node_on(
        &mut self,
        task_type: TaskType,
        machine_id: i64,
        thread_id: i64,
        behaviour: Arc<dyn CompTaskNode>,
    ) -> TaskId {
        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;
        self.nodes.insert(
            id,
            TaskNode {
                id,
                task_type,
                machine_id,
                thread_id,
                parallel_ctx: ParallelContext::default(),
                produced: BTreeMap::new(),
                consumed: Vec::new(),
                exec_gph: ExecGraph::default(),
                in_edges: Vec::new(),
                out_edges: Vec::new(),
                behaviour,
                built: false,
            },
        );
        id
    }

    /// Sets position of node among tasks running the same operators
    pub fn set_parallel_ctx(&mut self, id: TaskId, parallel_ctx: ParallelContext) -> Result<(), StrataError> {
        self.node_mut(id)?.parallel_ctx = parallel_ctx;
        Ok(())
    }

    /// Adds edge from src to dst carrying no registers yet
    pub fn add_edge(&mut self, src: TaskId, dst: TaskId) -> Result<EdgeId, StrataError> {
        self.node(src)?;
        self.node(dst)?;
        let id = EdgeId(self.edges.len());
        self.edges.push(TaskEdge { src, dst, regsts: BTreeMap::new() });
        self.node_mut(src)?.out_edges.push(id);
        self.node_mut(dst)?.in_edges.push(id);
        Ok(id)
    }

    /// Node by id
    pub fn node(&self, id: TaskId) -> Result<&TaskNode, StrataError> {
        self.nodes.get(&id).ok_or_else(|| StrataError::NotFound(format!("{id}").into()))
    }

    fn node_mut(&mut self, id: TaskId) -> Result<&mut TaskNode, StrataError> {
        self.nodes.get_mut(&id).ok_or_else(|| StrataError::NotFound(format!("{id}").into()))
    }

    /// Nodes ordered by id
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.values()
    }

    /// Edge by id
    pub fn edge(&self, id: EdgeId) -> Result<&TaskEdge, StrataError> {
        self.edges.get(id.0).ok_or_else(|| StrataError::NotFound(format!("edge {}", id.0).into()))
    }

    /// Fresh id, unique within this graph
    pub fn new_unique_id(&mut self) -> u64 {
        let id = self.next_unique_id;
        self.next_unique_id += 1;
        id
    }

    /// Creates register produced by node. Producing the same register again
    /// with the same capacity returns it, with different capacity it fails.
    pub fn produce_regst(&mut self, id: TaskId, name: &str, min: i32, max: i32) -> Result<RegstRef, StrataError> {
        if min < 1 || max < min {
            return Err(StrataError::binding_error(format!("register {name} of {id} can not hold {min}..={max} buffers")));
        }
        let regst_desc_id = self.next_regst_desc_id;
        let node = self.node_mut(id)?;
        if let Some(regst) = node.produced.get(name) {
            if (regst.min_register_num(), regst.max_register_num()) == (min, max) {
                return Ok(regst.regst_ref());
            }
            return Err(StrataError::duplicate_assignment(format!(
                "register {} with {}..={} buffers produced again with {min}..={max}",
                regst.regst_ref(),
                regst.min_register_num(),
                regst.max_register_num()
            )));
        }
        let regst = RegstDesc::new(regst_desc_id, name, id, min, max);
        let regst_ref = regst.regst_ref();
        node.produced.insert(name.into(), regst);
        self.next_regst_desc_id += 1;
        log::debug!("Produced register {regst_ref} with {min}..={max} buffers");
        Ok(regst_ref)
    }

    /// Attaches register to edge under name, destination becomes its consumer
    pub fn add_regst_to_edge(&mut self, edge: EdgeId, name: &str, regst: RegstRef) -> Result<(), StrataError> {
        self.regst(&regst)?;
        let e = self.edges.get_mut(edge.0).ok_or_else(|| StrataError::NotFound(format!("edge {}", edge.0).into()))?;
        if e.src != regst.producer {
            return Err(StrataError::binding_error(format!("{regst} can not leave {} through its out edge", e.src)));
        }
        match e.regsts.get(name) {
            Some(existing) if *existing == regst => return Ok(()),
            Some(existing) => {
                return Err(StrataError::duplicate_assignment(format!(
                    "edge {} -> {} carries {existing} as {name}, not {regst}",
                    e.src, e.dst
                )))
            }
            None => {}
        }
        e.regsts.insert(name.into(), regst.clone());
        let dst = e.dst;
        self.regst_mut(&regst)?.add_consumer(dst);
        Ok(())
    }

    /// Node consumes register under name
    pub fn consume_regst(&mut self, id: TaskId, name: &str, regst: RegstRef) -> Result<(), StrataError> {
        self.regst(&regst)?;
        let node = self.node_mut(id)?;
        if let Some((_, existing)) = node.consumed.iter().find(|(n, _)| n == name) {
            if *existing == regst {
                return Ok(());
            }
            return Err(StrataError::duplicate_assignment(format!("{id} already consumes {existing} as {name}")));
        }
        log::trace!("{id} consumes {regst} as {name}");
        node.consumed.push((name.into(), regst));
        Ok(())
    }

    /// Register referenced by regst
    pub fn regst(&self, regst: &RegstRef) -> Result<&RegstDesc, StrataError> {
        self.node(regst.producer)?
            .produced
            .get(&regst.name)
            .ok_or_else(|| StrataError::NotFound(format!("register {regst}").into()))
    }

    /// Mutable register referenced by regst
    pub fn regst_mut(&mut self, regst: &RegstRef) -> Result<&mut RegstDesc, StrataError> {
        self.node_mut(regst.producer)?
            .produced
            .get_mut(&regst.name)
            .ok_or_else(|| StrataError::NotFound(format!("register {regst}").into()))
    }

    /// Register produced by node under name
    pub fn produced_regst(&self, id: TaskId, name: &str) -> Result<&RegstDesc, StrataError> {
        self.regst(&RegstRef { producer: id, name: name.into() })
    }

    /// Locks register
    pub fn lock_regst(&mut self, regst: &RegstRef) -> Result<(), StrataError> {
        self.regst_mut(regst)?.lock()
    }

    /// Adds exec node wrapping op to node, returns its index
    pub fn new_exec_node(&mut self, id: TaskId, op: Arc<Operator>) -> Result<usize, StrataError> {
        Ok(self.node_mut(id)?.exec_gph.new_node(op))
    }

    /// Binds blob name of exec node to register visible on the task, that is
    /// produced by it or consumed through an edge
    pub fn bind_bn_in_op_and_regst(
        &mut self,
        id: TaskId,
        exec_node: usize,
        bn: &str,
        regst: RegstRef,
    ) -> Result<(), StrataError> {
        self.regst(&regst)?;
        let node = self.node_mut(id)?;
        if !node.sees(&regst) {
            return Err(StrataError::binding_error(format!("{regst} is neither produced nor consumed by {id}")));
        }
        let exec = node
            .exec_gph
            .node_mut(exec_node)
            .ok_or_else(|| StrataError::NotFound(format!("exec node {exec_node} of {id}").into()))?;
        if let Some(prev) = exec.regst4bn(bn) {
            return Err(StrataError::duplicate_assignment(format!("{bn} of {id} is bound to {prev}")));
        }
        log::trace!("Binding {}:{bn} to {regst}", exec.op().name());
        exec.bind(bn, regst);
        Ok(())
    }

    /// Runs blob desc inference of exec node over its bound registers.
    /// Blobs found in their register by lbn are read and written back,
    /// other bindings see the packed desc of the whole register.
    pub fn infer_exec_node_blob_descs(&mut self, id: TaskId, exec_node: usize, job: &JobConfig) -> Result<(), StrataError> {
        let node = self.node(id)?;
        let parallel_ctx = node.parallel_ctx;
        let exec = node
            .exec_gph
            .node(exec_node)
            .ok_or_else(|| StrataError::NotFound(format!("exec node {exec_node} of {id}").into()))?;
        let op = exec.op().clone();
        let mut lookup = BlobDescLookup::new();
        let mut own_blobs = Vec::new();
        for (bn, regst_ref) in exec.bindings() {
            let regst = self.regst(regst_ref)?;
            let lbn = op.lbn4bn(bn);
            let desc = if regst.contains(&lbn) {
                own_blobs.push((bn.to_string(), regst_ref.clone(), lbn.clone()));
                regst.blob_desc(&lbn)?.cloned()
            } else {
                regst.packed_blob_desc()?
            };
            lookup.insert(bn.into(), desc);
        }
        op.infer_blob_descs(&mut lookup, &parallel_ctx, job)?;
        for (bn, regst_ref, lbn) in own_blobs {
            let regst = self.regst_mut(&regst_ref)?;
            if let (false, Some(desc)) = (regst.is_locked(), lookup.remove(&bn).flatten()) {
                *regst.mut_blob_desc(&lbn)? = Some(desc);
            }
        }
        Ok(())
    }

    /// Fields of the proto common to every task node
    pub fn base_proto(&self, id: TaskId) -> Result<TaskProto, StrataError> {
        let node = self.node(id)?;
        let consumed_regst_descs = node
            .consumed
            .iter()
            .map(|(name, r)| Ok(ConsumedRegstProto { name: name.clone(), regst_desc_id: self.regst(r)?.regst_desc_id() }))
            .collect::<Result<Vec<_>, StrataError>>()?;
        let exec_sequence = node
            .exec_gph
            .nodes()
            .iter()
            .map(|exec| {
                let bindings = exec
                    .bindings()
                    .map(|(bn, r)| Ok(BindingProto { bn_in_op: bn.into(), regst_desc_id: self.regst(r)?.regst_desc_id() }))
                    .collect::<Result<Vec<_>, StrataError>>()?;
                Ok(ExecNodeProto { op_name: exec.op().name().into(), op_type: exec.op().op_type().into(), bindings })
            })
            .collect::<Result<Vec<_>, StrataError>>()?;
        Ok(TaskProto {
            task_id: id.0,
            task_type: node.task_type.to_string(),
            machine_id: node.machine_id,
            thread_id: node.thread_id,
            produced_regst_descs: node.produced.values().map(regst_proto).collect(),
            consumed_regst_descs,
            exec_sequence,
            random_seed: 0,
            related_fw_task_id: -1,
            related_save_task_id: -1,
        })
    }

    /// Serialized node as its behaviour writes it
    pub fn to_proto(&self, id: TaskId, job: &JobConfig) -> Result<TaskProto, StrataError> {
        let behaviour = self.node(id)?.behaviour.clone();
        behaviour.to_proto(self, id, job)
    }

    /// Runs produce and consume phases of every node, then builds nodes
    /// ready for build. Returns nodes still waiting for locked registers.
    pub fn build(&mut self, job: &JobConfig) -> Result<Vec<TaskId>, StrataError> {
        let ids: Vec<TaskId> = self.nodes.keys().copied().collect();
        log::debug!("Building task graph of job {} with {} nodes", job.job_name, ids.len());
        for &id in &ids {
            let behaviour = self.node(id)?.behaviour.clone();
            behaviour.produce_all_regsts_and_bind_edges(self, id, job)?;
        }
        for &id in &ids {
            let behaviour = self.node(id)?.behaviour.clone();
            behaviour.consume_all_regsts(self, id, job)?;
        }
        self.build_ready(job)
    }

    /// Builds and locks every not yet built node that is ready for build,
    /// until no more nodes become ready. Returns nodes still waiting.
    pub fn build_ready(&mut self, job: &JobConfig) -> Result<Vec<TaskId>, StrataError> {
        loop {
            let ready: Vec<(TaskId, Arc<dyn CompTaskNode>)> = self
                .nodes
                .values()
                .filter(|node| !node.built && node.behaviour.is_ready_for_build(self, node.id))
                .map(|node| (node.id, node.behaviour.clone()))
                .collect();
            if ready.is_empty() {
                break;
            }
            for (id, behaviour) in ready {
                behaviour.build_exec_gph_and_regst(self, id, job)?;
                behaviour.lock_regsts(self, id, job)?;
                self.node_mut(id)?.built = true;
                log::debug!("Built {id}");
            }
        }
        let pending: Vec<TaskId> = self.nodes.values().filter(|node| !node.built).map(TaskNode::id).collect();
        if !pending.is_empty() {
            log::debug!("Waiting for locked registers: {pending:?}");
        }
        Ok(pending)
    }
}

fn regst_proto(regst: &RegstDesc) -> RegstDescProto {
    RegstDescProto {
        regst_desc_id: regst.regst_desc_id(),
        name: regst.name().into(),
        producer_task_id: regst.producer().0,
        min_register_num: regst.min_register_num(),
        max_register_num: regst.max_register_num(),
        blobs: regst
            .lbns()
            .map(|lbn| match regst.blob_desc(lbn).ok().flatten() {
                Some(desc) => BlobDescProto {
                    lbn: lbn.into(),
                    shape: desc.shape.iter().map(|d| *d as u64).collect(),
                    dtype: desc.dtype.to_string(),
                    has_data_id_field: desc.has_data_id_field,
                },
                None => BlobDescProto { lbn: lbn.into(), shape: Vec::new(), dtype: String::new(), has_data_id_field: false },
            })
            .collect(),
        consumer_task_ids: regst.consumers().iter().map(|id| id.0).collect(),
    }
}

/// Forward, backward, save and other tasks without a dedicated behaviour.
/// Produces the configured registers on every out edge, consumes every
/// register of its in edges under the edge's names and locks what it produces.
#[derive(Debug, Clone, Default)]
pub struct PlainCompTaskNode {
    produced: Vec<(String, i32, i32)>,
}

impl PlainCompTaskNode {
    /// Behaviour producing nothing
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also produce register name with min..=max buffers
    #[must_use]
    pub fn produce(mut self, name: &str, min: i32, max: i32) -> Self {
        self.produced.push((name.into(), min, max));
        self
    }
}

impl CompTaskNode for PlainCompTaskNode {
    fn produce_all_regsts_and_bind_edges(&self, graph: &mut TaskGraph, id: TaskId, _: &JobConfig) -> Result<(), StrataError> {
        for (name, min, max) in &self.produced {
            let regst = graph.produce_regst(id, name, *min, *max)?;
            for edge in graph.node(id)?.out_edges().to_vec() {
                graph.add_regst_to_edge(edge, name, regst.clone())?;
            }
        }
        Ok(())
    }

    fn consume_all_regsts(&self, graph: &mut TaskGraph, id: TaskId, _: &JobConfig) -> Result<(), StrataError> {
        for edge in graph.node(id)?.in_edges().to_vec() {
            let regsts: Vec<(String, RegstRef)> =
                graph.edge(edge)?.regsts().iter().map(|(name, r)| (name.clone(), r.clone())).collect();
            for (name, regst) in regsts {
                graph.consume_regst(id, &name, regst)?;
            }
        }
        Ok(())
    }

    fn is_ready_for_build(&self, _: &TaskGraph, _: TaskId) -> bool {
        true
    }

    fn build_exec_gph_and_regst(&self, _: &mut TaskGraph, _: TaskId, _: &JobConfig) -> Result<(), StrataError> {
        Ok(())
    }

    fn lock_regsts(&self, graph: &mut TaskGraph, id: TaskId, _: &JobConfig) -> Result<(), StrataError> {
        for (name, ..) in &self.produced {
            let regst = RegstRef { producer: id, name: name.clone() };
            if !graph.regst(&regst)?.is_locked() {
                graph.lock_regst(&regst)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumers_follow_edges() -> Result<(), StrataError> {
        let mut graph = TaskGraph::new();
        let src = graph.add_node(TaskType::DataLoader, Arc::new(PlainCompTaskNode::new()));
        let a = graph.add_node(TaskType::Forward, Arc::new(PlainCompTaskNode::new()));
        let b = graph.add_node(TaskType::Forward, Arc::new(PlainCompTaskNode::new()));
        let to_a = graph.add_edge(src, a)?;
        graph.add_edge(src, b)?;
        let out = graph.produce_regst(src, "out", 1, 2)?;
        graph.add_regst_to_edge(to_a, "out", out.clone())?;
        assert_eq!(graph.regst(&out)?.consumers().iter().copied().collect::<Vec<_>>(), vec![a]);
        assert!(graph.edge(to_a)?.sole_regst().is_ok());
        assert!(graph.produce_regst(src, "out", 1, 3).is_err());
        assert_eq!(graph.produce_regst(src, "out", 1, 2)?, out);
        Ok(())
    }

    #[test]
    fn binding_needs_visible_register() -> Result<(), StrataError> {
        let mut graph = TaskGraph::new();
        let a = graph.add_node(TaskType::Forward, Arc::new(PlainCompTaskNode::new()));
        let b = graph.add_node(TaskType::Forward, Arc::new(PlainCompTaskNode::new()));
        let foreign = graph.produce_regst(b, "out", 1, 1)?;
        let op = Arc::new(Operator::model_update("md_update_0", Default::default(), 0));
        let exec = graph.new_exec_node(a, op)?;
        assert!(matches!(
            graph.bind_bn_in_op_and_regst(a, exec, "model", foreign),
            Err(StrataError::RegisterBindingMismatch(_))
        ));
        Ok(())
    }
}
