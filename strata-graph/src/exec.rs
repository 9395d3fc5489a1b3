//! Local operator sub graph of a task node.

use crate::operator::Operator;
use crate::register::RegstRef;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Operator with its blob names bound to registers
#[derive(Debug, Clone)]
pub struct ExecNode {
    op: Arc<Operator>,
    bn_in_op2regst: BTreeMap<String, RegstRef>,
}

impl ExecNode {
    /// Node without bindings
    #[must_use]
    pub fn new(op: Arc<Operator>) -> Self {
        Self { op, bn_in_op2regst: BTreeMap::new() }
    }

    /// Wrapped operator
    #[must_use]
    pub const fn op(&self) -> &Arc<Operator> {
        &self.op
    }

    /// Register bound to blob name
    #[must_use]
    pub fn regst4bn(&self, bn: &str) -> Option<&RegstRef> {
        self.bn_in_op2regst.get(bn)
    }

    /// Every binding, ordered by blob name
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &RegstRef)> {
        self.bn_in_op2regst.iter().map(|(bn, regst)| (bn.as_str(), regst))
    }

    pub(crate) fn bind(&mut self, bn: &str, regst: RegstRef) {
        self.bn_in_op2regst.insert(bn.into(), regst);
    }
}

/// Exec nodes of one task, in creation order
#[derive(Debug, Clone, Default)]
pub struct ExecGraph {
    nodes: Vec<ExecNode>,
}

impl ExecGraph {
    /// Adds node wrapping op, returns its index
    pub fn new_node(&mut self, op: Arc<Operator>) -> usize {
        self.nodes.push(ExecNode::new(op));
        self.nodes.len() - 1
    }

    /// Nodes in creation order
    #[must_use]
    pub fn nodes(&self) -> &[ExecNode] {
        &self.nodes
    }

    /// Node at index
    #[must_use]
    pub fn node(&self, idx: usize) -> Option<&ExecNode> {
        self.nodes.get(idx)
    }

    pub(crate) fn node_mut(&mut self, idx: usize) -> Option<&mut ExecNode> {
        self.nodes.get_mut(idx)
    }

    /// Number of nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Has no nodes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
