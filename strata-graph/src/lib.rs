//! # strata-graph
//!
//! Static task graph of strata jobs. Task nodes produce capacity bounded
//! registers, consume registers of their neighbours through edges, build a
//! local exec graph bound to those registers and lock registers once their
//! shape is final. Locked capacities bound how many buffer instances may be
//! in flight at runtime.
//!
//! ```rust
//! use std::sync::Arc;
//! use strata_core::config::JobConfig;
//! use strata_graph::model_update::MdUpdtCompTaskNode;
//! use strata_graph::task::{PlainCompTaskNode, TaskGraph, TaskType};
//!
//! let mut graph = TaskGraph::new();
//! let md_updt = graph.add_node(TaskType::ModelUpdate, Arc::new(MdUpdtCompTaskNode::new(42)));
//! let fw = graph.add_node(TaskType::Forward, Arc::new(PlainCompTaskNode::new()));
//! graph.add_edge(md_updt, fw)?;
//! let pending = graph.build(&JobConfig::predict())?;
//! assert_eq!(pending, [md_updt]);
//! # Ok::<(), strata_core::error::StrataError>(())
//! ```
#![forbid(unsafe_code)]
#![forbid(rustdoc::broken_intra_doc_links)]
#![forbid(rustdoc::private_intra_doc_links)]
#![warn(missing_docs)]
#![forbid(rustdoc::invalid_codeblock_attributes)]
#![forbid(rustdoc::bare_urls)]

/// See [`ExecGraph`](exec::ExecGraph)
pub mod exec;
/// See [`MdUpdtCompTaskNode`](model_update::MdUpdtCompTaskNode)
pub mod model_update;
/// See [`Operator`](operator::Operator)
pub mod operator;
/// See [`TaskProto`](proto::TaskProto)
pub mod proto;
/// See [`RegstDesc`](register::RegstDesc)
pub mod register;
/// See [`TaskGraph`](task::TaskGraph)
pub mod task;
