//! # strata-core
//!
//! strata-core is the execution core of strata. It contains tensors,
//! operator expressions, the lazy, eager and autograd interpreters,
//! sbp signatures, shape inference, random generators and job configuration.
//!
//! Device memory is reached only through the [`KernelBackend`](backend::KernelBackend)
//! trait, see strata-cpu for the reference host backend.
#![forbid(unsafe_code)]
#![forbid(rustdoc::broken_intra_doc_links)]
#![forbid(rustdoc::private_intra_doc_links)]
#![warn(missing_docs)]
#![forbid(rustdoc::invalid_codeblock_attributes)]
#![forbid(rustdoc::bare_urls)]

/// See [`AttrMap`](attr::AttrMap)
pub mod attr;
/// Gradient tape and autograd interpreter
pub mod autograd;
/// See [`KernelBackend`](backend::KernelBackend)
pub mod backend;
mod boxing;
/// See [`JobConfig`](config::JobConfig)
pub mod config;
/// See [`Device`](device::Device) and [`Placement`](device::Placement)
pub mod device;
/// See [`DType`](dtype::DType)
pub mod dtype;
/// See [`StrataError`](error::StrataError)
pub mod error;
/// See [`HostData`](host::HostData)
pub mod host;
/// See [`InferenceRegistry`](infer::InferenceRegistry)
pub mod infer;
/// See [`OpExprInterpreter`](interpreter::OpExprInterpreter)
pub mod interpreter;
/// See [`OpExpr`](op_expr::OpExpr)
pub mod op_expr;
/// See [`Generator`](rng::Generator)
pub mod rng;
/// See [`Sbp`](sbp::Sbp)
pub mod sbp;
/// See [`Shape`](shape::Shape)
pub mod shape;
/// See [`Tensor`](tensor::Tensor)
pub mod tensor;
