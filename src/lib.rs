#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod catalog;
mod engine;
mod error;
pub mod nodes;
mod pipeline;
mod schema;
mod table;
mod utils;

pub use crate::engine::{
    Capability, Cardinality, Depends, Diagnostics, Inputs, Node, NodeId, Outputs, Scope, Source,
    Task, TaskExecution, connect,
};
pub use crate::error::*;
pub use crate::pipeline::Pipeline;
pub use crate::schema::{Field, Schema};
pub use crate::table::{Category, Column, DType, Table, Value};

#[cfg(feature = "logging")]
pub use crate::utils::init_logging;

/// Number of pipelines entered on the current thread.
pub fn scope_depth() -> usize {
    engine::depth()
}
