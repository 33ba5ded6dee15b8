//! The task graph engine.
//!
//! A [`Node`] wraps a user [`Task`] together with its edges and a single
//! memoized result. Nodes are wired with [`Node::connect`], and every task
//! declares its compute parameters as an ordered list of [`Depends`]
//! descriptors. When a node runs it pulls its producers first, binds their
//! tables to the declared parameters by capability and cardinality, and only
//! then calls [`Task::compute`].
//!
//! ## Pull evaluation
//!
//! A node resolves and runs its own upstream dependencies on demand, so any
//! node can be run in isolation. Results are cached on the node, which means
//! a producer shared by several consumers (a "diamond") is computed once.
//! [`Pipeline::run`](crate::Pipeline::run) adds an explicit topological
//! schedule on top, with cycle detection, so the cache is an optimization
//! there rather than the thing keeping execution correct.

mod context;
mod depends;
mod node;
mod runner;

pub use crate::engine::context::{Scope, depth};
pub use crate::engine::depends::{Cardinality, Depends, Inputs, Source};
pub use crate::engine::node::{Capability, Node, NodeId, Task, connect};
pub use crate::engine::runner::{Diagnostics, Outputs, TaskExecution};

pub(crate) use crate::engine::context::push;
pub(crate) use crate::engine::runner::run_graph;
