//! Schedulable units of work.
//!
//! A [`NodeKey`] is the identity of one memoized computation: a rule applied
//! to the params it uses, a file read, or a process execution.

pub mod intrinsics;
pub mod params;
pub mod task;

use std::fmt;
use std::path::Path;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::core::Context;
use crate::error::NodeResult;
use crate::externs::Value;

pub use intrinsics::{normalize_build_path, ExecuteProcess, ProcessSpec, ReadFile};
pub use params::Params;
pub use task::Task;

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    Task(Box<Task>),
    ReadFile(ReadFile),
    ExecuteProcess(Box<ExecuteProcess>),
}

impl NodeKey {
    /// The path a filesystem node reads, for path invalidation.
    pub fn fs_subject(&self) -> Option<&Path> {
        match self {
            NodeKey::ReadFile(read) => Some(&read.path),
            _ => None,
        }
    }

    pub fn task(&self) -> Option<&Task> {
        match self {
            NodeKey::Task(task) => Some(task),
            _ => None,
        }
    }

    pub(crate) fn run(self, ctx: Context) -> BoxFuture<'static, NodeResult<Value>> {
        async move {
            match self {
                NodeKey::Task(task) => task.run(ctx).await,
                NodeKey::ReadFile(read) => read.run(ctx).await,
                NodeKey::ExecuteProcess(process) => process.run(ctx).await,
            }
        }
        .boxed()
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Task(task) => write!(f, "{}", task),
            NodeKey::ReadFile(read) => write!(f, "ReadFile({})", read.path.display()),
            NodeKey::ExecuteProcess(process) => write!(f, "Process({})", process.spec.description),
        }
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
