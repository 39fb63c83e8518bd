//! # tempus
//!
//! A Rust-native optimistic (Time Warp) parallel discrete-event simulation
//! kernel: agents run speculatively ahead of committed time, roll back when
//! a straggler event arrives behind their local clock, and a Global Virtual
//! Time computation tells every worker when speculative state and output can
//! never be un-happened.
//!
//! ## Architecture
//!
//! - [`agent`] - the `Agent` trait, execution context, and state history
//! - [`event`] - the wire-serializable `Event<T>` and its `Color`
//! - [`queue`] - the per-worker hierarchical timing wheel scheduler
//! - [`gvt`] - Global Virtual Time via a shared-memory Mattern's algorithm
//! - [`recycler`] - NUMA-hinted event memory recycling and redistribution
//! - [`transport`] - intra-node worker queues and the cross-node transport seam
//! - [`output`] - speculative output buffering and commit-on-GVT
//! - [`worker`] - the per-thread Time Warp loop
//! - [`manager`] - configures, spawns, and joins the worker pool
//! - [`config`] - builder for a run's `SimConfig`
//! - [`error`] - the crate-wide error type
//! - [`logging`] - `tracing` span/event helpers shared by worker and manager
//! - [`util`] - spinlock, barrier, and CLI argument parsing primitives

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod gvt;
pub mod logging;
pub mod manager;
pub mod output;
pub mod queue;
pub mod recycler;
pub mod time;
pub mod transport;
pub mod util;
pub mod worker;

pub mod prelude {
    pub use crate::agent::{Agent, AgentContext, StateHistory};
    pub use crate::config::SimConfig;
    pub use crate::error::{KernelError, ModelBugKind, Result};
    pub use crate::event::{Color, Event};
    pub use crate::gvt::GvtManager;
    pub use crate::manager::{RunSummary, SimulationManager};
    pub use crate::output::{OutputAdapter, SharedOutputAdapter, Sink};
    pub use crate::time::{AgentId, TimeInfo, VTime};
    pub use crate::transport::intra::IntraVariant;
    pub use crate::transport::node::CrossNodeTransport;
    pub use crate::worker::{Worker, WorkerConfig};
    pub use bytemuck::{Pod, Zeroable};
}
