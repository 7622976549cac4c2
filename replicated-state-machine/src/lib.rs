//! Single-process replicated state machine front-end.
//!
//! This crate implements the local half of a replicated state machine: the
//! part a consensus layer would call into once it has decided on an order.
//! Proposers push command lines into one queue; exactly one worker thread
//! pulls them out in FIFO order and applies each to an in-memory key-value
//! map. Readers look at the map directly while the worker runs.
//!
//! # Architecture
//!
//! - **Proposer threads**: any number, each holding a cloned [`queue::Proposer`]
//! - **Apply worker thread**: the only consumer of the queue and the only
//!   writer of the state
//! - **Readers**: any thread holding a [`store::StateReader`]
//!
//! The worker owns the [`store::StateMachine`] outright, so writes are
//! serialized by construction rather than by a lock around `apply`. Readers
//! only take the read half of an `RwLock`.
//!
//! # Modules
//!
//! - [`command`]: command grammar and parse errors
//! - [`store`]: the state machine and its read handle
//! - [`queue`]: the proposer/consumer channel and overflow policies
//! - [`runtime`]: apply worker, pipeline handle, shutdown
//! - [`config`]: queue capacity and shutdown policy
//! - [`protocol`]: console command parsing for the `rsm` binary
//! - [`cli`]: command-line flags for the `rsm` binary

pub mod cli;
pub mod command;
pub mod config;
pub mod protocol;
pub mod queue;
pub mod runtime;
pub mod store;

pub use command::{Command, CommandError};
pub use config::{OverflowPolicy, PipelineConfig, QueueCapacity, ShutdownPolicy};
pub use queue::{Proposer, SubmitError};
pub use runtime::{Pipeline, PipelineError, ShutdownReport, spawn_pipeline};
pub use store::{ApplyEvent, Change, StateMachine, StateReader};
