//! Apply worker and the pipeline handle that owns it.
//!
//! This module wires the pieces together:
//!
//! - **Apply worker thread**: the only consumer of the command queue and the
//!   only owner of the [`StateMachine`]. It applies one command at a time.
//! - **Pipeline handle**: what the caller keeps. It hands out proposers and
//!   readers and owns the shutdown trigger.
//!
//! The worker blocks on the queue and the shutdown token at the same time
//! (`crossbeam_channel::select!`), so an idle worker stops as soon as shutdown
//! is requested.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::command::Command;
use crate::config::{PipelineConfig, ShutdownPolicy};
use crate::queue::{
    Inbox, Next, Proposal, Proposer, ShutdownToken, ShutdownTrigger, SubmitError,
    command_queue, shutdown_channel,
};
use crate::store::{ApplyEvent, StateMachine, StateReader};

/// Fatal conditions surfaced to whoever constructs or stops the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to spawn apply worker")]
    Spawn(#[source] std::io::Error),

    #[error("apply worker panicked")]
    WorkerPanicked,
}

/// Outcome of [`Pipeline::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Index of the last command the worker processed.
    pub applied_index: u64,
    /// Lines still queued when the worker stopped, in queue order.
    ///
    /// Always empty after a drain. Feeding these into a fresh pipeline resumes
    /// where this one stopped.
    pub abandoned: Vec<String>,
}

/// A running command queue plus its apply worker.
///
/// Dropping the pipeline without calling [`Pipeline::shutdown`] still signals
/// the worker; it follows the configured [`ShutdownPolicy`] and exits on its
/// own.
pub struct Pipeline {
    proposer: Proposer,
    reader: StateReader,
    trigger: ShutdownTrigger,
    worker: JoinHandle<Vec<String>>,
}

/// Starts the apply worker and returns a handle plus the apply-event stream.
///
/// Events are also logged, so the receiver can be dropped if nobody needs
/// them. The event channel is unbounded: a receiver that is kept but never
/// read holds every event for the life of the pipeline. Drop it instead.
///
/// # Errors
///
/// Returns [`PipelineError::Spawn`] if the worker thread cannot be created.
/// Nothing is left running in that case.
pub fn spawn_pipeline(
    config: PipelineConfig,
) -> Result<(Pipeline, Receiver<ApplyEvent>), PipelineError> {
    let (proposer, inbox) = command_queue(config.capacity);
    let (trigger, token) = shutdown_channel();
    let (event_tx, event_rx) = unbounded();

    let state = StateMachine::new();
    let reader = state.reader();

    let worker = Worker {
        state,
        inbox,
        token,
        policy: config.shutdown,
        event_tx,
    };
    let worker = thread::Builder::new()
        .name("apply-worker".to_string())
        .spawn(move || worker.run())
        .map_err(PipelineError::Spawn)?;

    info!(capacity = ?config.capacity, shutdown = ?config.shutdown, "pipeline started");

    Ok((
        Pipeline {
            proposer,
            reader,
            trigger,
            worker,
        },
        event_rx,
    ))
}

impl Pipeline {
    /// A new producer handle onto the queue.
    pub fn proposer(&self) -> Proposer {
        self.proposer.clone()
    }

    /// A new read handle onto the state.
    pub fn reader(&self) -> StateReader {
        self.reader.clone()
    }

    pub fn submit(&self, line: impl Into<String>) -> Result<(), SubmitError> {
        self.proposer.submit(line)
    }

    pub fn submit_command(&self, command: &Command) -> Result<(), SubmitError> {
        self.proposer.submit_command(command)
    }

    pub fn submit_and_wait(&self, line: impl Into<String>) -> Result<ApplyEvent, SubmitError> {
        self.proposer.submit_and_wait(line)
    }

    pub fn sync(&self) -> Result<u64, SubmitError> {
        self.proposer.sync()
    }

    /// Local read of whatever has been applied so far.
    pub fn get(&self, key: &str) -> Option<String> {
        self.reader.get(key)
    }

    pub fn applied_index(&self) -> u64 {
        self.reader.applied_index()
    }

    /// Signals the worker, waits for it to exit, and reports what was left.
    pub fn shutdown(self) -> Result<ShutdownReport, PipelineError> {
        let Pipeline {
            reader,
            trigger,
            worker,
            ..
        } = self;

        trigger.trigger();
        let abandoned = worker.join().map_err(|_| PipelineError::WorkerPanicked)?;

        let report = ShutdownReport {
            applied_index: reader.applied_index(),
            abandoned,
        };
        info!(
            applied_index = report.applied_index,
            abandoned = report.abandoned.len(),
            "pipeline stopped"
        );
        Ok(report)
    }
}

/// The single consumer of the command queue.
///
/// Owns the [`StateMachine`], so no other thread can mutate state. Every
/// command is applied synchronously before the next one is dequeued.
struct Worker {
    state: StateMachine,
    inbox: Inbox,
    token: ShutdownToken,
    policy: ShutdownPolicy,
    event_tx: Sender<ApplyEvent>,
}

impl Worker {
    /// Runs until shutdown or until every proposer is gone.
    ///
    /// Returns the lines that were still queued and not applied.
    fn run(mut self) -> Vec<String> {
        let span = info_span!("apply_loop");
        let _enter = span.enter();
        debug!("apply worker waiting for commands");

        loop {
            match self.inbox.next_or_shutdown(&self.token) {
                Next::Proposal(proposal) => {
                    // select! picks at random when both are ready; under
                    // Abandon a shutdown already raised wins.
                    if self.policy == ShutdownPolicy::Abandon && self.token.is_triggered() {
                        return self.finish(Some(proposal));
                    }
                    self.handle(proposal);
                }
                Next::Shutdown => return self.finish(None),
                Next::Closed => {
                    info!(
                        applied_index = self.state.applied_index(),
                        "all proposers gone, apply worker exiting"
                    );
                    return Vec::new();
                }
            }
        }
    }

    /// Closes the queue, then applies or hands back everything it accepted.
    ///
    /// Once closed, the queue holds a fixed set of entries, so this finishes
    /// even while proposers keep calling `submit`.
    fn finish(&mut self, first: Option<Proposal>) -> Vec<String> {
        self.inbox.close();
        let remaining: Vec<Proposal> = first
            .into_iter()
            .chain(self.inbox.take_remaining())
            .collect();

        match self.policy {
            ShutdownPolicy::Drain => {
                let drained = remaining.len();
                for proposal in remaining {
                    self.handle(proposal);
                }
                info!(
                    drained,
                    applied_index = self.state.applied_index(),
                    "drained queue before shutdown"
                );
                Vec::new()
            }
            ShutdownPolicy::Abandon => {
                let abandoned: Vec<String> = remaining
                    .into_iter()
                    .filter_map(Proposal::into_line)
                    .collect();
                if !abandoned.is_empty() {
                    warn!(
                        count = abandoned.len(),
                        applied_index = self.state.applied_index(),
                        "leaving queued commands unapplied"
                    );
                }
                abandoned
            }
        }
    }

    /// Applies one queue entry and answers whoever is waiting on it.
    ///
    /// Rejected lines are logged and skipped; they never stop the loop.
    fn handle(&mut self, proposal: Proposal) {
        match proposal {
            Proposal::Command { line, ack } => {
                let reply = self.state.apply_line(&line);
                match &reply {
                    Ok(event) => {
                        info!(index = event.index, key = %event.key, change = ?event.change, "apply");
                        let _ = self.event_tx.send(event.clone());
                    }
                    Err(err) => warn!(
                        index = self.state.applied_index(),
                        line = %line.trim(),
                        error = %err,
                        "rejected command"
                    ),
                }
                if let Some(ack) = ack {
                    let _ = ack.send(reply);
                }
            }
            Proposal::Barrier { ack } => {
                let _ = ack.send(self.state.applied_index());
            }
        }
    }
}
