//! Pipeline configuration.

use clap::ValueEnum;

/// What `submit` does when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OverflowPolicy {
    /// Wait for the worker to make room.
    #[default]
    Block,
    /// Fail the submit with `SubmitError::QueueFull`.
    Reject,
    /// Discard the incoming command, log it, and report success.
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueCapacity {
    #[default]
    Unbounded,
    Bounded {
        capacity: usize,
        overflow: OverflowPolicy,
    },
}

impl QueueCapacity {
    /// Maps a CLI-style capacity onto a queue shape; 0 means unbounded.
    pub fn from_limit(capacity: usize, overflow: OverflowPolicy) -> Self {
        if capacity == 0 {
            QueueCapacity::Unbounded
        } else {
            QueueCapacity::Bounded { capacity, overflow }
        }
    }
}

/// What the apply worker does with queued commands once shutdown is signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ShutdownPolicy {
    /// Apply everything already queued, then exit.
    #[default]
    Drain,
    /// Exit immediately and hand queued lines back in the shutdown report.
    Abandon,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineConfig {
    pub capacity: QueueCapacity,
    pub shutdown: ShutdownPolicy,
}

impl PipelineConfig {
    pub fn with_capacity(mut self, capacity: QueueCapacity) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn bounded(self, capacity: usize, overflow: OverflowPolicy) -> Self {
        self.with_capacity(QueueCapacity::from_limit(capacity, overflow))
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownPolicy) -> Self {
        self.shutdown = shutdown;
        self
    }
}
