//! The command queue between proposers and the apply worker.
//!
//! Producers hold a cloneable [`Proposer`]; the worker holds the single
//! [`Inbox`]. Both sides sit on one crossbeam channel, so enqueue order is
//! apply order.
//!
//! On shutdown the worker closes the queue before its final sweep. Every send
//! happens under the read half of the `closed` gate and closing takes the
//! write half, so once [`Inbox::close`] returns nothing new can land and every
//! accepted entry is already in the channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{
    Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError, bounded, unbounded,
};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

use crate::command::{Command, CommandError};
use crate::config::{OverflowPolicy, QueueCapacity};
use crate::store::ApplyEvent;

/// Why a proposal did not make it to (or through) the apply worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("command queue is closed")]
    Closed,

    #[error("command queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("apply worker stopped before reaching the command")]
    Aborted,

    #[error("command rejected: {0}")]
    Rejected(#[from] CommandError),
}

pub(crate) type ApplyReply = Result<ApplyEvent, CommandError>;

/// One entry in the queue.
pub(crate) enum Proposal {
    Command {
        line: String,
        ack: Option<Sender<ApplyReply>>,
    },
    /// Replies with the apply index once every earlier entry has been processed.
    Barrier { ack: Sender<u64> },
}

impl Proposal {
    /// The raw line, if this entry carries one.
    pub(crate) fn into_line(self) -> Option<String> {
        match self {
            Proposal::Command { line, .. } => Some(line),
            Proposal::Barrier { .. } => None,
        }
    }
}

/// Creates the queue with the requested capacity.
pub(crate) fn command_queue(capacity: QueueCapacity) -> (Proposer, Inbox) {
    let (tx, rx, overflow) = match capacity {
        // Unbounded channels never report Full, so Block is just a plain send.
        QueueCapacity::Unbounded => {
            let (tx, rx) = unbounded();
            (tx, rx, OverflowPolicy::Block)
        }
        QueueCapacity::Bounded { capacity, overflow } => {
            let (tx, rx) = bounded(capacity.max(1));
            (tx, rx, overflow)
        }
    };
    let closed = Arc::new(RwLock::new(false));
    let proposer = Proposer {
        tx,
        overflow,
        dropped: Arc::new(AtomicU64::new(0)),
        closed: Arc::clone(&closed),
    };
    (proposer, Inbox { rx, closed })
}

/// How long a blocked send holds the gate before letting a pending close in.
const BLOCK_RECHECK: Duration = Duration::from_millis(10);

/// Producer half of the queue. Clone it freely across threads.
///
/// `submit` is fire-and-forget: success means the line is queued, not that it
/// parsed or applied. Use [`Proposer::submit_and_wait`] or [`Proposer::sync`]
/// when the caller needs to know.
#[derive(Clone)]
pub struct Proposer {
    tx: Sender<Proposal>,
    overflow: OverflowPolicy,
    dropped: Arc<AtomicU64>,
    closed: Arc<RwLock<bool>>,
}

impl Proposer {
    /// Enqueues a raw command line.
    ///
    /// The line is not parsed here; malformed lines are rejected by the
    /// worker when it reaches them.
    pub fn submit(&self, line: impl Into<String>) -> Result<(), SubmitError> {
        self.enqueue(Proposal::Command {
            line: line.into(),
            ack: None,
        })
    }

    pub fn submit_command(&self, command: &Command) -> Result<(), SubmitError> {
        self.submit(command.to_string())
    }

    /// Enqueues a line and blocks until the worker has applied or rejected it.
    pub fn submit_and_wait(&self, line: impl Into<String>) -> Result<ApplyEvent, SubmitError> {
        let (ack_tx, ack_rx) = bounded(1);
        self.enqueue(Proposal::Command {
            line: line.into(),
            ack: Some(ack_tx),
        })?;
        match ack_rx.recv() {
            Ok(reply) => reply.map_err(SubmitError::Rejected),
            Err(_) => Err(SubmitError::Aborted),
        }
    }

    /// Blocks until everything this proposer queued so far has been processed.
    ///
    /// Returns the apply index at the barrier.
    pub fn sync(&self) -> Result<u64, SubmitError> {
        let (ack_tx, ack_rx) = bounded(1);
        self.enqueue(Proposal::Barrier { ack: ack_tx })?;
        ack_rx.recv().map_err(|_| SubmitError::Aborted)
    }

    /// Number of commands discarded under [`OverflowPolicy::Drop`].
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of entries currently waiting in the queue.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    fn enqueue(&self, mut proposal: Proposal) -> Result<(), SubmitError> {
        loop {
            let closed = self.closed.read();
            if *closed {
                return Err(SubmitError::Closed);
            }
            if self.overflow != OverflowPolicy::Block {
                return self.try_enqueue(proposal);
            }
            // A full queue releases the gate between attempts so shutdown can
            // close it.
            match self.tx.send_timeout(proposal, BLOCK_RECHECK) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Disconnected(_)) => return Err(SubmitError::Closed),
                Err(SendTimeoutError::Timeout(returned)) => proposal = returned,
            }
        }
    }

    fn try_enqueue(&self, proposal: Proposal) -> Result<(), SubmitError> {
        match self.tx.try_send(proposal) {
            Ok(()) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::Closed),
            Err(TrySendError::Full(proposal)) => {
                let capacity = self.tx.capacity().unwrap_or_default();
                let Some(line) = proposal.into_line() else {
                    // A dropped barrier could never be answered.
                    return Err(SubmitError::QueueFull { capacity });
                };
                if self.overflow == OverflowPolicy::Reject {
                    return Err(SubmitError::QueueFull { capacity });
                }
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(capacity, total, line = %line, "queue full, dropping command");
                Ok(())
            }
        }
    }
}

/// What the worker woke up to.
pub(crate) enum Next {
    Proposal(Proposal),
    Shutdown,
    /// Every proposer is gone; nothing more can arrive.
    Closed,
}

/// Consumer half of the queue, owned by the apply worker.
pub(crate) struct Inbox {
    rx: Receiver<Proposal>,
    closed: Arc<RwLock<bool>>,
}

impl Inbox {
    /// Blocks until an entry is available or `token` fires.
    pub(crate) fn next_or_shutdown(&self, token: &ShutdownToken) -> Next {
        crossbeam_channel::select! {
            recv(self.rx) -> msg => match msg {
                Ok(proposal) => Next::Proposal(proposal),
                Err(_) => Next::Closed,
            },
            recv(token.rx) -> _ => Next::Shutdown,
        }
    }

    /// Stops accepting submissions. Returns once no send is in flight, so
    /// the entries left in the channel are final.
    pub(crate) fn close(&self) {
        *self.closed.write() = true;
    }

    /// Takes every entry left after [`Inbox::close`].
    pub(crate) fn take_remaining(&self) -> Vec<Proposal> {
        self.rx.try_iter().collect()
    }
}

/// Cancellation token checked by the worker at its blocking wait.
///
/// Nothing is ever sent on the channel: the token fires when the paired
/// [`ShutdownTrigger`] is dropped and the channel disconnects.
pub(crate) struct ShutdownToken {
    rx: Receiver<()>,
}

impl ShutdownToken {
    pub(crate) fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

pub(crate) struct ShutdownTrigger {
    _tx: Sender<()>,
}

impl ShutdownTrigger {
    /// Fires the paired token. Dropping the trigger has the same effect.
    pub(crate) fn trigger(self) {
        drop(self._tx);
    }
}

pub(crate) fn shutdown_channel() -> (ShutdownTrigger, ShutdownToken) {
    let (tx, rx) = bounded(0);
    (ShutdownTrigger { _tx: tx }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn line_of(proposal: Option<Proposal>) -> Option<String> {
        proposal.and_then(Proposal::into_line)
    }

    impl Inbox {
        fn next(&self) -> Option<Proposal> {
            self.rx.recv().ok()
        }

        fn try_next(&self) -> Option<Proposal> {
            self.rx.try_recv().ok()
        }

        fn len(&self) -> usize {
            self.rx.len()
        }
    }

    #[test]
    fn preserves_fifo_order() {
        let (proposer, inbox) = command_queue(QueueCapacity::Unbounded);
        for i in 0..5 {
            proposer.submit(format!("PUT k {i}")).unwrap();
        }
        for i in 0..5 {
            assert_eq!(line_of(inbox.next()), Some(format!("PUT k {i}")));
        }
        assert!(inbox.try_next().is_none());
    }

    #[test]
    fn next_blocks_until_a_command_arrives() {
        let (proposer, inbox) = command_queue(QueueCapacity::Unbounded);
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            proposer.submit("PUT late 1").unwrap();
        });
        assert_eq!(line_of(inbox.next()), Some("PUT late 1".to_string()));
        producer.join().unwrap();
    }

    #[test]
    fn next_returns_none_once_proposers_are_gone() {
        let (proposer, inbox) = command_queue(QueueCapacity::Unbounded);
        drop(proposer);
        assert!(inbox.next().is_none());
    }

    #[test]
    fn submit_fails_once_inbox_is_gone() {
        let (proposer, inbox) = command_queue(QueueCapacity::Unbounded);
        drop(inbox);
        assert_eq!(proposer.submit("PUT a 1"), Err(SubmitError::Closed));
    }

    #[test]
    fn reject_policy_reports_full_queue() {
        let (proposer, inbox) = command_queue(QueueCapacity::Bounded {
            capacity: 2,
            overflow: OverflowPolicy::Reject,
        });
        proposer.submit("PUT a 1").unwrap();
        proposer.submit("PUT b 2").unwrap();
        assert_eq!(
            proposer.submit("PUT c 3"),
            Err(SubmitError::QueueFull { capacity: 2 })
        );
        assert_eq!(inbox.len(), 2);
        assert_eq!(proposer.dropped(), 0);
    }

    #[test]
    fn drop_policy_discards_and_counts() {
        let (proposer, inbox) = command_queue(QueueCapacity::Bounded {
            capacity: 1,
            overflow: OverflowPolicy::Drop,
        });
        proposer.submit("PUT a 1").unwrap();
        assert_eq!(proposer.submit("PUT b 2"), Ok(()));
        assert_eq!(proposer.submit("PUT c 3"), Ok(()));
        assert_eq!(proposer.dropped(), 2);

        assert_eq!(line_of(inbox.try_next()), Some("PUT a 1".to_string()));
        assert!(inbox.try_next().is_none());
    }

    #[test]
    fn block_policy_waits_for_room() {
        let (proposer, inbox) = command_queue(QueueCapacity::Bounded {
            capacity: 1,
            overflow: OverflowPolicy::Block,
        });
        proposer.submit("PUT a 1").unwrap();

        let blocked = proposer.clone();
        let producer = thread::spawn(move || blocked.submit("PUT b 2"));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(line_of(inbox.next()), Some("PUT a 1".to_string()));
        assert_eq!(producer.join().unwrap(), Ok(()));
        assert_eq!(line_of(inbox.next()), Some("PUT b 2".to_string()));
    }

    #[test]
    fn shutdown_token_wakes_a_waiting_consumer() {
        let (_proposer, inbox) = command_queue(QueueCapacity::Unbounded);
        let (trigger, token) = shutdown_channel();
        assert!(!token.is_triggered());

        let waiter = thread::spawn(move || {
            matches!(inbox.next_or_shutdown(&token), Next::Shutdown)
        });
        thread::sleep(Duration::from_millis(50));
        trigger.trigger();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn submit_and_wait_reports_abort_when_reply_is_dropped() {
        let (proposer, inbox) = command_queue(QueueCapacity::Unbounded);
        let consumer = thread::spawn(move || {
            // Dequeue and discard without replying.
            let _ = inbox.next();
        });
        assert_eq!(proposer.submit_and_wait("PUT a 1"), Err(SubmitError::Aborted));
        consumer.join().unwrap();
    }

    #[test]
    fn close_rejects_new_submits_and_keeps_accepted_ones() {
        let (proposer, inbox) = command_queue(QueueCapacity::Unbounded);
        proposer.submit("PUT a 1").unwrap();
        proposer.submit("PUT b 2").unwrap();

        inbox.close();
        assert_eq!(proposer.submit("PUT c 3"), Err(SubmitError::Closed));
        assert_eq!(proposer.sync(), Err(SubmitError::Closed));

        let remaining: Vec<_> = inbox
            .take_remaining()
            .into_iter()
            .filter_map(Proposal::into_line)
            .collect();
        assert_eq!(remaining, vec!["PUT a 1".to_string(), "PUT b 2".to_string()]);
    }

    #[test]
    fn close_releases_a_submit_blocked_on_a_full_queue() {
        let (proposer, inbox) = command_queue(QueueCapacity::Bounded {
            capacity: 1,
            overflow: OverflowPolicy::Block,
        });
        proposer.submit("PUT a 1").unwrap();

        let blocked = proposer.clone();
        let producer = thread::spawn(move || blocked.submit("PUT b 2"));
        thread::sleep(Duration::from_millis(50));

        inbox.close();
        assert_eq!(producer.join().unwrap(), Err(SubmitError::Closed));
        assert_eq!(inbox.take_remaining().len(), 1);
    }

    #[test]
    fn drop_policy_refuses_barriers_instead_of_counting_them() {
        let (proposer, inbox) = command_queue(QueueCapacity::Bounded {
            capacity: 1,
            overflow: OverflowPolicy::Drop,
        });
        proposer.submit("PUT a 1").unwrap();

        assert_eq!(proposer.sync(), Err(SubmitError::QueueFull { capacity: 1 }));
        assert_eq!(proposer.dropped(), 0);
        assert_eq!(inbox.len(), 1);
    }
}
