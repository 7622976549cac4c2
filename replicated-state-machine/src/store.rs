//! In-memory key-value state machine.
//!
//! This module owns the application state that the apply loop mutates. There
//! are two handles onto the same map:
//!
//! - [`StateMachine`]: the single writer. `apply` takes `&mut self`, and the
//!   type is deliberately not `Clone`, so only whoever owns it (the apply
//!   worker) can change state.
//! - [`StateReader`]: any number of cloneable readers that see whatever has
//!   been applied so far.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandError};

/// What one applied command did to a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    Put { value: String },
    /// The key is tombstoned. `existed` is false when the delete was a no-op.
    Delete { existed: bool },
}

/// Observability record emitted for every successfully applied command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyEvent {
    /// Position in apply order, starting at 1.
    pub index: u64,
    pub key: String,
    pub change: Change,
}

#[derive(Default)]
struct Shared {
    data: RwLock<HashMap<String, String>>,
    applied_index: AtomicU64,
}

/// The single writer over the key-value map.
///
/// # Why RwLock?
///
/// Reads happen from arbitrary threads while the worker applies. The worker
/// takes the write half only for the single insert or remove, so readers
/// never wait behind a whole apply step and never wait behind each other.
#[derive(Default)]
pub struct StateMachine {
    shared: Arc<Shared>,
    next_index: u64,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            next_index: 1,
        }
    }

    /// Returns a read-only handle onto this state machine's map.
    pub fn reader(&self) -> StateReader {
        StateReader {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Applies a parsed command and returns the resulting event.
    ///
    /// - `Put` inserts or overwrites. Re-applying the same value is harmless.
    /// - `Delete` removes the key if present; deleting an absent key is a
    ///   no-op, reported through `Change::Delete { existed: false }`.
    pub fn apply(&mut self, command: &Command) -> ApplyEvent {
        let index = self.advance();
        let event = match command {
            Command::Put { key, value } => {
                self.shared.data.write().insert(key.clone(), value.clone());
                ApplyEvent {
                    index,
                    key: key.clone(),
                    change: Change::Put {
                        value: value.clone(),
                    },
                }
            }
            Command::Delete { key } => {
                let existed = self.shared.data.write().remove(key).is_some();
                ApplyEvent {
                    index,
                    key: key.clone(),
                    change: Change::Delete { existed },
                }
            }
        };
        self.publish(index);
        event
    }

    /// Parses `line` and applies it.
    ///
    /// A line that fails to parse still consumes an apply index (it was
    /// dequeued and processed), but leaves the map untouched.
    pub fn apply_line(&mut self, line: &str) -> Result<ApplyEvent, CommandError> {
        match Command::parse(line) {
            Ok(command) => Ok(self.apply(&command)),
            Err(err) => {
                let index = self.advance();
                self.publish(index);
                Err(err)
            }
        }
    }

    /// Index of the last command this state machine processed, or 0.
    pub fn applied_index(&self) -> u64 {
        self.next_index.saturating_sub(1)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.shared.data.read().get(key).cloned()
    }

    fn advance(&mut self) -> u64 {
        let index = self.next_index.max(1);
        self.next_index = index + 1;
        index
    }

    fn publish(&self, index: u64) {
        self.shared.applied_index.store(index, Ordering::Release);
    }
}

/// Cloneable read handle. Safe to use from any thread while the worker applies.
#[derive(Clone)]
pub struct StateReader {
    shared: Arc<Shared>,
}

impl StateReader {
    /// Retrieves the current value for a key, or `None` if it is absent.
    pub fn get(&self, key: &str) -> Option<String> {
        self.shared.data.read().get(key).cloned()
    }

    /// Returns a sorted copy of every key-value pair.
    ///
    /// Clones under the read lock so the caller can iterate without holding it.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.shared
            .data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.data.read().is_empty()
    }

    /// Index of the last command processed by the writer, or 0.
    pub fn applied_index(&self) -> u64 {
        self.shared.applied_index.load(Ordering::Acquire)
    }
}
