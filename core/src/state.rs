//! Run state
//!
//! Tracks whether the session and each of its threads are running or suspended, as told
//! by the events coming from the VM. Every suspension stamps the thread with a new epoch
//! so nodes fetched before it can be recognised as stale.

use std::collections::BTreeMap;

use crate::command::ThreadId;
use crate::error::{PdaError, Result};
use crate::events::Event;

/// Lifetime of a debug session
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Open,
    Suspended,
    Running,
    Terminated,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadState {
    Suspended,
    Running,
}

#[derive(Clone, Copy, Debug)]
struct ThreadRecord {
    state: ThreadState,
    epoch: u64,
}

#[derive(Debug)]
pub struct RunStates {
    session: SessionState,
    threads: BTreeMap<ThreadId, ThreadRecord>,
    last_epoch: u64,
}

impl RunStates {
    pub fn new() -> Self {
        RunStates {
            session: SessionState::Connecting,
            threads: BTreeMap::new(),
            last_epoch: 0,
        }
    }

    /// The transport is up
    pub fn open(&mut self) {
        if self.session == SessionState::Connecting {
            self.session = SessionState::Open;
        }
    }

    pub fn terminate(&mut self) {
        self.session = SessionState::Terminated;
        self.threads.clear();
    }

    pub fn session(&self) -> SessionState {
        self.session
    }

    pub fn thread_state(&self, thread: ThreadId) -> Option<ThreadState> {
        self.threads.get(&thread).map(|r| r.state)
    }

    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.threads.keys().copied().collect()
    }

    /// Update the states from an event, only run-control events change anything
    pub fn apply(&mut self, event: &Event) {
        if self.session == SessionState::Terminated {
            return;
        }

        match event {
            Event::Started { thread } | Event::Suspended { thread, .. } => {
                let epoch = self.next_epoch();
                self.threads.insert(
                    *thread,
                    ThreadRecord {
                        state: ThreadState::Suspended,
                        epoch,
                    },
                );
            }
            Event::Resumed { thread, .. } => {
                let epoch = self.next_epoch();
                let record = self.threads.entry(*thread).or_insert(ThreadRecord {
                    state: ThreadState::Running,
                    epoch,
                });
                record.state = ThreadState::Running;
            }
            Event::Exited { thread } => {
                self.threads.remove(thread);
            }
            Event::Terminated => {
                self.terminate();
                return;
            }
            Event::Output { .. } => return,
        }

        self.session = if self
            .threads
            .values()
            .any(|r| r.state == ThreadState::Running)
        {
            SessionState::Running
        } else if self.threads.is_empty() {
            SessionState::Open
        } else {
            SessionState::Suspended
        };
    }

    /// Check a thread can be queried, returning its current suspend epoch.
    ///
    /// When `epoch` is given it must match the thread's current epoch, otherwise the caller
    /// is holding something from before the thread last stopped.
    pub fn require_suspended(&self, thread: ThreadId, epoch: Option<u64>) -> Result<u64> {
        if self.session == SessionState::Terminated {
            return Err(PdaError::InvalidState(
                "the debug session has terminated".to_string(),
            ));
        }

        let record = match self.threads.get(&thread) {
            Some(r) => r,
            None => {
                return Err(PdaError::InvalidState(format!(
                    "thread {} is unknown or has exited",
                    thread
                )))
            }
        };

        if record.state != ThreadState::Suspended {
            return Err(PdaError::InvalidState(format!(
                "thread {} is not suspended",
                thread
            )));
        }

        match epoch {
            Some(e) if e != record.epoch => Err(PdaError::InvalidState(format!(
                "stale data for thread {}, it has run since this was fetched",
                thread
            ))),
            _ => Ok(record.epoch),
        }
    }

    fn next_epoch(&mut self) -> u64 {
        self.last_epoch += 1;
        self.last_epoch
    }
}

impl Default for RunStates {
    fn default() -> Self {
        RunStates::new()
    }
}
