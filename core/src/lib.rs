//! PDA Core
//!
//! Protocol engine for debugging programs running in the PDA virtual machine. Opens a
//! connection to the VM, sends commands and matches up their replies, hands run-control
//! events to listeners and exposes the program state as a tree of debug model nodes.

#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate lazy_static;

pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod model;
pub mod state;
pub mod util;

#[cfg(test)]
mod test_utils;

pub use crate::command::{Command, FrameData, Payload, ThreadId};
pub use crate::config::Config;
pub use crate::connection::Connection;
pub use crate::error::{PdaError, Result};
pub use crate::events::{ChannelListener, Event, EventListener, ListenerId, ResumeReason, StopReason};
pub use crate::model::{DebugTarget, ReferenceType, StackFrame, Thread, Value, Variable};
pub use crate::state::{SessionState, ThreadState};
