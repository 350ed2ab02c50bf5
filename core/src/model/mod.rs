//! Debug model
//!
//! The tree of target, threads, stack frames, variables and values a front end walks to
//! show the state of a suspended PDA program.
//!
//! Nothing is cached: every traversal is a fresh round trip to the VM and returns freshly
//! built nodes. Frames, variables and values remember the suspension they were fetched in
//! and refuse to query the VM once their thread has run again. Errors from the VM or the
//! connection are returned to the caller as they are, nothing is retried.

mod frame;
mod target;
mod thread;
mod value;
mod variable;

pub use self::frame::StackFrame;
pub use self::target::DebugTarget;
pub use self::thread::Thread;
pub use self::value::{ReferenceType, Value};
pub use self::variable::Variable;

use crate::command::{Command, ThreadId};
use crate::connection::Connection;
use crate::error::{PdaError, Result};

/// Everything needed to query a frame from one particular suspension
#[derive(Clone, Debug)]
pub(crate) struct FrameContext {
    connection: Connection,
    thread: ThreadId,
    frame: usize,
    epoch: u64,
}

impl FrameContext {
    fn new(connection: Connection, thread: ThreadId, frame: usize, epoch: u64) -> Self {
        FrameContext {
            connection,
            thread,
            frame,
            epoch,
        }
    }

    /// Fail with `InvalidState` unless the thread is still in the same suspension
    fn check(&self) -> Result<()> {
        self.connection
            .require_suspended(self.thread, Some(self.epoch))
            .map(|_| ())
    }

    /// Fetch the children of `path`, or of the frame itself, as variables
    async fn children(&self, path: Option<&str>) -> Result<Vec<Variable>> {
        self.check()?;

        let fields = self
            .connection
            .send(Command::Children {
                thread: self.thread,
                frame: self.frame,
                path: path.map(|p| p.to_string()),
            })
            .await?
            .into_strings()?;
        self.check()?;

        into_pairs(fields)
            .into_iter()
            .map(|(path, value)| Ok(Variable::new(self.clone(), path, value)))
            .collect()
    }

    /// Fetch the current text of a variable
    async fn fetch(&self, path: &str) -> Result<Variable> {
        self.check()?;

        let value = self
            .connection
            .send(Command::Var {
                thread: self.thread,
                frame: self.frame,
                name: path.to_string(),
            })
            .await?
            .into_text()?;
        self.check()?;

        Ok(Variable::new(self.clone(), path.to_string(), value))
    }
}

fn into_pairs(fields: Vec<String>) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(fields.len() / 2);
    let mut fields = fields.into_iter();
    while let (Some(name), Some(value)) = (fields.next(), fields.next()) {
        pairs.push((name, value));
    }
    pairs
}

fn require_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(PdaError::InvalidArgument(format!(
            "{} must be a single word, got '{}'",
            what, name
        )));
    }
    Ok(())
}
