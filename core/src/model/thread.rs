use super::{StackFrame, Value};
use crate::command::{Command, ThreadId};
use crate::connection::Connection;
use crate::error::Result;
use crate::state::ThreadState;

/// A thread of the PDA program
#[derive(Clone, Debug)]
pub struct Thread {
    connection: Connection,
    id: ThreadId,
}

impl Thread {
    pub fn new(connection: Connection, id: ThreadId) -> Self {
        Thread { connection, id }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Run state as last reported by the VM, `None` once the thread has exited
    pub fn state(&self) -> Option<ThreadState> {
        self.connection.thread_state(self.id)
    }

    pub fn is_suspended(&self) -> bool {
        self.state() == Some(ThreadState::Suspended)
    }

    /// The stack, top frame first
    pub async fn stack_frames(&self) -> Result<Vec<StackFrame>> {
        let epoch = self.connection.require_suspended(self.id, None)?;

        let frames = self
            .connection
            .send(Command::Stack(self.id))
            .await?
            .into_frames()?;

        // The thread may have run while we waited
        self.connection.require_suspended(self.id, Some(epoch))?;

        let mut frames: Vec<StackFrame> = frames
            .into_iter()
            .enumerate()
            .map(|(index, data)| {
                StackFrame::new(self.connection.clone(), self.id, index, epoch, data)
            })
            .collect();
        frames.reverse();

        Ok(frames)
    }

    pub async fn top_frame(&self) -> Result<Option<StackFrame>> {
        Ok(self.stack_frames().await?.into_iter().next())
    }

    pub async fn stack_depth(&self) -> Result<i64> {
        self.connection.require_suspended(self.id, None)?;
        self.connection
            .send(Command::StackDepth(self.id))
            .await?
            .into_integer()
    }

    /// Contents of the thread's operand stack
    pub async fn data_stack(&self) -> Result<Vec<String>> {
        self.connection.require_suspended(self.id, None)?;
        self.connection
            .send(Command::Data(self.id))
            .await?
            .into_strings()
    }

    /// Evaluate an expression in the thread, the result doesn't belong to any variable
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.connection.require_suspended(self.id, None)?;
        let text = self
            .connection
            .send(Command::Eval {
                thread: self.id,
                expression: expression.to_string(),
            })
            .await?
            .into_text()?;
        Ok(Value::detached(&text))
    }

    pub async fn resume(&self) -> Result<()> {
        self.run_control(Command::Resume(Some(self.id))).await
    }

    pub async fn suspend(&self) -> Result<()> {
        self.run_control(Command::Suspend(Some(self.id))).await
    }

    pub async fn step_over(&self) -> Result<()> {
        self.connection.require_suspended(self.id, None)?;
        self.run_control(Command::Step(self.id)).await
    }

    pub async fn step_return(&self) -> Result<()> {
        self.connection.require_suspended(self.id, None)?;
        self.run_control(Command::StepReturn(self.id)).await
    }

    pub async fn drop_to_frame(&self) -> Result<()> {
        self.connection.require_suspended(self.id, None)?;
        self.run_control(Command::Drop(self.id)).await
    }

    async fn run_control(&self, command: Command) -> Result<()> {
        self.connection.send(command).await?.into_ack()
    }
}
