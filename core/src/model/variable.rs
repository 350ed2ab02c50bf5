use super::{FrameContext, Value};
use crate::command::Command;
use crate::error::Result;

/// A named slot in a stack frame, or a child of another variable
#[derive(Clone, Debug)]
pub struct Variable {
    context: FrameContext,
    path: String,
    value: String,
}

impl Variable {
    pub(crate) fn new(context: FrameContext, path: String, value: String) -> Self {
        Variable {
            context,
            path,
            value,
        }
    }

    /// The last segment of the path, `b` for `x.a.b`
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path[..])
    }

    /// Full path from the frame, used to address the variable in commands
    pub fn path(&self) -> &str {
        &self.path[..]
    }

    pub fn value(&self) -> Value {
        Value::new(self.value.clone(), self.context.clone(), self.path.clone())
    }

    /// Change the variable in the VM and return it as the VM now reports it
    pub async fn set_value(&self, value: &str) -> Result<Variable> {
        self.context.check()?;

        self.context
            .connection
            .send(Command::SetVar {
                thread: self.context.thread,
                frame: self.context.frame,
                name: self.path.clone(),
                value: value.to_string(),
            })
            .await?
            .into_ack()?;

        self.context.fetch(&self.path).await
    }
}
