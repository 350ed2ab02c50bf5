use super::{require_name, FrameContext, Variable};
use crate::command::{FrameData, ThreadId};
use crate::connection::Connection;
use crate::error::Result;

/// One frame of a suspended thread's stack
#[derive(Clone, Debug)]
pub struct StackFrame {
    context: FrameContext,
    data: FrameData,
}

impl StackFrame {
    pub(crate) fn new(
        connection: Connection,
        thread: ThreadId,
        index: usize,
        epoch: u64,
        data: FrameData,
    ) -> Self {
        StackFrame {
            context: FrameContext::new(connection, thread, index, epoch),
            data,
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.context.thread
    }

    /// Index the VM knows this frame by, 0 is the outermost frame
    pub fn index(&self) -> usize {
        self.context.frame
    }

    pub fn file(&self) -> &str {
        self.data.file()
    }

    pub fn line(&self) -> u64 {
        self.data.line()
    }

    pub fn function(&self) -> &str {
        self.data.function()
    }

    /// Names of the variables as listed in the stack, without fetching anything
    pub fn variable_names(&self) -> &[String] {
        self.data.variables()
    }

    pub fn data(&self) -> &FrameData {
        &self.data
    }

    /// The frame's variables with their current values, fetched fresh each call
    pub async fn variables(&self) -> Result<Vec<Variable>> {
        self.context.children(None).await
    }

    /// A single variable of this frame
    pub async fn variable(&self, name: &str) -> Result<Variable> {
        require_name("variable name", name)?;
        self.context.fetch(name).await
    }
}

#[cfg(test)]
mod tests {
    use crate::error::PdaError;
    use crate::events::Event;
    use crate::model::DebugTarget;
    use crate::test_utils::connect;

    #[tokio::test]
    async fn check_variables_fetched_every_call() {
        let (conn, mut vm) = connect();
        let (_, mut rx) = conn.subscribe();
        vm.emit("started 1").await;
        assert_eq!(rx.recv().await.unwrap(), Event::Started { thread: 1 });

        let target = DebugTarget::new(conn, "prog.pda");
        let (threads, _) = tokio::join!(target.threads(), vm.serve("threads", "ok 1"));
        let thread = threads.unwrap().remove(0);
        let (frames, _) = tokio::join!(
            thread.stack_frames(),
            vm.serve("stack 1", "ok prog.pda|1|main|a|b#prog.pda|8|inc|n")
        );
        let frames = frames.unwrap();

        // Top of the stack comes first but keeps the index the VM uses
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].function(), "inc");
        assert_eq!(frames[0].index(), 1);
        assert_eq!(frames[0].line(), 8);
        assert_eq!(frames[1].index(), 0);
        assert_eq!(frames[1].variable_names(), &["a".to_string(), "b".to_string()]);

        let main = &frames[1];
        let (vars, _) = tokio::join!(main.variables(), vm.serve("children 1 0", "ok a|1|b|x"));
        let vars = vars.unwrap();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[1].value().text(), "x");

        let (vars, _) = tokio::join!(main.variables(), vm.serve("children 1 0", "ok a|2|b|y"));
        assert_eq!(vars.unwrap()[0].value().text(), "2");
    }

    #[tokio::test]
    async fn check_stale_frame_rejected() {
        let (conn, mut vm) = connect();
        let (_, mut rx) = conn.subscribe();
        vm.emit("started 1").await;
        rx.recv().await.unwrap();

        let target = DebugTarget::new(conn, "prog.pda");
        let (threads, _) = tokio::join!(target.threads(), vm.serve("threads", "ok 1"));
        let thread = threads.unwrap().remove(0);
        let (frames, _) = tokio::join!(
            thread.stack_frames(),
            vm.serve("stack 1", "ok prog.pda|1|main|a")
        );
        let frame = frames.unwrap().remove(0);

        vm.emit("resumed 1 client").await;
        rx.recv().await.unwrap();
        assert!(matches!(
            frame.variables().await,
            Err(PdaError::InvalidState(_))
        ));

        vm.emit("suspended 1 step").await;
        rx.recv().await.unwrap();
        assert!(matches!(
            frame.variable("a").await,
            Err(PdaError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn check_variables_rejected_if_thread_ran_while_fetching() {
        let (conn, mut vm) = connect();
        let (_, mut rx) = conn.subscribe();
        vm.emit("started 1").await;
        rx.recv().await.unwrap();

        let target = DebugTarget::new(conn, "prog.pda");
        let (threads, _) = tokio::join!(target.threads(), vm.serve("threads", "ok 1"));
        let thread = threads.unwrap().remove(0);
        let (frames, _) = tokio::join!(
            thread.stack_frames(),
            vm.serve("stack 1", "ok prog.pda|1|main|a")
        );
        let frame = frames.unwrap().remove(0);

        let (vars, _) = tokio::join!(frame.variables(), async {
            let token = vm.expect("children 1 0").await;
            vm.emit("resumed 1 client").await;
            vm.reply(token, "ok a|1").await;
        });
        assert!(matches!(vars, Err(PdaError::InvalidState(_))));
    }

    #[tokio::test]
    async fn check_malformed_children_reply_propagates() {
        let (conn, mut vm) = connect();
        let (_, mut rx) = conn.subscribe();
        vm.emit("started 1").await;
        rx.recv().await.unwrap();

        let target = DebugTarget::new(conn, "prog.pda");
        let (threads, _) = tokio::join!(target.threads(), vm.serve("threads", "ok 1"));
        let thread = threads.unwrap().remove(0);
        let (frames, _) = tokio::join!(
            thread.stack_frames(),
            vm.serve("stack 1", "ok prog.pda|1|main|a")
        );
        let frame = frames.unwrap().remove(0);

        let (vars, _) = tokio::join!(frame.variables(), vm.serve("children 1 0", "ok a|1|b"));
        assert!(matches!(vars, Err(PdaError::MalformedReply(_))));
    }
}
