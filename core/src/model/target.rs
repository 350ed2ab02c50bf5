use log::{debug, info};

use super::{require_name, Thread};
use crate::command::Command;
use crate::connection::Connection;
use crate::error::{PdaError, Result};
use crate::state::SessionState;

/// The PDA program being debugged, the root of the model
#[derive(Clone, Debug)]
pub struct DebugTarget {
    connection: Connection,
    name: String,
}

impl DebugTarget {
    /// Create a new target on top of an open connection
    pub fn new(connection: Connection, name: &str) -> Self {
        DebugTarget {
            connection,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name[..]
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn state(&self) -> SessionState {
        self.connection.state()
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == SessionState::Terminated
    }

    /// Threads currently alive in the VM
    pub async fn threads(&self) -> Result<Vec<Thread>> {
        let ids = self
            .connection
            .send(Command::Threads)
            .await?
            .into_threads()?;

        Ok(ids
            .into_iter()
            .map(|id| Thread::new(self.connection.clone(), id))
            .collect())
    }

    /// The VM's own description of its state
    pub async fn vm_state(&self) -> Result<String> {
        self.connection.send(Command::State(None)).await?.into_text()
    }

    /// Resume every thread
    pub async fn resume(&self) -> Result<()> {
        self.ack(Command::Resume(None)).await
    }

    /// Suspend every thread
    pub async fn suspend(&self) -> Result<()> {
        self.ack(Command::Suspend(None)).await
    }

    /// Break at `line`, suspending the whole VM rather than just the thread when `stop_vm`
    pub async fn set_breakpoint(&self, line: u64, stop_vm: bool) -> Result<()> {
        self.ack(Command::SetBreakpoint { line, stop_vm }).await
    }

    pub async fn clear_breakpoint(&self, line: u64) -> Result<()> {
        self.ack(Command::ClearBreakpoint(line)).await
    }

    /// Watch `function::variable` for reads, writes or both, neither clears the watch
    pub async fn watch(&self, name: &str, read: bool, write: bool) -> Result<()> {
        require_name("watch name", name)?;
        self.ack(Command::Watch {
            name: name.to_string(),
            read,
            write,
        })
        .await
    }

    /// Suspend when the VM raises the named event, e.g. `unimpinstr`
    pub async fn event_stop(&self, event: &str, enabled: bool) -> Result<()> {
        require_name("event name", event)?;
        self.ack(Command::EventStop {
            event: event.to_string(),
            enabled,
        })
        .await
    }

    /// Ask the VM to exit then close the connection
    pub async fn terminate(&self) -> Result<()> {
        info!("Terminating {}", self.name);

        let result = match self.ack(Command::Exit).await {
            // The VM may go away before it gets round to replying
            Err(PdaError::ConnectionClosed) => {
                debug!("Connection closed while exiting");
                Ok(())
            }
            other => other,
        };

        self.connection.close().await;

        result
    }

    async fn ack(&self, command: Command) -> Result<()> {
        self.connection.send(command).await?.into_ack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::test_utils::connect;

    #[tokio::test]
    async fn check_breakpoint_and_watch_commands() {
        let (conn, mut vm) = connect();
        let target = DebugTarget::new(conn, "prog.pda");
        assert_eq!(target.name(), "prog.pda");

        let (result, _) = tokio::join!(target.set_breakpoint(4, true), vm.serve("set 4 1", "ok"));
        result.unwrap();
        let (result, _) = tokio::join!(target.clear_breakpoint(4), vm.serve("clear 4", "ok"));
        result.unwrap();
        let (result, _) = tokio::join!(
            target.watch("inc::n", false, true),
            vm.serve("watch inc::n 2", "ok")
        );
        result.unwrap();
        let (result, _) = tokio::join!(
            target.event_stop("unimpinstr", true),
            vm.serve("eventstop unimpinstr 1", "ok")
        );
        result.unwrap();

        assert!(matches!(
            target.watch("two words", true, true).await,
            Err(PdaError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn check_threads_and_vm_state() {
        let (conn, mut vm) = connect();
        let target = DebugTarget::new(conn, "prog.pda");

        let (threads, _) = tokio::join!(target.threads(), vm.serve("threads", "ok 1 3"));
        let ids: Vec<u64> = threads.unwrap().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![1, 3]);

        let (state, _) = tokio::join!(target.vm_state(), vm.serve("state", "ok suspended 1 client"));
        assert_eq!(state.unwrap(), "suspended 1 client");
    }

    #[tokio::test]
    async fn check_resume_ack_with_payload_is_malformed() {
        let (conn, mut vm) = connect();
        let target = DebugTarget::new(conn, "prog.pda");

        let (result, _) = tokio::join!(target.resume(), vm.serve("resume", "ok 1 2 3"));
        assert!(matches!(result, Err(PdaError::MalformedReply(_))));
    }

    #[tokio::test]
    async fn check_terminate_closes_connection() {
        let (conn, mut vm) = connect();
        let (_, mut rx) = conn.subscribe();
        let target = DebugTarget::new(conn.clone(), "prog.pda");

        let (result, _) = tokio::join!(target.terminate(), async {
            let token = vm.expect("exit").await;
            vm.emit("terminated").await;
            vm.reply(token, "ok").await;
        });
        result.unwrap();

        assert!(target.is_terminated());
        assert!(conn.is_closed());
        assert_eq!(rx.recv().await.unwrap(), Event::Terminated);
        assert!(rx.try_recv().is_err());
        assert!(vm.next_command().await.is_none());
    }
}
