//! Command dispatcher
//!
//! Sends commands to the VM and hands each reply back to the command that caused it.
//!
//! Only one command is ever in flight: `send` waits its turn on a fair lock around the
//! writer, so concurrent callers are served first come first served and hold the lock
//! until their reply arrives. `try_send` fails with `Busy` instead of waiting.
//!
//! Closing wakes every sender, whether it is queued for the lock, writing or waiting for a
//! reply. The command timeout covers the write as well as the wait for the reply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::SinkExt;
use log::{debug, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio_util::codec::FramedWrite;

use crate::codec::{Outcome, PdaCodec, Reply, Request};
use crate::command::{Command, Payload};
use crate::error::{PdaError, Result};
use crate::util::lock;

type Writer = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, PdaCodec>;

/// How long `shutdown` waits for a woken sender to let go of the writer
const WRITER_RELEASE_GRACE: Duration = Duration::from_millis(500);

struct PendingCommand {
    token: u64,
    command: Command,
    responder: oneshot::Sender<Result<Payload>>,
}

#[derive(Default)]
struct Correlator {
    closed: bool,
    pending: Option<PendingCommand>,
}

pub struct CommandDispatcher {
    writer: AsyncMutex<Writer>,
    correlator: Mutex<Correlator>,
    next_token: AtomicU64,
    timeout: Option<Duration>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

/// Forgets the pending slot if the sending future goes away before its reply arrives
struct AbandonOnDrop<'a> {
    dispatcher: &'a CommandDispatcher,
    token: u64,
}

impl<'a> Drop for AbandonOnDrop<'a> {
    fn drop(&mut self) {
        self.dispatcher.abandon(self.token);
    }
}

impl CommandDispatcher {
    /// Create a new dispatcher writing commands to `writer`
    pub fn new<W>(writer: W, timeout: Option<Duration>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let (closed_tx, closed_rx) = watch::channel(false);
        CommandDispatcher {
            writer: AsyncMutex::new(FramedWrite::new(writer, PdaCodec::new())),
            correlator: Mutex::new(Correlator::default()),
            next_token: AtomicU64::new(1),
            timeout,
            closed_tx,
            closed_rx,
        }
    }

    /// Send a command and wait for its reply, queueing behind any command already in flight
    pub async fn send(&self, command: Command) -> Result<Payload> {
        if self.is_closed() {
            return Err(PdaError::ConnectionClosed);
        }

        let writer = tokio::select! {
            writer = self.writer.lock() => writer,
            _ = self.closed() => return Err(PdaError::ConnectionClosed),
        };
        self.send_locked(writer, command).await
    }

    /// As `send` but fails with `Busy` rather than waiting for another command to finish
    pub async fn try_send(&self, command: Command) -> Result<Payload> {
        if self.is_closed() {
            return Err(PdaError::ConnectionClosed);
        }

        let writer = match self.writer.try_lock() {
            Ok(w) => w,
            Err(_) => return Err(PdaError::Busy),
        };
        self.send_locked(writer, command).await
    }

    async fn send_locked(
        &self,
        mut writer: AsyncMutexGuard<'_, Writer>,
        command: Command,
    ) -> Result<Payload> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(token, &command);
        let description = command.to_string();
        let (tx, rx) = oneshot::channel();

        {
            let mut correlator = lock(&self.correlator);
            if correlator.closed {
                return Err(PdaError::ConnectionClosed);
            }
            correlator.pending = Some(PendingCommand {
                token,
                command,
                responder: tx,
            });
        }

        let _abandon = AbandonOnDrop {
            dispatcher: self,
            token,
        };

        let exchange = async {
            tokio::select! {
                result = self.exchange(&mut *writer, request, rx, &description) => result,
                _ = self.closed() => Err(PdaError::ConnectionClosed),
            }
        };

        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, exchange).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "No reply to '{}' within {}ms, giving up on it",
                        description,
                        timeout.as_millis()
                    );
                    Err(PdaError::Timeout(description.clone()))
                }
            },
            None => exchange.await,
        };

        drop(writer);
        result
    }

    /// Write the request and wait for its reply
    async fn exchange(
        &self,
        writer: &mut Writer,
        request: Request,
        rx: oneshot::Receiver<Result<Payload>>,
        description: &str,
    ) -> Result<Payload> {
        match writer.send(request).await {
            Ok(_) => {}
            Err(PdaError::InvalidArgument(msg)) => return Err(PdaError::InvalidArgument(msg)),
            Err(e) => {
                warn!("Couldn't write '{}' to the VM: {}", description, e);
                self.close();
                return Err(PdaError::ConnectionClosed);
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(PdaError::ConnectionClosed),
        }
    }

    /// Resolves once the dispatcher has been closed
    async fn closed(&self) {
        let mut closed_rx = self.closed_rx.clone();
        while !*closed_rx.borrow() {
            if closed_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Hand a reply to the command waiting for it.
    ///
    /// The payload is parsed with the parser of the pending command's own opcode. A reply
    /// whose token isn't the one pending is dropped.
    pub fn resolve(&self, reply: Reply) {
        let token = reply.token();

        let pending = {
            let mut correlator = lock(&self.correlator);
            if correlator.pending.as_ref().map(|p| p.token) == Some(token) {
                correlator.pending.take()
            } else {
                None
            }
        };

        let pending = match pending {
            Some(p) => p,
            None => {
                warn!(
                    "Dropping reply with no matching command, token {}: {:?}",
                    token,
                    reply.outcome()
                );
                return;
            }
        };

        let result = match reply.into_outcome() {
            Outcome::Ok(payload) => pending.command.parse_reply(&payload),
            Outcome::Error { code, message } => Err(PdaError::CommandFailed {
                opcode: pending.command.opcode().to_string(),
                code,
                message,
            }),
            Outcome::Unreadable(body) => Err(PdaError::MalformedReply(format!(
                "reply to '{}' is neither ok nor error: '{}'",
                pending.command, body
            ))),
        };

        if pending.responder.send(result).is_err() {
            debug!("Waiter for token {} went away before its reply", token);
        }
    }

    /// Mark the dispatcher closed and fail the pending command, queued commands fail
    /// without being written.
    pub fn close(&self) {
        let pending = {
            let mut correlator = lock(&self.correlator);
            correlator.closed = true;
            correlator.pending.take()
        };
        let _ = self.closed_tx.send(true);

        if let Some(pending) = pending {
            debug!("Failing '{}' as the connection closed", pending.command);
            let _ = pending.responder.send(Err(PdaError::ConnectionClosed));
        }
    }

    /// Close the dispatcher and shut down the write half of the transport.
    ///
    /// Nothing buffered is flushed. Closing wakes any sender holding the writer, if one
    /// still hasn't let go after `WRITER_RELEASE_GRACE` the transport is left to be shut
    /// when the dispatcher is dropped.
    pub async fn shutdown(&self) {
        self.close();

        match tokio::time::timeout(WRITER_RELEASE_GRACE, self.writer.lock()).await {
            Ok(mut writer) => {
                if let Err(e) = writer.get_mut().shutdown().await {
                    debug!("Error shutting down writer: {}", e);
                }
            }
            Err(_) => debug!("Writer still held by a sender, not shutting it down"),
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.correlator).closed
    }

    fn abandon(&self, token: u64) {
        let mut correlator = lock(&self.correlator);
        if correlator.pending.as_ref().map(|p| p.token) == Some(token) {
            debug!("Abandoning pending command with token {}", token);
            correlator.pending = None;
        }
    }
}
