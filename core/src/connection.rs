//! Connection
//!
//! One debug session with a PDA VM. Owns the transport, the command dispatcher, the
//! listeners and the run states, and runs the read loop that feeds them.
//!
//! Events are only ever delivered from the read loop, `Terminated` included, so an event
//! that has started reaching listeners always finishes before the next one begins.

use std::fmt;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;

use crate::codec::{Incoming, PdaCodec};
use crate::command::{Command, Payload, ThreadId};
use crate::config::Config;
use crate::dispatcher::CommandDispatcher;
use crate::error::{PdaError, Result};
use crate::events::{ChannelListener, Event, EventDispatcher, EventListener, ListenerId};
use crate::state::{RunStates, SessionState, ThreadState};
use crate::util::lock;

struct Inner {
    dispatcher: CommandDispatcher,
    events: EventDispatcher,
    states: Mutex<RunStates>,
    shutdown_tx: watch::Sender<bool>,
    stopped_rx: watch::Receiver<bool>,
}

impl Inner {
    fn handle_event(&self, event: Event) {
        if self.events.is_terminated() {
            debug!("Ignoring {:?} after termination", event);
            return;
        }
        lock(&self.states).apply(&event);
        self.events.dispatch(&event);
    }

    // Safe to call more than once, listeners only ever hear one `Terminated`
    fn shutdown(&self) {
        self.dispatcher.close();
        lock(&self.states).terminate();
        self.events.dispatch(&Event::Terminated);
    }
}

/// Handle on a debug session, cheap to clone and share between tasks
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Attach to a VM listening on `addr`, retrying until `ConnectTimeout` has passed
    pub async fn connect(addr: &str, config: &Config) -> Result<Connection> {
        let deadline = Instant::now() + config.connect_timeout();

        loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    info!("Connected to PDA VM at {}", addr);
                    stream.set_nodelay(true)?;
                    let (reader, writer) = stream.into_split();
                    return Ok(Connection::from_stream(reader, writer, config));
                }
                Err(e) => {
                    if Instant::now() >= deadline {
                        warn!("Giving up connecting to {}: {}", addr, e);
                        return Err(PdaError::Io(e));
                    }
                    debug!("Can't connect to {} yet: {}", addr, e);
                    tokio::time::sleep(config.connect_retry_interval()).await;
                }
            }
        }
    }

    /// Start a session over an already open transport.
    ///
    /// The read loop is spawned onto the current runtime. Listeners added before the
    /// calling task next yields see every event the VM sends.
    pub fn from_stream<R, W>(reader: R, writer: W, config: &Config) -> Connection
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (stopped_tx, stopped_rx) = watch::channel(false);

        let mut states = RunStates::new();
        states.open();

        let inner = Arc::new(Inner {
            dispatcher: CommandDispatcher::new(writer, config.command_timeout()),
            events: EventDispatcher::new(),
            states: Mutex::new(states),
            shutdown_tx,
            stopped_rx,
        });

        tokio::spawn(read_loop(
            inner.clone(),
            FramedRead::new(reader, PdaCodec::new()),
            shutdown_rx,
            stopped_tx,
        ));

        Connection { inner }
    }

    /// Send a command and wait for its reply, queueing behind any command in flight
    pub async fn send(&self, command: Command) -> Result<Payload> {
        self.inner.dispatcher.send(command).await
    }

    /// Send a command, failing with `Busy` if another is in flight
    pub async fn try_send(&self, command: Command) -> Result<Payload> {
        self.inner.dispatcher.try_send(command).await
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        self.inner.events.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.events.remove_listener(id)
    }

    /// Receive events on a channel, for listeners that want to send commands in response
    pub fn subscribe(&self) -> (ListenerId, mpsc::UnboundedReceiver<Event>) {
        let (listener, rx) = ChannelListener::new();
        (self.add_listener(Arc::new(listener)), rx)
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner.states).session()
    }

    pub fn thread_state(&self, thread: ThreadId) -> Option<ThreadState> {
        lock(&self.inner.states).thread_state(thread)
    }

    /// Threads the VM has told us about that haven't exited
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        lock(&self.inner.states).thread_ids()
    }

    /// See `RunStates::require_suspended`
    pub fn require_suspended(&self, thread: ThreadId, epoch: Option<u64>) -> Result<u64> {
        lock(&self.inner.states).require_suspended(thread, epoch)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.dispatcher.is_closed()
    }

    /// Tear the session down.
    ///
    /// Fails every pending and queued command with `ConnectionClosed`, stops the read loop,
    /// shuts down the write half and delivers `Terminated` if nothing has yet. Returns once
    /// the read loop has finished delivering, so no event reaches a listener afterwards.
    pub async fn close(&self) {
        info!("Closing connection to PDA VM");
        self.inner.dispatcher.close();
        let _ = self.inner.shutdown_tx.send(true);

        let mut stopped_rx = self.inner.stopped_rx.clone();
        while !*stopped_rx.borrow() {
            if stopped_rx.changed().await.is_err() {
                // The read loop went away without finishing, terminate on its behalf
                warn!("Read loop ended early, terminating from close");
                self.inner.shutdown();
                break;
            }
        }

        self.inner.dispatcher.shutdown().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .finish()
    }
}

async fn read_loop<R>(
    inner: Arc<Inner>,
    mut reader: FramedRead<R, PdaCodec>,
    mut shutdown_rx: watch::Receiver<bool>,
    stopped_tx: watch::Sender<bool>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let incoming = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                debug!("Read loop told to stop");
                break;
            }
            incoming = reader.next() => incoming,
        };

        match incoming {
            Some(Ok(Incoming::Event(event))) => inner.handle_event(event),
            Some(Ok(Incoming::Reply(reply))) => inner.dispatcher.resolve(reply),
            Some(Ok(Incoming::Malformed(line))) => {
                warn!("Skipping line from VM that isn't a reply or event: {}", line);
            }
            Some(Err(e)) => {
                warn!("Reading from VM failed: {}", e);
                break;
            }
            None => {
                info!("PDA VM closed the connection");
                break;
            }
        }
    }

    inner.shutdown();
    let _ = stopped_tx.send(true);
}
