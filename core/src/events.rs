//! Events
//!
//! Run-control events sent by the PDA VM and the tools for notifying every registered
//! listener about them.
//!
//! Listeners are called synchronously from the connection's read loop, one after the other,
//! in the order events arrive. A listener must not wait on a command from inside
//! `handle_event`: the reply would have to be delivered by the same read loop that is busy
//! running the listener, so it deadlocks. Use `ChannelListener` (or
//! `Connection::subscribe`) and issue follow-up commands from another task instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;
use tokio::sync::mpsc;

use crate::command::ThreadId;
use crate::util::lock;

/// Keywords that start an event line
pub const EVENT_KINDS: [&str; 6] = [
    "started",
    "exited",
    "suspended",
    "resumed",
    "terminated",
    "output",
];

/// Why a thread stopped
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Client,
    Step,
    Drop,
    Breakpoint(u64),
    Watch { access: String, name: String },
    Event(String),
    Other(String),
}

impl StopReason {
    fn parse(words: &[&str]) -> StopReason {
        match words {
            ["client"] => StopReason::Client,
            ["step"] => StopReason::Step,
            ["drop"] => StopReason::Drop,
            ["breakpoint", line] => match line.parse() {
                Ok(line) => StopReason::Breakpoint(line),
                Err(_) => StopReason::Other(words.join(" ")),
            },
            ["watch", access, name] => StopReason::Watch {
                access: access.to_string(),
                name: name.to_string(),
            },
            ["event", name] => StopReason::Event(name.to_string()),
            _ => StopReason::Other(words.join(" ")),
        }
    }
}

/// Why a thread started running again
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeReason {
    Client,
    Step,
    Drop,
    Other(String),
}

impl ResumeReason {
    fn parse(words: &[&str]) -> ResumeReason {
        match words {
            ["client"] => ResumeReason::Client,
            ["step"] => ResumeReason::Step,
            ["drop"] => ResumeReason::Drop,
            _ => ResumeReason::Other(words.join(" ")),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Event {
    Started {
        thread: ThreadId,
    },
    Exited {
        thread: ThreadId,
    },
    Suspended {
        thread: ThreadId,
        reason: StopReason,
    },
    Resumed {
        thread: ThreadId,
        reason: ResumeReason,
    },
    Terminated,
    Output {
        text: String,
    },
}

impl Event {
    /// Parse an event line, returns `None` if the line isn't a well formed event.
    ///
    /// For example `suspended 1 breakpoint 4` becomes a `Suspended` event for thread `1`
    /// with a `Breakpoint(4)` reason.
    pub fn parse(line: &str) -> Option<Event> {
        let kind = line.split(' ').next()?;

        if kind == "output" {
            let text = line.get(kind.len() + 1..).unwrap_or("");
            return Some(Event::Output {
                text: text.to_string(),
            });
        }

        let words: Vec<&str> = line.split_whitespace().collect();

        match words.as_slice() {
            ["started", thread] => Some(Event::Started {
                thread: thread.parse().ok()?,
            }),
            ["exited", thread] => Some(Event::Exited {
                thread: thread.parse().ok()?,
            }),
            ["suspended", thread, reason @ ..] => Some(Event::Suspended {
                thread: thread.parse().ok()?,
                reason: StopReason::parse(reason),
            }),
            ["resumed", thread, reason @ ..] => Some(Event::Resumed {
                thread: thread.parse().ok()?,
                reason: ResumeReason::parse(reason),
            }),
            ["terminated"] => Some(Event::Terminated),
            _ => None,
        }
    }

    /// The thread this event is about, if any
    pub fn thread(&self) -> Option<ThreadId> {
        match self {
            Event::Started { thread }
            | Event::Exited { thread }
            | Event::Suspended { thread, .. }
            | Event::Resumed { thread, .. } => Some(*thread),
            Event::Terminated | Event::Output { .. } => None,
        }
    }

    /// Whether the line starts with an event keyword
    pub fn is_event_line(line: &str) -> bool {
        match line.split(' ').next() {
            Some(kind) => EVENT_KINDS.contains(&kind),
            None => false,
        }
    }
}

/// Anything that wants to hear about events
pub trait EventListener: Send + Sync {
    fn handle_event(&self, event: &Event);
}

impl<F> EventListener for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn handle_event(&self, event: &Event) {
        self(event)
    }
}

/// Forwards every event onto a channel so it can be handled on another task
#[derive(Debug)]
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<Event>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelListener { sender }, receiver)
    }
}

impl EventListener for ChannelListener {
    fn handle_event(&self, event: &Event) {
        if self.sender.send(event.clone()).is_err() {
            debug!("Event receiver dropped, not forwarding {:?}", event);
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ListenerId(u64);

/// The set of listeners registered on one connection
#[derive(Default)]
struct Listeners {
    next_id: u64,
    listeners: Vec<(ListenerId, Arc<dyn EventListener>)>,
}

impl Listeners {
    fn add_listener(&mut self, listener: Arc<dyn EventListener>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.push((id, listener));
        id
    }

    fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        before != self.listeners.len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn EventListener>> {
        self.listeners.iter().map(|(_, l)| l.clone()).collect()
    }
}

/// Delivers events to listeners, only ever delivers one `Terminated` and nothing after it
#[derive(Default)]
pub struct EventDispatcher {
    listeners: Mutex<Listeners>,
    terminated: AtomicBool,
}

impl EventDispatcher {
    pub fn new() -> Self {
        EventDispatcher::default()
    }

    /// Add a listener, it hears about every event dispatched from now on
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        lock(&self.listeners).add_listener(listener)
    }

    /// Remove a listener, returns false if it wasn't registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        lock(&self.listeners).remove_listener(id)
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).listeners.len()
    }

    /// Whether `Terminated` has been delivered
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Deliver the event to every listener before returning.
    ///
    /// The listener set is copied first so listeners can add or remove listeners while
    /// being notified.
    pub fn dispatch(&self, event: &Event) {
        let already_terminated = if *event == Event::Terminated {
            self.terminated.swap(true, Ordering::SeqCst)
        } else {
            self.is_terminated()
        };
        if already_terminated {
            debug!("Already terminated, dropping {:?}", event);
            return;
        }

        let listeners = lock(&self.listeners).snapshot();
        for listener in listeners {
            listener.handle_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_parse_run_control_events() {
        assert_eq!(
            Event::parse("started 1"),
            Some(Event::Started { thread: 1 })
        );
        assert_eq!(Event::parse("exited 12"), Some(Event::Exited { thread: 12 }));
        assert_eq!(
            Event::parse("suspended 1 breakpoint 4"),
            Some(Event::Suspended {
                thread: 1,
                reason: StopReason::Breakpoint(4)
            })
        );
        assert_eq!(
            Event::parse("suspended 2 watch write main::x"),
            Some(Event::Suspended {
                thread: 2,
                reason: StopReason::Watch {
                    access: "write".to_string(),
                    name: "main::x".to_string()
                }
            })
        );
        assert_eq!(
            Event::parse("resumed 1 step"),
            Some(Event::Resumed {
                thread: 1,
                reason: ResumeReason::Step
            })
        );
        assert_eq!(Event::parse("terminated"), Some(Event::Terminated));
    }

    #[test]
    fn check_parse_output_keeps_spaces() {
        assert_eq!(
            Event::parse("output hello  world"),
            Some(Event::Output {
                text: "hello  world".to_string()
            })
        );
        assert_eq!(
            Event::parse("output"),
            Some(Event::Output {
                text: "".to_string()
            })
        );
    }

    #[test]
    fn check_unknown_reasons_kept_verbatim() {
        assert_eq!(
            Event::parse("suspended 3 event unimpinstr"),
            Some(Event::Suspended {
                thread: 3,
                reason: StopReason::Event("unimpinstr".to_string())
            })
        );
        assert_eq!(
            Event::parse("suspended 1 breakpoint x"),
            Some(Event::Suspended {
                thread: 1,
                reason: StopReason::Other("breakpoint x".to_string())
            })
        );
        assert_eq!(
            Event::parse("resumed 3 something odd"),
            Some(Event::Resumed {
                thread: 3,
                reason: ResumeReason::Other("something odd".to_string())
            })
        );
    }

    #[test]
    fn check_malformed_events() {
        assert_eq!(Event::parse("started"), None);
        assert_eq!(Event::parse("started one"), None);
        assert_eq!(Event::parse("terminated now"), None);
        assert_eq!(Event::parse("bogus 1"), None);
        assert!(Event::is_event_line("started one"));
        assert!(!Event::is_event_line("#1 ok"));
    }

    #[test]
    fn check_can_add_and_remove_listeners() {
        let dispatcher = EventDispatcher::new();
        let a = dispatcher.add_listener(Arc::new(|_: &Event| {}));
        let b = dispatcher.add_listener(Arc::new(|_: &Event| {}));
        assert_eq!(dispatcher.listener_count(), 2);

        assert!(dispatcher.remove_listener(a));
        assert!(!dispatcher.remove_listener(a));
        assert!(dispatcher.remove_listener(b));
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[test]
    fn check_events_delivered_to_all_listeners_in_order() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(vec![]));

        for name in &["a", "b"] {
            let seen = seen.clone();
            let name = name.to_string();
            dispatcher.add_listener(Arc::new(move |event: &Event| {
                seen.lock().unwrap().push((name.clone(), event.clone()));
            }));
        }

        let first = Event::Started { thread: 1 };
        let second = Event::Exited { thread: 1 };
        dispatcher.dispatch(&first);
        dispatcher.dispatch(&second);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("a".to_string(), first.clone()),
                ("b".to_string(), first),
                ("a".to_string(), second.clone()),
                ("b".to_string(), second),
            ]
        );
    }

    #[test]
    fn check_terminated_only_delivered_once() {
        let dispatcher = EventDispatcher::new();
        let (listener, mut rx) = ChannelListener::new();
        dispatcher.add_listener(Arc::new(listener));

        dispatcher.dispatch(&Event::Terminated);
        dispatcher.dispatch(&Event::Terminated);

        dispatcher.dispatch(&Event::Output {
            text: "late".to_string(),
        });

        assert!(dispatcher.is_terminated());
        assert_eq!(rx.try_recv().unwrap(), Event::Terminated);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn check_events_serialize_with_kind() {
        let event = Event::Suspended {
            thread: 1,
            reason: StopReason::Breakpoint(4),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"kind": "suspended", "thread": 1, "reason": {"breakpoint": 4}})
        );
    }
}
