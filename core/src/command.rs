//! Commands
//!
//! Every request the PDA VM understands together with the parser for its reply. The
//! opcode of a command picks its reply parser out of a static table, adding an opcode
//! is a new `Command` variant plus a table entry.

use std::collections::HashMap;
use std::fmt;

use crate::error::{PdaError, Result};

pub type ThreadId = u64;

/// A stack frame as reported by the `stack` command
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FrameData {
    file: String,
    line: u64,
    function: String,
    variables: Vec<String>,
}

impl FrameData {
    pub fn new(file: String, line: u64, function: String, variables: Vec<String>) -> Self {
        FrameData {
            file,
            line,
            function,
            variables,
        }
    }

    pub fn file(&self) -> &str {
        &self.file[..]
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn function(&self) -> &str {
        &self.function[..]
    }

    pub fn variables(&self) -> &[String] {
        &self.variables[..]
    }
}

/// Requests that can be sent to the VM
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Threads,
    State(Option<ThreadId>),
    Stack(ThreadId),
    StackDepth(ThreadId),
    Data(ThreadId),
    Var {
        thread: ThreadId,
        frame: usize,
        name: String,
    },
    SetVar {
        thread: ThreadId,
        frame: usize,
        name: String,
        value: String,
    },
    // No path means the variables of the frame itself
    Children {
        thread: ThreadId,
        frame: usize,
        path: Option<String>,
    },
    Eval {
        thread: ThreadId,
        expression: String,
    },
    Resume(Option<ThreadId>),
    Suspend(Option<ThreadId>),
    Step(ThreadId),
    StepReturn(ThreadId),
    Drop(ThreadId),
    SetBreakpoint {
        line: u64,
        stop_vm: bool,
    },
    ClearBreakpoint(u64),
    Watch {
        name: String,
        read: bool,
        write: bool,
    },
    EventStop {
        event: String,
        enabled: bool,
    },
    Exit,
}

impl Command {
    /// The opcode written as the first word of the command
    pub fn opcode(&self) -> &'static str {
        match self {
            Command::Threads => "threads",
            Command::State(_) => "state",
            Command::Stack(_) => "stack",
            Command::StackDepth(_) => "stackdepth",
            Command::Data(_) => "data",
            Command::Var { .. } => "var",
            Command::SetVar { .. } => "setvar",
            Command::Children { .. } => "children",
            Command::Eval { .. } => "eval",
            Command::Resume(_) => "resume",
            Command::Suspend(_) => "suspend",
            Command::Step(_) => "step",
            Command::StepReturn(_) => "stepreturn",
            Command::Drop(_) => "drop",
            Command::SetBreakpoint { .. } => "set",
            Command::ClearBreakpoint(_) => "clear",
            Command::Watch { .. } => "watch",
            Command::EventStop { .. } => "eventstop",
            Command::Exit => "exit",
        }
    }

    /// The arguments following the opcode, order matters to the VM
    pub fn args(&self) -> Vec<String> {
        match self {
            Command::Threads | Command::Exit => vec![],
            Command::State(thread) | Command::Resume(thread) | Command::Suspend(thread) => {
                thread.iter().map(|t| t.to_string()).collect()
            }
            Command::Stack(thread)
            | Command::StackDepth(thread)
            | Command::Data(thread)
            | Command::Step(thread)
            | Command::StepReturn(thread)
            | Command::Drop(thread) => vec![thread.to_string()],
            Command::Var {
                thread,
                frame,
                name,
            } => vec![thread.to_string(), frame.to_string(), name.clone()],
            Command::SetVar {
                thread,
                frame,
                name,
                value,
            } => vec![
                thread.to_string(),
                frame.to_string(),
                name.clone(),
                value.clone(),
            ],
            Command::Children {
                thread,
                frame,
                path,
            } => {
                let mut args = vec![thread.to_string(), frame.to_string()];
                if let Some(path) = path {
                    args.push(path.clone());
                }
                args
            }
            Command::Eval { thread, expression } => vec![thread.to_string(), expression.clone()],
            Command::SetBreakpoint { line, stop_vm } => {
                vec![line.to_string(), flag(*stop_vm).to_string()]
            }
            Command::ClearBreakpoint(line) => vec![line.to_string()],
            Command::Watch { name, read, write } => {
                let flags = (*read as u8) | ((*write as u8) << 1);
                vec![name.clone(), flags.to_string()]
            }
            Command::EventStop { event, enabled } => {
                vec![event.clone(), flag(*enabled).to_string()]
            }
        }
    }

    /// Parse the payload of a successful reply to this command
    pub fn parse_reply(&self, payload: &str) -> Result<Payload> {
        parse_reply(self.opcode(), payload)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.opcode())?;
        for arg in self.args() {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn flag(b: bool) -> u8 {
    if b {
        1
    } else {
        0
    }
}

/// The parsed payload of a successful reply
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Ack,
    Threads(Vec<ThreadId>),
    Frames(Vec<FrameData>),
    Text(String),
    Integer(i64),
    Strings(Vec<String>),
}

impl Payload {
    pub fn into_ack(self) -> Result<()> {
        match self {
            Payload::Ack => Ok(()),
            other => Err(unexpected("an acknowledgement", &other)),
        }
    }

    pub fn into_threads(self) -> Result<Vec<ThreadId>> {
        match self {
            Payload::Threads(threads) => Ok(threads),
            other => Err(unexpected("a thread list", &other)),
        }
    }

    pub fn into_frames(self) -> Result<Vec<FrameData>> {
        match self {
            Payload::Frames(frames) => Ok(frames),
            other => Err(unexpected("a stack", &other)),
        }
    }

    pub fn into_text(self) -> Result<String> {
        match self {
            Payload::Text(text) => Ok(text),
            other => Err(unexpected("a value", &other)),
        }
    }

    pub fn into_integer(self) -> Result<i64> {
        match self {
            Payload::Integer(i) => Ok(i),
            other => Err(unexpected("an integer", &other)),
        }
    }

    pub fn into_strings(self) -> Result<Vec<String>> {
        match self {
            Payload::Strings(strings) => Ok(strings),
            other => Err(unexpected("a list", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &Payload) -> PdaError {
    PdaError::MalformedReply(format!("expected {}, got {:?}", wanted, got))
}

type ReplyParser = fn(&str) -> Result<Payload>;

lazy_static! {
    static ref REPLY_PARSERS: HashMap<&'static str, ReplyParser> = {
        let mut m: HashMap<&'static str, ReplyParser> = HashMap::new();
        m.insert("threads", parse_threads);
        m.insert("state", parse_text);
        m.insert("stack", parse_stack);
        m.insert("stackdepth", parse_integer);
        m.insert("data", parse_strings);
        m.insert("var", parse_text);
        m.insert("setvar", parse_ack);
        m.insert("children", parse_children);
        m.insert("eval", parse_text);
        m.insert("resume", parse_ack);
        m.insert("suspend", parse_ack);
        m.insert("step", parse_ack);
        m.insert("stepreturn", parse_ack);
        m.insert("drop", parse_ack);
        m.insert("set", parse_ack);
        m.insert("clear", parse_ack);
        m.insert("watch", parse_ack);
        m.insert("eventstop", parse_ack);
        m.insert("exit", parse_ack);
        m
    };
}

/// Parse a reply payload with the parser registered for `opcode`
pub fn parse_reply(opcode: &str, payload: &str) -> Result<Payload> {
    match REPLY_PARSERS.get(opcode) {
        Some(parser) => parser(payload),
        None => Err(PdaError::MalformedReply(format!(
            "no reply parser for opcode '{}'",
            opcode
        ))),
    }
}

fn parse_ack(payload: &str) -> Result<Payload> {
    if payload.trim().is_empty() {
        Ok(Payload::Ack)
    } else {
        Err(PdaError::MalformedReply(format!(
            "expected no payload, got '{}'",
            payload
        )))
    }
}

fn parse_text(payload: &str) -> Result<Payload> {
    Ok(Payload::Text(payload.to_string()))
}

fn parse_integer(payload: &str) -> Result<Payload> {
    Ok(Payload::Integer(parse_number(payload.trim())?))
}

fn parse_threads(payload: &str) -> Result<Payload> {
    let threads = payload
        .split_whitespace()
        .map(parse_number)
        .collect::<Result<Vec<_>>>()?;
    Ok(Payload::Threads(threads))
}

fn parse_strings(payload: &str) -> Result<Payload> {
    Ok(Payload::Strings(split_fields(payload)))
}

fn parse_children(payload: &str) -> Result<Payload> {
    let fields = split_fields(payload);
    if fields.len() % 2 != 0 {
        return Err(PdaError::MalformedReply(format!(
            "children reply needs name/value pairs, got {} fields: '{}'",
            fields.len(),
            payload
        )));
    }
    Ok(Payload::Strings(fields))
}

fn parse_stack(payload: &str) -> Result<Payload> {
    let mut frames = vec![];

    for frame in payload.split('#').filter(|f| !f.is_empty()) {
        let fields: Vec<&str> = frame.split('|').collect();
        if fields.len() < 3 {
            return Err(PdaError::MalformedReply(format!(
                "stack frame needs file, line and function: '{}'",
                frame
            )));
        }

        let line = parse_number(fields[1])?;
        frames.push(FrameData::new(
            fields[0].to_string(),
            line,
            fields[2].to_string(),
            fields[3..].iter().map(|v| v.to_string()).collect(),
        ));
    }

    Ok(Payload::Frames(frames))
}

fn split_fields(payload: &str) -> Vec<String> {
    if payload.is_empty() {
        return vec![];
    }
    payload.split('|').map(|s| s.to_string()).collect()
}

fn parse_number<T: std::str::FromStr>(s: &str) -> Result<T> {
    s.parse::<T>()
        .map_err(|_| PdaError::MalformedReply(format!("expected a number, got '{}'", s)))
}
