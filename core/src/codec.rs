//! PDA Codec
//!
//! Tokio codec for the newline delimited text protocol spoken by the PDA VM.

use bytes::{BufMut, BytesMut};
use log::debug;
use regex::Regex;
use tokio_util::codec::{Decoder, Encoder};

use crate::command::Command;
use crate::error::{PdaError, Result};
use crate::events::Event;

/// A command tagged with the correlation token its reply will echo
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    token: u64,
    opcode: &'static str,
    args: Vec<String>,
}

impl Request {
    pub fn new(token: u64, command: &Command) -> Self {
        Request {
            token,
            opcode: command.opcode(),
            args: command.args(),
        }
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

/// What the VM said in answer to a command
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Ok(String),
    Error { code: i64, message: String },
    // The token was readable but nothing after it was
    Unreadable(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    token: u64,
    outcome: Outcome,
}

impl Reply {
    pub fn new(token: u64, outcome: Outcome) -> Self {
        Reply { token, outcome }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn into_outcome(self) -> Outcome {
        self.outcome
    }
}

/// A line received from the VM
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    Reply(Reply),
    Event(Event),
    // Neither a reply nor an event we understand
    Malformed(String),
}

/// Decodes replies and events sent by the VM and encodes commands sent to it
///
/// Given a line of the form `#3 ok x.a|1|x.b|2` it decodes it into a `Reply` for the
/// command with token `3`, a line like `suspended 1 breakpoint 4` becomes an `Event`.
/// Commands are encoded as `#<token> <opcode> <args>`.
#[derive(Debug, Default)]
pub struct PdaCodec {}

impl PdaCodec {
    /// Constructor for creating a new PdaCodec
    pub fn new() -> Self {
        PdaCodec {}
    }
}

/// Work out what a single line is
pub fn classify_line(line: &str) -> Incoming {
    lazy_static! {
        static ref RE_REPLY: Regex = Regex::new("^#(\\d+)(?: (.*))?$").unwrap();
        static ref RE_OUTCOME_OK: Regex = Regex::new("^ok(?: (.*))?$").unwrap();
        static ref RE_OUTCOME_ERROR: Regex = Regex::new("^error (-?\\d+)(?: (.*))?$").unwrap();
    }

    if Event::is_event_line(line) {
        return match Event::parse(line) {
            Some(event) => Incoming::Event(event),
            None => Incoming::Malformed(line.to_string()),
        };
    }

    let cap = match RE_REPLY.captures(line) {
        Some(cap) => cap,
        None => return Incoming::Malformed(line.to_string()),
    };

    let token = match cap[1].parse::<u64>() {
        Ok(t) => t,
        Err(_) => return Incoming::Malformed(line.to_string()),
    };

    let body = cap.get(2).map(|m| m.as_str()).unwrap_or("");

    let outcome = if let Some(ok) = RE_OUTCOME_OK.captures(body) {
        Outcome::Ok(ok.get(1).map(|m| m.as_str()).unwrap_or("").to_string())
    } else if let Some(err) = RE_OUTCOME_ERROR.captures(body) {
        match err[1].parse::<i64>() {
            Ok(code) => Outcome::Error {
                code,
                message: err.get(2).map(|m| m.as_str()).unwrap_or("").to_string(),
            },
            Err(_) => Outcome::Unreadable(body.to_string()),
        }
    } else {
        Outcome::Unreadable(body.to_string())
    };

    Incoming::Reply(Reply::new(token, outcome))
}

impl Decoder for PdaCodec {
    type Item = Incoming;
    type Error = PdaError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let newline = match src.iter().position(|b| *b == b'\n') {
                Some(n) => n,
                None => return Ok(None),
            };

            let line = src.split_to(newline + 1);
            let line = String::from_utf8_lossy(&line[..newline]);
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                continue;
            }

            debug!("Received from VM: {}", line);

            return Ok(Some(classify_line(line)));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None => {
                if src.iter().all(|b| b.is_ascii_whitespace()) {
                    src.clear();
                    Ok(None)
                } else {
                    debug!(
                        "Stream ended mid-message: {}",
                        String::from_utf8_lossy(&src[..])
                    );
                    src.clear();
                    Err(PdaError::ConnectionClosed)
                }
            }
        }
    }
}

impl Encoder<Request> for PdaCodec {
    type Error = PdaError;

    fn encode(&mut self, req: Request, buf: &mut BytesMut) -> Result<()> {
        for arg in &req.args {
            if arg.contains('\n') || arg.contains('\r') {
                return Err(PdaError::InvalidArgument(format!(
                    "argument to '{}' contains a line break: {:?}",
                    req.opcode, arg
                )));
            }
        }

        let mut line = format!("#{} {}", req.token, req.opcode);
        for arg in &req.args {
            line.push(' ');
            line.push_str(arg);
        }
        line.push('\n');

        debug!("Sending to VM: {}", line.trim_end());

        buf.reserve(line.len());
        buf.put(line.as_bytes());

        Ok(())
    }
}
