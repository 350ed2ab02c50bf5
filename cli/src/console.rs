//! Console
//!
//! Reads debugger commands a line at a time from stdin, runs them against the debug
//! target and prints the results. Events are printed as they arrive from a separate task.

use futures::StreamExt;
use log::{debug, error};
use serde_json::json;
use tokio::sync::oneshot;
use tokio_util::codec::{FramedRead, LinesCodec};

use pda_core::{
    DebugTarget, Event, PdaError, ResumeReason, SessionState, StackFrame, StopReason, Thread,
    ThreadId, ThreadState, Value, Variable,
};

const HELP: &str = "Commands:
  threads                         list threads
  frames <t>                      show the stack of thread t, top first
  vars <t> [frame]                variables of a frame, the top frame by default
  print <t> <frame> <name>        value of a variable
  children <t> <frame> <path>     children of a variable
  set <t> <frame> <name> <value>  change a variable
  eval <t> <expr...>              evaluate an expression
  data <t>                        operand stack of thread t
  resume [t] / suspend [t]        all threads or just t
  step <t> / stepreturn <t> / drop <t>
  break <line> [vm]               breakpoint, vm suspends every thread
  clear <line>                    remove a breakpoint
  watch <fn::var> [r][w]          watch reads and/or writes
  eventstop <name> on|off         suspend on a VM event
  state                           session and VM state
  help / exit";

/// A line typed at the console
#[derive(Clone, Debug, PartialEq)]
pub enum ConsoleCmd {
    Threads,
    Frames(ThreadId),
    Vars(ThreadId, Option<usize>),
    Print(ThreadId, usize, String),
    Children(ThreadId, usize, String),
    Set(ThreadId, usize, String, String),
    Eval(ThreadId, String),
    Data(ThreadId),
    Resume(Option<ThreadId>),
    Suspend(Option<ThreadId>),
    Step(ThreadId),
    StepReturn(ThreadId),
    Drop(ThreadId),
    Break(u64, bool),
    Clear(u64),
    Watch(String, bool, bool),
    EventStop(String, bool),
    State,
    Help,
    Exit,
}

fn get_number<T: std::str::FromStr>(what: &str, s: &str) -> Result<T, String> {
    s.parse::<T>()
        .map_err(|_| format!("Can't understand {} '{}', expected a number", what, s))
}

/// The rest of `line` after skipping `n` words, spaces inside it are kept
fn rest_after(line: &str, n: usize) -> String {
    let mut rest = line.trim_start();
    for _ in 0..n {
        rest = match rest.find(char::is_whitespace) {
            Some(i) => rest[i..].trim_start(),
            None => "",
        };
    }
    rest.trim_end().to_string()
}

/// Parse a console line, `Ok(None)` for a blank line
pub fn parse_line(line: &str) -> Result<Option<ConsoleCmd>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();

    let cmd = match words.as_slice() {
        [] => return Ok(None),
        ["threads"] => ConsoleCmd::Threads,
        ["frames", t] => ConsoleCmd::Frames(get_number("thread", t)?),
        ["vars", t] => ConsoleCmd::Vars(get_number("thread", t)?, None),
        ["vars", t, f] => {
            ConsoleCmd::Vars(get_number("thread", t)?, Some(get_number("frame", f)?))
        }
        ["print", t, f, name] => ConsoleCmd::Print(
            get_number("thread", t)?,
            get_number("frame", f)?,
            name.to_string(),
        ),
        ["children", t, f, path] => ConsoleCmd::Children(
            get_number("thread", t)?,
            get_number("frame", f)?,
            path.to_string(),
        ),
        ["set", t, f, name, _, ..] => ConsoleCmd::Set(
            get_number("thread", t)?,
            get_number("frame", f)?,
            name.to_string(),
            rest_after(line, 4),
        ),
        ["eval", t, _, ..] => ConsoleCmd::Eval(get_number("thread", t)?, rest_after(line, 2)),
        ["data", t] => ConsoleCmd::Data(get_number("thread", t)?),
        ["resume"] => ConsoleCmd::Resume(None),
        ["resume", t] => ConsoleCmd::Resume(Some(get_number("thread", t)?)),
        ["suspend"] => ConsoleCmd::Suspend(None),
        ["suspend", t] => ConsoleCmd::Suspend(Some(get_number("thread", t)?)),
        ["step", t] => ConsoleCmd::Step(get_number("thread", t)?),
        ["stepreturn", t] => ConsoleCmd::StepReturn(get_number("thread", t)?),
        ["drop", t] => ConsoleCmd::Drop(get_number("thread", t)?),
        ["break", l] => ConsoleCmd::Break(get_number("line", l)?, false),
        ["break", l, "vm"] => ConsoleCmd::Break(get_number("line", l)?, true),
        ["clear", l] => ConsoleCmd::Clear(get_number("line", l)?),
        ["watch", name] => ConsoleCmd::Watch(name.to_string(), true, true),
        ["watch", name, access] => {
            if access.is_empty() || !access.chars().all(|c| c == 'r' || c == 'w') {
                return Err(format!(
                    "Can't understand watch access '{}', expected r, w or rw",
                    access
                ));
            }
            ConsoleCmd::Watch(name.to_string(), access.contains('r'), access.contains('w'))
        }
        ["eventstop", name, "on"] => ConsoleCmd::EventStop(name.to_string(), true),
        ["eventstop", name, "off"] => ConsoleCmd::EventStop(name.to_string(), false),
        ["state"] => ConsoleCmd::State,
        ["help"] => ConsoleCmd::Help,
        ["exit"] => ConsoleCmd::Exit,
        _ => return Err(format!("Can't understand '{}', try 'help'", line.trim())),
    };

    Ok(Some(cmd))
}

/// What a command produced
#[derive(Debug)]
pub enum Output {
    Done,
    Threads(Vec<(ThreadId, Option<ThreadState>)>),
    Frames(Vec<StackFrame>),
    Variables(Vec<Variable>),
    Value(Value),
    Strings(Vec<String>),
    State(SessionState, String),
    Help,
}

fn variable_json(v: &Variable) -> serde_json::Value {
    let value = v.value();
    json!({
        "name": v.name(),
        "path": v.path(),
        "value": value.text(),
        "type": value.reference_type(),
    })
}

impl Output {
    pub fn render(&self, as_json: bool) -> String {
        if as_json {
            self.to_json().to_string()
        } else {
            self.to_text()
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Output::Done => json!({"result": "ok"}),
            Output::Threads(threads) => json!({
                "threads": threads
                    .iter()
                    .map(|(id, state)| json!({"id": id, "state": state}))
                    .collect::<Vec<_>>()
            }),
            Output::Frames(frames) => json!({
                "frames": frames
                    .iter()
                    .map(|f| {
                        let mut frame = json!(f.data());
                        frame["index"] = json!(f.index());
                        frame
                    })
                    .collect::<Vec<_>>()
            }),
            Output::Variables(vars) => json!({
                "variables": vars.iter().map(variable_json).collect::<Vec<_>>()
            }),
            Output::Value(value) => json!({
                "value": value.text(),
                "type": value.reference_type(),
            }),
            Output::Strings(strings) => json!({ "data": strings }),
            Output::State(session, vm) => json!({"session": session, "vm": vm}),
            Output::Help => json!({ "help": HELP }),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Output::Done => "ok".to_string(),
            Output::Threads(threads) => {
                if threads.is_empty() {
                    return "no threads".to_string();
                }
                threads
                    .iter()
                    .map(|(id, state)| match state {
                        Some(ThreadState::Suspended) => format!("thread {} (suspended)", id),
                        Some(ThreadState::Running) => format!("thread {} (running)", id),
                        None => format!("thread {}", id),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Output::Frames(frames) => frames
                .iter()
                .map(|f| {
                    format!(
                        "#{} {} at {}:{}",
                        f.index(),
                        f.function(),
                        f.file(),
                        f.line()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Output::Variables(vars) => {
                if vars.is_empty() {
                    return "no variables".to_string();
                }
                vars.iter()
                    .map(|v| {
                        let value = v.value();
                        format!("{} = {} ({})", v.name(), value, value.reference_type())
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Output::Value(value) => format!("{} ({})", value, value.reference_type()),
            Output::Strings(strings) => strings.join(" "),
            Output::State(session, vm) => format!("session {:?}, vm: {}", session, vm),
            Output::Help => HELP.to_string(),
        }
    }
}

pub fn render_event(event: &Event, as_json: bool) -> String {
    if as_json {
        return json!({ "event": event }).to_string();
    }

    match event {
        Event::Started { thread } => format!("thread {} started", thread),
        Event::Exited { thread } => format!("thread {} exited", thread),
        Event::Suspended { thread, reason } => {
            let reason = match reason {
                StopReason::Client => "by request".to_string(),
                StopReason::Step => "after step".to_string(),
                StopReason::Drop => "after drop to frame".to_string(),
                StopReason::Breakpoint(line) => format!("at breakpoint on line {}", line),
                StopReason::Watch { access, name } => format!("on {} of {}", access, name),
                StopReason::Event(name) => format!("on event {}", name),
                StopReason::Other(text) => text.clone(),
            };
            format!("thread {} suspended {}", thread, reason)
        }
        Event::Resumed { thread, reason } => match reason {
            ResumeReason::Other(text) => format!("thread {} resumed {}", thread, text),
            _ => format!("thread {} resumed", thread),
        },
        Event::Terminated => "terminated".to_string(),
        Event::Output { text } => text.clone(),
    }
}

async fn get_frame(
    target: &DebugTarget,
    thread: ThreadId,
    frame: Option<usize>,
) -> pda_core::Result<StackFrame> {
    let frames = thread_of(target, thread).stack_frames().await?;
    let found = match frame {
        Some(index) => frames.into_iter().find(|f| f.index() == index),
        None => frames.into_iter().next(),
    };
    found.ok_or_else(|| {
        PdaError::InvalidArgument(format!("thread {} has no frame {:?}", thread, frame))
    })
}

fn thread_of(target: &DebugTarget, thread: ThreadId) -> Thread {
    Thread::new(target.connection().clone(), thread)
}

/// Run a single command against the target
pub async fn execute(target: &DebugTarget, cmd: ConsoleCmd) -> pda_core::Result<Output> {
    let output = match cmd {
        ConsoleCmd::Threads => {
            let threads = target.threads().await?;
            Output::Threads(threads.iter().map(|t| (t.id(), t.state())).collect())
        }
        ConsoleCmd::Frames(t) => Output::Frames(thread_of(target, t).stack_frames().await?),
        ConsoleCmd::Vars(t, f) => {
            Output::Variables(get_frame(target, t, f).await?.variables().await?)
        }
        ConsoleCmd::Print(t, f, name) => {
            let var = get_frame(target, t, Some(f)).await?.variable(&name).await?;
            Output::Variables(vec![var])
        }
        ConsoleCmd::Children(t, f, path) => {
            let var = get_frame(target, t, Some(f)).await?.variable(&path).await?;
            Output::Variables(var.value().children().await?)
        }
        ConsoleCmd::Set(t, f, name, value) => {
            let var = get_frame(target, t, Some(f)).await?.variable(&name).await?;
            Output::Variables(vec![var.set_value(&value).await?])
        }
        ConsoleCmd::Eval(t, expression) => {
            Output::Value(thread_of(target, t).evaluate(&expression).await?)
        }
        ConsoleCmd::Data(t) => Output::Strings(thread_of(target, t).data_stack().await?),
        ConsoleCmd::Resume(None) => {
            target.resume().await?;
            Output::Done
        }
        ConsoleCmd::Resume(Some(t)) => {
            thread_of(target, t).resume().await?;
            Output::Done
        }
        ConsoleCmd::Suspend(None) => {
            target.suspend().await?;
            Output::Done
        }
        ConsoleCmd::Suspend(Some(t)) => {
            thread_of(target, t).suspend().await?;
            Output::Done
        }
        ConsoleCmd::Step(t) => {
            thread_of(target, t).step_over().await?;
            Output::Done
        }
        ConsoleCmd::StepReturn(t) => {
            thread_of(target, t).step_return().await?;
            Output::Done
        }
        ConsoleCmd::Drop(t) => {
            thread_of(target, t).drop_to_frame().await?;
            Output::Done
        }
        ConsoleCmd::Break(line, stop_vm) => {
            target.set_breakpoint(line, stop_vm).await?;
            Output::Done
        }
        ConsoleCmd::Clear(line) => {
            target.clear_breakpoint(line).await?;
            Output::Done
        }
        ConsoleCmd::Watch(name, read, write) => {
            target.watch(&name, read, write).await?;
            Output::Done
        }
        ConsoleCmd::EventStop(name, enabled) => {
            target.event_stop(&name, enabled).await?;
            Output::Done
        }
        ConsoleCmd::State => Output::State(target.state(), target.vm_state().await?),
        ConsoleCmd::Help => Output::Help,
        ConsoleCmd::Exit => {
            target.terminate().await?;
            Output::Done
        }
    };

    Ok(output)
}

fn print_error(msg: &str, as_json: bool) {
    if as_json {
        println!("{}", json!({ "error": msg }));
    } else {
        println!("error: {}", msg);
    }
}

/// Run the console until stdin ends or the session terminates
pub async fn run(target: DebugTarget, as_json: bool) -> pda_core::Result<()> {
    let (_, mut events) = target.connection().subscribe();
    let (terminated_tx, mut terminated_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let mut terminated_tx = Some(terminated_tx);
        while let Some(event) = events.recv().await {
            println!("{}", render_event(&event, as_json));
            if event == Event::Terminated {
                if let Some(tx) = terminated_tx.take() {
                    let _ = tx.send(());
                }
                break;
            }
        }
    });

    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());

    loop {
        let line = tokio::select! {
            _ = &mut terminated_rx => {
                debug!("Session terminated, stopping console");
                return Ok(());
            }
            line = lines.next() => line,
        };

        let line = match line {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                error!("Can't read from stdin: {}", e);
                break;
            }
            None => break,
        };

        let cmd = match parse_line(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(msg) => {
                print_error(&msg, as_json);
                continue;
            }
        };

        let exiting = cmd == ConsoleCmd::Exit;

        match execute(&target, cmd).await {
            Ok(output) => println!("{}", output.render(as_json)),
            Err(e) => {
                print_error(&e.to_string(), as_json);
                if e.is_fatal() {
                    return Err(e);
                }
            }
        }

        if exiting {
            return Ok(());
        }
    }

    debug!("Stdin finished, terminating target");
    if !target.is_terminated() {
        target.terminate().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_simple_commands() {
        assert_eq!(parse_line("threads").unwrap(), Some(ConsoleCmd::Threads));
        assert_eq!(parse_line("  ").unwrap(), None);
        assert_eq!(parse_line("frames 2").unwrap(), Some(ConsoleCmd::Frames(2)));
        assert_eq!(parse_line("vars 1").unwrap(), Some(ConsoleCmd::Vars(1, None)));
        assert_eq!(
            parse_line("vars 1 0").unwrap(),
            Some(ConsoleCmd::Vars(1, Some(0)))
        );
        assert_eq!(parse_line("resume").unwrap(), Some(ConsoleCmd::Resume(None)));
        assert_eq!(
            parse_line("suspend 3").unwrap(),
            Some(ConsoleCmd::Suspend(Some(3)))
        );
        assert_eq!(parse_line("exit").unwrap(), Some(ConsoleCmd::Exit));
    }

    #[test]
    fn check_rest_of_line_arguments() {
        assert_eq!(
            parse_line("eval 1 push 2   push 3 add").unwrap(),
            Some(ConsoleCmd::Eval(1, "push 2   push 3 add".to_string()))
        );
        assert_eq!(
            parse_line("set 1 0 x hello world").unwrap(),
            Some(ConsoleCmd::Set(
                1,
                0,
                "x".to_string(),
                "hello world".to_string()
            ))
        );
    }

    #[test]
    fn check_breakpoint_and_watch_commands() {
        assert_eq!(
            parse_line("break 12").unwrap(),
            Some(ConsoleCmd::Break(12, false))
        );
        assert_eq!(
            parse_line("break 12 vm").unwrap(),
            Some(ConsoleCmd::Break(12, true))
        );
        assert_eq!(
            parse_line("watch inc::n w").unwrap(),
            Some(ConsoleCmd::Watch("inc::n".to_string(), false, true))
        );
        assert_eq!(
            parse_line("watch inc::n").unwrap(),
            Some(ConsoleCmd::Watch("inc::n".to_string(), true, true))
        );
        assert!(parse_line("watch inc::n x").is_err());
        assert_eq!(
            parse_line("eventstop unimpinstr off").unwrap(),
            Some(ConsoleCmd::EventStop("unimpinstr".to_string(), false))
        );
    }

    #[test]
    fn check_bad_commands() {
        assert!(parse_line("frames one").is_err());
        assert!(parse_line("frames").is_err());
        assert!(parse_line("bogus").is_err());
        assert!(parse_line("eval 1").is_err());
    }

    #[test]
    fn check_event_rendering() {
        let event = Event::Suspended {
            thread: 1,
            reason: StopReason::Breakpoint(4),
        };
        assert_eq!(
            render_event(&event, false),
            "thread 1 suspended at breakpoint on line 4"
        );

        let rendered: serde_json::Value =
            serde_json::from_str(&render_event(&event, true)).unwrap();
        assert_eq!(rendered["event"]["kind"], "suspended");
        assert_eq!(rendered["event"]["thread"], 1);
    }

    #[test]
    fn check_output_rendering() {
        let output = Output::Value(Value::detached("42"));
        assert_eq!(output.render(false), "42 (integer)");

        let rendered: serde_json::Value = serde_json::from_str(&output.render(true)).unwrap();
        assert_eq!(rendered["type"], "integer");

        let output = Output::Threads(vec![(1, Some(ThreadState::Suspended)), (2, None)]);
        assert_eq!(output.render(false), "thread 1 (suspended)\nthread 2");

        assert_eq!(Output::Strings(vec![]).render(true), r#"{"data":[]}"#);
    }
}
