//! Utilities
//!
//! Various simple utilities for use in PDA

use std::env;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{PdaError, Result};

use futures::StreamExt;
use log::{debug, info, warn};
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};

/// Lock a mutex, carrying on with the data if another thread panicked while holding it
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Get an unused port on the local system and return it. This port
/// can subsequently be used.
pub fn get_unused_localhost_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Find out the full path of a file based on the PATH environment variable.
pub fn get_file_full_path(cmd: &str) -> String {
    env::var_os("PATH")
        .and_then(|paths| {
            env::split_paths(&paths)
                .map(|dir| dir.join(cmd))
                .find(|path| path.is_file())
        })
        .unwrap_or_else(|| PathBuf::from(cmd))
        .to_string_lossy()
        .to_string()
}

/// Return true if the path specified exists.
pub fn file_exists(path: &str) -> bool {
    Path::new(path).exists()
}

/// Start the PDA VM in debug mode listening on `port`.
///
/// `vm_cmd` is the program followed by its arguments, `-debug <port>` is appended. The
/// program is looked up on the PATH when it isn't a path to an existing file. Stdout is
/// piped so the caller can forward it, the child is killed if dropped.
pub fn spawn_vm(vm_cmd: &[String], port: u16) -> Result<Child> {
    let program = match vm_cmd.first() {
        Some(p) => p,
        None => {
            return Err(PdaError::InvalidArgument(
                "no PDA VM command given".to_string(),
            ))
        }
    };

    let program = if file_exists(program) {
        program.clone()
    } else {
        get_file_full_path(program)
    };

    if !file_exists(&program) {
        return Err(PdaError::InvalidArgument(format!(
            "can't launch PDA VM as {} does not exist",
            program
        )));
    }

    let port = port.to_string();
    let mut args: Vec<&str> = vm_cmd[1..].iter().map(|a| &a[..]).collect();
    args.push("-debug");
    args.push(&port);

    info!("Launching PDA VM: {} {}", program, args.join(" "));

    let child = Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    Ok(child)
}

/// Read `reader` line by line on a new task, handing each line to `on_line`
pub fn forward_lines<R, F>(reader: R, mut on_line: F) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    F: FnMut(String) + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = FramedRead::new(reader, LinesCodec::new());
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => on_line(line),
                Err(e) => {
                    warn!("Stopped forwarding output: {}", e);
                    break;
                }
            }
        }
        debug!("Output forwarding finished");
    })
}
