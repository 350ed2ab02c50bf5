//! PDA Debugger
//!
//! Console debugger for programs running in the PDA virtual machine.
//! Options supported:
//!   -p/--port    Port the VM's debug interface listens on
//!   -h/--host    Host the VM runs on, defaults to localhost
//!   -c/--config  Config setting in the form Key=Value, can be repeated
//!   --json       Print events and results as JSON lines
//!
//! Either attach to a VM that's already running in debug mode:
//! ```
//! pda -p 8000
//! ```
//! or give the VM command as an addendum to launch it with `-debug <port>` appended:
//! ```
//! pda -- pdavm program.pda
//! ```

use std::process::exit;

use clap::{App, Arg, ArgMatches};
use log::{error, info};
use tokio::runtime;

use pda_core::util;
use pda_core::{Config, Connection, DebugTarget, PdaError, Result};

mod console;

fn get_app_args<'a>() -> ArgMatches<'a> {
    App::new("PDA Debugger")
        .version("0.2.0")
        .author("Steven Trotter <stevetrot@gmail.com>")
        .about("A console debugger for the PDA virtual machine")
        .long_about("Attaches to, or launches, a PDA virtual machine in debug mode and lets you inspect and control the program it runs from the command line.")
        .arg(Arg::with_name("port")
                 .short("p")
                 .long("port")
                 .takes_value(true)
                 .help("specify the port the VM's debug interface is on"))
        .arg(Arg::with_name("host")
                 .short("h")
                 .long("host")
                 .takes_value(true)
                 .help("specify the host the VM runs on"))
        .arg(Arg::with_name("config")
                 .short("c")
                 .long("config")
                 .takes_value(true)
                 .multiple(true)
                 .number_of_values(1)
                 .help("set a config item, e.g. CommandTimeout=5000"))
        .arg(Arg::with_name("json")
                 .long("json")
                 .help("print events and results as JSON"))
        .arg(Arg::with_name("vm_cmd")
                 .multiple(true)
                 .takes_value(true))
        .get_matches()
}

fn get_config(args: &ArgMatches) -> Result<Config> {
    let mut config = Config::new();

    if let Some(settings) = args.values_of("config") {
        for setting in settings {
            if !config.apply_setting(setting) {
                return Err(PdaError::InvalidArgument(format!(
                    "Can't apply config setting '{}'",
                    setting
                )));
            }
        }
    }

    Ok(config)
}

fn get_port(args: &ArgMatches) -> Result<Option<u16>> {
    match args.value_of("port") {
        None => Ok(None),
        Some(s) => match s.parse::<u16>() {
            Ok(n) => Ok(Some(n)),
            Err(_) => Err(PdaError::InvalidArgument(format!(
                "Can't understand port '{}'",
                s
            ))),
        },
    }
}

async fn run(args: ArgMatches<'_>) -> Result<()> {
    let config = get_config(&args)?;
    let as_json = args.is_present("json");
    let host = args.value_of("host").unwrap_or("127.0.0.1");

    let vm_cmd: Vec<String> = match args.values_of("vm_cmd") {
        Some(values) => values.map(|x| x.to_string()).collect(),
        None => vec![],
    };

    let mut child = None;

    let port = match (get_port(&args)?, vm_cmd.is_empty()) {
        (None, true) => {
            return Err(PdaError::InvalidArgument(
                "Give either a port to attach to or a VM command to launch".to_string(),
            ))
        }
        (Some(port), true) => port,
        (port, false) => {
            let port = match port {
                Some(p) => p,
                None => util::get_unused_localhost_port()?,
            };

            let mut vm = util::spawn_vm(&vm_cmd, port)?;
            if let Some(stdout) = vm.stdout.take() {
                util::forward_lines(stdout, |line| println!("{}", line));
            }
            child = Some(vm);

            port
        }
    };

    let addr = format!("{}:{}", host, port);
    let connection = Connection::connect(&addr, &config).await?;
    let name = vm_cmd.last().cloned().unwrap_or_else(|| addr.clone());
    let target = DebugTarget::new(connection, &name);

    info!("Debugging {}", name);

    let result = console::run(target, as_json).await;

    if let Some(mut vm) = child {
        if let Ok(None) = vm.try_wait() {
            info!("Stopping PDA VM");
            let _ = vm.start_kill();
        }
    }

    result
}

fn main() {
    env_logger::init();

    let args = get_app_args();

    let rt = match runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("pda: can't start runtime: {}", e);
            exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(args)) {
        error!("{:?}", e);
        eprintln!("pda: {}", e);
        exit(1);
    }
}
