//! axaremote - command line control of AXA Remote window openers

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use axaremote_core::prelude::*;
use axaremote_core::protocol::serial::list_ports;

#[derive(Parser)]
#[command(name = "axaremote", version, about = "Control AXA Remote motorized window openers")]
struct Cli {
    /// Enable verbose protocol logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Talk to an opener on a local serial port
    Serial {
        /// Serial port, e.g. /dev/ttyUSB0
        port: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Talk to an opener behind a serial-to-network bridge
    #[command(alias = "telnet")]
    Bridge {
        /// Bridge hostname or address
        host: String,

        /// Bridge TCP port
        port: u16,

        #[command(flatten)]
        run: RunArgs,
    },

    /// List available serial ports
    Ports,

    /// Run against the built-in simulated opener
    Demo {
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args)]
struct RunArgs {
    /// What to do once connected
    #[arg(value_enum)]
    action: Action,

    /// For open/close: poll until the movement completes, showing progress
    #[arg(long)]
    wait: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Action {
    /// Report the device, firmware and current state
    Status,
    /// Open the window
    Open,
    /// Close the window
    Close,
    /// Stop the motor
    Stop,
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("axaremote=trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Commands::Ports => {
            let ports = list_ports();
            if ports.is_empty() {
                println!("no serial ports found");
            }
            for port in ports {
                match (port.vid, port.pid) {
                    (Some(vid), Some(pid)) => println!(
                        "{}  [{vid:04x}:{pid:04x}] {}",
                        port.name,
                        port.product.as_deref().unwrap_or("")
                    ),
                    _ => println!("{}", port.name),
                }
            }
            Ok(())
        }
        Commands::Serial { port, run } => execute(ConnectionConfig::serial(port), run),
        Commands::Bridge { host, port, run } => execute(ConnectionConfig::bridge(host, port), run),
        Commands::Demo { run } => {
            // Scale the poll cadence and wait deadline down along with the
            // simulated drive (full travel is about 9 s instead of 47 s).
            let mut config = ConnectionConfig::demo();
            config.poll_interval_ms = 250;
            config.wait_timeout_ms = 30_000;
            execute(config, run)
        }
    }
}

fn execute(config: ConnectionConfig, run: RunArgs) -> Result<()> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("failed to install Ctrl-C handler")?;

    let mut axa = AxaRemote::new(config);
    axa.connect().context("failed to connect")?;
    debug!("connected, running action");

    let result = perform(&mut axa, &run, &cancel);
    axa.disconnect();
    result
}

fn perform(axa: &mut AxaRemote, run: &RunArgs, cancel: &CancelToken) -> Result<()> {
    match run.action {
        Action::Status => {
            let state = axa.status().context("status query failed")?;
            println!("device  : {}", axa.device().unwrap_or("?"));
            println!("firmware: {}", axa.version().unwrap_or("?"));
            println!("state   : {state}");
            Ok(())
        }
        Action::Open => {
            axa.open().context("open command failed")?;
            println!("opening");
            if run.wait {
                await_target(axa, WaitTarget::Open, cancel)?;
            }
            Ok(())
        }
        Action::Close => {
            axa.close().context("close command failed")?;
            println!("closing");
            if run.wait {
                await_target(axa, WaitTarget::Closed, cancel)?;
            }
            Ok(())
        }
        Action::Stop => {
            axa.stop().context("stop command failed")?;
            println!("stopped");
            Ok(())
        }
    }
}

fn await_target(axa: &mut AxaRemote, target: WaitTarget, cancel: &CancelToken) -> Result<()> {
    use std::io::Write as _;

    let result = axa.wait_until_with(target, cancel, |state, position| {
        // The position estimate is only meaningful while the motor runs.
        if state.is_moving() {
            print!("{:9}: {position:5.1} %\r", state.to_string());
        } else {
            print!("{:9}\r", state.to_string());
        }
        let _ = std::io::stdout().flush();
    });
    println!();
    match result {
        Ok(state) => {
            println!("done, window is {state}");
            Ok(())
        }
        Err(ProtocolError::Cancelled) => {
            println!("interrupted, stopping the motor");
            axa.stop().context("stop after interrupt failed")?;
            Ok(())
        }
        Err(e) => Err(e).context("wait failed"),
    }
}
