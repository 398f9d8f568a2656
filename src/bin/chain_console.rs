//! Line-oriented console for a device chain.
//!
//! Reads commands from stdin and prints outcomes and the event stream.
//!
//! ```text
//! chain_console --sim 4
//! > servo 2 90
//! servo -> device 002: 90°: acknowledged
//! > demo 1
//! > cancel
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use led_chain::events::LineDirection;
use led_chain::hal::MockLink;
use led_chain::{ChainSession, Command, CommandKind, Config, DeviceAddress};

#[derive(Parser, Debug)]
#[command(name = "chain_console", version, long_about = None)]
struct Args {
    /// Serial port of the round-robin master
    #[cfg(feature = "serial")]
    #[arg(short, long, conflicts_with = "sim")]
    port: Option<String>,

    /// Baud rate
    #[cfg(feature = "serial")]
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Run against a simulated chain of N devices
    #[arg(long, value_name = "N")]
    sim: Option<u16>,

    /// Also serve the HTTP API on this port
    #[cfg(feature = "web")]
    #[arg(long)]
    http: Option<u16>,

    /// Print every wire line as it is sent or received
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

const HELP: &str = "\
commands:
  servo <dev> <degrees>   set servo angle (dev 0 = all)
  dac <dev> <mA>          set LED current (dev 0 = all)
  status [dev]            query the master
  reinit                  re-run discovery
  help                    ask the firmware for its help text
  demo <1|2|3>            start a demo (sweep, pulse, wave)
  cancel                  cancel the running demo
  state                   show session state
  reconnect               reopen the port
  quit                    exit";

/// One parsed console line.
enum Input {
    Submit(Command),
    Demo(u8),
    Cancel,
    State,
    Reconnect,
    Usage,
    Quit,
}

fn parse_number<T: std::str::FromStr>(token: Option<&str>, what: &str) -> Result<T> {
    let token = token.with_context(|| format!("missing {what}"))?;
    token
        .parse()
        .ok()
        .with_context(|| format!("invalid {what}: {token}"))
}

fn parse_input(line: &str) -> Result<Option<Input>> {
    let mut tokens = line.split_whitespace();
    let Some(word) = tokens.next() else {
        return Ok(None);
    };

    let input = match word.to_ascii_lowercase().as_str() {
        "quit" | "exit" => Input::Quit,
        "?" => Input::Usage,
        "state" => Input::State,
        "cancel" => Input::Cancel,
        "reconnect" => Input::Reconnect,
        "demo" => Input::Demo(parse_number(tokens.next(), "demo id")?),
        other => {
            let Some(kind) = CommandKind::from_text(other) else {
                bail!("unknown command '{other}' (type ? for usage)");
            };
            let target = match tokens.next() {
                Some(token) => DeviceAddress::device(parse_number(Some(token), "device")?),
                None if kind.takes_value() => bail!("missing device"),
                None => DeviceAddress::BROADCAST,
            };
            let value = if kind.takes_value() {
                Some(parse_number(tokens.next(), "value")?)
            } else {
                None
            };
            Input::Submit(Command::new(kind, target, value))
        }
    };
    Ok(Some(input))
}

fn connect(args: &Args) -> Result<ChainSession> {
    #[cfg(feature = "serial")]
    if let Some(port) = &args.port {
        let config = Config::default().with_serial(
            led_chain::config::SerialConfig::default()
                .with_port(port)
                .with_baud_rate(args.baud),
        );
        let connector = led_chain::hal::serial::SerialConnector::new(config.serial.clone());
        return Ok(ChainSession::connect(config, connector)?);
    }

    let devices = args.sim.unwrap_or(3);
    info!(devices, "using simulated chain");
    Ok(ChainSession::connect(
        Config::default(),
        MockLink::simulated(devices),
    )?)
}

async fn execute(session: &ChainSession, input: Input) -> bool {
    match input {
        Input::Submit(command) => match session.submit(command).await {
            Ok(outcome) => println!("{command}: {outcome}"),
            Err(err) => println!("{command}: {err}"),
        },
        Input::Demo(id) => match session.start_demo(id) {
            Ok(run) => {
                println!("demo '{}' started", run.name());
                tokio::spawn(async move {
                    if let Ok(report) = run.wait().await {
                        println!("demo {report}");
                    }
                });
            }
            Err(err) => println!("{err}"),
        },
        Input::Cancel => {
            if !session.cancel_demo() {
                println!("no demo running");
            }
        }
        Input::State => {
            let status = session.state();
            match status.fault {
                Some(fault) => println!("{} ({fault})", status.state),
                None => println!("{}, {} devices", status.state, status.device_count),
            }
        }
        Input::Reconnect => {
            if let Err(err) = session.reconnect().await {
                println!("{err}");
            }
        }
        Input::Usage => println!("{HELP}"),
        Input::Quit => return false,
    }
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("led_chain=info")),
        )
        .init();

    let args = Args::parse();
    let session = Arc::new(connect(&args)?);

    if args.verbose {
        let mut events = session.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                let arrow = match event.direction {
                    LineDirection::Tx => ">>",
                    LineDirection::Rx => "<<",
                    LineDirection::Local => "--",
                };
                println!("[{:>8} ms] {arrow} {}", event.at_ms, event.line);
            }
        });
    }

    #[cfg(feature = "web")]
    if let Some(port) = args.http {
        let config = led_chain::services::WebServerConfig::new(([0, 0, 0, 0], port));
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            if let Err(e) = led_chain::services::run_server(session, config).await {
                warn!(error = %e, "web server stopped");
            }
        });
    }

    match session.ready().await {
        Ok(status) => println!("chain ready: {} devices", status.device_count),
        Err(err) => warn!(error = %err, "chain not ready; try 'reconnect' or 'reinit'"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Ok(Some(input)) => {
                if !execute(&session, input).await {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => println!("{err}"),
        }
    }

    if let Ok(session) = Arc::try_unwrap(session) {
        session.shutdown().await;
    }
    Ok(())
}
