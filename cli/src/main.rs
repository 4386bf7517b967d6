// cmld -- command-line front end for the Chameleon Mini live debugger.
// Talks to a real device over its USB serial port, or to a scripted mock
// transport for smoke-testing the wiring.
//
// Usage:
//   cmld --port /dev/ttyACM0 status
//   cmld --port /dev/ttyACM0 query VERSION?
//   cmld --port /dev/ttyACM0 exec "UID=04A1B2C3" --delay-ms 250
//   cmld --port /dev/ttyACM0 quick classic-1k
//   cmld --port /dev/ttyACM0 peripherals get
//   cmld --port /dev/ttyACM0 peripherals set lbutton -- "-- NONE --"
//   cmld --port /dev/ttyACM0 monitor --duration 60 --export-dir logs --format html
//   cmld --mock monitor --duration 2

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cmld::io::{
    ActionRunner, DeviceSession, Pacing, Peripheral, Prompter, QuickAction, SessionBuilder,
    StatusCache,
};
use cmld::log::{ExportFormat, LogCode, LogFrame, LogObserver, LogRecord, TickEncoding};
use cmld::{DeviceStatus, SessionEvent};
use cmld_test_harness::MockTransport;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// cmld -- drive a Chameleon Mini in live logging mode from the command line.
#[derive(Parser)]
#[command(name = "cmld", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyACM0, COM4).
    /// Required unless --mock is used.
    #[arg(long)]
    port: Option<String>,

    /// Override the default baud rate (115200).
    #[arg(long)]
    baud: Option<u32>,

    /// Number of 50ms slices a query waits for its reply.
    #[arg(long)]
    response_attempts: Option<u32>,

    /// Use a scripted mock transport instead of a real serial port.
    /// Useful for verifying CLI parsing and session wiring without hardware.
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh and print the device status.
    Status,

    /// Send a query and print the reply body.
    Query {
        /// Command text without terminator (e.g. VERSION?).
        command: String,
    },

    /// Send a command without waiting for its reply.
    Exec {
        /// Command text without terminator.
        command: String,

        /// Wait this long before sending.
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },

    /// Run a quick action (reader, sniffer, classic-1k, reset, firmware,
    /// onclick, "new event", ...).
    Quick {
        action: String,
    },

    /// Button and LED assignments.
    Peripherals {
        #[command(subcommand)]
        action: PeripheralAction,
    },

    /// Stream the live log until the duration elapses.
    Monitor {
        /// Duration in seconds (0 = run until interrupted).
        #[arg(long, default_value_t = 0)]
        duration: u64,

        /// Refresh the device status periodically while monitoring.
        #[arg(long)]
        poll_status: bool,

        /// Write the log to this directory when monitoring ends.
        #[arg(long)]
        export_dir: Option<PathBuf>,

        /// Export format.
        #[arg(long, default_value = "text", value_enum)]
        format: FormatArg,
    },
}

#[derive(Subcommand)]
enum PeripheralAction {
    /// Print every assignment.
    Get,
    /// Assign a function to one button or LED.
    Set {
        #[arg(value_parser = parse_peripheral)]
        peripheral: Peripheral,
        /// Function name; values starting with "--" clear the assignment.
        value: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Html,
    Binary,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => ExportFormat::Text,
            FormatArg::Html => ExportFormat::Html,
            FormatArg::Binary => ExportFormat::Binary,
        }
    }
}

fn parse_peripheral(s: &str) -> std::result::Result<Peripheral, String> {
    s.parse().map_err(|e: cmld::Error| e.to_string())
}

// ---------------------------------------------------------------------------
// Prompts and log output
// ---------------------------------------------------------------------------

/// Reads prompt answers from stdin. An empty line dismisses the prompt.
struct StdinPrompter;

#[async_trait]
impl Prompter for StdinPrompter {
    async fn prompt(&self, message: &str) -> Option<String> {
        let message = message.to_string();
        tokio::task::spawn_blocking(move || {
            print!("{message}");
            io::stdout().flush().ok();
            let mut input = String::new();
            io::stdin().read_line(&mut input).ok()?;
            let answer = input.trim().to_string();
            (!answer.is_empty()).then_some(answer)
        })
        .await
        .ok()
        .flatten()
    }
}

/// Prints each record as it is appended.
struct PrintRecords;

impl LogObserver for PrintRecords {
    fn record_appended(&self, record: &LogRecord) {
        println!("{record}");
    }
}

// ---------------------------------------------------------------------------
// Session setup
// ---------------------------------------------------------------------------

/// Fire-and-forget commands get no scripted reply, so that no stray
/// `100:OK` can be taken for the answer to a later query.
const SILENT: &[u8] = b"";

fn mock_text(body: &str) -> Vec<u8> {
    format!("101:OK WITH TEXT\r\n{body}\r\n").into_bytes()
}

fn mock_request(command: &str) -> Vec<u8> {
    cmld::io::protocol::encode_command(command)
}

/// Build a mock transport scripted for `command`.
fn mock_transport(command: &Command) -> MockTransport {
    let mut mock = MockTransport::new();
    mock.expect(&mock_request("CONFIG=ISO14443A_SNIFF"), SILENT);
    if !matches!(command, Command::Monitor { .. }) {
        mock.expect(&mock_request("LOGMODE=LIVE"), SILENT);
    }

    match command {
        Command::Status => {
            for (query, body) in [
                ("CONFIG?", "ISO14443A_SNIFF"),
                ("UID?", "04A1B2C3"),
                ("UIDSIZE?", "4"),
                ("MEMSIZE?", "1024"),
                ("LOGMEM?", "2048 (8 kB)"),
                ("SETTING?", "1"),
                ("FIELD?", "0"),
                ("READONLY?", "0"),
                ("CHARGING?", "FALSE"),
                ("THRESHOLD?", "400"),
                ("TIMEOUT?", "100 ms"),
            ] {
                mock.expect(&mock_request(query), &mock_text(body));
            }
        }
        Command::Query { command } => {
            mock.expect(&mock_request(command), &mock_text("MOCK"));
        }
        Command::Exec { command, .. } => {
            mock.expect(&mock_request(command), SILENT);
        }
        Command::Quick { action } => {
            if let Ok(action) = action.parse::<QuickAction>() {
                if let Some(cmd) = action.command() {
                    mock.expect(&mock_request(&cmd), SILENT);
                }
                if action == QuickAction::Reset {
                    mock.expect(&mock_request("CONFIG=ISO14443A_SNIFF"), SILENT);
                    mock.expect(&mock_request("LOGMODE=LIVE"), SILENT);
                }
            }
        }
        Command::Peripherals { action } => match action {
            PeripheralAction::Get => {
                for peripheral in Peripheral::ALL {
                    mock.expect(
                        &mock_request(&format!("{}?", peripheral.name())),
                        &mock_text("NONE"),
                    );
                }
            }
            PeripheralAction::Set { peripheral, value } => {
                let cmd = cmld::io::actions::peripheral_command(*peripheral, value);
                mock.expect(&mock_request(&cmd), SILENT);
            }
        },
        Command::Monitor { .. } => {
            let encoding = TickEncoding::default();
            let frames = [
                LogFrame {
                    code: LogCode::SnifferReaderData,
                    tick: 0x0100,
                    data: vec![0x26],
                },
                LogFrame {
                    code: LogCode::SnifferCardData,
                    tick: 0x0102,
                    data: vec![0x44, 0x00],
                },
                LogFrame {
                    code: LogCode::SnifferReaderData,
                    tick: 0x0110,
                    data: vec![0x93, 0x20],
                },
            ];
            // The stream starts once live logging is on.
            let encoded: Vec<Vec<u8>> = frames
                .iter()
                .map(|frame| frame.encode_with_tick(frame.tick, &encoding))
                .collect();
            let chunks: Vec<&[u8]> = encoded.iter().map(Vec::as_slice).collect();
            mock.expect_chunks(&mock_request("LOGMODE=LIVE"), &chunks);
        }
    }
    mock
}

/// Build the session and put the device into live logging mode.
async fn connect(cli: &Cli, observer: Option<Arc<dyn LogObserver>>) -> Result<Arc<DeviceSession>> {
    let mut builder = SessionBuilder::new();
    if let Some(baud) = cli.baud {
        builder = builder.baud_rate(baud);
    }
    if let Some(attempts) = cli.response_attempts {
        builder = builder.response_attempts(attempts);
    }
    if let Some(observer) = observer {
        builder = builder.log_observer(observer);
    }

    let session = if cli.mock {
        let session = builder
            .build_with_transport(Box::new(mock_transport(&cli.command)))
            .await
            .context("failed to build session with mock transport")?;
        println!("Connected (mock transport)");
        session
    } else {
        let port = cli
            .port
            .as_deref()
            .context("--port is required when not using --mock")?;
        let session = builder
            .serial_port(port)
            .build()
            .await
            .with_context(|| format!("failed to open serial port {port}"))?;
        println!("Connected to {port}");
        session
    };

    session
        .configure_live_logging()
        .await
        .context("failed to configure live logging")?;
    tracing::debug!(mock = cli.mock, "live logging configured");
    Ok(session)
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

fn print_status(status: &DeviceStatus) {
    println!("Device Status");
    println!("  Config:         {}", status.config);
    println!("  UID:            {} ({} bytes)", status.uid, status.uid_size);
    println!("  Memory:         {}", status.memory_summary());
    println!("  Flags:          {}", status.flags_summary());
    println!("  Threshold:      {} mV", status.threshold);
    println!("  Timeout:        {}", status.timeout);
}

async fn cmd_status(session: Arc<DeviceSession>) -> Result<()> {
    let cache = StatusCache::new(session);
    let status = cache.refresh().await.context("status refresh failed")?;
    print_status(&status);
    Ok(())
}

async fn cmd_query(session: &DeviceSession, command: &str) -> Result<()> {
    match session.query(command).await? {
        Some(reply) => println!("{}: {}", reply.code, reply.body),
        None => println!("No reply to {command}"),
    }
    Ok(())
}

async fn cmd_exec(session: &DeviceSession, command: &str, delay_ms: u64) -> Result<()> {
    let pacing = if delay_ms > 0 {
        Pacing::Delay(Duration::from_millis(delay_ms))
    } else {
        Pacing::Immediate
    };
    let result = session.execute(command, pacing).await?;
    println!("{command}: {result:?}");
    Ok(())
}

async fn cmd_quick(runner: &ActionRunner, action: &str) -> Result<()> {
    let action: QuickAction = action
        .parse()
        .with_context(|| format!("unknown quick action '{action}'"))?;
    match runner.run_quick(action).await? {
        Some(id) => println!("{action}: recorded as #{id}"),
        None => println!("{action}: done"),
    }
    Ok(())
}

async fn cmd_peripherals_get(runner: &ActionRunner) -> Result<()> {
    for (peripheral, value) in runner.query_peripherals().await? {
        println!("{:<14} {}", peripheral.name(), value);
    }
    Ok(())
}

async fn cmd_monitor(
    runner: &ActionRunner,
    duration_secs: u64,
    poll_status: bool,
    export_dir: Option<&PathBuf>,
    format: ExportFormat,
) -> Result<()> {
    let session = runner.session().clone();
    let mut event_rx = session.subscribe();

    let cancel = CancellationToken::new();
    let poller = poll_status
        .then(|| Arc::new(StatusCache::new(session.clone())).spawn_poller(cancel.clone()));

    println!("Monitoring live log (Ctrl-C to stop)...");

    let deadline = if duration_secs > 0 {
        Some(Instant::now() + Duration::from_secs(duration_secs))
    } else {
        None
    };

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        match tokio::time::timeout(timeout, event_rx.recv()).await {
            // Records are printed by the log observer.
            Ok(Ok(SessionEvent::RecordAppended { .. })) => {}
            Ok(Ok(SessionEvent::StatusUpdated(status))) => {
                println!("[status] {status}");
            }
            Ok(Ok(event)) => {
                println!("[event] {event:?}");
            }
            Ok(Err(RecvError::Lagged(n))) => {
                println!("[warning] missed {n} events (consumer too slow)");
            }
            Ok(Err(RecvError::Closed)) => {
                println!("Event channel closed.");
                break;
            }
            Err(_) => {
                if deadline.is_some() {
                    println!("Monitor duration elapsed.");
                }
                break;
            }
        }
    }

    cancel.cancel();
    if let Some(poller) = poller {
        poller.await.ok();
    }

    let log = session.log();
    println!(
        "{} records, {} dropped chunks",
        log.len(),
        log.dropped_frames()
    );

    if let Some(dir) = export_dir {
        let path = runner
            .export_to_dir(dir, format)
            .with_context(|| format!("failed to export log to {}", dir.display()))?;
        println!("Saved {}", path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cmld=info,cmld_io=info,cmld_transport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    let observer: Option<Arc<dyn LogObserver>> = match &cli.command {
        Command::Monitor { .. } => Some(Arc::new(PrintRecords)),
        _ => None,
    };
    let session = connect(&cli, observer).await?;
    let runner = ActionRunner::new(session.clone(), Arc::new(StdinPrompter));

    let result = match &cli.command {
        Command::Status => cmd_status(session.clone()).await,
        Command::Query { command } => cmd_query(&session, command).await,
        Command::Exec { command, delay_ms } => cmd_exec(&session, command, *delay_ms).await,
        Command::Quick { action } => cmd_quick(&runner, action).await,
        Command::Peripherals { action } => match action {
            PeripheralAction::Get => cmd_peripherals_get(&runner).await,
            PeripheralAction::Set { peripheral, value } => runner
                .set_peripheral(*peripheral, value)
                .await
                .map(|result| println!("{}: {result:?}", peripheral.name()))
                .map_err(anyhow::Error::from),
        },
        Command::Monitor {
            duration,
            poll_status,
            export_dir,
            format,
        } => {
            cmd_monitor(
                &runner,
                *duration,
                *poll_status,
                export_dir.as_ref(),
                (*format).into(),
            )
            .await
        }
    };

    session.shutdown().await.ok();
    result
}
