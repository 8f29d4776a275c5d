// cmdlink test application -- CLI tool for exercising a line-oriented
// serial device through the cmdlink request queue, against real hardware
// or a scripted mock device.
//
// Usage:
//   cmdlink-cli --port /dev/ttyUSB0 send getTemp --success '^Temp: .+$'
//   cmdlink-cli --port /dev/ttyACM0 --baud 115200 send-hex '02 10 03' --success '^ACK$'
//   cmdlink-cli --port /dev/ttyUSB0 capture 'AA 55' --interval-ms 20
//   cmdlink-cli --port /dev/ttyUSB0 --unsolicited '^BOOT' monitor --duration-secs 30
//   cmdlink-cli --mock --verbose send getTemp --success '^Temp:'

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cmdlink::regex::Regex;
use cmdlink::{
    format_hex, parse_hex, CaptureRequest, CommandRequest, LinkBuilder, LinkEvent, LinkIo,
};
use cmdlink_test_harness::{MockHandle, MockTransport};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// cmdlink test application -- send correlated commands to a serial device.
#[derive(Parser)]
#[command(name = "cmdlink-cli", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyUSB0, COM3).
    /// Required unless --mock is used.
    #[arg(long)]
    port: Option<String>,

    /// Baud rate.
    #[arg(long, default_value_t = 9600)]
    baud: u32,

    /// Line delimiter for inbound data and terminator for text writes.
    /// Accepts the escapes \n, \r and \t.
    #[arg(long, default_value = "\\n")]
    delimiter: String,

    /// Pattern for lines the device sends on its own. Matching lines are
    /// printed and never reach a request. May be given more than once.
    #[arg(long)]
    unsolicited: Vec<String>,

    /// Use a scripted mock device instead of a real serial port.
    #[arg(long)]
    mock: bool,

    /// Print the link's log event stream.
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Matching options shared by `send` and `send-hex`.
#[derive(clap::Args)]
struct MatchArgs {
    /// Pattern for the line that completes the request.
    #[arg(long)]
    success: String,

    /// Pattern for a line that fails the request.
    #[arg(long)]
    error: Option<String>,

    /// Pattern for lines to collect into the response (default: any
    /// non-empty line).
    #[arg(long)]
    buffer: Option<String>,

    /// Request timeout in milliseconds; 0 waits forever.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Send a text command and print the collected response.
    Send {
        text: String,
        #[command(flatten)]
        matching: MatchArgs,
    },
    /// Send raw bytes (hex) and print the collected text response.
    SendHex {
        hex: String,
        #[command(flatten)]
        matching: MatchArgs,
    },
    /// Send raw bytes (hex) and capture the binary reply.
    Capture {
        hex: String,
        /// Quiet interval that ends the capture.
        #[arg(long, default_value_t = 20)]
        interval_ms: u64,
        /// Stop capturing after this many bytes.
        #[arg(long)]
        max_size: Option<usize>,
    },
    /// Print unsolicited and unexpected data for a while.
    Monitor {
        #[arg(long, default_value_t = 10)]
        duration_secs: u64,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Expand `\n`, `\r` and `\t` escapes typed on the command line.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("invalid pattern {pattern:?}"))
}

fn build_command(request: CommandRequest, matching: &MatchArgs) -> Result<CommandRequest> {
    let mut request = request;
    if let Some(error) = &matching.error {
        request = request.with_error(compile(error)?);
    }
    if let Some(buffer) = &matching.buffer {
        request = request.with_buffer(compile(buffer)?);
    }
    if let Some(ms) = matching.timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }
    Ok(request)
}

/// Print every event until the channel closes.
fn spawn_event_printer(link: &LinkIo, verbose: bool) {
    let mut events = link.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                LinkEvent::Log(record) if verbose => {
                    eprintln!("[{}] {}", record.level, record.message);
                }
                LinkEvent::Log(_) => {}
                LinkEvent::UnexpectedData(data) => println!("unexpected: {data}"),
                LinkEvent::Opened if verbose => eprintln!("link opened"),
                LinkEvent::Closed => eprintln!("link closed"),
                LinkEvent::Opened => {}
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Mock device
// ---------------------------------------------------------------------------

/// Script a small demo device that echoes text commands and answers them.
fn script_mock_device(handle: &MockHandle, command: &Command, terminator: &str) -> Result<()> {
    let t = terminator;
    match command {
        Command::Send { text, .. } => {
            let answer = if text == "getTemp" {
                "Temp: 23.22".to_string()
            } else {
                format!("OK {text}")
            };
            let reply = format!("{text}{t}Received: {text}{t}{answer}{t}");
            handle.expect(format!("{text}{t}").as_bytes(), reply.as_bytes());
        }
        Command::SendHex { hex, .. } => {
            handle.expect(&parse_hex(hex)?, format!("ACK{t}").as_bytes());
        }
        Command::Capture { hex, .. } => {
            // A newline in the middle shows the reply is not line-framed.
            handle.expect(&parse_hex(hex)?, &[0xDE, 0xAD, 0x0A, 0xBE, 0xEF]);
        }
        Command::Monitor { .. } => {
            let device = handle.clone();
            let t = t.to_string();
            tokio::spawn(async move {
                device.push_inbound(format!("BOOT cmdlink-demo v1.0{t}").as_bytes());
                let mut n = 0u32;
                loop {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    n += 1;
                    device.push_inbound(format!("STATUS uptime={n}{t}").as_bytes());
                }
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Link construction
// ---------------------------------------------------------------------------

async fn create_link(cli: &Cli) -> Result<LinkIo> {
    let delimiter = unescape(&cli.delimiter);
    let mut builder = LinkBuilder::new()
        .baud_rate(cli.baud)
        .delimiter(&delimiter)
        .line_terminator(&delimiter);

    for pattern in &cli.unsolicited {
        compile(pattern)?;
        builder = builder.on_unsolicited(pattern, |line: &str| println!("unsolicited: {line}"));
    }

    if cli.mock {
        let mock = MockTransport::new();
        script_mock_device(&mock.handle(), &cli.command, &delimiter)?;
        let link = builder
            .build_with_transport(Box::new(mock))
            .await
            .context("failed to build link with mock transport")?;
        println!("Connected (mock transport)");
        Ok(link)
    } else {
        let port = cli
            .port
            .as_deref()
            .context("--port is required when not using --mock")?;
        let link = builder
            .serial_port(port)
            .build()
            .await
            .with_context(|| format!("failed to open {port}"))?;
        println!("Connected to {port} at {} baud", cli.baud);
        Ok(link)
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_send(link: &LinkIo, text: &str, matching: &MatchArgs) -> Result<()> {
    let request = CommandRequest::text(text, compile(&matching.success)?);
    let request = build_command(request, matching)?;
    let reply = link.submit(request).await.context("request failed")?;
    println!("{reply}");
    Ok(())
}

async fn cmd_send_hex(link: &LinkIo, hex: &str, matching: &MatchArgs) -> Result<()> {
    let bytes = parse_hex(hex)?;
    let request = CommandRequest::binary(bytes, compile(&matching.success)?);
    let request = build_command(request, matching)?;
    let reply = link.submit(request).await.context("request failed")?;
    println!("{reply}");
    Ok(())
}

async fn cmd_capture(
    link: &LinkIo,
    hex: &str,
    interval_ms: u64,
    max_size: Option<usize>,
) -> Result<()> {
    let mut request = CaptureRequest::new(parse_hex(hex)?, Duration::from_millis(interval_ms));
    if let Some(max) = max_size {
        request = request.with_max_size(max);
    }
    let chunk = link
        .submit_capture(request)
        .await
        .context("capture failed")?;
    println!("{} bytes: {}", chunk.len(), format_hex(&chunk));
    Ok(())
}

async fn cmd_monitor(duration_secs: u64) -> Result<()> {
    println!("Monitoring for {duration_secs}s (Ctrl-C to stop)...");
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(duration_secs)) => {}
        _ = tokio::signal::ctrl_c() => println!(),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let link = create_link(&cli).await?;
    spawn_event_printer(&link, cli.verbose);

    let result = match &cli.command {
        Command::Send { text, matching } => cmd_send(&link, text, matching).await,
        Command::SendHex { hex, matching } => cmd_send_hex(&link, hex, matching).await,
        Command::Capture {
            hex,
            interval_ms,
            max_size,
        } => cmd_capture(&link, hex, *interval_ms, *max_size).await,
        Command::Monitor { duration_secs } => cmd_monitor(*duration_secs).await,
    };

    link.shutdown().await.ok();
    result
}
