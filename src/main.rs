//! mapipe - pipe bytes between two endpoints
//!
//! Listens on or dials two addresses (TCP, Unix sockets, or the process's own
//! stdio) and relays bytes between the resulting connections.

mod trace_files;

use anyhow::{Context, Result};
use clap::Parser;
use mapipe_lib::{
    parse_bandwidth, Address, Endpoints, Mode, PipeOptions, Relay, TraceChannel, TraceSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::sync::CancellationToken;
use trace_files::TraceFiles;
use tracing::{debug, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXAMPLES: &str = r#"MODES:
  listen <listen-addr1> <listen-addr2>  accept one connection on each and pipe them
  dial <dial-addr1> <dial-addr2>        dial both and pipe them
  fwd <listen-addr> <dial-addr>         accept one connection, dial the other, pipe them
  proxy <listen-addr>                   accept one connection, read a destination
                                        address line from it, dial that, pipe them

EXAMPLES:
  # listen on two addresses, accept one connection each, and pipe them
  mapipe listen /ip4/127.0.0.1/tcp/1234 /ip4/127.0.0.1/tcp/1235

  # listen on an ephemeral port and forward to a local service
  mapipe fwd /ip4/0.0.0.0/tcp/0 /ip4/127.0.0.1/tcp/1234

  # pipe this process's stdio to a remote service
  mapipe fwd /unix/stdio /dns4/example.com/tcp/80

  # inspect the connection on stdio
  mapipe --tee fwd /ip4/0.0.0.0/tcp/0 /ip4/127.0.0.1/tcp/1234

  # throttle each direction to 1 MB/s
  mapipe --bandwidth 1MB/s listen /ip4/127.0.0.1/tcp/1234 /ip4/127.0.0.1/tcp/1235
"#;

/// Pipe bytes between two endpoints
#[derive(Parser, Debug)]
#[command(name = "mapipe")]
#[command(about = "Pipe bytes between two endpoints", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
#[command(disable_version_flag = true)]
#[command(after_help = EXAMPLES)]
struct Cli {
    /// Relay mode: listen, dial, fwd or proxy
    mode: String,

    /// Addresses for the mode, e.g. /ip4/127.0.0.1/tcp/1234 or /unix/stdio
    #[arg(required = true)]
    addrs: Vec<Address>,

    /// Save a trace of the connection to this directory
    #[arg(short, long, env = "MAPIPE_TRACE_DIR")]
    trace: Option<PathBuf>,

    /// Tee the connection to stdio
    #[arg(short = 'e', long)]
    tee: bool,

    /// Bandwidth cap per direction (e.g. 1MB/s, 10KBps)
    #[arg(long, env = "MAPIPE_BANDWIDTH", value_parser = parse_bandwidth)]
    bandwidth: Option<u64>,

    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Print version
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    version: (),
}

#[tokio::main]
async fn main() {
    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let code = if e.use_stderr() { 1 } else { 0 };
        let _ = e.print();
        std::process::exit(code);
    });

    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            debug!("Exiting with error: {:#}", e);
            1
        }
    };

    // A pending stdin read sits on a blocking thread that cannot be
    // cancelled, so exit without waiting for the runtime to shut down.
    std::process::exit(code);
}

/// Open trace outputs, run the relay, and report its outcome on the control channel
async fn run(cli: Cli) -> Result<()> {
    let files = match &cli.trace {
        Some(dir) => match TraceFiles::create(dir).await {
            Ok(files) => Some(files),
            Err(e) => {
                eprintln!("error: {:#}", e);
                return Err(e);
            }
        },
        None => None,
    };

    let signal_ctl = match &files {
        Some(files) => Some(
            files
                .ctl
                .try_clone()
                .await
                .context("Failed to duplicate control trace file")?,
        ),
        None => None,
    };
    let mut trace = build_trace(cli.tee, files);

    let cancel = CancellationToken::new();
    spawn_signal_watcher(control_channel(cli.tee, signal_ctl), cancel.clone());

    let options = PipeOptions {
        bandwidth: cli.bandwidth.unwrap_or(0),
    };
    let relay = Relay::new(Arc::new(Endpoints::new()), options);

    let result = match Mode::from_args(&cli.mode, cli.addrs) {
        Ok(mode) => relay.run(&mode, &mut trace, &cancel).await,
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        trace.control(format!("error: {}", e)).await;
    }
    result.map_err(Into::into)
}

/// Wire the trace channels: stderr control by default, stdio mirrors with
/// `--tee`, and trace files replacing the payload mirrors with `--trace`.
fn build_trace(tee: bool, files: Option<TraceFiles>) -> TraceSink {
    match files {
        Some(files) => TraceSink::new(
            control_channel(tee, Some(files.ctl)),
            TraceChannel::to(files.a2b),
            TraceChannel::to(files.b2a),
        ),
        None if tee => TraceSink::new(
            control_channel(tee, None),
            TraceChannel::discard().tee_prefixed("> ", tokio::io::stdout()),
            TraceChannel::discard().tee_prefixed("< ", tokio::io::stdout()),
        ),
        None => TraceSink::new(
            control_channel(tee, None),
            TraceChannel::discard(),
            TraceChannel::discard(),
        ),
    }
}

fn control_channel(tee: bool, ctl: Option<File>) -> TraceChannel {
    let channel = if tee {
        TraceChannel::discard().tee_prefixed("# ", tokio::io::stderr())
    } else {
        TraceChannel::to(tokio::io::stderr())
    };

    match ctl {
        Some(file) => channel.tee(file),
        None => channel,
    }
}

/// Cancel `cancel` on SIGPIPE or Ctrl-C, announcing it on `control` first
fn spawn_signal_watcher(mut control: TraceChannel, cancel: CancellationToken) {
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        control
            .line(format!("received {}, closing...", signal))
            .await;
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::pipe()) {
        Ok(mut pipe) => tokio::select! {
            _ = pipe.recv() => "SIGPIPE",
            _ = tokio::signal::ctrl_c() => "SIGINT",
        },
        Err(e) => {
            warn!("Failed to install SIGPIPE handler: {}", e);
            tokio::signal::ctrl_c().await.ok();
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    tokio::signal::ctrl_c().await.ok();
    "SIGINT"
}

/// Logs go to stderr so stdout stays free for piped payload
fn init_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
