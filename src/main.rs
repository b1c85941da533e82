use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use torrent_feed::config::{Config, DEFAULT_CONFIG_PATH};
use torrent_feed::deluge::{DelugeClient, DelugeSink};
use torrent_feed::exit_code;
use torrent_feed::feed::{Extractor, HttpTransport};
use torrent_feed::poller::{PollError, Poller, RunExit};
use torrent_feed::shutdown::Shutdown;
use torrent_feed::sink::{EmitMode, LineSink, Sink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkKind {
    /// Title and URL lines on stdout
    Stdout,
    /// Add each torrent to a Deluge daemon
    Deluge,
}

#[derive(Parser, Debug)]
#[command(
    name = "torrent-feed",
    version,
    about = "Print new announcements from a torrent tracker as they appear"
)]
struct Args {
    /// Configuration file (JSON, or TOML when the name ends in .toml)
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print only titles
    #[arg(short, long)]
    title_only: bool,

    /// Where new announcements go
    #[arg(long, value_enum, default_value_t = SinkKind::Stdout)]
    sink: SinkKind,
}

#[tokio::main]
async fn main() -> ExitCode {
    torrent_feed::init_logging();
    let args = Args::parse();

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(exit_code::CONFIG)
        }
    }
}

/// Startup failures come back as `Err`; everything after startup is an exit code.
async fn run(args: Args) -> Result<u8> {
    let config = Config::load(&args.config)?;

    let transport = HttpTransport::new(&config.parser).context("Failed to build HTTP client")?;
    let extractor = Extractor::new(&config.parser)?;
    let shutdown = Shutdown::install().context("Failed to install signal handlers")?;

    match args.sink {
        SinkKind::Stdout => {
            let mode = if args.title_only {
                EmitMode::TitleOnly
            } else {
                EmitMode::TitleAndUrl
            };
            let poller = Poller::new(&config, transport, extractor, LineSink::stdout(mode));
            Ok(drive(poller, shutdown).await)
        }
        SinkKind::Deluge => {
            let dl_path = config.require_dl_path()?.to_path_buf();
            let client =
                DelugeClient::new(&config.deluge).context("Failed to build Deluge client")?;
            let poller = Poller::new(&config, transport, extractor, DelugeSink::new(client, dl_path));
            Ok(drive(poller, shutdown).await)
        }
    }
}

async fn drive<S: Sink>(mut poller: Poller<HttpTransport, S>, shutdown: Shutdown) -> u8 {
    tracing::info!("Watching for new announcements");

    match poller.run(shutdown.recv()).await {
        Ok(RunExit::Interrupted) => exit_code::INTERRUPTED,
        Ok(RunExit::SinkClosed) => exit_code::OK,
        Err(e @ PollError::Auth(_)) => {
            tracing::error!(error = %e, "Refusing to poll, refresh the session cookies");
            exit_code::AUTH
        }
    }
}
