//! Reads `torrent-feed` output (title line, URL line) from stdin and adds each
//! torrent to Deluge.
//!
//! ```text
//! torrent-feed | deluge-dl -c config.json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use url::Url;

use torrent_feed::config::{Config, DEFAULT_CONFIG_PATH};
use torrent_feed::deluge::DelugeClient;
use torrent_feed::exit_code;
use torrent_feed::shutdown::Shutdown;

#[derive(Parser, Debug)]
#[command(name = "deluge-dl", version, about = "Add torrents read from stdin to Deluge")]
struct Args {
    /// Configuration file providing the Deluge endpoint and download path
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Echo the title/URL pairs instead of adding them
    #[arg(long)]
    just_print: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    torrent_feed::init_logging();
    let args = Args::parse();

    let shutdown = match Shutdown::install() {
        Ok(shutdown) => shutdown,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return ExitCode::from(exit_code::CONFIG);
        }
    };

    tokio::select! {
        biased;
        _ = shutdown.recv() => ExitCode::from(exit_code::INTERRUPTED),
        result = run(args) => match result {
            Ok(()) => ExitCode::from(exit_code::OK),
            Err(e) => {
                tracing::error!("{e:#}");
                ExitCode::from(exit_code::CONFIG)
            }
        },
    }
}

async fn run(args: Args) -> Result<()> {
    let mut input = BufReader::new(tokio::io::stdin());

    if args.just_print {
        let mut stdout = tokio::io::stdout();
        while let Some((title, url)) = next_pair(&mut input).await? {
            echo(&mut stdout, &title, &url).await?;
        }
        return Ok(());
    }

    let config = Config::load(&args.config)?;
    let dl_path = config.require_dl_path()?.to_path_buf();
    let mut client = DelugeClient::new(&config.deluge).context("Failed to build Deluge client")?;

    while let Some((title, url)) = next_pair(&mut input).await? {
        add(&mut client, &title, &url, &dl_path).await;
    }
    Ok(())
}

/// Next title/URL pair, or `None` at end of input. A trailing title without
/// its URL line is dropped.
async fn next_pair<R>(input: &mut R) -> Result<Option<(String, String)>>
where
    R: AsyncBufRead + Unpin,
{
    let mut title = String::new();
    if input.read_line(&mut title).await.context("Failed to read stdin")? == 0 {
        return Ok(None);
    }
    let mut url = String::new();
    if input.read_line(&mut url).await.context("Failed to read stdin")? == 0 {
        tracing::warn!(title = title.trim_end(), "Input ended between title and URL");
        return Ok(None);
    }
    Ok(Some((
        title.trim_end_matches(['\r', '\n']).to_string(),
        url.trim().to_string(),
    )))
}

async fn echo<W>(out: &mut W, title: &str, url: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(format!("{title}\n{url}\n").as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

/// Add one torrent. Failures are logged and the next pair is read.
async fn add(client: &mut DelugeClient, title: &str, url: &str, dl_path: &Path) {
    let url = match Url::parse(url) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(title = %title, url = %url, error = %e, "Skipping unparseable URL");
            return;
        }
    };

    match client.add_with_retry(&url, dl_path).await {
        Ok(torrent_id) => tracing::info!(
            title = %title,
            torrent_id = torrent_id.as_deref().unwrap_or("-"),
            "Added torrent to Deluge"
        ),
        Err(e) => tracing::error!(title = %title, url = %url, error = %e, "Failed to add torrent"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_pairs_read_until_eof() {
        let mut input: &[u8] = b"One\nhttp://t.example/1\r\nTwo\nhttp://t.example/2\n";
        let mut pairs = Vec::new();
        while let Some(pair) = next_pair(&mut input).await.unwrap() {
            pairs.push(pair);
        }
        assert_eq!(
            pairs,
            vec![
                ("One".to_string(), "http://t.example/1".to_string()),
                ("Two".to_string(), "http://t.example/2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_dangling_title_dropped() {
        let mut input: &[u8] = b"Alone\n";
        assert!(next_pair(&mut input).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_echo_reproduces_protocol() {
        let mut out = Vec::new();
        echo(&mut out, "One", "http://t.example/1").await.unwrap();
        assert_eq!(out, b"One\nhttp://t.example/1\n");
    }
}
