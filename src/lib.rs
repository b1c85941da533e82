//! Watches a torrent tracker's listing page or feed and reports each new
//! announcement exactly once.
//!
//! The pipeline is [`feed::Transport`] → [`feed::Extractor`] →
//! [`cache::DedupCache`] → [`sink::Sink`], driven by [`poller::Poller`].

pub mod cache;
pub mod config;
pub mod deluge;
pub mod feed;
pub mod poller;
pub mod shutdown;
pub mod sink;

/// Process exit statuses shared by both binaries.
pub mod exit_code {
    pub const OK: u8 = 0;
    pub const CONFIG: u8 = 1;
    pub const AUTH: u8 = 2;
    /// 128 + SIGINT, as shells report it.
    pub const INTERRUPTED: u8 = 130;
}

/// Route `tracing` output to stderr; stdout carries the line protocol.
///
/// Level comes from `RUST_LOG`, defaulting to `info`.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
