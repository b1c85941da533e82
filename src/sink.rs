//! Downstream consumers of new announcements.
//!
//! [`LineSink`] writes the line protocol (title line, then URL line, flushed
//! per item) that `deluge-dl` and shell pipelines read from stdout.
//! [`crate::deluge::DelugeSink`] hands each URL to a Deluge daemon instead.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::deluge::DelugeError;

/// Failure to deliver one announcement.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("torrent daemon: {0}")]
    Deluge(#[from] DelugeError),
}

impl DeliveryError {
    /// The reader on the other end of the line protocol went away. Nothing
    /// later can be delivered either.
    pub fn is_closed(&self) -> bool {
        matches!(self, DeliveryError::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe)
    }
}

#[async_trait]
pub trait Sink: Send {
    async fn emit(&mut self, title: &str, url: &Url) -> Result<(), DeliveryError>;
}

/// What [`LineSink`] writes per announcement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmitMode {
    /// Title line followed by URL line.
    #[default]
    TitleAndUrl,
    TitleOnly,
}

pub struct LineSink<W> {
    writer: W,
    mode: EmitMode,
}

impl<W: AsyncWrite + Unpin + Send> LineSink<W> {
    pub fn new(writer: W, mode: EmitMode) -> Self {
        Self { writer, mode }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl LineSink<tokio::io::Stdout> {
    pub fn stdout(mode: EmitMode) -> Self {
        Self::new(tokio::io::stdout(), mode)
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Sink for LineSink<W> {
    async fn emit(&mut self, title: &str, url: &Url) -> Result<(), DeliveryError> {
        // One write per item keeps the pair together for line readers.
        let record = match self.mode {
            EmitMode::TitleAndUrl => format!("{}\n{}\n", single_line(title), url),
            EmitMode::TitleOnly => format!("{}\n", single_line(title)),
        };
        self.writer.write_all(record.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Line breaks inside a title would desynchronise the two-line protocol.
fn single_line(title: &str) -> String {
    title.split(['\r', '\n']).collect::<Vec<_>>().join(" ")
}
