use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderValue, CONTENT_TYPE, COOKIE};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::ParserConfig;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur while fetching the feed.
///
/// Every variant is recoverable from the poller's point of view except
/// [`FetchError::HttpStatus`] on the very first fetch, which means the
/// session cookies are no good.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code (redirects are not followed)
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request plus body read exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    /// Connection resets are routine with keep-alive trackers and are only
    /// worth a debug line.
    pub fn is_connection_reset(&self) -> bool {
        let FetchError::Network(err) = self else {
            return false;
        };
        let mut source = Some(err as &(dyn std::error::Error + 'static));
        while let Some(e) = source {
            if let Some(io) = e.downcast_ref::<std::io::Error>() {
                if io.kind() == std::io::ErrorKind::ConnectionReset {
                    return true;
                }
            }
            source = e.source();
        }
        false
    }
}

/// A successfully fetched (2xx) response body.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl Page {
    /// Body decoded to UTF-8.
    ///
    /// Honours a BOM, then the Content-Type charset, then a `<meta>` charset
    /// near the top of the document; otherwise assumes UTF-8. Undecodable
    /// bytes become U+FFFD rather than failing the page.
    pub fn text(&self) -> String {
        let encoding = encoding_rs::Encoding::for_bom(&self.body)
            .map(|(enc, _)| enc)
            .or_else(|| {
                self.content_type
                    .as_deref()
                    .and_then(charset)
                    .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
            })
            .or_else(|| meta_charset(&self.body))
            .unwrap_or(encoding_rs::UTF_8);

        let (text, _, had_errors) = encoding.decode(&self.body);
        if had_errors {
            tracing::debug!(encoding = encoding.name(), "Replaced undecodable bytes in page");
        }
        text.into_owned()
    }
}

fn charset(content_type: &str) -> Option<&str> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(['"', '\'']))
    })
}

/// Bytes of the document searched for a `<meta>` charset declaration.
const META_SNIFF_LEN: usize = 1024;

/// Encoding named by `<meta charset=..>` or an `http-equiv` Content-Type
/// within the first [`META_SNIFF_LEN`] bytes.
fn meta_charset(body: &[u8]) -> Option<&'static encoding_rs::Encoding> {
    let head = &body[..body.len().min(META_SNIFF_LEN)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();

    for tag in head.split("<meta").skip(1) {
        let tag = tag.split('>').next().unwrap_or_default();
        let Some(pos) = tag.find("charset") else {
            continue;
        };
        let Some(value) = tag[pos + "charset".len()..].trim_start().strip_prefix('=') else {
            continue;
        };
        let label: String = value
            .trim_start()
            .trim_start_matches(['"', '\''])
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
            .collect();
        if let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes()) {
            return Some(encoding);
        }
    }
    None
}

/// The "fetch raw feed" capability the poller depends on.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self) -> Result<Page, FetchError>;
}

/// [`Transport`] over a pooled `reqwest` client.
///
/// The client and its connections live as long as this value.
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
    cookie: Option<SecretString>,
}

impl HttpTransport {
    pub fn new(config: &ParserConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .pool_idle_timeout(Duration::from_secs(299))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let cookie = (!config.cookies.is_empty()).then(|| {
            let header = config
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value.expose_secret()))
                .collect::<Vec<_>>()
                .join("; ");
            SecretString::from(header)
        });

        Ok(Self {
            client,
            url: config.url.clone(),
            timeout: config.timeout,
            cookie,
        })
    }

    async fn fetch_inner(&self) -> Result<Page, FetchError> {
        let mut request = self.client.get(self.url.clone());
        if let Some(cookie) = &self.cookie {
            match HeaderValue::from_str(cookie.expose_secret()) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    request = request.header(COOKIE, value);
                }
                Err(_) => tracing::warn!("Cookie values are not valid header text, sending none"),
            }
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = read_limited_bytes(response, MAX_FEED_SIZE).await?;

        Ok(Page { body, content_type })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self) -> Result<Page, FetchError> {
        tokio::time::timeout(self.timeout, self.fetch_inner())
            .await
            .map_err(|_| FetchError::Timeout)?
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
