use regex::Regex;
use thiserror::Error;
use url::Url;

use super::item::EntryError;

/// Errors that can occur while validating a configured URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Parses a URL and checks it is an absolute `http`/`https` URL with a host.
///
/// Loopback and private addresses are accepted: trackers behind a VPN and a
/// local torrent daemon are both normal deployments.
///
/// # Examples
///
/// ```
/// use torrent_feed::feed::validate_http_url;
///
/// let url = validate_http_url("https://tracker.example/tracker.php").unwrap();
/// assert_eq!(url.host_str(), Some("tracker.example"));
///
/// assert!(validate_http_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_http_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;
    check_http(&url)?;
    Ok(url)
}

fn check_http(url: &Url) -> Result<(), UrlValidationError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(UrlValidationError::MissingHost),
    }
}

/// Per-entry validation shared by the HTML and RSS extractors.
#[derive(Debug, Clone)]
pub struct EntryRules {
    /// Base for resolving relative download links.
    pub base: Url,
    /// Optional title pattern. A named group `title` selects the text kept;
    /// without one, the whole match is kept.
    pub title_pattern: Option<Regex>,
    /// Optional pattern the resolved absolute link must match.
    pub url_pattern: Option<Regex>,
}

impl EntryRules {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            title_pattern: None,
            url_pattern: None,
        }
    }

    pub fn title(&self, raw: &str) -> Result<String, EntryError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(EntryError::MissingTitle);
        }

        let title = match &self.title_pattern {
            None => raw.to_string(),
            Some(pattern) => {
                let caps = pattern
                    .captures(raw)
                    .ok_or_else(|| EntryError::TitleMismatch(raw.to_string()))?;
                caps.name("title")
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default()
            }
        };

        if title.is_empty() {
            return Err(EntryError::TitleMismatch(raw.to_string()));
        }
        Ok(title)
    }

    pub fn link(&self, raw: &str) -> Result<Url, EntryError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(EntryError::MissingLink);
        }

        let url = self
            .base
            .join(raw)
            .map_err(|e| EntryError::UnresolvableLink {
                link: raw.to_string(),
                reason: e.to_string(),
            })?;
        check_http(&url).map_err(|e| EntryError::UnresolvableLink {
            link: raw.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(pattern) = &self.url_pattern {
            if !pattern.is_match(url.as_str()) {
                return Err(EntryError::LinkMismatch(url.to_string()));
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> EntryRules {
        EntryRules::new(Url::parse("https://tracker.example/forum/tracker.php").unwrap())
    }

    #[test]
    fn test_valid_urls() {
        assert!(validate_http_url("https://example.com/feed.xml").is_ok());
        assert!(validate_http_url("http://127.0.0.1:8112/json").is_ok());
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_http_url("ftp://example.com"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_http_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_unparseable_url() {
        assert!(matches!(
            validate_http_url("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_relative_link_resolved_against_base() {
        let url = rules().link("dl.php?t=123").unwrap();
        assert_eq!(url.as_str(), "https://tracker.example/forum/dl.php?t=123");

        let url = rules().link("/dl.php?t=9").unwrap();
        assert_eq!(url.as_str(), "https://tracker.example/dl.php?t=9");
    }

    #[test]
    fn test_absolute_link_kept() {
        let url = rules().link("http://mirror.example/x.torrent").unwrap();
        assert_eq!(url.as_str(), "http://mirror.example/x.torrent");
    }

    #[test]
    fn test_empty_link_is_missing() {
        assert_eq!(rules().link("  "), Err(EntryError::MissingLink));
    }

    #[test]
    fn test_non_http_link_rejected() {
        assert!(matches!(
            rules().link("magnet:?xt=urn:btih:abc"),
            Err(EntryError::UnresolvableLink { .. })
        ));
    }

    #[test]
    fn test_link_pattern_mismatch() {
        let mut rules = rules();
        rules.url_pattern = Some(Regex::new(r"/dl\.php\?t=\d+$").unwrap());
        assert!(rules.link("dl.php?t=5").is_ok());
        assert!(matches!(
            rules.link("viewtopic.php?t=5"),
            Err(EntryError::LinkMismatch(_))
        ));
    }

    #[test]
    fn test_title_without_pattern_is_trimmed() {
        assert_eq!(rules().title("  Some Release  ").unwrap(), "Some Release");
        assert_eq!(rules().title(""), Err(EntryError::MissingTitle));
    }

    #[test]
    fn test_title_named_group_extracted() {
        let mut rules = rules();
        rules.title_pattern = Some(Regex::new(r"\[.*?\] (?P<title>.*?) \[SEEDERS.*\]").unwrap());

        let title = rules
            .title("[Movies] Big Buck Bunny 1080p [SEEDERS (10)/LEECHERS (2)]")
            .unwrap();
        assert_eq!(title, "Big Buck Bunny 1080p");

        assert!(matches!(
            rules.title("no brackets here"),
            Err(EntryError::TitleMismatch(_))
        ));
    }

    #[test]
    fn test_title_pattern_without_group_keeps_whole_match() {
        let mut rules = rules();
        rules.title_pattern = Some(Regex::new(r"S\d\dE\d\d").unwrap());
        assert_eq!(rules.title("Show S01E02 720p").unwrap(), "S01E02");
    }
}
