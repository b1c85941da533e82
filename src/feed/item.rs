use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// One candidate announcement extracted from a feed.
///
/// `title` and `url` are `None` when the entry failed validation. Such items
/// still carry an `id` so diagnostics can name them, but they are never
/// emitted and never enter the dedup cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub id: String,
    pub title: Option<String>,
    pub url: Option<Url>,
}

impl FeedItem {
    /// Title and URL, if both are present and the title is not blank.
    pub fn emittable(&self) -> Option<(&str, &Url)> {
        match (&self.title, &self.url) {
            (Some(title), Some(url)) if !title.trim().is_empty() => Some((title.as_str(), url)),
            _ => None,
        }
    }

    pub fn is_emittable(&self) -> bool {
        self.emittable().is_some()
    }
}

/// Why a single entry was rejected. Never fatal; extraction moves on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("missing title")]
    MissingTitle,
    #[error("title does not match pattern: {0:?}")]
    TitleMismatch(String),
    #[error("missing download link")]
    MissingLink,
    #[error("no enclosure")]
    MissingEnclosure,
    #[error("enclosure is not a torrent: {0}")]
    EnclosureType(String),
    #[error("unresolvable link {link:?}: {reason}")]
    UnresolvableLink { link: String, reason: String },
    #[error("link does not match pattern: {0}")]
    LinkMismatch(String),
}

/// Stable id for sources without native ids: SHA-256 of `title|link`.
pub(crate) fn derive_id(title: &str, link: &str) -> String {
    let hash = Sha256::digest(format!("{title}|{link}").as_bytes());
    format!("{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: Option<&str>, url: Option<&str>) -> FeedItem {
        FeedItem {
            id: "1".to_string(),
            title: title.map(String::from),
            url: url.map(|u| Url::parse(u).unwrap()),
        }
    }

    #[test]
    fn test_emittable_requires_title_and_url() {
        assert!(item(Some("Title"), Some("https://t.example/dl?id=1")).is_emittable());
        assert!(!item(None, Some("https://t.example/dl?id=1")).is_emittable());
        assert!(!item(Some("Title"), None).is_emittable());
        assert!(!item(None, None).is_emittable());
    }

    #[test]
    fn test_blank_title_not_emittable() {
        assert!(!item(Some("   "), Some("https://t.example/dl?id=1")).is_emittable());
    }

    #[test]
    fn test_derive_id_is_stable_and_distinct() {
        let a = derive_id("Movie", "https://t.example/dl.php?t=1");
        assert_eq!(a, derive_id("Movie", "https://t.example/dl.php?t=1"));
        assert_ne!(a, derive_id("Movie", "https://t.example/dl.php?t=2"));
        assert_eq!(a.len(), 64);
    }
}
