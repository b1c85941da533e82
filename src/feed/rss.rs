use feed_rs::model::Entry;
use feed_rs::parser::{self, ParseFeedError};

use super::item::{derive_id, EntryError, FeedItem};
use super::validate::EntryRules;

const TORRENT_MIME: &str = "application/x-bittorrent";

/// Parse an RSS, Atom or JSON feed into items in entry order.
///
/// The entry id is used as the dedup id. Entries without one get an id
/// derived from their title and enclosure href, so it is the same on every
/// fetch. The download link comes from the first enclosure, which must be a
/// torrent.
pub fn parse_feed(bytes: &[u8], rules: &EntryRules) -> Result<Vec<FeedItem>, ParseFeedError> {
    // feed-rs fills missing ids with a random UUID; leave them empty instead.
    let feed = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)?;

    Ok(feed
        .entries
        .into_iter()
        .map(|entry| parse_entry(entry, rules))
        .collect())
}

fn parse_entry(entry: Entry, rules: &EntryRules) -> FeedItem {
    let raw_title = entry.title.as_ref().map(|t| t.content.as_str());
    let enclosure = first_enclosure(&entry);

    let id = match entry.id.trim() {
        "" => derive_id(
            raw_title.unwrap_or_default(),
            enclosure.as_deref().unwrap_or_default(),
        ),
        id => id.to_string(),
    };

    let title = raw_title
        .ok_or(EntryError::MissingTitle)
        .and_then(|t| rules.title(t));
    let url = enclosure.and_then(|href| rules.link(&href));

    FeedItem {
        title: title
            .map_err(|e| tracing::warn!(id = %id, error = %e, "Bad title"))
            .ok(),
        url: url
            .map_err(|e| tracing::warn!(id = %id, error = %e, "Bad enclosure"))
            .ok(),
        id,
    }
}

/// Href of the entry's first enclosure, if it declares a torrent.
///
/// RSS `<enclosure>` elements surface as media content; Atom uses
/// `<link rel="enclosure">`.
fn first_enclosure(entry: &Entry) -> Result<String, EntryError> {
    let media = entry.media.iter().flat_map(|m| m.content.iter()).find_map(|c| {
        c.url.as_ref().map(|u| {
            (
                u.as_str().to_string(),
                c.content_type.as_ref().map(|m| m.essence().to_string()),
            )
        })
    });

    let atom = || {
        entry
            .links
            .iter()
            .find(|l| l.rel.as_deref() == Some("enclosure"))
            .map(|l| (l.href.clone(), l.media_type.clone()))
    };

    let (href, media_type) = media.or_else(atom).ok_or(EntryError::MissingEnclosure)?;
    match media_type {
        Some(t) if t.eq_ignore_ascii_case(TORRENT_MIME) => Ok(href),
        other => Err(EntryError::EnclosureType(
            other.unwrap_or_else(|| "unspecified".to_string()),
        )),
    }
}
