//! Feed fetching and announcement extraction.
//!
//! - [`fetch`] - the [`Transport`] seam and its `reqwest` implementation
//! - [`extract`] - dispatches a fetched [`Page`] to the HTML or RSS extractor
//! - `html` / `rss` - format-specific extraction
//! - `validate` - per-entry title/link validation shared by both formats
//!
//! Extraction never fails as a whole: a page that is not a document of the
//! expected format yields no items, and a bad entry yields an item with the
//! broken field set to `None`.

mod extract;
mod fetch;
mod html;
mod item;
mod rss;
mod validate;

pub use extract::{Extractor, FeedFormat};
pub use fetch::{FetchError, HttpTransport, Page, Transport};
pub use html::{parse_listing, HtmlSelectors, SelectorError};
pub use item::{EntryError, FeedItem};
pub use rss::parse_feed;
pub use validate::{validate_http_url, EntryRules, UrlValidationError};
