//! Announcement extraction from tracker listing pages.
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use super::item::{derive_id, EntryError, FeedItem};
use super::validate::EntryRules;
use crate::config::SelectorConfig;

#[derive(Debug, Error)]
#[error("invalid {field} selector {selector:?}: {reason}")]
pub struct SelectorError {
    pub field: &'static str,
    pub selector: String,
    pub reason: String,
}

/// Compiled [`SelectorConfig`].
#[derive(Debug, Clone)]
pub struct HtmlSelectors {
    row: Selector,
    title: Selector,
    link: Selector,
}

impl HtmlSelectors {
    pub fn compile(config: &SelectorConfig) -> Result<Self, SelectorError> {
        Ok(Self {
            row: compile("row", &config.row)?,
            title: compile("title", &config.title)?,
            link: compile("link", &config.link)?,
        })
    }
}

fn compile(field: &'static str, selector: &str) -> Result<Selector, SelectorError> {
    Selector::parse(selector).map_err(|e| SelectorError {
        field,
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Extract one [`FeedItem`] per matched row, in document order.
///
/// Rows without a usable title or link still produce an item (with the field
/// set to `None`) so the caller sees every row it skipped.
pub fn parse_listing(html: &str, selectors: &HtmlSelectors, rules: &EntryRules) -> Vec<FeedItem> {
    let doc = Html::parse_document(html);

    doc.select(&selectors.row)
        .map(|row| parse_row(row, selectors, rules))
        .collect()
}

fn parse_row(row: ElementRef<'_>, selectors: &HtmlSelectors, rules: &EntryRules) -> FeedItem {
    let raw_title = row.select(&selectors.title).next().map(collapsed_text);
    let raw_link = row
        .select(&selectors.link)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string);

    let id = derive_id(
        raw_title.as_deref().unwrap_or_default(),
        raw_link.as_deref().unwrap_or_default(),
    );

    let title = raw_title
        .ok_or(EntryError::MissingTitle)
        .and_then(|t| rules.title(&t));
    let url = raw_link
        .ok_or(EntryError::MissingLink)
        .and_then(|l| rules.link(&l));

    FeedItem {
        title: title
            .map_err(|e| tracing::warn!(id = %id, error = %e, "Bad title"))
            .ok(),
        url: url
            .map_err(|e| tracing::warn!(id = %id, error = %e, "Bad URL"))
            .ok(),
        id,
    }
}

/// Element text with runs of whitespace collapsed to single spaces.
fn collapsed_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
