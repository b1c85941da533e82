use serde::Deserialize;

use super::fetch::Page;
use super::html::{parse_listing, HtmlSelectors, SelectorError};
use super::item::FeedItem;
use super::rss::parse_feed;
use super::validate::EntryRules;
use crate::config::ParserConfig;

/// Shape of the watched document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    /// Tracker listing page scraped with CSS selectors.
    #[default]
    Html,
    /// RSS 2.0, Atom or JSON Feed.
    Rss,
}

/// Turns fetched pages into candidate items.
///
/// Built once from the configuration; selectors and patterns are compiled up
/// front so a bad one fails startup instead of every cycle.
#[derive(Debug, Clone)]
pub struct Extractor {
    format: FeedFormat,
    rules: EntryRules,
    selectors: HtmlSelectors,
}

impl Extractor {
    pub fn new(config: &ParserConfig) -> Result<Self, SelectorError> {
        Ok(Self {
            format: config.format,
            rules: EntryRules {
                base: config.url.clone(),
                title_pattern: config.title_pattern.clone(),
                url_pattern: config.url_pattern.clone(),
            },
            selectors: HtmlSelectors::compile(&config.selectors)?,
        })
    }

    pub fn format(&self) -> FeedFormat {
        self.format
    }

    /// Candidates in source order; empty when the page is not a parseable
    /// document of the configured format.
    pub fn extract(&self, page: &Page) -> Vec<FeedItem> {
        match self.format {
            FeedFormat::Html => {
                let text = page.text();
                if text.trim().is_empty() {
                    tracing::warn!("Empty listing page");
                    return Vec::new();
                }
                let items = parse_listing(&text, &self.selectors, &self.rules);
                if items.is_empty() {
                    tracing::debug!("No announcement rows matched on listing page");
                }
                items
            }
            FeedFormat::Rss => match parse_feed(&page.body, &self.rules) {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(error = %e, "Feed could not be parsed");
                    Vec::new()
                }
            },
        }
    }
}
