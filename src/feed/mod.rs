mod fetcher;
mod filter;

use std::path::Path;

use opml::{Outline, OPML};

use crate::error::Result;
use crate::models::NewFeed;

pub use fetcher::{FeedEntry, FeedFetcher, ParsedFeed};
pub use filter::{classify, Classification, FilterExpr};

/// Reads the feed subscriptions of an OPML file. Nested outlines (folders)
/// are flattened.
pub fn parse_opml_file(path: &Path) -> Result<Vec<NewFeed>> {
    let xml = std::fs::read_to_string(path)?;
    parse_opml(&xml)
}

pub fn parse_opml(xml: &str) -> Result<Vec<NewFeed>> {
    let document = OPML::from_str(xml)?;
    let mut feeds = Vec::new();
    collect_outlines(&document.body.outlines, &mut feeds);
    Ok(feeds)
}

fn collect_outlines(outlines: &[Outline], feeds: &mut Vec<NewFeed>) {
    for outline in outlines {
        if let Some(url) = outline.xml_url.as_ref().filter(|u| !u.trim().is_empty()) {
            let title = outline
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| outline.text.clone());
            feeds.push(NewFeed {
                url: url.trim().to_string(),
                title,
                description: outline.description.clone(),
                filter_keywords: None,
            });
        }
        collect_outlines(&outline.outlines, feeds);
    }
}
