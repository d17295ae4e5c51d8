use std::time::Duration;

use feed_rs::parser;
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::Client;

use crate::config::HttpConfig;
use crate::error::Result;
use crate::models::{Feed, NewArticle, NewFeed};

use super::filter::{classify, Classification};

/// One entry of a parsed RSS/Atom document.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub guid: String,
    pub title: String,
    /// Dedup key within a feed: the entry link, or the entry id without one.
    pub url: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub entries: Vec<FeedEntry>,
}

impl ParsedFeed {
    /// Runs every entry through the feed's keyword filter and keeps the
    /// accepted ones, tagged with the keywords that matched.
    pub fn classified_articles(&self, feed: &Feed) -> Vec<NewArticle> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let text = format!(
                    "{} {}",
                    entry.title,
                    entry.description.as_deref().unwrap_or_default()
                );
                match classify(feed.filter_keywords.as_deref(), &text) {
                    Classification::Accept(keywords) => Some(NewArticle {
                        feed_id: feed.id,
                        guid: entry.guid.clone(),
                        title: entry.title.clone(),
                        url: entry.url.clone(),
                        description: entry.description.clone(),
                        author: entry.author.clone(),
                        published_at: entry.published_at,
                        keywords,
                    }),
                    Classification::Reject => {
                        tracing::debug!("Filtered out '{}' from {}", entry.title, feed.title);
                        None
                    }
                }
            })
            .collect()
    }
}

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client })
    }

    async fn get_bytes(&self, url: &str) -> Result<(String, Vec<u8>, String)> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch {}: HTTP {}", url, response.status()).into());
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = response.bytes().await?;

        Ok((final_url, bytes.to_vec(), content_type))
    }

    pub async fn fetch_feed(&self, url: &str) -> Result<ParsedFeed> {
        let (_, bytes, _) = self.get_bytes(url).await?;
        parse_feed(&bytes)
    }

    /// Fetch all feeds concurrently, at most 5 at a time. Each feed gets its
    /// own result so one failure does not affect the others.
    pub async fn fetch_all(&self, feeds: Vec<Feed>) -> Vec<(Feed, Result<ParsedFeed>)> {
        stream::iter(feeds)
            .map(|feed| async move {
                let result = self.fetch_feed(&feed.url).await;
                match &result {
                    Ok(parsed) => {
                        tracing::debug!("Fetched {} entries from {}", parsed.entries.len(), feed.title)
                    }
                    Err(e) => tracing::debug!("Failed to fetch {}: {}", feed.url, e),
                }
                (feed, result)
            })
            .buffer_unordered(5)
            .collect()
            .await
    }

    /// Discover a feed from a URL.
    /// A direct RSS/Atom URL is parsed as-is; an HTML page is searched for a
    /// `<link rel="alternate">` pointing at the feed.
    pub async fn discover_feed(&self, url: &str) -> Result<NewFeed> {
        let (final_url, bytes, content_type) = self.get_bytes(url).await?;

        if let Ok(feed) = parse_feed(&bytes) {
            return Ok(NewFeed {
                url: final_url,
                title: feed.title.unwrap_or_else(|| "Untitled Feed".to_string()),
                description: feed.description,
                filter_keywords: None,
            });
        }

        if content_type.contains("html") || bytes.starts_with(b"<!") || bytes.starts_with(b"<html") {
            let html = String::from_utf8_lossy(&bytes);
            if let Some(feed_url) = find_feed_link(&html, &final_url) {
                let feed = self.fetch_feed(&feed_url).await?;
                return Ok(NewFeed {
                    url: feed_url,
                    title: feed.title.unwrap_or_else(|| "Untitled Feed".to_string()),
                    description: feed.description,
                    filter_keywords: None,
                });
            }
        }

        Err(anyhow::anyhow!("Could not find RSS/Atom feed at {}", url).into())
    }

    /// Fetch an article page and return the most likely PDF link on it.
    pub async fn find_pdf_link(&self, article_url: &str) -> Result<Option<String>> {
        let (final_url, bytes, _) = self.get_bytes(article_url).await?;
        let html = String::from_utf8_lossy(&bytes);
        Ok(extract_pdf_link(&html, &final_url))
    }
}

fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    let feed = parser::parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            // Prefer the summary, fall back to full content
            let html = entry
                .summary
                .as_ref()
                .map(|s| s.content.clone())
                .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()));
            let description = html
                .and_then(|html| html2text::from_read(html.as_bytes(), 10_000).ok())
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty());

            let url = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_else(|| entry.id.clone());

            FeedEntry {
                guid: entry.id,
                title: entry
                    .title
                    .map(|t| t.content.trim().to_string())
                    .unwrap_or_else(|| "Untitled".to_string()),
                url,
                description,
                author: entry.authors.first().map(|a| a.name.clone()),
                published_at: entry.published.or(entry.updated),
            }
        })
        .filter(|entry| !entry.url.is_empty())
        .collect();

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content.trim().to_string()).filter(|t| !t.is_empty()),
        description: feed
            .description
            .map(|d| d.content.trim().to_string())
            .filter(|d| !d.is_empty()),
        entries,
    })
}

/// Search HTML for RSS/Atom feed links
fn find_feed_link(html: &str, base_url: &str) -> Option<String> {
    let link_re = Regex::new(
        r#"<link[^>]*rel=["']alternate["'][^>]*type=["']application/(rss|atom)\+xml["'][^>]*href=["']([^"']+)["']"#,
    )
    .ok()?;

    // type before rel
    let link_re2 =
        Regex::new(r#"<link[^>]*type=["']application/(rss|atom)\+xml["'][^>]*href=["']([^"']+)["']"#)
            .ok()?;

    let href = link_re
        .captures(html)
        .or_else(|| link_re2.captures(html))
        .and_then(|cap| cap.get(2))
        .map(|m| m.as_str().to_string())?;

    Some(resolve_url(&href, base_url))
}

struct Anchor {
    attrs: String,
    href: String,
    text: String,
}

impl Anchor {
    fn attr(&self, name: &str) -> Option<String> {
        let re = Regex::new(&format!(r#"(?i)\b{}\s*=\s*["']([^"']*)["']"#, regex::escape(name))).ok()?;
        re.captures(&self.attrs)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

/// Picks the PDF link of a paper page. Candidates are tried in order of how
/// reliably they point at the PDF itself.
fn extract_pdf_link(html: &str, base_url: &str) -> Option<String> {
    let anchor_re = Regex::new(r#"(?is)<a\s([^>]*)>(.*?)</a>"#).ok()?;
    let tag_re = Regex::new(r"(?s)<[^>]*>").ok()?;

    let anchors: Vec<Anchor> = anchor_re
        .captures_iter(html)
        .filter_map(|cap| {
            let attrs = cap.get(1)?.as_str().to_string();
            let text = tag_re.replace_all(cap.get(2)?.as_str(), "").trim().to_string();
            let mut anchor = Anchor {
                attrs,
                href: String::new(),
                text,
            };
            anchor.href = anchor.attr("href")?;
            Some(anchor)
        })
        .collect();

    let rules: [&dyn Fn(&Anchor) -> bool; 8] = [
        &|a: &Anchor| a.href.to_lowercase().ends_with(".pdf"),
        &|a: &Anchor| a.text.to_uppercase().contains("PDF"),
        &|a: &Anchor| a.attr("class").is_some_and(|c| c.to_lowercase().contains("pdf")),
        &|a: &Anchor| a.attr("id").is_some_and(|i| i.to_lowercase().contains("pdf")),
        &|a: &Anchor| a.attr("data-format").is_some_and(|f| f.eq_ignore_ascii_case("pdf")),
        &|a: &Anchor| a.attr("title").is_some_and(|t| t == "Download PDF"),
        &|a: &Anchor| a.href.to_lowercase().contains("pdf"),
        &|a: &Anchor| a.attr("class").is_some_and(|c| c.contains("download-pdf")),
    ];

    rules.iter().find_map(|rule| {
        anchors
            .iter()
            .find(|a| rule(a))
            .map(|a| resolve_url(&a.href, base_url))
    })
}

/// Resolve a potentially relative URL against a base URL
fn resolve_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    if let Ok(base) = url::Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    href.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Paper Feed</title>
    <description>New papers</description>
    <item>
      <title>LLM agents</title>
      <link>https://example.com/papers/1</link>
      <description>&lt;p&gt;A study of &lt;b&gt;LLM&lt;/b&gt; agents&lt;/p&gt;</description>
      <guid>p1</guid>
    </item>
    <item>
      <title>Diffusion models</title>
      <link>https://example.com/papers/2</link>
      <description>Image generation</description>
      <guid>p2</guid>
    </item>
    <item>
      <title>No link</title>
      <guid>urn:paper:3</guid>
    </item>
  </channel>
</rss>"#;

    fn http_config() -> HttpConfig {
        HttpConfig {
            request_timeout_secs: 5,
            user_agent: "test-agent".to_string(),
        }
    }

    fn feed(filter: Option<&str>) -> Feed {
        Feed {
            id: 7,
            url: "https://example.com/feed".to_string(),
            title: "Paper Feed".to_string(),
            description: None,
            is_active: true,
            filter_keywords: filter.map(str::to_string),
            last_fetched_at: None,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_feed_entries() {
        let parsed = parse_feed(SAMPLE_RSS.as_bytes()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Paper Feed"));
        assert_eq!(parsed.description.as_deref(), Some("New papers"));
        assert_eq!(parsed.entries.len(), 3);
        assert_eq!(parsed.entries[0].url, "https://example.com/papers/1");
        assert!(!parsed.entries[0].description.as_ref().unwrap().contains("<p>"));
        // no link: the entry id is the dedup key
        assert_eq!(parsed.entries[2].url, "urn:paper:3");
    }

    #[test]
    fn test_classified_articles_apply_filter() {
        let parsed = parse_feed(SAMPLE_RSS.as_bytes()).unwrap();

        let all = parsed.classified_articles(&feed(None));
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|a| a.feed_id == 7 && a.keywords.is_empty()));

        let llm = parsed.classified_articles(&feed(Some("llm OR transformer")));
        assert_eq!(llm.len(), 1);
        assert_eq!(llm[0].title, "LLM agents");
        assert_eq!(llm[0].keywords, vec!["llm"]);
    }

    #[test]
    fn test_find_feed_link() {
        let html = r#"<html><head><link rel="alternate" type="application/rss+xml" href="/feed.xml"></head></html>"#;
        assert_eq!(
            find_feed_link(html, "https://example.com/blog/").as_deref(),
            Some("https://example.com/feed.xml")
        );
        assert!(find_feed_link("<html></html>", "https://example.com").is_none());
    }

    #[test]
    fn test_extract_pdf_link_prefers_direct_pdf() {
        let html = r#"
            <a href="/abs/1234" class="nav">Abstract</a>
            <a href="/pdf/1234" class="download-pdf">View <span>PDF</span></a>
            <a href="https://cdn.example.com/1234.pdf">paper</a>
        "#;
        assert_eq!(
            extract_pdf_link(html, "https://arxiv.example/abs/1234").as_deref(),
            Some("https://cdn.example.com/1234.pdf")
        );

        let html = r#"<a href="/pdf/1234">View PDF</a>"#;
        assert_eq!(
            extract_pdf_link(html, "https://arxiv.example/abs/1234").as_deref(),
            Some("https://arxiv.example/pdf/1234")
        );

        assert!(extract_pdf_link(r#"<a href="/about">About</a>"#, "https://x.example").is_none());
    }

    #[tokio::test]
    async fn test_fetch_all_isolates_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/good.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE_RSS))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken.xml"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut good = feed(None);
        good.url = format!("{}/good.xml", server.uri());
        let mut broken = feed(None);
        broken.id = 8;
        broken.url = format!("{}/broken.xml", server.uri());

        let fetcher = FeedFetcher::new(&http_config()).unwrap();
        let results = fetcher.fetch_all(vec![good, broken]).await;

        assert_eq!(results.len(), 2);
        for (feed, result) in results {
            match feed.id {
                7 => assert_eq!(result.unwrap().entries.len(), 3),
                _ => assert!(result.is_err()),
            }
        }
    }

    #[tokio::test]
    async fn test_discover_feed_from_html_page() {
        let server = MockServer::start().await;
        let page = r#"<!DOCTYPE html><html><head>
            <link rel="alternate" type="application/rss+xml" href="/rss"></head></html>"#;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(page),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE_RSS))
            .mount(&server)
            .await;

        let fetcher = FeedFetcher::new(&http_config()).unwrap();
        let discovered = fetcher.discover_feed(&format!("{}/", server.uri())).await.unwrap();

        assert_eq!(discovered.title, "Paper Feed");
        assert_eq!(discovered.url, format!("{}/rss", server.uri()));
    }
}
