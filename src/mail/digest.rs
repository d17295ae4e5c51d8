use chrono::NaiveDate;
use pulldown_cmark::{html, Options, Parser};

use crate::models::Article;

pub const DIGEST_SUBJECT: &str = "今日の論文要約レポート";
pub const TEST_SUBJECT: &str = "RSS要約システム - テストメール";

#[derive(Debug, Clone)]
pub struct Digest {
    pub subject: String,
    pub markdown: String,
    pub articles_count: usize,
}

/// Builds the daily digest of summarized articles. Returns `None` when there
/// is nothing to report.
pub fn compose_digest(articles: &[Article], date: NaiveDate) -> Option<Digest> {
    if articles.is_empty() {
        return None;
    }

    let mut md = format!(
        "# {}\n\n{} / {}件の記事\n\n---\n\n",
        DIGEST_SUBJECT,
        date.format("%Y-%m-%d"),
        articles.len()
    );

    for article in articles {
        md.push_str(&format!("## {}\n\n", article.title));
        md.push_str(&format!("- フィード: {}\n", article.feed_title));
        md.push_str(&format!("- URL: <{}>\n", article.url));
        if let Some(pdf) = &article.pdf_link {
            md.push_str(&format!("- PDF: <{}>\n", pdf));
        }
        if !article.keywords.is_empty() {
            md.push_str(&format!("- キーワード: {}\n", article.keywords.join(", ")));
        }
        md.push('\n');
        if let Some(summary) = &article.summary {
            md.push_str(summary.trim());
            md.push_str("\n\n");
        }
        md.push_str("---\n\n");
    }

    Some(Digest {
        subject: DIGEST_SUBJECT.to_string(),
        markdown: md,
        articles_count: articles.len(),
    })
}

pub fn test_email_markdown() -> String {
    "# テストメール\n\n\
     これはRSS要約システムのテストメールです。\n\n\
     ## 機能確認\n\n\
     - **メール送信**: 正常\n\
     - **HTML変換**: 正常\n\
     - **日本語対応**: 正常\n\n\
     ---\n\n\
     システムが正常に動作しています。\n"
        .to_string()
}

pub fn render_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH);
    let mut body = String::new();
    html::push_html(&mut body, parser);

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>RSS要約レポート</title>
<style>
body {{ font-family: 'Helvetica Neue', Arial, sans-serif; line-height: 1.6; color: #333; max-width: 800px; margin: 0 auto; padding: 20px; background-color: #f5f5f5; }}
.container {{ background-color: white; padding: 30px; border-radius: 8px; }}
h1 {{ color: #2c3e50; border-bottom: 3px solid #3498db; padding-bottom: 10px; }}
h2 {{ color: #34495e; margin-top: 30px; border-left: 4px solid #3498db; padding-left: 15px; }}
hr {{ border: none; height: 2px; background-color: #ecf0f1; margin: 30px 0; }}
a {{ color: #3498db; text-decoration: none; }}
.footer {{ margin-top: 40px; padding-top: 20px; border-top: 1px solid #ecf0f1; color: #7f8c8d; font-size: 0.9em; }}
</style>
</head>
<body>
<div class="container">
{}
<div class="footer"><p>このメールは RSS要約システム により自動生成されました。</p></div>
</div>
</body>
</html>
"#,
        body
    )
}

/// Truncates log content to `limit` characters.
pub fn excerpt(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn article(title: &str, pdf: Option<&str>) -> Article {
        Article {
            id: 1,
            feed_id: 1,
            feed_title: "arXiv".to_string(),
            guid: title.to_string(),
            title: title.to_string(),
            url: format!("https://example.com/{}", title),
            description: None,
            author: None,
            published_at: None,
            fetched_at: Utc::now(),
            is_read: false,
            read_at: None,
            is_favorite: false,
            keywords: vec!["llm".to_string()],
            pdf_link: pdf.map(str::to_string),
            summary: Some("1. どんなもの？\n要約".to_string()),
        }
    }

    #[test]
    fn test_empty_digest_is_not_composed() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        assert!(compose_digest(&[], date).is_none());
    }

    #[test]
    fn test_digest_lists_every_article() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        let digest =
            compose_digest(&[article("first", Some("https://example.com/1.pdf")), article("second", None)], date)
                .unwrap();

        assert_eq!(digest.subject, DIGEST_SUBJECT);
        assert_eq!(digest.articles_count, 2);
        assert!(digest.markdown.contains("2026-01-10 / 2件の記事"));
        assert!(digest.markdown.contains("## first"));
        assert!(digest.markdown.contains("## second"));
        assert!(digest.markdown.contains("PDF: <https://example.com/1.pdf>"));
        assert_eq!(digest.markdown.matches("PDF:").count(), 1);
        assert!(digest.markdown.contains("キーワード: llm"));
    }

    #[test]
    fn test_render_html() {
        let html = render_html("# Title\n\n**bold** [link](https://example.com)");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<strong>bold</strong>"));
        assert!(html.contains(r#"<a href="https://example.com">link</a>"#));
        assert!(html.contains("footer"));
    }

    #[test]
    fn test_excerpt_counts_characters() {
        assert_eq!(excerpt("要約レポート", 2), "要約");
        assert_eq!(excerpt("abc", 10), "abc");
    }
}
