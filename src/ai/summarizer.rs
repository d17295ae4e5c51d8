use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{AppError, Result};
use crate::models::{Article, OchiaiSections};

use super::ochiai;

/// A generated summary: the full text plus its parsed sections.
#[derive(Debug, Clone)]
pub struct GeneratedSummary {
    pub content: String,
    pub sections: OchiaiSections,
}

/// Produces Ochiai summaries for articles.
#[async_trait]
pub trait SummaryBackend: Send + Sync {
    async fn summarize(&self, article: &Article) -> Result<GeneratedSummary>;

    fn model_version(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Chat-completions client for OpenAI compatible APIs.
pub struct Summarizer {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    description_limit: usize,
}

impl Summarizer {
    pub fn new(config: &LlmConfig, description_limit: usize) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            description_limit,
        })
    }

    async fn chat(&self, prompt: String) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::LlmApi("OPENAI_API_KEY is not set".to_string()))?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: ochiai::SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::LlmApi(format!("API error {}: {}", status, error_text)));
        }

        let chat_response: ChatResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AppError::LlmApi("Empty response from API".to_string()))
    }
}

#[async_trait]
impl SummaryBackend for Summarizer {
    async fn summarize(&self, article: &Article) -> Result<GeneratedSummary> {
        let description = article.description.as_deref().unwrap_or(&article.title);
        let prompt =
            ochiai::build_prompt(&article.title, &article.url, description, self.description_limit);

        let content = self.chat(prompt).await?;
        let sections = ochiai::parse_sections(&content);

        Ok(GeneratedSummary { content, sections })
    }

    fn model_version(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn llm_config(base_url: String, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            api_key: api_key.map(str::to_string),
            base_url,
            model: "test-model".to_string(),
            temperature: 1.0,
        }
    }

    fn article() -> Article {
        Article {
            id: 1,
            feed_id: 1,
            feed_title: "Feed".to_string(),
            guid: "g".to_string(),
            title: "Tree search agents".to_string(),
            url: "https://example.com/1".to_string(),
            description: Some("An agent paper".to_string()),
            author: None,
            published_at: None,
            fetched_at: Utc::now(),
            is_read: false,
            read_at: None,
            is_favorite: false,
            keywords: Vec::new(),
            pdf_link: None,
            summary: None,
        }
    }

    #[tokio::test]
    async fn test_summarize_parses_sections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant",
                    "content": "1. どんなもの？\n探索するエージェント\n6. 次読むべき論文は？\nReAct"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let summarizer = Summarizer::new(&llm_config(server.uri(), Some("sk-test")), 100).unwrap();
        let summary = summarizer.summarize(&article()).await.unwrap();

        assert!(summary.content.starts_with("1. どんなもの？"));
        assert_eq!(summary.sections.overview, "探索するエージェント");
        assert_eq!(summary.sections.next_papers, "ReAct");
        assert_eq!(summarizer.model_version(), "test-model");
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let summarizer = Summarizer::new(&llm_config(server.uri(), Some("sk-test")), 100).unwrap();
        let err = summarizer.summarize(&article()).await.unwrap_err();
        assert!(matches!(err, AppError::LlmApi(msg) if msg.contains("rate limited")));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let summarizer =
            Summarizer::new(&llm_config("http://127.0.0.1:9".to_string(), None), 100).unwrap();
        assert!(matches!(
            summarizer.summarize(&article()).await,
            Err(AppError::LlmApi(_))
        ));
    }
}
