//! LLM service for OpenAI-compatible chat completion APIs
//! Supports OpenAI, DeepSeek, Ollama (`/v1`) and any OpenAI-compatible endpoint

use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::prompts::{self, ChatMessage};
use super::{
    AiGenerationPort, LlmUsage, PromptContext, StreamSummary, StructuredResult, TextStream,
    STREAM_BUFFER,
};
use crate::config::AiConfig;
use crate::error::{Error, Result};

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<ChatUsage>,
}

/// Strip a ```json fence some models wrap around JSON replies
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// One parsed SSE `data:` line
#[derive(Debug, PartialEq)]
enum SseLine {
    Data(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        SseLine::Done
    } else if data.is_empty() {
        SseLine::Skip
    } else {
        SseLine::Data(data.to_string())
    }
}

// ============================================================================
// LlmService
// ============================================================================

#[derive(Clone)]
pub struct LlmService {
    config: AiConfig,
    client: reqwest::Client,
}

impl LlmService {
    pub fn new(config: AiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Check if the LLM service is configured
    pub fn is_configured(&self) -> bool {
        match self.config.provider.as_str() {
            "ollama" => true, // Ollama doesn't need API key
            "openai-compatible" => self.config.base_url.is_some(),
            _ => self.config.api_key.is_some(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.config.provider
    }

    fn base_url(&self) -> Result<String> {
        if let Some(url) = &self.config.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }
        match self.config.provider.as_str() {
            "openai" => Ok("https://api.openai.com/v1".to_string()),
            "deepseek" => Ok("https://api.deepseek.com/v1".to_string()),
            "ollama" => Ok("http://localhost:11434/v1".to_string()),
            other => Err(Error::config(format!(
                "provider {} requires an explicit base url",
                other
            ))),
        }
    }

    fn request(&self, body: &ChatRequest<'_>) -> Result<reqwest::RequestBuilder> {
        let url = format!("{}/chat/completions", self.base_url()?);
        let mut builder = self.client.post(url).json(body);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        } else if self.config.provider != "ollama" {
            return Err(Error::config(format!(
                "{} API key not configured",
                self.config.provider
            )));
        }
        Ok(builder)
    }

    async fn send_checked(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::generation(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::generation(format!(
                "API error {}: {}",
                status,
                text.chars().take(500).collect::<String>()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl AiGenerationPort for LlmService {
    async fn generate_structured(&self, context: &PromptContext) -> Result<StructuredResult> {
        let messages = prompts::render(context);
        let body = ChatRequest {
            model: &self.config.model,
            messages: &messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            response_format: Some(ResponseFormat { kind: "json_object" }),
            stream: false,
            stream_options: None,
        };

        log::info!(
            "[llm] Structured request: provider={} model={} purpose={}",
            self.config.provider,
            self.config.model,
            context.kind.as_str()
        );

        let start = Instant::now();
        let response = self.send_checked(self.request(&body)?).await?;
        let response_text = response
            .text()
            .await
            .map_err(|e| Error::generation(format!("failed to read response: {}", e)))?;

        let parsed: ChatResponse = serde_json::from_str(&response_text).map_err(|e| {
            Error::generation(format!(
                "failed to parse response: {}. Raw: {}",
                e,
                response_text.chars().take(200).collect::<String>()
            ))
        })?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::generation("empty response from model"))?;

        let value: serde_json::Value = serde_json::from_str(strip_code_fence(&content))
            .map_err(|e| Error::generation(format!("model did not return JSON: {}", e)))?;

        let usage = LlmUsage {
            model: self.config.model.clone(),
            prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
            duration_ms: start.elapsed().as_millis() as i64,
        };

        log::info!(
            "[llm] Structured response: {} chars in {}ms",
            content.len(),
            usage.duration_ms
        );
        Ok(StructuredResult { value, usage })
    }

    async fn generate_stream(&self, context: &PromptContext) -> Result<TextStream> {
        let messages = prompts::render(context);
        let body = ChatRequest {
            model: &self.config.model,
            messages: &messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            response_format: None,
            stream: true,
            stream_options: Some(StreamOptions { include_usage: true }),
        };

        log::info!(
            "[llm] Stream request: provider={} model={} purpose={}",
            self.config.provider,
            self.config.model,
            context.kind.as_str()
        );

        let start = Instant::now();
        let response = self.send_checked(self.request(&body)?).await?;
        let (writer, stream) = TextStream::channel(STREAM_BUFFER);
        let model = self.config.model.clone();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut full_text = String::new();
            let mut usage = LlmUsage {
                model,
                ..Default::default()
            };

            'read: while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        writer.fail(Error::generation(format!("stream interrupted: {}", e)));
                        return;
                    }
                };
                // Split on raw bytes so a multi-byte character cut across reads stays intact
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match parse_sse_line(&String::from_utf8_lossy(&line)) {
                        SseLine::Done => break 'read,
                        SseLine::Skip => {}
                        SseLine::Data(data) => {
                            let parsed: ChatChunk = match serde_json::from_str(&data) {
                                Ok(parsed) => parsed,
                                Err(e) => {
                                    log::warn!("[llm] Skipping malformed stream chunk: {}", e);
                                    continue;
                                }
                            };
                            if let Some(u) = parsed.usage {
                                usage.prompt_tokens = u.prompt_tokens;
                                usage.completion_tokens = u.completion_tokens;
                            }
                            let delta = parsed
                                .choices
                                .into_iter()
                                .filter_map(|c| c.delta.content)
                                .collect::<String>();
                            if delta.is_empty() {
                                continue;
                            }
                            full_text.push_str(&delta);
                            if !writer.send(delta).await {
                                log::debug!("[llm] Consumer dropped the stream");
                                return;
                            }
                        }
                    }
                }
            }

            usage.duration_ms = start.elapsed().as_millis() as i64;
            log::info!(
                "[llm] Stream finished: {} chars in {}ms",
                full_text.len(),
                usage.duration_ms
            );
            writer.finish(StreamSummary { full_text, usage });
        });

        Ok(stream)
    }

    fn model_name(&self) -> String {
        self.config.model.clone()
    }
}
