use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::GenerationConfig;
use crate::domain::generation::{GenerationOptions, Generator, TextChunkStream};
use crate::error::{RagError, RagResult};
use crate::retry::{Backoff, RetryError, RetryPolicy};

/// Best-effort prompt normalization before the provider call. Strips
/// characters outside letters, digits, whitespace and common punctuation.
/// This is not a security boundary.
fn sanitize_prompt(prompt: &str) -> String {
    prompt
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || ".,;:?!()'\"-".contains(*c))
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: SamplingConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SamplingConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

impl From<&GenerationOptions> for SamplingConfig {
    fn from(options: &GenerationOptions) -> Self {
        Self {
            temperature: options.temperature,
            top_p: options.top_p,
            top_k: options.top_k,
            max_output_tokens: options.max_output_tokens,
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

fn response_text(response: GenerateResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// Per-attempt failure inside the generator. Timeouts are terminal; everything
/// else is retried within the budget.
#[derive(Debug, Error)]
enum GenError {
    #[error("attempt exceeded the timeout")]
    Timeout,
    #[error("{0}")]
    Transient(String),
    #[error("response too short ({0} chars after trimming)")]
    TooShort(usize),
}

/// Gemini `generateContent` client with a per-attempt timeout, linear-backoff
/// retries and SSE streaming.
pub struct GeminiGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    min_chars: usize,
    retry: RetryPolicy,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        // The per-attempt timeout is applied around each call, not on the
        // client, so streaming responses can outlive it once connected.
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            min_chars: config.min_chars,
            retry: RetryPolicy::new(
                config.max_retries + 1,
                Duration::from_millis(config.retry_base_delay_ms),
                Backoff::Linear,
            ),
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, self.model, action)
    }

    async fn generate_once(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: SamplingConfig::from(options),
        };
        let mut request = self.client.post(self.endpoint("generateContent")).json(&body);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }

        let attempt = async {
            let response = request
                .send()
                .await
                .map_err(|e| GenError::Transient(format!("request failed: {e}")))?;
            let status = response.status();
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(GenError::Transient(format!(
                    "provider returned {status}: {detail}"
                )));
            }
            response
                .json::<GenerateResponse>()
                .await
                .map_err(|e| GenError::Transient(format!("malformed response: {e}")))
        };

        let response = tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| GenError::Timeout)??;

        let text = response_text(response).trim().to_string();
        if text.chars().count() < self.min_chars {
            return Err(GenError::TooShort(text.chars().count()));
        }
        Ok(text)
    }
}

/// Extracts the text carried by one SSE line, if any. Comment lines, event
/// markers and keep-alives yield `None`; a `data:` payload that is not valid
/// JSON is an error.
fn parse_sse_line(line: &str) -> RagResult<Option<String>> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }
    let response: GenerateResponse =
        serde_json::from_str(payload).map_err(|e| RagError::GenerationFailed {
            attempts: 1,
            reason: format!("malformed stream chunk: {e}"),
        })?;
    let text = response_text(response);
    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> RagResult<String> {
        let sanitized = sanitize_prompt(prompt);
        if sanitized.is_empty() {
            return Err(RagError::InvalidInput(
                "prompt is empty after sanitization".to_string(),
            ));
        }

        let result = self
            .retry
            .run(
                cancel,
                |e| !matches!(e, GenError::Timeout),
                |attempt| {
                    log::debug!("Generation attempt {} for model {}", attempt, self.model);
                    self.generate_once(&sanitized, options)
                },
            )
            .await;

        match result {
            Ok(text) => Ok(text),
            Err(RetryError::Fatal(GenError::Timeout)) => {
                Err(RagError::GenerationTimeout(self.timeout))
            }
            Err(RetryError::Fatal(other)) => Err(RagError::GenerationFailed {
                attempts: 1,
                reason: other.to_string(),
            }),
            Err(RetryError::Exhausted { attempts, last }) => Err(RagError::GenerationFailed {
                attempts,
                reason: last.to_string(),
            }),
            Err(RetryError::Cancelled) => Err(RagError::Cancelled),
        }
    }

    async fn generate_streaming(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> RagResult<TextChunkStream> {
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        let sanitized = sanitize_prompt(prompt);
        if sanitized.is_empty() {
            return Err(RagError::InvalidInput(
                "prompt is empty after sanitization".to_string(),
            ));
        }

        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: &sanitized }],
            }],
            generation_config: SamplingConfig::from(options),
        };
        let mut request = self
            .client
            .post(self.endpoint("streamGenerateContent"))
            .query(&[("alt", "sse")])
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }

        // The timeout covers establishing the stream; chunks then arrive at
        // the provider's pace.
        let send = tokio::time::timeout(self.timeout, request.send());
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(RagError::Cancelled),
            sent = send => sent
                .map_err(|_| RagError::GenerationTimeout(self.timeout))?
                .map_err(|e| RagError::GenerationFailed {
                    attempts: 1,
                    reason: format!("request failed: {e}"),
                })?,
        };
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RagError::GenerationFailed {
                attempts: 1,
                reason: format!("provider returned {status}: {detail}"),
            });
        }

        let state = (response.bytes_stream().boxed(), String::new());
        let chunks = stream::try_unfold(state, |(mut bytes, mut buffer)| async move {
            loop {
                if let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    if let Some(text) = parse_sse_line(line.trim())? {
                        return Ok(Some((text, (bytes, buffer))));
                    }
                    continue;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                    Some(Err(e)) => {
                        return Err(RagError::GenerationFailed {
                            attempts: 1,
                            reason: format!("stream interrupted: {e}"),
                        })
                    }
                    None => {
                        let line = std::mem::take(&mut buffer);
                        if let Some(text) = parse_sse_line(line.trim())? {
                            return Ok(Some((text, (bytes, buffer))));
                        }
                        return Ok(None);
                    }
                }
            }
        });
        Ok(chunks.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitization_keeps_ordinary_research_prompts_intact() {
        let prompt = "Summarize the latest research on graph neural networks:\ncontext text.";
        assert_eq!(sanitize_prompt(prompt), prompt);
    }

    #[test]
    fn sanitization_strips_control_and_symbol_noise() {
        let prompt = "what is <b>RAG</b>? {payload} \u{0000}end";
        assert_eq!(sanitize_prompt(prompt), "what is bRAGb? payload end");
    }

    #[test]
    fn sanitization_of_symbol_only_input_is_empty() {
        assert_eq!(sanitize_prompt("<<<{}>>>"), "");
    }

    #[test]
    fn response_text_concatenates_first_candidate_parts() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [
                { "content": { "parts": [ { "text": "Recent work " }, { "text": "shows..." } ] } },
                { "content": { "parts": [ { "text": "ignored second candidate" } ] } }
            ]
        }))
        .unwrap();
        assert_eq!(response_text(response), "Recent work shows...");
    }

    #[test]
    fn response_without_candidates_yields_empty_text() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(response_text(response), "");
    }

    #[test]
    fn sse_lines_without_data_prefix_are_skipped() {
        assert!(parse_sse_line("").unwrap().is_none());
        assert!(parse_sse_line("event: message").unwrap().is_none());
        assert!(parse_sse_line("data: [DONE]").unwrap().is_none());
    }

    #[test]
    fn sse_data_line_yields_its_text() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"chunk one"}]}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), Some("chunk one".to_string()));
    }

    #[test]
    fn malformed_sse_data_line_is_an_error() {
        assert!(parse_sse_line("data: {not json").is_err());
    }
}
