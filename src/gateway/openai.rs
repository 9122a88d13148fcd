//! OpenAI-compatible chat completions adapter.
//!
//! One judge call = one timeout-bounded HTTP POST to
//! `{base_url}/chat/completions`, parsed into the constrained
//! [`RankingReply`] shape.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::GatewayError;
use super::types::{parse_ranking_reply, JudgeEndpoint, RankingReply};

/// Sampling temperature for every judge call. Low but non-zero: judgments
/// should be mostly deterministic while keeping tie-breaks from freezing.
const JUDGE_TEMPERATURE: f32 = 0.3;

/// Default per-call deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum allowed response body (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: [ApiMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

// =============================================================================
// ADAPTER
// =============================================================================

/// Stateless adapter over a shared HTTP connection pool.
///
/// Endpoint specifics (URL, key, model, quirks) arrive with each call, so a
/// single adapter serves every configured provider concurrently.
#[derive(Debug, Clone)]
pub struct OpenAiCompatAdapter {
    client: reqwest::Client,
}

impl Default for OpenAiCompatAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiCompatAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Execute one judge call against `endpoint`.
    ///
    /// The deadline covers the whole round trip; an elapsed timer yields
    /// [`GatewayError::Timeout`], distinct from transport or HTTP failures.
    pub async fn rank(
        &self,
        endpoint: &JudgeEndpoint,
        system_prompt: &str,
        user_prompt: &str,
        timeout: Duration,
    ) -> Result<RankingReply, GatewayError> {
        let api_req = ChatApiRequest {
            model: &endpoint.model,
            messages: [
                ApiMessage {
                    role: "system",
                    content: system_prompt,
                },
                ApiMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: JUDGE_TEMPERATURE,
            response_format: if endpoint.capabilities.json_response_format {
                Some(ResponseFormat {
                    format_type: "json_object",
                })
            } else {
                None
            },
        };

        debug!(provider = %endpoint.name, model = %endpoint.model, "judge call");

        let fut = self.execute(endpoint, &api_req);
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(timeout)),
        }
    }

    async fn execute(
        &self,
        endpoint: &JudgeEndpoint,
        api_req: &ChatApiRequest<'_>,
    ) -> Result<RankingReply, GatewayError> {
        let response = self
            .client
            .post(endpoint.chat_url())
            .bearer_auth(&endpoint.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(api_req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_RESPONSE_LEN {
                body.truncate(MAX_RESPONSE_LEN);
            }
            return Err(GatewayError::provider(
                endpoint.name.clone(),
                status.as_u16(),
                body,
            ));
        }

        if body.len() > MAX_RESPONSE_LEN {
            return Err(GatewayError::parse(format!(
                "response too large: {} bytes",
                body.len()
            )));
        }

        let parsed: ChatApiResponse =
            serde_json::from_str(&body).map_err(|e| GatewayError::parse(e.to_string()))?;

        let message = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .ok_or_else(|| GatewayError::parse("no choices in response"))?;

        let content = message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| GatewayError::parse("empty message content"))?;

        let mut reply = parse_ranking_reply(&content)?;

        // Side-channel reasoning trace; never pollutes the ranking contract.
        if endpoint.capabilities.reasoning_side_channel && reply.thinking_process.is_none() {
            reply.thinking_process = message
                .reasoning_content
                .filter(|r| !r.trim().is_empty());
        }

        Ok(reply)
    }
}
