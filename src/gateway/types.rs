//! Core types for the judge gateway.

use serde::{Deserialize, Serialize};

use super::error::GatewayError;

// =============================================================================
// CAPABILITIES
// =============================================================================

/// Base URL substrings of providers that reject or ignore the strict-JSON
/// `response_format` hint.
const JSON_FORMAT_INCOMPATIBLE: &[&str] = &["gemini", "google", "generativelanguage"];

/// Base URL substrings of providers that expose a `reasoning_content`
/// side-channel alongside the message content.
const REASONING_SIDE_CHANNEL: &[&str] = &["deepseek"];

/// Per-provider capability quirks, resolved once when a configuration
/// snapshot is taken rather than re-matched on every call.
///
/// Detection is a substring match against the lowercased base URL. Fragile,
/// but it is the compatibility contract providers are actually keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Whether the provider accepts `response_format={"type":"json_object"}`.
    pub json_response_format: bool,
    /// Whether the provider may return `reasoning_content` on the message.
    pub reasoning_side_channel: bool,
}

impl ProviderCapabilities {
    pub fn detect(base_url: &str) -> Self {
        let url = base_url.to_ascii_lowercase();
        let incompatible = JSON_FORMAT_INCOMPATIBLE.iter().any(|s| url.contains(s));
        let reasoning = REASONING_SIDE_CHANNEL.iter().any(|s| url.contains(s));
        Self {
            json_response_format: !incompatible,
            reasoning_side_channel: reasoning,
        }
    }
}

// =============================================================================
// ENDPOINT
// =============================================================================

/// A fully resolved judge endpoint from a configuration snapshot.
///
/// Carries everything one HTTP call needs; the gateway itself holds no
/// mutable state, so calls against different endpoints (or the same one)
/// may run fully in parallel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeEndpoint {
    /// Provider record id.
    pub id: String,
    /// Human-readable provider name, used in error messages.
    pub name: String,
    /// OpenAI-compatible base URL (with or without trailing slash).
    pub base_url: String,
    /// Model identifier passed through verbatim.
    pub model: String,
    /// Bearer token. Never serialized back to callers.
    pub api_key: String,
    /// Capability quirks resolved at snapshot time.
    pub capabilities: ProviderCapabilities,
}

impl JudgeEndpoint {
    /// Chat completions URL, tolerating a trailing slash on the base URL.
    pub fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

// =============================================================================
// REPLY CONTRACT
// =============================================================================

/// The constrained reply shape every judge call must conform to,
/// regardless of provider-internal behavior.
#[derive(Debug, Clone, Serialize)]
pub struct RankingReply {
    /// Free-text justification. Always non-empty.
    pub reason: String,
    /// Item ids best to worst.
    pub ranking: Vec<String>,
    /// Chain-of-thought side channel, when the provider exposes one.
    pub thinking_process: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RankingReplyJson {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    ranking: Option<Vec<String>>,
    #[serde(default, rename = "thinkingProcess")]
    thinking_process: Option<String>,
}

/// Parse a judge's message content into a [`RankingReply`].
///
/// Strict about the contract: malformed JSON, a missing or empty `reason`,
/// or a missing `ranking` array is a parse error, never a half-formed reply.
pub fn parse_ranking_reply(raw: &str) -> Result<RankingReply, GatewayError> {
    let json_str = extract_json(raw);

    let parsed: RankingReplyJson =
        serde_json::from_str(json_str).map_err(|e| GatewayError::parse(e.to_string()))?;

    let reason = parsed
        .reason
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| GatewayError::parse("missing or empty 'reason'"))?;
    let ranking = parsed
        .ranking
        .ok_or_else(|| GatewayError::parse("missing 'ranking' array"))?;

    Ok(RankingReply {
        reason,
        ranking,
        thinking_process: parsed.thinking_process,
    })
}

/// Extract a JSON object from the content (handles models that wrap the
/// object in prose or markdown fences).
fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find('{') {
        let remainder = &trimmed[start..];
        let mut depth = 0;
        let mut in_string = false;
        let mut escaped = false;
        for (i, c) in remainder.char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' if in_string => escaped = true,
                '"' => in_string = !in_string,
                '{' if !in_string => depth += 1,
                '}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        return &remainder[..=i];
                    }
                }
                _ => {}
            }
        }
    }

    trimmed
}
