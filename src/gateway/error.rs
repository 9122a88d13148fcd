//! Error types for the judge gateway.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when calling a judge provider.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The call did not finish before the per-call deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Transport-level failure (DNS, connect, TLS, body read).
    #[error("connection error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider replied with a non-success HTTP status.
    #[error("provider {provider} returned HTTP {status}: {body}")]
    Provider {
        provider: String,
        status: u16,
        body: String,
    },

    /// Provider replied, but not in the required JSON ranking shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// Misconfigured endpoint (bad URL, unusable API key, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn provider(provider: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            status,
            body: body.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Stable machine-readable code, reported through the progress channel.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "AI_TIMEOUT",
            Self::Http(_) => "AI_CONNECTION_FAILED",
            Self::Provider { .. } => "AI_CONNECTION_FAILED",
            Self::Parse(_) => "AI_PARSE_ERROR",
            Self::Config(_) => "AI_CONFIG_ERROR",
        }
    }

    /// HTTP status from the provider, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Provider { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
