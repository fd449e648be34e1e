// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Language Model Domain Interface (Anti-Corruption Layer)
//
// Defines the domain interface for chat model providers following DDD
// principles. The core never sees a vendor wire protocol; it sees a turn
// of content, optional tool-call proposals and a usage report.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::tool::ToolCall;
use crate::domain::cancellation::CancelSignal;

/// Domain interface for chat model providers.
/// Every call is a suspension point and takes the caller's cancel signal.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn chat(&self, request: ChatRequest, cancel: CancelSignal) -> Result<ModelTurn, LlmError>;
}

/// One request to the model: rendered instructions plus the conversation so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub instructions: String,
    pub messages: Vec<ChatMessage>,
    /// Descriptors of the tools the model may propose calling.
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatMessage {
    Human { content: String },
    Ai { content: String },
    /// Result (or structured rejection) of a tool call, fed back to the model.
    Tool { call_id: String, content: serde_json::Value },
}

/// One completed model turn.
#[derive(Debug, Clone)]
pub struct ModelTurn {
    pub content: String,
    /// Tool invocations the model proposes; empty when the turn is final.
    pub tool_calls: Vec<ToolCall>,
    pub usage: UsageDelta,
    pub finish_reason: FinishReason,
}

/// Reason why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural completion (model decided to stop)
    Stop,
    /// The model wants tool results before continuing
    ToolCalls,
    /// Hit the provider's output limit
    Length,
}

/// Usage report for a single model call.
///
/// Token and price fields are deltas to accumulate; unit-price/price-unit
/// and currency describe the pricing context of this call and overwrite
/// whatever the execution recorded before. All fields default to zero so a
/// provider may report partially.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UsageDelta {
    pub prompt_tokens: u64,
    pub prompt_unit_price: f64,
    pub prompt_price_unit: f64,
    pub prompt_price: f64,
    pub completion_tokens: u64,
    pub completion_unit_price: f64,
    pub completion_price_unit: f64,
    pub completion_price: f64,
    pub total_tokens: u64,
    pub total_price: f64,
    pub currency: Option<String>,
    /// Wall-clock latency of the call in milliseconds.
    pub latency: Option<f64>,
}

/// Errors that can occur during model operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Call cancelled: {0}")]
    Cancelled(String),
}
