//! # analyst-oracle
//!
//! The text-generation oracle behind the analyst pipeline.
//!
//! ## Core Concepts
//! - **ChatMessage**: one role-tagged turn; a conversation is an ordered `Vec`
//! - **LlmProvider**: conversation in, free text out
//! - **Providers**: Gemini, OpenAI-compatible, Anthropic, and a scripted stand-in
//! - **UsageTracker**: token accounting across calls

pub mod provider;

pub use analyst_error::{Error, ErrorKind, ErrorStatus, Result};
pub use provider::{
    AnthropicProvider, AnyProvider, ChatMessage, CompletionRequest, CompletionResponse,
    FinishReason, GeminiProvider, LlmProvider, OpenAIProvider, ProviderConfig, ProviderError,
    ProviderType, Role, ScriptedProvider, Usage, UsageTracker,
};
