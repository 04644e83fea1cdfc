pub mod openai;
pub mod retry;
pub mod types;

use crate::llm::types::{CompletionRequest, CompletionResponse};

/// Trait for LLM providers.
///
/// Implementors must be thread-safe (`Send + Sync`) so a single provider
/// can serve many emails concurrently.
pub trait LlmProvider: Send + Sync {
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, crate::error::Error>> + Send;
}
