pub mod analysis;
pub mod composer;
pub mod config;
pub mod email;
pub mod error;
pub mod language;
pub mod llm;
pub mod pipeline;
pub mod template;

mod util;

pub use analysis::{AnalysisResult, Intent, IntentAnalyzer, Priority, Sentiment};
pub use composer::{MatchSummary, ResponseComposer, ResponseKind, ResponseResult};
pub use config::{MailsenseConfig, RetrySettings};
pub use email::ProcessedEmail;
pub use error::Error;
pub use language::detect_language;
pub use llm::LlmProvider;
pub use llm::openai::OpenAiProvider;
pub use llm::retry::{RetryConfig, RetryingProvider};
pub use llm::types::{ChatMessage, CompletionRequest, CompletionResponse, Role, TokenUsage};
pub use pipeline::{BatchEntry, EmailOutcome, EmailPipeline};
pub use template::{Template, TemplateMatch, TemplateRetriever, TemplateStore};
