//! Minimal email triage example using mailsense as a library.
//!
//! Builds an `EmailPipeline` against an OpenAI-compatible endpoint, loads a
//! template corpus if a path is given, then triages a sample email and
//! prints the outcome as JSON.
//!
//! ```bash
//! export MAILSENSE_API_KEY="sk-..."
//! cargo run -p mailsense --example simple_triage -- templates.json
//! ```

use std::sync::Arc;

use mailsense::{EmailPipeline, OpenAiProvider, ProcessedEmail, RetryingProvider, TemplateStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Create an LLM provider from an API key. Any server speaking the
    //    chat-completions dialect works.
    let api_key =
        std::env::var("MAILSENSE_API_KEY").expect("set MAILSENSE_API_KEY environment variable");
    let base_url =
        std::env::var("MAILSENSE_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("MAILSENSE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let provider = Arc::new(RetryingProvider::with_defaults(OpenAiProvider::new(
        &base_url, &api_key, &model,
    )?));

    // 2. Load the template corpus if a path was given. Without one, every
    //    reply is drafted free-form.
    let store = match std::env::args().nth(1) {
        Some(path) => Some(Arc::new(TemplateStore::load(&path)?)),
        None => None,
    };

    // 3. Build the pipeline.
    let pipeline = EmailPipeline::new(provider, store);

    // 4. Triage a sample email.
    let email = ProcessedEmail {
        uid: 1,
        from: "user@example.com".into(),
        subject: "Cannot restore my membership".into(),
        text: "I reinstalled the app and my premium membership is gone. \
               I already paid for the full year."
            .into(),
        app_version: Some("3.2.1".into()),
        device_info: Some("iPhone 15, iOS 17.4".into()),
        order_id: None,
        user_id: None,
    };

    // 5. Print the outcome and the token spend.
    let outcome = pipeline.process(&email).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    eprintln!(
        "[tokens: {} in / {} out]",
        outcome.usage.prompt_tokens, outcome.usage.completion_tokens
    );

    Ok(())
}
