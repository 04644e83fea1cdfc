use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use mailsense::{
    EmailPipeline, MailsenseConfig, OpenAiProvider, ProcessedEmail, RetryConfig, RetryingProvider,
    TemplateStore, TokenUsage,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(config_path), Some(emails_path)) = (args.next(), args.next()) else {
        bail!("Usage: mailsense <config.toml> <emails.json>");
    };

    let config =
        MailsenseConfig::load(&config_path).with_context(|| format!("loading {config_path}"))?;
    let api_key = config.provider.api_key()?;

    let store = match &config.corpus {
        Some(corpus) => {
            let store = TemplateStore::load(&corpus.path)
                .with_context(|| format!("loading corpus {}", corpus.path.display()))?;
            tracing::info!(
                templates = store.len(),
                version = store.version(),
                "template corpus loaded"
            );
            Some(Arc::new(store))
        }
        None => None,
    };

    let raw = std::fs::read_to_string(&emails_path)
        .with_context(|| format!("reading {emails_path}"))?;
    let emails: Vec<ProcessedEmail> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {emails_path}"))?;

    let provider = OpenAiProvider::with_timeout(
        &config.provider.base_url,
        api_key,
        &config.provider.model,
        config.provider.timeout(),
    )?;
    let provider = Arc::new(RetryingProvider::new(
        provider,
        RetryConfig::from(&config.retry),
    ));

    let pipeline = EmailPipeline::new(provider, store);
    let entries = pipeline
        .process_batch(emails, config.pipeline.workers)
        .await;

    let mut total = TokenUsage::default();
    let mut failed = 0usize;
    for entry in &entries {
        match &entry.outcome {
            Ok(outcome) => {
                total += outcome.usage;
                println!("{}", serde_json::to_string(outcome)?);
            }
            Err(e) => {
                failed += 1;
                let line = serde_json::json!({ "uid": entry.uid, "error": e.to_string() });
                println!("{line}");
            }
        }
    }

    eprintln!(
        "\n---\nEmails: {} ok / {} failed | Tokens used: {} in / {} out",
        entries.len() - failed,
        failed,
        total.prompt_tokens,
        total.completion_tokens,
    );

    Ok(())
}
