use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::analysis::{AnalysisResult, IntentAnalyzer};
use crate::composer::{ResponseComposer, ResponseResult};
use crate::email::ProcessedEmail;
use crate::error::Error;
use crate::llm::LlmProvider;
use crate::llm::types::TokenUsage;
use crate::template::TemplateStore;

/// Everything produced for one email: the analysis, the drafted reply, and
/// the summed token spend of all LLM calls made for it.
#[derive(Debug, Clone, Serialize)]
pub struct EmailOutcome {
    pub uid: u32,
    pub analysis: AnalysisResult,
    pub response: ResponseResult,
    pub usage: TokenUsage,
}

/// One batch slot, in input order.
#[derive(Debug)]
pub struct BatchEntry {
    pub uid: u32,
    pub outcome: Result<EmailOutcome, Error>,
}

/// End-to-end triage for one inbox: analyze, then compose.
///
/// The pipeline is cheap to clone; the store and provider are shared. A
/// missing store is valid: analysis offers the built-in category list and
/// composition drafts every reply free-form.
pub struct EmailPipeline<P> {
    analyzer: Arc<IntentAnalyzer<P>>,
    composer: Arc<ResponseComposer<P>>,
}

impl<P> Clone for EmailPipeline<P> {
    fn clone(&self) -> Self {
        Self {
            analyzer: self.analyzer.clone(),
            composer: self.composer.clone(),
        }
    }
}

impl<P: LlmProvider> EmailPipeline<P> {
    pub fn new(provider: Arc<P>, store: Option<Arc<TemplateStore>>) -> Self {
        let analyzer = IntentAnalyzer::new(provider.clone(), store.clone());
        let store = store.unwrap_or_else(|| Arc::new(TemplateStore::empty()));
        Self {
            analyzer: Arc::new(analyzer),
            composer: Arc::new(ResponseComposer::new(provider, store)),
        }
    }

    /// Process one email end to end.
    ///
    /// Transport and protocol errors from the LLM propagate; parse failures
    /// inside analysis and selection have already degraded to safe defaults
    /// by the time they reach here.
    pub async fn process(&self, email: &ProcessedEmail) -> Result<EmailOutcome, Error> {
        let (analysis, mut usage) = self.analyzer.analyze(email).await?;
        let (response, compose_usage) = self.composer.compose(email, &analysis).await?;
        usage += compose_usage;

        tracing::info!(
            uid = email.uid,
            category = %analysis.category,
            intent = %analysis.intent,
            kind = ?response.kind,
            total_tokens = usage.total(),
            "email processed"
        );

        Ok(EmailOutcome {
            uid: email.uid,
            analysis,
            response,
            usage,
        })
    }
}

impl<P: LlmProvider + 'static> EmailPipeline<P> {
    /// Process a batch with at most `workers` emails in flight.
    ///
    /// Entries come back in input order. A failing email produces an error
    /// entry for its uid; the rest of the batch still completes.
    pub async fn process_batch(
        &self,
        emails: Vec<ProcessedEmail>,
        workers: usize,
    ) -> Vec<BatchEntry> {
        let uids: Vec<u32> = emails.iter().map(|e| e.uid).collect();
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut join_set = JoinSet::new();

        for (idx, email) in emails.into_iter().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break, // semaphore closed
            };
            let pipeline = self.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let outcome = pipeline.process(&email).await;
                (idx, outcome)
            });
        }

        let mut slots: Vec<Option<Result<EmailOutcome, Error>>> =
            (0..uids.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, outcome)) => slots[idx] = Some(outcome),
                Err(e) => {
                    tracing::error!(error = %e, "email task panicked");
                }
            }
        }

        // Fill gaps (panicked tasks) with error entries, keeping input order.
        slots
            .into_iter()
            .zip(uids)
            .map(|(slot, uid)| BatchEntry {
                uid,
                outcome: slot
                    .unwrap_or_else(|| Err(Error::Provider("email task panicked".into()))),
            })
            .collect()
    }
}
