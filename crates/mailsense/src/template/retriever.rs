use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::email::ProcessedEmail;

use super::{Template, TemplateStore};

/// Keyword-match weights. An exact token hit outranks a substring hit,
/// and both stack when they co-occur; scenario-word hits are a weak
/// secondary signal.
const TOKEN_HIT: f32 = 2.0;
const SUBSTRING_HIT: f32 = 1.0;
const SCENARIO_WORD_HIT: f32 = 0.5;

/// A scored candidate produced by [`TemplateRetriever::find_best_matches`].
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMatch<'a> {
    pub template: &'a Template,
    pub score: f32,
    /// Normalized template keywords that contributed to the score.
    pub matched_keywords: BTreeSet<String>,
}

/// Deterministic keyword scorer over the template store.
///
/// Retrieval never calls the LLM; it produces the candidate list the
/// composer hands to the selection call.
pub struct TemplateRetriever {
    store: Arc<TemplateStore>,
}

impl TemplateRetriever {
    pub fn new(store: Arc<TemplateStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<TemplateStore> {
        &self.store
    }

    /// Score templates against `email` and return the top `limit` matches,
    /// best first. Zero-scoring templates are dropped; ties keep corpus
    /// order.
    pub fn find_best_matches(
        &self,
        email: &ProcessedEmail,
        category: &str,
        limit: usize,
    ) -> Vec<TemplateMatch<'_>> {
        let text = email.full_text().to_lowercase();
        let tokens: HashSet<String> = extract_keywords(&text).into_iter().collect();

        let mut matches: Vec<TemplateMatch<'_>> = self
            .candidate_indices(category)
            .into_iter()
            .filter_map(|idx| {
                let template = self.store.get(idx)?;
                let (score, matched_keywords) = score_template(template, &text, &tokens);
                (score > 0.0).then_some(TemplateMatch {
                    template,
                    score,
                    matched_keywords,
                })
            })
            .collect();

        // Stable sort: equal scores keep corpus order.
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(limit);

        tracing::debug!(
            category = category,
            candidates = matches.len(),
            top_score = matches.first().map(|m| m.score).unwrap_or(0.0),
            "template retrieval finished"
        );
        matches
    }

    /// Candidate scoping: exactly-named category first, then the first
    /// corpus-order category matching case-insensitively as a substring in
    /// either direction, then the whole corpus.
    fn candidate_indices(&self, category: &str) -> Vec<usize> {
        if let Some(indices) = self.store.indices_for_category(category) {
            return indices.to_vec();
        }

        let needle = category.trim().to_lowercase();
        if !needle.is_empty() {
            for name in self.store.categories() {
                let hay = name.to_lowercase();
                if (hay.contains(&needle) || needle.contains(&hay))
                    && let Some(indices) = self.store.indices_for_category(name)
                {
                    return indices.to_vec();
                }
            }
        }

        (0..self.store.len()).collect()
    }
}

/// Tokenize text into deduplicated lowercase keywords: runs of
/// alphanumeric characters (CJK included) longer than two characters,
/// in first-appearance order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(|t| t.to_lowercase())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn score_template(
    template: &Template,
    text: &str,
    tokens: &HashSet<String>,
) -> (f32, BTreeSet<String>) {
    let mut score = 0.0;
    let mut matched_keywords = BTreeSet::new();

    for keyword in &template.keywords {
        let kw = keyword.trim().to_lowercase();
        if kw.is_empty() {
            continue;
        }
        let mut hit = false;
        if tokens.contains(&kw) {
            score += TOKEN_HIT;
            hit = true;
        }
        if text.contains(&kw) {
            score += SUBSTRING_HIT;
            hit = true;
        }
        if hit {
            matched_keywords.insert(kw);
        }
    }

    for word in scenario_words(&template.scenario) {
        if text.contains(&word) {
            score += SCENARIO_WORD_HIT;
        }
    }

    (score, matched_keywords)
}

/// Scenario words: split on whitespace and CJK commas, trim punctuation,
/// keep words longer than two characters.
fn scenario_words(scenario: &str) -> impl Iterator<Item = String> + '_ {
    scenario
        .split(|c: char| c.is_whitespace() || c == '，' || c == '、')
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.chars().count() > 2)
}
