use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::Error;

use super::{Template, TemplateCorpus};

/// Immutable, indexed view over a loaded template corpus.
///
/// Built once at startup and shared behind `Arc`; nothing here mutates
/// after construction, so lookups need no locking.
#[derive(Debug)]
pub struct TemplateStore {
    templates: Vec<Template>,
    /// Category names in first-appearance corpus order.
    category_order: Vec<String>,
    by_category: HashMap<String, Vec<usize>>,
    by_keyword: HashMap<String, Vec<usize>>,
    version: String,
    generated_at: DateTime<Utc>,
}

impl TemplateStore {
    /// Store with no templates. Retrieval over it yields no candidates.
    pub fn empty() -> Self {
        Self {
            templates: Vec::new(),
            category_order: Vec::new(),
            by_category: HashMap::new(),
            by_keyword: HashMap::new(),
            version: String::new(),
            generated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Load and index a corpus file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Corpus(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, Error> {
        let corpus: TemplateCorpus = serde_json::from_str(raw)
            .map_err(|e| Error::Corpus(format!("invalid corpus JSON: {e}")))?;
        Self::from_corpus(corpus)
    }

    pub fn from_corpus(corpus: TemplateCorpus) -> Result<Self, Error> {
        if corpus.total_templates != corpus.templates.len() {
            tracing::warn!(
                declared = corpus.total_templates,
                actual = corpus.templates.len(),
                "corpus totalTemplates does not match the template count"
            );
        }

        let mut category_order = Vec::new();
        let mut by_category: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_keyword: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, template) in corpus.templates.iter().enumerate() {
            if template.languages.is_empty() {
                return Err(Error::Corpus(format!(
                    "template {} has no language variants",
                    template.id
                )));
            }

            if !by_category.contains_key(&template.category) {
                category_order.push(template.category.clone());
            }
            by_category
                .entry(template.category.clone())
                .or_default()
                .push(idx);

            for keyword in &template.keywords {
                let normalized = keyword.trim().to_lowercase();
                if normalized.is_empty() {
                    continue;
                }
                let entries = by_keyword.entry(normalized).or_default();
                if entries.last() != Some(&idx) {
                    entries.push(idx);
                }
            }
        }

        tracing::debug!(
            templates = corpus.templates.len(),
            categories = category_order.len(),
            version = %corpus.version,
            "template corpus indexed"
        );

        Ok(Self {
            templates: corpus.templates,
            category_order,
            by_category,
            by_keyword,
            version: corpus.version,
            generated_at: corpus.generated_at,
        })
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Template> {
        self.templates.get(idx)
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    /// Category names in the order they first appear in the corpus.
    pub fn categories(&self) -> &[String] {
        &self.category_order
    }

    /// Corpus positions of all templates in an exactly-named category.
    pub fn indices_for_category(&self, category: &str) -> Option<&[usize]> {
        self.by_category.get(category).map(Vec::as_slice)
    }

    /// Templates declaring `keyword`, matched case-insensitively.
    pub fn templates_with_keyword(&self, keyword: &str) -> Vec<&Template> {
        let normalized = keyword.trim().to_lowercase();
        self.by_keyword
            .get(&normalized)
            .map(|indices| indices.iter().filter_map(|&i| self.get(i)).collect())
            .unwrap_or_default()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }
}
