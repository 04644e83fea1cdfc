pub mod retriever;
pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use retriever::{TemplateMatch, TemplateRetriever, extract_keywords};
pub use store::TemplateStore;

/// A canned reply maintained by the support team, in one or more languages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub category: String,
    /// One-line description of the situation this template answers.
    pub scenario: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Reply text keyed by ISO 639-1 language code.
    #[serde(default)]
    pub languages: BTreeMap<String, String>,
}

impl Template {
    /// Reply text in `lang`, falling back to English, then to the first
    /// variant the template carries.
    pub fn text_in(&self, lang: &str) -> Option<&str> {
        self.languages
            .get(lang)
            .or_else(|| self.languages.get("en"))
            .or_else(|| self.languages.values().next())
            .map(String::as_str)
    }
}

/// On-disk corpus layout produced by the template maintenance pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateCorpus {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub total_templates: usize,
    pub templates: Vec<Template>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_with_languages(pairs: &[(&str, &str)]) -> Template {
        Template {
            id: "t-1".into(),
            category: "billing".into(),
            scenario: "user asks about billing".into(),
            keywords: vec![],
            languages: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn text_in_prefers_requested_language() {
        let t = template_with_languages(&[("en", "hello"), ("zh", "你好")]);
        assert_eq!(t.text_in("zh"), Some("你好"));
    }

    #[test]
    fn text_in_falls_back_to_english() {
        let t = template_with_languages(&[("en", "hello"), ("zh", "你好")]);
        assert_eq!(t.text_in("fr"), Some("hello"));
    }

    #[test]
    fn text_in_falls_back_to_first_variant() {
        let t = template_with_languages(&[("de", "hallo"), ("zh", "你好")]);
        // BTreeMap keeps keys sorted, so "de" is the first variant.
        assert_eq!(t.text_in("fr"), Some("hallo"));
    }

    #[test]
    fn text_in_empty_languages_is_none() {
        let t = template_with_languages(&[]);
        assert_eq!(t.text_in("en"), None);
    }

    #[test]
    fn corpus_parses_camel_case_fields() {
        let json = r#"{
            "version": "2.3",
            "generatedAt": "2025-11-02T09:30:00Z",
            "totalTemplates": 1,
            "templates": [{
                "id": "refund-01",
                "category": "退款问题",
                "scenario": "用户申请退款",
                "keywords": ["refund", "退款"],
                "languages": {"en": "We have received your refund request.", "zh": "我们已收到您的退款申请。"}
            }]
        }"#;
        let corpus: TemplateCorpus = serde_json::from_str(json).unwrap();
        assert_eq!(corpus.version, "2.3");
        assert_eq!(corpus.total_templates, 1);
        assert_eq!(corpus.templates[0].id, "refund-01");
        assert_eq!(corpus.templates[0].keywords.len(), 2);
    }
}
