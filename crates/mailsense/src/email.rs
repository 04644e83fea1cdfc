use serde::{Deserialize, Serialize};

/// An email already fetched and decoded by the upstream mail-ingestion
/// layer. Transport concerns (IMAP, MIME, header decoding) never reach
/// the triage core; this value is its only input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEmail {
    /// Mailbox-unique id assigned upstream.
    pub uid: u32,
    pub from: String,
    pub subject: String,
    /// Decoded plain-text body.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ProcessedEmail {
    /// Subject and body joined, the text every scoring and detection
    /// step works over.
    pub fn full_text(&self) -> String {
        format!("{} {}", self.subject, self.text)
    }

    /// One line per populated metadata field, for prompt context.
    pub fn metadata_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(v) = &self.app_version {
            lines.push(format!("App version: {v}"));
        }
        if let Some(v) = &self.device_info {
            lines.push(format!("Device: {v}"));
        }
        if let Some(v) = &self.order_id {
            lines.push(format!("Order id: {v}"));
        }
        if let Some(v) = &self.user_id {
            lines.push(format!("User id: {v}"));
        }
        lines
    }
}
