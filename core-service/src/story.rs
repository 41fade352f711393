//! Story and page model as persisted by the reader.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One illustrated page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryPage {
    #[serde(default)]
    pub text: String,

    /// Prompt the illustration was generated from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,

    /// Image URL or data URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Illustration generation failed for this page
    #[serde(default)]
    pub image_error: bool,
}

impl StoryPage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Text to read aloud, `None` for pages without text.
    pub fn narration_text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,

    /// What the reader asked the story to be about
    #[serde(default)]
    pub prompt: String,

    #[serde(default)]
    pub pages: Vec<StoryPage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Story {
    pub fn new(id: impl Into<String>, title: impl Into<String>, pages: Vec<StoryPage>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            prompt: String::new(),
            pages,
            created_at: None,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: usize) -> Option<&StoryPage> {
        self.pages.get(index)
    }

    /// Narration text per page, in page order. Pages without text map to an
    /// empty string.
    pub fn narration_texts(&self) -> Vec<String> {
        self.pages
            .iter()
            .map(|page| page.narration_text().unwrap_or_default().to_string())
            .collect()
    }
}
