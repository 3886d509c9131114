//! Story files: a title, optional voice selection and the page texts.

use readalong_core::{CoreError, NarrationRequest, SpeechConfig};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// A story as read from a TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct Story {
    pub title: String,
    /// Overrides `speech.voice_id` for this story
    #[serde(default)]
    pub voice_id: Option<String>,
    /// Overrides `speech.model_id` for this story
    #[serde(default)]
    pub model_id: Option<String>,
    pub pages: Vec<String>,
}

impl Story {
    /// Load and check a story file.
    ///
    /// # Errors
    ///
    /// Returns `StoryInvalid` if the file cannot be parsed or has no pages to
    /// narrate, or `IoError` if it cannot be read.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content).map_err(|reason| CoreError::StoryInvalid {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        let story: Self = toml::from_str(content).map_err(|e| e.to_string())?;
        if story.pages.is_empty() {
            return Err("story has no pages".to_string());
        }
        if story.pages.iter().all(|page| page.trim().is_empty()) {
            return Err("every page is blank".to_string());
        }
        Ok(story)
    }

    /// One narration request per page, with the story's voice or the configured one
    #[must_use]
    pub fn requests(&self, speech: &SpeechConfig) -> Vec<NarrationRequest> {
        let voice_id = self.voice_id.as_deref().unwrap_or(&speech.voice_id);
        let model_id = self.model_id.as_deref().unwrap_or(&speech.model_id);
        self.pages
            .iter()
            .map(|page| NarrationRequest::new(page.as_str(), voice_id, model_id))
            .collect()
    }
}
