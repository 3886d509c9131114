//! Narratable text units.

use std::fmt;
use std::sync::Arc;

/// An immutable block of narratable text (one story page, after template substitution).
///
/// Cloning is cheap; the text is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextUnit {
    text: Arc<str>,
}

impl TextUnit {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self { text: text.into() }
    }

    /// The literal text as supplied by the content layer
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Cache identity: the trimmed literal text
    #[must_use]
    pub fn key(&self) -> &str {
        self.text.trim()
    }

    /// True when there is nothing to narrate
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.key().is_empty()
    }
}

impl fmt::Display for TextUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for TextUnit {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for TextUnit {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// What the engine needs to narrate one unit: the text plus voice and model selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrationRequest {
    pub unit: TextUnit,
    pub voice_id: String,
    pub model_id: String,
}

impl NarrationRequest {
    pub fn new(
        unit: impl Into<TextUnit>,
        voice_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            unit: unit.into(),
            voice_id: voice_id.into(),
            model_id: model_id.into(),
        }
    }

    /// Cache key of the underlying unit
    #[must_use]
    pub fn key(&self) -> &str {
        self.unit.key()
    }

    /// Short preview of the text for log lines
    #[must_use]
    pub fn preview(&self) -> String {
        const PREVIEW_CHARS: usize = 32;
        let key = self.key();
        if key.chars().count() <= PREVIEW_CHARS {
            key.to_string()
        } else {
            let head: String = key.chars().take(PREVIEW_CHARS).collect();
            format!("{head}…")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_trimmed() {
        let unit = TextUnit::new("  Pip trotted along.\n");
        assert_eq!(unit.key(), "Pip trotted along.");
        assert_eq!(unit.text(), "  Pip trotted along.\n");
    }

    #[test]
    fn test_blank_unit() {
        assert!(TextUnit::new(" \t\n").is_blank());
        assert!(!TextUnit::new("hi").is_blank());
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let request = NarrationRequest::new(
            "On a sunny forest path, a little hedgehog named Pip trotted along.",
            "voice",
            "model",
        );
        let preview = request.preview();
        assert!(preview.ends_with('…'));
        assert_eq!(preview.chars().count(), 33);
    }

    #[test]
    fn test_preview_keeps_short_text() {
        let request = NarrationRequest::new(" Kindness. ", "voice", "model");
        assert_eq!(request.preview(), "Kindness.");
    }
}
