//! Word-level timing: extraction from character alignment and heuristic estimation.

use crate::error::{CoreError, Result};
use serde::Deserialize;

/// Timing of a single spoken word, in seconds from the start of the narration
#[derive(Debug, Clone, PartialEq)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

impl WordTiming {
    pub fn new(word: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            word: word.into(),
            start,
            end,
        }
    }

    /// Midpoint of the word, used as a last-resort highlight anchor
    #[must_use]
    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }
}

/// Per-character alignment as returned by the remote speech source.
///
/// The three arrays must have equal length.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CharacterAlignment {
    pub characters: Vec<String>,
    #[serde(rename = "character_start_times_seconds")]
    pub start_times: Vec<f64>,
    #[serde(rename = "character_end_times_seconds")]
    pub end_times: Vec<f64>,
}

impl CharacterAlignment {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    /// Check the shape contract: equal lengths and finite timestamps
    ///
    /// # Errors
    ///
    /// Returns `MalformedAlignment` if the arrays disagree in length or contain
    /// non-finite timestamps.
    pub fn validate(&self) -> Result<()> {
        let chars = self.characters.len();
        if self.start_times.len() != chars || self.end_times.len() != chars {
            return Err(CoreError::MalformedAlignment {
                reason: format!(
                    "{} characters but {} start times and {} end times",
                    chars,
                    self.start_times.len(),
                    self.end_times.len()
                ),
            });
        }

        let non_finite = self
            .start_times
            .iter()
            .chain(&self.end_times)
            .any(|t| !t.is_finite());
        if non_finite {
            return Err(CoreError::MalformedAlignment {
                reason: "non-finite timestamp".to_string(),
            });
        }

        Ok(())
    }

    /// The text the alignment spells out
    #[must_use]
    pub fn text(&self) -> String {
        self.characters.concat()
    }
}

/// Convert a character alignment into word timings.
///
/// Whitespace closes the running word; a word spans from its first character's
/// start to its last character's end.
///
/// # Errors
///
/// Returns `MalformedAlignment` if the alignment fails [`CharacterAlignment::validate`].
pub fn extract_word_timings(alignment: &CharacterAlignment) -> Result<Vec<WordTiming>> {
    alignment.validate()?;

    let mut timings = Vec::new();
    let mut word = String::new();
    let mut word_start = 0.0;
    let mut word_end = 0.0;

    for ((ch, &start), &end) in alignment
        .characters
        .iter()
        .zip(&alignment.start_times)
        .zip(&alignment.end_times)
    {
        if ch.chars().all(char::is_whitespace) {
            close_word(&mut timings, &mut word, word_start, word_end);
            continue;
        }

        if word.is_empty() {
            word_start = start;
        }
        word.push_str(ch);
        word_end = end;
    }
    close_word(&mut timings, &mut word, word_start, word_end);

    Ok(timings)
}

fn close_word(timings: &mut Vec<WordTiming>, word: &mut String, start: f64, end: f64) {
    if word.is_empty() {
        return;
    }
    timings.push(WordTiming {
        word: std::mem::take(word),
        start,
        end: end.max(start),
    });
}

/// Knobs for [`estimate_word_timings`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimateParams {
    pub words_per_second: f64,
    /// Silence before the first word
    pub leading_delay: f64,
    /// Silence between consecutive words
    pub word_gap: f64,
}

impl EstimateParams {
    pub const DEFAULT_LEADING_DELAY: f64 = 0.1;
    pub const DEFAULT_WORD_GAP: f64 = 0.05;

    #[must_use]
    pub const fn new(words_per_second: f64) -> Self {
        Self {
            words_per_second,
            leading_delay: Self::DEFAULT_LEADING_DELAY,
            word_gap: Self::DEFAULT_WORD_GAP,
        }
    }
}

const LONG_WORD_CHARS: usize = 6;
const SHORT_WORD_CHARS: usize = 3;
const LONG_WORD_FACTOR: f64 = 1.3;
const SHORT_WORD_FACTOR: f64 = 0.8;
const SENTENCE_END_FACTOR: f64 = 1.4;
const CLAUSE_END_FACTOR: f64 = 1.2;

/// Estimate word timings for text without alignment data.
///
/// Best effort only: durations are a nominal `1 / words_per_second` scaled by
/// word length and trailing punctuation. Deterministic for a given input.
#[must_use]
pub fn estimate_word_timings(text: &str, params: EstimateParams) -> Vec<WordTiming> {
    let nominal = if params.words_per_second > 0.0 {
        1.0 / params.words_per_second
    } else {
        0.0
    };

    let mut cursor = params.leading_delay.max(0.0);
    text.split_whitespace()
        .map(|word| {
            let duration = nominal * duration_factor(word);
            let timing = WordTiming::new(word, cursor, cursor + duration);
            cursor = timing.end + params.word_gap.max(0.0);
            timing
        })
        .collect()
}

fn duration_factor(word: &str) -> f64 {
    // Length counts attached punctuation too
    let chars = word.chars().count();
    let mut factor = 1.0;

    if chars > LONG_WORD_CHARS {
        factor *= LONG_WORD_FACTOR;
    } else if chars < SHORT_WORD_CHARS {
        factor *= SHORT_WORD_FACTOR;
    }

    // Closing quotes and brackets don't hide the punctuation before them
    let trimmed = word.trim_end_matches(['"', '\'', ')', '”', '’', '」', '』']);
    match trimmed.chars().last() {
        Some('.' | '!' | '?' | '。' | '！' | '？') => factor *= SENTENCE_END_FACTOR,
        Some(',' | ';' | ':' | '、' | '，') => factor *= CLAUSE_END_FACTOR,
        _ => {}
    }

    factor
}

/// Where narration is expected to end, according to the timings
#[must_use]
pub fn timings_end(timings: &[WordTiming]) -> f64 {
    timings.last().map_or(0.0, |t| t.end)
}
