//! Natural-language prompt extraction interface.
//!
//! Location/time/tag extraction from prompts is an external NLP concern;
//! the coordinator consumes its structured output through this trait.

use crate::types::{GeoBox, TimeRange};

/// One location mention in a prompt, already geocoded to a bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationMention {
    /// Geocoded bounding box of the mentioned place.
    pub bbox: GeoBox,
    /// Intent strength of this mention in [0, 1].
    pub weight: f64,
}

/// Structured metadata extracted from a search prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptMeta {
    /// Requested time range, if the prompt mentions one.
    pub time_range: Option<TimeRange>,
    /// How strongly the prompt signals time, in [0, 1].
    pub time_weight: f64,
    /// Location mentions with intent weights.
    pub locations: Vec<LocationMention>,
    /// Keyword tags.
    pub tags: Vec<String>,
}

impl PromptMeta {
    /// Strongest location intent across all mentions.
    pub fn location_weight(&self) -> f64 {
        self.locations.iter().fold(0.0, |w, l| w.max(l.weight))
    }

    /// Whether the prompt carries any structured metadata signal at all.
    pub fn is_empty(&self) -> bool {
        self.time_range.is_none() && self.locations.is_empty() && self.tags.is_empty()
    }
}

/// Prompt to structured-metadata extractor seam.
pub trait PromptExtractor: Send + Sync {
    fn extract(&self, prompt: &str) -> PromptMeta;
}

/// Extractor that finds no structured signal. Used when no NLP backend is
/// wired in; searches then rank on vector similarity alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPromptExtractor;

impl PromptExtractor for NoopPromptExtractor {
    fn extract(&self, _prompt: &str) -> PromptMeta {
        PromptMeta::default()
    }
}
