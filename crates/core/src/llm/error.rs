use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

/// Where in a generation round trip the provider output was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStage {
    /// Non-2xx response from the provider.
    Http,
    /// Analysis or summary came back blank once code fences were stripped.
    EmptyNarrative,
    /// Takeaways were still unusable after the repair round.
    TakeawaysAfterRepair,
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GenerationStage::Http => "http",
            GenerationStage::EmptyNarrative => "empty_narrative",
            GenerationStage::TakeawaysAfterRepair => "takeaways_after_repair",
        })
    }
}

/// Narrative output that could not be merged into a document. Keeps the raw provider text
/// so a rejected event can be diagnosed from the Sentry event alone.
#[derive(Debug, Clone, thiserror::Error)]
#[error("narrative generation failed (provider={provider}, stage={stage}): {detail}")]
pub struct NarrativeError {
    pub provider: Provider,
    pub stage: GenerationStage,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl NarrativeError {
    pub fn new(provider: Provider, stage: GenerationStage, detail: impl Into<String>) -> Self {
        Self {
            provider,
            stage,
            detail: detail.into(),
            raw_output: None,
            raw_response_json: None,
        }
    }

    pub fn with_raw(mut self, output: String, response_json: Option<Value>) -> Self {
        self.raw_output = Some(output);
        self.raw_response_json = response_json;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_names_provider_and_stage() {
        let err = NarrativeError::new(Provider::Anthropic, GenerationStage::EmptyNarrative, "slot=morning_open")
            .with_raw(String::new(), None);
        assert_eq!(
            err.to_string(),
            "narrative generation failed (provider=anthropic, stage=empty_narrative): slot=morning_open"
        );
        assert_eq!(err.raw_output.as_deref(), Some(""));
    }

    #[test]
    fn survives_anyhow_downcast() {
        let err: anyhow::Error =
            NarrativeError::new(Provider::Anthropic, GenerationStage::Http, "status=529").into();
        let diag = err.downcast_ref::<NarrativeError>().unwrap();
        assert_eq!(diag.stage, GenerationStage::Http);
    }
}
