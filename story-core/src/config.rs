//! Configuration for the story workflow.
//!
//! [`GeneratorConfig`] holds per-step overrides for the model calls (prompt
//! text, model name, temperature) and resolves them against built-in
//! defaults. [`WorkflowConfig`] adds the engine's timing and sampling knobs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

/// Model used when neither the step nor the config names one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A model call made by the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStep {
    CompanionProposal,
    Scenarios,
    Synopses,
    Story,
    TitleRefinement,
}

impl GenerationStep {
    pub fn name(&self) -> &'static str {
        match self {
            GenerationStep::CompanionProposal => "companion_proposal",
            GenerationStep::Scenarios => "scenarios",
            GenerationStep::Synopses => "synopses",
            GenerationStep::Story => "story",
            GenerationStep::TitleRefinement => "title_refinement",
        }
    }

    fn default_temperature(&self) -> f32 {
        match self {
            GenerationStep::CompanionProposal => 0.4,
            GenerationStep::Scenarios => 0.9,
            GenerationStep::Synopses => 0.7,
            GenerationStep::Story => 0.8,
            GenerationStep::TitleRefinement => 0.5,
        }
    }

    fn default_max_tokens(&self) -> usize {
        match self {
            GenerationStep::Story => 4096,
            GenerationStep::Scenarios | GenerationStep::Synopses => 1500,
            GenerationStep::CompanionProposal | GenerationStep::TitleRefinement => 500,
        }
    }
}

/// Overrides for a single step. Unset fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOverride {
    /// Replaces the built-in instructions for the step.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Fully resolved settings for one model call.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Instructions that replace the built-in prompt, when configured.
    pub prompt_override: Option<String>,
}

/// Per-step generator overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Model for steps without their own override.
    #[serde(default)]
    pub default_model: Option<String>,

    #[serde(default)]
    pub steps: HashMap<GenerationStep, StepOverride>,
}

impl GeneratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model used by steps without their own override.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Set the override for a step.
    pub fn with_step(mut self, step: GenerationStep, overrides: StepOverride) -> Self {
        self.steps.insert(step, overrides);
        self
    }

    /// Parse from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    /// Reject overrides the model service would refuse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (step, overrides) in &self.steps {
            if let Some(t) = overrides.temperature {
                if !(0.0..=1.0).contains(&t) {
                    return Err(ConfigError::Invalid(format!(
                        "temperature {t} for step '{}' is outside 0.0..=1.0",
                        step.name()
                    )));
                }
            }
            if overrides.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "empty model name for step '{}'",
                    step.name()
                )));
            }
        }
        Ok(())
    }

    /// Resolve the settings for a step: step override, then config default,
    /// then built-in default.
    pub fn settings(&self, step: GenerationStep) -> StepSettings {
        let overrides = self.steps.get(&step);
        let model = overrides
            .and_then(|o| o.model.clone())
            .or_else(|| self.default_model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let temperature = overrides
            .and_then(|o| o.temperature)
            .unwrap_or_else(|| step.default_temperature());
        let prompt_override = overrides
            .and_then(|o| o.prompt.clone())
            .filter(|p| !p.trim().is_empty());

        StepSettings {
            model,
            temperature,
            max_tokens: step.default_max_tokens(),
            prompt_override,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub generator: GeneratorConfig,

    /// A compile lock older than this is considered abandoned.
    pub lock_timeout: Duration,

    /// Compiles running longer than this are logged. Nothing is aborted.
    pub compile_timeout: Duration,

    /// Added to the synopsis temperature when more synopses are requested.
    pub synopsis_temperature_step: f32,

    /// Upper bound for the raised synopsis temperature.
    pub max_temperature: f32,

    /// Characters of prompt/response kept in each generation trace.
    pub trace_excerpt_chars: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            lock_timeout: Duration::from_secs(120),
            compile_timeout: Duration::from_secs(180),
            synopsis_temperature_step: 0.2,
            max_temperature: 1.0,
            trace_excerpt_chars: 2000,
        }
    }
}

impl WorkflowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator(mut self, generator: GeneratorConfig) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }

    pub fn with_trace_excerpt_chars(mut self, chars: usize) -> Self {
        self.trace_excerpt_chars = chars;
        self
    }

    /// Temperature for a "more synopses" request.
    pub fn raised_synopsis_temperature(&self, base: f32) -> f32 {
        (base + self.synopsis_temperature_step).min(self.max_temperature)
    }
}
