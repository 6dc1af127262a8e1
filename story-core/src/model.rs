//! Model invocation.
//!
//! [`ModelClient`] is the seam to the generative model: it takes a prompt
//! plus the output contract and returns raw JSON. [`Generator`] sits on top
//! and is what the workflow calls. It resolves nothing itself, but times the
//! call, validates the output against the contract, and records a
//! [`GenerationTrace`] whether the call succeeded or not.

use crate::clock::Clock;
use crate::config::{GenerationStep, StepSettings};
use crate::contract::{self, ContractViolation, OutputContract};
use crate::store::DocumentStore;
use crate::trace::{excerpt, GenerationTrace};
use async_trait::async_trait;
use claude::{Claude, Request};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Errors from a model call.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model API error: {0}")]
    Api(#[from] claude::Error),

    #[error("Model returned no structured output for '{contract}'")]
    MissingOutput { contract: String },

    #[error("Model output violated its contract at {0}")]
    Contract(#[from] ContractViolation),

    #[error("Model unavailable: {0}")]
    Unavailable(String),
}

/// One call to the model.
#[derive(Debug, Clone)]
pub struct ModelCall {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub system: String,
    pub prompt: String,
    /// Tool the model is forced to call; its input schema is the contract.
    pub contract: claude::Tool,
}

impl ModelCall {
    pub fn contract_name(&self) -> &str {
        &self.contract.name
    }
}

/// Something that can turn a prompt into contract-shaped JSON.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Invoke the model and return its raw structured output. Validation is
    /// left to the caller.
    async fn invoke(&self, call: &ModelCall) -> Result<Value, ModelError>;
}

/// [`ModelClient`] backed by the Claude Messages API.
#[derive(Clone)]
pub struct ClaudeModel {
    client: Claude,
}

impl ClaudeModel {
    pub fn new(client: Claude) -> Self {
        Self { client }
    }

    /// Build from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, ModelError> {
        Ok(Self::new(Claude::from_env()?))
    }
}

#[async_trait]
impl ModelClient for ClaudeModel {
    async fn invoke(&self, call: &ModelCall) -> Result<Value, ModelError> {
        let request = Request::new(&call.prompt)
            .with_model(&call.model)
            .with_system(&call.system)
            .with_temperature(call.temperature)
            .with_max_tokens(call.max_tokens)
            .with_required_tool(call.contract.clone());

        let response = self.client.complete(&request).await?;

        if let Some(input) = response.tool_input(call.contract_name()) {
            return Ok(input.clone());
        }

        // Some models answer in prose despite the forced tool; accept JSON
        // found in the text.
        let text = response.text();
        serde_json::from_str(extract_json(&text)).map_err(|_| ModelError::MissingOutput {
            contract: call.contract_name().to_string(),
        })
    }
}

/// Strip a markdown code fence from around a JSON payload, if present.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    text
}

/// What the workflow asks the generator for.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub step: GenerationStep,
    pub session_id: Option<String>,
    pub settings: StepSettings,
    pub system: String,
    pub prompt: String,
}

/// Contract-checked, traced model invocation.
#[derive(Clone)]
pub struct Generator {
    model: Arc<dyn ModelClient>,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    excerpt_limit: usize,
}

impl Generator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        excerpt_limit: usize,
    ) -> Self {
        Self {
            model,
            store,
            clock,
            excerpt_limit,
        }
    }

    /// Run one model call and decode its output as `T`.
    pub async fn generate<T>(&self, request: GenerationRequest) -> Result<T, ModelError>
    where
        T: OutputContract + DeserializeOwned,
    {
        let call = ModelCall {
            model: request.settings.model.clone(),
            temperature: request.settings.temperature,
            max_tokens: request.settings.max_tokens,
            system: request.system,
            prompt: request.prompt,
            contract: T::as_tool(),
        };

        let started_at = self.clock.now();
        let timer = Instant::now();
        let raw = self.model.invoke(&call).await;
        let duration_ms = timer.elapsed().as_millis() as u64;

        let response_excerpt = raw
            .as_ref()
            .ok()
            .map(|value| excerpt(&value.to_string(), self.excerpt_limit));
        let result = raw.and_then(|value| contract::parse::<T>(value).map_err(ModelError::from));

        match &result {
            Ok(_) => tracing::info!(
                step = request.step.name(),
                session_id = request.session_id.as_deref().unwrap_or("-"),
                model = %call.model,
                duration_ms,
                "Model call succeeded"
            ),
            Err(e) => tracing::warn!(
                step = request.step.name(),
                session_id = request.session_id.as_deref().unwrap_or("-"),
                model = %call.model,
                duration_ms,
                error = %e,
                "Model call failed"
            ),
        }

        let trace = GenerationTrace {
            id: Uuid::new_v4(),
            session_id: request.session_id,
            step: request.step,
            model: call.model.clone(),
            temperature: call.temperature,
            started_at,
            duration_ms,
            success: result.is_ok(),
            prompt_excerpt: excerpt(&call.prompt, self.excerpt_limit),
            response_excerpt,
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        if let Err(e) = self.store.append_trace(trace).await {
            tracing::warn!(error = %e, "Failed to record generation trace");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::GeneratorConfig;
    use crate::store::MemoryStore;
    use crate::testing::MockModel;
    use serde::Deserialize;
    use serde_json::json;

    /// A list of words
    #[derive(Debug, Deserialize, OutputContract)]
    #[contract(name = "word_list")]
    struct WordList {
        #[contract(min_items = 1, max_items = 3)]
        words: Vec<String>,
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            step: GenerationStep::Scenarios,
            session_id: Some("s1".to_string()),
            settings: GeneratorConfig::default().settings(GenerationStep::Scenarios),
            system: "system".to_string(),
            prompt: "give me words".to_string(),
        }
    }

    #[test]
    fn test_extract_json_fenced() {
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json("```\n[1]\n```"), "[1]");
        assert_eq!(extract_json("  {\"a\":1} "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_generate_traces_success() {
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(MockModel::new());
        model.push("word_list", json!({"words": ["moon", "boat"]}));

        let generator = Generator::new(model.clone(), store.clone(), Arc::new(SystemClock), 2000);
        let words: WordList = generator.generate(request()).await.unwrap();
        assert_eq!(words.words, vec!["moon", "boat"]);

        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].contract_name(), "word_list");
        assert_eq!(calls[0].temperature, 0.9);

        let traces = store.traces().await;
        assert_eq!(traces.len(), 1);
        assert!(traces[0].success);
        assert_eq!(traces[0].session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_contract_violation_is_traced_as_failure() {
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(MockModel::new());
        model.push("word_list", json!({"words": ["a", "b", "c", "d"]}));

        let generator = Generator::new(model, store.clone(), Arc::new(SystemClock), 10);
        let err = generator.generate::<WordList>(request()).await.unwrap_err();
        assert!(matches!(err, ModelError::Contract(_)));

        let traces = store.traces().await;
        assert_eq!(traces.len(), 1);
        assert!(!traces[0].success);
        assert!(traces[0].response_excerpt.as_deref().unwrap_or("").contains("more chars"));
        assert!(traces[0].error.is_some());
    }

    #[tokio::test]
    async fn test_model_failure_is_traced() {
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(MockModel::new());
        model.push_failure("word_list", "overloaded");

        let generator = Generator::new(model, store.clone(), Arc::new(SystemClock), 2000);
        let err = generator.generate::<WordList>(request()).await.unwrap_err();
        assert!(matches!(err, ModelError::Unavailable(_)));

        let traces = store.traces().await;
        assert!(!traces[0].success);
        assert!(traces[0].response_excerpt.is_none());
    }
}
