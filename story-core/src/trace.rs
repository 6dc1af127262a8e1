//! Generation traces - one append-only record per model call.

use crate::config::GenerationStep;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record of a single model invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationTrace {
    pub id: Uuid,
    #[serde(default)]
    pub session_id: Option<String>,
    pub step: GenerationStep,
    pub model: String,
    pub temperature: f32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    /// Truncated prompt text.
    pub prompt_excerpt: String,
    /// Truncated raw model output, when there was any.
    #[serde(default)]
    pub response_excerpt: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Truncate text to at most `limit` characters, noting how much was cut.
pub fn excerpt(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit).collect();
    format!("{kept}... [{} more chars]", total - limit)
}
