//! Phase-based story generation engine.
//!
//! This crate provides:
//! - The session state machine that walks a child from choosing
//!   companions to a finished story
//! - A persisted per-session compile lock
//! - Background enrichment fan-out with per-job failure isolation
//! - Contract-checked, traced model invocation over Claude
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use story_core::{AdvanceRequest, ClaudeModel, FileStore, StoryWorkflow, WorkflowConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(FileStore::open("./data").await?);
//!     let model = Arc::new(ClaudeModel::from_env()?);
//!     let workflow = StoryWorkflow::new(store, model, WorkflowConfig::default());
//!
//!     let output = workflow.advance(AdvanceRequest::new("child-1", "session-1")).await;
//!     println!("{}", serde_json::to_string_pretty(&output)?);
//!     Ok(())
//! }
//! ```

// Lets the `OutputContract` derive refer to `::story_core` from inside this crate.
extern crate self as story_core;

pub mod clock;
pub mod config;
pub mod contract;
pub mod enrich;
pub mod entity;
pub mod headless;
pub mod lock;
pub mod model;
pub mod placeholder;
pub mod session;
pub mod store;
pub mod story;
pub mod telemetry;
pub mod testing;
pub mod trace;
pub mod workflow;

pub use contract::OutputContract;

// Primary public API
pub use config::{GenerationStep, GeneratorConfig, StepOverride, WorkflowConfig};
pub use enrich::{Enricher, EnrichmentJob, JobReport, NarrationJob, PortraitJob, TitleRefinementJob};
pub use model::{ClaudeModel, Generator, ModelClient, ModelError};
pub use session::{Phase, Session, SessionStatus};
pub use store::{DocumentStore, FileStore, MemoryStore, StoreError};
pub use story::{EnrichmentStatus, JobKind, Story};
pub use workflow::{
    Action, AdvanceRequest, AdvanceResponse, CompileOutcome, CompileRequest, CompileResponse,
    PhaseOutput, StoryWorkflow, WorkflowError,
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    /// Pick one of the offered gifts
    #[derive(OutputContract, Deserialize)]
    struct PickGift {
        /// Gift id
        #[contract(non_empty)]
        gift_id: String,
        #[serde(rename = "note_text")]
        note: Option<String>,
    }

    /// Name the chosen gift
    #[derive(OutputContract, Deserialize)]
    struct NameGift {
        #[serde(rename = "giftId")]
        #[contract(rename = "giftId", non_empty)]
        gift_id: String,
        #[serde(default, rename(serialize = "label", deserialize = "giftLabel"))]
        label: Option<String>,
    }

    #[test]
    fn test_contract_derive_defaults() {
        assert_eq!(PickGift::contract_name(), "pick_gift");
        assert_eq!(PickGift::contract_description(), "Pick one of the offered gifts");

        let schema = PickGift::output_schema();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["note_text"].is_object());
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
    }

    #[test]
    fn test_renamed_fields_validate_and_decode() {
        let schema = NameGift::output_schema();
        assert_eq!(schema["required"], serde_json::json!(["giftId"]));
        assert!(schema["properties"]["giftLabel"].is_object());
        assert!(schema["properties"].get("gift_id").is_none());

        let gift: NameGift =
            contract::parse(serde_json::json!({"giftId": "g1", "giftLabel": "Kite"})).unwrap();
        assert_eq!(gift.gift_id, "g1");
        assert_eq!(gift.label.as_deref(), Some("Kite"));

        // The Rust field name is not the key the model must use.
        assert!(contract::parse::<NameGift>(serde_json::json!({"gift_id": "g1"})).is_err());
    }
}
