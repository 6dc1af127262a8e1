//! Headless driver for scripted runs.
//!
//! Walks one session from companion selection to a finished story without
//! a client, always taking the model's proposal and the first option on
//! offer. It's designed for:
//! - Smoke-testing prompts and config against the real model
//! - Generating sample stories from a script
//!
//! # Example
//!
//! ```ignore
//! use story_core::headless::{HeadlessConfig, HeadlessRunner};
//!
//! let runner = HeadlessRunner::new(&workflow, HeadlessConfig::default());
//! let run = runner.run("child-1", "session-1").await?;
//! println!("{}", run.text);
//! ```

use crate::workflow::{Action, AdvanceRequest, PhaseOutput, StoryWorkflow};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeadlessError {
    #[error("Workflow rejected step {step}: {message}")]
    Rejected { step: usize, message: String },

    #[error("No finished story after {0} steps")]
    StepLimit(usize),
}

#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Give up after this many advance calls.
    pub max_steps: usize,
    /// How often to retry while another request holds the compile lock.
    pub busy_retries: usize,
    /// Wait between busy retries.
    pub busy_wait: Duration,
    /// Ask for one extra batch of synopses before picking.
    pub request_more_synopses: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            max_steps: 12,
            busy_retries: 3,
            busy_wait: Duration::from_secs(5),
            request_more_synopses: false,
        }
    }
}

/// One advance call and what came back.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub step: usize,
    pub state: &'static str,
    /// What the runner chose, in words.
    pub choice: String,
}

/// A finished headless run.
#[derive(Debug, Clone)]
pub struct HeadlessRun {
    pub story_id: String,
    pub title: String,
    pub mood: String,
    pub text: String,
    pub participant_ids: Vec<String>,
    pub transcript: Vec<TranscriptEntry>,
}

pub struct HeadlessRunner<'a> {
    workflow: &'a StoryWorkflow,
    config: HeadlessConfig,
}

impl<'a> HeadlessRunner<'a> {
    pub fn new(workflow: &'a StoryWorkflow, config: HeadlessConfig) -> Self {
        Self { workflow, config }
    }

    /// Drive the session until the story is finished.
    pub async fn run(
        &self,
        child_id: &str,
        session_id: &str,
    ) -> Result<HeadlessRun, HeadlessError> {
        let mut transcript = Vec::new();
        let mut request = AdvanceRequest::new(child_id, session_id);
        let mut busy_left = self.config.busy_retries;
        let mut asked_for_more = false;

        for step in 1..=self.config.max_steps {
            let output = self.workflow.advance(request.clone()).await;
            let base = AdvanceRequest::new(child_id, session_id);

            let (next, choice) = match &output {
                PhaseOutput::CharacterSelection { proposed_ids, .. } => (
                    base.with_action(Action::ConfirmCompanions)
                        .with_companions(proposed_ids.iter().cloned()),
                    format!("confirm companions {}", proposed_ids.join(", ")),
                ),
                PhaseOutput::ScenarioSelection { scenarios, .. } => match scenarios.first() {
                    Some(first) => (
                        base.with_option(&first.id),
                        format!("scenario {} \"{}\"", first.id, first.title),
                    ),
                    None => return Err(rejected(step, "no scenarios offered")),
                },
                PhaseOutput::SynopsisSelection { synopses, .. } => {
                    if self.config.request_more_synopses && !asked_for_more {
                        asked_for_more = true;
                        (base.with_action(Action::MoreSynopses), "more synopses".to_string())
                    } else {
                        match synopses.first() {
                            Some(first) => (
                                base.with_option(&first.id),
                                format!("synopsis {} \"{}\"", first.id, first.title),
                            ),
                            None => return Err(rejected(step, "no synopses offered")),
                        }
                    }
                }
                PhaseOutput::Finished {
                    story_id,
                    title,
                    mood,
                    text,
                    participant_ids,
                } => {
                    transcript.push(TranscriptEntry {
                        step,
                        state: output.state(),
                        choice: "done".to_string(),
                    });
                    tracing::info!(story_id = %story_id, steps = step, "Headless run finished");
                    return Ok(HeadlessRun {
                        story_id: story_id.clone(),
                        title: title.clone(),
                        mood: mood.clone(),
                        text: text.clone(),
                        participant_ids: participant_ids.clone(),
                        transcript,
                    });
                }
                PhaseOutput::Error { error, in_progress } => {
                    if *in_progress && busy_left > 0 {
                        busy_left -= 1;
                        tracing::info!(session_id, "Compile busy, waiting");
                        tokio::time::sleep(self.config.busy_wait).await;
                        (request.clone(), "wait for compile".to_string())
                    } else {
                        return Err(rejected(step, error));
                    }
                }
            };

            tracing::debug!(
                session_id,
                step,
                state = output.state(),
                choice = %choice,
                "Headless step"
            );
            transcript.push(TranscriptEntry {
                step,
                state: output.state(),
                choice,
            });
            request = next;
        }

        Err(HeadlessError::StepLimit(self.config.max_steps))
    }
}

fn rejected(step: usize, message: &str) -> HeadlessError {
    HeadlessError::Rejected {
        step,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{replies, TestHarness, CHILD_ID, SESSION_ID};

    #[tokio::test]
    async fn test_runs_to_finished_story() {
        let harness = TestHarness::new().await;
        harness.model.push("propose_companions", replies::companions(&["child-1", "char-7"]));
        harness.model.push("offer_scenarios", replies::scenarios(&["A", "B"]));
        harness.model.push("offer_synopses", replies::synopses(&["A", "B"], "First"));
        harness.model.push("offer_synopses", replies::synopses(&["A", "B"], "Second"));
        harness.model.push("write_story", replies::whiskers_story());

        let config = HeadlessConfig {
            request_more_synopses: true,
            ..Default::default()
        };
        let run = HeadlessRunner::new(&harness.workflow, config)
            .run(CHILD_ID, SESSION_ID)
            .await
            .unwrap();

        assert_eq!(run.participant_ids, vec!["child-1", "char-7"]);
        assert_eq!(run.title, "Mia and the Moon Boat");
        let states: Vec<&str> = run.transcript.iter().map(|t| t.state).collect();
        assert_eq!(
            states,
            vec![
                "character_selection",
                "scenario_selection",
                "synopsis_selection",
                "synopsis_selection",
                "finished"
            ]
        );
        assert_eq!(harness.model.pending(), 0);
    }

    #[tokio::test]
    async fn test_model_failure_stops_the_run() {
        let harness = TestHarness::new().await;
        harness.model.push_failure("propose_companions", "overloaded");

        let err = HeadlessRunner::new(&harness.workflow, HeadlessConfig::default())
            .run(CHILD_ID, SESSION_ID)
            .await
            .unwrap_err();
        assert!(matches!(err, HeadlessError::Rejected { step: 1, .. }));
    }
}
