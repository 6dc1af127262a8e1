//! Prompt construction for each generation step.
//!
//! System instructions come from the text files next to this module unless
//! the generator config overrides them. The user message carries the facts
//! for this particular call: cast, reading level, prior picks.

use crate::config::{GenerationStep, StepSettings};
use crate::entity::{AgeBand, Entity, EntityKind};
use crate::placeholder::token_for;
use crate::session::{ScenarioOption, SynopsisOption};

const COMPANIONS: &str = include_str!("prompts/companions.txt");
const SCENARIOS: &str = include_str!("prompts/scenarios.txt");
const SYNOPSES: &str = include_str!("prompts/synopses.txt");
const STORY: &str = include_str!("prompts/story.txt");
const TITLE: &str = include_str!("prompts/title.txt");

/// Built-in system instructions for a step.
pub fn default_system(step: GenerationStep) -> &'static str {
    match step {
        GenerationStep::CompanionProposal => COMPANIONS,
        GenerationStep::Scenarios => SCENARIOS,
        GenerationStep::Synopses => SYNOPSES,
        GenerationStep::Story => STORY,
        GenerationStep::TitleRefinement => TITLE,
    }
}

/// System instructions for a step, honoring a configured override.
pub fn system_for(step: GenerationStep, settings: &StepSettings) -> String {
    settings
        .prompt_override
        .clone()
        .unwrap_or_else(|| default_system(step).trim().to_string())
}

fn cast_lines<'a>(entities: impl IntoIterator<Item = &'a Entity>) -> String {
    entities
        .into_iter()
        .map(|e| {
            let kind = match e.kind {
                EntityKind::Child => "child",
                EntityKind::Character => "character",
            };
            match &e.description {
                Some(desc) if !desc.trim().is_empty() => {
                    format!("- {} {} ({kind}): {}", token_for(&e.id), e.display_name, desc.trim())
                }
                _ => format!("- {} {} ({kind})", token_for(&e.id), e.display_name),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn companion_prompt(child: &Entity, roster: &[Entity]) -> String {
    format!(
        "The story is for {} (id: {}).\n\nEveryone available:\n{}\n\n\
         Return the ids of the companions to include.",
        child.display_name,
        child.id,
        cast_lines(roster)
    )
}

pub fn scenario_prompt(cast: &[&Entity], age: AgeBand) -> String {
    format!(
        "Reading level: {}\n\nCast:\n{}\n\nOffer between two and five adventure premises.",
        age.description(),
        cast_lines(cast.iter().copied())
    )
}

pub fn synopsis_prompt(
    scenario: &ScenarioOption,
    cast: &[&Entity],
    age: AgeBand,
    avoid_titles: &[String],
) -> String {
    let mut prompt = format!(
        "Reading level: {}\n\nCast:\n{}\n\nChosen premise: {}\n{}\n\n\
         Offer between two and four plots.",
        age.description(),
        cast_lines(cast.iter().copied()),
        scenario.title,
        scenario.description
    );
    if !avoid_titles.is_empty() {
        prompt.push_str("\n\nThe child did not like these plots. Offer clearly different ones:\n");
        for title in avoid_titles {
            prompt.push_str(&format!("- {title}\n"));
        }
    }
    prompt
}

pub fn story_prompt(
    cast: &[&Entity],
    age: AgeBand,
    scenario: &ScenarioOption,
    synopsis: &SynopsisOption,
    style_id: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Reading level: {}\n\nCast:\n{}\n\nPremise: {}\n{}\n\nOutline: {}\n{}",
        age.description(),
        cast_lines(cast.iter().copied()),
        scenario.title,
        scenario.description,
        synopsis.title,
        synopsis.summary
    );
    if let Some(style) = style_id {
        prompt.push_str(&format!("\n\nThe story will be illustrated in the '{style}' style."));
    }
    prompt.push_str("\n\nWrite the complete story.");
    prompt
}

pub fn title_prompt(title: &str, mood: &str, text: &str) -> String {
    format!("Current title: {title}\nMood: {mood}\n\nStory:\n{text}")
}
