//! Output contracts for the workflow's model calls.

use crate::contract::OutputContract;
use crate::session::{ScenarioOption, SynopsisOption};
use serde::Deserialize;

/// Propose the companions who should join the child's story
#[derive(Debug, Clone, Deserialize, OutputContract)]
#[contract(name = "propose_companions")]
pub struct CompanionProposal {
    /// Ids of the chosen companions, including the child
    #[contract(min_items = 2, max_items = 5)]
    pub companion_ids: Vec<String>,
}

/// Offer adventure premises for the child to choose from
#[derive(Debug, Clone, Deserialize, OutputContract)]
#[contract(name = "offer_scenarios")]
pub struct ScenarioBatch {
    /// Between two and five distinct premises
    #[contract(min_items = 2, max_items = 5)]
    pub scenarios: Vec<ScenarioOption>,
}

/// Offer plot outlines for the chosen premise
#[derive(Debug, Clone, Deserialize, OutputContract)]
#[contract(name = "offer_synopses")]
pub struct SynopsisBatch {
    /// Between two and four distinct plots
    #[contract(min_items = 2, max_items = 4)]
    pub synopses: Vec<SynopsisOption>,
}

/// Write the finished story
#[derive(Debug, Clone, Deserialize, OutputContract)]
#[contract(name = "write_story")]
pub struct StoryDraft {
    /// Story title, using {{id}} tokens for cast members
    #[contract(non_empty)]
    pub title: String,
    /// One-word mood tag
    #[contract(non_empty)]
    pub mood: String,
    /// The full story text, using {{id}} tokens for cast members
    #[contract(non_empty)]
    pub text: String,
}

/// Options whose ids are blank or repeated get fresh labels "A", "B", ...
/// so every option can be picked unambiguously.
pub(crate) fn relabel_if_ambiguous<T>(options: &mut [T], id_of: impl Fn(&mut T) -> &mut String) {
    let mut seen = std::collections::HashSet::new();
    let ambiguous = options.iter_mut().any(|option| {
        let id = id_of(option).trim().to_string();
        id.is_empty() || !seen.insert(id)
    });
    if !ambiguous {
        for option in options.iter_mut() {
            let id = id_of(option);
            *id = id.trim().to_string();
        }
        return;
    }

    tracing::debug!(count = options.len(), "Relabelling ambiguous option ids");
    for (i, option) in options.iter_mut().enumerate() {
        *id_of(option) = option_label(i);
    }
}

/// "A".."Z", then "AA", "AB", ...
fn option_label(index: usize) -> String {
    let letter = |n: usize| char::from(b'A' + (n % 26) as u8);
    if index < 26 {
        letter(index).to_string()
    } else {
        format!("{}{}", letter(index / 26 - 1), letter(index))
    }
}
