//! Story participants: child profiles and family characters.
//!
//! Entities are owned by the surrounding product; the workflow only reads
//! them. Lookups check child profiles first and the character registry
//! second, and the first match wins.

use crate::store::{DocumentStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A child with a profile in the family account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildProfile {
    pub id: String,
    pub owner_id: String,
    pub display_name: String,
    #[serde(default)]
    pub age: Option<u8>,
    #[serde(default)]
    pub deleted: bool,
}

impl ChildProfile {
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            display_name: name.into(),
            age: None,
            deleted: false,
        }
    }

    pub fn with_age(mut self, age: u8) -> Self {
        self.age = Some(age);
        self
    }
}

/// A recurring character created by the family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub owner_id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Child the character belongs to; `None` means family-wide.
    #[serde(default)]
    pub child_id: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

impl Character {
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            display_name: name.into(),
            description: None,
            child_id: None,
            deleted: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Scope the character to one child.
    pub fn for_child(mut self, child_id: impl Into<String>) -> Self {
        self.child_id = Some(child_id.into());
        self
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    /// Whether the character may join stories for the given child.
    pub fn available_to(&self, child_id: &str) -> bool {
        !self.deleted && self.child_id.as_deref().is_none_or(|c| c == child_id)
    }
}

/// Which collection an entity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Child,
    Character,
}

/// A participant as the workflow sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub display_name: String,
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&ChildProfile> for Entity {
    fn from(child: &ChildProfile) -> Self {
        Self {
            id: child.id.clone(),
            display_name: child.display_name.clone(),
            kind: EntityKind::Child,
            description: None,
        }
    }
}

impl From<&Character> for Entity {
    fn from(character: &Character) -> Self {
        Self {
            id: character.id.clone(),
            display_name: character.display_name.clone(),
            kind: EntityKind::Character,
            description: character.description.clone(),
        }
    }
}

/// Entity id to entity.
pub type EntityMap = HashMap<String, Entity>;

/// Reading level the stories are pitched at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeBand {
    Toddler,
    EarlyReader,
    Middle,
    Older,
}

impl AgeBand {
    /// Band for an age; unknown ages get early-reader stories.
    pub fn from_age(age: Option<u8>) -> Self {
        match age {
            Some(0..=3) => AgeBand::Toddler,
            None | Some(4..=6) => AgeBand::EarlyReader,
            Some(7..=9) => AgeBand::Middle,
            Some(_) => AgeBand::Older,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AgeBand::Toddler => "ages 2-3: very short sentences, repetition, gentle stakes",
            AgeBand::EarlyReader => "ages 4-6: simple sentences, playful tone, clear lesson",
            AgeBand::Middle => "ages 7-9: richer vocabulary, light suspense, humor",
            AgeBand::Older => "ages 10-12: layered plot, real challenges, satisfying twist",
        }
    }
}

/// The entities eligible to appear in a child's story.
#[derive(Debug, Clone)]
pub struct Roster {
    primary_id: String,
    /// Primary child first.
    members: Vec<Entity>,
}

impl Roster {
    pub fn primary_id(&self) -> &str {
        &self.primary_id
    }

    pub fn members(&self) -> &[Entity] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Turn requested ids into a valid roster selection: blanks and ids
    /// outside the roster are dropped, duplicates collapsed, and the
    /// primary child placed first.
    pub fn normalize_selection(&self, requested: &[String]) -> Vec<String> {
        let eligible: Vec<String> = clean_ids(requested)
            .into_iter()
            .filter(|id| {
                let known = self.contains(id);
                if !known {
                    tracing::debug!(entity_id = %id, "dropping id outside the eligible roster");
                }
                known
            })
            .collect();
        with_primary(&self.primary_id, eligible)
    }
}

/// Drop blank ids and duplicates, keeping first-seen order.
pub fn clean_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

/// Ensure the primary id leads the list, exactly once.
pub fn with_primary(primary_id: &str, ids: Vec<String>) -> Vec<String> {
    let mut result = Vec::with_capacity(ids.len() + 1);
    result.push(primary_id.to_string());
    result.extend(ids.into_iter().filter(|id| id != primary_id));
    result
}

/// Find an entity by id, probing child profiles before characters.
pub async fn resolve_entity(
    store: &dyn DocumentStore,
    id: &str,
) -> Result<Option<Entity>, StoreError> {
    if let Some(child) = store.get_child(id).await? {
        return Ok(Some(Entity::from(&child)));
    }
    Ok(store.get_character(id).await?.map(|c| Entity::from(&c)))
}

/// Resolve every id that exists; blank and unknown ids are skipped.
pub async fn resolve_all(
    store: &dyn DocumentStore,
    ids: &[String],
) -> Result<EntityMap, StoreError> {
    let mut map = EntityMap::new();
    for id in clean_ids(ids) {
        match resolve_entity(store, &id).await? {
            Some(entity) => {
                map.insert(id, entity);
            }
            None => tracing::warn!(entity_id = %id, "entity not found in any collection"),
        }
    }
    Ok(map)
}

/// Entities in the given order, skipping ids missing from the map.
pub fn ordered<'a>(ids: &[String], map: &'a EntityMap) -> Vec<&'a Entity> {
    ids.iter().filter_map(|id| map.get(id)).collect()
}

/// Everyone who may appear in the child's stories: the child, their
/// non-deleted siblings, and non-deleted characters that are family-wide
/// or scoped to this child.
pub async fn eligible_roster(
    store: &dyn DocumentStore,
    child: &ChildProfile,
) -> Result<Roster, StoreError> {
    let mut siblings: Vec<Entity> = store
        .children_of_owner(&child.owner_id)
        .await?
        .iter()
        .filter(|c| c.id != child.id && !c.deleted)
        .map(Entity::from)
        .collect();
    siblings.sort_by(|a, b| a.display_name.cmp(&b.display_name).then(a.id.cmp(&b.id)));

    let mut characters: Vec<Entity> = store
        .characters_of_owner(&child.owner_id)
        .await?
        .iter()
        .filter(|c| c.available_to(&child.id))
        .map(Entity::from)
        .collect();
    characters.sort_by(|a, b| a.display_name.cmp(&b.display_name).then(a.id.cmp(&b.id)));

    let mut members = vec![Entity::from(child)];
    members.extend(siblings);
    members.extend(characters);

    Ok(Roster {
        primary_id: child.id.clone(),
        members,
    })
}
