//! Placeholder tokens in generated text.
//!
//! Model output refers to participants as `{{entity-id}}` so prompts never
//! have to trust the model with spelling names. Tokens are swapped for
//! display names once the story is compiled. Tokens without a matching
//! entity are left exactly as written.

use crate::entity::EntityMap;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Replace every `{{id}}` token whose id is in `entities` with that
/// entity's display name. Whitespace inside the braces is ignored.
pub fn resolve(text: &str, entities: &EntityMap) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];

        let Some(end) = after_open.find(CLOSE) else {
            // Unterminated token; keep the remainder verbatim.
            out.push_str(&rest[start..]);
            return out;
        };

        let token = &rest[start..start + OPEN.len() + end + CLOSE.len()];
        let id = after_open[..end].trim();
        match entities.get(id) {
            Some(entity) if !id.is_empty() => out.push_str(&entity.display_name),
            _ => out.push_str(token),
        }
        rest = &after_open[end + CLOSE.len()..];
    }

    out.push_str(rest);
    out
}

/// Ids of all tokens in `text`, in order of appearance.
pub fn tokens(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        let id = after_open[..end].trim();
        if !id.is_empty() {
            found.push(id.to_string());
        }
        rest = &after_open[end + CLOSE.len()..];
    }
    found
}

/// Format an id as a token.
pub fn token_for(id: &str) -> String {
    format!("{OPEN}{id}{CLOSE}")
}
