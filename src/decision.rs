//! Decision port for cases the resolver cannot settle on its own.
//!
//! The resolver never talks to a terminal. It describes the situation as a
//! [`Prompt`] and acts on the returned [`Decision`].

use dialoguer::{Input, Select};
use std::fmt;
use tracing::{info, warn};

use crate::types::{Category, EntityId};

/// Why a value failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// "etc.", "u.a." and friends mean "and others", not an entity
    Filler,
    TooShort { min_length: usize },
    MissingFamilyName,
}

impl Rejection {
    /// Whether an operator may accept the value anyway
    pub fn can_override(self) -> bool {
        !matches!(self, Rejection::Filler)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Filler => f.write_str("filler token"),
            Rejection::TooShort { min_length } => write!(f, "shorter than {min_length} characters"),
            Rejection::MissingFamilyName => f.write_str("missing family name"),
        }
    }
}

/// An existing entity offered to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: EntityId,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Prompt<'a> {
    Rejected {
        category: Category,
        value: &'a str,
        rejection: Rejection,
    },
    /// A bare family name matching several known entities
    Ambiguous {
        category: Category,
        value: &'a str,
        candidates: &'a [Candidate],
    },
    /// A new entity that passed validation but is not auto-authorized
    Unconfirmed { category: Category, value: &'a str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    UseExisting(EntityId),
    CreateNew,
    Skip,
    Retry(String),
}

pub trait Decider: Send {
    fn decide(&mut self, prompt: &Prompt<'_>) -> Decision;
}

/// Non-interactive policy: never guess between candidates, never keep
/// invalid values, create unconfirmed-but-plausible ones.
#[derive(Debug, Clone)]
pub struct BatchDecider {
    /// Create persons known only by family name when the index has no match
    pub allow_family_only: bool,
}

impl Default for BatchDecider {
    fn default() -> Self {
        Self {
            allow_family_only: true,
        }
    }
}

impl Decider for BatchDecider {
    fn decide(&mut self, prompt: &Prompt<'_>) -> Decision {
        match prompt {
            Prompt::Rejected {
                category,
                value,
                rejection,
            } => {
                info!(category = %category, value = *value, "Skipping value: {}", rejection);
                Decision::Skip
            }
            Prompt::Ambiguous {
                category,
                value,
                candidates,
            } => {
                let ids: Vec<EntityId> = candidates.iter().map(|c| c.id).collect();
                warn!(category = %category, value = *value, candidates = ?ids, "Ambiguous family name, skipping");
                Decision::Skip
            }
            Prompt::Unconfirmed { category, value } => {
                if self.allow_family_only {
                    Decision::CreateNew
                } else {
                    info!(category = %category, value = *value, "Family-name-only value not allowed, skipping");
                    Decision::Skip
                }
            }
        }
    }
}

/// Asks an operator on the terminal
#[derive(Debug, Default)]
pub struct ConsoleDecider;

impl ConsoleDecider {
    pub fn new() -> Self {
        Self
    }

    fn select(&self, prompt: &str, items: &[String]) -> Option<usize> {
        match Select::new().with_prompt(prompt).items(items).default(0).interact() {
            Ok(choice) => Some(choice),
            Err(e) => {
                warn!("Prompt failed, skipping: {}", e);
                None
            }
        }
    }

    fn edit(&self, current: &str) -> Decision {
        match Input::<String>::new()
            .with_prompt("New value")
            .with_initial_text(current)
            .interact_text()
        {
            Ok(value) if !value.trim().is_empty() => Decision::Retry(value.trim().to_string()),
            Ok(_) => Decision::Skip,
            Err(e) => {
                warn!("Prompt failed, skipping: {}", e);
                Decision::Skip
            }
        }
    }
}

impl Decider for ConsoleDecider {
    fn decide(&mut self, prompt: &Prompt<'_>) -> Decision {
        match prompt {
            Prompt::Rejected {
                category,
                value,
                rejection,
            } => {
                let title = format!("{category} '{value}' rejected ({rejection})");
                let mut items = vec!["Skip".to_string(), "Edit".to_string()];
                if rejection.can_override() {
                    items.push("Accept as is".to_string());
                }
                match self.select(&title, &items) {
                    Some(1) => self.edit(value),
                    Some(2) => Decision::CreateNew,
                    _ => Decision::Skip,
                }
            }
            Prompt::Ambiguous {
                category,
                value,
                candidates,
            } => {
                let title = format!("{category} '{value}' matches several entries");
                let mut items: Vec<String> = candidates
                    .iter()
                    .map(|c| format!("Use #{} {}", c.id, c.full_name))
                    .collect();
                items.push("Create new".to_string());
                items.push("Skip".to_string());
                match self.select(&title, &items) {
                    Some(i) if i < candidates.len() => Decision::UseExisting(candidates[i].id),
                    Some(i) if i == candidates.len() => Decision::CreateNew,
                    _ => Decision::Skip,
                }
            }
            Prompt::Unconfirmed { category, value } => {
                let title = format!("Create new {category} '{value}'?");
                let items = vec!["Create".to_string(), "Skip".to_string(), "Edit".to_string()];
                match self.select(&title, &items) {
                    Some(0) => Decision::CreateNew,
                    Some(2) => self.edit(value),
                    _ => Decision::Skip,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_skips_rejections_and_ambiguity() {
        let mut decider = BatchDecider::default();

        let rejected = Prompt::Rejected {
            category: Category::Conductor,
            value: "Abc",
            rejection: Rejection::TooShort { min_length: 4 },
        };
        assert_eq!(decider.decide(&rejected), Decision::Skip);

        let candidates = [
            Candidate {
                id: 1,
                full_name: "johann sebastian bach".to_string(),
            },
            Candidate {
                id: 2,
                full_name: "carl philipp emanuel bach".to_string(),
            },
        ];
        let ambiguous = Prompt::Ambiguous {
            category: Category::Composer,
            value: "Bach",
            candidates: &candidates,
        };
        assert_eq!(decider.decide(&ambiguous), Decision::Skip);
    }

    #[test]
    fn test_batch_unconfirmed_follows_policy() {
        let prompt = Prompt::Unconfirmed {
            category: Category::Soloist,
            value: "Sting",
        };
        assert_eq!(BatchDecider::default().decide(&prompt), Decision::CreateNew);

        let mut strict = BatchDecider {
            allow_family_only: false,
        };
        assert_eq!(strict.decide(&prompt), Decision::Skip);
    }

    #[test]
    fn test_filler_rejection_cannot_be_overridden() {
        assert!(!Rejection::Filler.can_override());
        assert!(Rejection::TooShort { min_length: 4 }.can_override());
        assert!(Rejection::MissingFamilyName.can_override());
    }
}
