use thiserror::Error;

use crate::deps::RuleSlot;

/// Malformed definitions are rejected when the form is loaded.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to parse form definition: {0}")]
    Json(#[from] serde_json::Error),
    #[error("form '{0}' declares no views")]
    NoViews(String),
    #[error("duplicate view id '{0}'")]
    DuplicateView(String),
    #[error("duplicate item id '{0}'")]
    DuplicateItem(String),
    #[error("answer id '{answer}' is written by both '{first}' and '{second}'")]
    DuplicateAnswer {
        answer: String,
        first: String,
        second: String,
    },
    #[error("item '{item}' declares itself as a dependency of its {slot} rule")]
    SelfDependency { item: String, slot: RuleSlot },
    #[error("item '{item}' has MAX_LENGTH rule '{rule}' which is not a non-negative integer")]
    InvalidMaxLength { item: String, rule: String },
    #[error("item '{item}' has an invalid REGEXP rule: {source}")]
    InvalidPattern {
        item: String,
        #[source]
        source: regex::Error,
    },
}

/// A chain of value/choices rules that feeds back into itself within one
/// pass. The listed items keep their last known-good state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle between items {}", .items.join(" -> "))]
pub struct DependencyCycleError {
    pub items: Vec<String>,
}
