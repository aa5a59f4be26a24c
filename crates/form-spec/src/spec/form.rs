use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::expr::Limits;
use crate::spec::item::{ItemSpec, RuleSpec};

/// One navigable page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ViewSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Suppresses the view in menus; linear navigation still reaches it.
    #[serde(default)]
    pub hide_from_menu: bool,
    /// A view whose rule is falsy is skipped by linear navigation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<RuleSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_view: Option<RuleSpec>,
    #[serde(default)]
    pub items: Vec<ItemSpec>,
}

impl ViewSpec {
    pub fn new(id: impl Into<String>, items: Vec<ItemSpec>) -> Self {
        Self {
            id: id.into(),
            title: None,
            hide_from_menu: false,
            visible: None,
            next_view: None,
            items,
        }
    }
}

/// Top-level form definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FormSpec {
    pub id: String,
    pub title: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub initial_values: Map<String, Value>,
    pub views: Vec<ViewSpec>,
}

impl FormSpec {
    /// Items across all views in declaration order.
    pub fn items(&self) -> impl Iterator<Item = &ItemSpec> {
        self.views.iter().flat_map(|view| view.items.iter())
    }

    pub fn view_index(&self, view_id: &str) -> Option<usize> {
        self.views.iter().position(|view| view.id == view_id)
    }
}
