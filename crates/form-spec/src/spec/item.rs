use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A rule expression plus the answer ids its author declared it reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RuleSpec {
    pub expr: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl RuleSpec {
    pub fn new(expr: impl Into<String>, depends_on: &[&str]) -> Self {
        Self {
            expr: expr.into(),
            depends_on: depends_on.iter().map(|dep| dep.to_string()).collect(),
        }
    }
}

/// Closed table of item types understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Text,
    Textarea,
    Email,
    Date,
    Select,
    Radio,
    Number,
    Checkbox,
    Multiselect,
    File,
    Money,
    Phone,
    Section,
    Paragraph,
    Action,
}

impl ItemType {
    /// Whether items of this type hold an answer.
    pub fn carries_answer(&self) -> bool {
        !matches!(
            self,
            ItemType::Section | ItemType::Paragraph | ItemType::Action
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ItemType::Text => "text",
            ItemType::Textarea => "textarea",
            ItemType::Email => "email",
            ItemType::Date => "date",
            ItemType::Select => "select",
            ItemType::Radio => "radio",
            ItemType::Number => "number",
            ItemType::Checkbox => "checkbox",
            ItemType::Multiselect => "multiselect",
            ItemType::File => "file",
            ItemType::Money => "money",
            ItemType::Phone => "phone",
            ItemType::Section => "section",
            ItemType::Paragraph => "paragraph",
            ItemType::Action => "action",
        }
    }
}

/// Static choice with optional per-choice override rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChoiceSpec {
    pub value: Value,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<RuleSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<RuleSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationKind {
    /// Rule truthy means the field may stay empty.
    Optional,
    /// Rule truthy means the value passes.
    Custom,
    /// Rule is a numeric string; longer values fail.
    MaxLength,
    /// Rule is the pattern the value must match.
    Regexp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationSpec {
    pub kind: ValidationKind,
    pub rule: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// One form element: a question, a section, an action, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ItemSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Answer key; defaults to `id` for answer-bearing items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<RuleSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<RuleSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<RuleSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<RuleSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ChoiceSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation: Vec<ValidationSpec>,
    /// Only meaningful on `action` items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_view: Option<RuleSpec>,
    /// Keep the answer in submissions even while hidden.
    #[serde(default)]
    pub include_when_hidden: bool,
}

impl ItemSpec {
    pub fn new(id: impl Into<String>, kind: ItemType) -> Self {
        Self {
            id: id.into(),
            kind,
            label: None,
            answer_id: None,
            default_value: None,
            props: Map::new(),
            visible: None,
            read_only: None,
            value: None,
            choices: None,
            options: Vec::new(),
            validation: Vec::new(),
            next_view: None,
            include_when_hidden: false,
        }
    }

    /// The answer id this item reads and writes, if it carries an answer.
    pub fn answer_key(&self) -> Option<&str> {
        if !self.kind.carries_answer() {
            return None;
        }
        Some(self.answer_id.as_deref().unwrap_or(&self.id))
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}
