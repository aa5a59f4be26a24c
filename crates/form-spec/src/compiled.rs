//! Load-time preparation of a [`FormSpec`]: expressions parsed once,
//! validation rules checked, lookup tables and the dependency index built.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::deps::DependencyIndex;
use crate::error::DefinitionError;
use crate::expr::{Expression, Limits};
use crate::spec::{FormSpec, ItemSpec, RuleSpec, ValidationKind, ValidationSpec};

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub expr: Expression,
    pub depends_on: Vec<String>,
}

impl CompiledRule {
    fn compile(rule: &RuleSpec, owner: &str) -> Self {
        let expr = Expression::parse(&rule.expr);
        if let Some(err) = expr.parse_error() {
            warn!(owner, expr = rule.expr.as_str(), error = %err, "rule does not parse; it will evaluate as undefined");
        }
        Self {
            expr,
            depends_on: rule.depends_on.clone(),
        }
    }

    pub fn reads_any(&self, answers: &std::collections::BTreeSet<String>) -> bool {
        self.depends_on.iter().any(|dep| answers.contains(dep))
    }
}

#[derive(Debug, Clone)]
pub struct CompiledChoice {
    pub value: Value,
    pub label: String,
    pub disabled: Option<CompiledRule>,
    pub visible: Option<CompiledRule>,
}

#[derive(Debug, Clone)]
pub enum ValidationRule {
    Expr(Expression),
    MaxLength(usize),
    Pattern(Regex),
}

#[derive(Debug, Clone)]
pub struct CompiledValidation {
    pub kind: ValidationKind,
    pub rule: ValidationRule,
    pub raw_rule: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct CompiledItem {
    /// Position in declaration order across all views.
    pub index: usize,
    pub view: usize,
    pub spec: ItemSpec,
    pub visible: Option<CompiledRule>,
    pub read_only: Option<CompiledRule>,
    pub value: Option<CompiledRule>,
    pub choices: Option<CompiledRule>,
    pub options: Vec<CompiledChoice>,
    pub validation: Vec<CompiledValidation>,
    pub next_view: Option<CompiledRule>,
}

impl CompiledItem {
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn answer_id(&self) -> Option<&str> {
        self.spec.answer_key()
    }

    /// True when the item's own answer can change during a rule pass.
    pub fn produces_answer(&self) -> bool {
        self.answer_id().is_some() && (self.value.is_some() || self.has_choice_rules())
    }

    pub fn has_choice_rules(&self) -> bool {
        self.choices.is_some()
            || self
                .options
                .iter()
                .any(|option| option.disabled.is_some() || option.visible.is_some())
    }

    /// Union of the choices rule and every per-choice sub-rule dependency.
    pub fn choice_dependencies(&self) -> impl Iterator<Item = &String> {
        self.choices
            .iter()
            .chain(
                self.options
                    .iter()
                    .flat_map(|option| option.disabled.iter().chain(option.visible.iter())),
            )
            .flat_map(|rule| rule.depends_on.iter())
    }

    /// Every answer id any derived-state slot of this item reads.
    pub fn derived_dependencies(&self) -> impl Iterator<Item = &String> {
        [&self.visible, &self.read_only, &self.value]
            .into_iter()
            .flatten()
            .flat_map(|rule| rule.depends_on.iter())
            .chain(self.choice_dependencies())
    }
}

#[derive(Debug, Clone)]
pub struct CompiledView {
    pub index: usize,
    pub id: String,
    pub title: Option<String>,
    pub hide_from_menu: bool,
    pub visible: Option<CompiledRule>,
    pub next_view: Option<CompiledRule>,
    /// Indices into [`CompiledForm::items`].
    pub items: Vec<usize>,
}

/// A loaded, immutable form definition.
#[derive(Debug, Clone)]
pub struct CompiledForm {
    spec: FormSpec,
    items: Vec<CompiledItem>,
    views: Vec<CompiledView>,
    index: DependencyIndex,
    by_item_id: HashMap<String, usize>,
    by_answer_id: HashMap<String, usize>,
    by_view_id: HashMap<String, usize>,
}

impl CompiledForm {
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        let spec: FormSpec = serde_json::from_str(json)?;
        Self::load(spec)
    }

    pub fn load(spec: FormSpec) -> Result<Self, DefinitionError> {
        if spec.views.is_empty() {
            return Err(DefinitionError::NoViews(spec.id.clone()));
        }

        let index = DependencyIndex::build(&spec)?;
        let mut by_item_id = HashMap::new();
        let mut by_answer_id: HashMap<String, usize> = HashMap::new();
        let mut by_view_id = HashMap::new();
        let mut items = Vec::new();
        let mut views = Vec::new();

        for (view_index, view) in spec.views.iter().enumerate() {
            if by_view_id.insert(view.id.clone(), view_index).is_some() {
                return Err(DefinitionError::DuplicateView(view.id.clone()));
            }
            let mut members = Vec::with_capacity(view.items.len());
            for item in &view.items {
                let item_index = items.len();
                if by_item_id.insert(item.id.clone(), item_index).is_some() {
                    return Err(DefinitionError::DuplicateItem(item.id.clone()));
                }
                if let Some(answer) = item.answer_key() {
                    if let Some(previous) = by_answer_id.get(answer) {
                        let first: &CompiledItem = &items[*previous];
                        return Err(DefinitionError::DuplicateAnswer {
                            answer: answer.to_string(),
                            first: first.id().to_string(),
                            second: item.id.clone(),
                        });
                    }
                    by_answer_id.insert(answer.to_string(), item_index);
                }
                items.push(compile_item(item, item_index, view_index)?);
                members.push(item_index);
            }
            views.push(CompiledView {
                index: view_index,
                id: view.id.clone(),
                title: view.title.clone(),
                hide_from_menu: view.hide_from_menu,
                visible: view
                    .visible
                    .as_ref()
                    .map(|rule| CompiledRule::compile(rule, &view.id)),
                next_view: view
                    .next_view
                    .as_ref()
                    .map(|rule| CompiledRule::compile(rule, &view.id)),
                items: members,
            });
        }

        debug!(
            form = spec.id.as_str(),
            views = views.len(),
            items = items.len(),
            indexed_answers = index.len(),
            "loaded form definition"
        );

        Ok(Self {
            spec,
            items,
            views,
            index,
            by_item_id,
            by_answer_id,
            by_view_id,
        })
    }

    pub fn spec(&self) -> &FormSpec {
        &self.spec
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn limits(&self) -> Limits {
        self.spec.limits.unwrap_or_default()
    }

    pub fn items(&self) -> &[CompiledItem] {
        &self.items
    }

    pub fn views(&self) -> &[CompiledView] {
        &self.views
    }

    pub fn index(&self) -> &DependencyIndex {
        &self.index
    }

    pub fn item(&self, item_id: &str) -> Option<&CompiledItem> {
        self.by_item_id.get(item_id).map(|index| &self.items[*index])
    }

    pub fn item_by_answer(&self, answer_id: &str) -> Option<&CompiledItem> {
        self.by_answer_id
            .get(answer_id)
            .map(|index| &self.items[*index])
    }

    pub fn view(&self, view_id: &str) -> Option<&CompiledView> {
        self.by_view_id.get(view_id).map(|index| &self.views[*index])
    }

    pub fn first_view(&self) -> &CompiledView {
        &self.views[0]
    }

    pub fn view_items(&self, view: &CompiledView) -> impl Iterator<Item = &CompiledItem> {
        view.items.iter().map(|index| &self.items[*index])
    }
}

fn compile_item(
    item: &ItemSpec,
    index: usize,
    view: usize,
) -> Result<CompiledItem, DefinitionError> {
    let owner = item.id.as_str();
    let compile = |rule: &Option<RuleSpec>| {
        rule.as_ref()
            .map(|rule| CompiledRule::compile(rule, owner))
    };

    let options = item
        .options
        .iter()
        .map(|option| CompiledChoice {
            value: option.value.clone(),
            label: option.label.clone(),
            disabled: compile(&option.disabled),
            visible: compile(&option.visible),
        })
        .collect();

    let validation = item
        .validation
        .iter()
        .map(|validation| compile_validation(item, validation))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CompiledItem {
        index,
        view,
        spec: item.clone(),
        visible: compile(&item.visible),
        read_only: compile(&item.read_only),
        value: compile(&item.value),
        choices: compile(&item.choices),
        options,
        validation,
        next_view: compile(&item.next_view),
    })
}

fn compile_validation(
    item: &ItemSpec,
    validation: &ValidationSpec,
) -> Result<CompiledValidation, DefinitionError> {
    let rule = match validation.kind {
        ValidationKind::Optional | ValidationKind::Custom => {
            let expr = Expression::parse(&validation.rule);
            if let Some(err) = expr.parse_error() {
                warn!(owner = item.id.as_str(), error = %err, "validation rule does not parse");
            }
            ValidationRule::Expr(expr)
        }
        ValidationKind::MaxLength => validation
            .rule
            .trim()
            .parse::<usize>()
            .map(ValidationRule::MaxLength)
            .map_err(|_| DefinitionError::InvalidMaxLength {
                item: item.id.clone(),
                rule: validation.rule.clone(),
            })?,
        ValidationKind::Regexp => Regex::new(&validation.rule)
            .map(ValidationRule::Pattern)
            .map_err(|source| DefinitionError::InvalidPattern {
                item: item.id.clone(),
                source,
            })?,
    };
    Ok(CompiledValidation {
        kind: validation.kind,
        rule,
        raw_rule: validation.rule.clone(),
        message: validation.message.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn load(value: Value) -> Result<CompiledForm, DefinitionError> {
        CompiledForm::from_json(&value.to_string())
    }

    #[test]
    fn loads_views_and_items_in_declaration_order() {
        let form = load(json!({
            "id": "f", "title": "F", "version": "1",
            "views": [
                { "id": "a", "items": [ { "id": "name", "type": "text" } ] },
                { "id": "b", "items": [
                    { "id": "intro", "type": "paragraph" },
                    { "id": "age", "type": "number", "answer_id": "applicant_age" }
                ] }
            ]
        }))
        .expect("load");

        assert_eq!(form.items().len(), 3);
        assert_eq!(form.view("b").map(|view| view.items.clone()), Some(vec![1, 2]));
        assert_eq!(form.item_by_answer("applicant_age").map(CompiledItem::id), Some("age"));
        assert!(form.item_by_answer("intro").is_none());
        assert_eq!(form.first_view().id, "a");
    }

    #[test]
    fn rejects_duplicates_and_bad_validation_rules() {
        let duplicate = load(json!({
            "id": "f", "title": "F", "version": "1",
            "views": [ { "id": "a", "items": [
                { "id": "x", "type": "text" }, { "id": "x", "type": "text" }
            ] } ]
        }));
        assert!(matches!(duplicate, Err(DefinitionError::DuplicateItem(_))));

        let max_length = load(json!({
            "id": "f", "title": "F", "version": "1",
            "views": [ { "id": "a", "items": [ { "id": "x", "type": "text", "validation": [
                { "kind": "MAX_LENGTH", "rule": "five", "message": "too long" }
            ] } ] } ]
        }));
        assert!(matches!(max_length, Err(DefinitionError::InvalidMaxLength { .. })));

        let pattern = load(json!({
            "id": "f", "title": "F", "version": "1",
            "views": [ { "id": "a", "items": [ { "id": "x", "type": "text", "validation": [
                { "kind": "REGEXP", "rule": "([a-z", "message": "bad" }
            ] } ] } ]
        }));
        assert!(matches!(pattern, Err(DefinitionError::InvalidPattern { .. })));

        let empty = load(json!({ "id": "f", "title": "F", "version": "1", "views": [] }));
        assert!(matches!(empty, Err(DefinitionError::NoViews(_))));
    }

    #[test]
    fn unparsable_rules_load_but_keep_their_error() {
        let form = load(json!({
            "id": "f", "title": "F", "version": "1",
            "views": [ { "id": "a", "items": [
                { "id": "x", "type": "text", "visible": { "expr": "data.y ===", "depends_on": ["y"] } }
            ] } ]
        }))
        .expect("load");
        let rule = form.item("x").and_then(|item| item.visible.as_ref()).expect("rule");
        assert!(rule.expr.parse_error().is_some());
    }
}
