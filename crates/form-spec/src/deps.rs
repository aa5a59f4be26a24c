//! Reverse dependency index: answer id → every rule that declares it.

use std::collections::HashMap;
use std::fmt;

use crate::error::DefinitionError;
use crate::spec::{FormSpec, ItemSpec};

/// The rule slot a dependency was declared on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleSlot {
    Visible,
    ReadOnly,
    Value,
    Choices,
    Validation,
    NextView,
}

impl RuleSlot {
    /// Slots recomputed by the rule engine on every answer change.
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            RuleSlot::Visible | RuleSlot::ReadOnly | RuleSlot::Value | RuleSlot::Choices
        )
    }
}

impl fmt::Display for RuleSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RuleSlot::Visible => "visible",
            RuleSlot::ReadOnly => "read_only",
            RuleSlot::Value => "value",
            RuleSlot::Choices => "choices",
            RuleSlot::Validation => "validation",
            RuleSlot::NextView => "next_view",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependent {
    /// Index into the flattened item list (declaration order).
    Item { index: usize, slot: RuleSlot },
    /// Index into the view list.
    View { index: usize, slot: RuleSlot },
}

#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    dependents: HashMap<String, Vec<Dependent>>,
}

impl DependencyIndex {
    /// Scans every declared dependency list in the definition. Fails when a
    /// derived-state rule lists its own item.
    pub fn build(spec: &FormSpec) -> Result<Self, DefinitionError> {
        let mut index = DependencyIndex::default();

        for (view_index, view) in spec.views.iter().enumerate() {
            for (slot, rule) in [
                (RuleSlot::Visible, &view.visible),
                (RuleSlot::NextView, &view.next_view),
            ] {
                if let Some(rule) = rule {
                    index.declare(
                        &rule.depends_on,
                        Dependent::View {
                            index: view_index,
                            slot,
                        },
                    );
                }
            }
        }

        for (item_index, item) in spec.items().enumerate() {
            for (slot, deps) in declared_lists(item) {
                if slot.is_derived() {
                    reject_self_reference(item, slot, deps)?;
                }
                index.declare(
                    deps,
                    Dependent::Item {
                        index: item_index,
                        slot,
                    },
                );
            }
        }

        Ok(index)
    }

    fn declare(&mut self, deps: &[String], dependent: Dependent) {
        for dep in deps {
            let entry = self.dependents.entry(dep.clone()).or_default();
            if !entry.contains(&dependent) {
                entry.push(dependent);
            }
        }
    }

    pub fn dependents(&self, answer_id: &str) -> &[Dependent] {
        self.dependents
            .get(answer_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Item indices whose derived-state rules read `answer_id`.
    pub fn dependent_items(&self, answer_id: &str) -> impl Iterator<Item = usize> + '_ {
        self.dependents(answer_id)
            .iter()
            .filter_map(|dependent| match dependent {
                Dependent::Item { index, slot } if slot.is_derived() => Some(*index),
                _ => None,
            })
    }

    pub fn answer_ids(&self) -> impl Iterator<Item = &str> {
        self.dependents.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.dependents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }
}

/// Every dependency list an item declares, tagged with its slot. Per-choice
/// sub-rules belong to the choices slot.
pub(crate) fn declared_lists(item: &ItemSpec) -> Vec<(RuleSlot, &[String])> {
    let mut lists: Vec<(RuleSlot, &[String])> = Vec::new();
    let choice_rules = item
        .options
        .iter()
        .flat_map(|option| [&option.disabled, &option.visible])
        .map(|rule| (RuleSlot::Choices, rule));
    let rules = [
        (RuleSlot::Visible, &item.visible),
        (RuleSlot::ReadOnly, &item.read_only),
        (RuleSlot::Value, &item.value),
        (RuleSlot::Choices, &item.choices),
    ]
    .into_iter()
    .chain(choice_rules)
    .chain([(RuleSlot::NextView, &item.next_view)]);
    for (slot, rule) in rules {
        if let Some(rule) = rule {
            lists.push((slot, rule.depends_on.as_slice()));
        }
    }
    for validation in &item.validation {
        lists.push((RuleSlot::Validation, validation.depends_on.as_slice()));
    }
    lists
}

fn reject_self_reference(
    item: &ItemSpec,
    slot: RuleSlot,
    deps: &[String],
) -> Result<(), DefinitionError> {
    let own_answer = item.answer_key();
    if deps
        .iter()
        .any(|dep| *dep == item.id || Some(dep.as_str()) == own_answer)
    {
        return Err(DefinitionError::SelfDependency {
            item: item.id.clone(),
            slot,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ChoiceSpec, ItemType, RuleSpec, ValidationKind, ValidationSpec, ViewSpec};
    use serde_json::json;

    fn form(items: Vec<ItemSpec>) -> FormSpec {
        FormSpec {
            id: "f".into(),
            title: "F".into(),
            version: "1".into(),
            description: None,
            limits: None,
            initial_values: Default::default(),
            views: vec![ViewSpec::new("main", items)],
        }
    }

    #[test]
    fn indexes_every_declared_slot() {
        let mut income = ItemSpec::new("income", ItemType::Number);
        income.value = Some(RuleSpec::new("data.salary + data.bonus", &["salary", "bonus"]));
        income.visible = Some(RuleSpec::new("data.employed", &["employed"]));
        let mut bracket = ItemSpec::new("bracket", ItemType::Select);
        bracket.choices = Some(RuleSpec::new("[]", &["income"]));
        bracket.options.push(ChoiceSpec {
            value: json!("high"),
            label: "High".into(),
            disabled: Some(RuleSpec::new("data.salary < 10", &["salary"])),
            visible: None,
        });
        bracket.validation.push(ValidationSpec {
            kind: ValidationKind::Custom,
            rule: "data.bracket != 'x'".into(),
            message: "no".into(),
            depends_on: vec!["bracket".into()],
        });

        let index = DependencyIndex::build(&form(vec![income, bracket])).expect("index");

        assert_eq!(
            index.dependents("salary"),
            &[
                Dependent::Item {
                    index: 0,
                    slot: RuleSlot::Value
                },
                Dependent::Item {
                    index: 1,
                    slot: RuleSlot::Choices
                },
            ]
        );
        assert_eq!(index.dependent_items("income").collect::<Vec<_>>(), vec![1]);
        assert_eq!(index.dependent_items("bracket").count(), 0);
        assert_eq!(index.dependents("bracket").len(), 1);
        assert!(index.dependents("unknown").is_empty());
    }

    #[test]
    fn rejects_value_rule_reading_its_own_answer() {
        let mut total = ItemSpec::new("total", ItemType::Number);
        total.value = Some(RuleSpec::new("data.total + 1", &["total"]));
        let err = DependencyIndex::build(&form(vec![total])).expect_err("self cycle");
        assert!(matches!(
            err,
            DefinitionError::SelfDependency {
                slot: RuleSlot::Value,
                ..
            }
        ));
    }

    #[test]
    fn validation_may_read_its_own_answer() {
        let mut age = ItemSpec::new("age", ItemType::Number);
        age.validation.push(ValidationSpec {
            kind: ValidationKind::Custom,
            rule: "data.age >= 18".into(),
            message: "adults only".into(),
            depends_on: vec!["age".into()],
        });
        assert!(DependencyIndex::build(&form(vec![age])).is_ok());
    }
}
