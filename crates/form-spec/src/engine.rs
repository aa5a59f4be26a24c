//! Incremental rule evaluation.
//!
//! A pass starts from a set of changed answer ids, collects every item whose
//! derived-state rules can be affected (following value and choices rules
//! that rewrite answers), orders them by their answer dependencies and runs
//! each item's slots in the fixed order visibility → read-only → value →
//! choices. Items that feed back into each other within a pass are frozen at
//! their last state and reported as a [`DependencyCycleError`].

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::compiled::{CompiledChoice, CompiledForm, CompiledItem, CompiledRule, CompiledView};
use crate::error::DependencyCycleError;
use crate::expr::{Context, Evaluator, to_display, truthy};
use crate::session::SessionContext;
use crate::state::{FormState, ResolvedChoice};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Evaluate every slot of every item (session start, reset).
    Full,
    /// Recompute only what depends on these answer ids.
    Changed(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    /// Answers rewritten by value or choices rules, in the order they changed.
    pub changed_answers: Vec<String>,
    /// Items with at least one slot evaluated, in evaluation order.
    pub evaluated_items: Vec<String>,
    pub cycles: Vec<DependencyCycleError>,
    /// Rule evaluations that failed and fell back to their default.
    pub failed_rules: usize,
}

pub struct Engine<'f> {
    form: &'f CompiledForm,
    evaluator: Evaluator,
}

impl<'f> Engine<'f> {
    pub fn new(form: &'f CompiledForm, evaluator: Evaluator) -> Self {
        Self { form, evaluator }
    }

    #[instrument(skip_all, fields(form = self.form.id()))]
    pub fn run_pass(
        &self,
        state: &mut FormState,
        session: &SessionContext,
        trigger: Trigger,
    ) -> PassReport {
        let mut report = PassReport::default();
        let (full, mut changed, candidates) = match trigger {
            Trigger::Full => (
                true,
                BTreeSet::new(),
                (0..self.form.items().len()).collect::<BTreeSet<_>>(),
            ),
            Trigger::Changed(answer_ids) => {
                let candidates = self.affected_items(&answer_ids);
                (false, answer_ids.into_iter().collect(), candidates)
            }
        };

        let schedule = self.schedule(&candidates);
        for group in &schedule.cycles {
            let items: Vec<String> = group
                .iter()
                .map(|index| self.form.items()[*index].id().to_string())
                .collect();
            let error = DependencyCycleError { items };
            warn!(%error, "skipping cyclic items; keeping last known-good state");
            report.cycles.push(error);
        }
        let frozen: HashSet<usize> = schedule.cycles.iter().flatten().copied().collect();

        for index in schedule.order {
            let item = &self.form.items()[index];
            let mut pass = ItemPass {
                evaluator: &self.evaluator,
                session,
                state: &mut *state,
                changed: &mut changed,
                report: &mut report,
                full,
            };
            // A start pass has no known-good flags to keep, so cyclic items
            // still get visibility and read-only; value and choices stay frozen.
            let ran = if frozen.contains(&index) {
                full && pass.run_flags(item)
            } else {
                pass.run(item)
            };
            if ran {
                report.evaluated_items.push(item.id().to_string());
            }
        }

        debug!(
            evaluated = report.evaluated_items.len(),
            changed = report.changed_answers.len(),
            cycles = report.cycles.len(),
            failed = report.failed_rules,
            "rule pass finished"
        );
        report
    }

    /// Transitive closure over the index. Items that can rewrite their own
    /// answer extend the closure with that answer's dependents.
    pub fn affected_items(&self, answer_ids: &[String]) -> BTreeSet<usize> {
        let index = self.form.index();
        let mut items = BTreeSet::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut pending: Vec<&str> = answer_ids.iter().map(String::as_str).collect();

        while let Some(answer) = pending.pop() {
            if !seen.insert(answer) {
                continue;
            }
            for item_index in index.dependent_items(answer) {
                if !items.insert(item_index) {
                    continue;
                }
                let item = &self.form.items()[item_index];
                if item.produces_answer()
                    && let Some(produced) = item.answer_id()
                {
                    pending.push(produced);
                }
            }
        }
        items
    }

    fn schedule(&self, candidates: &BTreeSet<usize>) -> Schedule {
        let mut edges: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &index in candidates {
            let item = &self.form.items()[index];
            let mut producers: Vec<usize> = item
                .derived_dependencies()
                .filter_map(|dep| self.form.item_by_answer(dep))
                .filter(|producer| {
                    producer.index != index
                        && producer.produces_answer()
                        && candidates.contains(&producer.index)
                })
                .map(|producer| producer.index)
                .collect();
            producers.sort_unstable();
            producers.dedup();
            for producer in producers {
                edges.entry(producer).or_default().push(index);
            }
        }

        let cycles: Vec<Vec<usize>> = strongly_connected(candidates, &edges)
            .into_iter()
            .filter(|component| component.len() > 1)
            .collect();
        let mut component_of: HashMap<usize, usize> = HashMap::new();
        for (id, component) in cycles.iter().enumerate() {
            for &index in component {
                component_of.insert(index, id);
            }
        }
        let same_cycle = |a: usize, b: usize| {
            matches!((component_of.get(&a), component_of.get(&b)), (Some(x), Some(y)) if x == y)
        };

        let mut indegree: BTreeMap<usize, usize> =
            candidates.iter().map(|index| (*index, 0)).collect();
        for (&from, targets) in &edges {
            for &to in targets {
                if !same_cycle(from, to)
                    && let Some(count) = indegree.get_mut(&to)
                {
                    *count += 1;
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(index, _)| Reverse(*index))
            .collect();
        let mut order = Vec::with_capacity(candidates.len());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for &to in edges.get(&index).map(Vec::as_slice).unwrap_or(&[]) {
                if same_cycle(index, to) {
                    continue;
                }
                if let Some(count) = indegree.get_mut(&to) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(to));
                    }
                }
            }
        }

        Schedule { order, cycles }
    }
}

struct Schedule {
    /// Candidates in dependency order, declaration order breaking ties.
    order: Vec<usize>,
    /// Components of two or more mutually dependent items, each sorted.
    cycles: Vec<Vec<usize>>,
}

/// Iterative Tarjan over the candidate subgraph.
fn strongly_connected(
    nodes: &BTreeSet<usize>,
    edges: &BTreeMap<usize, Vec<usize>>,
) -> Vec<Vec<usize>> {
    let mut counter = 0usize;
    let mut discovered: HashMap<usize, usize> = HashMap::new();
    let mut low: HashMap<usize, usize> = HashMap::new();
    let mut on_stack: HashSet<usize> = HashSet::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut components = Vec::new();

    for &start in nodes {
        if discovered.contains_key(&start) {
            continue;
        }
        let mut frames: Vec<(usize, usize)> = vec![(start, 0)];
        discovered.insert(start, counter);
        low.insert(start, counter);
        counter += 1;
        stack.push(start);
        on_stack.insert(start);

        while let Some(frame) = frames.last_mut() {
            let node = frame.0;
            let successors = edges.get(&node).map(Vec::as_slice).unwrap_or(&[]);
            if frame.1 < successors.len() {
                let next = successors[frame.1];
                frame.1 += 1;
                if let Some(&next_index) = discovered.get(&next) {
                    if on_stack.contains(&next) {
                        let current = low[&node];
                        low.insert(node, current.min(next_index));
                    }
                } else {
                    discovered.insert(next, counter);
                    low.insert(next, counter);
                    counter += 1;
                    stack.push(next);
                    on_stack.insert(next);
                    frames.push((next, 0));
                }
                continue;
            }

            frames.pop();
            let node_low = low[&node];
            if let Some(&(parent, _)) = frames.last() {
                let parent_low = low[&parent];
                low.insert(parent, parent_low.min(node_low));
            }
            if node_low == discovered[&node] {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack.remove(&member);
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            }
        }
    }
    components
}

/// Evaluation of one item's slots within a pass.
struct ItemPass<'a> {
    evaluator: &'a Evaluator,
    session: &'a SessionContext,
    state: &'a mut FormState,
    changed: &'a mut BTreeSet<String>,
    report: &'a mut PassReport,
    full: bool,
}

impl ItemPass<'_> {
    fn due(&self, rule: &CompiledRule) -> bool {
        self.full || rule.reads_any(self.changed)
    }

    fn eval(&mut self, rule: &CompiledRule, owner: &str) -> Option<Value> {
        let ctx = Context::new(
            &self.state.values,
            &self.session.user,
            &self.session.task,
        );
        let result = self.evaluator.evaluate_rule(&rule.expr, &ctx, owner);
        if result.is_none() {
            self.report.failed_rules += 1;
        }
        result
    }

    /// Failing boolean rules fall back to `false`.
    fn eval_flag(&mut self, rule: &CompiledRule, owner: &str) -> bool {
        self.eval(rule, owner).is_some_and(|value| truthy(&value))
    }

    fn set_answer(&mut self, answer_id: &str, value: Value) {
        if self.state.values.get(answer_id) == Some(&value) {
            return;
        }
        debug!(answer = answer_id, %value, "rule rewrote answer");
        self.state.values.insert(answer_id.to_string(), value);
        self.changed.insert(answer_id.to_string());
        self.report.changed_answers.push(answer_id.to_string());
    }

    /// Visibility and read-only slots. Returns whether either rule ran.
    fn run_flags(&mut self, item: &CompiledItem) -> bool {
        let id = item.id();
        let mut ran = false;

        if let Some(rule) = &item.visible
            && self.due(rule)
        {
            let visible = self.eval_flag(rule, id);
            self.state.visibility.insert(id.to_string(), visible);
            ran = true;
        } else if self.full {
            self.state.visibility.insert(id.to_string(), true);
        }

        if let Some(rule) = &item.read_only
            && self.due(rule)
        {
            let read_only = self.eval_flag(rule, id);
            self.state.read_only.insert(id.to_string(), read_only);
            ran = true;
        } else if self.full {
            self.state.read_only.insert(id.to_string(), false);
        }
        ran
    }

    /// Returns whether any slot ran.
    fn run(&mut self, item: &CompiledItem) -> bool {
        let id = item.id();
        let mut ran = self.run_flags(item);

        if let Some(rule) = &item.value
            && self.due(rule)
        {
            ran = true;
            if let Some(value) = self.eval(rule, id)
                && !value.is_null()
                && let Some(answer) = item.answer_id()
            {
                self.set_answer(answer, value);
            }
        }

        let choices_due = self.full
            || (item.has_choice_rules()
                && item
                    .choice_dependencies()
                    .any(|dep| self.changed.contains(dep)));
        if choices_due && (item.has_choice_rules() || !item.options.is_empty()) {
            ran |= item.has_choice_rules();
            let resolved = self.resolve_choices(item);
            if item.has_choice_rules() {
                self.drop_unselectable_answer(item, &resolved);
            }
            self.state.choices.insert(id.to_string(), resolved);
        }

        ran
    }

    fn resolve_choices(&mut self, item: &CompiledItem) -> Vec<ResolvedChoice> {
        let id = item.id();
        let dynamic = match item.choices.as_ref() {
            Some(rule) => match self.eval(rule, id) {
                Some(Value::Array(entries)) => Some(entries),
                Some(Value::Null) | None => None,
                Some(other) => {
                    warn!(item = id, value = %other, "choices rule did not yield an array; keeping static choices");
                    None
                }
            },
            None => None,
        };

        let base: Vec<(Value, String, Option<&CompiledChoice>)> = match dynamic {
            Some(entries) => entries
                .iter()
                .filter_map(choice_from_value)
                .map(|(value, label)| {
                    let rules = item.options.iter().find(|option| option.value == value);
                    (value, label, rules)
                })
                .collect(),
            None => item
                .options
                .iter()
                .map(|option| (option.value.clone(), option.label.clone(), Some(option)))
                .collect(),
        };

        base.into_iter()
            .map(|(value, label, rules)| {
                let disabled = rules
                    .and_then(|rules| rules.disabled.as_ref())
                    .is_some_and(|rule| self.eval_flag(rule, id));
                let visible = match rules.and_then(|rules| rules.visible.as_ref()) {
                    Some(rule) => self.eval_flag(rule, id),
                    None => true,
                };
                ResolvedChoice {
                    value,
                    label,
                    disabled,
                    visible,
                }
            })
            .collect()
    }

    /// A selection that is no longer offered is cleared, which counts as an
    /// answer change for the rest of the pass.
    fn drop_unselectable_answer(&mut self, item: &CompiledItem, resolved: &[ResolvedChoice]) {
        let Some(answer) = item.answer_id() else {
            return;
        };
        let offered = |value: &Value| {
            resolved
                .iter()
                .any(|choice| choice.selectable() && choice.value == *value)
        };
        let replacement = match self.state.values.get(answer) {
            None | Some(Value::Null) => return,
            Some(Value::Array(selected)) => {
                let kept: Vec<Value> = selected.iter().filter(|v| offered(v)).cloned().collect();
                if kept.len() == selected.len() {
                    return;
                }
                Value::Array(kept)
            }
            Some(value) if offered(value) => return,
            Some(_) => Value::Null,
        };
        self.set_answer(answer, replacement);
    }
}

fn choice_from_value(entry: &Value) -> Option<(Value, String)> {
    match entry {
        Value::Null => None,
        Value::Object(map) => {
            let value = map.get("value")?.clone();
            let label = map
                .get("label")
                .map(to_display)
                .unwrap_or_else(|| to_display(&value));
            Some((value, label))
        }
        scalar => Some((scalar.clone(), to_display(scalar))),
    }
}

/// Views without a `visible` rule are always shown; a failing rule hides the
/// view.
pub fn view_visible(
    evaluator: &Evaluator,
    view: &CompiledView,
    values: &Map<String, Value>,
    session: &SessionContext,
) -> bool {
    let Some(rule) = &view.visible else {
        return true;
    };
    let ctx = Context::new(values, &session.user, &session.task);
    evaluator
        .evaluate_rule(&rule.expr, &ctx, &view.id)
        .is_some_and(|value| truthy(&value))
}

/// Seeds a fresh state from the definition's initial values and item
/// defaults; explicit answers win over both.
pub fn initial_values(form: &CompiledForm, answers: &Map<String, Value>) -> Map<String, Value> {
    let mut values = form.spec().initial_values.clone();
    for item in form.items() {
        if let (Some(answer), Some(default)) = (item.answer_id(), &item.spec.default_value) {
            values
                .entry(answer.to_string())
                .or_insert_with(|| default.clone());
        }
    }
    for (key, value) in answers {
        values.insert(key.clone(), value.clone());
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Limits;
    use serde_json::json;

    fn form(items: Value) -> CompiledForm {
        CompiledForm::from_json(
            &json!({
                "id": "f", "title": "F", "version": "1",
                "views": [ { "id": "main", "items": items } ]
            })
            .to_string(),
        )
        .expect("form loads")
    }

    fn seeded(form: &CompiledForm, answers: Value) -> (FormState, SessionContext) {
        let session = SessionContext::default();
        let mut state = FormState {
            values: initial_values(form, answers.as_object().expect("object")),
            current_view: form.first_view().id.clone(),
            ..FormState::default()
        };
        Engine::new(form, Evaluator::default()).run_pass(&mut state, &session, Trigger::Full);
        (state, session)
    }

    fn income_form() -> CompiledForm {
        form(json!([
            { "id": "bracket", "type": "select",
              "choices": { "expr": "data.income > 100 ? ['high', 'top'] : ['low']", "depends_on": ["income"] } },
            { "id": "salary", "type": "number" },
            { "id": "bonus", "type": "number" },
            { "id": "income", "type": "number",
              "value": { "expr": "data.salary + data.bonus", "depends_on": ["salary", "bonus"] } },
            { "id": "nickname", "type": "text",
              "visible": { "expr": "data.bonus > 0", "depends_on": ["bonus"] } },
            { "id": "unrelated", "type": "text",
              "visible": { "expr": "user.role == 'admin'", "depends_on": ["role"] } }
        ]))
    }

    #[test]
    fn two_hop_propagation_runs_value_before_choices() {
        let form = income_form();
        let (mut state, session) = seeded(&form, json!({ "salary": 50, "bonus": 10 }));
        assert_eq!(state.values["income"], json!(60));
        assert_eq!(state.choices["bracket"][0].value, json!("low"));

        state.values.insert("salary".into(), json!(200));
        let report = Engine::new(&form, Evaluator::default()).run_pass(
            &mut state,
            &session,
            Trigger::Changed(vec!["salary".into()]),
        );

        assert_eq!(report.evaluated_items, vec!["income", "bracket"]);
        assert_eq!(report.changed_answers, vec!["income"]);
        assert_eq!(state.values["income"], json!(210));
        let labels: Vec<_> = state.choices["bracket"].iter().map(|c| c.label.clone()).collect();
        assert_eq!(labels, vec!["high", "top"]);
    }

    #[test]
    fn recomputes_only_the_transitive_closure() {
        let form = income_form();
        let (mut state, session) = seeded(&form, json!({ "salary": 50, "bonus": 10 }));
        let before = state.clone();

        state.values.insert("salary".into(), json!(51));
        Engine::new(&form, Evaluator::default()).run_pass(
            &mut state,
            &session,
            Trigger::Changed(vec!["salary".into()]),
        );

        assert_eq!(state.visibility["nickname"], before.visibility["nickname"]);
        assert_eq!(state.visibility["unrelated"], before.visibility["unrelated"]);
        assert_eq!(state.choices["bracket"], before.choices["bracket"]);
        assert_eq!(state.values["income"], json!(61));
    }

    #[test]
    fn cycle_is_frozen_while_the_rest_of_the_pass_continues() {
        let form = form(json!([
            { "id": "a", "type": "number",
              "value": { "expr": "data.b + 1", "depends_on": ["b", "seed"] } },
            { "id": "b", "type": "number",
              "value": { "expr": "data.a + 1", "depends_on": ["a"] } },
            { "id": "seed", "type": "number" },
            { "id": "after", "type": "text",
              "visible": { "expr": "data.seed > 1", "depends_on": ["seed"] } },
            { "id": "downstream", "type": "number",
              "value": { "expr": "data.a * 10", "depends_on": ["a"] } }
        ]));
        let (mut state, session) = seeded(&form, json!({ "a": 1, "b": 2, "seed": 0 }));
        assert_eq!(state.values["a"], json!(1));
        assert_eq!(state.values["b"], json!(2));

        state.values.insert("seed".into(), json!(5));
        let report = Engine::new(&form, Evaluator::default()).run_pass(
            &mut state,
            &session,
            Trigger::Changed(vec!["seed".into()]),
        );

        assert_eq!(report.cycles.len(), 1);
        assert_eq!(report.cycles[0].items, vec!["a", "b"]);
        assert_eq!(state.values["a"], json!(1));
        assert_eq!(state.values["b"], json!(2));
        assert!(state.visibility["after"]);
        assert_eq!(state.values["downstream"], json!(10));
    }

    #[test]
    fn cyclic_items_still_get_flags_on_the_start_pass() {
        let form = form(json!([
            { "id": "a", "type": "number",
              "visible": { "expr": "false" },
              "read_only": { "expr": "true" },
              "value": { "expr": "data.b + 1", "depends_on": ["b"] } },
            { "id": "b", "type": "number",
              "value": { "expr": "data.a + 1", "depends_on": ["a"] } }
        ]));
        let (state, _) = seeded(&form, json!({ "a": 7 }));

        assert_eq!(state.values["a"], json!(7));
        assert!(state.value("b").is_none());
        assert!(!state.is_visible("a"));
        assert!(state.is_read_only("a"));
        assert!(state.is_visible("b"));
        assert!(!state.is_read_only("b"));

        let data = crate::submission::assemble(&form, &state);
        assert!(!data.contains_key("a"));
        assert_eq!(data["b"], Value::Null);
    }

    #[test]
    fn failing_rule_does_not_stop_siblings() {
        let mut form_json = json!({
            "id": "f", "title": "F", "version": "1",
            "views": [ { "id": "main", "items": [
                { "id": "heavy", "type": "text",
                  "visible": { "expr": "", "depends_on": ["x"] } },
                { "id": "light", "type": "text",
                  "visible": { "expr": "data.x == 1", "depends_on": ["x"] } },
                { "id": "broken", "type": "text",
                  "read_only": { "expr": "data.x +", "depends_on": ["x"] } }
            ] } ]
        });
        let heavy = vec!["data.x"; 150].join(" + ");
        form_json["views"][0]["items"][0]["visible"]["expr"] = json!(format!("({heavy}) > 0"));
        form_json["limits"] = serde_json::to_value(Limits {
            max_steps: 100,
            ..Limits::default()
        })
        .expect("limits");
        let form = CompiledForm::from_json(&form_json.to_string()).expect("load");
        let (mut state, session) = seeded(&form, json!({ "x": 0 }));

        state.values.insert("x".into(), json!(1));
        let report = Engine::new(&form, Evaluator::new(form.limits())).run_pass(
            &mut state,
            &session,
            Trigger::Changed(vec!["x".into()]),
        );

        assert_eq!(report.failed_rules, 2);
        assert!(!state.visibility["heavy"]);
        assert!(state.visibility["light"]);
        assert!(!state.read_only["broken"]);
    }

    #[test]
    fn user_value_stands_until_value_rule_dependencies_change() {
        let form = income_form();
        let (mut state, session) = seeded(&form, json!({ "salary": 1, "bonus": 1 }));
        state.values.insert("income".into(), json!(999));
        let engine = Engine::new(&form, Evaluator::default());

        engine.run_pass(&mut state, &session, Trigger::Changed(vec!["income".into()]));
        assert_eq!(state.values["income"], json!(999));

        state.values.insert("bonus".into(), json!(2));
        engine.run_pass(&mut state, &session, Trigger::Changed(vec!["bonus".into()]));
        assert_eq!(state.values["income"], json!(3));
    }

    #[test]
    fn choice_sub_rules_and_clearing_of_withdrawn_selection() {
        let form = form(json!([
            { "id": "plan", "type": "select",
              "options": [
                { "value": "basic", "label": "Basic" },
                { "value": "pro", "label": "Pro",
                  "disabled": { "expr": "data.seats < 5", "depends_on": ["seats"] } },
                { "value": "legacy", "label": "Legacy",
                  "visible": { "expr": "data.seats > 100", "depends_on": ["seats"] } }
              ] },
            { "id": "seats", "type": "number" },
            { "id": "summary", "type": "text",
              "value": { "expr": "'plan:' + data.plan", "depends_on": ["plan"] } }
        ]));
        let (mut state, session) = seeded(&form, json!({ "seats": 10, "plan": "pro" }));
        let plan = &state.choices["plan"];
        assert!(!plan[1].disabled);
        assert!(!plan[2].visible);
        assert_eq!(state.values["summary"], json!("plan:pro"));

        state.values.insert("seats".into(), json!(2));
        let report = Engine::new(&form, Evaluator::default()).run_pass(
            &mut state,
            &session,
            Trigger::Changed(vec!["seats".into()]),
        );

        assert!(state.choices["plan"][1].disabled);
        assert_eq!(state.values["plan"], Value::Null);
        assert_eq!(report.changed_answers, vec!["plan", "summary"]);
        assert_eq!(state.values["summary"], json!("plan:"));
    }

    #[test]
    fn independent_items_follow_declaration_order() {
        let form = form(json!([
            { "id": "z", "type": "text", "visible": { "expr": "data.k", "depends_on": ["k"] } },
            { "id": "y", "type": "text", "read_only": { "expr": "data.k", "depends_on": ["k"] } },
            { "id": "x", "type": "text", "value": { "expr": "data.k", "depends_on": ["k"] } }
        ]));
        let (mut state, session) = seeded(&form, json!({}));
        state.values.insert("k".into(), json!("v"));
        let report = Engine::new(&form, Evaluator::default()).run_pass(
            &mut state,
            &session,
            Trigger::Changed(vec!["k".into()]),
        );
        assert_eq!(report.evaluated_items, vec!["z", "y", "x"]);
    }
}
