use handlebars::{Handlebars, no_escape};
use serde_json::{Value, json};
use tracing::debug;

use crate::compiled::{CompiledForm, CompiledItem, CompiledValidation, ValidationRule};
use crate::engine::view_visible;
use crate::expr::{Context, Evaluator, is_empty_value, to_display, truthy};
use crate::session::SessionContext;
use crate::spec::ValidationKind;
use crate::state::{ErrorMap, FormState};

/// Which items a validation run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    View(&'a str),
    /// Every item in every visible view.
    All,
}

impl Scope<'_> {
    fn covers(&self, form: &CompiledForm, item: &CompiledItem) -> bool {
        match self {
            Scope::View(view_id) => form.views()[item.view].id == *view_id,
            Scope::All => true,
        }
    }
}

/// Checks the visible in-scope items and returns the messages of those that
/// fail. Does not touch `state`.
pub fn validate_items(
    form: &CompiledForm,
    state: &FormState,
    session: &SessionContext,
    evaluator: &Evaluator,
    scope: Scope<'_>,
) -> ErrorMap {
    let messages = MessageRenderer::new();
    let ctx = Context::new(&state.values, &session.user, &session.task);
    let mut errors = ErrorMap::new();

    for view in form.views() {
        if matches!(scope, Scope::View(id) if id != view.id) {
            continue;
        }
        if matches!(scope, Scope::All) && !view_visible(evaluator, view, &state.values, session) {
            continue;
        }
        for item in form.view_items(view) {
            if item.validation.is_empty() || !state.is_visible(item.id()) {
                continue;
            }
            let value = item
                .answer_id()
                .and_then(|answer| state.value(answer))
                .unwrap_or(&Value::Null);
            let failures: Vec<String> = item
                .validation
                .iter()
                .filter(|validation| !passes(evaluator, &ctx, item, validation, value))
                .map(|validation| messages.render(item, validation, value))
                .collect();
            if !failures.is_empty() {
                debug!(item = item.id(), count = failures.len(), "validation failed");
                errors.insert(item.id().to_string(), failures);
            }
        }
    }
    errors
}

/// Replaces the stored messages of every in-scope item with `errors`;
/// in-scope items absent from `errors` (passing or hidden) are cleared.
pub fn apply_errors(form: &CompiledForm, state: &mut FormState, scope: Scope<'_>, errors: &ErrorMap) {
    for item in form.items() {
        if scope.covers(form, item) {
            let messages = errors.get(item.id()).cloned().unwrap_or_default();
            state.replace_errors(item.id(), messages);
        }
    }
}

fn passes(
    evaluator: &Evaluator,
    ctx: &Context<'_>,
    item: &CompiledItem,
    validation: &CompiledValidation,
    value: &Value,
) -> bool {
    match (&validation.kind, &validation.rule) {
        (ValidationKind::Optional, ValidationRule::Expr(expr)) => {
            !is_empty_value(value)
                || evaluator
                    .evaluate_rule(expr, ctx, item.id())
                    .is_some_and(|result| truthy(&result))
        }
        (ValidationKind::Custom, ValidationRule::Expr(expr)) => evaluator
            .evaluate_rule(expr, ctx, item.id())
            .is_some_and(|result| truthy(&result)),
        (_, ValidationRule::MaxLength(limit)) => {
            is_empty_value(value) || measured_length(value) <= *limit
        }
        (_, ValidationRule::Pattern(pattern)) => {
            is_empty_value(value) || pattern.is_match(&to_display(value))
        }
        // kinds and rules are paired at load
        (_, ValidationRule::Expr(_)) => true,
    }
}

fn measured_length(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::String(text) => text.chars().count(),
        other => to_display(other).chars().count(),
    }
}

struct MessageRenderer {
    handlebars: Handlebars<'static>,
}

impl MessageRenderer {
    fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(no_escape);
        Self { handlebars }
    }

    /// Falls back to the raw message when the template does not render.
    fn render(&self, item: &CompiledItem, validation: &CompiledValidation, value: &Value) -> String {
        let data = json!({
            "label": item.spec.display_label(),
            "value": value,
            "rule": validation.raw_rule,
        });
        self.handlebars
            .render_template(&validation.message, &data)
            .unwrap_or_else(|_| validation.message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, Trigger, initial_values};
    use proptest::prelude::*;

    fn form() -> CompiledForm {
        CompiledForm::from_json(
            &json!({
                "id": "f", "title": "F", "version": "1",
                "views": [
                    { "id": "personal", "items": [
                        { "id": "name", "type": "text", "label": "Name", "validation": [
                            { "kind": "OPTIONAL", "rule": "false", "message": "{{label}} is required" },
                            { "kind": "REGEXP", "rule": "^[A-Za-z]+$", "message": "letters only, got {{value}}" }
                        ] },
                        { "id": "code", "type": "text", "validation": [
                            { "kind": "MAX_LENGTH", "rule": "5", "message": "at most {{rule}} characters" }
                        ] },
                        { "id": "age", "type": "number", "validation": [
                            { "kind": "CUSTOM", "rule": "data.age >= 18", "message": "adults only",
                              "depends_on": ["age"] }
                        ] },
                        { "id": "secret", "type": "text",
                          "visible": { "expr": "data.age > 60", "depends_on": ["age"] },
                          "validation": [ { "kind": "OPTIONAL", "rule": "false", "message": "needed" } ] },
                        { "id": "broken", "type": "text", "validation": [
                            { "kind": "CUSTOM", "rule": "true", "message": "{{#if}}" }
                        ] }
                    ] },
                    { "id": "extra", "items": [
                        { "id": "notes", "type": "textarea", "validation": [
                            { "kind": "OPTIONAL", "rule": "data.age < 30", "message": "notes required" }
                        ] }
                    ] }
                ]
            })
            .to_string(),
        )
        .expect("form loads")
    }

    fn state(form: &CompiledForm, answers: Value) -> FormState {
        let mut state = FormState {
            values: initial_values(form, answers.as_object().expect("object")),
            ..FormState::default()
        };
        Engine::new(form, Evaluator::default()).run_pass(
            &mut state,
            &SessionContext::default(),
            Trigger::Full,
        );
        state
    }

    fn check(form: &CompiledForm, answers: Value, scope: Scope<'_>) -> ErrorMap {
        let state = state(form, answers);
        validate_items(form, &state, &SessionContext::default(), &Evaluator::default(), scope)
    }

    #[test]
    fn regexp_rejects_mismatch_and_accepts_match() {
        let form = form();
        let errors = check(&form, json!({ "name": "abc123", "age": 20 }), Scope::View("personal"));
        assert_eq!(errors["name"], vec!["letters only, got abc123"]);

        let errors = check(&form, json!({ "name": "abc", "age": 20 }), Scope::View("personal"));
        assert!(!errors.contains_key("name"));
    }

    #[test]
    fn max_length_counts_characters() {
        let form = form();
        let ok = check(&form, json!({ "name": "a", "code": "hello", "age": 20 }), Scope::View("personal"));
        assert!(!ok.contains_key("code"));

        let too_long = check(&form, json!({ "name": "a", "code": "hello!", "age": 20 }), Scope::View("personal"));
        assert_eq!(too_long["code"], vec!["at most 5 characters"]);

        let unicode = check(&form, json!({ "name": "a", "code": "héllo", "age": 20 }), Scope::View("personal"));
        assert!(!unicode.contains_key("code"));
    }

    #[test]
    fn optional_and_custom_rules_accumulate_in_order() {
        let form = form();
        let errors = check(&form, json!({ "name": "  ", "age": 12 }), Scope::View("personal"));
        assert_eq!(errors["name"], vec!["Name is required"]);
        assert_eq!(errors["age"], vec!["adults only"]);
        assert!(!errors.contains_key("code"));
    }

    #[test]
    fn hidden_items_are_skipped_and_their_errors_cleared() {
        let form = form();
        let mut state = state(&form, json!({ "name": "a", "age": 20 }));
        state.replace_errors("secret", vec!["stale".into()]);
        let errors = validate_items(
            &form,
            &state,
            &SessionContext::default(),
            &Evaluator::default(),
            Scope::View("personal"),
        );
        assert!(!errors.contains_key("secret"));

        apply_errors(&form, &mut state, Scope::View("personal"), &errors);
        assert!(!state.errors.contains_key("secret"));
    }

    #[test]
    fn scope_limits_items_and_all_covers_every_view() {
        let form = form();
        let personal = check(&form, json!({ "name": "a", "age": 40 }), Scope::View("personal"));
        assert!(!personal.contains_key("notes"));

        let all = check(&form, json!({ "name": "a", "age": 40 }), Scope::All);
        assert_eq!(all["notes"], vec!["notes required"]);
    }

    #[test]
    fn broken_template_falls_back_to_raw_message() {
        let form = form();
        let item = form.item("broken").expect("item");
        let rendered = MessageRenderer::new().render(item, &item.validation[0], &json!("x"));
        assert_eq!(rendered, "{{#if}}");
    }

    #[test]
    fn apply_replaces_messages_wholesale() {
        let form = form();
        let mut state = state(&form, json!({ "name": "1", "age": 20 }));
        state.merge_errors("name", vec!["server says no".into()]);
        let errors = validate_items(
            &form,
            &state,
            &SessionContext::default(),
            &Evaluator::default(),
            Scope::View("personal"),
        );
        apply_errors(&form, &mut state, Scope::View("personal"), &errors);
        assert_eq!(state.errors["name"], vec!["letters only, got 1"]);
    }

    proptest! {
        #[test]
        fn validation_is_idempotent(name in "[A-Za-z0-9 ]{0,8}", code in "[a-z]{0,8}", age in 0i64..100) {
            let form = form();
            let mut state = state(&form, json!({ "name": name, "code": code, "age": age }));
            let session = SessionContext::default();
            let evaluator = Evaluator::default();

            let first = validate_items(&form, &state, &session, &evaluator, Scope::All);
            apply_errors(&form, &mut state, Scope::All, &first);
            let after_first = state.errors.clone();
            let second = validate_items(&form, &state, &session, &evaluator, Scope::All);
            apply_errors(&form, &mut state, Scope::All, &second);

            prop_assert_eq!(first, second);
            prop_assert_eq!(after_first, state.errors);
        }
    }
}
