//! Builds the `data` object sent to the host.

use serde_json::{Map, Value, json};
use tracing::warn;

use crate::compiled::{CompiledForm, CompiledItem, CompiledView};
use crate::expr::{number_value, to_display};
use crate::spec::ItemType;
use crate::state::FormState;

/// Every answer-bearing item that is visible (or opts in with
/// `include_when_hidden`), keyed by answer id in declaration order.
pub fn assemble(form: &CompiledForm, state: &FormState) -> Map<String, Value> {
    assemble_in_views(form, state, |_| true)
}

/// Like [`assemble`], with items of views rejected by `shown` treated as
/// hidden.
pub fn assemble_in_views(
    form: &CompiledForm,
    state: &FormState,
    shown: impl Fn(&CompiledView) -> bool,
) -> Map<String, Value> {
    let shown_views: Vec<bool> = form.views().iter().map(shown).collect();
    let mut data = Map::new();
    for item in form.items() {
        let Some(answer) = item.answer_id() else {
            continue;
        };
        let visible = shown_views[item.view] && state.is_visible(item.id());
        if !visible && !item.spec.include_when_hidden {
            continue;
        }
        let raw = state.value(answer).unwrap_or(&Value::Null);
        data.insert(answer.to_string(), serialize_answer(item, raw));
    }
    data
}

/// Applies the type table's coercions. Uncoercible values become `null`.
pub fn serialize_answer(item: &CompiledItem, raw: &Value) -> Value {
    if raw.is_null() {
        return Value::Null;
    }
    let coerced = match item.spec.kind {
        ItemType::Text
        | ItemType::Textarea
        | ItemType::Email
        | ItemType::Date
        | ItemType::Select
        | ItemType::Radio => as_string(raw).map(Value::String),
        ItemType::Number => as_number(raw),
        ItemType::Checkbox => match raw {
            Value::Bool(flag) => Some(Value::Bool(*flag)),
            Value::String(text) => match text.trim() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        ItemType::Multiselect | ItemType::File => match raw {
            Value::Array(entries) if entries.iter().all(is_scalar) => Some(raw.clone()),
            Value::Array(_) => None,
            scalar if is_scalar(scalar) => Some(Value::Array(vec![scalar.clone()])),
            _ => None,
        },
        ItemType::Money => money(item, raw),
        ItemType::Phone => phone(item, raw),
        ItemType::Section | ItemType::Paragraph | ItemType::Action => return Value::Null,
    };
    coerced.unwrap_or_else(|| {
        warn!(
            item = item.id(),
            kind = item.spec.kind.label(),
            value = %raw,
            "answer does not fit its item type; submitting null"
        );
        Value::Null
    })
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Some(to_display(value)),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(text) => text.trim().parse::<f64>().ok().map(number_value),
        _ => None,
    }
}

fn prop_string(item: &CompiledItem, key: &str) -> Option<String> {
    item.spec.props.get(key).and_then(Value::as_str).map(str::to_string)
}

fn money(item: &CompiledItem, raw: &Value) -> Option<Value> {
    let (amount, currency) = match raw {
        Value::Object(map) => (
            as_number(map.get("amount")?)?,
            map.get("currency")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| prop_string(item, "currency"))?,
        ),
        scalar => (as_number(scalar)?, prop_string(item, "currency")?),
    };
    Some(json!({ "amount": amount, "currency": currency }))
}

fn phone(item: &CompiledItem, raw: &Value) -> Option<Value> {
    let field = |map: &Map<String, Value>, camel: &str, snake: &str| {
        map.get(camel)
            .or_else(|| map.get(snake))
            .and_then(as_string)
    };
    let (country_code, number) = match raw {
        Value::Object(map) => (
            field(map, "countryCode", "country_code")
                .or_else(|| prop_string(item, "country_code"))?,
            field(map, "phoneNumber", "phone_number")?,
        ),
        Value::String(text) => (prop_string(item, "country_code")?, text.clone()),
        _ => return None,
    };
    Some(json!({ "countryCode": country_code, "phoneNumber": number }))
}
