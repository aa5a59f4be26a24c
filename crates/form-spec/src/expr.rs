//! Restricted rule expressions.
//!
//! Expressions are parsed once into an AST and evaluated by a tree-walking
//! interpreter that reads from three read-only namespaces (`data`, `user`,
//! `task`). Every evaluation runs under a step, time and memory budget; any
//! breach fails that single expression only.

mod interp;
mod lexer;
pub mod parser;

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::warn;

use interp::{Budget, Interpreter};
pub use parser::Node;

pub(crate) use interp::to_display;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("parse error at {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("step budget of {0} exceeded")]
    StepLimit(u64),
    #[error("time budget of {0:?} exceeded")]
    Timeout(Duration),
    #[error("memory budget of {0} bytes exceeded")]
    MemoryLimit(usize),
    #[error("type error: {0}")]
    Type(String),
}

impl ExprError {
    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        ExprError::Parse {
            position,
            message: message.into(),
        }
    }
}

fn default_time_budget_ms() -> u64 {
    1_000
}

fn default_max_steps() -> u64 {
    10_000
}

fn default_max_memory_bytes() -> usize {
    50 * 1024 * 1024
}

/// Resource ceilings applied to every expression evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Limits {
    #[serde(default = "default_time_budget_ms")]
    pub time_budget_ms: u64,
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            time_budget_ms: default_time_budget_ms(),
            max_steps: default_max_steps(),
            max_memory_bytes: default_max_memory_bytes(),
        }
    }
}

impl Limits {
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }
}

/// Read-only view over the three expression namespaces.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub data: &'a Map<String, Value>,
    pub user: &'a Value,
    pub task: &'a Value,
}

impl<'a> Context<'a> {
    pub fn new(data: &'a Map<String, Value>, user: &'a Value, task: &'a Value) -> Self {
        Self { data, user, task }
    }
}

/// A parsed rule expression. Parse failures are kept and reported on every
/// evaluation so a malformed rule degrades like any other failing rule.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: Result<Arc<Node>, ExprError>,
}

impl Expression {
    pub fn parse(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ast: parser::parse(source).map(Arc::new),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn parse_error(&self) -> Option<&ExprError> {
        self.ast.as_ref().err()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    limits: Limits,
}

impl Evaluator {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn evaluate(&self, expr: &Expression, ctx: &Context<'_>) -> Result<Value, ExprError> {
        let ast = expr.ast.as_ref().map_err(Clone::clone)?;
        let mut interpreter = Interpreter {
            ctx,
            budget: Budget::new(self.limits),
        };
        let result = interpreter.eval(ast);
        tracing::trace!(
            expr = expr.source(),
            steps = interpreter.budget.steps(),
            "evaluated expression"
        );
        result
    }

    /// Shared entry point for every rule slot. `None` means the rule failed
    /// ("undefined"); the caller applies the slot's default.
    pub fn evaluate_rule(&self, expr: &Expression, ctx: &Context<'_>, owner: &str) -> Option<Value> {
        match self.evaluate(expr, ctx) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(owner, expr = expr.source(), error = %err, "rule evaluation failed");
                None
            }
        }
    }
}

/// Truthiness used by every boolean rule slot.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Emptiness as seen by `isEmpty` and the OPTIONAL validation kind.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Integral results become JSON integers so they compare equal to stored
/// answers.
pub(crate) fn number_value(number: f64) -> Value {
    if number.is_finite() && number.fract() == 0.0 && number.abs() < 9.0e15 {
        Value::from(number as i64)
    } else {
        Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
