use std::time::Instant;

use serde_json::{Map, Value};

use crate::expr::parser::{BinaryOp, Helper, LogicalOp, Namespace, Node, Segment, UnaryOp};
use crate::expr::{Context, ExprError, Limits, is_empty_value, number_value, truthy};

/// Step, time and memory counters for one evaluation.
pub(crate) struct Budget {
    limits: Limits,
    started: Instant,
    steps: u64,
    memory: usize,
}

impl Budget {
    pub(crate) fn new(limits: Limits) -> Self {
        Self {
            limits,
            started: Instant::now(),
            steps: 0,
            memory: 0,
        }
    }

    fn tick(&mut self) -> Result<(), ExprError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(ExprError::StepLimit(self.limits.max_steps));
        }
        if self.started.elapsed() > self.limits.time_budget() {
            return Err(ExprError::Timeout(self.limits.time_budget()));
        }
        Ok(())
    }

    fn charge(&mut self, bytes: usize) -> Result<(), ExprError> {
        self.memory = self.memory.saturating_add(bytes);
        if self.memory > self.limits.max_memory_bytes {
            return Err(ExprError::MemoryLimit(self.limits.max_memory_bytes));
        }
        Ok(())
    }

    fn charge_value(&mut self, value: &Value) -> Result<(), ExprError> {
        self.charge(approximate_size(value))
    }

    pub(crate) fn steps(&self) -> u64 {
        self.steps
    }
}

fn approximate_size(value: &Value) -> usize {
    const SLOT: usize = std::mem::size_of::<Value>();
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => SLOT,
        Value::String(text) => SLOT + text.len(),
        Value::Array(items) => SLOT + items.iter().map(approximate_size).sum::<usize>(),
        Value::Object(map) => {
            SLOT + map
                .iter()
                .map(|(key, value)| key.len() + approximate_size(value))
                .sum::<usize>()
        }
    }
}

pub(crate) struct Interpreter<'a, 'c> {
    pub(crate) ctx: &'a Context<'c>,
    pub(crate) budget: Budget,
}

impl Interpreter<'_, '_> {
    pub(crate) fn eval(&mut self, node: &Node) -> Result<Value, ExprError> {
        self.budget.tick()?;
        match node {
            Node::Literal(value) => Ok(value.clone()),
            Node::Path { root, segments } => self.path(*root, segments),
            Node::Unary { op, operand } => {
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!truthy(&value)),
                    UnaryOp::Negate => number_value(-to_number(&value)),
                })
            }
            Node::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, &left, &right)
            }
            Node::Logical { op, left, right } => {
                let left = self.eval(left)?;
                match op {
                    LogicalOp::And if !truthy(&left) => Ok(left),
                    LogicalOp::Or if truthy(&left) => Ok(left),
                    LogicalOp::Nullish if !left.is_null() => Ok(left),
                    _ => self.eval(right),
                }
            }
            Node::Conditional {
                test,
                then,
                otherwise,
            } => {
                if truthy(&self.eval(test)?) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Node::Call { helper, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(*helper, values)
            }
            Node::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                let array = Value::Array(values);
                self.budget.charge_value(&array)?;
                Ok(array)
            }
        }
    }

    fn path(&mut self, root: Namespace, segments: &[Segment]) -> Result<Value, ExprError> {
        let (mut current, rest): (&Value, &[Segment]) = match root {
            Namespace::User => (self.ctx.user, segments),
            Namespace::Task => (self.ctx.task, segments),
            Namespace::Data => {
                let data = self.ctx.data;
                let Some((first, rest)) = segments.split_first() else {
                    let whole = Value::Object(data.clone());
                    self.budget.charge_value(&whole)?;
                    return Ok(whole);
                };
                let key = self.segment_key(first)?;
                match key.as_str().and_then(|name| data.get(name)) {
                    Some(value) => (value, rest),
                    None if key.as_str() == Some("length") => return Ok(Value::from(data.len())),
                    None => return Ok(Value::Null),
                }
            }
        };

        for (position, segment) in rest.iter().enumerate() {
            let key = self.segment_key(segment)?;
            let next = match (current, &key) {
                (Value::Array(items), Value::Number(number)) => number
                    .as_u64()
                    .and_then(|index| items.get(index as usize)),
                (Value::Object(map), Value::String(name)) => map.get(name),
                (Value::Array(items), Value::String(name)) => {
                    name.parse::<usize>().ok().and_then(|index| items.get(index))
                }
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None if key.as_str() == Some("length") && position + 1 == rest.len() => {
                    return Ok(match current {
                        Value::String(text) => Value::from(text.chars().count()),
                        Value::Array(items) => Value::from(items.len()),
                        _ => Value::Null,
                    });
                }
                None => return Ok(Value::Null),
            }
        }

        self.budget.charge_value(current)?;
        Ok(current.clone())
    }

    fn segment_key(&mut self, segment: &Segment) -> Result<Value, ExprError> {
        self.budget.tick()?;
        match segment {
            Segment::Field(name) => Ok(Value::String(name.clone())),
            Segment::Index(node) => self.eval(node),
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
        let value = match op {
            BinaryOp::Add if left.is_string() || right.is_string() => {
                let mut text = to_display(left);
                text.push_str(&to_display(right));
                self.budget.charge(text.len())?;
                Value::String(text)
            }
            BinaryOp::Add => number_value(to_number(left) + to_number(right)),
            BinaryOp::Sub => number_value(to_number(left) - to_number(right)),
            BinaryOp::Mul => number_value(to_number(left) * to_number(right)),
            BinaryOp::Div | BinaryOp::Rem => {
                let divisor = to_number(right);
                if divisor == 0.0 {
                    return Err(ExprError::Type("division by zero".into()));
                }
                let dividend = to_number(left);
                number_value(if op == BinaryOp::Div {
                    dividend / divisor
                } else {
                    dividend % divisor
                })
            }
            BinaryOp::Eq => Value::Bool(loose_eq(left, right)),
            BinaryOp::NotEq => Value::Bool(!loose_eq(left, right)),
            BinaryOp::StrictEq => Value::Bool(strict_eq(left, right)),
            BinaryOp::StrictNotEq => Value::Bool(!strict_eq(left, right)),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                Value::Bool(compare(op, left, right))
            }
        };
        Ok(value)
    }

    fn call(&mut self, helper: Helper, args: Vec<Value>) -> Result<Value, ExprError> {
        let first = args.first().cloned().unwrap_or(Value::Null);
        let second = args.get(1).cloned().unwrap_or(Value::Null);
        let value = match helper {
            Helper::Len => Value::from(match &first {
                Value::String(text) => text.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                _ => 0,
            }),
            Helper::Lower => Value::String(to_display(&first).to_lowercase()),
            Helper::Upper => Value::String(to_display(&first).to_uppercase()),
            Helper::Trim => Value::String(to_display(&first).trim().to_string()),
            Helper::Contains | Helper::Includes => Value::Bool(match &first {
                Value::Array(items) => items.iter().any(|item| loose_eq(item, &second)),
                other => to_display(other).contains(&to_display(&second)),
            }),
            Helper::StartsWith => {
                Value::Bool(to_display(&first).starts_with(&to_display(&second)))
            }
            Helper::EndsWith => Value::Bool(to_display(&first).ends_with(&to_display(&second))),
            Helper::IsEmpty => Value::Bool(is_empty_value(&first)),
            Helper::Concat => {
                if first.is_array() {
                    let mut out = Vec::new();
                    for arg in args {
                        match arg {
                            Value::Array(items) => out.extend(items),
                            Value::Null => {}
                            scalar => out.push(scalar),
                        }
                    }
                    Value::Array(out)
                } else {
                    Value::String(args.iter().map(to_display).collect())
                }
            }
            Helper::Number => {
                let number = to_number(&first);
                if number.is_nan() {
                    Value::Null
                } else {
                    number_value(number)
                }
            }
            Helper::String => Value::String(to_display(&first)),
            Helper::Round => {
                let digits = if second.is_null() {
                    0
                } else {
                    to_number(&second).clamp(0.0, 10.0) as i32
                };
                let factor = 10f64.powi(digits);
                number_value((to_number(&first) * factor).round() / factor)
            }
            Helper::Min | Helper::Max | Helper::Sum => {
                let numbers: Vec<f64> = flatten_numbers(&args);
                match helper {
                    Helper::Sum => number_value(numbers.iter().sum()),
                    _ if numbers.is_empty() => Value::Null,
                    Helper::Min => number_value(numbers.iter().copied().fold(f64::INFINITY, f64::min)),
                    _ => number_value(numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
                }
            }
            Helper::Choice => {
                let mut map = Map::new();
                map.insert("value".into(), first);
                map.insert("label".into(), Value::String(to_display(&second)));
                Value::Object(map)
            }
        };
        self.budget.charge_value(&value)?;
        Ok(value)
    }
}

fn flatten_numbers(args: &[Value]) -> Vec<f64> {
    let mut numbers = Vec::new();
    for arg in args {
        match arg {
            Value::Array(items) => numbers.extend(items.iter().map(to_number)),
            Value::Null => {}
            other => numbers.push(to_number(other)),
        }
    }
    numbers.retain(|number| !number.is_nan());
    numbers
}

pub(crate) fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        Value::Number(number) => number.as_f64().unwrap_or(f64::NAN),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

pub(crate) fn to_display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(to_display).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Number(_) | Value::Bool(_), _) | (_, Value::Number(_) | Value::Bool(_))
            if !left.is_array() && !right.is_array() && !left.is_object() && !right.is_object() =>
        {
            to_number(left) == to_number(right)
        }
        _ => left == right,
    }
}

fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => to_number(left).partial_cmp(&to_number(right)),
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }
}
