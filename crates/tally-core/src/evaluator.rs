//! Expression evaluation against a request context
//!
//! Field paths are dot-separated and rooted at `user`, `team`, `addons` or
//! `$computed`, with `register_date` and `team_size` as reserved flat paths.
//! A missing field is a not-found leaf, not an error; every expression decides
//! for itself whether not-found is falsy (most) or truthy (`field_empty`).

use std::collections::HashMap;
use std::convert::TryFrom;

use chrono::{DateTime, Utc};

use tally_types::Value;

use crate::error::{TallyError, TallyResult};
use crate::types::{Context, Expression, RuleSet};

/// Resolve a dot-path against the context. Returns `None` when any segment,
/// including an intermediate one, does not exist.
pub fn field_value(path: &str, ctx: &Context) -> Option<Value> {
    match path {
        "register_date" => return Some(Value::Date(ctx.register_date)),
        "team_size" => return Some(Value::Integer(ctx.team_size)),
        _ => {}
    }

    let (root, rest) = match path.split_once('.') {
        Some((root, rest)) => (root, Some(rest)),
        None => (path, None),
    };
    let map = match root {
        "user" => &ctx.user,
        "team" => &ctx.team,
        "addons" => &ctx.addons,
        "$computed" => &ctx.computed_values,
        _ => return None,
    };
    let Some(rest) = rest else {
        return Some(Value::Object(map.clone()));
    };

    let mut segments = rest.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        match current {
            Value::Object(nested) => current = nested.get(segment)?,
            _ => return None,
        }
    }
    Some(current.clone())
}

/// Resolve a nested dot-path inside a single value (used for array element
/// fields, where the element itself is the root).
pub fn nested_value(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            _ => return None,
        }
    }
    Some(current.clone())
}

/// Evaluates expressions for one rule set. Borrowing the rule set keeps
/// `rule_ref` resolution and recursion allocation-free.
pub struct ExpressionEvaluator<'a> {
    rule_definitions: &'a HashMap<String, Expression>,
}

impl<'a> ExpressionEvaluator<'a> {
    /// Create an evaluator over the rule set's named definitions.
    pub fn new(rule_set: &'a RuleSet) -> Self {
        Self { rule_definitions: &rule_set.rule_definitions }
    }

    /// Evaluate a predicate against the context.
    pub fn evaluate(&self, expression: &Expression, ctx: &Context) -> TallyResult<bool> {
        match expression {
            Expression::AlwaysTrue => Ok(true),

            Expression::Equals { field, value } => {
                let Some(actual) = field_value(field, ctx) else {
                    return Ok(false);
                };
                let expected = Value::try_from(value)
                    .map_err(|e| TallyError::expression_on_field(field, e.to_string()))?;
                Ok(actual == expected)
            }

            Expression::Compare { field, operator, value } => {
                let Some(actual) = field_value(field, ctx) else {
                    return Ok(false);
                };
                let lhs = actual.as_f64().ok_or_else(|| {
                    TallyError::expression_on_field(
                        field,
                        format!("cannot compare {} value numerically", actual.type_name()),
                    )
                })?;
                let rhs = value.as_f64().ok_or_else(|| {
                    TallyError::expression_on_field(field, "comparison literal is not numeric")
                })?;
                Ok(operator.apply(lhs, rhs))
            }

            Expression::DatetimeBefore { field, value } => {
                self.compare_datetime(field, ctx, value, |actual, bound| actual < bound)
            }
            Expression::DatetimeAfter { field, value } => {
                self.compare_datetime(field, ctx, value, |actual, bound| actual > bound)
            }
            Expression::DatetimeBetween { field, start, end } => {
                let start = parse_bound(start)?;
                let end = parse_bound(end)?;
                let Some(actual) = field_value(field, ctx) else {
                    return Ok(false);
                };
                let actual = datetime_of(field, &actual)?;
                Ok(actual >= start && actual <= end)
            }

            Expression::And { conditions } => {
                for condition in conditions {
                    if !self.evaluate(condition, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Expression::Or { conditions } => {
                for condition in conditions {
                    if self.evaluate(condition, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expression::Not { condition } => Ok(!self.evaluate(condition, ctx)?),

            Expression::FieldExists { field } => Ok(field_value(field, ctx).is_some()),
            Expression::FieldEmpty { field } => {
                Ok(field_value(field, ctx).is_none_or(|value| value.is_empty()))
            }

            Expression::InList { field, list, match_field } => {
                let Some(actual) = field_value(field, ctx) else {
                    return Ok(false);
                };
                let name = list.strip_prefix("$data_sources.").unwrap_or(list);
                let Some(elements) = ctx.data_sources.get(name) else {
                    return Ok(false);
                };
                Ok(elements.iter().any(|element| match match_field {
                    Some(key) => match element {
                        Value::Object(map) => map.get(key) == Some(&actual),
                        _ => false,
                    },
                    None => element == &actual,
                }))
            }

            Expression::ArrayAny { array, condition } => {
                let Some(Value::Array(elements)) = field_value(array, ctx) else {
                    return Ok(false);
                };
                for element in &elements {
                    if self.evaluate(condition, &child_context(ctx, element))? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expression::ArrayAll { array, condition } => {
                let Some(Value::Array(elements)) = field_value(array, ctx) else {
                    return Ok(false);
                };
                // Vacuously true on an empty array.
                for element in &elements {
                    if !self.evaluate(condition, &child_context(ctx, element))? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }

            // The parser rejects unresolved references; re-checked here so a
            // hand-built rule set cannot panic the evaluator.
            Expression::RuleRef { rule_name } => {
                let referenced = self.rule_definitions.get(rule_name).ok_or_else(|| {
                    TallyError::expression(format!(
                        "rule_ref targets undefined rule '{rule_name}'"
                    ))
                })?;
                self.evaluate(referenced, ctx)
            }
        }
    }

    fn compare_datetime(
        &self,
        field: &str,
        ctx: &Context,
        literal: &str,
        op: impl Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
    ) -> TallyResult<bool> {
        let bound = parse_bound(literal)?;
        let Some(actual) = field_value(field, ctx) else {
            return Ok(false);
        };
        Ok(op(datetime_of(field, &actual)?, bound))
    }
}

// Each array element is addressable as `user.*` inside the sub-condition;
// elements that are not mappings become an empty mapping.
fn child_context(ctx: &Context, element: &Value) -> Context {
    let user = match element {
        Value::Object(map) => map.clone(),
        _ => HashMap::new(),
    };
    Context { user, ..ctx.clone() }
}

fn parse_bound(literal: &str) -> TallyResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(literal)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            TallyError::expression(format!("invalid RFC3339 datetime '{literal}': {e}"))
        })
}

fn datetime_of(field: &str, value: &Value) -> TallyResult<DateTime<Utc>> {
    value.as_datetime().ok_or_else(|| {
        TallyError::expression_on_field(
            field,
            format!("expected a timestamp, found {}", value.type_name()),
        )
    })
}
