//! Computed-field evaluation
//!
//! Derives the `$computed.<name>` scalars from the context and the current
//! price breakdown. Pure over its inputs: the calculator runs it once before
//! construction and once after, so price-dependent fields see the populated
//! breakdown while context-only fields are available from the start.
//!
//! A missing array path yields the identity of the aggregation (0 count,
//! 0.0 sum) rather than an error.

use std::collections::HashMap;
use std::convert::TryFrom;

use tally_types::Value;

use crate::error::{TallyError, TallyResult};
use crate::evaluator::{field_value, nested_value};
use crate::types::{ComputedField, Context, PriceBreakdown};

/// Match an item id against an exact id or a trailing-`*` prefix pattern.
pub fn matches_pattern(id: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => id.starts_with(prefix),
        None => id == pattern,
    }
}

fn matches_any(id: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| matches_pattern(id, pattern))
}

/// Evaluate every computed field and store the results in
/// `ctx.computed_values`.
pub fn compute_fields(
    fields: &HashMap<String, ComputedField>,
    ctx: &mut Context,
    breakdown: &PriceBreakdown,
) -> TallyResult<()> {
    let mut computed = Vec::with_capacity(fields.len());
    for (name, field) in fields {
        computed.push((name.clone(), compute_field(name, field, ctx, breakdown)?));
    }
    for (name, value) in computed {
        ctx.computed_values.insert(name, value);
    }
    Ok(())
}

fn compute_field(
    name: &str,
    field: &ComputedField,
    ctx: &Context,
    breakdown: &PriceBreakdown,
) -> TallyResult<Value> {
    match field {
        ComputedField::SumPrices { items } => {
            let sum = breakdown
                .items
                .values()
                .filter(|item| matches_any(&item.id, items))
                .map(|item| item.discounted_price)
                .sum();
            Ok(Value::Float(sum))
        }

        ComputedField::CountItems { items } => {
            let count = breakdown
                .items
                .values()
                .filter(|item| matches_any(&item.id, items))
                .count();
            Ok(Value::Integer(count as i64))
        }

        ComputedField::ItemPrice { item } => {
            let price = breakdown.items.get(item).map_or(0.0, |item| item.discounted_price);
            Ok(Value::Float(price))
        }

        ComputedField::CountArrayField { array, field, value } => {
            let Some(Value::Array(elements)) = field_value(array, ctx) else {
                return Ok(Value::Integer(0));
            };
            let expected = match value {
                Some(raw) => Some(Value::try_from(raw).map_err(|e| {
                    TallyError::Expression {
                        message: format!("computed field '{name}': {e}"),
                        field: Some(field.clone()),
                        detail: None,
                    }
                })?),
                None => None,
            };
            let count = elements
                .iter()
                .filter(|element| {
                    let resolved = nested_value(element, field);
                    match &expected {
                        Some(expected) => resolved.as_ref() == Some(expected),
                        None => resolved.is_some_and(|v| !matches!(v, Value::Null)),
                    }
                })
                .count();
            Ok(Value::Integer(count as i64))
        }

        ComputedField::SumArrayField { array, field } => {
            let Some(Value::Array(elements)) = field_value(array, ctx) else {
                return Ok(Value::Float(0.0));
            };
            let sum = elements
                .iter()
                .filter_map(|element| nested_value(element, field))
                .filter_map(|v| v.as_f64())
                .sum();
            Ok(Value::Float(sum))
        }
    }
}
