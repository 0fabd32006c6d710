//! Rule set parsing and structural validation
//!
//! [`parse_rule_set`] decodes raw JSON into a typed [`RuleSet`] and then runs
//! the structural checks of [`validate_rule_set`]. No partial rule set is
//! ever produced: any failure surfaces as a parse-boundary [`TallyError`]
//! and the input is rejected as a whole.
//!
//! Unknown expression, action and computed-field tags are rejected by the
//! closed sum types during decoding, so validation only has to enforce the
//! constraints serde cannot express: non-empty condition lists, well-formed
//! datetime literals, resolvable (and acyclic) rule references, and the
//! unit-price/fixed-price exclusivity of `add_item`.

use std::collections::HashMap;

use chrono::DateTime;

use crate::error::{TallyError, TallyResult};
use crate::types::{Action, Expression, RuleSet};

/// Parse and structurally validate a rule set from raw JSON.
pub fn parse_rule_set(json: &str) -> TallyResult<RuleSet> {
    let rule_set: RuleSet = serde_json::from_str(json)?;
    validate_rule_set(&rule_set)?;
    Ok(rule_set)
}

/// Structurally validate an already-decoded rule set.
pub fn validate_rule_set(rule_set: &RuleSet) -> TallyResult<()> {
    if rule_set.event_id.trim().is_empty() {
        return Err(TallyError::rule_set("event_id must not be empty"));
    }

    for (name, expression) in &rule_set.rule_definitions {
        validate_expression(expression, rule_set).map_err(|err| {
            TallyError::rule_set(format!("rule definition '{name}': {err}"))
        })?;
    }
    check_reference_cycles(&rule_set.rule_definitions)?;

    for rule in &rule_set.pricing_rules {
        if rule.id.trim().is_empty() {
            return Err(TallyError::rule_set("pricing rule with empty id"));
        }
        validate_expression(&rule.condition, rule_set)
            .map_err(|err| attribute(err, &rule.id))?;
        validate_action(&rule.action).map_err(|err| attribute(err, &rule.id))?;
    }

    for rule in &rule_set.validation_rules {
        if rule.id.trim().is_empty() {
            return Err(TallyError::rule_set("validation rule with empty id"));
        }
        validate_expression(&rule.condition, rule_set)
            .map_err(|err| attribute(err, &rule.id))?;
    }

    Ok(())
}

fn attribute(err: TallyError, rule_id: &str) -> TallyError {
    TallyError::rule_set_with_id(rule_id, err.to_string())
}

fn validate_expression(expression: &Expression, rule_set: &RuleSet) -> TallyResult<()> {
    match expression {
        Expression::AlwaysTrue => Ok(()),
        Expression::Equals { field, .. }
        | Expression::FieldExists { field }
        | Expression::FieldEmpty { field }
        | Expression::Compare { field, .. } => require_path(field, "field"),
        Expression::DatetimeBefore { field, value }
        | Expression::DatetimeAfter { field, value } => {
            require_path(field, "field")?;
            require_rfc3339(value)
        }
        Expression::DatetimeBetween { field, start, end } => {
            require_path(field, "field")?;
            require_rfc3339(start)?;
            require_rfc3339(end)
        }
        Expression::And { conditions } | Expression::Or { conditions } => {
            if conditions.is_empty() {
                return Err(TallyError::rule_set(
                    "and/or requires at least one condition",
                ));
            }
            for condition in conditions {
                validate_expression(condition, rule_set)?;
            }
            Ok(())
        }
        Expression::Not { condition } => validate_expression(condition, rule_set),
        Expression::InList { field, list, .. } => {
            require_path(field, "field")?;
            let name = list.strip_prefix("$data_sources.").ok_or_else(|| {
                TallyError::rule_set(format!(
                    "in_list references '{list}'; expected \"$data_sources.<name>\""
                ))
            })?;
            if name.is_empty() {
                return Err(TallyError::rule_set("in_list data source name is empty"));
            }
            Ok(())
        }
        Expression::ArrayAny { array, condition } | Expression::ArrayAll { array, condition } => {
            require_path(array, "array")?;
            validate_expression(condition, rule_set)
        }
        Expression::RuleRef { rule_name } => {
            if rule_set.rule_definitions.contains_key(rule_name) {
                Ok(())
            } else {
                Err(TallyError::rule_set(format!(
                    "rule_ref targets undefined rule '{rule_name}'"
                )))
            }
        }
    }
}

fn validate_action(action: &Action) -> TallyResult<()> {
    match action {
        Action::AddItem { item, unit_price, fixed_price, .. } => {
            require_path(item, "item")?;
            match (unit_price.is_some(), fixed_price.is_some()) {
                (false, false) => Err(TallyError::rule_set(
                    "add_item requires one of unit_price or fixed_price",
                )),
                (true, true) => Err(TallyError::rule_set(
                    "add_item accepts unit_price or fixed_price, not both",
                )),
                _ => Ok(()),
            }
        }
        Action::SetPrice { item, .. } | Action::ReplacePrice { item, .. } => {
            require_path(item, "item")
        }
        Action::PercentageDiscount { apply_to, .. }
        | Action::FixedDiscount { apply_to, .. }
        | Action::PriceCap { apply_to, .. } => {
            if apply_to.iter().any(|target| target.trim().is_empty()) {
                Err(TallyError::rule_set("apply_to contains an empty target"))
            } else {
                Ok(())
            }
        }
    }
}

fn require_path(path: &str, what: &str) -> TallyResult<()> {
    if path.trim().is_empty() {
        Err(TallyError::rule_set(format!("{what} must not be empty")))
    } else {
        Ok(())
    }
}

fn require_rfc3339(literal: &str) -> TallyResult<()> {
    DateTime::parse_from_rfc3339(literal).map_err(|err| {
        TallyError::rule_set(format!("invalid RFC3339 datetime '{literal}': {err}"))
    })?;
    Ok(())
}

// Rule definitions may reference each other; the reference graph must be a
// DAG or evaluation would recurse forever.
fn check_reference_cycles(definitions: &HashMap<String, Expression>) -> TallyResult<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    fn visit(
        name: &str,
        definitions: &HashMap<String, Expression>,
        marks: &mut HashMap<String, Mark>,
    ) -> TallyResult<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                return Err(TallyError::rule_set(format!(
                    "rule definition '{name}' is part of a reference cycle"
                )));
            }
            None => {}
        }
        marks.insert(name.to_string(), Mark::InProgress);
        if let Some(expression) = definitions.get(name) {
            let mut refs = Vec::new();
            collect_rule_refs(expression, &mut refs);
            for target in refs {
                visit(target, definitions, marks)?;
            }
        }
        marks.insert(name.to_string(), Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    for name in definitions.keys() {
        visit(name, definitions, &mut marks)?;
    }
    Ok(())
}

fn collect_rule_refs<'a>(expression: &'a Expression, out: &mut Vec<&'a str>) {
    match expression {
        Expression::RuleRef { rule_name } => out.push(rule_name),
        Expression::And { conditions } | Expression::Or { conditions } => {
            for condition in conditions {
                collect_rule_refs(condition, out);
            }
        }
        Expression::Not { condition }
        | Expression::ArrayAny { condition, .. }
        | Expression::ArrayAll { condition, .. } => collect_rule_refs(condition, out),
        _ => {}
    }
}
