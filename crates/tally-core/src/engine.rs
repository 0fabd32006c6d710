//! Engine orchestration
//!
//! [`TallyEngine`] owns one validated rule set and evaluates contexts against
//! it: validation rules first, then the pricing pipeline. The engine is
//! immutable after construction and safe to share across threads; each
//! evaluation owns its context and produces an independent result.

use std::convert::TryFrom;

use tracing::{info, instrument};

use tally_types::Value;

use crate::calculator::Calculator;
use crate::error::{TallyError, TallyResult};
use crate::evaluator::ExpressionEvaluator;
use crate::parser::{parse_rule_set, validate_rule_set};
use crate::types::{Context, ErrorType, EvaluationResult, RuleSet, ValidationMessage};

/// Evaluates registration contexts against one rule set.
pub struct TallyEngine {
    rule_set: RuleSet,
}

impl TallyEngine {
    /// Create an engine from an already-decoded rule set, validating it
    /// structurally first.
    pub fn new(rule_set: RuleSet) -> TallyResult<Self> {
        validate_rule_set(&rule_set)?;
        Ok(Self { rule_set })
    }

    /// Parse, validate and wrap a rule set from raw JSON.
    pub fn from_json(json: &str) -> TallyResult<Self> {
        Ok(Self { rule_set: parse_rule_set(json)? })
    }

    /// The validated rule set this engine evaluates.
    pub fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }

    /// Evaluate one context: run every validation rule, then price the
    /// registration. Pricing is always computed so callers can display the
    /// would-be total next to blocking errors.
    ///
    /// # Errors
    ///
    /// Fatal evaluation errors (non-numeric comparison, unknown variable,
    /// unresolved rule reference, `add_item` without a price) abort the whole
    /// evaluation; no partial result is returned.
    #[instrument(skip(self, ctx), fields(event_id = %self.rule_set.event_id))]
    pub fn evaluate(&self, mut ctx: Context) -> TallyResult<EvaluationResult> {
        self.bind_rule_set_state(&mut ctx)?;

        let evaluator = ExpressionEvaluator::new(&self.rule_set);
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for rule in &self.rule_set.validation_rules {
            if evaluator.evaluate(&rule.condition, &ctx)? {
                let message = ValidationMessage {
                    rule_id: rule.id.clone(),
                    error_type: rule.error_type,
                    message: rule.error_message.clone(),
                };
                match rule.error_type {
                    ErrorType::Blocking => errors.push(message),
                    ErrorType::Warning => warnings.push(message),
                }
            }
        }

        let (price, applied_rules) = Calculator::new(&self.rule_set).calculate(&mut ctx)?;

        info!(
            valid = errors.is_empty(),
            errors = errors.len(),
            warnings = warnings.len(),
            applied = applied_rules.len(),
            final_price = price.final_price,
            "evaluation complete"
        );

        Ok(EvaluationResult {
            valid: errors.is_empty(),
            price,
            errors,
            warnings,
            applied_rules,
        })
    }

    /// Wire-shaped convenience for HTTP-style callers: build the context
    /// from its JSON form, evaluate, and serialize the result.
    pub fn evaluate_json(&self, context: &serde_json::Value) -> TallyResult<serde_json::Value> {
        let ctx = Context::from_json(context)?;
        let result = self.evaluate(ctx)?;
        serde_json::to_value(&result).map_err(TallyError::from)
    }

    // Bind rule set variables when the caller left them empty, and make sure
    // every declared data source has a context slot. The engine never fetches
    // external data; it only provides the mapping.
    fn bind_rule_set_state(&self, ctx: &mut Context) -> TallyResult<()> {
        if ctx.variables.is_empty() {
            for (name, raw) in &self.rule_set.variables {
                let value = Value::try_from(raw).map_err(|e| {
                    TallyError::variable(name, format!("variable '{name}': {e}"))
                })?;
                ctx.variables.insert(name.clone(), value);
            }
        }
        for name in self.rule_set.data_sources.keys() {
            ctx.data_sources.entry(name.clone()).or_default();
        }
        Ok(())
    }
}
