//! Data structures for the tally rules engine
//!
//! A [`RuleSet`] is the full declarative program: variables, reusable rule
//! definitions, computed fields, pricing rules and validation rules. It is
//! immutable after parsing and safe to share across concurrent evaluations.
//! A [`Context`] carries one request's input state and is owned by a single
//! evaluation; the [`PriceBreakdown`] is built up by the calculator and
//! returned inside the [`EvaluationResult`].

use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_types::Value;

use crate::error::{TallyError, TallyResult};

/// Item id used when a `set_price` action does not name one.
pub const REGISTRATION_FEE: &str = "registration_fee";

/// Apply-to targets that address the whole breakdown.
pub const TARGET_TOTAL: &str = "total";
/// Alias accepted wherever `total` is.
pub const TARGET_SUBTOTAL: &str = "subtotal";

fn default_price_item() -> String {
    REGISTRATION_FEE.to_string()
}

fn default_fee_targets() -> Vec<String> {
    vec![REGISTRATION_FEE.to_string()]
}

fn default_total_targets() -> Vec<String> {
    vec![TARGET_TOTAL.to_string()]
}

/// The full declarative program evaluated against per-request contexts.
///
/// Unknown top-level JSON fields are ignored for forward compatibility; all
/// modeled fields survive a serialize round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Event this rule set prices; must be non-empty
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Named scalars referenced by `"$variables.<name>"` action values
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, serde_json::Value>,
    /// Reusable named predicates addressed by `rule_ref`
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub rule_definitions: HashMap<String, Expression>,
    /// Derived scalars exposed to expressions under `$computed.<name>`
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub computed_fields: HashMap<String, ComputedField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pricing_rules: Vec<PricingRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_stacking: Option<DiscountStacking>,
    /// Descriptors for externally fetched lists; opaque to the engine, which
    /// only materializes an empty context slot per declared source
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data_sources: HashMap<String, serde_json::Value>,
    /// Registration form schema; carried through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_schema: Option<serde_json::Value>,
}

/// Structural summary of a rule set, for health endpoints and CLI output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetStats {
    pub variable_count: usize,
    pub rule_definition_count: usize,
    pub computed_field_count: usize,
    pub pricing_rule_count: usize,
    pub validation_rule_count: usize,
    pub data_source_count: usize,
}

impl RuleSet {
    /// Count the rule set's parts.
    pub fn stats(&self) -> RuleSetStats {
        RuleSetStats {
            variable_count: self.variables.len(),
            rule_definition_count: self.rule_definitions.len(),
            computed_field_count: self.computed_fields.len(),
            pricing_rule_count: self.pricing_rules.len(),
            validation_rule_count: self.validation_rules.len(),
            data_source_count: self.data_sources.len(),
        }
    }
}

/// How multiple matching discount rules combine in the adjustment phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountStacking {
    /// Each percentage discount operates on the post-previous-discount price
    Multiplicative,
    /// Percentage discounts deduct against the price at entry to the
    /// adjustment phase, so their percentages sum instead of compounding
    Additive,
    /// Only the single discount rule that would deduct the most is applied;
    /// price caps still execute at their own priority positions
    BestOnly,
}

impl Default for DiscountStacking {
    fn default() -> Self {
        DiscountStacking::Multiplicative
    }
}

/// A recursive boolean predicate over the evaluation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expression {
    /// Constant true
    AlwaysTrue,
    /// Field equals a literal; a missing field is false
    Equals { field: String, value: serde_json::Value },
    /// Numeric comparison; both operands must coerce to floats
    Compare {
        field: String,
        operator: CompareOp,
        value: serde_json::Value,
    },
    /// Timestamp field strictly before the RFC3339 literal
    DatetimeBefore { field: String, value: String },
    /// Timestamp field strictly after the RFC3339 literal
    DatetimeAfter { field: String, value: String },
    /// Timestamp field within the bounds, inclusive on both ends
    DatetimeBetween {
        field: String,
        start: String,
        end: String,
    },
    /// All conditions hold; the list must be non-empty
    And { conditions: Vec<Expression> },
    /// At least one condition holds; the list must be non-empty
    Or { conditions: Vec<Expression> },
    /// Negation
    Not { condition: Box<Expression> },
    /// Field resolution succeeds
    FieldExists { field: String },
    /// Field is missing, null, or an empty string/array/object
    FieldEmpty { field: String },
    /// Field value appears in a `"$data_sources.<name>"` list, optionally
    /// matched against one key of each list element
    InList {
        field: String,
        list: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_field: Option<String>,
    },
    /// Condition holds for at least one array element; empty or missing
    /// arrays are false
    ArrayAny {
        array: String,
        condition: Box<Expression>,
    },
    /// Condition holds for every array element; empty arrays are vacuously
    /// true, missing arrays are false
    ArrayAll {
        array: String,
        condition: Box<Expression>,
    },
    /// Reference to a named entry in the rule set's `rule_definitions`
    RuleRef { rule_name: String },
}

/// Comparison operators for the `compare` expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl CompareOp {
    /// Apply the operator to two float operands.
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::GreaterThan => lhs > rhs,
            CompareOp::LessThan => lhs < rhs,
            CompareOp::GreaterThanOrEqual => lhs >= rhs,
            CompareOp::LessThanOrEqual => lhs <= rhs,
            CompareOp::Equal => lhs == rhs,
            CompareOp::NotEqual => lhs != rhs,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::GreaterThan => ">",
            CompareOp::LessThan => "<",
            CompareOp::GreaterThanOrEqual => ">=",
            CompareOp::LessThanOrEqual => "<=",
            CompareOp::Equal => "==",
            CompareOp::NotEqual => "!=",
        };
        write!(f, "{symbol}")
    }
}

// Compact one-line rendering for summaries and logs; round-tripping stays
// with serde.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::AlwaysTrue => write!(f, "always_true"),
            Expression::Equals { field, value } => write!(f, "{field} == {value}"),
            Expression::Compare { field, operator, value } => {
                write!(f, "{field} {operator} {value}")
            }
            Expression::DatetimeBefore { field, value } => write!(f, "{field} < {value}"),
            Expression::DatetimeAfter { field, value } => write!(f, "{field} > {value}"),
            Expression::DatetimeBetween { field, start, end } => {
                write!(f, "{field} in [{start}, {end}]")
            }
            Expression::And { conditions } => write_joined(f, conditions, " and "),
            Expression::Or { conditions } => write_joined(f, conditions, " or "),
            Expression::Not { condition } => write!(f, "not ({condition})"),
            Expression::FieldExists { field } => write!(f, "exists({field})"),
            Expression::FieldEmpty { field } => write!(f, "empty({field})"),
            Expression::InList { field, list, match_field } => match match_field {
                Some(key) => write!(f, "{field} in {list}[{key}]"),
                None => write!(f, "{field} in {list}"),
            },
            Expression::ArrayAny { array, condition } => write!(f, "any({array}: {condition})"),
            Expression::ArrayAll { array, condition } => write!(f, "all({array}: {condition})"),
            Expression::RuleRef { rule_name } => write!(f, "@{rule_name}"),
        }
    }
}

fn write_joined(
    f: &mut fmt::Formatter<'_>,
    conditions: &[Expression],
    separator: &str,
) -> fmt::Result {
    write!(f, "(")?;
    for (i, condition) in conditions.iter().enumerate() {
        if i > 0 {
            write!(f, "{separator}")?;
        }
        write!(f, "{condition}")?;
    }
    write!(f, ")")
}

/// A (condition, action) pair applied to the price breakdown when the
/// condition holds. Rules execute in ascending `priority`, ties resolved by
/// order of appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRule {
    pub id: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub condition: Expression,
    pub action: Action,
}

/// A (condition, severity, message) triple emitting a blocking error or a
/// warning when the condition holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub condition: Expression,
    pub error_type: ErrorType,
    pub error_message: String,
}

/// Severity of a matched validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Fails the registration; surfaced in `errors`
    Blocking,
    /// Informational; surfaced in `warnings`
    Warning,
}

/// A numeric action parameter: either a literal number or the literal string
/// `"$variables.<name>"`, resolved against the rule set's variables at the
/// point of use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(f64),
    Reference(String),
}

/// The pricing-side effect of a matched pricing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Create or replace a line item with quantity 1
    SetPrice {
        #[serde(default = "default_price_item")]
        item: String,
        value: Amount,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Add a line item priced per unit (quantity read from `quantity_field`,
    /// default 1) or at a fixed price (quantity forced to 1)
    AddItem {
        item: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit_price: Option<Amount>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quantity_field: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fixed_price: Option<Amount>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Deduct a percentage of each targeted item's current price
    PercentageDiscount {
        value: Amount,
        #[serde(default = "default_fee_targets")]
        apply_to: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Deduct a fixed amount, split proportionally over `total` targets
    FixedDiscount {
        value: Amount,
        #[serde(default = "default_total_targets")]
        apply_to: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Clamp targeted prices so they do not exceed the given value
    PriceCap {
        value: Amount,
        #[serde(default = "default_total_targets")]
        apply_to: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Replace an item's price outright; executes like `set_price`
    ReplacePrice {
        item: String,
        value: Amount,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
}

impl Action {
    /// Short tag name used in error messages and logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::SetPrice { .. } => "set_price",
            Action::AddItem { .. } => "add_item",
            Action::PercentageDiscount { .. } => "percentage_discount",
            Action::FixedDiscount { .. } => "fixed_discount",
            Action::PriceCap { .. } => "price_cap",
            Action::ReplacePrice { .. } => "replace_price",
        }
    }

    /// True for actions executed in the construction phase.
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            Action::SetPrice { .. } | Action::AddItem { .. } | Action::ReplacePrice { .. }
        )
    }

    /// True for actions executed in the adjustment phase.
    pub fn is_adjustment(&self) -> bool {
        matches!(
            self,
            Action::PercentageDiscount { .. }
                | Action::FixedDiscount { .. }
                | Action::PriceCap { .. }
        )
    }
}

/// A derived scalar computed from the context and the current breakdown,
/// exposed to expressions as `$computed.<name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComputedField {
    /// Sum of `discounted_price` over items matching any pattern
    SumPrices { items: Vec<String> },
    /// Count of items matching any pattern
    CountItems { items: Vec<String> },
    /// One item's `discounted_price`, or 0 when absent
    ItemPrice { item: String },
    /// Count of array elements whose dotted field equals `value`, or merely
    /// resolves non-null when `value` is omitted
    CountArrayField {
        array: String,
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<serde_json::Value>,
    },
    /// Sum of a numeric dotted field across array elements; non-numeric
    /// contributions are skipped
    SumArrayField { array: String, field: String },
}

/// Per-request input state. Owned by exactly one evaluation; only
/// `computed_values` is mutated while it runs.
#[derive(Debug, Clone)]
pub struct Context {
    pub register_date: DateTime<Utc>,
    pub user: HashMap<String, Value>,
    pub team: HashMap<String, Value>,
    pub addons: HashMap<String, Value>,
    pub team_size: i64,
    /// Bound from the rule set on entry when the caller leaves it empty
    pub variables: HashMap<String, Value>,
    /// Externally fetched lists, resolved before evaluation
    pub data_sources: HashMap<String, Vec<Value>>,
    /// Populated by the computed-field evaluator
    pub computed_values: HashMap<String, Value>,
}

impl Context {
    /// Create an empty context registering at the given instant.
    pub fn new(register_date: DateTime<Utc>) -> Self {
        Self {
            register_date,
            user: HashMap::new(),
            team: HashMap::new(),
            addons: HashMap::new(),
            team_size: 1,
            variables: HashMap::new(),
            data_sources: HashMap::new(),
            computed_values: HashMap::new(),
        }
    }

    /// Build a context from the wire shape consumed by HTTP callers:
    /// `{user, team, team_size, addons, register_date, data_sources?}`.
    pub fn from_json(raw: &serde_json::Value) -> TallyResult<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| TallyError::serialization("context", "context must be a JSON object"))?;

        let register_date = obj
            .get("register_date")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                TallyError::serialization("context", "register_date must be an RFC3339 string")
            })
            .and_then(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| {
                        TallyError::serialization("context", format!("invalid register_date: {e}"))
                    })
            })?;

        let mut ctx = Context::new(register_date);
        ctx.user = convert_map(obj.get("user"))?;
        ctx.team = convert_map(obj.get("team"))?;
        ctx.addons = convert_map(obj.get("addons"))?;
        if let Some(size) = obj.get("team_size") {
            ctx.team_size = size.as_i64().ok_or_else(|| {
                TallyError::serialization("context", "team_size must be an integer")
            })?;
        }
        if let Some(sources) = obj.get("data_sources") {
            let sources = sources.as_object().ok_or_else(|| {
                TallyError::serialization("context", "data_sources must be an object of arrays")
            })?;
            for (name, list) in sources {
                let list = list.as_array().ok_or_else(|| {
                    TallyError::serialization(
                        "context",
                        format!("data source '{name}' must be an array"),
                    )
                })?;
                let converted = list
                    .iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| TallyError::serialization("context", e.to_string()))?;
                ctx.data_sources.insert(name.clone(), converted);
            }
        }
        Ok(ctx)
    }
}

fn convert_map(raw: Option<&serde_json::Value>) -> TallyResult<HashMap<String, Value>> {
    let Some(raw) = raw else {
        return Ok(HashMap::new());
    };
    let obj = raw
        .as_object()
        .ok_or_else(|| TallyError::serialization("context", "expected a JSON object"))?;
    let mut map = HashMap::with_capacity(obj.len());
    for (k, v) in obj {
        let value = Value::try_from(v)
            .map_err(|e| TallyError::serialization("context", e.to_string()))?;
        map.insert(k.clone(), value);
    }
    Ok(map)
}

/// One line of the price breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceItem {
    pub id: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub original_price: f64,
    pub discounted_price: f64,
    pub final_price: f64,
}

/// Kind of a recorded price adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

/// One applied adjustment, recorded only when it actually deducted something.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountItem {
    pub rule_id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub discount_type: DiscountType,
    /// Nominal value of the rule (percentage points or currency amount)
    pub value: f64,
    /// Amount actually deducted across the targeted items
    pub amount: f64,
    /// The rule's apply-to targets, joined with `", "`
    pub applied_to: String,
}

/// The priced outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub items: HashMap<String, PriceItem>,
    pub discounts: Vec<DiscountItem>,
    pub sub_total: f64,
    pub total_discount: f64,
    pub final_price: f64,
}

impl PriceBreakdown {
    /// Create an empty breakdown.
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
            discounts: Vec::new(),
            sub_total: 0.0,
            total_discount: 0.0,
            final_price: 0.0,
        }
    }

    /// Sum of the current `discounted_price` over all items.
    pub fn discounted_total(&self) -> f64 {
        self.items.values().map(|item| item.discounted_price).sum()
    }
}

impl Default for PriceBreakdown {
    fn default() -> Self {
        Self::new()
    }
}

/// A matched validation rule, surfaced in `errors` or `warnings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub rule_id: String,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub message: String,
}

/// Everything one evaluation produces. Pricing is always computed, even when
/// blocking validation errors make the registration invalid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub valid: bool,
    pub price: PriceBreakdown,
    pub errors: Vec<ValidationMessage>,
    pub warnings: Vec<ValidationMessage>,
    pub applied_rules: Vec<String>,
}
