//! The pricing pipeline
//!
//! Pricing rules execute in ascending `priority` (ties by order of
//! appearance) across strictly sequenced phases:
//!
//! - **Phase 0** computes fields that depend only on the context.
//! - **Phase 1** applies construction actions (`set_price`, `replace_price`,
//!   `add_item`) and establishes `sub_total`.
//! - **Phase 1.5** recomputes fields so price aggregations see the breakdown.
//! - **Phase 2** applies adjustments (`percentage_discount`,
//!   `fixed_discount`, `price_cap`) under the rule set's stacking mode.
//! - **Finalize** copies discounted prices into final prices and totals.
//!
//! Each phase visits the sorted rules once, evaluating conditions through the
//! expression evaluator and skipping rules whose action belongs to another
//! phase. Fixed discounts on `total` distribute proportionally by current
//! discounted price, guarded against a zero sum.

use std::collections::HashMap;

use tracing::debug;

use crate::computed::{compute_fields, matches_pattern};
use crate::error::{TallyError, TallyResult};
use crate::evaluator::{ExpressionEvaluator, field_value};
use crate::types::{
    Action, Amount, Context, DiscountItem, DiscountStacking, DiscountType, PriceBreakdown,
    PriceItem, PricingRule, RuleSet, TARGET_SUBTOTAL, TARGET_TOTAL,
};

/// Executes the pricing rules of one rule set against a context.
pub struct Calculator<'a> {
    rule_set: &'a RuleSet,
    evaluator: ExpressionEvaluator<'a>,
}

impl<'a> Calculator<'a> {
    /// Create a calculator for the rule set.
    pub fn new(rule_set: &'a RuleSet) -> Self {
        Self { rule_set, evaluator: ExpressionEvaluator::new(rule_set) }
    }

    /// Run the full pipeline, returning the breakdown and the ids of the
    /// rules that matched, deduplicated in visit order.
    pub fn calculate(&self, ctx: &mut Context) -> TallyResult<(PriceBreakdown, Vec<String>)> {
        let mut breakdown = PriceBreakdown::new();
        let mut applied: Vec<String> = Vec::new();

        let mut order: Vec<&PricingRule> = self.rule_set.pricing_rules.iter().collect();
        order.sort_by_key(|rule| rule.priority);

        // Phase 0: fields that depend only on the context.
        compute_fields(&self.rule_set.computed_fields, ctx, &breakdown)?;

        // Phase 1: construction.
        for rule in &order {
            if !rule.action.is_construction() {
                continue;
            }
            if !self.evaluator.evaluate(&rule.condition, ctx)? {
                continue;
            }
            self.apply_construction(rule, ctx, &mut breakdown)?;
            record_applied(&mut applied, &rule.id);
        }

        breakdown.sub_total = breakdown.items.values().map(|item| item.original_price).sum();

        // Phase 1.5: price aggregations now see the populated breakdown.
        compute_fields(&self.rule_set.computed_fields, ctx, &breakdown)?;

        // Phase 2: adjustments.
        self.run_adjustments(&order, ctx, &mut breakdown, &mut applied)?;

        // Finalize.
        for item in breakdown.items.values_mut() {
            item.final_price = item.discounted_price;
        }
        let discounted_total = breakdown.discounted_total();
        breakdown.total_discount = breakdown.sub_total - discounted_total;
        breakdown.final_price = discounted_total.max(0.0);

        debug!(
            items = breakdown.items.len(),
            discounts = breakdown.discounts.len(),
            final_price = breakdown.final_price,
            "pricing pipeline complete"
        );
        Ok((breakdown, applied))
    }

    fn apply_construction(
        &self,
        rule: &PricingRule,
        ctx: &Context,
        breakdown: &mut PriceBreakdown,
    ) -> TallyResult<()> {
        match &rule.action {
            Action::SetPrice { item, value, label }
            | Action::ReplacePrice { item, value, label } => {
                let price = self.resolve_amount(value, ctx)?;
                insert_item(breakdown, item, label.as_deref(), 1, price, price);
            }
            Action::AddItem { item, unit_price, quantity_field, fixed_price, label } => {
                if let Some(unit) = unit_price {
                    let unit = self.resolve_amount(unit, ctx)?;
                    let quantity = quantity_field
                        .as_deref()
                        .and_then(|path| field_value(path, ctx))
                        .and_then(|value| value.as_i64())
                        .unwrap_or(1);
                    if quantity <= 0 {
                        return Ok(());
                    }
                    insert_item(
                        breakdown,
                        item,
                        label.as_deref(),
                        quantity,
                        unit,
                        unit * quantity as f64,
                    );
                } else if let Some(fixed) = fixed_price {
                    let price = self.resolve_amount(fixed, ctx)?;
                    insert_item(breakdown, item, label.as_deref(), 1, price, price);
                } else {
                    return Err(TallyError::action(
                        &rule.id,
                        "add_item",
                        "requires one of unit_price or fixed_price",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn run_adjustments(
        &self,
        order: &[&PricingRule],
        ctx: &Context,
        breakdown: &mut PriceBreakdown,
        applied: &mut Vec<String>,
    ) -> TallyResult<()> {
        let stacking = self.rule_set.discount_stacking.unwrap_or_default();

        // Prices at entry to the phase; additive percentages deduct against
        // these instead of compounding.
        let phase_base: HashMap<String, f64> = breakdown
            .items
            .iter()
            .map(|(id, item)| (id.clone(), item.discounted_price))
            .collect();

        let best_discount = match stacking {
            DiscountStacking::BestOnly => self.pick_best_discount(order, ctx, breakdown)?,
            _ => None,
        };

        for rule in order {
            if !rule.action.is_adjustment() {
                continue;
            }
            if !self.evaluator.evaluate(&rule.condition, ctx)? {
                continue;
            }
            if stacking == DiscountStacking::BestOnly
                && !matches!(rule.action, Action::PriceCap { .. })
                && best_discount.as_deref() != Some(rule.id.as_str())
            {
                continue;
            }
            record_applied(applied, &rule.id);
            self.apply_adjustment(rule, ctx, breakdown, stacking, &phase_base)?;
        }
        Ok(())
    }

    // best_only: rank every matching discount by the amount it would deduct
    // from the phase-entry breakdown; the largest (first on ties) wins.
    fn pick_best_discount(
        &self,
        order: &[&PricingRule],
        ctx: &Context,
        breakdown: &PriceBreakdown,
    ) -> TallyResult<Option<String>> {
        let mut best: Option<(String, f64)> = None;
        for rule in order {
            let is_discount = matches!(
                rule.action,
                Action::PercentageDiscount { .. } | Action::FixedDiscount { .. }
            );
            if !is_discount {
                continue;
            }
            if !self.evaluator.evaluate(&rule.condition, ctx)? {
                continue;
            }
            let mut trial = breakdown.clone();
            let amount = match &rule.action {
                Action::PercentageDiscount { value, apply_to, .. } => {
                    let percentage = self.resolve_amount(value, ctx)?;
                    apply_percentage(&mut trial, apply_to, percentage, None)
                }
                Action::FixedDiscount { value, apply_to, .. } => {
                    let value = self.resolve_amount(value, ctx)?;
                    apply_fixed(&mut trial, apply_to, value)
                }
                _ => 0.0,
            };
            let better = match &best {
                Some((_, best_amount)) => amount > *best_amount,
                None => amount > 0.0,
            };
            if better {
                best = Some((rule.id.clone(), amount));
            }
        }
        Ok(best.map(|(id, _)| id))
    }

    fn apply_adjustment(
        &self,
        rule: &PricingRule,
        ctx: &Context,
        breakdown: &mut PriceBreakdown,
        stacking: DiscountStacking,
        phase_base: &HashMap<String, f64>,
    ) -> TallyResult<()> {
        match &rule.action {
            Action::PercentageDiscount { value, apply_to, label } => {
                let percentage = self.resolve_amount(value, ctx)?;
                let base = match stacking {
                    DiscountStacking::Additive => Some(phase_base),
                    _ => None,
                };
                let amount = apply_percentage(breakdown, apply_to, percentage, base);
                push_discount(
                    breakdown,
                    rule,
                    label.as_deref(),
                    DiscountType::Percentage,
                    percentage,
                    amount,
                    apply_to,
                );
            }
            Action::FixedDiscount { value, apply_to, label } => {
                let value = self.resolve_amount(value, ctx)?;
                let amount = apply_fixed(breakdown, apply_to, value);
                push_discount(
                    breakdown,
                    rule,
                    label.as_deref(),
                    DiscountType::Fixed,
                    value,
                    amount,
                    apply_to,
                );
            }
            Action::PriceCap { value, apply_to, label } => {
                let cap = self.resolve_amount(value, ctx)?;
                let amount = apply_cap(breakdown, apply_to, cap);
                push_discount(
                    breakdown,
                    rule,
                    label.as_deref(),
                    DiscountType::Fixed,
                    cap,
                    amount,
                    apply_to,
                );
            }
            _ => {}
        }
        Ok(())
    }

    // Literal numbers pass through; strings must be "$variables.<name>" and
    // resolve to a numeric variable. Resolution happens here, at the point of
    // use, never at parse time.
    fn resolve_amount(&self, amount: &Amount, ctx: &Context) -> TallyResult<f64> {
        match amount {
            Amount::Number(n) => Ok(*n),
            Amount::Reference(raw) => {
                let name = raw.strip_prefix("$variables.").ok_or_else(|| {
                    TallyError::variable(
                        raw,
                        format!("expected a number or \"$variables.<name>\", found '{raw}'"),
                    )
                })?;
                let value = ctx
                    .variables
                    .get(name)
                    .ok_or_else(|| TallyError::unknown_variable(name))?;
                value.as_f64().ok_or_else(|| {
                    TallyError::variable(name, format!("variable '{name}' is not numeric"))
                })
            }
        }
    }
}

fn record_applied(applied: &mut Vec<String>, rule_id: &str) {
    if !applied.iter().any(|id| id == rule_id) {
        applied.push(rule_id.to_string());
    }
}

fn insert_item(
    breakdown: &mut PriceBreakdown,
    item: &str,
    label: Option<&str>,
    quantity: i64,
    unit_price: f64,
    original_price: f64,
) {
    breakdown.items.insert(
        item.to_string(),
        PriceItem {
            id: item.to_string(),
            name: label.unwrap_or(item).to_string(),
            quantity,
            unit_price,
            original_price,
            discounted_price: original_price,
            final_price: original_price,
        },
    );
}

fn push_discount(
    breakdown: &mut PriceBreakdown,
    rule: &PricingRule,
    label: Option<&str>,
    discount_type: DiscountType,
    value: f64,
    amount: f64,
    apply_to: &[String],
) {
    if amount <= 0.0 {
        return;
    }
    breakdown.discounts.push(DiscountItem {
        rule_id: rule.id.clone(),
        label: label.unwrap_or(&rule.id).to_string(),
        discount_type,
        value,
        amount,
        applied_to: apply_to.join(", "),
    });
}

fn is_total_target(target: &str) -> bool {
    target == TARGET_TOTAL || target == TARGET_SUBTOTAL
}

// Item ids addressed by one apply-to list, deduplicated in first-match order.
// "total"/"subtotal" address every item, a trailing-`*` target addresses by
// prefix, anything else addresses one exact item.
fn resolve_target_ids(breakdown: &PriceBreakdown, targets: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let push = |id: &String, ids: &mut Vec<String>| {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    };
    for target in targets {
        if is_total_target(target) || target.ends_with('*') {
            for id in breakdown.items.keys() {
                if is_total_target(target) || matches_pattern(id, target) {
                    push(id, &mut ids);
                }
            }
        } else if breakdown.items.contains_key(target) {
            push(target, &mut ids);
        }
    }
    ids
}

// Percentage off each targeted item's current price. With a base map
// (additive stacking) the deduction is computed from the phase-entry price
// instead, clamped so the item never goes negative.
fn apply_percentage(
    breakdown: &mut PriceBreakdown,
    targets: &[String],
    percentage: f64,
    base: Option<&HashMap<String, f64>>,
) -> f64 {
    let mut total = 0.0;
    for id in resolve_target_ids(breakdown, targets) {
        let Some(item) = breakdown.items.get_mut(&id) else {
            continue;
        };
        let basis = base
            .and_then(|prices| prices.get(&id).copied())
            .unwrap_or(item.discounted_price);
        let deduction = (basis * percentage / 100.0).min(item.discounted_price);
        if deduction > 0.0 {
            item.discounted_price -= deduction;
            total += deduction;
        }
    }
    total
}

fn has_group_target(targets: &[String]) -> bool {
    targets
        .iter()
        .any(|target| is_total_target(target) || target.ends_with('*'))
}

// Fixed amount off. The apply-to list resolves to one deduplicated group, so
// an item addressed both literally and through "total" or a pattern is
// deducted once. A list with a group target splits the amount proportionally
// by current discounted price over the merged group, guarded against a zero
// pool; an all-literal list deducts up to each item's remainder.
fn apply_fixed(breakdown: &mut PriceBreakdown, targets: &[String], value: f64) -> f64 {
    let group = resolve_target_ids(breakdown, targets);
    if group.is_empty() {
        return 0.0;
    }
    let mut total = 0.0;
    if has_group_target(targets) {
        let pool: f64 = group
            .iter()
            .filter_map(|id| breakdown.items.get(id))
            .map(|item| item.discounted_price)
            .sum();
        if pool <= 0.0 {
            return 0.0;
        }
        let effective = value.min(pool);
        if effective <= 0.0 {
            return 0.0;
        }
        // Shares come from a snapshot so the split is order-independent.
        let shares: Vec<(String, f64)> = group
            .iter()
            .filter_map(|id| {
                breakdown
                    .items
                    .get(id)
                    .map(|item| (id.clone(), effective * item.discounted_price / pool))
            })
            .collect();
        for (id, deduction) in shares {
            if let Some(item) = breakdown.items.get_mut(&id) {
                item.discounted_price -= deduction;
                total += deduction;
            }
        }
    } else {
        for id in &group {
            if let Some(item) = breakdown.items.get_mut(id) {
                let deduction = value.min(item.discounted_price);
                if deduction > 0.0 {
                    item.discounted_price -= deduction;
                    total += deduction;
                }
            }
        }
    }
    total
}

// Price cap over one deduplicated group. A list with a group target scales
// the merged group down to the cap when its sum exceeds it; an all-literal
// list clamps each item individually.
fn apply_cap(breakdown: &mut PriceBreakdown, targets: &[String], cap: f64) -> f64 {
    let cap = cap.max(0.0);
    let group = resolve_target_ids(breakdown, targets);
    if group.is_empty() {
        return 0.0;
    }
    let mut total = 0.0;
    if has_group_target(targets) {
        let sum: f64 = group
            .iter()
            .filter_map(|id| breakdown.items.get(id))
            .map(|item| item.discounted_price)
            .sum();
        if sum <= cap || sum <= 0.0 {
            return 0.0;
        }
        let scale = cap / sum;
        for id in &group {
            if let Some(item) = breakdown.items.get_mut(id) {
                let deduction = item.discounted_price * (1.0 - scale);
                item.discounted_price -= deduction;
                total += deduction;
            }
        }
    } else {
        for id in &group {
            if let Some(item) = breakdown.items.get_mut(id) {
                if item.discounted_price > cap {
                    total += item.discounted_price - cap;
                    item.discounted_price = cap;
                }
            }
        }
    }
    total
}
