//! Universal calculator invariants, checked over randomly generated rule
//! sets: subtotal accounting, discount bounds, non-negative prices and
//! phase-ordered rule application.

use proptest::prelude::*;
use serde_json::json;

use tally_core::TallyEngine;
use tally_core::types::{Context, EvaluationResult};

const EPSILON: f64 = 1e-6;

#[derive(Debug, Clone)]
enum Adjustment {
    Percentage(f64),
    Fixed(f64),
    Cap(f64),
}

fn adjustment_strategy() -> impl Strategy<Value = Adjustment> {
    prop_oneof![
        (0.0f64..100.0).prop_map(Adjustment::Percentage),
        (0.0f64..5000.0).prop_map(Adjustment::Fixed),
        (0.0f64..5000.0).prop_map(Adjustment::Cap),
    ]
}

fn build_rule_set(prices: &[f64], adjustments: &[Adjustment]) -> serde_json::Value {
    let mut rules = Vec::new();
    for (i, price) in prices.iter().enumerate() {
        rules.push(json!({
            "id": format!("item-{i}"),
            "priority": i,
            "condition": {"type": "always_true"},
            "action": {"type": "set_price", "item": format!("line-{i}"), "value": price}
        }));
    }
    for (i, adjustment) in adjustments.iter().enumerate() {
        let action = match adjustment {
            Adjustment::Percentage(value) => json!({
                "type": "percentage_discount", "value": value, "apply_to": ["total"]
            }),
            Adjustment::Fixed(value) => json!({
                "type": "fixed_discount", "value": value, "apply_to": ["total"]
            }),
            Adjustment::Cap(value) => json!({
                "type": "price_cap", "value": value, "apply_to": ["total"]
            }),
        };
        rules.push(json!({
            "id": format!("adjust-{i}"),
            "priority": 1000 + i,
            "condition": {"type": "always_true"},
            "action": action
        }));
    }
    json!({"event_id": "prop-test", "pricing_rules": rules})
}

fn run(prices: &[f64], adjustments: &[Adjustment]) -> EvaluationResult {
    let engine = TallyEngine::from_json(&build_rule_set(prices, adjustments).to_string()).unwrap();
    let ctx = Context::from_json(&json!({"register_date": "2025-09-15T00:00:00Z"})).unwrap();
    engine.evaluate(ctx).unwrap()
}

proptest! {
    #[test]
    fn breakdown_invariants_hold(
        prices in prop::collection::vec(0.01f64..10_000.0, 1..6),
        adjustments in prop::collection::vec(adjustment_strategy(), 0..6),
    ) {
        let result = run(&prices, &adjustments);
        let price = &result.price;

        // sub_total accounts for every original price
        let original_sum: f64 = price.items.values().map(|item| item.original_price).sum();
        prop_assert!((price.sub_total - original_sum).abs() < EPSILON);

        let discounted_sum: f64 = price.items.values().map(|item| item.discounted_price).sum();
        for item in price.items.values() {
            prop_assert!((item.final_price - item.discounted_price).abs() < EPSILON);
            prop_assert!(item.discounted_price <= item.original_price + EPSILON);
            prop_assert!(item.discounted_price >= -EPSILON);
        }

        prop_assert!((price.final_price - discounted_sum.max(0.0)).abs() < EPSILON);
        prop_assert!((price.total_discount - (price.sub_total - discounted_sum)).abs() < EPSILON);

        // every recorded discount deducted something, and together they
        // account exactly for the drop from subtotal
        let recorded: f64 = price.discounts.iter().map(|d| d.amount).sum();
        for discount in &price.discounts {
            prop_assert!(discount.amount > 0.0);
        }
        prop_assert!((recorded - (price.sub_total - discounted_sum)).abs() < 1e-4);

        // applied rules are a subset of the rule set's ids
        for id in &result.applied_rules {
            prop_assert!(id.starts_with("item-") || id.starts_with("adjust-"));
        }
    }
}

#[test]
fn applied_rules_follow_phase_then_priority_order() {
    // the discount has the lowest priority overall, but still applies after
    // both construction rules
    let rule_set = json!({
        "event_id": "ordering",
        "pricing_rules": [
            {
                "id": "late-item",
                "priority": 50,
                "condition": {"type": "always_true"},
                "action": {"type": "add_item", "item": "addon:late", "fixed_price": 100}
            },
            {
                "id": "discount",
                "priority": 1,
                "condition": {"type": "always_true"},
                "action": {"type": "percentage_discount", "value": 10, "apply_to": ["total"]}
            },
            {
                "id": "base",
                "priority": 10,
                "condition": {"type": "always_true"},
                "action": {"type": "set_price", "value": 1000}
            }
        ]
    });

    let engine = TallyEngine::from_json(&rule_set.to_string()).unwrap();
    let ctx = Context::from_json(&json!({"register_date": "2025-09-15T00:00:00Z"})).unwrap();
    let result = engine.evaluate(ctx).unwrap();

    assert_eq!(result.applied_rules, vec!["base", "late-item", "discount"]);
    assert!((result.price.final_price - 990.0).abs() < 0.01);
}

#[test]
fn fixed_discount_on_an_empty_breakdown_is_a_no_op() {
    let rule_set = json!({
        "event_id": "empty",
        "pricing_rules": [{
            "id": "discount",
            "priority": 10,
            "condition": {"type": "always_true"},
            "action": {"type": "fixed_discount", "value": 300, "apply_to": ["total"]}
        }]
    });

    let engine = TallyEngine::from_json(&rule_set.to_string()).unwrap();
    let ctx = Context::from_json(&json!({"register_date": "2025-09-15T00:00:00Z"})).unwrap();
    let result = engine.evaluate(ctx).unwrap();

    assert!(result.price.discounts.is_empty());
    assert_eq!(result.price.final_price, 0.0);
}

#[test]
fn fixed_discount_larger_than_an_item_clamps_at_zero() {
    let rule_set = json!({
        "event_id": "clamp",
        "pricing_rules": [
            {
                "id": "base",
                "priority": 10,
                "condition": {"type": "always_true"},
                "action": {"type": "set_price", "value": 200}
            },
            {
                "id": "voucher",
                "priority": 20,
                "condition": {"type": "always_true"},
                "action": {"type": "fixed_discount", "value": 500, "apply_to": ["registration_fee"]}
            }
        ]
    });

    let engine = TallyEngine::from_json(&rule_set.to_string()).unwrap();
    let ctx = Context::from_json(&json!({"register_date": "2025-09-15T00:00:00Z"})).unwrap();
    let result = engine.evaluate(ctx).unwrap();

    assert_eq!(result.price.items["registration_fee"].discounted_price, 0.0);
    assert_eq!(result.price.final_price, 0.0);
    // only the 200 actually deducted is recorded
    assert!((result.price.discounts[0].amount - 200.0).abs() < 1e-9);
}

#[test]
fn overlapping_fixed_discount_targets_deduct_once() {
    // "registration_fee" is already covered by "total"; the amount must be
    // split once over the merged group, not deducted a second time
    let rule_set = json!({
        "event_id": "overlap",
        "pricing_rules": [
            {
                "id": "base",
                "priority": 10,
                "condition": {"type": "always_true"},
                "action": {"type": "set_price", "value": 1000}
            },
            {
                "id": "insurance",
                "priority": 20,
                "condition": {"type": "always_true"},
                "action": {"type": "add_item", "item": "addon:insurance", "fixed_price": 500}
            },
            {
                "id": "sponsor",
                "priority": 30,
                "condition": {"type": "always_true"},
                "action": {
                    "type": "fixed_discount",
                    "value": 300,
                    "apply_to": ["total", "registration_fee"]
                }
            }
        ]
    });

    let engine = TallyEngine::from_json(&rule_set.to_string()).unwrap();
    let ctx = Context::from_json(&json!({"register_date": "2025-09-15T00:00:00Z"})).unwrap();
    let result = engine.evaluate(ctx).unwrap();

    assert!((result.price.items["registration_fee"].discounted_price - 800.0).abs() < 0.01);
    assert!((result.price.items["addon:insurance"].discounted_price - 400.0).abs() < 0.01);
    assert!((result.price.final_price - 1200.0).abs() < 0.01);
    assert!((result.price.discounts[0].amount - 300.0).abs() < 0.01);
}

#[test]
fn overlapping_price_cap_targets_scale_once() {
    let capped = |apply_to: serde_json::Value| {
        let rule_set = json!({
            "event_id": "cap-overlap",
            "pricing_rules": [
                {
                    "id": "base",
                    "priority": 10,
                    "condition": {"type": "always_true"},
                    "action": {"type": "set_price", "value": 900}
                },
                {
                    "id": "shirt",
                    "priority": 20,
                    "condition": {"type": "always_true"},
                    "action": {"type": "add_item", "item": "addon:shirt", "fixed_price": 300}
                },
                {
                    "id": "cap",
                    "priority": 30,
                    "condition": {"type": "always_true"},
                    "action": {"type": "price_cap", "value": 1000, "apply_to": apply_to}
                }
            ]
        });
        let engine = TallyEngine::from_json(&rule_set.to_string()).unwrap();
        let ctx = Context::from_json(&json!({"register_date": "2025-09-15T00:00:00Z"})).unwrap();
        engine.evaluate(ctx).unwrap()
    };

    let plain = capped(json!(["total"]));
    let overlapping = capped(json!(["total", "registration_fee"]));

    assert!((overlapping.price.final_price - 1000.0).abs() < 0.01);
    assert_eq!(plain.price.items, overlapping.price.items);
    assert!((overlapping.price.discounts[0].amount - 200.0).abs() < 0.01);
}

#[test]
fn percentage_discount_targets_addon_prefix() {
    let rule_set = json!({
        "event_id": "prefix",
        "pricing_rules": [
            {
                "id": "base",
                "priority": 10,
                "condition": {"type": "always_true"},
                "action": {"type": "set_price", "value": 1000}
            },
            {
                "id": "shirt",
                "priority": 20,
                "condition": {"type": "always_true"},
                "action": {"type": "add_item", "item": "addon:shirt", "fixed_price": 200}
            },
            {
                "id": "parking",
                "priority": 30,
                "condition": {"type": "always_true"},
                "action": {"type": "add_item", "item": "addon:parking", "fixed_price": 100}
            },
            {
                "id": "addon-sale",
                "priority": 40,
                "condition": {"type": "always_true"},
                "action": {"type": "percentage_discount", "value": 50, "apply_to": ["addon:*"]}
            }
        ]
    });

    let engine = TallyEngine::from_json(&rule_set.to_string()).unwrap();
    let ctx = Context::from_json(&json!({"register_date": "2025-09-15T00:00:00Z"})).unwrap();
    let result = engine.evaluate(ctx).unwrap();

    assert_eq!(result.price.items["registration_fee"].discounted_price, 1000.0);
    assert_eq!(result.price.items["addon:shirt"].discounted_price, 100.0);
    assert_eq!(result.price.items["addon:parking"].discounted_price, 50.0);
    assert!((result.price.final_price - 1150.0).abs() < 0.01);
}
