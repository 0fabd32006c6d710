//! Parse-boundary behavior: decoding, structural validation, reference
//! resolution and round-trip stability.

use tally_core::{ErrorKind, parse_rule_set};

fn assert_rejects(json: &str, needle: &str) {
    let err = parse_rule_set(json).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse, "{err}");
    let text = err.to_string();
    assert!(
        text.contains(needle),
        "expected '{needle}' in error: {text}"
    );
}

#[test]
fn minimal_rule_set_parses() {
    let rule_set = parse_rule_set(r#"{"event_id": "marathon-2025"}"#).unwrap();
    assert_eq!(rule_set.event_id, "marathon-2025");
    assert!(rule_set.pricing_rules.is_empty());
    assert!(rule_set.discount_stacking.is_none());
}

#[test]
fn malformed_json_is_a_parse_error() {
    let err = parse_rule_set("{not json").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
}

#[test]
fn empty_event_id_is_rejected() {
    assert_rejects(r#"{"event_id": "  "}"#, "event_id");
}

#[test]
fn unknown_expression_tags_are_rejected() {
    let err = parse_rule_set(
        r#"{
            "event_id": "evt",
            "validation_rules": [{
                "id": "v1",
                "condition": {"type": "sometimes_true"},
                "error_type": "warning",
                "error_message": "m"
            }]
        }"#,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
}

#[test]
fn and_requires_at_least_one_condition() {
    assert_rejects(
        r#"{
            "event_id": "evt",
            "rule_definitions": {"never": {"type": "and", "conditions": []}}
        }"#,
        "at least one condition",
    );
}

#[test]
fn invalid_datetime_literals_are_rejected() {
    assert_rejects(
        r#"{
            "event_id": "evt",
            "rule_definitions": {
                "early": {"type": "datetime_before", "field": "register_date", "value": "next tuesday"}
            }
        }"#,
        "RFC3339",
    );
}

#[test]
fn in_list_requires_a_data_source_reference() {
    assert_rejects(
        r#"{
            "event_id": "evt",
            "rule_definitions": {
                "member": {"type": "in_list", "field": "user.school", "list": "partner_schools"}
            }
        }"#,
        "$data_sources",
    );
}

#[test]
fn unresolved_rule_refs_are_rejected() {
    assert_rejects(
        r#"{
            "event_id": "evt",
            "pricing_rules": [{
                "id": "p1",
                "condition": {"type": "rule_ref", "rule_name": "ghost"},
                "action": {"type": "set_price", "value": 100}
            }]
        }"#,
        "ghost",
    );
}

#[test]
fn cyclic_rule_definitions_are_rejected() {
    assert_rejects(
        r#"{
            "event_id": "evt",
            "rule_definitions": {
                "a": {"type": "rule_ref", "rule_name": "b"},
                "b": {"type": "not", "condition": {"type": "rule_ref", "rule_name": "a"}}
            }
        }"#,
        "cycle",
    );
}

#[test]
fn self_referencing_definition_is_a_cycle() {
    assert_rejects(
        r#"{
            "event_id": "evt",
            "rule_definitions": {"a": {"type": "rule_ref", "rule_name": "a"}}
        }"#,
        "cycle",
    );
}

#[test]
fn add_item_requires_exactly_one_price_field() {
    assert_rejects(
        r#"{
            "event_id": "evt",
            "pricing_rules": [{
                "id": "p1",
                "condition": {"type": "always_true"},
                "action": {"type": "add_item", "item": "addon:shirt"}
            }]
        }"#,
        "unit_price or fixed_price",
    );
    assert_rejects(
        r#"{
            "event_id": "evt",
            "pricing_rules": [{
                "id": "p1",
                "condition": {"type": "always_true"},
                "action": {"type": "add_item", "item": "addon:shirt", "unit_price": 10, "fixed_price": 20}
            }]
        }"#,
        "not both",
    );
}

#[test]
fn unknown_top_level_fields_are_ignored() {
    let rule_set = parse_rule_set(
        r#"{
            "event_id": "evt",
            "future_extension": {"anything": [1, 2, 3]}
        }"#,
    )
    .unwrap();
    assert_eq!(rule_set.event_id, "evt");
}

#[test]
fn parse_serialize_parse_is_idempotent() {
    let source = r#"{
        "event_id": "relay-2025",
        "version": "3",
        "name": "City Relay",
        "variables": {"base_fee": 500, "insurance_fee": 91},
        "rule_definitions": {
            "has_insurance": {"type": "equals", "field": "addons.insurance", "value": true}
        },
        "computed_fields": {
            "subtotal": {"type": "sum_prices", "items": ["registration_fee", "addon:*"]}
        },
        "pricing_rules": [
            {
                "id": "base",
                "priority": 10,
                "condition": {"type": "always_true"},
                "action": {
                    "type": "add_item",
                    "item": "registration_fee",
                    "unit_price": "$variables.base_fee",
                    "quantity_field": "team_size",
                    "label": "Team registration"
                }
            },
            {
                "id": "insurance",
                "priority": 20,
                "condition": {"type": "rule_ref", "rule_name": "has_insurance"},
                "action": {
                    "type": "add_item",
                    "item": "addon:insurance",
                    "unit_price": "$variables.insurance_fee",
                    "quantity_field": "team_size"
                }
            },
            {
                "id": "early-bird",
                "priority": 30,
                "condition": {
                    "type": "datetime_before",
                    "field": "register_date",
                    "value": "2025-10-01T00:00:00Z"
                },
                "action": {"type": "percentage_discount", "value": 10, "apply_to": ["registration_fee"]}
            }
        ],
        "validation_rules": [
            {
                "id": "team-too-small",
                "condition": {"type": "compare", "field": "team_size", "operator": "<", "value": 2},
                "error_type": "blocking",
                "error_message": "Relay teams need at least two runners"
            }
        ],
        "discount_stacking": "multiplicative",
        "data_sources": {"partner_schools": {"kind": "static"}}
    }"#;

    let first = parse_rule_set(source).unwrap();
    let serialized = serde_json::to_string(&first).unwrap();
    let second = parse_rule_set(&serialized).unwrap();
    assert_eq!(first, second);
}
