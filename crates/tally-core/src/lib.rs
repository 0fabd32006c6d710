#![deny(warnings)]
#![allow(missing_docs)]
//! # Tally Core - Declarative Registration Pricing Engine
//!
//! Tally evaluates a JSON-encoded rule set against a per-request context and
//! produces a deterministic price breakdown plus blocking errors and
//! non-blocking warnings.
//!
//! ## Quick Start
//!
//! ```rust
//! use tally_core::TallyEngine;
//! use tally_core::types::Context;
//!
//! let rule_set = r#"{
//!     "event_id": "marathon-2025",
//!     "pricing_rules": [{
//!         "id": "base-fee",
//!         "priority": 10,
//!         "condition": {"type": "always_true"},
//!         "action": {"type": "set_price", "value": 1050, "label": "Registration"}
//!     }]
//! }"#;
//!
//! let engine = TallyEngine::from_json(rule_set)?;
//! let ctx = Context::from_json(&serde_json::json!({
//!     "user": {"race_type": "full_marathon"},
//!     "team_size": 1,
//!     "register_date": "2025-09-15T00:00:00Z"
//! }))?;
//!
//! let result = engine.evaluate(ctx)?;
//! assert!(result.valid);
//! assert_eq!(result.price.final_price, 1050.0);
//! # Ok::<(), tally_core::TallyError>(())
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | Rule set model, context, breakdown and result types |
//! | [`parser`] | JSON decoding and structural validation |
//! | [`evaluator`] | Recursive predicate evaluation and field resolution |
//! | [`computed`] | Derived `$computed.<name>` scalars |
//! | [`calculator`] | Phased pricing pipeline |
//! | [`engine`] | Orchestration and result assembly |
//! | [`error`] | Structured error handling |
//!
//! ## Concurrency
//!
//! A [`TallyEngine`] is immutable after construction and safe to share across
//! threads. Each evaluation owns its [`types::Context`]; the engine keeps no
//! state between evaluations.

pub mod calculator;
pub mod computed;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod parser;
pub mod types;

pub use engine::TallyEngine;
pub use error::{ErrorKind, TallyError, TallyResult};
pub use parser::{parse_rule_set, validate_rule_set};
