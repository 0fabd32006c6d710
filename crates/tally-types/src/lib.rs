//! Tally Types
//!
//! This crate defines the runtime value type shared across the tally
//! ecosystem (currently `tally-core` and `tally-cli`). Evaluation contexts,
//! data sources and computed fields all traffic in [`Value`], which carries
//! the JSON scalar/aggregate universe plus a first-class UTC timestamp.

#![deny(warnings)]
#![deny(missing_docs)]

mod value;
pub use value::Value;
