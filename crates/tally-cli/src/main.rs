#![deny(warnings)]
#![allow(missing_docs)]
//! Rule set validator
//!
//! Parses and structurally validates a rule set file, printing a summary of
//! its contents. Exits 0 on success and 1 on any parse or validation error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser;

use tally_core::parse_rule_set;
use tally_core::types::RuleSet;

#[derive(Parser)]
#[command(name = "tally", version, about = "Validate a tally pricing rule set")]
struct Args {
    /// Path to the rule set JSON file
    path: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(&args.path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let rule_set = parse_rule_set(&raw)
        .with_context(|| format!("invalid rule set in {}", path.display()))?;
    print_summary(&rule_set);
    Ok(())
}

fn print_summary(rule_set: &RuleSet) {
    let stats = rule_set.stats();
    println!("event_id:         {}", rule_set.event_id);
    if let Some(name) = &rule_set.name {
        println!("name:             {name}");
    }
    if let Some(version) = &rule_set.version {
        println!("version:          {version}");
    }
    if let Some(stacking) = rule_set.discount_stacking {
        println!("stacking:         {stacking:?}");
    }
    println!("variables:        {}", stats.variable_count);
    println!("rule definitions: {}", stats.rule_definition_count);
    println!("computed fields:  {}", stats.computed_field_count);
    println!("data sources:     {}", stats.data_source_count);
    println!("pricing rules:    {}", stats.pricing_rule_count);
    for rule in &rule_set.pricing_rules {
        println!(
            "  [{:>4}] {} ({}) when {}",
            rule.priority,
            rule.id,
            rule.action.type_name(),
            rule.condition
        );
    }
    println!("validation rules: {}", stats.validation_rule_count);
    for rule in &rule_set.validation_rules {
        println!("  [{:?}] {} when {}", rule.error_type, rule.id, rule.condition);
    }
}
