//! Terminal output of rule sets.

use crate::models::{Action, SecurityRule};
use crate::processing::{SecurityGroupRuleSet, SecurityRuleSet, SyncPlan};
use colored::Colorize;

/// Format a value as a quoted, right-aligned field.
pub fn format_field<T: ToString>(value: T, width: usize) -> String {
    let quoted = format!("\"{}\"", value.to_string());
    if quoted.len() >= width {
        quoted
    } else {
        format!("{quoted:>width$}")
    }
}

/// One uncoloured listing row: priority, rule text and description.
pub fn format_rule_row(rule: &SecurityRule) -> String {
    format!(
        "{priority},{rule},{description}",
        priority = format_field(rule.priority, 5),
        rule = format_field(rule, 40),
        description = format_field(&rule.description, 20),
    )
}

fn print_rule(rule: &SecurityRule) {
    let row = format_rule_row(rule);
    match rule.action {
        Action::Allow => println!("{}", row.green()),
        Action::Deny => println!("{}", row.red()),
    }
}

/// Print a flat rule list under a title.
pub fn print_rule_set(title: &str, rules: &SecurityRuleSet) {
    println!("#{}# {} rule(s)", title.blue(), rules.len());
    for rule in rules {
        print_rule(rule);
    }
}

/// Print an incrementally merged set, one block per direction and network.
pub fn print_rule_group(title: &str, group: &SecurityGroupRuleSet) {
    println!("#{}# {} rule(s)", title.blue(), group.len());
    for sub in group.iter() {
        println!("## {}", sub.ip_key.yellow());
        for rule in sub.allow_rules.rules().iter().chain(sub.deny_rules.rules()) {
            print_rule(rule);
        }
    }
}

/// Print the rules to add, delete and modify.
pub fn print_sync_plan(title: &str, plan: &SyncPlan) {
    if plan.is_empty() {
        println!("#{}# in sync", title.blue());
        return;
    }
    println!("#{}#", title.blue());
    for rule in &plan.add {
        println!("{} {}", "+".green(), format_rule_row(rule));
    }
    for rule in &plan.delete {
        println!("{} {}", "-".red(), format_rule_row(rule));
    }
    for rule in &plan.modify {
        println!("{} {}", "~".yellow(), format_rule_row(rule));
    }
}
