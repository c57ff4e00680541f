//! Reduction of priority-ordered allow/deny security rules.
//!
//! Rules are parsed from the one-line text form (`in:allow 10.0.0.0/8 tcp 22`),
//! reduced to an allow-only list per direction and merged into a security
//! group rule set.

pub mod error;
pub mod input;
pub mod models;
pub mod output;
pub mod processing;

use std::collections::HashSet;

pub use error::RuleError;
use models::Direction;
use processing::{plan_sync, SecurityGroupRuleSet, SecurityRuleSet, SyncPlan};

/// Return an error on the first rule that appears twice with the same priority.
pub fn check_for_duplicate_rules(rules: &SecurityRuleSet) -> Result<(), RuleError> {
    let mut seen = HashSet::new();

    for rule in rules {
        if !seen.insert((rule.priority, rule.to_string())) {
            return Err(RuleError::Duplicate(format!("{} {rule}", rule.priority)));
        }
    }
    Ok(())
}

/// Sort each direction by priority and reduce it to allow rules.
///
/// Returns `(ingress, egress)`.
pub fn reduce_rules(rules: &SecurityRuleSet) -> (SecurityRuleSet, SecurityRuleSet) {
    let (mut ingress, mut egress) = rules.split_direction();
    ingress.sort();
    egress.sort();
    log::info!(
        "Reducing {} ingress and {} egress rule(s)",
        ingress.len(),
        egress.len()
    );
    (ingress.allow_list(), egress.allow_list())
}

/// Build a security group from rules evaluated in priority order.
pub fn build_group(rules: &SecurityRuleSet) -> SecurityGroupRuleSet {
    let mut sorted = rules.clone();
    sorted.sort();
    let mut group = SecurityGroupRuleSet::new();
    group.add_rules(sorted);
    log::debug!(
        "Group holds {} ingress network(s) of {} rule(s)",
        group
            .iter()
            .filter(|s| s.ip_key.starts_with(Direction::In.as_str()))
            .count(),
        group.len()
    );
    group
}

/// Changes that turn `current` into the reduced form of `desired`.
pub fn plan_reduced_sync(current: &SecurityRuleSet, desired: &SecurityRuleSet) -> SyncPlan {
    let (ingress, egress) = reduce_rules(desired);
    let desired: Vec<_> = ingress.into_iter().chain(egress).collect();
    plan_sync(&current.0, &desired)
}
