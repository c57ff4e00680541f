//! Planning the changes that bring a security group to a desired rule set.

use crate::models::SecurityRule;
use itertools::{EitherOrBoth, Itertools};

/// Rule changes to apply to a security group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// Desired rules the group does not have yet.
    pub add: Vec<SecurityRule>,
    /// Current rules that are no longer wanted.
    pub delete: Vec<SecurityRule>,
    /// Rules present on both sides whose description changed. They carry the
    /// priority of the current rule.
    pub modify: Vec<SecurityRule>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.delete.is_empty() && self.modify.is_empty()
    }
}

fn sorted_by_text(rules: &[SecurityRule]) -> Vec<(String, &SecurityRule)> {
    rules
        .iter()
        .map(|r| (r.to_string(), r))
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .collect()
}

/// Diff the rules a group has (`current`) against the rules it should have.
///
/// Rules are matched by their text form, so priority alone never causes a
/// change. The binary reaches this through `plan_reduced_sync` when it is
/// given the group's current rule file.
pub fn plan_sync(current: &[SecurityRule], desired: &[SecurityRule]) -> SyncPlan {
    let current = sorted_by_text(current);
    let desired = sorted_by_text(desired);

    let mut plan = SyncPlan::default();
    for pair in current
        .iter()
        .merge_join_by(desired.iter(), |(a, _), (b, _)| a.cmp(b))
    {
        match pair {
            EitherOrBoth::Both((_, have), (_, want)) => {
                if have.description != want.description {
                    plan.modify.push(SecurityRule {
                        priority: have.priority,
                        ..(*want).clone()
                    });
                }
            }
            EitherOrBoth::Left((_, have)) => plan.delete.push((*have).clone()),
            EitherOrBoth::Right((_, want)) => plan.add.push((*want).clone()),
        }
    }
    log::info!(
        "sync plan: {} to add, {} to delete, {} to modify",
        plan.add.len(),
        plan.delete.len(),
        plan.modify.len()
    );
    plan
}
