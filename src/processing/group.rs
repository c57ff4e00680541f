//! Incremental rule merging for a security group.
//!
//! Rules are bucketed by direction and network, then by action. Inside a
//! bucket every new rule is compared with the rules already there and either
//! dropped, swapped in for a narrower rule, merged with a neighbour, or
//! appended.

use super::SecurityRuleSet;
use crate::error::RuleError;
use crate::models::{Action, PortRange, PortSpec, Ports, Protocol, SecurityRule};
use std::collections::BTreeMap;

/// How an existing rule relates to a candidate rule of the same bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoRelation {
    Independent,
    Identical,
    /// The existing rule covers the candidate.
    Superset,
    /// The candidate covers the existing rule.
    Subset,
    /// The existing ports end right before the candidate's start.
    NextAhead,
    /// The existing ports start right after the candidate's end.
    NextAfter,
    Overlap,
}

pub fn proto_relation(existing: &SecurityRule, candidate: &SecurityRule) -> ProtoRelation {
    match (existing.protocol, candidate.protocol) {
        (a, b) if a == b => port_relation(&existing.ports, &candidate.ports),
        (Protocol::Any, _) => ProtoRelation::Superset,
        (_, Protocol::Any) => ProtoRelation::Subset,
        _ => ProtoRelation::Independent,
    }
}

/// Relation of an existing range to a candidate list.
fn range_list_relation(range: &PortRange, list: &Ports) -> ProtoRelation {
    let list_in_range = list.iter().all(|p| range.contains(p));
    let range_in_list =
        range.len() <= list.len() && (range.start..=range.end).all(|p| list.contains(p));
    let below = range.start.checked_sub(1).filter(|p| *p > 0);
    let above = range.end.checked_add(1);
    match (list_in_range, range_in_list) {
        (true, true) => ProtoRelation::Identical,
        (true, false) => ProtoRelation::Superset,
        (false, true) => ProtoRelation::Subset,
        _ if list.iter().any(|p| range.contains(p))
            || below.is_some_and(|p| list.contains(p))
            || above.is_some_and(|p| list.contains(p)) =>
        {
            ProtoRelation::Overlap
        }
        _ => ProtoRelation::Independent,
    }
}

fn port_relation(existing: &PortSpec, candidate: &PortSpec) -> ProtoRelation {
    use ProtoRelation::*;
    match (existing, candidate) {
        (PortSpec::All, PortSpec::All) => Identical,
        (PortSpec::All, _) => Superset,
        (_, PortSpec::All) => Subset,
        (PortSpec::Range(a), PortSpec::Range(b)) => {
            if a == b {
                Identical
            } else if a.contains_range(b) {
                Superset
            } else if b.contains_range(a) {
                Subset
            } else if a.is_followed_by(b) {
                NextAhead
            } else if b.is_followed_by(a) {
                NextAfter
            } else if a.overlaps(b) {
                Overlap
            } else {
                Independent
            }
        }
        (PortSpec::List(a), PortSpec::List(b)) => {
            if a == b {
                Identical
            } else if a.is_superset(b) {
                Superset
            } else if b.is_superset(a) {
                Subset
            } else if a.intersects(b) {
                Overlap
            } else {
                Independent
            }
        }
        (PortSpec::Range(range), PortSpec::List(list)) => range_list_relation(range, list),
        (PortSpec::List(list), PortSpec::Range(range)) => {
            match range_list_relation(range, list) {
                Superset => Subset,
                Subset => Superset,
                other => other,
            }
        }
    }
}

/// Join two rules of one protocol into a single wider rule.
///
/// Fails when the union of their ports cannot be written as one port spec,
/// e.g. a range and a list with holes.
pub fn merge(existing: &SecurityRule, candidate: &SecurityRule) -> Result<SecurityRule, RuleError> {
    let fail = || RuleError::Merge(existing.to_string(), candidate.to_string());
    if existing.protocol != candidate.protocol {
        return Err(fail());
    }
    let ports = match (&existing.ports, &candidate.ports) {
        (PortSpec::Range(a), PortSpec::Range(b))
            if a.overlaps(b) || a.is_followed_by(b) || b.is_followed_by(a) =>
        {
            PortSpec::from_range(PortRange::new(a.start.min(b.start), a.end.max(b.end)))
        }
        (PortSpec::List(a), PortSpec::List(b)) => PortSpec::List(a.union(b)),
        (PortSpec::Range(range), PortSpec::List(list))
        | (PortSpec::List(list), PortSpec::Range(range)) => {
            let (outside, _) = list.substract_port_range(range);
            let points = outside.as_slice();
            let start = range.start.min(points.first().copied().unwrap_or(range.start));
            let end = range.end.max(points.last().copied().unwrap_or(range.end));
            let merged = PortRange::new(start, end);
            if merged.len() != range.len() + outside.len() {
                return Err(fail());
            }
            PortSpec::from_range(merged)
        }
        _ => return Err(fail()),
    };
    Ok(SecurityRule {
        ports,
        ..existing.clone()
    })
}

/// Non-overlapping rules of one action in one bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityGroupSubSubRuleSet {
    rules: Vec<SecurityRule>,
}

impl SecurityGroupSubSubRuleSet {
    pub fn rules(&self) -> &[SecurityRule] {
        &self.rules
    }

    /// Insert a rule, merging until nothing else can be merged.
    ///
    /// Each merge removes one existing rule, so the scan restarts at most
    /// `rules.len()` times.
    pub fn add_rule(&mut self, rule: SecurityRule) {
        let mut candidate = rule;
        let mut idx = 0;
        while idx < self.rules.len() {
            match proto_relation(&self.rules[idx], &candidate) {
                ProtoRelation::Identical | ProtoRelation::Superset => return,
                ProtoRelation::Subset => {
                    self.rules.remove(idx);
                }
                ProtoRelation::NextAhead | ProtoRelation::NextAfter | ProtoRelation::Overlap => {
                    match merge(&self.rules[idx], &candidate) {
                        Ok(merged) => {
                            log::debug!(
                                "merged `{}` and `{}` into `{}`",
                                self.rules[idx],
                                candidate,
                                merged
                            );
                            self.rules.remove(idx);
                            candidate = merged;
                            idx = 0;
                        }
                        Err(e) => {
                            log::warn!("skip merge: {e}");
                            idx += 1;
                        }
                    }
                }
                ProtoRelation::Independent => idx += 1,
            }
        }
        self.rules.push(candidate);
    }

    fn sorted_strings(&self) -> Vec<String> {
        let mut rules = self.rules.clone();
        rules.sort_by_cached_key(|r| (r.priority, r.to_string()));
        rules.iter().map(|r| r.to_string()).collect()
    }
}

/// Allow and deny rules sharing one direction and network.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityGroupSubRuleSet {
    pub ip_key: String,
    pub allow_rules: SecurityGroupSubSubRuleSet,
    pub deny_rules: SecurityGroupSubSubRuleSet,
}

impl SecurityGroupSubRuleSet {
    pub fn new(ip_key: &str) -> SecurityGroupSubRuleSet {
        SecurityGroupSubRuleSet {
            ip_key: ip_key.to_string(),
            ..Default::default()
        }
    }

    pub fn add_rule(&mut self, rule: SecurityRule) {
        match rule.action {
            Action::Allow => self.allow_rules.add_rule(rule),
            Action::Deny => self.deny_rules.add_rule(rule),
        }
    }

    fn is_equal(&self, other: &SecurityGroupSubRuleSet) -> bool {
        self.allow_rules.sorted_strings() == other.allow_rules.sorted_strings()
            && self.deny_rules.sorted_strings() == other.deny_rules.sorted_strings()
    }
}

/// Rules of a security group, merged as they are added.
#[derive(Debug, Clone, Default)]
pub struct SecurityGroupRuleSet {
    rules: BTreeMap<String, SecurityGroupSubRuleSet>,
}

impl SecurityGroupRuleSet {
    pub fn new() -> SecurityGroupRuleSet {
        SecurityGroupRuleSet::default()
    }

    fn ip_key(rule: &SecurityRule) -> String {
        format!("{}:{}", rule.direction, rule.net)
    }

    pub fn add_rule(&mut self, rule: SecurityRule) {
        let key = SecurityGroupRuleSet::ip_key(&rule);
        self.rules
            .entry(key.clone())
            .or_insert_with(|| SecurityGroupSubRuleSet::new(&key))
            .add_rule(rule);
    }

    pub fn add_rules<I: IntoIterator<Item = SecurityRule>>(&mut self, rules: I) {
        for rule in rules {
            self.add_rule(rule);
        }
    }

    pub fn get(&self, ip_key: &str) -> Option<&SecurityGroupSubRuleSet> {
        self.rules.get(ip_key)
    }

    /// Per-network rule sets in key order.
    pub fn iter(&self) -> impl Iterator<Item = &SecurityGroupSubRuleSet> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules
            .values()
            .map(|s| s.allow_rules.rules.len() + s.deny_rules.rules.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Same networks, and per network the same allow and deny rules.
    pub fn is_equal(&self, other: &SecurityGroupRuleSet) -> bool {
        self.rules.len() == other.rules.len()
            && self.rules.iter().all(|(key, sub)| {
                other
                    .rules
                    .get(key)
                    .is_some_and(|other_sub| sub.is_equal(other_sub))
            })
    }

    /// All rules in key order, allow rules of a key before its deny rules.
    pub fn rules(&self) -> SecurityRuleSet {
        self.rules
            .values()
            .flat_map(|s| s.allow_rules.rules.iter().chain(s.deny_rules.rules.iter()))
            .cloned()
            .collect()
    }
}
