//! Ordered rule lists and their reduction to an allow-only list.

use crate::error::RuleError;
use crate::models::{Action, Direction, PortRange, PortSpec, Ports, Protocol, SecurityRule};
use itertools::Itertools;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::net::Ipv4Addr;

/// An ordered list of rules, evaluated first match wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityRuleSet(pub Vec<SecurityRule>);

impl SecurityRuleSet {
    pub fn new(rules: Vec<SecurityRule>) -> SecurityRuleSet {
        SecurityRuleSet(rules)
    }

    /// Parse one rule per line. Blank lines are skipped.
    pub fn parse_lines(text: &str) -> Result<SecurityRuleSet, RuleError> {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(SecurityRule::parse)
            .collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SecurityRule> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, rule: SecurityRule) {
        self.0.push(rule);
    }

    /// Evaluation order: highest priority first, ties by rule text.
    pub fn sort(&mut self) {
        self.0.sort_by_cached_key(|r| (std::cmp::Reverse(r.priority), r.to_string()));
    }

    /// Split into ingress and egress rules, keeping the order.
    pub fn split_direction(&self) -> (SecurityRuleSet, SecurityRuleSet) {
        let (ingress, egress): (Vec<SecurityRule>, Vec<SecurityRule>) = self
            .0
            .iter()
            .cloned()
            .partition(|r| r.direction == Direction::In);
        (SecurityRuleSet(ingress), SecurityRuleSet(egress))
    }

    /// First-match evaluation of concrete traffic; unmatched traffic is denied.
    pub fn is_allowed(&self, protocol: Protocol, addr: Ipv4Addr, port: Option<u16>) -> bool {
        self.0
            .iter()
            .find(|r| r.matches(protocol, addr, port))
            .map_or(false, |r| r.action == Action::Allow)
    }

    /// Reduce a sorted, single-direction rule list to allow rules only.
    ///
    /// Every deny rule is carved out of the rules that follow it and then
    /// dropped, so a later allow can never reopen traffic an earlier deny
    /// closed.
    pub fn allow_list(&self) -> SecurityRuleSet {
        let mut allowed = Vec::new();
        let mut queue: VecDeque<SecurityRule> = self.0.iter().cloned().collect();
        while let Some(rule) = queue.pop_front() {
            match rule.action {
                Action::Allow => allowed.push(rule),
                Action::Deny => queue = cut_out_first(&rule, queue),
            }
        }
        log::debug!(
            "allow_list: {} rule(s) reduced to {} before collapse",
            self.len(),
            allowed.len()
        );
        SecurityRuleSet(allowed).collapse()
    }

    /// Merge rules sharing protocol and network into as few rules as possible.
    fn collapse(self) -> SecurityRuleSet {
        let mut rules = self.0;
        rules.sort_by(collapse_order);

        let mut out = Vec::with_capacity(rules.len());
        for (_, group) in &rules
            .into_iter()
            .group_by(|r| (r.direction, r.action, r.protocol, r.net))
        {
            out.extend(merge_group(group.collect()));
        }
        SecurityRuleSet(out)
    }
}

/// Carve `deny` out of every rule in `rest` with a different action.
///
/// Rules with the same action are passed through unchanged.
fn cut_out_first(deny: &SecurityRule, rest: VecDeque<SecurityRule>) -> VecDeque<SecurityRule> {
    rest.into_iter()
        .flat_map(|rule| {
            if rule.action == deny.action {
                vec![rule]
            } else {
                rule.cut_out(deny).0
            }
        })
        .collect()
}

fn port_rank(ports: &PortSpec) -> (u8, u16, u16) {
    match ports {
        PortSpec::All => (0, 0, 0),
        PortSpec::Range(pr) => (1, pr.start, pr.end),
        PortSpec::List(ps) => (2, ps.as_slice().first().copied().unwrap_or(0), 0),
    }
}

/// Brings mergeable rules next to each other: protocol, network, ranges
/// before lists, then priority.
fn collapse_order(a: &SecurityRule, b: &SecurityRule) -> Ordering {
    (a.direction, a.action, a.protocol.as_str(), a.net.to_string())
        .cmp(&(b.direction, b.action, b.protocol.as_str(), b.net.to_string()))
        .then_with(|| port_rank(&a.ports).cmp(&port_rank(&b.ports)))
        .then_with(|| b.priority.cmp(&a.priority))
}

/// Merge rules that only differ in ports. `group` is in `collapse_order`.
fn merge_group(group: Vec<SecurityRule>) -> Vec<SecurityRule> {
    let Some(template) = group.first().cloned() else {
        return Vec::new();
    };
    if let Some(all) = group.iter().find(|r| r.ports == PortSpec::All) {
        return vec![all.clone()];
    }

    let mut ranges: Vec<PortRange> = Vec::new();
    let mut lists = Ports::default();
    for rule in &group {
        match &rule.ports {
            PortSpec::Range(pr) => match ranges.last_mut() {
                Some(last) if last.overlaps(pr) || last.is_followed_by(pr) => {
                    last.end = last.end.max(pr.end);
                }
                _ => ranges.push(*pr),
            },
            PortSpec::List(ps) => lists = lists.union(ps),
            PortSpec::All => {}
        }
    }
    let lists = Ports::new(lists.iter().filter(|p| !ranges.iter().any(|r| r.contains(*p))));

    let mut out: Vec<SecurityRule> = ranges
        .into_iter()
        .map(|pr| SecurityRule {
            ports: PortSpec::from_range(pr),
            ..template.clone()
        })
        .collect();
    if !lists.is_empty() {
        out.push(SecurityRule {
            ports: PortSpec::List(lists),
            ..template
        });
    }
    out
}

impl std::fmt::Display for SecurityRuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().join("\n"))
    }
}

impl FromIterator<SecurityRule> for SecurityRuleSet {
    fn from_iter<I: IntoIterator<Item = SecurityRule>>(iter: I) -> Self {
        SecurityRuleSet(iter.into_iter().collect())
    }
}

impl IntoIterator for SecurityRuleSet {
    type Item = SecurityRule;
    type IntoIter = std::vec::IntoIter<SecurityRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a SecurityRuleSet {
    type Item = &'a SecurityRule;
    type IntoIter = std::slice::Iter<'a, SecurityRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rule(s: &str, priority: u8) -> SecurityRule {
        SecurityRule::parse(s).unwrap().with_priority(priority)
    }

    fn strings(set: &SecurityRuleSet) -> Vec<String> {
        set.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_sort_priority_then_text() {
        let mut set = SecurityRuleSet::new(vec![
            rule("in:allow any", 1),
            rule("in:deny tcp 80", 50),
            rule("in:deny tcp 25", 50),
            rule("in:allow tcp 22", 100),
        ]);
        set.sort();
        assert_eq!(
            strings(&set),
            vec![
                "in:allow tcp 22",
                "in:deny tcp 25",
                "in:deny tcp 80",
                "in:allow any"
            ]
        );
    }

    #[test]
    fn test_allow_list_deny_ports() {
        let mut set = SecurityRuleSet::new(vec![
            rule("in:allow any", 1),
            rule("in:deny tcp 25", 10),
            rule("in:deny tcp 80", 10),
        ]);
        set.sort();
        let allow = set.allow_list();
        assert_eq!(
            strings(&allow),
            vec![
                "in:allow icmp",
                "in:allow tcp 1-24",
                "in:allow tcp 26-79",
                "in:allow tcp 81-65535",
                "in:allow udp",
            ]
        );
        assert!(allow.iter().all(|r| r.action == Action::Allow));
    }

    #[test]
    fn test_allow_list_keeps_leading_allow() {
        let mut set = SecurityRuleSet::new(vec![
            rule("in:allow 10.0.0.0/8 tcp 22", 90),
            rule("in:deny tcp 22", 50),
            rule("in:allow tcp", 1),
        ]);
        set.sort();
        let allow = set.allow_list();
        assert_eq!(
            strings(&allow),
            vec![
                "in:allow tcp 1-21",
                "in:allow tcp 23-65535",
                "in:allow 10.0.0.0/8 tcp 22",
            ]
        );
    }

    #[test]
    fn test_allow_list_only_denies() {
        let set = SecurityRuleSet::new(vec![rule("in:deny any", 1)]);
        assert!(set.allow_list().is_empty());
    }

    #[test]
    fn test_collapse_merges_ranges_and_lists() {
        let set = SecurityRuleSet::new(vec![
            rule("in:allow tcp 100-200", 1),
            rule("in:allow tcp 201-300", 1),
            rule("in:allow tcp 250-400", 1),
            rule("in:allow tcp 22,150,500", 1),
            rule("in:allow tcp 80,22", 1),
            rule("in:allow udp 53", 1),
            rule("in:allow udp 53", 1),
        ]);
        assert_eq!(
            strings(&set.collapse()),
            vec!["in:allow tcp 100-400", "in:allow tcp 22,80,500", "in:allow udp 53"]
        );
    }

    #[test]
    fn test_collapse_all_ports_absorbs_group() {
        let set = SecurityRuleSet::new(vec![
            rule("in:allow tcp 1-100", 1),
            rule("in:allow tcp", 1),
            rule("in:allow 10.0.0.0/8 tcp 1-100", 1),
            rule("in:allow 10.0.0.0/8 tcp 101-65535", 1),
        ]);
        assert_eq!(
            strings(&set.collapse()),
            vec!["in:allow tcp", "in:allow 10.0.0.0/8 tcp"]
        );
    }

    #[test]
    fn test_allow_list_soundness() {
        let mut set = SecurityRuleSet::new(vec![
            rule("in:allow 10.0.0.0/24 tcp 22", 100),
            rule("in:deny 10.0.0.0/16 tcp 1-1024", 90),
            rule("in:deny 10.0.0.128/25 any", 80),
            rule("in:allow 10.0.0.0/8 udp 53,123", 70),
            rule("in:deny udp 100-200", 60),
            rule("in:allow 10.0.0.0/12 any", 10),
        ]);
        set.sort();
        let allow = set.allow_list();
        assert!(allow.iter().all(|r| r.action == Action::Allow));

        let addrs = [
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 200),
            Ipv4Addr::new(10, 0, 1, 1),
            Ipv4Addr::new(10, 1, 0, 1),
            Ipv4Addr::new(10, 15, 255, 255),
            Ipv4Addr::new(10, 16, 0, 0),
            Ipv4Addr::new(192, 168, 0, 1),
        ];
        let ports = [1, 22, 53, 99, 100, 123, 150, 200, 201, 1024, 1025, 65535];
        for addr in addrs {
            for port in ports {
                for protocol in [Protocol::Tcp, Protocol::Udp] {
                    assert_eq!(
                        set.is_allowed(protocol, addr, Some(port)),
                        allow.is_allowed(protocol, addr, Some(port)),
                        "{protocol} {addr}:{port}"
                    );
                }
            }
            assert_eq!(
                set.is_allowed(Protocol::Icmp, addr, None),
                allow.is_allowed(Protocol::Icmp, addr, None),
                "icmp {addr}"
            );
        }
    }

    #[test]
    fn test_reduced_rules_round_trip() {
        let mut set = SecurityRuleSet::new(vec![
            rule("in:deny 10.0.0.128/25 any", 90),
            rule("in:deny tcp 80,443", 80),
            rule("in:allow 10.0.0.0/8 tcp 22,80,8080", 50),
            rule("in:allow any", 1),
        ]);
        set.sort();
        let allow = set.allow_list();
        let pieces = rule("in:allow tcp 22,80", 1).cut_out(&rule("in:deny 10.0.0.0/9 tcp 80", 1));
        assert!(pieces
            .iter()
            .any(|r| matches!(&r.ports, PortSpec::List(ps) if ps.len() == 1)));
        assert!(pieces.iter().any(|r| !r.net.is_any()));

        for r in allow.iter().chain(pieces.iter()) {
            let text = r.to_string();
            let back = SecurityRule::parse(&text).unwrap();
            assert_eq!(back.to_string(), text);
            assert_eq!(
                (back.direction, back.action, back.protocol, back.net),
                (r.direction, r.action, r.protocol, r.net)
            );
        }
    }

    #[test]
    fn test_same_action_passes_through() {
        let deny = rule("in:deny tcp 25", 10);
        let rest: VecDeque<SecurityRule> =
            vec![rule("in:deny 10.0.0.0/8 udp", 5), rule("in:allow tcp 25", 1)].into();
        let out: Vec<String> = cut_out_first(&deny, rest)
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(out, vec!["in:deny 10.0.0.0/8 udp"]);
    }

    #[test]
    fn test_split_direction_and_display() {
        let set = SecurityRuleSet::parse_lines("in:allow tcp 22\n\nout:allow any\nin:deny any\n")
            .unwrap();
        let (ingress, egress) = set.split_direction();
        assert_eq!(ingress.len(), 2);
        assert_eq!(egress.to_string(), "out:allow any");
        assert_eq!(ingress.to_string(), "in:allow tcp 22\nin:deny any");
    }
}
