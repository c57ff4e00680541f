//! Cutting one rule against another.
//!
//! A rule is split into pieces while a higher-priority rule is carved out of
//! it. Every piece records, per dimension (protocol, network, ports), whether
//! it lies inside the carving rule. Pieces inside on all three dimensions are
//! covered by the carving rule and dropped; the rest survive.

use super::SecurityRuleSet;
use crate::models::{Ipv4, Ipv4Range, PortRange, PortSpec, Ports, Protocol, SecurityRule};

/// Position of a piece relative to the carving rule along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coverage {
    #[default]
    Open,
    Consumed,
}

impl Coverage {
    /// Marks only ever move from `Open` to `Consumed`.
    pub fn join(self, other: Coverage) -> Coverage {
        match (self, other) {
            (Coverage::Open, Coverage::Open) => Coverage::Open,
            _ => Coverage::Consumed,
        }
    }
}

/// A rule piece with its per-dimension coverage marks.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityRuleCut {
    pub rule: SecurityRule,
    pub protocol: Coverage,
    pub net: Coverage,
    pub port: Coverage,
}

impl SecurityRuleCut {
    pub fn new(rule: SecurityRule) -> SecurityRuleCut {
        SecurityRuleCut {
            rule,
            protocol: Coverage::Open,
            net: Coverage::Open,
            port: Coverage::Open,
        }
    }

    /// Covered on every dimension.
    pub fn is_cut(&self) -> bool {
        self.protocol == Coverage::Consumed
            && self.net == Coverage::Consumed
            && self.port == Coverage::Consumed
    }

    fn consume_protocol(mut self) -> Self {
        self.protocol = self.protocol.join(Coverage::Consumed);
        self
    }

    fn consume_net(mut self) -> Self {
        self.net = self.net.join(Coverage::Consumed);
        self
    }

    fn consume_port(mut self) -> Self {
        self.port = self.port.join(Coverage::Consumed);
        self
    }

    fn with_rule(&self, update: impl FnOnce(&mut SecurityRule)) -> Self {
        let mut piece = self.clone();
        update(&mut piece.rule);
        piece
    }
}

fn applies(target: Protocol, piece: &SecurityRule) -> bool {
    target == Protocol::Any || target == piece.protocol
}

/// The pieces of one rule being cut.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityRuleCuts(Vec<SecurityRuleCut>);

impl SecurityRuleCuts {
    pub fn new(rule: SecurityRule) -> SecurityRuleCuts {
        SecurityRuleCuts(vec![SecurityRuleCut::new(rule)])
    }

    pub fn iter(&self) -> impl Iterator<Item = &SecurityRuleCut> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Mark pieces of `protocol` as consumed. An `any` piece is split into one
    /// piece per supported protocol first.
    pub fn cut_out_protocol(self, protocol: Protocol) -> SecurityRuleCuts {
        let mut out = Vec::with_capacity(self.0.len());
        for piece in self.0 {
            if piece.protocol == Coverage::Consumed
                || protocol == Protocol::Any
                || piece.rule.protocol == protocol
            {
                out.push(piece.consume_protocol());
            } else if piece.rule.protocol == Protocol::Any {
                for p in Protocol::SUPPORTED {
                    let split = piece.with_rule(|r| r.protocol = p);
                    out.push(if p == protocol {
                        split.consume_protocol()
                    } else {
                        split
                    });
                }
            } else {
                out.push(piece);
            }
        }
        SecurityRuleCuts(out)
    }

    /// Carve `net` out of the network of every piece matching `protocol`.
    pub fn cut_out_ipnet(self, protocol: Protocol, net: Ipv4) -> SecurityRuleCuts {
        let target = Ipv4Range::from_cidr(net);
        let mut out = Vec::with_capacity(self.0.len());
        for piece in self.0 {
            if piece.net == Coverage::Consumed || !applies(protocol, &piece.rule) {
                out.push(piece);
                continue;
            }
            let (lefts, sub) = Ipv4Range::from_cidr(piece.rule.net).substract(&target);
            for left in lefts {
                for cidr in left.to_cidrs() {
                    out.push(piece.with_rule(|r| r.net = cidr));
                }
            }
            if let Some(sub) = sub {
                for cidr in sub.to_cidrs() {
                    out.push(piece.with_rule(|r| r.net = cidr).consume_net());
                }
            }
        }
        SecurityRuleCuts(out)
    }

    /// Carve a port range out of every piece matching `protocol`.
    pub fn cut_out_port_range(self, protocol: Protocol, pr: PortRange) -> SecurityRuleCuts {
        let mut out = Vec::with_capacity(self.0.len());
        for piece in self.0 {
            if piece.port == Coverage::Consumed || !applies(protocol, &piece.rule) {
                out.push(piece);
                continue;
            }
            match &piece.rule.ports {
                PortSpec::List(ps) => {
                    let (left, subs) = ps.substract_port_range(&pr);
                    if !left.is_empty() {
                        out.push(piece.with_rule(|r| r.ports = PortSpec::List(left)));
                    }
                    if !subs.is_empty() {
                        out.push(piece.with_rule(|r| r.ports = PortSpec::List(subs)).consume_port());
                    }
                }
                spec => {
                    let own = match spec {
                        PortSpec::Range(own) => *own,
                        _ => PortRange::ALL,
                    };
                    let (lefts, sub) = own.substract_port_range(&pr);
                    for left in lefts {
                        out.push(piece.with_rule(|r| r.ports = PortSpec::from_range(left)));
                    }
                    if let Some(sub) = sub {
                        out.push(piece.with_rule(|r| r.ports = PortSpec::from_range(sub)).consume_port());
                    }
                }
            }
        }
        SecurityRuleCuts(out)
    }

    /// Carve discrete ports out of every piece matching `protocol`.
    pub fn cut_out_ports(self, protocol: Protocol, ports: &Ports) -> SecurityRuleCuts {
        let mut out = Vec::with_capacity(self.0.len());
        for piece in self.0 {
            if piece.port == Coverage::Consumed || !applies(protocol, &piece.rule) {
                out.push(piece);
                continue;
            }
            match &piece.rule.ports {
                PortSpec::List(ps) => {
                    let (left, subs) = ps.substract_ports(ports);
                    if !left.is_empty() {
                        out.push(piece.with_rule(|r| r.ports = PortSpec::List(left)));
                    }
                    if !subs.is_empty() {
                        out.push(piece.with_rule(|r| r.ports = PortSpec::List(subs)).consume_port());
                    }
                }
                spec => {
                    let own = match spec {
                        PortSpec::Range(own) => *own,
                        _ => PortRange::ALL,
                    };
                    let (lefts, subs) = own.substract_ports(ports);
                    for left in lefts {
                        out.push(piece.with_rule(|r| r.ports = PortSpec::from_range(left)));
                    }
                    if !subs.is_empty() {
                        out.push(piece.with_rule(|r| r.ports = PortSpec::List(subs)).consume_port());
                    }
                }
            }
        }
        SecurityRuleCuts(out)
    }

    /// The carving rule covers every port.
    pub fn cut_out_ports_all(self) -> SecurityRuleCuts {
        SecurityRuleCuts(self.0.into_iter().map(|p| p.consume_port()).collect())
    }

    /// The surviving pieces as plain rules.
    pub fn security_rule_set(self) -> SecurityRuleSet {
        self.0
            .into_iter()
            .filter(|piece| !piece.is_cut())
            .map(|piece| piece.rule)
            .collect()
    }
}

impl SecurityRule {
    /// What is left of this rule once `other` has been carved out of it.
    pub fn cut_out(&self, other: &SecurityRule) -> SecurityRuleSet {
        let cuts = SecurityRuleCuts::new(self.clone())
            .cut_out_protocol(other.protocol)
            .cut_out_ipnet(other.protocol, other.net);
        let cuts = match &other.ports {
            PortSpec::List(ps) if other.protocol.has_ports() => {
                cuts.cut_out_ports(other.protocol, ps)
            }
            PortSpec::Range(pr) if other.protocol.has_ports() => {
                cuts.cut_out_port_range(other.protocol, *pr)
            }
            _ => cuts.cut_out_ports_all(),
        };
        let left = cuts.security_rule_set();
        log::debug!("cut `{}` out of `{}`: {} piece(s) left", other, self, left.len());
        left
    }
}
