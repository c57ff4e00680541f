//! A single security-group rule and its one-line text form.
//!
//! ```text
//! <direction>:<action> [<cidr>] <protocol> [<port-spec>]
//! in:allow 192.168.0.0/16 tcp 80,443
//! out:deny udp 1000-2000
//! in:allow any
//! ```

use super::{Ipv4, PortRange, Ports};
use crate::error::RuleError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Priority given to a parsed rule when none is supplied.
pub const DEFAULT_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 100;

lazy_static! {
    static ref RE_CIDR: Regex =
        Regex::new(r"^\d{1,3}(\.\d{1,3}){3}/\d{1,2}$").expect("Invalid Regex?");
    static ref RE_IPV4: Regex = Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$").expect("Invalid Regex?");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl FromStr for Direction {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            _ => Err(RuleError::InvalidDirection(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    Allow,
    Deny,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Deny => "deny",
        }
    }
}

impl FromStr for Action {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Action::Allow),
            "deny" => Ok(Action::Deny),
            _ => Err(RuleError::InvalidAction(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Any,
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    /// Concrete protocols an `any` rule is split into when it gets cut.
    pub const SUPPORTED: [Protocol; 3] = [Protocol::Tcp, Protocol::Udp, Protocol::Icmp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Any => "any",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }

    /// Only tcp and udp rules carry ports.
    pub fn has_ports(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }
}

impl FromStr for Protocol {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Protocol::Any),
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            _ => Err(RuleError::InvalidProtocol(s.to_string())),
        }
    }
}

macro_rules! display_as_str {
    ($($t:ty),*) => {$(
        impl std::fmt::Display for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    )*};
}
display_as_str!(Direction, Action, Protocol);

/// Ports a rule applies to. A rule holds exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum PortSpec {
    #[default]
    All,
    Range(PortRange),
    List(Ports),
}

impl PortSpec {
    /// A range, or [`PortSpec::All`] when the range spans every port.
    pub fn from_range(pr: PortRange) -> PortSpec {
        if pr.is_all() {
            PortSpec::All
        } else {
            PortSpec::Range(pr)
        }
    }

    pub fn contains(&self, port: Option<u16>) -> bool {
        match (self, port) {
            (PortSpec::All, _) => true,
            (PortSpec::Range(pr), Some(port)) => pr.contains(port),
            (PortSpec::List(ps), Some(port)) => ps.contains(port),
            (_, None) => false,
        }
    }
}

impl std::fmt::Display for PortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PortSpec::All => Ok(()),
            PortSpec::Range(pr) => write!(f, "{pr}"),
            PortSpec::List(ps) => write!(f, "{ps}"),
        }
    }
}

/// One firewall rule.
///
/// `net` is the source block for ingress rules and the destination block for
/// egress rules. Priorities run 1-100.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RuleRecord", into = "RuleRecord")]
pub struct SecurityRule {
    pub priority: u8,
    pub action: Action,
    pub direction: Direction,
    pub protocol: Protocol,
    pub net: Ipv4,
    pub ports: PortSpec,
    pub description: String,
}

impl SecurityRule {
    /// Parse the one-line rule form.
    pub fn parse(rule: &str) -> Result<SecurityRule, RuleError> {
        let mut tokens = rule.split_whitespace().peekable();

        let head = tokens.next().unwrap_or_default();
        let (direction, action) = head
            .split_once(':')
            .ok_or_else(|| RuleError::InvalidDirection(head.to_string()))?;
        let direction: Direction = direction.parse()?;
        let action: Action = action.parse()?;

        let net = match tokens.peek().copied() {
            Some(token) if RE_CIDR.is_match(token) => {
                let net = Ipv4::new(token)?.network();
                tokens.next();
                net
            }
            Some(token) if RE_IPV4.is_match(token) => {
                let addr = Ipv4Addr::from_str(token)
                    .map_err(|_| RuleError::InvalidIpAddr(token.to_string()))?;
                tokens.next();
                Ipv4::host(addr)
            }
            Some(token) if token.contains('/') || token.contains(':') => {
                return Err(RuleError::InvalidNet(token.to_string()));
            }
            _ => Ipv4::ANY,
        };

        let protocol_token = tokens
            .next()
            .ok_or_else(|| RuleError::InvalidProtocol(String::new()))?;
        let protocol: Protocol = protocol_token.parse()?;

        // any/icmp stop here; whatever follows is ignored.
        let ports = if protocol.has_ports() {
            let ports = match tokens.next() {
                Some(port_spec) => parse_port_spec(port_spec)?,
                None => PortSpec::All,
            };
            if let Some(extra) = tokens.next() {
                return Err(RuleError::InvalidPort(extra.to_string()));
            }
            ports
        } else {
            PortSpec::All
        };

        Ok(SecurityRule {
            priority: DEFAULT_PRIORITY,
            action,
            direction,
            protocol,
            net,
            ports,
            description: String::new(),
        })
    }

    /// Set the priority, clamped into 1-100.
    ///
    /// Use [`checked_priority`] first when an out-of-range value must be
    /// reported instead.
    pub fn with_priority(mut self, priority: u8) -> SecurityRule {
        if !(DEFAULT_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            log::warn!("priority {priority} out of range, clamped for `{self}`");
        }
        self.priority = priority.clamp(DEFAULT_PRIORITY, MAX_PRIORITY);
        self
    }

    pub fn with_description(mut self, description: &str) -> SecurityRule {
        self.description = description.to_string();
        self
    }

    /// Whether concrete traffic (protocol, peer address, port) hits this rule.
    ///
    /// `port` is `None` for traffic without ports, which only matches rules
    /// that cover every port.
    pub fn matches(&self, protocol: Protocol, addr: Ipv4Addr, port: Option<u16>) -> bool {
        (self.protocol == Protocol::Any || self.protocol == protocol)
            && self.net.contains(addr)
            && self.ports.contains(port)
    }
}

impl FromStr for SecurityRule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecurityRule::parse(s)
    }
}

impl std::fmt::Display for SecurityRule {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.direction, self.action)?;
        if !self.net.is_any() {
            write!(f, " {}", self.net)?;
        }
        write!(f, " {}", self.protocol)?;
        if self.protocol.has_ports() && self.ports != PortSpec::All {
            write!(f, " {}", self.ports)?;
        }
        Ok(())
    }
}

fn parse_port<E>(token: &str, err: E) -> Result<u16, RuleError>
where
    E: Fn(String) -> RuleError,
{
    match token.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(err(token.to_string())),
        Ok(port) => Ok(port),
    }
}

fn parse_port_spec(spec: &str) -> Result<PortSpec, RuleError> {
    if spec.contains(',') {
        let ports = spec
            .split(',')
            .map(|p| parse_port(p, RuleError::InvalidPort))
            .collect::<Result<Vec<u16>, RuleError>>()?;
        return Ok(PortSpec::List(Ports::new(ports)));
    }
    if let Some((start, end)) = spec.split_once('-') {
        let start = parse_port(start, |_| RuleError::InvalidPortRange(spec.to_string()))?;
        let end = parse_port(end, |_| RuleError::InvalidPortRange(spec.to_string()))?;
        return Ok(PortSpec::Range(PortRange::new(start, end)));
    }
    let port = parse_port(spec, RuleError::InvalidPort)?;
    Ok(PortSpec::Range(PortRange::new(port, port)))
}

/// Validate a priority read from outside the crate.
pub fn checked_priority(value: i64) -> Result<u8, RuleError> {
    u8::try_from(value)
        .ok()
        .filter(|p| (DEFAULT_PRIORITY..=MAX_PRIORITY).contains(p))
        .ok_or(RuleError::InvalidPriority(value))
}

/// Serialised form of a rule: the one-line text plus the fields the text
/// does not carry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RuleRecord {
    #[serde(default = "default_priority")]
    pub priority: i64,
    pub rule: String,
    #[serde(default)]
    pub description: String,
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY as i64
}

impl TryFrom<RuleRecord> for SecurityRule {
    type Error = RuleError;

    fn try_from(record: RuleRecord) -> Result<Self, Self::Error> {
        let priority = checked_priority(record.priority)?;
        Ok(SecurityRule::parse(&record.rule)?
            .with_priority(priority)
            .with_description(&record.description))
    }
}

impl From<SecurityRule> for RuleRecord {
    fn from(rule: SecurityRule) -> Self {
        RuleRecord {
            priority: rule.priority as i64,
            rule: rule.to_string(),
            description: rule.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rule(s: &str) -> SecurityRule {
        SecurityRule::parse(s).unwrap()
    }

    #[test]
    fn test_parse_host_tcp_port() {
        let r = rule("in:allow 192.168.0.1/32 tcp 80");
        assert_eq!(r.direction, Direction::In);
        assert_eq!(r.action, Action::Allow);
        assert_eq!(r.net, Ipv4::new("192.168.0.1/32").unwrap());
        assert_eq!(r.protocol, Protocol::Tcp);
        assert_eq!(r.ports, PortSpec::Range(PortRange::new(80, 80)));
        assert_eq!(r.priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn test_parse_defaults() {
        let r = rule("out:deny any");
        assert_eq!(r.direction, Direction::Out);
        assert_eq!(r.net, Ipv4::ANY);
        assert_eq!(r.ports, PortSpec::All);

        let r = rule("in:allow 10.0.0.1 ICMP");
        assert_eq!(r.net.to_string(), "10.0.0.1/32");
        assert_eq!(r.protocol, Protocol::Icmp);
    }

    #[test]
    fn test_parse_port_forms() {
        assert_eq!(
            rule("in:allow udp 2000-1000").ports,
            PortSpec::Range(PortRange::new(1000, 2000))
        );
        assert_eq!(
            rule("in:allow tcp 8080,80,443").ports,
            PortSpec::List(Ports::new([80, 443, 8080]))
        );
        // any and icmp stop before a port segment
        assert_eq!(rule("in:allow icmp 80").ports, PortSpec::All);
    }

    #[test]
    fn test_parse_normalises_network() {
        let r = rule("in:allow 192.168.3.7/16 tcp");
        assert_eq!(r.to_string(), "in:allow 192.168.0.0/16 tcp");
    }

    #[test]
    fn test_parse_errors() {
        let cases = [
            ("", RuleError::InvalidDirection(String::new())),
            ("allow tcp", RuleError::InvalidDirection("allow".to_string())),
            ("up:allow tcp", RuleError::InvalidDirection("up".to_string())),
            ("in:permit tcp", RuleError::InvalidAction("permit".to_string())),
            (
                "in:allow 10.0.0.0/40 tcp",
                RuleError::InvalidNet("10.0.0.0/40".to_string()),
            ),
            (
                "in:allow 10.0.0.300 tcp",
                RuleError::InvalidIpAddr("10.0.0.300".to_string()),
            ),
            ("in:allow gre", RuleError::InvalidProtocol("gre".to_string())),
            ("in:allow", RuleError::InvalidProtocol(String::new())),
            ("in:allow tcp 0", RuleError::InvalidPort("0".to_string())),
            ("in:allow tcp 70000", RuleError::InvalidPort("70000".to_string())),
            ("in:allow tcp 80,x", RuleError::InvalidPort("x".to_string())),
            (
                "in:allow tcp 0-100",
                RuleError::InvalidPortRange("0-100".to_string()),
            ),
            (
                "in:allow udp 10-",
                RuleError::InvalidPortRange("10-".to_string()),
            ),
            ("in:allow tcp 80 443", RuleError::InvalidPort("443".to_string())),
            (
                "in:allow udp 53 garbage",
                RuleError::InvalidPort("garbage".to_string()),
            ),
            ("in:allow ::/0 tcp", RuleError::InvalidNet("::/0".to_string())),
            (
                "in:allow 10.0.0/8 tcp",
                RuleError::InvalidNet("10.0.0/8".to_string()),
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(SecurityRule::parse(input), Err(expected), "input {input:?}");
        }
    }

    #[test]
    fn test_priority_bounds() {
        assert_eq!(rule("in:allow any").with_priority(0).priority, 1);
        assert_eq!(rule("in:allow any").with_priority(255).priority, 100);
        assert_eq!(rule("in:allow any").with_priority(42).priority, 42);

        assert_eq!(checked_priority(100), Ok(100));
        assert_eq!(checked_priority(0), Err(RuleError::InvalidPriority(0)));
        assert_eq!(checked_priority(-5), Err(RuleError::InvalidPriority(-5)));
        assert_eq!(checked_priority(300), Err(RuleError::InvalidPriority(300)));
    }

    #[test]
    fn test_round_trip() {
        let inputs = [
            "in:allow any",
            "out:deny any",
            "in:allow 10.0.0.0/8 icmp",
            "in:allow 192.168.0.1/32 tcp 80",
            "out:allow 172.16.0.0/12 udp 53",
            "in:deny tcp 1000-2000",
            "in:allow tcp 22,80,443",
            "out:deny 1.2.3.4/32 udp",
            "in:allow tcp 1-65535",
        ];
        for input in inputs {
            let r = rule(input);
            assert_eq!(r.to_string(), input);
            assert_eq!(rule(&r.to_string()).to_string(), r.to_string());
        }
    }

    #[test]
    fn test_matches() {
        let r = rule("in:allow 10.0.0.0/8 tcp 80,443");
        let inside = Ipv4Addr::new(10, 1, 2, 3);
        assert!(r.matches(Protocol::Tcp, inside, Some(443)));
        assert!(!r.matches(Protocol::Tcp, inside, Some(22)));
        assert!(!r.matches(Protocol::Udp, inside, Some(443)));
        assert!(!r.matches(Protocol::Tcp, Ipv4Addr::new(11, 0, 0, 1), Some(80)));

        let any = rule("in:allow any");
        assert!(any.matches(Protocol::Icmp, inside, None));
        assert!(any.matches(Protocol::Udp, inside, Some(53)));
    }

    #[test]
    fn test_serde_record() {
        let r: SecurityRule = serde_json::from_str(
            r#"{"priority": 50, "rule": "in:allow tcp 22", "description": "ssh"}"#,
        )
        .unwrap();
        assert_eq!(r.priority, 50);
        assert_eq!(r.description, "ssh");
        assert_eq!(r.to_string(), "in:allow tcp 22");

        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["rule"], "in:allow tcp 22");
        assert_eq!(json["priority"], 50);

        let err = serde_json::from_str::<SecurityRule>(r#"{"priority": 101, "rule": "in:allow any"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid priority 101"));
    }
}
