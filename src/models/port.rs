//! Port selections: discrete port lists and inclusive port ranges.
//!
//! Port 0 is never a valid discrete port. A rule that covers every port uses
//! neither type (see [`crate::models::PortSpec::All`]).

use itertools::Itertools;
use std::cmp::{max, min};

pub const MIN_PORT: u16 = 1;
pub const MAX_PORT: u16 = 65535;

/// Sorted, de-duplicated list of discrete ports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ports(Vec<u16>);

impl Ports {
    pub fn new<I: IntoIterator<Item = u16>>(ports: I) -> Ports {
        let mut ports: Vec<u16> = ports.into_iter().filter(|p| *p >= MIN_PORT).collect();
        ports.sort_unstable();
        ports.dedup();
        Ports(ports)
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.0.binary_search(&port).is_ok()
    }

    pub fn is_superset(&self, other: &Ports) -> bool {
        other.iter().all(|p| self.contains(p))
    }

    pub fn intersects(&self, other: &Ports) -> bool {
        other.iter().any(|p| self.contains(p))
    }

    pub fn union(&self, other: &Ports) -> Ports {
        Ports::new(self.iter().chain(other.iter()))
    }

    /// Split into the ports outside `pr` and the ports inside it.
    pub fn substract_port_range(&self, pr: &PortRange) -> (Ports, Ports) {
        let (subs, left): (Vec<u16>, Vec<u16>) = self.iter().partition(|p| pr.contains(*p));
        (Ports(left), Ports(subs))
    }

    /// Split into the ports not in `other` and the ports shared with it.
    pub fn substract_ports(&self, other: &Ports) -> (Ports, Ports) {
        let (subs, left): (Vec<u16>, Vec<u16>) = self.iter().partition(|p| other.contains(*p));
        (Ports(left), Ports(subs))
    }

    /// The list as a range when it has no holes.
    pub fn as_range(&self) -> Option<PortRange> {
        let (first, last) = (*self.0.first()?, *self.0.last()?);
        if (last - first) as usize + 1 == self.0.len() {
            Some(PortRange::new(first, last))
        } else {
            None
        }
    }
}

impl std::fmt::Display for Ports {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().join(","))
    }
}

/// Inclusive port range with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub const ALL: PortRange = PortRange {
        start: MIN_PORT,
        end: MAX_PORT,
    };

    pub fn new(a: u16, b: u16) -> PortRange {
        PortRange {
            start: min(a, b),
            end: max(a, b),
        }
    }

    pub fn is_all(&self) -> bool {
        self.start <= MIN_PORT && self.end == MAX_PORT
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    pub fn contains_range(&self, other: &PortRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// `other` starts right after this range ends.
    pub fn is_followed_by(&self, other: &PortRange) -> bool {
        self.end as u32 + 1 == other.start as u32
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Remove `other` from this range.
    ///
    /// Returns the pieces of `self` left over and the overlap, if any:
    /// disjoint ranges give back `self` untouched, an inner `other` leaves up
    /// to two pieces, a covering `other` leaves nothing.
    pub fn substract_port_range(&self, other: &PortRange) -> (Vec<PortRange>, Option<PortRange>) {
        if !self.overlaps(other) {
            return (vec![*self], None);
        }
        let mut lefts = Vec::new();
        if other.start > self.start {
            lefts.push(PortRange::new(self.start, other.start - 1));
        }
        if other.end < self.end {
            lefts.push(PortRange::new(other.end + 1, self.end));
        }
        let sub = PortRange::new(max(self.start, other.start), min(self.end, other.end));
        (lefts, Some(sub))
    }

    /// Remove discrete ports from this range.
    ///
    /// Returns the gaps between the ports that fall inside the range, and those
    /// ports.
    pub fn substract_ports(&self, ports: &Ports) -> (Vec<PortRange>, Ports) {
        let inside: Vec<u16> = ports.iter().filter(|p| self.contains(*p)).collect();
        let mut lefts = Vec::new();
        let mut next = self.start as u32;
        for port in inside.iter().map(|p| *p as u32) {
            if port > next {
                lefts.push(PortRange::new(next as u16, (port - 1) as u16));
            }
            next = port + 1;
        }
        if next <= self.end as u32 {
            lefts.push(PortRange::new(next as u16, self.end));
        }
        (lefts, Ports(inside))
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}
