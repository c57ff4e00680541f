//! IPv4 CIDR blocks and address-range arithmetic.
//!
//! [`Ipv4`] is a CIDR block as it appears in a rule, [`Ipv4Range`] the inclusive
//! address interval used when one block is subtracted from another.

use crate::error::RuleError;
use serde::de;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::{max, min};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Maximum length for an IPv4 subnet mask (32 bits).
pub const MAX_LENGTH: u8 = 32;

/// Network mask for a prefix length, `len` above 32 treated as 32.
fn mask_bits(len: u8) -> u32 {
    let right_len = MAX_LENGTH - len.min(MAX_LENGTH);
    let all_bits = u32::MAX as u64;
    ((all_bits >> right_len) << right_len) as u32
}

/// IPv4 address with CIDR notation support.
#[derive(Eq, Ord, Debug, Copy, Clone, Hash)]
pub struct Ipv4 {
    /// The IPv4 address.
    pub addr: Ipv4Addr,
    /// The subnet mask length (0-32).
    pub mask: u8,
}

impl Serialize for Ipv4 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Ipv4 {
    fn deserialize<D>(deserializer: D) -> Result<Ipv4, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ipv4::new(&s).map_err(de::Error::custom)
    }
}

impl Ipv4 {
    /// `0.0.0.0/0`, what a rule without a CIDR covers.
    pub const ANY: Ipv4 = Ipv4 {
        addr: Ipv4Addr::UNSPECIFIED,
        mask: 0,
    };

    /// Create a new [`Ipv4`] from a CIDR string (e.g., "10.0.0.0/24").
    ///
    /// The address is kept as written; use [`Ipv4::network`] to normalise it.
    pub fn new(addr_cidr: &str) -> Result<Ipv4, RuleError> {
        let addr_cidr = addr_cidr.trim();
        let invalid = || RuleError::InvalidNet(addr_cidr.to_string());
        let (addr, mask) = addr_cidr.split_once('/').ok_or_else(invalid)?;
        let addr = Ipv4Addr::from_str(addr).map_err(|_| invalid())?;
        let mask = u8::from_str(mask).map_err(|_| invalid())?;
        if mask > MAX_LENGTH {
            return Err(invalid());
        }
        Ok(Ipv4 { addr, mask })
    }

    /// A single host as a `/32` block.
    pub fn host(addr: Ipv4Addr) -> Ipv4 {
        Ipv4 {
            addr,
            mask: MAX_LENGTH,
        }
    }

    /// The same block with host bits cleared.
    pub fn network(&self) -> Ipv4 {
        Ipv4 {
            addr: self.lo(),
            mask: self.mask.min(MAX_LENGTH),
        }
    }

    /// Get the lowest (network) address in the subnet.
    pub fn lo(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) & mask_bits(self.mask))
    }

    /// Get the highest (broadcast) address in the subnet.
    pub fn hi(&self) -> Ipv4Addr {
        let mask = mask_bits(self.mask);
        Ipv4Addr::from((u32::from(self.addr) & mask) | !mask)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.lo() <= addr && addr <= self.hi()
    }

    /// True for `0.0.0.0/0`.
    pub fn is_any(&self) -> bool {
        self.mask == 0
    }
}

impl std::fmt::Display for Ipv4 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.mask)
    }
}

impl PartialEq for Ipv4 {
    fn eq(&self, other: &Ipv4) -> bool {
        self.addr == other.addr && self.mask == other.mask
    }
}

impl PartialOrd for Ipv4 {
    fn partial_cmp(&self, other: &Ipv4) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Inclusive range of IPv4 addresses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv4Range {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl Ipv4Range {
    pub fn new(a: Ipv4Addr, b: Ipv4Addr) -> Ipv4Range {
        Ipv4Range {
            start: min(a, b),
            end: max(a, b),
        }
    }

    pub fn from_cidr(cidr: Ipv4) -> Ipv4Range {
        Ipv4Range {
            start: cidr.lo(),
            end: cidr.hi(),
        }
    }

    fn from_bits(start: u32, end: u32) -> Ipv4Range {
        Ipv4Range::new(Ipv4Addr::from(start), Ipv4Addr::from(end))
    }

    pub fn contains_range(&self, other: &Ipv4Range) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &Ipv4Range) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Remove `other` from this range.
    ///
    /// Returns the 0, 1 or 2 pieces of `self` outside `other`, and the overlap
    /// (`None` when the ranges are disjoint).
    pub fn substract(&self, other: &Ipv4Range) -> (Vec<Ipv4Range>, Option<Ipv4Range>) {
        if !self.overlaps(other) {
            return (vec![*self], None);
        }
        let (start, end) = (u32::from(self.start), u32::from(self.end));
        let (other_start, other_end) = (u32::from(other.start), u32::from(other.end));

        let mut lefts = Vec::new();
        if other_start > start {
            lefts.push(Ipv4Range::from_bits(start, other_start - 1));
        }
        if other_end < end {
            lefts.push(Ipv4Range::from_bits(other_end + 1, end));
        }
        let sub = Ipv4Range::from_bits(max(start, other_start), min(end, other_end));
        (lefts, Some(sub))
    }

    /// Minimal list of CIDR blocks that exactly cover this range.
    pub fn to_cidrs(&self) -> Vec<Ipv4> {
        let mut out = Vec::new();
        let mut cur = u32::from(self.start) as u64;
        let end = u32::from(self.end) as u64;

        while cur <= end {
            // Biggest block aligned on `cur`, shrunk until it fits below `end`.
            let mut host_bits = if cur == 0 {
                MAX_LENGTH as u32
            } else {
                cur.trailing_zeros().min(MAX_LENGTH as u32)
            };
            while cur + (1u64 << host_bits) - 1 > end {
                host_bits -= 1;
            }
            out.push(Ipv4 {
                addr: Ipv4Addr::from(cur as u32),
                mask: MAX_LENGTH - host_bits as u8,
            });
            cur += 1u64 << host_bits;
        }
        out
    }
}

impl std::fmt::Display for Ipv4Range {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
