//! Domain models for security rules.
//!
//! This module contains the core data structures used throughout the crate:
//! - [`Ipv4`] and [`Ipv4Range`] - CIDR blocks and address-range arithmetic
//! - [`Ports`] and [`PortRange`] - port selections and their arithmetic
//! - [`SecurityRule`] - one firewall rule and its text form

mod ipv4;
mod port;
mod rule;

// Re-export public types
pub use ipv4::{Ipv4, Ipv4Range, MAX_LENGTH};
pub use port::{PortRange, Ports, MAX_PORT, MIN_PORT};
pub use rule::{
    checked_priority, Action, Direction, PortSpec, Protocol, RuleRecord, SecurityRule,
    DEFAULT_PRIORITY, MAX_PRIORITY,
};
