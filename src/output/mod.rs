//! Output formatting for rule sets.
//!
//! - [`terminal`] - coloured terminal listing of rules

mod terminal;

pub use terminal::{format_field, format_rule_row, print_rule_group, print_rule_set, print_sync_plan};
