//! Reading rule sets from disk.
//!
//! - [`rule_file`] - JSON and plain text rule files

mod rule_file;

pub use rule_file::{parse_json_rules, parse_text_rules, read_rule_file, RuleFile};
