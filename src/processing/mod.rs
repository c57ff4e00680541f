//! Rule-set processing.
//!
//! This module contains the rule reduction logic:
//! - [`cut`] - carving one rule out of another
//! - [`ruleset`] - priority-ordered rule lists and their allow-only form
//! - [`group`] - incremental merging of a security group's rules
//! - [`sync`] - diffing current against desired rules

mod cut;
mod group;
mod ruleset;
mod sync;

// Re-export public types and functions
pub use cut::{Coverage, SecurityRuleCut, SecurityRuleCuts};
pub use group::{
    merge, proto_relation, ProtoRelation, SecurityGroupRuleSet, SecurityGroupSubRuleSet,
    SecurityGroupSubSubRuleSet,
};
pub use ruleset::SecurityRuleSet;
pub use sync::{plan_sync, SyncPlan};
