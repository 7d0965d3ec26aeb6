//! Trigger rule evaluation.

use crate::matching::canonical;
use crate::models::{RuleOp, TriggerRule};

/// Whether `text` fires `rule`. Empty or unsupported rules never match.
pub fn matches(text: Option<&str>, rule: Option<&TriggerRule>) -> bool {
    let Some(rule) = rule else {
        return false;
    };
    let needle = canonical(Some(&rule.value));
    if needle.is_empty() {
        return false;
    }
    let haystack = canonical(text);
    match rule.op {
        RuleOp::Equals => haystack == needle,
        RuleOp::Contains => haystack.contains(&needle),
        RuleOp::Unsupported => false,
    }
}
