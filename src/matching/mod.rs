//! Rule matching: normalization, trigger evaluation, and the uniqueness check.
//!
//! Everything here is pure; no I/O.

mod conflict;
mod normalize;
mod rule;

pub use conflict::{Conflict, ConflictWith, ValidationOutcome, find_conflicts, variant_values};
pub use normalize::{canonical, canonical_handle, normalize};
pub use rule::matches;

use crate::models::{Campaign, Variant, VariantStep};

/// First live variant of `campaign` whose rule fires on `text`.
pub fn matching_variant<'a>(
    campaign: &'a Campaign,
    text: Option<&str>,
) -> Option<(Variant, &'a VariantStep)> {
    campaign
        .live_variants()
        .into_iter()
        .find(|(_, step)| matches(text, Some(&step.trigger_rule)))
}
