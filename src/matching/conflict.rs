//! Trigger uniqueness across active campaigns.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::matching::canonical;
use crate::models::Campaign;

/// Who a colliding value belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConflictWith {
    /// v1 and v2 of the candidate itself.
    #[serde(rename = "self")]
    SelfCampaign,
    /// Another active campaign.
    Campaign,
}

/// One colliding trigger value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conflict {
    /// Canonical form of the value.
    pub value: String,
    pub campaign_id: String,
    pub campaign_name: Option<String>,
    pub with: ConflictWith,
}

impl Conflict {
    pub fn campaign_label(&self) -> String {
        match &self.campaign_name {
            Some(name) if !name.trim().is_empty() => format!("{} ({})", name, self.campaign_id),
            _ => self.campaign_id.clone(),
        }
    }
}

/// Result of `validateCampaign`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Conflict>,
}

impl ValidationOutcome {
    pub fn passed() -> Self {
        Self {
            ok: true,
            conflicts: Vec::new(),
        }
    }

    pub fn failed(conflicts: Vec<Conflict>) -> Self {
        Self {
            ok: conflicts.is_empty(),
            conflicts,
        }
    }

    pub fn has_self_conflict(&self) -> bool {
        self.conflicts
            .iter()
            .any(|c| c.with == ConflictWith::SelfCampaign)
    }
}

/// Canonical trigger values a campaign claims: v1 when non-empty, v2 only when enabled.
pub fn variant_values(campaign: &Campaign) -> BTreeSet<String> {
    campaign
        .live_variants()
        .into_iter()
        .map(|(_, step)| canonical(Some(&step.trigger_rule.value)))
        .filter(|v| !v.is_empty())
        .collect()
}

/// Collect every collision between `candidate` and the other active campaigns.
///
/// A self-collision is reported alone; cross-campaign checks do not run.
pub fn find_conflicts(
    candidate: &Campaign,
    active: &[Campaign],
    exclude_id: Option<&str>,
) -> Vec<Conflict> {
    let v1 = candidate
        .v1
        .as_ref()
        .map(|s| canonical(Some(&s.trigger_rule.value)))
        .filter(|v| !v.is_empty());
    let v2 = candidate
        .v2
        .as_ref()
        .filter(|s| s.enabled)
        .map(|s| canonical(Some(&s.trigger_rule.value)))
        .filter(|v| !v.is_empty());

    if let (Some(v1), Some(v2)) = (&v1, &v2) {
        if v1 == v2 {
            return vec![Conflict {
                value: v1.clone(),
                campaign_id: candidate.id.clone(),
                campaign_name: candidate.name.clone(),
                with: ConflictWith::SelfCampaign,
            }];
        }
    }

    let values = variant_values(candidate);
    if values.is_empty() {
        return Vec::new();
    }

    let mut conflicts = Vec::new();
    for other in active {
        if !other.is_live() || other.id == candidate.id || Some(other.id.as_str()) == exclude_id {
            continue;
        }
        let theirs = variant_values(other);
        for value in values.intersection(&theirs) {
            conflicts.push(Conflict {
                value: value.clone(),
                campaign_id: other.id.clone(),
                campaign_name: other.name.clone(),
                with: ConflictWith::Campaign,
            });
        }
    }
    conflicts
}
