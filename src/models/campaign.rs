//! Campaign configuration records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::serde_ext::string_or_number;

/// Schema version written with every stored campaign.
pub const CAMPAIGN_SCHEMA_VERSION: u32 = 2;

/// A CRM location: a pipeline and a status within it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct StagePair {
    #[serde(deserialize_with = "string_or_number")]
    pub pipeline_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub status_id: String,
}

impl StagePair {
    pub fn new(pipeline_id: impl Into<String>, status_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            status_id: status_id.into(),
        }
    }

    /// Both ids are present.
    pub fn is_usable(&self) -> bool {
        !self.pipeline_id.trim().is_empty() && !self.status_id.trim().is_empty()
    }
}

impl fmt::Display for StagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pipeline_id, self.status_id)
    }
}

/// Comparison used by a trigger rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleOp {
    #[default]
    Contains,
    Equals,
    /// Anything else found in stored data; never matches.
    #[serde(other)]
    Unsupported,
}

/// A free-text trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TriggerRule {
    #[serde(default)]
    pub op: RuleOp,
    #[serde(default)]
    pub value: String,
}

impl TriggerRule {
    pub fn new(op: RuleOp, value: impl Into<String>) -> Self {
        Self {
            op,
            value: value.into(),
        }
    }
}

/// A trigger rule bound to the stage a matched card is moved to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariantStep {
    /// Only consulted for v2; v1 is always live when it has a value.
    #[serde(default)]
    pub enabled: bool,
    pub trigger_rule: TriggerRule,
    pub target: StagePair,
}

/// Expiry window and destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpiryStep {
    pub days: u32,
    pub target: StagePair,
}

/// Which variant of a campaign is meant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    V1,
    V2,
}

/// Counter slots kept per campaign.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    V1,
    V2,
    Exp,
}

impl CounterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKind::V1 => "v1",
            CounterKind::V2 => "v2",
            CounterKind::Exp => "exp",
        }
    }
}

impl From<Variant> for CounterKind {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::V1 => CounterKind::V1,
            Variant::V2 => CounterKind::V2,
        }
    }
}

/// A stored campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    #[serde(default = "current_schema")]
    pub schema_version: u32,

    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_true", alias = "enabled")]
    pub active: bool,

    /// Soft-delete flag carried by migrated records.
    #[serde(default)]
    pub deleted: bool,

    #[serde(default)]
    pub base: Option<StagePair>,

    #[serde(default)]
    pub v1: Option<VariantStep>,

    #[serde(default)]
    pub v2: Option<VariantStep>,

    #[serde(default)]
    pub exp: Option<ExpiryStep>,

    #[serde(default)]
    pub v1_count: u64,
    #[serde(default)]
    pub v2_count: u64,
    #[serde(default)]
    pub exp_count: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Active and not soft-deleted.
    pub fn is_live(&self) -> bool {
        self.active && !self.deleted
    }

    /// The variant steps that can fire, in evaluation order.
    pub fn live_variants(&self) -> Vec<(Variant, &VariantStep)> {
        let mut steps = Vec::with_capacity(2);
        if let Some(v1) = &self.v1 {
            if !v1.trigger_rule.value.trim().is_empty() {
                steps.push((Variant::V1, v1));
            }
        }
        if let Some(v2) = &self.v2 {
            if v2.enabled && !v2.trigger_rule.value.trim().is_empty() {
                steps.push((Variant::V2, v2));
            }
        }
        steps
    }

    pub fn counter(&self, kind: CounterKind) -> u64 {
        match kind {
            CounterKind::V1 => self.v1_count,
            CounterKind::V2 => self.v2_count,
            CounterKind::Exp => self.exp_count,
        }
    }

    pub(crate) fn counter_mut(&mut self, kind: CounterKind) -> &mut u64 {
        match kind {
            CounterKind::V1 => &mut self.v1_count,
            CounterKind::V2 => &mut self.v2_count,
            CounterKind::Exp => &mut self.exp_count,
        }
    }

    /// Human label used in logs and conflict messages.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => format!("{} ({})", name, self.id),
            _ => self.id.clone(),
        }
    }
}

/// Fields accepted when creating a campaign.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CampaignInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true", alias = "enabled")]
    pub active: bool,
    #[serde(default)]
    pub base: Option<StagePair>,
    #[serde(default)]
    pub v1: Option<VariantStep>,
    #[serde(default)]
    pub v2: Option<VariantStep>,
    #[serde(default)]
    pub exp: Option<ExpiryStep>,
}

impl CampaignInput {
    /// Build a fresh record; counters start at zero.
    pub fn into_campaign(self, id: String, now: DateTime<Utc>) -> Campaign {
        Campaign {
            schema_version: CAMPAIGN_SCHEMA_VERSION,
            id,
            name: self.name,
            active: self.active,
            deleted: false,
            base: self.base,
            v1: self.v1,
            v2: self.v2,
            exp: self.exp,
            v1_count: 0,
            v2_count: 0,
            exp_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Optional section a patch can remove.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClearableField {
    Name,
    Base,
    V1,
    V2,
    Exp,
}

/// Partial update; absent fields keep their stored value.
///
/// Sections listed in `clear` are removed after the other fields are merged,
/// so clearing wins over a value given in the same patch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CampaignPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "enabled")]
    pub active: Option<bool>,
    #[serde(default)]
    pub base: Option<StagePair>,
    #[serde(default)]
    pub v1: Option<VariantStep>,
    #[serde(default)]
    pub v2: Option<VariantStep>,
    #[serde(default)]
    pub exp: Option<ExpiryStep>,
    #[serde(default)]
    pub clear: Vec<ClearableField>,
}

impl CampaignPatch {
    /// Merge over an existing record. Counters and identity are untouched.
    pub fn apply(self, campaign: &mut Campaign, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            campaign.name = Some(name);
        }
        if let Some(active) = self.active {
            campaign.active = active;
        }
        if let Some(base) = self.base {
            campaign.base = Some(base);
        }
        if let Some(v1) = self.v1 {
            campaign.v1 = Some(v1);
        }
        if let Some(v2) = self.v2 {
            campaign.v2 = Some(v2);
        }
        if let Some(exp) = self.exp {
            campaign.exp = Some(exp);
        }
        for field in self.clear {
            match field {
                ClearableField::Name => campaign.name = None,
                ClearableField::Base => campaign.base = None,
                ClearableField::V1 => campaign.v1 = None,
                ClearableField::V2 => campaign.v2 = None,
                ClearableField::Exp => campaign.exp = None,
            }
        }
        campaign.updated_at = now;
    }
}

fn default_true() -> bool {
    true
}

fn current_schema() -> u32 {
    CAMPAIGN_SCHEMA_VERSION
}
