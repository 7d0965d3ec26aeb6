// src/models/mod.rs

//! Domain models for the campaign engine.
//!
//! This module contains the data structures shared across the engine,
//! organized by their primary purpose.

mod campaign;
mod card;
mod config;
mod report;

// Re-export all public types
pub use campaign::{
    CAMPAIGN_SCHEMA_VERSION, Campaign, CampaignInput, CampaignPatch, ClearableField, CounterKind,
    ExpiryStep, RuleOp, StagePair, TriggerRule, Variant, VariantStep,
};
pub use card::{
    Card, CardNeedle, Contact, MatchStrategy, ScopeKind, SearchOptions, SearchScope, TitleMode,
};
pub use config::{Config, CrmConfig, LocatorConfig, LoggingConfig, StorageConfig, SweepConfig};
pub use report::{CampaignSweepResult, SweepReport};
