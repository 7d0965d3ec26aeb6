// src/error.rs

//! Unified error handling for the campaign engine.

use std::fmt;

use thiserror::Error;

use crate::matching::Conflict;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Trigger values collide with other active campaigns
    #[error("Trigger value conflicts with {} active campaign(s): {}", .conflicts.len(), describe(.conflicts))]
    VariantConflict { conflicts: Vec<Conflict> },

    /// v1 and v2 of the same campaign normalize to the same trigger
    #[error("v1 and v2 share the same trigger value '{value}'")]
    SelfConflict { value: String },

    /// Campaign scope was requested without both pipeline and status ids
    #[error("Campaign scope requires both pipeline_id and status_id")]
    CampaignScopeMissing,

    /// Campaign does not exist
    #[error("Campaign not found: {0}")]
    CampaignNotFound(String),

    /// CRM responded with a failure or an unusable payload
    #[error("CRM error at {endpoint} (status {}): {message}", .status.map_or_else(|| "-".to_string(), |s| s.to_string()))]
    Crm {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    /// Key-value store failure
    #[error("Store error: {0}")]
    Store(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a store error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Create a CRM error with endpoint context.
    pub fn crm(endpoint: impl Into<String>, status: Option<u16>, message: impl fmt::Display) -> Self {
        Self::Crm {
            endpoint: endpoint.into(),
            status,
            message: message.to_string(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::VariantConflict { .. } => "variant_conflict",
            Self::SelfConflict { .. } => "variant_conflict_same_campaign",
            Self::CampaignScopeMissing => "campaign_scope_missing",
            Self::CampaignNotFound(_) => "campaign_not_found",
            Self::Validation(_) => "validation_error",
            Self::Config(_) => "config_error",
            Self::Crm { .. } | Self::Http(_) => "crm_error",
            Self::Store(_) => "store_error",
            Self::Io(_) => "io_error",
            Self::Json(_) | Self::Toml(_) | Self::Url(_) => "parse_error",
        }
    }

    /// Whether the caller can fix this by changing its input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::VariantConflict { .. }
                | Self::SelfConflict { .. }
                | Self::CampaignScopeMissing
                | Self::Validation(_)
        )
    }
}

fn describe(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(|c| format!("'{}' used by {}", c.value, c.campaign_label()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::ConflictWith;

    #[test]
    fn test_codes() {
        assert_eq!(AppError::CampaignScopeMissing.code(), "campaign_scope_missing");
        assert_eq!(
            AppError::SelfConflict { value: "promo".into() }.code(),
            "variant_conflict_same_campaign"
        );
        assert!(AppError::CampaignScopeMissing.is_validation());
        assert!(!AppError::store("down").is_validation());
    }

    #[test]
    fn test_conflict_message_lists_every_campaign() {
        let err = AppError::VariantConflict {
            conflicts: vec![
                Conflict {
                    value: "sale".into(),
                    campaign_id: "a".into(),
                    campaign_name: Some("Spring".into()),
                    with: ConflictWith::Campaign,
                },
                Conflict {
                    value: "promo".into(),
                    campaign_id: "b".into(),
                    campaign_name: None,
                    with: ConflictWith::Campaign,
                },
            ],
        };
        let message = err.to_string();
        assert!(message.contains("'sale' used by Spring (a)"));
        assert!(message.contains("'promo' used by b"));
    }

    #[test]
    fn test_crm_message_without_status() {
        let err = AppError::crm("GET /cards", None, "timed out");
        assert_eq!(err.to_string(), "CRM error at GET /cards (status -): timed out");
    }
}
