//! CRM card shapes and search parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::StagePair;
use crate::utils::serde_ext::{string_or_number, string_or_number_opt};

/// Contact block attached to a card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Contact {
    #[serde(default, deserialize_with = "string_or_number_opt")]
    pub social_id: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// A lead record living in the external CRM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Card {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "string_or_number_opt")]
    pub pipeline_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number_opt")]
    pub status_id: Option<String>,
    #[serde(default)]
    pub contact: Option<Contact>,
}

impl Card {
    /// Whether the card currently sits at the given stage.
    pub fn is_at(&self, stage: &StagePair) -> bool {
        self.pipeline_id.as_deref() == Some(stage.pipeline_id.as_str())
            && self.status_id.as_deref() == Some(stage.status_id.as_str())
    }

    pub fn social_id(&self) -> Option<&str> {
        self.contact.as_ref().and_then(|c| c.social_id.as_deref())
    }
}

/// What to look for.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CardNeedle {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl CardNeedle {
    pub fn new(username: Option<&str>, full_name: Option<&str>) -> Self {
        Self {
            username: username.map(str::to_string),
            full_name: full_name.map(str::to_string),
        }
    }
}

/// Search breadth.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    /// Only cards at one pipeline/status pair.
    #[default]
    Campaign,
    /// The whole CRM.
    Global,
}

/// Where to search.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchScope {
    #[serde(default)]
    pub kind: ScopeKind,
    #[serde(default)]
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub status_id: Option<String>,
}

impl SearchScope {
    pub fn global() -> Self {
        Self {
            kind: ScopeKind::Global,
            pipeline_id: None,
            status_id: None,
        }
    }

    pub fn campaign(stage: &StagePair) -> Self {
        Self {
            kind: ScopeKind::Campaign,
            pipeline_id: Some(stage.pipeline_id.clone()),
            status_id: Some(stage.status_id.clone()),
        }
    }

    /// The stage filter to apply, or `None` for a global scan.
    ///
    /// A campaign scope without both ids fails instead of widening to global.
    pub fn resolve(&self) -> Result<Option<StagePair>> {
        match self.kind {
            ScopeKind::Global => Ok(None),
            ScopeKind::Campaign => {
                let pipeline = self.pipeline_id.as_deref().map(str::trim).unwrap_or("");
                let status = self.status_id.as_deref().map(str::trim).unwrap_or("");
                if pipeline.is_empty() || status.is_empty() {
                    return Err(AppError::CampaignScopeMissing);
                }
                Ok(Some(StagePair::new(pipeline, status)))
            }
        }
    }
}

/// Which match kinds the locator may use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    IdentityOnly,
    #[default]
    IdentityThenTitle,
}

/// How a full name is compared against a card title.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TitleMode {
    /// Title equals `Chat with <full_name>`.
    #[default]
    Exact,
    /// Title contains the full name.
    Contains,
}

/// Scan bounds and matching policy.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub max_pages: u32,
    pub page_size: u32,
    pub strategy: MatchStrategy,
    pub title_mode: TitleMode,
    /// Wall-clock budget for the whole scan.
    pub deadline: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_pages: 20,
            page_size: 50,
            strategy: MatchStrategy::default(),
            title_mode: TitleMode::default(),
            deadline: Duration::from_secs(25),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_decodes_numeric_ids() {
        let card: Card = serde_json::from_str(
            r#"{"id": 91, "title": "Chat with Ana", "pipeline_id": 3, "status_id": 4,
                "contact": {"social_id": "ana_k", "full_name": "Ana"}}"#,
        )
        .unwrap();
        assert_eq!(card.id, "91");
        assert!(card.is_at(&StagePair::new("3", "4")));
        assert_eq!(card.social_id(), Some("ana_k"));
    }

    #[test]
    fn test_card_tolerates_missing_fields() {
        let card: Card = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        assert!(card.contact.is_none());
        assert!(!card.is_at(&StagePair::new("1", "2")));
    }

    #[test]
    fn test_campaign_scope_requires_both_ids() {
        let scope = SearchScope {
            kind: ScopeKind::Campaign,
            pipeline_id: Some("1".into()),
            status_id: None,
        };
        assert!(matches!(scope.resolve(), Err(AppError::CampaignScopeMissing)));
        assert_eq!(SearchScope::global().resolve().unwrap(), None);
        assert_eq!(
            SearchScope::campaign(&StagePair::new("1", "2")).resolve().unwrap(),
            Some(StagePair::new("1", "2"))
        );
    }
}
