//! Sweep report structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one campaign inside a sweep.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CampaignSweepResult {
    pub campaign_id: String,
    pub cards_checked: usize,
    pub cards_moved: usize,
    pub errors: Vec<String>,
    /// Collection stopped early on the page budget or deadline.
    #[serde(default)]
    pub truncated: bool,
}

/// Aggregated result of one sweep invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub campaigns_checked: usize,
    pub total_cards_checked: usize,
    pub total_cards_moved: usize,
    pub errors: Vec<String>,
    pub campaigns: Vec<CampaignSweepResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SweepReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            campaigns_checked: 0,
            total_cards_checked: 0,
            total_cards_moved: 0,
            errors: Vec::new(),
            campaigns: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    /// Fold one campaign's result into the totals.
    pub fn record(&mut self, result: CampaignSweepResult) {
        self.campaigns_checked += 1;
        self.total_cards_checked += result.cards_checked;
        self.total_cards_moved += result.cards_moved;
        self.errors.extend(
            result
                .errors
                .iter()
                .map(|e| format!("campaign {}: {}", result.campaign_id, e)),
        );
        self.campaigns.push(result);
    }

    pub fn campaign(&self, campaign_id: &str) -> Option<&CampaignSweepResult> {
        self.campaigns.iter().find(|c| c.campaign_id == campaign_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_aggregates() {
        let mut report = SweepReport::new(Utc::now());
        report.record(CampaignSweepResult {
            campaign_id: "a".into(),
            cards_checked: 2,
            cards_moved: 0,
            errors: vec!["card 1: boom".into()],
            truncated: false,
        });
        report.record(CampaignSweepResult {
            campaign_id: "b".into(),
            cards_checked: 3,
            cards_moved: 3,
            ..Default::default()
        });

        assert_eq!(report.campaigns_checked, 2);
        assert_eq!(report.total_cards_checked, 5);
        assert_eq!(report.total_cards_moved, 3);
        assert_eq!(report.errors, vec!["campaign a: card 1: boom".to_string()]);
        assert_eq!(report.campaign("b").unwrap().cards_moved, 3);
    }
}
