//! When each card entered a campaign's base stage.
//!
//! The CRM does not report stage-entry time, so it is kept here. The
//! event router records it when it moves a card into a base stage; the
//! sweep records it the first time it sees a card there.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::campaigns::keys;
use crate::error::Result;
use crate::storage::KvStore;
use crate::utils::epoch_millis;

#[derive(Clone)]
pub struct StageClock {
    store: Arc<dyn KvStore>,
}

impl StageClock {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Set (or reset) the entry time of a card.
    pub async fn record(&self, campaign_id: &str, card_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.store
            .sorted_set_add(&keys::stage_entries(campaign_id), epoch_millis(at), card_id)
            .await?;
        Ok(())
    }

    /// Entry times of every tracked card.
    pub async fn entries(&self, campaign_id: &str) -> Result<HashMap<String, DateTime<Utc>>> {
        let members = self
            .store
            .sorted_set_range(&keys::stage_entries(campaign_id), 0, -1)
            .await?;
        Ok(members
            .into_iter()
            .filter_map(|(card_id, ms)| {
                Utc.timestamp_millis_opt(ms as i64)
                    .single()
                    .map(|at| (card_id, at))
            })
            .collect())
    }

    pub async fn forget(&self, campaign_id: &str, card_id: &str) -> Result<()> {
        self.store
            .sorted_set_remove(&keys::stage_entries(campaign_id), card_id)
            .await?;
        Ok(())
    }

    /// Drop entries for cards that are no longer in the base stage.
    pub async fn prune(&self, campaign_id: &str, present: &HashSet<String>) -> Result<usize> {
        let mut removed = 0;
        for (card_id, _) in self
            .store
            .sorted_set_range(&keys::stage_entries(campaign_id), 0, -1)
            .await?
        {
            if !present.contains(&card_id) {
                self.forget(campaign_id, &card_id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
