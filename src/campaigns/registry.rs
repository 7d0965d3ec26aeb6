//! Campaign CRUD over the key-value store.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::json;

use crate::campaigns::keys;
use crate::campaigns::legacy::{self, StoredCampaign};
use crate::error::{AppError, Result};
use crate::matching::{ConflictWith, ValidationOutcome, find_conflicts};
use crate::models::{Campaign, CampaignInput, CampaignPatch, CounterKind};
use crate::storage::KvStore;
use crate::utils::epoch_millis;

const AUDIT_LIMIT: i64 = 1000;
const LIST_CONCURRENCY: usize = 8;

/// Owns campaign records and the trigger uniqueness invariant.
#[derive(Clone)]
pub struct CampaignRegistry {
    store: Arc<dyn KvStore>,
}

impl CampaignRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Check `candidate` against the active campaigns without writing anything.
    ///
    /// An inactive candidate can only collide with itself.
    pub async fn validate(
        &self,
        candidate: &Campaign,
        exclude_id: Option<&str>,
    ) -> Result<ValidationOutcome> {
        let active = if candidate.is_live() {
            self.list(true).await?
        } else {
            Vec::new()
        };
        let conflicts = find_conflicts(candidate, &active, exclude_id);
        if conflicts.is_empty() {
            Ok(ValidationOutcome::passed())
        } else {
            Ok(ValidationOutcome::failed(conflicts))
        }
    }

    async fn ensure_valid(&self, candidate: &Campaign, exclude_id: Option<&str>) -> Result<()> {
        let outcome = self.validate(candidate, exclude_id).await?;
        if outcome.ok {
            return Ok(());
        }
        if let Some(own) = outcome
            .conflicts
            .iter()
            .find(|c| c.with == ConflictWith::SelfCampaign)
        {
            return Err(AppError::SelfConflict {
                value: own.value.clone(),
            });
        }
        Err(AppError::VariantConflict {
            conflicts: outcome.conflicts,
        })
    }

    /// Create a campaign with a fresh id and zeroed counters.
    pub async fn create(&self, input: CampaignInput) -> Result<Campaign> {
        let now = Utc::now();
        let campaign = input.into_campaign(uuid::Uuid::new_v4().to_string(), now);

        self.ensure_valid(&campaign, None).await?;

        self.save_record(&campaign).await?;
        self.store
            .sorted_set_add(keys::INDEX, epoch_millis(campaign.created_at), &campaign.id)
            .await?;
        self.audit("create", &campaign.id).await;

        log::info!("Created campaign {}", campaign.label());
        Ok(campaign)
    }

    /// Merge `patch` over the stored record and re-validate, excluding the campaign itself.
    pub async fn update(&self, id: &str, patch: CampaignPatch) -> Result<Campaign> {
        let mut record = self
            .load_record(id)
            .await?
            .ok_or_else(|| AppError::CampaignNotFound(id.to_string()))?;

        patch.apply(&mut record, Utc::now());
        self.ensure_valid(&record, Some(id)).await?;

        self.save_record(&record).await?;
        self.audit("update", id).await;

        log::info!("Updated campaign {}", record.label());
        self.hydrate(record).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Campaign>> {
        match self.load_record(id).await? {
            Some(record) => Ok(Some(self.hydrate(record).await?)),
            None => Ok(None),
        }
    }

    /// All decodable campaigns in creation order. Unreadable records are skipped.
    pub async fn list(&self, active_only: bool) -> Result<Vec<Campaign>> {
        let ids: Vec<String> = self
            .store
            .sorted_set_range(keys::INDEX, 0, -1)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        let loaded: Vec<Result<Option<Campaign>>> = stream::iter(ids)
            .map(|id| async move { self.get(&id).await })
            .buffered(LIST_CONCURRENCY)
            .collect()
            .await;

        let mut campaigns = Vec::with_capacity(loaded.len());
        for result in loaded {
            if let Some(campaign) = result? {
                if !active_only || campaign.is_live() {
                    campaigns.push(campaign);
                }
            }
        }
        Ok(campaigns)
    }

    /// Remove the record, its index entry, counters, and stage clock.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let existed = self.store.delete(&keys::record(id)).await?;
        self.store.sorted_set_remove(keys::INDEX, id).await?;
        for kind in [CounterKind::V1, CounterKind::V2, CounterKind::Exp] {
            self.store.delete(&keys::counter(id, kind)).await?;
        }
        self.store.delete(&keys::stage_entries(id)).await?;

        if existed {
            self.audit("delete", id).await;
            log::info!("Deleted campaign {}", id);
        }
        Ok(existed)
    }

    /// Atomically bump one counter. Returns the new reported value.
    pub async fn increment_counter(&self, id: &str, kind: CounterKind) -> Result<u64> {
        let record = self
            .load_record(id)
            .await?
            .ok_or_else(|| AppError::CampaignNotFound(id.to_string()))?;

        let added = self.store.incr_by(&keys::counter(id, kind), 1).await?;
        Ok(record.counter(kind) + added.max(0) as u64)
    }

    /// The stored record with counters at their baseline (pre-atomic) values.
    async fn load_record(&self, id: &str) -> Result<Option<Campaign>> {
        let Some(raw) = self.store.get(&keys::record(id)).await? else {
            log::debug!("Campaign {} is indexed but has no record", id);
            return Ok(None);
        };
        match legacy::decode(&raw) {
            StoredCampaign::Current(campaign) => Ok(Some(campaign)),
            StoredCampaign::Legacy(campaign) => {
                log::debug!("Campaign {} decoded from legacy layout", id);
                Ok(Some(campaign))
            }
            StoredCampaign::Unknown(reason) => {
                log::warn!("Skipping unreadable campaign record {}: {}", id, reason);
                Ok(None)
            }
        }
    }

    /// Add the atomic counter keys to the stored baseline.
    async fn hydrate(&self, mut campaign: Campaign) -> Result<Campaign> {
        for kind in [CounterKind::V1, CounterKind::V2, CounterKind::Exp] {
            let Some(raw) = self.store.get(&keys::counter(&campaign.id, kind)).await? else {
                continue;
            };
            match raw.trim().parse::<i64>() {
                Ok(n) if n > 0 => *campaign.counter_mut(kind) += n as u64,
                Ok(_) => {}
                Err(_) => log::warn!(
                    "Ignoring non-numeric {} counter for campaign {}",
                    kind.as_str(),
                    campaign.id
                ),
            }
        }
        Ok(campaign)
    }

    async fn save_record(&self, campaign: &Campaign) -> Result<()> {
        let json = serde_json::to_string(campaign)?;
        self.store.set(&keys::record(&campaign.id), &json).await
    }

    async fn audit(&self, action: &str, id: &str) {
        let line = json!({ "at": Utc::now(), "action": action, "campaign_id": id }).to_string();
        let result = async {
            self.store.list_push(keys::AUDIT, &line).await?;
            self.store.list_trim(keys::AUDIT, -AUDIT_LIMIT, -1).await
        }
        .await;
        if let Err(e) = result {
            log::warn!("Failed to append audit entry for campaign {}: {}", id, e);
        }
    }
}
