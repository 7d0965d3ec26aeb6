// src/pipeline/sweep.rs

//! Scheduled expiration sweep.
//!
//! For every live campaign the sweep collects the cards sitting in the
//! campaign's base stage, works out how long each has been there, and
//! moves the ones past the expiry window to the expiry target.
//!
//! Failures are contained: a failing card is recorded in its campaign's
//! result and the sweep carries on with the next card and campaign.
//!
//! ## Per-card Guarantees
//!
//! - within one run each (campaign, card) pair is evaluated once
//! - a card is moved at most once per lock window by whichever run or campaign
//!   first takes `sweep:lock:{card_id}`, so campaigns sharing a base stage never
//!   move the same card twice
//! - a move accepted by the CRM is always counted in the report; counter and
//!   clock updates that fail afterwards are reported as separate errors

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;

use crate::campaigns::{CampaignRegistry, StageClock, keys};
use crate::crm::{CardLocator, CardMover, MoveOutcome};
use crate::error::Result;
use crate::models::{
    Campaign, CampaignSweepResult, Card, CounterKind, ExpiryStep, SweepConfig, SweepReport,
};

/// Runs the expiration sweep.
pub struct ExpirationSweep {
    registry: CampaignRegistry,
    clock: StageClock,
    locator: Arc<CardLocator>,
    mover: CardMover,
    config: SweepConfig,
}

/// State shared by every campaign in one run.
struct RunContext {
    run_id: String,
    now: DateTime<Utc>,
    deadline: Instant,
    /// (campaign id, card id) pairs already evaluated.
    seen: HashSet<(String, String)>,
}

impl ExpirationSweep {
    pub fn new(
        registry: CampaignRegistry,
        clock: StageClock,
        locator: Arc<CardLocator>,
        mover: CardMover,
        config: SweepConfig,
    ) -> Self {
        Self {
            registry,
            clock,
            locator,
            mover,
            config,
        }
    }

    /// Sweep every live campaign. Always returns a report; failures are listed in it.
    pub async fn run(&self) -> SweepReport {
        let mut report = SweepReport::new(Utc::now());
        let mut ctx = RunContext {
            run_id: uuid::Uuid::new_v4().to_string(),
            now: report.started_at,
            deadline: Instant::now() + self.config.deadline(),
            seen: HashSet::new(),
        };
        log::info!("Sweep {} starting", ctx.run_id);

        match self.registry.list(true).await {
            Ok(campaigns) => {
                for (i, campaign) in campaigns.iter().enumerate() {
                    if Instant::now() >= ctx.deadline {
                        let left = campaigns.len() - i;
                        log::warn!("Sweep deadline reached, {} campaign(s) not swept", left);
                        report
                            .errors
                            .push(format!("sweep deadline reached, {left} campaign(s) not swept"));
                        break;
                    }
                    if let Some(result) = self.sweep_campaign(campaign, &mut ctx).await {
                        report.record(result);
                    }
                }
            }
            Err(e) => {
                log::error!("Sweep could not list campaigns: {}", e);
                report.errors.push(format!("listing campaigns: {e}"));
            }
        }

        self.locator.clear_cache().await;
        report.finished_at = Utc::now();

        log::info!(
            "Sweep {} finished: {} campaign(s), {} card(s) checked, {} moved, {} error(s)",
            ctx.run_id,
            report.campaigns_checked,
            report.total_cards_checked,
            report.total_cards_moved,
            report.errors.len()
        );
        report
    }

    /// `None` when the campaign is not sweepable and was skipped.
    async fn sweep_campaign(
        &self,
        campaign: &Campaign,
        ctx: &mut RunContext,
    ) -> Option<CampaignSweepResult> {
        let Some(base) = campaign.base.as_ref().filter(|b| b.is_usable()) else {
            log::info!("Skipping campaign {}: no usable base stage", campaign.label());
            return None;
        };
        let Some(exp) = campaign.exp.as_ref().filter(|e| e.target.is_usable()) else {
            log::info!("Skipping campaign {}: no usable expiry step", campaign.label());
            return None;
        };

        let mut result = CampaignSweepResult {
            campaign_id: campaign.id.clone(),
            ..CampaignSweepResult::default()
        };

        let collected = match self
            .locator
            .collect(base, self.config.page_budget, self.config.page_size, ctx.deadline)
            .await
        {
            Ok(collected) => collected,
            Err(e) => {
                log::error!("Campaign {}: collecting base cards failed: {}", campaign.label(), e);
                result.errors.push(format!("collecting cards at {base}: {e}"));
                return Some(result);
            }
        };
        result.truncated = collected.truncated;

        let entries = match self.clock.entries(&campaign.id).await {
            Ok(entries) => entries,
            Err(e) => {
                result.errors.push(format!("reading stage entries: {e}"));
                return Some(result);
            }
        };

        let window = Duration::days(i64::from(exp.days));
        for card in &collected.cards {
            if !ctx.seen.insert((campaign.id.clone(), card.id.clone())) {
                log::debug!(
                    "Card {} already evaluated for campaign {} in this run",
                    card.id,
                    campaign.id
                );
                continue;
            }
            result.cards_checked += 1;

            let entered = match entries.get(&card.id) {
                Some(at) => *at,
                None => {
                    if let Err(e) = self.clock.record(&campaign.id, &card.id, ctx.now).await {
                        result.errors.push(format!("card {}: recording stage entry: {}", card.id, e));
                        continue;
                    }
                    ctx.now
                }
            };
            if ctx.now - entered < window {
                continue;
            }

            match self
                .expire_card(campaign, card, exp, &ctx.run_id, &mut result.errors)
                .await
            {
                Ok(true) => result.cards_moved += 1,
                Ok(false) => {}
                Err(e) => {
                    log::error!(
                        "Campaign {}: moving card {} to {} failed: {}",
                        campaign.label(),
                        card.id,
                        exp.target,
                        e
                    );
                    result.errors.push(format!("card {}: {}", card.id, e));
                }
            }
        }

        if !collected.truncated {
            let present: HashSet<String> = collected.cards.iter().map(|c| c.id.clone()).collect();
            match self.clock.prune(&campaign.id, &present).await {
                Ok(0) => {}
                Ok(n) => log::debug!("Campaign {}: pruned {} stale stage entries", campaign.id, n),
                Err(e) => log::warn!("Campaign {}: pruning stage entries failed: {}", campaign.id, e),
            }
        }

        Some(result)
    }

    /// Move one due card. `Ok(false)` when another run owns it or it vanished.
    ///
    /// Once the CRM has accepted the move this returns `Ok(true)`; failures of
    /// the follow-up bookkeeping are pushed onto `errors` instead.
    async fn expire_card(
        &self,
        campaign: &Campaign,
        card: &Card,
        exp: &ExpiryStep,
        run_id: &str,
        errors: &mut Vec<String>,
    ) -> Result<bool> {
        let store = self.registry.store();
        let lock = keys::sweep_lock(&card.id);
        if !store
            .set_if_absent(&lock, run_id, Some(self.config.lock_ttl()))
            .await?
        {
            log::info!("Card {} is held by another sweep run, skipping", card.id);
            return Ok(false);
        }

        match self.mover.move_card(&card.id, &exp.target).await {
            Ok(MoveOutcome::Moved) => {
                match self
                    .registry
                    .increment_counter(&campaign.id, CounterKind::Exp)
                    .await
                {
                    Ok(count) => {
                        log::debug!("Campaign {} exp_count is now {}", campaign.id, count)
                    }
                    Err(e) => {
                        log::error!(
                            "Campaign {}: card {} moved but exp_count update failed: {}",
                            campaign.label(),
                            card.id,
                            e
                        );
                        errors.push(format!(
                            "card {} moved but counter update failed: {}",
                            card.id, e
                        ));
                    }
                }
                if let Err(e) = self.clock.forget(&campaign.id, &card.id).await {
                    log::warn!(
                        "Campaign {}: card {} moved but clearing its stage entry failed: {}",
                        campaign.id,
                        card.id,
                        e
                    );
                    errors.push(format!("card {} moved but clock update failed: {}", card.id, e));
                }
                Ok(true)
            }
            Ok(MoveOutcome::Missing) => {
                if let Err(e) = self.clock.forget(&campaign.id, &card.id).await {
                    log::warn!(
                        "Campaign {}: forgetting vanished card {} failed: {}",
                        campaign.id,
                        card.id,
                        e
                    );
                }
                Ok(false)
            }
            Err(e) => {
                if let Err(release) = store.delete(&lock).await {
                    log::warn!("Could not release sweep lock for card {}: {}", card.id, release);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CampaignInput, Config, StagePair};
    use crate::pipeline::Engine;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine(server: &MockServer) -> Engine {
        let mut config = Config::default();
        config.crm.base_url = server.uri();
        Engine::new(&config, Arc::new(MemoryStore::new())).unwrap()
    }

    fn clock(engine: &Engine) -> StageClock {
        StageClock::new(Arc::clone(engine.registry.store()))
    }

    async fn expiring(engine: &Engine, base: (&str, &str), days: u32) -> Campaign {
        engine
            .registry
            .create(CampaignInput {
                name: Some(format!("expire {}/{}", base.0, base.1)),
                active: true,
                base: Some(StagePair::new(base.0, base.1)),
                exp: Some(ExpiryStep {
                    days,
                    target: StagePair::new("9", "99"),
                }),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn listing(server: &MockServer, cards: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/cards"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": cards })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_first_sighting_starts_the_clock() {
        let server = MockServer::start().await;
        listing(&server, json!([{"id": 5, "pipeline_id": 1, "status_id": 10}])).await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let engine = engine(&server);
        let campaign = expiring(&engine, ("1", "10"), 2).await;

        let report = engine.sweep.run().await;
        assert_eq!(report.campaigns_checked, 1);
        assert_eq!(report.total_cards_checked, 1);
        assert_eq!(report.total_cards_moved, 0);
        assert!(clock(&engine).entries(&campaign.id).await.unwrap().contains_key("5"));
    }

    #[tokio::test]
    async fn test_due_card_moves_once_and_counts() {
        let server = MockServer::start().await;
        listing(&server, json!([{"id": 5, "pipeline_id": 1, "status_id": 10}])).await;
        Mock::given(method("PATCH"))
            .and(path("/cards/5"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(&server);
        let campaign = expiring(&engine, ("1", "10"), 2).await;
        clock(&engine)
            .record(&campaign.id, "5", Utc::now() - Duration::days(3))
            .await
            .unwrap();

        let report = engine.sweep.run().await;
        assert_eq!(report.total_cards_moved, 1);
        assert!(report.errors.is_empty());

        let stored = engine.registry.get(&campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.exp_count, 1);
        assert!(clock(&engine).entries(&campaign.id).await.unwrap().is_empty());

        // Still listed by the mock, so its clock restarts instead of moving again.
        let again = engine.sweep.run().await;
        assert_eq!(again.total_cards_moved, 0);
        assert_eq!(
            engine.registry.get(&campaign.id).await.unwrap().unwrap().exp_count,
            1
        );
    }

    #[tokio::test]
    async fn test_card_held_by_other_run_is_skipped() {
        let server = MockServer::start().await;
        listing(&server, json!([{"id": 5, "pipeline_id": 1, "status_id": 10}])).await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let engine = engine(&server);
        let campaign = expiring(&engine, ("1", "10"), 0).await;
        engine
            .registry
            .store()
            .set_if_absent(&keys::sweep_lock("5"), "other-run", None)
            .await
            .unwrap();

        let report = engine.sweep.run().await;
        assert_eq!(report.total_cards_checked, 1);
        assert_eq!(report.total_cards_moved, 0);
        assert!(report.errors.is_empty());
        assert_eq!(
            engine.registry.get(&campaign.id).await.unwrap().unwrap().exp_count,
            0
        );
    }

    #[tokio::test]
    async fn test_failed_move_releases_marker() {
        let server = MockServer::start().await;
        listing(&server, json!([{"id": 5, "pipeline_id": 1, "status_id": 10}])).await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let engine = engine(&server);
        let campaign = expiring(&engine, ("1", "10"), 0).await;

        let report = engine.sweep.run().await;
        let result = report.campaign(&campaign.id).unwrap();
        assert_eq!(result.cards_moved, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("card 5:"));
        assert!(
            engine
                .registry
                .store()
                .get(&keys::sweep_lock("5"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_vanished_card_is_benign() {
        let server = MockServer::start().await;
        listing(&server, json!([{"id": 5, "pipeline_id": 1, "status_id": 10}])).await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let engine = engine(&server);
        expiring(&engine, ("1", "10"), 0).await;

        let report = engine.sweep.run().await;
        assert_eq!(report.total_cards_moved, 0);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_shared_base_card_moves_once() {
        let server = MockServer::start().await;
        listing(&server, json!([{"id": 5, "pipeline_id": 1, "status_id": 10}])).await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(&server);
        expiring(&engine, ("1", "10"), 0).await;
        expiring(&engine, ("1", "10"), 0).await;

        let report = engine.sweep.run().await;
        assert_eq!(report.campaigns_checked, 2);
        assert_eq!(report.total_cards_checked, 2);
        assert_eq!(report.total_cards_moved, 1);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_shared_base_each_campaign_applies_its_own_window() {
        let server = MockServer::start().await;
        listing(&server, json!([{"id": 5, "pipeline_id": 1, "status_id": 10}])).await;
        Mock::given(method("PATCH"))
            .and(path("/cards/5"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(&server);
        let slow = expiring(&engine, ("1", "10"), 30).await;
        let fast = expiring(&engine, ("1", "10"), 1).await;
        let entered = Utc::now() - Duration::days(5);
        clock(&engine).record(&slow.id, "5", entered).await.unwrap();
        clock(&engine).record(&fast.id, "5", entered).await.unwrap();

        let report = engine.sweep.run().await;
        assert_eq!(report.campaign(&slow.id).unwrap().cards_checked, 1);
        assert_eq!(report.campaign(&slow.id).unwrap().cards_moved, 0);
        assert_eq!(report.campaign(&fast.id).unwrap().cards_checked, 1);
        assert_eq!(report.campaign(&fast.id).unwrap().cards_moved, 1);

        let slow = engine.registry.get(&slow.id).await.unwrap().unwrap();
        let fast = engine.registry.get(&fast.id).await.unwrap().unwrap();
        assert_eq!((slow.exp_count, fast.exp_count), (0, 1));
    }

    #[tokio::test]
    async fn test_accepted_move_counts_even_when_bookkeeping_fails() {
        let server = MockServer::start().await;
        listing(&server, json!([{"id": 5, "pipeline_id": 1, "status_id": 10}])).await;
        Mock::given(method("PATCH"))
            .and(path("/cards/5"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(&server);
        let campaign = expiring(&engine, ("1", "10"), 0).await;
        // A counter that cannot be incremented.
        engine
            .registry
            .store()
            .set(&keys::counter(&campaign.id, CounterKind::Exp), "not a number")
            .await
            .unwrap();

        let report = engine.sweep.run().await;
        let result = report.campaign(&campaign.id).unwrap();
        assert_eq!(result.cards_moved, 1);
        assert_eq!(report.total_cards_moved, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("card 5 moved but counter update failed"));
        assert!(clock(&engine).entries(&campaign.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsweepable_campaigns_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(0)
            .mount(&server)
            .await;

        let engine = engine(&server);
        engine
            .registry
            .create(CampaignInput {
                active: true,
                base: Some(StagePair::new("1", "10")),
                ..Default::default()
            })
            .await
            .unwrap();
        engine
            .registry
            .create(CampaignInput {
                active: true,
                exp: Some(ExpiryStep {
                    days: 1,
                    target: StagePair::new("9", "99"),
                }),
                ..Default::default()
            })
            .await
            .unwrap();

        let report = engine.sweep.run().await;
        assert_eq!(report.campaigns_checked, 0);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_complete_collection_prunes_departed_cards() {
        let server = MockServer::start().await;
        listing(&server, json!([{"id": 5, "pipeline_id": 1, "status_id": 10}])).await;

        let engine = engine(&server);
        let campaign = expiring(&engine, ("1", "10"), 30).await;
        clock(&engine)
            .record(&campaign.id, "left-already", Utc::now())
            .await
            .unwrap();

        engine.sweep.run().await;
        let entries = clock(&engine).entries(&campaign.id).await.unwrap();
        assert!(entries.contains_key("5"));
        assert!(!entries.contains_key("left-already"));
    }

    #[tokio::test]
    async fn test_listing_failure_is_contained() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let engine = engine(&server);
        let campaign = expiring(&engine, ("1", "10"), 1).await;

        let report = engine.sweep.run().await;
        assert_eq!(report.campaigns_checked, 1);
        assert_eq!(report.campaign(&campaign.id).unwrap().errors.len(), 1);
        assert_eq!(report.errors.len(), 1);
    }
}
