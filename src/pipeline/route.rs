// src/pipeline/route.rs

//! Inbound chat event routing.
//!
//! An event's text is matched against the live campaigns' triggers; the
//! winning campaign's card is located in its base stage and moved to the
//! variant's target.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::campaigns::{CampaignRegistry, StageClock, keys};
use crate::crm::{CardLocator, CardMover, MoveOutcome};
use crate::error::Result;
use crate::matching::matching_variant;
use crate::models::{CardNeedle, ScopeKind, SearchOptions, SearchScope, StagePair, Variant};

/// Already-parsed chat platform event.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatEvent {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// What happened to one event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    /// No live campaign trigger fired.
    NoMatch,
    /// A trigger fired but the card is not in the campaign's base stage.
    CardNotFound { campaign_id: String, variant: Variant },
    Moved {
        campaign_id: String,
        variant: Variant,
        card_id: String,
        target: StagePair,
        count: u64,
    },
    /// The card disappeared between lookup and move.
    CardMissing {
        campaign_id: String,
        variant: Variant,
        card_id: String,
    },
}

#[derive(Serialize)]
struct LoggedEvent<'a> {
    received_at: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a ChatEvent,
}

pub struct EventRouter {
    registry: CampaignRegistry,
    clock: StageClock,
    locator: Arc<CardLocator>,
    mover: CardMover,
    options: SearchOptions,
    event_log_limit: usize,
}

impl EventRouter {
    pub fn new(
        registry: CampaignRegistry,
        clock: StageClock,
        locator: Arc<CardLocator>,
        mover: CardMover,
        options: SearchOptions,
        event_log_limit: usize,
    ) -> Self {
        Self {
            registry,
            clock,
            locator,
            mover,
            options,
            event_log_limit,
        }
    }

    pub async fn handle(&self, event: &ChatEvent) -> Result<RouteOutcome> {
        let now = Utc::now();
        self.log_event(event, now).await?;

        let campaigns = self.registry.list(true).await?;
        let Some((campaign, variant, step)) = campaigns.iter().find_map(|c| {
            matching_variant(c, event.text.as_deref()).map(|(variant, step)| (c, variant, step))
        }) else {
            log::debug!("No campaign trigger matched the event text");
            return Ok(RouteOutcome::NoMatch);
        };
        log::info!("Event matched campaign {} ({:?})", campaign.label(), variant);

        let scope = SearchScope {
            kind: ScopeKind::Campaign,
            pipeline_id: campaign.base.as_ref().map(|b| b.pipeline_id.clone()),
            status_id: campaign.base.as_ref().map(|b| b.status_id.clone()),
        };
        let needle = CardNeedle::new(event.username.as_deref(), event.full_name.as_deref());
        let Some(card) = self.locator.find(&needle, &scope, &self.options).await? else {
            log::info!("No card found for the event in campaign {}", campaign.label());
            return Ok(RouteOutcome::CardNotFound {
                campaign_id: campaign.id.clone(),
                variant,
            });
        };

        match self.mover.move_card(&card.id, &step.target).await? {
            MoveOutcome::Missing => Ok(RouteOutcome::CardMissing {
                campaign_id: campaign.id.clone(),
                variant,
                card_id: card.id,
            }),
            MoveOutcome::Moved => {
                let count = self
                    .registry
                    .increment_counter(&campaign.id, variant.into())
                    .await?;

                for owner in campaigns
                    .iter()
                    .filter(|c| c.base.as_ref() == Some(&step.target))
                {
                    self.clock.record(&owner.id, &card.id, now).await?;
                }

                Ok(RouteOutcome::Moved {
                    campaign_id: campaign.id.clone(),
                    variant,
                    card_id: card.id,
                    target: step.target.clone(),
                    count,
                })
            }
        }
    }

    async fn log_event(&self, event: &ChatEvent, received_at: DateTime<Utc>) -> Result<()> {
        let line = serde_json::to_string(&LoggedEvent { received_at, event })?;
        let store = self.registry.store();
        store.list_push(keys::CHAT_EVENTS, &line).await?;
        let limit = self.event_log_limit.max(1) as i64;
        store.list_trim(keys::CHAT_EVENTS, -limit, -1).await
    }
}
