//! Engine entry points.
//!
//! - `ExpirationSweep`: scheduled expiry of stale base-stage cards
//! - `EventRouter`: trigger matching and card moves for inbound chat events
//!
//! [`Engine`] wires both, plus the registry and CRM handles, over one
//! shared store and one HTTP client.

pub mod route;
pub mod sweep;

use std::sync::Arc;

pub use route::{ChatEvent, EventRouter, RouteOutcome};
pub use sweep::ExpirationSweep;

use crate::campaigns::{CampaignRegistry, StageClock};
use crate::crm::{CardLocator, CardMover, CrmClient};
use crate::error::Result;
use crate::models::Config;
use crate::storage::KvStore;

/// Every component, constructed once per process.
pub struct Engine {
    pub registry: CampaignRegistry,
    pub locator: Arc<CardLocator>,
    pub mover: CardMover,
    pub sweep: ExpirationSweep,
    pub router: EventRouter,
}

impl Engine {
    pub fn new(config: &Config, store: Arc<dyn KvStore>) -> Result<Self> {
        let client = CrmClient::new(&config.crm)?;
        let registry = CampaignRegistry::new(Arc::clone(&store));
        let clock = StageClock::new(store);
        let locator = Arc::new(CardLocator::new(client.clone()));
        let mover = CardMover::new(client);

        let sweep = ExpirationSweep::new(
            registry.clone(),
            clock.clone(),
            Arc::clone(&locator),
            mover.clone(),
            config.sweep.clone(),
        );
        let router = EventRouter::new(
            registry.clone(),
            clock,
            Arc::clone(&locator),
            mover.clone(),
            config.locator.search_options(),
            config.storage.event_log_limit,
        );

        Ok(Self {
            registry,
            locator,
            mover,
            sweep,
            router,
        })
    }
}
