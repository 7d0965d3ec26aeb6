//! Campaign storage: records, counters, and the base-stage entry clock.
//!
//! All state lives in the injected [`KvStore`](crate::storage::KvStore).
//!
//! ## Key Layout
//!
//! ```text
//! campaign:{id}                     # record JSON (schema_version 2, or legacy)
//! campaign:{id}:count:{v1|v2|exp}   # atomic counters added to the record baseline
//! campaign:{id}:stage_entries       # sorted set: card id -> base-stage entry ms
//! campaigns:index                   # sorted set: campaign id -> created ms
//! campaigns:audit                   # list of audit lines
//! ```

pub mod legacy;
pub mod registry;
pub mod stage_clock;

pub use legacy::{StoredCampaign, decode};
pub use registry::CampaignRegistry;
pub use stage_clock::StageClock;

pub mod keys {
    use crate::models::CounterKind;

    pub const INDEX: &str = "campaigns:index";
    pub const AUDIT: &str = "campaigns:audit";
    pub const CHAT_EVENTS: &str = "events:chat";

    pub fn record(id: &str) -> String {
        format!("campaign:{id}")
    }

    pub fn counter(id: &str, kind: CounterKind) -> String {
        format!("campaign:{id}:count:{}", kind.as_str())
    }

    pub fn stage_entries(id: &str) -> String {
        format!("campaign:{id}:stage_entries")
    }

    pub fn sweep_lock(card_id: &str) -> String {
        format!("sweep:lock:{card_id}")
    }
}
