//! External CRM access: listing pages, locating cards, moving them.

pub mod client;
pub mod locator;
pub mod mover;
pub mod pagination;

pub use client::{CrmClient, MoveOutcome};
pub use locator::{CardLocator, Collected};
pub use mover::CardMover;
pub use pagination::PaginationStyle;
