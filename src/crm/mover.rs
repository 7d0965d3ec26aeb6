// src/crm/mover.rs

//! Stage transitions for CRM cards.

use crate::crm::client::{CrmClient, MoveOutcome};
use crate::error::{AppError, Result};
use crate::models::StagePair;

/// Relocates cards. No retries: callers decide what to do with a failure.
#[derive(Clone)]
pub struct CardMover {
    client: CrmClient,
}

impl CardMover {
    pub fn new(client: CrmClient) -> Self {
        Self { client }
    }

    /// Move `card_id` to `target`.
    ///
    /// Moving a card that already sits at `target` is a plain success. A card
    /// that vanished from the CRM yields [`MoveOutcome::Missing`].
    pub async fn move_card(&self, card_id: &str, target: &StagePair) -> Result<MoveOutcome> {
        if card_id.trim().is_empty() {
            return Err(AppError::validation("card id is empty"));
        }
        if !target.is_usable() {
            return Err(AppError::validation(format!(
                "move target '{target}' needs both pipeline_id and status_id"
            )));
        }

        let outcome = self.client.update_stage(card_id.trim(), target).await?;
        match outcome {
            MoveOutcome::Moved => log::info!("Moved card {} to {}", card_id, target),
            MoveOutcome::Missing => log::info!("Card {} is gone from the CRM, nothing to move", card_id),
        }
        Ok(outcome)
    }
}
