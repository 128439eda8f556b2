//! Business parameters shared by the workflow managers.

use chrono::Duration;
use rust_decimal::{Decimal, dec};

/// Workflow configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    /// EUR value of one coin
    pub coin_to_eur_rate: Decimal,
    /// Coins credited to a referrer on the referred user's first funding
    pub referral_bonus_coins: Decimal,
    /// Smallest payout a tutor may request
    pub min_payout_coins: Decimal,
    /// How long after accepting a tutor may still cancel
    pub tutor_cancel_window: Duration,
    /// Age limit of payout requests picked up by a settlement run
    pub payout_window: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            coin_to_eur_rate: dec!(1),
            referral_bonus_coins: dec!(5),
            min_payout_coins: dec!(10),
            tutor_cancel_window: Duration::hours(24),
            payout_window: Duration::days(30),
        }
    }
}
