//! Copy relationship between an account and a trader.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One row per (account, trader). Stopping deactivates the row; copying
/// again reactivates the same row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyRelationship {
    pub id: i64,
    pub account_id: i64,
    pub trader_id: i64,

    pub is_active: bool,

    /// Balance locked in when copying started; scales every P/L credit
    pub initial_investment_amount: Decimal,

    /// Trader's threshold at the time copying started (reference only)
    pub minimum_threshold_at_start: Decimal,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
}

/// An active copier of a trader, as needed for settlement.
#[derive(Debug, Clone)]
pub struct Copier {
    pub relationship_id: i64,
    pub account_id: i64,
    pub email: String,
    pub initial_investment_amount: Decimal,
}

/// Active relationship joined with the trader it follows.
#[derive(Debug, Clone, Serialize)]
pub struct FollowedTrader {
    pub relationship: CopyRelationship,
    pub trader_name: String,
    pub trader_username: String,
}
