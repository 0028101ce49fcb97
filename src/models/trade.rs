//! Trade event model: an admin-entered outcome of a trader on a market.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DeskError, DeskResult};

use super::ledger::round_money;

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "buy",
            TradeDirection::Sell => "sell",
        }
    }
}

impl FromStr for TradeDirection {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(DeskError::UnknownVariant {
                kind: "trade direction",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade event status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
        }
    }
}

impl FromStr for TradeStatus {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(DeskError::UnknownVariant {
                kind: "trade status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trader's trade as entered by an administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub id: i64,

    pub trader_id: i64,

    /// Unique reference, e.g. "TRD-7K2M9QX4ABCD"
    pub reference: String,

    /// Market symbol, e.g. "AAPL" or "EUR/USD"
    pub market: String,

    pub direction: TradeDirection,

    /// Free-form duration, e.g. "5 minutes"
    #[serde(default)]
    pub duration: String,

    /// Base amount the trader put in
    pub amount: Decimal,

    pub entry_price: Decimal,

    pub exit_price: Option<Decimal>,

    /// Outcome as a percentage, e.g. 10.00 or -20.00
    pub profit_loss_percent: Decimal,

    pub status: TradeStatus,

    #[serde(default)]
    pub notes: String,

    pub opened_at: DateTime<Utc>,

    pub closed_at: Option<DateTime<Utc>>,

    /// Set once copiers have been credited for this event
    pub settled_at: Option<DateTime<Utc>>,

    /// Number of copiers credited at settlement
    pub settled_copiers: Option<i64>,
}

impl TradeEvent {
    /// Profit or loss for a copier who locked in `investment`.
    pub fn user_profit_loss(&self, investment: Decimal) -> DeskResult<Decimal> {
        if self.profit_loss_percent.is_zero() {
            return Ok(Decimal::ZERO);
        }
        investment
            .checked_mul(self.profit_loss_percent)
            .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
            .map(round_money)
            .ok_or_else(|| {
                DeskError::Overflow(format!("{} at {}%", investment, self.profit_loss_percent))
            })
    }

    pub fn is_profit(&self) -> bool {
        self.profit_loss_percent > Decimal::ZERO
    }

    pub fn is_settled(&self) -> bool {
        self.settled_at.is_some()
    }

    /// Short relative age, e.g. "5m ago".
    pub fn time_ago(&self, now: DateTime<Utc>) -> String {
        let diff = now - self.opened_at;
        if diff < chrono::Duration::minutes(1) {
            "just now".to_string()
        } else if diff < chrono::Duration::hours(1) {
            format!("{}m ago", diff.num_minutes())
        } else if diff < chrono::Duration::days(1) {
            format!("{}h ago", diff.num_hours())
        } else if diff < chrono::Duration::weeks(1) {
            format!("{}d ago", diff.num_days())
        } else {
            format!("{}w ago", diff.num_weeks())
        }
    }
}

/// Fields for recording a trade event.
#[derive(Debug, Clone)]
pub struct NewTradeEvent {
    pub trader_id: i64,
    pub market: String,
    pub direction: TradeDirection,
    pub duration: String,
    pub amount: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub profit_loss_percent: Decimal,
    pub status: TradeStatus,
    pub notes: String,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Percentages at or beyond this magnitude are rejected.
pub const MAX_PROFIT_LOSS_PERCENT: Decimal = dec!(100000000);

/// Round an admin-typed P/L percentage to cents and bound its magnitude.
pub fn validate_percent(percent: Decimal) -> DeskResult<Decimal> {
    let percent = round_money(percent);
    if percent.abs() >= MAX_PROFIT_LOSS_PERCENT {
        return Err(DeskError::InvalidAmount(percent));
    }
    Ok(percent)
}

/// Edit applied to a stored trade event. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct TradeEventUpdate {
    pub market: Option<String>,
    pub direction: Option<TradeDirection>,
    pub duration: Option<String>,
    pub amount: Option<Decimal>,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub profit_loss_percent: Option<Decimal>,
    pub status: Option<TradeStatus>,
    pub notes: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TradeEventUpdate {
    /// Shorthand for the admin "close at X%" action.
    pub fn close(profit_loss_percent: Decimal, exit_price: Option<Decimal>) -> Self {
        Self {
            profit_loss_percent: Some(profit_loss_percent),
            exit_price,
            status: Some(TradeStatus::Closed),
            ..Default::default()
        }
    }

    /// Apply the edit to `event`, stamping `closed_at` when it closes.
    pub fn apply_to(self, event: &mut TradeEvent, now: DateTime<Utc>) {
        if let Some(market) = self.market {
            event.market = market;
        }
        if let Some(direction) = self.direction {
            event.direction = direction;
        }
        if let Some(duration) = self.duration {
            event.duration = duration;
        }
        if let Some(amount) = self.amount {
            event.amount = amount;
        }
        if let Some(entry_price) = self.entry_price {
            event.entry_price = entry_price;
        }
        if self.exit_price.is_some() {
            event.exit_price = self.exit_price;
        }
        if let Some(pct) = self.profit_loss_percent {
            event.profit_loss_percent = pct;
        }
        if self.closed_at.is_some() {
            event.closed_at = self.closed_at;
        }
        if let Some(status) = self.status {
            event.status = status;
        }
        if event.status == TradeStatus::Closed && event.closed_at.is_none() {
            event.closed_at = Some(now);
        }
    }
}

/// Generate a trade reference like "TRD-7K2M9QX4ABCD".
pub fn generate_reference(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{}-{}", prefix, &id[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event(pct: Decimal) -> TradeEvent {
        TradeEvent {
            id: 1,
            trader_id: 1,
            reference: "TRD-TEST".to_string(),
            market: "AAPL".to_string(),
            direction: TradeDirection::Buy,
            duration: "5 minutes".to_string(),
            amount: dec!(1000),
            entry_price: dec!(180.50),
            exit_price: None,
            profit_loss_percent: pct,
            status: TradeStatus::Open,
            notes: String::new(),
            opened_at: Utc::now(),
            closed_at: None,
            settled_at: None,
            settled_copiers: None,
        }
    }

    #[test]
    fn test_user_profit_loss() {
        let gain = event(dec!(10.00));
        assert_eq!(gain.user_profit_loss(dec!(1000)).unwrap(), dec!(100.00));
        assert_eq!(gain.user_profit_loss(dec!(5000)).unwrap(), dec!(500.00));

        let loss = event(dec!(-20.00));
        assert_eq!(loss.user_profit_loss(dec!(1000)).unwrap(), dec!(-200.00));
        assert_eq!(loss.user_profit_loss(dec!(5000)).unwrap(), dec!(-1000.00));

        assert_eq!(event(Decimal::ZERO).user_profit_loss(dec!(1000)).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_user_profit_loss_rounds_to_cents() {
        // 333.33 * 1.5% = 4.99995
        assert_eq!(event(dec!(1.5)).user_profit_loss(dec!(333.33)).unwrap(), dec!(5.00));
    }

    #[test]
    fn test_user_profit_loss_overflow_is_an_error() {
        let huge = event(dec!(100000000000000000000000000));
        assert!(matches!(
            huge.user_profit_loss(dec!(1000)),
            Err(DeskError::Overflow(_))
        ));
    }

    #[test]
    fn test_validate_percent() {
        assert_eq!(validate_percent(dec!(12.345)).unwrap(), dec!(12.35));
        assert_eq!(validate_percent(dec!(-99999999.99)).unwrap(), dec!(-99999999.99));
        assert!(matches!(
            validate_percent(dec!(100000000)),
            Err(DeskError::InvalidAmount(_))
        ));
        assert!(matches!(
            validate_percent(dec!(-100000000000000000000000000)),
            Err(DeskError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_close_update_stamps_closed_at() {
        let mut e = event(Decimal::ZERO);
        let now = Utc::now();
        TradeEventUpdate::close(dec!(10), Some(dec!(190))).apply_to(&mut e, now);

        assert_eq!(e.status, TradeStatus::Closed);
        assert_eq!(e.closed_at, Some(now));
        assert_eq!(e.exit_price, Some(dec!(190)));
        assert_eq!(e.profit_loss_percent, dec!(10));
    }

    #[test]
    fn test_reference_format() {
        let reference = generate_reference("TRD");
        assert!(reference.starts_with("TRD-"));
        assert_eq!(reference.len(), 16);
        assert_eq!(reference, reference.to_uppercase());
    }

    #[test]
    fn test_time_ago() {
        let mut e = event(Decimal::ZERO);
        let now = Utc::now();
        e.opened_at = now - chrono::Duration::minutes(5);
        assert_eq!(e.time_ago(now), "5m ago");
        e.opened_at = now - chrono::Duration::days(15);
        assert_eq!(e.time_ago(now), "2w ago");
    }
}
