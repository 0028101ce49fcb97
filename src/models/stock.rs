//! Listed stocks, user positions and the stock fill history.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DeskError, DeskResult};

use super::ledger::round_money;

/// Decimal places kept for share quantities.
pub const SHARE_SCALE: u32 = 8;

/// A stock users can buy at its admin-set price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stock {
    pub id: i64,

    /// Ticker, upper-case (e.g. "AAPL")
    pub symbol: String,

    pub name: String,
    pub sector: String,

    /// Current price per share
    pub price: Decimal,

    /// Move since the previous price
    pub change: Decimal,
    pub change_percent: Decimal,

    pub is_active: bool,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Stock {
    pub fn is_positive_change(&self) -> bool {
        self.change > Decimal::ZERO
    }
}

/// Fields for listing a stock.
#[derive(Debug, Clone, Default)]
pub struct NewStock {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub price: Decimal,
    pub is_featured: bool,
}

/// Side of a stock fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockSide {
    Buy,
    Sell,
}

impl StockSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockSide::Buy => "buy",
            StockSide::Sell => "sell",
        }
    }
}

impl FromStr for StockSide {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(DeskError::UnknownVariant {
                kind: "stock side",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for StockSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shares an account holds in one stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockPosition {
    pub id: i64,
    pub account_id: i64,
    pub stock_id: i64,
    pub symbol: String,

    pub shares: Decimal,
    pub average_buy_price: Decimal,
    pub total_invested: Decimal,

    /// Price of the stock when the position was read
    pub current_price: Decimal,

    pub is_active: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl StockPosition {
    pub fn holding(&self) -> Holding {
        Holding {
            shares: self.shares,
            total_invested: self.total_invested,
        }
    }

    pub fn current_value(&self) -> DeskResult<Decimal> {
        share_value(self.shares, self.current_price)
    }

    pub fn profit_loss(&self) -> DeskResult<Decimal> {
        Ok(self.current_value()? - self.total_invested)
    }

    pub fn profit_loss_percent(&self) -> DeskResult<Decimal> {
        if self.total_invested.is_zero() {
            return Ok(Decimal::ZERO);
        }
        self.profit_loss()?
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|v| v.checked_div(self.total_invested))
            .map(round_money)
            .ok_or_else(|| DeskError::Overflow(format!("P/L percent of position {}", self.id)))
    }
}

/// Share count and cost basis of a position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Holding {
    pub shares: Decimal,
    pub total_invested: Decimal,
}

/// Result of selling part or all of a holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sale {
    pub proceeds: Decimal,
    pub cost_basis: Decimal,
    pub profit_loss: Decimal,
    pub remaining: Holding,
}

impl Holding {
    /// Cost per share, to cents.
    pub fn average_price(&self) -> DeskResult<Decimal> {
        if self.shares.is_zero() {
            return Ok(Decimal::ZERO);
        }
        self.total_invested
            .checked_div(self.shares)
            .map(round_money)
            .ok_or_else(|| DeskError::Overflow(format!("{} / {} shares", self.total_invested, self.shares)))
    }

    /// Holding after buying `shares` for `cost`.
    pub fn buy(&self, shares: Decimal, cost: Decimal) -> DeskResult<Holding> {
        Ok(Holding {
            shares: self
                .shares
                .checked_add(shares)
                .ok_or_else(|| DeskError::Overflow(format!("{} + {} shares", self.shares, shares)))?,
            total_invested: self
                .total_invested
                .checked_add(cost)
                .ok_or_else(|| DeskError::Overflow(format!("{} + {}", self.total_invested, cost)))?,
        })
    }

    /// Sell `shares` for `proceeds`. Cost basis is taken pro rata; selling
    /// everything releases the whole invested amount.
    pub fn sell(&self, shares: Decimal, proceeds: Decimal) -> DeskResult<Sale> {
        if shares > self.shares {
            return Err(DeskError::InsufficientShares {
                requested: shares,
                available: self.shares,
            });
        }

        let cost_basis = if shares == self.shares {
            self.total_invested
        } else {
            self.total_invested
                .checked_mul(shares)
                .and_then(|v| v.checked_div(self.shares))
                .map(round_money)
                .ok_or_else(|| DeskError::Overflow(format!("cost basis of {} shares", shares)))?
        };

        Ok(Sale {
            proceeds,
            cost_basis,
            profit_loss: proceeds - cost_basis,
            remaining: Holding {
                shares: self.shares - shares,
                total_invested: self.total_invested - cost_basis,
            },
        })
    }
}

/// One buy or sell of stock by an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockTrade {
    pub id: i64,
    pub account_id: i64,
    pub stock_id: i64,
    pub symbol: String,
    pub side: StockSide,
    pub shares: Decimal,
    pub price_per_share: Decimal,
    pub total_amount: Decimal,

    /// Realised P/L, sells only
    pub profit_loss: Option<Decimal>,

    /// "BUY-..." or "SELL-..."
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

/// Round a share quantity and require it to be positive.
pub fn validate_shares(shares: Decimal) -> DeskResult<Decimal> {
    let shares = shares.round_dp_with_strategy(SHARE_SCALE, RoundingStrategy::ToZero);
    if shares <= Decimal::ZERO {
        return Err(DeskError::InvalidAmount(shares));
    }
    Ok(shares)
}

/// `shares * price`, to cents.
pub fn share_value(shares: Decimal, price: Decimal) -> DeskResult<Decimal> {
    shares
        .checked_mul(price)
        .map(round_money)
        .ok_or_else(|| DeskError::Overflow(format!("{} shares at {}", shares, price)))
}

/// Upper-case ticker with surrounding whitespace removed.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_buy_averages_cost() {
        let first = Holding::default().buy(dec!(10), dec!(1000)).unwrap();
        let second = first.buy(dec!(10), dec!(1200)).unwrap();

        assert_eq!(second, Holding { shares: dec!(20), total_invested: dec!(2200) });
        assert_eq!(second.average_price().unwrap(), dec!(110));
    }

    #[test]
    fn test_partial_sale_uses_pro_rata_cost() {
        let holding = Holding { shares: dec!(20), total_invested: dec!(2200) };
        let sale = holding.sell(dec!(5), dec!(650)).unwrap();

        assert_eq!(sale.cost_basis, dec!(550));
        assert_eq!(sale.profit_loss, dec!(100));
        assert_eq!(sale.remaining, Holding { shares: dec!(15), total_invested: dec!(1650) });
    }

    #[test]
    fn test_full_sale_releases_everything() {
        let holding = Holding { shares: dec!(3), total_invested: dec!(100) };
        let sale = holding.sell(dec!(3), dec!(90)).unwrap();

        assert_eq!(sale.cost_basis, dec!(100));
        assert_eq!(sale.profit_loss, dec!(-10));
        assert_eq!(sale.remaining, Holding::default());
    }

    #[test]
    fn test_oversell_rejected() {
        let holding = Holding { shares: dec!(2), total_invested: dec!(100) };
        assert!(matches!(
            holding.sell(dec!(2.5), dec!(125)),
            Err(DeskError::InsufficientShares { .. })
        ));
    }

    #[test]
    fn test_validate_shares() {
        assert_eq!(validate_shares(dec!(1.123456789)).unwrap(), dec!(1.12345678));
        assert!(validate_shares(dec!(0)).is_err());
        assert!(validate_shares(dec!(-1)).is_err());
        assert!(validate_shares(dec!(0.000000001)).is_err());
    }

    #[test]
    fn test_share_value_rounds_and_checks() {
        assert_eq!(share_value(dec!(0.5), dec!(10.01)).unwrap(), dec!(5.01));
        assert!(matches!(
            share_value(Decimal::MAX, dec!(2)),
            Err(DeskError::Overflow(_))
        ));
    }
}
