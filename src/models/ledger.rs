//! Ledger entries and the balance fold.
//!
//! An account's balance and profit are never stored directly. Each money
//! movement is a signed entry, and the current figures are the sum of all
//! entries for the account.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DeskError, DeskResult};

/// Decimal places kept for persisted monetary amounts.
pub const MONEY_SCALE: u32 = 2;

/// Round a computed amount to cents, halves away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// What caused a ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    CopyTrade,
    Transfer,
    Earnings,
    Adjustment,
    StockBuy,
    StockSell,
    SignalPurchase,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Deposit => "deposit",
            EntryKind::Withdrawal => "withdrawal",
            EntryKind::CopyTrade => "copy_trade",
            EntryKind::Transfer => "transfer",
            EntryKind::Earnings => "earnings",
            EntryKind::Adjustment => "adjustment",
            EntryKind::StockBuy => "stock_buy",
            EntryKind::StockSell => "stock_sell",
            EntryKind::SignalPurchase => "signal_purchase",
        }
    }
}

impl FromStr for EntryKind {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            "copy_trade" => Ok(Self::CopyTrade),
            "transfer" => Ok(Self::Transfer),
            "earnings" => Ok(Self::Earnings),
            "adjustment" => Ok(Self::Adjustment),
            "stock_buy" => Ok(Self::StockBuy),
            "stock_sell" => Ok(Self::StockSell),
            "signal_purchase" => Ok(Self::SignalPurchase),
            other => Err(DeskError::UnknownVariant {
                kind: "ledger entry kind",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a balance/profit transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    BalanceToProfit,
    ProfitToBalance,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::BalanceToProfit => "balance_to_profit",
            TransferDirection::ProfitToBalance => "profit_to_balance",
        }
    }
}

impl FromStr for TransferDirection {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balance_to_profit" => Ok(Self::BalanceToProfit),
            "profit_to_balance" => Ok(Self::ProfitToBalance),
            other => Err(DeskError::UnknownVariant {
                kind: "transfer direction",
                value: other.to_string(),
            }),
        }
    }
}

/// A persisted ledger movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: i64,
    pub kind: EntryKind,
    pub balance_delta: Decimal,
    pub profit_delta: Decimal,
    pub trade_event_id: Option<i64>,
    pub funding_request_id: Option<i64>,
    pub memo: String,
    pub created_at: DateTime<Utc>,
}

/// A ledger movement about to be posted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub kind: EntryKind,
    pub balance_delta: Decimal,
    pub profit_delta: Decimal,
    pub trade_event_id: Option<i64>,
    pub funding_request_id: Option<i64>,
    pub memo: String,
}

impl NewLedgerEntry {
    fn new(kind: EntryKind, balance_delta: Decimal, profit_delta: Decimal, memo: String) -> Self {
        Self {
            kind,
            balance_delta: round_money(balance_delta),
            profit_delta: round_money(profit_delta),
            trade_event_id: None,
            funding_request_id: None,
            memo,
        }
    }

    pub fn deposit(amount: Decimal, request_id: i64, reference: &str) -> Self {
        let mut entry = Self::new(EntryKind::Deposit, amount, Decimal::ZERO, format!("Deposit {}", reference));
        entry.funding_request_id = Some(request_id);
        entry
    }

    pub fn withdrawal(amount: Decimal, request_id: i64, reference: &str) -> Self {
        let mut entry =
            Self::new(EntryKind::Withdrawal, -amount, Decimal::ZERO, format!("Withdrawal {}", reference));
        entry.funding_request_id = Some(request_id);
        entry
    }

    /// Copy-trade settlement: balance and profit move together.
    pub fn copy_trade(amount: Decimal, trade_event_id: i64, reference: &str) -> Self {
        let mut entry = Self::new(EntryKind::CopyTrade, amount, amount, format!("Copy trade {}", reference));
        entry.trade_event_id = Some(trade_event_id);
        entry
    }

    pub fn transfer(direction: TransferDirection, amount: Decimal) -> Self {
        let (balance, profit) = match direction {
            TransferDirection::BalanceToProfit => (-amount, amount),
            TransferDirection::ProfitToBalance => (amount, -amount),
        };
        Self::new(EntryKind::Transfer, balance, profit, direction.as_str().to_string())
    }

    pub fn earnings(amount: Decimal, request_id: i64, description: &str) -> Self {
        let mut entry = Self::new(EntryKind::Earnings, amount, Decimal::ZERO, description.to_string());
        entry.funding_request_id = Some(request_id);
        entry
    }

    pub fn adjustment(balance_delta: Decimal, profit_delta: Decimal, memo: &str) -> Self {
        Self::new(EntryKind::Adjustment, balance_delta, profit_delta, memo.to_string())
    }

    pub fn stock_buy(cost: Decimal, symbol: &str, reference: &str) -> Self {
        Self::new(EntryKind::StockBuy, -cost, Decimal::ZERO, format!("Buy {} {}", symbol, reference))
    }

    pub fn stock_sell(proceeds: Decimal, symbol: &str, reference: &str) -> Self {
        Self::new(EntryKind::StockSell, proceeds, Decimal::ZERO, format!("Sell {} {}", symbol, reference))
    }

    pub fn signal_purchase(price: Decimal, signal_name: &str, reference: &str) -> Self {
        Self::new(
            EntryKind::SignalPurchase,
            -price,
            Decimal::ZERO,
            format!("Signal {} {}", signal_name, reference),
        )
    }
}

/// Current balance and profit of an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub balance: Decimal,
    pub profit: Decimal,
}

impl Balances {
    /// Sum a sequence of `(balance_delta, profit_delta)` pairs.
    pub fn fold<I>(deltas: I) -> DeskResult<Self>
    where
        I: IntoIterator<Item = (Decimal, Decimal)>,
    {
        deltas
            .into_iter()
            .try_fold(Self::default(), |acc, (balance, profit)| {
                Ok(Self {
                    balance: checked_sum(acc.balance, balance)?,
                    profit: checked_sum(acc.profit, profit)?,
                })
            })
    }

    /// Balances after posting `entry`.
    pub fn apply(&self, entry: &NewLedgerEntry) -> DeskResult<Self> {
        Self::fold([
            (self.balance, self.profit),
            (entry.balance_delta, entry.profit_delta),
        ])
    }
}

fn checked_sum(a: Decimal, b: Decimal) -> DeskResult<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| DeskError::Overflow(format!("{} + {}", a, b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_money_half_away_from_zero() {
        assert_eq!(round_money(dec!(10.005)), dec!(10.01));
        assert_eq!(round_money(dec!(-10.005)), dec!(-10.01));
        assert_eq!(round_money(dec!(3.3333)), dec!(3.33));
    }

    #[test]
    fn test_fold_sums_both_columns() {
        let balances = Balances::fold(vec![
            (dec!(1000), dec!(0)),     // deposit
            (dec!(100), dec!(100)),    // copy trade gain
            (dec!(-50), dec!(50)),     // transfer to profit
            (dec!(-200), dec!(-200)),  // copy trade loss
        ])
        .unwrap();

        assert_eq!(balances.balance, dec!(850));
        assert_eq!(balances.profit, dec!(-50));
    }

    #[test]
    fn test_transfer_entry_moves_between_columns() {
        let entry = NewLedgerEntry::transfer(TransferDirection::BalanceToProfit, dec!(25));
        assert_eq!(entry.balance_delta, dec!(-25));
        assert_eq!(entry.profit_delta, dec!(25));

        let after = Balances { balance: dec!(100), profit: dec!(0) }.apply(&entry).unwrap();
        assert_eq!(after, Balances { balance: dec!(75), profit: dec!(25) });
    }

    #[test]
    fn test_copy_trade_entry_credits_balance_and_profit() {
        let entry = NewLedgerEntry::copy_trade(dec!(-200.00), 7, "TRD-ABC");
        assert_eq!(entry.kind, EntryKind::CopyTrade);
        assert_eq!(entry.balance_delta, dec!(-200.00));
        assert_eq!(entry.profit_delta, dec!(-200.00));
        assert_eq!(entry.trade_event_id, Some(7));
    }

    #[test]
    fn test_stock_entries_touch_balance_only() {
        let buy = NewLedgerEntry::stock_buy(dec!(1500), "AAPL", "BUY-0123456789AB");
        assert_eq!(buy.kind, EntryKind::StockBuy);
        assert_eq!((buy.balance_delta, buy.profit_delta), (dec!(-1500), dec!(0)));

        let sell = NewLedgerEntry::stock_sell(dec!(1600), "AAPL", "SELL-0123456789AB");
        assert_eq!((sell.balance_delta, sell.profit_delta), (dec!(1600), dec!(0)));
        assert_eq!(sell.memo, "Sell AAPL SELL-0123456789AB");
    }

    #[test]
    fn test_fold_overflow_is_an_error() {
        let result = Balances::fold(vec![(Decimal::MAX, dec!(0)), (dec!(1), dec!(0))]);
        assert!(matches!(result, Err(DeskError::Overflow(_))));
    }

    #[test]
    fn test_entry_kind_parse() {
        assert_eq!("copy_trade".parse::<EntryKind>().ok(), Some(EntryKind::CopyTrade));
        assert_eq!("stock_buy".parse::<EntryKind>().ok(), Some(EntryKind::StockBuy));
        assert_eq!("signal_purchase".parse::<EntryKind>().ok(), Some(EntryKind::SignalPurchase));
        assert!("bonus".parse::<EntryKind>().is_err());
    }
}
