//! User notifications and the messages the desk sends.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::DeskError;

use super::signal::Signal;
use super::stock::{Sale, StockTrade};
use super::trade::TradeEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Trade,
    Deposit,
    Withdrawal,
    Alert,
    System,
    News,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Trade => "trade",
            NotificationKind::Deposit => "deposit",
            NotificationKind::Withdrawal => "withdrawal",
            NotificationKind::Alert => "alert",
            NotificationKind::System => "system",
            NotificationKind::News => "news",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trade" => Ok(Self::Trade),
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            "alert" => Ok(Self::Alert),
            "system" => Ok(Self::System),
            "news" => Ok(Self::News),
            other => Err(DeskError::UnknownVariant {
                kind: "notification kind",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub account_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub full_details: String,
    pub metadata: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// One page of an account's notifications.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub total_count: i64,
    pub unread_count: i64,
}

/// Notification about to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub full_details: String,
    pub metadata: serde_json::Value,
}

impl NewNotification {
    fn new(kind: NotificationKind, title: String, message: String, full_details: String) -> Self {
        Self {
            kind,
            title,
            message,
            full_details,
            metadata: json!({}),
        }
    }

    fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Copier credited (or debited) by a closed trade.
    pub fn copy_trade_settled(
        trader_name: &str,
        event: &TradeEvent,
        investment: Decimal,
        profit_loss: Decimal,
    ) -> Self {
        let gained = profit_loss >= Decimal::ZERO;
        let title = if gained {
            format!("Trade Profit from {}!", trader_name)
        } else {
            format!("Trade Update from {}", trader_name)
        };
        let message = format!(
            "Copy trade on {} {} ${}",
            event.market,
            if gained { "gained" } else { "lost" },
            profit_loss.abs()
        );
        let details = format!(
            "Trader: {}\nMarket: {}\nDirection: {}\nYour Investment: ${}\nP/L: ${} ({}%)\nStatus: Closed",
            trader_name,
            event.market,
            event.direction.as_str().to_uppercase(),
            investment,
            profit_loss,
            event.profit_loss_percent
        );

        Self::new(NotificationKind::Trade, title, message, details).with_metadata(json!({
            "trade_reference": event.reference,
            "market": event.market,
            "investment": investment.to_string(),
            "profit_loss": profit_loss.to_string(),
            "profit_loss_percent": event.profit_loss_percent.to_string(),
        }))
    }

    /// Copier told that a followed trader opened a position.
    pub fn trade_opened(trader_name: &str, event: &TradeEvent, investment: Decimal) -> Self {
        let title = format!("New Trade from {}", trader_name);
        let message = format!(
            "{} opened a {} trade on {}",
            trader_name,
            event.direction.as_str().to_uppercase(),
            event.market
        );
        let details = format!(
            "Trader: {}\nMarket: {}\nDirection: {}\nYour Investment: ${}\nStatus: Open",
            trader_name,
            event.market,
            event.direction.as_str().to_uppercase(),
            investment
        );

        Self::new(NotificationKind::Trade, title, message, details).with_metadata(json!({
            "trade_reference": event.reference,
            "market": event.market,
        }))
    }

    pub fn deposit_submitted(amount: Decimal, currency: &str, reference: &str) -> Self {
        Self::new(
            NotificationKind::Deposit,
            "Deposit Request Submitted".to_string(),
            format!("Your deposit of ${:.2} via {} is pending approval.", amount, currency),
            format!(
                "Deposit reference: {}. Amount: ${:.2}. Currency: {}. This deposit is pending admin approval.",
                reference, amount, currency
            ),
        )
        .with_metadata(json!({
            "amount": amount.to_string(),
            "currency": currency,
            "reference": reference,
        }))
    }

    pub fn deposit_approved(amount: Decimal, reference: &str) -> Self {
        Self::new(
            NotificationKind::Deposit,
            "Deposit Approved".to_string(),
            format!("Your deposit of ${} has been approved.", amount),
            format!("Amount: ${}\nReference: {}", amount, reference),
        )
    }

    pub fn deposit_rejected(amount: Decimal, note: Option<&str>) -> Self {
        Self::new(
            NotificationKind::Alert,
            "Deposit Rejected".to_string(),
            format!("Your deposit of ${} was not approved.", amount),
            note.unwrap_or("Please contact support.").to_string(),
        )
    }

    pub fn deposit_updated(amount: Decimal, currency: &str, status: &str, reference: &str) -> Self {
        Self::new(
            NotificationKind::Deposit,
            "Deposit Updated".to_string(),
            "Your deposit has been updated by admin.".to_string(),
            format!(
                "Amount: ${}\nCurrency: {}\nStatus: {}\nRef: {}",
                amount, currency, status, reference
            ),
        )
    }

    pub fn withdrawal_submitted(amount: Decimal, method: &str, reference: &str, address: &str) -> Self {
        Self::new(
            NotificationKind::Withdrawal,
            "Withdrawal Request Submitted".to_string(),
            format!("Your withdrawal of ${:.2} via {} is pending approval.", amount, method),
            format!(
                "Withdrawal reference: {}. Amount: ${:.2}. Method: {}. Address: {}. This withdrawal is pending admin approval.",
                reference, amount, method, address
            ),
        )
        .with_metadata(json!({
            "amount": amount.to_string(),
            "method": method,
            "reference": reference,
            "address": address,
        }))
    }

    pub fn withdrawal_approved(amount: Decimal, reference: &str) -> Self {
        Self::new(
            NotificationKind::Withdrawal,
            "Withdrawal Approved".to_string(),
            format!("Your withdrawal of ${} has been processed.", amount),
            format!("Amount: ${}\nReference: {}", amount, reference),
        )
    }

    pub fn withdrawal_rejected(amount: Decimal, note: Option<&str>) -> Self {
        Self::new(
            NotificationKind::Alert,
            "Withdrawal Rejected".to_string(),
            format!("Your withdrawal of ${} was not processed.", amount),
            note.unwrap_or("Please contact support.").to_string(),
        )
    }

    pub fn earnings_added(amount: Decimal, description: &str) -> Self {
        Self::new(
            NotificationKind::System,
            "Earnings Added".to_string(),
            format!("${} has been added to your account.", amount),
            description.to_string(),
        )
    }

    pub fn stock_bought(fill: &StockTrade) -> Self {
        Self::new(
            NotificationKind::Trade,
            format!("Bought {}", fill.symbol),
            format!(
                "You bought {} shares of {} for ${}.",
                fill.shares.normalize(),
                fill.symbol,
                fill.total_amount
            ),
            format!(
                "Stock: {}\nShares: {}\nPrice per share: ${}\nTotal: ${}\nReference: {}",
                fill.symbol,
                fill.shares.normalize(),
                fill.price_per_share,
                fill.total_amount,
                fill.reference
            ),
        )
        .with_metadata(json!({
            "stock": fill.symbol,
            "shares": fill.shares.to_string(),
            "amount": fill.total_amount.to_string(),
            "reference": fill.reference,
        }))
    }

    pub fn stock_sold(fill: &StockTrade, sale: &Sale) -> Self {
        let outcome = if sale.profit_loss >= Decimal::ZERO {
            format!("profit of ${}", sale.profit_loss)
        } else {
            format!("loss of ${}", sale.profit_loss.abs())
        };
        Self::new(
            NotificationKind::Trade,
            format!("Sold {}", fill.symbol),
            format!(
                "You sold {} shares of {} for ${} ({}).",
                fill.shares.normalize(),
                fill.symbol,
                fill.total_amount,
                outcome
            ),
            format!(
                "Stock: {}\nShares: {}\nPrice per share: ${}\nProceeds: ${}\nCost basis: ${}\nP/L: ${}\nReference: {}",
                fill.symbol,
                fill.shares.normalize(),
                fill.price_per_share,
                fill.total_amount,
                sale.cost_basis,
                sale.profit_loss,
                fill.reference
            ),
        )
        .with_metadata(json!({
            "stock": fill.symbol,
            "shares": fill.shares.to_string(),
            "amount": fill.total_amount.to_string(),
            "profit_loss": sale.profit_loss.to_string(),
            "reference": fill.reference,
        }))
    }

    pub fn signal_purchased(signal: &Signal, reference: &str) -> Self {
        Self::new(
            NotificationKind::Trade,
            "Signal Purchased".to_string(),
            format!("You purchased the {} signal for ${}.", signal.name, signal.price),
            format!(
                "Signal: {}\nType: {}\nAction: {}\nTimeframe: {}\nRisk: {}\nReference: {}",
                signal.name, signal.signal_type, signal.action, signal.timeframe, signal.risk_level, reference
            ),
        )
        .with_metadata(json!({
            "signal_id": signal.id,
            "amount": signal.price.to_string(),
            "reference": reference,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Holding, StockSide, TradeDirection, TradeStatus};
    use rust_decimal_macros::dec;

    fn closed_event(pct: Decimal) -> TradeEvent {
        TradeEvent {
            id: 3,
            trader_id: 1,
            reference: "TRD-ABCDEF123456".to_string(),
            market: "TSLA".to_string(),
            direction: TradeDirection::Sell,
            duration: "1 hour".to_string(),
            amount: dec!(500),
            entry_price: dec!(250),
            exit_price: Some(dec!(240)),
            profit_loss_percent: pct,
            status: TradeStatus::Closed,
            notes: String::new(),
            opened_at: Utc::now(),
            closed_at: Some(Utc::now()),
            settled_at: None,
            settled_copiers: None,
        }
    }

    #[test]
    fn test_settled_notification_for_gain() {
        let n = NewNotification::copy_trade_settled("Serge", &closed_event(dec!(10.00)), dec!(1000.00), dec!(100.00));

        assert_eq!(n.kind, NotificationKind::Trade);
        assert_eq!(n.title, "Trade Profit from Serge!");
        assert_eq!(n.message, "Copy trade on TSLA gained $100.00");
        assert!(n.full_details.contains("Direction: SELL"));
        assert!(n.full_details.contains("Your Investment: $1000.00"));
        assert!(n.full_details.contains("P/L: $100.00 (10.00%)"));
        assert_eq!(n.metadata["profit_loss"], "100.00");
    }

    #[test]
    fn test_settled_notification_for_loss() {
        let n = NewNotification::copy_trade_settled("Serge", &closed_event(dec!(-20.00)), dec!(5000.00), dec!(-1000.00));

        assert_eq!(n.title, "Trade Update from Serge");
        assert_eq!(n.message, "Copy trade on TSLA lost $1000.00");
    }

    #[test]
    fn test_rejection_note_defaults() {
        let n = NewNotification::deposit_rejected(dec!(50), None);
        assert_eq!(n.kind, NotificationKind::Alert);
        assert_eq!(n.full_details, "Please contact support.");
    }

    #[test]
    fn test_stock_sold_reports_loss() {
        let fill = StockTrade {
            id: 1,
            account_id: 2,
            stock_id: 3,
            symbol: "NVDA".to_string(),
            side: StockSide::Sell,
            shares: dec!(4.00000000),
            price_per_share: dec!(90.00),
            total_amount: dec!(360.00),
            profit_loss: Some(dec!(-40.00)),
            reference: "SELL-ABCDEF123456".to_string(),
            created_at: Utc::now(),
        };
        let sale = Holding { shares: dec!(4), total_invested: dec!(400.00) }
            .sell(dec!(4), dec!(360.00))
            .unwrap();

        let n = NewNotification::stock_sold(&fill, &sale);
        assert_eq!(n.title, "Sold NVDA");
        assert_eq!(n.message, "You sold 4 shares of NVDA for $360.00 (loss of $40.00).");
        assert_eq!(n.metadata["profit_loss"], "-40.00");
    }
}
