//! Paid trading signals and their purchases.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::DeskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Stock,
    Crypto,
    Forex,
    Commodity,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Stock => "stock",
            SignalType::Crypto => "crypto",
            SignalType::Forex => "forex",
            SignalType::Commodity => "commodity",
        }
    }
}

impl FromStr for SignalType {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stock" => Ok(Self::Stock),
            "crypto" => Ok(Self::Crypto),
            "forex" => Ok(Self::Forex),
            "commodity" => Ok(Self::Commodity),
            other => Err(DeskError::UnknownVariant {
                kind: "signal type",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(DeskError::UnknownVariant {
                kind: "risk level",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trading signal sold to users for a one-off price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: i64,
    pub name: String,
    pub signal_type: SignalType,

    /// Price the user pays
    pub price: Decimal,

    /// 0-100
    pub signal_strength: u8,

    /// "BUY", "SELL" or "HOLD"
    pub action: String,

    pub entry_point: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub timeframe: String,
    pub risk_level: RiskLevel,
    pub market_analysis: String,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// Copy of the signal kept with a purchase, so later edits do not
    /// change what the buyer paid for.
    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "name": self.name,
            "signal_type": self.signal_type,
            "action": self.action,
            "signal_strength": self.signal_strength,
            "entry_point": self.entry_point.map(|d| d.to_string()),
            "target_price": self.target_price.map(|d| d.to_string()),
            "stop_loss": self.stop_loss.map(|d| d.to_string()),
            "timeframe": self.timeframe,
            "risk_level": self.risk_level,
            "market_analysis": self.market_analysis,
        })
    }
}

/// Fields for publishing a signal.
#[derive(Debug, Clone)]
pub struct NewSignal {
    pub name: String,
    pub signal_type: SignalType,
    pub price: Decimal,
    pub signal_strength: u8,
    pub action: String,
    pub entry_point: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub timeframe: String,
    pub risk_level: RiskLevel,
    pub market_analysis: String,
}

/// A signal bought by an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPurchase {
    pub id: i64,
    pub account_id: i64,
    pub signal_id: i64,
    pub signal_name: String,
    pub amount_paid: Decimal,

    /// "SIG-..."
    pub reference: String,

    /// Signal as it was when bought
    pub signal_data: serde_json::Value,
    pub purchased_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_keeps_trade_levels() {
        let signal = Signal {
            id: 1,
            name: "Gold breakout".to_string(),
            signal_type: SignalType::Commodity,
            price: dec!(49.99),
            signal_strength: 80,
            action: "BUY".to_string(),
            entry_point: Some(dec!(2350.50)),
            target_price: Some(dec!(2450)),
            stop_loss: None,
            timeframe: "1 week".to_string(),
            risk_level: RiskLevel::Medium,
            market_analysis: String::new(),
            is_active: true,
            created_at: Utc::now(),
        };

        let snapshot = signal.snapshot();
        assert_eq!(snapshot["signal_type"], "commodity");
        assert_eq!(snapshot["risk_level"], "medium");
        assert_eq!(snapshot["entry_point"], "2350.50");
        assert!(snapshot["stop_loss"].is_null());
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!("Forex".parse::<SignalType>().ok(), Some(SignalType::Forex));
        assert_eq!("HIGH".parse::<RiskLevel>().ok(), Some(RiskLevel::High));
        assert!("bond".parse::<SignalType>().is_err());
    }
}
