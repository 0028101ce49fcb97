//! Trader model representing a copyable trader profile.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DeskError;

/// Badge level shown next to a trader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Badge {
    Gold,
    Silver,
    Bronze,
}

impl Badge {
    pub fn as_str(&self) -> &'static str {
        match self {
            Badge::Gold => "gold",
            Badge::Silver => "silver",
            Badge::Bronze => "bronze",
        }
    }
}

impl FromStr for Badge {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gold" => Ok(Self::Gold),
            "silver" => Ok(Self::Silver),
            "bronze" => Ok(Self::Bronze),
            other => Err(DeskError::UnknownVariant {
                kind: "badge",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trader profile with admin-maintained display statistics.
///
/// None of the statistics are derived from trade history; `copiers` in
/// particular is a counter bumped when users start or stop copying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trader {
    pub id: i64,

    /// Display name
    pub name: String,

    /// Handle, e.g. "@SERGE"
    pub username: String,

    #[serde(default)]
    pub country: String,

    pub badge: Badge,

    /// Headline gain percentage, e.g. 194.32
    pub gain: Decimal,

    /// Risk score from 1 to 10
    pub risk: u8,

    /// Number of users copying (manual counter)
    pub copiers: u32,

    /// Minimum account balance required to start copying
    pub min_account_threshold: Decimal,

    pub total_wins: u32,

    pub total_losses: u32,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub bio: String,

    /// Whether the trader is listed and accepts new copiers
    pub is_active: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Trader {
    /// Win rate percentage from the admin-entered win/loss totals.
    pub fn win_rate(&self) -> Decimal {
        let total = self.total_wins + self.total_losses;
        if total == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.total_wins) / Decimal::from(total) * Decimal::ONE_HUNDRED
    }

    /// Name with handle, e.g. "Serge (serge)".
    pub fn display_name(&self) -> String {
        if self.username.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.username)
        }
    }

    /// Check whether a balance meets the copy threshold.
    pub fn accepts_balance(&self, balance: Decimal) -> bool {
        balance >= self.min_account_threshold
    }
}

/// Fields for listing a new trader.
#[derive(Debug, Clone)]
pub struct NewTrader {
    pub name: String,
    pub username: String,
    pub country: String,
    pub badge: Badge,
    pub gain: Decimal,
    pub risk: u8,
    pub copiers: u32,
    pub min_account_threshold: Decimal,
    pub total_wins: u32,
    pub total_losses: u32,
    pub category: String,
    pub bio: String,
}

impl Default for NewTrader {
    fn default() -> Self {
        Self {
            name: String::new(),
            username: String::new(),
            country: String::new(),
            badge: Badge::Bronze,
            gain: Decimal::ZERO,
            risk: 1,
            copiers: 0,
            min_account_threshold: Decimal::ZERO,
            total_wins: 0,
            total_losses: 0,
            category: String::new(),
            bio: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trader(wins: u32, losses: u32) -> Trader {
        Trader {
            id: 1,
            name: "Serge".to_string(),
            username: "@SERGE".to_string(),
            country: "France".to_string(),
            badge: Badge::Gold,
            gain: dec!(194.32),
            risk: 4,
            copiers: 12,
            min_account_threshold: dec!(500),
            total_wins: wins,
            total_losses: losses,
            category: String::new(),
            bio: String::new(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_win_rate() {
        assert_eq!(trader(0, 0).win_rate(), Decimal::ZERO);
        assert_eq!(trader(3, 1).win_rate(), dec!(75));
    }

    #[test]
    fn test_threshold() {
        let t = trader(1, 1);
        assert!(t.accepts_balance(dec!(500)));
        assert!(!t.accepts_balance(dec!(499.99)));
        assert_eq!(t.display_name(), "Serge (@SERGE)");
    }

    #[test]
    fn test_badge_parse_is_case_insensitive() {
        assert_eq!("Gold".parse::<Badge>().ok(), Some(Badge::Gold));
        assert!("platinum".parse::<Badge>().is_err());
    }
}
