//! Deposit and withdrawal requests.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DeskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundingKind {
    Deposit,
    Withdrawal,
}

impl FundingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundingKind::Deposit => "deposit",
            FundingKind::Withdrawal => "withdrawal",
        }
    }
}

impl FromStr for FundingKind {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            other => Err(DeskError::UnknownVariant {
                kind: "funding kind",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundingStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl FundingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundingStatus::Pending => "pending",
            FundingStatus::Completed => "completed",
            FundingStatus::Failed => "failed",
            FundingStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for FundingStatus {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DeskError::UnknownVariant {
                kind: "funding status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for FundingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deposit or withdrawal awaiting (or past) admin review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRequest {
    pub id: i64,
    pub account_id: i64,
    pub kind: FundingKind,
    pub amount: Decimal,

    /// Currency for deposits, payout method for withdrawals
    pub currency: String,

    pub status: FundingStatus,

    /// Unique reference, e.g. "DEP-1A2B3C4D5E6F"
    pub reference: String,

    #[serde(default)]
    pub description: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FundingRequest {
    pub fn is_pending(&self) -> bool {
        self.status == FundingStatus::Pending
    }
}
