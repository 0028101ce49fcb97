//! Account model for a platform user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ledger::Balances;

/// Platform user. Money lives in the ledger, not on this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,

    /// Login email, unique across accounts
    pub email: String,

    #[serde(default)]
    pub first_name: String,

    #[serde(default)]
    pub last_name: String,

    /// Display currency code
    pub currency: String,

    /// Whether the user may move funds between balance and profit
    pub can_transfer: bool,

    pub is_active: bool,

    /// Bumped on every ledger write to this account
    pub version: i64,

    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Full name, or the email when no name was given.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }
}

/// Account together with its ledger-derived balances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account: Account,
    pub balances: Balances,
}

/// Fields for opening an account.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub currency: Option<String>,
}

/// Trim an email and lower-case its domain part.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Jane.Doe@Example.COM "), "Jane.Doe@example.com");
        assert_eq!(normalize_email("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let mut account = Account {
            id: 1,
            email: "a@b.io".to_string(),
            first_name: String::new(),
            last_name: String::new(),
            currency: "USD".to_string(),
            can_transfer: false,
            is_active: true,
            version: 0,
            created_at: Utc::now(),
        };
        assert_eq!(account.display_name(), "a@b.io");

        account.first_name = "Ada".to_string();
        assert_eq!(account.display_name(), "Ada");
    }
}
