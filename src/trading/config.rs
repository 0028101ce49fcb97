//! Desk configuration.

use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Runtime configuration for accounts, funding and notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeskConfig {
    /// Currency given to new accounts that don't name one
    pub default_currency: String,

    /// Smallest deposit a user may request
    pub min_deposit: Decimal,

    /// Smallest withdrawal a user may request
    pub min_withdrawal: Decimal,

    /// Notifications returned per page when no limit is given
    pub notification_page_size: i64,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            default_currency: "USD".to_string(),
            min_deposit: dec!(1.00),
            min_withdrawal: dec!(1.00),
            notification_page_size: 50,
        }
    }
}

impl DeskConfig {
    /// Defaults overridden by `COPYDESK_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(currency) = env::var("COPYDESK_DEFAULT_CURRENCY") {
            config.default_currency = currency.trim().to_uppercase();
        }
        if let Some(value) = parse_var::<Decimal>("COPYDESK_MIN_DEPOSIT")? {
            config.min_deposit = value;
        }
        if let Some(value) = parse_var::<Decimal>("COPYDESK_MIN_WITHDRAWAL")? {
            config.min_withdrawal = value;
        }
        if let Some(value) = parse_var::<i64>("COPYDESK_NOTIFICATION_PAGE_SIZE")? {
            config.notification_page_size = value.max(1);
        }

        Ok(config)
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: {}", name, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeskConfig::default();
        assert_eq!(config.default_currency, "USD");
        assert_eq!(config.min_deposit, dec!(1.00));
        assert_eq!(config.notification_page_size, 50);
    }

    #[test]
    fn test_parse_var_missing() {
        let value: Option<Decimal> = parse_var("COPYDESK_TEST_UNSET_VARIABLE").unwrap();
        assert!(value.is_none());
    }
}
