//! Error taxonomy for desk operations.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by account, copy, trade, funding and brokerage operations.
#[derive(Error, Debug)]
pub enum DeskError {
    #[error("Account {0} not found")]
    AccountNotFound(i64),

    #[error("Trader {0} not found")]
    TraderNotFound(i64),

    #[error("Trade event {0} not found")]
    TradeEventNotFound(i64),

    #[error("Funding request {0} not found")]
    FundingRequestNotFound(i64),

    #[error("Notification {0} not found")]
    NotificationNotFound(i64),

    #[error("Stock {0} not found")]
    StockNotFound(String),

    #[error("Signal {0} not found")]
    SignalNotFound(i64),

    #[error("No open position in {symbol}")]
    NoPosition { symbol: String },

    #[error("Insufficient shares: need {requested}, holding {available}")]
    InsufficientShares { requested: Decimal, available: Decimal },

    #[error("Signal '{signal}' was already purchased")]
    AlreadyPurchased { signal: String },

    #[error("Stock {0} is already listed")]
    DuplicateSymbol(String),

    #[error("Insufficient balance: need ${required}, available ${available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Insufficient profit: need ${required}, available ${available}")]
    InsufficientProfit { required: Decimal, available: Decimal },

    #[error("Already copying {trader}")]
    AlreadyCopying { trader: String },

    #[error("Not copying {trader}")]
    NotCopying { trader: String },

    #[error("Trader {trader} is not accepting copiers")]
    TraderInactive { trader: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Amount out of range: {0}")]
    Overflow(String),

    #[error("Transfers are not permitted for account {0}")]
    TransferNotPermitted(i64),

    #[error("Request {reference} is already {status}")]
    RequestAlreadyResolved { reference: String, status: String },

    #[error("Invalid email address '{0}'")]
    InvalidEmail(String),

    #[error("Email {0} is already registered")]
    DuplicateEmail(String),

    #[error("Username {0} is already taken")]
    DuplicateUsername(String),

    #[error("Account {0} was modified concurrently")]
    VersionConflict(i64),

    #[error("Unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Invalid stored value: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl DeskError {
    /// True when the error came from a unique constraint violation.
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}

pub type DeskResult<T> = Result<T, DeskError>;
