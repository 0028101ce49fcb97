//! Database persistence for the desk.
//!
//! Stores:
//! - Accounts and their signed ledger entries (balances are a fold)
//! - Traders and copy relationships
//! - Trade events with their settlement marker
//! - Deposit/withdrawal requests
//! - Notifications
//! - Stocks, stock positions and stock fills
//! - Signals and signal purchases

mod queries;

pub use queries::{
    AccountQueries, CopyQueries, FundingQueries, LedgerQueries, NotificationQueries,
    PositionQueries, SignalQueries, StockQueries, StockTradeQueries, TradeQueries, TraderQueries,
};

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, Sqlite, SqlitePool, Transaction};

use crate::error::{DeskError, DeskResult};
use crate::models::{
    Account, CopyRelationship, FundingRequest, LedgerEntry, Notification, Signal, SignalPurchase,
    Stock, StockPosition, StockTrade, TradeEvent, Trader,
};

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database. A single connection that never expires,
    /// since each SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                currency TEXT NOT NULL DEFAULT 'USD',
                can_transfer INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS traders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                username TEXT NOT NULL UNIQUE,
                country TEXT NOT NULL DEFAULT '',
                badge TEXT NOT NULL DEFAULT 'bronze',
                gain TEXT NOT NULL DEFAULT '0',
                risk INTEGER NOT NULL DEFAULT 1,
                copiers INTEGER NOT NULL DEFAULT 0,
                min_account_threshold TEXT NOT NULL DEFAULT '0',
                total_wins INTEGER NOT NULL DEFAULT 0,
                total_losses INTEGER NOT NULL DEFAULT 0,
                category TEXT NOT NULL DEFAULT '',
                bio TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS copy_relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                trader_id INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                initial_investment_amount TEXT NOT NULL DEFAULT '0',
                minimum_threshold_at_start TEXT NOT NULL DEFAULT '0',
                started_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                stopped_at TEXT,
                UNIQUE(account_id, trader_id),
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE,
                FOREIGN KEY (trader_id) REFERENCES traders(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trader_id INTEGER NOT NULL,
                reference TEXT NOT NULL UNIQUE,
                market TEXT NOT NULL,
                direction TEXT NOT NULL,
                duration TEXT NOT NULL DEFAULT '',
                amount TEXT NOT NULL DEFAULT '0',
                entry_price TEXT NOT NULL DEFAULT '0',
                exit_price TEXT,
                profit_loss_percent TEXT NOT NULL DEFAULT '0',
                status TEXT NOT NULL DEFAULT 'open',
                notes TEXT NOT NULL DEFAULT '',
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                settled_at TEXT,
                settled_copiers INTEGER,
                FOREIGN KEY (trader_id) REFERENCES traders(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS funding_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                amount TEXT NOT NULL,
                currency TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                reference TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                balance_delta TEXT NOT NULL,
                profit_delta TEXT NOT NULL,
                trade_event_id INTEGER,
                funding_request_id INTEGER,
                memo TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE,
                FOREIGN KEY (trade_event_id) REFERENCES trade_events(id) ON DELETE SET NULL,
                FOREIGN KEY (funding_request_id) REFERENCES funding_requests(id) ON DELETE SET NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                full_details TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}',
                read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stocks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                sector TEXT NOT NULL DEFAULT '',
                price TEXT NOT NULL,
                change TEXT NOT NULL DEFAULT '0',
                change_percent TEXT NOT NULL DEFAULT '0',
                is_active INTEGER NOT NULL DEFAULT 1,
                is_featured INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stock_positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                stock_id INTEGER NOT NULL,
                shares TEXT NOT NULL,
                average_buy_price TEXT NOT NULL,
                total_invested TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE,
                FOREIGN KEY (stock_id) REFERENCES stocks(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stock_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                stock_id INTEGER NOT NULL,
                side TEXT NOT NULL,
                shares TEXT NOT NULL,
                price_per_share TEXT NOT NULL,
                total_amount TEXT NOT NULL,
                profit_loss TEXT,
                reference TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE,
                FOREIGN KEY (stock_id) REFERENCES stocks(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                signal_type TEXT NOT NULL,
                price TEXT NOT NULL,
                signal_strength INTEGER NOT NULL DEFAULT 50,
                action TEXT NOT NULL DEFAULT 'HOLD',
                entry_point TEXT,
                target_price TEXT,
                stop_loss TEXT,
                timeframe TEXT NOT NULL DEFAULT '',
                risk_level TEXT NOT NULL DEFAULT 'medium',
                market_analysis TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signal_purchases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                signal_id INTEGER NOT NULL,
                amount_paid TEXT NOT NULL,
                reference TEXT NOT NULL UNIQUE,
                signal_data TEXT NOT NULL DEFAULT '{}',
                purchased_at TEXT NOT NULL,
                UNIQUE(account_id, signal_id),
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE,
                FOREIGN KEY (signal_id) REFERENCES signals(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_account ON ledger_entries(account_id)")
            .execute(&self.pool)
            .await?;
        // A copier is credited at most once per trade event
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_ledger_copy_trade ON ledger_entries(account_id, trade_event_id) WHERE kind = 'copy_trade'",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_copies_trader_active ON copy_relationships(trader_id, is_active)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_events_trader ON trade_events(trader_id, opened_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_events_status ON trade_events(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_funding_status ON funding_requests(kind, status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_notifications_account ON notifications(account_id, created_at)")
            .execute(&self.pool)
            .await?;
        // One open position per account and stock
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_positions_open ON stock_positions(account_id, stock_id) WHERE is_active = 1",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_stock_trades_account ON stock_trades(account_id, created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Start a transaction. Everything that moves money runs inside one.
    pub async fn begin(&self) -> DeskResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Get the connection pool (for advanced queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decimal(field: &str, value: &str) -> DeskResult<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| DeskError::Corrupt(format!("{} = '{}': {}", field, value, e)))
}

fn optional_decimal(field: &str, value: Option<&str>) -> DeskResult<Option<Decimal>> {
    value.map(|v| decimal(field, v)).transpose()
}

fn count(field: &str, value: i64) -> DeskResult<u32> {
    u32::try_from(value).map_err(|_| DeskError::Corrupt(format!("{} = {}", field, value)))
}

/// Stored account row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredAccount {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub currency: String,
    pub can_transfer: bool,
    pub is_active: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl From<StoredAccount> for Account {
    fn from(row: StoredAccount) -> Self {
        Self {
            id: row.id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            currency: row.currency,
            can_transfer: row.can_transfer,
            is_active: row.is_active,
            version: row.version,
            created_at: row.created_at,
        }
    }
}

/// Stored trader row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrader {
    pub id: i64,
    pub name: String,
    pub username: String,
    pub country: String,
    pub badge: String,
    pub gain: String,
    pub risk: i64,
    pub copiers: i64,
    pub min_account_threshold: String,
    pub total_wins: i64,
    pub total_losses: i64,
    pub category: String,
    pub bio: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<StoredTrader> for Trader {
    type Error = DeskError;

    fn try_from(row: StoredTrader) -> DeskResult<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            username: row.username,
            country: row.country,
            badge: row.badge.parse()?,
            gain: decimal("gain", &row.gain)?,
            risk: u8::try_from(row.risk)
                .map_err(|_| DeskError::Corrupt(format!("risk = {}", row.risk)))?,
            copiers: count("copiers", row.copiers)?,
            min_account_threshold: decimal("min_account_threshold", &row.min_account_threshold)?,
            total_wins: count("total_wins", row.total_wins)?,
            total_losses: count("total_losses", row.total_losses)?,
            category: row.category,
            bio: row.bio,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Stored copy relationship row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredCopy {
    pub id: i64,
    pub account_id: i64,
    pub trader_id: i64,
    pub is_active: bool,
    pub initial_investment_amount: String,
    pub minimum_threshold_at_start: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl TryFrom<StoredCopy> for CopyRelationship {
    type Error = DeskError;

    fn try_from(row: StoredCopy) -> DeskResult<Self> {
        Ok(Self {
            id: row.id,
            account_id: row.account_id,
            trader_id: row.trader_id,
            is_active: row.is_active,
            initial_investment_amount: decimal(
                "initial_investment_amount",
                &row.initial_investment_amount,
            )?,
            minimum_threshold_at_start: decimal(
                "minimum_threshold_at_start",
                &row.minimum_threshold_at_start,
            )?,
            started_at: row.started_at,
            updated_at: row.updated_at,
            stopped_at: row.stopped_at,
        })
    }
}

/// Stored trade event row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTradeEvent {
    pub id: i64,
    pub trader_id: i64,
    pub reference: String,
    pub market: String,
    pub direction: String,
    pub duration: String,
    pub amount: String,
    pub entry_price: String,
    pub exit_price: Option<String>,
    pub profit_loss_percent: String,
    pub status: String,
    pub notes: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub settled_copiers: Option<i64>,
}

impl TryFrom<StoredTradeEvent> for TradeEvent {
    type Error = DeskError;

    fn try_from(row: StoredTradeEvent) -> DeskResult<Self> {
        Ok(Self {
            id: row.id,
            trader_id: row.trader_id,
            reference: row.reference,
            market: row.market,
            direction: row.direction.parse()?,
            duration: row.duration,
            amount: decimal("amount", &row.amount)?,
            entry_price: decimal("entry_price", &row.entry_price)?,
            exit_price: optional_decimal("exit_price", row.exit_price.as_deref())?,
            profit_loss_percent: decimal("profit_loss_percent", &row.profit_loss_percent)?,
            status: row.status.parse()?,
            notes: row.notes,
            opened_at: row.opened_at,
            closed_at: row.closed_at,
            settled_at: row.settled_at,
            settled_copiers: row.settled_copiers,
        })
    }
}

/// Stored ledger entry row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredLedgerEntry {
    pub id: i64,
    pub account_id: i64,
    pub kind: String,
    pub balance_delta: String,
    pub profit_delta: String,
    pub trade_event_id: Option<i64>,
    pub funding_request_id: Option<i64>,
    pub memo: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<StoredLedgerEntry> for LedgerEntry {
    type Error = DeskError;

    fn try_from(row: StoredLedgerEntry) -> DeskResult<Self> {
        Ok(Self {
            id: row.id,
            account_id: row.account_id,
            kind: row.kind.parse()?,
            balance_delta: decimal("balance_delta", &row.balance_delta)?,
            profit_delta: decimal("profit_delta", &row.profit_delta)?,
            trade_event_id: row.trade_event_id,
            funding_request_id: row.funding_request_id,
            memo: row.memo,
            created_at: row.created_at,
        })
    }
}

/// Stored funding request row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredFundingRequest {
    pub id: i64,
    pub account_id: i64,
    pub kind: String,
    pub amount: String,
    pub currency: String,
    pub status: String,
    pub reference: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<StoredFundingRequest> for FundingRequest {
    type Error = DeskError;

    fn try_from(row: StoredFundingRequest) -> DeskResult<Self> {
        Ok(Self {
            id: row.id,
            account_id: row.account_id,
            kind: row.kind.parse()?,
            amount: decimal("amount", &row.amount)?,
            currency: row.currency,
            status: row.status.parse()?,
            reference: row.reference,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Stored notification row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredNotification {
    pub id: i64,
    pub account_id: i64,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub full_details: String,
    pub metadata: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<StoredNotification> for Notification {
    type Error = DeskError;

    fn try_from(row: StoredNotification) -> DeskResult<Self> {
        let metadata = serde_json::from_str(&row.metadata)
            .map_err(|e| DeskError::Corrupt(format!("notification {} metadata: {}", row.id, e)))?;

        Ok(Self {
            id: row.id,
            account_id: row.account_id,
            kind: row.kind.parse()?,
            title: row.title,
            message: row.message,
            full_details: row.full_details,
            metadata,
            read: row.read,
            created_at: row.created_at,
        })
    }
}

/// Stored stock row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredStock {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub price: String,
    pub change: String,
    pub change_percent: String,
    pub is_active: bool,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<StoredStock> for Stock {
    type Error = DeskError;

    fn try_from(row: StoredStock) -> DeskResult<Self> {
        Ok(Self {
            id: row.id,
            symbol: row.symbol,
            name: row.name,
            sector: row.sector,
            price: decimal("price", &row.price)?,
            change: decimal("change", &row.change)?,
            change_percent: decimal("change_percent", &row.change_percent)?,
            is_active: row.is_active,
            is_featured: row.is_featured,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Stored position row, joined with its stock's symbol and price.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredPosition {
    pub id: i64,
    pub account_id: i64,
    pub stock_id: i64,
    pub symbol: String,
    pub shares: String,
    pub average_buy_price: String,
    pub total_invested: String,
    pub current_price: String,
    pub is_active: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TryFrom<StoredPosition> for StockPosition {
    type Error = DeskError;

    fn try_from(row: StoredPosition) -> DeskResult<Self> {
        Ok(Self {
            id: row.id,
            account_id: row.account_id,
            stock_id: row.stock_id,
            symbol: row.symbol,
            shares: decimal("shares", &row.shares)?,
            average_buy_price: decimal("average_buy_price", &row.average_buy_price)?,
            total_invested: decimal("total_invested", &row.total_invested)?,
            current_price: decimal("price", &row.current_price)?,
            is_active: row.is_active,
            opened_at: row.opened_at,
            closed_at: row.closed_at,
        })
    }
}

/// Stored stock fill row, joined with the stock symbol.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredStockTrade {
    pub id: i64,
    pub account_id: i64,
    pub stock_id: i64,
    pub symbol: String,
    pub side: String,
    pub shares: String,
    pub price_per_share: String,
    pub total_amount: String,
    pub profit_loss: Option<String>,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<StoredStockTrade> for StockTrade {
    type Error = DeskError;

    fn try_from(row: StoredStockTrade) -> DeskResult<Self> {
        Ok(Self {
            id: row.id,
            account_id: row.account_id,
            stock_id: row.stock_id,
            symbol: row.symbol,
            side: row.side.parse()?,
            shares: decimal("shares", &row.shares)?,
            price_per_share: decimal("price_per_share", &row.price_per_share)?,
            total_amount: decimal("total_amount", &row.total_amount)?,
            profit_loss: optional_decimal("profit_loss", row.profit_loss.as_deref())?,
            reference: row.reference,
            created_at: row.created_at,
        })
    }
}

/// Stored signal row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredSignal {
    pub id: i64,
    pub name: String,
    pub signal_type: String,
    pub price: String,
    pub signal_strength: i64,
    pub action: String,
    pub entry_point: Option<String>,
    pub target_price: Option<String>,
    pub stop_loss: Option<String>,
    pub timeframe: String,
    pub risk_level: String,
    pub market_analysis: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<StoredSignal> for Signal {
    type Error = DeskError;

    fn try_from(row: StoredSignal) -> DeskResult<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            signal_type: row.signal_type.parse()?,
            price: decimal("price", &row.price)?,
            signal_strength: u8::try_from(row.signal_strength)
                .map_err(|_| DeskError::Corrupt(format!("signal_strength = {}", row.signal_strength)))?,
            action: row.action,
            entry_point: optional_decimal("entry_point", row.entry_point.as_deref())?,
            target_price: optional_decimal("target_price", row.target_price.as_deref())?,
            stop_loss: optional_decimal("stop_loss", row.stop_loss.as_deref())?,
            timeframe: row.timeframe,
            risk_level: row.risk_level.parse()?,
            market_analysis: row.market_analysis,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

/// Stored signal purchase row, joined with the signal name.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredSignalPurchase {
    pub id: i64,
    pub account_id: i64,
    pub signal_id: i64,
    pub signal_name: String,
    pub amount_paid: String,
    pub reference: String,
    pub signal_data: String,
    pub purchased_at: DateTime<Utc>,
}

impl TryFrom<StoredSignalPurchase> for SignalPurchase {
    type Error = DeskError;

    fn try_from(row: StoredSignalPurchase) -> DeskResult<Self> {
        let signal_data = serde_json::from_str(&row.signal_data)
            .map_err(|e| DeskError::Corrupt(format!("signal purchase {} data: {}", row.id, e)))?;

        Ok(Self {
            id: row.id,
            account_id: row.account_id,
            signal_id: row.signal_id,
            signal_name: row.signal_name,
            amount_paid: decimal("amount_paid", &row.amount_paid)?,
            reference: row.reference,
            signal_data,
            purchased_at: row.purchased_at,
        })
    }
}

/// Convert a batch of rows, failing on the first bad one.
fn convert_all<R, T>(rows: Vec<R>) -> DeskResult<Vec<T>>
where
    T: TryFrom<R, Error = DeskError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();

        let (tables,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();

        assert_eq!(tables, 12);
    }

    #[test]
    fn test_decimal_rejects_garbage() {
        assert!(decimal("amount", "12.50").is_ok());
        assert!(matches!(decimal("amount", "abc"), Err(DeskError::Corrupt(_))));
    }
}
