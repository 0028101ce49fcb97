//! Query helpers grouped per table.
//!
//! Every helper takes a plain connection so the same call works against a
//! pooled connection or inside an open transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;

use super::{
    convert_all, decimal, StoredAccount, StoredCopy, StoredFundingRequest, StoredLedgerEntry,
    StoredNotification, StoredPosition, StoredSignal, StoredSignalPurchase, StoredStock,
    StoredStockTrade, StoredTradeEvent, StoredTrader,
};
use crate::error::{DeskError, DeskResult};
use crate::models::{
    Account, Balances, Copier, CopyRelationship, FollowedTrader, FundingKind, FundingRequest,
    FundingStatus, Holding, LedgerEntry, NewAccount, NewLedgerEntry, NewNotification, NewSignal,
    NewStock, NewTradeEvent, NewTrader, Notification, NotificationKind, Signal, SignalPurchase,
    Stock, StockPosition, StockSide, StockTrade, TradeEvent, TradeStatus, Trader,
};

const ACCOUNT_COLUMNS: &str =
    "id, email, first_name, last_name, currency, can_transfer, is_active, version, created_at";

const TRADER_COLUMNS: &str = "id, name, username, country, badge, gain, risk, copiers, \
     min_account_threshold, total_wins, total_losses, category, bio, is_active, created_at, updated_at";

const COPY_COLUMNS: &str = "id, account_id, trader_id, is_active, initial_investment_amount, \
     minimum_threshold_at_start, started_at, updated_at, stopped_at";

const TRADE_COLUMNS: &str = "id, trader_id, reference, market, direction, duration, amount, \
     entry_price, exit_price, profit_loss_percent, status, notes, opened_at, closed_at, \
     settled_at, settled_copiers";

const FUNDING_COLUMNS: &str =
    "id, account_id, kind, amount, currency, status, reference, description, created_at, updated_at";

const STOCK_COLUMNS: &str = "id, symbol, name, sector, price, change, change_percent, is_active, \
     is_featured, created_at, updated_at";

const POSITION_COLUMNS: &str = "p.id, p.account_id, p.stock_id, s.symbol, p.shares, \
     p.average_buy_price, p.total_invested, s.price AS current_price, p.is_active, p.opened_at, p.closed_at";

const STOCK_TRADE_COLUMNS: &str = "t.id, t.account_id, t.stock_id, s.symbol, t.side, t.shares, \
     t.price_per_share, t.total_amount, t.profit_loss, t.reference, t.created_at";

const SIGNAL_COLUMNS: &str = "id, name, signal_type, price, signal_strength, action, entry_point, \
     target_price, stop_loss, timeframe, risk_level, market_analysis, is_active, created_at";

// ==================== Accounts ====================

pub struct AccountQueries;

impl AccountQueries {
    pub async fn insert(
        conn: &mut SqliteConnection,
        account: &NewAccount,
        email: &str,
        currency: &str,
    ) -> DeskResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (email, first_name, last_name, currency, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(email)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(currency)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if DeskError::is_unique_violation(&e) {
                DeskError::DuplicateEmail(email.to_string())
            } else {
                e.into()
            }
        })?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get(conn: &mut SqliteConnection, id: i64) -> DeskResult<Account> {
        let row: Option<StoredAccount> =
            sqlx::query_as(&format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        row.map(Account::from).ok_or(DeskError::AccountNotFound(id))
    }

    pub async fn find_by_email(
        conn: &mut SqliteConnection,
        email: &str,
    ) -> DeskResult<Option<Account>> {
        let row: Option<StoredAccount> =
            sqlx::query_as(&format!("SELECT {} FROM accounts WHERE email = ?", ACCOUNT_COLUMNS))
                .bind(email)
                .fetch_optional(&mut *conn)
                .await?;

        Ok(row.map(Account::from))
    }

    pub async fn list(conn: &mut SqliteConnection) -> DeskResult<Vec<Account>> {
        let rows: Vec<StoredAccount> =
            sqlx::query_as(&format!("SELECT {} FROM accounts ORDER BY id", ACCOUNT_COLUMNS))
                .fetch_all(&mut *conn)
                .await?;

        Ok(rows.into_iter().map(Account::from).collect())
    }

    pub async fn set_can_transfer(
        conn: &mut SqliteConnection,
        id: i64,
        can_transfer: bool,
    ) -> DeskResult<()> {
        let result = sqlx::query("UPDATE accounts SET can_transfer = ? WHERE id = ?")
            .bind(can_transfer)
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DeskError::AccountNotFound(id));
        }
        Ok(())
    }
}

// ==================== Ledger ====================

pub struct LedgerQueries;

impl LedgerQueries {
    /// Fold every entry of an account into its current balances.
    pub async fn balances(conn: &mut SqliteConnection, account_id: i64) -> DeskResult<Balances> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT balance_delta, profit_delta FROM ledger_entries WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?;

        let deltas = rows
            .iter()
            .map(|(balance, profit)| -> DeskResult<(Decimal, Decimal)> {
                Ok((
                    decimal("balance_delta", balance)?,
                    decimal("profit_delta", profit)?,
                ))
            })
            .collect::<DeskResult<Vec<(Decimal, Decimal)>>>()?;

        Balances::fold(deltas)
    }

    /// Most recent entries first.
    pub async fn entries(
        conn: &mut SqliteConnection,
        account_id: i64,
        limit: i64,
    ) -> DeskResult<Vec<LedgerEntry>> {
        let rows: Vec<StoredLedgerEntry> = sqlx::query_as(
            r#"
            SELECT id, account_id, kind, balance_delta, profit_delta, trade_event_id,
                   funding_request_id, memo, created_at
            FROM ledger_entries
            WHERE account_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        convert_all(rows)
    }

    /// Append an entry, guarded by the account version the caller read.
    pub async fn post(
        conn: &mut SqliteConnection,
        account: &Account,
        entry: &NewLedgerEntry,
    ) -> DeskResult<i64> {
        let bumped = sqlx::query("UPDATE accounts SET version = version + 1 WHERE id = ? AND version = ?")
            .bind(account.id)
            .bind(account.version)
            .execute(&mut *conn)
            .await?;

        if bumped.rows_affected() == 0 {
            return Err(DeskError::VersionConflict(account.id));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                account_id, kind, balance_delta, profit_delta, trade_event_id,
                funding_request_id, memo, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id)
        .bind(entry.kind.as_str())
        .bind(entry.balance_delta.to_string())
        .bind(entry.profit_delta.to_string())
        .bind(entry.trade_event_id)
        .bind(entry.funding_request_id)
        .bind(&entry.memo)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Copy-trade entries already posted for a trade event.
    pub async fn count_for_trade(conn: &mut SqliteConnection, trade_event_id: i64) -> DeskResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM ledger_entries WHERE trade_event_id = ? AND kind = 'copy_trade'",
        )
        .bind(trade_event_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(count)
    }
}

// ==================== Traders ====================

pub struct TraderQueries;

impl TraderQueries {
    pub async fn insert(conn: &mut SqliteConnection, trader: &NewTrader) -> DeskResult<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO traders (
                name, username, country, badge, gain, risk, copiers, min_account_threshold,
                total_wins, total_losses, category, bio, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trader.name)
        .bind(&trader.username)
        .bind(&trader.country)
        .bind(trader.badge.as_str())
        .bind(trader.gain.to_string())
        .bind(i64::from(trader.risk))
        .bind(i64::from(trader.copiers))
        .bind(trader.min_account_threshold.to_string())
        .bind(i64::from(trader.total_wins))
        .bind(i64::from(trader.total_losses))
        .bind(&trader.category)
        .bind(&trader.bio)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if DeskError::is_unique_violation(&e) {
                DeskError::DuplicateUsername(trader.username.clone())
            } else {
                e.into()
            }
        })?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get(conn: &mut SqliteConnection, id: i64) -> DeskResult<Trader> {
        let row: Option<StoredTrader> =
            sqlx::query_as(&format!("SELECT {} FROM traders WHERE id = ?", TRADER_COLUMNS))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        row.ok_or(DeskError::TraderNotFound(id))?.try_into()
    }

    /// Traders by popularity. `search` matches name or username.
    pub async fn list(
        conn: &mut SqliteConnection,
        active_only: bool,
        search: Option<&str>,
    ) -> DeskResult<Vec<Trader>> {
        let pattern = search.map(|s| format!("%{}%", s));
        let rows: Vec<StoredTrader> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM traders
            WHERE (? = 0 OR is_active = 1)
              AND (? IS NULL OR name LIKE ? OR username LIKE ?)
            ORDER BY copiers DESC, id
            "#,
            TRADER_COLUMNS
        ))
        .bind(active_only)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&mut *conn)
        .await?;

        convert_all(rows)
    }

    pub async fn set_active(conn: &mut SqliteConnection, id: i64, is_active: bool) -> DeskResult<()> {
        let result = sqlx::query("UPDATE traders SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(is_active)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DeskError::TraderNotFound(id));
        }
        Ok(())
    }

    /// Move the copier counter, never below zero.
    pub async fn adjust_copiers(conn: &mut SqliteConnection, id: i64, delta: i64) -> DeskResult<()> {
        sqlx::query("UPDATE traders SET copiers = MAX(0, copiers + ?), updated_at = ? WHERE id = ?")
            .bind(delta)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

// ==================== Copy relationships ====================

pub struct CopyQueries;

impl CopyQueries {
    pub async fn find(
        conn: &mut SqliteConnection,
        account_id: i64,
        trader_id: i64,
    ) -> DeskResult<Option<CopyRelationship>> {
        let row: Option<StoredCopy> = sqlx::query_as(&format!(
            "SELECT {} FROM copy_relationships WHERE account_id = ? AND trader_id = ?",
            COPY_COLUMNS
        ))
        .bind(account_id)
        .bind(trader_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(CopyRelationship::try_from).transpose()
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        account_id: i64,
        trader_id: i64,
        investment: Decimal,
        threshold: Decimal,
    ) -> DeskResult<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO copy_relationships (
                account_id, trader_id, is_active, initial_investment_amount,
                minimum_threshold_at_start, started_at, updated_at
            ) VALUES (?, ?, 1, ?, ?, ?, ?)
            "#,
        )
        .bind(account_id)
        .bind(trader_id)
        .bind(investment.to_string())
        .bind(threshold.to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Reactivate a stopped relationship with a fresh investment snapshot.
    pub async fn reactivate(
        conn: &mut SqliteConnection,
        id: i64,
        investment: Decimal,
        threshold: Decimal,
    ) -> DeskResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE copy_relationships
            SET is_active = 1, initial_investment_amount = ?, minimum_threshold_at_start = ?,
                started_at = ?, updated_at = ?, stopped_at = NULL
            WHERE id = ?
            "#,
        )
        .bind(investment.to_string())
        .bind(threshold.to_string())
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn deactivate(conn: &mut SqliteConnection, id: i64) -> DeskResult<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE copy_relationships SET is_active = 0, updated_at = ?, stopped_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Active copiers of a trader, oldest relationship first.
    pub async fn active_copiers(conn: &mut SqliteConnection, trader_id: i64) -> DeskResult<Vec<Copier>> {
        let rows: Vec<(i64, i64, String, String)> = sqlx::query_as(
            r#"
            SELECT c.id, c.account_id, a.email, c.initial_investment_amount
            FROM copy_relationships c
            JOIN accounts a ON a.id = c.account_id
            WHERE c.trader_id = ? AND c.is_active = 1
            ORDER BY c.id
            "#,
        )
        .bind(trader_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter()
            .map(|(relationship_id, account_id, email, investment)| -> DeskResult<Copier> {
                Ok(Copier {
                    relationship_id,
                    account_id,
                    email,
                    initial_investment_amount: decimal("initial_investment_amount", &investment)?,
                })
            })
            .collect()
    }

    /// Traders an account is actively copying.
    pub async fn following(
        conn: &mut SqliteConnection,
        account_id: i64,
    ) -> DeskResult<Vec<FollowedTrader>> {
        let rows: Vec<StoredCopy> = sqlx::query_as(&format!(
            "SELECT {} FROM copy_relationships WHERE account_id = ? AND is_active = 1 ORDER BY started_at DESC, id DESC",
            COPY_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut followed = Vec::with_capacity(rows.len());
        for row in rows {
            let relationship = CopyRelationship::try_from(row)?;
            let trader = TraderQueries::get(conn, relationship.trader_id).await?;
            followed.push(FollowedTrader {
                relationship,
                trader_name: trader.name,
                trader_username: trader.username,
            });
        }
        Ok(followed)
    }
}

// ==================== Trade events ====================

pub struct TradeQueries;

impl TradeQueries {
    pub async fn insert(
        conn: &mut SqliteConnection,
        trade: &NewTradeEvent,
        reference: &str,
        opened_at: DateTime<Utc>,
    ) -> DeskResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trade_events (
                trader_id, reference, market, direction, duration, amount, entry_price,
                exit_price, profit_loss_percent, status, notes, opened_at, closed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trade.trader_id)
        .bind(reference)
        .bind(&trade.market)
        .bind(trade.direction.as_str())
        .bind(&trade.duration)
        .bind(trade.amount.to_string())
        .bind(trade.entry_price.to_string())
        .bind(trade.exit_price.map(|p| p.to_string()))
        .bind(trade.profit_loss_percent.to_string())
        .bind(trade.status.as_str())
        .bind(&trade.notes)
        .bind(opened_at)
        .bind(trade.closed_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get(conn: &mut SqliteConnection, id: i64) -> DeskResult<TradeEvent> {
        let row: Option<StoredTradeEvent> =
            sqlx::query_as(&format!("SELECT {} FROM trade_events WHERE id = ?", TRADE_COLUMNS))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        row.ok_or(DeskError::TradeEventNotFound(id))?.try_into()
    }

    /// Write back the editable fields. Settlement columns are left alone.
    pub async fn update(conn: &mut SqliteConnection, event: &TradeEvent) -> DeskResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE trade_events
            SET market = ?, direction = ?, duration = ?, amount = ?, entry_price = ?,
                exit_price = ?, profit_loss_percent = ?, status = ?, notes = ?, closed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&event.market)
        .bind(event.direction.as_str())
        .bind(&event.duration)
        .bind(event.amount.to_string())
        .bind(event.entry_price.to_string())
        .bind(event.exit_price.map(|p| p.to_string()))
        .bind(event.profit_loss_percent.to_string())
        .bind(event.status.as_str())
        .bind(&event.notes)
        .bind(event.closed_at)
        .bind(event.id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DeskError::TradeEventNotFound(event.id));
        }
        Ok(())
    }

    /// Claim the settlement marker. False when the event was already settled.
    pub async fn mark_settled(
        conn: &mut SqliteConnection,
        id: i64,
        at: DateTime<Utc>,
    ) -> DeskResult<bool> {
        let result =
            sqlx::query("UPDATE trade_events SET settled_at = ? WHERE id = ? AND settled_at IS NULL")
                .bind(at)
                .bind(id)
                .execute(&mut *conn)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_settled_copiers(
        conn: &mut SqliteConnection,
        id: i64,
        copiers: i64,
    ) -> DeskResult<()> {
        sqlx::query("UPDATE trade_events SET settled_copiers = ? WHERE id = ?")
            .bind(copiers)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> DeskResult<()> {
        let result = sqlx::query("DELETE FROM trade_events WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DeskError::TradeEventNotFound(id));
        }
        Ok(())
    }

    /// Trade events, newest first, optionally narrowed to one trader and status.
    pub async fn list(
        conn: &mut SqliteConnection,
        trader_id: Option<i64>,
        status: Option<TradeStatus>,
        limit: i64,
    ) -> DeskResult<Vec<TradeEvent>> {
        let rows: Vec<StoredTradeEvent> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM trade_events
            WHERE (? IS NULL OR trader_id = ?)
              AND (? IS NULL OR status = ?)
            ORDER BY opened_at DESC, id DESC
            LIMIT ?
            "#,
            TRADE_COLUMNS
        ))
        .bind(trader_id)
        .bind(trader_id)
        .bind(status.map(|s| s.as_str()))
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        convert_all(rows)
    }

    /// Every event of a trader, oldest first.
    pub async fn all_for_trader(
        conn: &mut SqliteConnection,
        trader_id: i64,
    ) -> DeskResult<Vec<TradeEvent>> {
        let rows: Vec<StoredTradeEvent> = sqlx::query_as(&format!(
            "SELECT {} FROM trade_events WHERE trader_id = ? ORDER BY opened_at, id",
            TRADE_COLUMNS
        ))
        .bind(trader_id)
        .fetch_all(&mut *conn)
        .await?;

        convert_all(rows)
    }
}

// ==================== Funding requests ====================

pub struct FundingQueries;

impl FundingQueries {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        conn: &mut SqliteConnection,
        account_id: i64,
        kind: FundingKind,
        amount: Decimal,
        currency: &str,
        status: FundingStatus,
        reference: &str,
        description: &str,
    ) -> DeskResult<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO funding_requests (
                account_id, kind, amount, currency, status, reference, description,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account_id)
        .bind(kind.as_str())
        .bind(amount.to_string())
        .bind(currency)
        .bind(status.as_str())
        .bind(reference)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get(conn: &mut SqliteConnection, id: i64) -> DeskResult<FundingRequest> {
        let row: Option<StoredFundingRequest> =
            sqlx::query_as(&format!("SELECT {} FROM funding_requests WHERE id = ?", FUNDING_COLUMNS))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        row.ok_or(DeskError::FundingRequestNotFound(id))?.try_into()
    }

    /// Move a request out of pending. False when it was no longer pending.
    pub async fn resolve(
        conn: &mut SqliteConnection,
        id: i64,
        status: FundingStatus,
    ) -> DeskResult<bool> {
        let result = sqlx::query(
            "UPDATE funding_requests SET status = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn revise(
        conn: &mut SqliteConnection,
        id: i64,
        amount: Decimal,
        currency: &str,
        status: FundingStatus,
    ) -> DeskResult<()> {
        sqlx::query(
            "UPDATE funding_requests SET amount = ?, currency = ?, status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(amount.to_string())
        .bind(currency)
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn list(
        conn: &mut SqliteConnection,
        account_id: Option<i64>,
        kind: Option<FundingKind>,
        status: Option<FundingStatus>,
    ) -> DeskResult<Vec<FundingRequest>> {
        let rows: Vec<StoredFundingRequest> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM funding_requests
            WHERE (? IS NULL OR account_id = ?)
              AND (? IS NULL OR kind = ?)
              AND (? IS NULL OR status = ?)
            ORDER BY id DESC
            "#,
            FUNDING_COLUMNS
        ))
        .bind(account_id)
        .bind(account_id)
        .bind(kind.map(|k| k.as_str()))
        .bind(kind.map(|k| k.as_str()))
        .bind(status.map(|s| s.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&mut *conn)
        .await?;

        convert_all(rows)
    }
}

// ==================== Notifications ====================

pub struct NotificationQueries;

impl NotificationQueries {
    pub async fn insert(
        conn: &mut SqliteConnection,
        account_id: i64,
        notification: &NewNotification,
    ) -> DeskResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (account_id, kind, title, message, full_details, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account_id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.full_details)
        .bind(notification.metadata.to_string())
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Newest first.
    pub async fn page(
        conn: &mut SqliteConnection,
        account_id: i64,
        kind: Option<NotificationKind>,
        limit: i64,
        offset: i64,
    ) -> DeskResult<Vec<Notification>> {
        let rows: Vec<StoredNotification> = sqlx::query_as(
            r#"
            SELECT id, account_id, kind, title, message, full_details, metadata, read, created_at
            FROM notifications
            WHERE account_id = ? AND (? IS NULL OR kind = ?)
            ORDER BY id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(account_id)
        .bind(kind.map(|k| k.as_str()))
        .bind(kind.map(|k| k.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *conn)
        .await?;

        convert_all(rows)
    }

    /// `(total, unread)` for an account, optionally one kind only.
    pub async fn counts(
        conn: &mut SqliteConnection,
        account_id: i64,
        kind: Option<NotificationKind>,
    ) -> DeskResult<(i64, i64)> {
        let (total, unread): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(CASE WHEN read = 0 THEN 1 ELSE 0 END), 0)
            FROM notifications
            WHERE account_id = ? AND (? IS NULL OR kind = ?)
            "#,
        )
        .bind(account_id)
        .bind(kind.map(|k| k.as_str()))
        .bind(kind.map(|k| k.as_str()))
        .fetch_one(&mut *conn)
        .await?;

        Ok((total, unread))
    }

    pub async fn mark_read(conn: &mut SqliteConnection, account_id: i64, id: i64) -> DeskResult<()> {
        let result = sqlx::query("UPDATE notifications SET read = 1 WHERE id = ? AND account_id = ?")
            .bind(id)
            .bind(account_id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DeskError::NotificationNotFound(id));
        }
        Ok(())
    }

    pub async fn mark_all_read(conn: &mut SqliteConnection, account_id: i64) -> DeskResult<u64> {
        let result = sqlx::query("UPDATE notifications SET read = 1 WHERE account_id = ? AND read = 0")
            .bind(account_id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected())
    }
}

// ==================== Stocks ====================

pub struct StockQueries;

impl StockQueries {
    pub async fn insert(conn: &mut SqliteConnection, stock: &NewStock) -> DeskResult<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO stocks (symbol, name, sector, price, is_featured, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&stock.symbol)
        .bind(&stock.name)
        .bind(&stock.sector)
        .bind(stock.price.to_string())
        .bind(stock.is_featured)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if DeskError::is_unique_violation(&e) {
                DeskError::DuplicateSymbol(stock.symbol.clone())
            } else {
                e.into()
            }
        })?;

        Ok(result.last_insert_rowid())
    }

    /// An active stock by ticker.
    pub async fn by_symbol(conn: &mut SqliteConnection, symbol: &str) -> DeskResult<Stock> {
        let row: Option<StoredStock> = sqlx::query_as(&format!(
            "SELECT {} FROM stocks WHERE symbol = ? AND is_active = 1",
            STOCK_COLUMNS
        ))
        .bind(symbol)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(Stock::try_from)
            .transpose()?
            .ok_or_else(|| DeskError::StockNotFound(symbol.to_string()))
    }

    /// Active stocks, featured first.
    pub async fn list(conn: &mut SqliteConnection, featured_only: bool) -> DeskResult<Vec<Stock>> {
        let rows: Vec<StoredStock> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM stocks
            WHERE is_active = 1 AND (? = 0 OR is_featured = 1)
            ORDER BY is_featured DESC, symbol
            "#,
            STOCK_COLUMNS
        ))
        .bind(featured_only)
        .fetch_all(&mut *conn)
        .await?;

        convert_all(rows)
    }

    pub async fn set_price(
        conn: &mut SqliteConnection,
        id: i64,
        price: Decimal,
        change: Decimal,
        change_percent: Decimal,
    ) -> DeskResult<()> {
        sqlx::query(
            "UPDATE stocks SET price = ?, change = ?, change_percent = ?, updated_at = ? WHERE id = ?",
        )
        .bind(price.to_string())
        .bind(change.to_string())
        .bind(change_percent.to_string())
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

// ==================== Stock positions ====================

pub struct PositionQueries;

impl PositionQueries {
    /// The open position of an account in one stock, if any.
    pub async fn open_for(
        conn: &mut SqliteConnection,
        account_id: i64,
        stock_id: i64,
    ) -> DeskResult<Option<StockPosition>> {
        let row: Option<StoredPosition> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM stock_positions p
            JOIN stocks s ON s.id = p.stock_id
            WHERE p.account_id = ? AND p.stock_id = ? AND p.is_active = 1
            "#,
            POSITION_COLUMNS
        ))
        .bind(account_id)
        .bind(stock_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(StockPosition::try_from).transpose()
    }

    pub async fn open(
        conn: &mut SqliteConnection,
        account_id: i64,
        stock_id: i64,
        holding: &Holding,
        average_buy_price: Decimal,
    ) -> DeskResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO stock_positions (
                account_id, stock_id, shares, average_buy_price, total_invested, opened_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account_id)
        .bind(stock_id)
        .bind(holding.shares.to_string())
        .bind(average_buy_price.to_string())
        .bind(holding.total_invested.to_string())
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        holding: &Holding,
        average_buy_price: Decimal,
    ) -> DeskResult<()> {
        sqlx::query(
            "UPDATE stock_positions SET shares = ?, total_invested = ?, average_buy_price = ? WHERE id = ?",
        )
        .bind(holding.shares.to_string())
        .bind(holding.total_invested.to_string())
        .bind(average_buy_price.to_string())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Zero a position out and mark it closed.
    pub async fn close(conn: &mut SqliteConnection, id: i64) -> DeskResult<()> {
        sqlx::query(
            "UPDATE stock_positions SET shares = '0', total_invested = '0', is_active = 0, closed_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Open positions of an account, by ticker.
    pub async fn list(conn: &mut SqliteConnection, account_id: i64) -> DeskResult<Vec<StockPosition>> {
        let rows: Vec<StoredPosition> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM stock_positions p
            JOIN stocks s ON s.id = p.stock_id
            WHERE p.account_id = ? AND p.is_active = 1
            ORDER BY s.symbol
            "#,
            POSITION_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?;

        convert_all(rows)
    }
}

// ==================== Stock fills ====================

pub struct StockTradeQueries;

impl StockTradeQueries {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        conn: &mut SqliteConnection,
        account_id: i64,
        stock_id: i64,
        side: StockSide,
        shares: Decimal,
        price_per_share: Decimal,
        total_amount: Decimal,
        profit_loss: Option<Decimal>,
        reference: &str,
    ) -> DeskResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO stock_trades (
                account_id, stock_id, side, shares, price_per_share, total_amount,
                profit_loss, reference, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account_id)
        .bind(stock_id)
        .bind(side.as_str())
        .bind(shares.to_string())
        .bind(price_per_share.to_string())
        .bind(total_amount.to_string())
        .bind(profit_loss.map(|p| p.to_string()))
        .bind(reference)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get(conn: &mut SqliteConnection, id: i64) -> DeskResult<StockTrade> {
        let row: StoredStockTrade = sqlx::query_as(&format!(
            "SELECT {} FROM stock_trades t JOIN stocks s ON s.id = t.stock_id WHERE t.id = ?",
            STOCK_TRADE_COLUMNS
        ))
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

        StockTrade::try_from(row)
    }

    /// Newest first.
    pub async fn list(
        conn: &mut SqliteConnection,
        account_id: i64,
        limit: i64,
    ) -> DeskResult<Vec<StockTrade>> {
        let rows: Vec<StoredStockTrade> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM stock_trades t
            JOIN stocks s ON s.id = t.stock_id
            WHERE t.account_id = ?
            ORDER BY t.id DESC
            LIMIT ?
            "#,
            STOCK_TRADE_COLUMNS
        ))
        .bind(account_id)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        convert_all(rows)
    }
}

// ==================== Signals ====================

pub struct SignalQueries;

impl SignalQueries {
    pub async fn insert(conn: &mut SqliteConnection, signal: &NewSignal) -> DeskResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO signals (
                name, signal_type, price, signal_strength, action, entry_point, target_price,
                stop_loss, timeframe, risk_level, market_analysis, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.name)
        .bind(signal.signal_type.as_str())
        .bind(signal.price.to_string())
        .bind(i64::from(signal.signal_strength))
        .bind(&signal.action)
        .bind(signal.entry_point.map(|d| d.to_string()))
        .bind(signal.target_price.map(|d| d.to_string()))
        .bind(signal.stop_loss.map(|d| d.to_string()))
        .bind(&signal.timeframe)
        .bind(signal.risk_level.as_str())
        .bind(&signal.market_analysis)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// An active signal.
    pub async fn get(conn: &mut SqliteConnection, id: i64) -> DeskResult<Signal> {
        let row: Option<StoredSignal> = sqlx::query_as(&format!(
            "SELECT {} FROM signals WHERE id = ? AND is_active = 1",
            SIGNAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(Signal::try_from)
            .transpose()?
            .ok_or(DeskError::SignalNotFound(id))
    }

    /// Newest first.
    pub async fn list(conn: &mut SqliteConnection, active_only: bool) -> DeskResult<Vec<Signal>> {
        let rows: Vec<StoredSignal> = sqlx::query_as(&format!(
            "SELECT {} FROM signals WHERE (? = 0 OR is_active = 1) ORDER BY created_at DESC, id DESC",
            SIGNAL_COLUMNS
        ))
        .bind(active_only)
        .fetch_all(&mut *conn)
        .await?;

        convert_all(rows)
    }

    pub async fn has_purchased(
        conn: &mut SqliteConnection,
        account_id: i64,
        signal_id: i64,
    ) -> DeskResult<bool> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM signal_purchases WHERE account_id = ? AND signal_id = ?",
        )
        .bind(account_id)
        .bind(signal_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(count > 0)
    }

    pub async fn record_purchase(
        conn: &mut SqliteConnection,
        account_id: i64,
        signal: &Signal,
        reference: &str,
    ) -> DeskResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO signal_purchases (account_id, signal_id, amount_paid, reference, signal_data, purchased_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account_id)
        .bind(signal.id)
        .bind(signal.price.to_string())
        .bind(reference)
        .bind(signal.snapshot().to_string())
        .bind(Utc::now())
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if DeskError::is_unique_violation(&e) {
                DeskError::AlreadyPurchased {
                    signal: signal.name.clone(),
                }
            } else {
                e.into()
            }
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Signals an account bought, newest first.
    pub async fn purchases(
        conn: &mut SqliteConnection,
        account_id: i64,
    ) -> DeskResult<Vec<SignalPurchase>> {
        let rows: Vec<StoredSignalPurchase> = sqlx::query_as(
            r#"
            SELECT p.id, p.account_id, p.signal_id, s.name AS signal_name, p.amount_paid,
                   p.reference, p.signal_data, p.purchased_at
            FROM signal_purchases p
            JOIN signals s ON s.id = p.signal_id
            WHERE p.account_id = ?
            ORDER BY p.id DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?;

        convert_all(rows)
    }
}
