//! Copy-trading engine: copy relationships, trade events and the P/L fan-out.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::db::{
    AccountQueries, CopyQueries, Database, LedgerQueries, NotificationQueries, TradeQueries,
    TraderQueries,
};
use crate::error::{DeskError, DeskResult};
use crate::metrics::{PerformanceCalculator, TraderPerformance};
use crate::models::{
    generate_reference, validate_percent, CopyRelationship, FollowedTrader, NewLedgerEntry,
    NewNotification, NewTradeEvent, NewTrader, TradeEvent, TradeEventUpdate, TradeStatus, Trader,
};

use super::lifecycle::{transition, LifecycleEffect};

/// One copier's share of a settled trade.
#[derive(Debug, Clone, Serialize)]
pub struct CopierCredit {
    pub account_id: i64,
    pub email: String,
    pub investment: Decimal,
    pub amount: Decimal,
}

/// Result of propagating a closed trade to its copiers.
#[derive(Debug, Clone, Serialize)]
pub struct PropagationReport {
    pub trade_event_id: i64,
    pub reference: String,
    pub credits: Vec<CopierCredit>,
    pub total: Decimal,

    /// The event had been settled before; nothing was credited this time
    pub already_settled: bool,
}

impl PropagationReport {
    /// Number of users notified by this propagation.
    pub fn notified(&self) -> usize {
        self.credits.len()
    }
}

/// A trade event after it was recorded or edited, with what it triggered.
#[derive(Debug, Clone)]
pub struct TradeOutcome {
    pub event: TradeEvent,

    /// Copiers told about a newly opened trade
    pub opened_notified: usize,

    pub propagation: Option<PropagationReport>,
}

/// A trade of a copied trader, scaled to the user's investment.
#[derive(Debug, Clone, Serialize)]
pub struct CopiedTrade {
    pub trader_name: String,
    pub event: TradeEvent,
    pub investment: Decimal,
    pub projected_profit_loss: Decimal,
}

/// Copy-trading engine over the desk database.
#[derive(Clone)]
pub struct CopyEngine {
    db: Database,
}

impl CopyEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ==================== Traders ====================

    pub async fn add_trader(&self, trader: NewTrader) -> DeskResult<Trader> {
        let mut conn = self.db.pool().acquire().await?;
        let id = TraderQueries::insert(&mut conn, &trader).await?;
        info!(trader = %trader.username, id, "Added trader");
        TraderQueries::get(&mut conn, id).await
    }

    pub async fn trader(&self, id: i64) -> DeskResult<Trader> {
        let mut conn = self.db.pool().acquire().await?;
        TraderQueries::get(&mut conn, id).await
    }

    pub async fn traders(&self, active_only: bool, search: Option<&str>) -> DeskResult<Vec<Trader>> {
        let mut conn = self.db.pool().acquire().await?;
        TraderQueries::list(&mut conn, active_only, search).await
    }

    /// Performance computed from the trader's recorded events.
    pub async fn trader_performance(&self, id: i64) -> DeskResult<TraderPerformance> {
        let mut conn = self.db.pool().acquire().await?;
        TraderQueries::get(&mut conn, id).await?;
        let trades = TradeQueries::all_for_trader(&mut conn, id).await?;
        Ok(PerformanceCalculator::calculate(&trades, Utc::now()))
    }

    pub async fn set_trader_active(&self, id: i64, is_active: bool) -> DeskResult<()> {
        let mut conn = self.db.pool().acquire().await?;
        TraderQueries::set_active(&mut conn, id, is_active).await?;
        info!(trader_id = id, is_active, "Updated trader status");
        Ok(())
    }

    // ==================== Copy relationships ====================

    /// Start (or resume) copying a trader, locking in the current balance.
    pub async fn start_copying(&self, account_id: i64, trader_id: i64) -> DeskResult<CopyRelationship> {
        let mut tx = self.db.begin().await?;

        let trader = TraderQueries::get(&mut tx, trader_id).await?;
        if !trader.is_active {
            return Err(DeskError::TraderInactive {
                trader: trader.display_name(),
            });
        }

        AccountQueries::get(&mut tx, account_id).await?;
        let balances = LedgerQueries::balances(&mut tx, account_id).await?;
        if !trader.accepts_balance(balances.balance) {
            return Err(DeskError::InsufficientBalance {
                required: trader.min_account_threshold,
                available: balances.balance,
            });
        }

        let relationship_id = match CopyQueries::find(&mut tx, account_id, trader_id).await? {
            Some(existing) if existing.is_active => {
                return Err(DeskError::AlreadyCopying {
                    trader: trader.display_name(),
                });
            }
            Some(existing) => {
                CopyQueries::reactivate(
                    &mut tx,
                    existing.id,
                    balances.balance,
                    trader.min_account_threshold,
                )
                .await?;
                existing.id
            }
            None => {
                CopyQueries::insert(
                    &mut tx,
                    account_id,
                    trader_id,
                    balances.balance,
                    trader.min_account_threshold,
                )
                .await?
            }
        };

        TraderQueries::adjust_copiers(&mut tx, trader_id, 1).await?;
        let relationship = CopyQueries::find(&mut tx, account_id, trader_id)
            .await?
            .ok_or_else(|| DeskError::Corrupt(format!("copy relationship {} vanished", relationship_id)))?;

        tx.commit().await?;

        info!(
            account_id,
            trader = %trader.username,
            investment = %relationship.initial_investment_amount,
            "Started copying trader"
        );
        Ok(relationship)
    }

    /// Stop copying a trader. The row is kept for reactivation.
    pub async fn stop_copying(&self, account_id: i64, trader_id: i64) -> DeskResult<CopyRelationship> {
        let mut tx = self.db.begin().await?;

        let trader = TraderQueries::get(&mut tx, trader_id).await?;
        let existing = CopyQueries::find(&mut tx, account_id, trader_id)
            .await?
            .filter(|r| r.is_active)
            .ok_or_else(|| DeskError::NotCopying {
                trader: trader.display_name(),
            })?;

        CopyQueries::deactivate(&mut tx, existing.id).await?;
        TraderQueries::adjust_copiers(&mut tx, trader_id, -1).await?;
        let relationship = CopyQueries::find(&mut tx, account_id, trader_id)
            .await?
            .ok_or_else(|| DeskError::Corrupt(format!("copy relationship {} vanished", existing.id)))?;

        tx.commit().await?;

        info!(account_id, trader = %trader.username, "Stopped copying trader");
        Ok(relationship)
    }

    /// The active relationship between an account and a trader, if any.
    pub async fn copy_status(&self, account_id: i64, trader_id: i64) -> DeskResult<Option<CopyRelationship>> {
        let mut conn = self.db.pool().acquire().await?;
        TraderQueries::get(&mut conn, trader_id).await?;
        Ok(CopyQueries::find(&mut conn, account_id, trader_id)
            .await?
            .filter(|r| r.is_active))
    }

    pub async fn following(&self, account_id: i64) -> DeskResult<Vec<FollowedTrader>> {
        let mut conn = self.db.pool().acquire().await?;
        self.following_on(&mut conn, account_id).await
    }

    /// Trades of every actively copied trader, newest first, with the
    /// user's projected share of each.
    pub async fn copied_trades(&self, account_id: i64, limit: usize) -> DeskResult<Vec<CopiedTrade>> {
        let mut conn = self.db.pool().acquire().await?;
        let followed = self.following_on(&mut conn, account_id).await?;

        let mut trades = Vec::new();
        for f in followed {
            let investment = f.relationship.initial_investment_amount;
            for event in TradeQueries::all_for_trader(&mut conn, f.relationship.trader_id).await? {
                trades.push(CopiedTrade {
                    trader_name: f.trader_name.clone(),
                    projected_profit_loss: event.user_profit_loss(investment)?,
                    investment,
                    event,
                });
            }
        }

        trades.sort_by(|a, b| {
            b.event
                .opened_at
                .cmp(&a.event.opened_at)
                .then(b.event.id.cmp(&a.event.id))
        });
        trades.truncate(limit);
        Ok(trades)
    }

    async fn following_on(
        &self,
        conn: &mut SqliteConnection,
        account_id: i64,
    ) -> DeskResult<Vec<FollowedTrader>> {
        AccountQueries::get(conn, account_id).await?;
        CopyQueries::following(conn, account_id).await
    }

    // ==================== Trade events ====================

    /// Record a trade event and apply whatever its initial status triggers.
    pub async fn record_trade(&self, mut trade: NewTradeEvent) -> DeskResult<TradeOutcome> {
        trade.profit_loss_percent = validate_percent(trade.profit_loss_percent)?;
        let now = Utc::now();
        if trade.status == TradeStatus::Closed && trade.closed_at.is_none() {
            trade.closed_at = Some(now);
        }

        let mut tx = self.db.begin().await?;

        let trader = TraderQueries::get(&mut tx, trade.trader_id).await?;
        let reference = generate_reference("TRD");
        let id = TradeQueries::insert(&mut tx, &trade, &reference, now).await?;
        let event = TradeQueries::get(&mut tx, id).await?;

        info!(
            reference = %event.reference,
            trader = %trader.username,
            market = %event.market,
            status = %event.status,
            "Recorded trade event"
        );

        let effects = transition(None, event.status, event.is_settled());
        let outcome = apply_effects(&mut tx, &trader, event, &effects, now).await?;

        tx.commit().await?;
        Ok(outcome)
    }

    /// Edit a trade event. Closing an open, unsettled event settles it.
    pub async fn update_trade(&self, id: i64, mut update: TradeEventUpdate) -> DeskResult<TradeOutcome> {
        update.profit_loss_percent = update.profit_loss_percent.map(validate_percent).transpose()?;
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let mut event = TradeQueries::get(&mut tx, id).await?;
        let previous = event.status;
        update.apply_to(&mut event, now);
        TradeQueries::update(&mut tx, &event).await?;

        let trader = TraderQueries::get(&mut tx, event.trader_id).await?;
        let effects = transition(Some(previous), event.status, event.is_settled());
        if effects.is_empty() && previous == TradeStatus::Open && event.status == TradeStatus::Closed {
            debug!(reference = %event.reference, "Trade closed again after reopening; already settled");
        }

        let outcome = apply_effects(&mut tx, &trader, event, &effects, now).await?;

        tx.commit().await?;
        Ok(outcome)
    }

    /// Close a trade with its final P/L percentage.
    pub async fn close_trade(
        &self,
        id: i64,
        profit_loss_percent: Decimal,
        exit_price: Option<Decimal>,
    ) -> DeskResult<TradeOutcome> {
        self.update_trade(id, TradeEventUpdate::close(profit_loss_percent, exit_price))
            .await
    }

    /// Delete a trade event. Ledger entries it produced keep their amounts.
    pub async fn delete_trade(&self, id: i64) -> DeskResult<TradeEvent> {
        let mut tx = self.db.begin().await?;
        let event = TradeQueries::get(&mut tx, id).await?;
        TradeQueries::delete(&mut tx, id).await?;
        tx.commit().await?;

        info!(reference = %event.reference, "Deleted trade event");
        Ok(event)
    }

    pub async fn trade(&self, id: i64) -> DeskResult<TradeEvent> {
        let mut conn = self.db.pool().acquire().await?;
        TradeQueries::get(&mut conn, id).await
    }

    pub async fn trade_history(
        &self,
        trader_id: Option<i64>,
        status: Option<TradeStatus>,
        limit: i64,
    ) -> DeskResult<Vec<TradeEvent>> {
        let mut conn = self.db.pool().acquire().await?;
        if let Some(trader_id) = trader_id {
            TraderQueries::get(&mut conn, trader_id).await?;
        }
        TradeQueries::list(&mut conn, trader_id, status, limit).await
    }

    /// Settle a closed trade directly, e.g. to retry after a failed close.
    /// A no-op report comes back when it was already settled.
    pub async fn settle(&self, id: i64) -> DeskResult<PropagationReport> {
        let mut tx = self.db.begin().await?;

        let event = TradeQueries::get(&mut tx, id).await?;
        if event.status != TradeStatus::Closed {
            warn!(reference = %event.reference, "Refusing to settle an open trade");
            return Ok(PropagationReport {
                trade_event_id: event.id,
                reference: event.reference,
                credits: Vec::new(),
                total: Decimal::ZERO,
                already_settled: false,
            });
        }

        let trader = TraderQueries::get(&mut tx, event.trader_id).await?;
        let report = propagate(&mut tx, &trader, &event, Utc::now()).await?;

        tx.commit().await?;
        Ok(report)
    }
}

async fn apply_effects(
    conn: &mut SqliteConnection,
    trader: &Trader,
    event: TradeEvent,
    effects: &[LifecycleEffect],
    now: DateTime<Utc>,
) -> DeskResult<TradeOutcome> {
    let mut opened_notified = 0;
    let mut propagation = None;

    for effect in effects {
        match effect {
            LifecycleEffect::NotifyOpened => {
                opened_notified = notify_opened(conn, trader, &event).await?;
            }
            LifecycleEffect::Settle => {
                propagation = Some(propagate(conn, trader, &event, now).await?);
            }
        }
    }

    // Reload so the settlement columns are current
    let event = TradeQueries::get(conn, event.id).await?;

    Ok(TradeOutcome {
        event,
        opened_notified,
        propagation,
    })
}

async fn notify_opened(
    conn: &mut SqliteConnection,
    trader: &Trader,
    event: &TradeEvent,
) -> DeskResult<usize> {
    let copiers = CopyQueries::active_copiers(conn, trader.id).await?;
    for copier in &copiers {
        let notification =
            NewNotification::trade_opened(&trader.name, event, copier.initial_investment_amount);
        NotificationQueries::insert(conn, copier.account_id, &notification).await?;
    }

    debug!(reference = %event.reference, copiers = copiers.len(), "Notified copiers of opened trade");
    Ok(copiers.len())
}

/// Credit every active copier of `trader` with their share of `event`.
///
/// Claims the settlement marker first, so a second call for the same event
/// credits nobody. Runs on the caller's transaction: any error leaves the
/// marker, credits and notifications uncommitted.
async fn propagate(
    conn: &mut SqliteConnection,
    trader: &Trader,
    event: &TradeEvent,
    now: DateTime<Utc>,
) -> DeskResult<PropagationReport> {
    if !TradeQueries::mark_settled(conn, event.id, now).await? {
        debug!(reference = %event.reference, "Trade already settled");
        return Ok(PropagationReport {
            trade_event_id: event.id,
            reference: event.reference.clone(),
            credits: Vec::new(),
            total: Decimal::ZERO,
            already_settled: true,
        });
    }

    let copiers = CopyQueries::active_copiers(conn, trader.id).await?;
    let mut credits = Vec::with_capacity(copiers.len());

    for copier in copiers {
        let amount = event.user_profit_loss(copier.initial_investment_amount)?;
        let account = AccountQueries::get(conn, copier.account_id).await?;

        LedgerQueries::post(
            conn,
            &account,
            &NewLedgerEntry::copy_trade(amount, event.id, &event.reference),
        )
        .await?;

        let notification = NewNotification::copy_trade_settled(
            &trader.name,
            event,
            copier.initial_investment_amount,
            amount,
        );
        NotificationQueries::insert(conn, copier.account_id, &notification).await?;

        debug!(
            email = %copier.email,
            investment = %copier.initial_investment_amount,
            amount = %amount,
            "Credited copier"
        );

        credits.push(CopierCredit {
            account_id: copier.account_id,
            email: copier.email,
            investment: copier.initial_investment_amount,
            amount,
        });
    }

    let settled_copiers = i64::try_from(credits.len())
        .map_err(|_| DeskError::Corrupt(format!("copier count for {}", event.reference)))?;
    TradeQueries::set_settled_copiers(conn, event.id, settled_copiers).await?;

    let total: Decimal = credits.iter().map(|c| c.amount).sum();

    info!(
        reference = %event.reference,
        trader = %trader.username,
        percent = %event.profit_loss_percent,
        copiers = credits.len(),
        total = %total,
        "Propagated trade result to copiers"
    );

    Ok(PropagationReport {
        trade_event_id: event.id,
        reference: event.reference.clone(),
        credits,
        total,
        already_settled: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountService;
    use crate::funding::Cashier;
    use crate::models::{NewAccount, NotificationKind, TradeDirection};
    use crate::trading::DeskConfig;
    use rust_decimal_macros::dec;

    struct Desk {
        db: Database,
        engine: CopyEngine,
        accounts: AccountService,
        cashier: Cashier,
    }

    async fn desk() -> Desk {
        let db = Database::in_memory().await.unwrap();
        Desk {
            engine: CopyEngine::new(db.clone()),
            accounts: AccountService::new(db.clone(), DeskConfig::default()),
            cashier: Cashier::new(db.clone(), DeskConfig::default()),
            db,
        }
    }

    impl Desk {
        async fn funded_account(&self, email: &str, balance: Decimal) -> i64 {
            let account = self
                .accounts
                .create_account(NewAccount {
                    email: email.to_string(),
                    ..Default::default()
                })
                .await
                .unwrap();
            if balance != Decimal::ZERO {
                self.cashier
                    .adjust(account.id, balance, Decimal::ZERO, "opening balance")
                    .await
                    .unwrap();
            }
            account.id
        }

        async fn trader(&self, username: &str) -> Trader {
            self.engine
                .add_trader(NewTrader {
                    name: "Serge".to_string(),
                    username: username.to_string(),
                    ..Default::default()
                })
                .await
                .unwrap()
        }

        async fn balance(&self, account_id: i64) -> (Decimal, Decimal) {
            let b = self.accounts.balances(account_id).await.unwrap();
            (b.balance, b.profit)
        }

        async fn trade_notifications(&self, account_id: i64) -> i64 {
            self.accounts
                .notifications(account_id, Some(NotificationKind::Trade), 100, 0)
                .await
                .unwrap()
                .total_count
        }
    }

    fn open_trade(trader_id: i64) -> NewTradeEvent {
        NewTradeEvent {
            trader_id,
            market: "AAPL".to_string(),
            direction: TradeDirection::Buy,
            duration: "2 hours".to_string(),
            amount: dec!(1000),
            entry_price: dec!(180.50),
            exit_price: None,
            profit_loss_percent: Decimal::ZERO,
            status: TradeStatus::Open,
            notes: String::new(),
            closed_at: None,
        }
    }

    #[tokio::test]
    async fn test_close_credits_each_copier() {
        let desk = desk().await;
        let trader = desk.trader("serge").await;
        let a = desk.funded_account("a@example.com", dec!(1000.00)).await;
        let b = desk.funded_account("b@example.com", dec!(5000.00)).await;
        desk.engine.start_copying(a, trader.id).await.unwrap();
        desk.engine.start_copying(b, trader.id).await.unwrap();

        let opened = desk.engine.record_trade(open_trade(trader.id)).await.unwrap();
        assert_eq!(opened.opened_notified, 2);
        assert!(opened.propagation.is_none());

        let closed = desk
            .engine
            .close_trade(opened.event.id, dec!(10.00), Some(dec!(198.55)))
            .await
            .unwrap();
        let report = closed.propagation.unwrap();

        assert_eq!(report.notified(), 2);
        assert_eq!(report.total, dec!(600.00));
        assert!(!report.already_settled);
        assert!(closed.event.is_settled());
        assert_eq!(closed.event.settled_copiers, Some(2));

        assert_eq!(desk.balance(a).await, (dec!(1100.00), dec!(100.00)));
        assert_eq!(desk.balance(b).await, (dec!(5500.00), dec!(500.00)));
        // One "opened" and one "settled" notification each
        assert_eq!(desk.trade_notifications(a).await, 2);
        assert_eq!(desk.trade_notifications(b).await, 2);
    }

    #[tokio::test]
    async fn test_loss_has_no_floor() {
        let desk = desk().await;
        let trader = desk.trader("serge").await;
        let a = desk.funded_account("a@example.com", dec!(1000.00)).await;
        let b = desk.funded_account("b@example.com", dec!(5000.00)).await;
        desk.engine.start_copying(a, trader.id).await.unwrap();
        desk.engine.start_copying(b, trader.id).await.unwrap();

        let opened = desk.engine.record_trade(open_trade(trader.id)).await.unwrap();
        let closed = desk
            .engine
            .close_trade(opened.event.id, dec!(-20), None)
            .await
            .unwrap();

        assert_eq!(closed.propagation.unwrap().total, dec!(-1200.00));
        assert_eq!(desk.balance(a).await, (dec!(800.00), dec!(-200.00)));
        assert_eq!(desk.balance(b).await, (dec!(4000.00), dec!(-1000.00)));

        let page = desk
            .accounts
            .notifications(a, Some(NotificationKind::Trade), 1, 0)
            .await
            .unwrap();
        assert_eq!(page.notifications[0].title, "Trade Update from Serge");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let desk = desk().await;
        let trader = desk.trader("serge").await;
        let a = desk.funded_account("a@example.com", dec!(1000.00)).await;
        desk.engine.start_copying(a, trader.id).await.unwrap();

        let opened = desk.engine.record_trade(open_trade(trader.id)).await.unwrap();
        let id = opened.event.id;
        desk.engine.close_trade(id, dec!(10), None).await.unwrap();

        // Re-save while closed
        let again = desk.engine.close_trade(id, dec!(10), None).await.unwrap();
        assert!(again.propagation.is_none());

        // Reopen, then close again
        desk.engine
            .update_trade(
                id,
                TradeEventUpdate {
                    status: Some(TradeStatus::Open),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let reclosed = desk.engine.close_trade(id, dec!(50), None).await.unwrap();
        assert!(reclosed.propagation.is_none());

        // Direct retry
        let retry = desk.engine.settle(id).await.unwrap();
        assert!(retry.already_settled);
        assert_eq!(retry.notified(), 0);

        assert_eq!(desk.balance(a).await, (dec!(1100.00), dec!(100.00)));
        let mut conn = desk.db.pool().acquire().await.unwrap();
        assert_eq!(LedgerQueries::count_for_trade(&mut conn, id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_non_copier_untouched() {
        let desk = desk().await;
        let trader = desk.trader("serge").await;
        let other = desk.trader("other").await;
        let copier = desk.funded_account("a@example.com", dec!(1000)).await;
        let bystander = desk.funded_account("c@example.com", dec!(2000)).await;
        desk.engine.start_copying(copier, trader.id).await.unwrap();
        desk.engine.start_copying(bystander, other.id).await.unwrap();

        let opened = desk.engine.record_trade(open_trade(trader.id)).await.unwrap();
        desk.engine.close_trade(opened.event.id, dec!(10), None).await.unwrap();

        assert_eq!(desk.balance(bystander).await, (dec!(2000), dec!(0)));
        assert_eq!(desk.trade_notifications(bystander).await, 0);
    }

    #[tokio::test]
    async fn test_stopped_copier_not_credited() {
        let desk = desk().await;
        let trader = desk.trader("serge").await;
        let a = desk.funded_account("a@example.com", dec!(1000)).await;
        desk.engine.start_copying(a, trader.id).await.unwrap();
        desk.engine.stop_copying(a, trader.id).await.unwrap();

        let opened = desk.engine.record_trade(open_trade(trader.id)).await.unwrap();
        let closed = desk.engine.close_trade(opened.event.id, dec!(10), None).await.unwrap();

        assert_eq!(closed.propagation.unwrap().notified(), 0);
        assert_eq!(closed.event.settled_copiers, Some(0));
        assert_eq!(desk.balance(a).await, (dec!(1000), dec!(0)));
    }

    #[tokio::test]
    async fn test_reactivation_resets_investment() {
        let desk = desk().await;
        let trader = desk.trader("serge").await;
        let a = desk.funded_account("a@example.com", dec!(1000.00)).await;

        let first = desk.engine.start_copying(a, trader.id).await.unwrap();
        assert_eq!(first.initial_investment_amount, dec!(1000.00));
        desk.engine.stop_copying(a, trader.id).await.unwrap();

        desk.cashier
            .adjust(a, dec!(500.00), Decimal::ZERO, "top up")
            .await
            .unwrap();
        let second = desk.engine.start_copying(a, trader.id).await.unwrap();

        assert_eq!(second.id, first.id);
        assert!(second.is_active);
        assert!(second.stopped_at.is_none());
        assert_eq!(second.initial_investment_amount, dec!(1500.00));

        let opened = desk.engine.record_trade(open_trade(trader.id)).await.unwrap();
        let closed = desk.engine.close_trade(opened.event.id, dec!(10), None).await.unwrap();
        assert_eq!(closed.propagation.unwrap().total, dec!(150.00));
    }

    #[tokio::test]
    async fn test_created_closed_settles_once() {
        let desk = desk().await;
        let trader = desk.trader("serge").await;
        let a = desk.funded_account("a@example.com", dec!(1000)).await;
        desk.engine.start_copying(a, trader.id).await.unwrap();

        let mut trade = open_trade(trader.id);
        trade.status = TradeStatus::Closed;
        trade.profit_loss_percent = dec!(5);

        let outcome = desk.engine.record_trade(trade).await.unwrap();
        assert_eq!(outcome.opened_notified, 0);
        assert_eq!(outcome.propagation.as_ref().unwrap().notified(), 1);
        assert!(outcome.event.closed_at.is_some());

        let edited = desk
            .engine
            .update_trade(
                outcome.event.id,
                TradeEventUpdate {
                    notes: Some("typo fixed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(edited.propagation.is_none());
        assert_eq!(desk.balance(a).await, (dec!(1050.00), dec!(50.00)));
    }

    #[tokio::test]
    async fn test_zero_percent_still_settles() {
        let desk = desk().await;
        let trader = desk.trader("serge").await;
        let a = desk.funded_account("a@example.com", dec!(1000)).await;
        desk.engine.start_copying(a, trader.id).await.unwrap();

        let opened = desk.engine.record_trade(open_trade(trader.id)).await.unwrap();
        let closed = desk.engine.close_trade(opened.event.id, Decimal::ZERO, None).await.unwrap();

        let report = closed.propagation.unwrap();
        assert_eq!(report.notified(), 1);
        assert_eq!(report.total, Decimal::ZERO);
        assert_eq!(desk.balance(a).await, (dec!(1000), dec!(0)));

        // A zero-delta entry and a closing notice are still written
        let mut conn = desk.db.pool().acquire().await.unwrap();
        assert_eq!(
            LedgerQueries::count_for_trade(&mut conn, opened.event.id).await.unwrap(),
            1
        );
        drop(conn);
        let entry = desk.accounts.ledger(a, 1).await.unwrap().remove(0);
        assert_eq!(entry.trade_event_id, Some(opened.event.id));
        assert!(entry.balance_delta.is_zero() && entry.profit_delta.is_zero());
        // opened + closed
        assert_eq!(desk.trade_notifications(a).await, 2);
    }

    #[tokio::test]
    async fn test_out_of_range_percent_rejected() {
        let desk = desk().await;
        let trader = desk.trader("serge").await;
        let a = desk.funded_account("a@example.com", dec!(1000)).await;
        desk.engine.start_copying(a, trader.id).await.unwrap();

        let opened = desk.engine.record_trade(open_trade(trader.id)).await.unwrap();
        let huge = dec!(100000000000000000000000000);

        let err = desk.engine.close_trade(opened.event.id, huge, None).await.unwrap_err();
        assert!(matches!(err, DeskError::InvalidAmount(_)));

        let event = desk.engine.trade(opened.event.id).await.unwrap();
        assert_eq!(event.status, TradeStatus::Open);
        assert!(!event.is_settled());
        assert_eq!(desk.balance(a).await, (dec!(1000), dec!(0)));

        let mut created_closed = open_trade(trader.id);
        created_closed.status = TradeStatus::Closed;
        created_closed.profit_loss_percent = -huge;
        assert!(matches!(
            desk.engine.record_trade(created_closed).await,
            Err(DeskError::InvalidAmount(_))
        ));

        // Percentages are kept to cents
        let closed = desk
            .engine
            .close_trade(opened.event.id, dec!(10.005), None)
            .await
            .unwrap();
        assert_eq!(closed.event.profit_loss_percent, dec!(10.01));
        assert_eq!(desk.balance(a).await, (dec!(1100.10), dec!(100.10)));
    }

    #[tokio::test]
    async fn test_failed_propagation_rolls_back() {
        let desk = desk().await;
        let trader = desk.trader("serge").await;
        let a = desk.funded_account("a@example.com", dec!(1000)).await;
        let b = desk.funded_account("b@example.com", dec!(5000)).await;
        desk.engine.start_copying(a, trader.id).await.unwrap();
        desk.engine.start_copying(b, trader.id).await.unwrap();

        let opened = desk.engine.record_trade(open_trade(trader.id)).await.unwrap();

        // Fail while notifying the second copier
        sqlx::query(&format!(
            "CREATE TRIGGER fail_notify BEFORE INSERT ON notifications WHEN NEW.account_id = {} \
             BEGIN SELECT RAISE(ABORT, 'notification store unavailable'); END",
            b
        ))
        .execute(desk.db.pool())
        .await
        .unwrap();

        let result = desk.engine.close_trade(opened.event.id, dec!(10), None).await;
        assert!(matches!(result, Err(DeskError::Database(_))));

        let event = desk.engine.trade(opened.event.id).await.unwrap();
        assert_eq!(event.status, TradeStatus::Open);
        assert!(!event.is_settled());
        assert_eq!(desk.balance(a).await, (dec!(1000), dec!(0)));
        assert_eq!(desk.trade_notifications(a).await, 1);

        sqlx::query("DROP TRIGGER fail_notify")
            .execute(desk.db.pool())
            .await
            .unwrap();

        let closed = desk.engine.close_trade(opened.event.id, dec!(10), None).await.unwrap();
        assert_eq!(closed.propagation.unwrap().total, dec!(600.00));
        assert_eq!(desk.balance(a).await, (dec!(1100.00), dec!(100.00)));
    }

    #[tokio::test]
    async fn test_copy_preconditions() {
        let desk = desk().await;
        let trader = desk
            .engine
            .add_trader(NewTrader {
                name: "Premium".to_string(),
                username: "premium".to_string(),
                min_account_threshold: dec!(2500),
                ..Default::default()
            })
            .await
            .unwrap();
        let poor = desk.funded_account("poor@example.com", dec!(100)).await;
        let rich = desk.funded_account("rich@example.com", dec!(3000)).await;

        let err = desk.engine.start_copying(poor, trader.id).await.unwrap_err();
        assert!(matches!(err, DeskError::InsufficientBalance { .. }));

        desk.engine.start_copying(rich, trader.id).await.unwrap();
        let err = desk.engine.start_copying(rich, trader.id).await.unwrap_err();
        assert!(matches!(err, DeskError::AlreadyCopying { .. }));
        assert_eq!(desk.engine.trader(trader.id).await.unwrap().copiers, 1);

        let err = desk.engine.stop_copying(poor, trader.id).await.unwrap_err();
        assert!(matches!(err, DeskError::NotCopying { .. }));

        desk.engine.set_trader_active(trader.id, false).await.unwrap();
        let err = desk.engine.start_copying(poor, trader.id).await.unwrap_err();
        assert!(matches!(err, DeskError::TraderInactive { .. }));
    }

    #[tokio::test]
    async fn test_copiers_counter_never_negative() {
        let desk = desk().await;
        let trader = desk.trader("serge").await;
        let a = desk.funded_account("a@example.com", dec!(10)).await;

        desk.engine.start_copying(a, trader.id).await.unwrap();
        sqlx::query("UPDATE traders SET copiers = 0 WHERE id = ?")
            .bind(trader.id)
            .execute(desk.db.pool())
            .await
            .unwrap();
        desk.engine.stop_copying(a, trader.id).await.unwrap();

        assert_eq!(desk.engine.trader(trader.id).await.unwrap().copiers, 0);
    }

    #[tokio::test]
    async fn test_delete_keeps_ledger() {
        let desk = desk().await;
        let trader = desk.trader("serge").await;
        let a = desk.funded_account("a@example.com", dec!(1000)).await;
        desk.engine.start_copying(a, trader.id).await.unwrap();

        let opened = desk.engine.record_trade(open_trade(trader.id)).await.unwrap();
        desk.engine.close_trade(opened.event.id, dec!(10), None).await.unwrap();
        desk.engine.delete_trade(opened.event.id).await.unwrap();

        assert!(matches!(
            desk.engine.trade(opened.event.id).await,
            Err(DeskError::TradeEventNotFound(_))
        ));
        assert_eq!(desk.balance(a).await, (dec!(1100), dec!(100)));

        let ledger = desk.accounts.ledger(a, 10).await.unwrap();
        assert_eq!(ledger[0].trade_event_id, None);
        assert_eq!(ledger[0].balance_delta, dec!(100.00));
    }

    #[tokio::test]
    async fn test_copied_trades_projection() {
        let desk = desk().await;
        let trader = desk.trader("serge").await;
        let a = desk.funded_account("a@example.com", dec!(333.33)).await;
        desk.engine.start_copying(a, trader.id).await.unwrap();

        let mut trade = open_trade(trader.id);
        trade.status = TradeStatus::Closed;
        trade.profit_loss_percent = dec!(1.5);
        desk.engine.record_trade(trade).await.unwrap();
        desk.engine.record_trade(open_trade(trader.id)).await.unwrap();

        let copied = desk.engine.copied_trades(a, 10).await.unwrap();
        assert_eq!(copied.len(), 2);
        assert!(copied.iter().all(|c| c.trader_name == "Serge"));
        let closed = copied
            .iter()
            .find(|c| c.event.status == TradeStatus::Closed)
            .unwrap();
        assert_eq!(closed.projected_profit_loss, dec!(5.00));

        let perf = desk.engine.trader_performance(trader.id).await.unwrap();
        assert_eq!(perf.total_trades, 2);
        assert_eq!(perf.wins, 1);

        let following = desk.engine.following(a).await.unwrap();
        assert_eq!(following.len(), 1);
        assert_eq!(following[0].trader_username, "serge");
        assert!(desk.engine.copy_status(a, trader.id).await.unwrap().is_some());
    }
}
