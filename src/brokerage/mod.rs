//! Stock buying and selling against the account balance, plus paid signals.
//!
//! A buy debits the balance and opens or averages into the account's
//! position; a sell credits the proceeds and realises P/L against the
//! position's cost basis. Each fill posts one ledger entry, one fill row and
//! one notification in a single transaction.

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::db::{
    AccountQueries, Database, LedgerQueries, NotificationQueries, PositionQueries, SignalQueries,
    StockQueries, StockTradeQueries,
};
use crate::error::{DeskError, DeskResult};
use crate::funding::{ensure_balance, positive};
use crate::models::{
    generate_reference, normalize_symbol, round_money, share_value, validate_shares, Balances,
    Holding, NewLedgerEntry, NewNotification, NewSignal, NewStock, Signal, SignalPurchase, Stock,
    StockPosition, StockSide, StockTrade,
};

/// Outcome of a buy or sell.
#[derive(Debug, Clone)]
pub struct StockFill {
    pub trade: StockTrade,

    /// Position after the fill; `None` once everything is sold
    pub position: Option<StockPosition>,

    pub balances: Balances,
}

/// Stock listings, user stock positions and signal sales.
#[derive(Clone)]
pub struct Brokerage {
    db: Database,
}

impl Brokerage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ==================== Listings ====================

    pub async fn list_stock(&self, stock: NewStock) -> DeskResult<Stock> {
        let stock = NewStock {
            symbol: normalize_symbol(&stock.symbol),
            price: positive(stock.price)?,
            ..stock
        };

        let mut conn = self.db.pool().acquire().await?;
        StockQueries::insert(&mut conn, &stock).await?;
        let listed = StockQueries::by_symbol(&mut conn, &stock.symbol).await?;

        info!(symbol = %listed.symbol, price = %listed.price, "Stock listed");
        Ok(listed)
    }

    /// Set a new price, recording the move from the previous one.
    pub async fn update_price(&self, symbol: &str, price: Decimal) -> DeskResult<Stock> {
        let price = positive(price)?;
        let symbol = normalize_symbol(symbol);

        let mut conn = self.db.pool().acquire().await?;
        let stock = StockQueries::by_symbol(&mut conn, &symbol).await?;

        let change = price - stock.price;
        let change_percent = change
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|v| v.checked_div(stock.price))
            .map(round_money)
            .ok_or_else(|| DeskError::Overflow(format!("{} move to {}", symbol, price)))?;

        StockQueries::set_price(&mut conn, stock.id, price, change, change_percent).await?;
        let stock = StockQueries::by_symbol(&mut conn, &symbol).await?;

        info!(symbol = %symbol, price = %price, change = %change, "Stock price updated");
        Ok(stock)
    }

    pub async fn stock(&self, symbol: &str) -> DeskResult<Stock> {
        let mut conn = self.db.pool().acquire().await?;
        StockQueries::by_symbol(&mut conn, &normalize_symbol(symbol)).await
    }

    pub async fn stocks(&self, featured_only: bool) -> DeskResult<Vec<Stock>> {
        let mut conn = self.db.pool().acquire().await?;
        StockQueries::list(&mut conn, featured_only).await
    }

    // ==================== Fills ====================

    /// Buy `shares` at the listed price, debiting the balance.
    pub async fn buy_stock(&self, account_id: i64, symbol: &str, shares: Decimal) -> DeskResult<StockFill> {
        let shares = validate_shares(shares)?;
        let symbol = normalize_symbol(symbol);

        let mut tx = self.db.begin().await?;
        let stock = StockQueries::by_symbol(&mut tx, &symbol).await?;
        let account = AccountQueries::get(&mut tx, account_id).await?;

        let cost = positive(share_value(shares, stock.price)?)?;
        let balances = LedgerQueries::balances(&mut tx, account.id).await?;
        if let Err(err) = ensure_balance(&balances, cost) {
            warn!(account_id, symbol = %symbol, cost = %cost, "Stock buy not covered by balance");
            return Err(err);
        }

        let reference = generate_reference("BUY");
        let entry = NewLedgerEntry::stock_buy(cost, &stock.symbol, &reference);
        LedgerQueries::post(&mut tx, &account, &entry).await?;
        let balances = balances.apply(&entry)?;

        match PositionQueries::open_for(&mut tx, account.id, stock.id).await? {
            Some(position) => {
                let holding = position.holding().buy(shares, cost)?;
                PositionQueries::update(&mut tx, position.id, &holding, holding.average_price()?).await?;
            }
            None => {
                let holding = Holding::default().buy(shares, cost)?;
                PositionQueries::open(&mut tx, account.id, stock.id, &holding, stock.price).await?;
            }
        }

        let trade_id = StockTradeQueries::insert(
            &mut tx,
            account.id,
            stock.id,
            StockSide::Buy,
            shares,
            stock.price,
            cost,
            None,
            &reference,
        )
        .await?;
        let trade = StockTradeQueries::get(&mut tx, trade_id).await?;
        NotificationQueries::insert(&mut tx, account.id, &NewNotification::stock_bought(&trade)).await?;
        let position = PositionQueries::open_for(&mut tx, account.id, stock.id).await?;

        tx.commit().await?;

        info!(
            account_id,
            symbol = %symbol,
            shares = %shares,
            cost = %cost,
            reference = %reference,
            "Stock bought"
        );
        Ok(StockFill { trade, position, balances })
    }

    /// Sell `shares` of an open position at the listed price.
    pub async fn sell_stock(&self, account_id: i64, symbol: &str, shares: Decimal) -> DeskResult<StockFill> {
        let shares = validate_shares(shares)?;
        let symbol = normalize_symbol(symbol);

        let mut tx = self.db.begin().await?;
        let stock = StockQueries::by_symbol(&mut tx, &symbol).await?;
        let account = AccountQueries::get(&mut tx, account_id).await?;
        let position = PositionQueries::open_for(&mut tx, account.id, stock.id)
            .await?
            .ok_or_else(|| DeskError::NoPosition { symbol: symbol.clone() })?;

        let proceeds = share_value(shares, stock.price)?;
        let sale = position.holding().sell(shares, proceeds)?;

        let reference = generate_reference("SELL");
        let entry = NewLedgerEntry::stock_sell(proceeds, &stock.symbol, &reference);
        let balances = LedgerQueries::balances(&mut tx, account.id).await?;
        LedgerQueries::post(&mut tx, &account, &entry).await?;
        let balances = balances.apply(&entry)?;

        if sale.remaining.shares.is_zero() {
            PositionQueries::close(&mut tx, position.id).await?;
        } else {
            PositionQueries::update(&mut tx, position.id, &sale.remaining, position.average_buy_price).await?;
        }

        let trade_id = StockTradeQueries::insert(
            &mut tx,
            account.id,
            stock.id,
            StockSide::Sell,
            shares,
            stock.price,
            proceeds,
            Some(sale.profit_loss),
            &reference,
        )
        .await?;
        let trade = StockTradeQueries::get(&mut tx, trade_id).await?;
        NotificationQueries::insert(&mut tx, account.id, &NewNotification::stock_sold(&trade, &sale))
            .await?;
        let position = PositionQueries::open_for(&mut tx, account.id, stock.id).await?;

        tx.commit().await?;

        info!(
            account_id,
            symbol = %symbol,
            shares = %shares,
            proceeds = %proceeds,
            profit_loss = %sale.profit_loss,
            reference = %reference,
            "Stock sold"
        );
        Ok(StockFill { trade, position, balances })
    }

    pub async fn positions(&self, account_id: i64) -> DeskResult<Vec<StockPosition>> {
        let mut conn = self.db.pool().acquire().await?;
        AccountQueries::get(&mut conn, account_id).await?;
        PositionQueries::list(&mut conn, account_id).await
    }

    pub async fn stock_trades(&self, account_id: i64, limit: i64) -> DeskResult<Vec<StockTrade>> {
        let mut conn = self.db.pool().acquire().await?;
        AccountQueries::get(&mut conn, account_id).await?;
        StockTradeQueries::list(&mut conn, account_id, limit).await
    }

    // ==================== Signals ====================

    pub async fn add_signal(&self, signal: NewSignal) -> DeskResult<Signal> {
        let signal = NewSignal {
            price: positive(signal.price)?,
            signal_strength: signal.signal_strength.min(100),
            action: signal.action.trim().to_uppercase(),
            ..signal
        };

        let mut conn = self.db.pool().acquire().await?;
        let id = SignalQueries::insert(&mut conn, &signal).await?;
        let signal = SignalQueries::get(&mut conn, id).await?;

        info!(signal_id = id, name = %signal.name, price = %signal.price, "Signal published");
        Ok(signal)
    }

    pub async fn signals(&self, active_only: bool) -> DeskResult<Vec<Signal>> {
        let mut conn = self.db.pool().acquire().await?;
        SignalQueries::list(&mut conn, active_only).await
    }

    /// Buy a signal once, paying its price from the balance.
    pub async fn purchase_signal(&self, account_id: i64, signal_id: i64) -> DeskResult<SignalPurchase> {
        let mut tx = self.db.begin().await?;
        let signal = SignalQueries::get(&mut tx, signal_id).await?;
        let account = AccountQueries::get(&mut tx, account_id).await?;

        if SignalQueries::has_purchased(&mut tx, account.id, signal.id).await? {
            return Err(DeskError::AlreadyPurchased { signal: signal.name });
        }

        let balances = LedgerQueries::balances(&mut tx, account.id).await?;
        if let Err(err) = ensure_balance(&balances, signal.price) {
            warn!(account_id, signal_id, "Signal purchase not covered by balance");
            return Err(err);
        }

        let reference = generate_reference("SIG");
        LedgerQueries::post(
            &mut tx,
            &account,
            &NewLedgerEntry::signal_purchase(signal.price, &signal.name, &reference),
        )
        .await?;
        let purchase_id = SignalQueries::record_purchase(&mut tx, account.id, &signal, &reference).await?;
        NotificationQueries::insert(
            &mut tx,
            account.id,
            &NewNotification::signal_purchased(&signal, &reference),
        )
        .await?;
        let purchase = SignalQueries::purchases(&mut tx, account.id)
            .await?
            .into_iter()
            .find(|p| p.id == purchase_id)
            .ok_or(DeskError::SignalNotFound(signal.id))?;

        tx.commit().await?;

        info!(account_id, signal_id, reference = %reference, price = %signal.price, "Signal purchased");
        Ok(purchase)
    }

    pub async fn purchases(&self, account_id: i64) -> DeskResult<Vec<SignalPurchase>> {
        let mut conn = self.db.pool().acquire().await?;
        AccountQueries::get(&mut conn, account_id).await?;
        SignalQueries::purchases(&mut conn, account_id).await
    }
}
