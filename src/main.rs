//! copydesk: copy-trading brokerage back office.
//!
//! Accounts with ledger-derived balances, admin-entered traders and trade
//! events, and the fan-out that credits every copier when a trade closes.
//! Users can also buy and sell listed stocks and purchase trading signals.

mod accounts;
mod brokerage;
mod db;
mod error;
mod funding;
mod metrics;
mod models;
mod trading;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::accounts::AccountService;
use crate::brokerage::Brokerage;
use crate::db::Database;
use crate::funding::Cashier;
use crate::models::{
    FundingKind, FundingStatus, NewAccount, NewSignal, NewStock, NewTradeEvent, NewTrader,
    NotificationKind, RiskLevel, SignalType, TradeEventUpdate, TradeStatus, TransferDirection,
};
use crate::trading::{CopyEngine, DeskConfig};

/// Copy-trading desk CLI.
#[derive(Parser)]
#[command(name = "copydesk")]
#[command(about = "Back office for a copy-trading brokerage", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "COPYDESK_DATABASE", default_value = "sqlite:./copydesk.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "COPYDESK_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a user account
    AccountCreate {
        email: String,

        #[arg(long, default_value = "")]
        first_name: String,

        #[arg(long, default_value = "")]
        last_name: String,

        /// Display currency (defaults to the configured one)
        #[arg(long)]
        currency: Option<String>,
    },

    /// Show an account with its balance and profit
    AccountShow {
        /// Account id or email
        account: String,
    },

    /// List all accounts
    AccountList,

    /// Allow or forbid balance/profit transfers for an account
    AccountTransfers {
        id: i64,

        #[arg(long)]
        disable: bool,
    },

    /// Show an account's latest ledger entries
    Ledger {
        id: i64,

        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// List a new trader
    TraderAdd {
        name: String,
        username: String,

        #[arg(long, default_value = "")]
        country: String,

        /// gold, silver or bronze
        #[arg(long, default_value = "bronze")]
        badge: String,

        /// Advertised gain percentage
        #[arg(long, default_value = "0")]
        gain: Decimal,

        /// Risk score 1-10
        #[arg(long, default_value = "1")]
        risk: u8,

        /// Advertised copier count
        #[arg(long, default_value = "0")]
        copiers: u32,

        /// Minimum balance required to copy
        #[arg(long, default_value = "0")]
        min_balance: Decimal,

        #[arg(long, default_value = "0")]
        wins: u32,

        #[arg(long, default_value = "0")]
        losses: u32,

        #[arg(long, default_value = "")]
        category: String,

        #[arg(long, default_value = "")]
        bio: String,
    },

    /// List traders
    TraderList {
        /// Only traders accepting copiers
        #[arg(long)]
        active: bool,

        /// Match name or username
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Show a trader with performance from recorded trades
    TraderShow {
        id: i64,
    },

    /// Open or close a trader to new copiers
    TraderStatus {
        id: i64,

        #[arg(long)]
        disable: bool,
    },

    /// Start copying a trader
    Copy {
        account: i64,
        trader: i64,
    },

    /// Stop copying a trader
    Uncopy {
        account: i64,
        trader: i64,
    },

    /// Show the copy relationship between an account and a trader
    CopyStatus {
        account: i64,
        trader: i64,
    },

    /// Traders an account is copying
    Following {
        account: i64,
    },

    /// Trades of copied traders with the account's projected P/L
    CopiedTrades {
        account: i64,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Record a trade event
    TradeAdd {
        trader: i64,
        market: String,

        /// buy or sell
        #[arg(long, default_value = "buy")]
        direction: String,

        #[arg(long, default_value = "")]
        duration: String,

        #[arg(long, default_value = "0")]
        amount: Decimal,

        #[arg(long, default_value = "0")]
        entry_price: Decimal,

        #[arg(long)]
        exit_price: Option<Decimal>,

        /// Profit/loss percentage
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        percent: Decimal,

        /// Record the trade as already closed
        #[arg(long)]
        closed: bool,

        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Close a trade and credit every copier
    TradeClose {
        id: i64,

        /// Final profit/loss percentage
        #[arg(allow_negative_numbers = true)]
        percent: Decimal,

        #[arg(long)]
        exit_price: Option<Decimal>,
    },

    /// Edit a trade event
    TradeEdit {
        id: i64,

        #[arg(long)]
        market: Option<String>,

        #[arg(long)]
        direction: Option<String>,

        #[arg(long)]
        duration: Option<String>,

        #[arg(long)]
        amount: Option<Decimal>,

        #[arg(long)]
        entry_price: Option<Decimal>,

        #[arg(long)]
        exit_price: Option<Decimal>,

        #[arg(long, allow_negative_numbers = true)]
        percent: Option<Decimal>,

        /// open or closed
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Show a trade event
    TradeShow {
        id: i64,
    },

    /// Retry settlement of a closed trade
    TradeSettle {
        id: i64,
    },

    /// Delete a trade event
    TradeDelete {
        id: i64,
    },

    /// Trade history
    Trades {
        #[arg(short, long)]
        trader: Option<i64>,

        /// open or closed
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Request a deposit
    Deposit {
        account: i64,
        amount: Decimal,

        #[arg(long)]
        currency: Option<String>,

        #[arg(long, default_value = "")]
        description: String,
    },

    /// Approve a pending deposit
    DepositApprove {
        id: i64,
    },

    /// Reject a pending deposit
    DepositReject {
        id: i64,

        #[arg(long)]
        note: Option<String>,
    },

    /// Change a deposit's amount and status
    DepositRevise {
        id: i64,
        amount: Decimal,

        /// pending, completed, failed or cancelled
        status: String,

        #[arg(long)]
        currency: Option<String>,
    },

    /// Request a withdrawal
    Withdraw {
        account: i64,
        amount: Decimal,

        /// Payout method, e.g. BTC or Bank
        #[arg(long, default_value = "BTC")]
        method: String,

        #[arg(long, default_value = "")]
        address: String,
    },

    /// Approve a pending withdrawal
    WithdrawApprove {
        id: i64,
    },

    /// Reject a pending withdrawal
    WithdrawReject {
        id: i64,

        #[arg(long)]
        note: Option<String>,
    },

    /// List deposit and withdrawal requests
    Requests {
        #[arg(short, long)]
        account: Option<i64>,

        /// deposit or withdrawal
        #[arg(short, long)]
        kind: Option<String>,

        /// pending, completed, failed or cancelled
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Credit earnings to an account
    Earnings {
        account: i64,
        amount: Decimal,

        #[arg(long, default_value = "Earnings")]
        description: String,
    },

    /// Manually adjust balance and profit
    Adjust {
        account: i64,

        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        balance: Decimal,

        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        profit: Decimal,

        #[arg(long, default_value = "Manual adjustment")]
        memo: String,
    },

    /// Move funds between balance and profit
    Transfer {
        account: i64,

        /// balance_to_profit or profit_to_balance
        direction: String,

        amount: Decimal,
    },

    /// List a stock for trading
    StockAdd {
        symbol: String,
        name: String,
        price: Decimal,

        #[arg(long, default_value = "")]
        sector: String,

        #[arg(long)]
        featured: bool,
    },

    /// Set a stock's current price
    StockPrice { symbol: String, price: Decimal },

    /// List tradable stocks
    Stocks {
        #[arg(long)]
        featured: bool,
    },

    /// Buy shares at the current price
    Buy {
        account: i64,
        symbol: String,
        shares: Decimal,
    },

    /// Sell shares of an open position
    Sell {
        account: i64,
        symbol: String,
        shares: Decimal,
    },

    /// Show an account's open stock positions
    Positions { account: i64 },

    /// Show an account's stock buys and sells
    StockTrades {
        account: i64,

        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Publish a trading signal
    SignalAdd {
        name: String,

        /// stock, crypto, forex or commodity
        signal_type: String,

        price: Decimal,

        /// BUY, SELL or HOLD
        #[arg(long, default_value = "HOLD")]
        action: String,

        /// Strength 0-100
        #[arg(long, default_value = "50")]
        strength: u8,

        #[arg(long)]
        entry: Option<Decimal>,

        #[arg(long)]
        target: Option<Decimal>,

        #[arg(long)]
        stop_loss: Option<Decimal>,

        #[arg(long, default_value = "")]
        timeframe: String,

        /// low, medium or high
        #[arg(long, default_value = "medium")]
        risk: String,

        #[arg(long, default_value = "")]
        analysis: String,
    },

    /// List signals
    Signals {
        /// Include inactive signals
        #[arg(long)]
        all: bool,
    },

    /// Purchase a signal for an account
    SignalBuy { account: i64, signal: i64 },

    /// Show the signals an account has purchased
    SignalPurchases { account: i64 },

    /// Show an account's notifications
    Notifications {
        account: i64,

        /// trade, deposit, withdrawal, alert, system or news
        #[arg(short, long)]
        kind: Option<String>,

        #[arg(short, long)]
        limit: Option<i64>,

        #[arg(short, long, default_value = "0")]
        offset: i64,
    },

    /// Mark notifications read
    NotificationRead {
        account: i64,

        /// Notification id; omit with --all
        id: Option<i64>,

        #[arg(long)]
        all: bool,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = DeskConfig::from_env().context("Failed to load configuration")?;

    let db = Database::new(&cli.database).await?;
    let engine = CopyEngine::new(db.clone());
    let accounts = AccountService::new(db.clone(), config.clone());
    let cashier = Cashier::new(db.clone(), config.clone());
    let brokerage = Brokerage::new(db);

    match cli.command {
        Commands::AccountCreate {
            email,
            first_name,
            last_name,
            currency,
        } => {
            let account = accounts
                .create_account(NewAccount {
                    email,
                    first_name,
                    last_name,
                    currency,
                })
                .await?;
            println!("Created account {} <{}>", account.id, account.email);
        }

        Commands::AccountShow { account } => {
            let id = match account.parse::<i64>() {
                Ok(id) => id,
                Err(_) => {
                    accounts
                        .find_by_email(&account)
                        .await?
                        .with_context(|| format!("No account with email {}", account))?
                        .id
                }
            };
            let summary = accounts.summary(id).await?;
            let account = &summary.account;

            println!("\n=== Account {}: {} ===", account.id, account.display_name());
            println!("Email:        {}", account.email);
            println!("Currency:     {}", account.currency);
            println!("Balance:      ${:.2}", summary.balances.balance);
            println!("Profit:       ${:.2}", summary.balances.profit);
            println!("Transfers:    {}", if account.can_transfer { "allowed" } else { "blocked" });
            println!("Active:       {}", if account.is_active { "Yes" } else { "No" });
            println!("Opened:       {}", account.created_at.format("%Y-%m-%d %H:%M"));

            let followed = engine.following(id).await?;
            if !followed.is_empty() {
                println!("\n--- Copying ({}) ---", followed.len());
                for f in followed {
                    println!(
                        "  {} (@{}) with ${:.2}",
                        f.trader_name, f.trader_username, f.relationship.initial_investment_amount
                    );
                }
            }
        }

        Commands::AccountList => {
            let all = accounts.accounts().await?;
            if all.is_empty() {
                println!("No accounts yet. Use 'copydesk account-create <email>' to open one.");
                return Ok(());
            }

            println!("\n{:<6} {:<32} {:<24} {:<5} {:<9}", "ID", "EMAIL", "NAME", "CCY", "TRANSFER");
            println!("{}", "-".repeat(80));
            for a in all {
                println!(
                    "{:<6} {:<32} {:<24} {:<5} {:<9}",
                    a.id,
                    truncate(&a.email, 32),
                    truncate(&a.display_name(), 24),
                    a.currency,
                    if a.can_transfer { "yes" } else { "no" }
                );
            }
        }

        Commands::AccountTransfers { id, disable } => {
            accounts.set_can_transfer(id, !disable).await?;
            let account = accounts.account(id).await?;
            println!(
                "Transfers {} for {}",
                if account.can_transfer { "allowed" } else { "blocked" },
                account.email
            );
        }

        Commands::Ledger { id, limit } => {
            let entries = accounts.ledger(id, limit).await?;
            if entries.is_empty() {
                println!("No ledger entries for account {}.", id);
                return Ok(());
            }

            println!(
                "\n{:<6} {:<12} {:>12} {:>12}  {:<30} {:<16}",
                "ID", "KIND", "BALANCE", "PROFIT", "MEMO", "WHEN"
            );
            println!("{}", "-".repeat(94));
            for e in entries {
                println!(
                    "{:<6} {:<12} {:>12.2} {:>12.2}  {:<30} {:<16}",
                    e.id,
                    e.kind.as_str(),
                    e.balance_delta,
                    e.profit_delta,
                    truncate(&e.memo, 30),
                    e.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Commands::TraderAdd {
            name,
            username,
            country,
            badge,
            gain,
            risk,
            copiers,
            min_balance,
            wins,
            losses,
            category,
            bio,
        } => {
            let trader = engine
                .add_trader(NewTrader {
                    name,
                    username,
                    country,
                    badge: badge.parse()?,
                    gain,
                    risk: risk.clamp(1, 10),
                    copiers,
                    min_account_threshold: min_balance,
                    total_wins: wins,
                    total_losses: losses,
                    category,
                    bio,
                })
                .await?;
            println!("Added trader {}: {}", trader.id, trader.display_name());
        }

        Commands::TraderList { active, search } => {
            let traders = engine.traders(active, search.as_deref()).await?;
            if traders.is_empty() {
                println!("No traders found. Use 'copydesk trader-add <name> <username>' to add one.");
                return Ok(());
            }

            println!(
                "\n{:<5} {:<24} {:<8} {:>8} {:>6} {:>8} {:>8} {:>10}",
                "ID", "NAME", "BADGE", "GAIN%", "RISK", "WIN%", "COPIERS", "MIN BAL"
            );
            println!("{}", "-".repeat(84));
            for t in traders {
                println!(
                    "{:<5} {:<24} {:<8} {:>8.2} {:>6} {:>7.1}% {:>8} {:>10.2}{}",
                    t.id,
                    truncate(&t.display_name(), 24),
                    t.badge.as_str(),
                    t.gain,
                    t.risk,
                    t.win_rate(),
                    t.copiers,
                    t.min_account_threshold,
                    if t.is_active { "" } else { "  (inactive)" }
                );
            }
        }

        Commands::TraderShow { id } => {
            let trader = engine.trader(id).await?;
            let perf = engine.trader_performance(id).await?;

            println!("\n=== Trader: {} ===", trader.display_name());
            println!("Country:        {}", trader.country);
            println!("Category:       {}", trader.category);
            println!("Badge:          {}", trader.badge);
            println!("Gain:           {:.2}%", trader.gain);
            println!("Risk:           {}/10", trader.risk);
            println!("Copiers:        {}", trader.copiers);
            println!("Min Balance:    ${:.2}", trader.min_account_threshold);
            println!("Win Rate:       {:.1}% ({}W / {}L)", trader.win_rate(), trader.total_wins, trader.total_losses);
            println!("Accepting:      {}", if trader.is_active { "Yes" } else { "No" });

            println!("\n--- Recorded Trades ---");
            println!("Total:          {} ({} open, {} closed)", perf.total_trades, perf.open_trades, perf.closed_trades);
            println!("Wins/Losses:    {} / {}", perf.wins, perf.losses);
            println!("Win Rate:       {:.1}%", perf.win_rate);
            println!("Avg Profit:     {:.2}%", perf.avg_profit_percent);
            println!("Avg Loss:       {:.2}%", perf.avg_loss_percent);
            println!("Cumulative:     {:.2}%", perf.cumulative_percent);
            println!("Last 30 days:   {:.2}% over {} trades", perf.cumulative_percent_30d, perf.closed_30d);

            if !perf.top_markets.is_empty() {
                println!("\n--- Top Markets ---");
                for (market, count) in &perf.top_markets {
                    println!("  {:<16} {}", market, count);
                }
            }
        }

        Commands::TraderStatus { id, disable } => {
            engine.set_trader_active(id, !disable).await?;
            println!(
                "Trader {} is {} new copiers",
                id,
                if disable { "closed to" } else { "open to" }
            );
        }

        Commands::Copy { account, trader } => {
            let relationship = engine.start_copying(account, trader).await?;
            println!(
                "Account {} is now copying trader {} with ${:.2}",
                account, trader, relationship.initial_investment_amount
            );
        }

        Commands::Uncopy { account, trader } => {
            engine.stop_copying(account, trader).await?;
            println!("Account {} stopped copying trader {}", account, trader);
        }

        Commands::CopyStatus { account, trader } => match engine.copy_status(account, trader).await? {
            Some(r) => {
                println!("Status:       {}", if r.is_active { "copying" } else { "stopped" });
                println!("Investment:   ${:.2}", r.initial_investment_amount);
                println!("Threshold:    ${:.2}", r.minimum_threshold_at_start);
                println!("Started:      {}", r.started_at.format("%Y-%m-%d %H:%M"));
                if let Some(stopped) = r.stopped_at {
                    println!("Stopped:      {}", stopped.format("%Y-%m-%d %H:%M"));
                }
            }
            None => println!("Account {} has never copied trader {}", account, trader),
        },

        Commands::Following { account } => {
            let followed = engine.following(account).await?;
            if followed.is_empty() {
                println!("Account {} is not copying anyone.", account);
                return Ok(());
            }

            println!("\n{:<24} {:<16} {:>12} {:<16}", "TRADER", "USERNAME", "INVESTED", "SINCE");
            println!("{}", "-".repeat(72));
            for f in followed {
                println!(
                    "{:<24} {:<16} {:>12.2} {:<16}",
                    truncate(&f.trader_name, 24),
                    truncate(&f.trader_username, 16),
                    f.relationship.initial_investment_amount,
                    f.relationship.started_at.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Commands::CopiedTrades { account, limit } => {
            let trades = engine.copied_trades(account, limit).await?;
            if trades.is_empty() {
                println!("No copied trades for account {}.", account);
                return Ok(());
            }

            let now = Utc::now();
            println!(
                "\n{:<18} {:<16} {:<10} {:<5} {:<7} {:>8} {:>12} {:<10}",
                "REF", "TRADER", "MARKET", "DIR", "STATUS", "P/L%", "YOUR P/L", "WHEN"
            );
            println!("{}", "-".repeat(94));
            for c in trades {
                println!(
                    "{:<18} {:<16} {:<10} {:<5} {:<7} {:>8.2} {:>12.2} {:<10}",
                    c.event.reference,
                    truncate(&c.trader_name, 16),
                    truncate(&c.event.market, 10),
                    c.event.direction.as_str(),
                    c.event.status.as_str(),
                    c.event.profit_loss_percent,
                    c.projected_profit_loss,
                    c.event.time_ago(now)
                );
            }
        }

        Commands::TradeAdd {
            trader,
            market,
            direction,
            duration,
            amount,
            entry_price,
            exit_price,
            percent,
            closed,
            notes,
        } => {
            let outcome = engine
                .record_trade(NewTradeEvent {
                    trader_id: trader,
                    market,
                    direction: direction.parse()?,
                    duration,
                    amount,
                    entry_price,
                    exit_price,
                    profit_loss_percent: percent,
                    status: if closed { TradeStatus::Closed } else { TradeStatus::Open },
                    notes,
                    closed_at: None,
                })
                .await?;

            println!("Recorded trade {}", outcome.event.reference);
            if outcome.opened_notified > 0 {
                println!("Notified {} copying users of the new trade.", outcome.opened_notified);
            }
            if let Some(report) = outcome.propagation {
                println!(
                    "Trade {} closed. Notified {} copying users.",
                    report.reference,
                    report.notified()
                );
            }
        }

        Commands::TradeClose {
            id,
            percent,
            exit_price,
        } => {
            let outcome = engine.close_trade(id, percent, exit_price).await?;
            match outcome.propagation {
                Some(report) => {
                    println!(
                        "Trade {} closed. Notified {} copying users.",
                        report.reference,
                        report.notified()
                    );
                    for credit in &report.credits {
                        println!("  {:<32} {:>12.2}", truncate(&credit.email, 32), credit.amount);
                    }
                }
                None => println!(
                    "Trade {} updated. Already settled, no copiers credited.",
                    outcome.event.reference
                ),
            }
        }

        Commands::TradeEdit {
            id,
            market,
            direction,
            duration,
            amount,
            entry_price,
            exit_price,
            percent,
            status,
            notes,
        } => {
            let update = TradeEventUpdate {
                market,
                direction: direction.map(|d| d.parse()).transpose()?,
                duration,
                amount,
                entry_price,
                exit_price,
                profit_loss_percent: percent,
                status: status.map(|s| s.parse()).transpose()?,
                notes,
                closed_at: None,
            };
            let outcome = engine.update_trade(id, update).await?;

            println!("Updated trade {} ({})", outcome.event.reference, outcome.event.status);
            if let Some(report) = outcome.propagation {
                println!(
                    "Trade {} closed. Notified {} copying users.",
                    report.reference,
                    report.notified()
                );
            }
        }

        Commands::TradeShow { id } => {
            let t = engine.trade(id).await?;
            println!("\n=== Trade {} ===", t.reference);
            println!("Trader:       {}", t.trader_id);
            println!("Market:       {} ({})", t.market, t.direction);
            println!("Duration:     {}", t.duration);
            println!("Amount:       ${:.2}", t.amount);
            println!("Entry:        {}", t.entry_price);
            if let Some(exit) = t.exit_price {
                println!("Exit:         {}", exit);
            }
            println!("P/L:          {:.2}%", t.profit_loss_percent);
            println!("Status:       {}", t.status);
            println!("Opened:       {}", t.opened_at.format("%Y-%m-%d %H:%M"));
            if let Some(closed) = t.closed_at {
                println!("Closed:       {}", closed.format("%Y-%m-%d %H:%M"));
            }
            match (t.settled_at, t.settled_copiers) {
                (Some(at), copiers) => println!(
                    "Settled:      {} ({} copiers)",
                    at.format("%Y-%m-%d %H:%M"),
                    copiers.unwrap_or(0)
                ),
                (None, _) => println!("Settled:      no"),
            }
            if !t.notes.is_empty() {
                println!("Notes:        {}", t.notes);
            }
        }

        Commands::TradeSettle { id } => {
            let report = engine.settle(id).await?;
            if report.already_settled {
                println!("Trade {} was already settled.", report.reference);
            } else {
                println!(
                    "Trade {} settled. Notified {} copying users, total ${:.2}.",
                    report.reference,
                    report.notified(),
                    report.total
                );
            }
        }

        Commands::TradeDelete { id } => {
            let event = engine.delete_trade(id).await?;
            println!("Deleted trade {}", event.reference);
        }

        Commands::Trades {
            trader,
            status,
            limit,
        } => {
            let status: Option<TradeStatus> = status.map(|s| s.parse()).transpose()?;
            let trades = engine.trade_history(trader, status, limit).await?;
            if trades.is_empty() {
                println!("No trades found.");
                return Ok(());
            }

            let now = Utc::now();
            println!(
                "\n{:<5} {:<18} {:<7} {:<10} {:<5} {:<7} {:>8} {:>8} {:<10}",
                "ID", "REF", "TRADER", "MARKET", "DIR", "STATUS", "P/L%", "COPIERS", "WHEN"
            );
            println!("{}", "-".repeat(86));
            for t in trades {
                println!(
                    "{:<5} {:<18} {:<7} {:<10} {:<5} {:<7} {:>8.2} {:>8} {:<10}",
                    t.id,
                    t.reference,
                    t.trader_id,
                    truncate(&t.market, 10),
                    t.direction.as_str(),
                    t.status.as_str(),
                    t.profit_loss_percent,
                    t.settled_copiers
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    t.time_ago(now)
                );
            }
        }

        Commands::Deposit {
            account,
            amount,
            currency,
            description,
        } => {
            let currency = currency.unwrap_or_else(|| config.default_currency.clone());
            let request = cashier
                .request_deposit(account, amount, &currency, &description)
                .await?;
            println!(
                "Deposit {} of ${:.2} submitted (request {}, pending approval)",
                request.reference, request.amount, request.id
            );
        }

        Commands::DepositApprove { id } => {
            let request = cashier.approve_deposit(id).await?;
            let balances = accounts.balances(request.account_id).await?;
            println!(
                "Deposit {} approved. Balance now ${:.2}",
                request.reference, balances.balance
            );
        }

        Commands::DepositReject { id, note } => {
            let request = cashier.reject_deposit(id, note.as_deref()).await?;
            println!("Deposit {} rejected", request.reference);
        }

        Commands::DepositRevise {
            id,
            amount,
            status,
            currency,
        } => {
            let status: FundingStatus = status.parse()?;
            let request = cashier
                .revise_deposit(id, amount, currency.as_deref(), status)
                .await?;
            let balances = accounts.balances(request.account_id).await?;
            println!(
                "Deposit {} is now ${:.2} {} ({}). Balance now ${:.2}",
                request.reference, request.amount, request.currency, request.status, balances.balance
            );
        }

        Commands::Withdraw {
            account,
            amount,
            method,
            address,
        } => {
            let request = cashier
                .request_withdrawal(account, amount, &method, &address)
                .await?;
            println!(
                "Withdrawal {} of ${:.2} submitted (request {}, pending approval)",
                request.reference, request.amount, request.id
            );
        }

        Commands::WithdrawApprove { id } => {
            let request = cashier.approve_withdrawal(id).await?;
            let balances = accounts.balances(request.account_id).await?;
            println!(
                "Withdrawal {} approved. Balance now ${:.2}",
                request.reference, balances.balance
            );
        }

        Commands::WithdrawReject { id, note } => {
            let request = cashier.reject_withdrawal(id, note.as_deref()).await?;
            println!("Withdrawal {} rejected", request.reference);
        }

        Commands::Requests {
            account,
            kind,
            status,
        } => {
            let kind: Option<FundingKind> = kind.map(|k| k.parse()).transpose()?;
            let status: Option<FundingStatus> = status.map(|s| s.parse()).transpose()?;
            let requests = cashier.funding_requests(account, kind, status).await?;
            if requests.is_empty() {
                println!("No requests found.");
                return Ok(());
            }

            println!(
                "\n{:<5} {:<18} {:<8} {:<11} {:>12} {:<8} {:<10} {:<16}",
                "ID", "REF", "ACCOUNT", "KIND", "AMOUNT", "VIA", "STATUS", "CREATED"
            );
            println!("{}", "-".repeat(94));
            for r in requests {
                println!(
                    "{:<5} {:<18} {:<8} {:<11} {:>12.2} {:<8} {:<10} {:<16}",
                    r.id,
                    r.reference,
                    r.account_id,
                    r.kind.as_str(),
                    r.amount,
                    truncate(&r.currency, 8),
                    r.status.as_str(),
                    r.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Commands::Earnings {
            account,
            amount,
            description,
        } => {
            let request = cashier.credit_earnings(account, amount, &description).await?;
            println!("Credited ${:.2} to account {} ({})", request.amount, account, request.reference);
        }

        Commands::Adjust {
            account,
            balance,
            profit,
            memo,
        } => {
            let balances = cashier.adjust(account, balance, profit, &memo).await?;
            println!(
                "Account {} adjusted. Balance ${:.2}, profit ${:.2}",
                account, balances.balance, balances.profit
            );
        }

        Commands::Transfer {
            account,
            direction,
            amount,
        } => {
            let direction: TransferDirection = direction.parse()?;
            let balances = cashier.transfer(account, direction, amount).await?;
            println!(
                "Transferred ${:.2} ({}). Balance ${:.2}, profit ${:.2}",
                amount,
                direction.as_str(),
                balances.balance,
                balances.profit
            );
        }

        Commands::StockAdd {
            symbol,
            name,
            price,
            sector,
            featured,
        } => {
            let stock = brokerage
                .list_stock(NewStock {
                    symbol,
                    name,
                    sector,
                    price,
                    is_featured: featured,
                })
                .await?;
            println!("Listed {} ({}) at ${:.2}", stock.symbol, stock.name, stock.price);
        }

        Commands::StockPrice { symbol, price } => {
            let stock = brokerage.update_price(&symbol, price).await?;
            println!(
                "{} now ${:.2} ({} ${:.2}, {:+.2}%)",
                stock.symbol,
                stock.price,
                if stock.is_positive_change() { "up" } else { "down" },
                stock.change.abs(),
                stock.change_percent
            );
        }

        Commands::Stocks { featured } => {
            let stocks = brokerage.stocks(featured).await?;
            if stocks.is_empty() {
                println!("No stocks listed. Use 'copydesk stock-add <symbol> <name> <price>' to add one.");
                return Ok(());
            }

            println!(
                "\n{:<8} {:<28} {:<16} {:>10} {:>10} {:>8}",
                "SYMBOL", "NAME", "SECTOR", "PRICE", "CHANGE", "CHG%"
            );
            println!("{}", "-".repeat(84));
            for s in stocks {
                println!(
                    "{:<8} {:<28} {:<16} {:>10.2} {:>+10.2} {:>+8.2}{}",
                    s.symbol,
                    truncate(&s.name, 28),
                    truncate(&s.sector, 16),
                    s.price,
                    s.change,
                    s.change_percent,
                    if s.is_featured { "  *" } else { "" }
                );
            }
        }

        Commands::Buy {
            account,
            symbol,
            shares,
        } => {
            let fill = brokerage.buy_stock(account, &symbol, shares).await?;
            println!(
                "Bought {} {} at ${:.2} for ${:.2} ({})",
                fill.trade.shares.normalize(),
                fill.trade.symbol,
                fill.trade.price_per_share,
                fill.trade.total_amount,
                fill.trade.reference
            );
            if let Some(position) = fill.position {
                println!(
                    "Position: {} shares, average ${:.2}",
                    position.shares.normalize(),
                    position.average_buy_price
                );
            }
            println!("Balance ${:.2}", fill.balances.balance);
        }

        Commands::Sell {
            account,
            symbol,
            shares,
        } => {
            let fill = brokerage.sell_stock(account, &symbol, shares).await?;
            println!(
                "Sold {} {} at ${:.2} for ${:.2} ({})",
                fill.trade.shares.normalize(),
                fill.trade.symbol,
                fill.trade.price_per_share,
                fill.trade.total_amount,
                fill.trade.reference
            );
            if let Some(pl) = fill.trade.profit_loss {
                println!("Realised P/L: ${:.2}", pl);
            }
            match fill.position {
                Some(position) => println!("Remaining: {} shares", position.shares.normalize()),
                None => println!("Position closed"),
            }
            println!("Balance ${:.2}", fill.balances.balance);
        }

        Commands::Positions { account } => {
            let positions = brokerage.positions(account).await?;
            if positions.is_empty() {
                println!("No open positions for account {}", account);
                return Ok(());
            }

            println!(
                "\n{:<8} {:>14} {:>10} {:>12} {:>10} {:>12} {:>12} {:>8}",
                "SYMBOL", "SHARES", "AVG", "INVESTED", "PRICE", "VALUE", "P/L", "P/L%"
            );
            println!("{}", "-".repeat(94));
            for p in positions {
                println!(
                    "{:<8} {:>14} {:>10.2} {:>12.2} {:>10.2} {:>12.2} {:>+12.2} {:>+8.2}",
                    p.symbol,
                    p.shares.normalize(),
                    p.average_buy_price,
                    p.total_invested,
                    p.current_price,
                    p.current_value()?,
                    p.profit_loss()?,
                    p.profit_loss_percent()?
                );
            }
        }

        Commands::StockTrades { account, limit } => {
            let fills = brokerage.stock_trades(account, limit).await?;
            if fills.is_empty() {
                println!("No stock trades for account {}", account);
                return Ok(());
            }

            println!(
                "\n{:<18} {:<5} {:<8} {:>14} {:>10} {:>12} {:>10} {:<16}",
                "REFERENCE", "SIDE", "SYMBOL", "SHARES", "PRICE", "TOTAL", "P/L", "TIME"
            );
            println!("{}", "-".repeat(100));
            for t in fills {
                println!(
                    "{:<18} {:<5} {:<8} {:>14} {:>10.2} {:>12.2} {:>10} {:<16}",
                    t.reference,
                    t.side.as_str(),
                    t.symbol,
                    t.shares.normalize(),
                    t.price_per_share,
                    t.total_amount,
                    t.profit_loss.map(|p| format!("{:.2}", p)).unwrap_or_else(|| "-".to_string()),
                    t.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Commands::SignalAdd {
            name,
            signal_type,
            price,
            action,
            strength,
            entry,
            target,
            stop_loss,
            timeframe,
            risk,
            analysis,
        } => {
            let signal_type: SignalType = signal_type.parse()?;
            let risk_level: RiskLevel = risk.parse()?;
            let signal = brokerage
                .add_signal(NewSignal {
                    name,
                    signal_type,
                    price,
                    signal_strength: strength,
                    action,
                    entry_point: entry,
                    target_price: target,
                    stop_loss,
                    timeframe,
                    risk_level,
                    market_analysis: analysis,
                })
                .await?;
            println!("Published signal {}: {} (${:.2})", signal.id, signal.name, signal.price);
        }

        Commands::Signals { all } => {
            let signals = brokerage.signals(!all).await?;
            if signals.is_empty() {
                println!("No signals published.");
                return Ok(());
            }

            println!(
                "\n{:<5} {:<28} {:<10} {:<6} {:>9} {:>5} {:<8} {:<12}",
                "ID", "NAME", "TYPE", "ACTION", "PRICE", "STR", "RISK", "TIMEFRAME"
            );
            println!("{}", "-".repeat(90));
            for s in signals {
                println!(
                    "{:<5} {:<28} {:<10} {:<6} {:>9.2} {:>5} {:<8} {:<12}{}",
                    s.id,
                    truncate(&s.name, 28),
                    s.signal_type.as_str(),
                    s.action,
                    s.price,
                    s.signal_strength,
                    s.risk_level.as_str(),
                    truncate(&s.timeframe, 12),
                    if s.is_active { "" } else { "  (inactive)" }
                );
            }
        }

        Commands::SignalBuy { account, signal } => {
            let purchase = brokerage.purchase_signal(account, signal).await?;
            println!(
                "Purchased {} for ${:.2} ({})",
                purchase.signal_name, purchase.amount_paid, purchase.reference
            );
            println!("{}", serde_json::to_string_pretty(&purchase.signal_data)?);
        }

        Commands::SignalPurchases { account } => {
            let purchases = brokerage.purchases(account).await?;
            if purchases.is_empty() {
                println!("No signals purchased by account {}", account);
                return Ok(());
            }

            println!("\n{:<18} {:<32} {:>9} {:<16}", "REFERENCE", "SIGNAL", "PAID", "TIME");
            println!("{}", "-".repeat(78));
            for p in purchases {
                println!(
                    "{:<18} {:<32} {:>9.2} {:<16}",
                    p.reference,
                    truncate(&p.signal_name, 32),
                    p.amount_paid,
                    p.purchased_at.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Commands::Notifications {
            account,
            kind,
            limit,
            offset,
        } => {
            let kind: Option<NotificationKind> = kind.map(|k| k.parse()).transpose()?;
            let page = accounts
                .notifications(account, kind, limit.unwrap_or(config.notification_page_size), offset)
                .await?;

            println!(
                "\n{} notifications, {} unread",
                page.total_count, page.unread_count
            );
            if page.notifications.is_empty() {
                return Ok(());
            }

            println!("\n{:<6} {:<1} {:<10} {:<32} {:<40}", "ID", "", "KIND", "TITLE", "MESSAGE");
            println!("{}", "-".repeat(94));
            for n in page.notifications {
                println!(
                    "{:<6} {:<1} {:<10} {:<32} {:<40}",
                    n.id,
                    if n.read { " " } else { "*" },
                    n.kind.as_str(),
                    truncate(&n.title, 32),
                    truncate(&n.message, 40)
                );
            }
        }

        Commands::NotificationRead { account, id, all } => {
            if all {
                let changed = accounts.mark_all_read(account).await?;
                println!("Marked {} notifications read", changed);
            } else {
                let id = id.context("Give a notification id or --all")?;
                accounts.mark_read(account, id).await?;
                println!("Marked notification {} read", id);
            }
        }

        Commands::Config => {
            print_config(&config, &cli.database);
        }
    }

    info!("Done");
    Ok(())
}

fn print_config(config: &DeskConfig, database: &str) {
    println!("\n=== Desk Configuration ===\n");
    println!("Database:               {}", database);
    println!("Default Currency:       {}", config.default_currency);
    println!("Min Deposit:            ${:.2}", config.min_deposit);
    println!("Min Withdrawal:         ${:.2}", config.min_withdrawal);
    println!("Notification Page Size: {}", config.notification_page_size);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
