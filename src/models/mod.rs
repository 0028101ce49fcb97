//! Data models for accounts, traders, trade events, copies, ledger, notifications,
//! stocks and signals.

mod account;
mod copy;
mod funding;
mod ledger;
mod notification;
mod signal;
mod stock;
mod trade;
mod trader;

pub use account::{normalize_email, Account, AccountSummary, NewAccount};
pub use copy::{Copier, CopyRelationship, FollowedTrader};
pub use funding::{FundingKind, FundingRequest, FundingStatus};
pub use ledger::{
    round_money, Balances, EntryKind, LedgerEntry, NewLedgerEntry, TransferDirection, MONEY_SCALE,
};
pub use notification::{NewNotification, Notification, NotificationKind, NotificationPage};
pub use signal::{NewSignal, RiskLevel, Signal, SignalPurchase, SignalType};
pub use stock::{
    normalize_symbol, share_value, validate_shares, Holding, NewStock, Stock, StockPosition,
    StockSide, StockTrade,
};
pub use trade::{
    generate_reference, validate_percent, NewTradeEvent, TradeDirection, TradeEvent,
    TradeEventUpdate, TradeStatus,
};
pub use trader::{Badge, NewTrader, Trader};
