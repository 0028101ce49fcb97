//! Calculator for trader performance from recorded trade events: win rate,
//! average gain/loss, cumulative return, busiest markets.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{round_money, TradeEvent, TradeStatus};

/// Markets reported in `top_markets`.
const TOP_MARKETS: usize = 10;

/// Performance summary derived from a trader's trade events.
///
/// Independent of the admin-entered figures on `Trader`, which stay the
/// ones shown to users.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraderPerformance {
    pub total_trades: u32,
    pub open_trades: u32,
    pub closed_trades: u32,

    /// Closed with a positive percentage
    pub wins: u32,
    /// Closed with a negative percentage
    pub losses: u32,

    /// Percentage of decided trades that were wins (0-100)
    pub win_rate: Decimal,

    /// Mean percentage over winning trades
    pub avg_profit_percent: Decimal,
    /// Mean absolute percentage over losing trades
    pub avg_loss_percent: Decimal,

    /// Sum of closed trade percentages
    pub cumulative_percent: Decimal,

    pub best_percent: Option<Decimal>,
    pub worst_percent: Option<Decimal>,

    // Recent performance
    pub closed_30d: u32,
    pub cumulative_percent_30d: Decimal,

    /// Most traded markets with their trade counts, busiest first
    pub top_markets: Vec<(String, u32)>,
}

/// Calculator for computing trader performance.
pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Calculate performance from a trader's trade events.
    pub fn calculate(trades: &[TradeEvent], now: DateTime<Utc>) -> TraderPerformance {
        let mut perf = TraderPerformance::default();

        if trades.is_empty() {
            return perf;
        }

        perf.total_trades = saturating_count(trades.len());

        let closed: Vec<&TradeEvent> = trades
            .iter()
            .filter(|t| t.status == TradeStatus::Closed)
            .collect();
        perf.closed_trades = saturating_count(closed.len());
        perf.open_trades = perf.total_trades - perf.closed_trades;

        Self::calculate_outcomes(&mut perf, &closed);
        Self::calculate_recent(&mut perf, &closed, now);
        perf.top_markets = Self::top_markets(trades);

        perf
    }

    /// Win/loss statistics over closed trades.
    fn calculate_outcomes(perf: &mut TraderPerformance, closed: &[&TradeEvent]) {
        let percents: Vec<Decimal> = closed.iter().map(|t| t.profit_loss_percent).collect();

        let wins: Vec<Decimal> = percents.iter().copied().filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = percents.iter().copied().filter(|p| *p < Decimal::ZERO).collect();

        perf.wins = saturating_count(wins.len());
        perf.losses = saturating_count(losses.len());
        perf.cumulative_percent = percents.iter().copied().sum();

        let decided = wins.len() + losses.len();
        if decided > 0 {
            perf.win_rate = round_money(
                Decimal::from(wins.len()) / Decimal::from(decided) * Decimal::ONE_HUNDRED,
            );
        }

        if !wins.is_empty() {
            perf.avg_profit_percent =
                round_money(wins.iter().copied().sum::<Decimal>() / Decimal::from(wins.len()));
        }
        if !losses.is_empty() {
            perf.avg_loss_percent = round_money(
                losses.iter().map(|l| l.abs()).sum::<Decimal>() / Decimal::from(losses.len()),
            );
        }

        perf.best_percent = percents.iter().copied().max();
        perf.worst_percent = percents.iter().copied().min();
    }

    /// Closed-trade figures for the last 30 days, by close time.
    fn calculate_recent(perf: &mut TraderPerformance, closed: &[&TradeEvent], now: DateTime<Utc>) {
        let thirty_days_ago = now - Duration::days(30);

        let recent: Vec<&&TradeEvent> = closed
            .iter()
            .filter(|t| t.closed_at.unwrap_or(t.opened_at) >= thirty_days_ago)
            .collect();

        perf.closed_30d = saturating_count(recent.len());
        perf.cumulative_percent_30d = recent.iter().map(|t| t.profit_loss_percent).sum();
    }

    fn top_markets(trades: &[TradeEvent]) -> Vec<(String, u32)> {
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for trade in trades {
            let count = counts.entry(trade.market.as_str()).or_insert(0);
            *count = count.saturating_add(1);
        }

        let mut markets: Vec<(String, u32)> = counts
            .into_iter()
            .map(|(market, count)| (market.to_string(), count))
            .collect();
        markets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        markets.truncate(TOP_MARKETS);
        markets
    }
}

fn saturating_count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeDirection;
    use rust_decimal_macros::dec;

    fn trade(market: &str, pct: Decimal, status: TradeStatus, days_ago: i64) -> TradeEvent {
        let at = Utc::now() - Duration::days(days_ago);
        TradeEvent {
            id: 0,
            trader_id: 1,
            reference: "TRD-000000000000".to_string(),
            market: market.to_string(),
            direction: TradeDirection::Buy,
            duration: String::new(),
            amount: dec!(100),
            entry_price: dec!(1),
            exit_price: None,
            profit_loss_percent: pct,
            status,
            notes: String::new(),
            opened_at: at,
            closed_at: (status == TradeStatus::Closed).then_some(at),
            settled_at: None,
            settled_copiers: None,
        }
    }

    #[test]
    fn test_empty_history() {
        let perf = PerformanceCalculator::calculate(&[], Utc::now());
        assert_eq!(perf.total_trades, 0);
        assert_eq!(perf.win_rate, Decimal::ZERO);
        assert!(perf.top_markets.is_empty());
        assert!(perf.best_percent.is_none());
    }

    #[test]
    fn test_calculate_outcomes() {
        let trades = vec![
            trade("AAPL", dec!(10), TradeStatus::Closed, 40), // Win
            trade("AAPL", dec!(-5), TradeStatus::Closed, 2),  // Loss
            trade("TSLA", dec!(20), TradeStatus::Closed, 1),  // Win
            trade("BTC", dec!(0), TradeStatus::Closed, 1),    // Neither
            trade("AAPL", dec!(0), TradeStatus::Open, 0),
        ];

        let perf = PerformanceCalculator::calculate(&trades, Utc::now());

        assert_eq!(perf.total_trades, 5);
        assert_eq!(perf.open_trades, 1);
        assert_eq!(perf.closed_trades, 4);
        assert_eq!(perf.wins, 2);
        assert_eq!(perf.losses, 1);
        assert_eq!(perf.win_rate, dec!(66.67));
        assert_eq!(perf.avg_profit_percent, dec!(15));
        assert_eq!(perf.avg_loss_percent, dec!(5));
        assert_eq!(perf.cumulative_percent, dec!(25));
        assert_eq!(perf.best_percent, Some(dec!(20)));
        assert_eq!(perf.worst_percent, Some(dec!(-5)));
        assert_eq!(perf.closed_30d, 3);
        assert_eq!(perf.cumulative_percent_30d, dec!(15));
        assert_eq!(perf.top_markets[0], ("AAPL".to_string(), 3));
        assert_eq!(perf.top_markets.len(), 3);
    }

    #[test]
    fn test_counts_saturate() {
        assert_eq!(saturating_count(7), 7);
        assert_eq!(saturating_count(u32::MAX as usize), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(saturating_count(u32::MAX as usize + 1), u32::MAX);
    }

    #[test]
    fn test_top_markets_capped() {
        let trades: Vec<TradeEvent> = (0..15)
            .map(|i| trade(&format!("M{:02}", i), dec!(1), TradeStatus::Closed, 0))
            .collect();

        let perf = PerformanceCalculator::calculate(&trades, Utc::now());
        assert_eq!(perf.top_markets.len(), TOP_MARKETS);
        assert_eq!(perf.top_markets[0].0, "M00");
    }
}
