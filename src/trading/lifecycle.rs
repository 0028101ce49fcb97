//! Trade-event lifecycle: which side effects a status change triggers.
//!
//! Creating an event and editing one go through the same table, so an event
//! created already closed settles exactly like one that was opened and then
//! closed. Settlement is one-shot: once the event carries its settlement
//! marker no later transition credits copiers again.

use crate::models::TradeStatus;

/// Side effect of a trade-event transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEffect {
    /// Tell active copiers the trader opened a position
    NotifyOpened,
    /// Credit every active copier with their share of the P/L
    Settle,
}

/// Effects for moving from `previous` (None on creation) to `next`.
pub fn transition(
    previous: Option<TradeStatus>,
    next: TradeStatus,
    settled: bool,
) -> Vec<LifecycleEffect> {
    match (previous, next) {
        (None, TradeStatus::Open) => vec![LifecycleEffect::NotifyOpened],
        (None, TradeStatus::Closed) => vec![LifecycleEffect::Settle],
        (Some(TradeStatus::Open), TradeStatus::Closed) if !settled => {
            vec![LifecycleEffect::Settle]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation() {
        assert_eq!(
            transition(None, TradeStatus::Open, false),
            vec![LifecycleEffect::NotifyOpened]
        );
        assert_eq!(
            transition(None, TradeStatus::Closed, false),
            vec![LifecycleEffect::Settle]
        );
    }

    #[test]
    fn test_close_settles_once() {
        assert_eq!(
            transition(Some(TradeStatus::Open), TradeStatus::Closed, false),
            vec![LifecycleEffect::Settle]
        );
        // Reopened and closed again
        assert!(transition(Some(TradeStatus::Open), TradeStatus::Closed, true).is_empty());
    }

    #[test]
    fn test_edits_are_inert() {
        for settled in [false, true] {
            assert!(transition(Some(TradeStatus::Closed), TradeStatus::Closed, settled).is_empty());
            assert!(transition(Some(TradeStatus::Closed), TradeStatus::Open, settled).is_empty());
            assert!(transition(Some(TradeStatus::Open), TradeStatus::Open, settled).is_empty());
        }
    }
}
