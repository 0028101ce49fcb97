//! Money in and out of accounts: deposits, withdrawals, earnings,
//! admin adjustments and balance/profit transfers.
//!
//! Every operation that touches the ledger runs in one transaction together
//! with its request status change and notification.

use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::db::{AccountQueries, Database, FundingQueries, LedgerQueries, NotificationQueries};
use crate::error::{DeskError, DeskResult};
use crate::models::{
    generate_reference, round_money, Balances, FundingKind, FundingRequest, FundingStatus,
    NewLedgerEntry, NewNotification, TransferDirection,
};
use crate::trading::DeskConfig;

/// Admin and user money operations.
#[derive(Clone)]
pub struct Cashier {
    db: Database,
    config: DeskConfig,
}

impl Cashier {
    pub fn new(db: Database, config: DeskConfig) -> Self {
        Self { db, config }
    }

    // ==================== Deposits ====================

    /// File a pending deposit. The balance moves only on approval.
    pub async fn request_deposit(
        &self,
        account_id: i64,
        amount: Decimal,
        currency: &str,
        description: &str,
    ) -> DeskResult<FundingRequest> {
        let amount = positive(amount)?;
        if amount < self.config.min_deposit {
            return Err(DeskError::InvalidAmount(amount));
        }

        let mut tx = self.db.begin().await?;
        AccountQueries::get(&mut tx, account_id).await?;

        let reference = generate_reference("DEP");
        let id = FundingQueries::insert(
            &mut tx,
            account_id,
            FundingKind::Deposit,
            amount,
            currency,
            FundingStatus::Pending,
            &reference,
            description,
        )
        .await?;
        NotificationQueries::insert(
            &mut tx,
            account_id,
            &NewNotification::deposit_submitted(amount, currency, &reference),
        )
        .await?;
        let request = FundingQueries::get(&mut tx, id).await?;

        tx.commit().await?;

        info!(account_id, reference = %reference, amount = %amount, "Deposit requested");
        Ok(request)
    }

    pub async fn approve_deposit(&self, id: i64) -> DeskResult<FundingRequest> {
        let mut tx = self.db.begin().await?;

        let request = claim_pending(&mut tx, id, FundingKind::Deposit, FundingStatus::Completed).await?;
        let account = AccountQueries::get(&mut tx, request.account_id).await?;
        LedgerQueries::post(
            &mut tx,
            &account,
            &NewLedgerEntry::deposit(request.amount, request.id, &request.reference),
        )
        .await?;
        NotificationQueries::insert(
            &mut tx,
            request.account_id,
            &NewNotification::deposit_approved(request.amount, &request.reference),
        )
        .await?;
        let request = FundingQueries::get(&mut tx, id).await?;

        tx.commit().await?;

        info!(reference = %request.reference, amount = %request.amount, "Deposit approved");
        Ok(request)
    }

    pub async fn reject_deposit(&self, id: i64, note: Option<&str>) -> DeskResult<FundingRequest> {
        let mut tx = self.db.begin().await?;

        let request = claim_pending(&mut tx, id, FundingKind::Deposit, FundingStatus::Failed).await?;
        NotificationQueries::insert(
            &mut tx,
            request.account_id,
            &NewNotification::deposit_rejected(request.amount, note),
        )
        .await?;
        let request = FundingQueries::get(&mut tx, id).await?;

        tx.commit().await?;

        info!(reference = %request.reference, "Deposit rejected");
        Ok(request)
    }

    /// Admin edit of a deposit's amount and status. The ledger follows the
    /// difference between what was credited before and what should be now.
    pub async fn revise_deposit(
        &self,
        id: i64,
        amount: Decimal,
        currency: Option<&str>,
        status: FundingStatus,
    ) -> DeskResult<FundingRequest> {
        let amount = positive(amount)?;
        let mut tx = self.db.begin().await?;

        let request = FundingQueries::get(&mut tx, id).await?;
        if request.kind != FundingKind::Deposit {
            return Err(DeskError::FundingRequestNotFound(id));
        }

        let credited_before = credited(request.status, request.amount);
        let credited_after = credited(status, amount);
        let delta = credited_after - credited_before;

        if !delta.is_zero() {
            let account = AccountQueries::get(&mut tx, request.account_id).await?;
            LedgerQueries::post(
                &mut tx,
                &account,
                &NewLedgerEntry::deposit(delta, request.id, &request.reference),
            )
            .await?;
        }

        let currency = currency.unwrap_or(request.currency.as_str());
        FundingQueries::revise(&mut tx, id, amount, currency, status).await?;
        NotificationQueries::insert(
            &mut tx,
            request.account_id,
            &NewNotification::deposit_updated(amount, currency, status.as_str(), &request.reference),
        )
        .await?;
        let revised = FundingQueries::get(&mut tx, id).await?;

        tx.commit().await?;

        info!(
            reference = %revised.reference,
            from = %request.status,
            to = %status,
            delta = %delta,
            "Deposit revised"
        );
        Ok(revised)
    }

    // ==================== Withdrawals ====================

    /// File a pending withdrawal. It must be covered by the balance now and
    /// again at approval time.
    pub async fn request_withdrawal(
        &self,
        account_id: i64,
        amount: Decimal,
        method: &str,
        address: &str,
    ) -> DeskResult<FundingRequest> {
        let amount = positive(amount)?;
        if amount < self.config.min_withdrawal {
            return Err(DeskError::InvalidAmount(amount));
        }

        let mut tx = self.db.begin().await?;
        AccountQueries::get(&mut tx, account_id).await?;
        let balances = LedgerQueries::balances(&mut tx, account_id).await?;
        ensure_balance(&balances, amount)?;

        let reference = generate_reference("WDR");
        let id = FundingQueries::insert(
            &mut tx,
            account_id,
            FundingKind::Withdrawal,
            amount,
            method,
            FundingStatus::Pending,
            &reference,
            &format!("Withdrawal to {}", address),
        )
        .await?;
        NotificationQueries::insert(
            &mut tx,
            account_id,
            &NewNotification::withdrawal_submitted(amount, method, &reference, address),
        )
        .await?;
        let request = FundingQueries::get(&mut tx, id).await?;

        tx.commit().await?;

        info!(account_id, reference = %reference, amount = %amount, "Withdrawal requested");
        Ok(request)
    }

    /// Pay out a withdrawal, debiting the balance.
    pub async fn approve_withdrawal(&self, id: i64) -> DeskResult<FundingRequest> {
        let mut tx = self.db.begin().await?;

        let request =
            claim_pending(&mut tx, id, FundingKind::Withdrawal, FundingStatus::Completed).await?;
        let account = AccountQueries::get(&mut tx, request.account_id).await?;
        let balances = LedgerQueries::balances(&mut tx, account.id).await?;
        if let Err(err) = ensure_balance(&balances, request.amount) {
            warn!(reference = %request.reference, "Withdrawal no longer covered by balance");
            return Err(err);
        }

        LedgerQueries::post(
            &mut tx,
            &account,
            &NewLedgerEntry::withdrawal(request.amount, request.id, &request.reference),
        )
        .await?;
        NotificationQueries::insert(
            &mut tx,
            request.account_id,
            &NewNotification::withdrawal_approved(request.amount, &request.reference),
        )
        .await?;
        let request = FundingQueries::get(&mut tx, id).await?;

        tx.commit().await?;

        info!(reference = %request.reference, amount = %request.amount, "Withdrawal approved");
        Ok(request)
    }

    /// Decline a withdrawal. Nothing was debited, so nothing is refunded.
    pub async fn reject_withdrawal(&self, id: i64, note: Option<&str>) -> DeskResult<FundingRequest> {
        let mut tx = self.db.begin().await?;

        let request = claim_pending(&mut tx, id, FundingKind::Withdrawal, FundingStatus::Failed).await?;
        NotificationQueries::insert(
            &mut tx,
            request.account_id,
            &NewNotification::withdrawal_rejected(request.amount, note),
        )
        .await?;
        let request = FundingQueries::get(&mut tx, id).await?;

        tx.commit().await?;

        info!(reference = %request.reference, "Withdrawal rejected");
        Ok(request)
    }

    pub async fn funding_requests(
        &self,
        account_id: Option<i64>,
        kind: Option<FundingKind>,
        status: Option<FundingStatus>,
    ) -> DeskResult<Vec<FundingRequest>> {
        let mut conn = self.db.pool().acquire().await?;
        FundingQueries::list(&mut conn, account_id, kind, status).await
    }

    // ==================== Admin credits ====================

    /// Credit earnings to the balance, recorded as a completed deposit.
    pub async fn credit_earnings(
        &self,
        account_id: i64,
        amount: Decimal,
        description: &str,
    ) -> DeskResult<FundingRequest> {
        let amount = positive(amount)?;
        let mut tx = self.db.begin().await?;

        let account = AccountQueries::get(&mut tx, account_id).await?;
        let reference = generate_reference("EARN");
        let id = FundingQueries::insert(
            &mut tx,
            account_id,
            FundingKind::Deposit,
            amount,
            &account.currency,
            FundingStatus::Completed,
            &reference,
            description,
        )
        .await?;
        LedgerQueries::post(&mut tx, &account, &NewLedgerEntry::earnings(amount, id, description))
            .await?;
        NotificationQueries::insert(
            &mut tx,
            account_id,
            &NewNotification::earnings_added(amount, description),
        )
        .await?;
        let request = FundingQueries::get(&mut tx, id).await?;

        tx.commit().await?;

        info!(account_id, reference = %reference, amount = %amount, "Earnings credited");
        Ok(request)
    }

    /// Manual correction of balance and/or profit. May go negative.
    pub async fn adjust(
        &self,
        account_id: i64,
        balance_delta: Decimal,
        profit_delta: Decimal,
        memo: &str,
    ) -> DeskResult<Balances> {
        let entry = NewLedgerEntry::adjustment(balance_delta, profit_delta, memo);
        if entry.balance_delta.is_zero() && entry.profit_delta.is_zero() {
            return Err(DeskError::InvalidAmount(Decimal::ZERO));
        }

        let mut tx = self.db.begin().await?;
        let account = AccountQueries::get(&mut tx, account_id).await?;
        LedgerQueries::post(&mut tx, &account, &entry).await?;
        let balances = LedgerQueries::balances(&mut tx, account_id).await?;
        tx.commit().await?;

        info!(
            account_id,
            balance_delta = %entry.balance_delta,
            profit_delta = %entry.profit_delta,
            "Account adjusted"
        );
        Ok(balances)
    }

    /// Move funds between balance and profit.
    pub async fn transfer(
        &self,
        account_id: i64,
        direction: TransferDirection,
        amount: Decimal,
    ) -> DeskResult<Balances> {
        let amount = positive(amount)?;
        let mut tx = self.db.begin().await?;

        let account = AccountQueries::get(&mut tx, account_id).await?;
        if !account.can_transfer {
            return Err(DeskError::TransferNotPermitted(account_id));
        }

        let balances = LedgerQueries::balances(&mut tx, account_id).await?;
        match direction {
            TransferDirection::BalanceToProfit => ensure_balance(&balances, amount)?,
            TransferDirection::ProfitToBalance if balances.profit < amount => {
                return Err(DeskError::InsufficientProfit {
                    required: amount,
                    available: balances.profit,
                });
            }
            TransferDirection::ProfitToBalance => {}
        }

        let entry = NewLedgerEntry::transfer(direction, amount);
        LedgerQueries::post(&mut tx, &account, &entry).await?;
        let balances = balances.apply(&entry)?;
        tx.commit().await?;

        info!(account_id, direction = direction.as_str(), amount = %amount, "Funds transferred");
        Ok(balances)
    }
}

pub(crate) fn positive(amount: Decimal) -> DeskResult<Decimal> {
    let amount = round_money(amount);
    if amount <= Decimal::ZERO {
        return Err(DeskError::InvalidAmount(amount));
    }
    Ok(amount)
}

pub(crate) fn ensure_balance(balances: &Balances, amount: Decimal) -> DeskResult<()> {
    if balances.balance < amount {
        return Err(DeskError::InsufficientBalance {
            required: amount,
            available: balances.balance,
        });
    }
    Ok(())
}

/// What a deposit in `status` contributes to the balance.
fn credited(status: FundingStatus, amount: Decimal) -> Decimal {
    if status == FundingStatus::Completed {
        amount
    } else {
        Decimal::ZERO
    }
}

/// Move a pending request of `kind` to `status`, failing if it was
/// already resolved.
async fn claim_pending(
    conn: &mut SqliteConnection,
    id: i64,
    kind: FundingKind,
    status: FundingStatus,
) -> DeskResult<FundingRequest> {
    let request = FundingQueries::get(conn, id).await?;
    if request.kind != kind {
        return Err(DeskError::FundingRequestNotFound(id));
    }
    if !FundingQueries::resolve(conn, id, status).await? {
        return Err(DeskError::RequestAlreadyResolved {
            reference: request.reference,
            status: request.status.to_string(),
        });
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountService;
    use crate::models::{EntryKind, NewAccount, NotificationKind};
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    struct Desk {
        db: Database,
        accounts: AccountService,
        cashier: Cashier,
    }

    async fn desk() -> Desk {
        let db = Database::in_memory().await.unwrap();
        Desk {
            accounts: AccountService::new(db.clone(), DeskConfig::default()),
            cashier: Cashier::new(db.clone(), DeskConfig::default()),
            db,
        }
    }

    impl Desk {
        async fn account(&self, email: &str) -> i64 {
            self.accounts
                .create_account(NewAccount {
                    email: email.to_string(),
                    ..Default::default()
                })
                .await
                .unwrap()
                .id
        }

        async fn balances(&self, account_id: i64) -> Balances {
            self.accounts.balances(account_id).await.unwrap()
        }

        async fn funded(&self, email: &str, amount: Decimal) -> i64 {
            let id = self.account(email).await;
            let request = self.cashier.request_deposit(id, amount, "USDT", "").await.unwrap();
            self.cashier.approve_deposit(request.id).await.unwrap();
            id
        }
    }

    #[tokio::test]
    async fn test_deposit_approval_credits_once() {
        let desk = desk().await;
        let id = desk.account("a@example.com").await;

        let request = assert_ok!(desk.cashier.request_deposit(id, dec!(250), "BTC", "first").await);
        assert!(request.is_pending());
        assert!(request.reference.starts_with("DEP-"));
        assert_eq!(desk.balances(id).await.balance, Decimal::ZERO);

        let approved = assert_ok!(desk.cashier.approve_deposit(request.id).await);
        assert_eq!(approved.status, FundingStatus::Completed);
        assert_eq!(desk.balances(id).await.balance, dec!(250));

        let err = assert_err!(desk.cashier.approve_deposit(request.id).await);
        assert!(matches!(err, DeskError::RequestAlreadyResolved { .. }));
        assert_eq!(desk.balances(id).await.balance, dec!(250));

        let page = desk
            .accounts
            .notifications(id, Some(NotificationKind::Deposit), 10, 0)
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.notifications[0].title, "Deposit Approved");
    }

    #[tokio::test]
    async fn test_deposit_validation() {
        let desk = desk().await;
        let id = desk.account("a@example.com").await;

        assert!(matches!(
            desk.cashier.request_deposit(id, dec!(0), "USD", "").await,
            Err(DeskError::InvalidAmount(_))
        ));
        assert!(matches!(
            desk.cashier.request_deposit(id, dec!(0.50), "USD", "").await,
            Err(DeskError::InvalidAmount(_))
        ));
        assert!(matches!(
            desk.cashier.request_deposit(99, dec!(10), "USD", "").await,
            Err(DeskError::AccountNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_rejected_deposit_not_credited() {
        let desk = desk().await;
        let id = desk.account("a@example.com").await;
        let request = desk.cashier.request_deposit(id, dec!(100), "USD", "").await.unwrap();

        let rejected = desk
            .cashier
            .reject_deposit(request.id, Some("Receipt unreadable"))
            .await
            .unwrap();
        assert_eq!(rejected.status, FundingStatus::Failed);
        assert_eq!(desk.balances(id).await.balance, Decimal::ZERO);

        let alerts = desk
            .accounts
            .notifications(id, Some(NotificationKind::Alert), 10, 0)
            .await
            .unwrap();
        assert_eq!(alerts.notifications[0].full_details, "Receipt unreadable");
    }

    #[tokio::test]
    async fn test_revise_deposit_moves_difference() {
        let desk = desk().await;
        let id = desk.funded("a@example.com", dec!(100)).await;
        let request = desk
            .cashier
            .funding_requests(Some(id), Some(FundingKind::Deposit), None)
            .await
            .unwrap()
            .remove(0);

        // completed 100 -> completed 150
        desk.cashier
            .revise_deposit(request.id, dec!(150), None, FundingStatus::Completed)
            .await
            .unwrap();
        assert_eq!(desk.balances(id).await.balance, dec!(150));

        // completed -> failed takes it all back
        desk.cashier
            .revise_deposit(request.id, dec!(150), None, FundingStatus::Failed)
            .await
            .unwrap();
        assert_eq!(desk.balances(id).await.balance, Decimal::ZERO);

        // failed -> completed credits the new amount
        let revised = desk
            .cashier
            .revise_deposit(request.id, dec!(80), Some("EUR"), FundingStatus::Completed)
            .await
            .unwrap();
        assert_eq!(revised.currency, "EUR");
        assert_eq!(desk.balances(id).await.balance, dec!(80));
    }

    #[tokio::test]
    async fn test_withdrawal_cannot_overdraw() {
        let desk = desk().await;
        let id = desk.funded("a@example.com", dec!(100)).await;

        let err = desk
            .cashier
            .request_withdrawal(id, dec!(150), "BTC", "bc1qxyz")
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::InsufficientBalance { .. }));

        let first = desk.cashier.request_withdrawal(id, dec!(80), "BTC", "bc1qxyz").await.unwrap();
        let second = desk.cashier.request_withdrawal(id, dec!(80), "BTC", "bc1qxyz").await.unwrap();
        assert!(first.reference.starts_with("WDR-"));

        desk.cashier.approve_withdrawal(first.id).await.unwrap();
        assert_eq!(desk.balances(id).await.balance, dec!(20));

        // Second one is no longer covered
        let err = desk.cashier.approve_withdrawal(second.id).await.unwrap_err();
        assert!(matches!(err, DeskError::InsufficientBalance { .. }));
        let still_pending = desk
            .cashier
            .funding_requests(Some(id), Some(FundingKind::Withdrawal), Some(FundingStatus::Pending))
            .await
            .unwrap();
        assert_eq!(still_pending.len(), 1);
        assert_eq!(desk.balances(id).await.balance, dec!(20));
    }

    #[tokio::test]
    async fn test_rejected_withdrawal_leaves_ledger() {
        let desk = desk().await;
        let id = desk.funded("a@example.com", dec!(100)).await;
        let request = desk.cashier.request_withdrawal(id, dec!(40), "Bank", "DE89").await.unwrap();

        desk.cashier.reject_withdrawal(request.id, None).await.unwrap();
        assert_eq!(desk.balances(id).await.balance, dec!(100));

        let err = desk.cashier.reject_withdrawal(request.id, None).await.unwrap_err();
        assert!(matches!(err, DeskError::RequestAlreadyResolved { .. }));

        // A deposit id is not a withdrawal
        let deposit = desk
            .cashier
            .funding_requests(Some(id), Some(FundingKind::Deposit), None)
            .await
            .unwrap()
            .remove(0);
        assert!(matches!(
            desk.cashier.approve_withdrawal(deposit.id).await,
            Err(DeskError::FundingRequestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_credit_earnings() {
        let desk = desk().await;
        let id = desk.account("a@example.com").await;

        let request = desk.cashier.credit_earnings(id, dec!(12.345), "Referral bonus").await.unwrap();
        assert!(request.reference.starts_with("EARN-"));
        assert_eq!(request.status, FundingStatus::Completed);
        assert_eq!(request.amount, dec!(12.35));
        assert_eq!(desk.balances(id).await.balance, dec!(12.35));

        let ledger = desk.accounts.ledger(id, 10).await.unwrap();
        assert_eq!(ledger[0].kind, EntryKind::Earnings);
        assert_eq!(ledger[0].funding_request_id, Some(request.id));
    }

    #[tokio::test]
    async fn test_transfer_rules() {
        let desk = desk().await;
        let id = desk.funded("a@example.com", dec!(100)).await;
        desk.accounts.set_can_transfer(id, true).await.unwrap();

        let balances = desk
            .cashier
            .transfer(id, TransferDirection::BalanceToProfit, dec!(30))
            .await
            .unwrap();
        assert_eq!(balances.balance, dec!(70));
        assert_eq!(balances.profit, dec!(30));

        let err = desk
            .cashier
            .transfer(id, TransferDirection::ProfitToBalance, dec!(31))
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::InsufficientProfit { .. }));

        let err = desk
            .cashier
            .transfer(id, TransferDirection::BalanceToProfit, dec!(71))
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::InsufficientBalance { .. }));

        desk.accounts.set_can_transfer(id, false).await.unwrap();
        let err = desk
            .cashier
            .transfer(id, TransferDirection::ProfitToBalance, dec!(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::TransferNotPermitted(_)));
    }

    #[tokio::test]
    async fn test_transfers_need_permission() {
        let desk = desk().await;
        let id = desk.funded("a@example.com", dec!(100)).await;

        let err = assert_err!(
            desk.cashier
                .transfer(id, TransferDirection::BalanceToProfit, dec!(50))
                .await
        );
        assert!(matches!(err, DeskError::TransferNotPermitted(_)));
        assert_eq!(desk.balances(id).await, Balances { balance: dec!(100), profit: dec!(0) });

        desk.accounts.set_can_transfer(id, true).await.unwrap();
        assert_ok!(
            desk.cashier
                .transfer(id, TransferDirection::BalanceToProfit, dec!(50))
                .await
        );
    }

    #[tokio::test]
    async fn test_adjust_and_ledger_fold() {
        let desk = desk().await;
        let id = desk.funded("a@example.com", dec!(100)).await;

        let balances = desk.cashier.adjust(id, dec!(-150), dec!(25), "manual fix").await.unwrap();
        assert_eq!(balances, Balances { balance: dec!(-50), profit: dec!(25) });

        assert!(matches!(
            desk.cashier.adjust(id, dec!(0.001), dec!(0), "dust").await,
            Err(DeskError::InvalidAmount(_))
        ));

        let ledger = desk.accounts.ledger(id, 100).await.unwrap();
        let folded =
            Balances::fold(ledger.iter().map(|e| (e.balance_delta, e.profit_delta))).unwrap();
        assert_eq!(folded, desk.balances(id).await);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let desk = desk().await;
        let id = desk.account("a@example.com").await;
        let stale = desk.accounts.account(id).await.unwrap();

        desk.cashier.adjust(id, dec!(10), dec!(0), "first").await.unwrap();

        let mut conn = desk.db.pool().acquire().await.unwrap();
        let err = LedgerQueries::post(
            &mut conn,
            &stale,
            &NewLedgerEntry::adjustment(dec!(10), dec!(0), "lost update"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DeskError::VersionConflict(_)));
        drop(conn);

        assert_eq!(desk.balances(id).await.balance, dec!(10));
        assert_eq!(desk.accounts.account(id).await.unwrap().version, 1);
    }
}
