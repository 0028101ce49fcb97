//! Accounts, their ledger-derived balances, and their notifications.

use tracing::info;

use crate::db::{AccountQueries, Database, LedgerQueries, NotificationQueries};
use crate::error::{DeskError, DeskResult};
use crate::models::{
    normalize_email, Account, AccountSummary, Balances, LedgerEntry, NewAccount, NotificationKind,
    NotificationPage,
};
use crate::trading::DeskConfig;

/// Account registry and per-account notification inbox.
#[derive(Clone)]
pub struct AccountService {
    db: Database,
    config: DeskConfig,
}

impl AccountService {
    pub fn new(db: Database, config: DeskConfig) -> Self {
        Self { db, config }
    }

    /// Open an account with an empty ledger.
    pub async fn create_account(&self, account: NewAccount) -> DeskResult<Account> {
        let email = normalize_email(&account.email);
        if email.is_empty() || !email.contains('@') {
            return Err(DeskError::InvalidEmail(account.email));
        }

        let currency = account
            .currency
            .as_deref()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.config.default_currency.clone());

        let mut conn = self.db.pool().acquire().await?;
        let id = AccountQueries::insert(&mut conn, &account, &email, &currency).await?;

        info!(account_id = id, email = %email, "Created account");
        AccountQueries::get(&mut conn, id).await
    }

    pub async fn account(&self, id: i64) -> DeskResult<Account> {
        let mut conn = self.db.pool().acquire().await?;
        AccountQueries::get(&mut conn, id).await
    }

    pub async fn find_by_email(&self, email: &str) -> DeskResult<Option<Account>> {
        let mut conn = self.db.pool().acquire().await?;
        AccountQueries::find_by_email(&mut conn, &normalize_email(email)).await
    }

    pub async fn accounts(&self) -> DeskResult<Vec<Account>> {
        let mut conn = self.db.pool().acquire().await?;
        AccountQueries::list(&mut conn).await
    }

    pub async fn balances(&self, id: i64) -> DeskResult<Balances> {
        let mut conn = self.db.pool().acquire().await?;
        AccountQueries::get(&mut conn, id).await?;
        LedgerQueries::balances(&mut conn, id).await
    }

    pub async fn summary(&self, id: i64) -> DeskResult<AccountSummary> {
        let mut conn = self.db.pool().acquire().await?;
        let account = AccountQueries::get(&mut conn, id).await?;
        let balances = LedgerQueries::balances(&mut conn, id).await?;
        Ok(AccountSummary { account, balances })
    }

    /// Latest ledger entries, newest first.
    pub async fn ledger(&self, id: i64, limit: i64) -> DeskResult<Vec<LedgerEntry>> {
        let mut conn = self.db.pool().acquire().await?;
        AccountQueries::get(&mut conn, id).await?;
        LedgerQueries::entries(&mut conn, id, limit).await
    }

    pub async fn set_can_transfer(&self, id: i64, can_transfer: bool) -> DeskResult<()> {
        let mut conn = self.db.pool().acquire().await?;
        AccountQueries::set_can_transfer(&mut conn, id, can_transfer).await?;
        info!(account_id = id, can_transfer, "Updated transfer permission");
        Ok(())
    }

    // ==================== Notifications ====================

    /// A page of notifications, newest first, with overall counts.
    pub async fn notifications(
        &self,
        account_id: i64,
        kind: Option<NotificationKind>,
        limit: i64,
        offset: i64,
    ) -> DeskResult<NotificationPage> {
        let limit = if limit > 0 {
            limit
        } else {
            self.config.notification_page_size
        };

        let mut conn = self.db.pool().acquire().await?;
        AccountQueries::get(&mut conn, account_id).await?;
        let notifications =
            NotificationQueries::page(&mut conn, account_id, kind, limit, offset.max(0)).await?;
        let (total_count, unread_count) =
            NotificationQueries::counts(&mut conn, account_id, kind).await?;

        Ok(NotificationPage {
            notifications,
            total_count,
            unread_count,
        })
    }

    pub async fn mark_read(&self, account_id: i64, notification_id: i64) -> DeskResult<()> {
        let mut conn = self.db.pool().acquire().await?;
        NotificationQueries::mark_read(&mut conn, account_id, notification_id).await
    }

    /// Mark everything read; returns how many changed.
    pub async fn mark_all_read(&self, account_id: i64) -> DeskResult<u64> {
        let mut conn = self.db.pool().acquire().await?;
        AccountQueries::get(&mut conn, account_id).await?;
        NotificationQueries::mark_all_read(&mut conn, account_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewNotification;
    use rust_decimal_macros::dec;

    async fn service() -> AccountService {
        let db = Database::in_memory().await.unwrap();
        AccountService::new(db, DeskConfig::default())
    }

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            email: email.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            currency: None,
        }
    }

    #[tokio::test]
    async fn test_create_account_defaults() {
        let service = service().await;
        let account = service
            .create_account(new_account("  Ada@Example.COM "))
            .await
            .unwrap();

        assert_eq!(account.email, "Ada@example.com");
        assert_eq!(account.currency, "USD");
        assert!(!account.can_transfer);
        assert_eq!(account.version, 0);

        let summary = service.summary(account.id).await.unwrap();
        assert_eq!(summary.balances, Balances::default());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let service = service().await;
        service.create_account(new_account("ada@example.com")).await.unwrap();

        let err = service
            .create_account(new_account("ada@EXAMPLE.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::DuplicateEmail(_)));
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let service = service().await;
        assert!(matches!(
            service.balances(42).await,
            Err(DeskError::AccountNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_notification_inbox() {
        let service = service().await;
        let ada = service.create_account(new_account("ada@example.com")).await.unwrap();
        let bob = service.create_account(new_account("bob@example.com")).await.unwrap();

        let mut conn = service.db.pool().acquire().await.unwrap();
        for amount in [dec!(10), dec!(20), dec!(30)] {
            NotificationQueries::insert(
                &mut conn,
                ada.id,
                &NewNotification::deposit_approved(amount, "DEP-TEST"),
            )
            .await
            .unwrap();
        }
        let alert = NotificationQueries::insert(
            &mut conn,
            ada.id,
            &NewNotification::deposit_rejected(dec!(5), None),
        )
        .await
        .unwrap();
        drop(conn);

        let page = service.notifications(ada.id, None, 2, 0).await.unwrap();
        assert_eq!(page.notifications.len(), 2);
        assert_eq!(page.total_count, 4);
        assert_eq!(page.unread_count, 4);
        assert_eq!(page.notifications[0].id, alert);

        let deposits = service
            .notifications(ada.id, Some(NotificationKind::Deposit), 0, 0)
            .await
            .unwrap();
        assert_eq!(deposits.total_count, 3);

        // Not Bob's to read
        assert!(matches!(
            service.mark_read(bob.id, alert).await,
            Err(DeskError::NotificationNotFound(_))
        ));

        service.mark_read(ada.id, alert).await.unwrap();
        let page = service.notifications(ada.id, None, 10, 0).await.unwrap();
        assert_eq!(page.unread_count, 3);
        assert!(page.notifications[0].read);

        assert_eq!(service.mark_all_read(ada.id).await.unwrap(), 3);
        assert_eq!(service.mark_all_read(ada.id).await.unwrap(), 0);
    }
}
