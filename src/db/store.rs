//! Repository boundary of the wallet core.
//!
//! Repositories are never constructed on their own: they are borrowed out of a
//! [`Session`] (plain reads) or a [`UnitOfWork`] (atomic writes). Every write an
//! operation performs therefore goes through the same scope, and that scope is
//! committed or rolled back as one.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::RepoResult;

use super::tx::{Transaction, TransactionStatus, TransactionType};
use super::wallet::Wallet;

#[async_trait]
pub trait WalletRepository: Send {
    async fn create(&mut self, wallet: &Wallet) -> RepoResult<()>;

    async fn find_by_user_id(&mut self, user_id: Uuid) -> RepoResult<Wallet>;

    /// Same lookup as `find_by_user_id`, but the row stays locked against
    /// other writers until the enclosing unit of work ends.
    async fn lock_by_user_id(&mut self, user_id: Uuid) -> RepoResult<Wallet>;

    /// Full-row overwrite keyed by wallet id.
    async fn update(&mut self, wallet: &Wallet) -> RepoResult<()>;

    async fn delete(&mut self, id: Uuid) -> RepoResult<()>;
}

#[async_trait]
pub trait TransactionRepository: Send {
    async fn create(&mut self, transaction: &Transaction) -> RepoResult<()>;

    async fn find_by_id(&mut self, id: Uuid) -> RepoResult<Transaction>;

    /// Entries where the user is source or destination, newest first.
    async fn find_by_user_id(
        &mut self,
        user_id: Uuid,
        query: &HistoryQuery,
    ) -> RepoResult<Vec<Transaction>>;

    async fn update(&mut self, transaction: &Transaction) -> RepoResult<()>;

    async fn delete(&mut self, id: Uuid) -> RepoResult<()>;
}

pub trait Session: Send {
    fn wallets(&mut self) -> Box<dyn WalletRepository + '_>;

    fn transactions(&mut self) -> Box<dyn TransactionRepository + '_>;
}

/// A session whose writes become visible only on `commit`. Dropping it
/// without committing discards everything written through it.
#[async_trait]
pub trait UnitOfWork: Session {
    async fn commit(self: Box<Self>) -> RepoResult<()>;

    async fn rollback(self: Box<Self>) -> RepoResult<()>;
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn session(&self) -> RepoResult<Box<dyn Session>>;

    async fn begin(&self) -> RepoResult<Box<dyn UnitOfWork>>;
}

/// Normalized parameters of a transaction-history lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub page: i64,
    pub page_size: i64,
    pub kind: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
}

impl HistoryQuery {
    pub const DEFAULT_PAGE_SIZE: i64 = 10;

    pub fn new(
        page: i64,
        page_size: i64,
        kind: Option<TransactionType>,
        status: Option<TransactionStatus>,
    ) -> Self {
        Self {
            page: if page <= 0 { 1 } else { page },
            page_size: if page_size <= 0 { Self::DEFAULT_PAGE_SIZE } else { page_size },
            kind,
            status,
        }
    }

    /// First page, default size, no filters. The only shape worth caching.
    pub fn is_default_view(&self) -> bool {
        *self == Self::default()
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn matches(&self, transaction: &Transaction) -> bool {
        self.kind.map_or(true, |kind| transaction.kind == kind)
            && self.status.map_or(true, |status| transaction.status == status)
    }
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_PAGE_SIZE, None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_non_positive_paging() {
        let query = HistoryQuery::new(0, -3, None, None);
        assert_eq!(query.page, 1);
        assert_eq!(query.page_size, 10);
        assert!(query.is_default_view());
    }

    #[test]
    fn only_unfiltered_first_page_is_default_view() {
        assert!(!HistoryQuery::new(2, 10, None, None).is_default_view());
        assert!(!HistoryQuery::new(1, 20, None, None).is_default_view());
        assert!(!HistoryQuery::new(1, 10, Some(TransactionType::Deposit), None).is_default_view());
        assert!(!HistoryQuery::new(1, 10, None, Some(TransactionStatus::Success)).is_default_view());
    }

    #[test]
    fn offset_follows_page() {
        let query = HistoryQuery::new(3, 25, None, None);
        assert_eq!(query.offset(), 50);
        assert_eq!(query.limit(), 25);

        let huge = HistoryQuery::new(i64::MAX, i64::MAX, None, None);
        assert_eq!(huge.offset(), i64::MAX);
    }
}
