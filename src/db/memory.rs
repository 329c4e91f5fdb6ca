//! In-process storage adapter.
//!
//! A unit of work holds the store lock for its whole lifetime, which gives
//! serializable isolation, and keeps a snapshot taken at `begin` so rollback
//! (explicit or on drop) restores the pre-call state. Faults can be armed per
//! storage step to exercise the rollback paths of the wallet core.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{RepoError, RepoResult};

use super::store::{HistoryQuery, Session, Store, TransactionRepository, UnitOfWork, WalletRepository};
use super::tx::Transaction;
use super::wallet::Wallet;

/// Storage steps a fault can be armed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Session,
    Begin,
    WalletLookup,
    WalletUpdate,
    TransactionCreate,
    TransactionLookup,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    wallets: HashMap<Uuid, Wallet>,
    transactions: Vec<Transaction>,
}

#[derive(Debug, Default)]
struct Faults {
    armed: Mutex<Vec<FailPoint>>,
}

impl Faults {
    fn arm(&self, point: FailPoint) {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(point);
    }

    // each armed fault fires once
    fn trip(&self, point: FailPoint) -> RepoResult<()> {
        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        match armed.iter().position(|p| *p == point) {
            Some(idx) => {
                armed.remove(idx);
                tracing::debug!("Injected storage fault at {:?}", point);
                Err(RepoError::Storage(format!("injected fault at {point:?}")))
            }
            None => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<AsyncMutex<MemoryState>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a one-shot fault on the given storage step.
    pub fn fail_next(&self, point: FailPoint) {
        self.faults.arm(point);
    }

    pub async fn insert_wallet(&self, user_id: Uuid, balance: Decimal) -> Wallet {
        let wallet = Wallet::new(user_id, balance);
        self.state
            .lock()
            .await
            .wallets
            .insert(wallet.id, wallet.clone());
        wallet
    }

    /// Every stored ledger entry, soft-deleted ones included, oldest first.
    pub async fn all_transactions(&self) -> Vec<Transaction> {
        self.state.lock().await.transactions.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn session(&self) -> RepoResult<Box<dyn Session>> {
        self.faults.trip(FailPoint::Session)?;
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemorySession {
            guard,
            faults: self.faults.clone(),
        }))
    }

    async fn begin(&self) -> RepoResult<Box<dyn UnitOfWork>> {
        self.faults.trip(FailPoint::Begin)?;
        let guard = self.state.clone().lock_owned().await;
        let snapshot = Some(guard.clone());
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            snapshot,
            faults: self.faults.clone(),
        }))
    }
}

pub struct MemorySession {
    guard: OwnedMutexGuard<MemoryState>,
    faults: Arc<Faults>,
}

impl Session for MemorySession {
    fn wallets(&mut self) -> Box<dyn WalletRepository + '_> {
        Box::new(MemoryWalletRepository {
            state: &mut self.guard,
            faults: &self.faults,
        })
    }

    fn transactions(&mut self) -> Box<dyn TransactionRepository + '_> {
        Box::new(MemoryTransactionRepository {
            state: &mut self.guard,
            faults: &self.faults,
        })
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    snapshot: Option<MemoryState>,
    faults: Arc<Faults>,
}

impl Session for MemoryUnitOfWork {
    fn wallets(&mut self) -> Box<dyn WalletRepository + '_> {
        Box::new(MemoryWalletRepository {
            state: &mut self.guard,
            faults: &self.faults,
        })
    }

    fn transactions(&mut self) -> Box<dyn TransactionRepository + '_> {
        Box::new(MemoryTransactionRepository {
            state: &mut self.guard,
            faults: &self.faults,
        })
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> RepoResult<()> {
        let mut this = self;
        // a failed commit drops `this` with the snapshot still set
        this.faults.trip(FailPoint::Commit)?;
        this.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepoResult<()> {
        drop(self);
        Ok(())
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

struct MemoryWalletRepository<'a> {
    state: &'a mut MemoryState,
    faults: &'a Faults,
}

impl MemoryWalletRepository<'_> {
    fn live_by_user_id(&self, user_id: Uuid) -> RepoResult<Wallet> {
        self.state
            .wallets
            .values()
            .find(|w| w.user_id == user_id && w.deleted_at.is_none())
            .cloned()
            .ok_or(RepoError::NotFound)
    }
}

#[async_trait]
impl<'a> WalletRepository for MemoryWalletRepository<'a> {
    async fn create(&mut self, wallet: &Wallet) -> RepoResult<()> {
        let taken = self
            .state
            .wallets
            .values()
            .any(|w| w.id == wallet.id || w.user_id == wallet.user_id);
        if taken {
            return Err(RepoError::Conflict(format!(
                "wallet already exists for user {}",
                wallet.user_id
            )));
        }
        self.state.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn find_by_user_id(&mut self, user_id: Uuid) -> RepoResult<Wallet> {
        self.faults.trip(FailPoint::WalletLookup)?;
        self.live_by_user_id(user_id)
    }

    async fn lock_by_user_id(&mut self, user_id: Uuid) -> RepoResult<Wallet> {
        // the unit of work already holds the store lock
        self.find_by_user_id(user_id).await
    }

    async fn update(&mut self, wallet: &Wallet) -> RepoResult<()> {
        self.faults.trip(FailPoint::WalletUpdate)?;
        if wallet.balance < Decimal::ZERO {
            return Err(RepoError::Storage(format!(
                "wallet {} balance would become negative",
                wallet.id
            )));
        }
        match self.state.wallets.get_mut(&wallet.id) {
            Some(stored) => {
                *stored = wallet.clone();
                Ok(())
            }
            None => Err(RepoError::NotFound),
        }
    }

    async fn delete(&mut self, id: Uuid) -> RepoResult<()> {
        match self.state.wallets.get_mut(&id) {
            Some(stored) if stored.deleted_at.is_none() => {
                stored.deleted_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(RepoError::NotFound),
        }
    }
}

struct MemoryTransactionRepository<'a> {
    state: &'a mut MemoryState,
    faults: &'a Faults,
}

#[async_trait]
impl<'a> TransactionRepository for MemoryTransactionRepository<'a> {
    async fn create(&mut self, transaction: &Transaction) -> RepoResult<()> {
        self.faults.trip(FailPoint::TransactionCreate)?;
        if transaction.amount <= Decimal::ZERO {
            return Err(RepoError::Storage(format!(
                "transaction {} amount must be positive",
                transaction.id
            )));
        }
        if self.state.transactions.iter().any(|t| t.id == transaction.id) {
            return Err(RepoError::Conflict(format!("transaction {} exists", transaction.id)));
        }
        self.state.transactions.push(transaction.clone());
        Ok(())
    }

    async fn find_by_id(&mut self, id: Uuid) -> RepoResult<Transaction> {
        self.faults.trip(FailPoint::TransactionLookup)?;
        self.state
            .transactions
            .iter()
            .find(|t| t.id == id && t.deleted_at.is_none())
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn find_by_user_id(
        &mut self,
        user_id: Uuid,
        query: &HistoryQuery,
    ) -> RepoResult<Vec<Transaction>> {
        self.faults.trip(FailPoint::TransactionLookup)?;

        // newest insert first among equal timestamps
        let mut matching: Vec<&Transaction> = self
            .state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.deleted_at.is_none() && t.involves(user_id) && query.matches(t))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.limit()).unwrap_or(usize::MAX);
        Ok(matching.into_iter().skip(offset).take(limit).cloned().collect())
    }

    async fn update(&mut self, transaction: &Transaction) -> RepoResult<()> {
        match self.state.transactions.iter_mut().find(|t| t.id == transaction.id) {
            Some(stored) => {
                *stored = transaction.clone();
                Ok(())
            }
            None => Err(RepoError::NotFound),
        }
    }

    async fn delete(&mut self, id: Uuid) -> RepoResult<()> {
        match self
            .state
            .transactions
            .iter_mut()
            .find(|t| t.id == id && t.deleted_at.is_none())
        {
            Some(stored) => {
                stored.deleted_at = Some(Utc::now());
                Ok(())
            }
            None => Err(RepoError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tx::{TransactionStatus, TransactionType};
    use rust_decimal_macros::dec;

    fn entry(kind: TransactionType, from: Option<Uuid>, to: Option<Uuid>, amount: Decimal) -> Transaction {
        Transaction::new(kind, from, to, amount)
    }

    #[tokio::test]
    async fn uncommitted_work_is_discarded_on_drop() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let mut wallet = store.insert_wallet(user, dec!(10)).await;

        {
            let mut uow = store.begin().await.unwrap();
            wallet.credit(dec!(5)).unwrap();
            uow.wallets().update(&wallet).await.unwrap();
            uow.transactions()
                .create(&entry(TransactionType::Deposit, Some(user), None, dec!(5)))
                .await
                .unwrap();
        }

        let mut session = store.session().await.unwrap();
        assert_eq!(session.wallets().find_by_user_id(user).await.unwrap().balance, dec!(10));
        drop(session);
        assert!(store.all_transactions().await.is_empty());
    }

    #[tokio::test]
    async fn failed_commit_restores_snapshot() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let mut wallet = store.insert_wallet(user, dec!(10)).await;
        store.fail_next(FailPoint::Commit);

        let mut uow = store.begin().await.unwrap();
        wallet.debit(dec!(4)).unwrap();
        uow.wallets().update(&wallet).await.unwrap();
        assert!(uow.commit().await.is_err());

        let mut session = store.session().await.unwrap();
        assert_eq!(session.wallets().find_by_user_id(user).await.unwrap().balance, dec!(10));
    }

    #[tokio::test]
    async fn faults_fire_once() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.insert_wallet(user, dec!(1)).await;
        store.fail_next(FailPoint::WalletLookup);

        let mut session = store.session().await.unwrap();
        assert!(matches!(
            session.wallets().find_by_user_id(user).await,
            Err(RepoError::Storage(_))
        ));
        assert!(session.wallets().find_by_user_id(user).await.is_ok());
    }

    #[tokio::test]
    async fn one_wallet_per_user() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.insert_wallet(user, dec!(0)).await;

        let mut session = store.session().await.unwrap();
        let result = session.wallets().create(&Wallet::new(user, dec!(0))).await;
        assert!(matches!(result, Err(RepoError::Conflict(_))));
    }

    #[tokio::test]
    async fn deleted_wallet_is_no_longer_found() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let wallet = store.insert_wallet(user, dec!(3)).await;

        let mut uow = store.begin().await.unwrap();
        uow.wallets().delete(wallet.id).await.unwrap();
        assert!(uow.wallets().delete(wallet.id).await.unwrap_err().is_not_found());
        uow.commit().await.unwrap();

        let mut session = store.session().await.unwrap();
        assert!(session.wallets().find_by_user_id(user).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn history_filters_orders_and_paginates() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();

        let mut uow = store.begin().await.unwrap();
        let mut created = Vec::new();
        for i in 1..=5 {
            let tx = entry(TransactionType::Deposit, Some(user), None, Decimal::from(i));
            uow.transactions().create(&tx).await.unwrap();
            created.push(tx);
        }
        let incoming = entry(TransactionType::Transfer, Some(other), Some(user), dec!(7));
        uow.transactions().create(&incoming).await.unwrap();
        let unrelated = entry(TransactionType::Deposit, Some(other), None, dec!(9));
        uow.transactions().create(&unrelated).await.unwrap();
        uow.commit().await.unwrap();

        let mut session = store.session().await.unwrap();

        let all = session
            .transactions()
            .find_by_user_id(user, &HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].id, incoming.id);
        assert!(all.iter().all(|t| t.involves(user)));
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let transfers = session
            .transactions()
            .find_by_user_id(user, &HistoryQuery::new(1, 10, Some(TransactionType::Transfer), None))
            .await
            .unwrap();
        assert_eq!(transfers, vec![incoming.clone()]);

        let pending = session
            .transactions()
            .find_by_user_id(user, &HistoryQuery::new(1, 10, None, Some(TransactionStatus::Pending)))
            .await
            .unwrap();
        assert!(pending.is_empty());

        let second_page = session
            .transactions()
            .find_by_user_id(user, &HistoryQuery::new(2, 4, None, None))
            .await
            .unwrap();
        assert_eq!(second_page.len(), 2);
        assert_eq!(second_page[0].id, all[4].id);
        assert_eq!(second_page[1].id, all[5].id);
    }

    #[tokio::test]
    async fn entry_update_overwrites_row() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let mut tx = entry(TransactionType::Deposit, Some(user), None, dec!(8));

        let mut uow = store.begin().await.unwrap();
        uow.transactions().create(&tx).await.unwrap();
        tx.status = TransactionStatus::Failed;
        uow.transactions().update(&tx).await.unwrap();
        uow.commit().await.unwrap();

        let mut session = store.session().await.unwrap();
        let stored = session.transactions().find_by_id(tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);

        let missing = entry(TransactionType::Deposit, Some(user), None, dec!(1));
        assert!(session.transactions().update(&missing).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn soft_deleted_entries_are_hidden() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let tx = entry(TransactionType::Withdraw, Some(user), None, dec!(3));

        let mut uow = store.begin().await.unwrap();
        uow.transactions().create(&tx).await.unwrap();
        uow.transactions().delete(tx.id).await.unwrap();
        uow.commit().await.unwrap();

        let mut session = store.session().await.unwrap();
        assert!(session.transactions().find_by_id(tx.id).await.unwrap_err().is_not_found());
        assert!(session
            .transactions()
            .find_by_user_id(user, &HistoryQuery::default())
            .await
            .unwrap()
            .is_empty());
        drop(session);
        assert_eq!(store.all_transactions().await.len(), 1);
    }
}
