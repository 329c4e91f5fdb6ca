//! Wallet transaction core.
//!
//! Each mutating operation runs inside one unit of work: the wallet rows are
//! re-read under a row lock, the balance precondition is checked against the
//! locked rows, then the ledger entry and the balance changes are written and
//! committed together. Cache invalidation happens after a successful commit.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::cache::Cache;
use crate::db::store::{HistoryQuery, Store, UnitOfWork};
use crate::db::tx::{Transaction, TransactionStatus, TransactionType};
use crate::db::wallet::Wallet;
use crate::error::ServiceError;

/// Cache of the default history view, keyed by user id.
pub type HistoryCache = dyn Cache<Uuid, Vec<Transaction>>;

pub const DEFAULT_HISTORY_TTL: Duration = Duration::from_secs(60 * 60);

pub struct WalletService {
    store: Arc<dyn Store>,
    cache: Arc<HistoryCache>,
    history_ttl: Duration,
}

impl WalletService {
    pub fn new(store: Arc<dyn Store>, cache: Arc<HistoryCache>) -> Self {
        Self {
            store,
            cache,
            history_ttl: DEFAULT_HISTORY_TTL,
        }
    }

    pub fn with_history_ttl(mut self, ttl: Duration) -> Self {
        self.history_ttl = ttl;
        self
    }

    pub async fn deposit(&self, user_id: Uuid, amount: Decimal) -> Result<Decimal, ServiceError> {
        ensure_positive(amount)?;

        let mut uow = self.begin().await?;
        let outcome = async {
            let mut wallet = lock_wallet(&mut *uow, user_id, "Failed to get wallet").await?;
            wallet.credit(amount).ok_or_else(|| balance_overflow(user_id))?;

            let record = Transaction::new(TransactionType::Deposit, Some(user_id), None, amount);
            record_entry(&mut *uow, &record).await?;

            save_wallet(&mut *uow, &wallet, "Failed to update wallet").await?;
            Ok::<_, ServiceError>(wallet.balance)
        }
        .await;
        let balance = settle(uow, outcome).await?;

        self.cache.delete(&user_id);
        tracing::info!("Deposited {amount} for user: {user_id}. New balance: {balance}");
        Ok(balance)
    }

    pub async fn withdraw(&self, user_id: Uuid, amount: Decimal) -> Result<Decimal, ServiceError> {
        ensure_positive(amount)?;

        let mut uow = self.begin().await?;
        let outcome = async {
            let mut wallet = lock_wallet(&mut *uow, user_id, "Failed to get wallet").await?;
            ensure_covers(&wallet, amount)?;
            wallet.debit(amount).ok_or_else(|| balance_overflow(user_id))?;

            let record = Transaction::new(TransactionType::Withdraw, Some(user_id), None, amount);
            record_entry(&mut *uow, &record).await?;

            save_wallet(&mut *uow, &wallet, "Failed to update wallet").await?;
            Ok::<_, ServiceError>(wallet.balance)
        }
        .await;
        let balance = settle(uow, outcome).await?;

        self.cache.delete(&user_id);
        tracing::info!("Withdrew {amount} for user: {user_id}. New balance: {balance}");
        Ok(balance)
    }

    /// Moves `amount` between two wallets and returns the sender's new balance.
    pub async fn transfer(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        amount: Decimal,
    ) -> Result<Decimal, ServiceError> {
        ensure_positive(amount)?;
        if from_user_id == to_user_id {
            return Err(ServiceError::bad_request("Cannot transfer to the same wallet"));
        }

        let mut uow = self.begin().await?;
        let outcome = async {
            // lock in user-id order so opposite transfers cannot deadlock
            let (mut sender, mut recipient) = if from_user_id < to_user_id {
                let sender = lock_wallet(&mut *uow, from_user_id, "Failed to get sender's wallet").await?;
                let recipient = lock_wallet(&mut *uow, to_user_id, "Failed to get recipient's wallet").await?;
                (sender, recipient)
            } else {
                let recipient = lock_wallet(&mut *uow, to_user_id, "Failed to get recipient's wallet").await?;
                let sender = lock_wallet(&mut *uow, from_user_id, "Failed to get sender's wallet").await?;
                (sender, recipient)
            };
            ensure_covers(&sender, amount)?;
            sender.debit(amount).ok_or_else(|| balance_overflow(from_user_id))?;
            recipient.credit(amount).ok_or_else(|| balance_overflow(to_user_id))?;

            let record = Transaction::new(
                TransactionType::Transfer,
                Some(from_user_id),
                Some(to_user_id),
                amount,
            );
            record_entry(&mut *uow, &record).await?;

            save_wallet(&mut *uow, &sender, "Failed to update sender's wallet").await?;
            save_wallet(&mut *uow, &recipient, "Failed to update recipient's wallet").await?;
            Ok::<_, ServiceError>(sender.balance)
        }
        .await;
        let balance = settle(uow, outcome).await?;

        self.cache.delete(&from_user_id);
        self.cache.delete(&to_user_id);
        tracing::info!(
            "Transferred {amount} from user: {from_user_id} to user: {to_user_id}. Sender balance: {balance}"
        );
        Ok(balance)
    }

    pub async fn get_balance(&self, user_id: Uuid) -> Result<Decimal, ServiceError> {
        let mut session = self.store.session().await.map_err(|err| {
            tracing::error!("Failed to open session: {err}");
            ServiceError::internal("Failed to get wallet")
        })?;

        let found = session.wallets().find_by_user_id(user_id).await;
        match found {
            Ok(wallet) => Ok(wallet.balance),
            Err(err) => {
                tracing::error!("Failed to get wallet for user {user_id}: {err}");
                Err(ServiceError::internal("Failed to get wallet"))
            }
        }
    }

    /// Paginated ledger entries involving the user, newest first. Only the
    /// default view (first page of ten, unfiltered) is served from the cache.
    pub async fn get_transaction_history(
        &self,
        user_id: Uuid,
        page: i64,
        page_size: i64,
        kind: Option<TransactionType>,
        status: Option<TransactionStatus>,
    ) -> Result<Vec<Transaction>, ServiceError> {
        let query = HistoryQuery::new(page, page_size, kind, status);
        let cacheable = query.is_default_view();

        if cacheable {
            if let Some(cached) = self.cache.get(&user_id) {
                tracing::debug!("History cache hit for user: {user_id}");
                return Ok(cached);
            }
            tracing::debug!("History cache miss for user: {user_id}");
        }

        // read before querying so a delete during the query voids the fill
        let generation = cacheable.then(|| self.cache.generation(&user_id));

        let transactions = async {
            let mut session = self.store.session().await?;
            let found = session.transactions().find_by_user_id(user_id, &query).await;
            found
        }
        .await
        .map_err(|err| {
            tracing::error!("Failed to get transaction history for user {user_id}: {err}");
            ServiceError::internal("Failed to get transaction history")
        })?;

        if let Some(generation) = generation {
            let stored = self.cache.set_if_generation(
                user_id,
                transactions.clone(),
                self.history_ttl,
                generation,
            );
            if !stored {
                tracing::debug!("History changed during read, not caching for user: {user_id}");
            }
        }
        Ok(transactions)
    }

    /// A single ledger entry, visible only to the users it involves.
    pub async fn get_transaction(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Transaction, ServiceError> {
        let found = async {
            let mut session = self.store.session().await?;
            let found = session.transactions().find_by_id(transaction_id).await;
            found
        }
        .await;

        match found {
            Ok(transaction) if transaction.involves(user_id) => Ok(transaction),
            Ok(_) => Err(ServiceError::not_found("Transaction not found")),
            Err(err) if err.is_not_found() => Err(ServiceError::not_found("Transaction not found")),
            Err(err) => {
                tracing::error!("Failed to retrieve transaction {transaction_id}: {err}");
                Err(ServiceError::internal("Failed to retrieve transaction"))
            }
        }
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, ServiceError> {
        self.store.begin().await.map_err(|err| {
            tracing::error!("Failed to start transaction: {err}");
            ServiceError::internal("Failed to start transaction")
        })
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::bad_request("Invalid amount"));
    }
    Ok(())
}

fn ensure_covers(wallet: &Wallet, amount: Decimal) -> Result<(), ServiceError> {
    if wallet.balance < amount {
        tracing::warn!("Insufficient balance for user: {}", wallet.user_id);
        return Err(ServiceError::bad_request("Insufficient balance"));
    }
    Ok(())
}

// the resulting balance is outside the representable decimal range
fn balance_overflow(user_id: Uuid) -> ServiceError {
    tracing::warn!("Balance overflow for user: {user_id}");
    ServiceError::bad_request("Invalid amount")
}

async fn lock_wallet(
    uow: &mut dyn UnitOfWork,
    user_id: Uuid,
    failure: &'static str,
) -> Result<Wallet, ServiceError> {
    uow.wallets().lock_by_user_id(user_id).await.map_err(|err| {
        tracing::error!("{failure} for user {user_id}: {err}");
        ServiceError::internal(failure)
    })
}

async fn record_entry(uow: &mut dyn UnitOfWork, record: &Transaction) -> Result<(), ServiceError> {
    uow.transactions().create(record).await.map_err(|err| {
        tracing::error!("Failed to create transaction {}: {err}", record.id);
        ServiceError::internal("Failed to create transaction")
    })
}

async fn save_wallet(
    uow: &mut dyn UnitOfWork,
    wallet: &Wallet,
    failure: &'static str,
) -> Result<(), ServiceError> {
    uow.wallets().update(wallet).await.map_err(|err| {
        tracing::error!("{failure} {}: {err}", wallet.id);
        ServiceError::internal(failure)
    })
}

// commit on success, otherwise roll back and hand the original error back
async fn settle<T>(
    uow: Box<dyn UnitOfWork>,
    outcome: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    match outcome {
        Ok(value) => {
            uow.commit().await.map_err(|err| {
                tracing::error!("Failed to commit transaction: {err}");
                ServiceError::internal("Failed to commit transaction")
            })?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                tracing::warn!("Failed to roll back transaction: {rollback_err}");
            }
            Err(err)
        }
    }
}
