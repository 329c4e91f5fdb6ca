//! Checks of the Postgres adapter against a live server.
//!
//! Ignored by default. With `DATABASE_URL` pointing at a server the user may
//! create databases on, run `cargo test --test postgres_store -- --ignored`.
//! Each test gets a fresh database with the migrations applied.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use uuid::Uuid;

use wallet_ledger::cache::TtlCache;
use wallet_ledger::db::auth::AuthRepository;
use wallet_ledger::db::postgres::PgStore;
use wallet_ledger::db::{Store, Transaction, TransactionStatus, TransactionType};
use wallet_ledger::error::{RepoError, ServiceError};
use wallet_ledger::service::WalletService;

async fn provision(pool: &PgPool, email: &str) -> Uuid {
    AuthRepository::new(pool.clone())
        .create_user_with_wallet(email, "Test User")
        .await
        .unwrap()
        .id
}

fn wallet_service(pool: &PgPool) -> Arc<WalletService> {
    let cache: Arc<TtlCache<Uuid, Vec<Transaction>>> = Arc::new(TtlCache::new());
    Arc::new(WalletService::new(Arc::new(PgStore::new(pool.clone())), cache))
}

#[sqlx::test]
#[ignore = "needs a Postgres server at DATABASE_URL"]
async fn login_provisions_one_empty_wallet(pool: PgPool) {
    let repo = AuthRepository::new(pool.clone());
    let first = repo.find_or_create_user("ann@example.com", "Ann").await.unwrap();
    let again = repo.find_or_create_user("ann@example.com", "Ann").await.unwrap();
    assert_eq!(first.id, again.id);

    let service = wallet_service(&pool);
    assert_eq!(service.get_balance(first.id).await, Ok(Decimal::ZERO));
}

#[sqlx::test]
#[ignore = "needs a Postgres server at DATABASE_URL"]
async fn history_is_filtered_ordered_and_paged(pool: PgPool) {
    let service = wallet_service(&pool);
    let ann = provision(&pool, "ann@example.com").await;
    let bob = provision(&pool, "bob@example.com").await;

    service.deposit(ann, dec!(100)).await.unwrap();
    service.withdraw(ann, dec!(30)).await.unwrap();
    assert_eq!(service.transfer(ann, bob, dec!(20)).await, Ok(dec!(50)));
    assert_eq!(service.get_balance(bob).await, Ok(dec!(20)));

    let page = service
        .get_transaction_history(ann, 1, 10, None, None)
        .await
        .unwrap();
    let kinds: Vec<_> = page.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![TransactionType::Transfer, TransactionType::Withdraw, TransactionType::Deposit]
    );
    assert!(page.iter().all(|t| t.status == TransactionStatus::Success));
    assert_eq!(page[2].from_user_id, Some(ann));
    assert_eq!(page[2].to_user_id, None);

    let deposits = service
        .get_transaction_history(ann, 1, 10, Some(TransactionType::Deposit), None)
        .await
        .unwrap();
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].amount, dec!(100));

    let second = service
        .get_transaction_history(ann, 2, 2, None, None)
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].kind, TransactionType::Deposit);

    let incoming = service
        .get_transaction_history(bob, 1, 10, None, None)
        .await
        .unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].to_user_id, Some(bob));
}

#[sqlx::test]
#[ignore = "needs a Postgres server at DATABASE_URL"]
async fn soft_deleted_entries_disappear(pool: PgPool) {
    let service = wallet_service(&pool);
    let ann = provision(&pool, "ann@example.com").await;
    service.deposit(ann, dec!(5)).await.unwrap();

    let id = service
        .get_transaction_history(ann, 1, 5, None, None)
        .await
        .unwrap()[0]
        .id;
    assert_eq!(service.get_transaction(ann, id).await.unwrap().amount, dec!(5));

    let store = PgStore::new(pool.clone());
    let mut session = store.session().await.unwrap();
    session.transactions().delete(id).await.unwrap();
    assert!(session.transactions().delete(id).await.unwrap_err().is_not_found());
    drop(session);

    assert_eq!(
        service.get_transaction(ann, id).await,
        Err(ServiceError::not_found("Transaction not found"))
    );
    assert!(service
        .get_transaction_history(ann, 1, 5, None, None)
        .await
        .unwrap()
        .is_empty());
}

#[sqlx::test]
#[ignore = "needs a Postgres server at DATABASE_URL"]
async fn row_lock_serializes_concurrent_withdrawals(pool: PgPool) {
    let service = wallet_service(&pool);
    let ann = provision(&pool, "ann@example.com").await;
    service.deposit(ann, dec!(100)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = service.clone();
        handles.push(tokio::spawn(async move { service.withdraw(ann, dec!(20)).await }));
    }
    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert_eq!(err, ServiceError::bad_request("Insufficient balance")),
        }
    }

    assert_eq!(succeeded, 5);
    assert_eq!(service.get_balance(ann).await, Ok(Decimal::ZERO));
}

#[sqlx::test]
#[ignore = "needs a Postgres server at DATABASE_URL"]
async fn dropped_unit_of_work_rolls_back(pool: PgPool) {
    let ann = provision(&pool, "ann@example.com").await;
    let store = PgStore::new(pool.clone());

    {
        let mut uow = store.begin().await.unwrap();
        let mut wallet = uow.wallets().lock_by_user_id(ann).await.unwrap();
        wallet.credit(dec!(40)).unwrap();
        uow.wallets().update(&wallet).await.unwrap();
    }

    let mut session = store.session().await.unwrap();
    let wallet = session.wallets().find_by_user_id(ann).await.unwrap();
    assert_eq!(wallet.balance, Decimal::ZERO);
}

#[sqlx::test]
#[ignore = "needs a Postgres server at DATABASE_URL"]
async fn negative_balance_is_refused_by_the_schema(pool: PgPool) {
    let ann = provision(&pool, "ann@example.com").await;
    let store = PgStore::new(pool.clone());

    let mut uow = store.begin().await.unwrap();
    let mut wallet = uow.wallets().lock_by_user_id(ann).await.unwrap();
    wallet.balance = dec!(-1);
    let result = uow.wallets().update(&wallet).await;
    assert!(matches!(result, Err(RepoError::Database(_))), "{result:?}");
}
