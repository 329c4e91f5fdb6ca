use async_trait::async_trait;
use sqlx::{
    pool::PoolConnection,
    postgres::{PgConnection, PgPoolOptions},
    PgPool, Postgres, QueryBuilder,
};
use uuid::Uuid;

use crate::error::{RepoError, RepoResult};

use super::store::{HistoryQuery, Session, Store, TransactionRepository, UnitOfWork, WalletRepository};
use super::tx::Transaction;
use super::wallet::Wallet;

const WALLET_COLUMNS: &str = "id, user_id, balance, created_at, updated_at, deleted_at";
const TRANSACTION_COLUMNS: &str =
    "id, from_user_id, to_user_id, amount, type, status, created_at, updated_at, deleted_at";

pub async fn connect(url: &str, max_conn_pool: u32) -> Result<PgPool, String> {
    // create a connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(max_conn_pool)
        .connect(url)
        .await
        .map_err(|err| format!("Failed to connect to database: {}", err))?;

    match sqlx::migrate!("./migrations").run(&db_pool).await {
        Ok(_) => {
            tracing::info!("Migrations run successfully");
        }
        Err(err) => {
            // if it fails we assume to continue believing that the database is already migrated
            tracing::warn!("Failed to run migrations: {err}");
        }
    }

    Ok(db_pool)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn session(&self) -> RepoResult<Box<dyn Session>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgSession { conn }))
    }

    async fn begin(&self) -> RepoResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

impl Session for PgSession {
    fn wallets(&mut self) -> Box<dyn WalletRepository + '_> {
        Box::new(PgWalletRepository::new(&mut self.conn))
    }

    fn transactions(&mut self) -> Box<dyn TransactionRepository + '_> {
        Box::new(PgTransactionRepository::new(&mut self.conn))
    }
}

// sqlx rolls the transaction back on drop if it was never committed
pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl Session for PgUnitOfWork {
    fn wallets(&mut self) -> Box<dyn WalletRepository + '_> {
        Box::new(PgWalletRepository::new(&mut self.tx))
    }

    fn transactions(&mut self) -> Box<dyn TransactionRepository + '_> {
        Box::new(PgTransactionRepository::new(&mut self.tx))
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> RepoResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepoResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

pub struct PgWalletRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgWalletRepository<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    async fn fetch_by_user_id(&mut self, user_id: Uuid, for_update: bool) -> RepoResult<Wallet> {
        let mut query_builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE deleted_at IS NULL AND user_id = "
        ));
        query_builder.push_bind(user_id);
        if for_update {
            query_builder.push(" FOR UPDATE");
        }

        let wallet = query_builder
            .build_query_as::<Wallet>()
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(wallet)
    }
}

#[async_trait]
impl<'c> WalletRepository for PgWalletRepository<'c> {
    async fn create(&mut self, wallet: &Wallet) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, balance, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(wallet.id)
        .bind(wallet.user_id)
        .bind(wallet.balance)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .bind(wallet.deleted_at)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    async fn find_by_user_id(&mut self, user_id: Uuid) -> RepoResult<Wallet> {
        self.fetch_by_user_id(user_id, false).await
    }

    async fn lock_by_user_id(&mut self, user_id: Uuid) -> RepoResult<Wallet> {
        self.fetch_by_user_id(user_id, true).await
    }

    async fn update(&mut self, wallet: &Wallet) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET user_id = $2, balance = $3, created_at = $4, updated_at = $5, deleted_at = $6
            WHERE id = $1
            "#,
        )
        .bind(wallet.id)
        .bind(wallet.user_id)
        .bind(wallet.balance)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .bind(wallet.deleted_at)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn delete(&mut self, id: Uuid) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE wallets SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

pub struct PgTransactionRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgTransactionRepository<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl<'c> TransactionRepository for PgTransactionRepository<'c> {
    async fn create(&mut self, transaction: &Transaction) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, from_user_id, to_user_id, amount, type, status, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.from_user_id)
        .bind(transaction.to_user_id)
        .bind(transaction.amount)
        .bind(transaction.kind.as_str())
        .bind(transaction.status.as_str())
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .bind(transaction.deleted_at)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    async fn find_by_id(&mut self, id: Uuid) -> RepoResult<Transaction> {
        let mut query_builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE deleted_at IS NULL AND id = "
        ));
        query_builder.push_bind(id);

        let transaction = query_builder
            .build_query_as::<Transaction>()
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(transaction)
    }

    async fn find_by_user_id(
        &mut self,
        user_id: Uuid,
        query: &HistoryQuery,
    ) -> RepoResult<Vec<Transaction>> {
        // generate our query
        let mut query_builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE deleted_at IS NULL AND (from_user_id = "
        ));
        query_builder
            .push_bind(user_id)
            .push(" OR to_user_id = ")
            .push_bind(user_id)
            .push(")");

        if let Some(kind) = query.kind {
            query_builder.push(" AND type = ").push_bind(kind.as_str());
        }
        if let Some(status) = query.status {
            query_builder.push(" AND status = ").push_bind(status.as_str());
        }

        query_builder
            .push(" ORDER BY created_at DESC OFFSET ")
            .push_bind(query.offset())
            .push(" LIMIT ")
            .push_bind(query.limit());

        let transactions = query_builder
            .build_query_as::<Transaction>()
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(transactions)
    }

    async fn update(&mut self, transaction: &Transaction) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET from_user_id = $2, to_user_id = $3, amount = $4, type = $5, status = $6,
                created_at = $7, updated_at = $8, deleted_at = $9
            WHERE id = $1
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.from_user_id)
        .bind(transaction.to_user_id)
        .bind(transaction.amount)
        .bind(transaction.kind.as_str())
        .bind(transaction.status.as_str())
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .bind(transaction.deleted_at)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn delete(&mut self, id: Uuid) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE transactions SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
