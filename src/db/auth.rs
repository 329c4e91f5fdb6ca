use sqlx::PgPool;

use crate::error::{RepoError, RepoResult};

use super::postgres::PgWalletRepository;
use super::store::WalletRepository;
use super::user::User;
use super::wallet::Wallet;

const USER_COLUMNS: &str = "id, name, email, created_at, updated_at, deleted_at";

// Database repository
pub struct AuthRepository {
    pool: PgPool,
}

impl AuthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Creates the user together with an empty wallet. Either both rows exist
    /// afterwards or neither does.
    pub async fn create_user_with_wallet(&self, email: &str, name: &str) -> RepoResult<User> {
        let user = User::new(email, name);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await?;

        let wallet = Wallet::new(user.id, 0.into());
        PgWalletRepository::new(&mut *tx).create(&wallet).await?;

        tx.commit().await?;
        tracing::info!("user created with email: {}", user.email);
        Ok(user)
    }

    /// Login-by-email: returns the existing user or provisions a new one.
    pub async fn find_or_create_user(&self, email: &str, name: &str) -> RepoResult<User> {
        if let Some(user) = self.find_user_by_email(email).await? {
            return Ok(user);
        }

        match self.create_user_with_wallet(email, name).await {
            Ok(user) => Ok(user),
            // lost a race against a concurrent first login
            Err(RepoError::Conflict(_)) => self
                .find_user_by_email(email)
                .await?
                .ok_or(RepoError::NotFound),
            Err(err) => Err(err),
        }
    }
}
