use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// one wallet per user, balance never drops below zero once committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Wallet {
    pub fn new(user_id: Uuid, balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            balance,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Adds `amount` and returns the new balance. On overflow the wallet is
    /// left untouched and `None` is returned.
    pub fn credit(&mut self, amount: Decimal) -> Option<Decimal> {
        let balance = self.balance.checked_add(amount)?;
        self.balance = balance;
        self.updated_at = Utc::now();
        Some(balance)
    }

    pub fn debit(&mut self, amount: Decimal) -> Option<Decimal> {
        let balance = self.balance.checked_sub(amount)?;
        self.balance = balance;
        self.updated_at = Utc::now();
        Some(balance)
    }
}
