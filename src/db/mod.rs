pub mod auth;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod tx;
pub mod user;
pub mod wallet;

pub use store::{HistoryQuery, Session, Store, TransactionRepository, UnitOfWork, WalletRepository};
pub use tx::{Transaction, TransactionStatus, TransactionType};
pub use wallet::Wallet;
