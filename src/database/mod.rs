pub mod models;
pub mod store;

pub use models::{
    AuthenticatedUser, Difficulty, Interaction, MetricsRow, Role, Rollup, Scenario, User,
    UserStats,
};
pub use store::DatabaseManager;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("username is already registered")]
    DuplicateUsername,
    #[error("registered user limit reached ({0})")]
    CapacityExceeded(i64),
    #[error("user not found")]
    UserNotFound,
    #[error("invalid username or password")]
    BadCredential,
    #[error("admin accounts cannot be deleted")]
    ProtectedRole,
    #[error("no scenarios available")]
    NoScenariosAvailable,
    #[error("storage unavailable: {0}")]
    Storage(String),
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StoreError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
