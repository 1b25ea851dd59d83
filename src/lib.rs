//! PhishGuard — phishing-awareness training engine.
//!
//! The core tracks guided training sessions and aggregates per-user
//! metrics: accounts and roles live in PostgreSQL, every exchange lands
//! in an append-only interaction ledger, and each append refreshes the
//! user's materialized rollup inside the same transaction. Scenario
//! progress itself is transient, held per user by the [`session::SessionTracker`]
//! and discarded on logout or restart.
//!
//! The graphical shell, the CSV consumers and the text-completion service
//! sit outside this crate; the latter plugs in through
//! [`feedback::FeedbackSource`].

pub mod admin;
pub mod config;
pub mod database;
pub mod export;
pub mod feedback;
pub mod session;
pub mod trainer;

pub use config::Settings;
pub use database::{DatabaseManager, StoreError};
pub use feedback::{FeedbackSource, OpenAiFeedback};
pub use session::{SessionState, SessionTracker, EXCHANGES_PER_SCENARIO};
pub use trainer::{ExchangeReply, TrainingEngine};

use log::info;

/// Connects to the database, creates the schema if needed, provisions the
/// default admin and seeds the starter scenarios. Idempotent; call once
/// at startup.
pub async fn bootstrap(settings: &Settings) -> database::Result<DatabaseManager> {
    info!("PhishGuard core starting");
    let store = DatabaseManager::connect(settings).await?;
    store.initialize(settings).await?;
    Ok(store)
}
