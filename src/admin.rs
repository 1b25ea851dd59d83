//! Administrative surface consumed by the presentation layer: trainee
//! listing, metrics lookups, account creation and deletion, CSV export.

use std::path::PathBuf;
use log::info;

use crate::config::Settings;
use crate::database::{DatabaseManager, MetricsRow, Result, User, UserStats};
use crate::export;

/// All non-admin accounts, ordered by id.
pub async fn list_trainees(store: &DatabaseManager) -> Result<Vec<User>> {
    store.list_trainees().await
}

/// Metrics for one user; the row exists even before their first
/// interaction, with `rollup: None`.
pub async fn user_metrics(store: &DatabaseManager, user_id: i32) -> Result<MetricsRow> {
    store.user_metrics(user_id).await
}

/// The full snapshot used for dashboards and export.
pub async fn all_metrics(store: &DatabaseManager) -> Result<Vec<MetricsRow>> {
    store.snapshot_all_users().await
}

/// Raw-ledger aggregate for one user, bypassing the materialized rollup.
pub async fn user_activity(store: &DatabaseManager, user_id: i32) -> Result<Option<UserStats>> {
    store.user_stats(user_id).await
}

/// Admin-initiated account creation; same uniqueness and capacity rules
/// as self-service registration.
pub async fn create_user(
    store: &DatabaseManager,
    username: &str,
    password: &str,
    department: Option<&str>,
) -> Result<i32> {
    let user_id = store.register_user(username, password, department).await?;
    info!("Admin created account '{}' (id {})", username, user_id);
    Ok(user_id)
}

/// Removes a trainee and every dependent row. Admin targets are rejected
/// with `ProtectedRole` before anything is touched.
pub async fn delete_user(store: &DatabaseManager, user_id: i32) -> Result<()> {
    store.delete_user(user_id).await
}

/// Writes the timestamped CSV snapshot into the configured export
/// directory and returns its path.
pub async fn export_metrics(
    store: &DatabaseManager,
    settings: &Settings,
) -> anyhow::Result<PathBuf> {
    export::export_metrics_csv(store, settings.export_dir.as_ref()).await
}
