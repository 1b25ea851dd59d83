use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;
use chrono::{DateTime, Utc};
use log::{info, warn, error};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use super::{Result, StoreError};
use super::models::*;
use crate::config::Settings;
use crate::trainer::classifier::is_correct;

/// Deterministic SHA-256 hex digest of a password. One-way only; login
/// re-hashes the candidate and compares digests.
pub fn hash_password(password: &str) -> String {
    let mut h = Sha256::new();
    h.update(password.as_bytes());
    hex::encode(h.finalize())
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id            SERIAL PRIMARY KEY,
    username      TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    role          TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('admin', 'user')),
    department    TEXT NOT NULL DEFAULT 'General'
);

CREATE TABLE IF NOT EXISTS scenarios (
    id            SERIAL PRIMARY KEY,
    scenario_text TEXT NOT NULL,
    difficulty    TEXT NOT NULL CHECK (difficulty IN ('Fácil', 'Intermedio', 'Difícil')),
    image_path    TEXT
);

CREATE TABLE IF NOT EXISTS interactions (
    id            SERIAL PRIMARY KEY,
    user_id       INTEGER NOT NULL REFERENCES users(id),
    scenario_id   INTEGER NOT NULL REFERENCES scenarios(id),
    user_response TEXT NOT NULL,
    feedback      TEXT NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS metrics (
    user_id             INTEGER PRIMARY KEY REFERENCES users(id),
    scenarios_completed BIGINT NOT NULL DEFAULT 0,
    total_attempts      BIGINT NOT NULL DEFAULT 0,
    correct_percentage  DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    error_percentage    DOUBLE PRECISION NOT NULL DEFAULT 0.0
);

CREATE INDEX IF NOT EXISTS idx_interactions_user ON interactions(user_id);
CREATE INDEX IF NOT EXISTS idx_scenarios_difficulty ON scenarios(difficulty);
"#;

/// Derives the rollup from raw ledger rows `(scenario_id, feedback)`.
/// This is the single definition of the metrics computation: both the
/// append path and the standalone recompute go through it.
fn rollup_from_rows(rows: &[(i32, String)]) -> Option<Rollup> {
    let total = rows.len() as i64;
    let distinct: HashSet<i32> = rows.iter().map(|(sid, _)| *sid).collect();
    let correct = rows.iter().filter(|(_, fb)| is_correct(fb)).count() as i64;
    Rollup::from_counts(distinct.len() as i64, total, correct)
}

#[derive(Debug)]
pub struct DatabaseManager {
    pool: Pool,
    user_limit: i64,
}

impl DatabaseManager {
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(settings.db_host.clone());
        cfg.port = Some(settings.db_port);
        cfg.dbname = Some(settings.db_name.clone());
        cfg.user = Some(settings.db_user.clone());
        cfg.password = Some(settings.db_password.clone());
        cfg.manager = Some(deadpool_postgres::ManagerConfig {
            recycling_method: deadpool_postgres::RecyclingMethod::Fast,
        });

        info!(
            "Connecting to database: {}@{}:{}/{}",
            settings.db_user, settings.db_host, settings.db_port, settings.db_name
        );

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Storage(format!("pool creation failed: {}", e)))?;

        // Fail fast if the database is unreachable.
        let _client = pool.get().await?;
        info!("Database connection established");

        Ok(DatabaseManager {
            pool,
            user_limit: settings.user_limit,
        })
    }

    /// Creates the schema, provisions the default admin account and seeds
    /// the starter scenarios. Safe to call on every startup.
    pub async fn initialize(&self, settings: &Settings) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;

        // Default admin, created once. Re-initialization detects the
        // existing row and skips.
        let existing = client
            .query_opt(
                "SELECT id FROM users WHERE username = $1",
                &[&settings.admin_username],
            )
            .await?;
        if existing.is_none() {
            client
                .execute(
                    "INSERT INTO users (username, password_hash, role, department) \
                     VALUES ($1, $2, 'admin', $3)",
                    &[
                        &settings.admin_username,
                        &hash_password(&settings.admin_password),
                        &settings.admin_department,
                    ],
                )
                .await?;
            info!("Default admin account '{}' created", settings.admin_username);
        }

        if self.scenario_count().await? == 0 {
            self.seed_sample_scenarios().await?;
        }

        Ok(())
    }

    async fn seed_sample_scenarios(&self) -> Result<()> {
        let samples: [(&str, Difficulty, Option<&str>); 3] = [
            (
                "Recibes un correo de tu banco indicando actividad sospechosa en tu cuenta. \
                 Te piden hacer clic en un enlace.",
                Difficulty::Easy,
                Some("assets/scenario_images/escenario1.png"),
            ),
            (
                "Un correo de Recursos Humanos te indica que actualices tu nómina a través \
                 de un enlace desconocido.",
                Difficulty::Intermediate,
                Some("assets/scenario_images/escenario2.png"),
            ),
            (
                "Un alto ejecutivo te solicita transferir dinero a una cuenta desconocida \
                 de inmediato.",
                Difficulty::Hard,
                Some("assets/scenario_images/escenario3.png"),
            ),
        ];

        for (text, difficulty, image) in samples {
            self.insert_scenario(text, difficulty, image).await?;
        }
        info!("Seeded {} starter scenarios", 3);
        Ok(())
    }

    // ---- credential store ----

    /// Registers a new `user`-role account. The admin surface uses this
    /// too; self-service and admin-initiated registration share the rules.
    pub async fn register_user(
        &self,
        username: &str,
        password: &str,
        department: Option<&str>,
    ) -> Result<i32> {
        let client = self.pool.get().await?;

        let taken = client
            .query_opt("SELECT id FROM users WHERE username = $1", &[&username])
            .await?;
        if taken.is_some() {
            return Err(StoreError::DuplicateUsername);
        }

        let total: i64 = client
            .query_one("SELECT COUNT(*) FROM users", &[])
            .await?
            .get(0);
        if total >= self.user_limit {
            warn!("Registration rejected: user limit {} reached", self.user_limit);
            return Err(StoreError::CapacityExceeded(self.user_limit));
        }

        let department = department.unwrap_or("General");
        let row = client
            .query_one(
                "INSERT INTO users (username, password_hash, role, department) \
                 VALUES ($1, $2, 'user', $3) RETURNING id",
                &[&username, &hash_password(password), &department],
            )
            .await?;
        let user_id: i32 = row.get(0);
        info!("Registered user '{}' (id {})", username, user_id);
        Ok(user_id)
    }

    /// Verifies credentials. Unknown username and wrong password both come
    /// back as `BadCredential`; callers get one generic message either way.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<AuthenticatedUser> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                "SELECT id, password_hash, role FROM users WHERE username = $1",
                &[&username],
            )
            .await?
            .ok_or(StoreError::BadCredential)?;

        let stored_hash: String = row.get(1);
        if hash_password(password) != stored_hash {
            return Err(StoreError::BadCredential);
        }

        let role: String = row.get(2);
        Ok(AuthenticatedUser {
            user_id: row.get(0),
            role: Role::from_str(&role)
                .ok_or_else(|| StoreError::Storage(format!("unknown role '{}'", role)))?,
        })
    }

    /// Deletes a non-admin user together with their interactions and
    /// rollup, in one transaction. Dependent rows go first so foreign
    /// keys never dangle; the row lock taken here also serializes the
    /// deletion against any in-flight ledger append for the same user.
    pub async fn delete_user(&self, user_id: i32) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt("SELECT role FROM users WHERE id = $1 FOR UPDATE", &[&user_id])
            .await?
            .ok_or(StoreError::UserNotFound)?;
        let role: String = row.get(0);
        if role == Role::Admin.as_str() {
            return Err(StoreError::ProtectedRole);
        }

        tx.execute("DELETE FROM interactions WHERE user_id = $1", &[&user_id])
            .await?;
        tx.execute("DELETE FROM metrics WHERE user_id = $1", &[&user_id])
            .await?;
        tx.execute("DELETE FROM users WHERE id = $1", &[&user_id])
            .await?;
        tx.commit().await?;

        info!("Deleted user {} and all dependent rows", user_id);
        Ok(())
    }

    pub async fn count_users(&self) -> Result<i64> {
        let client = self.pool.get().await?;
        let row = client.query_one("SELECT COUNT(*) FROM users", &[]).await?;
        Ok(row.get(0))
    }

    /// All non-admin accounts, ordered by id.
    pub async fn list_trainees(&self) -> Result<Vec<User>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, username, department FROM users WHERE role = 'user' ORDER BY id",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| User {
                id: row.get(0),
                username: row.get(1),
                role: Role::User,
                department: row.get(2),
            })
            .collect())
    }

    // ---- scenario catalog ----

    pub async fn insert_scenario(
        &self,
        text: &str,
        difficulty: Difficulty,
        image_path: Option<&str>,
    ) -> Result<i32> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO scenarios (scenario_text, difficulty, image_path) \
                 VALUES ($1, $2, $3) RETURNING id",
                &[&text, &difficulty.as_label(), &image_path],
            )
            .await?;
        Ok(row.get(0))
    }

    /// Uniform random pick over the whole catalog. `None` when empty.
    pub async fn pick_random_scenario(&self) -> Result<Option<Scenario>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, scenario_text, difficulty, image_path FROM scenarios \
                 ORDER BY RANDOM() LIMIT 1",
                &[],
            )
            .await?;
        row.map(|r| scenario_from_row(&r)).transpose()
    }

    pub async fn scenario_count(&self) -> Result<i64> {
        let client = self.pool.get().await?;
        let row = client.query_one("SELECT COUNT(*) FROM scenarios", &[]).await?;
        Ok(row.get(0))
    }

    pub async fn list_scenarios(&self) -> Result<Vec<Scenario>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, scenario_text, difficulty, image_path FROM scenarios ORDER BY id",
                &[],
            )
            .await?;
        rows.iter().map(scenario_from_row).collect()
    }

    // ---- interaction ledger + metrics aggregator ----

    /// Appends one exchange and refreshes the user's rollup inside the
    /// same transaction: no reader ever sees the new interaction without
    /// the updated rollup. The user row is locked first, so a concurrent
    /// delete cannot leave a rollup for a vanished account.
    pub async fn append_interaction(
        &self,
        user_id: i32,
        scenario_id: i32,
        user_response: &str,
        feedback: &str,
    ) -> Result<i32> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        tx.query_opt("SELECT id FROM users WHERE id = $1 FOR UPDATE", &[&user_id])
            .await?
            .ok_or(StoreError::UserNotFound)?;

        let row = tx
            .query_one(
                "INSERT INTO interactions (user_id, scenario_id, user_response, feedback) \
                 VALUES ($1, $2, $3, $4) RETURNING id",
                &[&user_id, &scenario_id, &user_response, &feedback],
            )
            .await
            .map_err(|e| {
                error!("Failed to append interaction for user {}: {}", user_id, e);
                StoreError::Storage(e.to_string())
            })?;
        let interaction_id: i32 = row.get(0);

        let history = tx
            .query(
                "SELECT scenario_id, feedback FROM interactions WHERE user_id = $1",
                &[&user_id],
            )
            .await?
            .iter()
            .map(|r| (r.get(0), r.get(1)))
            .collect::<Vec<(i32, String)>>();

        // Full recompute from the ledger, never an incremental patch.
        if let Some(rollup) = rollup_from_rows(&history) {
            upsert_rollup(&tx, user_id, &rollup).await?;
        }

        tx.commit().await?;
        Ok(interaction_id)
    }

    /// Recomputes one user's rollup from scratch. Idempotent; removes the
    /// rollup row entirely when the user has no interactions.
    pub async fn recompute_metrics(&self, user_id: i32) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let history = tx
            .query(
                "SELECT scenario_id, feedback FROM interactions WHERE user_id = $1",
                &[&user_id],
            )
            .await?
            .iter()
            .map(|r| (r.get(0), r.get(1)))
            .collect::<Vec<(i32, String)>>();

        match rollup_from_rows(&history) {
            Some(rollup) => upsert_rollup(&tx, user_id, &rollup).await?,
            None => {
                tx.execute("DELETE FROM metrics WHERE user_id = $1", &[&user_id])
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// The materialized rollup row, if the user has one.
    pub async fn rollup_for(&self, user_id: i32) -> Result<Option<Rollup>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT scenarios_completed, total_attempts, correct_percentage, \
                 error_percentage FROM metrics WHERE user_id = $1",
                &[&user_id],
            )
            .await?;
        Ok(row.map(|r| Rollup {
            scenarios_completed: r.get(0),
            total_attempts: r.get(1),
            correct_percentage: r.get(2),
            error_percentage: r.get(3),
        }))
    }

    /// Read-only aggregate straight off the raw interactions, bypassing
    /// the materialized rollup. `None` for users with no history.
    pub async fn user_stats(&self, user_id: i32) -> Result<Option<UserStats>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT scenario_id, feedback, created_at FROM interactions WHERE user_id = $1",
                &[&user_id],
            )
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut distinct = HashSet::new();
        let mut correct = 0i64;
        let mut last_active: Option<DateTime<Utc>> = None;
        for row in &rows {
            distinct.insert(row.get::<_, i32>(0));
            if is_correct(row.get(1)) {
                correct += 1;
            }
            let ts: DateTime<Utc> = row.get(2);
            last_active = Some(match last_active {
                Some(prev) if prev > ts => prev,
                _ => ts,
            });
        }

        Ok(Some(UserStats {
            completed: distinct.len() as i64,
            total: rows.len() as i64,
            correct_count: correct,
            last_active: last_active.expect("non-empty history has a timestamp"),
        }))
    }

    /// Every ledger row for one user, oldest first.
    pub async fn ledger_for(&self, user_id: i32) -> Result<Vec<Interaction>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, user_id, scenario_id, user_response, feedback, created_at \
                 FROM interactions WHERE user_id = $1 ORDER BY created_at, id",
                &[&user_id],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| Interaction {
                id: row.get(0),
                user_id: row.get(1),
                scenario_id: row.get(2),
                user_response: row.get(3),
                feedback: row.get(4),
                created_at: row.get(5),
            })
            .collect())
    }

    /// The conversation so far on one scenario, oldest first, as
    /// `(user_response, feedback)` pairs. Feeds the text-generation call.
    pub async fn scenario_exchanges(
        &self,
        user_id: i32,
        scenario_id: i32,
    ) -> Result<Vec<(String, String)>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT user_response, feedback FROM interactions \
                 WHERE user_id = $1 AND scenario_id = $2 ORDER BY created_at, id",
                &[&user_id, &scenario_id],
            )
            .await?;
        Ok(rows.iter().map(|r| (r.get(0), r.get(1))).collect())
    }

    // ---- reporting ----

    /// Metrics for a single user, left-join semantics: the row exists even
    /// before the user's first interaction.
    pub async fn user_metrics(&self, user_id: i32) -> Result<MetricsRow> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT u.id, u.username, m.scenarios_completed, m.total_attempts, \
                        m.correct_percentage, m.error_percentage \
                 FROM users u LEFT JOIN metrics m ON u.id = m.user_id \
                 WHERE u.id = $1",
                &[&user_id],
            )
            .await?
            .ok_or(StoreError::UserNotFound)?;
        Ok(metrics_row_from_row(&row))
    }

    /// One row per `user`-role account, ordered by user id so exports are
    /// reproducible. Accounts without interactions carry no rollup.
    pub async fn snapshot_all_users(&self) -> Result<Vec<MetricsRow>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT u.id, u.username, m.scenarios_completed, m.total_attempts, \
                        m.correct_percentage, m.error_percentage \
                 FROM users u LEFT JOIN metrics m ON u.id = m.user_id \
                 WHERE u.role = 'user' ORDER BY u.id",
                &[],
            )
            .await?;
        Ok(rows.iter().map(metrics_row_from_row).collect())
    }
}

async fn upsert_rollup(
    tx: &tokio_postgres::Transaction<'_>,
    user_id: i32,
    rollup: &Rollup,
) -> Result<()> {
    tx.execute(
        "INSERT INTO metrics (user_id, scenarios_completed, total_attempts, \
                              correct_percentage, error_percentage) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (user_id) DO UPDATE SET \
             scenarios_completed = EXCLUDED.scenarios_completed, \
             total_attempts = EXCLUDED.total_attempts, \
             correct_percentage = EXCLUDED.correct_percentage, \
             error_percentage = EXCLUDED.error_percentage",
        &[
            &user_id,
            &rollup.scenarios_completed,
            &rollup.total_attempts,
            &rollup.correct_percentage,
            &rollup.error_percentage,
        ],
    )
    .await?;
    Ok(())
}

fn scenario_from_row(row: &tokio_postgres::Row) -> Result<Scenario> {
    let label: String = row.get(2);
    Ok(Scenario {
        id: row.get(0),
        text: row.get(1),
        difficulty: Difficulty::from_label(&label)
            .ok_or_else(|| StoreError::Storage(format!("unknown difficulty '{}'", label)))?,
        image_path: row.get(3),
    })
}

fn metrics_row_from_row(row: &tokio_postgres::Row) -> MetricsRow {
    let total: Option<i64> = row.get(3);
    MetricsRow {
        user_id: row.get(0),
        username: row.get(1),
        rollup: total.map(|total_attempts| Rollup {
            scenarios_completed: row.get::<_, Option<i64>>(2).unwrap_or(0),
            total_attempts,
            correct_percentage: row.get::<_, Option<f64>>(4).unwrap_or(0.0),
            error_percentage: row.get::<_, Option<f64>>(5).unwrap_or(0.0),
        }),
    }
}
