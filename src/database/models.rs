use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

/// Scenario difficulty tier. The database keeps the original Spanish
/// labels, which are also what the UI layer renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Intermediate,
    Hard,
}

impl Difficulty {
    pub fn as_label(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Fácil",
            Difficulty::Intermediate => "Intermedio",
            Difficulty::Hard => "Difícil",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "Fácil" => Some(Difficulty::Easy),
            "Intermedio" => Some(Difficulty::Intermediate),
            "Difícil" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub role: Role,
    pub department: String,
}

/// What a successful login hands back to the caller. Nothing more: the
/// presentation layer decides where to route based on the role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: i32,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: i32,
    pub text: String,
    pub difficulty: Difficulty,
    pub image_path: Option<String>,
}

/// One guided exchange, immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: i32,
    pub user_id: i32,
    pub scenario_id: i32,
    pub user_response: String,
    pub feedback: String,
    pub created_at: DateTime<Utc>,
}

/// Materialized per-user summary. Derived from the interaction history,
/// never edited directly; `error_percentage` is computed as the
/// complement of `correct_percentage` so the two always sum to 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollup {
    pub scenarios_completed: i64,
    pub total_attempts: i64,
    pub correct_percentage: f64,
    pub error_percentage: f64,
}

impl Rollup {
    /// Builds a rollup from raw counts. Returns `None` for an empty
    /// history: a user with no interactions has no rollup row at all.
    pub fn from_counts(distinct_scenarios: i64, total: i64, correct: i64) -> Option<Self> {
        if total == 0 {
            return None;
        }
        let correct_percentage = (correct as f64 * 100.0 / total as f64 * 100.0).round() / 100.0;
        Some(Rollup {
            scenarios_completed: distinct_scenarios,
            total_attempts: total,
            correct_percentage,
            error_percentage: 100.0 - correct_percentage,
        })
    }
}

/// Ad-hoc aggregate over raw interactions, used by reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    pub completed: i64,
    pub total: i64,
    pub correct_count: i64,
    pub last_active: DateTime<Utc>,
}

/// One row of the all-users metrics snapshot. `rollup` is `None` for
/// accounts that have not interacted yet (left-join semantics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRow {
    pub user_id: i32,
    pub username: String,
    pub rollup: Option<Rollup>,
}
