//! End-to-end flow tests against a live PostgreSQL.
//!
//! These are `#[ignore]`d by default: run them with
//! `cargo test -- --ignored` after pointing `DB_HOST`/`DB_PORT`/`DB_NAME`/
//! `DB_USER`/`DB_PASSWORD` at a scratch database. Each test registers
//! uniquely named users so the suite can run repeatedly against the same
//! database.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;

use phishguard::database::StoreError;
use phishguard::trainer::engine::{EngineError, SCENARIO_COMPLETE_NOTICE, SCENARIO_FINISHED_NOTICE};
use phishguard::{
    DatabaseManager, FeedbackSource, SessionState, Settings, TrainingEngine, SessionTracker,
};

/// Plays back a fixed script of feedback texts, one per exchange.
struct ScriptedFeedback {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedFeedback {
    fn new<const N: usize>(replies: [&str; N]) -> Self {
        ScriptedFeedback {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
        }
    }
}

impl FeedbackSource for ScriptedFeedback {
    async fn generate_feedback(
        &self,
        _scenario_text: &str,
        _history: &[(String, String)],
        _user_input: &str,
    ) -> Result<String> {
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

/// Always fails, standing in for an unreachable completion service.
struct BrokenFeedback;

impl FeedbackSource for BrokenFeedback {
    async fn generate_feedback(
        &self,
        _scenario_text: &str,
        _history: &[(String, String)],
        _user_input: &str,
    ) -> Result<String> {
        anyhow::bail!("service unavailable")
    }
}

fn unique_name(prefix: &str) -> String {
    format!(
        "{}_{}_{}",
        prefix,
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

async fn setup() -> (Arc<DatabaseManager>, Settings) {
    let _ = env_logger::builder().is_test(true).try_init();
    let settings = Settings::from_env();
    let store = phishguard::bootstrap(&settings)
        .await
        .expect("database must be reachable for ignored tests");
    (Arc::new(store), settings)
}

#[tokio::test]
#[ignore = "requires a PostgreSQL instance (DB_* env vars)"]
async fn scripted_scenario_yields_expected_rollup() {
    let (store, _settings) = setup().await;
    let user_id = store
        .register_user(&unique_name("e2e"), "secreto", Some("Ventas"))
        .await
        .unwrap();

    let engine = TrainingEngine::new(
        store.clone(),
        Arc::new(SessionTracker::new()),
        ScriptedFeedback::new([
            "¡Correcto! No hiciste clic en el enlace.",
            "Incorrecto, ese remitente es falso.",
            "¡Correcto! Reportarlo es el paso adecuado.",
        ]),
    );

    let first = engine.submit_response(user_id, "no haría clic").await.unwrap();
    assert!(!first.scenario_completed);
    assert!(first.text.starts_with("¡Correcto!"));

    let second = engine.submit_response(user_id, "haría clic").await.unwrap();
    assert!(!second.scenario_completed);

    let third = engine.submit_response(user_id, "lo reportaría").await.unwrap();
    assert!(third.scenario_completed);
    assert_eq!(third.text, SCENARIO_FINISHED_NOTICE);

    let rollup = store.rollup_for(user_id).await.unwrap().unwrap();
    assert_eq!(rollup.total_attempts, 3);
    assert_eq!(rollup.scenarios_completed, 1);
    assert_eq!(rollup.correct_percentage, 66.67);
    assert_eq!(rollup.error_percentage, 33.33);

    // A fourth response without the continue signal logs nothing.
    let fourth = engine.submit_response(user_id, "¿y ahora?").await.unwrap();
    assert_eq!(fourth.text, SCENARIO_COMPLETE_NOTICE);
    let rollup = store.rollup_for(user_id).await.unwrap().unwrap();
    assert_eq!(rollup.total_attempts, 3);

    // The ledger-derived stats agree with the materialized rollup.
    let stats = store.user_stats(user_id).await.unwrap().unwrap();
    assert_eq!(stats.total, rollup.total_attempts);
    assert_eq!(stats.completed, rollup.scenarios_completed);
    assert_eq!(stats.correct_count, 2);

    // Continue signal binds a fresh scenario with a reset counter.
    match engine.continue_training(user_id).await.unwrap() {
        SessionState::InProgress { exchanges, .. } => assert_eq!(exchanges, 0),
        other => panic!("expected a new scenario, got {:?}", other),
    }

    store.delete_user(user_id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a PostgreSQL instance (DB_* env vars)"]
async fn feedback_failure_logs_nothing() {
    let (store, _settings) = setup().await;
    let user_id = store
        .register_user(&unique_name("broken"), "secreto", None)
        .await
        .unwrap();

    let engine = TrainingEngine::new(store.clone(), Arc::new(SessionTracker::new()), BrokenFeedback);

    let err = engine.submit_response(user_id, "no haría clic").await.unwrap_err();
    assert!(matches!(err, EngineError::Feedback(_)));

    // No interaction, no rollup, counter still at zero.
    assert!(store.rollup_for(user_id).await.unwrap().is_none());
    assert!(store.user_stats(user_id).await.unwrap().is_none());
    match engine.tracker().state(user_id) {
        SessionState::InProgress { exchanges, .. } => assert_eq!(exchanges, 0),
        other => panic!("expected bound scenario with zero exchanges, got {:?}", other),
    }

    store.delete_user(user_id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a PostgreSQL instance (DB_* env vars)"]
async fn deleting_a_user_cascades_and_protects_admins() {
    let (store, settings) = setup().await;
    let user_id = store
        .register_user(&unique_name("gone"), "secreto", None)
        .await
        .unwrap();

    let engine = TrainingEngine::new(
        store.clone(),
        Arc::new(SessionTracker::new()),
        ScriptedFeedback::new(["¡Correcto! Bien."]),
    );
    engine.submit_response(user_id, "no haría clic").await.unwrap();
    assert!(store.rollup_for(user_id).await.unwrap().is_some());
    let ledger = store.ledger_for(user_id).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].user_response, "no haría clic");

    store.delete_user(user_id).await.unwrap();
    assert!(store.rollup_for(user_id).await.unwrap().is_none());
    assert!(store.user_stats(user_id).await.unwrap().is_none());
    assert!(matches!(
        store.user_metrics(user_id).await.unwrap_err(),
        StoreError::UserNotFound
    ));
    assert!(matches!(
        store.delete_user(user_id).await.unwrap_err(),
        StoreError::UserNotFound
    ));

    // The provisioned admin can never be deleted.
    let admin = store
        .authenticate(&settings.admin_username, &settings.admin_password)
        .await
        .unwrap();
    assert!(matches!(
        store.delete_user(admin.user_id).await.unwrap_err(),
        StoreError::ProtectedRole
    ));
}

#[tokio::test]
#[ignore = "requires a PostgreSQL instance (DB_* env vars)"]
async fn registration_respects_capacity_and_uniqueness() {
    let (store, settings) = setup().await;
    let username = unique_name("dup");
    store.register_user(&username, "secreto", None).await.unwrap();
    assert!(matches!(
        store.register_user(&username, "otro", None).await.unwrap_err(),
        StoreError::DuplicateUsername
    ));

    // A ceiling equal to the current population rejects the next signup
    // and creates no row.
    let mut capped = settings.clone();
    capped.user_limit = store.count_users().await.unwrap();
    let capped_store = DatabaseManager::connect(&capped).await.unwrap();
    let rejected = unique_name("overflow");
    assert!(matches!(
        capped_store
            .register_user(&rejected, "secreto", None)
            .await
            .unwrap_err(),
        StoreError::CapacityExceeded(_)
    ));
    assert!(matches!(
        store.authenticate(&rejected, "secreto").await.unwrap_err(),
        StoreError::BadCredential
    ));
}

#[tokio::test]
#[ignore = "requires a PostgreSQL instance (DB_* env vars)"]
async fn credential_errors_do_not_reveal_the_failing_field() {
    let (store, _settings) = setup().await;
    let username = unique_name("login");
    store.register_user(&username, "secreto", None).await.unwrap();

    let wrong_password = store.authenticate(&username, "equivocada").await.unwrap_err();
    let unknown_user = store.authenticate("no_existe_nadie", "secreto").await.unwrap_err();
    assert_eq!(wrong_password.to_string(), unknown_user.to_string());

    let ok = store.authenticate(&username, "secreto").await.unwrap();
    assert_eq!(ok.role, phishguard::database::Role::User);
}

#[tokio::test]
#[ignore = "requires a PostgreSQL instance (DB_* env vars)"]
async fn export_includes_users_without_interactions() {
    let (store, _settings) = setup().await;
    let idle = store
        .register_user(&unique_name("idle"), "secreto", None)
        .await
        .unwrap();
    let active = store
        .register_user(&unique_name("active"), "secreto", None)
        .await
        .unwrap();

    let engine = TrainingEngine::new(
        store.clone(),
        Arc::new(SessionTracker::new()),
        ScriptedFeedback::new(["¡Correcto! Bien.", "Incorrecto, revisa el dominio."]),
    );
    engine.submit_response(active, "no haría clic").await.unwrap();
    engine.submit_response(active, "haría clic").await.unwrap();

    let trainees = phishguard::admin::list_trainees(&store).await.unwrap();
    assert!(trainees.iter().any(|u| u.id == idle));
    assert!(trainees.iter().any(|u| u.id == active));
    let idle_metrics = phishguard::admin::user_metrics(&store, idle).await.unwrap();
    assert!(idle_metrics.rollup.is_none());
    let active_metrics = phishguard::admin::user_metrics(&store, active).await.unwrap();
    assert_eq!(active_metrics.rollup.unwrap().correct_percentage, 50.0);

    let dir = std::env::temp_dir().join(unique_name("phishguard_export"));
    let path = phishguard::export::export_metrics_csv(&store, &dir).await.unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert!(lines[0].starts_with("ID,Nombre de Usuario"));

    let idle_line = lines
        .iter()
        .find(|l| l.starts_with(&format!("{},", idle)))
        .expect("idle user exported");
    assert!(idle_line.ends_with(",,,,"));

    let active_line = lines
        .iter()
        .find(|l| l.starts_with(&format!("{},", active)))
        .expect("active user exported");
    assert!(active_line.ends_with(",1,2,50.00,50.00"));

    // Rows come out ordered by user id.
    let ids: Vec<i32> = lines[1..]
        .iter()
        .filter_map(|l| l.split(',').next())
        .filter_map(|id| id.parse().ok())
        .collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);

    store.delete_user(idle).await.unwrap();
    store.delete_user(active).await.unwrap();
}
