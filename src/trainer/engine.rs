use std::sync::Arc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::{DatabaseManager, StoreError};
use crate::feedback::FeedbackSource;
use crate::session::{SessionState, SessionTracker};

/// Returned when the user answers while the scenario is already complete:
/// nothing is logged until they either continue or log out.
pub const SCENARIO_COMPLETE_NOTICE: &str = "¡Excelente! Has completado este escenario. \
     ¿Quieres otro? (Responde 'sí' para continuar o 'salir' para terminar)";

/// Returned for the exchange that completes a scenario.
pub const SCENARIO_FINISHED_NOTICE: &str =
    "¡Buen trabajo! Has completado este escenario de phishing. ¿Te gustaría intentar otro?";

pub const NO_MORE_SCENARIOS_NOTICE: &str = "No hay más escenarios disponibles.";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The external text-completion call failed. Nothing was logged and
    /// the session counter did not move; the caller decides whether to
    /// retry the exchange.
    #[error("feedback generation failed: {0}")]
    Feedback(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeReply {
    pub text: String,
    pub scenario_completed: bool,
}

/// Orchestrates one guided exchange end to end: session state lookup,
/// the text-generation call, the ledger append (with its rollup refresh)
/// and the counter update, in that order.
pub struct TrainingEngine<F: FeedbackSource> {
    store: Arc<DatabaseManager>,
    tracker: Arc<SessionTracker>,
    feedback: F,
}

impl<F: FeedbackSource> TrainingEngine<F> {
    pub fn new(store: Arc<DatabaseManager>, tracker: Arc<SessionTracker>, feedback: F) -> Self {
        TrainingEngine {
            store,
            tracker,
            feedback,
        }
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// Binds a randomly drawn scenario to the user's session.
    pub async fn start_session(&self, user_id: i32) -> Result<SessionState, EngineError> {
        let scenario = self.store.pick_random_scenario().await?;
        if scenario.is_none() {
            warn!("No scenarios available for user {}", user_id);
        }
        Ok(self.tracker.begin(user_id, scenario))
    }

    /// Handles one submitted response.
    ///
    /// The ledger append happens only after the feedback call returns,
    /// with the feedback text exactly as generated; classification is
    /// applied downstream by the metrics recomputation.
    pub async fn submit_response(
        &self,
        user_id: i32,
        user_input: &str,
    ) -> Result<ExchangeReply, EngineError> {
        let scenario = match self.tracker.state(user_id) {
            SessionState::AwaitingScenario => match self.start_session(user_id).await? {
                SessionState::InProgress { scenario, .. } => scenario,
                _ => {
                    return Ok(ExchangeReply {
                        text: NO_MORE_SCENARIOS_NOTICE.to_string(),
                        scenario_completed: false,
                    })
                }
            },
            SessionState::InProgress { scenario, .. } => scenario,
            SessionState::Completed { .. } => {
                // No further classified exchange until the continue signal.
                return Ok(ExchangeReply {
                    text: SCENARIO_COMPLETE_NOTICE.to_string(),
                    scenario_completed: true,
                });
            }
            SessionState::NoMoreScenarios => {
                return Ok(ExchangeReply {
                    text: NO_MORE_SCENARIOS_NOTICE.to_string(),
                    scenario_completed: false,
                })
            }
        };

        let history = self.store.scenario_exchanges(user_id, scenario.id).await?;
        let feedback_text = self
            .feedback
            .generate_feedback(&scenario.text, &history, user_input)
            .await
            .map_err(|e| EngineError::Feedback(e.to_string()))?;

        self.store
            .append_interaction(user_id, scenario.id, user_input, &feedback_text)
            .await?;

        match self.tracker.record_exchange(user_id) {
            SessionState::Completed { .. } => Ok(ExchangeReply {
                text: SCENARIO_FINISHED_NOTICE.to_string(),
                scenario_completed: true,
            }),
            _ => Ok(ExchangeReply {
                text: feedback_text,
                scenario_completed: false,
            }),
        }
    }

    /// The explicit continue signal: draws a fresh scenario and resets
    /// the exchange counter.
    pub async fn continue_training(&self, user_id: i32) -> Result<SessionState, EngineError> {
        let next = self.store.pick_random_scenario().await?;
        info!(
            "User {} advancing to {}",
            user_id,
            next.as_ref()
                .map(|s| format!("scenario {}", s.id))
                .unwrap_or_else(|| "no scenario (catalog exhausted)".to_string())
        );
        Ok(self.tracker.advance(user_id, next))
    }

    /// Logout: live progress is discarded, the ledger keeps everything.
    pub fn end_session(&self, user_id: i32) {
        self.tracker.end(user_id);
    }
}
