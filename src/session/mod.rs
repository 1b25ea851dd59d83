use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;
use log::info;

use crate::database::Scenario;

/// Guided exchanges per scenario before it counts as completed.
pub const EXCHANGES_PER_SCENARIO: u32 = 3;

/// Where a logged-in user currently stands on their scenario.
///
/// Purely in-memory: the ledger keeps every exchange forever, but live
/// progress dies with the process. After a restart every user starts a
/// fresh scenario at zero regardless of prior history. That asymmetry is
/// intentional.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Logged in, no scenario bound yet.
    AwaitingScenario,
    /// Working through a scenario; `exchanges` counts logged exchanges.
    InProgress { scenario: Scenario, exchanges: u32 },
    /// Hit the exchange limit; waiting for an explicit continue signal.
    Completed { scenario: Scenario },
    /// The catalog had nothing left to hand out.
    NoMoreScenarios,
}

impl SessionState {
    pub fn scenario(&self) -> Option<&Scenario> {
        match self {
            SessionState::InProgress { scenario, .. } | SessionState::Completed { scenario } => {
                Some(scenario)
            }
            _ => None,
        }
    }
}

/// Tracks per-user session state. Each user gets their own entry behind
/// its own mutex, so concurrent exchanges for different users never
/// contend and interleaved calls for one user cannot corrupt the counter.
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: Mutex<HashMap<i32, Arc<Mutex<SessionState>>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, user_id: i32) -> Arc<Mutex<SessionState>> {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::AwaitingScenario)))
            .clone()
    }

    /// Binds a freshly drawn scenario to the user, or marks the session
    /// exhausted when the catalog came up empty. Resets the counter.
    pub fn begin(&self, user_id: i32, scenario: Option<Scenario>) -> SessionState {
        let entry = self.entry(user_id);
        let mut state = entry.lock();
        *state = match scenario {
            Some(scenario) => SessionState::InProgress {
                scenario,
                exchanges: 0,
            },
            None => SessionState::NoMoreScenarios,
        };
        state.clone()
    }

    /// Current state for the user; `AwaitingScenario` if they have no
    /// session yet.
    pub fn state(&self, user_id: i32) -> SessionState {
        self.entry(user_id).lock().clone()
    }

    pub fn current_scenario(&self, user_id: i32) -> Option<Scenario> {
        self.entry(user_id).lock().scenario().cloned()
    }

    /// Counts one classified-and-logged exchange. On reaching the limit
    /// the state flips to `Completed`; further calls in any other state
    /// leave it untouched.
    pub fn record_exchange(&self, user_id: i32) -> SessionState {
        let entry = self.entry(user_id);
        let mut state = entry.lock();
        if let SessionState::InProgress { scenario, exchanges } = &*state {
            let exchanges = exchanges + 1;
            *state = if exchanges >= EXCHANGES_PER_SCENARIO {
                info!("User {} completed scenario {}", user_id, scenario.id);
                SessionState::Completed {
                    scenario: scenario.clone(),
                }
            } else {
                SessionState::InProgress {
                    scenario: scenario.clone(),
                    exchanges,
                }
            };
        }
        state.clone()
    }

    /// The explicit continue signal: moves on to the next scenario (or
    /// `NoMoreScenarios`) and resets the counter.
    pub fn advance(&self, user_id: i32, next: Option<Scenario>) -> SessionState {
        self.begin(user_id, next)
    }

    /// Logout: drops the session entry entirely.
    pub fn end(&self, user_id: i32) {
        let mut sessions = self.sessions.lock();
        sessions.remove(&user_id);
    }

    pub fn active_users(&self) -> Vec<i32> {
        let sessions = self.sessions.lock();
        let mut ids: Vec<i32> = sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
