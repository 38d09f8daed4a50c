//! Experiment state machine: explicit states and legal transition guards.
//!
//! Every transition is validated against the state graph and recorded in a
//! per-experiment transition log holding the most recent
//! [`MAX_TRANSITIONS`] entries.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transition records kept per experiment; older ones are dropped
pub const MAX_TRANSITIONS: usize = 256;

/// Lifecycle state of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentState {
    /// Created or reset; no trained model.
    Idle,
    /// Model trained; ready to query or label.
    Initialized,
    /// Scoring the unlabeled pool.
    Querying,
    /// Retraining after a label.
    Training,
    /// Unrecoverable failure; only reset leaves this state.
    Error,
}

impl ExperimentState {
    /// Has a trained model and is not failed
    pub fn is_active(self) -> bool {
        matches!(self, Self::Initialized | Self::Querying | Self::Training)
    }

    fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Initialized => 1,
            Self::Querying => 2,
            Self::Training => 3,
            Self::Error => 4,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Idle,
            1 => Self::Initialized,
            2 => Self::Querying,
            3 => Self::Training,
            _ => Self::Error,
        }
    }
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Initialized => write!(f, "initialized"),
            Self::Querying => write!(f, "querying"),
            Self::Training => write!(f, "training"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Legal transitions between experiment states.
///
/// ```text
/// Idle → Initialized
/// Initialized → Querying | Training
/// Querying → Initialized
/// Training → Initialized
/// (any but Error) → Error
/// ```
///
/// Reset to `Idle` is always allowed and goes through
/// [`ExperimentStateMachine::reset`].
fn is_legal_transition(from: ExperimentState, to: ExperimentState) -> bool {
    use ExperimentState::*;

    if to == Error {
        return from != Error;
    }

    matches!(
        (from, to),
        (Idle, Initialized)
            | (Initialized, Querying)
            | (Initialized, Training)
            | (Querying, Initialized)
            | (Training, Initialized)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: ExperimentState,
    pub to: ExperimentState,
    pub at: DateTime<Utc>,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq)]
pub struct IllegalTransition {
    pub from: ExperimentState,
    pub to: ExperimentState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Current state of one machine, readable without the experiment's lock.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new(state: ExperimentState) -> Self {
        Self(Arc::new(AtomicU8::new(state.code())))
    }

    pub fn get(&self) -> ExperimentState {
        ExperimentState::from_code(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ExperimentState) {
        self.0.store(state.code(), Ordering::Release);
    }
}

/// Tracks the current state and the recent transition log.
#[derive(Debug)]
pub struct ExperimentStateMachine {
    current: ExperimentState,
    created_at: Instant,
    transitions: VecDeque<TransitionRecord>,
    observed: StateCell,
}

impl ExperimentStateMachine {
    /// Create a new state machine starting at `Idle`.
    pub fn new() -> Self {
        Self {
            current: ExperimentState::Idle,
            created_at: Instant::now(),
            transitions: VecDeque::new(),
            observed: StateCell::new(ExperimentState::Idle),
        }
    }

    pub fn current(&self) -> ExperimentState {
        self.current
    }

    /// A handle that follows this machine's state
    pub fn observer(&self) -> StateCell {
        self.observed.clone()
    }

    /// Attempt to advance to the next state.
    pub fn advance(
        &mut self,
        to: ExperimentState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }
        self.record(to, reason);
        Ok(())
    }

    /// Transition to `Error`.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(ExperimentState::Error, Some(reason))
    }

    /// Return to `Idle` from any state.
    pub fn reset(&mut self, reason: &str) {
        self.record(ExperimentState::Idle, Some(reason));
    }

    fn record(&mut self, to: ExperimentState, reason: Option<&str>) {
        tracing::debug!(from = %self.current, to = %to, "State transition");
        if self.transitions.len() == MAX_TRANSITIONS {
            self.transitions.pop_front();
        }
        self.transitions.push_back(TransitionRecord {
            from: self.current,
            to,
            at: Utc::now(),
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        self.observed.set(to);
    }

    /// Recorded transitions, oldest first
    pub fn transitions(&self) -> &VecDeque<TransitionRecord> {
        &self.transitions
    }
}

impl Default for ExperimentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
