//! Stage lifecycle transitions.
//!
//! Every state change of a [`Stage`] goes through [`Stage::transition`], so
//! an illegal move is rejected with `InvalidTransition` regardless of which
//! component asked for it.

use chrono::{DateTime, Utc};

use orchestrator_core::{OrchestratorError, OrchestratorResult};

use crate::entities::{Stage, StageState, REASON_WORKER_FAILURE};
use crate::events::{StageEvent, StageOutcome};

/// Whether `from -> to` is a legal stage transition
pub fn is_valid_transition(from: StageState, to: StageState) -> bool {
    use StageState::*;

    match (from, to) {
        (Blocked, Eligible) => true,
        (Blocked, Failed) => true,
        (Eligible, Dispatched) => true,
        (Eligible, Failed) => true,
        (Dispatched, Eligible) => true,
        (Dispatched, Running) => true,
        (Dispatched, Completed) => true,
        (Dispatched, Failed) => true,
        (Dispatched, RetryPending) => true,
        (Running, Running) => true,
        (Running, Completed) => true,
        (Running, Failed) => true,
        (Running, RetryPending) => true,
        (RetryPending, Eligible) => true,
        (RetryPending, Failed) => true,
        _ => false,
    }
}

/// What applying a worker event did to the stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventEffect {
    Progressed,
    Completed,
    /// Terminal failure; dependents must be cascaded
    Failed,
    RetryScheduled,
}

impl Stage {
    fn transition(&mut self, to: StageState, now: DateTime<Utc>) -> OrchestratorResult<()> {
        if !is_valid_transition(self.state, to) {
            return Err(OrchestratorError::InvalidTransition {
                stage_id: self.id.clone(),
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        self.updated_at = now;
        Ok(())
    }

    /// BLOCKED -> ELIGIBLE once dependencies are satisfied
    pub fn mark_eligible(&mut self, now: DateTime<Utc>) -> OrchestratorResult<()> {
        self.transition(StageState::Eligible, now)
    }

    /// ELIGIBLE -> DISPATCHED, starting the next attempt
    pub fn claim(&mut self, claimant: &str, now: DateTime<Utc>) -> OrchestratorResult<()> {
        self.transition(StageState::Dispatched, now)?;
        self.attempt += 1;
        self.dispatched_at = Some(now);
        self.claimed_by = Some(claimant.to_string());
        self.retry_at = None;
        Ok(())
    }

    /// DISPATCHED -> ELIGIBLE when the task message could not be published.
    /// The attempt is handed back so the next dispatch reuses its number.
    pub fn revert_claim(&mut self, now: DateTime<Utc>) -> OrchestratorResult<()> {
        self.transition(StageState::Eligible, now)?;
        self.attempt = self.attempt.saturating_sub(1);
        self.dispatched_at = None;
        self.claimed_by = None;
        Ok(())
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) -> OrchestratorResult<()> {
        self.transition(StageState::Running, now)
    }

    pub fn complete(
        &mut self,
        result: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        self.transition(StageState::Completed, now)?;
        self.result = result;
        self.retry_at = None;
        Ok(())
    }

    /// Move to FAILED. A blank reason is replaced so no failed stage is
    /// left without one.
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> OrchestratorResult<()> {
        self.transition(StageState::Failed, now)?;
        let reason = reason.trim();
        self.failure_reason = Some(if reason.is_empty() {
            REASON_WORKER_FAILURE.to_string()
        } else {
            reason.to_string()
        });
        self.retry_at = None;
        Ok(())
    }

    pub fn schedule_retry(
        &mut self,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        self.transition(StageState::RetryPending, now)?;
        self.retry_at = Some(retry_at);
        self.claimed_by = None;
        Ok(())
    }

    /// RETRY_PENDING -> ELIGIBLE once the backoff has elapsed
    pub fn release_retry(&mut self, now: DateTime<Utc>) -> OrchestratorResult<bool> {
        match self.retry_at {
            Some(retry_at) if retry_at <= now && self.state == StageState::RetryPending => {
                self.transition(StageState::Eligible, now)?;
                self.retry_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Check an inbound event against the idempotency boundary: only the
    /// current attempt of an in-flight stage accepts events.
    pub fn check_event(&self, event: &StageEvent) -> OrchestratorResult<()> {
        if !self.state.is_in_flight() {
            return Err(OrchestratorError::stale_event(
                &self.id,
                format!("stage is {}", self.state),
            ));
        }

        if event.attempt != self.attempt {
            return Err(OrchestratorError::stale_event(
                &self.id,
                format!(
                    "attempt {} does not match current attempt {}",
                    event.attempt, self.attempt
                ),
            ));
        }

        Ok(())
    }

    /// Apply a worker event. `retry_at` is used only when a retryable
    /// failure arrives with attempts left.
    pub fn apply_event(
        &mut self,
        event: &StageEvent,
        max_attempts: u32,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<EventEffect> {
        self.check_event(event)?;

        match event.outcome {
            StageOutcome::Progress => {
                self.mark_running(now)?;
                Ok(EventEffect::Progressed)
            }
            StageOutcome::Success => {
                self.complete(event.payload.clone(), now)?;
                Ok(EventEffect::Completed)
            }
            StageOutcome::Failure if event.retryable && self.attempt < max_attempts => {
                self.schedule_retry(retry_at, now)?;
                Ok(EventEffect::RetryScheduled)
            }
            StageOutcome::Failure => {
                if event.payload.is_some() {
                    self.result = event.payload.clone();
                }
                self.fail(event.failure_reason.as_deref().unwrap_or_default(), now)?;
                Ok(EventEffect::Failed)
            }
        }
    }
}
