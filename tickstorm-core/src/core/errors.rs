//! Error kinds surfaced by the stream core
//!
//! Control operations reject bad input or bad timing synchronously with
//! `Validation` / `State`. The remaining kinds describe degradations that
//! are logged and absorbed inside a tick; they exist as values so callers
//! and tests can inspect what was dropped.

use thiserror::Error;

/// Convenience alias used across the core
pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// Malformed input (unknown TPS mode, invalid parameters)
    #[error("validation failed: {0}")]
    Validation(String),

    /// Operation not valid for the current state
    #[error("invalid state for {operation}: {reason}")]
    State {
        operation: &'static str,
        reason: String,
    },

    /// Pool unhealthy or worker creation failed
    #[error("resource exhausted ({resource}): {detail}")]
    ResourceExhaustion {
        resource: &'static str,
        detail: String,
    },

    /// A decision batch errored or timed out
    #[error("worker batch {batch} failed: {reason}")]
    TransientWorkerFailure { batch: usize, reason: String },

    /// Delivery to a single subscriber failed
    #[error("delivery to endpoint {endpoint} failed: {reason}")]
    BroadcastDelivery { endpoint: u64, reason: String },

    /// No simulation registered under this id
    #[error("simulation {id} not found")]
    NotFound { id: String },
}

impl SimError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SimError::Validation(msg.into())
    }

    pub fn state(operation: &'static str, reason: impl Into<String>) -> Self {
        SimError::State {
            operation,
            reason: reason.into(),
        }
    }

    /// True for kinds that are absorbed inside a tick instead of returned
    pub fn is_degradation(&self) -> bool {
        matches!(
            self,
            SimError::ResourceExhaustion { .. }
                | SimError::TransientWorkerFailure { .. }
                | SimError::BroadcastDelivery { .. }
        )
    }
}
