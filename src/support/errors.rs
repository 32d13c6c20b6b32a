//! Error taxonomy
//!
//! One enum per §7 of the design: kinds, not identifiers. Every fallible
//! operation in this crate returns `Result<_, SimError>` or a variant of it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("transport error for {cp_id}: {message}")]
    Transport { cp_id: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out waiting for reply to {action} ({unique_id})")]
    Timeout { action: String, unique_id: String },

    #[error("StartTransaction rejected for {cp_id}: id_tag {id_tag} not authorized")]
    AuthorizationRejected { cp_id: String, id_tag: String },

    #[error("scenario error in '{scenario}': {message}")]
    Scenario { scenario: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type SimResult<T> = Result<T, SimError>;
