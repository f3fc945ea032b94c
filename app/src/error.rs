use chain_store::{InvalidTransition, StoreError};
use strum::{Display, IntoStaticStr};
use thiserror::Error;
use uuid::Uuid;

use crate::deployment::DeploymentStep;

/// Stable error kinds surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    Validation,
    Conflict,
    Storage,
    Provisioning,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("{actor} does not own chain {chain_id}")]
    AccessDenied { actor: String, chain_id: Uuid },
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    // only produced inside the deployment workflow, never returned to callers
    #[error("Provisioning step {step} failed: {reason}")]
    Provisioning { step: DeploymentStep, reason: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AccessDenied { .. } => ErrorKind::AccessDenied,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Provisioning { .. } => ErrorKind::Provisioning,
        }
    }

    pub fn chain_not_found(id: Uuid) -> Self {
        Error::NotFound { entity: "chain", id }
    }
}

impl From<InvalidTransition> for Error {
    fn from(e: InvalidTransition) -> Self {
        Error::Conflict(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use chain_store::{ChainStatus, ChainTransition};

    #[test]
    fn invalid_transition_maps_to_conflict() {
        let err: Error = ChainStatus::Paused
            .transition(ChainTransition::Pause)
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "cannot pause a chain that is paused");
    }

    #[test]
    fn kinds_have_stable_names() {
        let err = Error::AccessDenied {
            actor: "mallory".into(),
            chain_id: Uuid::nil(),
        };
        assert_eq!(err.kind().to_string(), "access_denied");
        assert_eq!(
            Error::Validation("count must be positive".into())
                .kind()
                .to_string(),
            "validation"
        );
    }
}
