//! Chain status state machine.
//!
//! Every status change of a chain goes through [`ChainStatus::transition`]; a trigger
//! that is not valid from the current status yields [`InvalidTransition`] and leaves the
//! status untouched.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChainStatus {
    Pending,
    Deploying,
    Active,
    Paused,
    Scaling,
    Upgrading,
    Maintenance,
    Failed,
    Deleted,
}

/// Triggers that move a chain between statuses.
///
/// Displayed as the verb used in [`InvalidTransition`] messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ChainTransition {
    /// Deployment workflow succeeded or the fallback timer fired
    #[strum(to_string = "activate")]
    Activate,
    #[strum(to_string = "pause")]
    Pause,
    #[strum(to_string = "resume")]
    Resume,
    #[strum(to_string = "scale")]
    BeginScaling,
    #[strum(to_string = "settle scaling of")]
    SettleScaling,
    #[strum(to_string = "upgrade")]
    BeginUpgrade,
    #[strum(to_string = "complete the upgrade of")]
    CompleteUpgrade,
    #[strum(to_string = "fail the upgrade of")]
    FailUpgrade,
    #[strum(to_string = "roll back")]
    RollbackUpgrade,
    #[strum(to_string = "restore")]
    BeginRestore,
    #[strum(to_string = "finish restoring")]
    CompleteRestore,
    #[strum(to_string = "delete")]
    Delete,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot {trigger} a chain that is {from}")]
pub struct InvalidTransition {
    pub from: ChainStatus,
    pub trigger: ChainTransition,
}

impl ChainStatus {
    /// Initial status of a freshly created chain
    pub fn initial(registered_onchain: bool) -> Self {
        if registered_onchain {
            ChainStatus::Deploying
        } else {
            ChainStatus::Pending
        }
    }

    pub fn transition(self, trigger: ChainTransition) -> Result<ChainStatus, InvalidTransition> {
        use ChainStatus::*;
        use ChainTransition::*;

        let next = match (self, trigger) {
            (Pending | Deploying, Activate) => Active,
            (Active, Pause) => Paused,
            (Paused, Resume) => Active,
            (Active | Paused | Scaling, BeginScaling) => Scaling,
            (Scaling, SettleScaling) => Active,
            (Active, BeginUpgrade) => Upgrading,
            (Upgrading, CompleteUpgrade) => Active,
            (Upgrading, FailUpgrade) => Failed,
            (Failed, RollbackUpgrade) => Active,
            (Active, BeginRestore) => Maintenance,
            (Maintenance, CompleteRestore) => Active,
            (from, Delete) if from != Deleted => Deleted,
            (from, trigger) => return Err(InvalidTransition { from, trigger }),
        };

        Ok(next)
    }

    pub fn is_deploying(&self) -> bool {
        matches!(self, ChainStatus::Pending | ChainStatus::Deploying)
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn initial_status_depends_on_registration() {
        assert_eq!(ChainStatus::initial(false), ChainStatus::Pending);
        assert_eq!(ChainStatus::initial(true), ChainStatus::Deploying);
    }

    #[test]
    fn pause_and_resume_guards() {
        let paused = ChainStatus::Active
            .transition(ChainTransition::Pause)
            .unwrap();
        assert_eq!(paused, ChainStatus::Paused);

        let err = paused.transition(ChainTransition::Pause).unwrap_err();
        assert_eq!(err.from, ChainStatus::Paused);
        assert_eq!(err.to_string(), "cannot pause a chain that is paused");

        assert!(ChainStatus::Active
            .transition(ChainTransition::Resume)
            .is_err());
        assert_eq!(
            paused.transition(ChainTransition::Resume).unwrap(),
            ChainStatus::Active
        );
    }

    #[test]
    fn upgrade_cycle_with_rollback() {
        let upgrading = ChainStatus::Active
            .transition(ChainTransition::BeginUpgrade)
            .unwrap();
        assert!(upgrading.transition(ChainTransition::BeginUpgrade).is_err());

        let failed = upgrading.transition(ChainTransition::FailUpgrade).unwrap();
        assert_eq!(failed, ChainStatus::Failed);
        assert_eq!(
            failed.transition(ChainTransition::RollbackUpgrade).unwrap(),
            ChainStatus::Active
        );
    }

    #[test]
    fn rejection_messages_read_as_sentences() {
        let err = ChainStatus::Upgrading
            .transition(ChainTransition::BeginScaling)
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot scale a chain that is upgrading");

        let err = ChainStatus::Paused
            .transition(ChainTransition::BeginRestore)
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot restore a chain that is paused");

        let err = ChainStatus::Active
            .transition(ChainTransition::CompleteUpgrade)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot complete the upgrade of a chain that is active"
        );
    }

    #[test]
    fn scaling_is_allowed_from_active_paused_and_scaling_only() {
        for status in ChainStatus::iter() {
            let result = status.transition(ChainTransition::BeginScaling);
            match status {
                ChainStatus::Active | ChainStatus::Paused | ChainStatus::Scaling => {
                    assert_eq!(result.unwrap(), ChainStatus::Scaling)
                }
                _ => assert!(result.is_err(), "{status} should not scale"),
            }
        }
    }

    #[test]
    fn delete_from_any_live_status() {
        for status in ChainStatus::iter() {
            let result = status.transition(ChainTransition::Delete);
            if status == ChainStatus::Deleted {
                assert!(result.is_err());
            } else {
                assert_eq!(result.unwrap(), ChainStatus::Deleted);
            }
        }
    }

    #[test]
    fn deleted_chain_accepts_nothing() {
        use ChainTransition::*;
        for trigger in [
            Activate,
            Pause,
            Resume,
            BeginScaling,
            SettleScaling,
            BeginUpgrade,
            CompleteUpgrade,
            FailUpgrade,
            RollbackUpgrade,
            BeginRestore,
            CompleteRestore,
            Delete,
        ] {
            assert!(ChainStatus::Deleted.transition(trigger).is_err());
        }
    }

    #[test]
    fn restore_requires_active() {
        assert_eq!(
            ChainStatus::Active
                .transition(ChainTransition::BeginRestore)
                .unwrap(),
            ChainStatus::Maintenance
        );
        assert!(ChainStatus::Paused
            .transition(ChainTransition::BeginRestore)
            .is_err());
        assert!(ChainStatus::Scaling
            .transition(ChainTransition::BeginRestore)
            .is_err());
    }

    #[test]
    fn status_strings_are_snake_case() {
        assert_eq!(ChainStatus::Maintenance.as_str(), "maintenance");
        assert_eq!(
            serde_json::to_string(&ChainStatus::Upgrading).unwrap(),
            "\"upgrading\""
        );
        assert_eq!(
            "deploying".parse::<ChainStatus>().unwrap(),
            ChainStatus::Deploying
        );
    }
}
