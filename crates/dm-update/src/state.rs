//! Update lifecycle states and the transitions between them

use std::fmt;

use crate::error::UpdateError;

/// Where an update currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateState {
    Idle,
    CheckingForUpdate,
    UpToDate,
    UpdateAvailable,
    Downloading,
    BackingUp,
    Installing,
    Verifying,
    Relaunching,
    RollingBack,
}

impl UpdateState {
    /// Whether moving from `self` to `next` is part of the lifecycle
    pub fn can_transition_to(self, next: UpdateState) -> bool {
        use UpdateState::*;
        matches!(
            (self, next),
            (Idle, CheckingForUpdate)
                | (Idle, Downloading)
                | (Idle, BackingUp)
                | (CheckingForUpdate, UpToDate)
                | (CheckingForUpdate, UpdateAvailable)
                | (CheckingForUpdate, Idle)
                | (UpToDate, Idle)
                | (UpToDate, CheckingForUpdate)
                | (UpToDate, Downloading)
                | (UpdateAvailable, Downloading)
                | (UpdateAvailable, CheckingForUpdate)
                | (UpdateAvailable, Idle)
                | (Downloading, BackingUp)
                | (Downloading, Relaunching)
                | (Downloading, Idle)
                | (BackingUp, Installing)
                | (BackingUp, Idle)
                | (Installing, Verifying)
                | (Installing, RollingBack)
                | (Verifying, Relaunching)
                | (Verifying, RollingBack)
                | (Verifying, Idle)
                | (Relaunching, Idle)
                | (RollingBack, Idle)
        )
    }

    /// States in which no transaction is in flight
    pub fn is_resting(self) -> bool {
        matches!(
            self,
            UpdateState::Idle | UpdateState::UpToDate | UpdateState::UpdateAvailable
        )
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateState::Idle => "idle",
            UpdateState::CheckingForUpdate => "checking",
            UpdateState::UpToDate => "up-to-date",
            UpdateState::UpdateAvailable => "update-available",
            UpdateState::Downloading => "downloading",
            UpdateState::BackingUp => "backing-up",
            UpdateState::Installing => "installing",
            UpdateState::Verifying => "verifying",
            UpdateState::Relaunching => "relaunching",
            UpdateState::RollingBack => "rolling-back",
        };
        f.write_str(name)
    }
}

/// Tracks the current state and rejects illegal moves
#[derive(Debug, Clone)]
pub struct StateMachine {
    app: String,
    state: UpdateState,
}

impl StateMachine {
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            state: UpdateState::Idle,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Move to `next`, or fail with `InvalidTransition`
    pub fn transition(&mut self, next: UpdateState) -> Result<(), UpdateError> {
        if !self.state.can_transition_to(next) {
            return Err(UpdateError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!("[{}] {} -> {}", self.app, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Return to `Idle` from wherever a failure left us
    ///
    /// Failure exits are always legal; this only logs if the table
    /// disagrees.
    pub fn reset(&mut self) {
        if self.state != UpdateState::Idle && !self.state.can_transition_to(UpdateState::Idle) {
            tracing::warn!("[{}] forcing {} -> idle", self.app, self.state);
        }
        self.state = UpdateState::Idle;
    }
}
