//! Stage transitions and the add-application form, on top of an [`ApplicationStore`].

use chrono::{DateTime, Local};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::{ApplicationStore, StorageError};
use crate::models::{Application, NewApplication, Stage, UnknownStage};

/// Whether a stage action may move an application back down the funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionPolicy {
    /// Any action from any stage, regressions included.
    #[default]
    Unrestricted,
    /// Moving to an earlier stage is rejected; repeating the current stage is allowed.
    ForwardOnly,
}

impl fmt::Display for TransitionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransitionPolicy::Unrestricted => "unrestricted",
            TransitionPolicy::ForwardOnly => "forward-only",
        })
    }
}

#[derive(Debug, Error)]
#[error("unknown policy '{0}' (expected unrestricted or forward-only)")]
pub struct UnknownPolicy(String);

impl FromStr for TransitionPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unrestricted" => Ok(TransitionPolicy::Unrestricted),
            "forward-only" | "forward_only" | "strict" => Ok(TransitionPolicy::ForwardOnly),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

/// The three stage buttons offered for every application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageAction {
    MarkSent,
    StartProcess,
    ReceiveOffer,
}

impl StageAction {
    pub fn target(self) -> Stage {
        match self {
            StageAction::MarkSent => Stage::ApplicationSent,
            StageAction::StartProcess => Stage::InProcess,
            StageAction::ReceiveOffer => Stage::OfferReceived,
        }
    }

    /// Progress notes written alongside the stage change.
    pub fn notes(self, now: DateTime<Local>) -> String {
        match self {
            StageAction::MarkSent => format!("Application sent: {}", now.format("%Y-%m-%d %H:%M")),
            StageAction::StartProcess => "Recruitment process started".to_string(),
            StageAction::ReceiveOffer => "Offer received".to_string(),
        }
    }
}

impl FromStr for StageAction {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<Stage>()? {
            Stage::ApplicationSent => Ok(StageAction::MarkSent),
            Stage::InProcess => Ok(StageAction::StartProcess),
            Stage::OfferReceived => Ok(StageAction::ReceiveOffer),
            Stage::Wishlist => Err(UnknownStage(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Validation(&'static str),

    #[error("application #{0} not found")]
    NotFound(i64),

    #[error("application #{id} is already at '{}'; forward-only policy does not allow moving back to '{}'", .current.label(), .target.label())]
    Regression { id: i64, current: Stage, target: Stage },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of a list pull. A failed read yields no rows and carries the error
/// so the caller can report it and keep going.
#[derive(Debug)]
pub struct Listing {
    pub applications: Vec<Application>,
    pub error: Option<StorageError>,
}

pub struct Tracker<S> {
    store: S,
    policy: TransitionPolicy,
}

impl<S: ApplicationStore> Tracker<S> {
    pub fn new(store: S, policy: TransitionPolicy) -> Self {
        Self { store, policy }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn listing(&self) -> Listing {
        match self.store.list_all() {
            Ok(applications) => Listing {
                applications,
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "could not read applications");
                Listing {
                    applications: Vec::new(),
                    error: Some(e),
                }
            }
        }
    }

    pub fn find(&self, id: i64) -> Result<Option<Application>, LifecycleError> {
        Ok(self.store.get(id)?)
    }

    /// Handles the add-application form. Title and URL are required; the
    /// store is not touched when either is blank.
    pub fn submit(
        &self,
        title: &str,
        company_url: &str,
        company_name: &str,
    ) -> Result<i64, LifecycleError> {
        let new = NewApplication::new(title, company_url, company_name);
        if new.title.is_empty() {
            return Err(LifecycleError::Validation("title is required"));
        }
        if new.company_url.is_empty() {
            return Err(LifecycleError::Validation("company URL is required"));
        }
        Ok(self.store.create(&new)?)
    }

    pub fn apply(&self, id: i64, action: StageAction) -> Result<Stage, LifecycleError> {
        self.apply_at(id, action, Local::now())
    }

    pub fn apply_at(
        &self,
        id: i64,
        action: StageAction,
        now: DateTime<Local>,
    ) -> Result<Stage, LifecycleError> {
        let stage = action.target();
        self.advance(id, stage, &action.notes(now))?;
        Ok(stage)
    }

    /// Moves `id` to `stage`, replacing its notes.
    pub fn advance(&self, id: i64, stage: Stage, notes: &str) -> Result<(), LifecycleError> {
        if self.policy == TransitionPolicy::ForwardOnly {
            let current = self
                .store
                .get(id)?
                .ok_or(LifecycleError::NotFound(id))?
                .stage;
            if stage.rank() < current.rank() {
                return Err(LifecycleError::Regression {
                    id,
                    current,
                    target: stage,
                });
            }
        }

        let changed = self.store.advance(id, stage, notes)?;
        if changed == 0 {
            return Err(LifecycleError::NotFound(id));
        }
        debug!(id, %stage, policy = %self.policy, "advanced");
        Ok(())
    }
}
