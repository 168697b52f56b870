//! Action-identifier table for a CRUD module.
//!
//! A module named `todos` owns trigger actions such as `todos/readAll` and the
//! follow-up notifications `todos/readAllSuccess`, `todos/readAllFail` and,
//! when enabled, `todos/readAllDone`. The table resolves these identifiers once,
//! at construction, from the closed [`Operation`] × [`Phase`] enumeration so
//! that task sets and reducers never build kind strings on the fly.

use crate::action::ActionCreator;
use crate::error::SagaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// The canonical CRUD operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    /// `GET /{name}`
    ReadAll,
    /// `GET /{name}/{id}`
    ReadOne,
    /// `POST /{name}`
    Create,
    /// `PUT /{name}/{id}`
    Update,
    /// `PATCH /{name}/{id}`
    Patch,
    /// `DELETE /{name}/{id}`
    Delete,
}

impl Operation {
    /// All operations, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::ReadAll,
        Self::ReadOne,
        Self::Create,
        Self::Update,
        Self::Patch,
        Self::Delete,
    ];

    /// Action name of the trigger, e.g. `readAll`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ReadAll => "readAll",
            Self::ReadOne => "readOne",
            Self::Create => "create",
            Self::Update => "update",
            Self::Patch => "patch",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| SagaError::invalid(format!("unknown operation: {s}")))
    }
}

/// Lifecycle phase of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// The action that starts the operation
    Trigger,
    /// Dispatched with the response data
    Success,
    /// Dispatched with the error
    Fail,
    /// Dispatched last with `{data}` or `{error}`
    Done,
}

impl Phase {
    const fn suffix(self) -> &'static str {
        match self {
            Self::Trigger => "",
            Self::Success => "Success",
            Self::Fail => "Fail",
            Self::Done => "Done",
        }
    }
}

/// Name of the action selecting the current item.
pub const SET_CURRENT: &str = "setCurrent";

/// Name of the action clearing the current item.
pub const RESET_CURRENT: &str = "resetCurrent";

/// Action identifiers of one module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionTable {
    module: String,
    done: bool,
    extra: BTreeSet<String>,
}

impl ActionTable {
    /// Build the table for module `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidArgument`] if `name` is empty.
    pub fn new(name: impl Into<String>) -> Result<Self, SagaError> {
        let module = name.into();
        if module.trim().is_empty() {
            return Err(SagaError::invalid("must provide a valid name"));
        }
        Ok(Self {
            module,
            done: false,
            extra: BTreeSet::new(),
        })
    }

    /// Enable `…Done` actions for every operation.
    #[must_use]
    pub const fn with_done(mut self, done: bool) -> Self {
        self.done = done;
        self
    }

    /// Register an additional action name (e.g. `associationDone`).
    #[must_use]
    pub fn with_action(mut self, name: impl Into<String>) -> Self {
        self.extra.insert(name.into());
        self
    }

    /// Module name.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Whether `…Done` actions exist.
    #[must_use]
    pub const fn has_done(&self) -> bool {
        self.done
    }

    /// Fully-qualified kind for an action name in this module.
    #[must_use]
    pub fn qualify(&self, name: &str) -> String {
        format!("{}/{name}", self.module)
    }

    /// Kind for `op` in `phase`, or `None` when the table has no such action.
    #[must_use]
    pub fn kind(&self, op: Operation, phase: Phase) -> Option<String> {
        if phase == Phase::Done && !self.done {
            return None;
        }
        Some(self.qualify(&format!("{}{}", op.name(), phase.suffix())))
    }

    /// Creator for `op` in `phase`.
    #[must_use]
    pub fn creator(&self, op: Operation, phase: Phase) -> Option<ActionCreator> {
        self.kind(op, phase).map(ActionCreator::of_kind)
    }

    /// Trigger kind of `op`; always present.
    #[must_use]
    pub fn trigger(&self, op: Operation) -> String {
        self.qualify(op.name())
    }

    /// Kind of a registered extra action or one of the current-item actions.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<String> {
        (self.extra.contains(name) || name == SET_CURRENT || name == RESET_CURRENT)
            .then(|| self.qualify(name))
    }

    /// Creator of a registered extra action or one of the current-item actions.
    #[must_use]
    pub fn action_creator(&self, name: &str) -> Option<ActionCreator> {
        self.action(name).map(ActionCreator::of_kind)
    }

    /// Resolve an owned kind back to its operation and phase.
    #[must_use]
    pub fn lookup(&self, kind: &str) -> Option<(Operation, Phase)> {
        let name = kind.strip_prefix(&self.module)?.strip_prefix('/')?;
        Operation::ALL.into_iter().find_map(|op| {
            let rest = name.strip_prefix(op.name())?;
            let phase = match rest {
                "" => Phase::Trigger,
                "Success" => Phase::Success,
                "Fail" => Phase::Fail,
                "Done" if self.done => Phase::Done,
                _ => return None,
            };
            Some((op, phase))
        })
    }
}
