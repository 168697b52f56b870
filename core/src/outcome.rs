//! Result of a settled request.
//!
//! [`Outcome`] is an explicit two-variant type instead of error-based control
//! flow: both branches are handled exhaustively by the task call adapter and
//! both can be constructed directly in tests.

use serde_json::{Value, json};

/// Exactly one of these is produced per completed (non-cancelled) request.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<E> {
    /// The request succeeded with `data`
    Success {
        /// Response data
        data: Value,
    },
    /// The request failed with `error`
    Failure {
        /// The transport error
        error: E,
    },
}

impl<E> Outcome<E> {
    /// Returns `true` for [`Outcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns `true` for [`Outcome::Failure`].
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Payload of the terminal `done` notification: `{data}` or `{error}`.
    ///
    /// `render` converts the error into its JSON form.
    #[must_use]
    pub fn completion_payload(&self, render: impl FnOnce(&E) -> Value) -> Value {
        match self {
            Self::Success { data } => json!({ "data": data }),
            Self::Failure { error } => json!({ "error": render(error) }),
        }
    }
}

impl<E> From<Result<Value, E>> for Outcome<E> {
    fn from(result: Result<Value, E>) -> Self {
        match result {
            Ok(data) => Self::Success { data },
            Err(error) => Self::Failure { error },
        }
    }
}

/// How a task call ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Settlement<E> {
    /// The request settled and notifications were emitted
    Completed(Outcome<E>),
    /// The request was cancelled before settling; nothing was emitted
    Aborted,
}

impl<E> Settlement<E> {
    /// The outcome, if the call completed.
    #[must_use]
    pub const fn outcome(&self) -> Option<&Outcome<E>> {
        match self {
            Self::Completed(outcome) => Some(outcome),
            Self::Aborted => None,
        }
    }

    /// Returns `true` if the call was cancelled before settling.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_payload_success() {
        let outcome: Outcome<String> = Ok(json!([1, 2])).into();
        assert!(outcome.is_success());
        assert_eq!(
            outcome.completion_payload(|e| json!(e)),
            json!({"data": [1, 2]})
        );
    }

    #[test]
    fn test_completion_payload_failure() {
        let outcome: Outcome<String> = Err("boom".to_string()).into();
        assert!(outcome.is_failure());
        assert_eq!(
            outcome.completion_payload(|e| json!({ "message": e })),
            json!({"error": {"message": "boom"}})
        );
    }

    #[test]
    fn test_settlement_aborted_has_no_outcome() {
        let settlement: Settlement<String> = Settlement::Aborted;
        assert!(settlement.is_aborted());
        assert!(settlement.outcome().is_none());
    }
}
