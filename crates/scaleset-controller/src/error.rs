//! Controller error types.

use thiserror::Error;

use scaleset_actions::ActionsError;
use scaleset_state::StateError;

/// Errors surfaced by a reconcile pass.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("fleet store error: {0}")]
    State(#[from] StateError),

    #[error("failed to create runner for {runner_set}: {source}")]
    CreateRunner {
        runner_set: String,
        source: StateError,
    },

    #[error("failed to deregister runner {runner} (id {runner_id}): {source}")]
    Deregister {
        runner: String,
        runner_id: i64,
        source: ActionsError,
    },

    #[error("failed to delete runner {runner}: {source}")]
    DeleteRunner { runner: String, source: StateError },

    #[error("{} errors: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<ControllerError>),
}

pub type ControllerResult<T> = Result<T, ControllerError>;

impl ControllerError {
    /// Fold errors collected across a batch into one result.
    pub fn aggregate(mut errors: Vec<ControllerError>) -> ControllerResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ControllerError::Aggregate(errors)),
        }
    }

    /// Number of leaf errors.
    pub fn count(&self) -> usize {
        match self {
            ControllerError::Aggregate(errs) => errs.iter().map(ControllerError::count).sum(),
            _ => 1,
        }
    }
}

fn join_errors(errors: &[ControllerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_found(key: &str) -> ControllerError {
        ControllerError::State(StateError::NotFound(key.to_string()))
    }

    #[test]
    fn aggregate_of_nothing_is_ok() {
        assert!(ControllerError::aggregate(Vec::new()).is_ok());
    }

    #[test]
    fn aggregate_of_one_is_unwrapped() {
        let err = ControllerError::aggregate(vec![not_found("a")]).unwrap_err();
        assert!(matches!(err, ControllerError::State(_)));
        assert_eq!(err.count(), 1);
    }

    #[test]
    fn aggregate_lists_every_error() {
        let err = ControllerError::aggregate(vec![not_found("a"), not_found("b")]).unwrap_err();
        assert_eq!(err.count(), 2);
        let msg = err.to_string();
        assert!(msg.starts_with("2 errors"));
        assert!(msg.contains("not found: a"));
        assert!(msg.contains("not found: b"));
    }
}
