//! Actions-service error taxonomy.

use serde::Deserialize;
use thiserror::Error;

/// Exception name the service reports when a runner being removed has
/// already been assigned a job.
pub const JOB_STILL_RUNNING_EXCEPTION: &str = "JobStillRunningException";

/// Errors returned by the Actions service.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActionsError {
    /// The service answered with a non-success status.
    #[error("actions service returned {status} ({}): {message}", .exception.as_deref().unwrap_or("no exception"))]
    Api {
        status: u16,
        exception: Option<String>,
        message: String,
    },

    /// The request never produced a response.
    #[error("actions service request failed: {0}")]
    Transport(String),
}

/// Error body shape used by the service.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(rename = "typeName", default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ActionsError {
    /// Build an API error from a status code and raw response body.
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => ActionsError::Api {
                status,
                exception: parsed.type_name.filter(|n| !n.is_empty()),
                message: parsed.message.unwrap_or_default(),
            },
            Err(_) => ActionsError::Api {
                status,
                exception: None,
                message: body.trim().to_string(),
            },
        }
    }

    /// The runner has a job assigned and cannot be removed yet.
    pub fn is_job_still_running(&self) -> bool {
        match self {
            ActionsError::Api {
                status: 400,
                exception: Some(name),
                ..
            } => name == JOB_STILL_RUNNING_EXCEPTION,
            _ => false,
        }
    }
}
