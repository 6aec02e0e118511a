// Error types for request management
//
// Every fallible operation returns JdiResult; lookups that are allowed to
// come up empty return Option instead.

use crate::types::RequestId;
use thiserror::Error;

pub type JdiResult<T> = Result<T, JdiError>;

#[derive(Debug, Error)]
pub enum JdiError {
    #[error("Native request submission failed: {0}")]
    NativeSubmission(#[source] VmError),

    #[error("Virtual machine error: {0}")]
    Vm(#[from] VmError),

    #[error("Duplicate request id: {0}")]
    DuplicateRequest(RequestId),

    #[error("No such element: {0}")]
    NotFound(String),

    #[error("Pending request {request_id} failed on replay: {source}")]
    PendingReplay {
        request_id: RequestId,
        #[source]
        source: Box<JdiError>,
    },

    #[error("No virtual machine attached")]
    VmNotAttached,

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Errors reported by the virtual machine itself
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("virtual machine disconnected")]
    Disconnected,
}

impl JdiError {
    /// True for failures that leave the request absent and can be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            JdiError::NativeSubmission(_) | JdiError::Vm(_) | JdiError::VmNotAttached => true,
            JdiError::PendingReplay { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
