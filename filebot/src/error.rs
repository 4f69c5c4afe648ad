//! Workflow error taxonomy.

use crate::backends::BackendError;
use crate::traits::ChannelError;

/// Result type for workflow steps.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised while driving a workflow.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Malformed command usage or unsupported input. The message is shown to the user.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Size or count cap exceeded. The message is shown to the user.
    #[error("Resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),

    /// A non-restartable workflow is already running for the chat.
    #[error("Workflow busy: {0}")]
    Busy(String),

    /// Image or document processing failed.
    #[error("Backend failure: {0}")]
    BackendFailure(String),

    #[error("Cancelled")]
    Cancelled,

    /// Failed progress edits and similar cosmetic I/O.
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    #[error("Transport error: {0}")]
    Transport(#[from] ChannelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BackendError> for WorkflowError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Cancelled => Self::Cancelled,
            other => Self::BackendFailure(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for WorkflowError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::BackendFailure(format!("worker task failed: {err}"))
    }
}

impl WorkflowError {
    /// Message to show the user, if any.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::InvalidInput(msg) | Self::ResourceLimitExceeded(msg) | Self::Busy(msg) => {
                Some(msg.clone())
            }
            Self::BackendFailure(_) | Self::Io(_) => {
                Some("❌ Something went wrong while processing your file. Please try again.".into())
            }
            Self::Transport(ChannelError::DownloadFailed(_)) => {
                Some("❌ Could not download the file. Please try again.".into())
            }
            Self::Cancelled => Some("❌ Operation cancelled.".into()),
            Self::TransientIo(_) | Self::Transport(_) => None,
        }
    }

    /// Whether the error comes from the user rather than the system.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_) | Self::ResourceLimitExceeded(_) | Self::Busy(_)
        )
    }
}
