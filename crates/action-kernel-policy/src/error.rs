use action_kernel_registry::RegistryError;
use thiserror::Error;

use crate::hitl::ApprovalStatus;

/// Failures while evaluating policy
///
/// A denial is not an error; it is a [`crate::PolicyDecision::Deny`].
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The governance subject in the input could not be read
    #[error("Invalid governance subject: {0}")]
    InvalidSubject(String),

    /// Lineage, profiling, impact or HITL collaborator failed
    #[error("Collaborator {collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },

    #[error("Approval request not found: {0}")]
    ApprovalNotFound(String),

    /// The request already reached a decisive state
    #[error("Approval request {id} is already {status}")]
    ApprovalClosed { id: String, status: ApprovalStatus },

    #[error("Actor {actor} cannot approve their own request {id}")]
    SelfApproval { id: String, actor: String },
}

impl PolicyError {
    pub fn collaborator(collaborator: &'static str, message: impl Into<String>) -> Self {
        PolicyError::Collaborator {
            collaborator,
            message: message.into(),
        }
    }
}

pub type PolicyResult<T> = std::result::Result<T, PolicyError>;
