use thiserror::Error;

use crate::autonomy::PolicyViolation;
use crate::domain::job::InvalidJobTransition;
use crate::domain::sequence::SequenceKey;
use crate::sequences::SequenceValidationError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("sequence not found: {0}")]
    SequenceNotFound(SequenceKey),
    #[error(transparent)]
    SequenceValidation(#[from] SequenceValidationError),
    #[error(transparent)]
    Policy(#[from] PolicyViolation),
    #[error(transparent)]
    JobTransition(#[from] InvalidJobTransition),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("skill runtime failure: {0}")]
    SkillRuntime(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    /// Validation problems are the caller's to fix; everything else is
    /// an operational fault worth retrying or escalating.
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, Self::Domain(_))
    }
}

impl From<SequenceValidationError> for ApplicationError {
    fn from(value: SequenceValidationError) -> Self {
        Self::Domain(DomainError::SequenceValidation(value))
    }
}

impl From<PolicyViolation> for ApplicationError {
    fn from(value: PolicyViolation) -> Self {
        Self::Domain(DomainError::Policy(value))
    }
}

impl From<InvalidJobTransition> for ApplicationError {
    fn from(value: InvalidJobTransition) -> Self {
        Self::Domain(DomainError::JobTransition(value))
    }
}
