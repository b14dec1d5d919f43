use async_trait::async_trait;
use thiserror::Error;

use cadence_core::domain::job::{Job, JobId, JobStatus};
use cadence_core::domain::policy::{ActionCeiling, PolicyEvent, TierOverride};
use cadence_core::domain::sequence::{Sequence, SequenceKey};
use cadence_core::domain::skill::{ActionType, UserId};

pub mod job;
pub mod memory;
pub mod policy;
pub mod sequence;

pub use job::SqlJobRepository;
pub use memory::{
    InMemoryCeilingRepository, InMemoryJobRepository, InMemoryOverrideRepository,
    InMemoryPolicyEventRepository, InMemorySequenceRepository,
};
pub use policy::{SqlCeilingRepository, SqlOverrideRepository, SqlPolicyEventRepository};
pub use sequence::SqlSequenceRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait SequenceRepository: Send + Sync {
    async fn find_by_key(&self, key: &SequenceKey) -> Result<Option<Sequence>, RepositoryError>;
    async fn save(&self, sequence: Sequence) -> Result<(), RepositoryError>;
    async fn list_keys(&self) -> Result<Vec<SequenceKey>, RepositoryError>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>, RepositoryError>;
    async fn save(&self, job: Job) -> Result<(), RepositoryError>;
    /// Sets `cancel_requested` on a live job in one store mutation and
    /// returns the row as stored afterwards. Terminal and
    /// already-flagged jobs come back untouched; `None` means the job
    /// does not exist. The flag never clears once set, and `save` must
    /// preserve it even when handed a snapshot read before the flag
    /// landed.
    async fn mark_cancel_requested(&self, id: &JobId) -> Result<Option<Job>, RepositoryError>;
    async fn list_for_user(
        &self,
        user_id: &UserId,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, RepositoryError>;
}

/// Rows are append-only; the trait exposes no update or delete.
#[async_trait]
pub trait PolicyEventRepository: Send + Sync {
    async fn append(&self, event: PolicyEvent) -> Result<(), RepositoryError>;
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<PolicyEvent>, RepositoryError>;
    async fn list_for_action(
        &self,
        user_id: &UserId,
        action_type: ActionType,
    ) -> Result<Vec<PolicyEvent>, RepositoryError>;
}

#[async_trait]
pub trait CeilingRepository: Send + Sync {
    async fn get(&self, action_type: ActionType) -> Result<Option<ActionCeiling>, RepositoryError>;
    async fn set(&self, ceiling: ActionCeiling) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<ActionCeiling>, RepositoryError>;
}

#[async_trait]
pub trait OverrideRepository: Send + Sync {
    async fn get(
        &self,
        user_id: &UserId,
        action_type: ActionType,
    ) -> Result<Option<TierOverride>, RepositoryError>;
    async fn set(&self, tier_override: TierOverride) -> Result<(), RepositoryError>;
    async fn clear(
        &self,
        user_id: &UserId,
        action_type: ActionType,
    ) -> Result<(), RepositoryError>;
    async fn list_for_user(&self, user_id: &UserId)
        -> Result<Vec<TierOverride>, RepositoryError>;
}
