use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use cadence_core::domain::job::{Job, JobId, JobStatus};
use cadence_core::domain::policy::{ActionCeiling, PolicyEvent, TierOverride};
use cadence_core::domain::sequence::{Sequence, SequenceKey};
use cadence_core::domain::skill::{ActionType, UserId};

use super::{
    CeilingRepository, JobRepository, OverrideRepository, PolicyEventRepository, RepositoryError,
    SequenceRepository,
};

#[derive(Default)]
pub struct InMemorySequenceRepository {
    sequences: RwLock<HashMap<String, Sequence>>,
}

#[async_trait::async_trait]
impl SequenceRepository for InMemorySequenceRepository {
    async fn find_by_key(&self, key: &SequenceKey) -> Result<Option<Sequence>, RepositoryError> {
        let sequences = self.sequences.read().await;
        Ok(sequences.get(&key.0).cloned())
    }

    async fn save(&self, sequence: Sequence) -> Result<(), RepositoryError> {
        let mut sequences = self.sequences.write().await;
        sequences.insert(sequence.key.0.clone(), sequence);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<SequenceKey>, RepositoryError> {
        let sequences = self.sequences.read().await;
        let mut keys: Vec<SequenceKey> =
            sequences.keys().map(|key| SequenceKey(key.clone())).collect();
        keys.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keys)
    }
}

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<String, Job>>,
}

#[async_trait::async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&id.0).cloned())
    }

    async fn save(&self, mut job: Job) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.write().await;
        // cancel_requested is monotonic: a snapshot read before a
        // concurrent cancel landed must not clear the stored flag.
        if let Some(existing) = jobs.get(&job.id.0) {
            job.cancel_requested = job.cancel_requested || existing.cancel_requested;
        }
        jobs.insert(job.id.0.clone(), job);
        Ok(())
    }

    async fn mark_cancel_requested(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id.0) else {
            return Ok(None);
        };
        if !job.status.is_terminal() && !job.cancel_requested {
            job.cancel_requested = true;
            job.revision += 1;
            job.updated_at = Utc::now();
        }
        Ok(Some(job.clone()))
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, RepositoryError> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|job| job.user_id == *user_id)
            .filter(|job| status.map_or(true, |wanted| job.status == wanted))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryPolicyEventRepository {
    events: RwLock<Vec<PolicyEvent>>,
}

#[async_trait::async_trait]
impl PolicyEventRepository for InMemoryPolicyEventRepository {
    async fn append(&self, event: PolicyEvent) -> Result<(), RepositoryError> {
        let mut events = self.events.write().await;
        events.push(event);
        Ok(())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<PolicyEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|event| event.user_id == *user_id).cloned().collect())
    }

    async fn list_for_action(
        &self,
        user_id: &UserId,
        action_type: ActionType,
    ) -> Result<Vec<PolicyEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|event| event.user_id == *user_id && event.action_type == action_type)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryCeilingRepository {
    ceilings: RwLock<HashMap<ActionType, ActionCeiling>>,
}

#[async_trait::async_trait]
impl CeilingRepository for InMemoryCeilingRepository {
    async fn get(&self, action_type: ActionType) -> Result<Option<ActionCeiling>, RepositoryError> {
        let ceilings = self.ceilings.read().await;
        Ok(ceilings.get(&action_type).cloned())
    }

    async fn set(&self, ceiling: ActionCeiling) -> Result<(), RepositoryError> {
        let mut ceilings = self.ceilings.write().await;
        ceilings.insert(ceiling.action_type, ceiling);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ActionCeiling>, RepositoryError> {
        let ceilings = self.ceilings.read().await;
        let mut all: Vec<ActionCeiling> = ceilings.values().cloned().collect();
        all.sort_by(|a, b| a.action_type.as_str().cmp(b.action_type.as_str()));
        Ok(all)
    }
}

#[derive(Default)]
pub struct InMemoryOverrideRepository {
    overrides: RwLock<HashMap<(String, ActionType), TierOverride>>,
}

#[async_trait::async_trait]
impl OverrideRepository for InMemoryOverrideRepository {
    async fn get(
        &self,
        user_id: &UserId,
        action_type: ActionType,
    ) -> Result<Option<TierOverride>, RepositoryError> {
        let overrides = self.overrides.read().await;
        Ok(overrides.get(&(user_id.0.clone(), action_type)).cloned())
    }

    async fn set(&self, tier_override: TierOverride) -> Result<(), RepositoryError> {
        let mut overrides = self.overrides.write().await;
        overrides.insert(
            (tier_override.user_id.0.clone(), tier_override.action_type),
            tier_override,
        );
        Ok(())
    }

    async fn clear(
        &self,
        user_id: &UserId,
        action_type: ActionType,
    ) -> Result<(), RepositoryError> {
        let mut overrides = self.overrides.write().await;
        overrides.remove(&(user_id.0.clone(), action_type));
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<TierOverride>, RepositoryError> {
        let overrides = self.overrides.read().await;
        let mut matching: Vec<TierOverride> = overrides
            .values()
            .filter(|tier_override| tier_override.user_id == *user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.action_type.as_str().cmp(b.action_type.as_str()));
        Ok(matching)
    }
}
