use crate::domain::job::Job;

/// Result of offering a snapshot to a [`SnapshotMerge`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    Stale,
}

impl MergeOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Whether `candidate` carries strictly more information than `held`.
///
/// True when the candidate records more step results, or sits strictly
/// further along the job state machine, or shares the held status with a
/// newer revision. Anything else is stale, so feeding the same snapshot
/// twice is a no-op and delivery order between push and poll never
/// matters.
pub fn supersedes(candidate: &Job, held: &Job) -> bool {
    if candidate.step_results.len() > held.step_results.len() {
        return true;
    }
    if candidate.status.progress_rank() > held.status.progress_rank() {
        return true;
    }
    candidate.status == held.status && candidate.revision > held.revision
}

/// Holds the freshest snapshot seen so far for one job. Push and poll
/// deliveries both funnel through [`SnapshotMerge::apply`]; the caller
/// only forwards snapshots this merge accepts.
#[derive(Clone, Debug, Default)]
pub struct SnapshotMerge {
    held: Option<Job>,
}

impl SnapshotMerge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held(&self) -> Option<&Job> {
        self.held.as_ref()
    }

    pub fn apply(&mut self, candidate: Job) -> MergeOutcome {
        match &self.held {
            Some(held) if !supersedes(&candidate, held) => MergeOutcome::Stale,
            _ => {
                self.held = Some(candidate);
                MergeOutcome::Applied
            }
        }
    }
}
