//! Agent runtime - sequence execution and autonomy enforcement
//!
//! This crate is the execution side of the cadence system - the runtime that:
//! - Dispatches skill invocations for sequence runs
//! - Gates every step through the autonomy policy engine
//! - Persists a job snapshot after every execution group
//! - Feeds live job progress to subscribers
//!
//! # Architecture
//!
//! A run follows a fixed loop per execution group:
//! 1. **Cancellation check** - a flagged job stops before the group dispatches
//! 2. **Input resolution** - bindings materialize from a context frozen at group start
//! 3. **Policy gate** (`policy`) - fresh tier resolution per step; only `auto` executes
//! 4. **Dispatch** (`skills`) - concurrent within a group, with at most one retry
//! 5. **Persist and publish** (`tracker`) - the snapshot lands in storage and on the bus
//!
//! # Key Types
//!
//! - `SequenceOrchestrator` - drives runs end to end (see `orchestrator` module)
//! - `PolicyService` - tier resolution plus the append-only trust ledger
//! - `SkillRuntime` - pluggable trait for skill execution backends
//! - `JobTracker` - push-plus-poll progress feed with exactly-once terminal notification
//!
//! # Safety Principle
//!
//! Skills never consult policy themselves. The orchestrator resolves the
//! effective tier immediately before each dispatch, so a ceiling lowered
//! mid-run applies to every step not yet dispatched.

pub mod audit;
pub mod orchestrator;
pub mod policy;
pub mod skills;
pub mod tracker;
