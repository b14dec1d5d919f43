pub mod context;
pub mod plan;

pub use context::{ExecutionContext, UnresolvedInputError};
pub use plan::{ExecutionGroup, ExecutionPlan, SequenceValidationError};
