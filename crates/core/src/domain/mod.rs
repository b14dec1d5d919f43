pub mod job;
pub mod policy;
pub mod sequence;
pub mod skill;
