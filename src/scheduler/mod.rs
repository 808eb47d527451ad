pub mod carryover;
pub mod fixed;
pub mod orchestrator;
pub mod pool;
pub mod programs;
pub mod repetition;
pub mod selection;
pub mod sequence;
pub mod station;
