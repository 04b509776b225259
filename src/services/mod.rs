pub mod coordinator;
pub mod delivery;
pub mod queue;
pub mod schedule;
