pub mod audit;
pub mod generation;
pub mod job;
pub mod policy;
