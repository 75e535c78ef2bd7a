pub mod audit;
pub mod callback;
pub mod coordinator;
pub mod generation;
pub mod policy;
pub mod render;
pub mod storage;
