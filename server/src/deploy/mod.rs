//! Deployment orchestration

pub mod job;
pub mod notify;
pub mod orchestrator;
