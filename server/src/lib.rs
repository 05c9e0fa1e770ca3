//! fleetd - fleet management backend core
//!
//! Device presence tracking, chunked APK upload assembly,
//! content-addressed artifact storage, deployment orchestration, and
//! event fan-out to dashboard observers.

pub mod app;
pub mod artifacts;
pub mod authn;
pub mod cache;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod logs;
pub mod registry;
pub mod retry;
pub mod server;
pub mod upload;
pub mod utils;
pub mod workers;
