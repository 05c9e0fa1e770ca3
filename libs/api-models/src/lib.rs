//! Wire models for the fleetd HTTP boundary.

pub mod models;

pub use models::*;
