//! Event fan-out to connected observers

pub mod hub;
