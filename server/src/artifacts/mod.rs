//! Content-addressed artifact storage

pub mod meta;
pub mod store;
