//! In-memory read caches

pub mod devices;
