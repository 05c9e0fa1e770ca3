//! Caller authentication at the HTTP boundary

pub mod bearer;
