//! Background workers

pub mod presence;
pub mod upload_gc;
pub mod watchdog;
