//! Chunked upload assembly

pub mod assembler;
pub mod session;
