//! Shared helpers used by the library and the binaries.

pub mod bootstrap;
pub mod retry;
