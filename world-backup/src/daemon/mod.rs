//! Long-running host support.

pub mod shutdown;
