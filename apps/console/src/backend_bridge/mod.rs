//! Backend worker: owns the tokio runtime and the relay client.

pub mod commands;
pub mod runtime;
