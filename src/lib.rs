// src/lib.rs — Library root for plughost

pub mod cli;
pub mod host;
pub mod infra;
pub mod runtime;
pub mod store;
