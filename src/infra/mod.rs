// src/infra/mod.rs

pub mod config;
pub mod errors;
pub mod logger;
pub mod paths;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a panicking holder poisoned it.
///
/// Plugin code runs under some of these locks; a panic inside a plugin must
/// not wedge the host.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
