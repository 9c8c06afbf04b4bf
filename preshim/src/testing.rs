//! Test doubles for the resolver seam.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::ResolutionError;
use crate::resolver::SymbolResolver;
use crate::symbol::{FunctionHandle, SymbolName};

/// A resolver backed by a name → address table, counting every lookup.
#[derive(Debug, Default)]
pub struct MockResolver {
    table: Mutex<HashMap<String, FunctionHandle>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `name` to a fake, non-null address.
    ///
    /// Only useful for tests that never call through the handle.
    pub fn with(self, name: &str, address: usize) -> Self {
        self.provide(name, address);
        self
    }

    /// Maps `name` to a real function, e.g. `echo as *const c_void`.
    pub fn with_function(self, name: &str, function: *const c_void) -> Self {
        if let Some(handle) = FunctionHandle::new(function) {
            lock(&self.table).insert(name.into(), handle);
        }
        self
    }

    /// Sleeps inside every lookup, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes `name` resolvable from now on, like a library loaded late.
    pub fn provide(&self, name: &str, address: usize) {
        if let Some(handle) = FunctionHandle::new(address as *const c_void) {
            lock(&self.table).insert(name.into(), handle);
        }
    }

    /// How many times `name` was looked up.
    pub fn calls(&self, name: &str) -> usize {
        lock(&self.calls).get(name).copied().unwrap_or(0)
    }
}

impl SymbolResolver for MockResolver {
    fn resolve_next(&self, name: &SymbolName) -> Result<FunctionHandle, ResolutionError> {
        *lock(&self.calls).entry(name.to_string()).or_default() += 1;

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        lock(&self.table)
            .get(name.as_str())
            .copied()
            .ok_or_else(|| ResolutionError::NotFound {
                symbol: name.to_string(),
            })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
