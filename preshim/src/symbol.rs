use std::borrow::Cow;
use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use log::{debug, warn};

use crate::error::{RegistrationError, ResolutionError};
use crate::resolver::SymbolResolver;

/// A validated, NUL-terminated C symbol name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SymbolName(Cow<'static, CStr>);

impl SymbolName {
    /// Validates `name` as a C identifier (`[A-Za-z_][A-Za-z0-9_]*`).
    pub fn new(name: &str) -> Result<Self, RegistrationError> {
        let mut chars = name.chars();
        let first = chars.next().ok_or(RegistrationError::EmptyName)?;

        let valid = (first.is_ascii_alphabetic() || first == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(RegistrationError::InvalidName(name.into()));
        }

        CString::new(name)
            .map(|name| Self(Cow::Owned(name)))
            .map_err(|_| RegistrationError::InvalidName(name.into()))
    }

    /// Wraps a name that is known to be a valid identifier at compile time.
    ///
    /// Used by `#[interpose]`, which derives the name from a Rust identifier.
    pub const fn from_static(name: &'static CStr) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_c_str(&self) -> &CStr {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.to_str().unwrap_or("<non-utf8 symbol>")
    }
}

impl fmt::Debug for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The address of a real function, as handed out by the loader.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionHandle(NonNull<c_void>);

// A handle is a code address; it carries no thread affinity.
unsafe impl Send for FunctionHandle {}
unsafe impl Sync for FunctionHandle {}

impl FunctionHandle {
    /// Returns `None` for a null address.
    pub fn new(ptr: *const c_void) -> Option<Self> {
        NonNull::new(ptr.cast_mut()).map(Self)
    }

    pub fn as_ptr(self) -> *const c_void {
        self.0.as_ptr()
    }

    /// Reinterprets the handle as a function pointer of type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type whose signature and ABI match the
    /// function at this address.
    pub unsafe fn cast<F: Copy>(self) -> F {
        debug_assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<*const c_void>()
        );
        std::mem::transmute_copy(&self.0)
    }
}

impl fmt::Debug for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionHandle({:p})", self.0)
    }
}

/// Where an intercepted symbol is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Unresolved,
    Resolving,
    Resolved,
}

const UNRESOLVED: u8 = 0;
const RESOLVING: u8 = 1;
const RESOLVED: u8 = 2;

thread_local! {
    static THREAD_MARKER: u8 = const { 0 };
}

fn current_thread_marker() -> usize {
    THREAD_MARKER.with(|marker| marker as *const u8 as usize)
}

/// A shadowed symbol and the cached handle of its real definition.
///
/// The real definition is looked up on first use. Concurrent first callers
/// serialize on an internal gate so that exactly one lookup runs; the rest
/// wait for it and then read the cached handle. A successful lookup is final
/// for the lifetime of the process. A failed lookup leaves the symbol
/// unresolved so that a library loaded later can still provide it.
pub struct InterceptedSymbol {
    name: SymbolName,
    state: AtomicU8,
    resolver_thread: AtomicUsize,
    handle: OnceLock<FunctionHandle>,
    gate: Mutex<()>,
}

impl InterceptedSymbol {
    pub const fn new(name: SymbolName) -> Self {
        Self {
            name,
            state: AtomicU8::new(UNRESOLVED),
            resolver_thread: AtomicUsize::new(0),
            handle: OnceLock::new(),
            gate: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &SymbolName {
        &self.name
    }

    pub fn state(&self) -> ResolutionState {
        match self.state.load(Ordering::Acquire) {
            RESOLVED => ResolutionState::Resolved,
            RESOLVING => ResolutionState::Resolving,
            _ => ResolutionState::Unresolved,
        }
    }

    /// The cached real handle, if resolution already succeeded.
    pub fn handle(&self) -> Option<FunctionHandle> {
        self.handle.get().copied()
    }

    /// Returns the real handle, asking `resolver` for it on first use.
    pub fn resolve(
        &self,
        resolver: &dyn SymbolResolver,
    ) -> Result<FunctionHandle, ResolutionError> {
        if let Some(handle) = self.handle.get() {
            return Ok(*handle);
        }

        // The loader may call back into a hook while we hold the gate (e.g.
        // a hooked allocation routine). Waiting on ourselves would deadlock.
        let me = current_thread_marker();
        if self.state.load(Ordering::Acquire) == RESOLVING
            && self.resolver_thread.load(Ordering::Acquire) == me
        {
            return Err(ResolutionError::Reentrant {
                symbol: self.name.to_string(),
            });
        }

        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = self.handle.get() {
            return Ok(*handle);
        }

        self.resolver_thread.store(me, Ordering::Release);
        self.state.store(RESOLVING, Ordering::Release);

        let result = resolver.resolve_next(&self.name);
        match result {
            Ok(handle) => {
                // We hold the gate and saw the cell empty, so this cannot race.
                let _ = self.handle.set(handle);
                self.state.store(RESOLVED, Ordering::Release);
                debug!("resolved real `{}` at {:p}", self.name, handle.as_ptr());
            }
            Err(ref err) => {
                self.state.store(UNRESOLVED, Ordering::Release);
                warn!("{err}");
            }
        }
        self.resolver_thread.store(0, Ordering::Release);

        result
    }
}

impl fmt::Debug for InterceptedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptedSymbol")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("handle", &self.handle())
            .finish()
    }
}
