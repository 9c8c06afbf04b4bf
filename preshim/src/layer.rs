use crate::error::{RegistrationError, ResolutionError};
use crate::policy::{FromSynthetic, Override, Policy, PolicyKind, SideEffect};
use crate::record::{Arg, CallRecord};
use crate::registry::InterceptedSymbolRegistry;
use crate::resolver::SymbolResolver;
use crate::sink::CallSink;
use crate::symbol::FunctionHandle;

/// The interposition layer: a frozen registry plus the resolver and sink
/// its calls go through.
pub struct Interposer {
    registry: InterceptedSymbolRegistry,
    resolver: Box<dyn SymbolResolver>,
    sink: Box<dyn CallSink>,
}

impl Interposer {
    pub fn new(
        registry: InterceptedSymbolRegistry,
        resolver: impl SymbolResolver + 'static,
        sink: impl CallSink + 'static,
    ) -> Self {
        Self {
            registry,
            resolver: Box::new(resolver),
            sink: Box::new(sink),
        }
    }

    /// Builds a layer from a build-time override list.
    pub fn from_overrides(
        overrides: &[Override],
        resolver: impl SymbolResolver + 'static,
        sink: impl CallSink + 'static,
    ) -> Result<Self, RegistrationError> {
        let registry = InterceptedSymbolRegistry::from_overrides(overrides)?;
        Ok(Self::new(registry, resolver, sink))
    }

    pub fn registry(&self) -> &InterceptedSymbolRegistry {
        &self.registry
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Returns the real definition of a registered symbol, resolving it on
    /// first use and returning the cached handle afterwards.
    pub fn resolve(&self, name: &str) -> Result<FunctionHandle, ResolutionError> {
        let registration = self
            .registry
            .get(name)
            .ok_or_else(|| ResolutionError::NotRegistered {
                symbol: name.into(),
            })?;

        registration.symbol().resolve(self.resolver.as_ref())
    }

    /// Handles one intercepted call of `name`.
    ///
    /// Under `Replace` the call is logged and the configured result returned;
    /// `forward` plays no part in the result and this never fails. Under
    /// `Forward` the real definition is resolved, the side effect runs, and
    /// `forward` is called with the real handle. Its return value, error
    /// signalling included, is handed back untouched.
    ///
    /// `describe` builds the argument list and only runs when a call line is
    /// emitted. Silent calls and failed resolutions never read argument
    /// memory.
    pub fn invoke<'a, T, A, F>(
        &self,
        name: &str,
        describe: A,
        forward: F,
    ) -> Result<T, ResolutionError>
    where
        T: FromSynthetic,
        A: FnOnce() -> Vec<Arg<'a>>,
        F: FnOnce(FunctionHandle) -> T,
    {
        let registration = self
            .registry
            .get(name)
            .ok_or_else(|| ResolutionError::NotRegistered {
                symbol: name.into(),
            })?;

        match registration.policy() {
            Policy::Replace(value) => {
                self.observe(name, describe, PolicyKind::Replace);
                Ok(T::from_synthetic(value))
            }
            Policy::Forward(effect) => {
                let real = registration.symbol().resolve(self.resolver.as_ref())?;
                if effect == SideEffect::Log {
                    self.observe(name, describe, PolicyKind::Forward);
                }
                Ok(forward(real))
            }
        }
    }

    fn observe<'a>(
        &self,
        name: &str,
        describe: impl FnOnce() -> Vec<Arg<'a>>,
        policy: PolicyKind,
    ) {
        let args = describe();
        self.sink.emit(&CallRecord::new(name, &args, policy));
    }
}

impl std::fmt::Debug for Interposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interposer")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
