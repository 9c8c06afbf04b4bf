use crate::error::ResolutionError;
use crate::symbol::{FunctionHandle, SymbolName};

/// Looks up the real definition of a shadowed symbol.
pub trait SymbolResolver: Send + Sync {
    /// Returns the next definition of `name` after the calling object in
    /// the loader's search order.
    ///
    /// The *next* definition, not the first: the first one is the hook
    /// itself, and forwarding to it would recurse forever.
    fn resolve_next(&self, name: &SymbolName) -> Result<FunctionHandle, ResolutionError>;
}

impl<R: SymbolResolver + ?Sized> SymbolResolver for Box<R> {
    fn resolve_next(&self, name: &SymbolName) -> Result<FunctionHandle, ResolutionError> {
        (**self).resolve_next(name)
    }
}

impl<R: SymbolResolver + ?Sized> SymbolResolver for std::sync::Arc<R> {
    fn resolve_next(&self, name: &SymbolName) -> Result<FunctionHandle, ResolutionError> {
        (**self).resolve_next(name)
    }
}

/// Resolves through the dynamic loader with `dlsym(RTLD_NEXT, ...)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DlsymResolver;

impl SymbolResolver for DlsymResolver {
    fn resolve_next(&self, name: &SymbolName) -> Result<FunctionHandle, ResolutionError> {
        let ptr = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_c_str().as_ptr()) };

        FunctionHandle::new(ptr).ok_or_else(|| ResolutionError::NotFound {
            symbol: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlsym_finds_libc_definitions() {
        let name = SymbolName::new("getpid").unwrap();
        let handle = DlsymResolver.resolve_next(&name).unwrap();

        let real: unsafe extern "C" fn() -> libc::pid_t = unsafe { handle.cast() };
        assert_eq!(unsafe { real() }, std::process::id() as libc::pid_t);
    }

    #[test]
    fn dlsym_reports_missing_symbols() {
        let name = SymbolName::new("preshim_definitely_not_a_symbol").unwrap();
        assert_eq!(
            DlsymResolver.resolve_next(&name),
            Err(ResolutionError::NotFound {
                symbol: "preshim_definitely_not_a_symbol".into()
            })
        );
    }
}
