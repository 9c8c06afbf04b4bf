use std::collections::HashMap;

use log::debug;

use crate::error::RegistrationError;
use crate::policy::{Override, Policy, Synthetic};
use crate::symbol::{InterceptedSymbol, SymbolName};

/// A registered override: the shadowed symbol and its policy.
#[derive(Debug)]
pub struct Registration {
    symbol: InterceptedSymbol,
    policy: Policy<Synthetic>,
}

impl Registration {
    pub fn symbol(&self) -> &InterceptedSymbol {
        &self.symbol
    }

    pub fn policy(&self) -> Policy<Synthetic> {
        self.policy
    }
}

/// The symbols a layer shadows, keyed by name.
///
/// Built once at startup and frozen when handed to an
/// [`Interposer`](crate::Interposer); only the per-symbol resolution caches
/// change afterwards.
#[derive(Debug, Default)]
pub struct InterceptedSymbolRegistry {
    entries: HashMap<String, Registration>,
}

impl InterceptedSymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_overrides(overrides: &[Override]) -> Result<Self, RegistrationError> {
        let mut registry = Self::new();
        for over in overrides {
            registry.register_override(over.name().as_str(), over.policy())?;
        }
        Ok(registry)
    }

    /// Adds `name` to the set of shadowed symbols.
    ///
    /// The real definition is not looked up here: the library providing it
    /// may not be loaded yet.
    pub fn register_override(
        &mut self,
        name: &str,
        policy: Policy<Synthetic>,
    ) -> Result<(), RegistrationError> {
        let symbol = SymbolName::new(name)?;

        if cfg!(target_feature = "crt-static") {
            return Err(RegistrationError::StaticLinking(name.into()));
        }
        if self.entries.contains_key(name) {
            return Err(RegistrationError::Duplicate(name.into()));
        }

        debug!("registered `{name}` with {policy:?}");
        self.entries.insert(
            name.into(),
            Registration {
                symbol: InterceptedSymbol::new(symbol),
                policy,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SideEffect;
    use crate::symbol::ResolutionState;

    #[test]
    fn register_and_lookup() {
        let mut registry = InterceptedSymbolRegistry::new();
        registry
            .register_override("checkAccess", Policy::Replace(Synthetic::Bool(true)))
            .unwrap();
        registry
            .register_override("openFile", Policy::Forward(SideEffect::Log))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("openFile"));
        assert!(!registry.contains("closeFile"));

        let open = registry.get("openFile").unwrap();
        assert_eq!(open.policy(), Policy::Forward(SideEffect::Log));
        assert_eq!(open.symbol().name().as_str(), "openFile");
        // Registration never resolves.
        assert_eq!(open.symbol().state(), ResolutionState::Unresolved);

        let mut names: Vec<_> = registry.names().collect();
        names.sort_unstable();
        assert_eq!(names, ["checkAccess", "openFile"]);
    }

    #[test]
    fn registration_errors() {
        let mut registry = InterceptedSymbolRegistry::new();
        let policy = Policy::Forward(SideEffect::Silent);

        assert_eq!(
            registry.register_override("", policy),
            Err(RegistrationError::EmptyName)
        );
        assert_eq!(
            registry.register_override("not-a-symbol", policy),
            Err(RegistrationError::InvalidName("not-a-symbol".into()))
        );

        registry.register_override("openFile", policy).unwrap();
        assert_eq!(
            registry.register_override("openFile", Policy::Replace(Synthetic::Null)),
            Err(RegistrationError::Duplicate("openFile".into()))
        );
        // The original registration survives.
        assert_eq!(registry.get("openFile").unwrap().policy(), policy);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn from_overrides_stops_at_first_error() {
        let overrides = [
            Override::new(
                SymbolName::from_static(c"unlink"),
                Policy::Forward(SideEffect::Log),
            ),
            Override::new(
                SymbolName::from_static(c"unlink"),
                Policy::Replace(Synthetic::Int(0)),
            ),
        ];

        assert_eq!(
            InterceptedSymbolRegistry::from_overrides(&overrides).unwrap_err(),
            RegistrationError::Duplicate("unlink".into())
        );
        assert_eq!(
            InterceptedSymbolRegistry::from_overrides(&overrides[..1])
                .unwrap()
                .len(),
            1
        );
    }
}
