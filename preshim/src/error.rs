use thiserror::Error;

/// Errors raised while building the set of overrides.
///
/// These are startup errors: a layer that fails to register refuses to
/// activate, and every hook falls through to the real symbol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("symbol name is empty")]
    EmptyName,
    #[error("`{0}` is not a valid C symbol name")]
    InvalidName(String),
    #[error("`{0}` is already registered")]
    Duplicate(String),
    #[error("cannot shadow `{0}`: statically linked artifacts do not support symbol interposition")]
    StaticLinking(String),
    #[error("an interposition layer is already installed")]
    AlreadyInstalled,
}

/// Errors raised while locating the real implementation of a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("no further definition of `{symbol}` in the symbol search order")]
    NotFound { symbol: String },
    #[error("`{symbol}` has no registered override")]
    NotRegistered { symbol: String },
    #[error("`{symbol}` was called again while its real definition was being resolved")]
    Reentrant { symbol: String },
}

impl ResolutionError {
    pub fn symbol(&self) -> &str {
        match self {
            Self::NotFound { symbol }
            | Self::NotRegistered { symbol }
            | Self::Reentrant { symbol } => symbol,
        }
    }
}
