use crate::symbol::SymbolName;

/// What a shadowed symbol does when it is called.
///
/// `Replace` is the unconditional-success case: the real implementation is
/// never consulted and every caller gets the configured result, whatever
/// it passed in. Anything that relies on the real semantics of a replaced
/// symbol is deliberately cut off from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy<R> {
    /// Observe the call and return this value without calling the real symbol.
    Replace(R),
    /// Observe the call according to the side effect, then call the real symbol.
    Forward(SideEffect),
}

impl<R> Policy<R> {
    pub fn kind(&self) -> PolicyKind {
        match self {
            Policy::Replace(_) => PolicyKind::Replace,
            Policy::Forward(_) => PolicyKind::Forward,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Replace,
    Forward,
}

/// The observation a forwarded call performs before delegating.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Emit one `[intercept]` line per call.
    #[default]
    Log,
    /// Forward without emitting anything.
    Silent,
}

/// A result value a `Replace` registration hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synthetic {
    Bool(bool),
    Int(i64),
    Null,
}

/// Total conversion from a [`Synthetic`] into a hook's return type.
///
/// Conversions never fail: a replaced call always produces a value.
pub trait FromSynthetic {
    fn from_synthetic(value: Synthetic) -> Self;
}

impl FromSynthetic for () {
    fn from_synthetic(_: Synthetic) -> Self {}
}

impl FromSynthetic for bool {
    fn from_synthetic(value: Synthetic) -> Self {
        match value {
            Synthetic::Bool(b) => b,
            Synthetic::Int(n) => n != 0,
            Synthetic::Null => false,
        }
    }
}

macro_rules! from_synthetic_int {
    ($($ty:ty),*) => {
        $(
            impl FromSynthetic for $ty {
                fn from_synthetic(value: Synthetic) -> Self {
                    match value {
                        Synthetic::Bool(b) => b as $ty,
                        Synthetic::Int(n) => n as $ty,
                        Synthetic::Null => 0,
                    }
                }
            }
        )*
    };
}

from_synthetic_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl<T> FromSynthetic for *const T {
    fn from_synthetic(value: Synthetic) -> Self {
        <*mut T>::from_synthetic(value).cast_const()
    }
}

impl<T> FromSynthetic for *mut T {
    fn from_synthetic(value: Synthetic) -> Self {
        match value {
            Synthetic::Null => std::ptr::null_mut(),
            Synthetic::Bool(b) => usize::from(b) as *mut T,
            Synthetic::Int(n) => n as usize as *mut T,
        }
    }
}

impl<T: FromSynthetic> FromSynthetic for Option<T> {
    fn from_synthetic(value: Synthetic) -> Self {
        Some(T::from_synthetic(value))
    }
}

impl<T: FromSynthetic, E> FromSynthetic for Result<T, E> {
    fn from_synthetic(value: Synthetic) -> Self {
        Ok(T::from_synthetic(value))
    }
}

/// One entry of a build-time override list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    name: SymbolName,
    policy: Policy<Synthetic>,
}

impl Override {
    pub const fn new(name: SymbolName, policy: Policy<Synthetic>) -> Self {
        Self { name, policy }
    }

    pub fn name(&self) -> &SymbolName {
        &self.name
    }

    pub fn policy(&self) -> Policy<Synthetic> {
        self.policy
    }
}
