//! Macro internals for `preshim`.
//!
//! Don't use this crate directly. You want the `preshim` crate instead.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input,
    spanned::Spanned,
    Attribute, Block, Expr, FnArg, Ident, Lit, LitByteStr, LitStr, Pat, ReturnType, Signature,
    Token, Type, UnOp, Visibility,
};

/// Type names that are rendered as integers in call lines.
const INTEGER_TYPES: &[&str] = &[
    "bool", "i8", "i16", "i32", "i64", "isize", "u8", "u16", "u32", "u64", "usize", "c_char",
    "c_schar", "c_uchar", "c_short", "c_ushort", "c_int", "c_uint", "c_long", "c_ulong",
    "c_longlong", "c_ulonglong", "size_t", "ssize_t", "off_t", "off64_t", "mode_t", "pid_t",
    "uid_t", "gid_t", "dev_t", "ino_t",
];

// A hook declaration: a function signature with no body, e.g.
// `fn fopen(path: *const c_char, mode: *const c_char) -> *mut FILE;`
struct HookDecl {
    attrs: Vec<Attribute>,
    vis: Visibility,
    sig: Signature,
    body: Option<Block>,
}

impl Parse for HookDecl {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let attrs = input.call(Attribute::parse_outer)?;
        let vis = input.parse()?;
        let sig = input.parse()?;
        let body = if input.peek(Token![;]) {
            input.parse::<Token![;]>()?;
            None
        } else {
            Some(input.parse()?)
        };

        Ok(Self {
            attrs,
            vis,
            sig,
            body,
        })
    }
}

enum PolicyArg {
    Forward { silent: bool },
    Replace(Expr),
}

#[derive(Default)]
struct InterposeArgs {
    policy: Option<PolicyArg>,
    on_missing: Option<Expr>,
}

impl InterposeArgs {
    fn parse_meta(&mut self, meta: syn::meta::ParseNestedMeta) -> syn::Result<()> {
        if meta.path.is_ident("forward") {
            if self.policy.is_some() {
                return Err(meta.error("only one of `forward` and `replace` may be given"));
            }

            let mut silent = false;
            if meta.input.peek(syn::token::Paren) {
                meta.parse_nested_meta(|nested| {
                    if nested.path.is_ident("silent") {
                        silent = true;
                        Ok(())
                    } else if nested.path.is_ident("log") {
                        silent = false;
                        Ok(())
                    } else {
                        Err(nested.error("expected `log` or `silent`"))
                    }
                })?;
            }
            self.policy = Some(PolicyArg::Forward { silent });
            Ok(())
        } else if meta.path.is_ident("replace") {
            if self.policy.is_some() {
                return Err(meta.error("only one of `forward` and `replace` may be given"));
            }
            self.policy = Some(PolicyArg::Replace(meta.value()?.parse()?));
            Ok(())
        } else if meta.path.is_ident("on_missing") {
            self.on_missing = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error(
                "unsupported interpose option; expected `forward`, `replace = ...`, or `on_missing = ...`",
            ))
        }
    }
}

// A hook parameter, with `#[secret]` pulled out of its attributes.
struct Param {
    ident: Ident,
    ty: Type,
    secret: bool,
}

// Flattens `foo: u8, #[secret] bar: *const c_char` into identifiers, types
// and secrecy flags.
fn transform_params(sig: &Signature) -> syn::Result<Vec<Param>> {
    sig.inputs
        .iter()
        .map(|param| {
            let FnArg::Typed(pat_type) = param else {
                return Err(syn::Error::new(param.span(), "hooks cannot take `self`"));
            };
            let Pat::Ident(pat_ident) = &*pat_type.pat else {
                return Err(syn::Error::new(
                    pat_type.pat.span(),
                    "hook parameters must be plain identifiers",
                ));
            };

            let mut secret = false;
            for attr in &pat_type.attrs {
                if attr.path().is_ident("secret") {
                    attr.meta.require_path_only()?;
                    secret = true;
                } else {
                    return Err(syn::Error::new(
                        attr.span(),
                        "only `#[secret]` is supported on hook parameters",
                    ));
                }
            }

            Ok(Param {
                ident: pat_ident.ident.clone(),
                ty: (*pat_type.ty).clone(),
                secret,
            })
        })
        .collect()
}

fn type_is_named(ty: &Type, names: &[&str]) -> bool {
    match ty {
        Type::Path(path) if path.qself.is_none() => path
            .path
            .segments
            .last()
            .is_some_and(|segment| names.iter().any(|name| segment.ident == name)),
        Type::Paren(inner) => type_is_named(&inner.elem, names),
        Type::Group(inner) => type_is_named(&inner.elem, names),
        _ => false,
    }
}

// Builds the `preshim::Arg` describing one parameter at call time.
fn describe_param(param: &Param) -> TokenStream2 {
    let ident = &param.ident;
    let name = LitStr::new(&ident.to_string(), ident.span());

    let arg = match &param.ty {
        // Only `*const c_char` is an input string; a `*mut c_char` is usually
        // an output buffer with no terminator yet.
        Type::Ptr(ptr) if ptr.mutability.is_none() && type_is_named(&ptr.elem, &["c_char"]) => {
            quote! { unsafe { ::preshim::Arg::c_str(#name, #ident as *const ::core::ffi::c_char) } }
        }
        Type::Ptr(_) => quote! { ::preshim::Arg::ptr(#name, #ident as *const ()) },
        ty if type_is_named(ty, INTEGER_TYPES) => {
            quote! { ::preshim::Arg::int(#name, #ident as i64) }
        }
        _ => quote! { ::preshim::Arg::opaque(#name) },
    };

    if param.secret {
        quote! { #arg.secret() }
    } else {
        arg
    }
}

// Maps a `replace = ...` literal onto a `preshim::Synthetic`.
fn synthetic(expr: &Expr) -> syn::Result<TokenStream2> {
    match expr {
        Expr::Lit(lit) => match &lit.lit {
            Lit::Bool(b) => Ok(quote! { ::preshim::Synthetic::Bool(#b) }),
            Lit::Int(_) => Ok(quote! { ::preshim::Synthetic::Int((#expr) as i64) }),
            _ => Err(syn::Error::new(
                lit.span(),
                "replace value must be a boolean, an integer, or `null`",
            )),
        },
        Expr::Unary(unary)
            if matches!(unary.op, UnOp::Neg(_))
                && matches!(&*unary.expr, Expr::Lit(lit) if matches!(lit.lit, Lit::Int(_))) =>
        {
            Ok(quote! { ::preshim::Synthetic::Int((#expr) as i64) })
        }
        Expr::Path(path) if path.qself.is_none() && path.path.is_ident("null") => {
            Ok(quote! { ::preshim::Synthetic::Null })
        }
        Expr::Group(group) => synthetic(&group.expr),
        _ => Err(syn::Error::new(
            expr.span(),
            "replace value must be a boolean, an integer, or `null`",
        )),
    }
}

/// Use `preshim::interpose` instead.
#[proc_macro_attribute]
pub fn interpose(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = InterposeArgs::default();
    let parser = syn::meta::parser(|meta| args.parse_meta(meta));
    parse_macro_input!(attr with parser);

    let decl = parse_macro_input!(item as HookDecl);

    match expand(args, decl) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(args: InterposeArgs, decl: HookDecl) -> syn::Result<TokenStream2> {
    let HookDecl {
        attrs,
        vis,
        sig,
        body,
    } = decl;

    // Hooks are reached through the loader, not through Rust paths. Keeping
    // them private stops them from being mistaken for a safe Rust API.
    if !matches!(vis, Visibility::Inherited) {
        return Err(syn::Error::new(vis.span(), "interposed hooks must be private"));
    }
    if let Some(body) = body {
        return Err(syn::Error::new(
            body.span(),
            "interposed hooks are declared without a body; end the signature with `;`",
        ));
    }
    if let Some(variadic) = &sig.variadic {
        return Err(syn::Error::new(variadic.span(), "variadic hooks are not supported"));
    }
    if !sig.generics.params.is_empty() || sig.generics.where_clause.is_some() {
        return Err(syn::Error::new(sig.generics.span(), "hooks cannot be generic"));
    }
    if let Some(asyncness) = &sig.asyncness {
        return Err(syn::Error::new(asyncness.span(), "hooks cannot be async"));
    }

    let policy = match args.policy {
        Some(PolicyArg::Forward { silent: false }) => {
            quote! { ::preshim::Policy::Forward(::preshim::SideEffect::Log) }
        }
        Some(PolicyArg::Forward { silent: true }) => {
            quote! { ::preshim::Policy::Forward(::preshim::SideEffect::Silent) }
        }
        Some(PolicyArg::Replace(expr)) => {
            let value = synthetic(&expr)?;
            quote! { ::preshim::Policy::Replace(#value) }
        }
        None => {
            return Err(syn::Error::new(
                sig.ident.span(),
                "expected a policy: `#[interpose(forward)]` or `#[interpose(replace = ...)]`",
            ))
        }
    };

    let ident = &sig.ident;
    let output = &sig.output;
    let cfgs: Vec<_> = attrs.iter().filter(|attr| attr.path().is_ident("cfg")).collect();
    let params = transform_params(&sig)?;
    let idents: Vec<_> = params.iter().map(|p| &p.ident).collect();
    let types: Vec<_> = params.iter().map(|p| &p.ty).collect();
    let describe: Vec<_> = params.iter().map(describe_param).collect();

    // A string literal for the symbol being shadowed, e.g. `"fopen"`
    let real_c_name_lit = LitStr::new(&ident.to_string(), ident.span());

    // The same but a null-terminated bytes literal, e.g. `b"fopen\0"`
    let real_c_name_bytes_nulled = {
        let mut real_c_name_lit_bytes = ident.to_string().into_bytes();
        real_c_name_lit_bytes.push(0);
        LitByteStr::new(&real_c_name_lit_bytes, ident.span())
    };

    let on_error = match args.on_missing {
        Some(value) => quote! {
            ::core::result::Result::Err(_) => {
                ::preshim::__private::set_errno(::preshim::__private::libc::ENOSYS);
                #value
            }
        },
        None => quote! {
            ::core::result::Result::Err(__preshim_err) => ::preshim::__private::barf(&__preshim_err),
        },
    };

    // `FromSynthetic` needs a concrete return type, `()` included.
    let ret_ty = match output {
        ReturnType::Default => quote! { () },
        ReturnType::Type(_, ty) => quote! { #ty },
    };

    Ok(quote! {
        // The hook's entry in the override list and its private cache of the
        // real definition, e.g. `fopen::OVERRIDE` and `fopen::SYMBOL`.
        #(#cfgs)*
        #[doc(hidden)]
        #[allow(non_snake_case, dead_code)]
        pub(crate) mod #ident {
            pub const OVERRIDE: ::preshim::Override = ::preshim::Override::new(
                ::preshim::__private::symbol_name(#real_c_name_bytes_nulled),
                #policy,
            );

            pub static SYMBOL: ::preshim::InterceptedSymbol = ::preshim::InterceptedSymbol::new(
                ::preshim::__private::symbol_name(#real_c_name_bytes_nulled),
            );
        }

        // Test binaries are never interposed on.
        #[cfg_attr(not(test), export_name = #real_c_name_lit)]
        #[allow(non_snake_case, dead_code, unused_unsafe, clippy::unnecessary_cast)]
        #(#attrs)*
        unsafe extern "C" fn #ident(#(#idents: #types),*) #output {
            let __preshim_outcome: ::core::result::Result<#ret_ty, ::preshim::ResolutionError> =
                ::preshim::__private::dispatch(
                    &#ident::SYMBOL,
                    || ::std::vec![#(#describe),*],
                    |__preshim_real: ::preshim::FunctionHandle| {
                        let __preshim_real: unsafe extern "C" fn(#(#types),*) #output =
                            unsafe { __preshim_real.cast() };
                        unsafe { __preshim_real(#(#idents),*) }
                    },
                );

            match __preshim_outcome {
                ::core::result::Result::Ok(__preshim_ret) => __preshim_ret,
                #on_error
            }
        }
    })
}
