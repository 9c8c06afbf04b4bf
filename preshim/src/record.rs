use std::borrow::Cow;
use std::ffi::{c_char, CStr};
use std::fmt::{self, Write as _};
use std::time::SystemTime;

use crate::policy::PolicyKind;

/// Parameter-name fragments that mark an argument as a credential.
const SENSITIVE_NAMES: &[&str] = &["pass", "pwd", "secret", "token", "authtok", "cred", "key"];

/// Visible strings longer than this are cut off in call lines.
const MAX_STRING_CHARS: usize = 64;

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue<'a> {
    Str(Cow<'a, str>),
    Int(i64),
    Ptr(usize),
    Null,
    Opaque,
}

/// One argument of an intercepted call, as the observer sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg<'a> {
    name: Option<&'a str>,
    value: ArgValue<'a>,
    secret: bool,
}

impl<'a> Arg<'a> {
    /// An unnamed string argument.
    pub fn str(value: impl Into<Cow<'a, str>>) -> Self {
        Self::unnamed(ArgValue::Str(value.into()))
    }

    pub fn unnamed(value: ArgValue<'a>) -> Self {
        Self {
            name: None,
            value,
            secret: false,
        }
    }

    pub fn named(name: &'a str, value: ArgValue<'a>) -> Self {
        Self {
            name: Some(name),
            value,
            secret: false,
        }
    }

    /// Reads a C string argument, lossily.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
    pub unsafe fn c_str(name: &'a str, ptr: *const c_char) -> Self {
        let value = if ptr.is_null() {
            ArgValue::Null
        } else {
            ArgValue::Str(CStr::from_ptr(ptr).to_string_lossy())
        };
        Self::named(name, value)
    }

    pub fn ptr(name: &'a str, ptr: *const ()) -> Self {
        let value = if ptr.is_null() {
            ArgValue::Null
        } else {
            ArgValue::Ptr(ptr as usize)
        };
        Self::named(name, value)
    }

    pub fn int(name: &'a str, value: i64) -> Self {
        Self::named(name, ArgValue::Int(value))
    }

    pub fn opaque(name: &'a str) -> Self {
        Self::named(name, ArgValue::Opaque)
    }

    /// Marks the argument as a credential; its value is never rendered.
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    pub fn name(&self) -> Option<&'a str> {
        self.name
    }

    pub fn value(&self) -> &ArgValue<'a> {
        &self.value
    }

    fn is_masked(&self, policy: PolicyKind) -> bool {
        if self.secret {
            return true;
        }

        if let Some(name) = self.name {
            let name = name.to_ascii_lowercase();
            if SENSITIVE_NAMES.iter().any(|needle| name.contains(needle)) {
                return true;
            }
        }

        // Replaced symbols tend to be the credential-checking ones; never
        // echo their string inputs.
        policy == PolicyKind::Replace && matches!(self.value, ArgValue::Str(_))
    }
}

/// An observed call. Built for the sink and dropped right after.
#[derive(Debug)]
pub struct CallRecord<'a> {
    symbol: &'a str,
    args: &'a [Arg<'a>],
    policy: PolicyKind,
    timestamp: SystemTime,
}

impl<'a> CallRecord<'a> {
    pub fn new(symbol: &'a str, args: &'a [Arg<'a>], policy: PolicyKind) -> Self {
        Self {
            symbol,
            args,
            policy,
            timestamp: SystemTime::now(),
        }
    }

    pub fn symbol(&self) -> &str {
        self.symbol
    }

    pub fn policy(&self) -> PolicyKind {
        self.policy
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// The masked argument list, e.g. `path="/etc/hosts", mode="r"`.
    pub fn summary(&self) -> String {
        if self.args.is_empty() {
            return "()".into();
        }

        let mut out = String::new();
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                out.push_str(", ");
            }
            if let Some(name) = arg.name {
                let _ = write!(out, "{name}=");
            }

            if arg.is_masked(self.policy) && arg.value != ArgValue::Null {
                out.push_str(REDACTED);
                continue;
            }

            match &arg.value {
                ArgValue::Str(s) => render_str(&mut out, s),
                ArgValue::Int(n) => {
                    let _ = write!(out, "{n}");
                }
                ArgValue::Ptr(p) => {
                    let _ = write!(out, "{p:#x}");
                }
                ArgValue::Null => out.push_str("NULL"),
                ArgValue::Opaque => out.push_str("<opaque>"),
            }
        }
        out
    }
}

impl fmt::Display for CallRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[intercept] {} called with {}", self.symbol, self.summary())
    }
}

fn render_str(out: &mut String, s: &str) {
    out.push('"');
    let mut chars = s.chars();
    for c in chars.by_ref().take(MAX_STRING_CHARS) {
        out.extend(c.escape_debug());
    }
    out.push('"');
    if chars.next().is_some() {
        out.push_str("...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_format() {
        let args = [
            Arg::named("path", ArgValue::Str("/etc/hosts".into())),
            Arg::int("flags", 2),
            Arg::ptr("stream", 0x1000 as *const ()),
            Arg::ptr("buf", std::ptr::null()),
            Arg::opaque("st"),
        ];
        let record = CallRecord::new("fopen", &args, PolicyKind::Forward);

        assert_eq!(
            record.to_string(),
            r#"[intercept] fopen called with path="/etc/hosts", flags=2, stream=0x1000, buf=NULL, st=<opaque>"#
        );
    }

    #[test]
    fn no_args() {
        let record = CallRecord::new("sync", &[], PolicyKind::Forward);
        assert_eq!(record.to_string(), "[intercept] sync called with ()");
    }

    #[test]
    fn explicit_secrets_are_masked() {
        let args = [
            Arg::named("user", ArgValue::Str("alice".into())),
            Arg::named("blob", ArgValue::Str("hunter2".into())).secret(),
        ];
        let summary = CallRecord::new("login", &args, PolicyKind::Forward).summary();

        assert_eq!(summary, r#"user="alice", blob=<redacted>"#);
    }

    #[test]
    fn sensitive_names_are_masked() {
        let args = [
            Arg::named("Password", ArgValue::Str("hunter2".into())),
            Arg::named("api_token", ArgValue::Str("abc".into())),
            Arg::int("keylen", 32),
            Arg::named("authtok", ArgValue::Null),
        ];
        let summary = CallRecord::new("verify", &args, PolicyKind::Forward).summary();

        assert_eq!(
            summary,
            "Password=<redacted>, api_token=<redacted>, keylen=<redacted>, authtok=NULL"
        );
    }

    #[test]
    fn replace_masks_every_string() {
        let args = [Arg::str("anyuser"), Arg::str("wrongpassword"), Arg::int("n", 3)];
        let summary = CallRecord::new("checkAccess", &args, PolicyKind::Replace).summary();

        assert_eq!(summary, "<redacted>, <redacted>, n=3");
        assert!(!summary.contains("wrongpassword"));
    }

    #[test]
    fn long_strings_are_truncated_and_escaped() {
        let long = "a".repeat(100);
        let args = [
            Arg::named("s", ArgValue::Str(long.into())),
            Arg::named("q", ArgValue::Str("tab\there \"x\"".into())),
        ];
        let summary = CallRecord::new("f", &args, PolicyKind::Forward).summary();

        let expected = format!(r#"s="{}"..., q="tab\there \"x\"""#, "a".repeat(64));
        assert_eq!(summary, expected);
    }

    #[test]
    fn c_strings_are_read_lossily() {
        let raw = b"/tmp/\xff\0";
        let arg = unsafe { Arg::c_str("path", raw.as_ptr().cast()) };
        assert_eq!(arg.value(), &ArgValue::Str("/tmp/\u{fffd}".into()));

        let arg = unsafe { Arg::c_str("path", std::ptr::null()) };
        assert_eq!(arg.value(), &ArgValue::Null);
    }

    #[test]
    fn records_are_timestamped() {
        let before = SystemTime::now();
        let record = CallRecord::new("f", &[], PolicyKind::Forward);
        assert!(record.timestamp() >= before);
        assert!(record.timestamp() <= SystemTime::now());
    }
}
