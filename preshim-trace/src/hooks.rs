use std::ffi::{c_char, c_int};

use libc::FILE;
use preshim::interpose;

#[interpose(forward, on_missing = std::ptr::null_mut())]
fn fopen(path: *const c_char, mode: *const c_char) -> *mut FILE;

// glibc routes `fopen` to this when built with `_FILE_OFFSET_BITS=64`.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[interpose(forward, on_missing = std::ptr::null_mut())]
fn fopen64(path: *const c_char, mode: *const c_char) -> *mut FILE;

#[interpose(forward, on_missing = -1)]
fn unlink(path: *const c_char) -> c_int;

#[interpose(forward, on_missing = -1)]
fn rename(old: *const c_char, new: *const c_char) -> c_int;

/// Makes every descriptor look like a terminal, so tools keep colour and
/// progress output on when piped.
#[interpose(replace = 1)]
fn isatty(fd: c_int) -> c_int;

#[cfg(test)]
mod tests {
    use super::*;

    fn errno() -> Option<i32> {
        std::io::Error::last_os_error().raw_os_error()
    }

    // No layer is installed in the test binary, so every hook here is
    // transparent: it forwards to libc without observing anything.

    #[test]
    fn fopen_is_transparent_without_a_layer() {
        let file = unsafe { fopen(c"/dev/null".as_ptr(), c"r".as_ptr()) };
        assert!(!file.is_null());
        assert_eq!(unsafe { libc::fclose(file) }, 0);

        let file = unsafe { fopen(c"/nonexistent/preshim".as_ptr(), c"r".as_ptr()) };
        assert!(file.is_null());
        assert_eq!(errno(), Some(libc::ENOENT));
    }

    #[test]
    fn isatty_is_real_without_a_layer() {
        assert_eq!(unsafe { isatty(-1) }, 0);
        assert_eq!(errno(), Some(libc::EBADF));
    }

    #[test]
    fn unlink_and_rename_are_transparent_without_a_layer() {
        let dir = std::env::temp_dir();
        let from = dir.join(format!("preshim-trace-{}-from", std::process::id()));
        let to = dir.join(format!("preshim-trace-{}-to", std::process::id()));
        std::fs::write(&from, b"x").unwrap();

        let c_from = std::ffi::CString::new(from.to_str().unwrap()).unwrap();
        let c_to = std::ffi::CString::new(to.to_str().unwrap()).unwrap();

        assert_eq!(unsafe { rename(c_from.as_ptr(), c_to.as_ptr()) }, 0);
        assert!(!from.exists() && to.exists());

        assert_eq!(unsafe { unlink(c_to.as_ptr()) }, 0);
        assert!(!to.exists());

        assert_eq!(unsafe { unlink(c_to.as_ptr()) }, -1);
        assert_eq!(errno(), Some(libc::ENOENT));
    }
}
