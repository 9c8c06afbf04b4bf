use std::sync::{Arc, Mutex, PoisonError};

use crate::record::CallRecord;

/// Receives one record per observed call.
pub trait CallSink: Send + Sync {
    fn emit(&self, record: &CallRecord<'_>);
}

impl<S: CallSink + ?Sized> CallSink for Box<S> {
    fn emit(&self, record: &CallRecord<'_>) {
        (**self).emit(record)
    }
}

impl<S: CallSink + ?Sized> CallSink for Arc<S> {
    fn emit(&self, record: &CallRecord<'_>) {
        (**self).emit(record)
    }
}

/// Writes call lines straight to file descriptor 2.
///
/// This bypasses `std::io::stderr()` and its lock: the hook may be running
/// inside a libc call that the standard library itself is in the middle of.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl CallSink for StderrSink {
    fn emit(&self, record: &CallRecord<'_>) {
        let mut line = record.to_string();
        line.push('\n');
        write_stderr(line.as_bytes());
    }
}

/// Drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl CallSink for NullSink {
    fn emit(&self, _: &CallRecord<'_>) {}
}

/// Keeps rendered call lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Lines emitted for `symbol` only.
    pub fn lines_for(&self, symbol: &str) -> Vec<String> {
        let prefix = format!("[intercept] {symbol} called with ");
        self.lines()
            .into_iter()
            .filter(|line| line.starts_with(&prefix))
            .collect()
    }
}

impl CallSink for MemorySink {
    fn emit(&self, record: &CallRecord<'_>) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.to_string());
    }
}

/// Writes `bytes` to fd 2, retrying on short writes and `EINTR`.
pub(crate) fn write_stderr(mut bytes: &[u8]) {
    while !bytes.is_empty() {
        let written = unsafe {
            libc::write(
                libc::STDERR_FILENO,
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
            )
        };

        if written < 0 {
            if std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return;
        }
        if written == 0 {
            return;
        }
        bytes = &bytes[written as usize..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyKind;
    use crate::record::Arg;

    #[test]
    fn memory_sink_captures_lines() {
        let sink = Arc::new(MemorySink::new());
        let shared: Box<dyn CallSink> = Box::new(Arc::clone(&sink));

        let args = [Arg::int("fd", 3)];
        shared.emit(&CallRecord::new("close", &args, PolicyKind::Forward));
        shared.emit(&CallRecord::new("sync", &[], PolicyKind::Forward));

        assert_eq!(
            sink.lines(),
            vec![
                "[intercept] close called with fd=3".to_string(),
                "[intercept] sync called with ()".to_string(),
            ]
        );
        assert_eq!(sink.lines_for("sync").len(), 1);
        assert!(sink.lines_for("syncfs").is_empty());
    }
}
