//! Append-only, line-oriented event log (C8).
//!
//! Three record kinds, one per line:
//! - `b <seq>` — a broadcast/send, emitted synchronously at send time.
//! - `d <sender_id> <seq>` — an upward delivery, emitted in FIFO order.
//! - `v1 v2 v3 ...` — a lattice-agreement decision, one line per round.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::{ProcessId, Seq};

/// Thread-safe append-only log writer. A single instance is shared by every
/// layer that needs to emit a record; writes are serialized under a mutex
/// because log lines must not interleave mid-line across threads.
pub struct LogWriter {
    inner: Mutex<BufWriter<File>>,
}

impl LogWriter {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(LogWriter {
            inner: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn log_broadcast(&self, seq: Seq) {
        self.write_line(&format!("b {seq}"));
    }

    pub fn log_delivery(&self, sender_id: ProcessId, seq: Seq) {
        self.write_line(&format!("d {sender_id} {seq}"));
    }

    /// LA decision line: space-separated values, order not significant.
    pub fn log_decision(&self, values: &[u32]) {
        let line = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        self.write_line(&line);
    }

    fn write_line(&self, line: &str) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = writeln!(guard, "{line}") {
            tracing::warn!(error = %err, "failed to write log line");
        }
    }

    pub fn flush(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = guard.flush() {
            tracing::warn!(error = %err, "failed to flush log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn writes_broadcast_and_delivery_lines() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let log = LogWriter::create(f.path()).unwrap();
        log.log_broadcast(1);
        log.log_broadcast(2);
        log.log_delivery(1, 1);
        log.flush();

        let mut contents = String::new();
        File::open(f.path()).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "b 1\nb 2\nd 1 1\n");
    }

    #[test]
    fn writes_decision_line() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let log = LogWriter::create(f.path()).unwrap();
        log.log_decision(&[3, 1, 2]);
        log.flush();

        let mut contents = String::new();
        File::open(f.path()).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "3 1 2\n");
    }

    #[test]
    fn concurrent_writers_do_not_interleave_lines() {
        use std::sync::Arc;
        use std::thread;

        let f = tempfile::NamedTempFile::new().unwrap();
        let log = Arc::new(LogWriter::create(f.path()).unwrap());
        let mut handles = Vec::new();
        for i in 0..8u32 {
            let log = log.clone();
            handles.push(thread::spawn(move || {
                for s in 0..50 {
                    log.log_broadcast(i * 1000 + s);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        log.flush();

        let mut contents = String::new();
        File::open(f.path()).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents.lines().count(), 400);
        for line in contents.lines() {
            assert!(line.starts_with("b "));
        }
    }
}
