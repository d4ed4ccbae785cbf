//! Firmware log rings
//!
//! Firmware log lines land in a fixed byte ring that a host-side reader
//! drains with [`FirmwareLog::dump`]. Writers never block on the reader:
//! once the ring wraps past unread text, the oldest bytes are lost and the
//! next dump starts at the oldest byte still present.

use crate::clock::Clock;
use crate::{AbiError, Result};

/// Longest line accepted into the event ring
pub const MAX_EVENT_LINE: usize = 256;

/// Longest line copied into the debug ring; longer lines are truncated
pub const MAX_LOG_LINE: usize = 1024;

/// Default debug ring capacity
pub const DEFAULT_LOG_CAPACITY: usize = 64 * 1024;

const FW_TARGET: &str = "copro::fw";

struct ByteRing {
    buf: Vec<u8>,
    /// Total bytes ever written
    written: u64,
    /// Total bytes ever read
    read: u64,
}

impl ByteRing {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity.max(1)],
            written: 0,
            read: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn write(&mut self, bytes: &[u8]) {
        let capacity = self.capacity();
        // Only the tail of an oversized write can survive
        let skipped = bytes.len().saturating_sub(capacity);
        let bytes = &bytes[skipped..];
        self.written += skipped as u64;

        let start = (self.written % capacity as u64) as usize;
        let first = bytes.len().min(capacity - start);
        self.buf[start..start + first].copy_from_slice(&bytes[..first]);
        self.buf[..bytes.len() - first].copy_from_slice(&bytes[first..]);

        self.written += bytes.len() as u64;
    }

    /// Take everything written since the last read
    fn take_unread(&mut self) -> (Vec<u8>, u64) {
        let capacity = self.capacity() as u64;
        let oldest = self.written.saturating_sub(capacity);
        let lost = oldest.saturating_sub(self.read);
        let from = self.read.max(oldest);

        let mut out = Vec::with_capacity((self.written - from) as usize);
        let start = (from % capacity) as usize;
        let len = (self.written - from) as usize;
        let first = len.min(self.capacity() - start);
        out.extend_from_slice(&self.buf[start..start + first]);
        out.extend_from_slice(&self.buf[..len - first]);

        self.read = self.written;
        (out, lost)
    }

    fn unread(&self) -> usize {
        (self.written - self.read).min(self.capacity() as u64) as usize
    }
}

/// Debug and event rings for one bridge
pub struct FirmwareLog {
    clock: Clock,
    debug: spin::Mutex<ByteRing>,
    event: spin::Mutex<ByteRing>,
}

impl FirmwareLog {
    pub fn new(clock: Clock, capacity: usize) -> Self {
        Self {
            clock,
            debug: spin::Mutex::new(ByteRing::new(capacity)),
            event: spin::Mutex::new(ByteRing::new(capacity)),
        }
    }

    /// `[sssss.uuuuuu] [thread] text`
    fn format_line(&self, text: &str) -> String {
        let elapsed = self.clock.elapsed();
        let current = std::thread::current();
        let thread = current.name().unwrap_or("-");
        format!(
            "[{:5}.{:06}] [{}] {}",
            elapsed.as_secs(),
            elapsed.subsec_micros(),
            thread,
            text
        )
    }

    /// Forward a console line straight to the host log
    pub fn console(&self, text: &str) {
        log::info!(target: FW_TARGET, "[@][LIB] {}", text.trim_end());
    }

    /// Append a timestamped line to the debug ring
    pub fn write(&self, text: &str) {
        let line = self.format_line(text);
        let bytes = &line.as_bytes()[..line.len().min(MAX_LOG_LINE)];

        log::debug!(target: FW_TARGET, "{}", text.trim_end());
        self.debug.lock().write(bytes);
    }

    /// Append a timestamped line to the event ring
    ///
    /// # Errors
    /// `LogOverflow` (`-ENOMEM`) if the formatted line exceeds
    /// [`MAX_EVENT_LINE`]; nothing is written
    pub fn event(&self, text: &str) -> Result<()> {
        let line = self.format_line(text);
        if line.len() > MAX_EVENT_LINE {
            return Err(AbiError::LogOverflow { len: line.len() });
        }

        self.event.lock().write(line.as_bytes());
        Ok(())
    }

    /// Drain and log the debug ring text written since the previous dump
    pub fn dump(&self) -> String {
        let (bytes, lost) = self.debug.lock().take_unread();
        let text = String::from_utf8_lossy(&bytes).into_owned();

        if lost > 0 {
            log::warn!(target: FW_TARGET, "library log overrun, {} bytes lost", lost);
        }
        log::info!(target: FW_TARGET, "library log start({})", text.len());
        for line in text.lines() {
            log::info!(target: FW_TARGET, "{}", line);
        }
        log::info!(target: FW_TARGET, "library log end");

        text
    }

    /// Drain the event ring
    pub fn dump_events(&self) -> String {
        let (bytes, _) = self.event.lock().take_unread();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Unread bytes in the debug ring
    pub fn pending(&self) -> usize {
        self.debug.lock().unread()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format() {
        let log = FirmwareLog::new(Clock::new(), 1024);
        log.write("hello\n");

        let text = log.dump();
        assert!(text.starts_with('['));
        assert!(text.ends_with("hello\n"));

        // "[    0.000123] [" : five-wide seconds, six-digit micros
        let stamp = &text[1..text.find(']').unwrap()];
        let (secs, micros) = stamp.split_once('.').unwrap();
        assert_eq!(secs.len(), 5);
        assert_eq!(micros.len(), 6);
    }

    #[test]
    fn test_dump_returns_only_new_text() {
        let log = FirmwareLog::new(Clock::new(), 1024);
        log.write("one\n");
        assert!(log.dump().contains("one"));

        log.write("two\n");
        let second = log.dump();
        assert!(second.contains("two"));
        assert!(!second.contains("one"));
        assert_eq!(log.pending(), 0);
        assert!(log.dump().is_empty());
    }

    #[test]
    fn test_ring_wraparound_keeps_newest() {
        let mut ring = ByteRing::new(8);
        ring.write(b"abcdef");
        assert_eq!(ring.take_unread().0, b"abcdef");

        ring.write(b"ghij");
        let (bytes, lost) = ring.take_unread();
        assert_eq!(bytes, b"ghij");
        assert_eq!(lost, 0);

        ring.write(b"0123456789");
        let (bytes, lost) = ring.take_unread();
        assert_eq!(bytes, b"23456789");
        assert_eq!(lost, 2);
    }

    #[test]
    fn test_event_line_limit() {
        let log = FirmwareLog::new(Clock::new(), 4096);
        assert!(log.event("short").is_ok());

        let long = "x".repeat(MAX_EVENT_LINE);
        let err = log.event(&long).unwrap_err();
        assert_eq!(err.errno(), -libc::ENOMEM);

        let events = log.dump_events();
        assert!(events.contains("short"));
        assert!(!events.contains("xxxx"));
    }
}
