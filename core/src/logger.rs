// Global logging sink for stage2
//
// Messages go through the `log` facade and land in a fixed ring of
// truncated records. A console drains them when it is ready.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicUsize, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

const MAX_LOG_ENTRIES: usize = 64;
const MAX_MESSAGE_LEN: usize = 120;

/// One retained log line.
#[derive(Clone, Copy)]
pub struct LogEntry {
    pub level: Level,
    len: usize,
    text: [u8; MAX_MESSAGE_LEN],
}

impl LogEntry {
    const EMPTY: LogEntry = LogEntry {
        level: Level::Trace,
        len: 0,
        text: [0; MAX_MESSAGE_LEN],
    };

    pub fn message(&self) -> &str {
        // Truncation in `write_str` only ever cuts on a char boundary.
        core::str::from_utf8(&self.text[..self.len]).unwrap_or("")
    }
}

impl Write for LogEntry {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            let mut utf8 = [0u8; 4];
            let encoded = ch.encode_utf8(&mut utf8).as_bytes();
            if self.len + encoded.len() > MAX_MESSAGE_LEN {
                break;
            }
            self.text[self.len..self.len + encoded.len()].copy_from_slice(encoded);
            self.len += encoded.len();
        }
        Ok(())
    }
}

struct LogRing {
    entries: [LogEntry; MAX_LOG_ENTRIES],
    head: usize,
    len: usize,
}

static LOG_RING: Mutex<LogRing> = Mutex::new(LogRing {
    entries: [LogEntry::EMPTY; MAX_LOG_ENTRIES],
    head: 0,
    len: 0,
});
static LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

struct RingLogger;

static LOGGER: RingLogger = RingLogger;

impl Log for RingLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut entry = LogEntry::EMPTY;
        entry.level = record.level();
        let _ = write!(entry, "{}: {}", record.target(), record.args());

        let mut ring = LOG_RING.lock();
        let slot = (ring.head + ring.len) % MAX_LOG_ENTRIES;
        ring.entries[slot] = entry;
        if ring.len < MAX_LOG_ENTRIES {
            ring.len += 1;
        } else {
            // Oldest record is overwritten.
            ring.head = (ring.head + 1) % MAX_LOG_ENTRIES;
        }
        LOG_COUNT.fetch_add(1, Ordering::SeqCst);
    }

    fn flush(&self) {}
}

/// Install the ring logger as the global `log` sink.
///
/// Calling this more than once is harmless; later calls only adjust the level.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Hand every retained entry to `sink`, oldest first, and empty the ring.
pub fn drain<F: FnMut(&LogEntry)>(mut sink: F) {
    let mut ring = LOG_RING.lock();
    for i in 0..ring.len {
        let idx = (ring.head + i) % MAX_LOG_ENTRIES;
        sink(&ring.entries[idx]);
    }
    ring.head = 0;
    ring.len = 0;
}

/// Number of entries currently retained.
pub fn log_count() -> usize {
    LOG_RING.lock().len
}

/// Total number of records accepted since boot, including overwritten ones.
pub fn total_logged() -> usize {
    LOG_COUNT.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_truncates_on_char_boundary() {
        let mut entry = LogEntry::EMPTY;
        for _ in 0..MAX_MESSAGE_LEN {
            let _ = entry.write_str("é");
        }
        assert!(entry.message().len() <= MAX_MESSAGE_LEN);
        assert!(entry.message().chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_ring_keeps_newest() {
        init(LevelFilter::Debug);
        for i in 0..(MAX_LOG_ENTRIES + 3) {
            log::info!(target: "ring", "line {}", i);
        }
        let mut kept = alloc::vec::Vec::new();
        drain(|entry| {
            if entry.message().starts_with("ring: ") {
                kept.push(alloc::string::String::from(entry.message()));
            }
        });
        assert!(kept.len() <= MAX_LOG_ENTRIES);
        assert_eq!(
            kept.last().map(|s| s.as_str()),
            Some("ring: line 66")
        );
        assert!(total_logged() >= MAX_LOG_ENTRIES + 3);
    }
}
