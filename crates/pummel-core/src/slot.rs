//! Slot: a long-lived request lane that hosts successive transactions and
//! carries the reusable connection handle between them.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use chrono::Local;
use reqwest::Client;

use crate::config::RunConfig;
use crate::rotator::Cursor;
use crate::stats::ByteCounters;

/// Digits used in per-slot debug file names, enough for the largest id.
pub fn id_digits(concurrency: usize) -> usize {
    (((concurrency + 1) as f64).log10().ceil() as usize).max(1)
}

enum TraceSink {
    Stderr,
    File { path: PathBuf, file: Option<File> },
}

pub struct Slot {
    pub id: usize,
    pub cursor: Cursor,
    /// Requests finished on this slot.
    pub completed: u64,
    pub in_flight_start: Instant,
    /// Parked connection handle; present only after a keep-alive response
    /// and only while no transaction is in flight.
    pub parked: Option<Client>,
    /// Last response advertised keep-alive.
    pub keepalive: bool,
    sink: Option<TraceSink>,
}

impl Slot {
    pub fn new(id: usize, cfg: &RunConfig, concurrency: usize) -> Self {
        let sink = if let Some(dir) = &cfg.debug_dir {
            let path = dir.join(format!(
                ".debug-{:0width$}.log",
                id,
                width = id_digits(concurrency)
            ));
            match File::create(&path) {
                Ok(f) => Some(TraceSink::File {
                    path,
                    file: Some(f),
                }),
                Err(e) => {
                    eprintln!("warning: cannot open debug log {}: {}", path.display(), e);
                    None
                }
            }
        } else if cfg.verbose {
            Some(TraceSink::Stderr)
        } else {
            None
        };
        Slot {
            id,
            cursor: Cursor::default(),
            completed: 0,
            in_flight_start: Instant::now(),
            parked: None,
            keepalive: false,
            sink,
        }
    }

    pub fn trace_begin(&mut self, counters: &ByteCounters) {
        let seq = self.completed + 1;
        self.write_line(&format!("* BEGIN {}st REQUEST", seq), counters);
    }

    pub fn trace_end(&mut self, elapsed_secs: f64, counters: &ByteCounters) {
        let seq = self.completed + 1;
        self.write_line(
            &format!("* END {}st REQUEST - {:.3}", seq, elapsed_secs),
            counters,
        );
    }

    fn write_line(&mut self, msg: &str, counters: &ByteCounters) {
        let Some(sink) = &mut self.sink else { return };
        let line = format!("{} {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"), msg);
        counters.add_debug(line.len() as u64);
        match sink {
            TraceSink::Stderr => {
                let _ = std::io::stderr().write_all(line.as_bytes());
            }
            TraceSink::File { path, file } => {
                // Recreate (truncating) if the file was removed underneath us.
                if !path.exists() {
                    *file = File::create(&*path).ok();
                }
                if let Some(f) = file {
                    let _ = f.write_all(line.as_bytes());
                }
            }
        }
    }

    /// Drop per-run resources when the slot leaves the pool.
    pub fn retire(&mut self) {
        self.parked = None;
        self.keepalive = false;
        self.sink = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digits_cover_the_largest_slot_id() {
        assert_eq!(id_digits(1), 1);
        assert_eq!(id_digits(9), 1);
        assert_eq!(id_digits(10), 2);
        assert_eq!(id_digits(99), 2);
        assert_eq!(id_digits(100), 3);
    }

    #[test]
    fn debug_sink_writes_begin_and_end_lines() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RunConfig {
            debug_dir: Some(dir.path().to_path_buf()),
            ..RunConfig::default()
        };
        let counters = ByteCounters::new();
        let mut slot = Slot::new(3, &cfg, 10);
        slot.trace_begin(&counters);
        slot.trace_end(0.125, &counters);

        let path = dir.path().join(".debug-03.log");
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("* BEGIN 1st REQUEST"));
        assert!(text.contains("* END 1st REQUEST - 0.125"));
        let (_, _, debug) = counters.totals();
        assert_eq!(debug as usize, text.len());
    }

    #[test]
    fn debug_sink_reopens_when_file_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RunConfig {
            debug_dir: Some(dir.path().to_path_buf()),
            ..RunConfig::default()
        };
        let counters = ByteCounters::new();
        let mut slot = Slot::new(0, &cfg, 1);
        slot.trace_begin(&counters);

        let path = dir.path().join(".debug-0.log");
        std::fs::remove_file(&path).unwrap();
        slot.completed = 1;
        slot.trace_begin(&counters);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("* BEGIN 2st REQUEST"));
    }

    #[test]
    fn retire_clears_slot_resources() {
        let cfg = RunConfig::default();
        let mut slot = Slot::new(0, &cfg, 1);
        slot.keepalive = true;
        slot.retire();
        assert!(slot.parked.is_none());
        assert!(!slot.keepalive);
    }
}
