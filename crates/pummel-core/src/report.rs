//! The periodic report line. Token set and ordering are a stable stdout
//! contract; everything else on stdout would break downstream scrapers.

use crate::stats::StatusHistogram;

// Index 0 is '0': sub-KiB values render with a trailing '0' after the two
// decimals, matching the historical output.
const UNIT_SUFFIXES: &[u8] = b"0KMGTPEZY";

/// Format a byte delta with a 1024-based unit suffix and two decimals.
/// Zero collapses to "0.000".
pub fn human_bytes(n: u64) -> String {
    if n == 0 {
        return "0.000".to_string();
    }
    let mut value = n as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNIT_SUFFIXES.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2}{}", value, UNIT_SUFFIXES[unit] as char)
}

/// Everything the reporter needs for one line.
#[derive(Clone, Copy, Debug)]
pub struct Snapshot {
    pub active: usize,
    pub keepalives: usize,
    pub statuses: StatusHistogram,
    pub end_reqs: u64,
    /// (in, out, debug) byte totals.
    pub bytes: (u64, u64, u64),
    pub latency_ms: Option<(f64, f64, f64)>,
    /// Soft stop has begun; overwrite any partial progress display.
    pub stopping: bool,
}

/// Emits one line per tick and keeps the previous-tick counters for deltas.
pub struct Reporter {
    times: u64,
    prev_end: u64,
    prev_bytes: (u64, u64, u64),
    tty: bool,
}

impl Reporter {
    pub fn new(tty: bool) -> Self {
        Reporter {
            times: 0,
            prev_end: 0,
            prev_bytes: (0, 0, 0),
            tty,
        }
    }

    /// Lines emitted so far.
    pub fn times(&self) -> u64 {
        self.times
    }

    /// Render the next line and rotate the delta snapshot.
    pub fn line(&mut self, s: &Snapshot) -> String {
        self.times += 1;
        let c = s.statuses.counts();
        let (min, avg, max) = s.latency_ms.unwrap_or((0.0, 0.0, 0.0));
        let line = format!(
            "times: {}, concurrency: {}, keepalives: {}, \
             0xx: {}, 1xx: {}, 2xx: {}, 3xx: {}, 4xx: {}, 5xx: {}, xxx: {}, \
             reqs: {}/s, bytes: {}/{}/{}, \
             min: {:.2}ms, avg: {:.2}ms, max: {:.2}ms",
            self.times,
            s.active,
            s.keepalives,
            c[0],
            c[1],
            c[2],
            c[3],
            c[4],
            c[5],
            c[6],
            s.end_reqs - self.prev_end,
            human_bytes(s.bytes.0.saturating_sub(self.prev_bytes.0)),
            human_bytes(s.bytes.1.saturating_sub(self.prev_bytes.1)),
            human_bytes(s.bytes.2.saturating_sub(self.prev_bytes.2)),
            min,
            avg,
            max,
        );
        self.prev_end = s.end_reqs;
        self.prev_bytes = s.bytes;
        line
    }

    /// Print the next line to stdout.
    pub fn emit(&mut self, s: &Snapshot) {
        let line = self.line(s);
        if s.stopping && self.tty {
            print!("\x1b[2K\r");
        }
        println!("{}", line);
    }
}
