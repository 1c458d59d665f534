// =============================================================================
// SCANNER MODULE
// =============================================================================
// Debounces the camera decode stream.
//
// The decoder reports the same physical label many times per second while it
// stays in view. A read equal to the last accepted one inside the scan delay
// window is dropped.
// =============================================================================

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
pub struct ScanDebouncer {
    scan_delay: Duration,
    stop_on_scan: bool,
    last: Option<(String, DateTime<Utc>)>,
    stopped: bool,
}

impl ScanDebouncer {
    pub fn new(scan_delay: std::time::Duration, stop_on_scan: bool) -> Self {
        Self {
            scan_delay: Duration::from_std(scan_delay).unwrap_or_else(|_| Duration::zero()),
            stop_on_scan,
            last: None,
            stopped: false,
        }
    }

    /// Returns true when the read should be processed.
    ///
    /// `halt_after` marks reads whose acceptance closes the stream when
    /// stop-on-scan is enabled (camera intake, not verification).
    pub fn accept(&mut self, code: &str, now: DateTime<Utc>, halt_after: bool) -> bool {
        if self.stopped {
            return false;
        }

        if let Some((last_code, at)) = &self.last {
            if last_code == code && now - *at < self.scan_delay {
                return false;
            }
        }

        self.last = Some((code.to_string(), now));
        if halt_after && self.stop_on_scan {
            self.stopped = true;
        }
        true
    }

    /// Re-opens the stream (camera shown again)
    pub fn restart(&mut self) {
        self.stopped = false;
        self.last = None;
    }
}
