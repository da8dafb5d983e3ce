//! # Progress — Atomic Key Search Counters
//!
//! Thread-safe counters shared between the rayon workers running key
//! searches and the background status reporter. Atomics keep updates
//! lock-free; the Mutex only guards the name of the key most recently
//! started (written once per key).
//!
//! ## Background Reporter
//!
//! A dedicated thread logs a status line every 30 seconds: anchor primes
//! drawn, partner candidates tested, resamples, and finished keys. It waits
//! on a condition variable between reports, so `stop()` wakes it at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const REPORT_INTERVAL: Duration = Duration::from_secs(30);

pub struct Progress {
    pub anchors: AtomicU64,
    pub partner_draws: AtomicU64,
    pub resamples: AtomicU64,
    pub keys_done: AtomicU64,
    pub keys_failed: AtomicU64,
    pub current: Mutex<String>,
    start: Instant,
    shutdown: Mutex<bool>,
    wake: Condvar,
}

impl Progress {
    pub fn new() -> Arc<Self> {
        Arc::new(Progress {
            anchors: AtomicU64::new(0),
            partner_draws: AtomicU64::new(0),
            resamples: AtomicU64::new(0),
            keys_done: AtomicU64::new(0),
            keys_failed: AtomicU64::new(0),
            current: Mutex::new(String::new()),
            start: Instant::now(),
            shutdown: Mutex::new(false),
            wake: Condvar::new(),
        })
    }

    pub fn set_current(&self, name: &str) {
        if let Ok(mut current) = self.current.lock() {
            *current = name.to_string();
        }
    }

    pub fn start_reporter(self: &Arc<Self>) -> thread::JoinHandle<()> {
        let progress = Arc::clone(self);
        thread::spawn(move || {
            let Ok(mut stopped) = progress.shutdown.lock() else {
                return;
            };
            while !*stopped {
                let Ok((guard, _)) = progress
                    .wake
                    .wait_timeout_while(stopped, REPORT_INTERVAL, |s| !*s)
                else {
                    return;
                };
                stopped = guard;
                if !*stopped {
                    progress.print_status();
                }
            }
        })
    }

    pub fn print_status(&self) {
        let elapsed = self.start.elapsed();
        let current = self
            .current
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default();
        let h = elapsed.as_secs() / 3600;
        let m = (elapsed.as_secs() % 3600) / 60;
        let s = elapsed.as_secs() % 60;
        info!(
            current = %current,
            anchors = self.anchors.load(Ordering::Relaxed),
            partner_draws = self.partner_draws.load(Ordering::Relaxed),
            resamples = self.resamples.load(Ordering::Relaxed),
            done = self.keys_done.load(Ordering::Relaxed),
            failed = self.keys_failed.load(Ordering::Relaxed),
            elapsed = format_args!("{:02}:{:02}:{:02}", h, m, s),
            "search progress"
        );
    }

    pub fn stop(&self) {
        if let Ok(mut stopped) = self.shutdown.lock() {
            *stopped = true;
        }
        self.wake.notify_all();
    }
}
